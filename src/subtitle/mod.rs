//! Caption file generation (SRT only — the sole output format this crate's
//! control plane serves, per the HTTP surface's `/srt` route).

mod srt;

pub use srt::{generate_srt, parse_srt, SrtEntry};
