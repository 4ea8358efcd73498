//! `zikuli_core` -- visual GUI automation: screen capture, template
//! matching, and the `Region`/`Match` state machine that drives
//! synthetic input at a match's location.
//!
//! This crate contains the matching pipeline and its driving state
//! machine only. It can be consumed by:
//! - `zikuli-cli` (the `zikuli` command-line surface)
//! - any embedder that wants `Region::find`/`click`/`type_text` as a
//!   library primitive
//!
//! # Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`geometry`] | `Point`/`Rectangle`, overflow-safe integer math |
//! | [`image`] | Owned pixel buffers, sub-image extraction, format conversion |
//! | [`display`] | `Display` trait + `X11Display` (capture, synthetic input, monitor enumeration) |
//! | [`monitor`] | `Monitor`/`MonitorRegistry`, virtual-screen bounds |
//! | [`matcher`] | Single-resolution template correlation (plain-color, black-invert, NCC) |
//! | [`pyramid`] | Coarse-to-fine multi-resolution search, `find_all`, still-there cache |
//! | [`region`] | `Pattern`/`Match`/`Region`, `FindFailedResponse` policy |
//! | [`error`] | `ZikuliError` taxonomy |
//! | [`ocr`] | `OcrEngine` trait (interface only -- no engine shipped) |
//! | [`config`] | Process-wide defaults (TOML, loaded from the user config dir) |

pub mod config;
pub mod display;
pub mod error;
pub mod geometry;
pub mod image;
pub mod matcher;
pub mod monitor;
pub mod ocr;
pub mod pyramid;
pub mod region;

pub use error::ZikuliError;
pub use geometry::{Point, Rectangle};
pub use image::{Image, PixelFormat};
pub use monitor::{Monitor, MonitorRegistry};
pub use region::{FindFailedResponse, Match, Pattern, Region};
