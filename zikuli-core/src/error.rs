//! Error taxonomy for `zikuli_core`.
//!
//! Every variant carries structured context rather than a bare string, so
//! callers can branch on the failure kind without string matching. See
//! the propagation policy: display/memory errors pass through unchanged,
//! capture errors inside `find` surface as `Capture` (never wrapped as
//! `FindFailed`), and `FindFailed` is the only variant subject to
//! [`crate::region::FindFailedResponse`] translation.

use thiserror::Error;

use crate::geometry::Rectangle;

/// Top-level error type for the `zikuli_core` library.
#[derive(Debug, Error)]
pub enum ZikuliError {
    /// No match scoring `>= similarity` was found.
    #[error("find failed: target not found in {region:?} after {elapsed_ms}ms")]
    FindFailed {
        target: String,
        region: Rectangle,
        elapsed_ms: u64,
    },

    /// A bounded operation exceeded its deadline.
    #[error("timeout: {operation} exceeded {budget_ms}ms budget")]
    Timeout { operation: String, budget_ms: u64 },

    /// The display connection was lost; the handle is no longer usable.
    #[error("display error: {cause}")]
    Display { cause: String },

    /// `capture` failed for a reason other than an invalid region.
    #[error("capture error: {cause} (rect={rect:?})")]
    Capture { cause: String, rect: Rectangle },

    /// Post-clamp capture rectangle has zero width or height.
    #[error("invalid region: requested {requested:?}, clamped to {clamped:?}")]
    InvalidRegion {
        requested: Rectangle,
        clamped: Rectangle,
    },

    /// A capture rectangle fell entirely outside the virtual screen.
    #[error("region out of bounds: {rect:?} does not intersect the virtual screen")]
    RegionOutOfBounds { rect: Rectangle },

    /// The display server returned fewer bytes than `width*height*bpp`.
    #[error("incomplete capture data: expected {expected} bytes, got {actual}")]
    IncompleteData { expected: usize, actual: usize },

    /// A synthetic input call (pointer/button/key) failed.
    #[error("input error: {event_kind} failed: {cause}")]
    InputError { event_kind: String, cause: String },

    /// A caller-supplied argument was structurally invalid.
    #[error("invalid argument: {argument}: {detail}")]
    InvalidArgument { argument: String, detail: String },

    /// An allocation of the requested size could not be satisfied.
    #[error("out of memory: requested {size} bytes")]
    OutOfMemory { size: usize },
}

impl ZikuliError {
    /// `true` for the sole error kind subject to `FindFailedResponse`
    /// translation; everything else bypasses it per the propagation
    /// policy.
    pub fn is_find_failed(&self) -> bool {
        matches!(self, ZikuliError::FindFailed { .. })
    }
}
