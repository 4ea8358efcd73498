//! OCR adapter interface (§4.7).
//!
//! No concrete engine ships in this crate -- Tesseract/other bindings
//! are a consumer's choice, wired in by implementing [`OcrEngine`] and
//! handing the result to a `Region`-aware caller. This module exists so
//! that boundary is typed rather than left to duck-typing.

use crate::error::ZikuliError;
use crate::geometry::Rectangle;
use crate::image::Image;

/// Text layout analysis mode, mirroring Tesseract's page segmentation
/// modes closely enough that a binding can map this 1:1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSegMode {
    /// Treat the image as a single uniform block of text.
    SingleBlock,
    /// Treat the image as a single line of text.
    SingleLine,
    /// Treat the image as a single word.
    SingleWord,
    /// Find as much text as possible, in no particular order.
    Sparse,
}

/// A single recognized word and the box it occupies within the source
/// image.
#[derive(Debug, Clone)]
pub struct Word {
    pub text: String,
    pub bounds: Rectangle,
    pub confidence: f32,
}

/// Something that can turn pixels into text. Implementations own
/// whatever engine state (a Tesseract handle, a model file) that takes.
pub trait OcrEngine {
    /// Full recognized text of `image`, engine-default layout analysis.
    fn read_text(&self, image: &Image) -> Result<String, ZikuliError>;

    /// Word-level recognition with per-word bounding boxes and
    /// confidence.
    fn read_words(&self, image: &Image) -> Result<Vec<Word>, ZikuliError>;

    /// Change the page segmentation mode used by subsequent calls.
    fn set_page_seg_mode(&mut self, mode: PageSegMode);
}
