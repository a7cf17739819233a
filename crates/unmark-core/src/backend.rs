//! PDF access capability interface
//!
//! The detector and remover only talk to documents through these traits, so
//! the heuristic never depends on the shape of a particular PDF library.
//! [`crate::lopdf_backend`] provides the implementation used in practice.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::UnmarkError;
use crate::geometry::Rect;

/// Indirect object reference of an image XObject.
///
/// Stable for the lifetime of one open document, meaningless across opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ImageId {
    pub number: u32,
    pub generation: u16,
}

impl ImageId {
    pub fn new(number: u32, generation: u16) -> Self {
        Self { number, generation }
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} R", self.number, self.generation)
    }
}

/// An image resource of a page together with every place it is drawn
#[derive(Debug, Clone, PartialEq)]
pub struct PageImage {
    pub id: ImageId,
    /// One rectangle per paint of the image; empty if it is never drawn
    pub placements: Vec<Rect>,
}

/// A `/Link` annotation on a page
#[derive(Debug, Clone, PartialEq)]
pub struct LinkAnnotation {
    /// Position in the page's `/Annots` array
    pub index: usize,
    /// Clickable area in page space
    pub rect: Rect,
    /// Target URI, empty for links without a URI action
    pub uri: String,
}

/// Opens documents. Every call yields an independent handle.
pub trait PdfBackend {
    type Document: PdfDocument;

    fn open(&self, path: &Path) -> Result<Self::Document, UnmarkError>;
}

/// An open document. Pages are addressed by 0-based index.
pub trait PdfDocument {
    fn page_count(&self) -> usize;

    /// Visible page box in page space, origin at (0, 0)
    fn page_rect(&self, page: usize) -> Result<Rect, UnmarkError>;

    fn images(&self, page: usize) -> Result<Vec<PageImage>, UnmarkError>;

    /// Link annotations in `/Annots` order
    fn links(&self, page: usize) -> Result<Vec<LinkAnnotation>, UnmarkError>;

    /// Stop drawing `image` on `page`. Other pages sharing the resource keep it.
    fn delete_image(&mut self, page: usize, image: ImageId) -> Result<(), UnmarkError>;

    /// Remove the annotation at `link.index`. Indices after it shift down by
    /// one, so callers deleting several links go from the back.
    fn delete_link(&mut self, page: usize, link: &LinkAnnotation) -> Result<(), UnmarkError>;

    fn save(&mut self, path: &Path) -> Result<(), UnmarkError>;
}
