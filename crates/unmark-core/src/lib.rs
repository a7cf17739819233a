//! Corner watermark detection and removal for exported PDFs
//!
//! A watermark here is an image drawn in the bottom-right corner of a page
//! and covered by a hyperlink to the vendor's domain (`gamma.app` by
//! default). Two entry points share one rule set:
//!
//! - [`WatermarkDetector`]: read-only scan producing [`Finding`]s
//! - [`WatermarkRemover`]: deletes the watermark images and links and writes
//!   a cleaned copy
//!
//! PDF access goes through the [`PdfBackend`]/[`PdfDocument`] traits;
//! [`LopdfBackend`] is the implementation backed by lopdf.

pub mod backend;
pub mod config;
mod content;
pub mod detector;
pub mod error;
pub mod geometry;
pub mod heuristic;
pub mod lopdf_backend;
pub mod remover;

pub use backend::{ImageId, LinkAnnotation, PageImage, PdfBackend, PdfDocument};
pub use config::{WatermarkConfig, DEFAULT_CORNER_THRESHOLD, DEFAULT_TARGET_DOMAIN};
pub use detector::{DetectionReport, Finding, FindingKind, WatermarkDetector};
pub use error::UnmarkError;
pub use geometry::Rect;
pub use heuristic::{corner_region, is_watermark_candidate, uri_matches_domain};
pub use lopdf_backend::{LopdfBackend, LopdfDocument};
pub use remover::{RemovalTally, WatermarkRemover};
