//! Mutating watermark removal
//!
//! Each page gets two passes over the link list read before any mutation:
//!
//! 1. Images. If at least one corner placement is covered by a target link,
//!    every image with a placement in the corner region is deleted, linked or
//!    not. A logo is often drawn over a separate background image, and both
//!    belong to the watermark. This can also take out a legitimate image that
//!    happens to sit in the corner of a watermarked page. Pages without a
//!    confirmed watermark keep all their images.
//! 2. Links. Every target link is deleted, back to front so the remaining
//!    annotation indices stay valid.

use std::collections::BTreeSet;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::backend::{ImageId, LinkAnnotation, PdfBackend, PdfDocument};
use crate::config::WatermarkConfig;
use crate::error::UnmarkError;
use crate::heuristic::{corner_region, is_in_corner, is_watermark_candidate, uri_matches_domain};
use crate::lopdf_backend::LopdfBackend;

/// Objects removed during one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RemovalTally {
    pub images_removed: usize,
    pub links_removed: usize,
}

impl RemovalTally {
    pub fn total(&self) -> usize {
        self.images_removed + self.links_removed
    }
}

impl std::ops::AddAssign for RemovalTally {
    fn add_assign(&mut self, other: Self) {
        self.images_removed += other.images_removed;
        self.links_removed += other.links_removed;
    }
}

pub struct WatermarkRemover<B: PdfBackend = LopdfBackend> {
    backend: B,
    config: WatermarkConfig,
}

impl Default for WatermarkRemover<LopdfBackend> {
    fn default() -> Self {
        Self::new(WatermarkConfig::default())
    }
}

impl WatermarkRemover<LopdfBackend> {
    pub fn new(config: WatermarkConfig) -> Self {
        Self::with_backend(LopdfBackend, config)
    }
}

impl<B: PdfBackend> WatermarkRemover<B> {
    pub fn with_backend(backend: B, config: WatermarkConfig) -> Self {
        Self { backend, config }
    }

    pub fn config(&self) -> &WatermarkConfig {
        &self.config
    }

    /// Write a cleaned copy of `input` to `output`.
    ///
    /// `input` is never modified. On error `output` must be treated as not
    /// written.
    pub fn clean(&self, input: &Path, output: &Path) -> Result<RemovalTally, UnmarkError> {
        let mut doc = self.backend.open(input)?;
        let tally = self.clean_document(&mut doc)?;
        doc.save(output)?;
        info!(
            "Cleaned {} -> {}: {} images, {} links removed",
            input.display(),
            output.display(),
            tally.images_removed,
            tally.links_removed
        );
        Ok(tally)
    }

    /// Run both passes over every page of an open document
    pub fn clean_document(&self, doc: &mut B::Document) -> Result<RemovalTally, UnmarkError> {
        let mut tally = RemovalTally::default();
        for page in 0..doc.page_count() {
            let links = doc.links(page)?;
            let page_tally = RemovalTally {
                images_removed: self.remove_corner_images(doc, page, &links)?,
                links_removed: self.remove_target_links(doc, page, &links)?,
            };
            debug!(
                "page {}: {} images, {} links removed",
                page, page_tally.images_removed, page_tally.links_removed
            );
            tally += page_tally;
        }
        Ok(tally)
    }

    fn remove_corner_images(
        &self,
        doc: &mut B::Document,
        page: usize,
        links: &[LinkAnnotation],
    ) -> Result<usize, UnmarkError> {
        let page_rect = doc.page_rect(page)?;
        let corner = corner_region(&page_rect, self.config.corner_threshold());
        let images = doc.images(page)?;

        let confirmed = images.iter().any(|image| {
            image
                .placements
                .iter()
                .any(|p| is_watermark_candidate(p, &page_rect, links, &self.config))
        });
        if !confirmed {
            return Ok(0);
        }

        let doomed: BTreeSet<ImageId> = images
            .iter()
            .filter(|image| image.placements.iter().any(|p| is_in_corner(p, &corner)))
            .map(|image| image.id)
            .collect();

        let mut removed = 0;
        for id in doomed {
            match doc.delete_image(page, id) {
                Ok(()) => removed += 1,
                Err(e) => warn!("page {}: could not delete image {}: {}", page, id, e),
            }
        }
        Ok(removed)
    }

    fn remove_target_links(
        &self,
        doc: &mut B::Document,
        page: usize,
        links: &[LinkAnnotation],
    ) -> Result<usize, UnmarkError> {
        let mut removed = 0;
        for link in links.iter().rev() {
            if uri_matches_domain(&link.uri, self.config.target_domain()) {
                doc.delete_link(page, link)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}
