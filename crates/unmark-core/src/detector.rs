//! Read-only watermark scan

use std::path::Path;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::backend::{ImageId, PdfBackend, PdfDocument};
use crate::config::WatermarkConfig;
use crate::error::UnmarkError;
use crate::heuristic::{corner_region, is_in_corner, overlapping_target_link, uri_matches_domain};
use crate::lopdf_backend::LopdfBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    /// Corner image covered by a link to the target domain
    CornerImageWithLink,
    /// Any link to the target domain
    TargetLink,
}

/// One watermark element found on a page
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Finding {
    /// 0-based page index
    pub page: usize,
    pub kind: FindingKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

/// Result of [`WatermarkDetector::identify`]. A failed scan has no findings
/// and a message in `error`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DetectionReport {
    pub findings: Vec<Finding>,
    pub error: Option<String>,
}

impl DetectionReport {
    pub fn has_watermark(&self) -> bool {
        !self.findings.is_empty()
    }
}

pub struct WatermarkDetector<B: PdfBackend = LopdfBackend> {
    backend: B,
    config: WatermarkConfig,
}

impl Default for WatermarkDetector<LopdfBackend> {
    fn default() -> Self {
        Self::new(WatermarkConfig::default())
    }
}

impl WatermarkDetector<LopdfBackend> {
    pub fn new(config: WatermarkConfig) -> Self {
        Self::with_backend(LopdfBackend, config)
    }
}

impl<B: PdfBackend> WatermarkDetector<B> {
    pub fn with_backend(backend: B, config: WatermarkConfig) -> Self {
        Self { backend, config }
    }

    pub fn config(&self) -> &WatermarkConfig {
        &self.config
    }

    /// Scan `path`. Never fails: open or scan errors are reported in
    /// [`DetectionReport::error`] with an empty finding list.
    pub fn identify(&self, path: &Path) -> DetectionReport {
        match self.try_identify(path) {
            Ok(findings) => DetectionReport {
                findings,
                error: None,
            },
            Err(e) => {
                warn!("Watermark scan of {} failed: {}", path.display(), e);
                DetectionReport {
                    findings: Vec::new(),
                    error: Some(format!("Error searching for elements: {}", e)),
                }
            }
        }
    }

    pub fn try_identify(&self, path: &Path) -> Result<Vec<Finding>, UnmarkError> {
        let doc = self.backend.open(path)?;
        let findings = self.scan(&doc)?;
        info!(
            "Scanned {} pages of {}: {} findings",
            doc.page_count(),
            path.display(),
            findings.len()
        );
        Ok(findings)
    }

    /// Scan an already open document without mutating it
    pub fn scan(&self, doc: &B::Document) -> Result<Vec<Finding>, UnmarkError> {
        let domain = self.config.target_domain();
        let mut findings = Vec::new();

        for page in 0..doc.page_count() {
            let corner = corner_region(&doc.page_rect(page)?, self.config.corner_threshold());
            let links = doc.links(page)?;
            let before = findings.len();

            for image in doc.images(page)? {
                for placement in image.placements.iter().filter(|p| is_in_corner(p, &corner)) {
                    if let Some(link) = overlapping_target_link(placement, &links, domain) {
                        findings.push(Finding {
                            page,
                            kind: FindingKind::CornerImageWithLink,
                            image: Some(image.id),
                            uri: Some(link.uri.clone()),
                        });
                    }
                }
            }

            for link in links.iter().filter(|l| uri_matches_domain(&l.uri, domain)) {
                findings.push(Finding {
                    page,
                    kind: FindingKind::TargetLink,
                    image: None,
                    uri: Some(link.uri.clone()),
                });
            }

            debug!("page {}: {} findings", page, findings.len() - before);
        }

        Ok(findings)
    }
}
