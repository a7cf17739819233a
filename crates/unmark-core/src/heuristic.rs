//! The watermark rule
//!
//! A watermark is an image whose top-left corner sits inside the bottom-right
//! corner region of the page and which is covered by a link to the target
//! domain. The detector and the remover both decide through the functions in
//! this module and nowhere else.

use crate::backend::LinkAnnotation;
use crate::config::WatermarkConfig;
use crate::geometry::Rect;

/// Bottom-right sub-rectangle of `page_rect` starting at `threshold` of its
/// width and height
pub fn corner_region(page_rect: &Rect, threshold: f64) -> Rect {
    Rect::new(
        page_rect.x0 + page_rect.width() * threshold,
        page_rect.y0 + page_rect.height() * threshold,
        page_rect.x1,
        page_rect.y1,
    )
}

/// Only the placement's top-left corner is tested; the image may extend past
/// the page edge.
pub fn is_in_corner(placement: &Rect, corner: &Rect) -> bool {
    placement.x0 >= corner.x0 && placement.y0 >= corner.y0
}

/// Case-insensitive substring test.
///
/// This is containment, not host equality: `https://notgamma.app.evil.com`
/// matches `gamma.app`. An empty domain matches nothing.
pub fn uri_matches_domain(uri: &str, target_domain: &str) -> bool {
    if target_domain.is_empty() {
        return false;
    }
    uri.to_lowercase().contains(&target_domain.to_lowercase())
}

/// First link to the target domain whose rectangle overlaps `placement`
pub fn overlapping_target_link<'a>(
    placement: &Rect,
    page_links: &'a [LinkAnnotation],
    target_domain: &str,
) -> Option<&'a LinkAnnotation> {
    page_links.iter().find(|link| {
        placement.intersects(&link.rect) && uri_matches_domain(&link.uri, target_domain)
    })
}

/// Whether one placement of an image on a page is part of the watermark
pub fn is_watermark_candidate(
    placement: &Rect,
    page_rect: &Rect,
    page_links: &[LinkAnnotation],
    config: &WatermarkConfig,
) -> bool {
    let corner = corner_region(page_rect, config.corner_threshold());
    is_in_corner(placement, &corner)
        && overlapping_target_link(placement, page_links, config.target_domain()).is_some()
}
