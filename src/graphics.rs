//! GraphicsController - turns draw styles into images
//!
//! No pixels are composed. An image is the resolved style plus a stable
//! fingerprint (sha256 of its JSON), which is what panels and the emulator
//! compare to skip redundant draws.

use crate::controls::DrawStyle;
use crate::page::ControlLocation;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::trace;

/// Rendered face of one grid slot
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageResult {
    /// Hex sha256 of the style; equal keys draw identically
    pub key: String,
    /// `None` renders a blank slot
    pub style: Option<DrawStyle>,
    /// Page shown by a page-number button
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
}

impl ImageResult {
    pub fn blank() -> Self {
        Self::new(None, None)
    }

    pub fn new(style: Option<DrawStyle>, page_number: Option<u32>) -> Self {
        let mut hasher = Sha256::new();
        match serde_json::to_vec(&(&style, page_number)) {
            Ok(bytes) => hasher.update(&bytes),
            Err(_) => hasher.update(b"unserializable"),
        }
        Self {
            key: hex::encode(hasher.finalize()),
            style,
            page_number,
        }
    }

    pub fn is_blank(&self) -> bool {
        self.style.is_none()
    }
}

/// Last rendered image per location
#[derive(Default)]
pub struct GraphicsController {
    rendered: HashMap<ControlLocation, ImageResult>,
}

impl GraphicsController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render a slot; returns the image and whether it differs from the last one
    pub fn render(&mut self, location: &ControlLocation, style: Option<DrawStyle>) -> (ImageResult, bool) {
        let page_number = matches!(style, Some(DrawStyle::PageNumber)).then_some(location.page_number);
        let image = ImageResult::new(style, page_number);
        let changed = self.rendered.get(location).map(|old| old.key != image.key).unwrap_or(true);
        if changed {
            trace!(%location, key = %image.key, "Rendered");
            self.rendered.insert(*location, image.clone());
        }
        (image, changed)
    }

    pub fn cached(&self, location: &ControlLocation) -> Option<&ImageResult> {
        self.rendered.get(location)
    }

    pub fn forget(&mut self, location: &ControlLocation) {
        self.rendered.remove(location);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_style_same_key() {
        let a = ImageResult::new(Some(DrawStyle::PageUp), None);
        let b = ImageResult::new(Some(DrawStyle::PageUp), None);
        let c = ImageResult::new(Some(DrawStyle::PageDown), None);
        assert_eq!(a.key, b.key);
        assert_ne!(a.key, c.key);
        assert_eq!(a.key.len(), 64);
    }

    #[test]
    fn test_render_reports_changes() {
        let mut graphics = GraphicsController::new();
        let loc = ControlLocation::new(1, 0, 0);
        assert!(graphics.render(&loc, Some(DrawStyle::PageUp)).1);
        assert!(!graphics.render(&loc, Some(DrawStyle::PageUp)).1);
        assert!(graphics.render(&loc, None).1);
    }

    #[test]
    fn test_page_number_depends_on_page() {
        let mut graphics = GraphicsController::new();
        let (one, _) = graphics.render(&ControlLocation::new(1, 0, 0), Some(DrawStyle::PageNumber));
        let (two, _) = graphics.render(&ControlLocation::new(2, 0, 0), Some(DrawStyle::PageNumber));
        assert_eq!(two.page_number, Some(2));
        assert_ne!(one.key, two.key);
    }
}
