//! Pixel-space to document-space coordinate conversion.
//!
//! Render space has its origin at the top-left with Y growing downward. Document space is
//! measured in points with its origin at the bottom-left and Y growing upward, matching the
//! native PDF page convention the viewer overlays text on.

use crate::models::{Line, NormalizedLine, Rect};

/// Scale and flip between one rendered image and its page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageGeometry {
    pub render_width_px: f64,
    pub render_height_px: f64,
    pub page_width_pt: f64,
    pub page_height_pt: f64,
}

impl PageGeometry {
    pub fn new(
        render_width_px: u32,
        render_height_px: u32,
        page_width_pt: f64,
        page_height_pt: f64,
    ) -> Self {
        Self {
            render_width_px: f64::from(render_width_px),
            render_height_px: f64::from(render_height_px),
            page_width_pt,
            page_height_pt,
        }
    }

    /// Points per pixel along X.
    pub fn scale_x(&self) -> f64 {
        self.page_width_pt / self.render_width_px
    }

    /// Points per pixel along Y. Independent of X so non-uniform renders stay exact.
    pub fn scale_y(&self) -> f64 {
        self.page_height_pt / self.render_height_px
    }

    /// Pixel rectangle (top-left origin) to document rectangle (bottom-left origin).
    pub fn to_document(&self, px: Rect) -> Rect {
        let (sx, sy) = (self.scale_x(), self.scale_y());
        Rect {
            x: px.x * sx,
            y: self.page_height_pt - (px.y + px.height) * sy,
            width: px.width * sx,
            height: px.height * sy,
        }
    }

    /// Inverse of [`to_document`](Self::to_document).
    pub fn to_pixels(&self, doc: Rect) -> Rect {
        let (sx, sy) = (self.scale_x(), self.scale_y());
        let height = doc.height / sy;
        Rect {
            x: doc.x / sx,
            y: (self.page_height_pt - doc.y) / sy - height,
            width: doc.width / sx,
            height,
        }
    }
}

/// Reduce every line's polygon to its bounding box and express it in document points.
///
/// Line order, text and confidence are preserved.
pub fn normalize(lines: &[Line], geometry: &PageGeometry) -> Vec<NormalizedLine> {
    lines
        .iter()
        .map(|line| NormalizedLine {
            text: line.text().to_string(),
            confidence: line.confidence(),
            rect: geometry.to_document(line.pixel_bounds()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Point;

    fn line(text: &str, x0: f64, y0: f64, x1: f64, y1: f64) -> Line {
        Line::new(
            text,
            0.95,
            vec![
                Point::new(x0, y0),
                Point::new(x1, y0),
                Point::new(x1, y1),
                Point::new(x0, y1),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_identity_scale_flips_y() {
        // 72 dpi render: one pixel per point
        let geometry = PageGeometry::new(100, 100, 100.0, 100.0);
        let out = normalize(&[line("Hello", 10.0, 10.0, 50.0, 30.0)], &geometry);

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].text, "Hello");
        assert_eq!(out[0].confidence, 0.95);
        assert_eq!(out[0].rect, Rect { x: 10.0, y: 70.0, width: 40.0, height: 20.0 });
    }

    #[test]
    fn test_150_dpi_scale() {
        // 300x600 px at 150 dpi is a 144x288 pt page
        let geometry = PageGeometry::new(300, 600, 144.0, 288.0);
        let out = normalize(&[line("Page 1 Line 1", 10.0, 10.0, 100.0, 30.0)], &geometry);
        let rect = out[0].rect;

        assert!((rect.x - 4.8).abs() < 1e-9);
        assert!((rect.width - 43.2).abs() < 1e-9);
        assert!((rect.height - 9.6).abs() < 1e-9);
        // top edge at 288 - 10 * 0.48 = 283.2
        assert!((rect.y + rect.height - 283.2).abs() < 1e-9);
    }

    #[test]
    fn test_independent_axis_scales() {
        let geometry = PageGeometry::new(200, 100, 100.0, 100.0);
        let rect = geometry.to_document(Rect { x: 20.0, y: 10.0, width: 40.0, height: 10.0 });

        assert_eq!(rect.x, 10.0);
        assert_eq!(rect.width, 20.0);
        assert_eq!(rect.height, 10.0);
        assert_eq!(rect.y, 80.0);
    }

    #[test]
    fn test_round_trip() {
        let geometry = PageGeometry::new(1275, 1650, 612.0, 792.0);
        let px = Rect { x: 101.5, y: 333.25, width: 420.0, height: 38.5 };
        let back = geometry.to_pixels(geometry.to_document(px));

        assert!((back.x - px.x).abs() < 1e-9);
        assert!((back.y - px.y).abs() < 1e-9);
        assert!((back.width - px.width).abs() < 1e-9);
        assert!((back.height - px.height).abs() < 1e-9);
    }

    #[test]
    fn test_empty_input() {
        let geometry = PageGeometry::new(10, 10, 10.0, 10.0);
        assert!(normalize(&[], &geometry).is_empty());
    }

    #[test]
    fn test_preserves_unicode_text_and_order() {
        let geometry = PageGeometry::new(100, 100, 48.0, 48.0);
        let out = normalize(
            &[
                line("Special Characters: 你好", 0.0, 0.0, 10.0, 10.0),
                line("Second", 0.0, 20.0, 10.0, 30.0),
            ],
            &geometry,
        );
        assert_eq!(out[0].text, "Special Characters: 你好");
        assert_eq!(out[1].text, "Second");
    }
}
