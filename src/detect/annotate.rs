//! Detection overlay for the render path.
//!
//! Boxes are burned into a copy of the frame; the original stays clean for
//! snapshot evidence. Colors are category-coded: green for identified,
//! red for unidentified.

use crate::detect::engine::{BoundingBox, RawDetection};
use crate::frame::{AnnotatedFrame, Frame};
use crate::{map_label, Category};

const IDENTIFIED_COLOR: [u8; 3] = [46, 204, 64];
const UNIDENTIFIED_COLOR: [u8; 3] = [217, 54, 43];
const BORDER_PX: usize = 2;

/// Produce the render-ready frame for one inference cycle.
///
/// Called once per processed frame even with zero detections, so the
/// render path always has something current to show.
pub fn annotate_frame(frame: &Frame, detections: &[RawDetection]) -> AnnotatedFrame {
    let mut pixels = frame.pixels.clone();
    for detection in detections {
        let color = match map_label(&detection.label) {
            Category::Identified => IDENTIFIED_COLOR,
            Category::Unidentified => UNIDENTIFIED_COLOR,
        };
        draw_box(
            &mut pixels,
            frame.width as usize,
            frame.height as usize,
            detection.bbox,
            color,
        );
    }

    AnnotatedFrame {
        pixels,
        width: frame.width,
        height: frame.height,
        detection_count: detections.len(),
        captured_at: frame.captured_at,
    }
}

fn draw_box(pixels: &mut [u8], width: usize, height: usize, bbox: BoundingBox, color: [u8; 3]) {
    if width == 0 || height == 0 {
        return;
    }

    // Normalized coordinates, clamped into the frame.
    let x0 = ((bbox.x.clamp(0.0, 1.0)) * width as f32) as usize;
    let y0 = ((bbox.y.clamp(0.0, 1.0)) * height as f32) as usize;
    let x1 = (((bbox.x + bbox.w).clamp(0.0, 1.0)) * width as f32) as usize;
    let y1 = (((bbox.y + bbox.h).clamp(0.0, 1.0)) * height as f32) as usize;

    let x0 = x0.min(width - 1);
    let y0 = y0.min(height - 1);
    let x1 = x1.min(width - 1);
    let y1 = y1.min(height - 1);
    if x1 <= x0 || y1 <= y0 {
        return;
    }

    for t in 0..BORDER_PX {
        // Horizontal edges.
        let top = (y0 + t).min(y1);
        let bottom = y1.saturating_sub(t).max(y0);
        for x in x0..=x1 {
            put_pixel(pixels, width, x, top, color);
            put_pixel(pixels, width, x, bottom, color);
        }
        // Vertical edges.
        let left = (x0 + t).min(x1);
        let right = x1.saturating_sub(t).max(x0);
        for y in y0..=y1 {
            put_pixel(pixels, width, left, y, color);
            put_pixel(pixels, width, right, y, color);
        }
    }
}

fn put_pixel(pixels: &mut [u8], width: usize, x: usize, y: usize, color: [u8; 3]) {
    let offset = (y * width + x) * 3;
    if offset + 3 <= pixels.len() {
        pixels[offset..offset + 3].copy_from_slice(&color);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;

    fn black_frame(width: u32, height: u32) -> Frame {
        Frame::new(
            vec![0u8; (width * height * 3) as usize],
            width,
            height,
            Local::now(),
        )
    }

    fn detection(label: &str, bbox: BoundingBox) -> RawDetection {
        RawDetection {
            label: label.to_string(),
            confidence: 0.9,
            bbox,
        }
    }

    fn pixel(frame: &AnnotatedFrame, x: usize, y: usize) -> [u8; 3] {
        let off = (y * frame.width as usize + x) * 3;
        [
            frame.pixels[off],
            frame.pixels[off + 1],
            frame.pixels[off + 2],
        ]
    }

    #[test]
    fn no_detections_leaves_pixels_untouched() {
        let frame = black_frame(8, 8);
        let annotated = annotate_frame(&frame, &[]);
        assert_eq!(annotated.pixels, frame.pixels);
        assert_eq!(annotated.detection_count, 0);
    }

    #[test]
    fn box_edges_are_painted_with_category_color() {
        let frame = black_frame(20, 20);
        let annotated = annotate_frame(
            &frame,
            &[detection(
                "no_id",
                BoundingBox {
                    x: 0.25,
                    y: 0.25,
                    w: 0.5,
                    h: 0.5,
                },
            )],
        );

        assert_eq!(annotated.detection_count, 1);
        // Top-left corner of the box is at (5, 5) in a 20x20 frame.
        assert_eq!(pixel(&annotated, 5, 5), UNIDENTIFIED_COLOR);
        // Interior stays black.
        assert_eq!(pixel(&annotated, 10, 10), [0, 0, 0]);
    }

    #[test]
    fn identified_boxes_use_the_green_pen() {
        let frame = black_frame(20, 20);
        let annotated = annotate_frame(
            &frame,
            &[detection(
                "wearing_id",
                BoundingBox {
                    x: 0.0,
                    y: 0.0,
                    w: 1.0,
                    h: 1.0,
                },
            )],
        );
        assert_eq!(pixel(&annotated, 0, 0), IDENTIFIED_COLOR);
    }

    #[test]
    fn out_of_range_boxes_are_clamped() {
        let frame = black_frame(10, 10);
        // Must not panic or write out of bounds.
        let annotated = annotate_frame(
            &frame,
            &[detection(
                "id",
                BoundingBox {
                    x: 0.8,
                    y: 0.8,
                    w: 5.0,
                    h: 5.0,
                },
            )],
        );
        assert_eq!(annotated.pixels.len(), frame.pixels.len());
    }

    #[test]
    fn degenerate_boxes_are_skipped() {
        let frame = black_frame(10, 10);
        let annotated = annotate_frame(
            &frame,
            &[detection(
                "id",
                BoundingBox {
                    x: 0.5,
                    y: 0.5,
                    w: 0.0,
                    h: 0.0,
                },
            )],
        );
        assert_eq!(annotated.pixels, frame.pixels);
    }
}
