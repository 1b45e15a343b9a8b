use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use crate::detect::result::BoundingBox;
use crate::frame::RgbFrame;
use anyhow::Result;
use image::Rgb;

/// Box outline thickness in pixels.
const LINE_WIDTH: u32 = 2;

const PALETTE: [[u8; 3]; 8] = [
    [255, 56, 56],
    [255, 157, 151],
    [255, 112, 31],
    [255, 178, 29],
    [207, 210, 49],
    [72, 249, 10],
    [26, 147, 52],
    [0, 212, 187],
];

/// Colour for a class label. Stable across runs so the same class always
/// gets the same outline.
pub fn class_color(label: &str) -> [u8; 3] {
    let sum: usize = label.bytes().map(usize::from).sum();
    PALETTE[sum % PALETTE.len()]
}

/// Render box outlines onto a copy of `frame`.
pub fn render_boxes(frame: &RgbFrame, boxes: &[BoundingBox]) -> Result<RgbFrame> {
    let (width, height) = frame.dimensions();
    let mut image = frame.clone().into_image()?;

    for bbox in boxes {
        let color = Rgb(class_color(&bbox.class_label));
        for inset in 0..LINE_WIDTH {
            let Some(rect) = clip_rect(bbox, inset, width, height) else {
                break;
            };
            draw_hollow_rect_mut(&mut image, rect, color);
        }
    }

    Ok(RgbFrame::from_image(image))
}

fn clip_rect(bbox: &BoundingBox, inset: u32, width: u32, height: u32) -> Option<Rect> {
    let max_x = width.saturating_sub(1) as f32;
    let max_y = height.saturating_sub(1) as f32;
    let x1 = bbox.x.clamp(0.0, max_x).round() as i32 + inset as i32;
    let y1 = bbox.y.clamp(0.0, max_y).round() as i32 + inset as i32;
    let x2 = bbox.right().clamp(0.0, max_x).round() as i32 - inset as i32;
    let y2 = bbox.bottom().clamp(0.0, max_y).round() as i32 - inset as i32;
    if x2 < x1 || y2 < y1 {
        return None;
    }
    Some(Rect::at(x1, y1).of_size((x2 - x1 + 1) as u32, (y2 - y1 + 1) as u32))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox {
            x,
            y,
            width: w,
            height: h,
            class_label: "person".to_string(),
            confidence: 0.8,
        }
    }

    #[test]
    fn outlines_box_edges_only() -> Result<()> {
        let frame = RgbFrame::filled(20, 20, [0, 0, 0]);
        let out = render_boxes(&frame, &[bbox(5.0, 5.0, 10.0, 10.0)])?;
        let color = class_color("person");
        assert_eq!(out.dimensions(), (20, 20));
        assert_eq!(out.pixel(5, 5), Some(color));
        assert_eq!(out.pixel(15, 10), Some(color));
        assert_eq!(out.pixel(10, 10), Some([0, 0, 0]));
        // Input untouched.
        assert_eq!(frame.pixel(5, 5), Some([0, 0, 0]));
        Ok(())
    }

    #[test]
    fn boxes_past_the_edge_are_clipped() -> Result<()> {
        let frame = RgbFrame::filled(8, 8, [0, 0, 0]);
        let out = render_boxes(&frame, &[bbox(-4.0, -4.0, 40.0, 40.0)])?;
        assert_eq!(out.pixel(0, 0), Some(class_color("person")));
        assert_eq!(out.pixel(7, 7), Some(class_color("person")));
        Ok(())
    }

    #[test]
    fn class_colors_are_stable() {
        assert_eq!(class_color("motorcycle"), class_color("motorcycle"));
    }
}
