//! Pixel geometry → percent-based, resolution-independent geometry.
//!
//! Quadrilaterals are anchored at their top-left corner: position is the
//! top-left vertex, width is the length of the top edge, height the length of
//! the left edge, and the angle is the slope of the top edge. Centre-anchored
//! boxes keep their centre as the rotation pivot.

use std::cmp::Ordering;

use crate::config::NormalizerConfig;

use super::{
    BoxDimensions, BoxPosition, ContextResolution, OcrRegion, RawBox, RawGeometry, RawOcrResult,
    RawTextItem, RawTextLine, RegionSize, RotatedBox, ScalableBox, ScalableItem, ScalableResult,
    ScalableSymbol, ScalableTextLine, ScalableWord, TransformOrigin,
};

/// Converts raw engine output into [`ScalableResult`]s. Pure and deterministic.
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    config: NormalizerConfig,
}

impl Normalizer {
    pub fn new(config: NormalizerConfig) -> Self {
        Self { config }
    }

    /// Normalize a complete engine response into a single full-frame region.
    pub fn normalize_result(
        &self,
        raw: &RawOcrResult,
        engine_name: &str,
        language: &str,
    ) -> ScalableResult {
        let ctx = raw.context_resolution;
        let items = raw
            .items
            .iter()
            .map(|item| self.normalize_item(item, ctx))
            .collect();

        ScalableResult {
            id: raw.id.clone(),
            context_resolution: ctx,
            regions: vec![OcrRegion {
                id: None,
                position: BoxPosition::default(),
                size: RegionSize::default(),
                items,
            }],
            engine_name: engine_name.to_string(),
            language: language.to_string(),
        }
    }

    /// Normalize any supported geometry. `text_len` feeds the vertical heuristic.
    pub fn normalize_geometry(
        &self,
        geometry: &RawGeometry,
        ctx: ContextResolution,
        text_len: usize,
    ) -> ScalableBox {
        match geometry {
            RawGeometry::Quad(quad) => self.normalize_quad(quad, ctx, text_len),
            RawGeometry::Rotated(rotated) => self.normalize_rotated(rotated, ctx, text_len),
        }
    }

    /// Normalize a four-corner box.
    pub fn normalize_quad(&self, quad: &RawBox, ctx: ContextResolution, text_len: usize) -> ScalableBox {
        let width_px = f64::from(ctx.width);
        let height_px = f64::from(ctx.height);
        let tl = quad.top_left;
        let tr = quad.top_right;
        let bl = quad.bottom_left;

        let left = percent_of(tl.x, width_px);
        let top = percent_of(tl.y, height_px);

        // Screen y grows downward; flip it so a clockwise tilt reads positive.
        let dx = tr.x - tl.x;
        let inverted_dy = -(tr.y - tl.y);
        let negative = inverted_dy > 0.0;
        let rise = inverted_dy.abs();
        let angle_degrees = if rise <= 0.0 || dx <= 0.0 {
            0.0
        } else {
            let degrees = (rise / dx).atan().to_degrees();
            if negative {
                -degrees
            } else {
                degrees
            }
        };

        let top_edge_px = rise.hypot(dx);
        let width = match percent_of(top_edge_px, width_px) {
            w if w != 0.0 => w,
            _ => dx,
        };

        let left_edge_px = (tl.y - bl.y).abs().hypot((tl.x - bl.x).abs());
        let height = percent_of(left_edge_px, height_px);

        let is_vertical = self.is_vertical(top_edge_px, left_edge_px, angle_degrees, text_len);

        ScalableBox {
            position: BoxPosition { left, top },
            dimensions: BoxDimensions { width, height },
            angle_degrees,
            is_vertical,
            transform_origin: TransformOrigin::TopLeft,
        }
    }

    /// Normalize a centre-anchored box whose lengths are already fractions of the image.
    pub fn normalize_rotated(
        &self,
        rotated: &RotatedBox,
        ctx: ContextResolution,
        text_len: usize,
    ) -> ScalableBox {
        let angle_degrees = rotated.rotation_radians.to_degrees();
        let width_px = rotated.width * f64::from(ctx.width);
        let height_px = rotated.height * f64::from(ctx.height);

        ScalableBox {
            position: BoxPosition {
                left: (rotated.center_x - rotated.width / 2.0) * 100.0,
                top: (rotated.center_y - rotated.height / 2.0) * 100.0,
            },
            dimensions: BoxDimensions {
                width: rotated.width * 100.0,
                height: rotated.height * 100.0,
            },
            angle_degrees,
            is_vertical: self.is_vertical(width_px, height_px, angle_degrees, text_len),
            transform_origin: TransformOrigin::Center,
        }
    }

    fn is_vertical(&self, width_px: f64, height_px: f64, angle_degrees: f64, text_len: usize) -> bool {
        let tall = height_px > width_px * self.config.vertical_aspect_ratio
            && text_len > self.config.vertical_min_chars;
        let steep = self
            .config
            .steep_angle_degrees
            .is_some_and(|limit| angle_degrees.abs() > limit);
        tall || steep
    }

    fn normalize_item(&self, item: &RawTextItem, ctx: ContextResolution) -> ScalableItem {
        let mut bounds = self.normalize_geometry(&item.geometry, ctx, item.text_len());
        if let Some(vertical) = item.is_vertical {
            bounds.is_vertical = vertical;
        }

        let mut text: Vec<ScalableTextLine> = item
            .lines
            .iter()
            .map(|line| self.normalize_line(line, ctx, bounds.is_vertical))
            .collect();

        if self.config.reorder_lines {
            reorder(&mut text, bounds.is_vertical);
        }

        ScalableItem {
            id: item.id.clone(),
            text,
            bounds,
            recognition_score: item.recognition_score,
            classification_score: item.classification_score,
            classification_label: item.classification_label,
        }
    }

    fn normalize_line(
        &self,
        line: &RawTextLine,
        ctx: ContextResolution,
        parent_vertical: bool,
    ) -> ScalableTextLine {
        let bounds = line.geometry.as_ref().map(|g| {
            let mut b = self.normalize_geometry(g, ctx, line.content.chars().count());
            b.is_vertical |= parent_vertical;
            b
        });
        let vertical = bounds.map_or(parent_vertical, |b| b.is_vertical);

        let words = line
            .words
            .iter()
            .map(|w| {
                let mut b = self.normalize_geometry(&w.geometry, ctx, w.word.chars().count());
                b.is_vertical = vertical;
                ScalableWord {
                    word: w.word.clone(),
                    bounds: b,
                }
            })
            .collect();

        let symbol_boxes: Vec<ScalableBox> = line
            .symbols
            .iter()
            .map(|s| {
                let mut b = self.normalize_geometry(&s.geometry, ctx, 1);
                b.is_vertical = vertical;
                b
            })
            .collect();
        let symbols = line
            .symbols
            .iter()
            .enumerate()
            .map(|(i, s)| ScalableSymbol {
                symbol: s.symbol.clone(),
                bounds: symbol_boxes[i],
                letter_spacing: symbol_boxes
                    .get(i + 1)
                    .map_or(0.0, |next| letter_spacing(&symbol_boxes[i], next)),
            })
            .collect();

        ScalableTextLine {
            content: line.content.clone(),
            bounds,
            symbols,
            words,
        }
    }
}

fn percent_of(value: f64, extent: f64) -> f64 {
    let pct = value / extent * 100.0;
    if pct.is_finite() {
        pct
    } else {
        0.0
    }
}

/// Gap between two consecutive glyph boxes along the reading axis.
fn letter_spacing(current: &ScalableBox, next: &ScalableBox) -> f64 {
    if current.is_vertical {
        next.position.top - (current.position.top + current.dimensions.height)
    } else {
        next.position.left - (current.position.left + current.dimensions.width)
    }
}

/// Vertical columns read right to left, horizontal lines top to bottom.
fn reorder(lines: &mut [ScalableTextLine], vertical: bool) {
    if lines.iter().any(|l| l.bounds.is_none()) {
        return;
    }
    lines.sort_by(|a, b| {
        let (a, b) = match (a.bounds, b.bounds) {
            (Some(a), Some(b)) => (a, b),
            _ => return Ordering::Equal,
        };
        if vertical {
            b.position.left.partial_cmp(&a.position.left).unwrap_or(Ordering::Equal)
        } else {
            a.position.top.partial_cmp(&b.position.top).unwrap_or(Ordering::Equal)
        }
    });
    for line in lines.iter_mut() {
        line.words.sort_by(|a, b| {
            if vertical {
                a.bounds.position.top.partial_cmp(&b.bounds.position.top)
            } else {
                a.bounds.position.left.partial_cmp(&b.bounds.position.left)
            }
            .unwrap_or(Ordering::Equal)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::{RawSymbol, RawWord, Vertex};

    const FULL_HD: ContextResolution = ContextResolution {
        width: 1920,
        height: 1080,
    };

    fn approx(a: f64, b: f64, tolerance: f64) -> bool {
        (a - b).abs() <= tolerance
    }

    fn item(geometry: RawGeometry, lines: Vec<RawTextLine>) -> RawTextItem {
        RawTextItem {
            id: None,
            lines,
            geometry,
            recognition_score: 0.9,
            classification_score: 1.0,
            classification_label: 0,
            is_vertical: None,
        }
    }

    #[test]
    fn test_axis_aligned_box() {
        let normalizer = Normalizer::default();
        let quad = RawBox::from_rect(192.0, 108.0, 384.0, 216.0);
        let b = normalizer.normalize_quad(&quad, FULL_HD, 4);

        assert!(approx(b.position.left, 10.0, 1e-9));
        assert!(approx(b.position.top, 10.0, 1e-9));
        assert!(approx(b.dimensions.width, 10.0, 1e-9));
        assert!(approx(b.dimensions.height, 10.0, 1e-9));
        assert_eq!(b.angle_degrees, 0.0);
        assert!(!b.is_vertical);
        assert_eq!(b.transform_origin, TransformOrigin::TopLeft);
    }

    #[test]
    fn test_tilted_box() {
        let normalizer = Normalizer::default();
        let quad = RawBox {
            top_left: Vertex::new(0.0, 0.0),
            top_right: Vertex::new(192.0, 54.0),
            bottom_right: Vertex::new(180.0, 162.0),
            bottom_left: Vertex::new(0.0, 108.0),
        };
        let b = normalizer.normalize_quad(&quad, FULL_HD, 5);

        assert_eq!(b.position.left, 0.0);
        assert_eq!(b.position.top, 0.0);
        assert!(approx(b.angle_degrees, 15.7, 0.05));
        assert!(approx(b.dimensions.height, 10.0, 1e-9));
        assert!(approx(b.dimensions.width, 10.39, 0.01));
    }

    #[test]
    fn test_angle_sign_follows_tilt_direction() {
        let normalizer = Normalizer::default();
        let theta = 20f64.to_radians();
        let len = 300.0;
        let tl = Vertex::new(400.0, 400.0);

        let clockwise = RawBox {
            top_left: tl,
            top_right: Vertex::new(tl.x + len * theta.cos(), tl.y + len * theta.sin()),
            ..RawBox::default()
        };
        let counter = RawBox {
            top_left: tl,
            top_right: Vertex::new(tl.x + len * theta.cos(), tl.y - len * theta.sin()),
            ..RawBox::default()
        };

        let a = normalizer.normalize_quad(&clockwise, FULL_HD, 1).angle_degrees;
        let b = normalizer.normalize_quad(&counter, FULL_HD, 1).angle_degrees;
        assert!(approx(a, 20.0, 1e-6));
        assert!(approx(b, -20.0, 1e-6));
    }

    #[test]
    fn test_degenerate_top_edge_has_zero_angle() {
        let normalizer = Normalizer::default();
        let quad = RawBox {
            top_left: Vertex::new(100.0, 100.0),
            top_right: Vertex::new(100.0, 50.0),
            bottom_right: Vertex::new(150.0, 50.0),
            bottom_left: Vertex::new(150.0, 100.0),
        };
        let b = normalizer.normalize_quad(&quad, FULL_HD, 1);
        assert_eq!(b.angle_degrees, 0.0);
    }

    #[test]
    fn test_zero_context_does_not_produce_nan() {
        let normalizer = Normalizer::default();
        let quad = RawBox::from_rect(10.0, 10.0, 30.0, 20.0);
        let b = normalizer.normalize_quad(&quad, ContextResolution { width: 0, height: 0 }, 2);
        assert_eq!(b.position.left, 0.0);
        assert_eq!(b.position.top, 0.0);
        assert_eq!(b.dimensions.width, 20.0);
        assert_eq!(b.dimensions.height, 0.0);
    }

    #[test]
    fn test_vertical_requires_more_than_one_char() {
        let normalizer = Normalizer::default();
        let tall = RawBox::from_rect(0.0, 0.0, 50.0, 300.0);
        assert!(!normalizer.normalize_quad(&tall, FULL_HD, 1).is_vertical);
        assert!(normalizer.normalize_quad(&tall, FULL_HD, 2).is_vertical);
    }

    #[test]
    fn test_steep_angle_is_vertical() {
        let normalizer = Normalizer::default();
        let steep = RawBox {
            top_left: Vertex::new(100.0, 300.0),
            top_right: Vertex::new(110.0, 100.0),
            ..RawBox::default()
        };
        let b = normalizer.normalize_quad(&steep, FULL_HD, 1);
        assert!(b.angle_degrees < -70.0);
        assert!(b.is_vertical);

        let lenient = Normalizer::new(NormalizerConfig {
            steep_angle_degrees: None,
            ..NormalizerConfig::default()
        });
        assert!(!lenient.normalize_quad(&steep, FULL_HD, 1).is_vertical);
    }

    #[test]
    fn test_rotated_box_is_centre_anchored() {
        let normalizer = Normalizer::default();
        let rotated = RotatedBox {
            center_x: 0.5,
            center_y: 0.5,
            width: 0.2,
            height: 0.1,
            rotation_radians: std::f64::consts::FRAC_PI_6,
        };
        let b = normalizer.normalize_rotated(&rotated, FULL_HD, 3);
        assert!(approx(b.position.left, 40.0, 1e-9));
        assert!(approx(b.position.top, 45.0, 1e-9));
        assert!(approx(b.dimensions.width, 20.0, 1e-9));
        assert!(approx(b.angle_degrees, 30.0, 1e-9));
        assert_eq!(b.transform_origin, TransformOrigin::Center);
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let normalizer = Normalizer::default();
        let raw = RawOcrResult {
            id: "7PpOcrAdapter".into(),
            context_resolution: FULL_HD,
            items: vec![item(
                RawGeometry::Quad(RawBox::from_rect(192.0, 108.0, 384.0, 216.0)),
                vec![RawTextLine::plain("hello")],
            )],
        };
        let first = normalizer.normalize_result(&raw, "PpOcrAdapter", "en");
        let second = normalizer.normalize_result(&raw, "PpOcrAdapter", "en");
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
        assert_eq!(first.items().count(), 1);
        assert_eq!(first.engine_name, "PpOcrAdapter");
    }

    #[test]
    fn test_vertical_columns_read_right_to_left() {
        let normalizer = Normalizer::default();
        let column = |left: f64, text: &str| RawTextLine {
            content: text.into(),
            geometry: Some(RawGeometry::Quad(RawBox::from_rect(left, 100.0, left + 40.0, 500.0))),
            symbols: Vec::new(),
            words: Vec::new(),
        };
        let raw_item = item(
            RawGeometry::Quad(RawBox::from_rect(100.0, 100.0, 300.0, 500.0)),
            vec![column(100.0, "左"), column(250.0, "右"), column(175.0, "中")],
        );
        let out = normalizer.normalize_item(&raw_item, FULL_HD);

        assert!(out.bounds.is_vertical);
        let order: Vec<&str> = out.text.iter().map(|l| l.content.as_str()).collect();
        assert_eq!(order, vec!["右", "中", "左"]);
    }

    #[test]
    fn test_horizontal_words_sorted_left_to_right() {
        let normalizer = Normalizer::default();
        let word = |left: f64, w: &str| RawWord {
            word: w.into(),
            geometry: RawGeometry::Quad(RawBox::from_rect(left, 100.0, left + 80.0, 130.0)),
        };
        let line = RawTextLine {
            content: "one two".into(),
            geometry: Some(RawGeometry::Quad(RawBox::from_rect(100.0, 100.0, 300.0, 130.0))),
            symbols: Vec::new(),
            words: vec![word(200.0, "two"), word(100.0, "one")],
        };
        let raw_item = item(line.geometry.unwrap(), vec![line]);
        let out = normalizer.normalize_item(&raw_item, FULL_HD);

        let words: Vec<&str> = out.text[0].words.iter().map(|w| w.word.as_str()).collect();
        assert_eq!(words, vec!["one", "two"]);
    }

    #[test]
    fn test_letter_spacing_between_symbols() {
        let normalizer = Normalizer::default();
        let symbol = |left: f64, s: &str| RawSymbol {
            symbol: s.into(),
            geometry: RawGeometry::Quad(RawBox::from_rect(left, 0.0, left + 96.0, 54.0)),
        };
        let line = RawTextLine {
            content: "ab".into(),
            geometry: None,
            symbols: vec![symbol(0.0, "a"), symbol(192.0, "b")],
            words: Vec::new(),
        };
        let out = normalizer.normalize_line(&line, FULL_HD, false);

        assert!(approx(out.symbols[0].letter_spacing, 5.0, 1e-9));
        assert_eq!(out.symbols[1].letter_spacing, 0.0);
    }
}
