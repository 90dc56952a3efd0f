//! Recognition result models.
//!
//! `Raw*` types are what engines report, in pixel coordinates of the source
//! image (or fractions of it for centre-anchored boxes). `Scalable*` types are
//! the normalized, resolution-independent form handed to renderers.

pub mod normalize;

use serde::{Deserialize, Serialize};

pub use normalize::Normalizer;

/// Pixel dimensions of the image an engine processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextResolution {
    pub width: u32,
    pub height: u32,
}

/// A point in pixel space. Missing coordinates decode as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vertex {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
}

impl Vertex {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Four corners of a possibly rotated quadrilateral.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RawBox {
    #[serde(default)]
    pub top_left: Vertex,
    #[serde(default)]
    pub top_right: Vertex,
    #[serde(default)]
    pub bottom_right: Vertex,
    #[serde(default)]
    pub bottom_left: Vertex,
}

impl RawBox {
    /// Axis-aligned box from its top-left and bottom-right corners.
    pub fn from_rect(left: f64, top: f64, right: f64, bottom: f64) -> Self {
        Self {
            top_left: Vertex::new(left, top),
            top_right: Vertex::new(right, top),
            bottom_right: Vertex::new(right, bottom),
            bottom_left: Vertex::new(left, bottom),
        }
    }
}

/// Centre-anchored box. All lengths are fractions (0..1) of the context resolution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RotatedBox {
    pub center_x: f64,
    pub center_y: f64,
    pub width: f64,
    pub height: f64,
    #[serde(default)]
    pub rotation_radians: f64,
}

/// Geometry shapes engines report.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawGeometry {
    Quad(RawBox),
    Rotated(RotatedBox),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSymbol {
    pub symbol: String,
    pub geometry: RawGeometry,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawWord {
    pub word: String,
    pub geometry: RawGeometry,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTextLine {
    pub content: String,
    pub geometry: Option<RawGeometry>,
    #[serde(default)]
    pub symbols: Vec<RawSymbol>,
    #[serde(default)]
    pub words: Vec<RawWord>,
}

impl RawTextLine {
    pub fn plain(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            geometry: None,
            symbols: Vec::new(),
            words: Vec::new(),
        }
    }
}

/// One detected text block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTextItem {
    pub id: Option<String>,
    pub lines: Vec<RawTextLine>,
    pub geometry: RawGeometry,
    pub recognition_score: f64,
    pub classification_score: f64,
    pub classification_label: i32,
    /// Orientation when the engine reports it explicitly
    pub is_vertical: Option<bool>,
}

impl RawTextItem {
    pub fn text_len(&self) -> usize {
        self.lines.iter().map(|l| l.content.chars().count()).sum()
    }
}

/// A complete engine response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawOcrResult {
    pub id: String,
    pub context_resolution: ContextResolution,
    pub items: Vec<RawTextItem>,
}

/// Offset from the top-left of the parent, in percent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BoxPosition {
    pub left: f64,
    pub top: f64,
}

/// Extent in percent of the parent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BoxDimensions {
    pub width: f64,
    pub height: f64,
}

/// Pivot a renderer rotates a box around.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformOrigin {
    #[default]
    TopLeft,
    Center,
}

/// Resolution-independent box.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScalableBox {
    pub position: BoxPosition,
    pub dimensions: BoxDimensions,
    pub angle_degrees: f64,
    #[serde(rename = "isVertical")]
    pub is_vertical: bool,
    pub transform_origin: TransformOrigin,
}

impl ScalableBox {
    pub fn angle_radians(&self) -> f64 {
        self.angle_degrees.to_radians()
    }

    /// Map a box expressed relative to a sub-region into the parent frame.
    pub fn rescaled(&self, placement: &RegionPlacement) -> Self {
        let mut out = *self;
        out.position.left = placement.position.left * 100.0 + self.position.left * placement.size.width;
        out.position.top = placement.position.top * 100.0 + self.position.top * placement.size.height;
        out.dimensions.width = self.dimensions.width * placement.size.width;
        out.dimensions.height = self.dimensions.height * placement.size.height;
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalableSymbol {
    pub symbol: String,
    #[serde(rename = "box")]
    pub bounds: ScalableBox,
    /// Gap to the next symbol along the reading axis, in percent
    pub letter_spacing: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalableWord {
    pub word: String,
    #[serde(rename = "box")]
    pub bounds: ScalableBox,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalableTextLine {
    pub content: String,
    #[serde(rename = "box")]
    pub bounds: Option<ScalableBox>,
    pub symbols: Vec<ScalableSymbol>,
    pub words: Vec<ScalableWord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalableItem {
    pub id: Option<String>,
    pub text: Vec<ScalableTextLine>,
    #[serde(rename = "box")]
    pub bounds: ScalableBox,
    pub recognition_score: f64,
    pub classification_score: f64,
    pub classification_label: i32,
}

/// Size of a region as fractions (0..1) of the full image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegionSize {
    pub width: f64,
    pub height: f64,
}

impl Default for RegionSize {
    fn default() -> Self {
        Self { width: 1.0, height: 1.0 }
    }
}

/// Items recognized inside one area of the image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrRegion {
    pub id: Option<String>,
    /// Fractions (0..1) of the full image
    pub position: BoxPosition,
    pub size: RegionSize,
    pub items: Vec<ScalableItem>,
}

/// Where a cropped sub-result sits inside the full image.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionPlacement {
    pub id: Option<String>,
    /// Fractions (0..1) of the full image
    pub position: BoxPosition,
    pub size: RegionSize,
    /// Rewrite every box into full-image percentages
    pub global_scaling: bool,
}

/// Normalized recognition output. Built once, never mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalableResult {
    pub id: String,
    pub context_resolution: ContextResolution,
    pub regions: Vec<OcrRegion>,
    pub engine_name: String,
    pub language: String,
}

impl ScalableResult {
    /// All items across regions, in region order.
    pub fn items(&self) -> impl Iterator<Item = &ScalableItem> {
        self.regions.iter().flat_map(|r| r.items.iter())
    }

    /// Apply a text rewrite to every line, word and symbol.
    pub fn map_text(mut self, f: impl Fn(&str) -> String) -> Self {
        for item in self.regions.iter_mut().flat_map(|r| r.items.iter_mut()) {
            for line in &mut item.text {
                line.content = f(&line.content);
                for word in &mut line.words {
                    word.word = f(&word.word);
                }
            }
        }
        self
    }

    /// Merge the result of a cropped sub-image as a new region.
    pub fn with_region(mut self, region: ScalableResult, placement: RegionPlacement) -> Self {
        let items = region
            .regions
            .into_iter()
            .flat_map(|r| r.items)
            .map(|mut item| {
                if placement.global_scaling {
                    item.bounds = item.bounds.rescaled(&placement);
                    for line in &mut item.text {
                        line.bounds = line.bounds.map(|b| b.rescaled(&placement));
                        for word in &mut line.words {
                            word.bounds = word.bounds.rescaled(&placement);
                        }
                        for symbol in &mut line.symbols {
                            symbol.bounds = symbol.bounds.rescaled(&placement);
                        }
                    }
                }
                item
            })
            .collect();

        self.regions.push(OcrRegion {
            id: placement.id,
            position: placement.position,
            size: placement.size,
            items,
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounds(left: f64, top: f64, width: f64, height: f64) -> ScalableBox {
        ScalableBox {
            position: BoxPosition { left, top },
            dimensions: BoxDimensions { width, height },
            ..ScalableBox::default()
        }
    }

    fn result_with(items: Vec<ScalableItem>) -> ScalableResult {
        ScalableResult {
            id: "frame".into(),
            context_resolution: ContextResolution { width: 800, height: 600 },
            regions: vec![OcrRegion {
                id: None,
                position: BoxPosition::default(),
                size: RegionSize::default(),
                items,
            }],
            engine_name: "PpOcrAdapter".into(),
            language: "ja".into(),
        }
    }

    fn crop_result() -> ScalableResult {
        let item = ScalableItem {
            id: Some("bubble".into()),
            text: vec![ScalableTextLine {
                content: "abc".into(),
                bounds: Some(bounds(20.0, 40.0, 10.0, 20.0)),
                symbols: vec![ScalableSymbol {
                    symbol: "a".into(),
                    bounds: bounds(20.0, 40.0, 2.0, 20.0),
                    letter_spacing: 0.0,
                }],
                words: vec![ScalableWord {
                    word: "abc".into(),
                    bounds: bounds(20.0, 40.0, 6.0, 20.0),
                }],
            }],
            bounds: bounds(20.0, 40.0, 10.0, 20.0),
            recognition_score: 0.9,
            classification_score: 1.0,
            classification_label: 0,
        };
        result_with(vec![item])
    }

    fn placement(global_scaling: bool) -> RegionPlacement {
        RegionPlacement {
            id: Some("crop".into()),
            position: BoxPosition { left: 0.25, top: 0.5 },
            size: RegionSize { width: 0.5, height: 0.5 },
            global_scaling,
        }
    }

    #[test]
    fn test_with_region_rescales_into_full_frame() {
        let merged = result_with(Vec::new()).with_region(crop_result(), placement(true));

        assert_eq!(merged.regions.len(), 2);
        let region = &merged.regions[1];
        assert_eq!(region.id.as_deref(), Some("crop"));
        assert_eq!(region.position, BoxPosition { left: 0.25, top: 0.5 });

        let item = &region.items[0];
        assert_eq!(item.bounds, bounds(35.0, 70.0, 5.0, 10.0));
        let line = &item.text[0];
        assert_eq!(line.bounds, Some(bounds(35.0, 70.0, 5.0, 10.0)));
        assert_eq!(line.words[0].bounds, bounds(35.0, 70.0, 3.0, 10.0));
        assert_eq!(line.symbols[0].bounds, bounds(35.0, 70.0, 1.0, 10.0));
    }

    #[test]
    fn test_with_region_keeps_local_boxes() {
        let crop = crop_result();
        let original = crop.regions[0].items.clone();
        let merged = result_with(Vec::new()).with_region(crop, placement(false));

        assert_eq!(merged.regions.len(), 2);
        assert_eq!(merged.regions[1].items, original);
        assert_eq!(merged.regions[1].size, RegionSize { width: 0.5, height: 0.5 });
    }

    #[test]
    fn test_map_text_rewrites_lines_and_words() {
        let rewritten = crop_result().map_text(|t| t.to_uppercase());
        let line = &rewritten.items().next().unwrap().text[0];
        assert_eq!(line.content, "ABC");
        assert_eq!(line.words[0].word, "ABC");
    }
}
