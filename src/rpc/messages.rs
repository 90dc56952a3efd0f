//! Wire messages exchanged with engine services.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::result::{
    ContextResolution, RawBox, RawGeometry, RawOcrResult, RawSymbol, RawTextItem, RawTextLine,
    RawWord, RotatedBox,
};

pub fn encode_image(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

#[derive(Debug, Serialize)]
pub struct RecognizeRequest<'a> {
    pub id: &'a str,
    pub base64_image: String,
    pub language_code: &'a str,
    pub ocr_engine: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub boxes: Vec<RawBox>,
}

#[derive(Debug, Deserialize)]
pub struct RecognizeResponse {
    #[serde(default)]
    pub id: String,
    pub context_resolution: Option<ContextResolution>,
    pub results: Option<Vec<WireTextItem>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum WireText {
    Plain(String),
    Lines(Vec<WireTextLine>),
}

impl Default for WireText {
    fn default() -> Self {
        WireText::Plain(String::new())
    }
}

#[derive(Debug, Deserialize)]
pub struct WireTextItem {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub text: WireText,
    #[serde(rename = "box", default)]
    pub quad: Option<RawBox>,
    #[serde(default)]
    pub rotated_box: Option<RotatedBox>,
    #[serde(default = "full_score")]
    pub recognition_score: f64,
    #[serde(default = "full_score")]
    pub classification_score: f64,
    #[serde(default)]
    pub classification_label: i32,
    #[serde(default)]
    pub is_vertical: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct WireTextLine {
    pub content: String,
    #[serde(rename = "box", default)]
    pub quad: Option<RawBox>,
    #[serde(default)]
    pub rotated_box: Option<RotatedBox>,
    #[serde(default)]
    pub symbols: Vec<WireSymbol>,
    #[serde(default)]
    pub words: Vec<WireWord>,
}

#[derive(Debug, Deserialize)]
pub struct WireSymbol {
    pub symbol: String,
    #[serde(rename = "box", default)]
    pub quad: Option<RawBox>,
    #[serde(default)]
    pub rotated_box: Option<RotatedBox>,
}

#[derive(Debug, Deserialize)]
pub struct WireWord {
    pub word: String,
    #[serde(rename = "box", default)]
    pub quad: Option<RawBox>,
    #[serde(default)]
    pub rotated_box: Option<RotatedBox>,
}

fn full_score() -> f64 {
    1.0
}

fn geometry(quad: Option<RawBox>, rotated: Option<RotatedBox>) -> Option<RawGeometry> {
    match (quad, rotated) {
        (Some(q), _) => Some(RawGeometry::Quad(q)),
        (None, Some(r)) => Some(RawGeometry::Rotated(r)),
        (None, None) => None,
    }
}

impl WireTextLine {
    fn into_raw(self) -> RawTextLine {
        RawTextLine {
            content: self.content,
            geometry: geometry(self.quad, self.rotated_box),
            symbols: self
                .symbols
                .into_iter()
                .filter_map(|s| {
                    Some(RawSymbol {
                        geometry: geometry(s.quad, s.rotated_box)?,
                        symbol: s.symbol,
                    })
                })
                .collect(),
            words: self
                .words
                .into_iter()
                .filter_map(|w| {
                    Some(RawWord {
                        geometry: geometry(w.quad, w.rotated_box)?,
                        word: w.word,
                    })
                })
                .collect(),
        }
    }
}

impl WireTextItem {
    fn into_raw(self) -> Option<RawTextItem> {
        let geometry = geometry(self.quad, self.rotated_box)?;
        let lines = match self.text {
            WireText::Plain(text) => vec![RawTextLine::plain(text)],
            WireText::Lines(lines) => lines.into_iter().map(WireTextLine::into_raw).collect(),
        };
        Some(RawTextItem {
            id: self.id,
            lines,
            geometry,
            recognition_score: self.recognition_score,
            classification_score: self.classification_score,
            classification_label: self.classification_label,
            is_vertical: self.is_vertical,
        })
    }
}

impl RecognizeResponse {
    /// `None` when the response lacks its resolution or results.
    pub fn into_raw(self) -> Option<RawOcrResult> {
        let context_resolution = self.context_resolution?;
        let results = self.results?;
        let total = results.len();
        let items: Vec<RawTextItem> = results.into_iter().filter_map(WireTextItem::into_raw).collect();
        if items.len() != total {
            debug!(dropped = total - items.len(), "dropped items without geometry");
        }
        Some(RawOcrResult {
            id: self.id,
            context_resolution,
            items,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct DetectRequest<'a> {
    pub id: &'a str,
    pub base64_image: String,
    pub language_code: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct DetectedRegion {
    #[serde(rename = "box", default)]
    pub quad: Option<RawBox>,
}

#[derive(Debug, Deserialize)]
pub struct DetectResponse {
    #[serde(default)]
    pub context_resolution: Option<ContextResolution>,
    #[serde(default)]
    pub results: Vec<DetectedRegion>,
}

#[derive(Debug, Serialize)]
pub struct EngineQuery<'a> {
    pub ocr_engine: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct SupportedLanguagesResponse {
    #[serde(default)]
    pub language_codes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextRecognitionModel {
    pub name: String,
    #[serde(default)]
    pub language_codes: Vec<String>,
    #[serde(default)]
    pub is_installed: bool,
}

#[derive(Debug, Deserialize)]
pub struct SupportedModelsResponse {
    #[serde(default)]
    pub models: Vec<TextRecognitionModel>,
}

#[derive(Debug, Serialize)]
pub struct InstallModelRequest<'a> {
    pub ocr_engine: &'a str,
    pub model_name: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct SuccessResponse {
    #[serde(default)]
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareAccelerationOption {
    pub os_platform: String,
    pub backend: String,
    pub compute_platform: String,
    #[serde(default)]
    pub compute_platform_version: Option<String>,
    #[serde(default)]
    pub install_command: Option<String>,
    #[serde(default)]
    pub installed: bool,
}

#[derive(Debug, Deserialize)]
pub struct HardwareAccelerationResponse {
    #[serde(default)]
    pub hardware_acceleration_options: Vec<HardwareAccelerationOption>,
}

#[derive(Debug, Serialize)]
pub struct KeepAliveRequest {
    pub keep_alive: bool,
    pub timeout_seconds: u64,
}

#[derive(Debug, Serialize)]
pub struct MotionDetectionRequest<'a> {
    pub stream_id: &'a str,
    pub base64_frame: String,
    pub frame_sample_size: u32,
}

#[derive(Debug, Deserialize)]
pub struct MotionDetectionResponse {
    #[serde(default)]
    pub frame_diff_sum: f64,
}
