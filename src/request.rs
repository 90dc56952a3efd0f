use crate::result::RawBox;

/// A single recognition job.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionRequest {
    /// Opaque identifier echoed back in the result
    pub id: String,
    /// Encoded image (PNG/JPEG) exactly as captured
    pub image: Vec<u8>,
    /// BCP-47 tag or two-letter code
    pub language_code: String,
    /// Regions found by an earlier detection pass
    pub boxes: Option<Vec<RawBox>>,
}

impl RecognitionRequest {
    pub fn new(image: Vec<u8>, language_code: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            image,
            language_code: language_code.into(),
            boxes: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_boxes(mut self, boxes: Vec<RawBox>) -> Self {
        self.boxes = Some(boxes);
        self
    }

    /// Two-letter code engines expect (`en-US` → `en`).
    pub fn short_language_code(&self) -> &str {
        short_code(&self.language_code)
    }
}

/// Primary language subtag of a `xx-YY` or `xx_YY` code.
pub fn short_code(code: &str) -> &str {
    code.split(['-', '_']).next().unwrap_or(code)
}
