use garde::Validate;

/// An image handed to the client for OCR.
#[derive(Debug, Clone, Validate)]
pub struct SubmitRequest {
    /// Raw image bytes as read from the camera or file picker.
    #[garde(length(min = 1))]
    pub bytes: Vec<u8>,

    /// Display name shown in the job history (usually the file name).
    #[garde(length(min = 1, max = 255))]
    pub image_name: Option<String>,
}

impl SubmitRequest {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            image_name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.image_name = Some(name.into());
        self
    }
}
