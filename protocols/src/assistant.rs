use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::{Validate, ValidationError};

use crate::validated::Normalizable;

// ============================================================================
// Request envelope
// ============================================================================

/// The single inbound envelope: an action name plus an action-specific payload.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ActionRequest {
    #[validate(length(min = 1, message = "action is required"))]
    pub action: String,

    #[serde(default)]
    pub payload: Value,
}

impl Normalizable for ActionRequest {
    fn normalize(&mut self) {
        self.action = self.action.trim().to_string();
        if self.payload.is_null() {
            self.payload = Value::Object(Default::default());
        }
    }
}

/// Actions understood by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    GenerateContentStream,
    GenerateImages,
    EditImage,
    FaceSwap,
    SynthesizeSpeech,
    Translate,
}

impl Action {
    pub const ALL: [Action; 6] = [
        Action::GenerateContentStream,
        Action::GenerateImages,
        Action::EditImage,
        Action::FaceSwap,
        Action::SynthesizeSpeech,
        Action::Translate,
    ];

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.as_str() == name)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::GenerateContentStream => "generateContentStream",
            Action::GenerateImages => "generateImages",
            Action::EditImage => "editImage",
            Action::FaceSwap => "faceSwap",
            Action::SynthesizeSpeech => "synthesizeSpeech",
            Action::Translate => "translate",
        }
    }

    /// Human label used in denial messages.
    pub fn feature_name(&self) -> &'static str {
        match self {
            Action::GenerateContentStream => "chat",
            Action::GenerateImages => "image generation",
            Action::EditImage => "image editing",
            Action::FaceSwap => "face swap",
            Action::SynthesizeSpeech => "text-to-speech",
            Action::Translate => "translation",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Conversation
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    #[serde(alias = "model")]
    Assistant,
}

/// An uploaded file as the client sends it: base64 bytes plus declared type and name.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    #[validate(length(min = 1, message = "attachment data is empty"))]
    pub data: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub file_name: String,
}

impl Attachment {
    pub fn new(
        data: impl Into<String>,
        mime_type: impl Into<String>,
        file_name: impl Into<String>,
    ) -> Self {
        Self {
            data: data.into(),
            mime_type: mime_type.into(),
            file_name: file_name.into(),
        }
    }

    /// Lower-cased extension of the file name, if any.
    pub fn extension(&self) -> Option<String> {
        let (stem, ext) = self.file_name.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationTurn {
    pub role: Role,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl ConversationTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            attachments: Vec::new(),
            timestamp: None,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            attachments: Vec::new(),
            timestamp: None,
        }
    }

    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }
}

// ============================================================================
// Normalized stream events
// ============================================================================

/// One event on the client-facing stream. Serializes to exactly one of
/// `{"text"}`, `{"status"}` or `{"groundingMetadata"}`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum StreamEvent {
    Text {
        text: String,
    },
    Status {
        status: String,
    },
    Grounding {
        #[serde(rename = "groundingMetadata")]
        grounding_metadata: Value,
    },
}

impl StreamEvent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn status(status: impl Into<String>) -> Self {
        Self::Status {
            status: status.into(),
        }
    }

    pub fn grounding(metadata: Value) -> Self {
        Self::Grounding {
            grounding_metadata: metadata,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Status { .. } => "status",
            Self::Grounding { .. } => "groundingMetadata",
        }
    }
}

// ============================================================================
// Action payloads
// ============================================================================

pub fn non_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("blank").with_message("must not be empty".into()));
    }
    Ok(())
}

/// Payload of `generateContentStream`.
#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
#[validate(schema(function = "validate_chat_input"))]
pub struct ChatStreamPayload {
    #[validate(custom(function = "non_blank", message = "model is required"))]
    pub model: String,
    #[serde(default)]
    pub history: Vec<ConversationTurn>,
    #[serde(default)]
    pub new_message: String,
    #[serde(default)]
    #[validate(nested)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub system_instruction: Option<String>,
    #[serde(default)]
    pub use_web_search: bool,
}

fn validate_chat_input(payload: &ChatStreamPayload) -> Result<(), ValidationError> {
    if payload.new_message.trim().is_empty() && payload.attachments.is_empty() {
        return Err(ValidationError::new("empty_message")
            .with_message("newMessage or attachments is required".into()));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "16:9")]
    Landscape,
    #[serde(rename = "9:16")]
    Portrait,
    #[serde(rename = "4:3")]
    Standard,
    #[serde(rename = "3:4")]
    StandardPortrait,
}

impl AspectRatio {
    pub fn as_str(&self) -> &'static str {
        match self {
            AspectRatio::Square => "1:1",
            AspectRatio::Landscape => "16:9",
            AspectRatio::Portrait => "9:16",
            AspectRatio::Standard => "4:3",
            AspectRatio::StandardPortrait => "3:4",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageQuality {
    #[default]
    Standard,
    Hd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageStyle {
    Vivid,
    Natural,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageProvider {
    #[default]
    Imagen,
    Openai,
}

fn default_image_count() -> u8 {
    1
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ImageGenerationConfig {
    #[serde(default)]
    pub aspect_ratio: AspectRatio,
    #[serde(default)]
    pub quality: ImageQuality,
    #[serde(default)]
    pub style: Option<ImageStyle>,
    #[serde(default = "default_image_count")]
    #[validate(range(min = 1, max = 4, message = "numberOfImages must be between 1 and 4"))]
    pub number_of_images: u8,
}

impl Default for ImageGenerationConfig {
    fn default() -> Self {
        Self {
            aspect_ratio: AspectRatio::default(),
            quality: ImageQuality::default(),
            style: None,
            number_of_images: default_image_count(),
        }
    }
}

/// Payload of `generateImages`.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GenerateImagesPayload {
    #[validate(custom(function = "non_blank", message = "prompt is required"))]
    pub prompt: String,
    #[serde(default)]
    pub provider: ImageProvider,
    #[serde(default)]
    #[validate(nested)]
    pub config: ImageGenerationConfig,
}

/// Payload of `editImage`.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct EditImagePayload {
    #[validate(length(min = 1, message = "at least one image is required"), nested)]
    pub images: Vec<Attachment>,
    #[validate(custom(function = "non_blank", message = "prompt is required"))]
    pub prompt: String,
}

/// Payload of `faceSwap`.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct FaceSwapPayload {
    #[validate(nested)]
    pub source_image: Attachment,
    #[validate(nested)]
    pub target_image: Attachment,
}

/// Payload of `synthesizeSpeech`.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SpeechPayload {
    #[validate(custom(function = "non_blank", message = "text is required"))]
    pub text: String,
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(default)]
    pub language_code: Option<String>,
    #[serde(default)]
    pub speed: Option<f32>,
}

/// Payload of `translate`.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TranslatePayload {
    #[validate(custom(function = "non_blank", message = "text is required"))]
    pub text: String,
    #[validate(custom(function = "non_blank", message = "targetLanguage is required"))]
    pub target_language: String,
    #[serde(default)]
    pub source_language: Option<String>,
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedImagesResponse {
    pub generated_images: Vec<Attachment>,
}

/// Result of `editImage`. `attachments` holds zero or one image.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EditImageResponse {
    pub text: String,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechResponse {
    pub audio_content: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationResponse {
    pub translated_text: String,
}

/// Body of every error response.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub details: String,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: details.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_stream_event_serializes_single_key() {
        let text = serde_json::to_value(StreamEvent::text("hi")).unwrap();
        assert_eq!(text, json!({"text": "hi"}));

        let status = serde_json::to_value(StreamEvent::status("Searching the web...")).unwrap();
        assert_eq!(status, json!({"status": "Searching the web..."}));

        let grounding =
            serde_json::to_value(StreamEvent::grounding(json!({"webSearchQueries": ["q"]})))
                .unwrap();
        assert_eq!(
            grounding,
            json!({"groundingMetadata": {"webSearchQueries": ["q"]}})
        );
    }

    #[test]
    fn test_action_parse() {
        assert_eq!(
            Action::parse("generateContentStream"),
            Some(Action::GenerateContentStream)
        );
        assert_eq!(Action::parse("faceSwap"), Some(Action::FaceSwap));
        assert_eq!(Action::parse("deleteEverything"), None);
    }

    #[test]
    fn test_turn_accepts_model_role_alias() {
        let turn: ConversationTurn =
            serde_json::from_value(json!({"role": "model", "text": "hello"})).unwrap();
        assert_eq!(turn.role, Role::Assistant);
        assert!(turn.attachments.is_empty());
    }

    #[test]
    fn test_chat_payload_requires_message_or_attachment() {
        let payload: ChatStreamPayload =
            serde_json::from_value(json!({"model": "gemini-2.5-flash", "newMessage": "  "}))
                .unwrap();
        assert!(payload.validate().is_err());

        let payload: ChatStreamPayload = serde_json::from_value(json!({
            "model": "gemini-2.5-flash",
            "attachments": [{"data": "aGk=", "mimeType": "text/plain", "fileName": "a.txt"}]
        }))
        .unwrap();
        assert!(payload.validate().is_ok());
    }

    #[test]
    fn test_speech_rejects_blank_text() {
        let payload: SpeechPayload = serde_json::from_value(json!({"text": "   "})).unwrap();
        assert!(payload.validate().is_err());
    }

    #[test]
    fn test_translate_requires_target_language() {
        let payload: TranslatePayload =
            serde_json::from_value(json!({"text": "xin chào", "targetLanguage": ""})).unwrap();
        assert!(payload.validate().is_err());
    }

    #[test]
    fn test_image_config_defaults_and_bounds() {
        let payload: GenerateImagesPayload =
            serde_json::from_value(json!({"prompt": "a red fox"})).unwrap();
        assert_eq!(payload.provider, ImageProvider::Imagen);
        assert_eq!(payload.config.aspect_ratio, AspectRatio::Square);
        assert_eq!(payload.config.number_of_images, 1);
        assert!(payload.validate().is_ok());

        let payload: GenerateImagesPayload = serde_json::from_value(json!({
            "prompt": "a red fox",
            "config": {"aspectRatio": "16:9", "numberOfImages": 9}
        }))
        .unwrap();
        assert_eq!(payload.config.aspect_ratio, AspectRatio::Landscape);
        assert!(payload.validate().is_err());
    }

    #[test]
    fn test_attachment_extension() {
        let a = Attachment::new("", "application/pdf", "Report.Final.PDF");
        assert_eq!(a.extension().as_deref(), Some("pdf"));
        assert_eq!(Attachment::new("", "", "README").extension(), None);
        assert_eq!(Attachment::new("", "", ".bashrc").extension(), None);
    }
}
