//! Vision chat completions protocol definitions
//!
//! Request types for the OpenAI chat-completions-shaped vision API:
//! ordered messages whose content is either a bare string or a list of
//! typed parts (`text` / `image_url`), plus the sampling and length
//! controls the generation layer recognizes.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Data URI of a 1x1 black PNG, used when a model requires an image but
/// the request carried none.
pub const BLACK_PIXEL_URL: &str = "data:image/png;charset=utf-8;base64,iVBORw0KGgoAAAANSUhEUgAAAAgAAAAICAIAAABLbSncAAAADElEQVQI12NgGB4AAADIAAF8Y2l9AAAAAElFTkSuQmCC";

/// Data URI of a 1x1 transparent PNG, for models that tolerate an empty image.
pub const TRANSPARENT_PIXEL_URL: &str = "data:image/png;charset=utf-8;base64,iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAIAAACQd1PeAAAADElEQVQI12P4//8/AAX+Av7czFnnAAAAAElFTkSuQmCC";

// ============================================================================
// Content parts
// ============================================================================

/// Requested level of detail for image processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageDetail {
    /// Resolution is chosen from the image itself.
    #[default]
    Auto,
    Low,
    High,
}

/// An image reference: `http(s)://` URL or `data:` URI.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
    pub detail: Option<ImageDetail>,
}

impl ImageUrl {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            detail: None,
        }
    }
}

/// One typed segment of a message's content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn image_url(url: impl Into<String>) -> Self {
        Self::ImageUrl {
            image_url: ImageUrl::new(url),
        }
    }
}

/// Message content: a bare string or an ordered list of typed parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

// ============================================================================
// Messages
// ============================================================================

/// Conversation role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    /// Wire name of the role, as spliced into role-templated prompts.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// A single chat turn.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,

    /// Optional participant name.
    pub name: Option<String>,
}

impl Message {
    pub fn new(role: Role, content: MessageContent) -> Self {
        Self {
            role,
            content,
            name: None,
        }
    }

    /// Message with a bare-string content field.
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self::new(role, MessageContent::Text(text.into()))
    }

    /// Message with typed content parts.
    pub fn parts(role: Role, parts: Vec<ContentPart>) -> Self {
        Self::new(role, MessageContent::Parts(parts))
    }

    /// Content as an ordered part list. A bare string is viewed as a
    /// single text part, so callers never branch on the content shape.
    pub fn content_parts(&self) -> Cow<'_, [ContentPart]> {
        match &self.content {
            MessageContent::Parts(parts) => Cow::Borrowed(parts.as_slice()),
            MessageContent::Text(text) => Cow::Owned(vec![ContentPart::text(text.clone())]),
        }
    }

    /// Text of the first content part, if it is a text part.
    pub fn first_text(&self) -> Option<&str> {
        match &self.content {
            MessageContent::Text(text) => Some(text),
            MessageContent::Parts(parts) => match parts.first() {
                Some(ContentPart::Text { text }) => Some(text),
                _ => None,
            },
        }
    }
}

// ============================================================================
// Chat request
// ============================================================================

/// A string or an array of strings (stop sequences).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StringOrArray {
    String(String),
    Array(Vec<String>),
}

fn default_max_tokens() -> u32 {
    512
}

fn default_max_completion_tokens() -> u32 {
    1024
}

/// Request to create a vision chat completion.
///
/// Unrecognized OpenAI fields are accepted and ignored.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ChatRequest {
    /// ID of the model to use.
    #[validate(length(min = 1, message = "model field is required and cannot be empty"))]
    pub model: String,

    /// Input messages for the conversation.
    #[validate(length(min = 1, message = "messages array is required and cannot be empty"))]
    pub messages: Vec<Message>,

    /// The maximum number of tokens to generate (deprecated alias).
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// The maximum number of completion tokens to generate.
    #[serde(default = "default_max_completion_tokens")]
    pub max_completion_tokens: u32,

    /// Sampling temperature; greedy decoding when unset or zero.
    pub temperature: Option<f32>,

    /// Nucleus sampling mass.
    pub top_p: Option<f32>,

    /// Up to 4 sequences where generation stops.
    pub stop: Option<StringOrArray>,

    /// Whether to stream back partial progress.
    #[serde(default)]
    pub stream: bool,

    /// Best-effort deterministic sampling.
    pub seed: Option<i64>,

    /// Penalize tokens by their existing frequency.
    pub frequency_penalty: Option<f32>,

    /// Penalize tokens that already appeared.
    pub presence_penalty: Option<f32>,

    /// How many completions to generate.
    pub n: Option<u32>,

    /// A unique identifier representing the end-user.
    pub user: Option<String>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            max_tokens: default_max_tokens(),
            max_completion_tokens: default_max_completion_tokens(),
            temperature: None,
            top_p: None,
            stop: None,
            stream: false,
            seed: None,
            frequency_penalty: None,
            presence_penalty: None,
            n: None,
            user: None,
        }
    }

    /// Check if the request is for streaming.
    pub fn is_stream(&self) -> bool {
        self.stream
    }

    /// Rewrite every bare-string content field into a single-element
    /// text part list. Idempotent; message order and all other fields
    /// are untouched.
    pub fn normalize_content(&mut self) {
        for message in &mut self.messages {
            if let MessageContent::Text(text) = &mut message.content {
                let text = std::mem::take(text);
                message.content = MessageContent::Parts(vec![ContentPart::text(text)]);
            }
        }
    }
}
