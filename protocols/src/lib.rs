//! OpenAI-compatible protocol types for vision chat completions.

pub mod chat;

pub use chat::{
    ChatRequest, ContentPart, ImageDetail, ImageUrl, Message, MessageContent, Role, StringOrArray,
    BLACK_PIXEL_URL, TRANSPARENT_PIXEL_URL,
};
