//! Prompt-format compilation.
//!
//! One hardcoded transformation per supported model family, each mapping
//! an ordered message list to a model-ready prompt plus the images
//! referenced along the way. Families are selected by name through a
//! closed registry; the per-family templates deliberately reproduce the
//! conventions each model was trained on, inconsistencies included
//! (image-tag placement and system-prompt splicing differ per family).

pub mod families;
pub mod structured;

use std::fmt;

use image::DynamicImage;
use thiserror::Error;
use vision_protocol::{ContentPart, Message, Role};
use vlm_multimodal::{MediaConnectorError, MediaFetcher};

#[derive(Debug, Error)]
pub enum FormatError {
    /// Dispatch failure: the format name is not in the registry.
    #[error("unknown prompt format: {0}")]
    UnknownFormat(String),
    /// An image reference could not be resolved.
    #[error(transparent)]
    Resolution(#[from] MediaConnectorError),
}

pub type FormatResult<T> = Result<T, FormatError>;

/// A compiled request: images in first-encounter order plus the prompt
/// string. Built fresh per request and consumed once by generation.
#[derive(Debug, Default)]
pub struct CompiledPrompt {
    pub images: Vec<DynamicImage>,
    pub prompt: String,
}

/// The closed set of supported prompt-templating conventions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptFormat {
    ChatMl,
    Falcon,
    Florence,
    Fuyu,
    Gemma,
    Glm4v,
    Llama2,
    Llama3,
    /// Alias of [`PromptFormat::Llama2`]; Mistral shares its template.
    Mistral,
    Phi15,
    Phi3,
    Phintern,
    Pixtral,
    Vicuna,
    Vicuna0,
}

impl PromptFormat {
    pub const ALL: &'static [PromptFormat] = &[
        PromptFormat::ChatMl,
        PromptFormat::Falcon,
        PromptFormat::Florence,
        PromptFormat::Fuyu,
        PromptFormat::Gemma,
        PromptFormat::Glm4v,
        PromptFormat::Llama2,
        PromptFormat::Llama3,
        PromptFormat::Mistral,
        PromptFormat::Phi15,
        PromptFormat::Phi3,
        PromptFormat::Phintern,
        PromptFormat::Pixtral,
        PromptFormat::Vicuna,
        PromptFormat::Vicuna0,
    ];

    /// Look up a format by its registry name.
    pub fn from_name(name: &str) -> FormatResult<Self> {
        match name {
            "chatml" => Ok(PromptFormat::ChatMl),
            "falcon" => Ok(PromptFormat::Falcon),
            "florence" => Ok(PromptFormat::Florence),
            "fuyu" => Ok(PromptFormat::Fuyu),
            "gemma" => Ok(PromptFormat::Gemma),
            "glm4v" => Ok(PromptFormat::Glm4v),
            "llama2" => Ok(PromptFormat::Llama2),
            "llama3" => Ok(PromptFormat::Llama3),
            "mistral" => Ok(PromptFormat::Mistral),
            "phi15" => Ok(PromptFormat::Phi15),
            "phi3" => Ok(PromptFormat::Phi3),
            "phintern" => Ok(PromptFormat::Phintern),
            "pixtral" => Ok(PromptFormat::Pixtral),
            "vicuna" => Ok(PromptFormat::Vicuna),
            "vicuna0" => Ok(PromptFormat::Vicuna0),
            other => Err(FormatError::UnknownFormat(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PromptFormat::ChatMl => "chatml",
            PromptFormat::Falcon => "falcon",
            PromptFormat::Florence => "florence",
            PromptFormat::Fuyu => "fuyu",
            PromptFormat::Gemma => "gemma",
            PromptFormat::Glm4v => "glm4v",
            PromptFormat::Llama2 => "llama2",
            PromptFormat::Llama3 => "llama3",
            PromptFormat::Mistral => "mistral",
            PromptFormat::Phi15 => "phi15",
            PromptFormat::Phi3 => "phi3",
            PromptFormat::Phintern => "phintern",
            PromptFormat::Pixtral => "pixtral",
            PromptFormat::Vicuna => "vicuna",
            PromptFormat::Vicuna0 => "vicuna0",
        }
    }

    /// Compile `messages` with this family's transformation.
    pub async fn compile(
        &self,
        messages: &[Message],
        fetcher: &dyn MediaFetcher,
    ) -> FormatResult<CompiledPrompt> {
        match self {
            PromptFormat::ChatMl => families::chatml(messages, fetcher).await,
            PromptFormat::Falcon => families::falcon(messages, fetcher).await,
            PromptFormat::Florence => families::florence(messages, fetcher).await,
            PromptFormat::Fuyu => families::fuyu(messages, fetcher).await,
            PromptFormat::Gemma => families::gemma(messages, fetcher).await,
            PromptFormat::Glm4v => families::glm4v(messages, fetcher).await,
            PromptFormat::Llama2 | PromptFormat::Mistral => {
                families::llama2(messages, fetcher).await
            }
            PromptFormat::Llama3 => families::llama3(messages, fetcher).await,
            PromptFormat::Phi15 => families::phi15(messages, fetcher).await,
            PromptFormat::Phi3 => families::phi3(messages, fetcher).await,
            PromptFormat::Phintern => families::phintern(messages, fetcher).await,
            PromptFormat::Pixtral => families::pixtral(messages, fetcher).await,
            PromptFormat::Vicuna => families::vicuna(messages, fetcher).await,
            PromptFormat::Vicuna0 => families::vicuna0(messages, fetcher).await,
        }
    }
}

impl fmt::Display for PromptFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Compile `messages` with the format registered under `name`.
///
/// Fails with [`FormatError::UnknownFormat`] naming the offending
/// identifier when `name` is not registered.
pub async fn dispatch(
    name: &str,
    messages: &[Message],
    fetcher: &dyn MediaFetcher,
) -> FormatResult<CompiledPrompt> {
    PromptFormat::from_name(name)?.compile(messages, fetcher).await
}

/// Substring tables mapping model names to their prompt family.
const FORMAT_MATCHES: &[(PromptFormat, &[&str])] = &[
    (
        PromptFormat::ChatMl,
        &[
            "34b",
            "yi-6b",
            "nanollava",
            "internvl-chat-v1-5",
            "internvl-chat-2b",
            "internvl2-",
            "internvl2_5-",
            "llava-onevision",
            "aquila",
        ],
    ),
    (PromptFormat::Falcon, &["falcon"]),
    (PromptFormat::Florence, &["florence"]),
    (PromptFormat::Fuyu, &["fuyu"]),
    (PromptFormat::Gemma, &["gemma"]),
    (PromptFormat::Glm4v, &["glm-4v"]),
    (
        PromptFormat::Llama2,
        &["bakllava", "8x7b", "mistral", "mixtral"],
    ),
    (PromptFormat::Llama3, &["llama-3-vision", "360vl", "llama3"]),
    (
        PromptFormat::Phi15,
        &["moondream1", "moondream2", "monkey"],
    ),
    (PromptFormat::Phi3, &["phi3", "phi-3"]),
    (
        PromptFormat::Phintern,
        &["internvl-chat-4b", "opengvlab/internvl2-4b"],
    ),
    (PromptFormat::Pixtral, &["pixtral"]),
    (PromptFormat::Vicuna, &["vicuna", "13b"]),
    (PromptFormat::Vicuna0, &["yi-vl"]),
];

/// Guess a model's prompt family from its name: exact matches take
/// precedence over substring matches; vicuna is the fallback.
pub fn guess_model_format(model_name: &str) -> PromptFormat {
    let model_id = model_name.to_lowercase();

    for (format, options) in FORMAT_MATCHES {
        if options.iter().any(|option| *option == model_id) {
            return *format;
        }
    }
    for (format, options) in FORMAT_MATCHES {
        if options.iter().any(|option| model_id.contains(option)) {
            return *format;
        }
    }

    PromptFormat::Vicuna
}

// ============================================================================
// Shared walk helpers
// ============================================================================

/// Split off a trailing assistant message: the remaining prefix plus the
/// text that seeds the generation-continuation marker. Works on borrowed
/// slices; the caller's message list is never mutated. Only the single
/// last message is ever treated as a continuation seed.
pub(crate) fn split_trailing_assistant(messages: &[Message]) -> (&[Message], Option<String>) {
    match messages.last() {
        Some(last) if last.role == Role::Assistant => {
            let seed = last.first_text().unwrap_or_default().to_string();
            (&messages[..messages.len() - 1], Some(seed))
        }
        _ => (messages, None),
    }
}

/// Walk a user message's parts: resolve every image reference in
/// encounter order, appending one fixed tag per image, and keep the last
/// text part. Returns `(image_tag_fragment, text)`.
pub(crate) async fn user_images_and_text(
    parts: &[ContentPart],
    img_tok: &str,
    images: &mut Vec<DynamicImage>,
    fetcher: &dyn MediaFetcher,
) -> FormatResult<(String, String)> {
    let mut img_tag = String::new();
    let mut text = String::new();
    for part in parts {
        match part {
            ContentPart::ImageUrl { image_url } => {
                images.push(fetcher.url_to_image(&image_url.url).await?);
                img_tag.push_str(img_tok);
            }
            ContentPart::Text { text: t } => text = t.clone(),
        }
    }
    Ok((img_tag, text))
}

/// Iterator over the text parts of a content list.
pub(crate) fn text_parts(parts: &[ContentPart]) -> impl Iterator<Item = &str> {
    parts.iter().filter_map(|part| match part {
        ContentPart::Text { text } => Some(text.as_str()),
        _ => None,
    })
}
