//! Structured prompt shapes for runtimes that template messages
//! themselves instead of taking a flat prompt string.
//!
//! Three shapes cover the runtimes in use: typed message lists (with
//! images either pre-extracted or left as references for the runtime's
//! own processor), a prompt/history/system split for conversational
//! checkpoints, and a bracket-labeled single prompt with the system text
//! carried separately.

use image::DynamicImage;
use vision_protocol::{ContentPart, Message, Role};
use vlm_multimodal::MediaFetcher;

use super::{split_trailing_assistant, FormatResult};

/// One typed content entry of a structured message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructuredPart {
    Text { text: String },
    /// An image slot. `url` is kept when the runtime resolves references
    /// itself and cleared when the image was already extracted into the
    /// accompanying image list.
    Image { url: Option<String> },
}

/// A role-tagged list of typed parts, mirroring the wire message but
/// with image references replaced by typed slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuredMessage {
    pub role: Role,
    pub content: Vec<StructuredPart>,
}

/// Output of [`structured_messages`]: extracted images in encounter
/// order plus the typed message list whose image slots they fill.
#[derive(Debug, Default)]
pub struct StructuredPrompt {
    pub images: Vec<DynamicImage>,
    pub messages: Vec<StructuredMessage>,
}

/// Map every message part faithfully, resolving image references into
/// `images` and leaving a positional [`StructuredPart::Image`] slot in
/// their place.
pub async fn structured_messages(
    messages: &[Message],
    fetcher: &dyn MediaFetcher,
) -> FormatResult<StructuredPrompt> {
    let mut out = StructuredPrompt::default();
    for message in messages {
        let mut content = Vec::new();
        for part in message.content_parts().iter() {
            match part {
                ContentPart::ImageUrl { image_url } => {
                    out.images.push(fetcher.url_to_image(&image_url.url).await?);
                    content.push(StructuredPart::Image { url: None });
                }
                ContentPart::Text { text } => {
                    content.push(StructuredPart::Text { text: text.clone() });
                }
            }
        }
        out.messages.push(StructuredMessage {
            role: message.role,
            content,
        });
    }
    Ok(out)
}

/// Shape messages for a runtime whose chat template and image processor
/// do their own resolution: user parts stay typed with their reference
/// URLs, while every other role collapses to a single text entry built
/// by concatenating its text parts with no separator. The collapse keeps
/// chat templates that expect exactly one text block per non-user turn
/// from seeing stray entries.
pub fn template_messages(messages: &[Message]) -> Vec<StructuredMessage> {
    messages
        .iter()
        .map(|message| {
            let parts = message.content_parts();
            let content = if message.role == Role::User {
                parts
                    .iter()
                    .map(|part| match part {
                        ContentPart::ImageUrl { image_url } => StructuredPart::Image {
                            url: Some(image_url.url.clone()),
                        },
                        ContentPart::Text { text } => StructuredPart::Text { text: text.clone() },
                    })
                    .collect()
            } else {
                let text: String = super::text_parts(&parts).collect();
                vec![StructuredPart::Text { text }]
            };
            StructuredMessage {
                role: message.role,
                content,
            }
        })
        .collect()
}

// ============================================================================
// Prompt / history / system split
// ============================================================================

/// Conversation split for checkpoints that take the pending prompt, the
/// finished turn pairs, and the system text as separate inputs.
#[derive(Debug, Default)]
pub struct ChatHistory {
    /// The pending (unanswered) user prompt.
    pub prompt: String,
    /// Completed `(question, answer)` pairs.
    pub history: Vec<(String, String)>,
    pub images: Vec<DynamicImage>,
    pub system_prompt: Option<String>,
}

/// Split messages into the [`ChatHistory`] shape. Each image prepends
/// one `<image>\n` tag to the user fragment accumulated so far; every
/// assistant text closes the open prompt into a history pair; the last
/// system text wins.
pub async fn prompt_history_images_system(
    messages: &[Message],
    fetcher: &dyn MediaFetcher,
) -> FormatResult<ChatHistory> {
    const IMG_TOK: &str = "<image>\n";

    let mut out = ChatHistory::default();
    for message in messages {
        let parts = message.content_parts();
        match message.role {
            Role::User => {
                let mut fragment = String::new();
                for part in parts.iter() {
                    match part {
                        ContentPart::ImageUrl { image_url } => {
                            out.images.push(fetcher.url_to_image(&image_url.url).await?);
                            fragment = format!("{IMG_TOK}{fragment}");
                        }
                        ContentPart::Text { text } => fragment.push_str(text),
                    }
                }
                out.prompt.push_str(&fragment);
            }
            Role::Assistant => {
                for text in super::text_parts(&parts) {
                    let question = std::mem::take(&mut out.prompt);
                    out.history.push((question, text.to_string()));
                }
            }
            Role::System => {
                for text in super::text_parts(&parts) {
                    out.system_prompt = Some(text.to_string());
                }
            }
            Role::Tool => {}
        }
    }

    Ok(out)
}

// ============================================================================
// Bracket-labeled prompt with separate system text
// ============================================================================

/// A flat bracket-labeled prompt plus the system text kept out of band.
#[derive(Debug, Default)]
pub struct SystemSplitPrompt {
    pub images: Vec<DynamicImage>,
    pub prompt: String,
    pub system_prompt: Option<String>,
}

/// Emu-style rendering: ` [USER]: {images}{text}` turns, assistant turns
/// closed with `</s>`, and the system text returned separately because
/// the checkpoint takes it as its own input.
pub async fn emu_images_prompt_system(
    messages: &[Message],
    fetcher: &dyn MediaFetcher,
) -> FormatResult<SystemSplitPrompt> {
    const IMG_TOK: &str = "[<IMG_PLH>]";

    let (messages, seed) = split_trailing_assistant(messages);
    let mut generation_msg = String::from(" [ASSISTANT]:");
    if let Some(seed) = seed {
        generation_msg.push_str(&seed);
    }

    let mut out = SystemSplitPrompt::default();
    for message in messages {
        let parts = message.content_parts();
        match message.role {
            Role::User => {
                let mut img_tag = String::new();
                let mut text = String::new();
                for part in parts.iter() {
                    match part {
                        ContentPart::ImageUrl { image_url } => {
                            out.images.push(fetcher.url_to_image(&image_url.url).await?);
                            img_tag.push_str(IMG_TOK);
                        }
                        ContentPart::Text { text: t } => text = t.clone(),
                    }
                }
                out.prompt.push_str(&format!(" [USER]: {img_tag}{text}"));
            }
            Role::Assistant => {
                for text in super::text_parts(&parts) {
                    out.prompt.push_str(&format!(" [ASSISTANT]: {text}</s>"));
                }
            }
            Role::System => {
                for text in super::text_parts(&parts) {
                    out.system_prompt = Some(text.to_string());
                }
            }
            Role::Tool => {}
        }
    }

    out.prompt.push_str(&generation_msg);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::testing::FakeFetcher;
    use vision_protocol::{ContentPart, Message};

    #[tokio::test]
    async fn structured_messages_extracts_images_into_slots() {
        let messages = vec![Message::parts(
            Role::User,
            vec![
                ContentPart::image_url("data:image/png;base64,AAAA"),
                ContentPart::text("describe"),
            ],
        )];
        let fetcher = FakeFetcher::default();
        let out = structured_messages(&messages, &fetcher).await.unwrap();

        assert_eq!(out.images.len(), 1);
        assert_eq!(
            out.messages[0].content,
            vec![
                StructuredPart::Image { url: None },
                StructuredPart::Text {
                    text: "describe".into()
                },
            ]
        );
    }

    #[test]
    fn template_messages_keeps_user_image_refs() {
        let messages = vec![Message::parts(
            Role::User,
            vec![
                ContentPart::image_url("https://example.com/a.png"),
                ContentPart::text("what?"),
            ],
        )];
        let out = template_messages(&messages);
        assert_eq!(
            out[0].content[0],
            StructuredPart::Image {
                url: Some("https://example.com/a.png".into())
            }
        );
    }

    #[test]
    fn template_messages_collapses_non_user_text_parts() {
        let messages = vec![Message::parts(
            Role::System,
            vec![ContentPart::text("You are "), ContentPart::text("terse.")],
        )];
        let out = template_messages(&messages);
        // One entry, joined with no separator.
        assert_eq!(
            out[0].content,
            vec![StructuredPart::Text {
                text: "You are terse.".into()
            }]
        );
    }

    #[tokio::test]
    async fn history_split_pairs_turns_and_keeps_pending_prompt() {
        let messages = vec![
            Message::text(Role::System, "first system"),
            Message::text(Role::User, "q1"),
            Message::text(Role::Assistant, "a1"),
            Message::text(Role::System, "Be terse."),
            Message::parts(
                Role::User,
                vec![
                    ContentPart::text("q2"),
                    ContentPart::image_url("data:image/png;base64,AAAA"),
                ],
            ),
        ];
        let fetcher = FakeFetcher::default();
        let out = prompt_history_images_system(&messages, &fetcher)
            .await
            .unwrap();

        assert_eq!(out.history, vec![("q1".to_string(), "a1".to_string())]);
        // Image tag lands ahead of the accumulated text.
        assert_eq!(out.prompt, "<image>\nq2");
        assert_eq!(out.images.len(), 1);
        assert_eq!(out.system_prompt.as_deref(), Some("Be terse."));
    }

    #[tokio::test]
    async fn emu_split_labels_turns_and_separates_system() {
        let messages = vec![
            Message::text(Role::System, "Be terse."),
            Message::parts(
                Role::User,
                vec![
                    ContentPart::image_url("data:image/png;base64,AAAA"),
                    ContentPart::text("look"),
                ],
            ),
            Message::text(Role::Assistant, "ok"),
            Message::text(Role::User, "more"),
        ];
        let fetcher = FakeFetcher::default();
        let out = emu_images_prompt_system(&messages, &fetcher).await.unwrap();

        assert_eq!(
            out.prompt,
            " [USER]: [<IMG_PLH>]look [ASSISTANT]: ok</s> [USER]: more [ASSISTANT]:"
        );
        assert_eq!(out.system_prompt.as_deref(), Some("Be terse."));
        assert_eq!(out.images.len(), 1);
    }

    #[tokio::test]
    async fn emu_trailing_assistant_extends_generation_marker() {
        let messages = vec![
            Message::text(Role::User, "hi"),
            Message::text(Role::Assistant, "part"),
        ];
        let out = emu_images_prompt_system(&messages, &FakeFetcher::default())
            .await
            .unwrap();
        assert!(out.prompt.ends_with(" [ASSISTANT]:part"));
    }
}
