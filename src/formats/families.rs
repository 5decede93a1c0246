//! Per-family prompt transformations.
//!
//! Each function walks the messages in order, resolving image references
//! as it encounters them, and renders the family's wrapper literals
//! around the collected image tags and text. The trailing-assistant
//! continuation (pre-filling a partial answer) is split off a borrowed
//! prefix before the walk; families without a generation marker skip it.
//!
//! Several families have no true system-prompt channel and splice the
//! system text as a leading fragment instead. That is a documented
//! approximation carried over from how these models are prompted in the
//! wild, not something to unify.

use vision_protocol::{Message, Role};
use vlm_multimodal::MediaFetcher;

use super::{
    split_trailing_assistant, text_parts, user_images_and_text, CompiledPrompt, FormatResult,
};

/// ChatML (`<|im_start|>role ... <|im_end|>`): Qwen, Yi, InternVL 1.5/2.
pub async fn chatml(
    messages: &[Message],
    fetcher: &dyn MediaFetcher,
) -> FormatResult<CompiledPrompt> {
    const IMG_TOK: &str = "<image>\n";
    let (messages, seed) = split_trailing_assistant(messages);
    let mut generation_msg = String::from("<|im_start|>assistant\n");
    if let Some(seed) = seed {
        generation_msg.push_str(&seed);
    }

    let mut prompt = String::new();
    let mut images = Vec::new();
    for message in messages {
        let parts = message.content_parts();
        match message.role {
            Role::User => {
                let (img_tag, text) =
                    user_images_and_text(&parts, IMG_TOK, &mut images, fetcher).await?;
                prompt.push_str(&format!("<|im_start|>user\n{img_tag}{text}<|im_end|>"));
            }
            Role::Assistant => {
                for text in text_parts(&parts) {
                    prompt.push_str(&format!("<|im_start|>assistant\n{text}<|im_end|>"));
                }
            }
            Role::System => {
                for text in text_parts(&parts) {
                    prompt.push_str(&format!("<|im_start|>system\n{text}<|im_end|>"));
                }
            }
            Role::Tool => {}
        }
    }

    prompt.push_str(&generation_msg);
    Ok(CompiledPrompt { images, prompt })
}

/// Vicuna v1.1 (`USER:` / `ASSISTANT:`), also the fallback family.
pub async fn vicuna(
    messages: &[Message],
    fetcher: &dyn MediaFetcher,
) -> FormatResult<CompiledPrompt> {
    const IMG_TOK: &str = "<image>\n";
    let (messages, seed) = split_trailing_assistant(messages);
    let mut generation_msg = String::from("ASSISTANT:");
    if let Some(seed) = seed {
        generation_msg.push_str(&seed);
    }

    let mut prompt = String::new();
    let mut images = Vec::new();
    for message in messages {
        let parts = message.content_parts();
        match message.role {
            Role::User => {
                let (img_tag, text) =
                    user_images_and_text(&parts, IMG_TOK, &mut images, fetcher).await?;
                prompt.push_str(&format!("USER: {img_tag}{text}\n"));
            }
            Role::Assistant => {
                for text in text_parts(&parts) {
                    prompt.push_str(&format!("ASSISTANT: {text}\n"));
                }
            }
            Role::System => {
                // No system channel; spliced as a bare leading fragment.
                for text in text_parts(&parts) {
                    prompt.push_str(&format!("{text}\n\n"));
                }
            }
            Role::Tool => {}
        }
    }

    prompt.push_str(&generation_msg);
    Ok(CompiledPrompt { images, prompt })
}

/// Vicuna v0 (`### Human:` / `### Assistant:`), used by Yi-VL.
pub async fn vicuna0(
    messages: &[Message],
    fetcher: &dyn MediaFetcher,
) -> FormatResult<CompiledPrompt> {
    const IMG_TOK: &str = "<image_placeholder>\n";
    let (messages, seed) = split_trailing_assistant(messages);
    let mut generation_msg = String::from("### Assistant:");
    if let Some(seed) = seed {
        generation_msg.push_str(&seed);
    }

    let mut prompt = String::new();
    let mut images = Vec::new();
    for message in messages {
        let parts = message.content_parts();
        match message.role {
            Role::User => {
                let (img_tag, text) =
                    user_images_and_text(&parts, IMG_TOK, &mut images, fetcher).await?;
                prompt.push_str(&format!("### Human: {img_tag}{text}\n"));
            }
            Role::Assistant => {
                for text in text_parts(&parts) {
                    prompt.push_str(&format!("### Assistant: {text}\n"));
                }
            }
            Role::System => {
                for text in text_parts(&parts) {
                    prompt.push_str(&format!("{text}\n\n"));
                }
            }
            Role::Tool => {}
        }
    }

    prompt.push_str(&generation_msg);
    Ok(CompiledPrompt { images, prompt })
}

/// Llama 2 / Mistral instruct (`[INST] ... [/INST]`).
///
/// No generation marker and no trailing-assistant extraction: the
/// closing `[/INST]` already opens the assistant turn, and a trailing
/// assistant message simply renders as the partial reply.
pub async fn llama2(
    messages: &[Message],
    fetcher: &dyn MediaFetcher,
) -> FormatResult<CompiledPrompt> {
    const IMG_TOK: &str = "<image>\n";

    let mut prompt = String::new();
    let mut images = Vec::new();
    for message in messages {
        let parts = message.content_parts();
        match message.role {
            Role::User => {
                let (img_tag, text) =
                    user_images_and_text(&parts, IMG_TOK, &mut images, fetcher).await?;
                prompt.push_str(&format!("[INST] {img_tag}{text} [/INST]"));
            }
            Role::Assistant => {
                for text in text_parts(&parts) {
                    prompt.push_str(&format!(" {text}"));
                }
            }
            Role::System => {
                // Approximation: llama2 expects <<SYS>> inside the first
                // user turn; a dedicated [INST] block is close enough.
                for text in text_parts(&parts) {
                    prompt.push_str(&format!("[INST] <<SYS>>\n{text}\n<</SYS>> [/INST]"));
                }
            }
            Role::Tool => {}
        }
    }

    Ok(CompiledPrompt { images, prompt })
}

/// Llama 3 header style; every role renders through the same template.
pub async fn llama3(
    messages: &[Message],
    fetcher: &dyn MediaFetcher,
) -> FormatResult<CompiledPrompt> {
    const IMG_TOK: &str = "<image>";
    let (messages, seed) = split_trailing_assistant(messages);
    let mut generation_msg = String::from("<|start_header_id|>assistant<|end_header_id|>\n\n");
    if let Some(seed) = seed {
        generation_msg.push_str(&seed);
    }

    let mut prompt = String::new();
    let mut images = Vec::new();
    for message in messages {
        let parts = message.content_parts();

        let mut img_tag = String::new();
        for part in parts.iter() {
            if let vision_protocol::ContentPart::ImageUrl { image_url } = part {
                images.push(fetcher.url_to_image(&image_url.url).await?);
                img_tag.push_str(IMG_TOK);
            }
        }

        for text in text_parts(&parts) {
            prompt.push_str(&format!(
                "<|start_header_id|>{}<|end_header_id|>\n\n{img_tag}{}<|eot_id|>",
                message.role.as_str(),
                text.trim()
            ));
        }
    }

    prompt.push_str(&generation_msg);
    Ok(CompiledPrompt { images, prompt })
}

/// Gemma turn style (`<start_of_turn>user` / `<start_of_turn>model`).
pub async fn gemma(
    messages: &[Message],
    fetcher: &dyn MediaFetcher,
) -> FormatResult<CompiledPrompt> {
    const IMG_TOK: &str = "<image>\n";
    let (messages, seed) = split_trailing_assistant(messages);
    let mut generation_msg = String::from("<start_of_turn>model\n");
    if let Some(seed) = seed {
        generation_msg.push_str(&seed);
    }

    let mut prompt = String::new();
    let mut images = Vec::new();
    for message in messages {
        let parts = message.content_parts();
        match message.role {
            Role::User => {
                let (img_tag, text) =
                    user_images_and_text(&parts, IMG_TOK, &mut images, fetcher).await?;
                prompt.push_str(&format!("<start_of_turn>user\n{img_tag}{text}<end_of_turn>"));
            }
            Role::Assistant => {
                for text in text_parts(&parts) {
                    prompt.push_str(&format!("<start_of_turn>model\n{text}<end_of_turn>"));
                }
            }
            Role::System => {
                // Gemma has no system turn; fake one.
                for text in text_parts(&parts) {
                    prompt.push_str(&format!("<start_of_turn>system\n{text}<end_of_turn>"));
                }
            }
            Role::Tool => {}
        }
    }

    prompt.push_str(&generation_msg);
    Ok(CompiledPrompt { images, prompt })
}

/// Falcon chat (`User:` / `Falcon:`).
pub async fn falcon(
    messages: &[Message],
    fetcher: &dyn MediaFetcher,
) -> FormatResult<CompiledPrompt> {
    const IMG_TOK: &str = "<image>\n";
    let (messages, seed) = split_trailing_assistant(messages);
    let mut generation_msg = String::from("Falcon:");
    if let Some(seed) = seed {
        generation_msg.push_str(&seed);
    }

    let mut prompt = String::new();
    let mut images = Vec::new();
    for message in messages {
        let parts = message.content_parts();
        match message.role {
            Role::User => {
                let (img_tag, text) =
                    user_images_and_text(&parts, IMG_TOK, &mut images, fetcher).await?;
                prompt.push_str(&format!("User:{img_tag}{text} "));
            }
            Role::Assistant => {
                for text in text_parts(&parts) {
                    prompt.push_str(&format!("Falcon:{text}"));
                }
            }
            Role::System => {
                for text in text_parts(&parts) {
                    prompt.push_str(&format!("{text}\n\n"));
                }
            }
            Role::Tool => {}
        }
    }

    prompt.push_str(&generation_msg);
    Ok(CompiledPrompt { images, prompt })
}

/// Phi-1.5 question/answer style (moondream, Monkey).
///
/// User text parts concatenate as `{text}\n\n` blocks and each image
/// prepends its tag to the fragment accumulated so far, so tags land
/// ahead of the question text regardless of part order.
pub async fn phi15(
    messages: &[Message],
    fetcher: &dyn MediaFetcher,
) -> FormatResult<CompiledPrompt> {
    const IMG_TOK: &str = "<image>";
    let (messages, seed) = split_trailing_assistant(messages);
    let mut generation_msg = String::from("Answer:");
    if let Some(seed) = seed {
        generation_msg.push_str(&seed);
    }

    let mut prompt = String::new();
    let mut images = Vec::new();
    for message in messages {
        let parts = message.content_parts();
        match message.role {
            Role::User => {
                let mut fragment = String::new();
                for part in parts.iter() {
                    match part {
                        vision_protocol::ContentPart::ImageUrl { image_url } => {
                            images.push(fetcher.url_to_image(&image_url.url).await?);
                            fragment = format!("{IMG_TOK}{fragment}");
                        }
                        vision_protocol::ContentPart::Text { text } => {
                            fragment.push_str(&format!("{text}\n\n"));
                        }
                    }
                }
                prompt.push_str(&fragment);
            }
            Role::Assistant => {
                for text in text_parts(&parts) {
                    prompt.push_str(&format!("Answer: {text}\n\n"));
                }
            }
            Role::System => {
                // Fake system prompt.
                for text in text_parts(&parts) {
                    prompt.push_str(&format!("{text}\n\n"));
                }
            }
            Role::Tool => {}
        }
    }

    prompt.push_str(&generation_msg);
    Ok(CompiledPrompt { images, prompt })
}

/// Fuyu / persimmon style: bare text blocks, `\x04` opening replies.
/// Images carry no inline tag at all; no generation marker either.
pub async fn fuyu(
    messages: &[Message],
    fetcher: &dyn MediaFetcher,
) -> FormatResult<CompiledPrompt> {
    let mut prompt = String::new();
    let mut images = Vec::new();
    for message in messages {
        let parts = message.content_parts();
        match message.role {
            Role::User => {
                let mut fragment = String::new();
                for part in parts.iter() {
                    match part {
                        vision_protocol::ContentPart::ImageUrl { image_url } => {
                            images.push(fetcher.url_to_image(&image_url.url).await?);
                        }
                        vision_protocol::ContentPart::Text { text } => {
                            fragment.push_str(&format!("{text}\n\n"));
                        }
                    }
                }
                prompt.push_str(&fragment);
            }
            Role::Assistant => {
                for text in text_parts(&parts) {
                    prompt.push_str(&format!("\x04{text}\n"));
                }
            }
            Role::System => {
                for text in text_parts(&parts) {
                    prompt.push_str(&format!("{text}\n\n"));
                }
            }
            Role::Tool => {}
        }
    }

    Ok(CompiledPrompt { images, prompt })
}

/// Phi-3 instruct (`<|user|>` / `<|assistant|>` / `<|end|>`); every role
/// renders through the role template. Some checkpoints take numbered
/// `<|image_{n}|>` tags instead; the plain tag works across them.
pub async fn phi3(
    messages: &[Message],
    fetcher: &dyn MediaFetcher,
) -> FormatResult<CompiledPrompt> {
    const IMG_TOK: &str = "<image>\n";
    let (messages, seed) = split_trailing_assistant(messages);
    let mut generation_msg = String::from("<|assistant|>\n");
    if let Some(seed) = seed {
        generation_msg.push_str(&seed);
    }

    let mut prompt = String::new();
    let mut images = Vec::new();
    for message in messages {
        let parts = message.content_parts();

        let mut img_tag = String::new();
        for part in parts.iter() {
            if let vision_protocol::ContentPart::ImageUrl { image_url } = part {
                images.push(fetcher.url_to_image(&image_url.url).await?);
                img_tag.push_str(IMG_TOK);
            }
        }

        for text in text_parts(&parts) {
            prompt.push_str(&format!(
                "<|{}|>\n{img_tag}{text}<|end|>\n",
                message.role.as_str()
            ));
        }
    }

    prompt.push_str(&generation_msg);
    Ok(CompiledPrompt { images, prompt })
}

/// InternVL2-4B hybrid (`<s><|user|>` ... `<|end|>`); no system channel.
pub async fn phintern(
    messages: &[Message],
    fetcher: &dyn MediaFetcher,
) -> FormatResult<CompiledPrompt> {
    const IMG_TOK: &str = "<image>\n";
    let (messages, seed) = split_trailing_assistant(messages);
    let mut generation_msg = String::from("<s><|assistant|>\n");
    if let Some(seed) = seed {
        generation_msg.push_str(&seed);
    }

    let mut prompt = String::new();
    let mut images = Vec::new();
    for message in messages {
        let parts = message.content_parts();
        match message.role {
            Role::User => {
                let (img_tag, text) =
                    user_images_and_text(&parts, IMG_TOK, &mut images, fetcher).await?;
                prompt.push_str(&format!("<s><|user|>\n{img_tag}{text}<|end|>"));
            }
            Role::Assistant => {
                for text in text_parts(&parts) {
                    prompt.push_str(&format!("<s><|assistant|>\n{text}<|end|>"));
                }
            }
            Role::System | Role::Tool => {}
        }
    }

    prompt.push_str(&generation_msg);
    Ok(CompiledPrompt { images, prompt })
}

/// GLM-4V (`[gMASK]<sop>` preamble, `<|role|>` headers, sentinel-wrapped
/// image tokens).
pub async fn glm4v(
    messages: &[Message],
    fetcher: &dyn MediaFetcher,
) -> FormatResult<CompiledPrompt> {
    const IMG_TOK: &str = "<|begin_of_image|><|endoftext|><|end_of_image|>";
    let (messages, seed) = split_trailing_assistant(messages);
    let mut generation_msg = String::from("<|assistant|>\n");
    if let Some(seed) = seed {
        generation_msg.push_str(&seed);
    }

    let mut prompt = String::from("[gMASK]<sop>");
    let mut images = Vec::new();
    for message in messages {
        let parts = message.content_parts();

        let mut img_tag = String::new();
        for part in parts.iter() {
            if let vision_protocol::ContentPart::ImageUrl { image_url } = part {
                images.push(fetcher.url_to_image(&image_url.url).await?);
                img_tag.push_str(IMG_TOK);
            }
        }

        for text in text_parts(&parts) {
            prompt.push_str(&format!(
                "<|{}|>\n{img_tag}{text}",
                message.role.as_str()
            ));
        }
    }

    prompt.push_str(&generation_msg);
    Ok(CompiledPrompt { images, prompt })
}

/// Florence captioning: a single task token or free-text command, one
/// command at a time; the last text part wins outright.
pub async fn florence(
    messages: &[Message],
    fetcher: &dyn MediaFetcher,
) -> FormatResult<CompiledPrompt> {
    let mut prompt = String::from("<MORE_DETAILED_CAPTION>");
    let mut images = Vec::new();

    for message in messages {
        let parts = message.content_parts();
        for part in parts.iter() {
            if let vision_protocol::ContentPart::ImageUrl { image_url } = part {
                images.push(fetcher.url_to_image(&image_url.url).await?);
            }
        }
        for text in text_parts(&parts) {
            if !text.is_empty() {
                prompt = text.to_string();
            }
        }
    }

    Ok(CompiledPrompt { images, prompt })
}

/// Pixtral instruct: `[INST] {text}[IMG] [/INST]` — the image tag goes
/// AFTER the text, unlike every other family. Any system text is spliced
/// ahead of the final user message inside the closing `[INST]` block.
pub async fn pixtral(
    messages: &[Message],
    fetcher: &dyn MediaFetcher,
) -> FormatResult<CompiledPrompt> {
    const IMG_TOK: &str = "[IMG]";
    let (messages, seed) = split_trailing_assistant(messages);
    let generation_msg = seed.unwrap_or_default();

    // The final user message is folded into the closing [INST] block so
    // the system text can ride along with it.
    let (messages, last_user) = match messages.last() {
        Some(last) if last.role == Role::User => (&messages[..messages.len() - 1], Some(last)),
        _ => (messages, None),
    };

    let mut prompt = String::from("<s>");
    let mut images = Vec::new();
    let mut system_prompt = String::new();
    for message in messages {
        let parts = message.content_parts();
        match message.role {
            Role::User => {
                let (img_tag, text) =
                    user_images_and_text(&parts, IMG_TOK, &mut images, fetcher).await?;
                prompt.push_str(&format!("[INST] {text}{img_tag} [/INST]"));
            }
            Role::Assistant => {
                for text in text_parts(&parts) {
                    prompt.push_str(&format!(" {text}"));
                }
            }
            Role::System => {
                for text in text_parts(&parts) {
                    system_prompt.push_str(text);
                }
            }
            Role::Tool => {}
        }
    }

    if last_user.is_some() || !system_prompt.is_empty() {
        let mut closing = String::new();
        if !system_prompt.is_empty() {
            closing.push_str(&system_prompt);
            closing.push_str("\n\n");
        }
        if let Some(last) = last_user {
            let parts = last.content_parts();
            let (img_tag, text) =
                user_images_and_text(&parts, IMG_TOK, &mut images, fetcher).await?;
            closing.push_str(&text);
            closing.push_str(&img_tag);
        }
        prompt.push_str(&format!("[INST] {closing} [/INST]"));
    }

    prompt.push_str(&generation_msg);
    Ok(CompiledPrompt { images, prompt })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::testing::{fetch_count, FakeFetcher};
    use vision_protocol::{ContentPart, Message};

    fn image_and_question() -> Vec<Message> {
        vec![
            Message::text(Role::System, "Be terse."),
            Message::parts(
                Role::User,
                vec![
                    ContentPart::image_url("data:image/png;base64,AAAA"),
                    ContentPart::text("What is this?"),
                ],
            ),
        ]
    }

    #[tokio::test]
    async fn chatml_renders_system_user_and_generation_marker() {
        let fetcher = FakeFetcher::default();
        let compiled = chatml(&image_and_question(), &fetcher).await.unwrap();

        assert_eq!(compiled.images.len(), 1);
        assert!(compiled.prompt.starts_with(
            "<|im_start|>system\nBe terse.<|im_end|><|im_start|>user\n<image>\nWhat is this?<|im_end|>"
        ));
        assert!(compiled.prompt.ends_with("<|im_start|>assistant\n"));
    }

    #[tokio::test]
    async fn chatml_trailing_assistant_seeds_continuation() {
        let messages = vec![
            Message::text(Role::User, "hi"),
            Message::text(Role::Assistant, "partial"),
        ];
        let fetcher = FakeFetcher::default();
        let compiled = chatml(&messages, &fetcher).await.unwrap();

        assert!(compiled.prompt.ends_with("<|im_start|>assistant\npartial"));
        // The seed must not also render as a closed assistant turn.
        assert_eq!(compiled.prompt.matches("partial").count(), 1);
    }

    #[tokio::test]
    async fn vicuna_renders_role_labels() {
        let messages = vec![
            Message::text(Role::User, "hello"),
            Message::text(Role::Assistant, "hi there"),
            Message::text(Role::User, "bye"),
        ];
        let fetcher = FakeFetcher::default();
        let compiled = vicuna(&messages, &fetcher).await.unwrap();
        assert_eq!(
            compiled.prompt,
            "USER: hello\nASSISTANT: hi there\nUSER: bye\nASSISTANT:"
        );
    }

    #[tokio::test]
    async fn user_turn_takes_last_text_part() {
        let messages = vec![Message::parts(
            Role::User,
            vec![
                ContentPart::text("first"),
                ContentPart::text("second"),
            ],
        )];
        let fetcher = FakeFetcher::default();
        let compiled = vicuna(&messages, &fetcher).await.unwrap();
        assert_eq!(compiled.prompt, "USER: second\nASSISTANT:");
    }

    #[tokio::test]
    async fn image_only_user_turn_is_valid() {
        let messages = vec![Message::parts(
            Role::User,
            vec![ContentPart::image_url("data:image/png;base64,AAAA")],
        )];
        let fetcher = FakeFetcher::default();
        let compiled = vicuna(&messages, &fetcher).await.unwrap();
        assert_eq!(compiled.prompt, "USER: <image>\n\nASSISTANT:");
        assert_eq!(compiled.images.len(), 1);
    }

    #[tokio::test]
    async fn images_are_resolved_in_encounter_order() {
        let messages = vec![
            Message::parts(
                Role::User,
                vec![
                    ContentPart::image_url("data:a"),
                    ContentPart::text("one"),
                ],
            ),
            Message::text(Role::Assistant, "ok"),
            Message::parts(
                Role::User,
                vec![
                    ContentPart::image_url("data:b"),
                    ContentPart::image_url("data:c"),
                    ContentPart::text("two"),
                ],
            ),
        ];
        let fetcher = FakeFetcher::default();
        let compiled = chatml(&messages, &fetcher).await.unwrap();
        assert_eq!(compiled.images.len(), 3);
        assert_eq!(fetch_count(&fetcher), 3);
    }

    #[tokio::test]
    async fn llama2_keeps_trailing_assistant_inline() {
        let messages = vec![
            Message::text(Role::User, "hi"),
            Message::text(Role::Assistant, "partial"),
        ];
        let fetcher = FakeFetcher::default();
        let compiled = llama2(&messages, &fetcher).await.unwrap();
        // No extraction: the reply renders inline after the [/INST].
        assert_eq!(compiled.prompt, "[INST] hi [/INST] partial");
    }

    #[tokio::test]
    async fn llama2_wraps_system_in_sys_block() {
        let compiled = llama2(&image_and_question(), &FakeFetcher::default())
            .await
            .unwrap();
        assert!(compiled
            .prompt
            .starts_with("[INST] <<SYS>>\nBe terse.\n<</SYS>> [/INST]"));
        assert!(compiled.prompt.contains("[INST] <image>\nWhat is this? [/INST]"));
    }

    #[tokio::test]
    async fn llama3_templates_every_role_and_trims_text() {
        let messages = vec![
            Message::text(Role::System, "  Be terse.  "),
            Message::text(Role::User, "hi"),
        ];
        let compiled = llama3(&messages, &FakeFetcher::default()).await.unwrap();
        assert_eq!(
            compiled.prompt,
            "<|start_header_id|>system<|end_header_id|>\n\nBe terse.<|eot_id|>\
             <|start_header_id|>user<|end_header_id|>\n\nhi<|eot_id|>\
             <|start_header_id|>assistant<|end_header_id|>\n\n"
        );
    }

    #[tokio::test]
    async fn glm4v_starts_with_mask_preamble() {
        let compiled = glm4v(&image_and_question(), &FakeFetcher::default())
            .await
            .unwrap();
        assert!(compiled.prompt.starts_with("[gMASK]<sop><|system|>\nBe terse."));
        assert!(compiled.prompt.contains(
            "<|user|>\n<|begin_of_image|><|endoftext|><|end_of_image|>What is this?"
        ));
        assert!(compiled.prompt.ends_with("<|assistant|>\n"));
    }

    #[tokio::test]
    async fn fuyu_has_no_marker_and_no_image_tag() {
        let compiled = fuyu(&image_and_question(), &FakeFetcher::default())
            .await
            .unwrap();
        assert_eq!(compiled.prompt, "Be terse.\n\nWhat is this?\n\n");
        assert_eq!(compiled.images.len(), 1);
    }

    #[tokio::test]
    async fn phi15_prepends_image_tag_to_accumulated_fragment() {
        let messages = vec![Message::parts(
            Role::User,
            vec![
                ContentPart::text("What is this?"),
                ContentPart::image_url("data:image/png;base64,AAAA"),
            ],
        )];
        let compiled = phi15(&messages, &FakeFetcher::default()).await.unwrap();
        // The tag lands before text even when the image part came after.
        assert_eq!(compiled.prompt, "<image>What is this?\n\nAnswer:");
    }

    #[tokio::test]
    async fn florence_last_command_wins() {
        let messages = vec![Message::parts(
            Role::User,
            vec![
                ContentPart::image_url("data:image/png;base64,AAAA"),
                ContentPart::text("<OCR>"),
            ],
        )];
        let compiled = florence(&messages, &FakeFetcher::default()).await.unwrap();
        assert_eq!(compiled.prompt, "<OCR>");

        let no_command = vec![Message::parts(
            Role::User,
            vec![ContentPart::image_url("data:image/png;base64,AAAA")],
        )];
        let compiled = florence(&no_command, &FakeFetcher::default()).await.unwrap();
        assert_eq!(compiled.prompt, "<MORE_DETAILED_CAPTION>");
    }

    #[tokio::test]
    async fn pixtral_places_image_tag_after_text() {
        let messages = vec![
            Message::parts(
                Role::User,
                vec![
                    ContentPart::image_url("data:image/png;base64,AAAA"),
                    ContentPart::text("look"),
                ],
            ),
            Message::text(Role::Assistant, "seen"),
            Message::text(Role::User, "and now?"),
        ];
        let compiled = pixtral(&messages, &FakeFetcher::default()).await.unwrap();
        assert_eq!(
            compiled.prompt,
            "<s>[INST] look[IMG] [/INST] seen[INST] and now? [/INST]"
        );
    }

    #[tokio::test]
    async fn pixtral_final_user_turn_keeps_images_and_text() {
        let messages = vec![Message::parts(
            Role::User,
            vec![
                ContentPart::image_url("data:image/png;base64,AAAA"),
                ContentPart::text("What is this?"),
            ],
        )];
        let fetcher = FakeFetcher::default();
        let compiled = pixtral(&messages, &fetcher).await.unwrap();

        // The sole user turn closes the prompt; its image must still be
        // resolved and its tag placed after the text.
        assert_eq!(compiled.images.len(), 1);
        assert_eq!(fetch_count(&fetcher), 1);
        assert_eq!(compiled.prompt, "<s>[INST] What is this?[IMG] [/INST]");
    }

    #[tokio::test]
    async fn pixtral_splices_system_into_final_user_turn() {
        let messages = vec![
            Message::text(Role::System, "Be terse."),
            Message::text(Role::User, "What is this?"),
        ];
        let compiled = pixtral(&messages, &FakeFetcher::default()).await.unwrap();
        assert_eq!(compiled.prompt, "<s>[INST] Be terse.\n\nWhat is this? [/INST]");
    }

    #[tokio::test]
    async fn gemma_fakes_a_system_turn() {
        let compiled = gemma(&image_and_question(), &FakeFetcher::default())
            .await
            .unwrap();
        assert!(compiled
            .prompt
            .starts_with("<start_of_turn>system\nBe terse.<end_of_turn>"));
        assert!(compiled.prompt.ends_with("<start_of_turn>model\n"));
    }

    #[tokio::test]
    async fn phintern_ignores_system_messages() {
        let compiled = phintern(&image_and_question(), &FakeFetcher::default())
            .await
            .unwrap();
        assert!(!compiled.prompt.contains("Be terse."));
        assert!(compiled
            .prompt
            .starts_with("<s><|user|>\n<image>\nWhat is this?<|end|>"));
    }

    #[tokio::test]
    async fn falcon_uses_terse_labels() {
        let compiled = falcon(&image_and_question(), &FakeFetcher::default())
            .await
            .unwrap();
        assert_eq!(
            compiled.prompt,
            "Be terse.\n\nUser:<image>\nWhat is this? Falcon:"
        );
    }

    #[tokio::test]
    async fn phi3_numbers_roles_through_one_template() {
        let compiled = phi3(&image_and_question(), &FakeFetcher::default())
            .await
            .unwrap();
        assert_eq!(
            compiled.prompt,
            "<|system|>\nBe terse.<|end|>\n<|user|>\n<image>\nWhat is this?<|end|>\n<|assistant|>\n"
        );
    }
}
