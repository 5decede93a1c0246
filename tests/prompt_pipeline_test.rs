use std::sync::Arc;

use futures::StreamExt;
use vision_gateway::{
    dispatch, guess_model_format, spawn_generation, stream_until_eos, PromptFormat,
};
use vision_protocol::{ChatRequest, ContentPart, Message, MessageContent, Role};
use vlm_multimodal::{MediaConnector, MediaFetcher};

const TINY_PNG_BASE64: &str =
    "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAQAAAC1HAwCAAAAC0lEQVR42mNgYAAAAAMAASsJTYQAAAAASUVORK5CYII=";

fn tiny_png_data_uri() -> String {
    format!("data:image/png;base64,{TINY_PNG_BASE64}")
}

fn connector() -> Arc<dyn MediaFetcher> {
    Arc::new(MediaConnector::with_defaults().expect("connector"))
}

#[tokio::test]
async fn chatml_request_compiles_end_to_end() {
    let messages = vec![
        Message::text(Role::System, "Be terse."),
        Message::parts(
            Role::User,
            vec![
                ContentPart::image_url(tiny_png_data_uri()),
                ContentPart::text("What is this?"),
            ],
        ),
    ];

    let fetcher = connector();
    let compiled = dispatch("chatml", &messages, fetcher.as_ref())
        .await
        .expect("compile");

    assert_eq!(
        compiled.prompt,
        "<|im_start|>system\nBe terse.<|im_end|>\
         <|im_start|>user\n<image>\nWhat is this?<|im_end|>\
         <|im_start|>assistant\n"
    );
    assert_eq!(compiled.images.len(), 1);
    assert_eq!(compiled.images[0].width(), 1);
    assert_eq!(compiled.images[0].height(), 1);
}

#[tokio::test]
async fn guessed_format_compiles_a_deserialized_request() {
    let body = serde_json::json!({
        "model": "llava-v1.6-vicuna-13b",
        "messages": [
            {"role": "user", "content": [
                {"type": "image_url", "image_url": {"url": tiny_png_data_uri()}},
                {"type": "text", "text": "Describe the image."}
            ]}
        ]
    });
    let mut request: ChatRequest = serde_json::from_value(body).expect("deserialize");
    request.normalize_content();

    let format = guess_model_format(&request.model);
    assert_eq!(format, PromptFormat::Vicuna);

    let fetcher = connector();
    let compiled = format
        .compile(&request.messages, fetcher.as_ref())
        .await
        .expect("compile");
    assert_eq!(
        compiled.prompt,
        "USER: <image>\nDescribe the image.\nASSISTANT:"
    );
}

#[tokio::test]
async fn normalized_request_round_trips_bare_string_content() {
    let body = serde_json::json!({
        "model": "moondream2",
        "messages": [{"role": "user", "content": "hello"}]
    });
    let mut request: ChatRequest = serde_json::from_value(body).expect("deserialize");
    request.normalize_content();

    assert!(matches!(
        request.messages[0].content,
        MessageContent::Parts(_)
    ));
    assert_eq!(guess_model_format(&request.model), PromptFormat::Phi15);
}

#[tokio::test]
async fn generation_pipeline_streams_and_truncates() {
    let stream = spawn_generation(|sender| {
        for word in ["The ", "image ", "shows ", "a pixel.</s> junk"] {
            if !sender.send(word) {
                break;
            }
        }
        Ok(())
    });

    let truncated = stream_until_eos(Box::pin(stream.into_stream()), "</s>".to_string());
    let fragments: Vec<String> = truncated
        .map(|item| item.expect("fragment"))
        .collect()
        .await;

    assert_eq!(fragments, vec!["The ", "image ", "shows ", "a pixel."]);
}
