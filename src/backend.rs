//! Backend seam between compiled requests and a concrete model runtime.
//!
//! [`ModelRuntime`] is the blocking inference surface a model
//! implementation provides; [`TemplatedBackend`] drives it for runtimes
//! whose own chat template does the prompt rendering, wiring request
//! normalization, image resolution, parameter mapping, and the streaming
//! pipeline around it.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::{stream::BoxStream, StreamExt};
use image::DynamicImage;
use thiserror::Error;
use tracing::info;
use vision_protocol::{ChatRequest, ContentPart};
use vlm_multimodal::{MediaConnectorError, MediaFetcher};

use crate::formats::structured::{template_messages, StructuredMessage};
use crate::formats::FormatError;
use crate::generation::{
    spawn_generation, stream_until_eos, FragmentSender, GenerationParams, StreamError,
};

/// Decoded fragments flowing back to the caller; errors are terminal.
pub type ChatStream = BoxStream<'static, Result<String, StreamError>>;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error(transparent)]
    Media(#[from] MediaConnectorError),
    #[error("chat templating failed: {0}")]
    Template(#[source] anyhow::Error),
    #[error(transparent)]
    Stream(#[from] StreamError),
}

/// Blocking inference surface of one loaded model.
///
/// `generate` runs on a dedicated blocking task and pushes decoded
/// fragments through `sender` as they are produced; it should stop early
/// when a send reports the consumer gone.
pub trait ModelRuntime: Send + Sync + 'static {
    /// Render structured messages through the model's own chat template.
    fn apply_chat_template(&self, messages: &[StructuredMessage]) -> anyhow::Result<String>;

    /// The marker that terminates this model's output.
    fn eos_token(&self) -> String;

    fn generate(
        &self,
        prompt: String,
        images: Vec<DynamicImage>,
        params: GenerationParams,
        sender: FragmentSender,
    ) -> anyhow::Result<()>;
}

/// A chat-capable vision model behind the streaming pipeline.
#[async_trait]
pub trait VisionBackend: Send + Sync {
    /// Start generating and stream decoded fragments back.
    async fn stream_chat(&self, request: &ChatRequest) -> Result<ChatStream, BackendError>;

    /// Run the full generation and return the collected answer.
    async fn chat(&self, request: &ChatRequest) -> Result<String, BackendError> {
        let started = Instant::now();
        let mut stream = self.stream_chat(request).await?;

        let mut answer = String::new();
        let mut fragments = 0usize;
        while let Some(item) = stream.next().await {
            answer.push_str(&item?);
            fragments += 1;
        }

        let elapsed = started.elapsed().as_secs_f64();
        let rate = if elapsed > 0.0 {
            fragments as f64 / elapsed
        } else {
            0.0
        };
        info!(
            fragments,
            chars = answer.len(),
            elapsed_secs = format_args!("{elapsed:.1}"),
            fragments_per_sec = format_args!("{rate:.1}"),
            "generation complete"
        );
        Ok(answer)
    }
}

/// Backend for runtimes that own their prompt rendering: messages go
/// through the runtime's chat template while image references are
/// resolved here, in encounter order, and handed to generation decoded.
pub struct TemplatedBackend<M: ModelRuntime> {
    runtime: Arc<M>,
    fetcher: Arc<dyn MediaFetcher>,
}

impl<M: ModelRuntime> TemplatedBackend<M> {
    pub fn new(runtime: Arc<M>, fetcher: Arc<dyn MediaFetcher>) -> Self {
        Self { runtime, fetcher }
    }

    async fn resolve_images(&self, request: &ChatRequest) -> Result<Vec<DynamicImage>, BackendError> {
        let mut images = Vec::new();
        for message in &request.messages {
            for part in message.content_parts().iter() {
                if let ContentPart::ImageUrl { image_url } = part {
                    images.push(self.fetcher.url_to_image(&image_url.url).await?);
                }
            }
        }
        Ok(images)
    }
}

#[async_trait]
impl<M: ModelRuntime> VisionBackend for TemplatedBackend<M> {
    async fn stream_chat(&self, request: &ChatRequest) -> Result<ChatStream, BackendError> {
        let mut request = request.clone();
        request.normalize_content();

        let messages = template_messages(&request.messages);
        let prompt = self
            .runtime
            .apply_chat_template(&messages)
            .map_err(BackendError::Template)?;
        let images = self.resolve_images(&request).await?;
        let params = GenerationParams::from_request(&request);

        let runtime = Arc::clone(&self.runtime);
        let stream = spawn_generation(move |sender| runtime.generate(prompt, images, params, sender));

        let eos = self.runtime.eos_token();
        Ok(stream_until_eos(Box::pin(stream.into_stream()), eos).boxed())
    }
}
