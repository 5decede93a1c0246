//! Streaming token generation.
//!
//! Model inference is blocking, so each generation runs on a dedicated
//! blocking task that pushes decoded fragments into a bounded channel.
//! The async side consumes them as a stream, truncates at the model's
//! end-of-sequence marker, and surfaces worker failures in order: every
//! fragment queued before the failure is delivered first, then the error
//! terminates the stream.
//!
//! There is no cancellation protocol. A consumer that stops early just
//! drops its receiver; the producer keeps running until its next send
//! fails against the closed channel, or to completion. Accepted leak
//! boundary.

use std::time::Duration;

use futures::{Stream, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::warn;
use vision_protocol::ChatRequest;

/// Fragments buffered between the blocking producer and the consumer.
/// The bound applies backpressure to a producer outrunning a slow client.
const FRAGMENT_CHANNEL_SIZE: usize = 32;

/// How long the consumer waits for the next fragment before giving up
/// on a stalled worker.
const RECV_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Error)]
pub enum StreamError {
    /// The generation worker returned an error.
    #[error("generation failed: {0}")]
    Generation(#[source] anyhow::Error),
    /// No fragment arrived within the receive timeout.
    #[error("no output from generation worker within {0:?}")]
    Timeout(Duration),
}

/// Sampling and decoding knobs mapped from a chat request.
///
/// `do_sample` stays off for greedy decoding and flips on only when the
/// request asks for a temperature above zero or a nucleus mass other
/// than the 1.0 default. `top_k` is carried for runtimes that take it
/// but is never set from the request.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub max_new_tokens: Option<u32>,
    pub do_sample: bool,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub use_cache: bool,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_new_tokens: None,
            do_sample: false,
            temperature: None,
            top_p: None,
            top_k: None,
            use_cache: true,
        }
    }
}

impl GenerationParams {
    pub fn from_request(request: &ChatRequest) -> Self {
        let mut params = Self::default();
        if request.max_tokens > 0 {
            params.max_new_tokens = Some(request.max_tokens);
        }
        if let Some(temperature) = request.temperature {
            if temperature > 0.0 {
                params.do_sample = true;
                params.temperature = Some(temperature);
            }
        }
        if let Some(top_p) = request.top_p {
            if top_p != 1.0 {
                params.do_sample = true;
                params.top_p = Some(top_p);
            }
        }
        params
    }
}

/// What travels over the hand-off channel. A failure is always the
/// worker's final event, so fragments queued ahead of it drain first.
enum StreamEvent {
    Fragment(String),
    Failed(anyhow::Error),
}

/// Producer-side handle passed into the generation closure.
pub struct FragmentSender {
    tx: mpsc::Sender<StreamEvent>,
}

impl FragmentSender {
    /// Push one decoded fragment, blocking when the channel is full.
    /// Returns false once the consumer is gone, so the producer can
    /// stop decoding early.
    pub fn send(&self, fragment: impl Into<String>) -> bool {
        self.tx
            .blocking_send(StreamEvent::Fragment(fragment.into()))
            .is_ok()
    }
}

/// Consumer side of a running generation.
pub struct TokenStream {
    rx: mpsc::Receiver<StreamEvent>,
    recv_timeout: Duration,
}

impl TokenStream {
    pub fn with_recv_timeout(mut self, timeout: Duration) -> Self {
        self.recv_timeout = timeout;
        self
    }

    /// Next fragment, a terminal error, or `None` once the worker is
    /// done and the channel drained.
    pub async fn recv(&mut self) -> Option<Result<String, StreamError>> {
        match tokio::time::timeout(self.recv_timeout, self.rx.recv()).await {
            Err(_) => Some(Err(StreamError::Timeout(self.recv_timeout))),
            Ok(None) => None,
            Ok(Some(StreamEvent::Fragment(fragment))) => Some(Ok(fragment)),
            Ok(Some(StreamEvent::Failed(error))) => Some(Err(StreamError::Generation(error))),
        }
    }

    /// Adapt into a [`Stream`]; any error is terminal.
    pub fn into_stream(self) -> impl Stream<Item = Result<String, StreamError>> + Send {
        futures::stream::unfold(Some(self), |state| async move {
            let mut rx = state?;
            match rx.recv().await {
                None => None,
                Some(Ok(fragment)) => Some((Ok(fragment), Some(rx))),
                Some(Err(error)) => Some((Err(error), None)),
            }
        })
    }
}

/// Run `producer` on a blocking task and stream its fragments back.
///
/// The closure receives a [`FragmentSender`] and runs the model's
/// blocking generate loop; returning an error queues it behind any
/// already-sent fragments as the stream's terminal event.
pub fn spawn_generation<F>(producer: F) -> TokenStream
where
    F: FnOnce(FragmentSender) -> anyhow::Result<()> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(FRAGMENT_CHANNEL_SIZE);
    tokio::task::spawn_blocking(move || {
        let sender = FragmentSender { tx: tx.clone() };
        if let Err(error) = producer(sender) {
            warn!(%error, "generation worker failed");
            // Consumer gone means nobody to tell; drop the error.
            let _ = tx.blocking_send(StreamEvent::Failed(error));
        }
    });
    TokenStream {
        rx,
        recv_timeout: RECV_TIMEOUT,
    }
}

/// Truncate a fragment stream at the first occurrence of `eos`.
///
/// Empty fragments are skipped. A fragment containing the marker yields
/// its non-empty prefix and ends the stream; errors pass through and
/// end it too.
pub fn stream_until_eos<S>(
    stream: S,
    eos: String,
) -> impl Stream<Item = Result<String, StreamError>> + Send
where
    S: Stream<Item = Result<String, StreamError>> + Send + Unpin,
{
    futures::stream::unfold(
        Some((stream, eos)),
        |state| async move {
            let (mut stream, eos) = state?;
            loop {
                match stream.next().await {
                    None => return None,
                    Some(Err(error)) => return Some((Err(error), None)),
                    Some(Ok(fragment)) => {
                        if fragment.is_empty() {
                            continue;
                        }
                        match fragment.find(&eos) {
                            None => return Some((Ok(fragment), Some((stream, eos)))),
                            Some(0) => return None,
                            Some(end) => {
                                return Some((Ok(fragment[..end].to_string()), None));
                            }
                        }
                    }
                }
            }
        },
    )
}
