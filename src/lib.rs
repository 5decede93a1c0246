//! Prompt-format compilation and streaming generation for
//! vision-language chat requests.
//!
//! A chat request in the OpenAI shape is compiled — per model family —
//! into a prompt string plus the images it references, then handed to a
//! generation worker whose decoded fragments stream back through a
//! bounded channel until the end-of-sequence marker.

pub mod backend;
pub mod formats;
pub mod generation;

pub use backend::{BackendError, ChatStream, ModelRuntime, TemplatedBackend, VisionBackend};
pub use formats::{dispatch, guess_model_format, CompiledPrompt, FormatError, PromptFormat};
pub use generation::{
    spawn_generation, stream_until_eos, FragmentSender, GenerationParams, StreamError, TokenStream,
};
