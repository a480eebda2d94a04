pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod providers;
pub mod server;
pub mod stream;
pub mod translate;

pub use client::{AnthropicClient, ClientBuilder, Messages};
pub use config::BridgeConfig;
pub use error::{ApiError, ApiErrorKind, BridgeError, Result, ToolArgumentError};
pub use logging::SharedLogger;
pub use server::{build_router, AppState};
pub use stream::MessageStream;
pub use translate::error_map::map_error;
pub use translate::request::anthropic_to_openai;
pub use translate::response::{openai_to_anthropic, openai_to_anthropic_strict};
pub use translate::streaming::{StreamAssembler, Termination};
