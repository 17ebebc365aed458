pub mod testutil;
pub mod traits;

pub use traits::{ChatRequest, ChatResponse, ChatStream, LlmProvider};
