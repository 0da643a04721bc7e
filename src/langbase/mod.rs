//! Langbase Pipes API client used for the classify, compose and score calls.

mod client;
mod types;


pub use client::LangbaseClient;
pub use types::{
    CreatePipeRequest, CreatePipeResponse, Message, MessageRole, PipeRequest, PipeResponse,
    PipeStatus, RawResponse, Usage,
};
