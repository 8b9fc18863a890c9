//! wdkp-bot library
//!
//! Request parsing, rendering and dispatch for the `wdkp-bot` binary.

pub mod render;
pub mod requests;
pub mod service;

pub use requests::{Request, RequestError, Target};
pub use service::BotService;
