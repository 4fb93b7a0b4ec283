//! # Baidu Xiling client for Rust
//!
//! Async client for the [Baidu AI open platform](https://ai.baidu.com)
//! digital-human and speech APIs. Obtains and caches OAuth2
//! client-credentials tokens, signs requests, uploads files, and polls
//! long-running synthesis tasks until they finish.
//!
//! ## Quick start
//!
//! ```no_run
//! use baidu_xiling::Client;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> baidu_xiling::Result<()> {
//!     let client = Client::new("your-api-key", "your-secret-key")?;
//!
//!     // Submit a long-text TTS task and wait for the audio URL
//!     let done = client
//!         .synthesize_speech(&json!({ "text": ["你好，百度"], "format": "mp3-16k" }), None)
//!         .await?;
//!
//!     println!("speech: {}", done.raw["task_result"]["speech_url"]);
//!     Ok(())
//! }
//! ```
//!
//! ## Sharing tokens
//!
//! Tokens live for about 30 days. Plug in a [`TokenCache`] to share one token
//! between client instances or processes:
//!
//! ```no_run
//! use baidu_xiling::{ClientBuilder, MemoryTokenCache};
//! use std::sync::Arc;
//!
//! # fn example() -> baidu_xiling::Result<()> {
//! let cache = Arc::new(MemoryTokenCache::new());
//! let client = ClientBuilder::new()
//!     .api_key("your-api-key")
//!     .secret_key("your-secret-key")
//!     .cache(cache)
//!     .build()?;
//! # Ok(())
//! # }
//! ```

mod cache;
mod client;
mod errors;
mod models;
mod poll;

pub use cache::{cache_key, MemoryTokenCache, TokenCache, DEFAULT_CACHE_KEY_PREFIX};
pub use client::{Client, ClientBuilder};
pub use errors::{Result, XilingError};
pub use models::{AccessToken, PollOptions, TaskHandle, TaskSnapshot, TaskStatus};
pub use poll::poll_until;

// Re-exported so callers of `Client::request` need no direct reqwest dependency.
pub use reqwest::header::HeaderMap;
pub use reqwest::Method;
