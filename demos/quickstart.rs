//! Quick-start examples for the Baidu Xiling Rust client.
//!
//! Run with:
//!   BAIDU_API_KEY=... BAIDU_SECRET_KEY=... cargo run --example quickstart
//!
//! Expects a `demo.mp4` in the working directory for the upload step.

use baidu_xiling::{Client, ClientBuilder, MemoryTokenCache, PollOptions, XilingError};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> baidu_xiling::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Create a client
    // -----------------------------------------------------------------------
    let api_key = std::env::var("BAIDU_API_KEY").unwrap_or_default();
    let secret_key = std::env::var("BAIDU_SECRET_KEY").unwrap_or_default();

    let client = ClientBuilder::new()
        .api_key(api_key.clone())
        .secret_key(secret_key.clone())
        .cache(Arc::new(MemoryTokenCache::new()))
        .build()?;

    // Or with defaults and no cache:
    let _plain = Client::new(api_key, secret_key)?;

    // -----------------------------------------------------------------------
    // 2. Fetch an access token (reused until a minute before expiry)
    // -----------------------------------------------------------------------
    let token = client.access_token().await?;
    println!("Token acquired ({} chars)", token.len());
    println!();

    // -----------------------------------------------------------------------
    // 3. Upload a file
    // -----------------------------------------------------------------------
    match client.upload_file("demo.mp4", [("provider_type", "DIGITAL_HUMAN")]).await {
        Ok(body) => println!("Uploaded: {body}"),
        Err(XilingError::FileNotFound(path)) => println!("Skipping upload, {} missing", path.display()),
        Err(e) => return Err(e),
    }
    println!();

    // -----------------------------------------------------------------------
    // 4. Digital-human video synthesis with progress callback
    // -----------------------------------------------------------------------
    let task = client
        .create_synthesis_task(&json!({
            "figure_id": "A2a_V1",
            "text": "欢迎使用百度曦灵数字人",
        }))
        .await?;
    println!("Synthesis task {}", task.task_id);

    let opts = PollOptions {
        interval: Duration::from_secs(5),
        timeout: Duration::from_secs(600),
        on_progress: Some(Box::new(|snapshot| {
            println!("  Status: {:?}", snapshot.status);
        })),
    };

    match client.wait_for_synthesis_result(&task.task_id, Some(opts)).await {
        Ok(done) => println!("Synthesis done: {}", done.raw),
        Err(XilingError::Timeout { task_id, .. }) => println!("Task {task_id} still running"),
        Err(e) => return Err(e),
    }
    println!();

    // -----------------------------------------------------------------------
    // 5. Long-text TTS, submit and wait in one call
    // -----------------------------------------------------------------------
    let speech = client
        .synthesize_speech(
            &json!({ "text": ["你好，百度"], "format": "mp3-16k", "lang": "zh" }),
            None,
        )
        .await?;
    println!("Speech URL: {}", speech.raw["task_result"]["speech_url"]);

    Ok(())
}
