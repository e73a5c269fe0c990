//! Stream a chat completion to stdout, retrying rate limits and overload.
//!
//! # Usage
//!
//! ```bash
//! OPENAI_API_KEY=sk-... cargo run --example stream_chat -- "Tell me a joke"
//! ```

use futures::StreamExt;
use tether_rs::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    let prompt = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "Say hello in three languages.".to_string());

    let client = Client::with_config(ClientConfig::from_env()?)?;
    let request = ChatCompletionRequest::new(models::GPT4O_MINI, vec![ChatMessage::user(prompt)]);
    let retry = RetryPolicy::with_retries(3).retry_on([429, 503]);

    let stream = client
        .create_chat_completion_stream(request, &[], &[retry])
        .await?;
    println!("remaining requests: {:?}", stream.rate_limits().remaining_requests);

    let mut deltas = Box::pin(stream.into_stream());
    while let Some(chunk) = deltas.next().await {
        print!("{}", chunk?.content());
    }
    println!();
    Ok(())
}
