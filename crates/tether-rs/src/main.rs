//! Send a chat-completion request and print the response.
//!
//! Reads the API key from `OPENAI_API_KEY` (and optionally `OPENAI_BASE_URL`,
//! `OPENAI_ORG_ID`). Ctrl-C cancels the request, including any pending retry.
//!
//! # Examples
//!
//! ```sh
//! # Basic request
//! tether chat --user "Summarize the plot of Hamlet in one line"
//!
//! # Stream the reply, retrying rate limits and overload up to 3 times
//! tether chat --user "Write a haiku" --stream \
//!   --retries 3 --retry-code 429 --retry-code 503
//!
//! # Retry every 5xx
//! tether chat --user "Hello" --retries 2 --retry-above 499
//!
//! # List models
//! RUST_LOG=tether_rs=debug tether models
//! ```

use std::io::{self, Write};
use std::process;

use clap::{Args, Parser, Subcommand};
use tether_rs::chat::{
    ChatCompletionRequest, ChatCompletionResponse, ChatCompletionStream, ChatMessage,
};
use tether_rs::models::{self, ModelsList};
use tether_rs::{Client, ClientConfig, Error, Result, RetryPolicy};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tether", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Send a chat completion request
    Chat(ChatArgs),
    /// List available models
    Models(RetryArgs),
}

#[derive(Args)]
struct ChatArgs {
    // ── Message content ────────────────────────────────────────
    /// User message to send
    #[arg(long)]
    user: String,

    /// System prompt to set the assistant's behavior
    #[arg(long)]
    system: Option<String>,

    // ── Model selection ────────────────────────────────────────
    #[arg(long, default_value = models::GPT4O_MINI)]
    model: String,

    /// Maximum tokens in the response
    #[arg(long)]
    max_tokens: Option<u32>,

    /// Print deltas as they arrive
    #[arg(long)]
    stream: bool,

    #[command(flatten)]
    retry: RetryArgs,
}

#[derive(Args)]
struct RetryArgs {
    // ── Retry policy ───────────────────────────────────────────
    /// Retries after the first attempt
    #[arg(long, default_value_t = 0)]
    retries: u32,

    /// Status code eligible for retry (repeatable)
    #[arg(long = "retry-code")]
    retry_codes: Vec<u16>,

    /// Retry any status strictly above this code
    #[arg(long)]
    retry_above: Option<u16>,
}

impl RetryArgs {
    fn policy(&self) -> RetryPolicy {
        let mut policy =
            RetryPolicy::with_retries(self.retries).retry_on(self.retry_codes.iter().copied());
        if let Some(code) = self.retry_above {
            policy = policy.retry_above(code);
        }
        policy
    }
}

async fn chat(client: &Client, args: &ChatArgs, cancel: CancellationToken) -> Result<()> {
    let mut messages = Vec::new();
    if let Some(system) = &args.system {
        messages.push(ChatMessage::system(system.clone()));
    }
    messages.push(ChatMessage::user(args.user.clone()));

    let mut body = ChatCompletionRequest::new(args.model.clone(), messages);
    body.max_tokens = args.max_tokens;

    let request = client
        .chat_completion_request(body, args.stream)?
        .with_cancellation(cancel.clone());
    let policy = [args.retry.policy()];

    if !args.stream {
        let resp = client.send::<ChatCompletionResponse>(request, &policy).await?;
        println!("{}", resp.content().unwrap_or_default());
        return Ok(());
    }

    let stream: ChatCompletionStream = client.send_stream(request, &policy).await?;
    write_stream(stream, &cancel, &mut io::stdout().lock()).await
}

/// Print deltas as they arrive until the stream ends or `cancel` fires.
async fn write_stream(
    mut stream: ChatCompletionStream,
    cancel: &CancellationToken,
    out: &mut impl Write,
) -> Result<()> {
    loop {
        let chunk = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                stream.close();
                return Err(Error::Cancelled);
            }
            chunk = stream.next() => chunk?,
        };
        let Some(chunk) = chunk else { break };
        write!(out, "{}", chunk.content())?;
        out.flush()?;
    }
    writeln!(out)?;
    Ok(())
}

async fn list_models(client: &Client, args: &RetryArgs, cancel: CancellationToken) -> Result<()> {
    let request = client
        .new_request(reqwest::Method::GET, "/models", None)?
        .with_cancellation(cancel);
    let resp = client.send::<ModelsList>(request, &[args.policy()]).await?;
    for model in &resp.models {
        println!("{}\t{}", model.id, model.owned_by);
    }
    Ok(())
}

async fn run(cli: Cli, cancel: CancellationToken) -> Result<()> {
    let client = Client::with_config(ClientConfig::from_env()?)?;
    match &cli.command {
        Command::Chat(args) => chat(&client, args, cancel).await,
        Command::Models(args) => list_models(&client, args, cancel).await,
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    if let Err(e) = run(cli, cancel).await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
