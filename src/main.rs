//! Terminal chat surface
//!
//! Reads questions from stdin and prints answers as they stream in.

use std::io::Write;
use std::sync::Mutex;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stream_chat::{
    Config, ConversationState, ConversationStore, ExchangeOutcome, HttpEventSource, MessageId,
    SendOptions, Sender, StoreOptions,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stream_chat=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::from_env()?;
    let source = HttpEventSource::new(
        config.stream.endpoint.clone(),
        config.stream.connect_timeout(),
    )?;
    let store = ConversationStore::with_options(source, StoreOptions::from(&config.store));

    tracing::info!("💬 Streaming answers from {}", config.stream.endpoint);

    let printer = Mutex::new(AnswerPrinter::default());
    store
        .subscribe(move |state| {
            let mut printer = printer.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(output) = printer.advance(state) {
                print!("{}", output);
                std::io::stdout().flush().ok();
            }
        })
        .detach();

    println!("Commands: /rag, /raw, /reset, /quit");
    let mut options = SendOptions::default();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    prompt();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "/quit" | "/exit" => break,
            "/reset" => {
                store.reset();
                println!("(conversation cleared)");
            }
            "/rag" => {
                options.rag_mode = !options.rag_mode;
                println!("(rag mode {})", on_off(options.rag_mode));
            }
            "/raw" => {
                options.bypass_context = !options.bypass_context;
                println!("(send without context {})", on_off(options.bypass_context));
            }
            _ => {
                if let Some(handle) = store.send(&line, options) {
                    let outcome = handle.await?;
                    println!();
                    if let ExchangeOutcome::Interrupted { reason, .. } = outcome {
                        tracing::debug!("Stream ended by transport: {}", reason);
                    }
                }
            }
        }
        prompt();
    }

    store.dispose();
    Ok(())
}

fn prompt() {
    print!("> ");
    std::io::stdout().flush().ok();
}

fn on_off(flag: bool) -> &'static str {
    if flag {
        "on"
    } else {
        "off"
    }
}

/// Tracks how much of the latest answer has been printed
#[derive(Debug, Default)]
struct AnswerPrinter {
    current: Option<MessageId>,
    printed: usize,
    model_shown: bool,
}

impl AnswerPrinter {
    /// Text to print for the part of the latest answer not printed yet
    fn advance(&mut self, state: &ConversationState) -> Option<String> {
        let answer = state
            .transcript
            .iter()
            .rev()
            .find(|m| m.from == Sender::Assistant)?;

        if self.current != Some(answer.id) {
            self.current = Some(answer.id);
            self.printed = 0;
            self.model_shown = false;
        }

        let mut output = String::new();
        if let (false, Some(model)) = (self.model_shown, answer.model.as_deref()) {
            self.model_shown = true;
            output.push_str(&format!("[{}] ", model));
        }
        if let Some(fresh) = answer.text.get(self.printed..) {
            output.push_str(fresh);
            self.printed = answer.text.len();
        }

        (!output.is_empty()).then_some(output)
    }
}
