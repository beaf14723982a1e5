//! Manual probe for the streaming conversation endpoint
//!
//! Streams one question end-to-end through the decoder, session and
//! transcript store, printing deltas as they arrive. Configure with
//! `CHAT_ENDPOINT`, `STUDY_PROGRAM` and `TRANSCRIPT_PATH`.

use copilot_chat::chat::TranscriptStore;
use copilot_chat::config::ChatConfig;
use copilot_chat::stream::{SessionController, SessionUpdate};
use std::io::Write;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let question = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "How do I hand my thesis in?".to_string());

    let config = ChatConfig::from_env();
    let store = Arc::new(TranscriptStore::open(&config.transcript_path));
    let controller = SessionController::new(&config, store);

    println!("Question: {}\n", question);

    let mut handle = controller.start("probe", &question).await?;
    while let Some(update) = handle.recv().await {
        match update {
            SessionUpdate::Delta(text) => {
                print!("{}", text);
                std::io::stdout().flush()?;
            }
            SessionUpdate::Completed {
                full_text,
                feedback_eligible,
            } => {
                println!(
                    "\n\n✓ Final answer ({} chars), feedback eligible: {}",
                    full_text.len(),
                    feedback_eligible
                );
            }
            SessionUpdate::PersistFailed(e) => eprintln!("\n[persist failed: {}]", e),
            SessionUpdate::Cancelled => println!("\n[cancelled]"),
            SessionUpdate::Failed(e) => eprintln!("\n[stream failed: {}]", e),
        }
    }

    Ok(())
}
