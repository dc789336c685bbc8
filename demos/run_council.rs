//! Runs one council request against whichever providers have an API key
//! set in the environment, printing the judged artefact.
//!
//! export OPENAI_KEY=...    (optional)
//! export GEMINI_KEY=...    (optional)
//! export PERPLEXITY_KEY=.. (optional)
//! export KIMI_KEY=...      (optional)
//!
//! At least one must be set. Then: cargo run --example run_council -- "your query"

use std::sync::Arc;

use council_orchestrator::provider::openai_compatible::OpenAiCompatibleAdapter;
use council_orchestrator::provider::registry::defaults_for;
use council_orchestrator::{CouncilOrchestrator, CredentialMap, EventHandler, PhaseEvent, Provider, RunInput};

/// Prints each phase transition as it happens. A stand-in for whatever a
/// real caller would do with its own per-call `event_handler` — stream to a
/// websocket, update a progress bar, and so on.
struct PrintEventHandler;

#[async_trait::async_trait]
impl EventHandler for PrintEventHandler {
    async fn on_phase_event(&self, event: &PhaseEvent) {
        match event {
            PhaseEvent::PhaseStart { phase, .. } => println!("[{phase:?}] starting"),
            PhaseEvent::PhaseEnd { phase, latency_ms, .. } => println!("[{phase:?}] done in {latency_ms}ms"),
            PhaseEvent::FinalAnswerEnd { confidence } => println!("final answer ready (confidence: {confidence:?})"),
            PhaseEvent::Error { phase, message, .. } => println!("[{phase:?}] error: {message}"),
            _ => {}
        }
    }
}

fn env_var_for(provider: Provider) -> &'static str {
    match provider {
        Provider::OpenAiFamily => "OPENAI_KEY",
        Provider::GeminiFamily => "GEMINI_KEY",
        Provider::PerplexityFamily => "PERPLEXITY_KEY",
        Provider::KimiFamily => "KIMI_KEY",
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let query = std::env::args().nth(1).unwrap_or_else(|| {
        "Design an idempotent event-ingestion endpoint for a payments system.".to_string()
    });

    let mut builder = CouncilOrchestrator::builder();
    let mut credentials = CredentialMap::new();

    for provider in Provider::ALL {
        if let Ok(key) = std::env::var(env_var_for(provider)) {
            let defaults = defaults_for(provider);
            builder = builder.with_provider(Arc::new(OpenAiCompatibleAdapter::new(
                provider,
                defaults.base_url,
                key.clone(),
            )));
            credentials.insert(provider.id(), key);
        }
    }

    if credentials.is_empty() {
        eprintln!("No provider keys set (OPENAI_KEY / GEMINI_KEY / PERPLEXITY_KEY / KIMI_KEY); nothing to run.");
        return Ok(());
    }

    let orchestrator = builder.build();
    println!("Query: {query}\n");

    let result = orchestrator
        .run(RunInput::new(query), credentials, Arc::new(PrintEventHandler))
        .await;

    println!("Status: {:?}", result.status);
    if let Some(output) = result.output {
        println!("\n--- Judged artefact ---\n{output}");
    }
    if let Some(error) = result.error {
        eprintln!("Error: {} ({:?})", error.message, error.kind);
    }

    Ok(())
}
