//! Default provider registration: base URL, default model, and default
//! rate limits for each closed `Provider` variant.

use crate::config::PacerConfig;
use crate::model::Provider;

/// Static defaults for one provider: where it lives and what model to use
/// when the caller doesn't specify one.
#[derive(Debug, Clone)]
pub struct ProviderDefaults {
    pub provider: Provider,
    pub base_url: &'static str,
    pub default_model: &'static str,
}

/// The closed registration table. Extending the system with a new backend
/// means adding a `Provider` variant and an entry here, not writing a new
/// duck-typed client class.
pub fn default_table() -> [ProviderDefaults; 4] {
    [
        ProviderDefaults {
            provider: Provider::OpenAiFamily,
            base_url: "https://api.openai.com/v1",
            default_model: "gpt-4.1-mini",
        },
        ProviderDefaults {
            provider: Provider::GeminiFamily,
            base_url: "https://generativelanguage.googleapis.com/v1beta/openai",
            default_model: "gemini-2.0-flash",
        },
        ProviderDefaults {
            provider: Provider::PerplexityFamily,
            base_url: "https://api.perplexity.ai",
            default_model: "sonar",
        },
        ProviderDefaults {
            provider: Provider::KimiFamily,
            base_url: "https://api.moonshot.ai/v1",
            default_model: "moonshot-v1-8k",
        },
    ]
}

pub fn defaults_for(provider: Provider) -> ProviderDefaults {
    default_table()
        .into_iter()
        .find(|d| d.provider == provider)
        .expect("default_table covers every Provider variant")
}

pub fn pacer_configs() -> [(Provider, PacerConfig); 4] {
    [
        (Provider::OpenAiFamily, PacerConfig { rps: 3.0, burst: 6, concurrency: 4 }),
        (Provider::GeminiFamily, PacerConfig { rps: 2.0, burst: 4, concurrency: 3 }),
        (Provider::PerplexityFamily, PacerConfig { rps: 1.0, burst: 2, concurrency: 2 }),
        (Provider::KimiFamily, PacerConfig { rps: 1.0, burst: 2, concurrency: 2 }),
    ]
}
