//! A single adapter implementation shared by every registered provider.
//!
//! All four providers in this domain (OpenAI, Gemini, Perplexity, Kimi)
//! expose an OpenAI-compatible chat-completions shape, so unlike the
//! per-provider client modules this codebase otherwise carries one file
//! per backend for, a single generic adapter parameterised by base URL and
//! default model covers all four here (see DESIGN.md for the reasoning).

use std::time::Instant;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{CouncilError, ErrorKind};
use crate::model::{InvocationResult, InvocationStatus, ModelInvocation, Provider};
use crate::provider::http::get_shared_http_client;
use crate::provider::ProviderAdapter;

/// An OpenAI-chat-completions-compatible backend.
pub struct OpenAiCompatibleAdapter {
    provider: Provider,
    base_url: String,
    credential: String,
}

impl OpenAiCompatibleAdapter {
    pub fn new(provider: Provider, base_url: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            provider,
            base_url: base_url.into(),
            credential: credential.into(),
        }
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiCompatibleAdapter {
    async fn invoke(&self, invocation: &ModelInvocation) -> Result<InvocationResult, CouncilError> {
        let client = get_shared_http_client(&self.base_url);
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));

        let body = json!({
            "model": invocation.model_name,
            "max_tokens": invocation.max_completion_tokens,
            "messages": [
                {"role": "system", "content": invocation.system_prompt},
                {"role": "user", "content": invocation.user_prompt},
            ],
        });

        let started = Instant::now();
        let response = tokio::time::timeout(
            invocation.deadline,
            client
                .post(&url)
                .bearer_auth(&self.credential)
                .json(&body)
                .send(),
        )
        .await
        .map_err(|_| CouncilError::new(ErrorKind::Timeout, "provider request exceeded deadline"))?
        .map_err(|e| CouncilError::new(ErrorKind::Unavailable, format!("transport error: {e}")))?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(CouncilError::new(ErrorKind::Unauthorized, "provider rejected credential"));
        }
        if status.as_u16() == 429 {
            return Err(CouncilError::new(ErrorKind::RateLimited, "provider signalled rate limiting"));
        }
        if status.is_server_error() {
            return Err(CouncilError::new(ErrorKind::Unavailable, format!("provider returned {status}")));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| CouncilError::new(ErrorKind::InvalidResponse, format!("could not parse response: {e}")))?;

        if let Some(err) = payload.get("error") {
            return Err(CouncilError::new(
                ErrorKind::InvalidResponse,
                format!("provider returned an error payload: {err}"),
            ));
        }

        let content = payload
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| CouncilError::new(ErrorKind::InvalidResponse, "response missing choices[0].message.content"))?
            .to_string();

        let input_tokens = payload
            .get("usage")
            .and_then(|u| u.get("prompt_tokens"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32;
        let output_tokens = payload
            .get("usage")
            .and_then(|u| u.get("completion_tokens"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32;

        Ok(InvocationResult {
            content,
            provider_used: self.provider,
            model_used: invocation.model_name.clone(),
            input_tokens,
            output_tokens,
            latency_ms: started.elapsed().as_millis() as u64,
            status: InvocationStatus::Ok,
            error_kind: None,
        })
    }

    fn provider(&self) -> Provider {
        self.provider
    }
}
