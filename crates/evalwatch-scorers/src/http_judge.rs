// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use async_trait::async_trait;
use evalwatch_core::env::env_string;
use evalwatch_core::{ENV_EVALWATCH_JUDGE_API_KEY, ENV_EVALWATCH_JUDGE_MODEL, ENV_EVALWATCH_JUDGE_URL};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::factuality::{Judge, JudgeError};

/// Judge backed by an OpenAI-compatible `/chat/completions` endpoint.
pub struct HttpJudge {
    client: reqwest::Client,
    endpoint: reqwest::Url,
    model: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: Option<String>,
}

impl HttpJudge {
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, JudgeError> {
        let base = base_url.trim_end_matches('/');
        let endpoint = reqwest::Url::parse(&format!("{base}/chat/completions"))
            .map_err(|e| JudgeError(format!("invalid judge url: {e}")))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(JudgeError(format!(
                "judge url scheme must be http or https, got {}",
                endpoint.scheme()
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| JudgeError(format!("judge client build failed: {e}")))?;
        Ok(Self {
            client,
            endpoint,
            model: model.into(),
            api_key,
        })
    }

    /// Built from `EVALWATCH_JUDGE_URL`, `EVALWATCH_JUDGE_MODEL` and
    /// `EVALWATCH_JUDGE_API_KEY`; `None` when no url is set.
    pub fn from_env(timeout: Duration) -> Result<Option<Self>, JudgeError> {
        let Some(url) = env_string(ENV_EVALWATCH_JUDGE_URL) else {
            return Ok(None);
        };
        let model = env_string(ENV_EVALWATCH_JUDGE_MODEL).unwrap_or_else(|| "gpt-4o-mini".to_string());
        Self::new(&url, model, env_string(ENV_EVALWATCH_JUDGE_API_KEY), timeout).map(Some)
    }
}

#[async_trait]
impl Judge for HttpJudge {
    fn name(&self) -> &str {
        &self.model
    }

    #[instrument(name = "judge_http_complete", skip(self, prompt), fields(model = %self.model))]
    async fn complete(&self, prompt: &str) -> Result<String, JudgeError> {
        let body = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: 0.0,
        };
        let mut req = self.client.post(self.endpoint.clone()).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| JudgeError(format!("judge request failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(JudgeError(format!("judge returned status {}", resp.status())));
        }
        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| JudgeError(format!("judge response decode failed: {e}")))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| JudgeError("judge response has no content".to_string()))
    }
}
