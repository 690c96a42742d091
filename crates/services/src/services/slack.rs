//! Outbound Slack Web API client.
//!
//! Delivery is fire-and-forget: a run never fails because chat delivery
//! failed, so every error ends at a log line.

use serde::{Deserialize, Serialize};

const DEFAULT_BASE_URL: &str = "https://slack.com/api";

#[derive(Debug, Serialize)]
struct PostMessageRequest<'a> {
    channel: &'a str,
    thread_ts: &'a str,
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct AddReactionRequest<'a> {
    channel: &'a str,
    timestamp: &'a str,
    name: &'a str,
}

#[derive(Debug, Deserialize)]
struct SlackApiResponse {
    ok: bool,
    error: Option<String>,
}

#[derive(Clone)]
pub struct SlackClient {
    http: reqwest::Client,
    token: String,
    base_url: String,
}

impl SlackClient {
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_base_url(token, DEFAULT_BASE_URL)
    }

    /// Point the client at a different API root. Tests use this to capture
    /// outbound traffic on a local listener.
    pub fn with_base_url(token: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            token: token.into(),
            base_url: base_url.into(),
        }
    }

    /// Post `text` into the conversation thread.
    pub async fn post_message(&self, channel: &str, thread_ts: &str, text: &str) {
        self.call(
            "chat.postMessage",
            &PostMessageRequest {
                channel,
                thread_ts,
                text,
            },
        )
        .await;
    }

    /// Add an emoji reaction to a message.
    pub async fn add_reaction(&self, channel: &str, timestamp: &str, name: &str) {
        self.call(
            "reactions.add",
            &AddReactionRequest {
                channel,
                timestamp,
                name,
            },
        )
        .await;
    }

    async fn call<T: Serialize>(&self, method: &str, body: &T) {
        let url = format!("{}/{}", self.base_url, method);
        match self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await
        {
            Ok(response) => match response.json::<SlackApiResponse>().await {
                Ok(api) if !api.ok => {
                    tracing::warn!(method, error = ?api.error, "slack api call rejected");
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(method, "failed to decode slack response: {e}"),
            },
            Err(e) => tracing::warn!(method, "slack api call failed: {e}"),
        }
    }
}
