//! Slack Events API inbound endpoint.

use std::time::{SystemTime, UNIX_EPOCH};

use axum::{body::Bytes, extract::State, http::HeaderMap};
use serde::Deserialize;
use services::services::dispatch::{Dispatcher, EventKind, InboundEvent};

use crate::{error::ApiError, signature};

/// Top-level Events API payload. `url_verification` arrives once when the
/// endpoint is registered with Slack; everything else is an
/// `event_callback` wrapping the actual event.
#[derive(Debug, Deserialize)]
pub struct EventEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub challenge: Option<String>,
    pub event: Option<SlackEvent>,
}

#[derive(Debug, Deserialize)]
pub struct SlackEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub bot_id: Option<String>,
    #[serde(default)]
    pub text: String,
    pub channel: Option<String>,
    pub channel_type: Option<String>,
    pub ts: Option<String>,
    pub thread_ts: Option<String>,
}

/// Signature verification needs the raw bytes, so the body is taken
/// unparsed and deserialized after the check.
pub async fn slack_events(
    State(dispatcher): State<Dispatcher>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<String, ApiError> {
    let timestamp = header(&headers, "x-slack-request-timestamp");
    let provided = header(&headers, "x-slack-signature");
    signature::verify(
        &dispatcher.config().slack_signing_secret,
        timestamp,
        &body,
        provided,
        now_unix(),
    )
    .map_err(|e| {
        tracing::warn!("rejected inbound request: {e}");
        ApiError::InvalidSignature
    })?;

    let envelope: EventEnvelope =
        serde_json::from_slice(&body).map_err(|e| ApiError::MalformedPayload(e.to_string()))?;

    if envelope.kind == "url_verification" {
        return Ok(envelope.challenge.unwrap_or_default());
    }

    if let Some(event) = envelope.event
        && let Some(inbound) = to_inbound(event)
    {
        dispatcher.dispatch(inbound);
    }
    Ok("ok".to_string())
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Normalize a platform event into the dispatcher's shape. Events without a
/// channel or timestamp carry nothing actionable and map to `None`.
fn to_inbound(event: SlackEvent) -> Option<InboundEvent> {
    let channel = event.channel?;
    let ts = event.ts?;
    let conversation_id = event.thread_ts.clone().unwrap_or_else(|| ts.clone());
    let kind = match (event.kind.as_str(), event.channel_type.as_deref()) {
        ("app_mention", _) => EventKind::Mention,
        ("message", Some("im")) => EventKind::DirectMessage,
        _ => EventKind::Other,
    };
    Some(InboundEvent {
        conversation_id,
        channel,
        message_ts: ts,
        text: event.text,
        sender_is_bot: event.bot_id.is_some(),
        kind,
    })
}
