//! Slack Socket Mode: envelope ACKs and the event stream.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use abylebot_core::RawEvent;

use crate::base::EventSource;
use crate::ws::WsConnection;

/// Socket Mode envelope received from Slack.
#[derive(Debug, Clone, Deserialize)]
struct SocketEnvelope {
    /// Must be ACKed immediately.
    envelope_id: String,
    /// `"events_api"`, `"slash_commands"`, `"interactive"`.
    #[serde(rename = "type")]
    envelope_type: String,
    #[serde(default)]
    payload: Value,
}

/// What one Socket Mode frame asks of us.
#[derive(Debug, PartialEq)]
enum Frame {
    Hello,
    Disconnect(String),
    Envelope {
        ack: String,
        event: Option<RawEvent>,
    },
    Ignored,
}

fn read_frame(text: &str) -> Frame {
    let msg: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "slack socket sent invalid json");
            return Frame::Ignored;
        }
    };

    match msg["type"].as_str() {
        Some("hello") => return Frame::Hello,
        Some("disconnect") => {
            let reason = msg["reason"].as_str().unwrap_or("unknown").to_string();
            return Frame::Disconnect(reason);
        }
        _ => {}
    }

    let mut envelope: SocketEnvelope = match serde_json::from_value(msg) {
        Ok(e) => e,
        Err(e) => {
            debug!(error = %e, "not a socket mode envelope");
            return Frame::Ignored;
        }
    };
    let ack = json!({ "envelope_id": envelope.envelope_id }).to_string();

    if envelope.envelope_type != "events_api" {
        debug!(envelope_type = %envelope.envelope_type, "ignoring non-events_api envelope");
        return Frame::Envelope { ack, event: None };
    }

    let event = envelope
        .payload
        .get_mut("event")
        .map(Value::take)
        .unwrap_or_default();
    let event = match event["type"].as_str().map(str::to_string) {
        Some(tag) => Some(RawEvent::new(tag, event)),
        None => {
            debug!("events_api envelope without event type");
            None
        }
    };
    Frame::Envelope { ack, event }
}

/// Socket Mode connection yielding Events API events tagged by `event.type`.
pub struct SocketSource {
    ws: WsConnection,
}

impl SocketSource {
    pub(crate) fn new(ws: WsConnection) -> Self {
        Self { ws }
    }
}

#[async_trait]
impl EventSource for SocketSource {
    async fn next_event(&mut self) -> anyhow::Result<Option<RawEvent>> {
        loop {
            let Some(text) = self.ws.next_text().await? else {
                info!("slack socket closed");
                return Ok(None);
            };

            match read_frame(&text) {
                Frame::Hello => info!("slack socket mode hello"),
                Frame::Disconnect(reason) => {
                    info!(reason = %reason, "slack requested disconnect");
                    return Ok(None);
                }
                Frame::Envelope { ack, event } => {
                    self.ws.writer().send_text(ack).await?;
                    if let Some(event) = event {
                        return Ok(Some(event));
                    }
                }
                Frame::Ignored => {}
            }
        }
    }

    async fn close(&mut self) {
        self.ws.close().await;
        debug!("slack socket closed");
    }
}
