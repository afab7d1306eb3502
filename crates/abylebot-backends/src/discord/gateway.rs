//! Discord Gateway v10 session: HELLO, IDENTIFY, heartbeats, and the
//! dispatch stream exposed as an [`EventSource`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use abylebot_core::{ConnectionError, RawEvent};

use crate::base::EventSource;
use crate::ws::{WsConnection, WsWriter};

/// Default intents: GUILDS(1) + GUILD_MESSAGES(512) + DMs(4096) + MESSAGE_CONTENT(32768).
pub const DEFAULT_INTENTS: u64 = 1 + 512 + 4096 + 32768;

/// How long to wait for HELLO after the socket opens.
const HELLO_TIMEOUT: Duration = Duration::from_secs(10);

// Gateway opcodes
const OP_DISPATCH: u64 = 0;
const OP_HEARTBEAT: u64 = 1;
const OP_IDENTIFY: u64 = 2;
const OP_RECONNECT: u64 = 7;
const OP_INVALID_SESSION: u64 = 9;
const OP_HELLO: u64 = 10;
const OP_HEARTBEAT_ACK: u64 = 11;

/// Live gateway session. Yields `op 0` dispatches as `RawEvent { t, d }`.
pub struct GatewaySource {
    ws: WsConnection,
    seq: Arc<Mutex<Option<u64>>>,
    heartbeat: JoinHandle<()>,
}

impl GatewaySource {
    /// Open the socket, wait for HELLO, start heartbeating and IDENTIFY.
    pub async fn open(url: &str, token: &str, intents: u64) -> Result<Self, ConnectionError> {
        let mut ws = WsConnection::connect(url).await?;

        let hello = match tokio::time::timeout(HELLO_TIMEOUT, ws.next_text()).await {
            Ok(Ok(Some(text))) => text,
            Ok(Ok(None)) => {
                return Err(ConnectionError::Handshake(
                    "gateway closed before HELLO".into(),
                ))
            }
            Ok(Err(e)) => return Err(ConnectionError::WebSocket(e.to_string())),
            Err(_) => return Err(ConnectionError::Handshake("timed out waiting for HELLO".into())),
        };
        let interval = parse_hello(&hello)?;
        debug!(interval_ms = interval.as_millis() as u64, "discord HELLO received");

        let seq = Arc::new(Mutex::new(None));
        let heartbeat = tokio::spawn(heartbeat_loop(ws.writer(), seq.clone(), interval));

        let identify = json!({
            "op": OP_IDENTIFY,
            "d": {
                "token": token,
                "intents": intents,
                "properties": {
                    "os": std::env::consts::OS,
                    "browser": "abylebot",
                    "device": "abylebot"
                }
            }
        });
        ws.writer()
            .send_text(identify.to_string())
            .await
            .map_err(|e| ConnectionError::WebSocket(e.to_string()))?;
        info!("discord IDENTIFY sent");

        Ok(Self { ws, seq, heartbeat })
    }

    async fn heartbeat_now(&self) -> anyhow::Result<()> {
        let s = *self.seq.lock().await;
        self.ws
            .writer()
            .send_text(json!({"op": OP_HEARTBEAT, "d": s}).to_string())
            .await
    }
}

fn parse_hello(text: &str) -> Result<Duration, ConnectionError> {
    let payload: Value = serde_json::from_str(text)
        .map_err(|e| ConnectionError::Handshake(format!("invalid HELLO: {e}")))?;
    if payload["op"].as_u64() != Some(OP_HELLO) {
        return Err(ConnectionError::Handshake(format!(
            "expected HELLO, got op {}",
            payload["op"]
        )));
    }
    let interval = payload["d"]["heartbeat_interval"]
        .as_u64()
        .ok_or_else(|| ConnectionError::Handshake("HELLO without heartbeat_interval".into()))?;
    Ok(Duration::from_millis(interval))
}

async fn heartbeat_loop(writer: WsWriter, seq: Arc<Mutex<Option<u64>>>, interval: Duration) {
    // First beat is jittered, per the gateway docs.
    let first = interval.mul_f64(rand_jitter());
    tokio::time::sleep(first).await;
    loop {
        let s = *seq.lock().await;
        if writer
            .send_text(json!({"op": OP_HEARTBEAT, "d": s}).to_string())
            .await
            .is_err()
        {
            debug!("discord heartbeat stopped, writer closed");
            break;
        }
        tokio::time::sleep(interval).await;
    }
}

/// Simple jitter: a fraction between 0.0 and 1.0.
fn rand_jitter() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos as f64) / 1_000_000_000.0
}

#[async_trait]
impl EventSource for GatewaySource {
    async fn next_event(&mut self) -> anyhow::Result<Option<RawEvent>> {
        loop {
            let Some(text) = self.ws.next_text().await? else {
                info!("discord gateway closed");
                return Ok(None);
            };

            let mut payload: Value = match serde_json::from_str(&text) {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, "discord gateway sent invalid json");
                    continue;
                }
            };

            if let Some(s) = payload["s"].as_u64() {
                *self.seq.lock().await = Some(s);
            }

            match payload["op"].as_u64() {
                Some(OP_DISPATCH) => {
                    let tag = payload["t"].as_str().unwrap_or_default().to_string();
                    return Ok(Some(RawEvent::new(tag, payload["d"].take())));
                }
                Some(OP_HEARTBEAT) => self.heartbeat_now().await?,
                Some(OP_HEARTBEAT_ACK) => {}
                Some(OP_RECONNECT) => anyhow::bail!("discord gateway requested reconnect"),
                Some(OP_INVALID_SESSION) => anyhow::bail!("discord session invalidated"),
                op => debug!(op = ?op, "discord gateway opcode ignored"),
            }
        }
    }

    async fn close(&mut self) {
        self.heartbeat.abort();
        self.ws.close().await;
        debug!("discord gateway closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hello() {
        let interval = parse_hello(r#"{"op":10,"d":{"heartbeat_interval":41250}}"#).unwrap();
        assert_eq!(interval, Duration::from_millis(41250));
    }

    #[test]
    fn test_parse_hello_rejects_other_opcodes() {
        let err = parse_hello(r#"{"op":0,"t":"READY","d":{}}"#).unwrap_err();
        assert!(matches!(err, ConnectionError::Handshake(_)));
        assert!(parse_hello("not json").is_err());
        assert!(parse_hello(r#"{"op":10,"d":{}}"#).is_err());
    }

    #[test]
    fn test_rand_jitter_range() {
        let j = rand_jitter();
        assert!((0.0..1.0).contains(&j));
    }

    #[test]
    fn test_default_intents() {
        assert_eq!(DEFAULT_INTENTS, 37377);
    }
}
