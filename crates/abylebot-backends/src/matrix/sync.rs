//! `/sync` polling source.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use abylebot_core::RawEvent;

use super::client::MatrixClient;
use crate::base::EventSource;

/// Flatten the joined rooms of a `/sync` response into room events.
///
/// State events come before timeline events for each room, and every event
/// gets its `room_id` injected.
pub(crate) fn flatten_sync(body: &Value) -> Vec<RawEvent> {
    let Some(rooms) = body["rooms"]["join"].as_object() else {
        return Vec::new();
    };

    let mut events = Vec::new();
    for (room_id, room) in rooms {
        for section in ["state", "timeline"] {
            let Some(list) = room[section]["events"].as_array() else {
                continue;
            };
            for event in list {
                let Some(tag) = event["type"].as_str() else {
                    continue;
                };
                let mut payload = event.clone();
                if let Some(obj) = payload.as_object_mut() {
                    obj.insert("room_id".into(), Value::String(room_id.clone()));
                }
                events.push(RawEvent::new(tag, payload));
            }
        }
    }
    events
}

/// Long-polls `/sync` and yields one room event at a time.
pub struct SyncSource {
    client: Arc<MatrixClient>,
    since: String,
    pending: VecDeque<RawEvent>,
    poll_interval: Duration,
    sync_timeout: Duration,
    polled: bool,
}

impl SyncSource {
    /// `since` is the `next_batch` of the initial sync; `backlog` holds the
    /// room state it returned.
    pub fn new(
        client: Arc<MatrixClient>,
        since: String,
        backlog: Vec<RawEvent>,
        poll_interval: Duration,
        sync_timeout: Duration,
    ) -> Self {
        Self {
            client,
            since,
            pending: backlog.into(),
            poll_interval,
            sync_timeout,
            polled: false,
        }
    }
}

#[async_trait]
impl EventSource for SyncSource {
    async fn next_event(&mut self) -> anyhow::Result<Option<RawEvent>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(Some(event));
            }

            if self.polled {
                tokio::time::sleep(self.poll_interval).await;
            }
            self.polled = true;

            let body = self.client.sync(Some(&self.since), self.sync_timeout).await?;
            let next = body["next_batch"]
                .as_str()
                .ok_or_else(|| anyhow::anyhow!("sync response without next_batch"))?;
            self.since = next.to_string();

            let events = flatten_sync(&body);
            debug!(count = events.len(), since = %self.since, "matrix sync");
            self.pending.extend(events);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_flatten_injects_room_id() {
        let body = json!({
            "next_batch": "s2",
            "rooms": {"join": {"!r:hs": {
                "state": {"events": [{"type": "m.room.member", "state_key": "@a:hs", "content": {"membership": "join"}}]},
                "timeline": {"events": [
                    {"type": "m.room.message", "sender": "@a:hs", "content": {"msgtype": "m.text", "body": "hi"}},
                    {"no_type": true}
                ]}
            }}}
        });

        let events = flatten_sync(&body);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].tag, "m.room.member");
        assert_eq!(events[1].tag, "m.room.message");
        assert!(events.iter().all(|e| e.payload["room_id"] == "!r:hs"));
    }

    #[test]
    fn test_flatten_empty() {
        assert!(flatten_sync(&json!({"next_batch": "s"})).is_empty());
    }

    #[tokio::test]
    async fn test_backlog_then_poll() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/_matrix/client/v3/sync"))
            .and(query_param("since", "s1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "next_batch": "s2",
                "rooms": {"join": {"!r:hs": {"timeline": {"events": [
                    {"type": "m.room.message", "sender": "@a:hs", "content": {"msgtype": "m.text", "body": "hi"}}
                ]}}}}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = Arc::new(MatrixClient::new(reqwest::Client::new(), server.uri(), "tok"));
        let backlog = vec![RawEvent::new("m.room.member", json!({"room_id": "!r:hs"}))];
        let mut source = SyncSource::new(
            client,
            "s1".into(),
            backlog,
            Duration::from_millis(10),
            Duration::ZERO,
        );

        assert_eq!(source.next_event().await.unwrap().unwrap().tag, "m.room.member");
        let event = source.next_event().await.unwrap().unwrap();
        assert_eq!(event.tag, "m.room.message");
        assert_eq!(event.payload["room_id"], "!r:hs");
        assert_eq!(source.since, "s2");
    }

    #[tokio::test]
    async fn test_sync_failure_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/_matrix/client/v3/sync"))
            .respond_with(ResponseTemplate::new(401).set_body_string("M_UNKNOWN_TOKEN"))
            .mount(&server)
            .await;

        let client = Arc::new(MatrixClient::new(reqwest::Client::new(), server.uri(), "tok"));
        let mut source =
            SyncSource::new(client, "s1".into(), Vec::new(), Duration::ZERO, Duration::ZERO);
        assert!(source.next_event().await.is_err());
    }
}
