//! Services a connection consumes but does not own.
//!
//! Each is injected through [`Collaborators`] when the connection is built,
//! so tests can substitute fakes independently.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use helperlink_frame::Severity;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

/// Sink for helper-originated log messages.
pub trait MessageLog: Send + Sync {
    fn log(&self, severity: Severity, text: &str);
}

/// Forwards helper messages to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLog;

impl MessageLog for TracingLog {
    fn log(&self, severity: Severity, text: &str) {
        match severity {
            Severity::Debug => debug!(target: "helperlink::helper", "{text}"),
            Severity::Info => info!(target: "helperlink::helper", "{text}"),
            Severity::Alert => warn!(target: "helperlink::helper", alert = true, "{text}"),
            Severity::Error | Severity::Fatal => {
                error!(target: "helperlink::helper", %severity, "{text}")
            }
        }
    }
}

/// How a proxied HTTP request ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyOutcome {
    /// The peer sent a closing response.
    Completed,
    /// The connection closed or the client went away first.
    Failed(String),
}

/// The request/response handle the HTTP server gives a route handler.
pub trait HttpExchange: Send {
    fn uri(&self) -> &str;
    fn method(&self) -> &str;
    /// Query and form variables.
    fn variables(&self) -> Vec<(String, String)>;
    fn append_header(&mut self, name: &str, value: &str);
    fn set_status(&mut self, status: u16);
    fn write_body(&mut self, chunk: &[u8]);
    /// Finish the response.
    fn complete(&mut self);
    /// Register a callback fired once if the client disconnects first.
    fn on_disconnect(&mut self, callback: Box<dyn FnOnce() + Send>);
}

/// Invoked by the HTTP server for each request on a proxied route. The
/// returned future resolves once the proxied response has finished.
pub type RouteHandler =
    Arc<dyn Fn(Box<dyn HttpExchange>) -> BoxFuture<'static, ProxyOutcome> + Send + Sync>;

/// The HTTP server's route table and auth store.
pub trait HttpServer: Send + Sync {
    fn register_route(&self, uri: &str, methods: &[String], role: &str, handler: RouteHandler);

    /// Mint a token for `label`, or return the live one.
    fn create_or_find_auth(&self, label: &str, role: &str, ttl: Duration) -> String;
}

/// An event travelling on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub content: serde_json::Value,
}

impl Event {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            content: serde_json::Value::Null,
        }
    }
}

/// Handle returned by [`EventBus::register_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

pub type EventCallback = Arc<dyn Fn(&Event) + Send + Sync>;

/// Publish/subscribe fan-out shared by every connection.
pub trait EventBus: Send + Sync {
    fn register_listener(&self, event: &str, callback: EventCallback) -> SubscriptionId;
    fn remove_listener(&self, id: SubscriptionId);
    fn publish(&self, event: Event);

    fn new_event(&self, kind: &str) -> Event {
        Event::new(kind)
    }
}

/// Collaborators handed to a connection at construction.
#[derive(Clone)]
pub struct Collaborators {
    pub log: Arc<dyn MessageLog>,
    pub http: Option<Arc<dyn HttpServer>>,
    pub events: Option<Arc<dyn EventBus>>,
}

impl Collaborators {
    pub fn with_log(mut self, log: Arc<dyn MessageLog>) -> Self {
        self.log = log;
        self
    }

    pub fn with_http(mut self, http: Arc<dyn HttpServer>) -> Self {
        self.http = Some(http);
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventBus>) -> Self {
        self.events = Some(events);
        self
    }
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            log: Arc::new(TracingLog),
            http: None,
            events: None,
        }
    }
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators")
            .field("http", &self.http.is_some())
            .field("events", &self.events.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serializes_with_type_key() {
        let event = Event {
            kind: "GPS".to_string(),
            content: serde_json::json!({ "lat": 1.5 }),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "GPS", "content": { "lat": 1.5 } }));
    }

    #[test]
    fn default_collaborators_have_no_http_or_bus() {
        let collab = Collaborators::default();
        assert!(collab.http.is_none());
        assert!(collab.events.is_none());
        collab.log.log(Severity::Info, "tracing log accepts messages");
    }
}
