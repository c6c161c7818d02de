//! Built-in command handlers.
//!
//! Each runs on the connection task with exclusive access to its state and
//! must not block. Payload decode failures surface as application errors
//! through `?` and drop only the offending frame.

use std::sync::Arc;

use futures_util::FutureExt;
use helperlink_frame::messages::{
    ErrorReport, EventNotice, EventPublish, EventRegister, HttpAuth, HttpRegisterUri,
    HttpResponse, LogMessage, Register, Shutdown,
};
use helperlink_frame::{Command, FieldSet, Frame, Severity};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::collab::{Event, EventCallback, HttpExchange, ProxyOutcome, RouteHandler};
use crate::engine::{Core, Request};
use crate::error::{CloseReason, DispatchError};

/// Logged in place of a message with no text.
pub const EMPTY_MESSAGE: &str = "(helper sent an empty message)";

pub(crate) fn register(core: &mut Core, frame: &Frame) -> Result<(), DispatchError> {
    let register = Register::from_fields(&frame.fields)?;
    info!(connection = core.id, subsystem = %register.subsystem, "peer registered");
    core.subsystem = Some(register.subsystem);
    Ok(())
}

pub(crate) fn ping(core: &mut Core, frame: &Frame) -> Result<(), DispatchError> {
    core.reply(frame, Command::Pong, FieldSet::new());
    Ok(())
}

pub(crate) fn pong(core: &mut Core, frame: &Frame) -> Result<(), DispatchError> {
    core.pong_received(frame);
    Ok(())
}

pub(crate) fn shutdown(core: &mut Core, frame: &Frame) -> Result<(), DispatchError> {
    let shutdown = Shutdown::from_fields(&frame.fields)?;
    let reason = shutdown.reason.unwrap_or_else(|| "no reason".to_string());
    core.trigger_error(CloseReason::RemoteShutdown(reason));
    Ok(())
}

pub(crate) fn message(core: &mut Core, frame: &Frame) -> Result<(), DispatchError> {
    let message = LogMessage::from_fields(&frame.fields)?;
    let text = if message.text.is_empty() {
        EMPTY_MESSAGE
    } else {
        message.text.as_str()
    };
    core.collab.log.log(message.severity, text);
    Ok(())
}

pub(crate) fn error_report(core: &mut Core, frame: &Frame) -> Result<(), DispatchError> {
    let report = ErrorReport::from_fields(&frame.fields)?;
    warn!(connection = core.id, error = %report.message, "peer reported an error");
    core.collab.log.log(Severity::Error, &report.message);
    Ok(())
}

pub(crate) fn http_register(core: &mut Core, frame: &Frame) -> Result<(), DispatchError> {
    let route = HttpRegisterUri::from_fields(&frame.fields)?;
    let http = core
        .collab
        .http
        .clone()
        .ok_or_else(|| DispatchError::Application("no http server to register with".to_string()))?;

    let handler = proxy_route(core.requests.clone());
    http.register_route(
        &route.uri,
        std::slice::from_ref(&route.method),
        &core.config.http_role,
        handler,
    );
    info!(connection = core.id, uri = %route.uri, method = %route.method, "registered proxied route");
    Ok(())
}

pub(crate) fn http_response(core: &mut Core, frame: &Frame) -> Result<(), DispatchError> {
    let response = HttpResponse::from_fields(&frame.fields)?;
    core.sessions.apply(response)
}

pub(crate) fn http_auth_request(core: &mut Core, frame: &Frame) -> Result<(), DispatchError> {
    let http = core
        .collab
        .http
        .clone()
        .ok_or_else(|| DispatchError::Application("no http server to mint a token".to_string()))?;
    let token = http.create_or_find_auth(
        &core.config.http_auth_label,
        &core.config.http_role,
        core.config.http_auth_ttl,
    );
    core.reply(frame, Command::HttpAuth, HttpAuth { token }.to_fields());
    debug!(connection = core.id, "sent http auth token");
    Ok(())
}

pub(crate) fn event_register(core: &mut Core, frame: &Frame) -> Result<(), DispatchError> {
    let register = EventRegister::from_fields(&frame.fields)?;
    let bus = core
        .collab
        .events
        .clone()
        .ok_or_else(|| DispatchError::Application("no event bus to subscribe to".to_string()))?;

    for name in register.events {
        if let Some(previous) = core.subscriptions.remove(&name) {
            bus.remove_listener(previous);
        }
        let id = bus.register_listener(&name, forward_events(core.id, core.requests.clone()));
        debug!(connection = core.id, event = %name, "subscribed to event");
        core.subscriptions.insert(name, id);
    }
    Ok(())
}

pub(crate) fn event_publish(core: &mut Core, frame: &Frame) -> Result<(), DispatchError> {
    let publish = EventPublish::from_fields(&frame.fields)?;
    let bus = core
        .collab
        .events
        .clone()
        .ok_or_else(|| DispatchError::Application("no event bus to publish to".to_string()))?;

    let content = serde_json::from_str(&publish.content).map_err(|err| {
        DispatchError::Application(format!("unparseable {} event payload: {err}", publish.kind))
    })?;
    let mut event = bus.new_event(&publish.kind);
    event.content = content;
    bus.publish(event);
    Ok(())
}

/// Bus callback that ships each event to the peer as an `EVENT` frame.
fn forward_events(connection: u64, requests: mpsc::WeakUnboundedSender<Request>) -> EventCallback {
    Arc::new(move |event: &Event| {
        let Some(tx) = requests.upgrade() else {
            return;
        };
        match serde_json::to_string(event) {
            Ok(json) => {
                let _ = tx.send(Request::Send {
                    command: Command::Event,
                    code: 0,
                    fields: EventNotice { event: json }.to_fields(),
                });
            }
            Err(err) => warn!(connection, error = %err, "failed to serialize event"),
        }
    })
}

/// Route handler that tunnels each request through the connection.
///
/// Holds only a weak reference: once the connection is gone the route
/// answers with a failure instead of keeping it alive.
pub(crate) fn proxy_route(requests: mpsc::WeakUnboundedSender<Request>) -> RouteHandler {
    Arc::new(move |exchange: Box<dyn HttpExchange>| {
        let tx = requests.upgrade();
        async move {
            match tx {
                Some(tx) => proxy_exchange(&tx, exchange).await,
                None => ProxyOutcome::Failed("connection closed".to_string()),
            }
        }
        .boxed()
    })
}

/// Hand `exchange` to the connection and wait for the proxied response.
pub(crate) async fn proxy_exchange(
    tx: &mpsc::UnboundedSender<Request>,
    exchange: Box<dyn HttpExchange>,
) -> ProxyOutcome {
    let (latch, done) = oneshot::channel();
    if tx.send(Request::HttpProxy { exchange, latch }).is_err() {
        return ProxyOutcome::Failed("connection closed".to_string());
    }
    done.await
        .unwrap_or_else(|_| ProxyOutcome::Failed("connection closed".to_string()))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use bytes::Bytes;
    use helperlink_frame::{Generation, Value};

    use super::*;
    use crate::collab::{Collaborators, EventBus, HttpServer, MessageLog, SubscriptionId};
    use crate::engine::tests::{drain_written, test_core, test_core_with};

    #[derive(Default)]
    struct RecordingLog(Mutex<Vec<(Severity, String)>>);

    impl MessageLog for RecordingLog {
        fn log(&self, severity: Severity, text: &str) {
            self.0.lock().unwrap().push((severity, text.to_string()));
        }
    }

    #[derive(Default)]
    struct RecordingHttp {
        routes: Mutex<Vec<(String, Vec<String>, String)>>,
    }

    impl HttpServer for RecordingHttp {
        fn register_route(&self, uri: &str, methods: &[String], role: &str, _handler: RouteHandler) {
            self.routes
                .lock()
                .unwrap()
                .push((uri.to_string(), methods.to_vec(), role.to_string()));
        }

        fn create_or_find_auth(&self, label: &str, _role: &str, _ttl: Duration) -> String {
            format!("token-for-{label}")
        }
    }

    #[derive(Default)]
    struct RecordingBus {
        next: Mutex<u64>,
        listeners: Mutex<Vec<(SubscriptionId, String, EventCallback)>>,
        removed: Mutex<Vec<SubscriptionId>>,
        published: Mutex<Vec<Event>>,
    }

    impl EventBus for RecordingBus {
        fn register_listener(&self, event: &str, callback: EventCallback) -> SubscriptionId {
            let mut next = self.next.lock().unwrap();
            *next += 1;
            let id = SubscriptionId(*next);
            self.listeners
                .lock()
                .unwrap()
                .push((id, event.to_string(), callback));
            id
        }

        fn remove_listener(&self, id: SubscriptionId) {
            self.removed.lock().unwrap().push(id);
            self.listeners.lock().unwrap().retain(|(lid, _, _)| *lid != id);
        }

        fn publish(&self, event: Event) {
            self.published.lock().unwrap().push(event);
        }
    }

    fn frame(command: Command, fields: FieldSet) -> Frame {
        Frame::new(Generation::V3, command, 40, fields)
    }

    #[test]
    fn ping_replies_with_pong_echoing_sequence() {
        let (mut core, _rx) = test_core();
        ping(&mut core, &frame(Command::Ping, FieldSet::new())).unwrap();
        let written = drain_written(&mut core);
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].command(), Some(Command::Pong));
        assert_eq!(written[0].sequence, 40);
    }

    #[cfg(feature = "v2")]
    #[test]
    fn ping_replies_in_the_incoming_generation() {
        let (mut core, _rx) = test_core();
        let v2_ping = Frame::new(Generation::V2, Command::Ping, 3, FieldSet::new());
        ping(&mut core, &v2_ping).unwrap();
        let written = drain_written(&mut core);
        assert_eq!(written[0].generation, Generation::V2);
        assert_eq!(written[0].sequence, 3);
    }

    #[test]
    fn message_forwards_to_log_with_placeholder_for_empty_text() {
        let log = Arc::new(RecordingLog::default());
        let (mut core, _rx) = test_core_with(Collaborators::default().with_log(log.clone()));

        let hello = LogMessage {
            severity: Severity::Alert,
            text: "channel 6 locked".to_string(),
        };
        message(&mut core, &frame(Command::Message, hello.to_fields())).unwrap();
        let empty = LogMessage {
            severity: Severity::Info,
            text: String::new(),
        };
        message(&mut core, &frame(Command::Message, empty.to_fields())).unwrap();

        let logged = log.0.lock().unwrap();
        assert_eq!(logged[0], (Severity::Alert, "channel 6 locked".to_string()));
        assert_eq!(logged[1], (Severity::Info, EMPTY_MESSAGE.to_string()));
    }

    #[test]
    fn malformed_message_is_application_error() {
        let (mut core, _rx) = test_core();
        let bad = FieldSet::new().with(1, Value::Str("not a severity".to_string()));
        let err = message(&mut core, &frame(Command::Message, bad)).unwrap_err();
        assert!(matches!(err, DispatchError::Application(_)));
        assert!(!core.is_closed());
    }

    #[test]
    fn shutdown_without_reason_closes_with_no_reason() {
        let (mut core, _rx) = test_core();
        shutdown(&mut core, &frame(Command::Shutdown, FieldSet::new())).unwrap();
        assert_eq!(
            core.closed,
            Some(CloseReason::RemoteShutdown("no reason".to_string()))
        );
    }

    #[test]
    fn register_records_subsystem() {
        let (mut core, _rx) = test_core();
        let fields = Register {
            subsystem: "linuxwifi".to_string(),
        }
        .to_fields();
        register(&mut core, &frame(Command::Register, fields)).unwrap();
        assert_eq!(core.subsystem.as_deref(), Some("linuxwifi"));
    }

    #[test]
    fn http_register_adds_route_with_role() {
        let http = Arc::new(RecordingHttp::default());
        let (mut core, _rx) = test_core_with(Collaborators::default().with_http(http.clone()));
        let fields = HttpRegisterUri {
            uri: "/plugin/rtl433/status.json".to_string(),
            method: "GET".to_string(),
        }
        .to_fields();

        http_register(&mut core, &frame(Command::HttpRegisterUri, fields)).unwrap();
        let routes = http.routes.lock().unwrap();
        assert_eq!(
            routes[0],
            (
                "/plugin/rtl433/status.json".to_string(),
                vec!["GET".to_string()],
                "logon".to_string()
            )
        );
    }

    #[test]
    fn http_register_without_server_is_application_error() {
        let (mut core, _rx) = test_core();
        let fields = HttpRegisterUri {
            uri: "/x".to_string(),
            method: "GET".to_string(),
        }
        .to_fields();
        let err = http_register(&mut core, &frame(Command::HttpRegisterUri, fields)).unwrap_err();
        assert!(matches!(err, DispatchError::Application(_)));
    }

    #[test]
    fn auth_request_replies_with_token() {
        let http = Arc::new(RecordingHttp::default());
        let (mut core, _rx) = test_core_with(Collaborators::default().with_http(http));
        http_auth_request(&mut core, &frame(Command::HttpAuthRequest, FieldSet::new())).unwrap();

        let written = drain_written(&mut core);
        assert_eq!(written[0].command(), Some(Command::HttpAuth));
        assert_eq!(written[0].sequence, 40);
        let auth = HttpAuth::from_fields(&written[0].fields).unwrap();
        assert_eq!(auth.token, "token-for-external helper");
    }

    #[test]
    fn event_register_replaces_existing_subscription() {
        let bus = Arc::new(RecordingBus::default());
        let (mut core, _rx) = test_core_with(Collaborators::default().with_events(bus.clone()));
        let fields = EventRegister {
            events: vec!["GPS".to_string(), "ALERT".to_string()],
        }
        .to_fields();

        event_register(&mut core, &frame(Command::EventRegister, fields.clone())).unwrap();
        let first = core.subscriptions["GPS"];
        event_register(&mut core, &frame(Command::EventRegister, fields)).unwrap();

        assert_eq!(core.subscriptions.len(), 2);
        assert_ne!(core.subscriptions["GPS"], first);
        assert!(bus.removed.lock().unwrap().contains(&first));
        assert_eq!(bus.listeners.lock().unwrap().len(), 2);
    }

    #[test]
    fn subscribed_events_are_queued_as_event_frames() {
        let bus = Arc::new(RecordingBus::default());
        let (mut core, mut requests) =
            test_core_with(Collaborators::default().with_events(bus.clone()));
        let fields = EventRegister {
            events: vec!["GPS".to_string()],
        }
        .to_fields();
        event_register(&mut core, &frame(Command::EventRegister, fields)).unwrap();

        let callback = bus.listeners.lock().unwrap()[0].2.clone();
        let mut event = Event::new("GPS");
        event.content = serde_json::json!({ "fix": 3 });
        callback(&event);

        match requests.rx.try_recv().unwrap() {
            Request::Send {
                command, fields, ..
            } => {
                assert_eq!(command, Command::Event);
                let notice = EventNotice::from_fields(&fields).unwrap();
                let decoded: Event = serde_json::from_str(&notice.event).unwrap();
                assert_eq!(decoded, event);
            }
            _ => panic!("expected an event send request"),
        }
    }

    #[test]
    fn event_publish_parses_payload() {
        let bus = Arc::new(RecordingBus::default());
        let (mut core, _rx) = test_core_with(Collaborators::default().with_events(bus.clone()));
        let fields = EventPublish {
            kind: "RTL433".to_string(),
            content: "{\"model\":\"Acurite\"}".to_string(),
        }
        .to_fields();
        event_publish(&mut core, &frame(Command::EventPublish, fields)).unwrap();

        let published = bus.published.lock().unwrap();
        assert_eq!(published[0].kind, "RTL433");
        assert_eq!(published[0].content["model"], "Acurite");
    }

    #[test]
    fn unparseable_event_payload_is_dropped() {
        let bus = Arc::new(RecordingBus::default());
        let (mut core, _rx) = test_core_with(Collaborators::default().with_events(bus.clone()));
        let fields = EventPublish {
            kind: "RTL433".to_string(),
            content: "{not json".to_string(),
        }
        .to_fields();
        let err = event_publish(&mut core, &frame(Command::EventPublish, fields)).unwrap_err();
        assert!(matches!(err, DispatchError::Application(_)));
        assert!(bus.published.lock().unwrap().is_empty());
    }

    #[test]
    fn response_for_unknown_request_is_application_error() {
        let (mut core, _rx) = test_core();
        let fields = HttpResponse {
            req_id: 99,
            content: Some(Bytes::from_static(b"late")),
            close: true,
            ..HttpResponse::default()
        }
        .to_fields();
        let err = http_response(&mut core, &frame(Command::HttpResponse, fields)).unwrap_err();
        assert!(matches!(err, DispatchError::Application(_)));
    }

    #[tokio::test]
    async fn closed_connection_route_fails_fast() {
        let (tx, rx) = mpsc::unbounded_channel::<Request>();
        let handler = proxy_route(tx.downgrade());
        drop(rx);
        drop(tx);

        struct Noop;
        impl HttpExchange for Noop {
            fn uri(&self) -> &str {
                "/"
            }
            fn method(&self) -> &str {
                "GET"
            }
            fn variables(&self) -> Vec<(String, String)> {
                Vec::new()
            }
            fn append_header(&mut self, _: &str, _: &str) {}
            fn set_status(&mut self, _: u16) {}
            fn write_body(&mut self, _: &[u8]) {}
            fn complete(&mut self) {}
            fn on_disconnect(&mut self, _: Box<dyn FnOnce() + Send>) {}
        }

        let outcome = handler(Box::new(Noop)).await;
        assert!(matches!(outcome, ProxyOutcome::Failed(_)));
    }
}
