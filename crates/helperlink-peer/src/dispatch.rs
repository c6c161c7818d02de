use std::collections::HashMap;

use helperlink_frame::{Command, Frame, FrameKind, Generation};
use tokio::sync::mpsc;

use crate::engine::Core;
use crate::error::DispatchError;
use crate::handlers;

pub(crate) type Handler = fn(&mut Core, &Frame) -> Result<(), DispatchError>;

#[derive(Clone)]
pub(crate) enum Route {
    Builtin(Handler),
    /// Hand the frame to the connection owner.
    Forward(mpsc::UnboundedSender<Frame>),
}

/// Frame-kind routing table, built once per connection.
///
/// Each command is reachable under its generation-3 code and, when
/// generation 2 is compiled in, its command name.
pub(crate) struct Dispatcher {
    routes: HashMap<FrameKind, Route>,
}

const BUILTINS: &[(Command, Handler)] = &[
    (Command::Register, handlers::register),
    (Command::Ping, handlers::ping),
    (Command::Pong, handlers::pong),
    (Command::Shutdown, handlers::shutdown),
    (Command::Message, handlers::message),
    (Command::Error, handlers::error_report),
    (Command::HttpRegisterUri, handlers::http_register),
    (Command::HttpResponse, handlers::http_response),
    (Command::HttpAuthRequest, handlers::http_auth_request),
    (Command::EventRegister, handlers::event_register),
    (Command::EventPublish, handlers::event_publish),
];

impl Dispatcher {
    pub(crate) fn with_builtins() -> Self {
        let mut dispatcher = Self {
            routes: HashMap::new(),
        };
        for (command, handler) in BUILTINS {
            dispatcher.register(*command, Route::Builtin(*handler));
        }
        dispatcher
    }

    /// Route `command` in every supported generation. Replaces any
    /// built-in handler.
    pub(crate) fn register(&mut self, command: Command, route: Route) {
        for generation in [Generation::V2, Generation::V3] {
            if generation.is_supported() {
                self.routes.insert(generation.kind_of(command), route.clone());
            }
        }
    }

    pub(crate) fn handles(&self, kind: &FrameKind) -> bool {
        self.routes.contains_key(kind)
    }

    /// Run the route for `frame`. Unknown kinds are protocol errors.
    pub(crate) fn dispatch(&self, core: &mut Core, frame: Frame) -> Result<(), DispatchError> {
        match self.routes.get(&frame.kind) {
            Some(Route::Builtin(handler)) => handler(core, &frame),
            Some(Route::Forward(tx)) => tx
                .send(frame)
                .map_err(|err| DispatchError::Application(format!("no receiver for {}", err.0.kind))),
            None => Err(DispatchError::Protocol(format!(
                "unknown frame type {} ({})",
                frame.kind, frame.generation
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use helperlink_frame::FieldSet;

    use super::*;
    use crate::engine::tests::test_core;

    #[test]
    fn builtins_are_keyed_by_code() {
        let dispatcher = Dispatcher::with_builtins();
        assert!(dispatcher.handles(&FrameKind::Code(Command::Ping.code())));
        assert!(dispatcher.handles(&FrameKind::Code(Command::HttpResponse.code())));
        assert!(!dispatcher.handles(&FrameKind::Code(Command::OpenSource.code())));
    }

    #[cfg(feature = "v2")]
    #[test]
    fn builtins_are_keyed_by_name_with_v2() {
        let dispatcher = Dispatcher::with_builtins();
        assert!(dispatcher.handles(&FrameKind::Named("PING".to_string())));
        assert!(dispatcher.handles(&FrameKind::Named("EVENTBUSREGISTER".to_string())));
    }

    #[cfg(not(feature = "v2"))]
    #[test]
    fn names_absent_without_v2() {
        let dispatcher = Dispatcher::with_builtins();
        assert!(!dispatcher.handles(&FrameKind::Named("PING".to_string())));
    }

    #[test]
    fn unknown_type_is_a_protocol_error() {
        let dispatcher = Dispatcher::with_builtins();
        let (mut core, _rx) = test_core();
        let frame = Frame::new(Generation::V3, Command::OpenSource, 4, FieldSet::new());
        let err = dispatcher.dispatch(&mut core, frame).unwrap_err();
        assert!(matches!(err, DispatchError::Protocol(msg) if msg.contains("unknown frame type")));
    }

    #[test]
    fn forwarded_commands_reach_the_owner() {
        let mut dispatcher = Dispatcher::with_builtins();
        let (tx, mut rx) = mpsc::unbounded_channel();
        dispatcher.register(Command::DataReport, Route::Forward(tx));
        let (mut core, _requests) = test_core();

        let frame = Frame::new(Generation::V3, Command::DataReport, 12, FieldSet::new());
        dispatcher.dispatch(&mut core, frame.clone()).unwrap();
        assert_eq!(rx.try_recv().unwrap(), frame);

        drop(rx);
        let err = dispatcher.dispatch(&mut core, frame).unwrap_err();
        assert!(matches!(err, DispatchError::Application(_)));
    }
}
