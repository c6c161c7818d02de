//! HTTP proxy sessions awaiting their response frames.

use std::collections::HashMap;

use helperlink_frame::messages::HttpResponse;
use tokio::sync::oneshot;
use tracing::debug;

use crate::collab::{HttpExchange, ProxyOutcome};
use crate::error::DispatchError;

/// Status sent to a client whose proxied request the connection abandoned
/// before any response arrived.
pub const BAD_GATEWAY: u16 = 502;

struct Session {
    exchange: Box<dyn HttpExchange>,
    latch: oneshot::Sender<ProxyOutcome>,
    responded: bool,
}

impl Session {
    fn release(self, outcome: ProxyOutcome) {
        // The route handler may have been dropped; nothing is waiting then.
        let _ = self.latch.send(outcome);
    }
}

/// In-flight proxied requests keyed by request sequence.
///
/// A session leaves the table exactly once, by whichever of response
/// completion, client disconnect or connection close comes first.
#[derive(Default)]
pub struct SessionTable {
    sessions: HashMap<u32, Session>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        req_id: u32,
        exchange: Box<dyn HttpExchange>,
        latch: oneshot::Sender<ProxyOutcome>,
    ) {
        let session = Session {
            exchange,
            latch,
            responded: false,
        };
        if let Some(stale) = self.sessions.insert(req_id, session) {
            stale.release(ProxyOutcome::Failed("request id reused".to_string()));
        }
    }

    /// Apply a response chunk: headers, then status, then body. A closing
    /// chunk completes the response and releases the waiting handler.
    pub fn apply(&mut self, response: HttpResponse) -> Result<(), DispatchError> {
        let Some(session) = self.sessions.get_mut(&response.req_id) else {
            return Err(DispatchError::Application(format!(
                "response for unknown request {}",
                response.req_id
            )));
        };

        for (name, value) in &response.headers {
            session.exchange.append_header(name, value);
        }
        if let Some(status) = response.status {
            session.exchange.set_status(status);
        }
        if let Some(content) = &response.content {
            session.exchange.write_body(content);
        }
        session.responded = true;

        if response.close {
            if let Some(mut session) = self.sessions.remove(&response.req_id) {
                session.exchange.complete();
                session.release(ProxyOutcome::Completed);
                debug!(req_id = response.req_id, "proxied request completed");
            }
        }
        Ok(())
    }

    /// The client went away. Returns whether the session was still pending,
    /// in which case the peer should be told to stop.
    pub fn disconnect(&mut self, req_id: u32) -> bool {
        match self.sessions.remove(&req_id) {
            Some(session) => {
                session.release(ProxyOutcome::Failed("client disconnected".to_string()));
                debug!(req_id, "proxied client disconnected");
                true
            }
            None => false,
        }
    }

    /// Release every session with a failure.
    pub fn fail_all(&mut self, reason: &str) {
        for (req_id, mut session) in self.sessions.drain() {
            if !session.responded {
                session.exchange.set_status(BAD_GATEWAY);
            }
            session.exchange.complete();
            session.release(ProxyOutcome::Failed(reason.to_string()));
            debug!(req_id, "released proxied request on close");
        }
    }

    pub fn contains(&self, req_id: u32) -> bool {
        self.sessions.contains_key(&req_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
