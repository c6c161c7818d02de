//! The per-connection task.
//!
//! One tokio task owns all connection state, so nothing here is locked.
//! Reads and writes run as at most one in-flight future each; the task
//! multiplexes them with its request queue and keepalive timer.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use helperlink_frame::messages::{HttpRequest, HttpRequestCancel, Shutdown};
use helperlink_frame::{
    decode_body, decode_header, probe_header, Command, FieldSet, Frame, Generation, STUB_SIZE,
    V2_HEADER_SIZE,
};
use helperlink_transport::{ChannelReader, ChannelWriter, Subprocess};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bridge::{SessionTable, BAD_GATEWAY};
use crate::collab::{Collaborators, HttpExchange, ProxyOutcome, SubscriptionId};
use crate::config::ConnectionConfig;
use crate::connection::ConnectionStatus;
use crate::dispatch::Dispatcher;
use crate::error::{CloseReason, DispatchError};
use crate::keepalive::KeepaliveMonitor;

/// Largest fixed header of any generation.
const MAX_HEADER_SIZE: usize = V2_HEADER_SIZE;

const WRITER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

pub(crate) type CloseCallback = Box<dyn FnOnce(&CloseReason) + Send>;

/// Work submitted to a connection from outside its task.
pub(crate) enum Request {
    Send {
        command: Command,
        code: u16,
        fields: FieldSet,
    },
    HttpProxy {
        exchange: Box<dyn HttpExchange>,
        latch: oneshot::Sender<ProxyOutcome>,
    },
    HttpDisconnected {
        req_id: u32,
    },
    /// Flush queued writes, then close.
    Shutdown {
        reason: Option<String>,
    },
    Close {
        reason: CloseReason,
    },
}

/// Connection state touched by the dispatcher and its handlers.
pub(crate) struct Core {
    pub(crate) id: u64,
    pub(crate) config: ConnectionConfig,
    pub(crate) collab: Collaborators,
    pub(crate) generation: Generation,
    next_sequence: u32,
    pub(crate) write_queue: VecDeque<Bytes>,
    pub(crate) keepalive: KeepaliveMonitor,
    pub(crate) sessions: SessionTable,
    pub(crate) subscriptions: HashMap<String, SubscriptionId>,
    pub(crate) subsystem: Option<String>,
    pub(crate) requests: mpsc::WeakUnboundedSender<Request>,
    subprocess: Option<Subprocess>,
    on_close: Option<CloseCallback>,
    pub(crate) closed: Option<CloseReason>,
    closing_after_flush: Option<CloseReason>,
}

impl Core {
    pub(crate) fn new(
        id: u64,
        config: ConnectionConfig,
        collab: Collaborators,
        requests: mpsc::WeakUnboundedSender<Request>,
        subprocess: Option<Subprocess>,
        on_close: Option<CloseCallback>,
    ) -> Self {
        let keepalive = KeepaliveMonitor::new(config.keepalive.clone(), Instant::now());
        Self {
            id,
            config,
            collab,
            generation: Generation::LATEST,
            next_sequence: 1,
            write_queue: VecDeque::new(),
            keepalive,
            sessions: SessionTable::new(),
            subscriptions: HashMap::new(),
            subsystem: None,
            requests,
            subprocess,
            on_close,
            closed: None,
            closing_after_flush: None,
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.is_some()
    }

    pub(crate) fn next_sequence(&mut self) -> u32 {
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1).max(1);
        sequence
    }

    /// Encode and queue `frame`. Frames that cannot be encoded are dropped.
    pub(crate) fn enqueue(&mut self, frame: Frame) {
        if self.is_closed() {
            return;
        }
        match frame.encode() {
            Ok(bytes) if bytes.len() <= self.config.frame.max_frame_size => {
                self.write_queue.push_back(bytes);
            }
            Ok(bytes) => error!(
                connection = self.id,
                kind = %frame.kind,
                size = bytes.len(),
                "outbound frame exceeds max frame size; dropped"
            ),
            Err(err) => error!(
                connection = self.id,
                kind = %frame.kind,
                error = %err,
                "failed to encode outbound frame; dropped"
            ),
        }
    }

    /// Send `command` at the current generation with a fresh sequence.
    pub(crate) fn send(&mut self, command: Command, code: u16, fields: FieldSet) -> u32 {
        let sequence = self.next_sequence();
        self.enqueue(Frame::new(self.generation, command, sequence, fields).with_code(code));
        sequence
    }

    /// Answer `to` in its own generation, echoing its sequence.
    pub(crate) fn reply(&mut self, to: &Frame, command: Command, fields: FieldSet) {
        self.enqueue(Frame::new(to.generation, command, to.sequence, fields));
    }

    /// Send the initial ping, followed by an older-generation probe.
    pub(crate) fn start_keepalive(&mut self) {
        let sequence = self.send(Command::Ping, 0, FieldSet::new());
        self.keepalive.ping_sent(sequence);

        if !self.config.probe_older_generation {
            return;
        }
        if let Some(older) = self.generation.older() {
            let sequence = self.next_sequence();
            self.enqueue(Frame::new(older, Command::Ping, sequence, FieldSet::new()));
            self.keepalive.probe_sent(sequence);
            debug!(connection = self.id, sequence, generation = %older, "sent generation probe");
        }
    }

    pub(crate) fn keepalive_tick(&mut self) {
        if self.keepalive.is_expired(Instant::now()) {
            self.trigger_error(CloseReason::KeepaliveTimeout);
            return;
        }
        let sequence = self.send(Command::Ping, 0, FieldSet::new());
        self.keepalive.ping_sent(sequence);
    }

    pub(crate) fn pong_received(&mut self, pong: &Frame) {
        let pinned = self.keepalive.pong_received(
            pong.sequence,
            pong.generation,
            self.generation,
            Instant::now(),
        );
        if let Some(generation) = pinned {
            if generation != self.generation {
                info!(connection = self.id, from = %self.generation, to = %generation, "peer answered generation probe; downgrading");
                self.generation = generation;
            } else {
                debug!(connection = self.id, %generation, "peer generation confirmed");
            }
        }
    }

    pub(crate) fn start_http_proxy(
        &mut self,
        mut exchange: Box<dyn HttpExchange>,
        latch: oneshot::Sender<ProxyOutcome>,
    ) {
        let req_id = self.next_sequence();
        let request = HttpRequest {
            req_id,
            uri: exchange.uri().to_string(),
            method: exchange.method().to_string(),
            variables: exchange.variables(),
        };

        let requests = self.requests.clone();
        exchange.on_disconnect(Box::new(move || {
            if let Some(tx) = requests.upgrade() {
                let _ = tx.send(Request::HttpDisconnected { req_id });
            }
        }));
        self.sessions.insert(req_id, exchange, latch);
        self.enqueue(Frame::new(
            self.generation,
            Command::HttpRequest,
            req_id,
            request.to_fields(),
        ));
        debug!(connection = self.id, req_id, uri = %request.uri, "proxying http request");
    }

    pub(crate) fn http_disconnected(&mut self, req_id: u32) {
        if self.sessions.disconnect(req_id) {
            let cancel = HttpRequestCancel { req_id };
            self.send(Command::HttpRequestCancel, 0, cancel.to_fields());
        }
    }

    /// Queue `SHUTDOWN` and close once the write queue has drained.
    pub(crate) fn shutdown(&mut self, reason: Option<String>) {
        let message = Shutdown {
            reason: reason.clone(),
        };
        self.send(Command::Shutdown, 0, message.to_fields());
        let reason = reason.unwrap_or_else(|| "shutdown requested".to_string());
        self.closing_after_flush = Some(CloseReason::Local(reason));
    }

    fn finish_flush(&mut self, write_in_flight: bool) {
        if !write_in_flight && self.write_queue.is_empty() {
            if let Some(reason) = self.closing_after_flush.take() {
                self.trigger_error(reason);
            }
        }
    }

    /// The single close path. Idempotent.
    pub(crate) fn trigger_error(&mut self, reason: CloseReason) {
        if self.is_closed() {
            return;
        }
        if reason.is_failure() {
            warn!(connection = self.id, %reason, "connection failed");
        } else {
            info!(connection = self.id, %reason, "connection closing");
        }

        self.write_queue.clear();
        self.sessions.fail_all(&reason.to_string());

        let subscriptions = std::mem::take(&mut self.subscriptions);
        if let Some(bus) = &self.collab.events {
            for (_, id) in subscriptions {
                bus.remove_listener(id);
            }
        }

        if let Some(subprocess) = self.subprocess.take() {
            if subprocess.terminate() {
                debug!(connection = self.id, pid = subprocess.pid(), "sent SIGTERM to helper");
            }
            // Dropping the record after the grace period escalates to SIGKILL.
            let grace = self.config.terminate_grace;
            tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                drop(subprocess);
            });
        }

        if let Some(on_close) = self.on_close.take() {
            on_close(&reason);
        }
        self.closed = Some(reason);
    }

    pub(crate) fn status(&self, write_in_flight: bool) -> ConnectionStatus {
        let mut subscriptions: Vec<String> = self.subscriptions.keys().cloned().collect();
        subscriptions.sort();
        ConnectionStatus {
            generation: self.generation,
            generation_confirmed: self.keepalive.is_confirmed(),
            subsystem: self.subsystem.clone(),
            pending_http: self.sessions.len(),
            pending_writes: self.write_queue.len() + usize::from(write_in_flight),
            subscriptions,
            closed: self.closed.clone(),
        }
    }
}

type ReadOp = BoxFuture<'static, (Box<dyn ChannelReader>, Result<Frame, CloseReason>)>;
type WriteOp = BoxFuture<'static, (Box<dyn ChannelWriter>, io::Result<()>)>;

fn arm_read(mut reader: Box<dyn ChannelReader>, max_frame_size: usize) -> ReadOp {
    Box::pin(async move {
        let result = read_frame(reader.as_mut(), max_frame_size).await;
        (reader, result)
    })
}

fn arm_write(mut writer: Box<dyn ChannelWriter>, bytes: Bytes) -> WriteOp {
    Box::pin(async move {
        let result = writer.write_all(&bytes).await;
        (writer, result)
    })
}

/// Read exactly one frame: the header first, then the body it declares.
async fn read_frame(reader: &mut dyn ChannelReader, max_frame_size: usize) -> Result<Frame, CloseReason> {
    let mut header = [0u8; MAX_HEADER_SIZE];
    reader
        .read_exact(&mut header[..STUB_SIZE])
        .await
        .map_err(transport_reason)?;
    let (_, header_len) = probe_header(&header[..STUB_SIZE]).map_err(protocol_reason)?;
    reader
        .read_exact(&mut header[STUB_SIZE..header_len])
        .await
        .map_err(transport_reason)?;
    // Oversized frames are rejected here, before the body is read.
    let info = decode_header(&header[..header_len], max_frame_size).map_err(protocol_reason)?;

    let mut body = vec![0u8; info.body_len()];
    reader.read_exact(&mut body).await.map_err(transport_reason)?;
    decode_body(&info, &body).map_err(protocol_reason)
}

fn transport_reason(err: io::Error) -> CloseReason {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        CloseReason::Transport("end of stream".to_string())
    } else {
        CloseReason::Transport(err.to_string())
    }
}

fn protocol_reason(err: helperlink_frame::FrameError) -> CloseReason {
    CloseReason::Protocol(err.to_string())
}

/// Await the pending operation, or stay pending forever if there is none.
async fn next_completion<T>(op: &mut Option<BoxFuture<'static, T>>) -> T {
    match op.as_mut() {
        Some(future) => {
            let output = future.await;
            *op = None;
            output
        }
        None => std::future::pending().await,
    }
}

pub(crate) struct Actor {
    pub(crate) core: Core,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) requests: mpsc::UnboundedReceiver<Request>,
    pub(crate) status: watch::Sender<ConnectionStatus>,
    pub(crate) token: CancellationToken,
    pub(crate) writer: Option<Box<dyn ChannelWriter>>,
}

impl Actor {
    pub(crate) async fn run(mut self, reader: Box<dyn ChannelReader>) {
        let max_frame_size = self.core.config.frame.max_frame_size;
        let mut read_op = Some(arm_read(reader, max_frame_size));
        let mut write_op: Option<WriteOp> = None;

        let interval = self.core.keepalive.config().interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.core.start_keepalive();

        loop {
            self.core.finish_flush(write_op.is_some());
            if self.core.is_closed() {
                break;
            }
            if write_op.is_none() && !self.core.write_queue.is_empty() {
                if let Some(writer) = self.writer.take() {
                    if let Some(bytes) = self.core.write_queue.pop_front() {
                        write_op = Some(arm_write(writer, bytes));
                    }
                }
            }
            self.publish_status(write_op.is_some());

            tokio::select! {
                (reader, result) = next_completion(&mut read_op) => match result {
                    Ok(frame) => {
                        // Re-arm before dispatch so reading never waits on handlers.
                        read_op = Some(arm_read(reader, max_frame_size));
                        self.dispatch(frame);
                    }
                    Err(reason) => self.core.trigger_error(reason),
                },
                (writer, result) = next_completion(&mut write_op) => match result {
                    Ok(()) => self.writer = Some(writer),
                    Err(err) => self.core.trigger_error(transport_reason(err)),
                },
                request = self.requests.recv() => match request {
                    Some(request) => self.handle_request(request),
                    None => self.core.trigger_error(CloseReason::Local("all handles dropped".to_string())),
                },
                _ = ticker.tick() => self.core.keepalive_tick(),
            }
        }

        drop(read_op);
        drop(write_op);
        self.teardown();
    }

    fn dispatch(&mut self, frame: Frame) {
        let kind = frame.kind.clone();
        let sequence = frame.sequence;
        match self.dispatcher.dispatch(&mut self.core, frame) {
            Ok(()) => {}
            Err(DispatchError::Protocol(detail)) => {
                self.core.trigger_error(CloseReason::Protocol(detail));
            }
            Err(DispatchError::Application(detail)) => warn!(
                connection = self.core.id,
                %kind,
                sequence,
                error = %detail,
                "dropping frame"
            ),
        }
    }

    fn handle_request(&mut self, request: Request) {
        match request {
            Request::Send {
                command,
                code,
                fields,
            } => {
                self.core.send(command, code, fields);
            }
            Request::HttpProxy { exchange, latch } => self.core.start_http_proxy(exchange, latch),
            Request::HttpDisconnected { req_id } => self.core.http_disconnected(req_id),
            Request::Shutdown { reason } => self.core.shutdown(reason),
            Request::Close { reason } => self.core.trigger_error(reason),
        }
    }

    fn publish_status(&self, write_in_flight: bool) {
        let status = self.core.status(write_in_flight);
        self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }

    fn teardown(mut self) {
        let reason = self
            .core
            .closed
            .clone()
            .unwrap_or_else(|| CloseReason::Local("connection task ended".to_string()));

        if let Some(mut writer) = self.writer.take() {
            tokio::spawn(async move {
                let _ = tokio::time::timeout(WRITER_SHUTDOWN_TIMEOUT, writer.shutdown()).await;
            });
        }

        // Requests that raced the close still hold latches.
        self.requests.close();
        while let Ok(request) = self.requests.try_recv() {
            if let Request::HttpProxy {
                mut exchange,
                latch,
            } = request
            {
                exchange.set_status(BAD_GATEWAY);
                exchange.complete();
                let _ = latch.send(ProxyOutcome::Failed(reason.to_string()));
            }
        }

        self.publish_status(false);
        self.token.cancel();
        info!(connection = self.core.id, %reason, "connection closed");
    }
}
