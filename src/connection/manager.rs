//! Shared connection manager for one controller.
//!
//! Every operation on a [`ConnectionManager`] is turned into a request and
//! handled, together with socket events, by a single task that owns the
//! socket and the command queue. Handling is strictly sequential, which is
//! what keeps exactly one command in flight and completions in FIFO order.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

use crate::codec::decode_reply;
use crate::error::{DobotError, Result};
use crate::transport::{ControllerConnection, TransportEvent, TransportEventKind, spawn_connect};
use crate::types::{ConsumerId, Target};

use super::config::ConnectionConfig;
use super::consumers::{ConsumerSet, Transition};
use super::control::{self, ControlAction, ControlEffect, ControlReport};
use super::events::{ConnectionEvent, Listeners, SubscriptionId};
use super::queue::{CommandQueue, Completion, PendingCommand};
use super::state::{ConnectionState, ConnectionStats, StatusUpdate};

/// Requests handled by the manager task.
enum Request {
    Connect,
    Disconnect,
    Send(PendingCommand),
    Register(ConsumerId),
    Deregister(ConsumerId),
    Subscribe(SubscriptionId, mpsc::UnboundedSender<ConnectionEvent>),
    Unsubscribe(SubscriptionId),
    Control(ControlAction, oneshot::Sender<ControlReport>),
    Stats(oneshot::Sender<ConnectionStats>),
    ConsumerCount(oneshot::Sender<usize>),
}

struct Shared {
    target: Target,
    config: ConnectionConfig,
    requests: mpsc::UnboundedSender<Request>,
    status: watch::Receiver<StatusUpdate>,
    next_subscription: AtomicU64,
}

/// Handle to the shared connection to one controller.
///
/// Cloning is cheap; all clones talk to the same connection. The connection
/// is closed and the manager task ends once the last clone is dropped. A
/// clone captured by a pending callback counts too, so callbacks that need to
/// reach the manager should capture a [`WeakConnectionManager`] instead.
///
/// ```no_run
/// use dobot_link::connection::{ConnectionConfig, ConnectionManager, ConnectionState};
///
/// # async fn run() -> dobot_link::Result<()> {
/// let manager = ConnectionManager::new(
///     ConnectionConfig::new("192.168.1.6", 29999).with_auto_connect(true),
/// );
///
/// manager.register("move-node");
/// manager.wait_for_state(ConnectionState::Connected).await?;
///
/// let reply = manager.send_command("EnableRobot()").await?;
/// println!("controller said {reply}");
///
/// manager.deregister("move-node");
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Shared>,
}

impl ConnectionManager {
    /// Create a manager for the configured controller and start its task.
    ///
    /// The connection starts out disconnected.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    pub fn new(config: ConnectionConfig) -> Self {
        let target = config.target();
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(StatusUpdate::default());

        let task = ManagerTask::new(config.clone(), status_tx, transport_tx);
        tokio::spawn(task.run(requests_rx, transport_rx));

        Self {
            inner: Arc::new(Shared {
                target,
                config,
                requests: requests_tx,
                status: status_rx,
                next_subscription: AtomicU64::new(1),
            }),
        }
    }

    /// Get a handle that does not keep the manager alive.
    pub fn downgrade(&self) -> WeakConnectionManager {
        WeakConnectionManager {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Get the controller this manager talks to.
    pub fn target(&self) -> &Target {
        &self.inner.target
    }

    /// Get the configuration the manager was created with.
    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    /// Get the latest published status.
    pub fn status(&self) -> StatusUpdate {
        *self.inner.status.borrow()
    }

    /// Get the latest published state.
    pub fn state(&self) -> ConnectionState {
        self.status().state
    }

    /// Check if the connection is established.
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Wait until the connection reaches `state`.
    ///
    /// Returns immediately if it is already there.
    pub async fn wait_for_state(&self, state: ConnectionState) -> Result<()> {
        let mut status = self.inner.status.clone();
        status
            .wait_for(|s| s.state == state)
            .await
            .map(|_| ())
            .map_err(|_| DobotError::ManagerClosed)
    }

    /// Open the connection. Ignored while connecting or connected.
    pub fn connect(&self) {
        self.request(Request::Connect);
    }

    /// Close the connection. Ignored while disconnected.
    ///
    /// Commands in flight or queued are resolved with
    /// [`DobotError::ConnectionLost`].
    pub fn disconnect(&self) {
        self.request(Request::Disconnect);
    }

    /// Submit a command and get a future for its reply.
    ///
    /// The command is written as soon as every earlier command on this
    /// connection has completed. The reply is the raw, trimmed text sent back
    /// by the controller.
    pub fn send_command(&self, command: impl Into<String>) -> PendingReply {
        let (tx, rx) = oneshot::channel();
        self.request(Request::Send(PendingCommand::new(
            command.into(),
            Completion::Reply(tx),
        )));
        PendingReply { rx }
    }

    /// Submit a command and have `callback` invoked with its outcome.
    ///
    /// The callback runs on the manager task after the call has returned and
    /// must not block. It may submit further commands; see
    /// [`ConnectionManager::downgrade`] for reaching the manager from it.
    pub fn send_command_with<F>(&self, command: impl Into<String>, callback: F)
    where
        F: FnOnce(Result<String>) + Send + 'static,
    {
        self.request(Request::Send(PendingCommand::new(
            command.into(),
            Completion::Callback(Box::new(callback)),
        )));
    }

    /// Register a consumer of this connection.
    ///
    /// The first consumer opens the connection when auto-connect is enabled.
    pub fn register(&self, consumer: impl Into<ConsumerId>) {
        self.request(Request::Register(consumer.into()));
    }

    /// Deregister a consumer. The last consumer to leave closes the connection.
    pub fn deregister(&self, consumer: impl Into<ConsumerId>) {
        self.request(Request::Deregister(consumer.into()));
    }

    /// Subscribe to status changes and connect/disconnect notifications.
    ///
    /// Listeners receive events in the order they subscribed.
    pub fn subscribe(&self) -> Subscription {
        let id = SubscriptionId(self.inner.next_subscription.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        self.request(Request::Subscribe(id, tx));
        Subscription {
            id,
            events: rx,
            requests: self.inner.requests.downgrade(),
        }
    }

    /// Remove a subscription by id.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.request(Request::Unsubscribe(id));
    }

    /// Apply an administrative action.
    pub async fn control(&self, action: ControlAction) -> Result<ControlReport> {
        let (tx, rx) = oneshot::channel();
        self.request(Request::Control(action, tx));
        rx.await.map_err(|_| DobotError::ManagerClosed)
    }

    /// Get a snapshot of the connection statistics.
    pub async fn stats(&self) -> Result<ConnectionStats> {
        let (tx, rx) = oneshot::channel();
        self.request(Request::Stats(tx));
        rx.await.map_err(|_| DobotError::ManagerClosed)
    }

    /// Get the number of registered consumers.
    pub async fn consumer_count(&self) -> Result<usize> {
        let (tx, rx) = oneshot::channel();
        self.request(Request::ConsumerCount(tx));
        rx.await.map_err(|_| DobotError::ManagerClosed)
    }

    fn request(&self, request: Request) {
        if let Err(mpsc::error::SendError(request)) = self.inner.requests.send(request) {
            debug!(controller = %self.inner.target, "manager task gone, dropping request");
            if let Request::Send(command) = request {
                command.resolve(Err(DobotError::ManagerClosed));
            }
        }
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("target", &self.inner.target)
            .field("state", &self.state())
            .finish()
    }
}

/// A [`ConnectionManager`] handle that does not keep the manager running.
#[derive(Clone, Debug, Default)]
pub struct WeakConnectionManager {
    inner: Weak<Shared>,
}

impl WeakConnectionManager {
    /// Get the manager back if any strong handle is still alive.
    pub fn upgrade(&self) -> Option<ConnectionManager> {
        self.inner.upgrade().map(|inner| ConnectionManager { inner })
    }
}

/// Future resolving to the reply of one command.
#[must_use = "the command is sent regardless, but its reply is lost if this is dropped"]
#[derive(Debug)]
pub struct PendingReply {
    rx: oneshot::Receiver<Result<String>>,
}

impl Future for PendingReply {
    type Output = Result<String>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|outcome| match outcome {
            Ok(result) => result,
            Err(_) => Err(DobotError::ManagerClosed),
        })
    }
}

/// A live status subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    events: mpsc::UnboundedReceiver<ConnectionEvent>,
    requests: mpsc::WeakUnboundedSender<Request>,
}

impl Subscription {
    /// Get the subscription id.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Wait for the next event. Returns `None` once the manager has shut down.
    pub async fn recv(&mut self) -> Option<ConnectionEvent> {
        self.events.recv().await
    }

    /// Take the next event if one is pending.
    pub fn try_recv(&mut self) -> Option<ConnectionEvent> {
        self.events.try_recv().ok()
    }

    /// Unsubscribe.
    pub fn close(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(requests) = self.requests.upgrade() {
            let _ = requests.send(Request::Unsubscribe(self.id));
        }
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Request::Connect => f.write_str("Connect"),
            Request::Disconnect => f.write_str("Disconnect"),
            Request::Send(command) => f.debug_tuple("Send").field(command).finish(),
            Request::Register(id) => f.debug_tuple("Register").field(id).finish(),
            Request::Deregister(id) => f.debug_tuple("Deregister").field(id).finish(),
            Request::Subscribe(id, _) => f.debug_tuple("Subscribe").field(id).finish(),
            Request::Unsubscribe(id) => f.debug_tuple("Unsubscribe").field(id).finish(),
            Request::Control(action, _) => f.debug_tuple("Control").field(action).finish(),
            Request::Stats(_) => f.write_str("Stats"),
            Request::ConsumerCount(_) => f.write_str("ConsumerCount"),
        }
    }
}

/// State owned by the manager task.
struct ManagerTask {
    target: Target,
    config: ConnectionConfig,
    state: ConnectionState,
    /// Bumped on every open attempt and teardown; transport events carrying
    /// an older value belong to a socket that is gone.
    generation: u64,
    connection: Option<ControllerConnection>,
    queue: CommandQueue,
    consumers: ConsumerSet,
    listeners: Listeners,
    stats: ConnectionStats,
    status_tx: watch::Sender<StatusUpdate>,
    transport_tx: mpsc::UnboundedSender<TransportEvent>,
}

impl ManagerTask {
    fn new(
        config: ConnectionConfig,
        status_tx: watch::Sender<StatusUpdate>,
        transport_tx: mpsc::UnboundedSender<TransportEvent>,
    ) -> Self {
        Self {
            target: config.target(),
            config,
            state: ConnectionState::Disconnected,
            generation: 0,
            connection: None,
            queue: CommandQueue::new(),
            consumers: ConsumerSet::new(),
            listeners: Listeners::new(),
            stats: ConnectionStats::default(),
            status_tx,
            transport_tx,
        }
    }

    /// Socket I/O happens in the transport pumps, so every step here is
    /// bounded and the loop always gets back to its requests.
    async fn run(
        mut self,
        mut requests: mpsc::UnboundedReceiver<Request>,
        mut transport: mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        loop {
            let deadline = self.queue.deadline();

            tokio::select! {
                biased;

                Some(event) = transport.recv() => self.handle_transport(event),

                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.handle_deadline();
                }

                request = requests.recv() => match request {
                    Some(request) => self.handle_request(request),
                    None => break,
                },
            }
        }

        debug!(controller = %self.target, "all handles dropped, shutting down");
        self.teardown(None);
    }

    fn handle_request(&mut self, request: Request) {
        match request {
            Request::Connect => self.connect(),
            Request::Disconnect => self.disconnect(),
            Request::Send(command) => self.submit(command),
            Request::Register(consumer) => {
                let transition = self.consumers.register(consumer.clone());
                debug!(%consumer, consumers = self.consumers.len(), "consumer registered");
                if transition == Transition::First && self.config.auto_connect {
                    self.connect();
                }
            }
            Request::Deregister(consumer) => {
                let transition = self.consumers.deregister(&consumer);
                debug!(%consumer, consumers = self.consumers.len(), "consumer deregistered");
                if transition == Transition::Last {
                    self.disconnect();
                }
            }
            Request::Subscribe(id, tx) => {
                self.listeners.add(id, tx);
                debug!(subscription = %id, listeners = self.listeners.len(), "listener added");
            }
            Request::Unsubscribe(id) => {
                if self.listeners.remove(id) {
                    debug!(subscription = %id, listeners = self.listeners.len(), "listener removed");
                }
            }
            Request::Control(action, reply) => {
                let (report, effect) = control::plan(action, self.state);
                info!(controller = %self.target, %action, outcome = report.message, "control action");
                match effect {
                    ControlEffect::Connect => self.connect(),
                    ControlEffect::Disconnect => self.disconnect(),
                    ControlEffect::None => {}
                }
                let _ = reply.send(report);
            }
            Request::Stats(reply) => {
                let _ = reply.send(self.stats.clone());
            }
            Request::ConsumerCount(reply) => {
                let _ = reply.send(self.consumers.len());
            }
        }
    }

    fn connect(&mut self) {
        if self.state != ConnectionState::Disconnected {
            debug!(controller = %self.target, state = %self.state, "connect ignored");
            return;
        }

        self.generation += 1;
        self.stats.record_attempt();
        self.set_state(ConnectionState::Connecting);
        info!(controller = %self.target, "connecting to Dobot");

        spawn_connect(
            &self.target,
            self.config.connect_timeout,
            self.generation,
            self.transport_tx.clone(),
        );
    }

    fn disconnect(&mut self) {
        if self.state == ConnectionState::Disconnected {
            debug!(controller = %self.target, "disconnect ignored, already disconnected");
            return;
        }
        info!(controller = %self.target, "disconnecting from Dobot");
        self.teardown(None);
    }

    /// Drop the transport and resolve every outstanding command.
    ///
    /// The in-flight command receives `cause` if one is given; everything
    /// else receives [`DobotError::ConnectionLost`].
    fn teardown(&mut self, cause: Option<DobotError>) {
        if self.state == ConnectionState::Disconnected {
            return;
        }

        let was_connected = self.state.is_connected();
        self.generation += 1;
        self.connection = None;

        let in_flight = self.queue.take_in_flight();
        let waiting = self.queue.drain();
        let abandoned = waiting.len() + usize::from(in_flight.is_some());
        if abandoned > 0 {
            warn!(controller = %self.target, abandoned, "connection lost with commands outstanding");
            self.stats.record_abandoned(abandoned);
        }

        if was_connected {
            self.stats.record_disconnect();
        }
        self.set_state(ConnectionState::Disconnected);
        if was_connected {
            self.listeners.publish(ConnectionEvent::Disconnected);
        }

        if let Some(command) = in_flight {
            command.resolve(Err(cause.unwrap_or(DobotError::ConnectionLost)));
        }
        for command in waiting {
            command.resolve(Err(DobotError::ConnectionLost));
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        self.state = state;
        let status = StatusUpdate::from(state);
        self.status_tx.send_replace(status);
        self.listeners.publish(ConnectionEvent::Status(status));
    }

    fn handle_transport(&mut self, event: TransportEvent) {
        if event.generation != self.generation {
            debug!(
                controller = %self.target,
                stale = event.generation,
                current = self.generation,
                "ignoring event from a previous connection"
            );
            return;
        }

        match event.kind {
            TransportEventKind::Opened(Ok(stream)) => {
                match ControllerConnection::start(
                    stream,
                    self.config.read_buffer_size,
                    self.generation,
                    self.transport_tx.clone(),
                ) {
                    Ok(connection) => {
                        info!(controller = %self.target, peer = %connection.peer_addr(), "connected to Dobot");
                        self.connection = Some(connection);
                        self.stats.record_connect();
                        self.set_state(ConnectionState::Connected);
                        self.listeners.publish(ConnectionEvent::Connected);
                    }
                    Err(e) => {
                        warn!(controller = %self.target, error = %e, "connection failed");
                        self.stats.record_failure();
                        self.set_state(ConnectionState::Disconnected);
                    }
                }
            }
            TransportEventKind::Opened(Err(e)) => {
                warn!(controller = %self.target, error = %e, "connection failed");
                self.stats.record_failure();
                self.set_state(ConnectionState::Disconnected);
            }
            TransportEventKind::Data(data) => self.handle_reply(data),
            TransportEventKind::Written { bytes, .. } => self.stats.record_send(bytes),
            TransportEventKind::WriteFailed { write_id, error } => {
                self.handle_write_failure(write_id, error);
            }
            TransportEventKind::Closed => {
                info!(controller = %self.target, "connection closed by Dobot");
                self.teardown(Some(DobotError::TransportClosed));
            }
            TransportEventKind::Error(e) => {
                warn!(controller = %self.target, error = %e, "socket error");
                self.stats.record_failure();
                self.teardown(Some(DobotError::Transport(e)));
            }
        }
    }

    fn submit(&mut self, command: PendingCommand) {
        if !self.state.is_connected() {
            debug!(command = %command.text, state = %self.state, "rejecting command, not connected");
            command.resolve(Err(DobotError::NotConnected));
            return;
        }

        if !self.queue.is_idle() {
            debug!(
                command = %command.text,
                in_flight = ?self.queue.in_flight_text(),
                queued = self.queue.waiting_len() + 1,
                "command queued"
            );
            self.queue.push(command);
            return;
        }

        self.dispatch(command);
    }

    /// Hand a command to the write pump and put it in flight. Returns false
    /// if the pump is gone, in which case the command has been resolved.
    ///
    /// The deadline starts here, so it also covers a write that stalls.
    fn dispatch(&mut self, command: PendingCommand) -> bool {
        let Some(connection) = self.connection.as_ref() else {
            command.resolve(Err(DobotError::NotConnected));
            return false;
        };

        let write_id = self.queue.next_write_id();
        debug!(command = %command.text, write_id, "sending");
        match connection.send_command(write_id, &command.text) {
            Ok(()) => {
                let deadline = self.config.command_timeout.map(|t| Instant::now() + t);
                self.queue.mark_in_flight(command, write_id, deadline);
                true
            }
            Err(e) => {
                warn!(command = %command.text, error = %e, "write failed");
                command.resolve(Err(DobotError::TransportWrite(e)));
                false
            }
        }
    }

    /// Put the oldest waiting command in flight, skipping any that cannot be
    /// handed to the transport.
    fn advance(&mut self) {
        while let Some(next) = self.queue.pop_waiting() {
            if self.dispatch(next) {
                break;
            }
        }
    }

    fn handle_write_failure(&mut self, write_id: u64, error: io::Error) {
        if self.queue.in_flight_write_id() != Some(write_id) {
            debug!(write_id, error = %error, "write failed for a command no longer in flight");
            return;
        }
        let Some(failed) = self.queue.take_in_flight() else {
            return;
        };
        warn!(command = %failed.text, error = %error, "write failed");

        self.advance();
        failed.resolve(Err(DobotError::TransportWrite(error)));
    }

    fn handle_reply(&mut self, data: Bytes) {
        let reply = decode_reply(&data);
        self.stats.record_receive(data.len());

        let Some(completed) = self.queue.take_in_flight() else {
            warn!(controller = %self.target, %reply, "reply with no command in flight, discarding");
            return;
        };

        debug!(
            command = %completed.text,
            %reply,
            elapsed = ?completed.enqueued_at.elapsed(),
            "received"
        );

        self.advance();
        completed.resolve(Ok(reply));
    }

    fn handle_deadline(&mut self) {
        let Some(expired) = self.queue.take_in_flight() else {
            return;
        };
        let timeout = self.config.command_timeout.unwrap_or_default();
        warn!(command = %expired.text, ?timeout, "command timed out");
        self.stats.record_timeout();

        self.advance();
        expired.resolve(Err(DobotError::CommandTimeout(timeout)));
    }
}
