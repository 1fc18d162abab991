//! WebSocket connection management
//!
//! A [`ConnectionManager`] owns one connection worker. The worker opens the
//! socket, reads frames, handles timer events and re-opens the socket after
//! any failure until `disconnect()` is called. Everything that changes the
//! connection happens on the worker; callers and timers only post commands.

use crate::{
    auth::{AuthMode, Credentials, LoginParams, LOGIN_METHOD},
    data::{ClientConfig, ConnectionState, Outcome, Params, PendingRequest, RequestId},
    error::{ClientError, ConfigError, ConnectionError, MessageError, SinkError},
    registry::{IdGenerator, RequestRegistry},
    report::Reporter,
    router::{MessageRouter, RouterCounts},
    sink::{self, OutputReceiver},
    subscription::{ReplayEntry, SubscriptionHistory},
    timers::{TimerConfig, TimerEvent, TimerSet},
    worker::{TaskWorker, Worker, WorkerHandle},
};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::Instrument;
use url::Url;

/// WebSocket message type
pub type WebSocketMessage = Message;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Outbound half of an open connection
#[async_trait]
pub trait FrameWriter: Send {
    async fn send(&mut self, message: Message) -> Result<(), ConnectionError>;

    async fn close(&mut self) -> Result<(), ConnectionError>;
}

/// Inbound half of an open connection
#[async_trait]
pub trait FrameReader: Send {
    /// Next frame, `None` once the peer is gone
    async fn next(&mut self) -> Option<Result<Message, ConnectionError>>;
}

/// Opens connections to an endpoint
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        url: &str,
    ) -> Result<(Box<dyn FrameWriter>, Box<dyn FrameReader>), ConnectionError>;
}

#[async_trait]
impl FrameWriter for SplitSink<WsStream, Message> {
    async fn send(&mut self, message: Message) -> Result<(), ConnectionError> {
        SinkExt::send(self, message)
            .await
            .map_err(|e| ConnectionError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        SinkExt::close(self)
            .await
            .map_err(|e| ConnectionError::ConnectionLost(e.to_string()))
    }
}

#[async_trait]
impl FrameReader for SplitStream<WsStream> {
    async fn next(&mut self) -> Option<Result<Message, ConnectionError>> {
        StreamExt::next(self)
            .await
            .map(|frame| frame.map_err(|e| ConnectionError::ConnectionLost(e.to_string())))
    }
}

/// Connects over TCP/TLS with tokio-tungstenite
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(
        &self,
        url: &str,
    ) -> Result<(Box<dyn FrameWriter>, Box<dyn FrameReader>), ConnectionError> {
        let url = Url::parse(url)
            .map_err(|e| ConnectionError::EstablishmentFailed(format!("Invalid URL: {}", e)))?;

        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| ConnectionError::EstablishmentFailed(format!("Connection failed: {}", e)))?;

        let (writer, reader) = ws_stream.split();
        Ok((Box::new(writer), Box::new(reader)))
    }
}

/// Work posted to the connection worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Reconnect,
    Timer(TimerEvent),
}

/// Why the worker stopped serving an open connection
enum Exit {
    Shutdown,
    Lost(String),
}

/// State shared between the manager and its worker
struct Shared {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    state: watch::Sender<ConnectionState>,
    /// Serialises state transitions with `disconnect()`
    transition: Mutex<()>,
    disconnect_requested: AtomicBool,
    shutdown: watch::Sender<bool>,
    commands: Mutex<Option<UnboundedSender<Command>>>,
    writer: AsyncMutex<Option<Box<dyn FrameWriter>>>,
    registry: Arc<RequestRegistry>,
    router: MessageRouter,
    ids: IdGenerator,
    history: SubscriptionHistory,
    reconnects: AtomicU64,
    span: tracing::Span,
}

impl Shared {
    /// Apply a state transition. After `disconnect()` only `Disconnected` is accepted.
    fn set_state(&self, state: ConnectionState) -> bool {
        let _guard = self.transition.lock();
        if state != ConnectionState::Disconnected && self.disconnect_requested.load(Ordering::SeqCst) {
            return false;
        }

        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!("Connection state {} -> {}", previous, state);
        }
        true
    }

    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn stopping(&self) -> bool {
        self.disconnect_requested.load(Ordering::SeqCst)
    }

    fn request_disconnect(&self) {
        {
            let _guard = self.transition.lock();
            self.disconnect_requested.store(true, Ordering::SeqCst);
            self.state.send_replace(ConnectionState::Disconnected);
        }
        self.shutdown.send_replace(true);
        *self.commands.lock() = None;
    }

    async fn transmit(&self, message: Message) -> Result<(), ConnectionError> {
        let mut writer = self.writer.lock().await;
        match writer.as_mut() {
            Some(writer) => writer.send(message).await,
            None => Err(ConnectionError::NotConnected),
        }
    }

    async fn send(
        &self,
        method: &str,
        params: Params,
        id: Option<RequestId>,
    ) -> Result<RequestId, ClientError> {
        if self.state() != ConnectionState::Connected {
            tracing::warn!("Cannot send {} payload - connection not established", method);
            return Err(ConnectionError::NotConnected.into());
        }

        let id = id.unwrap_or_else(|| self.ids.next_id());
        let request = PendingRequest::new(id.clone(), method, params);
        let frame = request
            .to_frame()
            .map_err(|e| MessageError::Encode(e.to_string()))?;

        let track = !self.config.raw;
        if track {
            self.registry.insert(request.clone())?;
        }

        if let Err(e) = self.transmit(Message::Text(frame)).await {
            if track {
                let _ = self.registry.pop(&id);
            }
            tracing::warn!("Failed to send {} request {}: {}", method, id, e);
            return Err(e.into());
        }

        tracing::debug!("Sent {} request {}", method, id);
        self.history.record(method, &request.params);
        Ok(id)
    }

    async fn login(
        &self,
        credentials: &Credentials,
        mode: AuthMode,
        nonce: Option<&str>,
    ) -> Result<RequestId, ClientError> {
        let params = LoginParams::build(credentials, mode, nonce)?;
        tracing::info!("Logging in with {} as {:?}", params.algo(), credentials);

        let id = self.send(LOGIN_METHOD, params.into_params(), None).await?;
        self.history.record_login(credentials.clone(), mode);
        Ok(id)
    }

    /// Re-issue the recorded login and subscriptions on a fresh connection
    async fn replay(&self) {
        let plan = self.history.replay_plan();
        if plan.is_empty() {
            return;
        }

        tracing::info!("Restoring {} command(s) after reconnect", plan.len());
        for entry in plan {
            let result = match entry {
                ReplayEntry::Login { credentials, mode } => {
                    self.login(&credentials, mode, None).await
                }
                ReplayEntry::Subscribe { method, params } => self.send(&method, params, None).await,
            };

            if let Err(e) = result {
                tracing::warn!("Failed to restore session state: {}", e);
                return;
            }
        }
    }

    async fn close_writer(&self) {
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.close().await {
                tracing::debug!("Error while closing socket: {}", e);
            }
        }
    }

    async fn open(&self) -> Result<Box<dyn FrameReader>, ConnectionError> {
        let timeout = self.config.connection_timeout;
        let (writer, reader) =
            match tokio::time::timeout(timeout, self.connector.connect(&self.config.url)).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(ConnectionError::Timeout(format!(
                        "no connection within {:?}",
                        timeout
                    )))
                }
            };

        *self.writer.lock().await = Some(writer);
        Ok(reader)
    }

    /// Worker body: open, serve, re-open until disconnect is requested
    async fn run(
        self: Arc<Self>,
        events: UnboundedSender<Command>,
        mut commands: UnboundedReceiver<Command>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let timer_config = TimerConfig {
            connection_timeout: self.config.connection_timeout,
            ping_interval: self.config.ping_interval,
            pong_timeout: self.config.pong_timeout,
        };
        let mut opened_before = false;

        while !self.stopping() {
            tracing::info!("Connecting to {}", self.config.url);
            let opened = tokio::select! {
                opened = self.open() => opened,
                _ = stopped(&mut shutdown) => break,
            };

            match opened {
                Ok(reader) => {
                    // timer events of the previous connection are stale; a requested
                    // reconnect still applies to this one
                    let mut reconnect_requested = false;
                    while let Ok(command) = commands.try_recv() {
                        reconnect_requested |= matches!(command, Command::Reconnect);
                    }

                    // bumped before Connected is published
                    let count = if opened_before {
                        self.reconnects.fetch_add(1, Ordering::SeqCst) + 1
                    } else {
                        0
                    };
                    if !self.set_state(ConnectionState::Connected) {
                        break;
                    }

                    if opened_before {
                        tracing::info!("Reconnected to {} (reconnect #{})", self.config.url, count);
                    } else {
                        tracing::info!("WebSocket connection established");
                    }

                    let mut timers = TimerSet::new(timer_config, events.clone(), Command::Timer, self.span.clone());
                    timers.start();
                    if reconnect_requested {
                        let _ = events.send(Command::Reconnect);
                    }

                    if opened_before && self.config.resubscribe_on_reconnect {
                        self.replay().await;
                    }
                    opened_before = true;

                    let exit = self.serve(reader, &mut timers, &mut commands, &mut shutdown).await;
                    timers.cancel_all();

                    match exit {
                        Exit::Shutdown => break,
                        Exit::Lost(reason) => {
                            tracing::warn!("Connection lost: {}", reason);
                            self.set_state(ConnectionState::ReconnectPending);
                            self.close_writer().await;
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("Connection attempt failed: {}", e);
                    self.close_writer().await;
                }
            }

            if !self.set_state(ConnectionState::ReconnectPending) {
                break;
            }

            let interval = self.config.reconnect_interval;
            tracing::info!("Reconnecting in {:?}", interval);
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = stopped(&mut shutdown) => break,
            }
        }

        self.close_writer().await;
        self.set_state(ConnectionState::Disconnected);
        tracing::info!("Connection worker stopped");
    }

    async fn serve(
        &self,
        mut reader: Box<dyn FrameReader>,
        timers: &mut TimerSet<Command>,
        commands: &mut UnboundedReceiver<Command>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Exit {
        loop {
            tokio::select! {
                _ = stopped(shutdown) => return Exit::Shutdown,
                command = commands.recv() => match command {
                    Some(Command::Reconnect) => return Exit::Lost("reconnect requested".to_string()),
                    Some(Command::Timer(TimerEvent::Ping)) => {
                        if let Some(ttl) = self.config.request_ttl {
                            self.registry.evict_expired(ttl);
                        }
                        if let Err(e) = self.transmit(Message::Ping(Vec::new())).await {
                            return Exit::Lost(format!("ping failed: {}", e));
                        }
                        timers.arm_pong();
                    }
                    Some(Command::Timer(TimerEvent::ConnectionTimeout)) => {
                        // fired while routing was held up by a full queue
                        if timers.is_idle() {
                            return Exit::Lost(format!(
                                "no data received within {:?}",
                                self.config.connection_timeout
                            ));
                        }
                        timers.restart_watchdog();
                    }
                    Some(Command::Timer(TimerEvent::PongTimeout)) => {
                        return Exit::Lost(format!(
                            "no pong received within {:?}",
                            self.config.pong_timeout
                        ));
                    }
                    None => return Exit::Shutdown,
                },
                frame = reader.next() => {
                    let frame = match frame {
                        Some(Ok(frame)) => frame,
                        Some(Err(e)) => return Exit::Lost(e.to_string()),
                        None => return Exit::Lost("stream ended".to_string()),
                    };
                    timers.touch();

                    match frame {
                        Message::Text(text) => {
                            self.router.route(&text).await;
                            timers.touch();
                        }
                        Message::Binary(bytes) => match String::from_utf8(bytes) {
                            Ok(text) => {
                                self.router.route(&text).await;
                                timers.touch();
                            }
                            Err(_) => tracing::debug!("Ignoring non UTF-8 binary frame"),
                        },
                        Message::Pong(_) => timers.pong_received(),
                        Message::Close(frame) => {
                            return Exit::Lost(format!("closed by server: {:?}", frame));
                        }
                        Message::Ping(_) | Message::Frame(_) => {}
                    }
                }
            }
        }
    }
}

/// Resolves once shutdown has been signalled
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Connection manager for the HitBTC WebSocket API
pub struct ConnectionManager {
    shared: Arc<Shared>,
    worker: Box<dyn Worker>,
    handle: Mutex<Option<Box<dyn WorkerHandle>>>,
    receiver: AsyncMutex<OutputReceiver>,
}

impl ConnectionManager {
    /// Manager connecting over tokio-tungstenite, worker on the ambient runtime
    pub fn new(config: ClientConfig) -> Result<Self, ConfigError> {
        Self::with_parts(config, Arc::new(TungsteniteConnector), Box::new(TaskWorker::new()))
    }

    pub fn with_parts(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
        worker: Box<dyn Worker>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let span = config.span();
        let registry = Arc::new(RequestRegistry::new());
        let (sink, receiver) = sink::channel(config.queue_capacity, !config.suppress_delivery);
        let router = MessageRouter::new(registry.clone(), sink, Reporter::new(config.silent), config.raw);
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                connector,
                state,
                transition: Mutex::new(()),
                disconnect_requested: AtomicBool::new(false),
                shutdown,
                commands: Mutex::new(None),
                writer: AsyncMutex::new(None),
                registry,
                router,
                ids: IdGenerator::new(),
                history: SubscriptionHistory::new(),
                reconnects: AtomicU64::new(0),
                span,
            }),
            worker,
            handle: Mutex::new(None),
            receiver: AsyncMutex::new(receiver),
        })
    }

    /// Start the connection worker and return immediately
    ///
    /// The state is `Connecting` until the socket opens.
    pub fn connect(&self) -> Result<(), ConnectionError> {
        let mut handle = self.handle.lock();
        if handle.as_ref().map_or(false, |running| !running.is_finished()) {
            return Err(ConnectionError::AlreadyStarted);
        }

        let shared = &self.shared;
        {
            let _guard = shared.transition.lock();
            shared.disconnect_requested.store(false, Ordering::SeqCst);
            shared.state.send_replace(ConnectionState::Connecting);
        }
        shared.shutdown.send_replace(false);

        let (events, commands) = mpsc::unbounded_channel();
        *shared.commands.lock() = Some(events.clone());
        let shutdown = shared.shutdown.subscribe();

        let span = shared.span.clone();
        let task = shared.clone().run(events, commands, shutdown).instrument(span);
        *handle = Some(self.worker.spawn("hitbtc-ws-connection", Box::pin(task)));
        Ok(())
    }

    /// Stop the worker, close the socket and cancel all timers
    ///
    /// Idempotent. Waits at most `join_timeout` for the worker and aborts it
    /// if it lingers beyond that.
    pub async fn disconnect(&self) {
        self.shared.request_disconnect();

        let handle = self.handle.lock().take();
        if let Some(mut handle) = handle {
            let timeout = self.shared.config.join_timeout;
            if !handle.join(timeout).await {
                tracing::warn!("Connection worker still running after {:?}, aborting it", timeout);
                handle.abort();
            }
        }

        let timeout = self.shared.config.join_timeout;
        if tokio::time::timeout(timeout, self.shared.close_writer()).await.is_err() {
            tracing::warn!("Socket did not close within {:?}", timeout);
        }
    }

    /// Drop the current socket and let the worker re-open it
    pub fn reconnect(&self) -> Result<(), ConnectionError> {
        let commands = self.shared.commands.lock().clone();
        let Some(commands) = commands else {
            return Err(ConnectionError::NotConnected);
        };

        self.shared.set_state(ConnectionState::ReconnectPending);
        commands
            .send(Command::Reconnect)
            .map_err(|_| ConnectionError::NotConnected)
    }

    /// Send a JSON-RPC request
    ///
    /// Without `id` a fresh time-based id is generated. Fails with
    /// `ConnectionError::NotConnected` unless connected, in which case nothing
    /// is transmitted or registered.
    pub async fn send(
        &self,
        method: &str,
        params: Params,
        id: Option<RequestId>,
    ) -> Result<RequestId, ClientError> {
        self.shared.send(method, params, id).await
    }

    /// Authenticate the session; the login is remembered for replay after reconnects
    pub async fn login(
        &self,
        credentials: &Credentials,
        mode: AuthMode,
        nonce: Option<&str>,
    ) -> Result<RequestId, ClientError> {
        self.shared.login(credentials, mode, nonce).await
    }

    /// Next outcome from the output queue
    pub async fn recv(&self, block: bool, timeout: Option<Duration>) -> Result<Outcome, SinkError> {
        self.receiver.lock().await.pop(block, timeout).await
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Observe state transitions
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Wait until the state equals `target`; `false` on timeout
    pub async fn wait_for_state(&self, target: ConnectionState, timeout: Duration) -> bool {
        let mut changes = self.state_changes();
        let reached = async {
            loop {
                if *changes.borrow_and_update() == target {
                    return true;
                }
                if changes.changed().await.is_err() {
                    return false;
                }
            }
        };
        tokio::time::timeout(timeout, reached).await.unwrap_or(false)
    }

    /// Number of successful re-opens since construction
    pub fn reconnect_count(&self) -> u64 {
        self.shared.reconnects.load(Ordering::SeqCst)
    }

    pub fn pending_count(&self) -> usize {
        self.shared.registry.len()
    }

    pub fn registry(&self) -> &Arc<RequestRegistry> {
        &self.shared.registry
    }

    pub fn router_stats(&self) -> RouterCounts {
        self.shared.router.stats()
    }

    pub fn active_subscriptions(&self) -> Vec<String> {
        self.shared.history.active_subscriptions()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.shared.request_disconnect();
        if let Some(handle) = self.handle.get_mut().take() {
            if !handle.is_finished() {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct RefusingConnector;

    #[async_trait]
    impl Connector for RefusingConnector {
        async fn connect(
            &self,
            _url: &str,
        ) -> Result<(Box<dyn FrameWriter>, Box<dyn FrameReader>), ConnectionError> {
            Err(ConnectionError::EstablishmentFailed("refused".to_string()))
        }
    }

    fn manager(config: ClientConfig) -> ConnectionManager {
        ConnectionManager::with_parts(config, Arc::new(RefusingConnector), Box::new(TaskWorker::new()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_send_while_disconnected() {
        let manager = manager(ClientConfig::default());
        let mut params = Params::new();
        params.insert("symbol".into(), json!("BTCUSD"));

        let result = manager.send("getTrades", params, Some(RequestId::Int(7))).await;
        assert!(matches!(
            result,
            Err(ClientError::Connection(ConnectionError::NotConnected))
        ));
        assert_eq!(manager.pending_count(), 0);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_failed_connect_moves_to_reconnect_pending() {
        let manager = manager(ClientConfig {
            reconnect_interval: Duration::from_millis(20),
            ..Default::default()
        });

        manager.connect().unwrap();
        assert!(matches!(manager.connect(), Err(ConnectionError::AlreadyStarted)));
        assert!(manager.wait_for_state(ConnectionState::ReconnectPending, Duration::from_secs(1)).await);

        manager.disconnect().await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        manager.disconnect().await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_reconnect_requires_running_worker() {
        let manager = manager(ClientConfig::default());
        assert_eq!(manager.reconnect(), Err(ConnectionError::NotConnected));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = ClientConfig { url: "ftp://nope".into(), ..Default::default() };
        assert!(ConnectionManager::with_parts(
            config,
            Arc::new(RefusingConnector),
            Box::new(TaskWorker::new())
        )
        .is_err());
    }
}
