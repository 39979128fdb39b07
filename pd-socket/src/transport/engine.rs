//! Engine.IO / Socket.IO transport.
//!
//! [`EngineConnector`] spawns one driver task per transport. The driver opens
//! a link (websocket first, then long-polling, in configured order), joins
//! the default namespace, keeps the heartbeat alive and retries with a fixed
//! delay when the connection drops. All lifecycle changes are reported
//! through the [`TransportSink`].

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};
use url::Url;

use pd_core::config::TransportKind;
use pd_core::constants::{ENGINE_IO_PROTOCOL, SERVER_DISCONNECT_REASON};
use pd_core::error::{PdError, PdResult};

use super::packet::{EnginePacket, Handshake, SocketPacket};
use super::polling::{self, PollingWriter};
use super::websocket::{self, WsSink};
use super::{Transport, TransportConnector, TransportEvent, TransportOptions, TransportSink};

const GOODBYE_TIMEOUT: Duration = Duration::from_secs(1);
/// Upper bound on the server-advertised heartbeat window.
const MAX_HEARTBEAT: Duration = Duration::from_secs(3600);

/// An open Engine.IO link: decoded inbound packets plus a writer.
pub(crate) struct EngineLink {
    kind: TransportKind,
    handshake: Handshake,
    incoming: mpsc::UnboundedReceiver<PdResult<EnginePacket>>,
    writer: LinkWriter,
    reader_task: JoinHandle<()>,
}

impl EngineLink {
    pub(crate) fn new(
        kind: TransportKind,
        handshake: Handshake,
        incoming: mpsc::UnboundedReceiver<PdResult<EnginePacket>>,
        writer: LinkWriter,
        reader_task: JoinHandle<()>,
    ) -> Self {
        Self {
            kind,
            handshake,
            incoming,
            writer,
            reader_task,
        }
    }

    fn heartbeat(&self) -> Duration {
        heartbeat_window(&self.handshake)
    }
}

impl Drop for EngineLink {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

pub(crate) enum LinkWriter {
    WebSocket(WsSink),
    Polling(PollingWriter),
}

impl LinkWriter {
    async fn send(&mut self, packets: Vec<EnginePacket>) -> PdResult<()> {
        match self {
            Self::WebSocket(sink) => websocket::send(sink, packets).await,
            Self::Polling(writer) => writer.send(packets).await,
        }
    }

    async fn close(&mut self) {
        if let Self::WebSocket(sink) = self {
            websocket::close(sink).await;
        }
    }
}

/// Server endpoint derived from the configured address.
#[derive(Debug, Clone)]
struct Endpoint {
    base: Url,
}

impl Endpoint {
    fn parse(address: &str, options: &TransportOptions) -> PdResult<Self> {
        let mut base = Url::parse(address)
            .map_err(|e| PdError::InvalidAddress(format!("{address}: {e}")))?;
        match base.scheme() {
            "http" | "https" | "ws" | "wss" => {}
            other => {
                return Err(PdError::InvalidAddress(format!(
                    "{address}: unsupported scheme '{other}'"
                )))
            }
        }
        if base.host_str().map_or(true, str::is_empty) {
            return Err(PdError::InvalidAddress(format!("{address}: missing host")));
        }

        let path = if options.path.starts_with('/') {
            options.path.clone()
        } else {
            format!("/{}", options.path)
        };
        base.set_path(&path);
        base.set_query(None);
        base.set_fragment(None);
        {
            let mut query = base.query_pairs_mut();
            query.append_pair("EIO", &ENGINE_IO_PROTOCOL.to_string());
            for (key, value) in &options.query {
                query.append_pair(key, value);
            }
        }
        Ok(Self { base })
    }

    fn secure(&self) -> bool {
        matches!(self.base.scheme(), "https" | "wss")
    }

    fn url_for(&self, kind: TransportKind) -> PdResult<Url> {
        let mut url = self.base.clone();
        let scheme = match (kind, self.secure()) {
            (TransportKind::Websocket, true) => "wss",
            (TransportKind::Websocket, false) => "ws",
            (TransportKind::Polling, true) => "https",
            (TransportKind::Polling, false) => "http",
        };
        url.set_scheme(scheme)
            .map_err(|_| PdError::InvalidAddress(format!("cannot use {scheme} for {}", self.base)))?;
        url.query_pairs_mut().append_pair("transport", kind.as_str());
        Ok(url)
    }
}

/// Opens Engine.IO transports. Requires a running tokio runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct EngineConnector;

impl EngineConnector {
    pub fn new() -> Self {
        Self
    }
}

impl TransportConnector for EngineConnector {
    fn open(
        &self,
        address: &str,
        options: &TransportOptions,
        sink: TransportSink,
    ) -> PdResult<Arc<dyn Transport>> {
        let endpoint = Endpoint::parse(address, options)?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| PdError::Transport(format!("no async runtime: {e}")))?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let socket_id = Arc::new(Mutex::new(None));

        debug!(
            "starting engine transport #{} for {}",
            sink.generation(),
            endpoint.base
        );
        let driver = Driver {
            endpoint,
            options: options.clone(),
            sink,
            socket_id: Arc::clone(&socket_id),
        };
        runtime.spawn(driver.run(outbound_rx, shutdown_rx));

        Ok(Arc::new(EngineTransport {
            outbound: outbound_tx,
            shutdown: shutdown_tx,
            socket_id,
        }))
    }
}

struct Outbound {
    event: String,
    payload: Value,
}

/// Handle to a running driver task.
struct EngineTransport {
    outbound: mpsc::UnboundedSender<Outbound>,
    shutdown: watch::Sender<bool>,
    socket_id: Arc<Mutex<Option<String>>>,
}

impl Transport for EngineTransport {
    fn id(&self) -> Option<String> {
        self.socket_id.lock().clone()
    }

    fn send(&self, event: &str, payload: Value) -> PdResult<()> {
        if *self.shutdown.borrow() {
            return Err(PdError::Transport("transport is closed".into()));
        }
        self.outbound
            .send(Outbound {
                event: event.to_string(),
                payload,
            })
            .map_err(|_| PdError::Transport("transport task has stopped".into()))
    }

    fn close(&self) {
        if !self.shutdown.send_replace(true) {
            debug!("engine transport closing");
        }
    }
}

enum SessionEnd {
    /// Closed locally; stop for good.
    Closed,
    /// Connection lost for the given reason.
    Lost(String),
}

struct Driver {
    endpoint: Endpoint,
    options: TransportOptions,
    sink: TransportSink,
    socket_id: Arc<Mutex<Option<String>>>,
}

impl Driver {
    async fn run(
        self,
        mut outbound: mpsc::UnboundedReceiver<Outbound>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut failures: u32 = 0;
        let mut attempt: u32 = 0;

        loop {
            if attempt > 0 {
                debug!(
                    "reconnect attempt {attempt} in {}ms",
                    self.options.reconnection_delay.as_millis()
                );
                tokio::select! {
                    _ = sleep(self.options.reconnection_delay) => {}
                    _ = wait_closed(&mut shutdown) => return,
                }
            }
            if *shutdown.borrow() {
                return;
            }

            let result = tokio::select! {
                result = timeout(self.options.timeout, self.establish()) => {
                    result.unwrap_or_else(|_| Err(PdError::Timeout(format!(
                        "no connection within {}ms",
                        self.options.timeout.as_millis()
                    ))))
                }
                _ = wait_closed(&mut shutdown) => return,
            };

            match result {
                Ok((mut link, socket_id)) => {
                    let stale = drain(&mut outbound);
                    if stale > 0 {
                        debug!("dropped {stale} message(s) queued while offline");
                    }
                    *self.socket_id.lock() = Some(socket_id.clone());
                    info!("realtime transport up via {} (sid {socket_id})", link.kind);

                    self.sink.deliver(TransportEvent::Connect { socket_id });
                    if attempt > 0 {
                        self.sink.deliver(TransportEvent::Reconnect { attempt });
                    }
                    failures = 0;

                    let end = run_session(&mut link, &self.sink, &mut outbound, &mut shutdown).await;
                    *self.socket_id.lock() = None;
                    match end {
                        SessionEnd::Closed => return,
                        SessionEnd::Lost(reason) => {
                            warn!("realtime connection lost: {reason}");
                            let server_closed = reason == SERVER_DISCONNECT_REASON;
                            self.sink.deliver(TransportEvent::Disconnect { reason });
                            if server_closed || !self.options.reconnection || *shutdown.borrow() {
                                return;
                            }
                            attempt = 1;
                        }
                    }
                }
                Err(e) => {
                    let error = e.to_string();
                    warn!("realtime connection attempt failed: {error}");
                    self.sink.deliver(TransportEvent::ConnectError {
                        error: error.clone(),
                    });
                    if attempt > 0 {
                        self.sink.deliver(TransportEvent::ReconnectError { error });
                    }
                    if !self.options.reconnection || *shutdown.borrow() {
                        return;
                    }

                    failures += 1;
                    if failures >= self.options.reconnection_attempts {
                        warn!("giving up after {failures} failed attempt(s)");
                        self.sink.deliver(TransportEvent::ReconnectFailed);
                        return;
                    }
                    attempt += 1;
                }
            }
        }
    }

    /// Open the first transport kind that works and join the namespace.
    async fn establish(&self) -> PdResult<(EngineLink, String)> {
        let mut last_error = None;
        for kind in &self.options.transports {
            let url = self.endpoint.url_for(*kind)?;
            debug!("trying {kind} transport at {url}");
            let opened = match kind {
                TransportKind::Websocket => websocket::open(&url, &self.options.headers).await,
                TransportKind::Polling => polling::open(&url, &self.options.headers).await,
            };
            match opened {
                Ok(mut link) => {
                    let socket_id = connect_namespace(&mut link).await?;
                    return Ok((link, socket_id));
                }
                Err(e) => {
                    debug!("{kind} transport unavailable: {e}");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| PdError::Transport("no transports configured".into())))
    }
}

async fn connect_namespace(link: &mut EngineLink) -> PdResult<String> {
    let request = SocketPacket::Connect {
        sid: None,
        auth: None,
    }
    .encode()?;
    link.writer.send(vec![EnginePacket::Message(request)]).await?;

    loop {
        match link.incoming.recv().await {
            Some(Ok(EnginePacket::Ping(data))) => {
                link.writer.send(vec![EnginePacket::Pong(data)]).await?;
            }
            Some(Ok(EnginePacket::Message(text))) => match SocketPacket::decode(&text)? {
                SocketPacket::Connect { sid, .. } => {
                    return Ok(sid.unwrap_or_else(|| link.handshake.sid.clone()))
                }
                SocketPacket::ConnectError { message } => return Err(PdError::Handshake(message)),
                other => debug!("ignoring {other:?} before namespace connect"),
            },
            Some(Ok(EnginePacket::Close)) | None => {
                return Err(PdError::Transport("transport closed during handshake".into()))
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(e),
        }
    }
}

async fn run_session(
    link: &mut EngineLink,
    sink: &TransportSink,
    outbound: &mut mpsc::UnboundedReceiver<Outbound>,
    shutdown: &mut watch::Receiver<bool>,
) -> SessionEnd {
    let heartbeat = link.heartbeat();
    let ping_deadline = sleep(heartbeat);
    tokio::pin!(ping_deadline);

    loop {
        tokio::select! {
            packet = link.incoming.recv() => {
                ping_deadline.as_mut().reset(deadline_after(heartbeat));
                match packet {
                    Some(Ok(EnginePacket::Ping(data))) => {
                        if let Err(e) = link.writer.send(vec![EnginePacket::Pong(data)]).await {
                            debug!("pong failed: {e}");
                            return SessionEnd::Lost("transport error".into());
                        }
                    }
                    Some(Ok(EnginePacket::Message(text))) => match SocketPacket::decode(&text) {
                        Ok(SocketPacket::Event { event, payload }) => {
                            sink.deliver(TransportEvent::Message { event, payload });
                        }
                        Ok(SocketPacket::Disconnect) => {
                            return SessionEnd::Lost(SERVER_DISCONNECT_REASON.into());
                        }
                        Ok(other) => debug!("ignoring {other:?}"),
                        Err(e) => debug!("dropping undecodable message: {e}"),
                    },
                    Some(Ok(EnginePacket::Close)) | None => {
                        return SessionEnd::Lost("transport close".into());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(PdError::Transport(reason))) => return SessionEnd::Lost(reason),
                    Some(Err(e @ (PdError::WebSocket(_) | PdError::Http(_)))) => {
                        debug!("link failed: {e}");
                        return SessionEnd::Lost("transport error".into());
                    }
                    Some(Err(e)) => debug!("dropping malformed packet: {e}"),
                }
            }
            message = outbound.recv() => match message {
                Some(Outbound { event, payload }) => {
                    let encoded = match (SocketPacket::Event { event, payload }).encode() {
                        Ok(encoded) => encoded,
                        Err(e) => {
                            warn!("cannot encode outbound event: {e}");
                            continue;
                        }
                    };
                    if let Err(e) = link.writer.send(vec![EnginePacket::Message(encoded)]).await {
                        debug!("write failed: {e}");
                        return SessionEnd::Lost("transport error".into());
                    }
                }
                None => {
                    say_goodbye(link).await;
                    return SessionEnd::Closed;
                }
            },
            _ = &mut ping_deadline => return SessionEnd::Lost("ping timeout".into()),
            _ = wait_closed(shutdown) => {
                say_goodbye(link).await;
                return SessionEnd::Closed;
            }
        }
    }
}

/// Leave the namespace and close the link, best effort.
async fn say_goodbye(link: &mut EngineLink) {
    let mut packets = Vec::with_capacity(2);
    if let Ok(disconnect) = SocketPacket::Disconnect.encode() {
        packets.push(EnginePacket::Message(disconnect));
    }
    packets.push(EnginePacket::Close);

    let goodbye = async {
        if let Err(e) = link.writer.send(packets).await {
            debug!("goodbye not delivered: {e}");
        }
        link.writer.close().await;
    };
    if timeout(GOODBYE_TIMEOUT, goodbye).await.is_err() {
        debug!("goodbye timed out");
    }
}

/// How long the link may stay silent: `pingInterval + pingTimeout`, capped.
fn heartbeat_window(handshake: &Handshake) -> Duration {
    let millis = handshake.ping_interval.saturating_add(handshake.ping_timeout);
    Duration::from_millis(millis).min(MAX_HEARTBEAT)
}

fn deadline_after(window: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(window)
        .or_else(|| now.checked_add(MAX_HEARTBEAT))
        .unwrap_or(now)
}

/// Resolves once the transport has been closed or its handle dropped.
async fn wait_closed(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

fn drain(outbound: &mut mpsc::UnboundedReceiver<Outbound>) -> usize {
    let mut dropped = 0;
    while outbound.try_recv().is_ok() {
        dropped += 1;
    }
    dropped
}
