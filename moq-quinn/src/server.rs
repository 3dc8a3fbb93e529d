use std::collections::HashMap;
use std::future::Future;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use url::Url;

use moq_proto::SessionErrorCode;

use crate::{
    default_handler, web_transport::WtServer, Conn, IncomingSession, ServerError, Session,
    SetupHandler, ALPN_H3, ALPN_MOQ,
};

/// Decides whether a WebTransport request from this origin is allowed.
/// `None` accepts everything.
pub type OriginCheck = Arc<dyn Fn(&Url) -> bool + Send + Sync>;

const DEFAULT_SETUP_TIMEOUT: Duration = Duration::from_secs(5);

// How long the WebTransport side gets to drain during shutdown.
const WEBTRANSPORT_CLOSE_TIMEOUT: Duration = Duration::from_millis(100);

/// Construct a [Server].
pub struct ServerBuilder {
    handler: Arc<dyn SetupHandler>,
    check_origin: Option<OriginCheck>,
    setup_timeout: Duration,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            handler: default_handler(),
            check_origin: None,
            setup_timeout: DEFAULT_SETUP_TIMEOUT,
        }
    }

    /// The handler invoked with each session offer.
    pub fn with_handler<H: SetupHandler>(mut self, handler: H) -> Self {
        self.handler = Arc::new(handler);
        self
    }

    /// Restrict which origins may establish WebTransport sessions.
    pub fn with_check_origin<F>(mut self, check: F) -> Self
    where
        F: Fn(&Url) -> bool + Send + Sync + 'static,
    {
        self.check_origin = Some(Arc::new(check));
        self
    }

    /// How long a connection gets to complete the setup exchange.
    pub fn with_setup_timeout(mut self, timeout: Duration) -> Self {
        self.setup_timeout = timeout;
        self
    }

    pub fn build(self) -> Server {
        let (listener_count, _) = watch::channel(0usize);

        Server {
            inner: Arc::new(Inner {
                handler: self.handler,
                check_origin: self.check_origin,
                setup_timeout: self.setup_timeout,
                shutting_down: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
                done: CancellationToken::new(),
                listeners: Mutex::new(HashMap::new()),
                sessions: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
                listener_count,
                webtransport: OnceLock::new(),
            }),
        }
    }
}

/// A MOQ server: accepts native QUIC and WebTransport connections, runs the
/// setup exchange on each, and hands the result to the setup handler.
///
/// Cheap to clone; all clones share the same lifecycle. A server that has
/// been shut down stays shut down.
#[derive(Clone)]
pub struct Server {
    inner: Arc<Inner>,
}

struct Inner {
    handler: Arc<dyn SetupHandler>,
    check_origin: Option<OriginCheck>,
    setup_timeout: Duration,

    // false -> true exactly once; observed before refusing any new work.
    shutting_down: AtomicBool,

    // Stops the accept loops.
    shutdown: CancellationToken,

    // Fires once: shutdown was requested and the last session is gone.
    done: CancellationToken,

    // The listener set and the session set are behind separate locks and
    // never held together.
    listeners: Mutex<HashMap<u64, quinn::Endpoint>>,
    sessions: Mutex<HashMap<u64, SessionEntry>>,
    next_id: AtomicU64,

    // How many serve() loops are still running.
    listener_count: watch::Sender<usize>,

    webtransport: OnceLock<WtServer>,
}

#[derive(Clone)]
struct SessionEntry {
    conn: Conn,
    session: Arc<OnceLock<Session>>,
}

impl SessionEntry {
    // Best effort: a session that never finished setup has no session stream
    // to speak on.
    async fn go_away(&self) {
        if let Some(session) = self.session.get() {
            session.go_away("").await.ok();
        }
    }

    fn terminate(&self, code: SessionErrorCode) {
        self.conn.close(code.into(), b"server shutting down");
    }
}

// Removes the session from the registry exactly once, and fires the done
// latch when it was the last one under shutdown.
struct SessionGuard {
    server: Server,
    id: u64,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let inner = &self.server.inner;

        let empty = {
            let mut sessions = inner.sessions.lock().unwrap();
            sessions.remove(&self.id);
            sessions.is_empty()
        };

        if empty && inner.shutting_down.load(Ordering::Acquire) {
            inner.done.cancel();
        }
    }
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Bind `addr` and serve connections with the provided TLS configuration.
    ///
    /// When the configuration doesn't name any ALPN protocols, the native MOQ
    /// ALPN is assumed.
    pub async fn listen_and_serve(
        &self,
        addr: SocketAddr,
        mut tls: rustls::ServerConfig,
    ) -> Result<(), ServerError> {
        if tls.alpn_protocols.is_empty() {
            tls.alpn_protocols = vec![ALPN_MOQ.to_vec()];
        }

        let config: quinn::crypto::rustls::QuicServerConfig = tls
            .try_into()
            .map_err(|err| ServerError::Io(Arc::new(std::io::Error::other(err))))?;
        let config = quinn::ServerConfig::with_crypto(Arc::new(config));

        let endpoint = quinn::Endpoint::server(config, addr)?;
        self.serve(endpoint).await
    }

    /// Bind `addr` and serve connections with a certificate chain and key
    /// loaded from PEM files, advertising both the MOQ and HTTP/3 ALPNs.
    pub async fn listen_and_serve_tls(
        &self,
        addr: SocketAddr,
        cert_path: impl AsRef<Path>,
        key_path: impl AsRef<Path>,
    ) -> Result<(), ServerError> {
        let mut certs = BufReader::new(std::fs::File::open(cert_path)?);
        let chain = rustls_pemfile::certs(&mut certs).collect::<Result<Vec<_>, _>>()?;

        let mut keys = BufReader::new(std::fs::File::open(key_path)?);
        let key = rustls_pemfile::private_key(&mut keys)?
            .ok_or_else(|| std::io::Error::other("no private key found"))?;

        let mut tls = rustls::ServerConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_protocol_versions(&[&rustls::version::TLS13])?
        .with_no_client_auth()
        .with_single_cert(chain, key)?;

        tls.alpn_protocols = vec![ALPN_MOQ.to_vec(), ALPN_H3.to_vec()];

        self.listen_and_serve(addr, tls).await
    }

    /// Accept connections from the endpoint until the server shuts down.
    ///
    /// Always returns [ServerError::Closed] once shutdown begins.
    pub async fn serve(&self, endpoint: quinn::Endpoint) -> Result<(), ServerError> {
        if self.inner.shutting_down.load(Ordering::Acquire) {
            return Err(ServerError::Closed);
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .listeners
            .lock()
            .unwrap()
            .insert(id, endpoint.clone());
        self.inner.listener_count.send_modify(|count| *count += 1);

        loop {
            tokio::select! {
                _ = self.inner.shutdown.cancelled() => break,
                incoming = endpoint.accept() => {
                    let Some(incoming) = incoming else { break };

                    let server = self.clone();
                    tokio::spawn(async move {
                        if let Err(err) = server.accept_conn(incoming).await {
                            log::debug!("connection failed: {err}");
                        }
                    });
                }
            }
        }

        // close() may have drained the registry already.
        self.inner.listeners.lock().unwrap().remove(&id);
        self.inner.listener_count.send_modify(|count| *count -= 1);

        Err(ServerError::Closed)
    }

    async fn accept_conn(&self, incoming: quinn::Incoming) -> Result<(), ServerError> {
        let conn = incoming.await?;
        self.serve_conn(conn).await
    }

    /// Dispatch one connection by its negotiated ALPN: HTTP/3 goes through
    /// the WebTransport upgrade, the MOQ ALPN straight to setup.
    pub async fn serve_conn(&self, conn: quinn::Connection) -> Result<(), ServerError> {
        if self.inner.shutting_down.load(Ordering::Acquire) {
            conn.close(
                quinn::VarInt::from_u32(SessionErrorCode::NO_ERROR.into()),
                b"server closed",
            );
            return Err(ServerError::Closed);
        }

        let alpn = conn
            .handshake_data()
            .and_then(|data| {
                data.downcast::<quinn::crypto::rustls::HandshakeData>()
                    .ok()
            })
            .and_then(|data| data.protocol)
            .unwrap_or_default();

        if alpn == ALPN_H3 {
            let wt = self.inner.webtransport.get_or_init(WtServer::new);
            let (conn, url) = wt.upgrade(conn, self.inner.check_origin.as_ref()).await?;

            // For WebTransport the URL path is authoritative.
            self.handle_session(conn, Some(url.path().to_string()))
                .await
        } else if alpn == ALPN_MOQ {
            self.handle_session(Conn::raw(conn), None).await
        } else {
            conn.close(
                quinn::VarInt::from_u32(SessionErrorCode::PROTOCOL_VIOLATION.into()),
                b"unsupported ALPN",
            );
            Err(ServerError::UnsupportedAlpn(
                String::from_utf8_lossy(&alpn).into_owned(),
            ))
        }
    }

    async fn handle_session(
        &self,
        conn: Conn,
        path_override: Option<String>,
    ) -> Result<(), ServerError> {
        let mut incoming = match IncomingSession::accept(&conn, self.inner.setup_timeout).await {
            Ok(incoming) => incoming,
            Err(err) => {
                conn.close(SessionErrorCode::PROTOCOL_VIOLATION.into(), b"setup failed");
                return Err(err.into());
            }
        };

        if let Some(path) = path_override {
            incoming.set_path(path);
        }

        let slot = Arc::new(OnceLock::new());
        incoming.set_slot(slot.clone());

        let entry = SessionEntry {
            conn: conn.clone(),
            session: slot,
        };

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.sessions.lock().unwrap().insert(id, entry.clone());
        let _guard = SessionGuard {
            server: self.clone(),
            id,
        };

        // Shutdown may have started while we were registering.
        if self.inner.shutting_down.load(Ordering::Acquire) {
            entry.terminate(SessionErrorCode::NO_ERROR);
            return Err(ServerError::Closed);
        }

        log::debug!(
            "session started: remote={} path={:?}",
            conn.remote_address(),
            incoming.path()
        );

        let res = self.inner.handler.serve(incoming).await;

        match res {
            // Covers both a served session and a handler that returned
            // without ever responding.
            Ok(()) => conn.close(SessionErrorCode::NO_ERROR.into(), b""),
            Err(err) => {
                log::debug!("session ended: {err}");
                conn.close(SessionErrorCode::INTERNAL_ERROR.into(), b"");
            }
        }

        Ok(())
    }

    /// Ungraceful shutdown: close every listener and terminate every session
    /// immediately, then wait for the stragglers to unwind.
    pub async fn close(&self) -> Result<(), ServerError> {
        let endpoints = self.begin_shutdown()?;

        let entries: Vec<_> = self
            .inner
            .sessions
            .lock()
            .unwrap()
            .values()
            .cloned()
            .collect();
        for entry in &entries {
            entry.terminate(SessionErrorCode::NO_ERROR);
        }

        self.await_drained().await;
        self.close_webtransport().await;
        self.close_endpoints(endpoints);
        self.await_listeners().await;

        Ok(())
    }

    /// Graceful shutdown: ask every session to drain with GOAWAY, then wait
    /// for them to leave. Sessions still around when `deadline` resolves are
    /// terminated with `GOAWAY_TIMEOUT`.
    pub async fn shutdown(&self, deadline: impl Future<Output = ()>) -> Result<(), ServerError> {
        let endpoints = self.begin_shutdown()?;

        let entries: Vec<_> = self
            .inner
            .sessions
            .lock()
            .unwrap()
            .values()
            .cloned()
            .collect();
        futures::future::join_all(entries.iter().map(|entry| entry.go_away())).await;

        if self.inner.sessions.lock().unwrap().is_empty() {
            self.inner.done.cancel();
        }

        tokio::select! {
            _ = self.inner.done.cancelled() => {}
            () = deadline => {
                let entries: Vec<_> = self
                    .inner
                    .sessions
                    .lock()
                    .unwrap()
                    .values()
                    .cloned()
                    .collect();
                for entry in &entries {
                    entry.terminate(SessionErrorCode::GOAWAY_TIMEOUT);
                }

                self.inner.done.cancelled().await;
            }
        }

        self.close_webtransport().await;
        self.close_endpoints(endpoints);
        self.await_listeners().await;

        Ok(())
    }

    /// Resolves once shutdown has been requested and the last session is
    /// gone.
    pub async fn done(&self) {
        self.inner.done.cancelled().await
    }

    fn begin_shutdown(&self) -> Result<Vec<quinn::Endpoint>, ServerError> {
        if self.inner.shutting_down.swap(true, Ordering::SeqCst) {
            return Err(ServerError::Closed);
        }

        self.inner.shutdown.cancel();

        // Stop tracking the listeners now; they're closed only after the
        // sessions drain, since they share their endpoints.
        Ok(self
            .inner
            .listeners
            .lock()
            .unwrap()
            .drain()
            .map(|(_, endpoint)| endpoint)
            .collect())
    }

    async fn await_drained(&self) {
        if self.inner.sessions.lock().unwrap().is_empty() {
            self.inner.done.cancel();
        }
        self.inner.done.cancelled().await;
    }

    // The underlying WebTransport teardown gets a bounded amount of time and
    // no chance to take the shutdown path down with it.
    async fn close_webtransport(&self) {
        if let Some(wt) = self.inner.webtransport.get() {
            let close = std::panic::AssertUnwindSafe(wt.close()).catch_unwind();
            if tokio::time::timeout(WEBTRANSPORT_CLOSE_TIMEOUT, close)
                .await
                .is_err()
            {
                log::warn!("webtransport close timed out");
            }
        }
    }

    fn close_endpoints(&self, endpoints: Vec<quinn::Endpoint>) {
        for endpoint in endpoints {
            endpoint.close(quinn::VarInt::from_u32(0), b"server closed");
        }

        // A listener that registered while shutdown was starting.
        let stragglers: Vec<_> = self
            .inner
            .listeners
            .lock()
            .unwrap()
            .drain()
            .map(|(_, endpoint)| endpoint)
            .collect();
        for endpoint in stragglers {
            endpoint.close(quinn::VarInt::from_u32(0), b"server closed");
        }
    }

    async fn await_listeners(&self) {
        let mut count = self.inner.listener_count.subscribe();
        let _ = count.wait_for(|count| *count == 0).await;
    }
}
