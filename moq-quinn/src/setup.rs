use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures::future::BoxFuture;

use moq_proto::{
    ParameterType, Parameters, SessionClient, SessionErrorCode, SessionServer, StreamType, Version,
};

use crate::{Conn, Error, QuicRecvStream, QuicSendStream, Reader, Session, SetupError, Writer};

/// The decoded setup offer, immutable once handed to the handler.
///
/// `path` comes from the PATH extension parameter; for WebTransport sessions
/// it is overridden by the HTTP request's URL path, which is authoritative.
#[derive(Debug, Clone)]
pub struct SetupRequest {
    pub path: String,
    pub versions: Vec<Version>,
    pub extensions: Parameters,
}

/// An accepted session stream, waiting for the application to accept or
/// reject the session.
pub struct IncomingSession {
    conn: Conn,
    writer: Writer<QuicSendStream>,
    reader: Reader<QuicRecvStream>,
    request: SetupRequest,

    // Publishes the established session back to the server's registry.
    slot: Option<Arc<OnceLock<Session>>>,
}

impl IncomingSession {
    /// Accept the first bidirectional stream and decode the setup offer,
    /// bounded by the setup timeout.
    pub async fn accept(conn: &Conn, timeout: Duration) -> Result<Self, SetupError> {
        let (send, recv) = tokio::time::timeout(timeout, conn.accept_bi())
            .await
            .map_err(|_| SetupError::Timeout)??;

        let writer = Writer::new(send);
        let mut reader = Reader::new(recv);

        let typ: StreamType = reader.decode().await?;
        if typ != StreamType::SESSION {
            return Err(SetupError::UnexpectedStream(typ.0.into_inner()));
        }

        let client: SessionClient = reader.decode().await?;
        let path = client
            .parameters
            .get_string(ParameterType::PATH)
            .unwrap_or_default();

        Ok(Self {
            conn: conn.clone(),
            writer,
            reader,
            request: SetupRequest {
                path,
                versions: client.versions,
                extensions: client.parameters,
            },
            slot: None,
        })
    }

    pub fn request(&self) -> &SetupRequest {
        &self.request
    }

    pub fn path(&self) -> &str {
        &self.request.path
    }

    pub(crate) fn set_path(&mut self, path: String) {
        self.request.path = path;
    }

    pub(crate) fn set_slot(&mut self, slot: Arc<OnceLock<Session>>) {
        self.slot = Some(slot);
    }

    /// Accept the offer: answer with the selected version and the given
    /// extensions, and return the established session.
    pub async fn accept_session(mut self, extensions: Parameters) -> Result<Session, Error> {
        if !self.request.versions.contains(&Version::CURRENT) {
            self.conn.close(
                SessionErrorCode::UNSUPPORTED_VERSION.into(),
                b"unsupported version",
            );
            return Err(SetupError::Version.into());
        }

        let msg = SessionServer {
            version: Version::CURRENT,
            parameters: extensions,
        };
        self.writer.encode(&msg).await.map_err(SetupError::Write)?;

        let session = Session::new(self.conn, self.writer, self.reader, self.request);

        if let Some(slot) = &self.slot {
            slot.set(session.clone()).ok();
        }

        Ok(session)
    }

    /// Refuse the session, closing the connection.
    pub fn reject(self, code: SessionErrorCode) {
        self.conn.close(code.into(), b"session rejected");
    }
}

/// Decides what to do with each session offer: typically `accept_session`,
/// then drive groups until the peer leaves.
///
/// A handler that returns without accepting simply closes the connection
/// with `NO_ERROR`.
pub trait SetupHandler: Send + Sync + 'static {
    fn serve(&self, session: IncomingSession) -> BoxFuture<'static, Result<(), Error>>;
}

impl<F, Fut> SetupHandler for F
where
    F: Fn(IncomingSession) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<(), Error>> + Send + 'static,
{
    fn serve(&self, session: IncomingSession) -> BoxFuture<'static, Result<(), Error>> {
        Box::pin(self(session))
    }
}

// Accept every session and idle until the peer closes it.
pub(crate) fn default_handler() -> Arc<dyn SetupHandler> {
    Arc::new(|incoming: IncomingSession| async move {
        let session = incoming.accept_session(Parameters::new()).await?;
        session.closed().await;
        Ok(())
    })
}
