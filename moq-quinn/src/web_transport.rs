use std::io::Cursor;
use std::sync::Mutex;

use url::Url;

use web_transport_proto::{ConnectRequest, ConnectResponse};

use crate::{Conn, ConnectError, OriginCheck, SettingsError};

// HTTP/3 H3_NO_ERROR, used when we close a WebTransport connection ourselves.
const H3_NO_ERROR: u32 = 0x100;

// Pull chunks off the stream until `decode` produces a message. `Ok(None)`
// from `decode` means it ran out of buffered bytes and wants more; the
// stream ending first yields `Ok(None)` to the caller. This is the same
// buffered-decode contract as `coding::Reader`, restated for the h3 wire
// types, which report "more data needed" as an error variant.
async fn recv_h3_message<T, E: From<quinn::ReadError>>(
    recv: &mut quinn::RecvStream,
    mut decode: impl FnMut(&[u8]) -> Result<Option<T>, E>,
) -> Result<Option<T>, E> {
    let mut pending = Vec::new();

    loop {
        let chunk = match recv.read_chunk(usize::MAX, true).await? {
            Some(chunk) => chunk,
            None => return Ok(None),
        };
        pending.extend_from_slice(&chunk.bytes);

        if let Some(msg) = decode(&pending)? {
            return Ok(Some(msg));
        }
    }
}

// The SETTINGS we advertise: datagrams on, WebTransport enabled via both the
// current and the pre-draft-07 bits so older clients still connect.
fn advertised_settings() -> web_transport_proto::Settings {
    let mut settings = web_transport_proto::Settings::default();
    settings.enable_webtransport(1);
    settings
}

/// The h3 control streams, kept open for the lifetime of the session.
pub(crate) struct Settings {
    #[allow(dead_code)]
    send: quinn::SendStream,

    #[allow(dead_code)]
    recv: quinn::RecvStream,
}

impl Settings {
    /// Exchange SETTINGS on the h3 control streams, refusing peers that
    /// don't advertise WebTransport support.
    pub async fn exchange(conn: &quinn::Connection) -> Result<Self, SettingsError> {
        // Ours goes out first; a SETTINGS frame is far too small to block on
        // flow control, so there's no need to run the directions in parallel.
        let mut frame = Vec::new();
        advertised_settings().encode(&mut frame);

        let mut send = conn.open_uni().await?;
        send.write_all(&frame).await?;

        let mut recv = conn.accept_uni().await?;
        let theirs = recv_h3_message(&mut recv, |bytes| {
            match web_transport_proto::Settings::decode(&mut Cursor::new(bytes)) {
                Ok(settings) => Ok(Some(settings)),
                Err(web_transport_proto::SettingsError::UnexpectedEnd) => Ok(None),
                Err(err) => Err(SettingsError::from(err)),
            }
        })
        .await?
        .ok_or(SettingsError::UnexpectedEnd)?;

        log::debug!("peer SETTINGS: {theirs:?}");

        if theirs.supports_webtransport() == 0 {
            return Err(SettingsError::WebTransportUnsupported);
        }

        Ok(Self { send, recv })
    }
}

/// A decoded CONNECT request, waiting for a response.
pub(crate) struct Connect {
    request: ConnectRequest,

    send: quinn::SendStream,
    recv: quinn::RecvStream,
}

impl Connect {
    /// Accept the stream carrying the HTTP CONNECT request and decode it.
    pub async fn accept(conn: &quinn::Connection) -> Result<Self, ConnectError> {
        let (send, mut recv) = conn.accept_bi().await?;

        let request = recv_h3_message(&mut recv, |bytes| {
            match ConnectRequest::decode(&mut Cursor::new(bytes)) {
                Ok(request) => Ok(Some(request)),
                Err(web_transport_proto::ConnectError::UnexpectedEnd) => Ok(None),
                Err(err) => Err(ConnectError::from(err)),
            }
        })
        .await?
        .ok_or(ConnectError::UnexpectedEnd)?;

        log::debug!("CONNECT request: {request:?}");

        Ok(Self {
            request,
            send,
            recv,
        })
    }

    /// Answer the request, accepting (200) or rejecting the session.
    pub async fn respond(&mut self, status: http::StatusCode) -> Result<(), quinn::WriteError> {
        log::debug!("CONNECT response: {status}");

        let mut frame = Vec::new();
        ConnectResponse { status }.encode(&mut frame);
        self.send.write_all(&frame).await
    }

    pub fn url(&self) -> &Url {
        &self.request.url
    }

    // The session ID is the stream ID of the CONNECT request.
    pub fn session_id(&self) -> u64 {
        quinn::VarInt::from(self.send.id()).into_inner()
    }

    pub fn into_parts(self) -> (quinn::SendStream, quinn::RecvStream) {
        (self.send, self.recv)
    }
}

/// The WebTransport side of the server: performs the h3 upgrade and tracks
/// the upgraded connections so shutdown can drain them.
///
/// Initialized lazily on the first h3 connection.
pub(crate) struct WtServer {
    conns: Mutex<Vec<quinn::Connection>>,
}

impl WtServer {
    pub fn new() -> Self {
        Self {
            conns: Mutex::new(Vec::new()),
        }
    }

    /// Exchange SETTINGS, accept the CONNECT request, consult the origin
    /// check, and answer it. Returns the upgraded connection and the request
    /// URL, whose path is authoritative for the session.
    pub async fn upgrade(
        &self,
        conn: quinn::Connection,
        check_origin: Option<&OriginCheck>,
    ) -> Result<(Conn, Url), crate::ServerError> {
        let settings = Settings::exchange(&conn).await?;
        let mut connect = Connect::accept(&conn).await?;

        if let Some(check) = check_origin {
            if !check(connect.url()) {
                connect
                    .respond(http::StatusCode::FORBIDDEN)
                    .await
                    .map_err(ConnectError::from)?;
                return Err(crate::ServerError::OriginRejected);
            }
        }

        connect
            .respond(http::StatusCode::OK)
            .await
            .map_err(ConnectError::from)?;

        let url = connect.url().clone();

        self.conns.lock().unwrap().push(conn.clone());

        Ok((Conn::webtransport(conn, settings, connect), url))
    }

    /// Close every upgraded connection that is still alive.
    pub async fn close(&self) {
        let conns = std::mem::take(&mut *self.conns.lock().unwrap());

        for conn in &conns {
            conn.close(quinn::VarInt::from_u32(H3_NO_ERROR), b"server shutting down");
        }

        for conn in conns {
            conn.closed().await;
        }
    }
}
