use std::sync::Arc;

use bytes::{Buf, BytesMut};
use tokio::sync::{mpsc, Mutex};

use moq_proto::VarInt;

use crate::{
    quic::CodeSpace, web_transport::Connect, web_transport::Settings, QuicRecvStream,
    QuicSendStream, SessionError, WebTransportError,
};

// The WebTransport wire tags this server has to recognize. Unidirectional
// streams announce a stream type; bidirectional streams a frame type. The h3
// layer also opens its own plumbing streams over the same connection.
const H3_STREAM_CONTROL: u64 = 0x00;
const H3_STREAM_QPACK_ENCODER: u64 = 0x02;
const H3_STREAM_QPACK_DECODER: u64 = 0x03;
const H3_STREAM_WEBTRANSPORT: u64 = 0x54;
const H3_FRAME_WEBTRANSPORT: u64 = 0x41;

// How many classified streams may queue before the routers stop accepting.
const STREAM_BACKLOG: usize = 8;

/// One accepted transport connection, either raw MOQ over QUIC or a
/// WebTransport session.
///
/// The two differ below the MOQ layer: WebTransport prefixes every stream
/// with a type tag and the session ID, and its error codes share the HTTP/3
/// reserved space. Raw MOQ streams carry neither. One concrete type keeps
/// everything above (setup, sessions, groups) transport-agnostic without
/// being generic.
#[derive(Clone)]
pub struct Conn {
    conn: quinn::Connection,
    mode: Mode,
}

#[derive(Clone)]
enum Mode {
    Raw,
    WebTransport(Arc<WtSession>),
}

// The WebTransport side of a connection: the routed MOQ streams, plus the h3
// handshake streams that must stay open for the session's lifetime.
struct WtSession {
    // Group data streams, header already consumed and validated.
    groups: Mutex<mpsc::Receiver<quinn::RecvStream>>,

    // MOQ control streams (session, announce, subscribe), likewise.
    controls: Mutex<mpsc::Receiver<(quinn::SendStream, quinn::RecvStream)>>,

    session_id: u64,

    #[allow(dead_code)]
    handshake: (Settings, quinn::SendStream),
}

impl Conn {
    /// A raw MOQ connection: plain QUIC streams, no headers, no code mapping.
    pub fn raw(conn: quinn::Connection) -> Self {
        Self {
            conn,
            mode: Mode::Raw,
        }
    }

    /// An upgraded WebTransport session.
    pub(crate) fn webtransport(
        conn: quinn::Connection,
        settings: Settings,
        connect: Connect,
    ) -> Self {
        let session_id = connect.session_id();
        let (connect_send, connect_recv) = connect.into_parts();

        let (groups_tx, groups_rx) = mpsc::channel(STREAM_BACKLOG);
        let (controls_tx, controls_rx) = mpsc::channel(STREAM_BACKLOG);

        // One router per direction, so a stalled stream header in one can't
        // starve the other.
        tokio::spawn(route_uni(conn.clone(), session_id, groups_tx));
        tokio::spawn(route_bi(conn.clone(), session_id, controls_tx));

        // The peer ends a WebTransport session by closing the CONNECT stream
        // or sending a close capsule on it.
        tokio::spawn(watch_connect(conn.clone(), connect_recv));

        Self {
            conn,
            mode: Mode::WebTransport(Arc::new(WtSession {
                groups: Mutex::new(groups_rx),
                controls: Mutex::new(controls_rx),
                session_id,
                handshake: (settings, connect_send),
            })),
        }
    }

    fn space(&self) -> CodeSpace {
        match self.mode {
            Mode::Raw => CodeSpace::Raw,
            Mode::WebTransport(_) => CodeSpace::WebTransport,
        }
    }

    // The routers hang up once the connection is gone; report why.
    fn disconnected(&self) -> SessionError {
        match self.conn.close_reason() {
            Some(err) => err.into(),
            None => quinn::ConnectionError::LocallyClosed.into(),
        }
    }

    /// Accept the next bidirectional stream the peer opens.
    pub async fn accept_bi(&self) -> Result<(QuicSendStream, QuicRecvStream), SessionError> {
        let (send, recv) = match &self.mode {
            Mode::Raw => self.conn.accept_bi().await?,
            Mode::WebTransport(wt) => {
                let mut controls = wt.controls.lock().await;
                controls.recv().await.ok_or_else(|| self.disconnected())?
            }
        };

        Ok((
            QuicSendStream::new(send, self.space()),
            QuicRecvStream::new(recv, self.space()),
        ))
    }

    /// Accept the next unidirectional stream the peer opens.
    pub async fn accept_uni(&self) -> Result<QuicRecvStream, SessionError> {
        let recv = match &self.mode {
            Mode::Raw => self.conn.accept_uni().await?,
            Mode::WebTransport(wt) => {
                let mut groups = wt.groups.lock().await;
                groups.recv().await.ok_or_else(|| self.disconnected())?
            }
        };

        Ok(QuicRecvStream::new(recv, self.space()))
    }

    /// Open a unidirectional stream, prefixing the WebTransport header when
    /// the session needs one.
    pub async fn open_uni(&self) -> Result<QuicSendStream, SessionError> {
        let mut send = self.conn.open_uni().await?;

        if let Mode::WebTransport(wt) = &self.mode {
            let mut header = Vec::with_capacity(10);
            VarInt::try_from(H3_STREAM_WEBTRANSPORT).unwrap().encode(&mut header);
            VarInt::try_from(wt.session_id).unwrap().encode(&mut header);

            // The peer can't route the stream until the header arrives, so it
            // must never queue behind application data.
            send.set_priority(i32::MAX).ok();
            if let Err(err) = send.write_all(&header).await {
                return Err(match err {
                    quinn::WriteError::ConnectionLost(err) => err.into(),
                    err => WebTransportError::WriteError(err).into(),
                });
            }
            send.set_priority(0).ok();
        }

        Ok(QuicSendStream::new(send, self.space()))
    }

    /// Immediately close the connection with an application error code.
    pub fn close(&self, code: u32, reason: &[u8]) {
        let code = match self.space() {
            CodeSpace::Raw => quinn::VarInt::from_u32(code),
            CodeSpace::WebTransport => web_transport_proto::error_to_http3(code)
                .try_into()
                .unwrap(),
        };

        self.conn.close(code, reason)
    }

    /// Wait until the connection is closed, returning the reason.
    pub async fn closed(&self) -> SessionError {
        self.conn.closed().await.into()
    }

    /// Why the connection closed, or `None` while it's still alive.
    pub fn close_reason(&self) -> Option<SessionError> {
        self.conn.close_reason().map(Into::into)
    }

    /// A stable identifier, unique among live connections of this endpoint.
    pub fn stable_id(&self) -> usize {
        self.conn.stable_id()
    }

    pub fn remote_address(&self) -> std::net::SocketAddr {
        self.conn.remote_address()
    }
}

// Accept unidirectional streams and sort them by their header: group data
// goes to the session, h3 plumbing is kept alive off to the side, anything
// else is dropped. Each header is consumed in its own task so one peer
// stalling mid-header can't hold up the rest.
async fn route_uni(
    conn: quinn::Connection,
    session_id: u64,
    groups: mpsc::Sender<quinn::RecvStream>,
) {
    loop {
        let mut recv = match conn.accept_uni().await {
            Ok(recv) => recv,
            Err(_) => return,
        };

        let conn = conn.clone();
        let groups = groups.clone();
        tokio::spawn(async move {
            let typ = match read_header_varint(&mut recv).await {
                Ok(typ) => typ,
                Err(_) => return,
            };

            match typ {
                H3_STREAM_WEBTRANSPORT => {
                    match read_header_varint(&mut recv).await {
                        Ok(id) if id == session_id => {
                            groups.send(recv).await.ok();
                        }
                        Ok(id) => log::warn!("stream for unknown session: {id}"),
                        Err(_) => {}
                    }
                }
                H3_STREAM_CONTROL | H3_STREAM_QPACK_ENCODER | H3_STREAM_QPACK_DECODER => {
                    // Closing these is fatal to the peer's h3 layer; hold
                    // them open until the connection dies.
                    conn.closed().await;
                    drop(recv);
                }
                other => log::debug!("ignoring unidirectional stream type: {other:#x}"),
            }
        });
    }
}

// Same routing for bidirectional streams; only MOQ control streams matter.
async fn route_bi(
    conn: quinn::Connection,
    session_id: u64,
    controls: mpsc::Sender<(quinn::SendStream, quinn::RecvStream)>,
) {
    loop {
        let (send, mut recv) = match conn.accept_bi().await {
            Ok(pair) => pair,
            Err(_) => return,
        };

        let controls = controls.clone();
        tokio::spawn(async move {
            match read_header_varint(&mut recv).await {
                Ok(H3_FRAME_WEBTRANSPORT) => match read_header_varint(&mut recv).await {
                    Ok(id) if id == session_id => {
                        controls.send((send, recv)).await.ok();
                    }
                    Ok(id) => log::warn!("stream for unknown session: {id}"),
                    Err(_) => {}
                },
                Ok(other) => log::debug!("ignoring bidirectional stream type: {other:#x}"),
                Err(_) => {}
            }
        });
    }
}

// Stream headers are a handful of bytes and the position must land exactly
// past them, so decode the varint a byte at a time straight off the stream.
async fn read_header_varint(recv: &mut quinn::RecvStream) -> Result<u64, SessionError> {
    let first = read_header_byte(recv).await?;

    let extra = match first >> 6 {
        0b00 => 0,
        0b01 => 1,
        0b10 => 3,
        _ => 7,
    };

    let mut value = (first & 0b0011_1111) as u64;
    for _ in 0..extra {
        value = (value << 8) | read_header_byte(recv).await? as u64;
    }

    Ok(value)
}

async fn read_header_byte(recv: &mut quinn::RecvStream) -> Result<u8, SessionError> {
    let mut byte = [0u8; 1];
    match recv.read_exact(&mut byte).await {
        Ok(()) => Ok(byte[0]),
        Err(quinn::ReadExactError::ReadError(quinn::ReadError::ConnectionLost(err))) => {
            Err(err.into())
        }
        Err(err) => Err(WebTransportError::ReadError(err).into()),
    }
}

// Drain the CONNECT stream until the peer closes the session, then translate
// that into a connection close.
async fn watch_connect(conn: quinn::Connection, mut recv: quinn::RecvStream) {
    let mut pending = BytesMut::new();

    let (code, reason) = loop {
        match recv.read_chunk(usize::MAX, true).await {
            Ok(Some(chunk)) => pending.extend_from_slice(&chunk.bytes),
            Ok(None) => break (0, String::new()),
            Err(_) => break (1, "connect stream lost".to_string()),
        }

        let mut cursor = std::io::Cursor::new(&pending[..]);
        match web_transport_proto::Capsule::decode(&mut cursor) {
            Ok(web_transport_proto::Capsule::CloseWebTransportSession { code, reason }) => {
                break (code, reason);
            }
            Ok(capsule) => {
                log::warn!("unexpected capsule on connect stream: {capsule:?}");
                let consumed = cursor.position() as usize;
                pending.advance(consumed);
            }
            Err(web_transport_proto::CapsuleError::UnexpectedEnd) => {} // Keep buffering.
            Err(err) => {
                log::warn!("connect stream capsule error: {err:?}");
                break (1, "malformed capsule".to_string());
            }
        }
    };

    let code = web_transport_proto::error_to_http3(code).try_into().unwrap();
    conn.close(code, reason.as_bytes());
}
