use std::sync::Arc;

use tokio::sync::Mutex;

use moq_proto::{
    ControlMessage, DataStreamType, Encode, GoAway, Group, SessionErrorCode, SessionUpdate,
    StreamErrorCode,
};

use crate::{
    Conn, Error, GroupReader, GroupWriter, QuicRecvStream, QuicSendStream, Reader, SendStream,
    SessionError, SetupRequest, TrackContext, WriteError, Writer,
};

/// An established MOQ session.
///
/// Cheap to clone; all clones share the connection and the session stream.
/// Groups are opened and accepted on demand, each on its own unidirectional
/// stream bound to the caller's track context.
#[derive(Clone)]
pub struct Session {
    conn: Conn,
    control: Arc<Mutex<Writer<QuicSendStream>>>,
    request: Arc<SetupRequest>,
}

impl Session {
    pub(crate) fn new(
        conn: Conn,
        writer: Writer<QuicSendStream>,
        reader: Reader<QuicRecvStream>,
        request: SetupRequest,
    ) -> Self {
        // Drain the session stream in the background; it ending, either
        // gracefully or not, ends the session.
        let watched = conn.clone();
        tokio::spawn(Self::run_control(watched, reader));

        Self {
            conn,
            control: Arc::new(Mutex::new(writer)),
            request: Arc::new(request),
        }
    }

    async fn run_control(conn: Conn, mut reader: Reader<QuicRecvStream>) {
        loop {
            match reader.decode_maybe::<ControlMessage>().await {
                Ok(Some(ControlMessage::SessionUpdate(update))) => {
                    log::debug!("session update: bitrate={}", update.bitrate);
                }
                Ok(Some(ControlMessage::GoAway(msg))) => {
                    log::debug!("peer sent GOAWAY: uri={:?}", msg.new_session_uri);
                }
                Ok(None) => {
                    conn.close(SessionErrorCode::NO_ERROR.into(), b"session stream closed");
                    return;
                }
                Err(crate::CodingError::Decode(err)) => {
                    log::warn!("malformed session stream: {err}");
                    conn.close(SessionErrorCode::PROTOCOL_VIOLATION.into(), b"bad control message");
                    return;
                }
                Err(err) => {
                    log::debug!("session stream ended: {err}");
                    conn.close(SessionErrorCode::NO_ERROR.into(), b"");
                    return;
                }
            }
        }
    }

    /// The setup request this session was accepted from.
    pub fn request(&self) -> &SetupRequest {
        &self.request
    }

    pub fn path(&self) -> &str {
        &self.request.path
    }

    /// Open a group data stream: write its identity, then hand the caller a
    /// writer for the frames.
    pub async fn open_group(
        &self,
        track: &TrackContext,
        group: Group,
    ) -> Result<GroupWriter<QuicSendStream>, Error> {
        let mut send = self.conn.open_uni().await?;

        let mut header = Vec::new();
        DataStreamType::GROUP.encode(&mut header);
        group.encode(&mut header);
        send.write_all(&header).await?;

        Ok(GroupWriter::new(track, send, group))
    }

    /// Accept a group data stream from the peer, decoding its identity.
    pub async fn accept_group(
        &self,
        track: &TrackContext,
    ) -> Result<GroupReader<QuicRecvStream>, Error> {
        let recv = self.conn.accept_uni().await?;
        let mut reader = Reader::new(recv);

        let typ: DataStreamType = reader.decode().await?;
        if typ != DataStreamType::GROUP {
            reader.stop(StreamErrorCode::INTERNAL_ERROR.into());
            return Err(Error::UnexpectedStream(typ.0.into_inner()));
        }

        let group: Group = reader.decode().await?;
        Ok(GroupReader::new(track, reader, group))
    }

    /// Ask the peer to drain and reconnect elsewhere. An empty URI means
    /// "wrap up here".
    pub async fn go_away(&self, new_session_uri: &str) -> Result<(), WriteError> {
        let msg = GoAway {
            new_session_uri: new_session_uri.to_string(),
        };
        self.control.lock().await.encode(&msg).await
    }

    /// Send a session update with our estimated bitrate.
    pub async fn update(&self, bitrate: u64) -> Result<(), WriteError> {
        let msg = SessionUpdate { bitrate };
        self.control.lock().await.encode(&msg).await
    }

    /// Immediately close the session and its connection.
    pub fn close(&self, code: SessionErrorCode) {
        self.conn.close(code.into(), b"");
    }

    /// Wait until the session is closed by either side.
    pub async fn closed(&self) -> SessionError {
        self.conn.closed().await
    }

    pub fn conn(&self) -> &Conn {
        &self.conn
    }
}
