use crate::{ReadError, RecvStream, SendStream, SessionError, WriteError};

/// How application error codes appear on the wire.
///
/// Raw MOQ sessions use the codes directly; WebTransport sessions share the
/// error space with HTTP/3, so codes are folded into the reserved range on
/// the way out and recovered on the way in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CodeSpace {
    Raw,
    WebTransport,
}

impl CodeSpace {
    fn encode(self, code: u32) -> quinn::VarInt {
        match self {
            Self::Raw => quinn::VarInt::from_u32(code),
            Self::WebTransport => web_transport_proto::error_to_http3(code)
                .try_into()
                .unwrap(),
        }
    }

    fn decode(self, code: quinn::VarInt) -> Result<u32, u64> {
        match self {
            Self::Raw => u32::try_from(code.into_inner()).map_err(|_| code.into_inner()),
            Self::WebTransport => {
                web_transport_proto::error_from_http3(code.into_inner()).ok_or(code.into_inner())
            }
        }
    }
}

/// A send stream over Quinn. See [`quinn::SendStream`].
#[derive(Debug)]
pub struct QuicSendStream {
    stream: quinn::SendStream,
    space: CodeSpace,
}

impl QuicSendStream {
    pub(crate) fn new(stream: quinn::SendStream, space: CodeSpace) -> Self {
        Self { stream, space }
    }

    fn map_write(&self, err: quinn::WriteError) -> WriteError {
        match err {
            quinn::WriteError::Stopped(code) => match self.space.decode(code) {
                Ok(code) => WriteError::Stopped(code),
                Err(code) => WriteError::InvalidStopped(code),
            },
            quinn::WriteError::ConnectionLost(err) => WriteError::Session(err.into()),
            quinn::WriteError::ClosedStream => WriteError::Closed,
            quinn::WriteError::ZeroRttRejected => unreachable!("0-RTT not supported"),
        }
    }

    pub fn set_priority(&self, order: i32) {
        self.stream.set_priority(order).ok();
    }
}

impl SendStream for QuicSendStream {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, WriteError> {
        self.stream.write(buf).await.map_err(|e| self.map_write(e))
    }

    fn finish(&mut self) {
        self.stream.finish().ok();
    }

    fn reset(&mut self, code: u32) {
        self.stream.reset(self.space.encode(code)).ok();
    }

    async fn closed(&mut self) -> Result<(), WriteError> {
        match self.stream.stopped().await {
            Ok(_) => Ok(()),
            Err(quinn::StoppedError::ConnectionLost(err)) => {
                Err(WriteError::Session(SessionError::Connection(err)))
            }
            Err(quinn::StoppedError::ZeroRttRejected) => unreachable!("0-RTT not supported"),
        }
    }
}

/// A receive stream over Quinn. See [`quinn::RecvStream`].
#[derive(Debug)]
pub struct QuicRecvStream {
    stream: quinn::RecvStream,
    space: CodeSpace,
}

impl QuicRecvStream {
    pub(crate) fn new(stream: quinn::RecvStream, space: CodeSpace) -> Self {
        Self { stream, space }
    }

    fn map_read(&self, err: quinn::ReadError) -> ReadError {
        match err {
            quinn::ReadError::Reset(code) => match self.space.decode(code) {
                Ok(code) => ReadError::Reset(code),
                Err(code) => ReadError::InvalidReset(code),
            },
            quinn::ReadError::ConnectionLost(err) => ReadError::Session(err.into()),
            quinn::ReadError::ClosedStream => ReadError::Closed,
            quinn::ReadError::IllegalOrderedRead => unreachable!("unordered reads not used"),
            quinn::ReadError::ZeroRttRejected => unreachable!("0-RTT not supported"),
        }
    }
}

impl RecvStream for QuicRecvStream {
    async fn read(&mut self, buf: &mut [u8]) -> Result<Option<usize>, ReadError> {
        self.stream.read(buf).await.map_err(|e| self.map_read(e))
    }

    fn stop(&mut self, code: u32) {
        self.stream.stop(self.space.encode(code)).ok();
    }

    async fn closed(&mut self) -> Result<(), ReadError> {
        match self.stream.received_reset().await {
            Ok(_) => Ok(()),
            Err(quinn::ResetError::ConnectionLost(err)) => Err(ReadError::Session(err.into())),
            Err(quinn::ResetError::ZeroRttRejected) => unreachable!("0-RTT not supported"),
        }
    }
}
