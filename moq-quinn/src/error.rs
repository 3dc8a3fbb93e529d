use std::sync::Arc;

use thiserror::Error;

use moq_proto::{DecodeError, StreamErrorCode};

/// An error terminating the whole connection, as opposed to a single stream.
#[derive(Error, Debug, Clone)]
pub enum SessionError {
    #[error("connection error: {0}")]
    Connection(#[from] quinn::ConnectionError),

    #[error("webtransport error: {0}")]
    WebTransport(#[from] WebTransportError),
}

/// An error reading or writing the WebTransport framing around a stream.
#[derive(Error, Debug, Clone)]
pub enum WebTransportError {
    #[error("read error: {0}")]
    ReadError(#[from] quinn::ReadExactError),

    #[error("write error: {0}")]
    WriteError(#[from] quinn::WriteError),
}

/// An error writing to a send stream.
///
/// Application error codes are already translated out of the HTTP/3 reserved
/// space when the stream belongs to a WebTransport session.
#[derive(Error, Debug, Clone)]
pub enum WriteError {
    #[error("STOP_SENDING received: {0}")]
    Stopped(u32),

    #[error("invalid STOP_SENDING code: {0}")]
    InvalidStopped(u64),

    #[error("session error: {0}")]
    Session(#[from] SessionError),

    #[error("stream closed")]
    Closed,
}

/// An error reading from a receive stream.
#[derive(Error, Debug, Clone)]
pub enum ReadError {
    #[error("RESET_STREAM received: {0}")]
    Reset(u32),

    #[error("invalid RESET_STREAM code: {0}")]
    InvalidReset(u64),

    #[error("session error: {0}")]
    Session(#[from] SessionError),

    #[error("stream closed")]
    Closed,
}

/// An error reading an exact number of bytes.
#[derive(Error, Debug, Clone)]
pub enum ReadExactError {
    #[error("stream finished after {0} bytes")]
    FinishedEarly(usize),

    #[error("read error: {0}")]
    Read(#[from] ReadError),
}

/// An error decoding a message from a stream.
#[derive(Error, Debug, Clone)]
pub enum CodingError {
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("read error: {0}")]
    Read(#[from] ReadError),

    #[error("stream ended mid-message")]
    UnexpectedEnd,
}

/// A terminal error on a group stream.
#[derive(Error, Debug, Clone)]
pub enum GroupError {
    #[error("cancelled: {0}")]
    Cancelled(StreamErrorCode),

    #[error("group closed")]
    Closed,

    #[error("write error: {0}")]
    Write(#[from] WriteError),

    #[error("read error: {0}")]
    Read(#[from] ReadError),

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("frame truncated by the peer")]
    Truncated,
}

impl From<CodingError> for GroupError {
    fn from(err: CodingError) -> Self {
        match err {
            CodingError::Decode(err) => Self::Decode(err),
            CodingError::Read(err) => Self::Read(err),
            CodingError::UnexpectedEnd => Self::Truncated,
        }
    }
}

/// An error during the setup exchange on the session stream.
#[derive(Error, Debug, Clone)]
pub enum SetupError {
    #[error("setup timed out")]
    Timeout,

    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// The peer reset the session stream with an application error code,
    /// which is worth telling apart from a garbled message.
    #[error("peer aborted setup: code={0}")]
    Application(u32),

    #[error("decode error: {0}")]
    Decode(DecodeError),

    #[error("unexpected stream type: {0}")]
    UnexpectedStream(u64),

    #[error("session stream ended during setup")]
    UnexpectedEnd,

    #[error("no mutually supported version")]
    Version,

    #[error("read error: {0}")]
    Read(ReadError),

    #[error("write error: {0}")]
    Write(#[from] WriteError),
}

impl From<CodingError> for SetupError {
    fn from(err: CodingError) -> Self {
        match err {
            CodingError::Decode(err) => Self::Decode(err),
            CodingError::Read(ReadError::Reset(code)) => Self::Application(code),
            CodingError::Read(err) => Self::Read(err),
            CodingError::UnexpectedEnd => Self::UnexpectedEnd,
        }
    }
}

/// Anything that can go wrong while serving an established session.
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    #[error("setup error: {0}")]
    Setup(#[from] SetupError),

    #[error("group error: {0}")]
    Group(#[from] GroupError),

    #[error("write error: {0}")]
    Write(#[from] WriteError),

    #[error("read error: {0}")]
    Read(#[from] ReadError),

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("stream ended mid-message")]
    UnexpectedEnd,

    #[error("unexpected stream type: {0}")]
    UnexpectedStream(u64),
}

impl From<CodingError> for Error {
    fn from(err: CodingError) -> Self {
        match err {
            CodingError::Decode(err) => Self::Decode(err),
            CodingError::Read(err) => Self::Read(err),
            CodingError::UnexpectedEnd => Self::UnexpectedEnd,
        }
    }
}

/// An error returned by the server lifecycle.
#[derive(Error, Debug, Clone)]
pub enum ServerError {
    /// The server is, or became, shut down.
    #[error("server closed")]
    Closed,

    #[error("io error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("rustls error: {0}")]
    Rustls(#[from] rustls::Error),

    #[error("unsupported ALPN: {0:?}")]
    UnsupportedAlpn(String),

    #[error("connection error: {0}")]
    Connection(#[from] quinn::ConnectionError),

    #[error("failed to exchange h3 settings: {0}")]
    Settings(#[from] SettingsError),

    #[error("failed to exchange h3 connect: {0}")]
    Connect(#[from] ConnectError),

    #[error("origin rejected")]
    OriginRejected,

    #[error("setup error: {0}")]
    Setup(#[from] SetupError),
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

/// An error during the h3 SETTINGS exchange.
#[derive(Error, Debug, Clone)]
pub enum SettingsError {
    #[error("quic stream was closed early")]
    UnexpectedEnd,

    #[error("protocol error: {0}")]
    Proto(#[from] web_transport_proto::SettingsError),

    #[error("WebTransport is not supported by the peer")]
    WebTransportUnsupported,

    #[error("connection error: {0}")]
    Connection(#[from] quinn::ConnectionError),

    #[error("read error: {0}")]
    Read(#[from] quinn::ReadError),

    #[error("write error: {0}")]
    Write(#[from] quinn::WriteError),
}

/// An error during the h3 CONNECT exchange.
#[derive(Error, Debug, Clone)]
pub enum ConnectError {
    #[error("quic stream was closed early")]
    UnexpectedEnd,

    #[error("protocol error: {0}")]
    Proto(Arc<web_transport_proto::ConnectError>),

    #[error("connection error: {0}")]
    Connection(#[from] quinn::ConnectionError),

    #[error("read error: {0}")]
    Read(#[from] quinn::ReadError),

    #[error("write error: {0}")]
    Write(#[from] quinn::WriteError),
}

impl From<web_transport_proto::ConnectError> for ConnectError {
    fn from(err: web_transport_proto::ConnectError) -> Self {
        Self::Proto(Arc::new(err))
    }
}
