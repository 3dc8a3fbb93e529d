use std::fmt;

/// An application error code carried by CONNECTION_CLOSE when a session ends.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionErrorCode(pub u32);

macro_rules! session_error_codes {
    {$($name:ident = $val:expr,)*} => {
        impl SessionErrorCode {
            $(pub const $name: SessionErrorCode = SessionErrorCode($val);)*
        }

        impl fmt::Debug for SessionErrorCode {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match *self {
                    $(SessionErrorCode::$name => f.write_str(stringify!($name)),)*
                    SessionErrorCode(code) => write!(f, "SESSION_ERROR({code:#x})"),
                }
            }
        }
    }
}

session_error_codes! {
    NO_ERROR = 0x0,
    INTERNAL_ERROR = 0x1,
    UNAUTHORIZED = 0x2,
    PROTOCOL_VIOLATION = 0x3,
    UNSUPPORTED_VERSION = 0x4,
    GOAWAY_TIMEOUT = 0x10,
}

/// An application error code carried by RESET_STREAM or STOP_SENDING when a
/// group stream is cancelled.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamErrorCode(pub u32);

macro_rules! stream_error_codes {
    {$($name:ident = $val:expr,)*} => {
        impl StreamErrorCode {
            $(pub const $name: StreamErrorCode = StreamErrorCode($val);)*
        }

        impl fmt::Debug for StreamErrorCode {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match *self {
                    $(StreamErrorCode::$name => f.write_str(stringify!($name)),)*
                    StreamErrorCode(code) => write!(f, "STREAM_ERROR({code:#x})"),
                }
            }
        }
    }
}

stream_error_codes! {
    INTERNAL_ERROR = 0x0,
    DUPLICATED = 0x1,
    OUT_OF_RANGE = 0x2,
    EXPIRED_GROUP = 0x3,
    SUBSCRIBE_CANCELED = 0x4,
    PUBLISH_ABORTED = 0x5,
    CLOSED_SESSION = 0x6,
}

impl From<SessionErrorCode> for u32 {
    fn from(code: SessionErrorCode) -> Self {
        code.0
    }
}

impl From<StreamErrorCode> for u32 {
    fn from(code: StreamErrorCode) -> Self {
        code.0
    }
}

impl fmt::Display for SessionErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl fmt::Display for StreamErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
