use bytes::{Buf, BufMut, Bytes};
use thiserror::Error;

use crate::{BoundsExceeded, UnexpectedEnd, VarInt};

/// A message that can fail to decode.
///
/// [DecodeError::UnexpectedEnd] means more data is needed. Callers decode
/// against a throwaway cursor and only commit consumed bytes on success, so
/// the whole message is retried once more data has been buffered.
#[derive(Error, Debug, Clone)]
pub enum DecodeError {
    #[error("unexpected end of buffer")]
    UnexpectedEnd,

    #[error("varint out of range")]
    BoundsExceeded,

    #[error("invalid UTF-8 string")]
    InvalidString(#[from] std::string::FromUtf8Error),

    #[error("unknown stream type: {0}")]
    UnknownStreamType(u64),

    #[error("unknown control message type: {0}")]
    UnknownControlType(u64),
}

impl From<UnexpectedEnd> for DecodeError {
    fn from(_: UnexpectedEnd) -> Self {
        Self::UnexpectedEnd
    }
}

impl From<BoundsExceeded> for DecodeError {
    fn from(_: BoundsExceeded) -> Self {
        Self::BoundsExceeded
    }
}

pub trait Encode {
    fn encode<B: BufMut>(&self, buf: &mut B);
}

pub trait Decode: Sized {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError>;
}

impl Encode for VarInt {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        Self::encode(self, buf)
    }
}

impl Decode for VarInt {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        Ok(Self::decode(buf)?)
    }
}

impl Encode for u64 {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        VarInt::try_from(*self).expect("value out of varint range").encode(buf)
    }
}

impl Decode for u64 {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        Ok(VarInt::decode(buf)?.into_inner())
    }
}

impl Encode for String {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.as_str().encode(buf)
    }
}

impl Encode for &str {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        VarInt::try_from(self.len())
            .expect("string too long")
            .encode(buf);
        buf.put_slice(self.as_bytes());
    }
}

impl Decode for String {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        let size = VarInt::decode(buf)?.into_inner() as usize;
        if buf.remaining() < size {
            return Err(DecodeError::UnexpectedEnd);
        }

        let mut bytes = vec![0u8; size];
        buf.copy_to_slice(&mut bytes);

        Ok(String::from_utf8(bytes)?)
    }
}

impl Encode for Bytes {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        VarInt::try_from(self.len())
            .expect("payload too long")
            .encode(buf);
        buf.put_slice(self);
    }
}

impl Decode for Bytes {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        let size = VarInt::decode(buf)?.into_inner() as usize;
        if buf.remaining() < size {
            return Err(DecodeError::UnexpectedEnd);
        }

        Ok(buf.copy_to_bytes(size))
    }
}
