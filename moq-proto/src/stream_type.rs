use bytes::{Buf, BufMut};

use crate::{Decode, DecodeError, Encode, VarInt};

/// Sent as the first varint of a bidirectional stream to identify it.
///
/// The session stream uses a distinct tag from the control streams so the
/// acceptor can refuse anything else during setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamType(pub VarInt);

macro_rules! stream_types {
    {$($name:ident = $val:expr,)*} => {
        impl StreamType {
            $(pub const $name: StreamType = StreamType(VarInt::from_u32($val));)*
        }
    }
}

stream_types! {
    SESSION = 0x00,
    ANNOUNCE = 0x01,
    SUBSCRIBE = 0x02,
}

impl Encode for StreamType {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.0.encode(buf)
    }
}

impl Decode for StreamType {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        Ok(Self(VarInt::decode(buf)?))
    }
}

/// Sent as the first varint of a unidirectional data stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DataStreamType(pub VarInt);

macro_rules! data_stream_types {
    {$($name:ident = $val:expr,)*} => {
        impl DataStreamType {
            $(pub const $name: DataStreamType = DataStreamType(VarInt::from_u32($val));)*
        }
    }
}

data_stream_types! {
    GROUP = 0x00,
}

impl Encode for DataStreamType {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.0.encode(buf)
    }
}

impl Decode for DataStreamType {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        Ok(Self(VarInt::decode(buf)?))
    }
}
