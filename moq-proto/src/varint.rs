use std::fmt;

use bytes::{Buf, BufMut};
use thiserror::Error;

/// The decode buffer ended before a full varint was available.
///
/// Nothing is consumed from the buffer, so the caller can read more data and
/// retry the decode.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unexpected end of buffer")]
pub struct UnexpectedEnd;

/// The value is too large to be encoded as a QUIC varint.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("value out of varint range")]
pub struct BoundsExceeded;

/// An integer less than 2^62, QUIC's variable-length wire encoding.
///
/// The top two bits of the first byte select a 1, 2, 4 or 8 byte encoding.
#[derive(Default, Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VarInt(u64);

impl VarInt {
    pub const MAX: Self = Self((1 << 62) - 1);

    /// Construct from a u32, which always fits.
    pub const fn from_u32(value: u32) -> Self {
        Self(value as u64)
    }

    pub const fn into_inner(self) -> u64 {
        self.0
    }

    /// The number of bytes this value occupies on the wire.
    pub const fn size(self) -> usize {
        match self.0 {
            0..=0x3f => 1,
            0x40..=0x3fff => 2,
            0x4000..=0x3fff_ffff => 4,
            _ => 8,
        }
    }

    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self, UnexpectedEnd> {
        if !buf.has_remaining() {
            return Err(UnexpectedEnd);
        }

        // Peek at the first byte; the length is in the top two bits.
        let first = buf.chunk()[0];
        let size = 1usize << (first >> 6);

        if buf.remaining() < size {
            return Err(UnexpectedEnd);
        }

        let mut bytes = [0u8; 8];
        buf.copy_to_slice(&mut bytes[..size]);
        bytes[0] &= 0b0011_1111;

        let value = match size {
            1 => bytes[0] as u64,
            2 => u16::from_be_bytes([bytes[0], bytes[1]]) as u64,
            4 => u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as u64,
            _ => u64::from_be_bytes(bytes),
        };

        Ok(Self(value))
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        let x = self.0;
        if x < (1 << 6) {
            buf.put_u8(x as u8);
        } else if x < (1 << 14) {
            buf.put_u16(0b01 << 14 | x as u16);
        } else if x < (1 << 30) {
            buf.put_u32(0b10 << 30 | x as u32);
        } else {
            buf.put_u64(0b11 << 62 | x);
        }
    }
}

impl From<u8> for VarInt {
    fn from(value: u8) -> Self {
        Self(value as u64)
    }
}

impl From<u16> for VarInt {
    fn from(value: u16) -> Self {
        Self(value as u64)
    }
}

impl From<u32> for VarInt {
    fn from(value: u32) -> Self {
        Self(value as u64)
    }
}

impl TryFrom<u64> for VarInt {
    type Error = BoundsExceeded;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        if value > Self::MAX.0 {
            return Err(BoundsExceeded);
        }
        Ok(Self(value))
    }
}

impl TryFrom<usize> for VarInt {
    type Error = BoundsExceeded;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        Self::try_from(value as u64)
    }
}

impl From<VarInt> for u64 {
    fn from(value: VarInt) -> Self {
        value.0
    }
}

impl fmt::Display for VarInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    fn round_trip(value: u64) {
        let v = VarInt::try_from(value).unwrap();

        let mut buf = Vec::new();
        v.encode(&mut buf);
        assert_eq!(buf.len(), v.size());

        let mut cursor = Cursor::new(&buf);
        let decoded = VarInt::decode(&mut cursor).unwrap();
        assert_eq!(decoded, v);
        assert_eq!(cursor.position() as usize, buf.len());
    }

    #[test]
    fn boundaries() {
        for value in [
            0,
            1,
            (1 << 6) - 1,
            1 << 6,
            (1 << 14) - 1,
            1 << 14,
            (1 << 30) - 1,
            1 << 30,
            (1 << 62) - 1,
        ] {
            round_trip(value);
        }
    }

    #[test]
    fn bounds() {
        assert_eq!(VarInt::try_from(1u64 << 62), Err(BoundsExceeded));
        assert_eq!(VarInt::try_from(u64::MAX), Err(BoundsExceeded));
    }

    #[test]
    fn incomplete() {
        // A four byte encoding with only three bytes available.
        let mut buf = Vec::new();
        VarInt::from_u32(1 << 20).encode(&mut buf);
        assert_eq!(buf.len(), 4);

        let mut cursor = Cursor::new(&buf[..3]);
        assert_eq!(VarInt::decode(&mut cursor), Err(UnexpectedEnd));

        // Nothing was consumed, so a retry with the full buffer works.
        assert_eq!(cursor.position(), 0);
        let mut cursor = Cursor::new(&buf);
        assert_eq!(
            VarInt::decode(&mut cursor).unwrap(),
            VarInt::from_u32(1 << 20)
        );
    }

    // The example encodings from RFC 9000 appendix A.1.
    #[test]
    fn wire_form() {
        let mut buf = Vec::new();
        VarInt::from_u32(37).encode(&mut buf);
        assert_eq!(buf, [0x25]);

        buf.clear();
        VarInt::from_u32(15293).encode(&mut buf);
        assert_eq!(buf, [0x7b, 0xbd]);

        buf.clear();
        VarInt::from_u32(494_878_333).encode(&mut buf);
        assert_eq!(buf, [0x9d, 0x7f, 0x3e, 0x7d]);

        buf.clear();
        VarInt::try_from(151_288_809_941_952_652u64)
            .unwrap()
            .encode(&mut buf);
        assert_eq!(buf, [0xc2, 0x19, 0x7c, 0x5e, 0xff, 0x14, 0xe8, 0x8c]);
    }
}
