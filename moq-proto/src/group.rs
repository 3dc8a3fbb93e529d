use bytes::{Buf, BufMut};

use crate::{Decode, DecodeError, Encode, VarInt};

/// Identifies one publisher group: which subscription it belongs to and its
/// position within the track.
///
/// Written once at the head of each group data stream; the frames that follow
/// carry no identity of their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Group {
    pub subscribe_id: u64,

    /// Monotonic within a track, but groups may arrive out of order.
    pub sequence: u64,
}

impl Encode for Group {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.subscribe_id.encode(buf);
        self.sequence.encode(buf);
    }
}

impl Decode for Group {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        Ok(Self {
            subscribe_id: u64::decode(buf)?,
            sequence: u64::decode(buf)?,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trip() {
        let msg = Group {
            subscribe_id: 7,
            sequence: 1 << 40,
        };

        let mut buf = Vec::new();
        msg.encode(&mut buf);

        assert_eq!(Group::decode(&mut buf.as_slice()).unwrap(), msg);
    }
}
