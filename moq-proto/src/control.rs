use bytes::{Buf, BufMut};

use crate::{Decode, DecodeError, Encode, VarInt};

/// The tag in front of every message on the session stream after setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ControlMessageType(pub VarInt);

macro_rules! control_message_types {
    {$($name:ident = $val:expr,)*} => {
        impl ControlMessageType {
            $(pub const $name: ControlMessageType = ControlMessageType(VarInt::from_u32($val));)*
        }
    }
}

control_message_types! {
    SESSION_UPDATE = 0x00,
    GOAWAY = 0x01,
}

impl Encode for ControlMessageType {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.0.encode(buf)
    }
}

impl Decode for ControlMessageType {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        Ok(Self(VarInt::decode(buf)?))
    }
}

/// Asks the peer to drain and reconnect, optionally somewhere else.
///
/// An empty URI means "wrap up here"; a non-empty one names the replacement
/// endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GoAway {
    pub new_session_uri: String,
}

impl Encode for GoAway {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        ControlMessageType::GOAWAY.encode(buf);
        self.new_session_uri.encode(buf);
    }
}

impl Decode for GoAway {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        Ok(Self {
            new_session_uri: String::decode(buf)?,
        })
    }
}

/// Periodic session statistics, currently just the peer's estimated bitrate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionUpdate {
    pub bitrate: u64,
}

impl Encode for SessionUpdate {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        ControlMessageType::SESSION_UPDATE.encode(buf);
        self.bitrate.encode(buf);
    }
}

impl Decode for SessionUpdate {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        Ok(Self {
            bitrate: u64::decode(buf)?,
        })
    }
}

/// Any message that may arrive on the session stream after setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    SessionUpdate(SessionUpdate),
    GoAway(GoAway),
}

impl Decode for ControlMessage {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        let typ = ControlMessageType::decode(buf)?;
        match typ {
            ControlMessageType::SESSION_UPDATE => {
                Ok(Self::SessionUpdate(SessionUpdate::decode(buf)?))
            }
            ControlMessageType::GOAWAY => Ok(Self::GoAway(GoAway::decode(buf)?)),
            other => Err(DecodeError::UnknownControlType(other.0.into_inner())),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn goaway_round_trip() {
        let msg = GoAway {
            new_session_uri: "https://relay2.example.net/moq".to_string(),
        };

        let mut buf = Vec::new();
        msg.encode(&mut buf);

        match ControlMessage::decode(&mut buf.as_slice()).unwrap() {
            ControlMessage::GoAway(decoded) => assert_eq!(decoded, msg),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn update_round_trip() {
        let msg = SessionUpdate { bitrate: 2_500_000 };

        let mut buf = Vec::new();
        msg.encode(&mut buf);

        match ControlMessage::decode(&mut buf.as_slice()).unwrap() {
            ControlMessage::SessionUpdate(decoded) => assert_eq!(decoded, msg),
            other => panic!("unexpected message: {other:?}"),
        }
    }
}
