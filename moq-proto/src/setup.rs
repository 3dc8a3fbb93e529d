use bytes::{Buf, BufMut};

use crate::{Decode, DecodeError, Encode, Parameters, VarInt};

/// A protocol version, negotiated during setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Version(pub VarInt);

macro_rules! versions {
    {$($name:ident = $val:expr,)*} => {
        impl Version {
            $(pub const $name: Version = Version(VarInt::from_u32($val));)*
        }
    }
}

versions! {
    DEVELOP = 0xffff_ff00,
}

impl Version {
    pub const CURRENT: Version = Version::DEVELOP;
}

impl Encode for Version {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.0.encode(buf)
    }
}

impl Decode for Version {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        Ok(Self(VarInt::decode(buf)?))
    }
}

/// The setup offer, sent by the client as the first message of the session
/// stream: the versions it speaks and its extension parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionClient {
    pub versions: Vec<Version>,
    pub parameters: Parameters,
}

impl Encode for SessionClient {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        VarInt::try_from(self.versions.len())
            .expect("too many versions")
            .encode(buf);
        for version in &self.versions {
            version.encode(buf);
        }

        self.parameters.encode(buf);
    }
}

impl Decode for SessionClient {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        let count = VarInt::decode(buf)?.into_inner();
        let mut versions = Vec::with_capacity(count.min(16) as usize);
        for _ in 0..count {
            versions.push(Version::decode(buf)?);
        }

        let parameters = Parameters::decode(buf)?;

        Ok(Self {
            versions,
            parameters,
        })
    }
}

/// The setup answer: the single version the server selected.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionServer {
    pub version: Version,
    pub parameters: Parameters,
}

impl Encode for SessionServer {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.version.encode(buf);
        self.parameters.encode(buf);
    }
}

impl Decode for SessionServer {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        Ok(Self {
            version: Version::decode(buf)?,
            parameters: Parameters::decode(buf)?,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ParameterType;

    #[test]
    fn client_round_trip() {
        let mut parameters = Parameters::new();
        parameters.set_string(ParameterType::PATH, "/broadcast");

        let msg = SessionClient {
            versions: vec![Version::CURRENT, Version(VarInt::from_u32(0xff00_0001))],
            parameters,
        };

        let mut buf = Vec::new();
        msg.encode(&mut buf);

        let decoded = SessionClient::decode(&mut buf.as_slice()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn client_wire_form() {
        // One version, no parameters: count, version, param count.
        let msg = SessionClient {
            versions: vec![Version(VarInt::from_u32(0x21))],
            parameters: Parameters::new(),
        };

        let mut buf = Vec::new();
        msg.encode(&mut buf);
        assert_eq!(buf, [0x01, 0x21, 0x00]);
    }

    #[test]
    fn server_round_trip() {
        let msg = SessionServer {
            version: Version::CURRENT,
            parameters: Parameters::new(),
        };

        let mut buf = Vec::new();
        msg.encode(&mut buf);

        let decoded = SessionServer::decode(&mut buf.as_slice()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn truncated() {
        let msg = SessionClient {
            versions: vec![Version::CURRENT],
            parameters: Parameters::new(),
        };

        let mut buf = Vec::new();
        msg.encode(&mut buf);

        for len in 0..buf.len() {
            assert!(matches!(
                SessionClient::decode(&mut &buf[..len]),
                Err(DecodeError::UnexpectedEnd)
            ));
        }
    }
}
