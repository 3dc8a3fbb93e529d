use std::collections::HashMap;

use bytes::{Buf, BufMut, Bytes};

use crate::{Decode, DecodeError, Encode, VarInt};

/// A setup parameter tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParameterType(pub VarInt);

macro_rules! parameter_types {
    {$($name:ident = $val:expr,)*} => {
        impl ParameterType {
            $(pub const $name: ParameterType = ParameterType(VarInt::from_u32($val));)*
        }
    }
}

parameter_types! {
    PATH = 0x01,
    MAX_SUBSCRIBE_ID = 0x02,
}

/// The extension parameters carried by the setup messages.
///
/// Tags this implementation doesn't recognize are preserved as raw bytes so
/// they survive a decode/encode round trip.
#[derive(Default, Debug, Clone, PartialEq)]
pub struct Parameters(HashMap<u64, Bytes>);

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, tag: ParameterType) -> Option<&Bytes> {
        self.0.get(&tag.0.into_inner())
    }

    pub fn set(&mut self, tag: ParameterType, value: impl Into<Bytes>) {
        self.0.insert(tag.0.into_inner(), value.into());
    }

    /// A typed view over a parameter holding a UTF-8 string.
    ///
    /// Returns `None` when the parameter is absent or not valid UTF-8.
    pub fn get_string(&self, tag: ParameterType) -> Option<String> {
        let value = self.get(tag)?;
        String::from_utf8(value.to_vec()).ok()
    }

    pub fn set_string(&mut self, tag: ParameterType, value: &str) {
        self.set(tag, Bytes::copy_from_slice(value.as_bytes()));
    }

    /// A typed view over a parameter holding a single varint.
    pub fn get_varint(&self, tag: ParameterType) -> Option<u64> {
        let mut value = self.get(tag)?.clone();
        let decoded = VarInt::decode(&mut value).ok()?;
        value.is_empty().then(|| decoded.into_inner())
    }

    pub fn set_varint(&mut self, tag: ParameterType, value: u64) {
        let mut buf = Vec::new();
        VarInt::try_from(value)
            .expect("value out of varint range")
            .encode(&mut buf);
        self.set(tag, buf);
    }
}

impl Encode for Parameters {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        VarInt::try_from(self.0.len())
            .expect("too many parameters")
            .encode(buf);

        for (tag, value) in &self.0 {
            tag.encode(buf);
            value.encode(buf);
        }
    }
}

impl Decode for Parameters {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        let count = VarInt::decode(buf)?.into_inner();

        let mut params = Self::default();
        for _ in 0..count {
            let tag = u64::decode(buf)?;
            let value = Bytes::decode(buf)?;
            params.0.insert(tag, value);
        }

        Ok(params)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trip() {
        let mut params = Parameters::new();
        params.set_string(ParameterType::PATH, "/relay/live");
        params.set_varint(ParameterType::MAX_SUBSCRIBE_ID, 128);

        let mut buf = Vec::new();
        params.encode(&mut buf);

        let decoded = Parameters::decode(&mut buf.as_slice()).unwrap();
        assert_eq!(decoded, params);
        assert_eq!(
            decoded.get_string(ParameterType::PATH).as_deref(),
            Some("/relay/live")
        );
        assert_eq!(decoded.get_varint(ParameterType::MAX_SUBSCRIBE_ID), Some(128));
    }

    #[test]
    fn absent() {
        let params = Parameters::new();
        assert_eq!(params.get_string(ParameterType::PATH), None);
        assert_eq!(params.get_varint(ParameterType::MAX_SUBSCRIBE_ID), None);
    }
}
