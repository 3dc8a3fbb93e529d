use bytes::{Buf, BytesMut};

use moq_proto::{Decode, DecodeError, Encode};

use crate::{CodingError, RecvStream, SendStream, WriteError};

// How much we grow the read buffer by when a message doesn't fit yet.
const READ_CHUNK: usize = 4096;

/// Encodes messages onto a send stream, reusing one scratch buffer.
pub struct Writer<S> {
    stream: S,
    buffer: BytesMut,
}

impl<S: SendStream> Writer<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buffer: Default::default(),
        }
    }

    pub async fn encode<T: Encode>(&mut self, msg: &T) -> Result<(), WriteError> {
        self.buffer.clear();
        msg.encode(&mut self.buffer);

        while !self.buffer.is_empty() {
            let n = self.stream.write(&self.buffer).await?;
            self.buffer.advance(n);
        }

        Ok(())
    }

    pub fn finish(&mut self) {
        self.stream.finish()
    }

    pub fn reset(&mut self, code: u32) {
        self.stream.reset(code)
    }
}

/// Decodes messages from a receive stream, buffering until a full message is
/// available.
pub struct Reader<R> {
    stream: R,
    buffer: BytesMut,
}

impl<R: RecvStream> Reader<R> {
    pub fn new(stream: R) -> Self {
        Self {
            stream,
            buffer: Default::default(),
        }
    }

    /// Decode the next message, reading more data as needed.
    ///
    /// The stream ending before a full message is an error; use
    /// [Self::decode_maybe] where a clean FIN is expected.
    pub async fn decode<T: Decode>(&mut self) -> Result<T, CodingError> {
        match self.decode_maybe().await? {
            Some(msg) => Ok(msg),
            None => Err(CodingError::UnexpectedEnd),
        }
    }

    /// Decode the next message, or return `None` on a clean FIN at a message
    /// boundary. A FIN in the middle of a message is still an error.
    pub async fn decode_maybe<T: Decode>(&mut self) -> Result<Option<T>, CodingError> {
        loop {
            if !self.buffer.is_empty() {
                // Decode against a cursor so a partial message consumes
                // nothing and we can retry once more data arrives.
                let mut cursor = std::io::Cursor::new(&self.buffer[..]);
                match T::decode(&mut cursor) {
                    Ok(msg) => {
                        let size = cursor.position() as usize;
                        self.buffer.advance(size);
                        return Ok(Some(msg));
                    }
                    Err(DecodeError::UnexpectedEnd) => {}
                    Err(err) => return Err(err.into()),
                }
            }

            if self.fill().await?.is_none() {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Err(CodingError::UnexpectedEnd);
            }
        }
    }

    /// Fill the destination exactly, draining the internal buffer first.
    pub async fn read_exact(&mut self, dst: &mut [u8]) -> Result<(), CodingError> {
        let buffered = self.buffer.len().min(dst.len());
        if buffered > 0 {
            self.buffer.copy_to_slice(&mut dst[..buffered]);
        }

        let mut pos = buffered;
        while pos < dst.len() {
            match self.stream.read(&mut dst[pos..]).await? {
                Some(n) => pos += n,
                None => return Err(CodingError::UnexpectedEnd),
            }
        }

        Ok(())
    }

    // Read another chunk into the buffer; None means FIN.
    async fn fill(&mut self) -> Result<Option<usize>, CodingError> {
        let old = self.buffer.len();
        self.buffer.resize(old + READ_CHUNK, 0);

        let res = self.stream.read(&mut self.buffer[old..]).await;
        match res {
            Ok(Some(n)) => {
                self.buffer.truncate(old + n);
                Ok(Some(n))
            }
            Ok(None) => {
                self.buffer.truncate(old);
                Ok(None)
            }
            Err(err) => {
                self.buffer.truncate(old);
                Err(err.into())
            }
        }
    }

    pub fn stop(&mut self, code: u32) {
        self.stream.stop(code)
    }
}
