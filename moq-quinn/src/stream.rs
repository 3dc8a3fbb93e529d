use std::future::Future;

use crate::{ReadError, ReadExactError, WriteError};

/// The outgoing half of a QUIC stream, narrowed to what the data plane needs.
///
/// Terminal calls are idempotent: `finish` or `reset` after the stream is
/// already closed is a no-op.
pub trait SendStream: Send {
    /// Write some of the buffer, returning the number of bytes accepted.
    fn write(&mut self, buf: &[u8]) -> impl Future<Output = Result<usize, WriteError>> + Send;

    /// Write the entire buffer.
    fn write_all(&mut self, buf: &[u8]) -> impl Future<Output = Result<(), WriteError>> + Send {
        async move {
            let mut pos = 0;
            while pos < buf.len() {
                pos += self.write(&buf[pos..]).await?;
            }
            Ok(())
        }
    }

    /// Gracefully finish the stream (FIN). No-op if already terminated.
    fn finish(&mut self);

    /// Abruptly terminate the stream with an application error code
    /// (RESET_STREAM). No-op if already terminated.
    fn reset(&mut self, code: u32);

    /// Resolve once the peer has closed its end: a STOP_SENDING arrived or
    /// the final FIN was acknowledged.
    fn closed(&mut self) -> impl Future<Output = Result<(), WriteError>> + Send;
}

/// The incoming half of a QUIC stream.
pub trait RecvStream: Send {
    /// Read some bytes into the buffer.
    ///
    /// Returns `None` at the end of the stream; that is the only EOF signal,
    /// partial reads before it return `Some(n)` with `n > 0`.
    fn read(
        &mut self,
        buf: &mut [u8],
    ) -> impl Future<Output = Result<Option<usize>, ReadError>> + Send;

    /// Fill the entire buffer, or report how far we got before the stream
    /// ended.
    fn read_exact(
        &mut self,
        buf: &mut [u8],
    ) -> impl Future<Output = Result<(), ReadExactError>> + Send {
        async move {
            let mut pos = 0;
            while pos < buf.len() {
                match self.read(&mut buf[pos..]).await.map_err(ReadExactError::Read)? {
                    Some(n) => pos += n,
                    None => return Err(ReadExactError::FinishedEarly(pos)),
                }
            }
            Ok(())
        }
    }

    /// Tell the peer to stop sending, with an application error code
    /// (STOP_SENDING). No-op if already terminated.
    fn stop(&mut self, code: u32);

    /// Resolve once the stream is closed by either side.
    fn closed(&mut self) -> impl Future<Output = Result<(), ReadError>> + Send;
}
