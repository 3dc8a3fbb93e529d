use bytes::Bytes;

use moq_proto::{FrameBuffer, Group, StreamErrorCode, VarInt};

use crate::{
    scope::{Scope, ScopeState},
    CodingError, GroupError, ReadError, Reader, RecvStream, SendStream, TrackContext, WriteError,
};

/// Writes a sequence of length-prefixed frames onto one unidirectional
/// stream.
///
/// The writer is bound to its track: when the track context is cancelled,
/// the pending (or next) operation fails with `SUBSCRIBE_CANCELED` and the
/// transport stream is reset with that code, exactly once.
pub struct GroupWriter<S: SendStream> {
    info: Group,
    stream: S,
    scope: Scope,
    terminated: bool,
}

impl<S: SendStream> GroupWriter<S> {
    pub fn new(track: &TrackContext, stream: S, info: Group) -> Self {
        Self {
            info,
            stream,
            scope: Scope::child(track.token(), StreamErrorCode::SUBSCRIBE_CANCELED),
            terminated: false,
        }
    }

    pub fn info(&self) -> Group {
        self.info
    }

    pub fn sequence(&self) -> u64 {
        self.info.sequence
    }

    /// Write one frame: the payload length as a varint, then the payload.
    pub async fn write_frame(&mut self, payload: &[u8]) -> Result<(), GroupError> {
        match self.scope.state() {
            ScopeState::Open => {}
            ScopeState::Closed => return Err(GroupError::Closed),
            ScopeState::Cancelled(code) => {
                self.terminate(code);
                return Err(GroupError::Cancelled(code));
            }
        }

        let mut header = Vec::with_capacity(8);
        VarInt::try_from(payload.len())
            .expect("frame too large")
            .encode(&mut header);

        let stream = &mut self.stream;
        let scope = &self.scope;

        let res = tokio::select! {
            biased;
            _ = scope.cancelled() => Err(None),
            res = async {
                stream.write_all(&header).await?;
                stream.write_all(payload).await
            } => res.map_err(Some),
        };

        match res {
            Ok(()) => Ok(()),
            // The track was cancelled while we were writing.
            Err(None) => {
                let code = match self.scope.state() {
                    ScopeState::Cancelled(code) => code,
                    _ => StreamErrorCode::SUBSCRIBE_CANCELED,
                };
                self.terminate(code);
                Err(GroupError::Cancelled(code))
            }
            Err(Some(err)) => {
                let cause = match &err {
                    WriteError::Stopped(code) => StreamErrorCode(*code),
                    _ => StreamErrorCode::INTERNAL_ERROR,
                };
                self.scope.close(Some(cause));
                // The transport already tore the stream down; don't reset it
                // again from drop.
                self.terminated = true;
                Err(err.into())
            }
        }
    }

    pub async fn write_frame_buf(&mut self, frame: &FrameBuffer) -> Result<(), GroupError> {
        self.write_frame(frame.as_slice()).await
    }

    /// Gracefully finish the group. No-op if the group is already terminal.
    pub fn close(&mut self) -> Result<(), GroupError> {
        if !self.scope.close(None) {
            // The parent may have cancelled us without anyone touching the
            // stream yet; settle that debt instead of sending a FIN.
            if let ScopeState::Cancelled(code) = self.scope.state() {
                self.terminate(code);
            }
            return Ok(());
        }

        self.terminated = true;
        self.stream.finish();
        Ok(())
    }

    /// Abort the group with an error code. Idempotent; only the first
    /// terminal call touches the transport stream.
    pub fn cancel(&mut self, code: StreamErrorCode) {
        if self.scope.close(Some(code)) {
            self.terminate(code);
        } else if let ScopeState::Cancelled(cause) = self.scope.state() {
            self.terminate(cause);
        }
    }

    fn terminate(&mut self, code: StreamErrorCode) {
        if self.terminated {
            return;
        }
        self.terminated = true;
        self.stream.reset(code.into());
    }
}

impl<S: SendStream> Drop for GroupWriter<S> {
    fn drop(&mut self) {
        if self.terminated {
            return;
        }

        let code = match self.scope.state() {
            ScopeState::Cancelled(code) => code,
            // Dropped without close(): abandon rather than pretend the group
            // was complete.
            _ => StreamErrorCode::INTERNAL_ERROR,
        };

        self.scope.close(Some(code));
        self.terminated = true;
        self.stream.reset(code.into());
    }
}

/// Reads a sequence of length-prefixed frames from one unidirectional
/// stream.
///
/// A frame is delivered whole or not at all; a FIN in the middle of a frame
/// surfaces as [GroupError::Truncated]. When the track context is cancelled,
/// the pending (or next) read fails with `PUBLISH_ABORTED` and the transport
/// stream is stopped with that code.
pub struct GroupReader<R: RecvStream> {
    info: Group,
    reader: Reader<R>,
    scope: Scope,
    terminated: bool,
}

impl<R: RecvStream> GroupReader<R> {
    pub fn new(track: &TrackContext, reader: Reader<R>, info: Group) -> Self {
        Self {
            info,
            reader,
            scope: Scope::child(track.token(), StreamErrorCode::PUBLISH_ABORTED),
            terminated: false,
        }
    }

    pub fn info(&self) -> Group {
        self.info
    }

    pub fn sequence(&self) -> u64 {
        self.info.sequence
    }

    /// Read the next frame, or `None` once the writer finished the group.
    pub async fn read_frame(&mut self) -> Result<Option<Bytes>, GroupError> {
        let mut frame = FrameBuffer::new();
        match self.read_frame_buf(&mut frame).await? {
            true => Ok(Some(Bytes::copy_from_slice(frame.as_slice()))),
            false => Ok(None),
        }
    }

    /// Read the next frame into a reusable buffer, returning `false` once the
    /// writer finished the group.
    pub async fn read_frame_buf(&mut self, frame: &mut FrameBuffer) -> Result<bool, GroupError> {
        match self.scope.state() {
            ScopeState::Open => {}
            ScopeState::Closed => return Ok(false),
            ScopeState::Cancelled(code) => {
                self.terminate(code);
                return Err(GroupError::Cancelled(code));
            }
        }

        let reader = &mut self.reader;
        let scope = &self.scope;

        let res = tokio::select! {
            biased;
            _ = scope.cancelled() => Err(None),
            res = Self::read_inner(reader, frame) => res.map_err(Some),
        };

        match res {
            Ok(Some(())) => Ok(true),
            Ok(None) => {
                // Clean FIN between frames.
                self.scope.close(None);
                self.terminated = true;
                Ok(false)
            }
            Err(None) => {
                let code = match self.scope.state() {
                    ScopeState::Cancelled(code) => code,
                    _ => StreamErrorCode::PUBLISH_ABORTED,
                };
                self.terminate(code);
                Err(GroupError::Cancelled(code))
            }
            Err(Some(err)) => Err(self.fail(err)),
        }
    }

    async fn read_inner(
        reader: &mut Reader<R>,
        frame: &mut FrameBuffer,
    ) -> Result<Option<()>, GroupError> {
        let size = match reader.decode_maybe::<VarInt>().await.map_err(GroupError::from)? {
            Some(size) => size.into_inner() as usize,
            None => return Ok(None),
        };

        frame.resize(size);
        match reader.read_exact(frame.as_mut_slice()).await {
            Ok(()) => Ok(Some(())),
            Err(CodingError::UnexpectedEnd) => Err(GroupError::Truncated),
            Err(err) => Err(err.into()),
        }
    }

    /// Abort the group with an error code. Idempotent; only the first
    /// terminal call touches the transport stream.
    pub fn cancel(&mut self, code: StreamErrorCode) {
        if self.scope.close(Some(code)) {
            self.terminate(code);
        } else if let ScopeState::Cancelled(cause) = self.scope.state() {
            self.terminate(cause);
        }
    }

    // Record the cause of a transport or framing failure and tear the stream
    // down accordingly.
    fn fail(&mut self, err: GroupError) -> GroupError {
        match &err {
            GroupError::Read(ReadError::Reset(code)) => {
                // The writer already reset the stream; nothing to stop.
                self.scope.close(Some(StreamErrorCode(*code)));
                self.terminated = true;
            }
            GroupError::Read(_) => {
                self.scope.close(Some(StreamErrorCode::INTERNAL_ERROR));
                self.terminated = true;
            }
            GroupError::Decode(_) | GroupError::Truncated => {
                self.scope.close(Some(StreamErrorCode::INTERNAL_ERROR));
                self.terminate(StreamErrorCode::INTERNAL_ERROR);
            }
            _ => {}
        }
        err
    }

    fn terminate(&mut self, code: StreamErrorCode) {
        if self.terminated {
            return;
        }
        self.terminated = true;
        self.reader.stop(code.into());
    }
}

impl<R: RecvStream> Drop for GroupReader<R> {
    fn drop(&mut self) {
        if self.terminated {
            return;
        }

        let code = match self.scope.state() {
            ScopeState::Cancelled(code) => code,
            _ => StreamErrorCode::INTERNAL_ERROR,
        };

        self.scope.close(Some(code));
        self.terminated = true;
        self.reader.stop(code.into());
    }
}
