//! In-memory stream pair implementing the stream adapter traits, with enough
//! bookkeeping to assert how many times each terminal was invoked.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::{ReadError, RecvStream, SendStream, WriteError};

#[derive(Default)]
struct PipeState {
    data: VecDeque<u8>,
    /// Every byte ever written, FIN or not; lets tests assert exact wire form.
    wire: Vec<u8>,
    fin: bool,
    reset: Option<u32>,
    stopped: Option<u32>,
    resets: usize,
    stops: usize,
}

#[derive(Clone, Default)]
pub struct Pipe {
    state: Arc<Mutex<PipeState>>,
    notify: Arc<Notify>,
}

impl Pipe {
    pub fn new() -> (MockSend, MockRecv) {
        let pipe = Pipe::default();
        (MockSend(pipe.clone()), MockRecv(pipe))
    }

    pub fn wire(&self) -> Vec<u8> {
        self.state.lock().unwrap().wire.clone()
    }

    pub fn resets(&self) -> usize {
        self.state.lock().unwrap().resets
    }

    pub fn reset_code(&self) -> Option<u32> {
        self.state.lock().unwrap().reset
    }

    pub fn stops(&self) -> usize {
        self.state.lock().unwrap().stops
    }

    pub fn stop_code(&self) -> Option<u32> {
        self.state.lock().unwrap().stopped
    }
}

pub struct MockSend(Pipe);

impl MockSend {
    pub fn pipe(&self) -> Pipe {
        self.0.clone()
    }
}

impl SendStream for MockSend {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, WriteError> {
        let mut state = self.0.state.lock().unwrap();
        if let Some(code) = state.stopped {
            return Err(WriteError::Stopped(code));
        }
        if state.fin || state.reset.is_some() {
            return Err(WriteError::Closed);
        }

        state.data.extend(buf);
        state.wire.extend_from_slice(buf);
        drop(state);

        self.0.notify.notify_waiters();
        Ok(buf.len())
    }

    fn finish(&mut self) {
        let mut state = self.0.state.lock().unwrap();
        if state.reset.is_some() || state.fin {
            return;
        }
        state.fin = true;
        drop(state);
        self.0.notify.notify_waiters();
    }

    fn reset(&mut self, code: u32) {
        let mut state = self.0.state.lock().unwrap();
        state.resets += 1;
        if state.reset.is_some() || state.fin {
            return;
        }
        state.reset = Some(code);
        drop(state);
        self.0.notify.notify_waiters();
    }

    async fn closed(&mut self) -> Result<(), WriteError> {
        loop {
            let notified = self.0.notify.notified();
            {
                let state = self.0.state.lock().unwrap();
                if state.stopped.is_some() || state.reset.is_some() {
                    return Ok(());
                }
            }
            notified.await;
        }
    }
}

pub struct MockRecv(Pipe);

impl MockRecv {
    pub fn pipe(&self) -> Pipe {
        self.0.clone()
    }
}

impl RecvStream for MockRecv {
    async fn read(&mut self, buf: &mut [u8]) -> Result<Option<usize>, ReadError> {
        loop {
            let notified = self.0.notify.notified();
            {
                let mut state = self.0.state.lock().unwrap();
                if let Some(code) = state.reset {
                    return Err(ReadError::Reset(code));
                }
                if !state.data.is_empty() {
                    let n = buf.len().min(state.data.len());
                    for slot in buf.iter_mut().take(n) {
                        *slot = state.data.pop_front().unwrap();
                    }
                    return Ok(Some(n));
                }
                if state.fin {
                    return Ok(None);
                }
            }
            notified.await;
        }
    }

    fn stop(&mut self, code: u32) {
        let mut state = self.0.state.lock().unwrap();
        state.stops += 1;
        if state.stopped.is_some() {
            return;
        }
        state.stopped = Some(code);
        drop(state);
        self.0.notify.notify_waiters();
    }

    async fn closed(&mut self) -> Result<(), ReadError> {
        loop {
            let notified = self.0.notify.notified();
            {
                let state = self.0.state.lock().unwrap();
                if state.reset.is_some() || state.stopped.is_some() || state.fin {
                    return Ok(());
                }
            }
            notified.await;
        }
    }
}
