//! In-memory transports for unit tests.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};

use crate::error::Result;
use crate::port::Transport;

/// Observable state of a [`MockTransport`], shared with the test.
#[derive(Debug, Default)]
pub(crate) struct MockState {
    pub rx: VecDeque<u8>,
    pub written: Vec<u8>,
    /// Total number of bytes the device accepts before writes stall.
    pub write_limit: Option<usize>,
    /// Make `flush` fail, like a serial line that never drains.
    pub fail_flush: bool,
    pub open: bool,
    pub closes: usize,
}

/// Transport with separate read/write buffers.
///
/// Reads past the scripted input time out, like a serial port with nobody on
/// the other end.
pub(crate) struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new(rx: &[u8]) -> (Self, Arc<Mutex<MockState>>) {
        let state = Arc::new(Mutex::new(MockState {
            rx: rx.iter().copied().collect(),
            open: true,
            ..MockState::default()
        }));
        (
            Self {
                state: Arc::clone(&state),
            },
            state,
        )
    }
}

impl Read for MockTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state.lock().unwrap();
        if state.rx.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf.len().min(state.rx.len());
        for b in buf.iter_mut().take(n) {
            *b = state.rx.pop_front().unwrap();
        }
        Ok(n)
    }
}

impl Write for MockTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock().unwrap();
        let n = match state.write_limit {
            Some(limit) => buf.len().min(limit.saturating_sub(state.written.len())),
            None => buf.len(),
        };
        state.written.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.state.lock().unwrap().fail_flush {
            return Err(io::Error::other("flush failed"));
        }
        Ok(())
    }
}

impl Transport for MockTransport {
    fn name(&self) -> &str {
        "mock"
    }

    fn is_open(&self) -> bool {
        self.state.lock().unwrap().open
    }

    fn close(&mut self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.open = false;
        state.closes += 1;
        Ok(())
    }
}

/// Read-only stream that hands out at most `chunk` bytes per read and then
/// reports end of stream.
pub(crate) struct Fragmented {
    data: VecDeque<u8>,
    chunk: usize,
}

impl Fragmented {
    pub fn new(data: &[u8], chunk: usize) -> Self {
        Self {
            data: data.iter().copied().collect(),
            chunk,
        }
    }
}

impl Read for Fragmented {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.chunk).min(self.data.len());
        for b in buf.iter_mut().take(n) {
            *b = self.data.pop_front().unwrap();
        }
        Ok(n)
    }
}

impl Write for Fragmented {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for Fragmented {
    fn name(&self) -> &str {
        "fragmented"
    }

    fn is_open(&self) -> bool {
        true
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
