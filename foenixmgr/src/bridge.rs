//! TCP-to-serial bridge.
//!
//! Lets a machine without the debug cable talk to the board over the network.
//! The bridge understands just enough of the framing to know where a request
//! ends and how long the response is; everything else, LRC included, is
//! relayed untouched.
//!
//! ```text
//! client ──TCP──> Bridge ──serial──> debug port
//!        <──────        <──────────
//! ```
//!
//! One client is served at a time and each request gets a freshly opened
//! serial connection, which is closed again once the response is relayed.

use {
    crate::{
        error::{Error, Result},
        port::{TcpPort, Transport},
        protocol::frame::{Command, HEADER_LEN},
    },
    byteorder::{BigEndian, ByteOrder},
    log::{debug, error, info, warn},
    std::{
        io::{ErrorKind, Read},
        net::{TcpListener, TcpStream},
        time::Duration,
    },
};

/// Relays debug-port requests from TCP clients to a serial device.
pub struct Bridge<F> {
    listen_addr: String,
    opener: F,
}

impl<F> Bridge<F>
where
    F: FnMut() -> Result<Box<dyn Transport>>,
{
    /// Create a bridge listening on `listen_addr` (`host:port`).
    ///
    /// `opener` is called once per forwarded request to open the serial side.
    pub fn new(listen_addr: impl Into<String>, opener: F) -> Self {
        Self {
            listen_addr: listen_addr.into(),
            opener,
        }
    }

    /// Bind the listening socket and serve clients forever.
    ///
    /// Only a bind failure is returned. See [`Bridge::serve_listener`].
    pub fn serve(&mut self) -> Result<()> {
        let listener = TcpListener::bind(&self.listen_addr).map_err(|e| {
            Error::Connection(format!("cannot listen on {}: {e}", self.listen_addr))
        })?;
        self.serve_listener(listener)
    }

    /// Serve clients accepted from an already bound `listener`, one at a time.
    ///
    /// A failed accept or an error inside a client session is logged and the
    /// listener goes on accepting.
    pub fn serve_listener(&mut self, listener: TcpListener) -> Result<()> {
        match listener.local_addr() {
            Ok(addr) => info!("Listening for connections on {addr}"),
            Err(_) => info!("Listening for connections on {}", self.listen_addr),
        }

        for stream in listener.incoming() {
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Accept failed: {e}");
                    continue;
                },
            };
            if let Err(e) = self.serve_client(stream) {
                error!("Client session ended: {e}");
            }
        }
        Ok(())
    }

    /// Relay requests from one client until it disconnects.
    ///
    /// A client closing the connection between requests is the normal end of
    /// a session and returns `Ok`.
    pub fn serve_client(&mut self, stream: TcpStream) -> Result<()> {
        let peer = stream
            .peer_addr()
            .map_or_else(|_| "unknown peer".to_string(), |a| a.to_string());
        info!("Received connection from {peer}");
        let mut client = TcpPort::from_stream(stream, peer.clone(), Duration::ZERO)?;

        let result = loop {
            let Some(header) = read_header(&mut client)? else {
                break Ok(());
            };

            let request = match read_request_body(&mut client, header) {
                Ok(request) => request,
                Err(e) => break Err(e),
            };
            let response = match self.forward(&request) {
                Ok(response) => response,
                Err(e) => break Err(e),
            };

            let written = client.write_bytes(&response)?;
            if written != response.len() {
                break Err(Error::Connection(format!(
                    "{peer}: relayed {written} of {} response bytes",
                    response.len()
                )));
            }
        };

        client.close()?;
        info!("Connection from {peer} closed");
        result
    }

    /// Send one request to the serial side and collect the response.
    fn forward(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        let command = request[1];
        let length = usize::from(BigEndian::read_u16(&request[5..7]));
        let payload_len = if Command::from_byte(command).is_some_and(Command::returns_payload) {
            length
        } else {
            0
        };

        let mut serial = (self.opener)()?;
        debug!(
            "Forwarding command 0x{command:02X} ({} bytes) to {}",
            request.len(),
            serial.name()
        );

        let result = relay(&mut *serial, request, payload_len);
        if let Err(e) = serial.close() {
            warn!("Failed to close {}: {e}", serial.name());
        }
        result
    }
}

fn relay(serial: &mut dyn Transport, request: &[u8], payload_len: usize) -> Result<Vec<u8>> {
    let written = serial.write_bytes(request)?;
    if written != request.len() {
        let msg = format!(
            "serial write to {} was short: {written} of {} bytes",
            serial.name(),
            request.len()
        );
        error!("{msg}");
        return Err(Error::Protocol(msg));
    }

    // sync + status0 + status1 + payload + lrc
    serial.read_bytes(1 + 2 + payload_len + 1)
}

/// Read the next request header, or `None` if the client hung up.
fn read_header(client: &mut TcpPort) -> Result<Option<[u8; HEADER_LEN]>> {
    let mut header = [0u8; HEADER_LEN];
    let mut filled = 0;

    while filled < HEADER_LEN {
        match client.read(&mut header[filled..]) {
            Ok(0) => {
                if filled > 0 {
                    warn!("Client closed the connection after {filled} header bytes");
                }
                return Ok(None);
            },
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {},
            Err(e) if e.kind() == ErrorKind::ConnectionReset => return Ok(None),
            Err(e) => return Err(Error::Io(e)),
        }
    }

    Ok(Some(header))
}

/// Complete a request: payload (write commands only) and the LRC byte.
fn read_request_body(client: &mut TcpPort, header: [u8; HEADER_LEN]) -> Result<Vec<u8>> {
    let command = header[1];
    let length = usize::from(BigEndian::read_u16(&header[5..7]));
    let payload_len = if Command::from_byte(command).is_some_and(Command::carries_payload) {
        length
    } else {
        0
    };

    let mut request = Vec::with_capacity(HEADER_LEN + payload_len + 1);
    request.extend_from_slice(&header);
    request.extend(client.read_bytes(payload_len + 1)?);
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::mock::{MockState, MockTransport};
    use crate::protocol::RequestFrame;
    use std::io::Write;
    use std::sync::{Arc, Mutex};
    use std::thread;

    type Opened = Arc<Mutex<Vec<Arc<Mutex<MockState>>>>>;

    /// Opener handing out one scripted mock per request.
    fn opener(responses: Vec<Vec<u8>>) -> (impl FnMut() -> Result<Box<dyn Transport>>, Opened) {
        let opened: Opened = Arc::new(Mutex::new(Vec::new()));
        let record = Arc::clone(&opened);
        let mut responses = responses.into_iter();
        let open = move || -> Result<Box<dyn Transport>> {
            let rx = responses
                .next()
                .ok_or_else(|| Error::Connection("no more scripted devices".into()))?;
            let (transport, state) = MockTransport::new(&rx);
            record.lock().unwrap().push(state);
            Ok(Box::new(transport) as Box<dyn Transport>)
        };
        (open, opened)
    }

    /// Run `client` against a bridge session and return the session result.
    fn run_session<C>(
        bridge: &mut Bridge<impl FnMut() -> Result<Box<dyn Transport>>>,
        client: C,
    ) -> Result<()>
    where
        C: FnOnce(TcpStream) + Send + 'static,
    {
        let _ = env_logger::builder()
            .is_test(true)
            .try_init();
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || client(TcpStream::connect(addr).unwrap()));

        let (stream, _) = listener.accept().unwrap();
        let result = bridge.serve_client(stream);
        handle.join().unwrap();
        result
    }

    fn read_exact(stream: &mut TcpStream, n: usize) -> Vec<u8> {
        let mut buf = vec![0u8; n];
        stream.read_exact(&mut buf).unwrap();
        buf
    }

    #[test]
    fn test_read_request_forwards_eight_bytes() {
        let response = vec![0xAA, 0x00, 0x00, 0x11, 0x22, 0x33, 0x44, 0x5A];
        let (open, opened) = opener(vec![response.clone()]);
        let mut bridge = Bridge::new("127.0.0.1:0", open);

        let request = RequestFrame::new(Command::ReadMem, 0x38_0000, &[], 4)
            .unwrap()
            .build();
        let expected = request.clone();
        let relayed = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&relayed);

        run_session(&mut bridge, move |mut stream| {
            stream.write_all(&request).unwrap();
            *sink.lock().unwrap() = read_exact(&mut stream, 8);
        })
        .unwrap();

        assert_eq!(*relayed.lock().unwrap(), response);
        let opened = opened.lock().unwrap();
        assert_eq!(opened.len(), 1);
        let serial = opened[0].lock().unwrap();
        assert_eq!(serial.written, expected);
        assert_eq!(serial.written.len(), 8);
        assert!(!serial.open);
    }

    #[test]
    fn test_write_request_payload_and_fresh_serial_per_request() {
        let ack = vec![0xAA, 0x00, 0x00, 0x00];
        let (open, opened) = opener(vec![ack.clone(), ack.clone()]);
        let mut bridge = Bridge::new("127.0.0.1:0", open);

        let write = RequestFrame::new(Command::WriteMem, 0x2000, &[1, 2, 3], 0)
            .unwrap()
            .build();
        let exit = RequestFrame::new(Command::ExitDebug, 0, &[], 0)
            .unwrap()
            .build();
        let (w, e) = (write.clone(), exit.clone());

        run_session(&mut bridge, move |mut stream| {
            // Deliver the first request in pieces.
            stream.write_all(&w[..3]).unwrap();
            stream.flush().unwrap();
            thread::sleep(Duration::from_millis(20));
            stream.write_all(&w[3..]).unwrap();
            assert_eq!(read_exact(&mut stream, 4), vec![0xAA, 0, 0, 0]);

            stream.write_all(&e).unwrap();
            assert_eq!(read_exact(&mut stream, 4), vec![0xAA, 0, 0, 0]);
        })
        .unwrap();

        let opened = opened.lock().unwrap();
        assert_eq!(opened.len(), 2);
        assert_eq!(opened[0].lock().unwrap().written, write);
        assert_eq!(opened[1].lock().unwrap().written, exit);
    }

    #[test]
    fn test_lrc_is_relayed_untouched() {
        let response = vec![0xAA, 0x12, 0x34, 0xFF];
        let (open, opened) = opener(vec![response.clone()]);
        let mut bridge = Bridge::new("127.0.0.1:0", open);

        let mut request = RequestFrame::new(Command::Revision, 0, &[], 0)
            .unwrap()
            .build();
        *request.last_mut().unwrap() ^= 0xFF;
        let sent = request.clone();

        run_session(&mut bridge, move |mut stream| {
            stream.write_all(&request).unwrap();
            assert_eq!(read_exact(&mut stream, 4), response);
        })
        .unwrap();

        assert_eq!(opened.lock().unwrap()[0].lock().unwrap().written, sent);
    }

    #[test]
    fn test_client_hangup_is_clean_end() {
        let (open, opened) = opener(vec![]);
        let mut bridge = Bridge::new("127.0.0.1:0", open);

        run_session(&mut bridge, |stream| drop(stream)).unwrap();
        assert!(opened.lock().unwrap().is_empty());

        // Hanging up in the middle of a header is also just the end.
        let (open, _opened) = opener(vec![]);
        let mut bridge = Bridge::new("127.0.0.1:0", open);
        run_session(&mut bridge, |mut stream| {
            stream.write_all(&[0x55, 0x80, 0x00]).unwrap();
        })
        .unwrap();
    }

    #[test]
    fn test_short_serial_write_ends_session() {
        let (transport, state) = MockTransport::new(&[0xAA, 0, 0, 0]);
        state.lock().unwrap().write_limit = Some(4);
        let mut device = Some(Box::new(transport) as Box<dyn Transport>);
        let mut bridge = Bridge::new("127.0.0.1:0", move || {
            device
                .take()
                .ok_or_else(|| Error::Connection("already opened".into()))
        });

        let request = RequestFrame::new(Command::EnterDebug, 0, &[], 0)
            .unwrap()
            .build();
        let result = run_session(&mut bridge, move |mut stream| {
            stream.write_all(&request).unwrap();
            // The bridge hangs up instead of answering.
            let mut buf = [0u8; 1];
            assert_eq!(stream.read(&mut buf).unwrap_or(0), 0);
        });

        assert!(matches!(result, Err(Error::Protocol(_))));
        let state = state.lock().unwrap();
        assert_eq!(state.written.len(), 4);
        assert!(!state.open);
    }

    #[test]
    fn test_serve_reports_bind_failure() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let (open, _opened) = opener(vec![]);

        let mut bridge = Bridge::new(addr, open);
        assert!(matches!(bridge.serve(), Err(Error::Connection(_))));
    }

    #[test]
    fn test_listener_survives_a_failed_session() {
        let _ = env_logger::builder()
            .is_test(true)
            .try_init();
        let response = vec![0xAA, 0x00, 0x00, 0x12, 0x34, 0x26];
        let opened: Opened = Arc::new(Mutex::new(Vec::new()));
        let record = Arc::clone(&opened);
        let open = move || -> Result<Box<dyn Transport>> {
            let mut record = record.lock().unwrap();
            let (transport, state) = MockTransport::new(&response);
            if record.is_empty() {
                // The first device stalls after two bytes.
                state.lock().unwrap().write_limit = Some(2);
            }
            record.push(state);
            Ok(Box::new(transport) as Box<dyn Transport>)
        };

        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let addr = listener.local_addr().unwrap();
        let mut bridge = Bridge::new(addr.to_string(), open);
        // Serves forever; the thread is left running when the test ends.
        thread::spawn(move || bridge.serve_listener(listener));

        let request = RequestFrame::new(Command::ReadMem, 0x1000, &[], 2)
            .unwrap()
            .build();

        let mut first = TcpStream::connect(addr).unwrap();
        first.write_all(&request).unwrap();
        let mut buf = [0u8; 1];
        assert_eq!(first.read(&mut buf).unwrap_or(0), 0);

        let mut second = TcpStream::connect(addr).unwrap();
        second.write_all(&request).unwrap();
        assert_eq!(
            read_exact(&mut second, 6),
            vec![0xAA, 0x00, 0x00, 0x12, 0x34, 0x26]
        );

        let opened = opened.lock().unwrap();
        assert_eq!(opened.len(), 2);
        assert_eq!(opened[0].lock().unwrap().written.len(), 2);
        assert_eq!(opened[1].lock().unwrap().written, request);
    }
}
