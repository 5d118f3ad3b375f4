//! TCP device transport

use super::codec::{decode_records, encode_frame, ACK, ENQ, FRAME_HEADER_SIZE, RECORD_SIZE};
use crate::error::DeviceError;
use crossbeam::channel::{self, RecvTimeoutError};
use spikestream_storage::DeviceRole;
use std::{
    io::{ErrorKind, Read, Write},
    net::{TcpListener, TcpStream},
    thread,
    time::{Duration, Instant},
};

/// Number of one-second polls while a connection is being established
pub const CONNECT_ATTEMPTS: u32 = 5;

/// Interval between connection polls
pub const CONNECT_POLL: Duration = Duration::from_secs(1);

/// How long an output waits for its acknowledgment byte
pub const ACK_TIMEOUT: Duration = Duration::from_secs(1);

/// How long an input waits for the answer to a request in one step
pub const FRAME_TIMEOUT: Duration = Duration::from_secs(1);

/// Largest record count accepted from an input device in one frame
const MAX_FRAME_RECORDS: u32 = 1 << 20;

/// Establish a connection on a short-lived thread, polling for completion
pub fn open_stream(address: &str, role: DeviceRole) -> Result<TcpStream, DeviceError> {
    let (tx, rx) = channel::bounded(1);
    let target = address.to_string();
    let deadline = Instant::now() + CONNECT_POLL * CONNECT_ATTEMPTS;

    thread::Builder::new()
        .name(format!("tcp-connect-{}", address))
        .spawn(move || {
            let result = match role {
                DeviceRole::Client => TcpStream::connect(&target),
                DeviceRole::Server => accept_until(&target, deadline),
            };
            let _ = tx.send(result);
        })?;

    for attempt in 1..=CONNECT_ATTEMPTS {
        match rx.recv_timeout(CONNECT_POLL) {
            Ok(result) => {
                let stream = result?;
                stream.set_nodelay(true)?;
                log::info!("Device connection to {} established", address);
                return Ok(stream);
            }
            Err(RecvTimeoutError::Timeout) => {
                log::debug!("Waiting for {} ({}/{})", address, attempt, CONNECT_ATTEMPTS);
            }
            Err(RecvTimeoutError::Disconnected) => return Err(DeviceError::Disconnected),
        }
    }
    Err(DeviceError::ConnectTimeout {
        address: address.to_string(),
        attempts: CONNECT_ATTEMPTS,
    })
}

fn accept_until(address: &str, deadline: Instant) -> std::io::Result<TcpStream> {
    let listener = TcpListener::bind(address)?;
    listener.set_nonblocking(true)?;
    loop {
        match listener.accept() {
            Ok((stream, _)) => {
                stream.set_nonblocking(false)?;
                return Ok(stream);
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                if Instant::now() >= deadline {
                    return Err(std::io::Error::new(ErrorKind::TimedOut, "no device connected"));
                }
                thread::sleep(Duration::from_millis(20));
            }
            Err(err) => return Err(err),
        }
    }
}

/// Sends firing coordinates as acknowledged frames
#[derive(Debug)]
pub struct StreamOutput {
    stream: Option<TcpStream>,
}

impl StreamOutput {
    /// Wrap a connected stream
    pub fn new(stream: TcpStream) -> Result<Self, DeviceError> {
        stream.set_read_timeout(Some(ACK_TIMEOUT))?;
        Ok(Self { stream: Some(stream) })
    }

    /// Connect according to the device role
    pub fn open(address: &str, role: DeviceRole) -> Result<Self, DeviceError> {
        Self::new(open_stream(address, role)?)
    }

    /// Whether the socket is still open
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Send one frame and wait for its acknowledgment.
    ///
    /// Coordinates above 255 reject the whole frame before anything is written.
    /// A missing or wrong acknowledgment leaves the socket open; a socket
    /// error closes it.
    pub fn send(&mut self, coords: &[(u32, u32)]) -> Result<(), DeviceError> {
        let frame = encode_frame(coords)?;
        let stream = self.stream.as_mut().ok_or(DeviceError::Disconnected)?;

        if let Err(err) = stream.write_all(&frame).and_then(|_| stream.flush()) {
            self.stream = None;
            return Err(err.into());
        }

        let mut ack = [0u8; 1];
        match stream.read(&mut ack) {
            Ok(1) if ack[0] == ACK => Ok(()),
            Ok(1) => Err(DeviceError::BadAck { found: ack[0] }),
            Ok(_) => {
                self.stream = None;
                Err(DeviceError::Disconnected)
            }
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                Err(DeviceError::MissingAck)
            }
            Err(err) => {
                self.stream = None;
                Err(err.into())
            }
        }
    }
}

/// Polls a device for coordinates with ENQ requests.
///
/// Bytes of a frame that is still arriving are kept between fetches, so a
/// slow answer is picked up at a later step instead of desynchronizing the
/// stream.
#[derive(Debug)]
pub struct StreamInput {
    stream: Option<TcpStream>,
    pending: Vec<u8>,
    timeout: Duration,
}

impl StreamInput {
    /// Wrap a connected stream and send the first request
    pub fn new(stream: TcpStream) -> Result<Self, DeviceError> {
        Self::with_timeout(stream, FRAME_TIMEOUT)
    }

    /// Like [`StreamInput::new`] with a custom per-step read timeout
    pub fn with_timeout(mut stream: TcpStream, timeout: Duration) -> Result<Self, DeviceError> {
        stream.set_read_timeout(Some(timeout))?;
        stream.write_all(&[ENQ])?;
        Ok(Self {
            stream: Some(stream),
            pending: Vec::new(),
            timeout,
        })
    }

    /// Connect according to the device role
    pub fn open(address: &str, role: DeviceRole) -> Result<Self, DeviceError> {
        Self::new(open_stream(address, role)?)
    }

    /// Whether the socket is still open
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Read the answer to the outstanding request, then request the next frame.
    ///
    /// A device that stays silent for the read timeout yields `InputTimeout`
    /// with the socket left open; a socket error or a malformed frame closes it.
    pub fn fetch(&mut self) -> Result<Vec<(u8, u8)>, DeviceError> {
        let stream = self.stream.as_mut().ok_or(DeviceError::Disconnected)?;
        let mut chunk = [0u8; 1024];
        loop {
            match take_frame(&mut self.pending) {
                Ok(Some(records)) => {
                    if let Err(err) = stream.write_all(&[ENQ]) {
                        self.stream = None;
                        return Err(err.into());
                    }
                    return Ok(records);
                }
                Ok(None) => {}
                Err(err) => {
                    self.stream = None;
                    return Err(err);
                }
            }
            match stream.read(&mut chunk) {
                Ok(0) => {
                    self.stream = None;
                    return Err(DeviceError::Disconnected);
                }
                Ok(n) => self.pending.extend_from_slice(&chunk[..n]),
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Err(DeviceError::InputTimeout {
                        timeout_ms: self.timeout.as_millis() as u64,
                    });
                }
                Err(err) => {
                    self.stream = None;
                    return Err(err.into());
                }
            }
        }
    }
}

/// Remove one complete frame from the front of `pending`, if there is one
fn take_frame(pending: &mut Vec<u8>) -> Result<Option<Vec<(u8, u8)>>, DeviceError> {
    if pending.len() < FRAME_HEADER_SIZE {
        return Ok(None);
    }
    let count = u32::from_le_bytes([pending[0], pending[1], pending[2], pending[3]]);
    if count > MAX_FRAME_RECORDS {
        return Err(DeviceError::malformed(format!("frame of {} records", count)));
    }
    let end = FRAME_HEADER_SIZE + count as usize * RECORD_SIZE;
    if pending.len() < end {
        return Ok(None);
    }
    let records = decode_records(&pending[FRAME_HEADER_SIZE..end])?;
    pending.drain(..end);
    Ok(Some(records))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    #[test]
    fn test_output_frame_and_ack() {
        let (client, mut device) = pair();
        let mut output = StreamOutput::new(client).unwrap();

        let handle = thread::spawn(move || {
            let mut frame = [0u8; 12];
            device.read_exact(&mut frame).unwrap();
            device.write_all(&[ACK]).unwrap();
            frame
        });
        output.send(&[(1, 2), (3, 4)]).unwrap();
        let frame = handle.join().unwrap();
        assert_eq!(frame, [2, 0, 0, 0, 1, 2, 0, 0, 3, 4, 0, 0]);
    }

    #[test]
    fn test_wrong_ack_keeps_socket() {
        let (client, mut device) = pair();
        let mut output = StreamOutput::new(client).unwrap();
        device.write_all(&[0x15]).unwrap();
        assert!(matches!(output.send(&[]), Err(DeviceError::BadAck { found: 0x15 })));
        assert!(output.is_connected());
    }

    #[test]
    fn test_missing_ack_keeps_socket() {
        let (client, _device) = pair();
        let mut output = StreamOutput::new(client).unwrap();
        assert!(matches!(output.send(&[(5, 5)]), Err(DeviceError::MissingAck)));
        assert!(output.is_connected());
    }

    #[test]
    fn test_closed_peer_closes_socket() {
        let (client, device) = pair();
        let mut output = StreamOutput::new(client).unwrap();
        drop(device);
        assert!(output.send(&[(1, 1)]).is_err());
        assert!(!output.is_connected());
        assert!(matches!(output.send(&[]), Err(DeviceError::Disconnected)));
    }

    #[test]
    fn test_input_request_response() {
        let (client, mut device) = pair();
        let mut input = StreamInput::new(client).unwrap();

        let mut request = [0u8; 1];
        device.read_exact(&mut request).unwrap();
        assert_eq!(request[0], ENQ);
        device.write_all(&[1, 0, 0, 0, 9, 8, 0, 0]).unwrap();

        assert_eq!(input.fetch().unwrap(), vec![(9, 8)]);
        device.read_exact(&mut request).unwrap();
        assert_eq!(request[0], ENQ);
    }

    #[test]
    fn test_silent_input_times_out_and_keeps_socket() {
        let (client, mut device) = pair();
        let mut input = StreamInput::with_timeout(client, Duration::from_millis(100)).unwrap();
        let mut request = [0u8; 1];
        device.read_exact(&mut request).unwrap();

        let started = Instant::now();
        assert!(matches!(input.fetch(), Err(DeviceError::InputTimeout { timeout_ms: 100 })));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(input.is_connected());

        // half a frame, then silence: still waiting on the same request
        let frame = encode_frame(&[(1, 1), (7, 7)]).unwrap();
        let (head, tail) = frame.split_at(6);
        device.write_all(head).unwrap();
        assert!(matches!(input.fetch(), Err(DeviceError::InputTimeout { .. })));
        device.write_all(tail).unwrap();
        assert_eq!(input.fetch().unwrap(), vec![(1, 1), (7, 7)]);

        device.read_exact(&mut request).unwrap();
        assert_eq!(request[0], ENQ);
    }

    #[test]
    fn test_malformed_frame_closes_input() {
        let (client, mut device) = pair();
        let mut input = StreamInput::new(client).unwrap();
        device.write_all(&[0xff, 0xff, 0xff, 0xff]).unwrap();
        assert!(matches!(input.fetch(), Err(DeviceError::MalformedPacket { .. })));
        assert!(!input.is_connected());
    }

    #[test]
    fn test_server_role_accepts() {
        let spare = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = spare.local_addr().unwrap().to_string();
        drop(spare);

        let connector = {
            let address = address.clone();
            thread::spawn(move || {
                for _ in 0..100 {
                    if let Ok(stream) = TcpStream::connect(&address) {
                        return Some(stream);
                    }
                    thread::sleep(Duration::from_millis(20));
                }
                None
            })
        };
        let output = StreamOutput::open(&address, DeviceRole::Server).unwrap();
        assert!(output.is_connected());
        assert!(connector.join().unwrap().is_some());
    }
}
