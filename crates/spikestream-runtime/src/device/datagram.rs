//! UDP device transport

use super::{
    codec::{decode_datagram, encode_datagram},
    pacing::{PacingDecision, PacingEstimator},
};
use crate::error::DeviceError;
use parking_lot::Mutex;
use spikestream_storage::Step;
use std::{
    net::{SocketAddr, ToSocketAddrs, UdpSocket},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

/// How often the receive thread checks for shutdown
const RECEIVE_POLL: Duration = Duration::from_millis(50);

/// Largest datagram accepted
const MAX_DATAGRAM: usize = 65_507;

fn resolve(address: &str) -> Result<SocketAddr, DeviceError> {
    address
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| DeviceError::malformed(format!("address {} does not resolve", address)))
}

/// Sends firing coordinates as synchronized datagrams
#[derive(Debug)]
pub struct DatagramOutput {
    socket: UdpSocket,
    target: SocketAddr,
}

impl DatagramOutput {
    /// Bind an ephemeral socket that sends to `address`
    pub fn open(address: &str) -> Result<Self, DeviceError> {
        let target = resolve(address)?;
        let bind = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind)?;
        Ok(Self { socket, target })
    }

    /// Send one step worth of coordinates; rejects the whole send if any
    /// coordinate exceeds 255
    pub fn send(&mut self, step: Step, delaying: bool, coords: &[(u32, u32)]) -> Result<(), DeviceError> {
        let packet = encode_datagram(step, delaying, coords)?;
        self.socket.send_to(&packet, self.target)?;
        Ok(())
    }
}

/// State shared between the receive thread and the worker
#[derive(Debug, Default)]
struct InputShared {
    events: Vec<(u8, u8)>,
    pacing: PacingEstimator,
    malformed: u64,
}

/// Receives coordinates on a background thread
#[derive(Debug)]
pub struct DatagramInput {
    shared: Arc<Mutex<InputShared>>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    local_addr: SocketAddr,
}

impl DatagramInput {
    /// Bind `address` and start the receive thread
    pub fn open(address: &str) -> Result<Self, DeviceError> {
        let socket = UdpSocket::bind(resolve(address)?)?;
        socket.set_read_timeout(Some(RECEIVE_POLL))?;
        let local_addr = socket.local_addr()?;

        let shared = Arc::new(Mutex::new(InputShared::default()));
        let stop = Arc::new(AtomicBool::new(false));
        let handle = {
            let shared = Arc::clone(&shared);
            let stop = Arc::clone(&stop);
            thread::Builder::new()
                .name(format!("udp-input-{}", local_addr))
                .spawn(move || receive_loop(socket, shared, stop))?
        };

        Ok(Self {
            shared,
            stop,
            handle: Some(handle),
            local_addr,
        })
    }

    /// Bound address
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Take the coordinates received since the last call
    pub fn drain(&self) -> Vec<(u8, u8)> {
        std::mem::take(&mut self.shared.lock().events)
    }

    /// Pacing decision after a local step
    pub fn pace(&self, local_compute: Duration, other_delaying: bool) -> PacingDecision {
        self.shared.lock().pacing.on_local_step(local_compute, other_delaying)
    }

    /// Number of datagrams that failed to decode
    pub fn malformed(&self) -> u64 {
        self.shared.lock().malformed
    }
}

impl Drop for DatagramInput {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn receive_loop(socket: UdpSocket, shared: Arc<Mutex<InputShared>>, stop: Arc<AtomicBool>) {
    let mut buffer = vec![0u8; MAX_DATAGRAM];
    while !stop.load(Ordering::Relaxed) {
        let len = match socket.recv_from(&mut buffer) {
            Ok((len, _)) => len,
            Err(err) if matches!(err.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => {
                continue
            }
            Err(err) => {
                log::warn!("UDP input receive failed: {}", err);
                continue;
            }
        };
        let now = Instant::now();
        match decode_datagram(&buffer[..len]) {
            Ok((header, records)) => {
                let mut state = shared.lock();
                state.pacing.on_message(now, header.step_counter);
                state.events.extend(records);
            }
            Err(err) => {
                log::debug!("Dropping datagram: {}", err);
                shared.lock().malformed += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::codec::DatagramHeader;

    fn wait_for_events(input: &DatagramInput, expected: usize) -> Vec<(u8, u8)> {
        let mut events = Vec::new();
        for _ in 0..100 {
            events.extend(input.drain());
            if events.len() >= expected {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        events
    }

    #[test]
    fn test_output_packet_reaches_listener() {
        let listener = UdpSocket::bind("127.0.0.1:0").unwrap();
        listener.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let mut output = DatagramOutput::open(&listener.local_addr().unwrap().to_string()).unwrap();

        output.send(5, true, &[(1, 2), (3, 4)]).unwrap();
        let mut buffer = [0u8; 64];
        let (len, _) = listener.recv_from(&mut buffer).unwrap();
        let (header, records) = decode_datagram(&buffer[..len]).unwrap();
        assert_eq!(header, DatagramHeader::new(5, true));
        assert_eq!(records, vec![(1, 2), (3, 4)]);
    }

    #[test]
    fn test_output_rejects_large_coordinates() {
        let listener = UdpSocket::bind("127.0.0.1:0").unwrap();
        let mut output = DatagramOutput::open(&listener.local_addr().unwrap().to_string()).unwrap();
        assert!(matches!(
            output.send(1, false, &[(256, 0)]),
            Err(DeviceError::CoordinateOutOfRange { .. })
        ));
    }

    #[test]
    fn test_input_collects_events() {
        let input = DatagramInput::open("127.0.0.1:0").unwrap();
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        let target = input.local_addr();

        sender.send_to(&encode_datagram(1, false, &[(7, 8)]).unwrap(), target).unwrap();
        sender.send_to(&encode_datagram(2, false, &[(9, 10)]).unwrap(), target).unwrap();
        sender.send_to(&[1], target).unwrap();

        let events = wait_for_events(&input, 2);
        assert_eq!(events, vec![(7, 8), (9, 10)]);
        assert!(input.drain().is_empty());

        for _ in 0..100 {
            if input.malformed() == 1 {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(input.malformed(), 1);
    }
}
