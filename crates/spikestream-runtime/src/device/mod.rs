//! Bridges between a worker and external devices
//!
//! A bridge owns one transport link and translates between neuron ids of its
//! group and the `(x, y)` coordinates of the device wire format. Output
//! bridges send the coordinates of the neurons that fired; input bridges
//! turn received coordinates into neurons to force-fire at the next step.
//!
//! Send and receive failures never stop the worker. After a link is lost the
//! bridge is marked degraded and skipped for the rest of the run.

pub mod codec;
pub mod datagram;
pub mod pacing;
pub mod stream;

pub use datagram::{DatagramInput, DatagramOutput};
pub use pacing::{PacingDecision, PacingEstimator};
pub use stream::{StreamInput, StreamOutput};

use crate::error::*;
use spikestream_storage::{
    DeviceDirection, DeviceId, DeviceRecord, DeviceTransport, GroupId, NeuronGroupRecord, NeuronId,
    ParameterStore, Step,
};
use std::time::Duration;

/// Open transport of a bridge
#[derive(Debug)]
pub enum DeviceLink {
    /// Datagrams to the device
    DatagramOut(DatagramOutput),
    /// Datagrams from the device
    DatagramIn(DatagramInput),
    /// Acknowledged frames to the device
    StreamOut(StreamOutput),
    /// Polled frames from the device
    StreamIn(StreamInput),
}

/// One device attached to a group
#[derive(Debug)]
pub struct DeviceBridge {
    record: DeviceRecord,
    link: DeviceLink,
    degraded: bool,
    delaying: bool,
}

impl DeviceBridge {
    /// Open the transport described by `record`
    pub fn open(record: DeviceRecord) -> Result<Self> {
        let address = record.socket_address();
        let link = match (record.direction, record.transport) {
            (DeviceDirection::Output, DeviceTransport::Datagram) => DatagramOutput::open(&address).map(DeviceLink::DatagramOut),
            (DeviceDirection::Input, DeviceTransport::Datagram) => DatagramInput::open(&address).map(DeviceLink::DatagramIn),
            (DeviceDirection::Output, DeviceTransport::Stream) => {
                StreamOutput::open(&address, record.role).map(DeviceLink::StreamOut)
            }
            (DeviceDirection::Input, DeviceTransport::Stream) => {
                StreamInput::open(&address, record.role).map(DeviceLink::StreamIn)
            }
        }
        .map_err(|source| RuntimeError::DeviceOpen {
            device: record.id.raw(),
            source,
        })?;

        log::info!(
            "Opened {:?} {:?} device {} at {} for group {}",
            record.direction,
            record.transport,
            record.id,
            address,
            record.group
        );
        Ok(Self::with_link(record, link))
    }

    /// Wrap an already open link
    pub fn with_link(record: DeviceRecord, link: DeviceLink) -> Self {
        Self {
            record,
            link,
            degraded: false,
            delaying: false,
        }
    }

    /// Device id
    pub fn id(&self) -> DeviceId {
        self.record.id
    }

    /// Device descriptor
    pub fn record(&self) -> &DeviceRecord {
        &self.record
    }

    /// Whether the device feeds the group
    pub fn is_input(&self) -> bool {
        self.record.direction == DeviceDirection::Input
    }

    /// Whether the link was lost
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Whether this bridge currently delays the worker for its device
    pub fn is_delaying(&self) -> bool {
        self.delaying
    }

    fn device_error(&self, source: DeviceError) -> RuntimeError {
        RuntimeError::Device {
            device: self.record.id.raw(),
            source,
        }
    }

    /// Send the coordinates of the neurons that fired at `step`.
    ///
    /// `delaying` is written into the datagram header. Does nothing for input
    /// bridges and degraded bridges.
    pub fn send_firing(
        &mut self,
        step: Step,
        delaying: bool,
        group: &NeuronGroupRecord,
        fired: &[NeuronId],
    ) -> Result<()> {
        if self.degraded {
            return Ok(());
        }
        let coords: Vec<(u32, u32)> = fired.iter().filter_map(|&n| group.coordinates(n)).collect();
        let result = match &mut self.link {
            DeviceLink::DatagramOut(output) => output.send(step, delaying, &coords),
            DeviceLink::StreamOut(output) => {
                let result = output.send(&coords);
                if !output.is_connected() {
                    self.degraded = true;
                }
                result
            }
            DeviceLink::DatagramIn(_) | DeviceLink::StreamIn(_) => Ok(()),
        };
        result.map_err(|source| self.device_error(source))
    }

    /// Neurons of `group` addressed by the device since the last call.
    ///
    /// Coordinates outside the group layout are dropped.
    pub fn receive(&mut self, group: &NeuronGroupRecord) -> Result<Vec<NeuronId>> {
        if self.degraded {
            return Ok(Vec::new());
        }
        let coords = match &mut self.link {
            DeviceLink::DatagramIn(input) => input.drain(),
            DeviceLink::StreamIn(input) => match input.fetch() {
                Ok(coords) => coords,
                Err(source) => {
                    if !input.is_connected() {
                        self.degraded = true;
                    }
                    return Err(self.device_error(source));
                }
            },
            DeviceLink::DatagramOut(_) | DeviceLink::StreamOut(_) => Vec::new(),
        };

        let mut neurons = Vec::with_capacity(coords.len());
        for (x, y) in coords {
            match group.neuron_at(x as u32, y as u32) {
                Some(neuron) => neurons.push(neuron),
                None => log::debug!("Device {} sent ({}, {}) outside group {}", self.record.id, x, y, group.id),
            }
        }
        Ok(neurons)
    }

    /// Pace the worker against a synchronized datagram input.
    ///
    /// Returns the time to sleep before the next step and records the
    /// delaying flag of `group` in the store whenever it changes.
    pub fn pace(
        &mut self,
        store: &dyn ParameterStore,
        group: GroupId,
        local_compute: Duration,
    ) -> Result<Duration> {
        let input = match &self.link {
            DeviceLink::DatagramIn(input) if self.record.synchronized && !self.degraded => input,
            _ => return Ok(Duration::ZERO),
        };
        let other_delaying = store.sync_delay_active(self.record.id, group)?;
        let decision = input.pace(local_compute, other_delaying);
        if decision.delaying != self.delaying {
            store.set_sync_delay(self.record.id, group, decision.delaying)?;
            self.delaying = decision.delaying;
        }
        Ok(decision.sleep)
    }

    /// Mark the link as lost
    pub fn degrade(&mut self) {
        self.degraded = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spikestream_storage::{DeviceRole, MemoryStore, ModelTypeId, StoreImage};
    use std::{
        io::{Read, Write},
        net::{TcpListener, TcpStream},
    };

    fn group(width: u32, length: u32) -> NeuronGroupRecord {
        NeuronGroupRecord {
            id: GroupId::new(1),
            name: "retina".into(),
            start_neuron_id: NeuronId::new(1000),
            width,
            length,
            neuron_type: ModelTypeId::new(1),
        }
    }

    fn record(direction: DeviceDirection, transport: DeviceTransport, port: u16) -> DeviceRecord {
        DeviceRecord {
            id: DeviceId::new(1),
            group: GroupId::new(1),
            address: "127.0.0.1".into(),
            port,
            direction,
            transport,
            role: DeviceRole::Client,
            synchronized: true,
            width: 300,
            length: 1,
        }
    }

    #[test]
    fn test_out_of_range_firing_leaves_stream_open() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (mut device, _) = listener.accept().unwrap();
        device.set_nonblocking(true).unwrap();

        let mut bridge = DeviceBridge::with_link(
            record(DeviceDirection::Output, DeviceTransport::Stream, port),
            DeviceLink::StreamOut(StreamOutput::new(client).unwrap()),
        );
        let group = group(300, 1);
        let fired: Vec<NeuronId> = (1000..1300).map(NeuronId::new).collect();

        let err = bridge.send_firing(3, false, &group, &fired).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(!bridge.is_degraded());
        match &bridge.link {
            DeviceLink::StreamOut(output) => assert!(output.is_connected()),
            other => panic!("unexpected link {:?}", other),
        }

        let mut buffer = [0u8; 16];
        let read = device.read(&mut buffer);
        assert!(matches!(read, Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock));
    }

    #[test]
    fn test_datagram_input_maps_coordinates() {
        let input = DatagramInput::open("127.0.0.1:0").unwrap();
        let target = input.local_addr();
        let mut bridge = DeviceBridge::with_link(
            record(DeviceDirection::Input, DeviceTransport::Datagram, target.port()),
            DeviceLink::DatagramIn(input),
        );
        let group = group(4, 4);

        let sender = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        sender
            .send_to(&codec::encode_datagram(1, false, &[(1, 2), (9, 9)]).unwrap(), target)
            .unwrap();

        let mut neurons = Vec::new();
        for _ in 0..100 {
            neurons.extend(bridge.receive(&group).unwrap());
            if !neurons.is_empty() {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(neurons, vec![NeuronId::new(1000 + 2 * 4 + 1)]);
    }

    #[test]
    fn test_silent_stream_input_is_idle_not_degraded() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (mut device, _) = listener.accept().unwrap();

        let mut bridge = DeviceBridge::with_link(
            record(DeviceDirection::Input, DeviceTransport::Stream, 0),
            DeviceLink::StreamIn(StreamInput::with_timeout(client, Duration::from_millis(50)).unwrap()),
        );
        let group = group(4, 4);

        let err = bridge.receive(&group).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RecoverableIo);
        assert!(!bridge.is_degraded());

        device.write_all(&codec::encode_frame(&[(3, 0)]).unwrap()).unwrap();
        assert_eq!(bridge.receive(&group).unwrap(), vec![NeuronId::new(1003)]);
    }

    #[test]
    fn test_degraded_output_is_skipped() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (device, _) = listener.accept().unwrap();
        drop(device);

        let mut bridge = DeviceBridge::with_link(
            record(DeviceDirection::Output, DeviceTransport::Stream, 0),
            DeviceLink::StreamOut(StreamOutput::new(client).unwrap()),
        );
        let group = group(2, 2);
        let result = bridge.send_firing(1, false, &group, &[NeuronId::new(1000)]);
        assert!(result.is_err());
        assert!(bridge.is_degraded());
        assert!(bridge.send_firing(2, false, &group, &[NeuronId::new(1000)]).is_ok());
    }

    #[test]
    fn test_open_failure_is_fatal_load() {
        let spare = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = spare.local_addr().unwrap().port();
        drop(spare);
        let err = DeviceBridge::open(record(DeviceDirection::Output, DeviceTransport::Stream, port)).unwrap_err();
        assert!(matches!(err, RuntimeError::DeviceOpen { device: 1, .. }));
        assert_eq!(err.kind(), ErrorKind::FatalLoad);
    }

    #[test]
    fn test_unsynchronized_input_never_paces() {
        let store = MemoryStore::new(StoreImage::new()).unwrap();
        let input = DatagramInput::open("127.0.0.1:0").unwrap();
        let mut device = record(DeviceDirection::Input, DeviceTransport::Datagram, 0);
        device.synchronized = false;
        let mut bridge = DeviceBridge::with_link(device, DeviceLink::DatagramIn(input));
        let sleep = bridge.pace(&store, GroupId::new(1), Duration::ZERO).unwrap();
        assert_eq!(sleep, Duration::ZERO);
        assert!(!bridge.is_delaying());
    }
}
