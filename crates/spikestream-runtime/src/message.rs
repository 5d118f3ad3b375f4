//! Messages exchanged over the fabric

use crate::{error::*, models::MonitorChannel, worker::WorkerState};
use spikestream_storage::{GroupId, NeuronId, NoiseMode, Step, UpdateMode};
use std::fmt;

/// Address of a fabric endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EndpointId {
    /// The worker owning a neuron group
    Worker(GroupId),
    /// The process driving the cluster
    Controller,
    /// A passive listener (archiver, viewer, test harness)
    Observer(u32),
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Worker(group) => write!(f, "worker {}", group),
            Self::Controller => write!(f, "controller"),
            Self::Observer(id) => write!(f, "observer {}", id),
        }
    }
}

/// Events one worker sends another for one step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventBatch {
    /// Step the sender was at when it flushed
    pub step: Step,
    /// Sending worker
    pub sender: GroupId,
    /// Number of events
    pub count: u32,
    /// `source_rel << 16 | dest_rel` per event
    pub words: Vec<u32>,
}

impl EventBatch {
    /// Size of the encoded header in bytes
    pub const HEADER_SIZE: usize = 12;

    /// Pack arena pairs `(source, dest, source, dest, ...)` into a batch
    pub fn pack(step: Step, sender: GroupId, pairs: &[u16]) -> Self {
        let words: Vec<u32> = pairs
            .chunks_exact(2)
            .map(|pair| (pair[0] as u32) << 16 | pair[1] as u32)
            .collect();
        Self {
            step,
            sender,
            count: words.len() as u32,
            words,
        }
    }

    /// Iterate over `(source_rel, dest_rel)` pairs
    pub fn events(&self) -> impl Iterator<Item = (u16, u16)> + '_ {
        self.words.iter().map(|&word| ((word >> 16) as u16, word as u16))
    }

    /// Encode as little-endian bytes: step, sender, count, words
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::HEADER_SIZE + self.words.len() * 4);
        out.extend_from_slice(&self.step.to_le_bytes());
        out.extend_from_slice(&self.sender.raw().to_le_bytes());
        out.extend_from_slice(&self.count.to_le_bytes());
        for word in &self.words {
            out.extend_from_slice(&word.to_le_bytes());
        }
        out
    }

    /// Decode bytes produced by [`EventBatch::to_bytes`]
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::HEADER_SIZE {
            return Err(RuntimeError::validation(format!("batch of {} bytes has no header", data.len())));
        }
        let read = |at: usize| u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]]);
        let step = read(0);
        let sender = GroupId::new(read(4));
        let count = read(8);

        let body = &data[Self::HEADER_SIZE..];
        if body.len() != count as usize * 4 {
            return Err(RuntimeError::validation(format!(
                "batch declares {} events but carries {} bytes",
                count,
                body.len()
            )));
        }
        let words = (0..count as usize).map(|i| read(Self::HEADER_SIZE + i * 4)).collect();
        Ok(Self {
            step,
            sender,
            count,
            words,
        })
    }
}

/// Parameter family to reload from the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterScope {
    /// Neuron type parameters
    Neuron,
    /// Connection group parameters
    Synapse,
    /// Simulation-wide parameters
    Global,
    /// Noise configuration
    Noise,
}

/// Data stream a listener can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataKind {
    /// Copies of the event batches sent by the worker's routers
    SpikeData,
    /// Lists of neurons that fired each step
    FiringData,
}

/// Unit whose state is monitored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MonitorTarget {
    /// A neuron
    Neuron(NeuronId),
    /// A synapse, by its end points
    Synapse {
        /// Source neuron
        from: NeuronId,
        /// Destination neuron
        to: NeuronId,
    },
}

/// Lifecycle and control commands
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Load topology and parameters from the store
    LoadData,
    /// Run continuously
    Start,
    /// Pause after the current step
    Stop,
    /// Advance exactly one step
    Step,
    /// Reload a parameter family
    ReloadParameters(ParameterScope),
    /// Replace synapse weights with the committed weights of the store
    ReloadWeights,
    /// Persist synapse weights to the committed table
    SaveWeights,
    /// Persist synapse weights to the view table
    SaveViewWeights,
    /// Select which units update each step
    SetUpdateMode(UpdateMode),
    /// Minimum wall-clock duration of a step (ms)
    SetMinStepDuration(u64),
    /// Start reporting a unit's state every step
    StartMonitoring(MonitorTarget),
    /// Stop reporting a unit's state
    StopMonitoring(MonitorTarget),
    /// Inject noise once
    InjectNoise(NoiseMode),
    /// Force neurons to fire at the next step
    FireNeurons(Vec<NeuronId>),
    /// Add a listener
    Subscribe {
        /// Listener endpoint
        endpoint: EndpointId,
        /// Stream to receive
        data: DataKind,
    },
    /// Remove a listener
    Unsubscribe {
        /// Listener endpoint
        endpoint: EndpointId,
        /// Stream to stop
        data: DataKind,
    },
    /// Leave the receive loop
    Shutdown,
}

/// Status and telemetry sent to the controller
#[derive(Debug, Clone, PartialEq)]
pub enum Report {
    /// Loading finished; the worker is ready
    LoadingComplete {
        /// Reporting group
        group: GroupId,
    },
    /// A barrier closed
    StepCompleted {
        /// Reporting group
        group: GroupId,
        /// Step that completed
        step: Step,
    },
    /// Worker state changed
    StateChanged {
        /// Reporting group
        group: GroupId,
        /// New state
        state: WorkerState,
    },
    /// Description of a newly monitored unit
    MonitorInfo {
        /// Reporting group
        group: GroupId,
        /// Monitored unit
        target: MonitorTarget,
        /// Ordered quantities
        channels: Vec<MonitorChannel>,
    },
    /// One sample of a monitored unit
    MonitorData {
        /// Reporting group
        group: GroupId,
        /// Monitored unit
        target: MonitorTarget,
        /// Simulated time (ms)
        time_ms: f64,
        /// Values in channel order
        values: Vec<f64>,
    },
    /// Informational message
    Info {
        /// Reporting group
        group: GroupId,
        /// Message text
        message: String,
    },
    /// Non-fatal problem
    Warning {
        /// Reporting group
        group: GroupId,
        /// Message text
        message: String,
    },
    /// Error with its severity
    Error {
        /// Reporting group
        group: GroupId,
        /// Severity
        kind: ErrorKind,
        /// Message text
        message: String,
    },
}

impl Report {
    /// Group that produced the report
    pub fn group(&self) -> GroupId {
        match self {
            Self::LoadingComplete { group }
            | Self::StepCompleted { group, .. }
            | Self::StateChanged { group, .. }
            | Self::MonitorInfo { group, .. }
            | Self::MonitorData { group, .. }
            | Self::Info { group, .. }
            | Self::Warning { group, .. }
            | Self::Error { group, .. } => *group,
        }
    }
}

/// Payload of an envelope
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Control command
    Command(Command),
    /// Events for one step
    SpikeBatch(EventBatch),
    /// Neurons of a group that fired at a step
    FiringNeurons {
        /// Firing group
        group: GroupId,
        /// Step of the firing
        step: Step,
        /// Neurons that fired
        neurons: Vec<NeuronId>,
    },
    /// Self-addressed step trigger for workers without peers
    Tick,
    /// Status report
    Report(Report),
}

/// A message with its sender
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Sending endpoint
    pub from: EndpointId,
    /// Payload
    pub message: Message,
}

impl Envelope {
    /// Wrap a message
    pub fn new(from: EndpointId, message: Message) -> Self {
        Self { from, message }
    }
}
