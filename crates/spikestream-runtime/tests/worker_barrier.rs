//! Drives a single worker by hand, with the test playing its only peer.

use crossbeam::channel::Receiver;
use spikestream_runtime::{
    ChannelFabric, Command, EndpointId, Envelope, ErrorKind, EventBatch, Fabric, GroupId, Message,
    ModelRegistry, NeuronId, ParameterStore, ParameterTable, Report, SimulationConfig, Worker,
    WorkerState,
};
use spikestream_storage::{MemoryStore, StoreImage};
use std::sync::Arc;

const OWN: GroupId = GroupId::new(1);
const PEER: GroupId = GroupId::new(2);

fn image() -> StoreImage {
    StoreImage::new()
        .neuron_type(
            1,
            "standard",
            ParameterTable::new()
                .with("threshold_val", 0.5)
                .with("decay_rate_val", 0.0)
                .with("refractory_period_val", 0.0),
        )
        .synapse_type(2, "weight")
        .group(1, 10, 2, 2, 1)
        .group(2, 20, 2, 2, 1)
        .connection_group(1, 2, 1, 2, ParameterTable::new())
        .connect(1, 20, 11, 1.0, 0)
}

struct Rig {
    worker: Worker,
    inbox: Receiver<Envelope>,
    peer: Receiver<Envelope>,
    controller: Receiver<Envelope>,
}

impl Rig {
    fn loaded() -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let store: Arc<dyn ParameterStore> = Arc::new(MemoryStore::new(image()).unwrap());
        let fabric = Arc::new(ChannelFabric::new());
        let controller = fabric.register(EndpointId::Controller).unwrap();
        let inbox = fabric.register(EndpointId::Worker(OWN)).unwrap();
        let peer = fabric.register(EndpointId::Worker(PEER)).unwrap();
        let worker = Worker::new(
            OWN,
            store,
            Arc::new(ModelRegistry::with_builtins().unwrap()),
            fabric as Arc<dyn Fabric>,
            SimulationConfig::default(),
        );
        let mut rig = Self {
            worker,
            inbox,
            peer,
            controller,
        };
        rig.command(Command::LoadData);
        assert_eq!(rig.worker.state(), WorkerState::Ready);
        rig
    }

    fn command(&mut self, command: Command) {
        self.worker
            .handle(Envelope::new(EndpointId::Controller, Message::Command(command)));
    }

    fn peer_batch(&mut self, step: u32, pairs: &[u16]) {
        let batch = EventBatch::pack(step, PEER, pairs);
        self.worker
            .handle(Envelope::new(EndpointId::Worker(PEER), Message::SpikeBatch(batch)));
        while let Ok(envelope) = self.inbox.try_recv() {
            self.worker.handle(envelope);
        }
    }

    fn sent_to_peer(&self) -> Vec<u32> {
        self.peer
            .try_iter()
            .filter_map(|e| match e.message {
                Message::SpikeBatch(batch) => Some(batch.step),
                _ => None,
            })
            .collect()
    }

    fn reports(&self) -> Vec<Report> {
        self.controller
            .try_iter()
            .filter_map(|e| match e.message {
                Message::Report(report) => Some(report),
                _ => None,
            })
            .collect()
    }

    fn completed(&self) -> Vec<u32> {
        self.reports()
            .into_iter()
            .filter_map(|r| match r {
                Report::StepCompleted { step, .. } => Some(step),
                _ => None,
            })
            .collect()
    }
}

#[test]
fn test_barrier_waits_for_peer() {
    let mut rig = Rig::loaded();
    // step 0 has nothing to wait for
    rig.command(Command::Step);
    assert_eq!(rig.worker.state(), WorkerState::Paused);
    assert_eq!(rig.completed(), vec![0]);
    assert_eq!(rig.sent_to_peer(), vec![0]);

    rig.command(Command::Step);
    assert!(rig.completed().is_empty());
    assert!(rig.sent_to_peer().is_empty());

    rig.peer_batch(0, &[]);
    assert_eq!(rig.completed(), vec![1]);
    assert_eq!(rig.sent_to_peer(), vec![1]);
}

#[test]
fn test_early_batch_is_replayed() {
    let mut rig = Rig::loaded();
    rig.command(Command::Step);
    rig.command(Command::Step);
    rig.command(Command::Step);
    rig.reports();

    // the peer closed its step 1 before we closed ours
    rig.peer_batch(1, &[0, 1]);
    assert!(rig.completed().is_empty());
    assert_eq!(rig.worker.engine().unwrap().step(), 1);

    rig.peer_batch(0, &[]);
    assert_eq!(rig.completed(), vec![1, 2]);
    assert_eq!(rig.sent_to_peer(), vec![0, 1, 2]);

    // the parked event (20 -> 11) was applied at step 2
    let engine = rig.worker.engine().unwrap();
    let slot = &engine.population().neurons()[1];
    assert_eq!(slot.model.id(), NeuronId::new(11));
    assert_eq!(slot.last_fire, Some(2));
}

#[test]
fn test_batch_before_load_is_kept() {
    let _ = env_logger::builder().is_test(true).try_init();
    let store: Arc<dyn ParameterStore> = Arc::new(MemoryStore::new(image()).unwrap());
    let fabric = Arc::new(ChannelFabric::new());
    let _controller = fabric.register(EndpointId::Controller).unwrap();
    let inbox = fabric.register(EndpointId::Worker(OWN)).unwrap();
    let peer = fabric.register(EndpointId::Worker(PEER)).unwrap();
    let mut worker = Worker::new(
        OWN,
        store,
        Arc::new(ModelRegistry::with_builtins().unwrap()),
        fabric as Arc<dyn Fabric>,
        SimulationConfig::default(),
    );

    let batch = EventBatch::pack(0, PEER, &[]);
    worker.handle(Envelope::new(EndpointId::Worker(PEER), Message::SpikeBatch(batch)));
    worker.handle(Envelope::new(EndpointId::Controller, Message::Command(Command::LoadData)));
    worker.handle(Envelope::new(EndpointId::Controller, Message::Command(Command::Step)));
    worker.handle(Envelope::new(EndpointId::Controller, Message::Command(Command::Step)));
    while let Ok(envelope) = inbox.try_recv() {
        worker.handle(envelope);
    }
    assert_eq!(worker.engine().unwrap().step(), 2);
    assert_eq!(peer.try_iter().count(), 2);
}

#[test]
fn test_out_of_order_batch_is_fatal() {
    let mut rig = Rig::loaded();
    rig.command(Command::Step);
    rig.reports();

    rig.peer_batch(5, &[]);
    assert_eq!(rig.worker.state(), WorkerState::Error);
    let reports = rig.reports();
    assert!(reports
        .iter()
        .any(|r| matches!(r, Report::Error { kind: ErrorKind::FatalRuntime, .. })));

    // only shutdown is honoured from here on
    rig.peer_batch(0, &[]);
    rig.command(Command::Step);
    assert!(rig.reports().is_empty());
    assert!(!rig
        .worker
        .handle(Envelope::new(EndpointId::Controller, Message::Command(Command::Shutdown))));
}

#[test]
fn test_duplicate_batch_is_fatal() {
    let mut rig = Rig::loaded();
    rig.command(Command::Step);
    rig.command(Command::Step);
    rig.peer_batch(1, &[]);
    assert_eq!(rig.worker.state(), WorkerState::Paused);
    rig.peer_batch(1, &[]);
    assert_eq!(rig.worker.state(), WorkerState::Error);
}

#[test]
fn test_unknown_sender_is_fatal() {
    let mut rig = Rig::loaded();
    rig.command(Command::Step);
    let batch = EventBatch::pack(0, GroupId::new(9), &[]);
    rig.worker
        .handle(Envelope::new(EndpointId::Worker(GroupId::new(9)), Message::SpikeBatch(batch)));
    assert_eq!(rig.worker.state(), WorkerState::Error);
}
