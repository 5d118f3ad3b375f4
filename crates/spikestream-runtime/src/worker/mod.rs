//! Worker orchestrator: one thread per neuron group
//!
//! A worker blocks on its inbox and handles one envelope at a time. Commands
//! drive its lifecycle, peer batches feed the step barrier, and
//! self-addressed ticks keep it stepping when nothing else would wake it.

pub mod barrier;
pub mod engine;
pub mod population;
pub mod reporter;

pub use barrier::{Admission, StepBarrier};
pub use engine::GroupEngine;
pub use population::{MarkSet, NeuronSlot, Population, SynapseSlot};
pub use reporter::Reporter;

use crate::{
    config::SimulationConfig,
    error::*,
    fabric::Fabric,
    message::{Command, DataKind, EndpointId, Envelope, EventBatch, Message, Report},
    plugin::ModelRegistry,
};
use crossbeam::channel::Receiver;
use spikestream_storage::{GroupId, ParameterStore, WeightTable};
use std::{fmt, sync::Arc, thread::JoinHandle};

/// Lifecycle state of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerState {
    /// Waiting for `LoadData`
    Idle,
    /// Building the group
    Loading,
    /// Loaded, not stepping
    Ready,
    /// Stepping continuously
    Running,
    /// Stepping only on `Step`
    Paused,
    /// Leaving the receive loop
    ShuttingDown,
    /// Stopped by a fatal error; only `Shutdown` is processed
    Error,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "Idle",
            Self::Loading => "Loading",
            Self::Ready => "Ready",
            Self::Running => "Running",
            Self::Paused => "Paused",
            Self::ShuttingDown => "ShuttingDown",
            Self::Error => "Error",
        };
        f.write_str(name)
    }
}

/// The actor owning one neuron group
pub struct Worker {
    group: GroupId,
    state: WorkerState,
    store: Arc<dyn ParameterStore>,
    registry: Arc<ModelRegistry>,
    fabric: Arc<dyn Fabric>,
    config: SimulationConfig,
    reporter: Reporter,
    engine: Option<GroupEngine>,
    pre_load: Vec<EventBatch>,
    subscriptions: Vec<(EndpointId, DataKind)>,
    credits: u32,
    tick_pending: bool,
    since_report: u32,
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("group", &self.group)
            .field("state", &self.state)
            .field("credits", &self.credits)
            .finish()
    }
}

impl Worker {
    /// Create an idle worker for `group`
    pub fn new(
        group: GroupId,
        store: Arc<dyn ParameterStore>,
        registry: Arc<ModelRegistry>,
        fabric: Arc<dyn Fabric>,
        config: SimulationConfig,
    ) -> Self {
        Self {
            group,
            state: WorkerState::Idle,
            reporter: Reporter::new(group, Arc::clone(&fabric)),
            store,
            registry,
            fabric,
            config,
            engine: None,
            pre_load: Vec::new(),
            subscriptions: Vec::new(),
            credits: 0,
            tick_pending: false,
            since_report: 0,
        }
    }

    /// Owned group
    pub fn group(&self) -> GroupId {
        self.group
    }

    /// Current lifecycle state
    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Loaded group, if any
    pub fn engine(&self) -> Option<&GroupEngine> {
        self.engine.as_ref()
    }

    /// Run the receive loop on a new thread named after the group
    pub fn spawn(self, inbox: Receiver<Envelope>) -> Result<JoinHandle<WorkerState>> {
        let name = format!("worker-{}", self.group);
        std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || self.run(inbox))
            .map_err(|err| RuntimeError::Thread {
                name,
                reason: err.to_string(),
            })
    }

    /// Handle envelopes until `Shutdown` or until every sender is gone
    pub fn run(mut self, inbox: Receiver<Envelope>) -> WorkerState {
        log::debug!("Worker {} started", self.group);
        while let Ok(envelope) = inbox.recv() {
            if !self.handle(envelope) {
                break;
            }
        }
        log::debug!("Worker {} stopped in state {}", self.group, self.state);
        self.state
    }

    /// Handle one envelope; returns `false` when the loop should end
    pub fn handle(&mut self, envelope: Envelope) -> bool {
        if let Message::Command(Command::Shutdown) = envelope.message {
            if self.state != WorkerState::Error {
                self.set_state(WorkerState::ShuttingDown);
            }
            return false;
        }
        if self.state == WorkerState::Error {
            log::debug!("Worker {} in error state ignores message from {}", self.group, envelope.from);
            return true;
        }
        if let Err(err) = self.dispatch(envelope) {
            self.fail(err);
        }
        true
    }

    fn fail(&mut self, err: RuntimeError) {
        self.reporter.error(&err);
        if err.kind().is_fatal() {
            self.set_state(WorkerState::Error);
        }
    }

    fn set_state(&mut self, state: WorkerState) {
        if state == self.state {
            return;
        }
        log::debug!("Worker {}: {} -> {}", self.group, self.state, state);
        self.state = state;
        self.reporter.send(Report::StateChanged {
            group: self.group,
            state,
        });
    }

    fn dispatch(&mut self, envelope: Envelope) -> Result<()> {
        match envelope.message {
            Message::Command(command) => self.command(command),
            Message::SpikeBatch(batch) => self.on_batch(batch),
            Message::Tick => {
                self.tick_pending = false;
                self.advance()
            }
            Message::FiringNeurons { .. } | Message::Report(_) => {
                log::trace!("Worker {} ignores telemetry from {}", self.group, envelope.from);
                Ok(())
            }
        }
    }

    fn on_batch(&mut self, batch: EventBatch) -> Result<()> {
        match self.engine.as_mut() {
            Some(engine) => {
                engine.apply_batch(batch)?;
                self.advance()
            }
            None => {
                self.pre_load.push(batch);
                Ok(())
            }
        }
    }

    fn loaded(&mut self, operation: &str) -> Result<&mut GroupEngine> {
        let state = self.state;
        self.engine
            .as_mut()
            .ok_or_else(|| RuntimeError::invalid_state(operation, state))
    }

    fn command(&mut self, command: Command) -> Result<()> {
        match command {
            Command::LoadData => self.load(),
            Command::Start => self.start(),
            Command::Stop => self.stop(),
            Command::Step => self.step(),
            Command::Shutdown => Ok(()),
            Command::Subscribe { endpoint, data } => {
                match self.engine.as_mut() {
                    Some(engine) => engine.subscribe(endpoint, data),
                    None => self.subscriptions.push((endpoint, data)),
                }
                Ok(())
            }
            Command::Unsubscribe { endpoint, data } => match self.engine.as_mut() {
                Some(engine) => engine.unsubscribe(endpoint, data),
                None => {
                    self.subscriptions.retain(|&s| s != (endpoint, data));
                    Ok(())
                }
            },
            Command::ReloadParameters(scope) => {
                let store = Arc::clone(&self.store);
                let config = self.config.clone();
                self.loaded("reload parameters")?
                    .reload_parameters(scope, store.as_ref(), &config)
            }
            Command::ReloadWeights => {
                let store = Arc::clone(&self.store);
                let applied = self.loaded("reload weights")?.reload_weights(store.as_ref())?;
                self.reporter.info(format!("reloaded {} weights", applied));
                Ok(())
            }
            Command::SaveWeights => self.save_weights(WeightTable::Committed),
            Command::SaveViewWeights => self.save_weights(WeightTable::View),
            Command::SetUpdateMode(mode) => {
                self.loaded("set update mode")?.set_update_mode(mode);
                Ok(())
            }
            Command::SetMinStepDuration(ms) => {
                self.loaded("set step duration")?.set_min_step_duration(ms);
                Ok(())
            }
            Command::StartMonitoring(target) => {
                let channels = self.loaded("monitor")?.start_monitoring(target)?;
                self.reporter.send(Report::MonitorInfo {
                    group: self.group,
                    target,
                    channels,
                });
                Ok(())
            }
            Command::StopMonitoring(target) => self.loaded("stop monitoring")?.stop_monitoring(target),
            Command::InjectNoise(mode) => {
                let picked = self.loaded("inject noise")?.inject_noise(mode)?;
                log::debug!("Worker {} injected noise into {} neurons", self.group, picked);
                Ok(())
            }
            Command::FireNeurons(neurons) => self.loaded("fire neurons")?.fire_neurons(&neurons),
        }
    }

    fn save_weights(&mut self, table: WeightTable) -> Result<()> {
        let store = Arc::clone(&self.store);
        match self.loaded("save weights")?.save_weights(store.as_ref(), table) {
            Ok(count) => {
                self.reporter.info(format!("saved {} weights to the {:?} table", count, table));
            }
            Err(err) => {
                self.reporter.warning(format!("saving weights failed: {}", err));
            }
        }
        Ok(())
    }

    fn load(&mut self) -> Result<()> {
        if self.state != WorkerState::Idle {
            return Err(RuntimeError::invalid_state("load", self.state));
        }
        self.set_state(WorkerState::Loading);
        let mut engine = GroupEngine::load(self.store.as_ref(), Arc::clone(&self.registry), self.group, &self.config)?;
        for (endpoint, data) in self.subscriptions.drain(..) {
            engine.subscribe(endpoint, data);
        }
        for batch in self.pre_load.drain(..) {
            engine.apply_batch(batch)?;
        }
        self.engine = Some(engine);
        self.set_state(WorkerState::Ready);
        self.reporter.send(Report::LoadingComplete { group: self.group });
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        match self.state {
            WorkerState::Ready | WorkerState::Paused => {}
            state => return Err(RuntimeError::invalid_state("start", state)),
        }
        self.loaded("start")?.prime();
        self.credits = 0;
        self.set_state(WorkerState::Running);
        self.advance()
    }

    fn stop(&mut self) -> Result<()> {
        match self.state {
            WorkerState::Running => {
                self.credits = 0;
                self.set_state(WorkerState::Paused);
                Ok(())
            }
            WorkerState::Ready | WorkerState::Paused => Ok(()),
            state => Err(RuntimeError::invalid_state("stop", state)),
        }
    }

    fn step(&mut self) -> Result<()> {
        match self.state {
            WorkerState::Ready | WorkerState::Paused => {}
            state => return Err(RuntimeError::invalid_state("step", state)),
        }
        self.loaded("step")?.prime();
        self.set_state(WorkerState::Paused);
        self.credits += 1;
        self.advance()
    }

    /// Close the barrier if it is complete and the worker may step.
    ///
    /// At most one step is closed per call; if another could close right
    /// away a tick is queued so commands in the inbox are served in between.
    fn advance(&mut self) -> Result<()> {
        let running = self.state == WorkerState::Running;
        let Some(engine) = self.engine.as_mut() else {
            return Ok(());
        };
        if !engine.is_ready() || !(running || self.credits > 0) {
            return Ok(());
        }
        if !running {
            self.credits -= 1;
        }

        let step = engine.close_barrier(self.store.as_ref(), &self.reporter)?;
        self.since_report += 1;
        if self.since_report >= self.config.report_every || (!running && self.credits == 0) {
            self.since_report = 0;
            self.reporter.send(Report::StepCompleted {
                group: self.group,
                step,
            });
        }

        engine.replay_early()?;
        let more = engine.is_ready() && (running || self.credits > 0);
        if more {
            self.schedule_tick()?;
        }
        Ok(())
    }

    fn schedule_tick(&mut self) -> Result<()> {
        if self.tick_pending {
            return Ok(());
        }
        let own = EndpointId::Worker(self.group);
        self.fabric.send(own, Envelope::new(own, Message::Tick))?;
        self.tick_pending = true;
        Ok(())
    }
}
