//! In-process controller owning one worker thread per neuron group

use crate::{
    config::SimulationConfig,
    error::*,
    fabric::{ChannelFabric, Fabric},
    message::{Command, DataKind, EndpointId, Envelope, Message, Report},
    plugin::ModelRegistry,
    worker::{Worker, WorkerState},
};
use crossbeam::channel::{Receiver, RecvTimeoutError};
use spikestream_storage::{GroupId, ParameterStore, Step};
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    thread::JoinHandle,
    time::{Duration, Instant},
};

/// A running simulation: the fabric, its workers and the controller inbox
pub struct Cluster {
    fabric: Arc<ChannelFabric>,
    groups: Vec<GroupId>,
    workers: Vec<(GroupId, JoinHandle<WorkerState>)>,
    controller: Receiver<Envelope>,
    next_observer: u32,
    /// Steps completed per group, i.e. the next step it will compute
    completed: HashMap<GroupId, u32>,
    backlog: VecDeque<Report>,
}

impl std::fmt::Debug for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cluster")
            .field("groups", &self.groups)
            .field("completed", &self.completed)
            .finish()
    }
}

impl Cluster {
    /// Spawn an idle worker for every group in the store
    pub fn new(
        store: Arc<dyn ParameterStore>,
        registry: Arc<ModelRegistry>,
        config: SimulationConfig,
    ) -> Result<Self> {
        config.validate()?;
        let fabric = Arc::new(ChannelFabric::new());
        let controller = fabric.register(EndpointId::Controller)?;
        let mut groups: Vec<GroupId> = store.neuron_groups()?.iter().map(|g| g.id).collect();
        groups.sort_unstable();

        let mut cluster = Self {
            fabric: Arc::clone(&fabric),
            groups: groups.clone(),
            workers: Vec::with_capacity(groups.len()),
            controller,
            next_observer: 0,
            completed: HashMap::new(),
            backlog: VecDeque::new(),
        };
        for group in groups {
            let inbox = fabric.register(EndpointId::Worker(group))?;
            let worker = Worker::new(
                group,
                Arc::clone(&store),
                Arc::clone(&registry),
                fabric.clone() as Arc<dyn Fabric>,
                config.clone(),
            );
            let handle = worker.spawn(inbox)?;
            cluster.workers.push((group, handle));
        }
        log::info!("Spawned {} workers", cluster.workers.len());
        Ok(cluster)
    }

    /// Groups with a worker, in ascending order
    pub fn groups(&self) -> &[GroupId] {
        &self.groups
    }

    /// Fabric shared with the workers
    pub fn fabric(&self) -> &Arc<ChannelFabric> {
        &self.fabric
    }

    /// Highest completed step reported by `group`
    pub fn completed_step(&self, group: GroupId) -> Option<Step> {
        self.completed.get(&group).map(|&done| done - 1)
    }

    /// Number of steps `group` has completed
    pub fn steps_completed(&self, group: GroupId) -> u32 {
        self.completed.get(&group).copied().unwrap_or(0)
    }

    /// Send a command to one worker
    pub fn command(&self, group: GroupId, command: Command) -> Result<()> {
        self.fabric.send(
            EndpointId::Worker(group),
            Envelope::new(EndpointId::Controller, Message::Command(command)),
        )
    }

    /// Send a command to every worker
    pub fn broadcast(&self, command: Command) -> Result<()> {
        let targets: Vec<EndpointId> = self.groups.iter().map(|&g| EndpointId::Worker(g)).collect();
        self.fabric.broadcast(
            &targets,
            &Envelope::new(EndpointId::Controller, Message::Command(command)),
        )
    }

    /// Load every group and wait until all of them report completion
    pub fn load(&mut self, timeout: Duration) -> Result<()> {
        self.broadcast(Command::LoadData)?;
        let mut pending: Vec<GroupId> = self.groups.clone();
        let deadline = Instant::now() + timeout;
        while !pending.is_empty() {
            let report = self.wait(deadline, "load")?;
            if let Report::LoadingComplete { group } = report {
                pending.retain(|&g| g != group);
            }
        }
        log::info!("All {} groups loaded", self.groups.len());
        Ok(())
    }

    /// Start continuous stepping
    pub fn start(&self) -> Result<()> {
        self.broadcast(Command::Start)
    }

    /// Pause every worker
    pub fn stop(&self) -> Result<()> {
        self.broadcast(Command::Stop)
    }

    /// Grant every worker one step
    pub fn step(&self) -> Result<()> {
        self.broadcast(Command::Step)
    }

    /// Run `steps` more steps in every group and wait for them to complete.
    ///
    /// Returns the number of steps every group has completed.
    pub fn run_steps(&mut self, steps: u32, timeout: Duration) -> Result<u32> {
        let base = self.groups.iter().map(|&g| self.steps_completed(g)).min();
        let target = base.unwrap_or(0) + steps;
        for _ in 0..steps {
            self.step()?;
        }
        let deadline = Instant::now() + timeout;
        while self.groups.iter().any(|&g| self.steps_completed(g) < target) {
            self.wait(deadline, "run steps")?;
        }
        Ok(target)
    }

    /// Register a new observer endpoint and subscribe it to `data` from every group
    pub fn observe(&mut self, data: DataKind) -> Result<Receiver<Envelope>> {
        self.next_observer += 1;
        let endpoint = EndpointId::Observer(self.next_observer);
        let inbox = self.fabric.register(endpoint)?;
        self.broadcast(Command::Subscribe { endpoint, data })?;
        Ok(inbox)
    }

    /// Next report, waiting at most `timeout`; `None` on timeout
    pub fn recv_report(&mut self, timeout: Duration) -> Result<Option<Report>> {
        if let Some(report) = self.backlog.pop_front() {
            return Ok(Some(report));
        }
        match self.controller.recv_timeout(timeout) {
            Ok(envelope) => Ok(self.track(envelope)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(RuntimeError::channel_closed(EndpointId::Controller)),
        }
    }

    /// All reports received so far, without waiting
    pub fn drain_reports(&mut self) -> Vec<Report> {
        let mut reports: Vec<Report> = self.backlog.drain(..).collect();
        while let Ok(envelope) = self.controller.try_recv() {
            if let Some(report) = self.track(envelope) {
                reports.push(report);
            }
        }
        reports
    }

    /// Shut every worker down and collect its final state
    pub fn shutdown(mut self) -> Vec<(GroupId, WorkerState)> {
        self.join_all()
    }

    fn join_all(&mut self) -> Vec<(GroupId, WorkerState)> {
        if self.workers.is_empty() {
            return Vec::new();
        }
        if let Err(err) = self.broadcast(Command::Shutdown) {
            log::warn!("Shutdown broadcast incomplete: {}", err);
        }
        let mut states = Vec::with_capacity(self.workers.len());
        for (group, handle) in self.workers.drain(..) {
            match handle.join() {
                Ok(state) => states.push((group, state)),
                Err(_) => {
                    log::error!("Worker {} panicked", group);
                    states.push((group, WorkerState::Error));
                }
            }
        }
        states
    }

    /// Record step progress; reports other than from workers are ignored
    fn track(&mut self, envelope: Envelope) -> Option<Report> {
        let Message::Report(report) = envelope.message else {
            return None;
        };
        if let Report::StepCompleted { group, step } = report {
            let entry = self.completed.entry(group).or_insert(0);
            *entry = (*entry).max(step + 1);
        }
        Some(report)
    }

    /// Wait for the next report before `deadline`, failing on fatal errors.
    ///
    /// Non-fatal reports are kept in the backlog for `recv_report`.
    fn wait(&mut self, deadline: Instant, operation: &str) -> Result<Report> {
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let envelope = match self.controller.recv_timeout(remaining) {
                Ok(envelope) => envelope,
                Err(RecvTimeoutError::Timeout) => return Err(RuntimeError::timeout(operation)),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(RuntimeError::channel_closed(EndpointId::Controller))
                }
            };
            let Some(report) = self.track(envelope) else {
                continue;
            };
            if let Report::Error { group, kind, message } = &report {
                if kind.is_fatal() {
                    return Err(RuntimeError::WorkerFailed {
                        group: group.raw(),
                        kind: *kind,
                        message: message.clone(),
                    });
                }
            }
            self.backlog.push_back(report.clone());
            return Ok(report);
        }
    }
}

impl Drop for Cluster {
    fn drop(&mut self) {
        self.join_all();
    }
}
