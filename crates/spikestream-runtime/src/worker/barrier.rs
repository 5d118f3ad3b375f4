//! Per-step synchronization barrier
//!
//! A worker at step `t` closes its barrier once every expected sender has
//! delivered its batch stamped `t - 1`. Batches stamped `t` come from peers
//! that already closed step `t`; they are parked and replayed after the
//! local barrier closes.

use crate::{error::*, message::EventBatch};
use spikestream_storage::{GroupId, Step};
use std::collections::{BTreeSet, VecDeque};

/// What to do with an incoming batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Apply the events now
    Apply,
    /// Keep the batch until the barrier closes
    Park,
}

/// Sender bookkeeping for the current step
#[derive(Debug, Clone, Default)]
pub struct StepBarrier {
    expected: BTreeSet<GroupId>,
    reported: BTreeSet<GroupId>,
    early: VecDeque<EventBatch>,
}

impl StepBarrier {
    /// Barrier waiting on `expected` senders each step
    pub fn new(expected: impl IntoIterator<Item = GroupId>) -> Self {
        Self {
            expected: expected.into_iter().collect(),
            reported: BTreeSet::new(),
            early: VecDeque::new(),
        }
    }

    /// Senders the barrier waits for
    pub fn expected(&self) -> &BTreeSet<GroupId> {
        &self.expected
    }

    /// Senders that reported for the current step
    pub fn reported(&self) -> &BTreeSet<GroupId> {
        &self.reported
    }

    /// Whether every expected sender reported
    pub fn is_complete(&self) -> bool {
        self.reported.len() == self.expected.len()
    }

    /// Classify a batch against the worker's `current` step.
    ///
    /// Admitting a batch for application records its sender.
    pub fn admit(&mut self, current: Step, batch: &EventBatch) -> Result<Admission> {
        if !self.expected.contains(&batch.sender) {
            return Err(RuntimeError::sync_fault(
                current,
                format!("unexpected sender {}", batch.sender),
            ));
        }

        if current.checked_sub(1) == Some(batch.step) {
            if !self.reported.insert(batch.sender) {
                return Err(RuntimeError::sync_fault(
                    current,
                    format!("second batch from {} for step {}", batch.sender, batch.step),
                ));
            }
            Ok(Admission::Apply)
        } else if batch.step == current {
            if self.early.iter().any(|parked| parked.sender == batch.sender) {
                return Err(RuntimeError::sync_fault(
                    current,
                    format!("second early batch from {} for step {}", batch.sender, batch.step),
                ));
            }
            Ok(Admission::Park)
        } else {
            Err(RuntimeError::sync_fault(
                current,
                format!("batch from {} stamped {}", batch.sender, batch.step),
            ))
        }
    }

    /// Keep an early batch for replay
    pub fn park(&mut self, batch: EventBatch) {
        self.early.push_back(batch);
    }

    /// Number of parked batches
    pub fn early_len(&self) -> usize {
        self.early.len()
    }

    /// Forget the senders of the closed step
    pub fn reset(&mut self) {
        self.reported.clear();
    }

    /// Take the parked batches, in arrival order
    pub fn take_early(&mut self) -> VecDeque<EventBatch> {
        std::mem::take(&mut self.early)
    }
}
