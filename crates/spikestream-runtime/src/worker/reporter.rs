//! Upstream report channel of a worker

use crate::{
    error::*,
    fabric::Fabric,
    message::{EndpointId, Envelope, Message, Report},
};
use spikestream_storage::GroupId;
use std::sync::Arc;

/// Sends reports from one worker to the controller
#[derive(Clone)]
pub struct Reporter {
    group: GroupId,
    fabric: Arc<dyn Fabric>,
}

impl std::fmt::Debug for Reporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reporter").field("group", &self.group).finish()
    }
}

impl Reporter {
    /// Reporter for `group`
    pub fn new(group: GroupId, fabric: Arc<dyn Fabric>) -> Self {
        Self { group, fabric }
    }

    /// Reporting group
    pub fn group(&self) -> GroupId {
        self.group
    }

    /// Fabric the reports travel over
    pub fn fabric(&self) -> &dyn Fabric {
        self.fabric.as_ref()
    }

    /// Send a report; a missing controller is only logged
    pub fn send(&self, report: Report) {
        let envelope = Envelope::new(EndpointId::Worker(self.group), Message::Report(report));
        if let Err(err) = self.fabric.send(EndpointId::Controller, envelope) {
            log::trace!("Group {} report dropped: {}", self.group, err);
        }
    }

    /// Informational message
    pub fn info(&self, message: impl Into<String>) {
        self.send(Report::Info {
            group: self.group,
            message: message.into(),
        });
    }

    /// Non-fatal problem
    pub fn warning(&self, message: impl Into<String>) {
        let message = message.into();
        log::warn!("Group {}: {}", self.group, message);
        self.send(Report::Warning {
            group: self.group,
            message,
        });
    }

    /// Report an error according to its severity.
    ///
    /// Recoverable I/O problems become warnings; everything else is an error
    /// report carrying its kind.
    pub fn error(&self, err: &RuntimeError) {
        let kind = err.kind();
        if kind == ErrorKind::RecoverableIo {
            self.warning(err.to_string());
            return;
        }
        if kind.is_fatal() {
            log::error!("Group {}: {}", self.group, err);
        } else {
            log::warn!("Group {} rejected request: {}", self.group, err);
        }
        self.send(Report::Error {
            group: self.group,
            kind,
            message: err.to_string(),
        });
    }
}
