//! Notifications for epoch based training loops.

use std::collections::BTreeMap;

use log::debug;
use serde::Serialize;

use crate::{mailer::Mailer, notifier::Notifier};

/// Metric name to value, as reported by the training loop
pub type Logs = BTreeMap<String, f64>;

/// Hooks a training loop calls as it progresses
pub trait TrainingCallback {
    fn on_train_begin(&mut self, _logs: &Logs) -> anyhow::Result<()> {
        Ok(())
    }

    /// `epoch` is zero based
    fn on_epoch_end(&mut self, _epoch: usize, _logs: &Logs) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_train_end(&mut self, _logs: &Logs) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Mails the start of training, a report of the epoch metrics and the end of training
pub struct NotifyCallback<M> {
    notifier: Notifier<M>,
}

#[derive(Serialize)]
struct EpochRow<'a> {
    epoch: usize,
    #[serde(flatten)]
    logs: &'a Logs,
}

impl<M: Mailer> NotifyCallback<M> {
    pub fn new(notifier: Notifier<M>) -> Self {
        Self { notifier }
    }

    pub fn notifier(&self) -> &Notifier<M> {
        &self.notifier
    }

    /// For reporting a failure of the training loop
    pub fn notifier_mut(&mut self) -> &mut Notifier<M> {
        &mut self.notifier
    }

    pub fn into_notifier(self) -> Notifier<M> {
        self.notifier
    }
}

impl<M: Mailer> TrainingCallback for NotifyCallback<M> {
    fn on_train_begin(&mut self, _logs: &Logs) -> anyhow::Result<()> {
        self.notifier.start()
    }

    fn on_epoch_end(&mut self, epoch: usize, logs: &Logs) -> anyhow::Result<()> {
        debug!("Epoch {epoch} ended with {logs:?}");
        self.notifier.add_report(&EpochRow { epoch, logs })
    }

    fn on_train_end(&mut self, _logs: &Logs) -> anyhow::Result<()> {
        self.notifier.complete()
    }
}
