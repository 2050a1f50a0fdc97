use crate::error::LabError;
use crate::lab::Status;
use log::{error, info, warn};

/// Structured event sink the core reports to.
///
/// Keeps stage transitions, task lifecycle and payment attempts out of the
/// orchestration logic; formatting, rotation and shipping are the
/// implementation's business.
pub trait EventSink: Send + Sync + 'static {
    fn stage_changed(&self, status: Status);
    fn task_started(&self, name: &str);
    fn task_succeeded(&self, name: &str);
    fn task_failed(&self, name: &str, error: &LabError);
    fn task_cancelled(&self, name: &str);
    fn payment_succeeded(&self, sender: &str, recipient: &str, amount_msat: u64);
    fn payment_failed(&self, sender: &str, recipient: &str, amount_msat: u64, error: &LabError);
    fn traffic_started(&self, experiment: &str);
    fn traffic_stopped(&self, experiment: &str);
}

/// Default sink: emits the lab's event vocabulary through the `log` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn stage_changed(&self, status: Status) {
        info!("STAGE {:?}", status);
    }

    fn task_started(&self, name: &str) {
        info!("TASK_STARTED {}", name);
    }

    fn task_succeeded(&self, name: &str) {
        info!("TASK_DONE {}", name);
    }

    fn task_failed(&self, name: &str, error: &LabError) {
        error!("TASK_FAILED {} {}", name, error);
    }

    fn task_cancelled(&self, name: &str) {
        warn!("TASK_CANCELLED {}", name);
    }

    fn payment_succeeded(&self, sender: &str, recipient: &str, amount_msat: u64) {
        info!("PAYMENT {} {} {}", sender, recipient, amount_msat);
    }

    fn payment_failed(&self, sender: &str, recipient: &str, amount_msat: u64, error: &LabError) {
        error!("PAYMENT {} {} {} {}", sender, recipient, amount_msat, error);
    }

    fn traffic_started(&self, experiment: &str) {
        info!("TRAFFIC_START {}", experiment);
    }

    fn traffic_stopped(&self, experiment: &str) {
        info!("TRAFFIC_STOP {}", experiment);
    }
}
