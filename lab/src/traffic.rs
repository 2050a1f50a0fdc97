use crate::clients::FleetProvider;
use crate::error::LabError;
use crate::lab::{Lab, Status};
use crate::task_group::TaskGroup;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

const PAYMENT_DESCRIPTION: &str = "streamslab traffic";

/// One randomized payment: create an invoice on `recipient`, pay it from
/// `sender`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequest {
    pub sender: String,
    pub recipient: String,
    pub amount_msat: u64,
}

/// Deterministic source of payment rounds.
///
/// Seeded from the experiment name prefix, total node count and total channel
/// count, so a given topology replays an identical traffic sequence across
/// runs. Amounts are Gaussian with mean `mean_amount` and sigma of a quarter
/// of it, truncated to an integer.
pub struct TrafficPlan {
    rng: StdRng,
    node_names: Vec<String>,
    mean_amount: u64,
    request_count: usize,
}

impl TrafficPlan {
    pub fn new(
        experiment_name: &str,
        node_names: Vec<String>,
        total_channel_count: usize,
        mean_amount: u64,
    ) -> Self {
        let prefix = experiment_name.split('_').next().unwrap_or(experiment_name);
        let seed_input = format!("{}:{}:{}", prefix, node_names.len(), total_channel_count);
        let digest = Sha256::digest(seed_input.as_bytes());
        let mut seed_bytes = [0u8; 8];
        for (dst, src) in seed_bytes.iter_mut().zip(digest.iter()) {
            *dst = *src;
        }
        let seed = u64::from_le_bytes(seed_bytes);

        // At least one request per round keeps the interval well-defined for
        // fleets smaller than four nodes.
        let request_count = (node_names.len() / 4).max(1);

        Self {
            rng: StdRng::seed_from_u64(seed),
            node_names,
            mean_amount,
            request_count,
        }
    }

    pub fn request_count(&self) -> usize {
        self.request_count
    }

    /// Spacing between successive submissions within one round.
    pub fn wait_interval(&self) -> Duration {
        Duration::from_secs_f64(10.0 / self.request_count as f64)
    }

    /// Standard normal draw, Box-Muller transform.
    fn standard_normal(&mut self) -> f64 {
        let u1: f64 = self.rng.gen();
        let u2: f64 = self.rng.gen();
        (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
    }

    fn pick_node(&mut self) -> Option<String> {
        if self.node_names.is_empty() {
            return None;
        }
        let index = self.rng.gen_range(0..self.node_names.len());
        self.node_names.get(index).cloned()
    }

    pub fn next_request(&mut self) -> Option<PaymentRequest> {
        let sender = self.pick_node()?;
        let recipient = self.pick_node()?;
        let mean = self.mean_amount as f64;
        let amount = mean + 0.25 * mean * self.standard_normal();
        Some(PaymentRequest {
            sender,
            recipient,
            // Truncating cast; negative draws saturate to zero.
            amount_msat: amount as u64,
        })
    }

    /// One round of requests, `total_node_count / 4` of them.
    pub fn next_round(&mut self) -> Vec<PaymentRequest> {
        (0..self.request_count)
            .filter_map(|_| self.next_request())
            .collect()
    }
}

/// Issue randomized payments between fleet members while the lab is Ready.
///
/// Each request becomes one concurrent unit of work in a bounded task group;
/// individual failures are logged through the sink and never abort the
/// generator or sibling payments. Exits cleanly as soon as the lab leaves
/// Ready, then drains in-flight payments.
pub async fn generate_traffic<P: FleetProvider>(lab: &Lab<P>, mean_amount: u64) {
    let mut plan = TrafficPlan::new(
        lab.name(),
        lab.node_names(),
        lab.total_channel_count(),
        mean_amount,
    );
    let sink = lab.event_sink();
    let mut shutdown = lab.shutdown_receiver();
    let mut group: TaskGroup<()> = TaskGroup::new(
        lab.config().task_limit,
        Arc::clone(&sink),
        lab.shutdown_receiver(),
    );

    sink.traffic_started(lab.name());

    'rounds: while lab.status() == Status::Ready {
        let wait_interval = plan.wait_interval();
        for request in plan.next_round() {
            if lab.status() != Status::Ready {
                break 'rounds;
            }
            let (Some(sender), Some(recipient)) =
                (lab.node(&request.sender), lab.node(&request.recipient))
            else {
                continue;
            };
            let sink = Arc::clone(&sink);
            let task_name = format!(
                "GENERATE_PAY_INVOICE {} {} {}",
                request.sender, request.recipient, request.amount_msat
            );
            group.spawn(task_name, async move {
                let amount = request.amount_msat;
                let outcome: Result<(), LabError> = async {
                    let invoice = recipient.new_invoice(amount, PAYMENT_DESCRIPTION).await?;
                    sender.pay_invoice(&invoice).await?;
                    Ok(())
                }
                .await;
                match &outcome {
                    Ok(()) => sink.payment_succeeded(sender.name(), recipient.name(), amount),
                    Err(error) => {
                        sink.payment_failed(sender.name(), recipient.name(), amount, error)
                    }
                }
                // Payment failures are logged above, not surfaced as task
                // failures.
                Ok(())
            });
            tokio::select! {
                _ = tokio::time::sleep(wait_interval) => {}
                _ = shutdown.wait_for(|stop| *stop) => break 'rounds,
            }
        }
    }

    group.join_all().await;
    sink.traffic_stopped(lab.name());
}
