//! Bounded-retry reliable delivery.
//!
//! [`LinkLayer::send`] encodes a [`Packet`] once and pushes the same frame
//! (same sequence number) through the [`Transport`] up to
//! [`RetryPolicy::max_attempts`] times. Every attempt is awaited under
//! [`RetryPolicy::attempt_timeout`]; a failed or timed-out attempt is
//! followed by [`RetryPolicy::retry_delay`] unless it was the last one.
//!
//! The result is reported, never retried further here: escalation after an
//! [`SendResult::Exhausted`] belongs to the caller.
//!
//! With independent per-attempt loss `p`, delivery fails with probability
//! `p^max_attempts`: 0.1 % for 10 % loss and the default three attempts.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use drishti_types::Packet;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, warn};

use crate::codec;
use crate::transport::{DeliveryOutcome, Transport};

pub const DEFAULT_MAX_ATTEMPTS: u8 = 3;
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_millis(100);
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(100);

// ────────────────────────────────────────────────────────────────────────────
// Policy and results
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total transmissions per packet, including the first. Zero is treated
    /// as one.
    pub max_attempts: u8,
    pub attempt_timeout: Duration,
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u8) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    fn attempt_budget(&self) -> u8 {
        self.max_attempts.max(1)
    }
}

/// Final result of one [`LinkLayer::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendResult {
    Delivered,
    Exhausted,
}

/// Lifecycle of a [`LinkAttempt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Pending,
    Delivered,
    Exhausted,
}

/// In-flight state of one send. Lives only inside [`LinkLayer::send`].
#[derive(Debug, Clone)]
pub struct LinkAttempt {
    pub packet: Packet,
    pub attempts_made: u8,
    pub last_sent_at: Option<Instant>,
    pub state: AttemptState,
}

impl LinkAttempt {
    fn new(packet: Packet) -> Self {
        Self {
            packet,
            attempts_made: 0,
            last_sent_at: None,
            state: AttemptState::Pending,
        }
    }
}

/// What happened to one packet.
#[derive(Debug, Clone, PartialEq)]
pub struct SendReport {
    pub packet: Packet,
    pub result: SendResult,
    /// Outcome of every attempt, in order.
    pub outcomes: Vec<DeliveryOutcome>,
    pub elapsed: Duration,
}

impl SendReport {
    pub fn attempts(&self) -> usize {
        self.outcomes.len()
    }

    pub fn delivered(&self) -> bool {
        self.result == SendResult::Delivered
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Stats
// ────────────────────────────────────────────────────────────────────────────

/// Counters shared by every clone of a [`LinkLayer`].
#[derive(Debug, Default)]
pub struct LinkStats {
    attempts: AtomicU64,
    delivered: AtomicU64,
    exhausted: AtomicU64,
}

/// Point-in-time copy of [`LinkStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStatsSnapshot {
    pub attempts: u64,
    pub delivered: u64,
    pub exhausted: u64,
}

impl LinkStatsSnapshot {
    /// Delivered packets over finished sends, or `None` before any send.
    pub fn success_rate(&self) -> Option<f64> {
        let finished = self.delivered + self.exhausted;
        (finished > 0).then(|| self.delivered as f64 / finished as f64)
    }
}

impl LinkStats {
    pub fn snapshot(&self) -> LinkStatsSnapshot {
        LinkStatsSnapshot {
            attempts: self.attempts.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// LinkLayer
// ────────────────────────────────────────────────────────────────────────────

/// Reliable sender over an unreliable [`Transport`]. Cheap to clone; clones
/// share the transport and the stats.
#[derive(Clone)]
pub struct LinkLayer {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    stats: Arc<LinkStats>,
}

impl LinkLayer {
    pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        Self {
            transport,
            policy,
            stats: Arc::new(LinkStats::default()),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn stats(&self) -> LinkStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Deliver `packet`, retrying per the [`RetryPolicy`].
    pub async fn send(&self, packet: Packet) -> SendReport {
        let frame = codec::encode(&packet);
        let budget = self.policy.attempt_budget();
        let started = Instant::now();
        let mut attempt = LinkAttempt::new(packet);
        let mut outcomes = Vec::with_capacity(usize::from(budget));

        while attempt.state == AttemptState::Pending {
            attempt.attempts_made += 1;
            attempt.last_sent_at = Some(Instant::now());
            self.stats.attempts.fetch_add(1, Ordering::Relaxed);

            let receipt = self.transport.attempt_send(frame);
            let outcome = match timeout(self.policy.attempt_timeout, receipt).await {
                Ok(Ok(outcome)) => outcome,
                // The driver dropped the receipt without answering.
                Ok(Err(_)) => DeliveryOutcome::Failure,
                Err(_) => DeliveryOutcome::Timeout,
            };
            outcomes.push(outcome);
            debug!(
                node_id = packet.node_id,
                sequence = packet.sequence,
                attempt = attempt.attempts_made,
                ?outcome,
                "delivery attempt finished"
            );

            if outcome == DeliveryOutcome::Success {
                attempt.state = AttemptState::Delivered;
            } else if attempt.attempts_made >= budget {
                attempt.state = AttemptState::Exhausted;
            } else {
                sleep(self.policy.retry_delay).await;
            }
        }

        let result = match attempt.state {
            AttemptState::Delivered => {
                self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                SendResult::Delivered
            }
            _ => {
                self.stats.exhausted.fetch_add(1, Ordering::Relaxed);
                warn!(
                    node_id = packet.node_id,
                    sequence = packet.sequence,
                    attempts = attempt.attempts_made,
                    "packet undelivered after retry budget"
                );
                SendResult::Exhausted
            }
        };

        SendReport {
            packet,
            result,
            outcomes,
            elapsed: started.elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Frame, decode};
    use crate::transport::{DeliveryReceipt, resolved};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::sync::oneshot;

    /// Replays a fixed list of outcomes and records every frame sent.
    /// `None` in the script means "never answer".
    struct Scripted {
        script: Mutex<VecDeque<Option<DeliveryOutcome>>>,
        sent: Mutex<Vec<Frame>>,
        // Senders parked for unanswered attempts so receipts stay pending.
        parked: Mutex<Vec<oneshot::Sender<DeliveryOutcome>>>,
    }

    impl Scripted {
        fn new(script: Vec<Option<DeliveryOutcome>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                sent: Mutex::new(Vec::new()),
                parked: Mutex::new(Vec::new()),
            })
        }

        fn sent(&self) -> Vec<Frame> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl Transport for Scripted {
        fn attempt_send(&self, frame: Frame) -> DeliveryReceipt {
            self.sent.lock().unwrap().push(frame);
            match self.script.lock().unwrap().pop_front().flatten() {
                Some(outcome) => resolved(outcome),
                None => {
                    let (tx, rx) = oneshot::channel();
                    self.parked.lock().unwrap().push(tx);
                    rx
                }
            }
        }
    }

    fn packet(sequence: u16) -> Packet {
        Packet {
            node_id: 1,
            sequence,
            distance_cm: 120,
            battery_pct: 90,
            flags: 0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn first_success_stops_retrying() {
        let transport = Scripted::new(vec![Some(DeliveryOutcome::Success)]);
        let link = LinkLayer::new(transport.clone(), RetryPolicy::default());

        let report = link.send(packet(1)).await;
        assert_eq!(report.result, SendResult::Delivered);
        assert_eq!(report.attempts(), 1);
        assert_eq!(report.elapsed, Duration::ZERO);
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_reuse_the_same_sequence() {
        let transport = Scripted::new(vec![
            Some(DeliveryOutcome::Failure),
            Some(DeliveryOutcome::Failure),
            Some(DeliveryOutcome::Success),
        ]);
        let link = LinkLayer::new(transport.clone(), RetryPolicy::default());

        let report = link.send(packet(42)).await;
        assert!(report.delivered());
        assert_eq!(report.attempts(), 3);
        // Two retry delays.
        assert_eq!(report.elapsed, Duration::from_millis(200));

        let frames = transport.sent();
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|f| decode(f).unwrap().sequence == 42));
        assert!(frames.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_after_three_failures() {
        let transport = Scripted::new(vec![Some(DeliveryOutcome::Failure); 5]);
        let link = LinkLayer::new(transport.clone(), RetryPolicy::default());

        let report = link.send(packet(7)).await;
        assert_eq!(report.result, SendResult::Exhausted);
        assert_eq!(report.outcomes, vec![DeliveryOutcome::Failure; 3]);
        // No delay after the last attempt.
        assert_eq!(report.elapsed, Duration::from_millis(200));
        assert_eq!(transport.sent().len(), 3);

        let stats = link.stats();
        assert_eq!(stats.attempts, 3);
        assert_eq!(stats.exhausted, 1);
        assert_eq!(stats.success_rate(), Some(0.0));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_transport_times_out_each_attempt() {
        let transport = Scripted::new(vec![None, None, None]);
        let link = LinkLayer::new(transport.clone(), RetryPolicy::default());

        let report = link.send(packet(9)).await;
        assert_eq!(report.result, SendResult::Exhausted);
        assert_eq!(report.outcomes, vec![DeliveryOutcome::Timeout; 3]);
        // 3 timeouts + 2 delays.
        assert_eq!(report.elapsed, Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_receipt_counts_as_failure() {
        struct Forgetful;
        impl Transport for Forgetful {
            fn attempt_send(&self, _frame: Frame) -> DeliveryReceipt {
                let (_tx, rx) = oneshot::channel();
                rx
            }
        }
        let link = LinkLayer::new(
            Arc::new(Forgetful),
            RetryPolicy::default().with_max_attempts(1),
        );
        let report = link.send(packet(3)).await;
        assert_eq!(report.outcomes, vec![DeliveryOutcome::Failure]);
    }

    #[tokio::test(start_paused = true)]
    async fn calibrated_budget_of_five() {
        let transport = Scripted::new(vec![
            Some(DeliveryOutcome::Failure),
            Some(DeliveryOutcome::Timeout),
            Some(DeliveryOutcome::Failure),
            Some(DeliveryOutcome::Failure),
            Some(DeliveryOutcome::Success),
        ]);
        let link = LinkLayer::new(
            transport.clone(),
            RetryPolicy::default().with_max_attempts(5),
        );
        let report = link.send(packet(11)).await;
        assert!(report.delivered());
        assert_eq!(report.attempts(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_attempts_still_sends_once() {
        let transport = Scripted::new(vec![Some(DeliveryOutcome::Failure)]);
        let link = LinkLayer::new(
            transport.clone(),
            RetryPolicy::default().with_max_attempts(0),
        );
        let report = link.send(packet(1)).await;
        assert_eq!(report.attempts(), 1);
        assert_eq!(report.result, SendResult::Exhausted);
    }

    #[test]
    fn success_rate_before_any_send_is_unknown() {
        assert_eq!(LinkStatsSnapshot::default().success_rate(), None);
        let snap = LinkStatsSnapshot {
            attempts: 10,
            delivered: 3,
            exhausted: 1,
        };
        assert_eq!(snap.success_rate(), Some(0.75));
    }
}
