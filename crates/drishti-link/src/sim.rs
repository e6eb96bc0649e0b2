//! Simulated lossy radio for tests and the desktop demo.
//!
//! [`LossyTransport`] drops each attempt independently with a fixed
//! probability drawn from a seeded RNG, so runs are reproducible. Extra knobs
//! model the failure modes a real low-power radio shows:
//!
//! - **ack loss**: the frame reaches the peer but the sender is told it
//!   failed, which produces duplicates on the receive side;
//! - **ack delay**: the outcome arrives late, exercising the per-attempt
//!   timeout;
//! - **corruption**: a delivered frame has one byte damaged in flight;
//! - **offline**: the radio is down and every attempt fails.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use drishti_types::NodeError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::codec::{Frame, PACKET_LEN};
use crate::transport::{DeliveryOutcome, DeliveryReceipt, Transport, resolved};

/// Frames that reached the far end.
pub type PeerSender = mpsc::UnboundedSender<Frame>;

pub struct LossyTransport {
    rng: Mutex<StdRng>,
    loss_rate: f64,
    ack_loss_rate: f64,
    corruption_rate: f64,
    ack_delay: Option<Duration>,
    peer: Option<PeerSender>,
    offline: AtomicBool,
    attempts: AtomicU64,
    frames_delivered: AtomicU64,
    reinitializations: AtomicU64,
}

impl LossyTransport {
    /// Drop each attempt with probability `loss_rate` (clamped to `0..=1`).
    pub fn new(loss_rate: f64, seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            loss_rate: clamp_rate(loss_rate),
            ack_loss_rate: 0.0,
            corruption_rate: 0.0,
            ack_delay: None,
            peer: None,
            offline: AtomicBool::new(false),
            attempts: AtomicU64::new(0),
            frames_delivered: AtomicU64::new(0),
            reinitializations: AtomicU64::new(0),
        }
    }

    /// Lose the acknowledgement of a delivered frame with probability `rate`.
    pub fn with_ack_loss(mut self, rate: f64) -> Self {
        self.ack_loss_rate = clamp_rate(rate);
        self
    }

    /// Damage one byte of a delivered frame with probability `rate`.
    pub fn with_corruption(mut self, rate: f64) -> Self {
        self.corruption_rate = clamp_rate(rate);
        self
    }

    /// Report every outcome after `delay`. Needs a Tokio runtime.
    pub fn with_ack_delay(mut self, delay: Duration) -> Self {
        self.ack_delay = Some(delay);
        self
    }

    /// Forward delivered frames to `peer`.
    pub fn with_peer(mut self, peer: PeerSender) -> Self {
        self.peer = Some(peer);
        self
    }

    /// Take the radio down (`true`) or bring it back.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Relaxed);
    }

    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    pub fn frames_delivered(&self) -> u64 {
        self.frames_delivered.load(Ordering::Relaxed)
    }

    pub fn reinitializations(&self) -> u64 {
        self.reinitializations.load(Ordering::Relaxed)
    }

    fn rng(&self) -> MutexGuard<'_, StdRng> {
        // A panic while holding the lock cannot leave the RNG inconsistent.
        self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn transmit(&self, mut frame: Frame) -> DeliveryOutcome {
        if self.offline.load(Ordering::Relaxed) {
            return DeliveryOutcome::Failure;
        }
        let mut rng = self.rng();
        if rng.gen_bool(self.loss_rate) {
            return DeliveryOutcome::Failure;
        }
        if rng.gen_bool(self.corruption_rate) {
            let at = rng.gen_range(0..PACKET_LEN);
            frame[at] ^= 1u8 << rng.gen_range(0..8u32);
        }
        let ack_lost = rng.gen_bool(self.ack_loss_rate);
        drop(rng);

        self.frames_delivered.fetch_add(1, Ordering::Relaxed);
        if let Some(peer) = &self.peer {
            // A closed peer is a receiver that went away; the radio still
            // saw its ack.
            let _ = peer.send(frame);
        }
        if ack_lost {
            DeliveryOutcome::Failure
        } else {
            DeliveryOutcome::Success
        }
    }
}

impl Transport for LossyTransport {
    fn attempt_send(&self, frame: Frame) -> DeliveryReceipt {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        let outcome = self.transmit(frame);
        match self.ack_delay {
            None => resolved(outcome),
            Some(delay) => {
                let (tx, rx) = oneshot::channel();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    // The link layer may have timed out and dropped the receipt.
                    let _ = tx.send(outcome);
                });
                rx
            }
        }
    }

    fn reinitialize(&self) -> Result<(), NodeError> {
        let n = self.reinitializations.fetch_add(1, Ordering::Relaxed) + 1;
        info!(reinitializations = n, "simulated radio re-initialised");
        if self.offline.load(Ordering::Relaxed) {
            debug!("radio still offline after re-initialisation");
        }
        Ok(())
    }
}

fn clamp_rate(rate: f64) -> f64 {
    if rate.is_finite() {
        rate.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode, encode};
    use crate::receiver::{LinkReceiver, Received};
    use crate::reliable::{LinkLayer, RetryPolicy, SendResult};
    use drishti_types::Packet;
    use std::sync::Arc;

    fn packet(sequence: u16) -> Packet {
        Packet {
            node_id: 2,
            sequence,
            distance_cm: 80,
            battery_pct: 64,
            flags: 0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ten_percent_loss_meets_delivery_target() {
        let transport = Arc::new(LossyTransport::new(0.10, 0x5EED_CAFE));
        let link = LinkLayer::new(transport.clone(), RetryPolicy::default());

        let mut delivered = 0u32;
        for seq in 0..1000u16 {
            if link.send(packet(seq)).await.result == SendResult::Delivered {
                delivered += 1;
            }
        }
        assert!(delivered >= 950, "only {delivered}/1000 delivered");
        assert_eq!(link.stats().delivered, u64::from(delivered));
        assert!(transport.attempts() >= 1000);
    }

    #[tokio::test(start_paused = true)]
    async fn same_seed_same_run() {
        async fn run(seed: u64) -> Vec<usize> {
            let link = LinkLayer::new(
                Arc::new(LossyTransport::new(0.4, seed)),
                RetryPolicy::default(),
            );
            let mut attempts = Vec::new();
            for seq in 0..50 {
                attempts.push(link.send(packet(seq)).await.attempts());
            }
            attempts
        }
        assert_eq!(run(7).await, run(7).await);
    }

    #[tokio::test]
    async fn offline_radio_fails_everything() {
        let transport = LossyTransport::new(0.0, 1);
        transport.set_offline(true);
        assert_eq!(
            transport.attempt_send(encode(&packet(1))).await,
            Ok(DeliveryOutcome::Failure)
        );
        transport.set_offline(false);
        assert_eq!(
            transport.attempt_send(encode(&packet(1))).await,
            Ok(DeliveryOutcome::Success)
        );
        transport.reinitialize().unwrap();
        assert_eq!(transport.reinitializations(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn lost_acks_produce_duplicates_the_receiver_catches() {
        let (peer_tx, mut peer_rx) = mpsc::unbounded_channel();
        let transport = LossyTransport::new(0.0, 3)
            .with_ack_loss(1.0)
            .with_peer(peer_tx);
        let link = LinkLayer::new(Arc::new(transport), RetryPolicy::default());

        let report = link.send(packet(77)).await;
        // Every ack lost: the sender gives up although the peer got it.
        assert_eq!(report.result, SendResult::Exhausted);

        let mut rx = LinkReceiver::new();
        let mut accepted = 0;
        let mut duplicates = 0;
        while let Ok(frame) = peer_rx.try_recv() {
            match rx.accept(&frame) {
                Received::Accepted(_) => accepted += 1,
                Received::Duplicate(_) => duplicates += 1,
                Received::Dropped(e) => panic!("unexpected drop: {e}"),
            }
        }
        assert_eq!(accepted, 1);
        assert_eq!(duplicates, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_acks_time_out() {
        let transport = LossyTransport::new(0.0, 4).with_ack_delay(Duration::from_millis(250));
        let link = LinkLayer::new(Arc::new(transport), RetryPolicy::default());
        let report = link.send(packet(5)).await;
        assert_eq!(report.result, SendResult::Exhausted);
        assert!(
            report
                .outcomes
                .iter()
                .all(|o| *o == DeliveryOutcome::Timeout)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn prompt_delayed_ack_is_success() {
        let transport = LossyTransport::new(0.0, 4).with_ack_delay(Duration::from_millis(20));
        let link = LinkLayer::new(Arc::new(transport), RetryPolicy::default());
        assert!(link.send(packet(6)).await.delivered());
    }

    #[tokio::test]
    async fn corrupted_frames_fail_decoding() {
        let (peer_tx, mut peer_rx) = mpsc::unbounded_channel();
        let transport = LossyTransport::new(0.0, 9)
            .with_corruption(1.0)
            .with_peer(peer_tx);
        let _ = transport.attempt_send(encode(&packet(1))).await;
        let frame = peer_rx.recv().await.unwrap();
        assert!(decode(&frame).is_err());
    }

    #[test]
    fn rates_are_clamped() {
        assert_eq!(clamp_rate(1.5), 1.0);
        assert_eq!(clamp_rate(-0.2), 0.0);
        assert_eq!(clamp_rate(f64::NAN), 0.0);
    }
}
