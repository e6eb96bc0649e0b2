//! The single-shot send capability a radio driver provides.
//!
//! A [`Transport`] never blocks: [`Transport::attempt_send`] hands the frame
//! to the radio and returns a [`DeliveryReceipt`] that resolves once the radio
//! learns the outcome. The [`LinkLayer`][crate::reliable::LinkLayer] awaits
//! the receipt under its own timeout, so a driver that never answers is
//! treated as [`DeliveryOutcome::Timeout`].

use std::sync::Arc;

use drishti_types::NodeError;
use tokio::sync::oneshot;

use crate::codec::Frame;

/// Transport-reported result of one transmission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Success,
    Failure,
    Timeout,
}

/// Resolves to the outcome of one attempt. A dropped sender counts as
/// [`DeliveryOutcome::Failure`].
pub type DeliveryReceipt = oneshot::Receiver<DeliveryOutcome>;

/// Radio capability used by the link layer.
pub trait Transport: Send + Sync {
    /// Start one transmission of `frame`.
    fn attempt_send(&self, frame: Frame) -> DeliveryReceipt;

    /// Reset the radio after sustained failures.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Hardware`] if the radio cannot be brought back up.
    fn reinitialize(&self) -> Result<(), NodeError> {
        Ok(())
    }
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn attempt_send(&self, frame: Frame) -> DeliveryReceipt {
        (**self).attempt_send(frame)
    }

    fn reinitialize(&self) -> Result<(), NodeError> {
        (**self).reinitialize()
    }
}

/// A receipt that has already resolved to `outcome`.
pub fn resolved(outcome: DeliveryOutcome) -> DeliveryReceipt {
    let (tx, rx) = oneshot::channel();
    // The receiver is still held here, so this send cannot fail.
    let _ = tx.send(outcome);
    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysFails;

    impl Transport for AlwaysFails {
        fn attempt_send(&self, _frame: Frame) -> DeliveryReceipt {
            resolved(DeliveryOutcome::Failure)
        }
    }

    #[tokio::test]
    async fn resolved_receipt_yields_outcome() {
        assert_eq!(resolved(DeliveryOutcome::Success).await, Ok(DeliveryOutcome::Success));
    }

    #[tokio::test]
    async fn arc_forwards_to_inner_transport() {
        let transport: Arc<dyn Transport> = Arc::new(AlwaysFails);
        let shared = Arc::new(transport);
        assert_eq!(
            shared.attempt_send([0; 9]).await,
            Ok(DeliveryOutcome::Failure)
        );
        assert!(shared.reinitialize().is_ok());
    }
}
