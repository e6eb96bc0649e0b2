//! `drishti-link` – the wireless link between nodes.
//!
//! Moves fixed-size packets over a lossy, connectionless radio without caring
//! what they mean.
//!
//! # Modules
//!
//! - [`codec`] – 9-byte little-endian wire format with a modulo-256 checksum.
//! - [`transport`] – the [`Transport`][transport::Transport] capability: one
//!   non-blocking send attempt answered later through a
//!   [`DeliveryReceipt`][transport::DeliveryReceipt].
//! - [`reliable`] – [`LinkLayer`][reliable::LinkLayer]: bounded retries with
//!   per-attempt timeouts, reporting `Delivered` or `Exhausted`.
//! - [`receiver`] – [`LinkReceiver`][receiver::LinkReceiver]: validates
//!   frames and filters retransmitted duplicates.
//! - [`sim`] – [`LossyTransport`][sim::LossyTransport], a seeded lossy radio.

pub mod codec;
pub mod receiver;
pub mod reliable;
pub mod sim;
pub mod transport;

pub use codec::{Frame, PACKET_LEN, decode, encode};
pub use receiver::{LinkReceiver, Received, ReceiverStats};
pub use reliable::{LinkLayer, LinkStatsSnapshot, RetryPolicy, SendReport, SendResult};
pub use sim::LossyTransport;
pub use transport::{DeliveryOutcome, DeliveryReceipt, Transport};
