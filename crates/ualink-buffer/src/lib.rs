// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # ualink-buffer
//!
//! Frame batching and broker publishing for the ualink gateway.
//!
//! Records leave the bounded queue through the [`BatchingEngine`], which
//! encodes them with a [`MessageEncoder`], packs them into size-bounded
//! frames and hands each frame to a [`Publisher`]. The store-and-forward
//! publisher keeps frames the broker refused in a [`SpillStore`] and
//! replays them once the broker accepts traffic again.
//!
//! ```text
//! RecordReceiver ──► BatchingEngine ──► Publisher ──► BrokerClient
//!                        │                  │
//!                  MessageEncoder       SpillStore
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod encoder;
pub mod engine;
pub mod frame;
pub mod metrics;
pub mod publisher;
pub mod spill;

pub use encoder::{writer_hash, MessageEncoder, PubSubJsonEncoder, FRAME_CLOSING_LEN};
pub use engine::{BatchingConfig, BatchingEngine};
pub use frame::{Frame, FrameBuilder};
pub use metrics::PipelineMetrics;
pub use publisher::{DirectPublisher, Publisher, StoreForwardPublisher};
pub use spill::SpillStore;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
