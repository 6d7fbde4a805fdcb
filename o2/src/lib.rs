//! O2: a realtime communication substrate for interactive music and media
//! applications across cooperating processes on a local network (§1).
//!
//! This crate is the inside of a single O2 process: the service directory
//! and address dispatch (C3), the peer table (C4), UDP/TCP transport (C5),
//! the discovery protocol (C6), the master-election and clock-synchronization
//! protocol (C7), and the dual timestamp-driven scheduler (C8), all driven by
//! a single-threaded poll loop (C9). The wire message model and codec (C1)
//! live in the sibling [`o2_proto`] crate, which this crate depends on for
//! every byte that crosses the wire.
//!
//! The entry point is [`O2`]: construct one with [`O2::initialize`], drive it
//! with repeated [`O2::poll`] calls (or [`O2::run`] for a fixed-rate loop),
//! and tear it down with [`O2::finish`].

pub mod clock;
pub mod config;
pub mod directory;
pub mod discovery;
pub mod error;
pub mod outbox;
pub mod peer;
pub mod process;
pub mod scheduler;
pub mod status;
pub mod store;
pub mod transport;

pub use clock::LocalClock;
pub use config::Config;
pub use error::{O2Error, Result};
pub use outbox::Outbox;
pub use peer::PeerId;
pub use process::{immediate_message, O2};
pub use status::{O2Result, Status};
pub use transport::SendMode;

pub use o2_proto::{Arg, ArgView, Message, Timestamp, IMMEDIATE};
