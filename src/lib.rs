#![cfg_attr(docsrs, feature(doc_cfg))]
//! # elcon_lib
//!
//! This crate speaks the CAN protocol of Elcon DC battery chargers: a
//! manager commands output voltage and current, the charger reports its
//! output and fault flags. Besides the frame codec it provides a simulated
//! charger feeding a battery model, and a driver that commands a charger.
//!
//! ## Features
//!
//! - `default`: Enables `bin-dependencies`, which is intended for compiling the `elcon` command-line tool.
//!
//! ### Peer Features
//! - `tokio-async`: Enables the bus abstraction, the charger driver and the charger simulator, running on `tokio`.
//!
//! ### Utility Features
//! - `serde`: Enables `serde` support for serializing/deserializing the decoded values.
//! - `bin-dependencies`: Enables all features required by the `elcon` binary executable.

/// Contains error types for the library.
mod error;
/// Battery state of charge model.
pub mod battery;
/// Frame codec for the Elcon charger protocol.
pub mod protocol;
/// Liveness state machine of a charging link.
pub mod session;

pub use error::Error;

/// Frame transport abstraction and in-process loopback bus.
#[cfg_attr(docsrs, doc(cfg(feature = "tokio-async")))]
#[cfg(feature = "tokio-async")]
pub mod bus;

/// Charger driver (manager role).
#[cfg_attr(docsrs, doc(cfg(feature = "tokio-async")))]
#[cfg(feature = "tokio-async")]
pub mod driver;

/// Charger simulator (charger role).
#[cfg_attr(docsrs, doc(cfg(feature = "tokio-async")))]
#[cfg(feature = "tokio-async")]
pub mod simulator;
