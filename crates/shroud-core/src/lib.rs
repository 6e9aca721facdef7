//! Shroud tunnel core logic
//!
//! This crate contains the pure per-connection logic for the shroud
//! encrypted tunnel. It is completely decoupled from I/O, enabling
//! deterministic testing of every lifecycle path.
//!
//! # Architecture: "The Hollow Shell"
//!
//! Connection logic is strictly separated from runtime concerns:
//!
//! ```text
//!      ┌────────────────────────────┐
//!      │ shroud-core                │
//!      │ - Connection state machine │
//!      │ - Socket address values    │
//!      │ - Address normalization    │
//!      └────────────────────────────┘
//!         ↓                      ↓
//! ┌────────────────┐  ┌────────────────┐
//! │ shroud-harness │  │ production     │
//! │ - Virtual time │  │ runtime        │
//! │ - Scripted     │  │ - Real sockets │
//! │   collaborators│  │ - Real timers  │
//! └────────────────┘  └────────────────┘
//! ```
//!
//! # Key Principles
//!
//! - No I/O in Core: the state machine never opens a socket, arms a real
//!   timer, or touches key material. It consumes typed events and returns
//!   typed actions for a driver to execute.
//! - Single-Threaded Discipline: every handler runs to completion and
//!   returns to the driver; there are no suspension points and no locks.
//! - Deterministic: given the same event sequence, the machine produces
//!   the same action sequence.
//!
//! # Modules
//!
//! - [`conn`]: Connection state machine (dial, handshake, pipes, teardown)
//! - [`addr`]: Socket address value type and address-string normalization
//! - [`error`]: Address codec error types

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod addr;
pub mod conn;
pub mod error;

pub use addr::{ensure_port, AddrList, SockAddr};
pub use conn::{
    Conn, ConnAction, ConnConfig, ConnPhase, Direction, DropReason, PipeStatus, Role,
    SharedSecret, TimerKind,
};
pub use error::AddrError;
