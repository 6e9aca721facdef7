//! Deterministic simulation harness for shroud connection testing.
//!
//! This crate drives the `shroud-core` connection state machine against a
//! virtual clock and scripted collaborators, enabling deterministic,
//! reproducible testing of every lifecycle path: races between the dial
//! and the handshake, timeouts, collaborator start failures, and pipe
//! shutdown orderings.
//!
//! The pieces:
//!
//! - [`SimClock`]: virtual time with one-shot scheduled occurrences
//! - [`script`]: scripted outcomes for the dial, handshake, and pipes
//! - [`Driver`]: executes the machine's actions and routes completions
//!   back in strict time order, single-threaded
//! - [`World`]: everything observable that happened, for oracle functions
//! - [`Scenario`]: declarative builder enforcing the oracle pattern

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod clock;
pub mod driver;
pub mod scenario;
pub mod script;
pub mod sim_rng;
pub mod world;

pub use clock::SimClock;
pub use driver::{Driver, Scripts};
pub use scenario::{OracleFn, RunnableScenario, Scenario};
pub use script::{DialScript, HandshakeScript, PipeScript, SockId, TestKey};
pub use sim_rng::SimRng;
pub use world::{Cancelled, HandshakeStart, PipeStart, World};
