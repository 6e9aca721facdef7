//! Scripted outcomes for the connection's collaborators.
//!
//! Each script describes, ahead of time, what a collaborator will do and
//! when (in absolute virtual time from scenario start). The driver turns
//! a `Start…` action into the scheduled completion the script prescribes.

use std::time::Duration;

use shroud_core::PipeStatus;

/// Socket handle used in simulations: a bare descriptor-like number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SockId(pub i32);

/// Directional session key used in simulations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestKey(pub &'static str);

/// What the dial collaborator will do.
#[derive(Debug, Clone, Copy)]
pub enum DialScript {
    /// Connect successfully at `at`, producing `sock`.
    Succeed {
        /// Absolute virtual completion time.
        at: Duration,
        /// The connected target socket.
        sock: SockId,
    },
    /// Exhaust every target at `at`.
    Exhaust {
        /// Absolute virtual completion time.
        at: Duration,
    },
    /// Never complete; only cancellation or a timer ends it.
    Never,
    /// Refuse to even start (resource exhaustion at registration).
    StartFail,
}

impl DialScript {
    /// Connect successfully after `secs` seconds with socket `sock`.
    pub fn succeed_at(secs: u64, sock: SockId) -> Self {
        Self::Succeed { at: Duration::from_secs(secs), sock }
    }

    /// Run out of targets after `secs` seconds.
    pub fn exhaust_at(secs: u64) -> Self {
        Self::Exhaust { at: Duration::from_secs(secs) }
    }
}

/// What the handshake collaborator will do.
#[derive(Debug, Clone, Copy)]
pub enum HandshakeScript {
    /// Complete at `at` with both keys, or with a protocol rejection.
    Deliver {
        /// Absolute virtual completion time.
        at: Duration,
        /// Both directional keys on success; `None` on rejection.
        keys: Option<(TestKey, TestKey)>,
    },
    /// Never complete.
    Never,
    /// Refuse to even start.
    StartFail,
}

impl HandshakeScript {
    /// Deliver the canonical key pair after `secs` seconds.
    pub fn keys_at(secs: u64) -> Self {
        Self::Deliver { at: Duration::from_secs(secs), keys: Some((TestKey("K1"), TestKey("K2"))) }
    }

    /// Reject the peer after `secs` seconds.
    pub fn reject_at(secs: u64) -> Self {
        Self::Deliver { at: Duration::from_secs(secs), keys: None }
    }
}

/// Status transitions one pipe will report.
#[derive(Debug, Clone, Default)]
pub struct PipeScript {
    /// `(absolute time, status)` transitions, delivered in order.
    pub transitions: Vec<(Duration, PipeStatus)>,
    /// Refuse to even start.
    pub start_fail: bool,
}

impl PipeScript {
    /// A pipe that runs forever without reporting anything.
    pub fn quiet() -> Self {
        Self::default()
    }

    /// A pipe that fails to launch.
    pub fn start_fail() -> Self {
        Self { transitions: Vec::new(), start_fail: true }
    }

    /// Append a transition at `secs` seconds.
    #[must_use]
    pub fn then_at(mut self, secs: u64, status: PipeStatus) -> Self {
        self.transitions.push((Duration::from_secs(secs), status));
        self
    }

    /// A pipe reaching clean end of stream at `secs` seconds.
    pub fn eof_at(secs: u64) -> Self {
        Self::quiet().then_at(secs, PipeStatus::Eof)
    }

    /// A pipe failing at `secs` seconds.
    pub fn fail_at(secs: u64) -> Self {
        Self::quiet().then_at(secs, PipeStatus::Failed)
    }
}
