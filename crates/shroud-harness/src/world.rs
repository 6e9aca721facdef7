//! Observable record of a scenario run.
//!
//! The `World` collects every externally visible effect of a connection's
//! lifetime — sockets closed, tasks cancelled, pipes launched, the dead
//! notification — for oracle functions to assert over after the run.

use std::time::Duration;

use shroud_core::{AddrList, Direction, DropReason, TimerKind};

use crate::script::{SockId, TestKey};

/// A handshake the machine started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeStart {
    /// Virtual time the handshake started.
    pub at: Duration,
    /// Socket it ran on.
    pub sock: SockId,
    /// Whether this side decrypts.
    pub decrypt: bool,
    /// Whether forward secrecy was declined up front.
    pub no_pfs: bool,
    /// Whether forward secrecy was demanded of the peer.
    pub require_pfs: bool,
}

/// A pipe the machine launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipeStart {
    /// Virtual time the pipe launched.
    pub at: Duration,
    /// Direction the pipe serves.
    pub dir: Direction,
    /// Source socket.
    pub src: SockId,
    /// Destination socket.
    pub dst: SockId,
    /// Whether this pipe decrypts.
    pub decrypt: bool,
    /// Directional key it was given.
    pub key: TestKey,
}

/// Something the machine cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cancelled {
    /// The in-flight dial.
    Dial,
    /// The in-flight handshake.
    Handshake,
    /// One pipe.
    Pipe(Direction),
    /// One timer.
    Timer(TimerKind),
}

/// World state: everything a scenario's oracle can observe.
pub struct World {
    targets: AddrList,
    closed: Vec<SockId>,
    cancels: Vec<Cancelled>,
    keepalive: Vec<bool>,
    handshakes: Vec<HandshakeStart>,
    pipes: Vec<PipeStart>,
    dead: Vec<DropReason>,
    finished_at: Duration,
}

impl World {
    pub(crate) fn new(targets: AddrList) -> Self {
        Self {
            targets,
            closed: Vec::new(),
            cancels: Vec::new(),
            keepalive: Vec::new(),
            handshakes: Vec::new(),
            pipes: Vec::new(),
            dead: Vec::new(),
            finished_at: Duration::ZERO,
        }
    }

    pub(crate) fn record_closed(&mut self, sock: SockId) {
        self.closed.push(sock);
    }

    pub(crate) fn record_cancel(&mut self, what: Cancelled) {
        self.cancels.push(what);
    }

    pub(crate) fn record_keepalive(&mut self, keepalive: bool) {
        self.keepalive.push(keepalive);
    }

    pub(crate) fn record_handshake(&mut self, start: HandshakeStart) {
        self.handshakes.push(start);
    }

    pub(crate) fn record_pipe(&mut self, start: PipeStart) {
        self.pipes.push(start);
    }

    pub(crate) fn record_dead(&mut self, reason: DropReason) {
        self.dead.push(reason);
    }

    pub(crate) fn set_finished_at(&mut self, at: Duration) {
        self.finished_at = at;
    }

    /// The dead reason, if the connection died exactly once.
    pub fn dead_reason(&self) -> Option<DropReason> {
        match self.dead.as_slice() {
            [reason] => Some(*reason),
            _ => None,
        }
    }

    /// How many dead notifications were delivered. Anything but 1 at the
    /// end of a scenario is a bug.
    pub fn dead_count(&self) -> usize {
        self.dead.len()
    }

    /// Sockets closed, in closing order.
    pub fn closed(&self) -> &[SockId] {
        &self.closed
    }

    /// Whether `what` was cancelled at some point.
    pub fn was_cancelled(&self, what: Cancelled) -> bool {
        self.cancels.contains(&what)
    }

    /// Keep-alive settings applied before pipe launches.
    pub fn keepalive_settings(&self) -> &[bool] {
        &self.keepalive
    }

    /// Handshakes started, in order.
    pub fn handshakes(&self) -> &[HandshakeStart] {
        &self.handshakes
    }

    /// Pipes launched, in order.
    pub fn pipes(&self) -> &[PipeStart] {
        &self.pipes
    }

    /// Live references to the target list. `1` means only the world's own
    /// handle remains: the machine and the dial released theirs.
    pub fn target_refs(&self) -> usize {
        AddrList::strong_count(&self.targets)
    }

    /// Virtual time when the scenario went quiet.
    pub fn finished_at(&self) -> Duration {
        self.finished_at
    }
}
