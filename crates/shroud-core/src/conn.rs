//! Connection lifecycle state machine for the shroud tunnel.
//!
//! One [`Conn`] owns the lifecycle of a single tunneled connection: an
//! accepted socket on one side, an outbound dial to an ordered target list
//! on the other, a key-agreement handshake on whichever side speaks the
//! encrypted protocol, and finally two unidirectional pipes shuttling
//! bytes until either side closes or anything fails.
//!
//! # Architecture: Action-Based State Machine
//!
//! This state machine follows the action pattern:
//! - Handler methods consume typed completion events (dial finished,
//!   handshake finished, timer fired, pipe status changed)
//! - Handlers return `Vec<ConnAction>` for the driver to execute
//! - The driver owns the real resources (task handles, timers, sockets)
//!
//! This enables:
//! - Pure lifecycle logic (no I/O, no clocks)
//! - Deterministic testing with scripted collaborators
//! - A driver that can be an event loop of any flavor
//!
//! # Lifecycle
//!
//! ```text
//!           ┌──────────────┐  dial + handshake done  ┌────────┐
//!  create──>│ Establishing │────────────────────────>│ Piping │
//!           └──────────────┘                         └────────┘
//!                  │                                      │
//!                  │ failure / timeout        EOF / error │
//!                  ↓                                      ↓
//!              ┌──────┐<─────────────────────────────────┘
//!              │ Dead │   (teardown runs exactly once)
//!              └──────┘
//! ```
//!
//! The dial and the handshake run concurrently whenever the handshake-
//! bearing socket is already open (the [`Role::Decrypt`] side): starting
//! them serially would add a round trip to every inbound connection. The
//! machine therefore tolerates either order of completion and launches the
//! pipes from whichever completion arrives last.
//!
//! # Cancellation contract
//!
//! Every `Cancel…` action is synchronous from the machine's point of view:
//! after the driver executes it, the corresponding completion event must
//! never be delivered. Drivers built on a single-threaded select loop get
//! this for free by dropping the pending future.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::addr::{AddrList, SockAddr};

/// Which side of the tunnel this connection is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Inbound side is plaintext; outgoing data is encrypted.
    Encrypt,
    /// Inbound side is ciphertext; incoming data is decrypted.
    Decrypt,
}

/// Direction of a pipe relative to the accepted socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Accepted socket toward the dialed target.
    Forward,
    /// Dialed target toward the accepted socket.
    Reverse,
}

/// Progress reported by a pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeStatus {
    /// Bytes are (potentially) still flowing.
    Running,
    /// The source reached a clean end of stream.
    Eof,
    /// The pipe failed (I/O error, authentication failure).
    Failed,
}

/// Why a connection was dropped. Delivered to the owner exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Every candidate target was unreachable or refused.
    DialFailed,
    /// The key agreement rejected the peer.
    HandshakeFailed,
    /// Both pipe directions reached a clean end of stream.
    Closed,
    /// A timeout, a resource failure, or a pipe I/O failure.
    ///
    /// Deliberately coarse: the owner only needs to know the connection
    /// died abnormally, not which of the many ways it did.
    Error,
}

/// The two one-shot timers a connection arms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Bounds the outbound dial.
    Dial,
    /// Bounds the handshake.
    Handshake,
}

/// Opaque handle to the pre-shared key material.
///
/// The state machine never reads the bytes; it only threads the handle
/// into the handshake-start action. Cloning shares the underlying
/// allocation.
#[derive(Clone)]
pub struct SharedSecret(Arc<[u8]>);

impl SharedSecret {
    /// Wrap key material in a shared handle.
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self(bytes.into())
    }

    /// Access the key material. Only handshake implementations should
    /// call this.
    #[must_use]
    pub fn reveal(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedSecret({} bytes)", self.0.len())
    }
}

/// Per-connection configuration, fixed at creation.
#[derive(Debug, Clone)]
pub struct ConnConfig {
    /// Which side of the tunnel this connection is.
    pub role: Role,
    /// Budget for the dial and (separately) for the handshake.
    pub timeout: Duration,
    /// Local address to bind the outbound socket to, if any.
    pub bind: Option<SockAddr>,
    /// Don't offer perfect forward secrecy.
    pub no_pfs: bool,
    /// Drop the connection if the peer declines perfect forward secrecy.
    pub require_pfs: bool,
    /// Leave transport keep-alives off on both sockets.
    pub no_keepalive: bool,
    /// Pre-shared key material, shared with the owner.
    pub secret: SharedSecret,
}

/// An instruction for the driver, produced by a state transition.
///
/// Actions within one returned batch must be executed in order; the
/// teardown batch in particular encodes the ordering that keeps a late
/// completion from ever referencing a released resource.
#[derive(Debug)]
pub enum ConnAction<S, K> {
    /// Arm a one-shot timer.
    StartTimer {
        /// Which timer to arm.
        kind: TimerKind,
        /// How long until it fires.
        after: Duration,
    },
    /// Disarm a timer; it must not fire afterwards.
    CancelTimer(TimerKind),
    /// Start dialing the targets in order until one connects.
    StartDial {
        /// Candidate addresses, shared with the machine.
        targets: AddrList,
        /// Optional local address to bind before connecting.
        bind: Option<SockAddr>,
    },
    /// Abandon the in-flight dial; its completion must not be delivered.
    CancelDial,
    /// Start the key-agreement handshake on the given socket.
    StartHandshake {
        /// Socket the handshake runs on (role-dependent side).
        sock: S,
        /// True when this side speaks the decrypting half of the protocol.
        decrypt: bool,
        /// Don't offer perfect forward secrecy.
        no_pfs: bool,
        /// Reject peers that decline perfect forward secrecy.
        require_pfs: bool,
        /// Pre-shared key material.
        secret: SharedSecret,
    },
    /// Abandon the in-flight handshake.
    CancelHandshake,
    /// Apply transport options to both sockets before piping.
    ///
    /// Keep-alive is switched on or off as given; Nagle's algorithm is
    /// always disabled. Failures are ignored: the sockets may not be TCP
    /// at all, and neither option is required for correctness.
    ConfigureSockets {
        /// Whether transport keep-alives should be enabled.
        keepalive: bool,
    },
    /// Start one pipe relaying from `src` to `dst`.
    StartPipe {
        /// Direction this pipe serves.
        dir: Direction,
        /// Socket bytes are read from.
        src: S,
        /// Socket bytes are written to.
        dst: S,
        /// True when this pipe decrypts; false when it encrypts.
        decrypt: bool,
        /// Directional session key.
        key: K,
    },
    /// Stop one pipe; no further status for it may be delivered.
    CancelPipe(Direction),
    /// Close a socket owned by the connection.
    CloseSocket(S),
    /// The connection is gone. Always the final action of a teardown
    /// batch, and emitted exactly once per connection.
    Dead(DropReason),
}

/// Coarse observable phase, derived from the internal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnPhase {
    /// Dial and/or handshake still outstanding.
    Establishing,
    /// Both pipes are up.
    Piping,
    /// Teardown has run.
    Dead,
}

/// The per-connection state machine.
///
/// Generic over the socket handle `S` (any cheaply cloneable token the
/// driver can resolve back to a real socket) and the directional key
/// material `K` (opaque to the machine).
///
/// # Ownership
///
/// The machine owns the accepted socket from construction and the dialed
/// socket from the moment the dial completes; teardown emits a
/// [`ConnAction::CloseSocket`] for each. The target list is shared with
/// the in-flight dial task and the machine drops its reference at the
/// earliest of dial completion or teardown. Session keys are held from
/// handshake completion until they move into the pipe-start actions.
#[derive(Debug)]
pub struct Conn<S, K> {
    config: ConnConfig,
    sock_in: Option<S>,
    sock_out: Option<S>,
    targets: Option<AddrList>,
    dial_task: bool,
    dial_timer: bool,
    handshake_task: bool,
    handshake_timer: bool,
    pipes_running: bool,
    keys: Option<(K, K)>,
    stat_fwd: PipeStatus,
    stat_rev: PipeStatus,
    dead: bool,
}

impl<S: Clone, K> Conn<S, K> {
    /// Create a connection and return the actions that bring it up.
    ///
    /// The returned batch arms the dial timer and starts the dial; on the
    /// [`Role::Decrypt`] side it additionally arms the handshake timer and
    /// starts the handshake on the accepted socket, since that side is
    /// already open.
    ///
    /// If the driver fails to execute any of these actions, it must not
    /// deliver further events; call [`Conn::into_accepted`] to reclaim the
    /// accepted socket, which remains the caller's responsibility.
    pub fn new(sock_in: S, targets: AddrList, config: ConnConfig) -> (Self, Vec<ConnAction<S, K>>) {
        let mut conn = Self {
            sock_in: Some(sock_in),
            sock_out: None,
            targets: Some(targets),
            dial_task: false,
            dial_timer: false,
            handshake_task: false,
            handshake_timer: false,
            pipes_running: false,
            keys: None,
            stat_fwd: PipeStatus::Running,
            stat_rev: PipeStatus::Running,
            dead: false,
            config,
        };

        let mut actions = Vec::with_capacity(4);

        conn.dial_timer = true;
        actions.push(ConnAction::StartTimer { kind: TimerKind::Dial, after: conn.config.timeout });

        conn.dial_task = true;
        actions.push(ConnAction::StartDial {
            targets: conn.targets.clone().expect("targets present at creation"),
            bind: conn.config.bind.clone(),
        });

        if conn.config.role == Role::Decrypt {
            let sock = conn.sock_in.clone().expect("accepted socket present at creation");
            conn.start_handshake(sock, &mut actions);
        }

        (conn, actions)
    }

    /// The outbound dial finished: `sock` is the connected target socket,
    /// or `None` if every candidate was exhausted.
    pub fn dial_done(&mut self, sock: Option<S>) -> Vec<ConnAction<S, K>> {
        if self.dead {
            return Vec::new();
        }

        // The dial is no longer pending, and nobody needs the targets
        // any more.
        self.dial_task = false;
        self.targets = None;

        let mut actions = Vec::new();

        // We beat the clock.
        if self.dial_timer {
            self.dial_timer = false;
            actions.push(ConnAction::CancelTimer(TimerKind::Dial));
        }

        let sock = match sock {
            Some(sock) => sock,
            None => {
                actions.extend(self.teardown_inner(DropReason::DialFailed));
                return actions;
            }
        };
        self.sock_out = Some(sock);

        // The encrypting side handshakes on the freshly dialed socket.
        if self.config.role == Role::Encrypt {
            let sock = self.sock_out.clone().expect("target socket just assigned");
            self.start_handshake(sock, &mut actions);
        }

        // If the handshake already finished, start shuttling data.
        if self.keys.is_some() {
            self.launch_pipes(&mut actions);
        }

        actions
    }

    /// The dial timer fired before the dial completed.
    ///
    /// The target list is deliberately not released here: the
    /// not-yet-cancelled dial may still be reading it. Teardown releases
    /// it after emitting the cancel.
    pub fn dial_timeout(&mut self) -> Vec<ConnAction<S, K>> {
        if self.dead {
            return Vec::new();
        }
        self.dial_timer = false;
        self.teardown_inner(DropReason::Error)
    }

    /// The handshake finished: `keys` carries the forward and reverse
    /// session keys, or `None` if the protocol rejected the peer.
    ///
    /// A half-present result cannot be expressed; the handshake
    /// collaborator either produced both keys or neither.
    pub fn handshake_done(&mut self, keys: Option<(K, K)>) -> Vec<ConnAction<S, K>> {
        if self.dead {
            return Vec::new();
        }

        self.handshake_task = false;

        let mut actions = Vec::new();

        if self.handshake_timer {
            self.handshake_timer = false;
            actions.push(ConnAction::CancelTimer(TimerKind::Handshake));
        }

        match keys {
            Some(pair) => self.keys = Some(pair),
            None => {
                actions.extend(self.teardown_inner(DropReason::HandshakeFailed));
                return actions;
            }
        }

        // If the target is already connected, start shuttling data.
        if self.sock_out.is_some() {
            self.launch_pipes(&mut actions);
        }

        actions
    }

    /// The handshake timer fired before the handshake completed.
    pub fn handshake_timeout(&mut self) -> Vec<ConnAction<S, K>> {
        if self.dead {
            return Vec::new();
        }
        self.handshake_timer = false;
        self.teardown_inner(DropReason::Error)
    }

    /// A pipe reported a status transition.
    ///
    /// Any failure is immediately fatal; a clean shutdown requires both
    /// directions to reach end of stream.
    pub fn pipe_status(&mut self, dir: Direction, status: PipeStatus) -> Vec<ConnAction<S, K>> {
        if self.dead {
            return Vec::new();
        }

        match dir {
            Direction::Forward => self.stat_fwd = status,
            Direction::Reverse => self.stat_rev = status,
        }
        tracing::trace!(?dir, ?status, "pipe status changed");

        if self.stat_fwd == PipeStatus::Failed || self.stat_rev == PipeStatus::Failed {
            self.teardown_inner(DropReason::Error)
        } else if self.stat_fwd == PipeStatus::Eof && self.stat_rev == PipeStatus::Eof {
            self.teardown_inner(DropReason::Closed)
        } else {
            Vec::new()
        }
    }

    /// The driver failed to start a collaborator after creation (a
    /// handshake or pipe that would not launch).
    pub fn start_failed(&mut self) -> Vec<ConnAction<S, K>> {
        self.teardown_inner(DropReason::Error)
    }

    /// Tear the connection down for `reason`.
    ///
    /// The batch closes both sockets, cancels everything outstanding,
    /// releases the target list and any unclaimed keys, and ends with the
    /// single [`ConnAction::Dead`] notification. Safe to call on an
    /// already-dead connection, in which case nothing is returned.
    pub fn teardown(&mut self, reason: DropReason) -> Vec<ConnAction<S, K>> {
        self.teardown_inner(reason)
    }

    fn teardown_inner(&mut self, reason: DropReason) -> Vec<ConnAction<S, K>> {
        if self.dead {
            return Vec::new();
        }
        self.dead = true;
        tracing::debug!(?reason, "dropping connection");

        let mut actions = Vec::new();

        // Close the sockets first: pending pipe I/O resolves with an
        // error, but those pipes are cancelled below before the driver
        // returns to its loop, so no status for them is ever delivered.
        if let Some(sock) = self.sock_in.take() {
            actions.push(ConnAction::CloseSocket(sock));
        }
        if let Some(sock) = self.sock_out.take() {
            actions.push(ConnAction::CloseSocket(sock));
        }

        if self.dial_task {
            self.dial_task = false;
            actions.push(ConnAction::CancelDial);
        }

        // Only now is the target list certainly unreferenced by the dial.
        self.targets = None;

        if self.handshake_task {
            self.handshake_task = false;
            actions.push(ConnAction::CancelHandshake);
        }
        if self.pipes_running {
            self.pipes_running = false;
            actions.push(ConnAction::CancelPipe(Direction::Forward));
            actions.push(ConnAction::CancelPipe(Direction::Reverse));
        }

        if self.dial_timer {
            self.dial_timer = false;
            actions.push(ConnAction::CancelTimer(TimerKind::Dial));
        }
        if self.handshake_timer {
            self.handshake_timer = false;
            actions.push(ConnAction::CancelTimer(TimerKind::Handshake));
        }

        // Keys that never made it into a pipe are released with the
        // machine.
        self.keys = None;

        actions.push(ConnAction::Dead(reason));
        actions
    }

    /// Reclaim the accepted socket after a failed bring-up.
    ///
    /// Only valid while the creation batch is being executed; the caller
    /// keeps responsibility for the socket, exactly as if creation had
    /// never happened.
    ///
    /// # Panics
    ///
    /// Panics if teardown already ran (the socket was closed then).
    pub fn into_accepted(mut self) -> S {
        self.sock_in.take().expect("bring-up failure after the accepted socket was closed")
    }

    /// Arm the handshake timer and start the handshake on `sock`.
    fn start_handshake(&mut self, sock: S, actions: &mut Vec<ConnAction<S, K>>) {
        self.handshake_timer = true;
        actions.push(ConnAction::StartTimer {
            kind: TimerKind::Handshake,
            after: self.config.timeout,
        });

        self.handshake_task = true;
        actions.push(ConnAction::StartHandshake {
            sock,
            decrypt: self.config.role == Role::Decrypt,
            no_pfs: self.config.no_pfs,
            require_pfs: self.config.require_pfs,
            secret: self.config.secret.clone(),
        });
    }

    /// Configure both sockets and start the two pipes.
    ///
    /// Requires the target socket and both keys; the keys move into the
    /// pipe-start actions.
    fn launch_pipes(&mut self, actions: &mut Vec<ConnAction<S, K>>) {
        let sock_in = self.sock_in.clone().expect("accepted socket present until teardown");
        let sock_out = self.sock_out.clone().expect("pipes launch only after the dial");
        let (key_fwd, key_rev) = self.keys.take().expect("pipes launch only after the handshake");

        actions.push(ConnAction::ConfigureSockets { keepalive: !self.config.no_keepalive });

        let decrypt = self.config.role == Role::Decrypt;
        actions.push(ConnAction::StartPipe {
            dir: Direction::Forward,
            src: sock_in.clone(),
            dst: sock_out.clone(),
            decrypt,
            key: key_fwd,
        });
        actions.push(ConnAction::StartPipe {
            dir: Direction::Reverse,
            src: sock_out,
            dst: sock_in,
            decrypt: !decrypt,
            key: key_rev,
        });

        self.pipes_running = true;
        tracing::debug!(role = ?self.config.role, "pipes launched");
    }

    /// Which side of the tunnel this connection is.
    #[must_use]
    pub fn role(&self) -> Role {
        self.config.role
    }

    /// Coarse observable phase.
    #[must_use]
    pub fn phase(&self) -> ConnPhase {
        if self.dead {
            ConnPhase::Dead
        } else if self.pipes_running {
            ConnPhase::Piping
        } else {
            ConnPhase::Establishing
        }
    }

    /// Whether teardown has run.
    #[must_use]
    pub fn is_dead(&self) -> bool {
        self.dead
    }

    /// Whether the outbound dial has produced a socket.
    #[must_use]
    pub fn has_target(&self) -> bool {
        self.sock_out.is_some()
    }

    /// Whether session keys are held (and not yet handed to the pipes).
    #[must_use]
    pub fn has_keys(&self) -> bool {
        self.keys.is_some()
    }
}
