//! Single-threaded driver executing the state machine's actions against
//! scripted collaborators.
//!
//! The driver is the harness's stand-in for a production event loop. It
//! upholds the two contracts every driver must:
//!
//! - completions are delivered serially, in virtual-time order;
//! - a cancelled task never delivers its completion (cancellation drops
//!   the scheduled occurrence before returning).

use shroud_core::{
    AddrList, Conn, ConnAction, ConnConfig, Direction, DropReason, PipeStatus, TimerKind,
};

use crate::clock::{ScheduleId, SimClock};
use crate::script::{DialScript, HandshakeScript, PipeScript, SockId, TestKey};
use crate::world::{Cancelled, HandshakeStart, PipeStart, World};

/// The scripted outcomes of one scenario's collaborators.
pub struct Scripts {
    /// Outcome of the outbound dial.
    pub dial: DialScript,
    /// Outcome of the handshake.
    pub handshake: HandshakeScript,
    /// Transitions of the forward pipe.
    pub pipe_fwd: PipeScript,
    /// Transitions of the reverse pipe.
    pub pipe_rev: PipeScript,
}

/// Something scheduled to happen on the virtual clock.
enum Occurrence {
    Timer(TimerKind),
    DialResolved(Option<SockId>),
    HandshakeResolved(Option<(TestKey, TestKey)>),
    PipeEmit(Direction, PipeStatus),
}

/// A collaborator refused to start.
struct StartFailure;

fn dir_idx(dir: Direction) -> usize {
    match dir {
        Direction::Forward => 0,
        Direction::Reverse => 1,
    }
}

fn timer_idx(kind: TimerKind) -> usize {
    match kind {
        TimerKind::Dial => 0,
        TimerKind::Handshake => 1,
    }
}

/// Deterministic driver for one connection.
pub struct Driver {
    clock: SimClock<Occurrence>,
    conn: Conn<SockId, TestKey>,
    world: World,
    dial_script: Option<DialScript>,
    handshake_script: Option<HandshakeScript>,
    pipe_scripts: [Option<PipeScript>; 2],
    // The dial task's own reference to the target list; dropped on
    // completion or cancellation.
    dial_ref: Option<AddrList>,
    timer_ids: [Option<ScheduleId>; 2],
    dial_id: Option<ScheduleId>,
    handshake_id: Option<ScheduleId>,
    pipe_ids: [Vec<ScheduleId>; 2],
}

impl Driver {
    /// Create a connection and execute its bring-up actions.
    ///
    /// # Errors
    ///
    /// If a collaborator refuses to start during bring-up, everything
    /// already started is discarded and the accepted socket is handed
    /// back: the caller keeps responsibility for it, and no dead
    /// notification is ever delivered.
    pub fn create(
        sock_in: SockId,
        targets: AddrList,
        config: ConnConfig,
        scripts: Scripts,
    ) -> Result<Self, SockId> {
        let world = World::new(targets.clone());
        let (conn, actions) = Conn::new(sock_in, targets, config);

        let mut driver = Self {
            clock: SimClock::new(),
            conn,
            world,
            dial_script: Some(scripts.dial),
            handshake_script: Some(scripts.handshake),
            pipe_scripts: [Some(scripts.pipe_fwd), Some(scripts.pipe_rev)],
            dial_ref: None,
            timer_ids: [None, None],
            dial_id: None,
            handshake_id: None,
            pipe_ids: [Vec::new(), Vec::new()],
        };

        match driver.execute(actions) {
            Ok(()) => Ok(driver),
            Err(StartFailure) => Err(driver.conn.into_accepted()),
        }
    }

    /// Drop the connection from the outside, as an owner shutting down
    /// would.
    pub fn teardown(&mut self, reason: DropReason) {
        let actions = self.conn.teardown(reason);
        if self.execute(actions).is_err() {
            unreachable!("teardown starts no collaborators");
        }
    }

    /// Run until the clock is idle and return the observations.
    pub fn run(mut self) -> World {
        while let Some(occurrence) = self.clock.pop_due() {
            let actions = match occurrence {
                Occurrence::Timer(kind) => {
                    self.timer_ids[timer_idx(kind)] = None;
                    match kind {
                        TimerKind::Dial => self.conn.dial_timeout(),
                        TimerKind::Handshake => self.conn.handshake_timeout(),
                    }
                }
                Occurrence::DialResolved(sock) => {
                    self.dial_id = None;
                    // The finished dial task drops its target-list reference.
                    drop(self.dial_ref.take());
                    self.conn.dial_done(sock)
                }
                Occurrence::HandshakeResolved(keys) => {
                    self.handshake_id = None;
                    self.conn.handshake_done(keys)
                }
                Occurrence::PipeEmit(dir, status) => self.conn.pipe_status(dir, status),
            };

            if self.execute(actions).is_err() {
                let teardown = self.conn.start_failed();
                if self.execute(teardown).is_err() {
                    unreachable!("teardown starts no collaborators");
                }
            }
        }

        self.world.set_finished_at(self.clock.now());
        self.world
    }

    fn execute(&mut self, actions: Vec<ConnAction<SockId, TestKey>>) -> Result<(), StartFailure> {
        for action in actions {
            match action {
                ConnAction::StartTimer { kind, after } => {
                    let id = self.clock.schedule_after(after, Occurrence::Timer(kind));
                    self.timer_ids[timer_idx(kind)] = Some(id);
                }
                ConnAction::CancelTimer(kind) => {
                    if let Some(id) = self.timer_ids[timer_idx(kind)].take() {
                        self.clock.cancel(id);
                    }
                    self.world.record_cancel(Cancelled::Timer(kind));
                }
                ConnAction::StartDial { targets, bind: _ } => {
                    self.dial_ref = Some(targets);
                    match self.dial_script.take().expect("dial started twice") {
                        DialScript::Succeed { at, sock } => {
                            self.dial_id = Some(
                                self.clock.schedule_at(at, Occurrence::DialResolved(Some(sock))),
                            );
                        }
                        DialScript::Exhaust { at } => {
                            self.dial_id =
                                Some(self.clock.schedule_at(at, Occurrence::DialResolved(None)));
                        }
                        DialScript::Never => {}
                        DialScript::StartFail => {
                            self.dial_ref = None;
                            return Err(StartFailure);
                        }
                    }
                }
                ConnAction::CancelDial => {
                    if let Some(id) = self.dial_id.take() {
                        self.clock.cancel(id);
                    }
                    // Cancellation drops the dial task's target-list reference.
                    drop(self.dial_ref.take());
                    self.world.record_cancel(Cancelled::Dial);
                }
                ConnAction::StartHandshake { sock, decrypt, no_pfs, require_pfs, secret: _ } => {
                    self.world.record_handshake(HandshakeStart {
                        at: self.clock.now(),
                        sock,
                        decrypt,
                        no_pfs,
                        require_pfs,
                    });
                    match self.handshake_script.take().expect("handshake started twice") {
                        HandshakeScript::Deliver { at, keys } => {
                            self.handshake_id = Some(
                                self.clock.schedule_at(at, Occurrence::HandshakeResolved(keys)),
                            );
                        }
                        HandshakeScript::Never => {}
                        HandshakeScript::StartFail => return Err(StartFailure),
                    }
                }
                ConnAction::CancelHandshake => {
                    if let Some(id) = self.handshake_id.take() {
                        self.clock.cancel(id);
                    }
                    self.world.record_cancel(Cancelled::Handshake);
                }
                ConnAction::ConfigureSockets { keepalive } => {
                    self.world.record_keepalive(keepalive);
                }
                ConnAction::StartPipe { dir, src, dst, decrypt, key } => {
                    self.world.record_pipe(PipeStart {
                        at: self.clock.now(),
                        dir,
                        src,
                        dst,
                        decrypt,
                        key,
                    });
                    let script = self.pipe_scripts[dir_idx(dir)].take().expect("pipe started twice");
                    if script.start_fail {
                        return Err(StartFailure);
                    }
                    for (at, status) in script.transitions {
                        let id = self.clock.schedule_at(at, Occurrence::PipeEmit(dir, status));
                        self.pipe_ids[dir_idx(dir)].push(id);
                    }
                }
                ConnAction::CancelPipe(dir) => {
                    for id in self.pipe_ids[dir_idx(dir)].drain(..) {
                        self.clock.cancel(id);
                    }
                    self.world.record_cancel(Cancelled::Pipe(dir));
                }
                ConnAction::CloseSocket(sock) => {
                    self.world.record_closed(sock);
                }
                ConnAction::Dead(reason) => {
                    self.world.record_dead(reason);
                }
            }
        }
        Ok(())
    }
}
