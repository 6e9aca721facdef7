//! The state machine wired onto an async select-style driver.
//!
//! A production runtime drives the same action vocabulary from a
//! single-threaded async executor: collaborators are tasks, completions
//! are messages, and cancellation aborts the task before the driver
//! returns to its receive loop — a sleeping task that is aborted never
//! sends its completion, which is exactly the cancellation contract the
//! machine relies on. Paused virtual time keeps the runs deterministic
//! (scripts use distinct instants).

use std::time::Duration;

use shroud_core::{
    AddrList, Conn, ConnAction, ConnConfig, Direction, DropReason, PipeStatus, Role, SharedSecret,
    SockAddr, TimerKind,
};
use shroud_harness::{DialScript, HandshakeScript, PipeScript, SockId, TestKey};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

enum Ev {
    Timer(TimerKind),
    Dial(Option<SockId>),
    Handshake(Option<(TestKey, TestKey)>),
    Pipe(Direction, PipeStatus),
}

#[derive(PartialEq)]
enum Tag {
    Timer(TimerKind),
    Dial,
    Handshake,
    Pipe(Direction),
}

struct AsyncDriver {
    conn: Conn<SockId, TestKey>,
    tx: mpsc::UnboundedSender<Ev>,
    rx: mpsc::UnboundedReceiver<Ev>,
    start: Instant,
    dial: Option<DialScript>,
    handshake: Option<HandshakeScript>,
    pipes: [Option<PipeScript>; 2],
    tasks: Vec<(Tag, JoinHandle<()>)>,
    closed: Vec<SockId>,
    dead: Vec<DropReason>,
}

impl AsyncDriver {
    fn create(
        role: Role,
        timeout_secs: u64,
        dial: DialScript,
        handshake: HandshakeScript,
        pipe_fwd: PipeScript,
        pipe_rev: PipeScript,
    ) -> Self {
        let targets: AddrList =
            vec![SockAddr::inet(std::net::Ipv4Addr::new(192, 0, 2, 1), 8025)].into();
        let config = ConnConfig {
            role,
            timeout: Duration::from_secs(timeout_secs),
            bind: None,
            no_pfs: false,
            require_pfs: false,
            no_keepalive: false,
            secret: SharedSecret::new(vec![0x6b; 32]),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let (conn, actions) = Conn::new(SockId(3), targets, config);
        let mut driver = Self {
            conn,
            tx,
            rx,
            start: Instant::now(),
            dial: Some(dial),
            handshake: Some(handshake),
            pipes: [Some(pipe_fwd), Some(pipe_rev)],
            tasks: Vec::new(),
            closed: Vec::new(),
            dead: Vec::new(),
        };
        driver.execute(actions);
        driver
    }

    /// Spawn a task that delivers `ev` at absolute scenario time `at`.
    fn emit_at(&mut self, tag: Tag, at: Duration, ev: Ev) {
        let tx = self.tx.clone();
        let due = self.start + at;
        self.tasks.push((
            tag,
            tokio::spawn(async move {
                sleep_until(due).await;
                let _ = tx.send(ev);
            }),
        ));
    }

    fn cancel(&mut self, tag: Tag) {
        self.tasks.retain(|(t, handle)| {
            if *t == tag {
                handle.abort();
                false
            } else {
                true
            }
        });
    }

    fn execute(&mut self, actions: Vec<ConnAction<SockId, TestKey>>) {
        for action in actions {
            match action {
                ConnAction::StartTimer { kind, after } => {
                    let tx = self.tx.clone();
                    let due = Instant::now() + after;
                    self.tasks.push((
                        Tag::Timer(kind),
                        tokio::spawn(async move {
                            sleep_until(due).await;
                            let _ = tx.send(Ev::Timer(kind));
                        }),
                    ));
                }
                ConnAction::CancelTimer(kind) => self.cancel(Tag::Timer(kind)),
                ConnAction::StartDial { .. } => {
                    match self.dial.take().expect("dial started twice") {
                        DialScript::Succeed { at, sock } => {
                            self.emit_at(Tag::Dial, at, Ev::Dial(Some(sock)));
                        }
                        DialScript::Exhaust { at } => self.emit_at(Tag::Dial, at, Ev::Dial(None)),
                        DialScript::Never => {}
                        DialScript::StartFail => panic!("not scripted in async tests"),
                    }
                }
                ConnAction::CancelDial => self.cancel(Tag::Dial),
                ConnAction::StartHandshake { .. } => {
                    match self.handshake.take().expect("handshake started twice") {
                        HandshakeScript::Deliver { at, keys } => {
                            self.emit_at(Tag::Handshake, at, Ev::Handshake(keys));
                        }
                        HandshakeScript::Never => {}
                        HandshakeScript::StartFail => panic!("not scripted in async tests"),
                    }
                }
                ConnAction::CancelHandshake => self.cancel(Tag::Handshake),
                ConnAction::ConfigureSockets { .. } => {}
                ConnAction::StartPipe { dir, .. } => {
                    let script = self.pipes[match dir {
                        Direction::Forward => 0,
                        Direction::Reverse => 1,
                    }]
                    .take()
                    .expect("pipe started twice");
                    let tx = self.tx.clone();
                    let start = self.start;
                    self.tasks.push((
                        Tag::Pipe(dir),
                        tokio::spawn(async move {
                            for (at, status) in script.transitions {
                                sleep_until(start + at).await;
                                let _ = tx.send(Ev::Pipe(dir, status));
                            }
                        }),
                    ));
                }
                ConnAction::CancelPipe(dir) => self.cancel(Tag::Pipe(dir)),
                ConnAction::CloseSocket(sock) => self.closed.push(sock),
                ConnAction::Dead(reason) => self.dead.push(reason),
            }
        }
    }

    async fn run(mut self) -> (Vec<DropReason>, Vec<SockId>, Duration) {
        while self.dead.is_empty() {
            let ev = self.rx.recv().await.expect("driver holds a sender");
            let actions = match ev {
                Ev::Timer(TimerKind::Dial) => self.conn.dial_timeout(),
                Ev::Timer(TimerKind::Handshake) => self.conn.handshake_timeout(),
                Ev::Dial(sock) => self.conn.dial_done(sock),
                Ev::Handshake(keys) => self.conn.handshake_done(keys),
                Ev::Pipe(dir, status) => self.conn.pipe_status(dir, status),
            };
            self.execute(actions);
        }

        for (_, handle) in &self.tasks {
            handle.abort();
        }
        (self.dead, self.closed, self.start.elapsed())
    }
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn encrypt_happy_path_over_async_driver() {
    let driver = AsyncDriver::create(
        Role::Encrypt,
        5,
        DialScript::succeed_at(1, SockId(7)),
        HandshakeScript::keys_at(2),
        PipeScript::eof_at(3),
        PipeScript::eof_at(4),
    );

    let (dead, closed, elapsed) = driver.run().await;
    assert_eq!(dead, vec![DropReason::Closed]);
    assert_eq!(closed, vec![SockId(3), SockId(7)]);
    assert_eq!(elapsed, Duration::from_secs(4));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn dial_timeout_over_async_driver() {
    let driver = AsyncDriver::create(
        Role::Encrypt,
        2,
        DialScript::Never,
        HandshakeScript::Never,
        PipeScript::quiet(),
        PipeScript::quiet(),
    );

    let (dead, closed, elapsed) = driver.run().await;
    assert_eq!(dead, vec![DropReason::Error]);
    assert_eq!(closed, vec![SockId(3)]);
    assert_eq!(elapsed, Duration::from_secs(2));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn decrypt_pipe_failure_over_async_driver() {
    let driver = AsyncDriver::create(
        Role::Decrypt,
        5,
        DialScript::succeed_at(2, SockId(9)),
        HandshakeScript::keys_at(1),
        PipeScript::fail_at(3),
        PipeScript::quiet(),
    );

    let (dead, closed, elapsed) = driver.run().await;
    assert_eq!(dead, vec![DropReason::Error]);
    assert_eq!(closed, vec![SockId(3), SockId(9)]);
    assert_eq!(elapsed, Duration::from_secs(3));
}
