//! Declarative scenario builder enforcing the oracle pattern.
//!
//! A scenario configures one connection's role, timers, and collaborator
//! scripts, runs it to quiescence on the virtual clock, and hands the
//! resulting [`World`] to a mandatory oracle function for verification.

use std::net::Ipv4Addr;
use std::time::Duration;

use shroud_core::{AddrList, ConnConfig, Role, SharedSecret, SockAddr};

use crate::driver::{Driver, Scripts};
use crate::script::{DialScript, HandshakeScript, PipeScript, SockId};
use crate::sim_rng::SimRng;
use crate::world::World;

/// Oracle function type.
///
/// Receives the world after the run and returns `Ok(())` if all
/// invariants hold, or a message describing the violation.
pub type OracleFn = Box<dyn FnOnce(&World) -> Result<(), String>>;

/// Scenario builder.
pub struct Scenario {
    role: Role,
    timeout: Duration,
    no_pfs: bool,
    require_pfs: bool,
    no_keepalive: bool,
    sock_in: SockId,
    targets: AddrList,
    dial: DialScript,
    handshake: HandshakeScript,
    pipe_fwd: PipeScript,
    pipe_rev: PipeScript,
}

impl Scenario {
    /// A scenario with a 5 second timeout, two candidate targets, and
    /// collaborators that never complete on their own.
    pub fn new(role: Role) -> Self {
        Self {
            role,
            timeout: Duration::from_secs(5),
            no_pfs: false,
            require_pfs: false,
            no_keepalive: false,
            sock_in: SockId(3),
            targets: vec![
                SockAddr::inet(Ipv4Addr::new(192, 0, 2, 1), 8025),
                SockAddr::inet(Ipv4Addr::new(192, 0, 2, 2), 8025),
            ]
            .into(),
            dial: DialScript::Never,
            handshake: HandshakeScript::Never,
            pipe_fwd: PipeScript::quiet(),
            pipe_rev: PipeScript::quiet(),
        }
    }

    /// Set the dial-and-handshake timeout in whole seconds.
    #[must_use]
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    /// Script the outbound dial.
    #[must_use]
    pub fn with_dial(mut self, dial: DialScript) -> Self {
        self.dial = dial;
        self
    }

    /// Script the handshake.
    #[must_use]
    pub fn with_handshake(mut self, handshake: HandshakeScript) -> Self {
        self.handshake = handshake;
        self
    }

    /// Script the forward pipe.
    #[must_use]
    pub fn with_pipe_forward(mut self, pipe: PipeScript) -> Self {
        self.pipe_fwd = pipe;
        self
    }

    /// Script the reverse pipe.
    #[must_use]
    pub fn with_pipe_reverse(mut self, pipe: PipeScript) -> Self {
        self.pipe_rev = pipe;
        self
    }

    /// Leave transport keep-alives off.
    #[must_use]
    pub fn with_no_keepalive(mut self) -> Self {
        self.no_keepalive = true;
        self
    }

    /// Decline forward secrecy up front.
    #[must_use]
    pub fn with_no_pfs(mut self) -> Self {
        self.no_pfs = true;
        self
    }

    /// Demand forward secrecy of the peer.
    #[must_use]
    pub fn with_require_pfs(mut self) -> Self {
        self.require_pfs = true;
        self
    }

    /// Set the oracle function and return a runnable scenario.
    ///
    /// The oracle is mandatory: a scenario cannot run without
    /// verification.
    pub fn oracle(self, oracle: OracleFn) -> RunnableScenario {
        RunnableScenario { scenario: self, oracle }
    }
}

/// A scenario with an oracle function that can be executed.
pub struct RunnableScenario {
    scenario: Scenario,
    oracle: OracleFn,
}

impl RunnableScenario {
    /// Execute the scenario: create the connection, run the clock until
    /// nothing remains scheduled, and invoke the oracle on the world.
    ///
    /// # Errors
    ///
    /// Returns the oracle's message if verification fails, or a
    /// description of a bring-up failure (in which case the accepted
    /// socket was handed back and no dead notification was delivered).
    pub fn run(self) -> Result<(), String> {
        let rng = SimRng::new();
        let mut secret = vec![0u8; 32];
        rng.fill_bytes(&mut secret);

        let config = ConnConfig {
            role: self.scenario.role,
            timeout: self.scenario.timeout,
            bind: None,
            no_pfs: self.scenario.no_pfs,
            require_pfs: self.scenario.require_pfs,
            no_keepalive: self.scenario.no_keepalive,
            secret: SharedSecret::new(secret),
        };
        let scripts = Scripts {
            dial: self.scenario.dial,
            handshake: self.scenario.handshake,
            pipe_fwd: self.scenario.pipe_fwd,
            pipe_rev: self.scenario.pipe_rev,
        };

        let driver = Driver::create(self.scenario.sock_in, self.scenario.targets, config, scripts)
            .map_err(|sock| {
                format!("bring-up failed; accepted socket {sock:?} returned to the caller")
            })?;
        let world = driver.run();

        (self.oracle)(&world)
    }
}

#[cfg(test)]
mod tests {
    use shroud_core::DropReason;

    use super::*;

    #[test]
    fn scenario_requires_oracle() {
        // This should compile - oracle provided.
        let _scenario = Scenario::new(Role::Encrypt).oracle(Box::new(|_world| Ok(())));
    }

    #[test]
    fn scenario_runs_to_quiescence() {
        // Nothing scripted: the dial timer fires and drops the connection.
        Scenario::new(Role::Encrypt)
            .with_timeout(2)
            .oracle(Box::new(|world| {
                if world.dead_reason() != Some(DropReason::Error) {
                    return Err(format!("expected timeout error, got {:?}", world.dead_reason()));
                }
                Ok(())
            }))
            .run()
            .expect("scenario should succeed");
    }
}
