//! Liveness of the workers of one Listen session.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// The four worker roles of a Listen session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    ListenSend,
    ListenRecv,
    PutSend,
    PutRecv,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::ListenSend, Role::ListenRecv, Role::PutSend, Role::PutRecv];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::ListenSend => "listen-send",
            Role::ListenRecv => "listen-recv",
            Role::PutSend => "put-send",
            Role::PutRecv => "put-recv",
        }
    }

    fn index(&self) -> usize {
        match self {
            Role::ListenSend => 0,
            Role::ListenRecv => 1,
            Role::PutSend => 2,
            Role::PutRecv => 3,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared view of which workers are still running.
///
/// A worker that stops on a terminal error only shows up here: it never
/// reports an error to the caller.
#[derive(Debug, Clone, Default)]
pub struct SessionProbe {
    alive: Arc<[AtomicBool; 4]>,
}

impl SessionProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_alive(&self, role: Role) -> bool {
        self.alive[role.index()].load(Ordering::SeqCst)
    }

    pub fn live_workers(&self) -> usize {
        Role::ALL.iter().filter(|role| self.is_alive(**role)).count()
    }

    pub(crate) fn set_alive(&self, role: Role, alive: bool) {
        self.alive[role.index()].store(alive, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_tracks_roles() {
        let probe = SessionProbe::new();
        assert_eq!(probe.live_workers(), 0);
        for role in Role::ALL {
            probe.set_alive(role, true);
        }
        probe.set_alive(Role::ListenRecv, false);
        assert_eq!(probe.live_workers(), 3);
        assert!(!probe.is_alive(Role::ListenRecv));
        assert!(probe.clone().is_alive(Role::PutRecv));
    }
}
