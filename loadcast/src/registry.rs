use std::collections::HashMap;

use log::{debug, error};
use tokio::task::JoinHandle;

use crate::{
    logging::Scope,
    session::{SessionEnd, SessionId},
};

/// Handles of all spawned sessions, owned and mutated by the listener only.
///
/// There is no cap on how many sessions may be alive at once.
#[derive(Debug, Default)]
pub struct Registry {
    handles: HashMap<SessionId, JoinHandle<SessionEnd>>,
}

impl Registry {
    pub fn register(&mut self, id: SessionId, handle: JoinHandle<SessionEnd>) {
        self.handles.insert(id, handle);
    }

    /// Forget sessions that already finished. Live sessions are never touched.
    pub fn reap(&mut self) -> usize {
        let before = self.handles.len();
        self.handles.retain(|_, handle| !handle.is_finished());
        before - self.handles.len()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every registered session to end on its own.
    pub async fn drain(&mut self, scope: &Scope) -> usize {
        let mut joined = 0;
        for (id, handle) in self.handles.drain() {
            match handle.await {
                Ok(end) => debug!(target: scope.target(), "[{id}] session joined: {end}"),
                Err(e) => error!(target: scope.target(), "[{id}] session did not finish cleanly: {e}"),
            }
            joined += 1;
        }
        joined
    }
}
