// Copyright 2025 Lattice ECS Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Structural deferral log
//!
//! While the world lock counter is nonzero, structural operations are
//! recorded here in submission order and replayed on the final release.
//! The queue is lock-free so parallel job workers can append concurrently.

use crossbeam::queue::SegQueue;

use crate::entity::EntityId;
use crate::error::Result;
use crate::world::WorldState;

/// Type-erased deferred structural operation
pub(crate) type DeferredOp = Box<dyn FnOnce(&mut WorldState) -> Result<()> + Send>;

/// One recorded structural change
pub(crate) enum Command {
    /// Spawn with an identifier reserved at submission time, so later log
    /// entries can refer to the new entity
    Spawn(EntityId),

    /// Despawn; invalidates all later commands against the same entity
    /// within one drain
    Despawn(EntityId),

    /// Any other structural change against `entity`
    Apply { entity: EntityId, op: DeferredOp },
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Spawn(e) => f.debug_tuple("Spawn").field(e).finish(),
            Command::Despawn(e) => f.debug_tuple("Despawn").field(e).finish(),
            Command::Apply { entity, .. } => f.debug_struct("Apply").field("entity", entity).finish_non_exhaustive(),
        }
    }
}

/// FIFO queue of deferred structural changes
pub(crate) struct DeferralLog {
    queue: SegQueue<Command>,
}

impl DeferralLog {
    pub fn new() -> Self {
        Self {
            queue: SegQueue::new(),
        }
    }

    pub fn push(&self, command: Command) {
        self.queue.push(command);
    }

    pub fn pop(&self) -> Option<Command> {
        self.queue.pop()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_is_fifo() {
        let log = DeferralLog::new();
        log.push(Command::Despawn(EntityId::new(0, 0)));
        log.push(Command::Despawn(EntityId::new(1, 0)));
        assert_eq!(log.len(), 2);

        match log.pop() {
            Some(Command::Despawn(e)) => assert_eq!(e.index(), 0),
            other => panic!("unexpected command: {other:?}"),
        }
        match log.pop() {
            Some(Command::Despawn(e)) => assert_eq!(e.index(), 1),
            other => panic!("unexpected command: {other:?}"),
        }
        assert!(log.pop().is_none());
        assert!(log.is_empty());
    }
}
