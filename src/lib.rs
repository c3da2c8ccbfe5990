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

//! Lattice ECS - archetype component store with relational keys
//!
//! Entities are partitioned by exact component signature into column-oriented
//! archetypes. Components are keyed by `(type, role, target)`, so relations
//! to other entities and links to shared objects are first-class components
//! occupying their own columns. Compiled streams enumerate matching
//! archetypes (wildcards included) and dispatch per-entity, parallel,
//! per-archetype, and bulk-overwrite workloads; structural changes made
//! while a runner is active are deferred and replayed afterwards.

pub mod archetype;
pub mod component;
pub mod entity;
pub mod error;
pub mod key;
pub mod prelude;
pub mod query;
pub mod world;

mod command;

// Re-exports for convenience
pub use archetype::Archetype;
pub use component::{Component, ObjectHandle, ObjectId};
pub use entity::{EntityId, EntityLocation};
pub use error::{EcsError, Result};
pub use key::{KeyId, KeyPattern, KeyRole, KeyTarget, Signature};
pub use query::{Obj, QueryBuilder, Read, Rel, RelMut, Select, Stream, StreamQuery, Write};
pub use world::{EntityCtx, EntityMut, World, WorldLock};
