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

//! Error types

use std::fmt;

/// ECS error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EcsError {
    /// Operation on a despawned or otherwise invalid entity identifier
    StaleEntity,

    /// A query selects the same column mutably more than once
    AliasingConflict(&'static str),

    /// A stream operation named a component type the stream does not select
    ComponentNotFound,

    /// A stream was executed against a world it was not compiled for
    WrongWorld,
}

impl fmt::Display for EcsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EcsError::StaleEntity => write!(f, "stale entity identifier"),
            EcsError::AliasingConflict(name) => {
                write!(f, "query selects `{name}` mutably more than once")
            }
            EcsError::ComponentNotFound => write!(f, "component type not selected by this stream"),
            EcsError::WrongWorld => write!(f, "stream executed against a different world"),
        }
    }
}

impl std::error::Error for EcsError {}

/// Result type alias
pub type Result<T> = std::result::Result<T, EcsError>;
