// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Generation-indexed arena for task-scoped allocations.
//!
//! Slots are never freed one by one. [`Arena::reset`] drops every slot at once
//! and bumps the generation, so handles handed out before the reset no longer
//! resolve.

use std::fmt::{self, Debug, Formatter};
use std::marker::PhantomData;

/// Typed handle into an [`Arena`].
pub struct ArenaHandle<T> {
    generation: u64,
    index: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ArenaHandle<T> {
    /// Generation the handle was allocated in.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl<T> Clone for ArenaHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ArenaHandle<T> {}

impl<T> PartialEq for ArenaHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.generation == other.generation && self.index == other.index
    }
}

impl<T> Eq for ArenaHandle<T> {}

impl<T> Debug for ArenaHandle<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArenaHandle")
            .field("generation", &self.generation)
            .field("index", &self.index)
            .finish()
    }
}

/// Bulk-resettable slot arena.
#[derive(Debug)]
pub struct Arena<T> {
    generation: u64,
    slots: Vec<T>,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    /// Creates an empty arena at generation zero.
    pub fn new() -> Self {
        Self {
            generation: 0,
            slots: Vec::new(),
        }
    }

    /// Current generation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of live slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the arena holds nothing.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Moves `value` into the arena.
    pub fn alloc(&mut self, value: T) -> ArenaHandle<T> {
        self.slots.push(value);
        ArenaHandle {
            generation: self.generation,
            index: self.slots.len() - 1,
            _marker: PhantomData,
        }
    }

    /// Resolves a handle. Handles from an earlier generation resolve to `None`.
    pub fn get(&self, handle: ArenaHandle<T>) -> Option<&T> {
        if handle.generation != self.generation {
            return None;
        }
        self.slots.get(handle.index)
    }

    /// Mutable variant of [`Arena::get`].
    pub fn get_mut(&mut self, handle: ArenaHandle<T>) -> Option<&mut T> {
        if handle.generation != self.generation {
            return None;
        }
        self.slots.get_mut(handle.index)
    }

    /// Drops every slot and starts a new generation.
    pub fn reset(&mut self) {
        self.slots.clear();
        self.generation += 1;
    }
}
