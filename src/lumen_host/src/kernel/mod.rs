/*
Copyright 2025  The Lumen Authors.

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::config::KernelConfiguration;
use crate::context::{ContextExecutor, ContextTable, ForeignMemory, Owner};
use crate::mem::{GuestMapper, HostMapper, MappingBackend};

/// Transfer memory: a region that can be relocated between the host and
/// a guest context
pub mod transfer_memory;

/// The collaborators shared by every kernel object of one emulated system
pub struct KernelState {
    executor: Arc<dyn ContextExecutor>,
    memory: Arc<dyn ForeignMemory>,
    host: HostMapper,
    config: KernelConfiguration,
}

impl KernelState {
    /// Create kernel state from an executor and a memory copier
    pub fn new(
        executor: Arc<dyn ContextExecutor>,
        memory: Arc<dyn ForeignMemory>,
        config: KernelConfiguration,
    ) -> Self {
        Self {
            executor,
            memory,
            host: HostMapper,
            config,
        }
    }

    /// Create kernel state whose guest contexts all live in `table`
    pub fn with_context_table(table: Arc<ContextTable>, config: KernelConfiguration) -> Self {
        Self::new(table.clone(), table, config)
    }

    /// The configuration kernel objects are checked against
    pub fn config(&self) -> &KernelConfiguration {
        &self.config
    }

    pub(crate) fn memory(&self) -> &dyn ForeignMemory {
        self.memory.as_ref()
    }

    /// The mapping backend for `owner`
    pub(crate) fn backend(&self, owner: Owner) -> Box<dyn MappingBackend + '_> {
        match owner {
            Owner::Host => Box::new(self.host),
            Owner::Guest(context) => Box::new(GuestMapper::new(self.executor.as_ref(), context)),
        }
    }
}

impl std::fmt::Debug for KernelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelState")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// A reference count that collaborators update while the owning object
/// only reports it.
#[derive(Debug, Default)]
pub struct RefCount(AtomicU32);

impl RefCount {
    /// Add one reference and return the new count
    pub fn increment(&self) -> u32 {
        self.0.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
    }

    /// Drop one reference and return the new count. The count never goes
    /// below zero.
    pub fn decrement(&self) -> u32 {
        match self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        {
            Ok(previous) => previous - 1,
            Err(_) => 0,
        }
    }

    /// The current count
    pub fn get(&self) -> u32 {
        self.0.load(Ordering::Acquire)
    }
}
