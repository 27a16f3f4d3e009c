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

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

use tracing::{Span, instrument};

use super::handler::ContextHandler;
use super::process_memory::ProcessMemory;
use super::{ContextCall, ContextExecutor, ContextId, ForeignMemory};
use crate::Result;
use crate::config::KernelConfiguration;
use crate::error::LumenError;

struct GuestContext {
    handler: ContextHandler,
    memory: ProcessMemory,
}

/// The live guest contexts of an emulated system.
///
/// Each guest context is a handler thread of the current process, so its
/// memory is reached through the current process id. The table serves as
/// both the cross-context executor and the foreign memory copier for the
/// contexts it owns.
pub struct ContextTable {
    contexts: RwLock<HashMap<ContextId, Arc<GuestContext>>>,
    next_id: AtomicU32,
    config: KernelConfiguration,
}

impl ContextTable {
    /// Create an empty table. Handler threads spawned later use the stack
    /// size from `config`.
    pub fn new(config: KernelConfiguration) -> Self {
        Self {
            contexts: RwLock::new(HashMap::new()),
            next_id: AtomicU32::new(1),
            config,
        }
    }

    /// Start a new guest context and return its id
    #[instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace")]
    pub fn spawn(&self) -> Result<ContextId> {
        let id = ContextId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let context = GuestContext {
            handler: ContextHandler::start(id, &self.config)?,
            memory: ProcessMemory::current(),
        };
        self.contexts.write()?.insert(id, Arc::new(context));
        log::info!("Spawned guest context {}", id);
        Ok(id)
    }

    /// Stop guest context `id`. Mappings it still holds are left behind;
    /// objects that owned them fail their teardown and log it.
    #[instrument(err(Debug), skip(self), parent = Span::current(), level = "Trace")]
    pub fn exit(&self, id: ContextId) -> Result<()> {
        let context = self
            .contexts
            .write()?
            .remove(&id)
            .ok_or(LumenError::ContextNotFound(id))?;
        context.handler.kill_context_handler_thread()?;
        log::info!("Guest context {} exited", id);
        Ok(())
    }

    /// Whether guest context `id` is live
    pub fn contains(&self, id: ContextId) -> bool {
        self.contexts
            .read()
            .map(|contexts| contexts.contains_key(&id))
            .unwrap_or(false)
    }

    /// The number of live guest contexts
    pub fn len(&self) -> usize {
        self.contexts
            .read()
            .map(|contexts| contexts.len())
            .unwrap_or(0)
    }

    /// Whether there are no live guest contexts
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, id: ContextId) -> Result<Arc<GuestContext>> {
        self.contexts
            .read()?
            .get(&id)
            .cloned()
            .ok_or(LumenError::ContextNotFound(id))
    }
}

impl ContextExecutor for ContextTable {
    fn execute(&self, context: ContextId, call: ContextCall) -> Result<u64> {
        // the table lock is released before blocking on the handler
        let context_ref = self.get(context)?;
        context_ref.handler.execute_context_call(call)
    }
}

impl ForeignMemory for ContextTable {
    fn read_memory(&self, context: ContextId, address: u64, buffer: &mut [u8]) -> Result<()> {
        self.get(context)?.memory.read(address, buffer)
    }

    fn write_memory(&self, context: ContextId, address: u64, buffer: &[u8]) -> Result<()> {
        self.get(context)?.memory.write(address, buffer)
    }
}

impl std::fmt::Debug for ContextTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextTable")
            .field("contexts", &self.len())
            .field("config", &self.config)
            .finish()
    }
}
