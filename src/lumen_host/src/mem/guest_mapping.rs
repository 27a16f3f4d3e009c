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

use lumen_common::mem::MemoryPermission;
use tracing::{Span, instrument};

use super::{MappingBackend, map_flags, misplaced, protection};
use crate::context::{ContextCall, ContextExecutor, ContextId, Owner};
use crate::error::LumenError::MapFailure;
use crate::error::MapOperation;
use crate::{Result, log_then_return};

/// Maps memory inside a guest context by having the context issue the
/// `mmap`/`munmap`/`mprotect` itself.
pub struct GuestMapper<'a> {
    executor: &'a dyn ContextExecutor,
    context: ContextId,
}

impl<'a> GuestMapper<'a> {
    /// Map into `context` through `executor`
    pub fn new(executor: &'a dyn ContextExecutor, context: ContextId) -> Self {
        Self { executor, context }
    }
}

impl MappingBackend for GuestMapper<'_> {
    fn owner(&self) -> Owner {
        Owner::Guest(self.context)
    }

    #[instrument(err(Debug), skip(self), parent = Span::current(), level = "Trace")]
    fn map(&self, address: u64, size: usize, permission: MemoryPermission) -> Result<u64> {
        let call = ContextCall::mmap(
            address,
            size as u64,
            protection(permission),
            map_flags(address),
        );
        let raw = self.executor.execute(self.context, call)?;
        let mapped = match ContextCall::decode_result(raw) {
            Ok(addr) => addr,
            Err(errno) => {
                log_then_return!(MapFailure(MapOperation::Map, self.owner(), Some(errno)));
            }
        };
        if misplaced(address, mapped) {
            self.unmap(mapped, size)?;
            log_then_return!(MapFailure(MapOperation::Map, self.owner(), Some(libc::EEXIST)));
        }
        Ok(mapped)
    }

    #[instrument(err(Debug), skip(self), parent = Span::current(), level = "Trace")]
    fn unmap(&self, address: u64, size: usize) -> Result<()> {
        let raw = self
            .executor
            .execute(self.context, ContextCall::munmap(address, size as u64))?;
        match ContextCall::decode_result(raw) {
            Ok(_) => Ok(()),
            Err(errno) => {
                log_then_return!(MapFailure(MapOperation::Unmap, self.owner(), Some(errno)));
            }
        }
    }

    #[instrument(err(Debug), skip(self), parent = Span::current(), level = "Trace")]
    fn protect(&self, address: u64, size: usize, permission: MemoryPermission) -> Result<()> {
        let call = ContextCall::mprotect(address, size as u64, protection(permission));
        let raw = self.executor.execute(self.context, call)?;
        match ContextCall::decode_result(raw) {
            Ok(_) => Ok(()),
            Err(errno) => {
                log_then_return!(MapFailure(MapOperation::Protect, self.owner(), Some(errno)));
            }
        }
    }
}
