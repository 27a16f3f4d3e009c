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

use std::io::Error;
use std::ptr::null_mut;

use libc::{MAP_FAILED, c_void, mmap, mprotect, munmap, off_t, size_t};
use lumen_common::mem::MemoryPermission;
use tracing::{Span, instrument};

use super::{MappingBackend, map_flags, misplaced, protection};
use crate::context::Owner;
use crate::error::LumenError::MapFailure;
use crate::error::MapOperation;
use crate::{Result, log_then_return};

/// Maps memory in the host process with its own `mmap(2)`
#[derive(Debug, Default, Clone, Copy)]
pub struct HostMapper;

impl MappingBackend for HostMapper {
    fn owner(&self) -> Owner {
        Owner::Host
    }

    #[instrument(err(Debug), skip(self), parent = Span::current(), level = "Trace")]
    fn map(&self, address: u64, size: usize, permission: MemoryPermission) -> Result<u64> {
        let hint = if address == 0 {
            null_mut()
        } else {
            address as *mut c_void
        };
        // SAFETY: the mapping is anonymous and a placement never replaces
        // an existing mapping
        let addr = unsafe {
            mmap(
                hint,
                size as size_t,
                protection(permission),
                map_flags(address),
                -1,
                0 as off_t,
            )
        };
        if addr == MAP_FAILED {
            let errno = Error::last_os_error().raw_os_error();
            log_then_return!(MapFailure(MapOperation::Map, Owner::Host, errno));
        }
        let mapped = addr as u64;
        if misplaced(address, mapped) {
            self.unmap(mapped, size)?;
            log_then_return!(MapFailure(MapOperation::Map, Owner::Host, Some(libc::EEXIST)));
        }
        Ok(mapped)
    }

    #[instrument(err(Debug), skip(self), parent = Span::current(), level = "Trace")]
    fn unmap(&self, address: u64, size: usize) -> Result<()> {
        // SAFETY: callers only pass ranges they mapped through `map`
        let ret = unsafe { munmap(address as *mut c_void, size as size_t) };
        if ret != 0 {
            let errno = Error::last_os_error().raw_os_error();
            log_then_return!(MapFailure(MapOperation::Unmap, Owner::Host, errno));
        }
        Ok(())
    }

    #[instrument(err(Debug), skip(self), parent = Span::current(), level = "Trace")]
    fn protect(&self, address: u64, size: usize, permission: MemoryPermission) -> Result<()> {
        // SAFETY: callers only pass ranges they mapped through `map` and
        // hold no references into them across the change
        let ret = unsafe {
            mprotect(
                address as *mut c_void,
                size as size_t,
                protection(permission),
            )
        };
        if ret != 0 {
            let errno = Error::last_os_error().raw_os_error();
            log_then_return!(MapFailure(MapOperation::Protect, Owner::Host, errno));
        }
        Ok(())
    }
}
