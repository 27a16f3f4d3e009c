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

use std::cmp::min;
use std::sync::Arc;

use lumen_common::mem::{MemoryAttribute, MemoryInfo, MemoryPermission, MemoryType};
use tracing::{Span, instrument};

use super::{KernelState, RefCount};
use crate::context::{Owner, TransferDirection};
use crate::error::LumenError;
use crate::mem::MappingBackend;
use crate::metrics::{emit_mapping, emit_teardown_failure, emit_transfer};
use crate::{Result, log_then_return, new_error};

/// Where a transfer memory region currently lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Mapping {
    owner: Owner,
    address: u64,
    size: usize,
}

/// A region of memory that is mapped in exactly one execution context at a
/// time, and which can be moved, content included, between the host and a
/// guest context.
///
/// The mapping is removed when the object is dropped.
#[derive(Debug)]
pub struct TransferMemory {
    state: Arc<KernelState>,
    mapping: Mapping,
    permission: MemoryPermission,
    ipc_ref_count: RefCount,
    device_ref_count: RefCount,
}

impl TransferMemory {
    /// Map `size` bytes in `owner` and wrap them in a new transfer memory
    /// object. A zero `address` lets the owner choose where the region
    /// goes.
    #[instrument(err(Debug), skip(state), parent = Span::current(), level = "Trace")]
    pub fn new(
        state: Arc<KernelState>,
        owner: Owner,
        address: u64,
        size: usize,
        permission: MemoryPermission,
    ) -> Result<Self> {
        check_size(&state, size)?;

        let address = state.backend(owner).map(address, size, permission)?;
        emit_mapping(owner);
        log::debug!(
            "Created transfer memory of {:#x} bytes at {:#x} in {} ({})",
            size,
            address,
            owner,
            permission
        );

        Ok(Self {
            state,
            mapping: Mapping {
                owner,
                address,
                size,
            },
            permission,
            ipc_ref_count: RefCount::default(),
            device_ref_count: RefCount::default(),
        })
    }

    /// Move the region to `owner`, mapping `size` bytes at `address` there
    /// (zero lets the new owner choose) and carrying over as much of the
    /// old content as fits. Returns the new address.
    ///
    /// One end of the transfer must be the host and the other a guest
    /// context. The content moves whatever the region's permission; the new
    /// mapping ends up with that permission. If the old mapping cannot be
    /// removed once the content has been moved, the object still ends up at
    /// its new location and the error is returned.
    #[instrument(err(Debug), skip(self), parent = Span::current(), level = "Trace")]
    pub fn transfer(&mut self, owner: Owner, address: u64, size: usize) -> Result<u64> {
        let direction = TransferDirection::between(self.mapping.owner, owner)?;
        check_size(&self.state, size)?;

        let copy_len = min(size, self.mapping.size);
        // the new region stays writable until the content is in
        let staged = if copy_len > 0 {
            self.permission | MemoryPermission::READ_WRITE
        } else {
            self.permission
        };

        let target = self.state.backend(owner);
        let address = target.map(address, size, staged)?;
        emit_mapping(owner);

        if let Err(e) = self.move_content(target.as_ref(), direction, address, size, copy_len) {
            if let Err(unmap_err) = target.unmap(address, size) {
                log::warn!(
                    "Failed to remove abandoned mapping at {:#x} in {}: {}",
                    address,
                    owner,
                    unmap_err
                );
            }
            return Err(e);
        }
        drop(target);

        let previous = std::mem::replace(
            &mut self.mapping,
            Mapping {
                owner,
                address,
                size,
            },
        );
        log::debug!(
            "Transferred {:#x} bytes from {:#x} in {} to {:#x} in {}",
            copy_len,
            previous.address,
            previous.owner,
            address,
            owner
        );

        self.state
            .backend(previous.owner)
            .unmap(previous.address, previous.size)?;
        emit_transfer(direction, copy_len);

        Ok(address)
    }

    /// Move `len` bytes from the current mapping into the new `size` byte
    /// region at `address` in `target`, then drop that region to the
    /// object's permission. A source without read permission is made
    /// readable for the copy and put back if the move fails; on success it
    /// is about to be unmapped.
    fn move_content(
        &self,
        target: &dyn MappingBackend,
        direction: TransferDirection,
        address: u64,
        size: usize,
        len: usize,
    ) -> Result<()> {
        if len == 0 {
            return Ok(());
        }
        let readable = self.permission.contains(MemoryPermission::READ);
        let source = self.state.backend(self.mapping.owner);
        if !readable {
            source.protect(
                self.mapping.address,
                self.mapping.size,
                self.permission | MemoryPermission::READ,
            )?;
        }

        let moved = self.copy(direction, address, len).and_then(|()| {
            if self.permission.contains(MemoryPermission::READ_WRITE) {
                Ok(())
            } else {
                target.protect(address, size, self.permission)
            }
        });
        if moved.is_err() && !readable {
            restore_protection(
                source.as_ref(),
                self.mapping.address,
                self.mapping.size,
                self.permission,
            );
        }
        moved
    }

    fn copy(&self, direction: TransferDirection, address: u64, len: usize) -> Result<()> {
        let memory = self.state.memory();
        match direction {
            TransferDirection::HostToGuest(context) => {
                // SAFETY: the current mapping is a live host mapping of at
                // least `len` bytes that is readable for the duration of the
                // copy, and nothing else holds a reference into it.
                let source = unsafe {
                    std::slice::from_raw_parts(self.mapping.address as *const u8, len)
                };
                memory.write_memory(context, address, source)
            }
            TransferDirection::GuestToHost(context) => {
                // SAFETY: `address` is the host mapping just created with at
                // least `len` bytes and write permission, and it is not yet
                // visible to anything else.
                let target = unsafe { std::slice::from_raw_parts_mut(address as *mut u8, len) };
                memory.read_memory(context, self.mapping.address, target)
            }
        }
    }

    /// A snapshot of the region as the kernel reports it to queries
    #[instrument(skip_all, parent = Span::current(), level = "Trace")]
    pub fn info(&self) -> MemoryInfo {
        let ipc_ref_count = self.ipc_ref_count.get();
        let device_ref_count = self.device_ref_count.get();

        let mut attribute = MemoryAttribute::empty();
        attribute.set(MemoryAttribute::IS_IPC_LOCKED, ipc_ref_count > 0);
        attribute.set(MemoryAttribute::IS_DEVICE_SHARED, device_ref_count > 0);

        MemoryInfo {
            base_address: self.mapping.address,
            size: self.mapping.size as u64,
            memory_type: MemoryType::TransferMemory as u32,
            attribute: attribute.bits(),
            permission: self.permission.bits(),
            ipc_ref_count,
            device_ref_count,
            padding: 0,
        }
    }

    /// Remove the mapping now rather than when the object goes out of scope
    pub fn destroy(self) {
        drop(self)
    }

    /// The context the region is currently mapped in
    pub fn owner(&self) -> Owner {
        self.mapping.owner
    }

    /// The address of the region in its owner
    pub fn address(&self) -> u64 {
        self.mapping.address
    }

    /// The size of the region in bytes
    pub fn size(&self) -> usize {
        self.mapping.size
    }

    /// The permission every mapping of the region ends up with
    pub fn permission(&self) -> MemoryPermission {
        self.permission
    }

    /// The number of IPC references to the region
    pub fn ipc_ref_count(&self) -> &RefCount {
        &self.ipc_ref_count
    }

    /// The number of device references to the region
    pub fn device_ref_count(&self) -> &RefCount {
        &self.device_ref_count
    }
}

impl Drop for TransferMemory {
    #[instrument(skip_all, parent = Span::current(), level = "Trace")]
    fn drop(&mut self) {
        let Mapping {
            owner,
            address,
            size,
        } = self.mapping;
        if let Err(e) = self.state.backend(owner).unmap(address, size) {
            emit_teardown_failure();
            log::warn!(
                "Failed to unmap transfer memory at {:#x} in {}: {}",
                address,
                owner,
                e
            );
        }
    }
}

fn restore_protection(
    backend: &dyn MappingBackend,
    address: u64,
    size: usize,
    permission: MemoryPermission,
) {
    if let Err(e) = backend.protect(address, size, permission) {
        log::warn!(
            "Failed to restore {} protection of transfer memory at {:#x} in {}: {}",
            permission,
            address,
            backend.owner(),
            e
        );
    }
}

fn check_size(state: &KernelState, size: usize) -> Result<()> {
    if size == 0 {
        return Err(new_error!("Cannot create transfer memory with size 0"));
    }
    let max = state.config().max_transfer_memory_size();
    if size > max {
        log_then_return!(LumenError::MemoryRequestTooBig(size, max));
    }
    Ok(())
}
