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

use crate::Result;
use crate::context::Owner;

/// Mapping through a guest context's handler thread
pub mod guest_mapping;
/// Mapping with the host's own `mmap`
pub mod host_mapping;

pub use guest_mapping::GuestMapper;
pub use host_mapping::HostMapper;

/// Creates and removes anonymous mappings in one execution context
pub trait MappingBackend {
    /// The context this backend maps into
    fn owner(&self) -> Owner;

    /// Create a private anonymous mapping of `size` bytes with protection
    /// `permission`. A nonzero `address` is a fixed placement that never
    /// replaces an existing mapping: an occupied range fails with
    /// `EEXIST`. Zero lets the context choose. Returns the address mapped.
    fn map(&self, address: u64, size: usize, permission: MemoryPermission) -> Result<u64>;

    /// Remove the mapping of `size` bytes at `address`
    fn unmap(&self, address: u64, size: usize) -> Result<()>;

    /// Change the protection of the `size` bytes at `address`
    fn protect(&self, address: u64, size: usize, permission: MemoryPermission) -> Result<()>;
}

/// The `mmap` protection bits for `permission`
pub(crate) fn protection(permission: MemoryPermission) -> libc::c_int {
    let mut prot = libc::PROT_NONE;
    if permission.contains(MemoryPermission::READ) {
        prot |= libc::PROT_READ;
    }
    if permission.contains(MemoryPermission::WRITE) {
        prot |= libc::PROT_WRITE;
    }
    if permission.contains(MemoryPermission::EXECUTE) {
        prot |= libc::PROT_EXEC;
    }
    prot
}

/// The `mmap` flags for a private anonymous mapping at `address`
pub(crate) fn map_flags(address: u64) -> libc::c_int {
    let flags = libc::MAP_ANONYMOUS | libc::MAP_PRIVATE;
    if address != 0 {
        flags | libc::MAP_FIXED_NOREPLACE
    } else {
        flags
    }
}

/// Whether a placed mapping landed somewhere other than `address`.
/// Kernels older than 4.17 treat `MAP_FIXED_NOREPLACE` as a hint and
/// return a different address instead of failing with `EEXIST`.
pub(crate) fn misplaced(address: u64, mapped: u64) -> bool {
    address != 0 && mapped != address
}
