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

use crate::Result;
use crate::error::LumenError;

/// A dedicated thread that runs calls on behalf of one guest context
pub(crate) mod handler;
/// Copying memory to and from another process
pub mod process_memory;
/// The set of live guest contexts
pub mod table;

pub use table::ContextTable;

/// Identifies one emulated guest context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u32);

impl ContextId {
    /// Create a context id from its raw value
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// The raw value of this id
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The execution context a mapping lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Owner {
    /// The host process itself
    Host,
    /// An emulated guest context
    Guest(ContextId),
}

impl Owner {
    /// Whether this is the host
    pub fn is_host(&self) -> bool {
        matches!(self, Owner::Host)
    }
}

impl std::fmt::Display for Owner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Owner::Host => write!(f, "host"),
            Owner::Guest(id) => write!(f, "guest context {id}"),
        }
    }
}

/// A supported direction for relocating memory between contexts. Every
/// transfer has the host on exactly one end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    /// From the host into a guest context
    HostToGuest(ContextId),
    /// From a guest context back to the host
    GuestToHost(ContextId),
}

impl TransferDirection {
    /// Work out the direction of a transfer from `from` to `to`, or fail
    /// with `UnsupportedTransfer` if both ends are the host or both are
    /// guest contexts.
    pub fn between(from: Owner, to: Owner) -> Result<Self> {
        match (from, to) {
            (Owner::Host, Owner::Guest(id)) => Ok(TransferDirection::HostToGuest(id)),
            (Owner::Guest(id), Owner::Host) => Ok(TransferDirection::GuestToHost(id)),
            (Owner::Host, Owner::Host) | (Owner::Guest(_), Owner::Guest(_)) => {
                Err(LumenError::UnsupportedTransfer(from, to))
            }
        }
    }

    /// The guest context on the other end of the transfer
    pub fn guest(&self) -> ContextId {
        match self {
            TransferDirection::HostToGuest(id) | TransferDirection::GuestToHost(id) => *id,
        }
    }

    pub(crate) fn label(&self) -> &'static str {
        match self {
            TransferDirection::HostToGuest(_) => "host_to_guest",
            TransferDirection::GuestToHost(_) => "guest_to_host",
        }
    }
}

/// The operations a guest context can be asked to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    /// Map memory
    Mmap,
    /// Unmap memory
    Munmap,
    /// Change the protection of mapped memory
    Mprotect,
}

impl Syscall {
    /// The native syscall number
    pub fn number(&self) -> libc::c_long {
        match self {
            Syscall::Mmap => libc::SYS_mmap,
            Syscall::Munmap => libc::SYS_munmap,
            Syscall::Mprotect => libc::SYS_mprotect,
        }
    }
}

/// A single operation to be performed inside a guest context: an
/// operation code and five argument slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextCall {
    /// The operation to perform
    pub syscall: Syscall,
    /// The argument registers, in order
    pub args: [u64; 5],
}

impl ContextCall {
    /// The largest magnitude the kernel uses for a `-errno` result
    const MAX_ERRNO: i64 = 4095;

    /// An anonymous `mmap` of `length` bytes. The fd slot always holds -1
    /// as there is no backing file; the offset is implicitly 0.
    pub fn mmap(address: u64, length: u64, prot: libc::c_int, flags: libc::c_int) -> Self {
        Self {
            syscall: Syscall::Mmap,
            args: [address, length, prot as u64, flags as u64, -1i64 as u64],
        }
    }

    /// A `munmap` of `length` bytes at `address`
    pub fn munmap(address: u64, length: u64) -> Self {
        Self {
            syscall: Syscall::Munmap,
            args: [address, length, 0, 0, 0],
        }
    }

    /// An `mprotect` of `length` bytes at `address` to `prot`
    pub fn mprotect(address: u64, length: u64, prot: libc::c_int) -> Self {
        Self {
            syscall: Syscall::Mprotect,
            args: [address, length, prot as u64, 0, 0],
        }
    }

    /// Split a raw result register into its value or the errno it
    /// encodes. The kernel reports failure as a value in `-4095..=-1`,
    /// which as an unsigned register is at the very top of the range.
    pub fn decode_result(raw: u64) -> std::result::Result<u64, i32> {
        let signed = raw as i64;
        if (-Self::MAX_ERRNO..0).contains(&signed) {
            Err((-signed) as i32)
        } else {
            Ok(raw)
        }
    }
}

/// Runs operations inside a guest context as if they were issued there
/// natively. Calls are synchronous: `execute` does not return until the
/// target context has run the operation.
pub trait ContextExecutor: Send + Sync {
    /// Run `call` inside `context` and return its raw result register
    fn execute(&self, context: ContextId, call: ContextCall) -> Result<u64>;
}

/// Copies bytes between the host and a guest context's address space
pub trait ForeignMemory: Send + Sync {
    /// Fill `buffer` from `address` in `context`
    fn read_memory(&self, context: ContextId, address: u64, buffer: &mut [u8]) -> Result<()>;
    /// Copy `buffer` to `address` in `context`
    fn write_memory(&self, context: ContextId, address: u64, buffer: &[u8]) -> Result<()>;
}
