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

use tracing::{Span, instrument};

use crate::Result;
use crate::error::LumenError;

/// Reads and writes the address space of another process using
/// `process_vm_readv(2)` and `process_vm_writev(2)`.
#[derive(Debug, Clone, Copy)]
pub struct ProcessMemory {
    pid: libc::pid_t,
}

impl ProcessMemory {
    /// Access the memory of process `pid`
    pub fn new(pid: libc::pid_t) -> Self {
        Self { pid }
    }

    /// Access the memory of the current process
    pub fn current() -> Self {
        Self::new(std::process::id() as libc::pid_t)
    }

    /// The process whose memory this accesses
    pub fn pid(&self) -> libc::pid_t {
        self.pid
    }

    /// Fill `buffer` with the bytes at `address` in the target process
    #[instrument(err(Debug), skip(self, buffer), parent = Span::current(), level = "Trace")]
    pub fn read(&self, address: u64, buffer: &mut [u8]) -> Result<()> {
        let mut done = 0usize;
        while done < buffer.len() {
            let local = libc::iovec {
                iov_base: buffer[done..].as_mut_ptr().cast(),
                iov_len: buffer.len() - done,
            };
            let remote = libc::iovec {
                iov_base: (address + done as u64) as *mut libc::c_void,
                iov_len: buffer.len() - done,
            };
            // SAFETY: `local` covers the unfilled tail of `buffer`, which we
            // hold mutably. The remote side is checked by the kernel.
            let n = unsafe { libc::process_vm_readv(self.pid, &local, 1, &remote, 1, 0) };
            done += self.advance(n, address + done as u64)?;
        }
        Ok(())
    }

    /// Copy `buffer` to `address` in the target process
    #[instrument(err(Debug), skip(self, buffer), parent = Span::current(), level = "Trace")]
    pub fn write(&self, address: u64, buffer: &[u8]) -> Result<()> {
        let mut done = 0usize;
        while done < buffer.len() {
            let local = libc::iovec {
                iov_base: buffer[done..].as_ptr() as *mut libc::c_void,
                iov_len: buffer.len() - done,
            };
            let remote = libc::iovec {
                iov_base: (address + done as u64) as *mut libc::c_void,
                iov_len: buffer.len() - done,
            };
            // SAFETY: the kernel only reads through `local`, which covers
            // the unwritten tail of `buffer`.
            let n = unsafe { libc::process_vm_writev(self.pid, &local, 1, &remote, 1, 0) };
            done += self.advance(n, address + done as u64)?;
        }
        Ok(())
    }

    /// Turn the return value of one transfer into the number of bytes it
    /// moved. A transfer that moves nothing is an error: the remote range
    /// ends before the buffer does.
    fn advance(&self, n: isize, address: u64) -> Result<usize> {
        match n {
            -1 => {
                let err = Error::last_os_error();
                if err.raw_os_error() == Some(libc::EINTR) {
                    return Ok(0);
                }
                log::error!(
                    "Foreign memory access in process {} at {:#x} failed: {}",
                    self.pid,
                    address,
                    err
                );
                Err(LumenError::ForeignMemoryAccessFailed(
                    address,
                    err.raw_os_error(),
                ))
            }
            0 => Err(LumenError::ForeignMemoryAccessFailed(address, None)),
            n => Ok(n as usize),
        }
    }
}
