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

use lumen_host::{ContextId, ContextTable, KernelConfiguration, KernelState};

/// A kernel with its own context table and the given number of live
/// guest contexts
pub struct TestKernel {
    pub table: Arc<ContextTable>,
    pub state: Arc<KernelState>,
    pub guests: Vec<ContextId>,
}

pub fn new_kernel(guests: usize) -> TestKernel {
    let table = Arc::new(ContextTable::new(KernelConfiguration::default()));
    let state = Arc::new(KernelState::with_context_table(
        table.clone(),
        KernelConfiguration::default(),
    ));
    let guests = (0..guests).map(|_| table.spawn().unwrap()).collect();
    TestKernel {
        table,
        state,
        guests,
    }
}

/// Copy of `len` bytes of host memory at `address`
pub fn host_bytes(address: u64, len: usize) -> Vec<u8> {
    // SAFETY: callers pass a live readable host mapping of `len` bytes
    unsafe { std::slice::from_raw_parts(address as *const u8, len) }.to_vec()
}

/// Overwrite `bytes.len()` bytes of host memory at `address`
pub fn write_host(address: u64, bytes: &[u8]) {
    // SAFETY: callers pass a live writable host mapping of at least
    // `bytes.len()` bytes
    unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), address as *mut u8, bytes.len()) }
}
