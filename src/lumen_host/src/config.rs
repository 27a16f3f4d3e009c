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

use std::cmp::max;

use lumen_common::mem::PAGE_SIZE_USIZE;
use tracing::{Span, instrument};

/// The configuration shared by the kernel objects of one emulated system
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct KernelConfiguration {
    /// The largest region a single transfer memory object may map, in
    /// bytes. Creating or transferring a larger region fails before any
    /// mapping is attempted.
    max_transfer_memory_size: usize,
    /// The stack size of each guest context handler thread. The handler
    /// only issues syscalls, so it does not need a full-size stack.
    context_handler_stack_size: usize,
}

impl KernelConfiguration {
    /// The default maximum size of a transfer memory region
    pub const DEFAULT_MAX_TRANSFER_MEMORY_SIZE: usize = 0x1_0000_0000;
    /// The minimum value for the maximum size of a transfer memory region
    pub const MIN_MAX_TRANSFER_MEMORY_SIZE: usize = PAGE_SIZE_USIZE;
    /// The default stack size of a context handler thread
    pub const DEFAULT_CONTEXT_HANDLER_STACK_SIZE: usize = 0x40000;
    /// The minimum stack size of a context handler thread
    pub const MIN_CONTEXT_HANDLER_STACK_SIZE: usize = 0x10000;

    /// Create a new configuration with the given limits. Values below
    /// their minimum are raised to the minimum.
    #[instrument(skip_all, parent = Span::current(), level= "Trace")]
    pub fn new(max_transfer_memory_size: usize, context_handler_stack_size: usize) -> Self {
        Self {
            max_transfer_memory_size: max(
                max_transfer_memory_size,
                Self::MIN_MAX_TRANSFER_MEMORY_SIZE,
            ),
            context_handler_stack_size: max(
                context_handler_stack_size,
                Self::MIN_CONTEXT_HANDLER_STACK_SIZE,
            ),
        }
    }

    /// Set the largest region a transfer memory object may map
    /// the minimum value is MIN_MAX_TRANSFER_MEMORY_SIZE
    #[instrument(skip_all, parent = Span::current(), level= "Trace")]
    pub fn set_max_transfer_memory_size(&mut self, max_transfer_memory_size: usize) {
        self.max_transfer_memory_size = max(
            max_transfer_memory_size,
            Self::MIN_MAX_TRANSFER_MEMORY_SIZE,
        );
    }

    /// Set the stack size of context handler threads
    /// the minimum value is MIN_CONTEXT_HANDLER_STACK_SIZE
    #[instrument(skip_all, parent = Span::current(), level= "Trace")]
    pub fn set_context_handler_stack_size(&mut self, context_handler_stack_size: usize) {
        self.context_handler_stack_size = max(
            context_handler_stack_size,
            Self::MIN_CONTEXT_HANDLER_STACK_SIZE,
        );
    }

    /// The largest region a transfer memory object may map
    pub fn max_transfer_memory_size(&self) -> usize {
        self.max_transfer_memory_size
    }

    /// The stack size of context handler threads
    pub fn context_handler_stack_size(&self) -> usize {
        self.context_handler_stack_size
    }
}

impl Default for KernelConfiguration {
    #[instrument(skip_all, parent = Span::current(), level= "Trace")]
    fn default() -> Self {
        Self::new(
            Self::DEFAULT_MAX_TRANSFER_MEMORY_SIZE,
            Self::DEFAULT_CONTEXT_HANDLER_STACK_SIZE,
        )
    }
}
