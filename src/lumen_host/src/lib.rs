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
#![deny(dead_code, missing_docs, unused_mut)]
//! This crate emulates guest kernel memory objects whose backing mappings
//! live either in the host process or inside an emulated guest context,
//! and which can be relocated between the two.

#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::panic))]
#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::expect_used))]
#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::unwrap_used))]

/// Kernel-wide configuration
pub mod config;
/// Execution contexts: the host, guest contexts, and the mechanisms
/// used to run calls in and copy memory out of guest contexts
pub mod context;
/// Dealing with errors, including errors raised inside guest contexts
pub mod error;
/// Kernel objects and the state they share
pub mod kernel;
/// Mapping backends for the host and for guest contexts
pub mod mem;
/// Metric definitions
pub(crate) mod metrics;
/// Utilities for testing
#[cfg(test)]
pub(crate) mod testing;

/// The re-export for the `KernelConfiguration` type
pub use config::KernelConfiguration;
/// The re-export for the execution context types
pub use context::{ContextId, ContextTable, Owner};
/// The re-export for the `LumenError` type
pub use error::LumenError;
/// The re-export for the `KernelState` type
pub use kernel::KernelState;
/// The re-export for the `TransferMemory` kernel object
pub use kernel::transfer_memory::TransferMemory;
/// The re-export for the memory descriptor types
pub use lumen_common::mem::{MemoryInfo, MemoryPermission, MemoryType};

/// The universal `Result` type used throughout the lumen codebase.
pub type Result<T> = core::result::Result<T, error::LumenError>;

/// Logs an error then returns with it, more or less equivalent to the bail! macro in anyhow
/// but for LumenError instead of anyhow::Error
#[macro_export]
macro_rules! log_then_return {
    ($msg:literal $(,)?) => {{
        let __args = std::format_args!($msg);
        let __err_msg = match __args.as_str() {
            Some(msg) => String::from(msg),
            None => std::format!($msg),
        };
        let __err = $crate::LumenError::Error(__err_msg);
        log::error!("{}", __err);
        return Err(__err);
    }};
    ($err:expr $(,)?) => {
        log::error!("{}", $err);
        return Err($err);
    };
    ($err:stmt $(,)?) => {
        log::error!("{}", $err);
        return Err($err);
    };
    ($fmtstr:expr, $($arg:tt)*) => {
           let __err_msg = std::format!($fmtstr, $($arg)*);
           let __err = $crate::error::LumenError::Error(__err_msg);
           log::error!("{}", __err);
           return Err(__err);
    };
}
