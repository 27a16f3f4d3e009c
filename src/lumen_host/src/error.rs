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

use std::error::Error;
use std::num::TryFromIntError;
use std::sync::{MutexGuard, PoisonError, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;

use crate::context::{ContextId, Owner};

/// The mapping primitive that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapOperation {
    /// Creating a mapping
    Map,
    /// Removing a mapping
    Unmap,
    /// Changing the protection of a mapping
    Protect,
}

impl std::fmt::Display for MapOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MapOperation::Map => write!(f, "mmap"),
            MapOperation::Unmap => write!(f, "munmap"),
            MapOperation::Protect => write!(f, "mprotect"),
        }
    }
}

/// The error type for lumen kernel operations
#[derive(Error, Debug)]
pub enum LumenError {
    /// A guest context was sent a call but its handler thread is gone
    #[error("Communication failure with the handler thread of guest context {0}")]
    ContextHandlerCommunicationFailure(ContextId),

    /// No live guest context has the given id
    #[error("Guest context {0} does not exist")]
    ContextNotFound(ContextId),

    /// A generic error with a message
    #[error("{0}")]
    Error(String),

    /// Copying to or from another context's memory failed
    #[error("Accessing foreign memory at {0:#x} failed with os error {1:?}")]
    ForeignMemoryAccessFailed(u64, Option<i32>),

    /// Reading Writing or Seeking data failed.
    #[error("Reading Writing or Seeking data failed {0:?}")]
    IOError(#[from] std::io::Error),

    /// Failed to convert to Integer
    #[error("Failed To Convert Size to usize")]
    IntConversionFailure(#[from] TryFromIntError),

    /// An attempt to get a lock failed.
    #[error("Unable to lock resource")]
    LockAttemptFailed(String),

    /// A mapping primitive, local or cross-context, reported failure
    #[error("{0} failed in {1} with os error {2:?}")]
    MapFailure(MapOperation, Owner, Option<i32>),

    /// The memory request exceeds the maximum size allowed
    #[error("Memory requested {0} exceeds maximum size allowed {1}")]
    MemoryRequestTooBig(usize, usize),

    /// Transfers must move between the host and exactly one guest context
    #[error("Transferring memory from {0} to {1} is not supported")]
    UnsupportedTransfer(Owner, Owner),
}

impl LumenError {
    /// Whether this error was raised by a mapping primitive
    pub fn is_map_failure(&self) -> bool {
        matches!(self, LumenError::MapFailure(..))
    }
}

impl From<&str> for LumenError {
    fn from(s: &str) -> Self {
        LumenError::Error(s.to_string())
    }
}

fn lock_failure(e: &dyn Error) -> LumenError {
    let source = match e.source() {
        Some(s) => s.to_string(),
        None => e.to_string(),
    };
    LumenError::LockAttemptFailed(source)
}

impl<T> From<PoisonError<MutexGuard<'_, T>>> for LumenError {
    fn from(e: PoisonError<MutexGuard<'_, T>>) -> Self {
        lock_failure(&e)
    }
}

impl<T> From<PoisonError<RwLockReadGuard<'_, T>>> for LumenError {
    fn from(e: PoisonError<RwLockReadGuard<'_, T>>) -> Self {
        lock_failure(&e)
    }
}

impl<T> From<PoisonError<RwLockWriteGuard<'_, T>>> for LumenError {
    fn from(e: PoisonError<RwLockWriteGuard<'_, T>>) -> Self {
        lock_failure(&e)
    }
}

/// Creates a `LumenError::Error` from a string literal or format string
#[macro_export]
macro_rules! new_error {
    ($msg:literal $(,)?) => {{
        let __args = std::format_args!($msg);
        let __err_msg = match __args.as_str() {
            Some(msg) => String::from(msg),
            None => std::format!($msg),
        };
        $crate::LumenError::Error(__err_msg)
    }};
    ($fmtstr:expr, $($arg:tt)*) => {{
           let __err_msg = std::format!($fmtstr, $($arg)*);
           $crate::error::LumenError::Error(__err_msg)
    }};
}
