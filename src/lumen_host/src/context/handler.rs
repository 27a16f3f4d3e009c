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

use std::sync::Mutex;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use tracing::{Span, instrument};

use super::{ContextCall, ContextId};
use crate::config::KernelConfiguration;
use crate::error::LumenError;
use crate::{Result, log_then_return, new_error};

type ContextHandlerTx = Sender<ContextHandlerAction>;
type ContextHandlerRx = Receiver<ContextHandlerAction>;

/// `ContextHandlerAction` is an enum that represents the actions that a
/// `ContextHandler` can execute.
pub(crate) enum ContextHandlerAction {
    /// Run a call and send its raw result back on the given channel
    Execute(ContextCall, Sender<HandlerMsg>),
    /// Stop the handler thread
    TerminateHandlerThread,
}

impl std::fmt::Debug for ContextHandlerAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContextHandlerAction::Execute(call, _) => write!(f, "Execute({:?})", call.syscall),
            ContextHandlerAction::TerminateHandlerThread => write!(f, "TerminateHandlerThread"),
        }
    }
}

/// Messages sent from the handler thread back to the caller
#[derive(Debug)]
pub(crate) enum HandlerMsg {
    /// The call ran and produced this raw result register
    FinishedContextCall(u64),
}

/// The thread that stands in for one guest context. Every call sent to it
/// runs on that thread, in order, and the caller blocks until the result
/// comes back.
pub(crate) struct ContextHandler {
    id: ContextId,
    to_handler_tx: ContextHandlerTx,
    join_handle: Mutex<Option<JoinHandle<Result<()>>>>,
}

impl ContextHandler {
    /// Spawn the handler thread for context `id`
    #[instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace")]
    pub(crate) fn start(id: ContextId, config: &KernelConfiguration) -> Result<Self> {
        let (to_handler_tx, to_handler_rx) = crossbeam_channel::unbounded();

        let join_handle = thread::Builder::new()
            .name(format!("Context Handler {id}"))
            .stack_size(config.context_handler_stack_size())
            .spawn(move || -> Result<()> { handler_loop(id, to_handler_rx) })?;

        log::debug!("Started handler thread for guest context {}", id);

        Ok(Self {
            id,
            to_handler_tx,
            join_handle: Mutex::new(Some(join_handle)),
        })
    }

    /// Send a call to the handler thread and wait for its result.
    ///
    /// Each call carries its own reply channel, so concurrent callers
    /// never see each other's results.
    pub(crate) fn execute_context_call(&self, call: ContextCall) -> Result<u64> {
        log::debug!(
            "Sending {:?} to the handler of guest context {}",
            call.syscall,
            self.id
        );

        let (from_handler_tx, from_handler_rx) = crossbeam_channel::bounded(1);
        self.to_handler_tx
            .send(ContextHandlerAction::Execute(call, from_handler_tx))
            .map_err(|_| LumenError::ContextHandlerCommunicationFailure(self.id))?;

        match from_handler_rx.recv() {
            Ok(HandlerMsg::FinishedContextCall(raw)) => Ok(raw),
            Err(_) => Err(LumenError::ContextHandlerCommunicationFailure(self.id)),
        }
    }

    /// Stop the handler thread and wait for it to finish. Calls already
    /// queued ahead of the termination request still run.
    #[instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace")]
    pub(crate) fn kill_context_handler_thread(&self) -> Result<()> {
        log::debug!("Killing handler thread for guest context {}", self.id);

        let handle = self.join_handle.lock()?.take();
        let Some(handle) = handle else {
            return Ok(());
        };

        // the thread may already have stopped, in which case there is
        // nothing to receive this and the join below still succeeds
        let _ = self
            .to_handler_tx
            .send(ContextHandlerAction::TerminateHandlerThread);

        match handle.join() {
            Ok(result) => result,
            Err(e) => {
                log_then_return!(new_error!(
                    "Handler thread for guest context {} panicked: {:?}",
                    self.id,
                    e
                ));
            }
        }
    }
}

impl Drop for ContextHandler {
    fn drop(&mut self) {
        if let Err(e) = self.kill_context_handler_thread() {
            log::error!(
                "Failed to stop handler thread for guest context {}: {:?}",
                self.id,
                e
            );
        }
    }
}

fn handler_loop(id: ContextId, to_handler_rx: ContextHandlerRx) -> Result<()> {
    for action in to_handler_rx {
        match action {
            ContextHandlerAction::Execute(call, from_handler_tx) => {
                let raw = run_call(&call);
                // the caller only goes away if its thread is unwinding
                if from_handler_tx
                    .send(HandlerMsg::FinishedContextCall(raw))
                    .is_err()
                {
                    log::warn!(
                        "Result of {:?} in guest context {} was not received",
                        call.syscall,
                        id
                    );
                }
            }
            ContextHandlerAction::TerminateHandlerThread => {
                log::debug!("Handler thread for guest context {} exiting", id);
                break;
            }
        }
    }
    Ok(())
}

/// Issue the call as a native syscall and return the result the way the
/// kernel would leave it in the result register: a value, or `-errno`.
fn run_call(call: &ContextCall) -> u64 {
    let [a0, a1, a2, a3, a4] = call.args;
    // SAFETY: the calls that can be expressed are mmap and munmap. They do
    // not touch memory the rest of the program holds references into
    // unless the caller passes such an address, which the mapping
    // backends never do.
    let ret = unsafe {
        libc::syscall(
            call.syscall.number(),
            a0 as libc::c_long,
            a1 as libc::c_long,
            a2 as libc::c_long,
            a3 as libc::c_long,
            a4 as libc::c_long,
            0 as libc::c_long,
        )
    };
    if ret == -1 {
        let errno = std::io::Error::last_os_error()
            .raw_os_error()
            .unwrap_or(libc::EINVAL);
        -(errno as i64) as u64
    } else {
        ret as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler() -> ContextHandler {
        ContextHandler::start(ContextId::new(1), &KernelConfiguration::default()).unwrap()
    }

    #[test]
    fn map_and_unmap() {
        let handler = handler();
        let raw = handler
            .execute_context_call(ContextCall::mmap(
                0,
                0x2000,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_ANONYMOUS | libc::MAP_PRIVATE,
            ))
            .unwrap();
        let addr = ContextCall::decode_result(raw).unwrap();
        assert_ne!(addr, 0);
        assert_eq!(addr % 0x1000, 0);

        let raw = handler
            .execute_context_call(ContextCall::munmap(addr, 0x2000))
            .unwrap();
        assert_eq!(ContextCall::decode_result(raw), Ok(0));
    }

    #[test]
    fn failures_come_back_as_errno() {
        let handler = handler();
        // a zero length mapping is rejected by the kernel
        let raw = handler
            .execute_context_call(ContextCall::mmap(
                0,
                0,
                libc::PROT_READ,
                libc::MAP_ANONYMOUS | libc::MAP_PRIVATE,
            ))
            .unwrap();
        assert_eq!(ContextCall::decode_result(raw), Err(libc::EINVAL));

        // unaligned unmap
        let raw = handler
            .execute_context_call(ContextCall::munmap(0x1001, 0x1000))
            .unwrap();
        assert_eq!(ContextCall::decode_result(raw), Err(libc::EINVAL));
    }

    #[test]
    fn calls_after_kill_fail() {
        let handler = handler();
        handler.kill_context_handler_thread().unwrap();
        // killing twice is a no-op
        handler.kill_context_handler_thread().unwrap();

        let err = handler
            .execute_context_call(ContextCall::munmap(0x1000, 0x1000))
            .unwrap_err();
        assert!(matches!(
            err,
            LumenError::ContextHandlerCommunicationFailure(id) if id == ContextId::new(1)
        ));
    }
}
