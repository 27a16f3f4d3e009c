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

use std::cell::RefCell;
use std::sync::Once;

use log::{Level, LevelFilter, Log, Metadata, Record, set_logger, set_max_level};

pub(crate) static LOGGER: Logger = Logger {};
static INITLOGGER: Once = Once::new();

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct LogCall {
    pub(crate) level: Level,
    pub(crate) args: String,
    pub(crate) target: String,
}

thread_local!(
    static LOGCALLS: RefCell<Vec<LogCall>> = const { RefCell::new(Vec::new()) };
    static LOGGER_MAX_LEVEL: RefCell<LevelFilter> = const { RefCell::new(LevelFilter::Off) };
);

pub(crate) struct Logger {}

impl Logger {
    /// Install the logger for the whole test process. Calls are only
    /// captured on threads that have raised their own max level.
    pub(crate) fn initialize_test_logger() {
        INITLOGGER.call_once(|| {
            // another logger may already be installed by a different harness
            let _ = set_logger(&LOGGER);
            set_max_level(LevelFilter::Trace);
        });
    }

    pub(crate) fn set_max_level(&self, level: LevelFilter) {
        LOGGER_MAX_LEVEL.with(|max_level| *max_level.borrow_mut() = level);
    }

    pub(crate) fn clear_log_calls(&self) {
        LOGCALLS.with(|log_calls| log_calls.borrow_mut().clear());
    }

    /// Run `f` over the calls captured on this thread, then clear them
    pub(crate) fn test_log_records<F: Fn(&Vec<LogCall>)>(&self, f: F) {
        LOGCALLS.with(|log_calls| f(&log_calls.borrow()));
        self.clear_log_calls();
    }
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        LOGGER_MAX_LEVEL.with(|max_level| metadata.level() <= *max_level.borrow())
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        LOGCALLS.with(|log_calls| {
            log_calls.borrow_mut().push(LogCall {
                level: record.level(),
                args: format!("{}", record.args()),
                target: record.target().to_string(),
            })
        });
    }

    fn flush(&self) {}
}
