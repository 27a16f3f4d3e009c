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

use crate::context::{Owner, TransferDirection};

// Counter metric that counts the mappings created for transfer memory objects
pub(crate) static METRIC_TRANSFER_MEMORY_MAPPINGS: &str = "transfer_memory_mappings_total";
pub(crate) static METRIC_TRANSFER_MEMORY_MAPPINGS_LABEL_CONTEXT: &str = "context";

// Counter metric that counts completed transfers between contexts
pub(crate) static METRIC_TRANSFER_MEMORY_TRANSFERS: &str = "transfer_memory_transfers_total";
pub(crate) static METRIC_TRANSFER_MEMORY_TRANSFERS_LABEL_DIRECTION: &str = "direction";

// Counter metric that counts the bytes copied across contexts by transfers
pub(crate) static METRIC_TRANSFER_MEMORY_BYTES_COPIED: &str = "transfer_memory_bytes_copied_total";

// Counter metric that counts mappings that could not be removed on destroy
pub(crate) static METRIC_TRANSFER_MEMORY_TEARDOWN_FAILURES: &str =
    "transfer_memory_teardown_failures_total";

fn context_label(owner: Owner) -> &'static str {
    match owner {
        Owner::Host => "host",
        Owner::Guest(_) => "guest",
    }
}

pub(crate) fn emit_mapping(owner: Owner) {
    metrics::counter!(
        METRIC_TRANSFER_MEMORY_MAPPINGS,
        METRIC_TRANSFER_MEMORY_MAPPINGS_LABEL_CONTEXT => context_label(owner)
    )
    .increment(1);
}

pub(crate) fn emit_transfer(direction: TransferDirection, bytes_copied: usize) {
    metrics::counter!(
        METRIC_TRANSFER_MEMORY_TRANSFERS,
        METRIC_TRANSFER_MEMORY_TRANSFERS_LABEL_DIRECTION => direction.label()
    )
    .increment(1);
    metrics::counter!(METRIC_TRANSFER_MEMORY_BYTES_COPIED).increment(bytes_copied as u64);
}

pub(crate) fn emit_teardown_failure() {
    metrics::counter!(METRIC_TRANSFER_MEMORY_TEARDOWN_FAILURES).increment(1);
}
