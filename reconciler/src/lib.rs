// SPDX-License-Identifier: Apache-2.0

//! The reconciler (spec.md §4.9, C9): wires the watch caches, the port
//! allocators, and a `LoadBalance` backend into the single-writer sync loop
//! that is the only place data-plane state is mutated.

mod allocator;
mod patch;
mod reconciler;
mod skip;

pub use allocator::{DEFAULT_PORT_MAX, DEFAULT_PORT_MIN, PendingUpdate, ProtocolAllocators};
pub use reconciler::Reconciler;
pub use skip::skip_service_update;
