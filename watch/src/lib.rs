// SPDX-License-Identifier: Apache-2.0

//! Watch adapters over the cluster API (spec.md §4.10, C10): typed
//! Add/Update/Delete dispatch, a `List()` snapshot, and a `HasSynced()`
//! predicate, for both `Service` and `Endpoints`.

mod endpoints;
mod handler;
mod reflect;
mod service;

pub use endpoints::EndpointsWatcher;
pub use handler::{EndpointsHandler, ServiceHandler};
pub use reflect::WatchError;
pub use service::ServiceWatcher;
