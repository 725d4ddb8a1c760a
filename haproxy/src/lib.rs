// SPDX-License-Identifier: Apache-2.0

//! The HAProxy data-plane backend: a pure config renderer (spec.md §4.6)
//! plus a process supervisor that owns the atomic config swap and graceful
//! restart (spec.md §4.7).

mod config;
mod desired;
mod supervisor;

pub use config::render;
pub use desired::BackendServer;
pub use supervisor::{HaproxyError, HaproxySupervisor};
