// SPDX-License-Identifier: Apache-2.0

//! Data model shared by the controller's crates: the `(namespace, name)` key
//! used to correlate a `Service` with its `Endpoints`, the TCP/UDP split used
//! throughout the allocator and the LVS adaptor, and the codec for the two
//! annotations this controller owns on `LoadBalancer` services.

pub mod annotations;
pub mod protocol;
pub mod service;

pub use annotations::{BoundPorts, WeightMap};
pub use protocol::L4Protocol;
pub use service::{ServiceKey, binded_port_annotation, has_ingress, is_load_balancer, weight_annotation};
