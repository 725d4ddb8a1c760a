// SPDX-License-Identifier: Apache-2.0

use k8s_openapi::api::core::v1::{Endpoints, Service};

/// Typed Add/Update/Delete callbacks for `LoadBalancer` services (spec.md
/// §4.10, C10). Ground: `original_source/watch/type.go`'s `ServiceHandler`.
pub trait ServiceHandler: Send + Sync {
    fn add_service(&self, svc: &Service);
    fn delete_service(&self, svc: &Service);
    fn update_service(&self, old: &Service, new: &Service);
}

/// Typed Add/Update/Delete callbacks for `Endpoints`. Ground:
/// `original_source/watch/type.go`'s `EndpointsHandler`.
pub trait EndpointsHandler: Send + Sync {
    fn add_endpoints(&self, ep: &Endpoints);
    fn delete_endpoints(&self, ep: &Endpoints);
    fn update_endpoints(&self, old: &Endpoints, new: &Endpoints);
}
