// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::annotations::{ANNOTATION_BINDED_PORT, ANNOTATION_WEIGHT, BoundPorts, WeightMap};

/// `(namespace, name)`, the identity shared by a `Service` and its matching
/// `Endpoints` object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceKey {
    pub namespace: String,
    pub name: String,
}

impl ServiceKey {
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Build the key from a `Service`, returning `None` if it lacks the
    /// `metadata.namespace`/`metadata.name` the cluster API guarantees for
    /// any object that has been admitted.
    #[must_use]
    pub fn from_service(svc: &Service) -> Option<Self> {
        Self::from_metadata(&svc.metadata)
    }

    /// Build the key from any object's `ObjectMeta` — used for `Endpoints`,
    /// which share identity with their owning `Service` by convention
    /// (same namespace, same name).
    #[must_use]
    pub fn from_metadata(meta: &ObjectMeta) -> Option<Self> {
        Some(Self::new(meta.namespace.clone()?, meta.name.clone()?))
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// `true` iff `svc.spec.type == "LoadBalancer"`. Only such services are
/// processed by this controller (spec.md §3).
#[must_use]
pub fn is_load_balancer(svc: &Service) -> bool {
    svc.spec
        .as_ref()
        .and_then(|spec| spec.type_.as_deref())
        .is_some_and(|t| t == "LoadBalancer")
}

#[must_use]
pub fn binded_port_annotation(svc: &Service) -> Option<BoundPorts> {
    svc.metadata
        .annotations
        .as_ref()?
        .get(ANNOTATION_BINDED_PORT)
        .map(|v| BoundPorts::decode(v))
}

#[must_use]
pub fn weight_annotation(svc: &Service) -> WeightMap {
    svc.metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(ANNOTATION_WEIGHT))
        .map_or_else(WeightMap::default, |v| WeightMap::decode(v))
}

/// `true` iff the service already has at least one `status.loadBalancer`
/// ingress entry. The controller sets this exactly once per service lifetime
/// (spec.md §6).
#[must_use]
pub fn has_ingress(svc: &Service) -> bool {
    svc.status
        .as_ref()
        .and_then(|s| s.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .is_some_and(|ingress| !ingress.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ServiceSpec;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    fn svc(type_: Option<&str>) -> Service {
        Service {
            metadata: ObjectMeta {
                namespace: Some("default".to_string()),
                name: Some("web".to_string()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                type_: type_.map(str::to_string),
                ..Default::default()
            }),
            status: None,
        }
    }

    #[test]
    fn identifies_load_balancer_services() {
        assert!(is_load_balancer(&svc(Some("LoadBalancer"))));
        assert!(!is_load_balancer(&svc(Some("ClusterIP"))));
        assert!(!is_load_balancer(&svc(None)));
    }

    #[test]
    fn key_extraction() {
        let key = ServiceKey::from_service(&svc(Some("LoadBalancer"))).unwrap();
        assert_eq!(key.to_string(), "default/web");
    }

    #[test]
    fn binded_port_annotation_roundtrip() {
        let mut s = svc(Some("LoadBalancer"));
        let mut annotations = BTreeMap::new();
        annotations.insert(
            "v1.status.bmlb.l4/bindedPort".to_string(),
            "80,443;53".to_string(),
        );
        s.metadata.annotations = Some(annotations.into_iter().collect());
        let bound = binded_port_annotation(&s).unwrap();
        assert_eq!(bound.encode(), "80,443;53");
    }
}
