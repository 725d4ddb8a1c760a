// SPDX-License-Identifier: Apache-2.0

//! `skipServiceUpdate` (spec.md §4.9.3): suppress a resync trigger when the
//! only thing that changed is controller-owned bookkeeping.

use k8s_openapi::api::core::v1::Service;

use api::annotations::ANNOTATION_BINDED_PORT;

fn normalized(svc: &Service) -> Service {
    let mut svc = svc.clone();
    svc.metadata.resource_version = None;
    if let Some(annotations) = svc.metadata.annotations.as_mut() {
        annotations.remove(ANNOTATION_BINDED_PORT);
    }
    svc
}

/// `true` iff `old` and `new` differ only in `metadata.resourceVersion` and
/// the `bindedPort` annotation — both controller-owned, so their change
/// alone implies no new reconciliation work.
#[must_use]
pub fn skip_service_update(old: &Service, new: &Service) -> bool {
    normalized(old) == normalized(new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    fn svc(resource_version: &str, binded_port: &str) -> Service {
        let mut annotations = BTreeMap::new();
        annotations.insert(ANNOTATION_BINDED_PORT.to_string(), binded_port.to_string());
        Service {
            metadata: ObjectMeta {
                namespace: Some("default".to_string()),
                name: Some("web".to_string()),
                resource_version: Some(resource_version.to_string()),
                annotations: Some(annotations.into_iter().collect()),
                ..Default::default()
            },
            spec: None,
            status: None,
        }
    }

    #[test]
    fn suppresses_controller_owned_only_changes() {
        let old = svc("100", "80;");
        let new = svc("101", "80,443;");
        assert!(skip_service_update(&old, &new));
    }

    #[test]
    fn propagates_changes_to_other_fields() {
        let mut old = svc("100", "80;");
        let mut new = svc("101", "80;");
        old.spec = Some(k8s_openapi::api::core::v1::ServiceSpec::default());
        new.spec = Some(k8s_openapi::api::core::v1::ServiceSpec {
            type_: Some("LoadBalancer".to_string()),
            ..Default::default()
        });
        assert!(!skip_service_update(&old, &new));
    }
}
