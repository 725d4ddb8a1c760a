// SPDX-License-Identifier: Apache-2.0

//! Shared plumbing behind [`crate::ServiceWatcher`] and
//! [`crate::EndpointsWatcher`]: a `watcher::watcher` stream folded into an
//! owned snapshot plus Add/Update/Delete dispatch.
//!
//! This keeps its own `(namespace, name) -> Arc<T>` map rather than
//! `kube::runtime::reflector::Store`, because a `reflector()`-wrapped stream
//! already applies each event to the store before yielding it, which would
//! make diffing "was this object already present" against the post-update
//! store indistinguishable between Add and Update. Folding the watch stream
//! by hand keeps that diff meaningful.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures::{StreamExt, pin_mut};
use kube::{Api, Resource, ResourceExt};
use kube::runtime::watcher;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("watch stream ended with an error: {0}")]
    Stream(#[from] watcher::Error),
}

pub(crate) struct TypedStore<T> {
    objects: Mutex<HashMap<(Option<String>, String), Arc<T>>>,
    synced: AtomicBool,
}

impl<T> TypedStore<T> {
    pub(crate) fn new() -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            synced: AtomicBool::new(false),
        }
    }

    pub(crate) fn list(&self) -> Vec<Arc<T>> {
        self.objects.lock().unwrap().values().cloned().collect()
    }

    pub(crate) fn has_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }
}

fn key_of<T: ResourceExt>(obj: &T) -> (Option<String>, String) {
    (obj.namespace(), obj.name_any())
}

/// Drive `api`'s watch stream until it ends or errors, maintaining `store`
/// and invoking `on_add`/`on_update`/`on_delete` for every change (spec.md
/// §4.10).
pub(crate) async fn drive<T, A, U, D>(
    api: Api<T>,
    config: watcher::Config,
    store: Arc<TypedStore<T>>,
    on_add: A,
    on_update: U,
    on_delete: D,
) -> Result<(), WatchError>
where
    T: Resource<DynamicType = ()> + Clone + Debug + DeserializeOwned + Send + Sync + 'static,
    A: Fn(&T),
    U: Fn(&T, &T),
    D: Fn(&T),
{
    let stream = watcher::watcher(api, config);
    pin_mut!(stream);
    while let Some(event) = stream.next().await {
        match event? {
            watcher::Event::Init => {
                store.objects.lock().unwrap().clear();
            }
            watcher::Event::InitApply(obj) => {
                let key = key_of(&obj);
                store.objects.lock().unwrap().insert(key, Arc::new(obj));
            }
            watcher::Event::InitDone => {
                store.synced.store(true, Ordering::Release);
            }
            watcher::Event::Apply(obj) => {
                let key = key_of(&obj);
                let previous = store
                    .objects
                    .lock()
                    .unwrap()
                    .insert(key, Arc::new(obj.clone()));
                match previous {
                    Some(old) => on_update(&old, &obj),
                    None => on_add(&obj),
                }
            }
            watcher::Event::Delete(obj) => {
                let key = key_of(&obj);
                if store.objects.lock().unwrap().remove(&key).is_none() {
                    warn!(name = obj.name_any(), "delete event for an object we never observed");
                }
                on_delete(&obj);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::Service;

    #[test]
    fn new_store_is_empty_and_unsynced() {
        let store: TypedStore<Service> = TypedStore::new();
        assert!(store.list().is_empty());
        assert!(!store.has_synced());
    }

    #[test]
    fn synced_flag_is_observable_once_set() {
        let store: TypedStore<Service> = TypedStore::new();
        store.synced.store(true, Ordering::Release);
        assert!(store.has_synced());
    }

    #[test]
    fn list_reflects_inserted_objects() {
        let store: TypedStore<Service> = TypedStore::new();
        store.objects.lock().unwrap().insert(
            (Some("default".to_string()), "web".to_string()),
            Arc::new(Service::default()),
        );
        assert_eq!(store.list().len(), 1);
    }
}
