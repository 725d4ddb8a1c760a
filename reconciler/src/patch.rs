// SPDX-License-Identifier: Apache-2.0

//! `updateSvcs` (spec.md §4.9.2): concurrent, best-effort status/annotation
//! patches against the cluster API, one task per dirty service.

use std::time::{Duration, Instant};

use k8s_openapi::api::core::v1::Service;
use kube::Client;
use kube::api::{Api, Patch, PatchParams};
use tracing::{error, warn};

use crate::allocator::PendingUpdate;

const RETRY_DEADLINE: Duration = Duration::from_secs(120);
const RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Field manager name stamped on every patch this controller issues.
const FIELD_MANAGER: &str = "bmlb";

/// Fire one patch task per `updates` entry and join all of them. Each task
/// retries until it succeeds or `RETRY_DEADLINE` elapses (spec.md §4.9.2,
/// §5).
pub async fn update_svcs(client: &Client, updates: Vec<PendingUpdate>) {
    let tasks: Vec<_> = updates
        .into_iter()
        .map(|update| {
            let client = client.clone();
            tokio::spawn(async move { apply_with_retry(&client, update).await })
        })
        .collect();
    for task in tasks {
        if let Err(e) = task.await {
            error!(error = %e, "status-patch task panicked");
        }
    }
}

async fn apply_with_retry(client: &Client, update: PendingUpdate) {
    let api: Api<Service> = Api::namespaced(client.clone(), &update.key.namespace);
    let params = PatchParams::apply(FIELD_MANAGER);
    let deadline = Instant::now() + RETRY_DEADLINE;
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        match api
            .patch(&update.key.name, &params, &Patch::Merge(&update.patch))
            .await
        {
            Ok(_) => return,
            Err(e) => {
                if Instant::now() >= deadline {
                    error!(service = %update.key, attempts = attempt, error = %e, "status patch deadline exceeded");
                    return;
                }
                warn!(service = %update.key, attempt, error = %e, "status patch failed, retrying");
                tokio::time::sleep(RETRY_INTERVAL).await;
            }
        }
    }
}
