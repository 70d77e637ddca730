//! Idempotent create-or-update primitives over any namespaced kind.

use kube::ResourceExt;
use serde_json::Value;
use tracing::{debug, info};

use crate::store::{ClusterObject, StoreClient, StoreError};

/// Reconcile `desired` against the store: create it when absent, otherwise
/// merge the desired fields into the live object and update.
///
/// The merge grafts the desired object's fields onto the fetched one instead
/// of replacing it wholesale, so fields owned by other controllers (status,
/// server-assigned metadata, defaulted spec fields the builder left unset)
/// survive. Applying the same desired object twice leaves the stored object
/// unchanged apart from its resourceVersion.
pub async fn create_or_update<K, S>(store: &S, desired: K) -> Result<(), StoreError>
where
    K: ClusterObject,
    S: StoreClient,
{
    let namespace = desired.namespace().unwrap_or_default();
    let name = desired.name_any();
    match store.get::<K>(&namespace, &name).await {
        Err(StoreError::NotFound) => {
            info!("creating {} {}/{}", K::kind(&()), namespace, name);
            store.create(&desired).await?;
            Ok(())
        }
        Err(err) => Err(err),
        Ok(existing) => {
            let merged = merge_into(&existing, &desired)?;
            store.update(&merged).await?;
            Ok(())
        }
    }
}

/// Claim policy: create when absent, otherwise leave the live object alone.
/// Never issues an update, even when the desired fields differ.
pub async fn create_if_absent<K, S>(store: &S, desired: K) -> Result<(), StoreError>
where
    K: ClusterObject,
    S: StoreClient,
{
    let namespace = desired.namespace().unwrap_or_default();
    let name = desired.name_any();
    match store.get::<K>(&namespace, &name).await {
        Ok(_) => {
            debug!("{} {}/{} exists, leaving untouched", K::kind(&()), namespace, name);
            Ok(())
        }
        Err(StoreError::NotFound) => {
            info!("creating {} {}/{}", K::kind(&()), namespace, name);
            store.create(&desired).await?;
            Ok(())
        }
        Err(err) => Err(err),
    }
}

/// Graft `desired` onto `existing` at the JSON level. Maps merge recursively
/// so fields the desired object leaves unset (resourceVersion, uid,
/// clusterIP, ...) are kept from the live object; scalars and arrays present
/// on `desired` win. The desired `status` is ignored outright, it belongs to
/// the cluster.
fn merge_into<K: ClusterObject>(existing: &K, desired: &K) -> Result<K, StoreError> {
    let mut base = serde_json::to_value(existing)?;
    let overlay = serde_json::to_value(desired)?;
    if let (Value::Object(base_map), Value::Object(overlay_map)) = (&mut base, overlay) {
        for (field, value) in overlay_map {
            if field == "status" {
                continue;
            }
            match base_map.get_mut(&field) {
                Some(slot) => merge_value(slot, value),
                None => {
                    base_map.insert(field, value);
                }
            }
        }
    }
    Ok(serde_json::from_value(base)?)
}

fn merge_value(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(slot) => merge_value(slot, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}
