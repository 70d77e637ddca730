//! Convergence condition state machine.
//!
//! The stored condition walks `Unseen -> Converging(False) -> Converged(True)`,
//! and drops back to Converging at the start of any pass that begins from
//! Converged. That reset is deliberate: a pass that previously claimed health
//! must re-verify from scratch before claiming it again, so [`precheck`]
//! persists False and asks for an immediate requeue before any child is
//! touched.

use std::collections::BTreeSet;

use tracing::info;

use crate::sparkhistory_types::{
    ConditionStatus, SparkHistory, SparkHistoryCondition, SparkHistoryStatus, CONDITION_HEALTHY,
};
use crate::store::{ClusterObject, StoreClient, StoreError};

/// What the pre-check decided for the rest of the pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// Condition is already False: carry on converging children.
    Proceed,
    /// Status was (re)initialized and persisted: stop and requeue immediately.
    Requeue,
}

/// Status surface the machine drives. Only the first condition record is
/// ever read or written; `healthy() == None` means the resource has never
/// been seen.
pub trait ConvergenceStatus {
    fn healthy(&self) -> Option<bool>;
    fn set_healthy(&mut self, healthy: bool);
    fn members(&self) -> BTreeSet<String>;
    fn set_members(&mut self, members: BTreeSet<String>);
}

impl ConvergenceStatus for SparkHistory {
    fn healthy(&self) -> Option<bool> {
        let condition = self.status.as_ref()?.conditions.first()?;
        Some(condition.status == ConditionStatus::True)
    }

    fn set_healthy(&mut self, healthy: bool) {
        let status = self.status.get_or_insert_with(SparkHistoryStatus::default);
        let value = if healthy {
            ConditionStatus::True
        } else {
            ConditionStatus::False
        };
        match status.conditions.first_mut() {
            Some(condition) => condition.status = value,
            None => status.conditions.push(SparkHistoryCondition {
                type_: CONDITION_HEALTHY.to_string(),
                status: value,
            }),
        }
    }

    fn members(&self) -> BTreeSet<String> {
        self.status
            .as_ref()
            .map(|s| s.nodes.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn set_members(&mut self, members: BTreeSet<String>) {
        let status = self.status.get_or_insert_with(SparkHistoryStatus::default);
        status.nodes = members.into_iter().collect();
    }
}

/// Run the start-of-pass transitions.
///
/// First sight seeds an empty member list and a False condition; a True
/// condition is flipped back to False. Both persist and gate the pass with
/// an immediate requeue; convergence work happens on the next pass.
pub async fn precheck<S, R>(store: &S, obj: &mut R) -> Result<Gate, StoreError>
where
    S: StoreClient,
    R: ClusterObject + ConvergenceStatus,
{
    match obj.healthy() {
        None => {
            obj.set_members(BTreeSet::new());
            obj.set_healthy(false);
            store.update_status(obj).await?;
            info!("first sight, initialized status and requeueing");
            Ok(Gate::Requeue)
        }
        Some(true) => {
            obj.set_healthy(false);
            store.update_status(obj).await?;
            info!("re-verifying previously healthy resource, requeueing");
            Ok(Gate::Requeue)
        }
        Some(false) => Ok(Gate::Proceed),
    }
}

/// Run the end-of-pass transition with the freshly observed member set.
///
/// Membership comparison is an unordered set equality; when nothing changed
/// no write is issued at all.
pub async fn record_observed<S, R>(
    store: &S,
    obj: &mut R,
    live: BTreeSet<String>,
) -> Result<(), StoreError>
where
    S: StoreClient,
    R: ClusterObject + ConvergenceStatus,
{
    if live == obj.members() {
        return Ok(());
    }
    info!("observed members changed: {:?}", live);
    obj.set_members(live);
    obj.set_healthy(true);
    store.update_status(obj).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sparkhistory_types::{
        HistoryServiceSpec, ImageSpec, IngressConfig, PersistenceSpec, SparkHistorySpec,
    };
    use crate::store::mem::{MemStore, Verb};
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

    fn history() -> SparkHistory {
        let mut sh = SparkHistory::new(
            "history",
            SparkHistorySpec {
                replicas: 1,
                image: ImageSpec {
                    repository: "bitnami/spark".to_string(),
                    tag: None,
                    pull_policy: None,
                },
                persistence: PersistenceSpec {
                    size: Quantity("10Gi".to_string()),
                    storage_class: None,
                    access_modes: None,
                    volume_mode: None,
                },
                service: HistoryServiceSpec {
                    port: 18080,
                    type_: None,
                    annotations: None,
                },
                ingress: IngressConfig {
                    enabled: true,
                    host: "history.example.com".to_string(),
                },
                resources: None,
                tolerations: None,
            },
        );
        sh.metadata.namespace = Some("default".to_string());
        sh
    }

    fn members(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn first_sight_initializes_and_requeues() {
        let store = MemStore::new();
        let mut sh = history();
        store.seed(&sh);

        let gate = precheck(&store, &mut sh).await.unwrap();
        assert_eq!(gate, Gate::Requeue);

        let stored: SparkHistory = store.stored("default", "history").unwrap();
        let status = stored.status.unwrap();
        assert!(status.nodes.is_empty());
        assert_eq!(status.conditions.len(), 1);
        assert_eq!(status.conditions[0].type_, CONDITION_HEALTHY);
        assert_eq!(status.conditions[0].status, ConditionStatus::False);
    }

    #[tokio::test]
    async fn healthy_resource_is_reset_before_reverification() {
        let store = MemStore::new();
        let mut sh = history();
        sh.status = Some(SparkHistoryStatus {
            conditions: vec![SparkHistoryCondition {
                type_: CONDITION_HEALTHY.to_string(),
                status: ConditionStatus::True,
            }],
            nodes: vec!["pod-a".to_string()],
        });
        store.seed(&sh);

        let gate = precheck(&store, &mut sh).await.unwrap();
        assert_eq!(gate, Gate::Requeue);

        let stored: SparkHistory = store.stored("default", "history").unwrap();
        let status = stored.status.unwrap();
        assert_eq!(status.conditions[0].status, ConditionStatus::False);
        // Member list survives the reset untouched.
        assert_eq!(status.nodes, vec!["pod-a".to_string()]);
    }

    #[tokio::test]
    async fn converging_resource_proceeds_without_writing() {
        let store = MemStore::new();
        let mut sh = history();
        sh.set_healthy(false);
        store.seed(&sh);

        let gate = precheck(&store, &mut sh).await.unwrap();
        assert_eq!(gate, Gate::Proceed);
        assert!(store.log().is_empty());
    }

    #[tokio::test]
    async fn drift_flips_condition_to_true() {
        let store = MemStore::new();
        let mut sh = history();
        sh.set_healthy(false);
        store.seed(&sh);

        record_observed(&store, &mut sh, members(&["pod-a", "pod-b"]))
            .await
            .unwrap();

        let stored: SparkHistory = store.stored("default", "history").unwrap();
        let status = stored.status.unwrap();
        assert_eq!(status.conditions[0].status, ConditionStatus::True);
        assert_eq!(status.nodes, vec!["pod-a".to_string(), "pod-b".to_string()]);
    }

    #[tokio::test]
    async fn unchanged_members_write_nothing() {
        let store = MemStore::new();
        let mut sh = history();
        sh.set_healthy(false);
        sh.set_members(members(&["pod-b", "pod-a"]));
        store.seed(&sh);

        // Same set, different observation order.
        record_observed(&store, &mut sh, members(&["pod-a", "pod-b"]))
            .await
            .unwrap();
        assert!(store.log().is_empty());
        // Condition stays False until membership actually drifts.
        let stored: SparkHistory = store.stored("default", "history").unwrap();
        assert_eq!(
            stored.status.unwrap().conditions[0].status,
            ConditionStatus::False
        );
    }

    #[tokio::test]
    async fn status_write_failure_is_fatal() {
        let store = MemStore::new();
        let mut sh = history();
        store.seed(&sh);
        store.fail_on(Verb::UpdateStatus, "SparkHistory");

        assert!(precheck(&store, &mut sh).await.is_err());
    }
}
