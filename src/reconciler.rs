//! Reconcile orchestrator: one pass drives a `SparkHistory` toward its
//! declared state, then records what is actually running.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1 as corev1;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::apply;
use crate::resources;
use crate::sparkhistory_types::SparkHistory;
use crate::status::{self, Gate};
use crate::store::{KubeStore, StoreClient, StoreError};

/// Upper bound on a single reconciliation pass. A pass that blocks on the
/// store longer than this is aborted and retried by the scheduler.
pub const PASS_DEADLINE: Duration = Duration::from_secs(120);

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to get SparkHistory: {0}")]
    GetFailed(#[source] StoreError),
    #[error("failed to reconcile PersistentVolumeClaim: {0}")]
    PvcFailed(#[source] StoreError),
    #[error("failed to reconcile Deployment: {0}")]
    DeploymentFailed(#[source] StoreError),
    #[error("failed to reconcile Service: {0}")]
    ServiceFailed(#[source] StoreError),
    #[error("failed to reconcile Ingress: {0}")]
    IngressFailed(#[source] StoreError),
    #[error("failed to list pods: {0}")]
    ListPodsFailed(#[source] StoreError),
    #[error("failed to update SparkHistory status: {0}")]
    StatusUpdateFailed(#[source] StoreError),
    #[error("missing object key: {0}")]
    MissingObjectKey(&'static str),
    #[error("reconciliation deadline exceeded")]
    DeadlineExceeded,
}

/// How a finished pass asks to be scheduled next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Steady state, wait for the next change event.
    Done,
    /// Status was settled mid-pass, re-run immediately.
    Requeue,
}

/// The engine. Holds nothing but the injected store, so passes for different
/// resource identities can run concurrently.
pub struct SparkHistoryReconciler<S> {
    store: S,
}

impl<S: StoreClient> SparkHistoryReconciler<S> {
    pub fn new(store: S) -> Self {
        SparkHistoryReconciler { store }
    }

    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<Outcome, Error> {
        let mut sh: SparkHistory = match self.store.get(namespace, name).await {
            Ok(sh) => sh,
            Err(StoreError::NotFound) => {
                // Deleted; children go away through their owner references.
                info!("SparkHistory {}/{} is gone, nothing to do", namespace, name);
                return Ok(Outcome::Done);
            }
            Err(err) => return Err(Error::GetFailed(err)),
        };

        if status::precheck(&self.store, &mut sh)
            .await
            .map_err(Error::StatusUpdateFailed)?
            == Gate::Requeue
        {
            return Ok(Outcome::Requeue);
        }

        self.reconcile_pvc(&sh).await?;
        self.reconcile_deployment(&sh).await?;
        self.reconcile_service(&sh).await?;
        self.reconcile_ingress(&sh).await?;

        let pods: Vec<corev1::Pod> = self
            .store
            .list_labeled(namespace, &sh.selector_labels())
            .await
            .map_err(Error::ListPodsFailed)?;
        let members: BTreeSet<String> = pods.iter().map(|p| p.name_any()).collect();

        status::record_observed(&self.store, &mut sh, members)
            .await
            .map_err(Error::StatusUpdateFailed)?;

        Ok(Outcome::Done)
    }

    async fn reconcile_pvc(&self, sh: &SparkHistory) -> Result<(), Error> {
        let pvc = match resources::make_pvc(sh) {
            Ok(pvc) => pvc,
            Err(skip) => {
                warn!("skipping PersistentVolumeClaim: {}", skip);
                return Ok(());
            }
        };
        apply::create_if_absent(&self.store, pvc)
            .await
            .map_err(Error::PvcFailed)
    }

    async fn reconcile_deployment(&self, sh: &SparkHistory) -> Result<(), Error> {
        let deployment = match resources::make_deployment(sh) {
            Ok(deployment) => deployment,
            Err(skip) => {
                warn!("skipping Deployment: {}", skip);
                return Ok(());
            }
        };
        apply::create_or_update(&self.store, deployment)
            .await
            .map_err(Error::DeploymentFailed)
    }

    async fn reconcile_service(&self, sh: &SparkHistory) -> Result<(), Error> {
        let service = match resources::make_service(sh) {
            Ok(service) => service,
            Err(skip) => {
                warn!("skipping Service: {}", skip);
                return Ok(());
            }
        };
        apply::create_or_update(&self.store, service)
            .await
            .map_err(Error::ServiceFailed)
    }

    async fn reconcile_ingress(&self, sh: &SparkHistory) -> Result<(), Error> {
        let ingress = match resources::make_ingress(sh) {
            Ok(ingress) => ingress,
            Err(skip) => {
                warn!("skipping Ingress: {}", skip);
                return Ok(());
            }
        };
        apply::create_or_update(&self.store, ingress)
            .await
            .map_err(Error::IngressFailed)
    }
}

/// Context handed to every reconcile/error-policy call by the controller.
pub struct Data {
    pub store: KubeStore,
}

/// kube-runtime entry point. Controller triggers this whenever the
/// SparkHistory or one of its children changed.
pub async fn reconcile(sh: Arc<SparkHistory>, ctx: Arc<Data>) -> Result<Action, Error> {
    let name = sh
        .metadata
        .name
        .as_deref()
        .ok_or(Error::MissingObjectKey(".metadata.name"))?;
    let namespace = sh
        .metadata
        .namespace
        .as_deref()
        .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;

    let engine = SparkHistoryReconciler::new(ctx.store.clone());
    let outcome = timeout(PASS_DEADLINE, engine.reconcile(namespace, name))
        .await
        .map_err(|_| Error::DeadlineExceeded)??;

    Ok(match outcome {
        Outcome::Requeue => Action::requeue(Duration::ZERO),
        Outcome::Done => Action::await_change(),
    })
}

/// The controller triggers this on reconcile errors; retry timing beyond the
/// fixed delay is the scheduler's business.
pub fn error_policy(_obj: Arc<SparkHistory>, error: &Error, _ctx: Arc<Data>) -> Action {
    warn!("reconcile failed: {}", error);
    Action::requeue(Duration::from_secs(60))
}
