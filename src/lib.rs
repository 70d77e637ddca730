//! Operator for the Spark history server.
//!
//! A `SparkHistory` custom resource declares the desired deployment; each
//! reconciliation pass derives the dependent claim, workload, service and
//! ingress, applies them idempotently, and tracks convergence through a
//! Healthy condition plus the list of live pods backing the server.

pub mod apply;
pub mod reconciler;
pub mod resources;
pub mod sparkhistory_types;
pub mod status;
pub mod store;

pub use reconciler::{error_policy, reconcile, Data, Error, Outcome, SparkHistoryReconciler};
pub use sparkhistory_types::{SparkHistory, SparkHistorySpec, SparkHistoryStatus};
pub use store::{KubeStore, StoreClient, StoreError};
