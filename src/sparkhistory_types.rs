use std::collections::BTreeMap;

use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const CONDITION_HEALTHY: &str = "Healthy";

/// Port the history server container listens on.
pub const HISTORY_SERVER_PORT: i32 = 18080;

#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[kube(group = "stack.zncdata.net", version = "v1alpha1", kind = "SparkHistory")]
#[kube(shortname = "sh", namespaced)]
#[kube(status = "SparkHistoryStatus")]
pub struct SparkHistorySpec {
    pub replicas: i32,
    pub image: ImageSpec,
    pub persistence: PersistenceSpec,
    pub service: HistoryServiceSpec,
    pub ingress: IngressConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<corev1::ResourceRequirements>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tolerations: Option<Vec<corev1::Toleration>>,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct ImageSpec {
    pub repository: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(rename = "pullPolicy", skip_serializing_if = "Option::is_none")]
    pub pull_policy: Option<String>,
}

/// Storage settings are passed through to the claim verbatim; defaulting and
/// validation belong to the admission layer, not this operator.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct PersistenceSpec {
    pub size: Quantity,
    #[serde(rename = "storageClass", skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
    #[serde(rename = "accessModes", skip_serializing_if = "Option::is_none")]
    pub access_modes: Option<Vec<String>>,
    #[serde(rename = "volumeMode", skip_serializing_if = "Option::is_none")]
    pub volume_mode: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct HistoryServiceSpec {
    pub port: i32,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct IngressConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub host: String,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
pub struct SparkHistoryStatus {
    #[serde(default)]
    pub conditions: Vec<SparkHistoryCondition>,
    #[serde(default)]
    pub nodes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct SparkHistoryCondition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl SparkHistory {
    /// Labels stamped on every child and used as the pod selector. Falls back
    /// to `app: <name>` so the selector can never be empty.
    pub fn selector_labels(&self) -> BTreeMap<String, String> {
        let labels = self.labels();
        if labels.is_empty() {
            BTreeMap::from([("app".to_string(), self.name_any())])
        } else {
            labels.clone()
        }
    }

    pub fn name_with_suffix(&self, suffix: &str) -> String {
        format!("{}{}", self.name_any(), suffix)
    }

    pub fn pvc_name(&self) -> String {
        self.name_with_suffix("-pvc")
    }

    pub fn image_tag(&self) -> String {
        format!(
            "{}:{}",
            self.spec.image.repository,
            self.spec.image.tag.as_deref().unwrap_or("latest")
        )
    }

    pub fn image_pull_policy(&self) -> String {
        self.spec
            .image
            .pull_policy
            .clone()
            .unwrap_or_else(|| "IfNotPresent".to_string())
    }

    pub fn service_type(&self) -> String {
        self.spec
            .service
            .type_
            .clone()
            .unwrap_or_else(|| "ClusterIP".to_string())
    }
}
