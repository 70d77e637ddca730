//! Builders mapping a `SparkHistory` to its child resource definitions.
//!
//! Builders are pure: the same resource always yields the same child, with
//! fields the cluster fills in left unset. Each child is stamped with a
//! controller owner reference so cascading deletion works; a builder that
//! cannot produce its child returns a [`BuildSkip`] with the reason instead
//! of an object, and the caller skips that child rather than aborting.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::api::networking::v1 as networkingv1;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use kube::{Resource, ResourceExt};
use thiserror::Error;

use crate::sparkhistory_types::{SparkHistory, HISTORY_SERVER_PORT};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildSkip {
    #[error("cannot stamp owner reference: parent has no name or uid")]
    MissingOwnerRef,
    #[error("ingress is disabled in the spec")]
    IngressDisabled,
}

fn owned_metadata(sh: &SparkHistory, name: String) -> Result<metav1::ObjectMeta, BuildSkip> {
    let owner_ref = sh
        .controller_owner_ref(&())
        .ok_or(BuildSkip::MissingOwnerRef)?;
    Ok(metav1::ObjectMeta {
        name: Some(name),
        namespace: sh.namespace(),
        labels: Some(sh.selector_labels()),
        owner_references: Some(vec![owner_ref]),
        ..metav1::ObjectMeta::default()
    })
}

pub fn make_pvc(sh: &SparkHistory) -> Result<corev1::PersistentVolumeClaim, BuildSkip> {
    let persistence = &sh.spec.persistence;
    Ok(corev1::PersistentVolumeClaim {
        metadata: owned_metadata(sh, sh.pvc_name())?,
        spec: Some(corev1::PersistentVolumeClaimSpec {
            storage_class_name: persistence.storage_class.clone(),
            access_modes: persistence.access_modes.clone(),
            volume_mode: persistence.volume_mode.clone(),
            resources: Some(corev1::VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    persistence.size.clone(),
                )])),
                ..corev1::VolumeResourceRequirements::default()
            }),
            ..corev1::PersistentVolumeClaimSpec::default()
        }),
        ..corev1::PersistentVolumeClaim::default()
    })
}

pub fn make_deployment(sh: &SparkHistory) -> Result<appsv1::Deployment, BuildSkip> {
    let labels = sh.selector_labels();
    let data_volume = sh.name_with_suffix("-data");
    Ok(appsv1::Deployment {
        metadata: owned_metadata(sh, sh.name_any())?,
        spec: Some(appsv1::DeploymentSpec {
            replicas: Some(sh.spec.replicas),
            selector: metav1::LabelSelector {
                match_labels: Some(labels.clone()),
                ..metav1::LabelSelector::default()
            },
            template: corev1::PodTemplateSpec {
                metadata: Some(metav1::ObjectMeta {
                    labels: Some(labels),
                    ..metav1::ObjectMeta::default()
                }),
                spec: Some(corev1::PodSpec {
                    containers: vec![corev1::Container {
                        name: sh.name_any(),
                        image: Some(sh.image_tag()),
                        image_pull_policy: Some(sh.image_pull_policy()),
                        args: Some(vec![
                            "/opt/bitnami/spark/sbin/start-history-server.sh".to_string(),
                        ]),
                        resources: sh.spec.resources.clone(),
                        ports: Some(vec![corev1::ContainerPort {
                            container_port: HISTORY_SERVER_PORT,
                            name: Some("http".to_string()),
                            protocol: Some("TCP".to_string()),
                            ..corev1::ContainerPort::default()
                        }]),
                        volume_mounts: Some(vec![corev1::VolumeMount {
                            name: data_volume.clone(),
                            mount_path: "/tmp/spark-events".to_string(),
                            ..corev1::VolumeMount::default()
                        }]),
                        ..corev1::Container::default()
                    }],
                    tolerations: sh.spec.tolerations.clone(),
                    volumes: Some(vec![corev1::Volume {
                        name: data_volume,
                        persistent_volume_claim: Some(
                            corev1::PersistentVolumeClaimVolumeSource {
                                claim_name: sh.pvc_name(),
                                ..corev1::PersistentVolumeClaimVolumeSource::default()
                            },
                        ),
                        ..corev1::Volume::default()
                    }]),
                    ..corev1::PodSpec::default()
                }),
            },
            ..appsv1::DeploymentSpec::default()
        }),
        ..appsv1::Deployment::default()
    })
}

pub fn make_service(sh: &SparkHistory) -> Result<corev1::Service, BuildSkip> {
    let mut metadata = owned_metadata(sh, sh.name_any())?;
    metadata.annotations = sh.spec.service.annotations.clone();
    Ok(corev1::Service {
        metadata,
        spec: Some(corev1::ServiceSpec {
            // Port copied verbatim; admission rejects invalid values.
            ports: Some(vec![corev1::ServicePort {
                port: sh.spec.service.port,
                name: Some("http".to_string()),
                protocol: Some("TCP".to_string()),
                ..corev1::ServicePort::default()
            }]),
            selector: Some(sh.selector_labels()),
            type_: Some(sh.service_type()),
            ..corev1::ServiceSpec::default()
        }),
        ..corev1::Service::default()
    })
}

pub fn make_ingress(sh: &SparkHistory) -> Result<networkingv1::Ingress, BuildSkip> {
    if !sh.spec.ingress.enabled {
        return Err(BuildSkip::IngressDisabled);
    }
    Ok(networkingv1::Ingress {
        metadata: owned_metadata(sh, sh.name_any())?,
        spec: Some(networkingv1::IngressSpec {
            rules: Some(vec![networkingv1::IngressRule {
                host: Some(sh.spec.ingress.host.clone()),
                http: Some(networkingv1::HTTPIngressRuleValue {
                    paths: vec![networkingv1::HTTPIngressPath {
                        path: Some("/".to_string()),
                        path_type: "Prefix".to_string(),
                        backend: networkingv1::IngressBackend {
                            service: Some(networkingv1::IngressServiceBackend {
                                name: sh.name_any(),
                                port: Some(networkingv1::ServiceBackendPort {
                                    number: Some(sh.spec.service.port),
                                    ..networkingv1::ServiceBackendPort::default()
                                }),
                            }),
                            ..networkingv1::IngressBackend::default()
                        },
                    }],
                }),
            }]),
            ..networkingv1::IngressSpec::default()
        }),
        ..networkingv1::Ingress::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sparkhistory_types::{
        HistoryServiceSpec, ImageSpec, IngressConfig, PersistenceSpec, SparkHistorySpec,
    };
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

    fn history() -> SparkHistory {
        let mut sh = SparkHistory::new(
            "history",
            SparkHistorySpec {
                replicas: 2,
                image: ImageSpec {
                    repository: "bitnami/spark".to_string(),
                    tag: Some("3.4.1".to_string()),
                    pull_policy: None,
                },
                persistence: PersistenceSpec {
                    size: Quantity("20Gi".to_string()),
                    storage_class: Some("fast".to_string()),
                    access_modes: Some(vec!["ReadWriteOnce".to_string()]),
                    volume_mode: None,
                },
                service: HistoryServiceSpec {
                    port: 8080,
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
        sh.metadata.uid = Some("uid-1".to_string());
        sh
    }

    #[test]
    fn builders_are_deterministic() {
        let sh = history();
        assert_eq!(
            serde_json::to_value(make_deployment(&sh).unwrap()).unwrap(),
            serde_json::to_value(make_deployment(&sh).unwrap()).unwrap()
        );
        assert_eq!(
            serde_json::to_value(make_service(&sh).unwrap()).unwrap(),
            serde_json::to_value(make_service(&sh).unwrap()).unwrap()
        );
    }

    #[test]
    fn children_carry_controller_owner_ref() {
        let sh = history();
        let pvc = make_pvc(&sh).unwrap();
        let refs = pvc.metadata.owner_references.unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].kind, "SparkHistory");
        assert_eq!(refs[0].name, "history");
        assert_eq!(refs[0].controller, Some(true));
    }

    #[test]
    fn missing_uid_skips_instead_of_building() {
        let mut sh = history();
        sh.metadata.uid = None;
        assert_eq!(make_pvc(&sh).unwrap_err(), BuildSkip::MissingOwnerRef);
        assert_eq!(
            make_deployment(&sh).unwrap_err(),
            BuildSkip::MissingOwnerRef
        );
    }

    #[test]
    fn disabled_ingress_skips() {
        let mut sh = history();
        sh.spec.ingress.enabled = false;
        assert_eq!(make_ingress(&sh).unwrap_err(), BuildSkip::IngressDisabled);
    }

    #[test]
    fn pvc_passes_storage_settings_through() {
        let sh = history();
        let spec = make_pvc(&sh).unwrap().spec.unwrap();
        assert_eq!(spec.storage_class_name.as_deref(), Some("fast"));
        assert_eq!(
            spec.access_modes,
            Some(vec!["ReadWriteOnce".to_string()])
        );
        let requests = spec.resources.unwrap().requests.unwrap();
        assert_eq!(requests["storage"], Quantity("20Gi".to_string()));
    }

    #[test]
    fn deployment_mounts_the_claim() {
        let sh = history();
        let dep = make_deployment(&sh).unwrap();
        let pod_spec = dep.spec.unwrap().template.spec.unwrap();
        let volume = &pod_spec.volumes.as_ref().unwrap()[0];
        assert_eq!(volume.name, "history-data");
        assert_eq!(
            volume
                .persistent_volume_claim
                .as_ref()
                .unwrap()
                .claim_name,
            "history-pvc"
        );
        let mount = &pod_spec.containers[0].volume_mounts.as_ref().unwrap()[0];
        assert_eq!(mount.mount_path, "/tmp/spark-events");
    }

    #[test]
    fn ingress_routes_host_to_service_port() {
        let sh = history();
        let ing = make_ingress(&sh).unwrap();
        let rule = &ing.spec.unwrap().rules.unwrap()[0];
        assert_eq!(rule.host.as_deref(), Some("history.example.com"));
        let path = &rule.http.as_ref().unwrap().paths[0];
        assert_eq!(path.path_type, "Prefix");
        let backend = path.backend.service.as_ref().unwrap();
        assert_eq!(backend.name, "history");
        assert_eq!(backend.port.as_ref().unwrap().number, Some(8080));
    }
}
