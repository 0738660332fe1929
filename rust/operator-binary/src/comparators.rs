//! Comparison of deployed objects with the desired ones
//!
//! Only the fields which the operator sets are compared. Fields which are defaulted or filled in
//! by the API server would otherwise always report a difference.

use std::collections::BTreeMap;

use stackable_operator::k8s_openapi::{
    api::{
        apps::v1::DaemonSet,
        core::v1::{ConfigMap, Container, PodSpec, Service, Toleration, Volume},
        rbac::v1::{Role, RoleBinding},
    },
    apimachinery::pkg::apis::meta::v1::ObjectMeta,
};

use crate::crd::external::ServiceMonitor;

/// Objects which can be compared with the deployed version of themselves
pub trait Comparable {
    /// Returns true if `self` (deployed) has all the properties of `desired`
    fn is_same(&self, desired: &Self) -> bool;
}

impl Comparable for DaemonSet {
    fn is_same(&self, desired: &Self) -> bool {
        let current_pod = pod_spec(self);
        let desired_pod = pod_spec(desired);

        match (current_pod, desired_pod) {
            (Some(current), Some(desired)) => pod_specs_are_same(current, desired),
            (None, None) => true,
            _ => false,
        }
    }
}

impl Comparable for Role {
    fn is_same(&self, desired: &Self) -> bool {
        self.rules.as_deref().unwrap_or_default() == desired.rules.as_deref().unwrap_or_default()
    }
}

impl Comparable for RoleBinding {
    fn is_same(&self, desired: &Self) -> bool {
        self.role_ref == desired.role_ref
            && self.subjects.as_deref().unwrap_or_default()
                == desired.subjects.as_deref().unwrap_or_default()
    }
}

impl Comparable for Service {
    fn is_same(&self, desired: &Self) -> bool {
        let current = self.spec.clone().unwrap_or_default();
        let desired_spec = desired.spec.clone().unwrap_or_default();

        labels(&self.metadata) == labels(&desired.metadata)
            && current.selector == desired_spec.selector
            && current.ports == desired_spec.ports
    }
}

impl Comparable for ConfigMap {
    fn is_same(&self, desired: &Self) -> bool {
        // ConfigMaps without desired data are filled by other controllers, e.g. the trusted CA
        // bundle
        labels(&self.metadata) == labels(&desired.metadata)
            && desired
                .data
                .as_ref()
                .is_none_or(|data| self.data.as_ref() == Some(data))
    }
}

impl Comparable for ServiceMonitor {
    fn is_same(&self, desired: &Self) -> bool {
        labels(&self.metadata) == labels(&desired.metadata) && self.spec == desired.spec
    }
}

fn labels(metadata: &ObjectMeta) -> BTreeMap<String, String> {
    metadata.labels.clone().unwrap_or_default()
}

fn pod_spec(daemon_set: &DaemonSet) -> Option<&PodSpec> {
    daemon_set.spec.as_ref()?.template.spec.as_ref()
}

fn pod_specs_are_same(current: &PodSpec, desired: &PodSpec) -> bool {
    current.node_selector.clone().unwrap_or_default()
        == desired.node_selector.clone().unwrap_or_default()
        && tolerations_are_same(
            current.tolerations.as_deref().unwrap_or_default(),
            desired.tolerations.as_deref().unwrap_or_default(),
        )
        && volumes_are_same(
            current.volumes.as_deref().unwrap_or_default(),
            desired.volumes.as_deref().unwrap_or_default(),
        )
        && containers_are_same(&current.containers, &desired.containers)
        && init_containers_are_same(
            current.init_containers.as_deref().unwrap_or_default(),
            desired.init_containers.as_deref().unwrap_or_default(),
        )
}

/// The order of the tolerations is not significant
fn tolerations_are_same(current: &[Toleration], desired: &[Toleration]) -> bool {
    current.len() == desired.len()
        && desired
            .iter()
            .all(|toleration| current.contains(toleration))
        && current
            .iter()
            .all(|toleration| desired.contains(toleration))
}

fn volumes_are_same(current: &[Volume], desired: &[Volume]) -> bool {
    current.len() == desired.len()
        && desired.iter().all(|desired_volume| {
            current.iter().any(|current_volume| {
                current_volume.name == desired_volume.name
                    && volume_sources_are_same(current_volume, desired_volume)
            })
        })
}

/// Compares the source of the volumes but not the defaulted modes
fn volume_sources_are_same(current: &Volume, desired: &Volume) -> bool {
    match (
        (&current.config_map, &current.secret, &current.host_path),
        (&desired.config_map, &desired.secret, &desired.host_path),
    ) {
        ((Some(current), None, None), (Some(desired), None, None)) => {
            current.name == desired.name && current.items == desired.items
        }
        ((None, Some(current), None), (None, Some(desired), None)) => {
            current.secret_name == desired.secret_name && current.items == desired.items
        }
        ((None, None, Some(current)), (None, None, Some(desired))) => {
            current.path == desired.path
        }
        _ => {
            current.empty_dir.is_some() == desired.empty_dir.is_some()
                && current.projected.is_some() == desired.projected.is_some()
                && current.config_map.is_none() == desired.config_map.is_none()
                && current.secret.is_none() == desired.secret.is_none()
                && current.host_path.is_none() == desired.host_path.is_none()
        }
    }
}

fn containers_are_same(current: &[Container], desired: &[Container]) -> bool {
    current.len() == desired.len()
        && desired.iter().all(|desired_container| {
            current
                .iter()
                .find(|container| container.name == desired_container.name)
                .is_some_and(|current_container| {
                    container_is_same(current_container, desired_container)
                })
        })
}

fn container_is_same(current: &Container, desired: &Container) -> bool {
    current.image == desired.image
        && current.resources.clone().unwrap_or_default()
            == desired.resources.clone().unwrap_or_default()
        && current.env.as_deref().unwrap_or_default() == desired.env.as_deref().unwrap_or_default()
        && current.volume_mounts.as_deref().unwrap_or_default()
            == desired.volume_mounts.as_deref().unwrap_or_default()
}

fn init_containers_are_same(current: &[Container], desired: &[Container]) -> bool {
    current.len() == desired.len()
        && desired.iter().all(|desired_container| {
            current.iter().any(|container| {
                container.name == desired_container.name
                    && container.image == desired_container.image
            })
        })
}
