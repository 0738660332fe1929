//! Version and ID of the cluster whose logs are collected
//!
//! In a hosted control plane, the collector runs in the namespace of the hosted cluster and
//! reports the hosted cluster instead of the management cluster.

use snafu::{ResultExt, Snafu};
use stackable_operator::{client::Client, kube::api::ListParams};
use strum::{EnumDiscriminants, IntoStaticStr};
use tracing::debug;

use crate::crd::external::{CLUSTER_VERSION_NAME, ClusterVersion, HostedControlPlane};

#[derive(Snafu, Debug, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("failed to get the ClusterVersion {CLUSTER_VERSION_NAME:?}"))]
    GetClusterVersion {
        source: stackable_operator::client::Error,
    },
}

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ClusterInfo {
    pub version: String,
    pub id: String,
}

impl From<&HostedControlPlane> for ClusterInfo {
    fn from(control_plane: &HostedControlPlane) -> Self {
        ClusterInfo {
            version: control_plane
                .status
                .as_ref()
                .and_then(|status| status.version_status.as_ref())
                .and_then(|version_status| version_status.desired.as_ref())
                .and_then(|desired| desired.version.clone())
                .unwrap_or_default(),
            id: control_plane.spec.cluster_id.clone().unwrap_or_default(),
        }
    }
}

impl From<&ClusterVersion> for ClusterInfo {
    fn from(cluster_version: &ClusterVersion) -> Self {
        ClusterInfo {
            version: cluster_version
                .spec
                .desired_update
                .as_ref()
                .and_then(|release| release.version.clone())
                .unwrap_or_default(),
            id: cluster_version.spec.cluster_id.clone().unwrap_or_default(),
        }
    }
}

/// Selects the cluster info of the only hosted control plane, if there is exactly one
pub fn from_hosted_control_planes(control_planes: &[HostedControlPlane]) -> Option<ClusterInfo> {
    match control_planes {
        [control_plane] => Some(ClusterInfo::from(control_plane)),
        _ => None,
    }
}

/// Returns the info of the hosted cluster in the given namespace or else of this cluster
///
/// A failure to list the hosted control planes is not an error because the resource type only
/// exists in management clusters.
pub async fn probe(client: &Client, namespace: &str) -> Result<ClusterInfo> {
    match client
        .list::<HostedControlPlane>(namespace, &ListParams::default())
        .await
    {
        Ok(control_planes) => {
            if let Some(info) = from_hosted_control_planes(&control_planes) {
                return Ok(info);
            }
        }
        Err(error) => {
            debug!(
                namespace,
                error = &error as &dyn std::error::Error,
                "Hosted control planes cannot be listed, using the ClusterVersion"
            );
        }
    }

    let cluster_version = client
        .get::<ClusterVersion>(CLUSTER_VERSION_NAME, &())
        .await
        .context(GetClusterVersionSnafu)?;

    Ok(ClusterInfo::from(&cluster_version))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{ClusterInfo, from_hosted_control_planes};
    use crate::crd::external::{ClusterVersion, HostedControlPlane};

    fn hosted_control_plane(id: &str, version: &str) -> HostedControlPlane {
        serde_json::from_value(serde_json::json!({
            "apiVersion": "hypershift.openshift.io/v1beta1",
            "kind": "HostedControlPlane",
            "metadata": {"name": "hcp", "namespace": "clusters-a"},
            "spec": {"clusterID": id},
            "status": {"versionStatus": {"desired": {"version": version}}}
        }))
        .expect("should be a valid HostedControlPlane")
    }

    #[test]
    fn test_single_hosted_control_plane_is_selected() {
        assert_eq!(
            Some(ClusterInfo {
                version: "4.17.1".to_owned(),
                id: "hosted-id".to_owned(),
            }),
            from_hosted_control_planes(&[hosted_control_plane("hosted-id", "4.17.1")])
        );
    }

    #[test]
    fn test_zero_or_many_hosted_control_planes_are_ignored() {
        assert_eq!(None, from_hosted_control_planes(&[]));
        assert_eq!(
            None,
            from_hosted_control_planes(&[
                hosted_control_plane("a", "4.17.1"),
                hosted_control_plane("b", "4.17.1")
            ])
        );
    }

    #[test]
    fn test_cluster_info_from_cluster_version() {
        let cluster_version: ClusterVersion = serde_json::from_value(serde_json::json!({
            "apiVersion": "config.openshift.io/v1",
            "kind": "ClusterVersion",
            "metadata": {"name": "version"},
            "spec": {"clusterID": "cluster-id", "desiredUpdate": {"version": "4.16.0"}}
        }))
        .expect("should be a valid ClusterVersion");

        assert_eq!(
            ClusterInfo {
                version: "4.16.0".to_owned(),
                id: "cluster-id".to_owned(),
            },
            ClusterInfo::from(&cluster_version)
        );
    }
}
