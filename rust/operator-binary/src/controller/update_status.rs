//! Writes the status of a forwarder or the exporter
//!
//! The patch carries the resource version which was reconciled, so a status computed from an
//! outdated object is rejected with a conflict instead of overwriting a newer status.

use std::fmt::Debug;

use serde::{Serialize, de::DeserializeOwned};
use snafu::{OptionExt, ResultExt, Snafu};
use stackable_operator::{
    client::Client,
    k8s_openapi::NamespaceResourceScope,
    kube::{
        Api, Resource,
        api::{Patch, PatchParams},
    },
};
use strum::{EnumDiscriminants, IntoStaticStr};

#[derive(Snafu, Debug, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("the object has no {key}"))]
    MissingObjectKey { key: &'static str },

    #[snafu(display("the status of {name:?} was changed concurrently"))]
    Conflict { name: String },

    #[snafu(display("failed to update the status of {name:?}"))]
    UpdateStatus {
        source: stackable_operator::kube::Error,
        name: String,
    },
}

type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }
}

pub async fn update_status<T, S>(
    client: &Client,
    field_manager: &str,
    resource: &T,
    status: &S,
) -> Result<()>
where
    T: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + DeserializeOwned,
    S: Serialize,
{
    let name = resource
        .meta()
        .name
        .clone()
        .context(MissingObjectKeySnafu { key: "name" })?;
    let namespace = resource
        .meta()
        .namespace
        .as_deref()
        .context(MissingObjectKeySnafu { key: "namespace" })?;

    let api: Api<T> = Api::namespaced(client.as_kube_client(), namespace);
    let patch = status_patch(resource, status);
    let params = PatchParams {
        field_manager: Some(field_manager.to_owned()),
        ..PatchParams::default()
    };

    match api.patch_status(&name, &params, &Patch::Merge(&patch)).await {
        Ok(_) => Ok(()),
        Err(stackable_operator::kube::Error::Api(response)) if response.code == 409 => {
            ConflictSnafu { name }.fail()
        }
        Err(source) => Err(source).context(UpdateStatusSnafu { name }),
    }
}

fn status_patch<T, S>(resource: &T, status: &S) -> serde_json::Value
where
    T: Resource<DynamicType = ()>,
    S: Serialize,
{
    serde_json::json!({
        "apiVersion": T::api_version(&()),
        "kind": T::kind(&()),
        "metadata": {
            "resourceVersion": resource.meta().resource_version,
        },
        "status": status,
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use stackable_operator::kube::api::ObjectMeta;

    use super::status_patch;
    use crate::crd::lfme::v1alpha1;

    #[test]
    fn test_status_patch_carries_resource_version() {
        let exporter = v1alpha1::LogFileMetricExporter {
            metadata: ObjectMeta {
                name: Some("instance".to_owned()),
                namespace: Some("openshift-logging".to_owned()),
                resource_version: Some("4711".to_owned()),
                ..ObjectMeta::default()
            },
            spec: v1alpha1::LogFileMetricExporterSpec::default(),
            status: None,
        };

        let patch = status_patch(
            &exporter,
            &v1alpha1::LogFileMetricExporterStatus::default(),
        );

        assert_eq!(
            serde_json::json!({
                "apiVersion": "logging.openshift.io/v1alpha1",
                "kind": "LogFileMetricExporter",
                "metadata": {"resourceVersion": "4711"},
                "status": {"conditions": []},
            }),
            patch
        );
    }
}
