//! The dereference step in the forwarder controller

use snafu::{ResultExt, Snafu};
use stackable_operator::client::Client;
use strum::{EnumDiscriminants, IntoStaticStr};

use crate::{
    cluster_info::{self, ClusterInfo},
    controller::conditions::StatusCondition,
    crd::observability::v1,
    framework::NamespaceName,
    secrets::{self, LoadedSecrets},
    validate::permissions,
};

#[derive(Snafu, Debug, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("failed to load the Secrets of the outputs"))]
    LoadOutputSecrets { source: secrets::Error },

    #[snafu(display("failed to load the Secrets of the receivers"))]
    LoadReceiverSecrets { source: secrets::Error },

    #[snafu(display("failed to review the permissions of the service account"))]
    Authorize { source: permissions::Error },

    #[snafu(display("failed to determine the cluster info"))]
    ProbeClusterInfo { source: cluster_info::Error },
}

type Result<T, E = Error> = std::result::Result<T, E>;

/// Objects which are referenced by the forwarder and required to validate and build it
pub struct DereferencedObjects {
    pub secrets: LoadedSecrets,
    pub authorized: StatusCondition,
    pub cluster_info: ClusterInfo,
}

pub async fn dereference(
    client: &Client,
    namespace: &NamespaceName,
    spec: &v1::ClusterLogForwarderSpec,
) -> Result<DereferencedObjects> {
    let mut secrets = secrets::load(client, namespace, &spec.outputs)
        .await
        .context(LoadOutputSecretsSnafu)?;
    secrets::load_receiver_secrets(client, namespace, &spec.inputs, &mut secrets.secrets)
        .await
        .context(LoadReceiverSecretsSnafu)?;

    let authorized = permissions::authorize(client, namespace, spec)
        .await
        .context(AuthorizeSnafu)?;

    let cluster_info = cluster_info::probe(client, namespace.as_ref())
        .await
        .context(ProbeClusterInfoSnafu)?;

    Ok(DereferencedObjects {
        secrets,
        authorized,
        cluster_info,
    })
}
