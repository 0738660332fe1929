//! Maintains the logging dashboard of the OpenShift console
//!
//! The dashboard is a ConfigMap in `openshift-config-managed` which is not owned by any custom
//! resource. It is watched directly and applied again whenever it is added, changed or deleted.

use std::{collections::BTreeMap, sync::Arc};

use futures::StreamExt;
use sha2::{Digest, Sha256};
use snafu::{ResultExt, Snafu};
use stackable_operator::{
    k8s_openapi::api::core::v1::ConfigMap,
    kube::{
        Api,
        api::{DeleteParams, ObjectMeta},
        runtime::{WatchStreamExt, watcher},
    },
    kvp::Labels,
};
use strum::{EnumDiscriminants, IntoStaticStr};

use super::{
    Context,
    apply::{self, Applier},
};
use crate::{
    constant,
    framework::{
        ControllerName, NamespaceName,
        kvp::label::{APP_MANAGED_BY_LABEL, label},
    },
};

constant!(pub DASHBOARD_CONTROLLER_NAME: ControllerName = "dashboard");
constant!(DASHBOARD_NAMESPACE: NamespaceName = "openshift-config-managed");

pub const DASHBOARD_CONFIG_MAP_NAME: &str = "grafana-dashboard-cluster-logging";
const DASHBOARD_FILE_NAME: &str = "openshift-logging.json";
const DASHBOARD: &str = include_str!("assets/openshift-logging.json");

/// Label which makes the console pick up the ConfigMap
const CONSOLE_DASHBOARD_LABEL: &str = "console.openshift.io/dashboard";
/// Label which carries the hash of the dashboard content
pub const DASHBOARD_HASH_LABEL: &str = "logging.openshift.io/dashboard-hash";

/// Number of hex digits of the content hash which are kept, so that it fits into a label value
const HASH_LENGTH: usize = 32;

#[derive(Snafu, Debug, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("failed to apply the dashboard ConfigMap"))]
    ApplyDashboard { source: apply::Error },

    #[snafu(display("failed to delete the dashboard ConfigMap"))]
    DeleteDashboard {
        source: stackable_operator::kube::Error,
    },
}

type Result<T, E = Error> = std::result::Result<T, E>;

/// Applies the dashboard once and then again on every change of the deployed ConfigMap
///
/// Runs until the watch stream ends.
pub async fn run(ctx: Arc<Context>) {
    let api: Api<ConfigMap> =
        Api::namespaced(ctx.client.as_kube_client(), DASHBOARD_NAMESPACE.as_ref());
    let config =
        watcher::Config::default().fields(&format!("metadata.name={DASHBOARD_CONFIG_MAP_NAME}"));

    watcher(api, config)
        .default_backoff()
        .for_each(|event| {
            let ctx = ctx.clone();
            async move {
                match event {
                    Ok(watcher::Event::InitApply(_)) | Ok(watcher::Event::Init) => {}
                    Ok(_) => {
                        if let Err(error) = reconcile(&ctx).await {
                            tracing::warn!(
                                error = &error as &dyn std::error::Error,
                                "Failed to reconcile the dashboard"
                            );
                        }
                    }
                    Err(error) => {
                        tracing::warn!(
                            error = &error as &dyn std::error::Error,
                            "Failed to watch the dashboard ConfigMap"
                        );
                    }
                }
            }
        })
        .await;
}

/// Creates the dashboard ConfigMap if it is missing and updates it if its content changed
pub async fn reconcile(ctx: &Context) -> Result<()> {
    let field_manager = ctx.full_controller_name(&DASHBOARD_CONTROLLER_NAME);
    let desired = dashboard_config_map(&field_manager);
    let applied = Applier::new(&ctx.client, field_manager, &DASHBOARD_NAMESPACE)
        .apply_one(desired)
        .await;

    match applied {
        Ok(_) => Ok(()),
        Err(error) if error.is_conflict() => {
            tracing::debug!(
                error = &error as &dyn std::error::Error,
                "Dashboard was changed concurrently"
            );
            Ok(())
        }
        Err(error) => Err(error).context(ApplyDashboardSnafu),
    }
}

/// Deletes the dashboard ConfigMap when the operator shuts down
pub async fn remove(ctx: &Context) -> Result<()> {
    let api: Api<ConfigMap> =
        Api::namespaced(ctx.client.as_kube_client(), DASHBOARD_NAMESPACE.as_ref());
    match api
        .delete(DASHBOARD_CONFIG_MAP_NAME, &DeleteParams::default())
        .await
    {
        Ok(_) => Ok(()),
        Err(stackable_operator::kube::Error::Api(response)) if response.code == 404 => Ok(()),
        Err(source) => Err(source).context(DeleteDashboardSnafu),
    }
}

fn dashboard_config_map(managed_by: &str) -> ConfigMap {
    let mut labels = Labels::new();
    labels.insert(label(CONSOLE_DASHBOARD_LABEL, "true"));
    labels.insert(label(DASHBOARD_HASH_LABEL, &dashboard_hash(DASHBOARD)));
    labels.insert(label(APP_MANAGED_BY_LABEL, managed_by));

    ConfigMap {
        metadata: ObjectMeta {
            name: Some(DASHBOARD_CONFIG_MAP_NAME.to_owned()),
            namespace: Some(DASHBOARD_NAMESPACE.to_string()),
            labels: Some(labels.into()),
            ..ObjectMeta::default()
        },
        data: Some(BTreeMap::from([(
            DASHBOARD_FILE_NAME.to_owned(),
            DASHBOARD.to_owned(),
        )])),
        ..ConfigMap::default()
    }
}

fn dashboard_hash(content: &str) -> String {
    let mut hash = format!("{:x}", Sha256::digest(content.as_bytes()));
    hash.truncate(HASH_LENGTH);
    hash
}
