use std::{str::FromStr, sync::Arc};

use clap::Parser as _;
use framework::{OperatorName, ProductVersion};
use futures::{FutureExt as _, StreamExt, future::BoxFuture};
use snafu::{OptionExt as _, ResultExt as _, Snafu};
use stackable_operator::{
    YamlSchema as _,
    cli::{Command, CommonOptions},
    client::Client,
    k8s_openapi::{
        NamespaceResourceScope,
        api::{
            apps::v1::DaemonSet,
            core::v1::{ConfigMap, Service},
            rbac::v1::{Role, RoleBinding},
        },
    },
    kube::{
        Api, Resource, ResourceExt,
        core::DeserializeGuard,
        runtime::{
            Controller,
            events::{Recorder, Reporter},
            reflector::ObjectRef,
            watcher,
        },
    },
    logging::controller::report_controller_reconciled,
    shared::yaml::SerializeOptions,
    telemetry::Tracing,
};
use strum::{EnumDiscriminants, IntoStaticStr};

use crate::{
    controller::{
        ContextNames, Images, dashboard,
        forwarder::{FORWARDER_CONTROLLER_NAME, LEGACY_FORWARDER_CONTROLLER_NAME},
        lfme::LFME_CONTROLLER_NAME,
    },
    crd::{cluster_logging, external::ServiceMonitor, lfme, logging, observability},
    leader_election::LeaderElection,
    metrics::Metrics,
    outputs::OutputPlugins,
};

mod cluster_info;
mod comparators;
mod controller;
mod crd;
mod framework;
mod generator;
mod leader_election;
mod metrics;
mod migrate;
mod outputs;
mod secrets;
mod validate;

mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

const OPERATOR_NAME: &str = "cluster-logging-operator";

/// Prefix of the operator version in `OPERATOR_CONDITION_NAME`, e.g. `cluster-logging.v6.2.0`
const OPERATOR_CONDITION_VERSION_PREFIX: &str = ".v";

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Snafu, Debug, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    #[snafu(display("failed to initialize tracing subscribers"))]
    InitTracing {
        source: stackable_operator::telemetry::tracing::Error,
    },

    #[snafu(display("failed to merge CRD versions"))]
    MergeCrd {
        source: stackable_operator::kube::core::crd::MergeError,
    },

    #[snafu(display("failed to serialize CRD"))]
    SerializeCrd {
        source: stackable_operator::shared::yaml::Error,
    },

    #[snafu(display("the operator version {version:?} is invalid"))]
    ParseOperatorVersion {
        source: framework::Error,
        version: String,
    },

    #[snafu(display("failed to create Kubernetes client"))]
    CreateClient {
        source: stackable_operator::client::Error,
    },

    #[snafu(display("failed to create the metrics registry"))]
    CreateMetrics { source: metrics::Error },

    #[snafu(display("POD_NAMESPACE must be set for the leader election"))]
    MissingPodNamespace,

    #[snafu(display("failed to hold the leadership"))]
    LeaderElection { source: leader_election::Error },
}

#[derive(clap::Parser)]
#[clap(about, author)]
struct Opts {
    #[clap(subcommand)]
    cmd: Command<OperatorRun>,
}

#[derive(clap::Args)]
struct OperatorRun {
    #[command(flatten)]
    common: CommonOptions,

    /// Comma separated namespaces to watch; empty means all namespaces
    #[arg(long, env = "WATCH_NAMESPACE")]
    watch_namespace: String,

    /// The address the metrics endpoint binds to
    #[arg(long, default_value = ":8686")]
    metrics_bind_address: String,

    /// Only run the controllers while holding the leader lease
    #[arg(long)]
    leader_elect: bool,

    /// The name of the OperatorCondition which carries the operator version
    #[arg(long, env = "OPERATOR_CONDITION_NAME")]
    operator_condition_name: Option<String>,

    /// The namespace of the leader lease
    #[arg(long, env = "POD_NAMESPACE")]
    pod_namespace: Option<String>,

    /// The holder identity of the leader lease
    #[arg(long, env = "POD_NAME")]
    pod_name: Option<String>,

    /// The image of the collector
    #[arg(long, env = "RELATED_IMAGE_FLUENTD")]
    collector_image: String,

    /// The image of the LogFileMetricExporter
    #[arg(long, env = "RELATED_IMAGE_LOG_FILE_METRIC_EXPORTER")]
    exporter_image: String,
}

#[tokio::main]
#[snafu::report]
async fn main() -> Result<()> {
    let opts = Opts::parse();
    match opts.cmd {
        Command::Crd => {
            observability::ClusterLogForwarder::merged_crd(
                observability::ClusterLogForwarderVersion::V1,
            )
            .context(MergeCrdSnafu)?
            .print_yaml_schema(built_info::PKG_VERSION, SerializeOptions::default())
            .context(SerializeCrdSnafu)?;
            logging::ClusterLogForwarder::merged_crd(logging::ClusterLogForwarderVersion::V1)
                .context(MergeCrdSnafu)?
                .print_yaml_schema(built_info::PKG_VERSION, SerializeOptions::default())
                .context(SerializeCrdSnafu)?;
            cluster_logging::ClusterLogging::merged_crd(cluster_logging::ClusterLoggingVersion::V1)
                .context(MergeCrdSnafu)?
                .print_yaml_schema(built_info::PKG_VERSION, SerializeOptions::default())
                .context(SerializeCrdSnafu)?;
            lfme::LogFileMetricExporter::merged_crd(lfme::LogFileMetricExporterVersion::V1Alpha1)
                .context(MergeCrdSnafu)?
                .print_yaml_schema(built_info::PKG_VERSION, SerializeOptions::default())
                .context(SerializeCrdSnafu)?;
        }
        Command::Run(OperatorRun {
            common:
                CommonOptions {
                    telemetry,
                    cluster_info,
                },
            watch_namespace,
            metrics_bind_address,
            leader_elect,
            operator_condition_name,
            pod_namespace,
            pod_name,
            collector_image,
            exporter_image,
        }) => {
            let _tracing_guard = Tracing::pre_configured(built_info::PKG_NAME, telemetry)
                .init()
                .context(InitTracingSnafu)?;

            tracing::info!(
                built_info.pkg_version = built_info::PKG_VERSION,
                built_info.git_version = built_info::GIT_VERSION,
                built_info.target = built_info::TARGET,
                built_info.built_time_utc = built_info::BUILT_TIME_UTC,
                built_info.rustc_version = built_info::RUSTC_VERSION,
                "Starting {description}",
                description = built_info::PKG_DESCRIPTION
            );

            let operator_name =
                OperatorName::from_str(OPERATOR_NAME).expect("should be a valid operator name");
            let version = operator_version(operator_condition_name.as_deref());
            let product_version = ProductVersion::from_str(&version).context(
                ParseOperatorVersionSnafu {
                    version: version.clone(),
                },
            )?;
            let watch_namespaces = parse_watch_namespaces(&watch_namespace);

            tracing::info!(
                operator.version = version.as_str(),
                watch_namespaces = ?watch_namespaces,
                "Starting the controllers"
            );

            let client = stackable_operator::client::initialize_operator(
                Some(operator_name.to_string()),
                &cluster_info,
            )
            .await
            .context(CreateClientSnafu)?;

            let metrics = Arc::new(Metrics::new(version).context(CreateMetricsSnafu)?);
            tokio::spawn({
                let metrics = metrics.clone();
                async move {
                    if let Err(error) = metrics::serve(&metrics_bind_address, metrics).await {
                        tracing::error!(
                            error = &error as &dyn std::error::Error,
                            "Failed to serve the metrics"
                        );
                    }
                }
            });

            let leader_election = if leader_elect {
                let namespace = pod_namespace.context(MissingPodNamespaceSnafu)?;
                let leader_election = LeaderElection::new(&client, &namespace, pod_name);
                leader_election
                    .acquire()
                    .await
                    .context(LeaderElectionSnafu)?;
                Some(leader_election)
            } else {
                None
            };

            let plugins = OutputPlugins::register_all();
            tracing::debug!(
                output_types = ?plugins.output_types().collect::<Vec<_>>(),
                "Registered the output plugins"
            );

            let ctx = Arc::new(controller::Context::new(
                client.clone(),
                ContextNames {
                    operator_name,
                    product_version,
                },
                Images {
                    collector: collector_image,
                    exporter: exporter_image,
                },
                plugins,
                metrics,
            ));

            let mut controllers: Vec<BoxFuture<'static, ()>> = vec![];
            for namespace in watch_scopes(&watch_namespaces) {
                controllers.push(forwarder_controller(&client, namespace, ctx.clone()));
                controllers.push(legacy_forwarder_controller(&client, namespace, ctx.clone()));
                controllers.push(lfme_controller(&client, namespace, ctx.clone()));
            }

            tokio::select! {
                _ = futures::future::join_all(controllers) => {}
                _ = dashboard::run(ctx.clone()) => {}
                result = keep_leadership(leader_election.as_ref()) => {
                    result.context(LeaderElectionSnafu)?;
                }
            }

            if let Err(error) = dashboard::remove(&ctx).await {
                tracing::warn!(
                    error = &error as &dyn std::error::Error,
                    "Failed to remove the dashboard"
                );
            }
        }
    }

    Ok(())
}

/// Splits the value of `WATCH_NAMESPACE` into namespace names
///
/// An empty list means that all namespaces are watched.
fn parse_watch_namespaces(watch_namespace: &str) -> Vec<String> {
    watch_namespace
        .split(',')
        .map(str::trim)
        .filter(|namespace| !namespace.is_empty())
        .map(str::to_owned)
        .collect()
}

/// The namespaces of the controllers, `None` stands for all namespaces
fn watch_scopes(watch_namespaces: &[String]) -> Vec<Option<&str>> {
    if watch_namespaces.is_empty() {
        vec![None]
    } else {
        watch_namespaces
            .iter()
            .map(|namespace| Some(namespace.as_str()))
            .collect()
    }
}

/// Extracts the version from an OperatorCondition name like `cluster-logging.v6.2.0`
///
/// Falls back to the version of this build if the name is not set or carries no version.
fn operator_version(operator_condition_name: Option<&str>) -> String {
    operator_condition_name
        .and_then(|name| name.split_once(OPERATOR_CONDITION_VERSION_PREFIX))
        .map(|(_, version)| version)
        .filter(|version| !version.is_empty())
        .unwrap_or(built_info::PKG_VERSION)
        .to_owned()
}

fn namespaced_api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>,
{
    match namespace {
        Some(namespace) => Api::namespaced(client.as_kube_client(), namespace),
        None => Api::all(client.as_kube_client()),
    }
}

fn event_recorder(client: &Client, full_controller_name: &str) -> Arc<Recorder> {
    Arc::new(Recorder::new(
        client.as_kube_client(),
        Reporter {
            controller: full_controller_name.to_owned(),
            instance: None,
        },
    ))
}

/// Renews the leader lease if leader election is enabled, otherwise never returns
async fn keep_leadership(
    leader_election: Option<&LeaderElection>,
) -> Result<(), leader_election::Error> {
    match leader_election {
        Some(leader_election) => leader_election.keep().await,
        None => futures::future::pending().await,
    }
}

fn forwarder_controller(
    client: &Client,
    namespace: Option<&str>,
    ctx: Arc<controller::Context>,
) -> BoxFuture<'static, ()> {
    let full_controller_name = ctx.full_controller_name(&FORWARDER_CONTROLLER_NAME);
    let event_recorder = event_recorder(client, &full_controller_name);

    Controller::new(
        namespaced_api::<DeserializeGuard<observability::v1::ClusterLogForwarder>>(
            client, namespace,
        ),
        watcher::Config::default(),
    )
    .owns(
        namespaced_api::<DaemonSet>(client, namespace),
        watcher::Config::default(),
    )
    .owns(
        namespaced_api::<Service>(client, namespace),
        watcher::Config::default(),
    )
    .owns(
        namespaced_api::<ConfigMap>(client, namespace),
        watcher::Config::default(),
    )
    .owns(
        namespaced_api::<Role>(client, namespace),
        watcher::Config::default(),
    )
    .owns(
        namespaced_api::<RoleBinding>(client, namespace),
        watcher::Config::default(),
    )
    .owns(
        namespaced_api::<ServiceMonitor>(client, namespace),
        watcher::Config::default(),
    )
    .shutdown_on_signal()
    .run(
        controller::forwarder::reconcile,
        controller::forwarder::error_policy,
        ctx,
    )
    .for_each_concurrent(
        16, // concurrency limit
        move |result| {
            // The event_recorder needs to be shared across all invocations, so that
            // events are correctly aggregated
            let event_recorder = event_recorder.clone();
            let full_controller_name = full_controller_name.clone();
            async move {
                report_controller_reconciled(&event_recorder, &full_controller_name, &result)
                    .await;
            }
        },
    )
    .boxed()
}

/// The legacy forwarder is also reconciled when the ClusterLogging with the same name changes.
fn legacy_forwarder_controller(
    client: &Client,
    namespace: Option<&str>,
    ctx: Arc<controller::Context>,
) -> BoxFuture<'static, ()> {
    let full_controller_name = ctx.full_controller_name(&LEGACY_FORWARDER_CONTROLLER_NAME);
    let event_recorder = event_recorder(client, &full_controller_name);

    Controller::new(
        namespaced_api::<DeserializeGuard<logging::v1::ClusterLogForwarder>>(client, namespace),
        watcher::Config::default(),
    )
    .owns(
        namespaced_api::<DaemonSet>(client, namespace),
        watcher::Config::default(),
    )
    .owns(
        namespaced_api::<Service>(client, namespace),
        watcher::Config::default(),
    )
    .owns(
        namespaced_api::<ConfigMap>(client, namespace),
        watcher::Config::default(),
    )
    .owns(
        namespaced_api::<Role>(client, namespace),
        watcher::Config::default(),
    )
    .owns(
        namespaced_api::<RoleBinding>(client, namespace),
        watcher::Config::default(),
    )
    .owns(
        namespaced_api::<ServiceMonitor>(client, namespace),
        watcher::Config::default(),
    )
    .watches(
        namespaced_api::<DeserializeGuard<cluster_logging::v1::ClusterLogging>>(
            client, namespace,
        ),
        watcher::Config::default(),
        |cluster_logging| {
            let namespace = cluster_logging.namespace()?;
            Some(
                ObjectRef::<DeserializeGuard<logging::v1::ClusterLogForwarder>>::new(
                    &cluster_logging.name_any(),
                )
                .within(&namespace),
            )
        },
    )
    .shutdown_on_signal()
    .run(
        controller::forwarder::reconcile_legacy,
        controller::forwarder::error_policy,
        ctx,
    )
    .for_each_concurrent(16, move |result| {
        let event_recorder = event_recorder.clone();
        let full_controller_name = full_controller_name.clone();
        async move {
            report_controller_reconciled(&event_recorder, &full_controller_name, &result).await;
        }
    })
    .boxed()
}

fn lfme_controller(
    client: &Client,
    namespace: Option<&str>,
    ctx: Arc<controller::Context>,
) -> BoxFuture<'static, ()> {
    let full_controller_name = ctx.full_controller_name(&LFME_CONTROLLER_NAME);
    let event_recorder = event_recorder(client, &full_controller_name);

    Controller::new(
        namespaced_api::<DeserializeGuard<lfme::v1alpha1::LogFileMetricExporter>>(
            client, namespace,
        ),
        watcher::Config::default(),
    )
    .owns(
        namespaced_api::<DaemonSet>(client, namespace),
        watcher::Config::default(),
    )
    .owns(
        namespaced_api::<Service>(client, namespace),
        watcher::Config::default(),
    )
    .owns(
        namespaced_api::<ServiceMonitor>(client, namespace),
        watcher::Config::default(),
    )
    .shutdown_on_signal()
    .run(
        controller::lfme::reconcile,
        controller::lfme::error_policy,
        ctx,
    )
    .for_each_concurrent(16, move |result| {
        let event_recorder = event_recorder.clone();
        let full_controller_name = full_controller_name.clone();
        async move {
            report_controller_reconciled(&event_recorder, &full_controller_name, &result).await;
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{built_info, operator_version, parse_watch_namespaces, watch_scopes};

    #[test]
    fn test_parse_watch_namespaces() {
        assert_eq!(Vec::<String>::new(), parse_watch_namespaces(""));
        assert_eq!(
            vec!["openshift-logging".to_owned()],
            parse_watch_namespaces("openshift-logging")
        );
        assert_eq!(
            vec!["openshift-logging".to_owned(), "my-logging".to_owned()],
            parse_watch_namespaces("openshift-logging, my-logging,")
        );
    }

    #[test]
    fn test_watch_scopes() {
        assert_eq!(vec![None], watch_scopes(&[]));
        assert_eq!(
            vec![Some("a"), Some("b")],
            watch_scopes(&["a".to_owned(), "b".to_owned()])
        );
    }

    #[test]
    fn test_operator_version() {
        assert_eq!("6.2.0", operator_version(Some("cluster-logging.v6.2.0")));
        assert_eq!(built_info::PKG_VERSION, operator_version(Some("cluster-logging")));
        assert_eq!(built_info::PKG_VERSION, operator_version(None));
    }
}
