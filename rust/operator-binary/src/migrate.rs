//! Converts legacy forwarders into the current API
//!
//! A legacy `logging.openshift.io` forwarder is migrated together with the `ClusterLogging` of the
//! same name, which provides the log store behind the reserved `default` output and the collector
//! settings. Forwarders of the current API pass through unchanged, so migrating a migrated
//! forwarder again yields the same forwarder.

use crate::{
    crd::{
        cluster_logging::v1 as cluster_logging,
        common::{OutputTlsSpec, SecretReference, TlsSpec, ValueReference},
        logging::{DEFAULT_ELASTICSEARCH_VERSION, v1 as legacy},
        observability::{OUTPUT_NAME_DEFAULT, v1},
    },
    outputs::{OutputPlugins, dotted, elasticsearch::DEFAULT_INDEX, loki_stack},
    secrets::{self, Secrets},
};

pub const DEFAULT_ELASTICSEARCH_OUTPUT_NAME: &str = "default-elasticsearch";
pub const DEFAULT_LOKISTACK_OUTPUT_NAME: &str = "default-lokistack";

/// The in-cluster Elasticsearch which is deployed together with the legacy log store
const DEFAULT_ELASTICSEARCH_URL: &str = "https://elasticsearch:9200";
const DEFAULT_ELASTICSEARCH_SECRET: &str = "elasticsearch";

pub const FILTER_NAME_DETECT_MULTILINE: &str = "detect-multiline-error";
pub const FILTER_NAME_PARSE_JSON: &str = "parse-json";

const PARSE_JSON: &str = "json";

/// A legacy forwarder with everything it is migrated with
pub struct LegacyForwarder<'a> {
    pub spec: &'a legacy::ClusterLogForwarderSpec,

    /// The ClusterLogging with the same name and namespace as the forwarder
    pub cluster_logging: Option<&'a cluster_logging::ClusterLoggingSpec>,

    /// The Secrets referenced by the legacy outputs
    pub secrets: &'a Secrets,
}

pub enum ForwarderSource<'a> {
    Current(&'a v1::ClusterLogForwarderSpec),
    Legacy(LegacyForwarder<'a>),
}

/// Returns the forwarder in the current API
pub fn migrate(
    source: ForwarderSource<'_>,
    namespace: &str,
    plugins: &OutputPlugins,
) -> v1::ClusterLogForwarderSpec {
    match source {
        ForwarderSource::Current(spec) => spec.clone(),
        ForwarderSource::Legacy(forwarder) => migrate_legacy(&forwarder, namespace, plugins),
    }
}

fn migrate_legacy(
    forwarder: &LegacyForwarder<'_>,
    namespace: &str,
    plugins: &OutputPlugins,
) -> v1::ClusterLogForwarderSpec {
    let spec = forwarder.spec;

    let mut outputs: Vec<v1::OutputSpec> = spec
        .outputs
        .iter()
        .filter_map(|output| {
            let Some(plugin) = plugins.get_legacy(output.type_) else {
                tracing::warn!(
                    output.name = output.name.as_str(),
                    output.r#type = %output.type_,
                    "Dropping the output because its type is no longer supported"
                );
                return None;
            };
            let secret = output
                .secret
                .as_ref()
                .and_then(|secret| forwarder.secrets.get(&secret.name));
            Some(plugin.migrate(output, secret))
        })
        .collect();

    let mut filters: Vec<v1::FilterSpec> = spec.filters.iter().filter_map(migrate_filter).collect();

    let default_output = default_output(forwarder, namespace);
    let default_output_name = default_output
        .as_ref()
        .map(|output| output.name.clone())
        .unwrap_or_else(|| OUTPUT_NAME_DEFAULT.to_owned());

    let mut pipelines = vec![];
    for (index, pipeline) in spec.pipelines.iter().enumerate() {
        let name = pipeline.name_or_index(index);
        let filter_refs = shortcut_filters(&name, pipeline, &mut filters);
        pipelines.push(v1::PipelineSpec {
            output_refs: pipeline
                .output_refs
                .iter()
                .map(|output_ref| {
                    if output_ref == OUTPUT_NAME_DEFAULT {
                        default_output_name.clone()
                    } else {
                        output_ref.clone()
                    }
                })
                .collect(),
            input_refs: pipeline.input_refs.clone(),
            filter_refs: filter_refs
                .into_iter()
                .chain(pipeline.filter_refs.iter().cloned())
                .collect(),
            name,
        });
    }

    let default_is_referenced = pipelines
        .iter()
        .any(|pipeline| pipeline.output_refs.contains(&default_output_name));
    if let Some(output) = default_output.filter(|_| default_is_referenced) {
        outputs.push(output);
    }

    v1::ClusterLogForwarderSpec {
        management_state: forwarder
            .cluster_logging
            .map(|cluster_logging| cluster_logging.management_state)
            .unwrap_or_default(),
        collector: forwarder.cluster_logging.and_then(migrate_collector),
        inputs: spec.inputs.iter().map(migrate_input).collect(),
        outputs,
        filters,
        pipelines,
        service_account: v1::ServiceAccount {
            name: spec.service_account_name().to_owned(),
        },
    }
}

fn migrate_input(input: &legacy::InputSpec) -> v1::InputSpec {
    let type_ = if input.application.is_some() {
        v1::InputType::Application
    } else if input.infrastructure.is_some() {
        v1::InputType::Infrastructure
    } else if input.audit.is_some() {
        v1::InputType::Audit
    } else if input.receiver.is_some() {
        v1::InputType::Receiver
    } else {
        // Without any block the input stays invalid, the validator reports the missing block.
        v1::InputType::Application
    };

    v1::InputSpec {
        name: input.name.clone(),
        type_,
        application: input.application.as_ref().map(migrate_application),
        infrastructure: input
            .infrastructure
            .as_ref()
            .map(|infrastructure| v1::Infrastructure {
                sources: parse_sources(&infrastructure.sources),
            }),
        audit: input.audit.as_ref().map(|audit| v1::Audit {
            sources: parse_sources(&audit.sources),
        }),
        receiver: input.receiver.as_ref().and_then(migrate_receiver),
    }
}

fn migrate_application(application: &legacy::Application) -> v1::Application {
    let includes = application
        .namespaces
        .iter()
        .map(|namespace| v1::NamespaceContainerSpec {
            namespace: Some(namespace.clone()),
            container: None,
        })
        .chain(application.includes.iter().map(migrate_namespace_container))
        .collect();

    v1::Application {
        selector: application.selector.clone(),
        tuning: application
            .container_limit
            .map(|limit| v1::ContainerInputTuningSpec {
                rate_limit_per_container: Some(limit),
            }),
        includes,
        excludes: application
            .excludes
            .iter()
            .map(migrate_namespace_container)
            .collect(),
    }
}

fn migrate_namespace_container(
    spec: &legacy::NamespaceContainerSpec,
) -> v1::NamespaceContainerSpec {
    v1::NamespaceContainerSpec {
        namespace: spec.namespace.clone(),
        container: spec.container.clone(),
    }
}

/// Parses the legacy source names; unknown names are dropped
fn parse_sources<T: serde::de::DeserializeOwned>(sources: &[String]) -> Vec<T> {
    sources
        .iter()
        .filter_map(|source| {
            let parsed = serde_json::from_value(serde_json::Value::String(source.clone())).ok();
            if parsed.is_none() {
                tracing::warn!(source = source.as_str(), "Dropping the unknown input source");
            }
            parsed
        })
        .collect()
}

fn migrate_receiver(receiver: &legacy::ReceiverSpec) -> Option<v1::ReceiverSpec> {
    let type_ = match receiver.type_.as_deref() {
        Some("http") => v1::ReceiverType::Http,
        Some("syslog") => v1::ReceiverType::Syslog,
        Some(other) => {
            tracing::warn!(receiver.r#type = other, "Dropping the unknown receiver type");
            return None;
        }
        None if receiver.http.is_some() => v1::ReceiverType::Http,
        None if receiver.syslog.is_some() => v1::ReceiverType::Syslog,
        None => return None,
    };

    let spec = match type_ {
        v1::ReceiverType::Http => {
            let http = receiver.http.clone().unwrap_or_default();
            v1::ReceiverSpec {
                type_,
                port: http.port,
                tls: None,
                http: parse_sources::<v1::HttpReceiverFormat>(&[http.format])
                    .into_iter()
                    .next()
                    .map(|format| v1::HttpReceiver { format }),
            }
        }
        v1::ReceiverType::Syslog => v1::ReceiverSpec {
            type_,
            port: receiver
                .syslog
                .as_ref()
                .map(|syslog| syslog.port)
                .unwrap_or_default(),
            tls: None,
            http: None,
        },
    };
    Some(spec)
}

fn migrate_filter(filter: &legacy::FilterSpec) -> Option<v1::FilterSpec> {
    let Ok(type_) =
        serde_json::from_value::<v1::FilterType>(serde_json::Value::String(filter.type_.clone()))
    else {
        tracing::warn!(
            filter.name = filter.name.as_str(),
            filter.r#type = filter.type_.as_str(),
            "Dropping the filter of an unknown type"
        );
        return None;
    };

    Some(v1::FilterSpec {
        name: filter.name.clone(),
        type_,
        kube_api_audit: filter.kube_api_audit.clone(),
        drop: filter.drop.clone(),
        prune: filter.prune.clone(),
        openshift_labels: None,
    })
}

fn filter_spec(name: impl Into<String>, type_: v1::FilterType) -> v1::FilterSpec {
    v1::FilterSpec {
        name: name.into(),
        type_,
        kube_api_audit: None,
        drop: None,
        prune: None,
        openshift_labels: None,
    }
}

/// Name of the filter which adds the labels of a legacy pipeline
pub fn labels_filter_name(pipeline_name: &str) -> String {
    format!("filter-{pipeline_name}-labels")
}

/// Adds the filters which replace the shortcuts of the legacy pipeline and returns their names
/// in the order in which they are applied
fn shortcut_filters(
    pipeline_name: &str,
    pipeline: &legacy::PipelineSpec,
    filters: &mut Vec<v1::FilterSpec>,
) -> Vec<String> {
    let mut add_once = |filter: v1::FilterSpec| {
        let name = filter.name.clone();
        if !filters.iter().any(|existing| existing.name == name) {
            filters.push(filter);
        }
        name
    };

    let mut filter_refs = vec![];
    if pipeline.detect_multiline_errors {
        filter_refs.push(add_once(filter_spec(
            FILTER_NAME_DETECT_MULTILINE,
            v1::FilterType::DetectMultiline,
        )));
    }
    if pipeline.parse.as_deref() == Some(PARSE_JSON) {
        filter_refs.push(add_once(filter_spec(
            FILTER_NAME_PARSE_JSON,
            v1::FilterType::Parse,
        )));
    }
    if let Some(labels) = pipeline.labels.as_ref().filter(|labels| !labels.is_empty()) {
        filter_refs.push(add_once(v1::FilterSpec {
            openshift_labels: Some(labels.clone()),
            ..filter_spec(
                labels_filter_name(pipeline_name),
                v1::FilterType::OpenshiftLabels,
            )
        }));
    }
    filter_refs
}

/// The output which replaces the reserved `default` output, if a log store is configured
fn default_output(forwarder: &LegacyForwarder<'_>, namespace: &str) -> Option<v1::OutputSpec> {
    let log_store = forwarder.cluster_logging?.log_store.as_ref()?;

    match log_store.type_ {
        cluster_logging::LogStoreType::Elasticsearch => Some(default_elasticsearch_output(
            forwarder
                .spec
                .output_defaults
                .as_ref()
                .and_then(|defaults| defaults.elasticsearch.as_ref()),
        )),
        cluster_logging::LogStoreType::LokiStack => {
            let loki_stack = log_store.loki_stack.as_ref()?;
            Some(loki_stack::default_output(
                DEFAULT_LOKISTACK_OUTPUT_NAME,
                &loki_stack.name,
                namespace,
            ))
        }
    }
}

fn default_elasticsearch_output(
    structured: Option<&legacy::ElasticsearchStructuredSpec>,
) -> v1::OutputSpec {
    let index = match structured.map(|structured| {
        (
            structured.structured_type_key.as_deref(),
            structured.structured_type_name.as_deref(),
        )
    }) {
        Some((Some(key), Some(name))) if !key.is_empty() && !name.is_empty() => {
            format!("{{{}||{name:?}}}", dotted(key))
        }
        _ => DEFAULT_INDEX.to_owned(),
    };

    v1::OutputSpec {
        elasticsearch: Some(v1::Elasticsearch {
            url: DEFAULT_ELASTICSEARCH_URL.to_owned(),
            authentication: None,
            tuning: None,
            index,
            version: DEFAULT_ELASTICSEARCH_VERSION,
        }),
        tls: Some(OutputTlsSpec {
            tls: TlsSpec {
                ca: Some(ValueReference::from_secret(
                    DEFAULT_ELASTICSEARCH_SECRET,
                    secrets::KEY_CA_BUNDLE,
                )),
                certificate: Some(ValueReference::from_secret(
                    DEFAULT_ELASTICSEARCH_SECRET,
                    secrets::KEY_TLS_CERT,
                )),
                key: Some(SecretReference::new(
                    DEFAULT_ELASTICSEARCH_SECRET,
                    secrets::KEY_TLS_KEY,
                )),
                key_passphrase: None,
            },
            insecure_skip_verify: false,
            security_profile: None,
        }),
        ..v1::OutputSpec::new(
            DEFAULT_ELASTICSEARCH_OUTPUT_NAME,
            v1::OutputType::Elasticsearch,
        )
    }
}

fn migrate_collector(
    cluster_logging: &cluster_logging::ClusterLoggingSpec,
) -> Option<v1::CollectorSpec> {
    let collection = cluster_logging.collection.clone().unwrap_or_default();
    let collector = v1::CollectorSpec {
        resources: collection.resources,
        node_selector: collection.node_selector,
        tolerations: collection.tolerations,
        buffer: cluster_logging.fluentd_buffer().cloned(),
    };
    (collector != v1::CollectorSpec::default()).then_some(collector)
}

/// The status of a legacy forwarder in the shape of the current API
///
/// Both APIs share the condition layout, so the previous conditions keep their transition times.
pub fn migrate_status(
    status: &legacy::ClusterLogForwarderStatus,
) -> v1::ClusterLogForwarderStatus {
    v1::ClusterLogForwarderStatus {
        conditions: status.conditions.clone(),
        inputs: status.inputs.clone(),
        outputs: status.outputs.clone(),
        filters: status.filters.clone(),
        pipelines: status.pipelines.clone(),
        observed_generation: status.observed_generation,
    }
}
