//! Prometheus metrics about the deployed forwarders and the log file metric exporter
//!
//! The gauges are info metrics: the value is always 1 and the state is carried in the labels,
//! e.g. `log_forwarder_input_info{application="1",audit="0",infrastructure="1"} 1`.

use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};
use snafu::{ResultExt, Snafu};
use strum::{EnumDiscriminants, IntoStaticStr};

use crate::{
    crd::observability::{
        INPUT_NAME_APPLICATION, INPUT_NAME_AUDIT, INPUT_NAME_INFRASTRUCTURE, v1,
    },
    migrate::{DEFAULT_ELASTICSEARCH_OUTPUT_NAME, DEFAULT_LOKISTACK_OUTPUT_NAME},
};

const IS_PRESENT: &str = "1";
const IS_NOT_PRESENT: &str = "0";

const LABEL_VERSION: &str = "version";
const LABEL_MANAGED_STATUS: &str = "managedStatus";
const LABEL_HEALTH_STATUS: &str = "healthStatus";
const LABEL_PIPELINE_INFO: &str = "pipelineInfo";
const LABEL_DEPLOYED: &str = "deployed";

const OUTPUT_LABEL_DEFAULT: &str = "default";
/// Not supported anymore but kept so that existing dashboards keep their series
const OUTPUT_LABEL_FLUENTD_FORWARD: &str = "fluentdForward";

/// Output types which have a label in `log_forwarder_output_info`
const OUTPUT_TYPE_LABELS: [v1::OutputType; 8] = [
    v1::OutputType::Elasticsearch,
    v1::OutputType::Syslog,
    v1::OutputType::Kafka,
    v1::OutputType::Loki,
    v1::OutputType::Cloudwatch,
    v1::OutputType::Http,
    v1::OutputType::Splunk,
    v1::OutputType::GoogleCloudLogging,
];

#[derive(Snafu, Debug, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("failed to create the metric {name:?}"))]
    CreateMetric {
        source: prometheus::Error,
        name: &'static str,
    },

    #[snafu(display("failed to register the metric {name:?}"))]
    RegisterMetric {
        source: prometheus::Error,
        name: &'static str,
    },

    #[snafu(display("failed to encode the metrics"))]
    EncodeMetrics { source: prometheus::Error },

    #[snafu(display("failed to bind the metrics server to {address:?}"))]
    BindAddress {
        source: std::io::Error,
        address: String,
    },

    #[snafu(display("failed to serve the metrics"))]
    Serve { source: std::io::Error },
}

type Result<T, E = Error> = std::result::Result<T, E>;

pub struct Metrics {
    registry: Registry,
    version: String,
    logging_info: GaugeVec,
    collector_error_count: GaugeVec,
    forwarder_pipeline_info: GaugeVec,
    forwarder_input_info: GaugeVec,
    forwarder_output_info: GaugeVec,
    lfme_info: GaugeVec,
}

impl Metrics {
    /// Creates the gauges and registers them in a new registry
    pub fn new(version: impl Into<String>) -> Result<Self> {
        let registry = Registry::new();

        let output_labels: Vec<String> = [OUTPUT_LABEL_DEFAULT, OUTPUT_LABEL_FLUENTD_FORWARD]
            .into_iter()
            .map(str::to_owned)
            .chain(OUTPUT_TYPE_LABELS.iter().map(ToString::to_string))
            .collect();
        let output_labels: Vec<&str> = output_labels.iter().map(String::as_str).collect();

        let metrics = Metrics {
            version: version.into(),
            logging_info: gauge_vec(
                &registry,
                "log_logging_info",
                "Clo version managementState healthState specific metric",
                &[LABEL_VERSION, LABEL_MANAGED_STATUS, LABEL_HEALTH_STATUS],
            )?,
            collector_error_count: gauge_vec(
                &registry,
                "log_collector_error_count_total",
                "log collector total number of error counts",
                &[LABEL_VERSION],
            )?,
            forwarder_pipeline_info: gauge_vec(
                &registry,
                "log_forwarder_pipeline_info",
                "Clf healthState and pipelineInfo specific metric",
                &[LABEL_HEALTH_STATUS, LABEL_PIPELINE_INFO],
            )?,
            forwarder_input_info: gauge_vec(
                &registry,
                "log_forwarder_input_info",
                "Clf input type specific metric",
                &[
                    INPUT_NAME_APPLICATION,
                    INPUT_NAME_AUDIT,
                    INPUT_NAME_INFRASTRUCTURE,
                ],
            )?,
            forwarder_output_info: gauge_vec(
                &registry,
                "log_forwarder_output_info",
                "Clf output type specific metric",
                &output_labels,
            )?,
            lfme_info: gauge_vec(
                &registry,
                "log_file_metric_exporter_info",
                "LFME health and deployed status specific metric",
                &[LABEL_DEPLOYED, LABEL_HEALTH_STATUS],
            )?,
            registry,
        };

        metrics.set_operator_info(false, false);
        metrics.set_lfme_info(false, false);

        Ok(metrics)
    }

    pub fn set_operator_info(&self, managed: bool, healthy: bool) {
        self.logging_info.reset();
        self.logging_info
            .with_label_values(&[
                self.version.as_str(),
                present(managed),
                present(healthy),
            ])
            .set(1.0);
    }

    /// Describes the given forwarder, which was deployed if `healthy` is true
    pub fn set_forwarder_info(&self, spec: &v1::ClusterLogForwarderSpec, healthy: bool) {
        self.collector_error_count.reset();
        self.collector_error_count
            .with_label_values(&[self.version.as_str()])
            .set(0.0);

        let pipeline_count = spec.pipelines.len().to_string();
        self.forwarder_pipeline_info.reset();
        self.forwarder_pipeline_info
            .with_label_values(&[present(healthy), pipeline_count.as_str()])
            .set(1.0);

        let input_types: Vec<v1::InputType> = spec
            .pipelines
            .iter()
            .flat_map(|pipeline| &pipeline.input_refs)
            .filter_map(|name| spec.resolve_input(name))
            .map(|input| input.type_)
            .collect();
        self.forwarder_input_info.reset();
        self.forwarder_input_info
            .with_label_values(&[
                present(input_types.contains(&v1::InputType::Application)),
                present(input_types.contains(&v1::InputType::Audit)),
                present(input_types.contains(&v1::InputType::Infrastructure)),
            ])
            .set(1.0);

        let has_default = spec.outputs.iter().any(|output| {
            output.name == DEFAULT_ELASTICSEARCH_OUTPUT_NAME
                || output.name == DEFAULT_LOKISTACK_OUTPUT_NAME
        });
        let output_values: Vec<&str> = [present(has_default), IS_NOT_PRESENT]
            .into_iter()
            .chain(OUTPUT_TYPE_LABELS.iter().map(|output_type| {
                present(spec.outputs.iter().any(|output| output.type_ == *output_type))
            }))
            .collect();
        self.forwarder_output_info.reset();
        self.forwarder_output_info
            .with_label_values(output_values.as_slice())
            .set(1.0);
    }

    pub fn set_lfme_info(&self, deployed: bool, healthy: bool) {
        self.lfme_info.reset();
        self.lfme_info
            .with_label_values(&[present(deployed), present(healthy)])
            .set(1.0);
    }

    /// The metrics in the Prometheus text format
    pub fn encode(&self) -> Result<String> {
        let mut buffer = vec![];
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .context(EncodeMetricsSnafu)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

fn gauge_vec(
    registry: &Registry,
    name: &'static str,
    help: &str,
    labels: &[&str],
) -> Result<GaugeVec> {
    let gauge = GaugeVec::new(Opts::new(name, help), labels).context(CreateMetricSnafu { name })?;
    registry
        .register(Box::new(gauge.clone()))
        .context(RegisterMetricSnafu { name })?;
    Ok(gauge)
}

fn present(value: bool) -> &'static str {
    if value { IS_PRESENT } else { IS_NOT_PRESENT }
}

/// Converts a Go-style listen address like `:8686` into a socket address
pub fn listen_address(bind_address: &str) -> String {
    if bind_address.starts_with(':') {
        format!("0.0.0.0{bind_address}")
    } else {
        bind_address.to_owned()
    }
}

/// Serves `/metrics` on the given address until the process terminates
pub async fn serve(bind_address: &str, metrics: Arc<Metrics>) -> Result<()> {
    let address = listen_address(bind_address);
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .context(BindAddressSnafu { address: &address })?;

    tracing::info!(address, "Serving metrics");

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics);

    axum::serve(listener, app).await.context(ServeSnafu)
}

async fn metrics_handler(State(metrics): State<Arc<Metrics>>) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
            body,
        ),
        Err(error) => {
            tracing::error!(
                error = &error as &dyn std::error::Error,
                "Failed to encode the metrics"
            );
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain")],
                String::new(),
            )
        }
    }
}
