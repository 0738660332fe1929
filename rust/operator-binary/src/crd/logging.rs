//! The legacy ClusterLogForwarder API in the group `logging.openshift.io`
//!
//! Forwarders of this API are migrated to the current API before they are validated and
//! deployed, see [`crate::migrate`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use stackable_operator::{
    k8s_openapi::apimachinery::pkg::{
        api::resource::Quantity,
        apis::meta::v1::{Condition, LabelSelector},
    },
    kube::CustomResource,
    schemars::{self, JsonSchema},
    time::Duration,
    versioned::versioned,
};
use strum::Display;

use crate::crd::common::{DropTest, KubeApiAudit, LimitSpec, PruneFilterSpec, TlsSecurityProfile};

/// The service account which is used if none is set
pub const DEFAULT_SERVICE_ACCOUNT_NAME: &str = "logcollector";

/// The Elasticsearch version which is used if none is set
pub const DEFAULT_ELASTICSEARCH_VERSION: i32 = 8;

#[versioned(version(name = "v1"))]
pub mod versioned {

    /// The legacy log forwarder
    #[derive(Clone, CustomResource, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[versioned(k8s(
        group = "logging.openshift.io",
        kind = "ClusterLogForwarder",
        plural = "clusterlogforwarders",
        shortname = "clf",
        status = "v1::ClusterLogForwarderStatus",
        namespaced,
        crates(
            kube_core = "stackable_operator::kube::core",
            k8s_openapi = "stackable_operator::k8s_openapi",
            schemars = "stackable_operator::schemars"
        )
    ))]
    #[serde(rename_all = "camelCase")]
    pub struct ClusterLogForwarderSpec {
        #[serde(default)]
        pub inputs: Vec<InputSpec>,

        #[serde(default)]
        pub outputs: Vec<OutputSpec>,

        #[serde(default)]
        pub filters: Vec<FilterSpec>,

        #[serde(default)]
        pub pipelines: Vec<PipelineSpec>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub service_account_name: Option<String>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub output_defaults: Option<OutputDefaults>,
    }

    #[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct InputSpec {
        pub name: String,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub application: Option<Application>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub infrastructure: Option<Infrastructure>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub audit: Option<Audit>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub receiver: Option<ReceiverSpec>,
    }

    #[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct NamespaceContainerSpec {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub namespace: Option<String>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub container: Option<String>,
    }

    #[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Application {
        /// Namespaces to collect; superseded by `includes`
        #[serde(default)]
        pub namespaces: Vec<String>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub selector: Option<LabelSelector>,

        #[serde(default)]
        pub includes: Vec<NamespaceContainerSpec>,

        #[serde(default)]
        pub excludes: Vec<NamespaceContainerSpec>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub container_limit: Option<LimitSpec>,
    }

    #[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Infrastructure {
        #[serde(default)]
        pub sources: Vec<String>,
    }

    #[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Audit {
        #[serde(default)]
        pub sources: Vec<String>,
    }

    #[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct HttpReceiver {
        #[serde(default)]
        pub port: i32,

        #[serde(default)]
        pub format: String,
    }

    #[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct SyslogReceiver {
        #[serde(default)]
        pub port: i32,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub protocol: Option<String>,
    }

    #[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ReceiverSpec {
        #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
        pub type_: Option<String>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub http: Option<HttpReceiver>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub syslog: Option<SyslogReceiver>,
    }

    #[derive(Clone, Copy, Debug, Deserialize, Display, Eq, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    #[strum(serialize_all = "camelCase")]
    pub enum OutputType {
        AzureMonitor,
        Cloudwatch,
        Elasticsearch,
        FluentdForward,
        GoogleCloudLogging,
        Http,
        Kafka,
        Loki,
        Splunk,
        Syslog,
    }

    #[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct OutputSpec {
        pub name: String,

        #[serde(rename = "type")]
        pub type_: OutputType,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub url: Option<String>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub tls: Option<OutputTlsSpec>,

        /// Secret with the credentials and certificates under well-known keys
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub secret: Option<OutputSecretSpec>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub limit: Option<LimitSpec>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub tuning: Option<OutputTuningSpec>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub azure_monitor: Option<AzureMonitor>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub cloudwatch: Option<Cloudwatch>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub elasticsearch: Option<Elasticsearch>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub google_cloud_logging: Option<GoogleCloudLogging>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub http: Option<Http>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub kafka: Option<Kafka>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub loki: Option<Loki>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub splunk: Option<Splunk>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub syslog: Option<Syslog>,
    }

    #[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct OutputTlsSpec {
        #[serde(default)]
        pub insecure_skip_verify: bool,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub security_profile: Option<TlsSecurityProfile>,
    }

    #[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct OutputSecretSpec {
        pub name: String,
    }

    #[derive(Clone, Copy, Debug, Deserialize, Display, Eq, JsonSchema, PartialEq, Serialize)]
    pub enum DeliveryMode {
        AtLeastOnce,
        AtMostOnce,
    }

    #[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct OutputTuningSpec {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub delivery: Option<DeliveryMode>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub compression: Option<String>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub max_write: Option<Quantity>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub min_retry_duration: Option<Duration>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub max_retry_duration: Option<Duration>,
    }

    #[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct AzureMonitor {
        #[serde(default)]
        pub customer_id: String,

        #[serde(default)]
        pub log_type: String,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub azure_resource_id: Option<String>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub host: Option<String>,
    }

    #[derive(Clone, Copy, Debug, Deserialize, Display, Eq, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    #[strum(serialize_all = "camelCase")]
    pub enum LogGroupByType {
        LogType,
        NamespaceName,
        #[serde(rename = "namespaceUUID")]
        #[strum(serialize = "namespaceUUID")]
        NamespaceUuid,
    }

    #[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Cloudwatch {
        #[serde(default)]
        pub region: String,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub group_by: Option<LogGroupByType>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub group_prefix: Option<String>,
    }

    #[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ElasticsearchStructuredSpec {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub structured_type_key: Option<String>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub structured_type_name: Option<String>,

        #[serde(default)]
        pub enable_structured_container_logs: bool,
    }

    #[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Elasticsearch {
        #[serde(flatten)]
        pub structured: ElasticsearchStructuredSpec,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub version: Option<i32>,
    }

    #[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct GoogleCloudLogging {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub billing_account_id: Option<String>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub organization_id: Option<String>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub folder_id: Option<String>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub project_id: Option<String>,

        #[serde(default)]
        pub log_id: String,
    }

    #[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Http {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub headers: Option<BTreeMap<String, String>>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub timeout: Option<i32>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub method: Option<String>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub schema: Option<String>,
    }

    #[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Kafka {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub topic: Option<String>,

        #[serde(default)]
        pub brokers: Vec<String>,
    }

    #[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Loki {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub tenant_key: Option<String>,

        #[serde(default)]
        pub label_keys: Vec<String>,
    }

    #[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Splunk {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub index_key: Option<String>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub index_name: Option<String>,

        #[serde(default)]
        pub fields: Vec<String>,
    }

    #[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Syslog {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub severity: Option<String>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub facility: Option<String>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub trim_prefix: Option<String>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub tag: Option<String>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub payload_key: Option<String>,

        #[serde(default)]
        pub add_log_source: bool,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub rfc: Option<String>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub app_name: Option<String>,

        #[serde(default, rename = "procID", skip_serializing_if = "Option::is_none")]
        pub proc_id: Option<String>,

        #[serde(default, rename = "msgID", skip_serializing_if = "Option::is_none")]
        pub msg_id: Option<String>,
    }

    #[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct FilterSpec {
        pub name: String,

        /// One of `kubeAPIAudit`, `drop` or `prune`
        #[serde(rename = "type")]
        pub type_: String,

        #[serde(default, rename = "kubeAPIAudit", skip_serializing_if = "Option::is_none")]
        pub kube_api_audit: Option<KubeApiAudit>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub drop: Option<Vec<DropTest>>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub prune: Option<PruneFilterSpec>,
    }

    #[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct PipelineSpec {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub name: Option<String>,

        pub input_refs: Vec<String>,

        pub output_refs: Vec<String>,

        #[serde(default)]
        pub filter_refs: Vec<String>,

        /// Labels which are added to every record of the pipeline
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub labels: Option<BTreeMap<String, String>>,

        /// `json` parses the message into the `structured` field
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub parse: Option<String>,

        #[serde(default)]
        pub detect_multiline_errors: bool,
    }

    #[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct OutputDefaults {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub elasticsearch: Option<ElasticsearchStructuredSpec>,
    }

    #[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ClusterLogForwarderStatus {
        #[serde(default)]
        pub conditions: Vec<Condition>,

        #[serde(default)]
        pub inputs: Vec<Condition>,

        #[serde(default)]
        pub outputs: Vec<Condition>,

        #[serde(default)]
        pub filters: Vec<Condition>,

        #[serde(default)]
        pub pipelines: Vec<Condition>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub observed_generation: Option<i64>,
    }
}

impl v1::ClusterLogForwarderSpec {
    pub fn service_account_name(&self) -> &str {
        self.service_account_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_SERVICE_ACCOUNT_NAME)
    }

    /// The names of the Secrets referenced by the outputs, sorted and without duplicates
    pub fn secret_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .outputs
            .iter()
            .filter_map(|output| output.secret.as_ref())
            .map(|secret| secret.name.clone())
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

impl v1::PipelineSpec {
    /// The name of the pipeline or a generated one if none is set
    pub fn name_or_index(&self, index: usize) -> String {
        match &self.name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => format!("pipeline_{index}"),
        }
    }
}
