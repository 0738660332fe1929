//! The current ClusterLogForwarder API in the group `observability.openshift.io`

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use stackable_operator::{
    k8s_openapi::{
        api::core::v1::{ResourceRequirements, Toleration},
        apimachinery::pkg::{
            api::resource::Quantity,
            apis::meta::v1::{Condition, LabelSelector},
        },
    },
    kube::CustomResource,
    schemars::{self, JsonSchema},
    time::Duration,
    versioned::versioned,
};
use strum::{Display, EnumIter};

use crate::crd::common::{
    BearerToken, DropTest, FluentdBufferSpec, KubeApiAudit, LimitSpec, ManagementState,
    OutputTlsSpec, PruneFilterSpec, SecretReference, TlsSpec,
};

pub const INPUT_NAME_APPLICATION: &str = "application";
pub const INPUT_NAME_INFRASTRUCTURE: &str = "infrastructure";
pub const INPUT_NAME_AUDIT: &str = "audit";

/// Input names which implicitly refer to all logs of the corresponding type
pub const RESERVED_INPUT_NAMES: [&str; 3] = [
    INPUT_NAME_APPLICATION,
    INPUT_NAME_INFRASTRUCTURE,
    INPUT_NAME_AUDIT,
];

pub const OUTPUT_NAME_DEFAULT: &str = "default";

/// Annotation on a ClusterLogForwarder which sets the log level of the collector
pub const LOG_LEVEL_ANNOTATION: &str = "observability.openshift.io/log-level";

#[versioned(version(name = "v1"))]
pub mod versioned {

    /// A forwarder which collects logs on every node and forwards them to the configured
    /// outputs. The operator deploys a collector DaemonSet for each forwarder.
    #[derive(Clone, CustomResource, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[versioned(k8s(
        group = "observability.openshift.io",
        kind = "ClusterLogForwarder",
        plural = "clusterlogforwarders",
        shortname = "obsclf",
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
        /// Indicator if the resource is `Managed` or `Unmanaged` by the operator
        #[serde(default)]
        pub management_state: ManagementState,

        /// Scheduling and resources of the collector pods
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub collector: Option<CollectorSpec>,

        /// Named inputs; the reserved names `application`, `infrastructure` and `audit` can be
        /// referenced without declaring them.
        #[serde(default)]
        pub inputs: Vec<InputSpec>,

        #[serde(default)]
        pub outputs: Vec<OutputSpec>,

        #[serde(default)]
        pub filters: Vec<FilterSpec>,

        pub pipelines: Vec<PipelineSpec>,

        /// The service account of the collector which must be allowed to collect the
        /// referenced log types
        pub service_account: ServiceAccount,
    }

    #[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ServiceAccount {
        pub name: String,
    }

    #[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct CollectorSpec {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub resources: Option<ResourceRequirements>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub node_selector: Option<BTreeMap<String, String>>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub tolerations: Option<Vec<Toleration>>,

        /// Buffer settings of the collector outputs
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub buffer: Option<FluentdBufferSpec>,
    }

    #[derive(
        Clone, Copy, Debug, Deserialize, Display, EnumIter, Eq, JsonSchema, PartialEq, Serialize,
    )]
    #[serde(rename_all = "camelCase")]
    #[strum(serialize_all = "camelCase")]
    pub enum InputType {
        Application,
        Infrastructure,
        Audit,
        Receiver,
    }

    #[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct InputSpec {
        pub name: String,

        #[serde(rename = "type")]
        pub type_: InputType,

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
    pub struct Application {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub selector: Option<LabelSelector>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub tuning: Option<ContainerInputTuningSpec>,

        /// Globs of namespaces and containers to collect; all if empty
        #[serde(default)]
        pub includes: Vec<NamespaceContainerSpec>,

        /// Globs of namespaces and containers which are not collected
        #[serde(default)]
        pub excludes: Vec<NamespaceContainerSpec>,
    }

    #[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ContainerInputTuningSpec {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub rate_limit_per_container: Option<LimitSpec>,
    }

    #[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct NamespaceContainerSpec {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub namespace: Option<String>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub container: Option<String>,
    }

    #[derive(
        Clone,
        Copy,
        Debug,
        Deserialize,
        Display,
        EnumIter,
        Eq,
        JsonSchema,
        Ord,
        PartialEq,
        PartialOrd,
        Serialize,
    )]
    #[serde(rename_all = "camelCase")]
    #[strum(serialize_all = "camelCase")]
    pub enum InfrastructureSource {
        Node,
        Container,
    }

    #[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Infrastructure {
        /// All sources if empty
        #[serde(default)]
        pub sources: Vec<InfrastructureSource>,
    }

    #[derive(
        Clone,
        Copy,
        Debug,
        Deserialize,
        Display,
        EnumIter,
        Eq,
        JsonSchema,
        Ord,
        PartialEq,
        PartialOrd,
        Serialize,
    )]
    pub enum AuditSource {
        #[serde(rename = "kubeAPI")]
        #[strum(serialize = "kubeAPI")]
        KubeApi,
        #[serde(rename = "openshiftAPI")]
        #[strum(serialize = "openshiftAPI")]
        OpenshiftApi,
        #[serde(rename = "auditd")]
        #[strum(serialize = "auditd")]
        Auditd,
        #[serde(rename = "ovn")]
        #[strum(serialize = "ovn")]
        Ovn,
    }

    #[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Audit {
        /// All sources if empty
        #[serde(default)]
        pub sources: Vec<AuditSource>,
    }

    #[derive(Clone, Copy, Debug, Deserialize, Display, Eq, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    #[strum(serialize_all = "camelCase")]
    pub enum ReceiverType {
        Http,
        Syslog,
    }

    /// A listener which receives logs from sources outside of the cluster
    #[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ReceiverSpec {
        #[serde(rename = "type")]
        pub type_: ReceiverType,

        pub port: i32,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub tls: Option<TlsSpec>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub http: Option<HttpReceiver>,
    }

    #[derive(Clone, Copy, Debug, Deserialize, Display, Eq, JsonSchema, PartialEq, Serialize)]
    pub enum HttpReceiverFormat {
        #[serde(rename = "kubeAPIAudit")]
        #[strum(serialize = "kubeAPIAudit")]
        KubeApiAudit,
    }

    #[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct HttpReceiver {
        pub format: HttpReceiverFormat,
    }

    #[derive(
        Clone,
        Copy,
        Debug,
        Deserialize,
        Display,
        EnumIter,
        Eq,
        Hash,
        JsonSchema,
        Ord,
        PartialEq,
        PartialOrd,
        Serialize,
    )]
    #[serde(rename_all = "camelCase")]
    #[strum(serialize_all = "camelCase")]
    pub enum OutputType {
        AzureMonitor,
        Cloudwatch,
        Elasticsearch,
        GoogleCloudLogging,
        Http,
        Kafka,
        Loki,
        LokiStack,
        Splunk,
        Syslog,
    }

    /// A named destination of logs
    ///
    /// Only the block that matches the type must be set.
    #[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct OutputSpec {
        pub name: String,

        #[serde(rename = "type")]
        pub type_: OutputType,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub tls: Option<OutputTlsSpec>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub rate_limit: Option<LimitSpec>,

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
        pub loki_stack: Option<LokiStack>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub splunk: Option<Splunk>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub syslog: Option<Syslog>,
    }

    #[derive(Clone, Copy, Debug, Deserialize, Display, Eq, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    #[strum(serialize_all = "camelCase")]
    pub enum DeliveryMode {
        AtLeastOnce,
        AtMostOnce,
    }

    #[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct OutputTuningSpec {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub delivery: Option<DeliveryMode>,

        /// Only supported by Elasticsearch, Loki, HTTP, Kafka and Cloudwatch outputs
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub compression: Option<String>,

        /// Maximum payload of a single send request
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub max_write: Option<Quantity>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub min_retry_duration: Option<Duration>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub max_retry_duration: Option<Duration>,
    }

    #[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct HttpAuthentication {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub token: Option<BearerToken>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub username: Option<SecretReference>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub password: Option<SecretReference>,
    }

    #[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct AzureMonitorAuthentication {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub shared_key: Option<SecretReference>,
    }

    #[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct AzureMonitor {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub authentication: Option<AzureMonitorAuthentication>,

        #[serde(default)]
        pub customer_id: String,

        #[serde(default)]
        pub log_type: String,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub azure_resource_id: Option<String>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub host: Option<String>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub tuning: Option<OutputTuningSpec>,
    }

    #[derive(Clone, Copy, Debug, Deserialize, Display, Eq, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    #[strum(serialize_all = "camelCase")]
    pub enum CloudwatchAuthType {
        AccessKey,
        IamRole,
    }

    #[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct CloudwatchAccessKey {
        #[serde(rename = "keyID")]
        pub key_id: SecretReference,

        pub key_secret: SecretReference,
    }

    #[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct CloudwatchIamRole {
        #[serde(rename = "roleARN")]
        pub role_arn: SecretReference,

        pub token: BearerToken,
    }

    #[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct CloudwatchAuthentication {
        #[serde(rename = "type")]
        pub type_: CloudwatchAuthType,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub aws_access_key: Option<CloudwatchAccessKey>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub iam_role: Option<CloudwatchIamRole>,
    }

    #[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Cloudwatch {
        /// Overrides the default endpoint of the region
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub url: Option<String>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub authentication: Option<CloudwatchAuthentication>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub tuning: Option<OutputTuningSpec>,

        pub region: String,

        /// Template of the log group, e.g. `{.log_type||"none"}`
        pub group_name: String,
    }

    #[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Elasticsearch {
        pub url: String,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub authentication: Option<HttpAuthentication>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub tuning: Option<OutputTuningSpec>,

        /// Template of the index, e.g. `{.log_type||"none"}`
        pub index: String,

        pub version: i32,
    }

    #[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct GoogleCloudLoggingAuthentication {
        pub credentials: SecretReference,
    }

    #[derive(Clone, Copy, Debug, Deserialize, Display, Eq, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    #[strum(serialize_all = "camelCase")]
    pub enum GoogleCloudLoggingIdType {
        BillingAccount,
        Folder,
        Project,
        Organization,
    }

    #[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct GoogleCloudLoggingId {
        #[serde(rename = "type")]
        pub type_: GoogleCloudLoggingIdType,

        pub value: String,
    }

    #[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct GoogleCloudLogging {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub authentication: Option<GoogleCloudLoggingAuthentication>,

        pub id: GoogleCloudLoggingId,

        pub log_id: String,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub tuning: Option<OutputTuningSpec>,
    }

    #[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Http {
        pub url: String,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub authentication: Option<HttpAuthentication>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub tuning: Option<OutputTuningSpec>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub headers: Option<BTreeMap<String, String>>,

        /// Request timeout in seconds
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub timeout: Option<i32>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub method: Option<String>,
    }

    #[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct SaslAuthentication {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub username: Option<SecretReference>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub password: Option<SecretReference>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub mechanism: Option<String>,
    }

    #[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct KafkaAuthentication {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub sasl: Option<SaslAuthentication>,
    }

    #[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Kafka {
        /// The URL of the first broker including the topic, used if no brokers are listed
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub url: Option<String>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub authentication: Option<KafkaAuthentication>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub tuning: Option<OutputTuningSpec>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub topic: Option<String>,

        #[serde(default)]
        pub brokers: Vec<String>,
    }

    #[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Loki {
        pub url: String,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub authentication: Option<HttpAuthentication>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub tuning: Option<OutputTuningSpec>,

        #[serde(default)]
        pub label_keys: Vec<String>,

        /// Template of the tenant, e.g. `{.log_type||"none"}`
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub tenant_key: Option<String>,
    }

    #[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct LokiStackTarget {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub namespace: Option<String>,

        pub name: String,
    }

    #[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct LokiStack {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub authentication: Option<HttpAuthentication>,

        pub target: LokiStackTarget,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub tuning: Option<OutputTuningSpec>,

        #[serde(default)]
        pub label_keys: Vec<String>,
    }

    #[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct SplunkAuthentication {
        pub token: SecretReference,
    }

    #[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Splunk {
        pub url: String,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub authentication: Option<SplunkAuthentication>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub tuning: Option<OutputTuningSpec>,

        /// Template of the index; the default index of the token is used if empty
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub index: Option<String>,
    }

    #[derive(Clone, Copy, Debug, Deserialize, Display, Eq, JsonSchema, PartialEq, Serialize)]
    pub enum SyslogRfc {
        #[serde(rename = "RFC3164")]
        #[strum(serialize = "rfc3164")]
        Rfc3164,
        #[serde(rename = "RFC5424")]
        #[strum(serialize = "rfc5424")]
        Rfc5424,
    }

    #[derive(Clone, Copy, Debug, Deserialize, Display, Eq, JsonSchema, PartialEq, Serialize)]
    pub enum EnrichmentType {
        None,
        KubernetesMinimal,
    }

    #[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Syslog {
        pub url: String,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub rfc: Option<SyslogRfc>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub severity: Option<String>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub facility: Option<String>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub payload_key: Option<String>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub app_name: Option<String>,

        #[serde(default, rename = "procID", skip_serializing_if = "Option::is_none")]
        pub proc_id: Option<String>,

        #[serde(default, rename = "msgID", skip_serializing_if = "Option::is_none")]
        pub msg_id: Option<String>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub enrichment: Option<EnrichmentType>,
    }

    #[derive(
        Clone, Copy, Debug, Deserialize, Display, EnumIter, Eq, JsonSchema, PartialEq, Serialize,
    )]
    pub enum FilterType {
        #[serde(rename = "detectMultiline")]
        #[strum(serialize = "detectMultiline")]
        DetectMultiline,
        #[serde(rename = "drop")]
        #[strum(serialize = "drop")]
        Drop,
        #[serde(rename = "kubeAPIAudit")]
        #[strum(serialize = "kubeAPIAudit")]
        KubeApiAudit,
        #[serde(rename = "openshiftLabels", alias = "addLabels")]
        #[strum(serialize = "openshiftLabels")]
        OpenshiftLabels,
        #[serde(rename = "parse")]
        #[strum(serialize = "parse")]
        Parse,
        #[serde(rename = "prune")]
        #[strum(serialize = "prune")]
        Prune,
    }

    /// A named transformation of log records
    #[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct FilterSpec {
        pub name: String,

        #[serde(rename = "type")]
        pub type_: FilterType,

        #[serde(default, rename = "kubeAPIAudit", skip_serializing_if = "Option::is_none")]
        pub kube_api_audit: Option<KubeApiAudit>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub drop: Option<Vec<DropTest>>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub prune: Option<PruneFilterSpec>,

        /// Labels which are added to every record
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub openshift_labels: Option<BTreeMap<String, String>>,
    }

    #[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct PipelineSpec {
        pub name: String,

        pub input_refs: Vec<String>,

        pub output_refs: Vec<String>,

        #[serde(default)]
        pub filter_refs: Vec<String>,
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

impl v1::InputSpec {
    pub fn is_reserved_name(name: &str) -> bool {
        RESERVED_INPUT_NAMES.contains(&name)
    }

    /// The input which implicitly exists for a reserved name
    pub fn reserved(name: &str) -> Option<v1::InputSpec> {
        let input = match name {
            INPUT_NAME_APPLICATION => v1::InputSpec {
                name: name.to_owned(),
                type_: v1::InputType::Application,
                application: Some(v1::Application::default()),
                infrastructure: None,
                audit: None,
                receiver: None,
            },
            INPUT_NAME_INFRASTRUCTURE => v1::InputSpec {
                name: name.to_owned(),
                type_: v1::InputType::Infrastructure,
                application: None,
                infrastructure: Some(v1::Infrastructure::default()),
                audit: None,
                receiver: None,
            },
            INPUT_NAME_AUDIT => v1::InputSpec {
                name: name.to_owned(),
                type_: v1::InputType::Audit,
                application: None,
                infrastructure: None,
                audit: Some(v1::Audit::default()),
                receiver: None,
            },
            _ => return None,
        };
        Some(input)
    }
}

impl v1::Infrastructure {
    /// The declared sources or all sources if none are declared
    pub fn effective_sources(&self) -> Vec<v1::InfrastructureSource> {
        if self.sources.is_empty() {
            vec![
                v1::InfrastructureSource::Container,
                v1::InfrastructureSource::Node,
            ]
        } else {
            self.sources.clone()
        }
    }
}

impl v1::Audit {
    /// The declared sources or all sources if none are declared
    pub fn effective_sources(&self) -> Vec<v1::AuditSource> {
        if self.sources.is_empty() {
            vec![
                v1::AuditSource::Auditd,
                v1::AuditSource::KubeApi,
                v1::AuditSource::OpenshiftApi,
                v1::AuditSource::Ovn,
            ]
        } else {
            self.sources.clone()
        }
    }
}

impl v1::OutputSpec {
    /// An output of the given type with no type-specific block set
    pub fn new(name: impl Into<String>, type_: v1::OutputType) -> Self {
        v1::OutputSpec {
            name: name.into(),
            type_,
            tls: None,
            rate_limit: None,
            azure_monitor: None,
            cloudwatch: None,
            elasticsearch: None,
            google_cloud_logging: None,
            http: None,
            kafka: None,
            loki: None,
            loki_stack: None,
            splunk: None,
            syslog: None,
        }
    }

    /// The types of all type-specific blocks which are set
    pub fn configured_types(&self) -> Vec<v1::OutputType> {
        [
            (self.azure_monitor.is_some(), v1::OutputType::AzureMonitor),
            (self.cloudwatch.is_some(), v1::OutputType::Cloudwatch),
            (self.elasticsearch.is_some(), v1::OutputType::Elasticsearch),
            (
                self.google_cloud_logging.is_some(),
                v1::OutputType::GoogleCloudLogging,
            ),
            (self.http.is_some(), v1::OutputType::Http),
            (self.kafka.is_some(), v1::OutputType::Kafka),
            (self.loki.is_some(), v1::OutputType::Loki),
            (self.loki_stack.is_some(), v1::OutputType::LokiStack),
            (self.splunk.is_some(), v1::OutputType::Splunk),
            (self.syslog.is_some(), v1::OutputType::Syslog),
        ]
        .into_iter()
        .filter_map(|(is_set, type_)| is_set.then_some(type_))
        .collect()
    }

    /// The tuning of the type-specific block
    pub fn tuning(&self) -> Option<&v1::OutputTuningSpec> {
        match self.type_ {
            v1::OutputType::AzureMonitor => self.azure_monitor.as_ref()?.tuning.as_ref(),
            v1::OutputType::Cloudwatch => self.cloudwatch.as_ref()?.tuning.as_ref(),
            v1::OutputType::Elasticsearch => self.elasticsearch.as_ref()?.tuning.as_ref(),
            v1::OutputType::GoogleCloudLogging => {
                self.google_cloud_logging.as_ref()?.tuning.as_ref()
            }
            v1::OutputType::Http => self.http.as_ref()?.tuning.as_ref(),
            v1::OutputType::Kafka => self.kafka.as_ref()?.tuning.as_ref(),
            v1::OutputType::Loki => self.loki.as_ref()?.tuning.as_ref(),
            v1::OutputType::LokiStack => self.loki_stack.as_ref()?.tuning.as_ref(),
            v1::OutputType::Splunk => self.splunk.as_ref()?.tuning.as_ref(),
            v1::OutputType::Syslog => None,
        }
    }

    /// The names of all Secrets referenced by this output, sorted and without duplicates
    pub fn secret_names(&self) -> Vec<String> {
        let mut names: Vec<String> = vec![];

        if let Some(tls) = &self.tls {
            names.extend(tls.tls.secret_names().into_iter().map(str::to_owned));
        }

        for authentication in [
            self.elasticsearch
                .as_ref()
                .and_then(|es| es.authentication.as_ref()),
            self.http
                .as_ref()
                .and_then(|http| http.authentication.as_ref()),
            self.loki
                .as_ref()
                .and_then(|loki| loki.authentication.as_ref()),
            self.loki_stack
                .as_ref()
                .and_then(|loki_stack| loki_stack.authentication.as_ref()),
        ]
        .into_iter()
        .flatten()
        {
            names.extend(
                [&authentication.username, &authentication.password]
                    .into_iter()
                    .flatten()
                    .map(|reference| reference.secret_name.clone()),
            );
            if let Some(secret) = authentication
                .token
                .as_ref()
                .and_then(|token| token.secret.as_ref())
            {
                names.push(secret.name.clone());
            }
        }

        if let Some(shared_key) = self
            .azure_monitor
            .as_ref()
            .and_then(|azure| azure.authentication.as_ref())
            .and_then(|authentication| authentication.shared_key.as_ref())
        {
            names.push(shared_key.secret_name.clone());
        }

        if let Some(authentication) = self
            .cloudwatch
            .as_ref()
            .and_then(|cloudwatch| cloudwatch.authentication.as_ref())
        {
            if let Some(access_key) = &authentication.aws_access_key {
                names.push(access_key.key_id.secret_name.clone());
                names.push(access_key.key_secret.secret_name.clone());
            }
            if let Some(iam_role) = &authentication.iam_role {
                names.push(iam_role.role_arn.secret_name.clone());
                if let Some(secret) = &iam_role.token.secret {
                    names.push(secret.name.clone());
                }
            }
        }

        if let Some(authentication) = self
            .google_cloud_logging
            .as_ref()
            .and_then(|gcl| gcl.authentication.as_ref())
        {
            names.push(authentication.credentials.secret_name.clone());
        }

        if let Some(sasl) = self
            .kafka
            .as_ref()
            .and_then(|kafka| kafka.authentication.as_ref())
            .and_then(|authentication| authentication.sasl.as_ref())
        {
            names.extend(
                [&sasl.username, &sasl.password]
                    .into_iter()
                    .flatten()
                    .map(|reference| reference.secret_name.clone()),
            );
        }

        if let Some(authentication) = self
            .splunk
            .as_ref()
            .and_then(|splunk| splunk.authentication.as_ref())
        {
            names.push(authentication.token.secret_name.clone());
        }

        names.sort();
        names.dedup();
        names
    }
}

impl v1::ClusterLogForwarderSpec {
    pub fn input(&self, name: &str) -> Option<&v1::InputSpec> {
        self.inputs.iter().find(|input| input.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&v1::OutputSpec> {
        self.outputs.iter().find(|output| output.name == name)
    }

    pub fn filter(&self, name: &str) -> Option<&v1::FilterSpec> {
        self.filters.iter().find(|filter| filter.name == name)
    }

    /// The declared input or the implicit input of a reserved name
    pub fn resolve_input(&self, name: &str) -> Option<v1::InputSpec> {
        self.input(name)
            .cloned()
            .or_else(|| v1::InputSpec::reserved(name))
    }

    /// The names of all Secrets referenced by outputs and receivers, sorted and without
    /// duplicates
    pub fn secret_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .outputs
            .iter()
            .flat_map(v1::OutputSpec::secret_names)
            .collect();
        names.extend(
            self.inputs
                .iter()
                .filter_map(|input| input.receiver.as_ref())
                .filter_map(|receiver| receiver.tls.as_ref())
                .flat_map(|tls| tls.secret_names().into_iter().map(str::to_owned)),
        );
        names.sort();
        names.dedup();
        names
    }

    /// The names of all ConfigMaps referenced by the TLS settings of outputs and receivers
    pub fn config_map_names(&self) -> Vec<String> {
        let output_tls = self
            .outputs
            .iter()
            .filter_map(|output| output.tls.as_ref())
            .map(|tls| &tls.tls);
        let receiver_tls = self
            .inputs
            .iter()
            .filter_map(|input| input.receiver.as_ref())
            .filter_map(|receiver| receiver.tls.as_ref());

        let mut names: Vec<String> = output_tls
            .chain(receiver_tls)
            .flat_map(TlsSpec::config_map_names)
            .map(str::to_owned)
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::v1;
    use crate::crd::common::{BearerToken, SecretReference};

    fn forwarder_spec() -> v1::ClusterLogForwarderSpec {
        serde_yaml::from_str(
            "
            serviceAccount:
              name: logcollector
            inputs:
              - name: my-app
                type: application
                application:
                  includes:
                    - namespace: test-*
              - name: syslog-receiver
                type: receiver
                receiver:
                  type: syslog
                  port: 10514
            outputs:
              - name: es
                type: elasticsearch
                elasticsearch:
                  url: https://es.example.com:9200
                  index: '{.log_type||\"none\"}'
                  version: 8
                  authentication:
                    username:
                      key: username
                      secretName: es-secret
                    password:
                      key: password
                      secretName: es-secret
                tls:
                  ca:
                    key: ca-bundle.crt
                    secretName: es-ca
              - name: cw
                type: cloudwatch
                cloudwatch:
                  region: us-east-1
                  groupName: '{.log_type||\"none\"}'
                  authentication:
                    type: iamRole
                    iamRole:
                      roleARN:
                        key: role_arn
                        secretName: cw-secret
                      token:
                        from: serviceAccount
            filters:
              - name: my-labels
                type: addLabels
                openshiftLabels:
                  team: a
            pipelines:
              - name: to-es
                inputRefs: [my-app, infrastructure]
                outputRefs: [es, cw]
                filterRefs: [my-labels]
            ",
        )
        .expect("should be a valid ClusterLogForwarder spec")
    }

    #[test]
    fn test_deserialize_forwarder_spec() {
        let spec = forwarder_spec();

        assert_eq!(2, spec.inputs.len());
        assert_eq!(v1::FilterType::OpenshiftLabels, spec.filters[0].type_);
        assert_eq!(
            vec![v1::OutputType::Elasticsearch],
            spec.outputs[0].configured_types()
        );
        assert_eq!(
            Some(v1::CloudwatchIamRole {
                role_arn: SecretReference::new("cw-secret", "role_arn"),
                token: BearerToken::from_service_account(),
            }),
            spec.outputs[1]
                .cloudwatch
                .as_ref()
                .and_then(|cloudwatch| cloudwatch.authentication.as_ref())
                .and_then(|authentication| authentication.iam_role.clone())
        );
    }

    #[test]
    fn test_secret_names() {
        assert_eq!(
            vec!["cw-secret", "es-ca", "es-secret"],
            forwarder_spec().secret_names()
        );
    }

    #[test]
    fn test_resolve_input() {
        let spec = forwarder_spec();

        assert_eq!(
            Some(v1::InputType::Application),
            spec.resolve_input("my-app").map(|input| input.type_)
        );
        assert_eq!(
            Some(v1::InputType::Infrastructure),
            spec.resolve_input("infrastructure").map(|input| input.type_)
        );
        assert_eq!(None, spec.resolve_input("unknown"));
    }

    #[test]
    fn test_effective_sources() {
        assert_eq!(
            vec![
                v1::InfrastructureSource::Container,
                v1::InfrastructureSource::Node
            ],
            v1::Infrastructure::default().effective_sources()
        );
        assert_eq!(
            vec![v1::AuditSource::Ovn],
            v1::Audit {
                sources: vec![v1::AuditSource::Ovn]
            }
            .effective_sources()
        );
    }
}
