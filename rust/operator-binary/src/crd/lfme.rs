//! The LogFileMetricExporter API

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use stackable_operator::{
    k8s_openapi::{
        api::core::v1::{ResourceRequirements, Toleration},
        apimachinery::pkg::apis::meta::v1::Condition,
    },
    kube::CustomResource,
    schemars::{self, JsonSchema},
    versioned::versioned,
};

#[versioned(version(name = "v1alpha1"))]
pub mod versioned {

    /// An exporter which runs on every node and provides metrics about the sizes of the
    /// container log files. Only the singleton `instance` in `openshift-logging` is deployed.
    #[derive(Clone, CustomResource, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[versioned(k8s(
        group = "logging.openshift.io",
        kind = "LogFileMetricExporter",
        plural = "logfilemetricexporters",
        shortname = "lfme",
        status = "v1alpha1::LogFileMetricExporterStatus",
        namespaced,
        crates(
            kube_core = "stackable_operator::kube::core",
            k8s_openapi = "stackable_operator::k8s_openapi",
            schemars = "stackable_operator::schemars"
        )
    ))]
    #[serde(rename_all = "camelCase")]
    pub struct LogFileMetricExporterSpec {
        /// Resource requirements of the exporter container; none are set if empty
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub resources: Option<ResourceRequirements>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub node_selector: Option<BTreeMap<String, String>>,

        /// Tolerations in addition to the master and disk-pressure tolerations
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub tolerations: Option<Vec<Toleration>>,
    }

    #[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct LogFileMetricExporterStatus {
        #[serde(default)]
        pub conditions: Vec<Condition>,
    }
}
