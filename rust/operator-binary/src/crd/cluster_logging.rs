//! The legacy ClusterLogging API which configures the log store and the collector of the
//! legacy ClusterLogForwarder with the same name

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
use strum::Display;

use crate::crd::common::{FluentdBufferSpec, ManagementState};

#[versioned(version(name = "v1"))]
pub mod versioned {

    /// The legacy configuration of the log store and the collector
    #[derive(Clone, CustomResource, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[versioned(k8s(
        group = "logging.openshift.io",
        kind = "ClusterLogging",
        plural = "clusterloggings",
        shortname = "cl",
        status = "v1::ClusterLoggingStatus",
        namespaced,
        crates(
            kube_core = "stackable_operator::kube::core",
            k8s_openapi = "stackable_operator::k8s_openapi",
            schemars = "stackable_operator::schemars"
        )
    ))]
    #[serde(rename_all = "camelCase")]
    pub struct ClusterLoggingSpec {
        #[serde(default)]
        pub management_state: ManagementState,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub log_store: Option<LogStoreSpec>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub collection: Option<CollectionSpec>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub forwarder: Option<ForwarderSpec>,
    }

    #[derive(Clone, Copy, Debug, Deserialize, Display, Eq, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "lowercase")]
    #[strum(serialize_all = "lowercase")]
    pub enum LogStoreType {
        Elasticsearch,
        LokiStack,
    }

    #[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct LokiStackStoreSpec {
        pub name: String,
    }

    #[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct LogStoreSpec {
        #[serde(rename = "type")]
        pub type_: LogStoreType,

        #[serde(default, rename = "lokistack", skip_serializing_if = "Option::is_none")]
        pub loki_stack: Option<LokiStackStoreSpec>,
    }

    #[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct CollectionSpec {
        /// The collector implementation, only `fluentd` is deployed by this operator
        #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
        pub type_: Option<String>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub resources: Option<ResourceRequirements>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub node_selector: Option<BTreeMap<String, String>>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub tolerations: Option<Vec<Toleration>>,
    }

    #[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct FluentdForwarderSpec {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub buffer: Option<FluentdBufferSpec>,
    }

    #[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ForwarderSpec {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub fluentd: Option<FluentdForwarderSpec>,
    }

    #[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ClusterLoggingStatus {
        #[serde(default)]
        pub conditions: Vec<Condition>,
    }
}

impl v1::ClusterLoggingSpec {
    /// The buffer settings of the fluentd outputs, if any are configured
    pub fn fluentd_buffer(&self) -> Option<&FluentdBufferSpec> {
        self.forwarder
            .as_ref()?
            .fluentd
            .as_ref()?
            .buffer
            .as_ref()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::v1;

    #[test]
    fn test_deserialize_cluster_logging() {
        let spec: v1::ClusterLoggingSpec = serde_json::from_str(
            r#"{
                "managementState": "Managed",
                "logStore": {"type": "lokistack", "lokistack": {"name": "logging-loki"}},
                "collection": {"type": "fluentd", "nodeSelector": {"role": "logging"}},
                "forwarder": {"fluentd": {"buffer": {"chunkLimitSize": "8m"}}}
            }"#,
        )
        .expect("should be a valid ClusterLogging spec");

        assert_eq!(
            Some(v1::LogStoreType::LokiStack),
            spec.log_store.as_ref().map(|log_store| log_store.type_)
        );
        assert_eq!(
            Some("8m"),
            spec.fluentd_buffer()
                .and_then(|buffer| buffer.chunk_limit_size.as_deref())
        );
    }
}
