//! Types which are shared by the legacy and the current ClusterLogForwarder APIs

use serde::{Deserialize, Serialize};
use stackable_operator::schemars::{self, JsonSchema};
use strum::Display;

#[derive(
    Clone, Copy, Debug, Default, Deserialize, Display, Eq, JsonSchema, PartialEq, Serialize,
)]
pub enum ManagementState {
    #[default]
    Managed,
    Unmanaged,
}

/// A key in a Secret
#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretReference {
    pub key: String,
    pub secret_name: String,
}

impl SecretReference {
    pub fn new(secret_name: impl Into<String>, key: impl Into<String>) -> Self {
        SecretReference {
            key: key.into(),
            secret_name: secret_name.into(),
        }
    }
}

/// A key in either a ConfigMap or a Secret
#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueReference {
    pub key: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,
}

impl ValueReference {
    pub fn from_secret(secret_name: impl Into<String>, key: impl Into<String>) -> Self {
        ValueReference {
            key: key.into(),
            config_map_name: None,
            secret_name: Some(secret_name.into()),
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum BearerTokenFrom {
    Secret,
    ServiceAccount,
}

#[derive(Clone, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BearerTokenSecretKey {
    pub name: String,
    pub key: String,
}

/// A bearer token either read from a Secret or projected from the service account
#[derive(Clone, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BearerToken {
    pub from: BearerTokenFrom,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<BearerTokenSecretKey>,
}

impl BearerToken {
    pub fn from_secret(name: impl Into<String>, key: impl Into<String>) -> Self {
        BearerToken {
            from: BearerTokenFrom::Secret,
            secret: Some(BearerTokenSecretKey {
                name: name.into(),
                key: key.into(),
            }),
        }
    }

    pub fn from_service_account() -> Self {
        BearerToken {
            from: BearerTokenFrom::ServiceAccount,
            secret: None,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca: Option<ValueReference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<ValueReference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<SecretReference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_passphrase: Option<SecretReference>,
}

impl TlsSpec {
    pub fn is_empty(&self) -> bool {
        self == &TlsSpec::default()
    }

    /// The names of all Secrets referenced by this TLS configuration
    pub fn secret_names(&self) -> Vec<&str> {
        [
            self.ca.as_ref().and_then(|ca| ca.secret_name.as_deref()),
            self.certificate
                .as_ref()
                .and_then(|certificate| certificate.secret_name.as_deref()),
            self.key.as_ref().map(|key| key.secret_name.as_str()),
            self.key_passphrase
                .as_ref()
                .map(|passphrase| passphrase.secret_name.as_str()),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    /// The names of all ConfigMaps referenced by this TLS configuration
    pub fn config_map_names(&self) -> Vec<&str> {
        [&self.ca, &self.certificate]
            .into_iter()
            .flatten()
            .filter_map(|reference| reference.config_map_name.as_deref())
            .collect()
    }
}

/// TLS settings of an output
#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputTlsSpec {
    #[serde(flatten)]
    pub tls: TlsSpec,

    /// Disables the verification of the server certificate
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub insecure_skip_verify: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_profile: Option<TlsSecurityProfile>,
}

#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, JsonSchema, PartialEq, Serialize)]
pub enum TlsProfileType {
    Old,
    Intermediate,
    Modern,
    Custom,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomTlsProfile {
    #[serde(default)]
    pub ciphers: Vec<String>,

    #[serde(default, rename = "minTLSVersion", skip_serializing_if = "Option::is_none")]
    pub min_tls_version: Option<String>,
}

/// The TLS security profile as defined by the cluster API server configuration
#[derive(Clone, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsSecurityProfile {
    #[serde(rename = "type")]
    pub type_: TlsProfileType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<CustomTlsProfile>,
}

impl TlsSecurityProfile {
    /// Minimum TLS version and cipher suites of this profile
    pub fn min_version_and_ciphers(&self) -> (String, Vec<String>) {
        match self.type_ {
            TlsProfileType::Old => ("TLSv1_0".to_owned(), vec![]),
            TlsProfileType::Intermediate => ("TLSv1_2".to_owned(), vec![]),
            TlsProfileType::Modern => ("TLSv1_3".to_owned(), vec![]),
            TlsProfileType::Custom => {
                let custom = self.custom.clone().unwrap_or_default();
                (
                    custom
                        .min_tls_version
                        .map(|version| version.replace("VersionTLS1", "TLSv1_"))
                        .unwrap_or_else(|| "TLSv1_2".to_owned()),
                    custom.ciphers,
                )
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitSpec {
    pub max_records_per_second: i64,
}

/// Condition on a field of a log record
#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DropCondition {
    /// Dot-delimited path to a field of the log record, e.g. `.kubernetes.namespace_name`
    #[serde(default)]
    pub field: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matches: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_matches: Option<String>,
}

/// A record is dropped if all conditions of the test apply
#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DropTest {
    #[serde(default, rename = "test")]
    pub conditions: Vec<DropCondition>,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PruneFilterSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#in: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_in: Option<Vec<String>>,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditPolicyGroupResources {
    #[serde(default)]
    pub group: String,

    #[serde(default)]
    pub resources: Vec<String>,
}

/// A rule of the Kubernetes audit policy
#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditPolicyRule {
    pub level: String,

    #[serde(default)]
    pub users: Vec<String>,

    #[serde(default)]
    pub user_groups: Vec<String>,

    #[serde(default)]
    pub verbs: Vec<String>,

    #[serde(default)]
    pub resources: Vec<AuditPolicyGroupResources>,

    #[serde(default)]
    pub namespaces: Vec<String>,
}

/// Filters Kubernetes API audit events like the audit policy of the API server
#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KubeApiAudit {
    #[serde(default)]
    pub rules: Vec<AuditPolicyRule>,

    #[serde(default)]
    pub omit_stages: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub omit_response_codes: Option<Vec<i32>>,
}

/// Buffer settings of the fluentd outputs
///
/// Sizes and durations use the fluentd notation, e.g. `8m` or `30s`.
#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FluentdBufferSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_limit_size: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_limit_size: Option<String>,

    /// One of `throw_exception`, `block` or `drop_oldest_chunk`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overflow_action: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flush_thread_count: Option<i32>,

    /// One of `lazy`, `interval` or `immediate`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flush_mode: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flush_interval: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_wait: Option<String>,

    /// One of `exponential_backoff` or `periodic`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_max_interval: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_timeout: Option<String>,
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{
        BearerToken, BearerTokenFrom, OutputTlsSpec, SecretReference, TlsProfileType,
        TlsSecurityProfile, TlsSpec, ValueReference,
    };

    #[test]
    fn test_output_tls_spec_is_flattened() {
        let tls: OutputTlsSpec = serde_json::from_str(
            r#"{
                "ca": {"key": "ca-bundle.crt", "configMapName": "trusted-ca"},
                "key": {"key": "tls.key", "secretName": "es-secret"},
                "insecureSkipVerify": true
            }"#,
        )
        .expect("should be a valid TLS spec");

        assert_eq!(
            OutputTlsSpec {
                tls: TlsSpec {
                    ca: Some(ValueReference {
                        key: "ca-bundle.crt".to_owned(),
                        config_map_name: Some("trusted-ca".to_owned()),
                        secret_name: None,
                    }),
                    key: Some(SecretReference::new("es-secret", "tls.key")),
                    ..TlsSpec::default()
                },
                insecure_skip_verify: true,
                security_profile: None,
            },
            tls
        );
        assert_eq!(vec!["es-secret"], tls.tls.secret_names());
    }

    #[test]
    fn test_bearer_token_serialization() {
        assert_eq!(
            r#"{"from":"serviceAccount"}"#,
            serde_json::to_string(&BearerToken::from_service_account())
                .expect("should be serializable")
        );

        let token: BearerToken =
            serde_json::from_str(r#"{"from":"secret","secret":{"name":"s","key":"token"}}"#)
                .expect("should be a valid bearer token");
        assert_eq!(BearerTokenFrom::Secret, token.from);
        assert_eq!(BearerToken::from_secret("s", "token"), token);
    }

    #[test]
    fn test_tls_security_profile_min_version() {
        assert_eq!(
            ("TLSv1_2".to_owned(), vec![]),
            TlsSecurityProfile {
                type_: TlsProfileType::Intermediate,
                custom: None,
            }
            .min_version_and_ciphers()
        );

        let custom: TlsSecurityProfile = serde_json::from_str(
            r#"{"type": "Custom", "custom": {"minTLSVersion": "VersionTLS13", "ciphers": ["TLS_AES_128_GCM_SHA256"]}}"#,
        )
        .expect("should be a valid TLS security profile");
        assert_eq!(
            (
                "TLSv1_3".to_owned(),
                vec!["TLS_AES_128_GCM_SHA256".to_owned()]
            ),
            custom.min_version_and_ciphers()
        );
    }
}
