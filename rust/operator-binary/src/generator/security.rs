//! Paths of the credentials which are mounted into the collector pods

use crate::crd::common::{
    BearerToken, BearerTokenFrom, OutputTlsSpec, SecretReference, TlsSpec, ValueReference,
};

/// Every referenced Secret is mounted in a sub directory named after the Secret
pub const SECRETS_MOUNT_DIR: &str = "/var/run/ocp-collector/secrets";

/// Every ConfigMap referenced as a TLS value is mounted in a sub directory named after it
pub const CONFIG_MAPS_MOUNT_DIR: &str = "/var/run/ocp-collector/config";

/// The projected token of the collector service account
pub const SERVICE_ACCOUNT_TOKEN_DIR: &str = "/var/run/ocp-collector/serviceaccount";
pub const SERVICE_ACCOUNT_TOKEN_FILE: &str = "token";
pub const SERVICE_ACCOUNT_TOKEN_PATH: &str = "/var/run/ocp-collector/serviceaccount/token";

pub fn secret_path(secret_name: &str, key: &str) -> String {
    format!("{SECRETS_MOUNT_DIR}/{secret_name}/{key}")
}

pub fn secret_reference_path(reference: &SecretReference) -> String {
    secret_path(&reference.secret_name, &reference.key)
}

/// The path of a value which is either stored in a ConfigMap or in a Secret
pub fn value_path(reference: &ValueReference) -> Option<String> {
    match (&reference.config_map_name, &reference.secret_name) {
        (Some(config_map_name), _) => Some(format!(
            "{CONFIG_MAPS_MOUNT_DIR}/{config_map_name}/{}",
            reference.key
        )),
        (None, Some(secret_name)) => Some(secret_path(secret_name, &reference.key)),
        (None, None) => None,
    }
}

pub fn bearer_token_path(token: &BearerToken) -> String {
    match (token.from, &token.secret) {
        (BearerTokenFrom::Secret, Some(secret)) => secret_path(&secret.name, &secret.key),
        _ => SERVICE_ACCOUNT_TOKEN_PATH.to_owned(),
    }
}

/// Embedded Ruby which reads the content of a mounted file when fluentd starts
pub fn read_file(path: &str) -> String {
    format!("\"#{{File.exists?('{path}') ? open('{path}','r') do |f|f.read.chomp end : ''}}\"")
}

/// Paths of the TLS files of an output or a receiver
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TlsPaths {
    pub ca: Option<String>,
    pub certificate: Option<String>,
    pub key: Option<String>,
    pub key_passphrase: Option<String>,
}

impl TlsPaths {
    pub fn new(tls: &TlsSpec) -> Self {
        TlsPaths {
            ca: tls.ca.as_ref().and_then(value_path),
            certificate: tls.certificate.as_ref().and_then(value_path),
            key: tls.key.as_ref().map(secret_reference_path),
            key_passphrase: tls.key_passphrase.as_ref().map(secret_reference_path),
        }
    }

    pub fn of_output(tls: Option<&OutputTlsSpec>) -> Self {
        tls.map(|tls| TlsPaths::new(&tls.tls)).unwrap_or_default()
    }
}

/// True if the scheme of the URL requires TLS
pub fn is_secure(url: &str) -> bool {
    url.starts_with("https://") || url.starts_with("tls://") || url.starts_with("ssl://")
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{TlsPaths, bearer_token_path, read_file, value_path};
    use crate::crd::common::{BearerToken, SecretReference, TlsSpec, ValueReference};

    #[test]
    fn test_value_path() {
        assert_eq!(
            Some("/var/run/ocp-collector/secrets/es-secret/ca-bundle.crt".to_owned()),
            value_path(&ValueReference::from_secret("es-secret", "ca-bundle.crt"))
        );
        assert_eq!(
            Some("/var/run/ocp-collector/config/trusted-ca/ca.crt".to_owned()),
            value_path(&ValueReference {
                key: "ca.crt".to_owned(),
                config_map_name: Some("trusted-ca".to_owned()),
                secret_name: None,
            })
        );
    }

    #[test]
    fn test_tls_paths() {
        let paths = TlsPaths::new(&TlsSpec {
            key: Some(SecretReference::new("client", "tls.key")),
            ..TlsSpec::default()
        });

        assert_eq!(
            TlsPaths {
                key: Some("/var/run/ocp-collector/secrets/client/tls.key".to_owned()),
                ..TlsPaths::default()
            },
            paths
        );
    }

    #[test]
    fn test_bearer_token_path() {
        assert_eq!(
            "/var/run/ocp-collector/serviceaccount/token",
            bearer_token_path(&BearerToken::from_service_account())
        );
        assert_eq!(
            "/var/run/ocp-collector/secrets/s/token",
            bearer_token_path(&BearerToken::from_secret("s", "token"))
        );
    }

    #[test]
    fn test_read_file() {
        assert_eq!(
            r##""#{File.exists?('/p') ? open('/p','r') do |f|f.read.chomp end : ''}""##,
            read_file("/p")
        );
    }
}
