//! The output plugins
//!
//! Every output type has one entry in [`OutputPlugins`] which knows how to migrate a legacy
//! output, how to validate an output and how to emit the sink of the collector configuration.

use std::{collections::BTreeMap, str::FromStr};

use stackable_operator::k8s_openapi::api::core::v1::Secret;

use crate::{
    crd::{
        common::{
            BearerToken, BearerTokenFrom, OutputTlsSpec, SecretReference, TlsSpec, ValueReference,
        },
        logging::v1 as legacy,
        observability::v1,
    },
    framework::validation::is_config_map_key,
    generator::{self, Context, elements::Block, template::Template},
    secrets::{self, Secrets},
};

pub mod azure_monitor;
pub mod cloudwatch;
pub mod elasticsearch;
pub mod google_cloud_logging;
pub mod http;
pub mod kafka;
pub mod loki;
pub mod loki_stack;
pub mod splunk;
pub mod syslog;

/// The operations of one output type
pub trait PluginOps: Send + Sync {
    fn output_type(&self) -> v1::OutputType;

    /// Converts a legacy output, `secret` being the Secret referenced by the legacy output
    fn migrate(&self, output: &legacy::OutputSpec, secret: Option<&Secret>) -> v1::OutputSpec;

    /// Returns the reasons why the output is invalid, an empty list if it is valid
    fn validate(&self, output: &v1::OutputSpec, secrets: &Secrets) -> Vec<String>;

    /// The blocks of the label which sends the records to the output
    fn emit(&self, output: &v1::OutputSpec, ctx: &Context<'_>) -> generator::Result<Vec<Block>>;
}

/// The plugins of all supported output types
pub struct OutputPlugins(BTreeMap<v1::OutputType, Box<dyn PluginOps>>);

impl OutputPlugins {
    pub fn register_all() -> Self {
        let mut plugins = OutputPlugins(BTreeMap::new());
        plugins.register(Box::new(azure_monitor::AzureMonitorPlugin));
        plugins.register(Box::new(cloudwatch::CloudwatchPlugin));
        plugins.register(Box::new(elasticsearch::ElasticsearchPlugin));
        plugins.register(Box::new(google_cloud_logging::GoogleCloudLoggingPlugin));
        plugins.register(Box::new(http::HttpPlugin));
        plugins.register(Box::new(kafka::KafkaPlugin));
        plugins.register(Box::new(loki::LokiPlugin));
        plugins.register(Box::new(loki_stack::LokiStackPlugin));
        plugins.register(Box::new(splunk::SplunkPlugin));
        plugins.register(Box::new(syslog::SyslogPlugin));
        plugins
    }

    fn register(&mut self, plugin: Box<dyn PluginOps>) {
        self.0.insert(plugin.output_type(), plugin);
    }

    pub fn get(&self, output_type: v1::OutputType) -> Option<&dyn PluginOps> {
        self.0.get(&output_type).map(Box::as_ref)
    }

    /// The plugin of a legacy output type; there is none for `fluentdForward`
    pub fn get_legacy(&self, output_type: legacy::OutputType) -> Option<&dyn PluginOps> {
        current_output_type(output_type).and_then(|output_type| self.get(output_type))
    }

    pub fn output_types(&self) -> impl Iterator<Item = v1::OutputType> + '_ {
        self.0.keys().copied()
    }
}

/// The current output type which corresponds to a legacy one
pub fn current_output_type(output_type: legacy::OutputType) -> Option<v1::OutputType> {
    match output_type {
        legacy::OutputType::AzureMonitor => Some(v1::OutputType::AzureMonitor),
        legacy::OutputType::Cloudwatch => Some(v1::OutputType::Cloudwatch),
        legacy::OutputType::Elasticsearch => Some(v1::OutputType::Elasticsearch),
        legacy::OutputType::FluentdForward => None,
        legacy::OutputType::GoogleCloudLogging => Some(v1::OutputType::GoogleCloudLogging),
        legacy::OutputType::Http => Some(v1::OutputType::Http),
        legacy::OutputType::Kafka => Some(v1::OutputType::Kafka),
        legacy::OutputType::Loki => Some(v1::OutputType::Loki),
        legacy::OutputType::Splunk => Some(v1::OutputType::Splunk),
        legacy::OutputType::Syslog => Some(v1::OutputType::Syslog),
    }
}

/// The converted output without the type-specific block
pub fn migrate_shell(
    output: &legacy::OutputSpec,
    output_type: v1::OutputType,
    secret: Option<&Secret>,
) -> v1::OutputSpec {
    v1::OutputSpec {
        tls: migrate_tls(output.tls.as_ref(), secret),
        rate_limit: output.limit,
        ..v1::OutputSpec::new(&output.name, output_type)
    }
}

/// Converts the legacy tuning; only some output types support compression
pub fn migrate_tuning(
    tuning: Option<&legacy::OutputTuningSpec>,
    with_compression: bool,
) -> Option<v1::OutputTuningSpec> {
    tuning.map(|tuning| v1::OutputTuningSpec {
        delivery: tuning.delivery.map(|delivery| match delivery {
            legacy::DeliveryMode::AtLeastOnce => v1::DeliveryMode::AtLeastOnce,
            legacy::DeliveryMode::AtMostOnce => v1::DeliveryMode::AtMostOnce,
        }),
        compression: tuning.compression.clone().filter(|_| with_compression),
        max_write: tuning.max_write.clone(),
        min_retry_duration: tuning.min_retry_duration,
        max_retry_duration: tuning.max_retry_duration,
    })
}

/// The TLS settings of the legacy output combined with the certificates in its Secret
pub fn migrate_tls(
    tls: Option<&legacy::OutputTlsSpec>,
    secret: Option<&Secret>,
) -> Option<OutputTlsSpec> {
    let mut spec = TlsSpec::default();
    let named_secret = secret.and_then(|secret| secret_name(secret).map(|name| (secret, name)));
    if let Some((secret, name)) = named_secret {
        if secrets::has_tls_cert_and_key(secret) {
            spec.certificate = Some(ValueReference::from_secret(name, secrets::KEY_TLS_CERT));
            spec.key = Some(SecretReference::new(name, secrets::KEY_TLS_KEY));
        }
        if secrets::has_ca_bundle(secret) {
            spec.ca = Some(ValueReference::from_secret(name, secrets::KEY_CA_BUNDLE));
        }
        if secrets::has_passphrase(secret) {
            spec.key_passphrase = Some(SecretReference::new(name, secrets::KEY_PASSPHRASE));
        }
    }

    if tls.is_none() && spec.is_empty() {
        return None;
    }

    Some(OutputTlsSpec {
        tls: spec,
        insecure_skip_verify: tls.is_some_and(|tls| tls.insecure_skip_verify),
        security_profile: tls.and_then(|tls| tls.security_profile.clone()),
    })
}

/// Basic authentication and bearer token from the well-known keys of the Secret
pub fn migrate_http_authentication(secret: Option<&Secret>) -> Option<v1::HttpAuthentication> {
    let secret = secret?;
    let name = secret_name(secret)?;
    let mut authentication = v1::HttpAuthentication::default();

    if secrets::has_username_password(secret) {
        authentication.username = Some(SecretReference::new(name, secrets::KEY_USERNAME));
        authentication.password = Some(SecretReference::new(name, secrets::KEY_PASSWORD));
    }
    if secrets::has_bearer_token_file_key(secret) {
        authentication.token = Some(BearerToken::from_secret(
            name,
            secrets::KEY_BEARER_TOKEN_FILE,
        ));
    }

    Some(authentication)
}

pub fn secret_name(secret: &Secret) -> Option<&str> {
    secret.metadata.name.as_deref()
}

/// The legacy URL or an empty string
pub fn legacy_url(output: &legacy::OutputSpec) -> String {
    output.url.clone().unwrap_or_default()
}

/// Ensures that a template field starts with a dot, e.g. `kubernetes.namespace_name`
pub fn dotted(key: &str) -> String {
    if key.starts_with('.') {
        key.to_owned()
    } else {
        format!(".{key}")
    }
}

/// Checks that the URL can be parsed and uses one of the given schemes
pub fn validate_url(url: &str, schemes: &[&str]) -> Option<String> {
    match url::Url::parse(url) {
        Ok(parsed) if schemes.contains(&parsed.scheme()) => None,
        Ok(parsed) => Some(format!(
            "URL {url:?} has the scheme {:?} but must use one of {schemes:?}",
            parsed.scheme()
        )),
        Err(error) => Some(format!("URL {url:?} is invalid: {error}")),
    }
}

pub fn validate_template(field: &str, template: &str) -> Option<String> {
    Template::from_str(template)
        .err()
        .map(|error| format!("{field} is invalid: {error}"))
}

/// Checks that the key is well-formed and exists in the referenced Secret
///
/// Missing Secrets are reported separately when the Secrets are loaded.
pub fn validate_secret_key(secrets: &Secrets, reference: &SecretReference) -> Option<String> {
    if let Err(error) = is_config_map_key(&reference.key) {
        return Some(format!(
            "invalid key of secret {:?}: {error}",
            reference.secret_name
        ));
    }
    let secret = secrets.get(&reference.secret_name)?;
    secrets::key_value(secret, &reference.key)
        .is_none()
        .then(|| {
            format!(
                "secret {:?} does not contain the key {:?}",
                reference.secret_name, reference.key
            )
        })
}

pub fn validate_http_authentication(
    authentication: Option<&v1::HttpAuthentication>,
    secrets: &Secrets,
) -> Vec<String> {
    let Some(authentication) = authentication else {
        return vec![];
    };
    let mut messages = vec![];

    match (&authentication.username, &authentication.password) {
        (Some(_), None) | (None, Some(_)) => {
            messages.push("username and password must be set together".to_owned())
        }
        _ => {}
    }
    if authentication.username.is_some() && authentication.token.is_some() {
        messages.push("only one of basic authentication and token can be set".to_owned());
    }

    messages.extend(
        [&authentication.username, &authentication.password]
            .into_iter()
            .flatten()
            .filter_map(|reference| validate_secret_key(secrets, reference)),
    );
    match &authentication.token {
        Some(BearerToken {
            secret: Some(secret),
            ..
        }) => messages.extend(validate_secret_key(
            secrets,
            &SecretReference::new(&secret.name, &secret.key),
        )),
        Some(BearerToken {
            from: BearerTokenFrom::Secret,
            secret: None,
        }) => messages.push("a token from a secret requires the secret name and key".to_owned()),
        _ => {}
    }

    messages
}

/// Checks the TLS settings which are common to all outputs
pub fn validate_tls(output: &v1::OutputSpec, secrets: &Secrets) -> Vec<String> {
    let Some(tls) = &output.tls else {
        return vec![];
    };
    let mut messages = vec![];

    if tls.tls.certificate.is_some() != tls.tls.key.is_some() {
        messages.push("TLS certificate and key must be set together".to_owned());
    }

    let value_references = [&tls.tls.ca, &tls.tls.certificate]
        .into_iter()
        .flatten()
        .filter_map(|value| {
            value
                .secret_name
                .as_ref()
                .map(|secret_name| SecretReference::new(secret_name, &value.key))
        });
    let secret_references = [&tls.tls.key, &tls.tls.key_passphrase]
        .into_iter()
        .flatten()
        .cloned();
    messages.extend(
        value_references
            .chain(secret_references)
            .filter_map(|reference| validate_secret_key(secrets, &reference)),
    );

    for value in [&tls.tls.ca, &tls.tls.certificate].into_iter().flatten() {
        if value.config_map_name.is_some() == value.secret_name.is_some() {
            messages.push(format!(
                "the TLS value {:?} must reference either a ConfigMap or a Secret",
                value.key
            ));
        }
    }

    messages
}

/// The type-specific block of the output or a generation error if it is not set
pub fn required_block<'a, T>(
    output: &'a v1::OutputSpec,
    block: &'a Option<T>,
) -> generator::Result<&'a T> {
    block.as_ref().ok_or_else(|| generator::Error::MissingOutputBlock {
        output: output.name.clone(),
        output_type: output.type_,
    })
}

/// Parses a template or returns a generation error naming the output
pub fn parse_template(output: &v1::OutputSpec, template: &str) -> generator::Result<Template> {
    Template::from_str(template).map_err(|source| generator::Error::InvalidTemplate {
        output: output.name.clone(),
        source,
    })
}

/// Splits a URL into host, port and path
pub fn parse_url(output: &v1::OutputSpec, url: &str) -> generator::Result<url::Url> {
    url::Url::parse(url).map_err(|source| generator::Error::ParseUrl {
        output: output.name.clone(),
        url: url.to_owned(),
        source,
    })
}

/// Replaces dots and slashes in the Kubernetes label keys which many sinks reject
pub fn dedot_labels() -> Block {
    Block::with_argument("filter", "**")
        .param("@type", "record_modifier")
        .child(
            Block::new("record")
                .param(
                    "_dummy_",
                    r#"${if m=record.dig("kubernetes","namespace_labels");record["kubernetes"]["namespace_labels"]={}.tap{|n|m.each{|k,v|n[k.gsub(/[.\/]/,'_')]=v}};end}"#,
                )
                .param(
                    "_dummy2_",
                    r#"${if m=record.dig("kubernetes","labels");record["kubernetes"]["labels"]={}.tap{|n|m.each{|k,v|n[k.gsub(/[.\/]/,'_')]=v}};end}"#,
                )
                .param(
                    "_dummy3_",
                    r#"${if m=record.dig("kubernetes","flat_labels");record["kubernetes"]["flat_labels"]=[].tap{|n|m.each_with_index{|s, i|n[i] = s.gsub(/[.\/]/,'_')}};end}"#,
                ),
        )
        .param("remove_keys", "_dummy_, _dummy2_, _dummy3_")
}

/// The minimum TLS version of the security profile, e.g. `TLSv1_2`
pub fn min_tls_version(output: &v1::OutputSpec) -> Option<String> {
    output
        .tls
        .as_ref()
        .and_then(|tls| tls.security_profile.as_ref())
        .map(|profile| profile.min_version_and_ciphers().0)
}

pub fn insecure_skip_verify(output: &v1::OutputSpec) -> bool {
    output.tls.as_ref().is_some_and(|tls| tls.insecure_skip_verify)
}

/// The value of an `Authorization` header which reads the token when fluentd starts
pub fn bearer_header_value(token: &BearerToken) -> String {
    format!(
        "Bearer #{{File.read('{}').chomp rescue ''}}",
        generator::security::bearer_token_path(token)
    )
}

/// The compression of the tuning unless it is `none`
pub fn compression(tuning: Option<&v1::OutputTuningSpec>) -> Option<&str> {
    tuning
        .and_then(|tuning| tuning.compression.as_deref())
        .filter(|compression| *compression != "none")
}

#[cfg(test)]
pub mod test_support {
    use stackable_operator::k8s_openapi::api::core::v1::Secret;

    use crate::crd::logging::v1 as legacy;

    pub use crate::secrets::secret_with;

    pub fn legacy_output(yaml: &str) -> legacy::OutputSpec {
        serde_yaml::from_str(yaml).expect("should be a valid legacy output")
    }

    pub fn secret(name: &str, keys: &[&str]) -> Secret {
        let entries: Vec<(&str, &str)> = keys.iter().map(|key| (*key, "value")).collect();
        secret_with(name, &entries)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use strum::IntoEnumIterator;

    use super::{
        OutputPlugins, migrate_tls, migrate_tuning, test_support::secret, validate_secret_key,
        validate_url,
    };
    use crate::{
        crd::{
            common::{OutputTlsSpec, SecretReference, TlsSpec, ValueReference},
            logging::v1 as legacy,
            observability::v1,
        },
        secrets::Secrets,
    };

    #[test]
    fn test_every_output_type_is_registered() {
        let plugins = OutputPlugins::register_all();

        for output_type in v1::OutputType::iter() {
            assert_eq!(
                Some(output_type),
                plugins.get(output_type).map(|plugin| plugin.output_type())
            );
        }
        assert!(
            plugins
                .get_legacy(legacy::OutputType::FluentdForward)
                .is_none()
        );
    }

    #[test]
    fn test_migrate_tls_from_secret() {
        let secret = secret("es-secret", &["tls.crt", "tls.key", "ca-bundle.crt"]);

        assert_eq!(
            Some(OutputTlsSpec {
                tls: TlsSpec {
                    ca: Some(ValueReference::from_secret("es-secret", "ca-bundle.crt")),
                    certificate: Some(ValueReference::from_secret("es-secret", "tls.crt")),
                    key: Some(SecretReference::new("es-secret", "tls.key")),
                    key_passphrase: None,
                },
                insecure_skip_verify: false,
                security_profile: None,
            }),
            migrate_tls(None, Some(&secret))
        );
        assert_eq!(None, migrate_tls(None, Some(&secret("plain", &["username"]))));
        assert_eq!(
            Some(OutputTlsSpec {
                insecure_skip_verify: true,
                ..OutputTlsSpec::default()
            }),
            migrate_tls(
                Some(&legacy::OutputTlsSpec {
                    insecure_skip_verify: true,
                    security_profile: None,
                }),
                None
            )
        );
    }

    #[test]
    fn test_migrate_tuning_compression() {
        let tuning = legacy::OutputTuningSpec {
            delivery: Some(legacy::DeliveryMode::AtMostOnce),
            compression: Some("gzip".to_owned()),
            ..legacy::OutputTuningSpec::default()
        };

        let with_compression =
            migrate_tuning(Some(&tuning), true).expect("should migrate the tuning");
        assert_eq!(Some("gzip".to_owned()), with_compression.compression);
        assert_eq!(Some(v1::DeliveryMode::AtMostOnce), with_compression.delivery);

        let without_compression =
            migrate_tuning(Some(&tuning), false).expect("should migrate the tuning");
        assert_eq!(None, without_compression.compression);
    }

    #[test]
    fn test_validate_url() {
        assert_eq!(None, validate_url("https://es:9200", &["http", "https"]));
        assert!(validate_url("tcp://es:9200", &["http", "https"]).is_some());
        assert!(validate_url("not a url", &["http", "https"]).is_some());
    }

    #[test]
    fn test_validate_secret_key() {
        let secrets: Secrets = [("s".to_owned(), secret("s", &["username"]))]
            .into_iter()
            .collect();

        assert_eq!(
            None,
            validate_secret_key(&secrets, &SecretReference::new("s", "username"))
        );
        assert_eq!(
            Some(r#"secret "s" does not contain the key "password""#.to_owned()),
            validate_secret_key(&secrets, &SecretReference::new("s", "password"))
        );
        assert_eq!(
            None,
            validate_secret_key(&secrets, &SecretReference::new("missing", "password"))
        );
    }
}
