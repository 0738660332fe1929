//! Resolution of the Secrets which are referenced by the outputs and receivers of a forwarder
//!
//! Secrets are fetched once per reconcile and are not cached. The predicates work on the
//! well-known keys of output Secrets.

use std::collections::BTreeMap;

use snafu::{ResultExt, Snafu};
use stackable_operator::{client::Client, k8s_openapi::api::core::v1::Secret};
use strum::{EnumDiscriminants, IntoStaticStr};

use crate::{
    controller::conditions::{Entry, StatusCondition},
    crd::{common::SecretReference, observability::v1},
    framework::NamespaceName,
};

pub const KEY_USERNAME: &str = "username";
pub const KEY_PASSWORD: &str = "password";
pub const KEY_TLS_CERT: &str = "tls.crt";
pub const KEY_TLS_KEY: &str = "tls.key";
pub const KEY_CA_BUNDLE: &str = "ca-bundle.crt";
pub const KEY_PASSPHRASE: &str = "passphrase";
pub const KEY_SHARED_KEY: &str = "shared_key";
/// Spelling of the shared key which is still accepted in legacy Secrets
pub const KEY_SHARED_KEY_LEGACY: &str = "sharedKey";
pub const KEY_BEARER_TOKEN_FILE: &str = "bearer_token_file";
pub const KEY_AWS_ROLE_ARN: &str = "role_arn";
pub const KEY_AWS_CREDENTIALS: &str = "credentials";
pub const KEY_AWS_ACCESS_KEY_ID: &str = "aws_access_key_id";
pub const KEY_AWS_SECRET_ACCESS_KEY: &str = "aws_secret_access_key";
pub const KEY_GOOGLE_APPLICATION_CREDENTIALS: &str = "google-application-credentials.json";
pub const KEY_SPLUNK_HEC_TOKEN: &str = "hecToken";
pub const KEY_SASL_MECHANISM: &str = "sasl.mechanism";

#[derive(Snafu, Debug, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("failed to fetch the Secret {secret_name:?}"))]
    FetchSecret {
        source: stackable_operator::client::Error,
        secret_name: String,
    },
}

type Result<T, E = Error> = std::result::Result<T, E>;

/// The fetched Secrets by name
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Secrets(BTreeMap<String, Secret>);

impl Secrets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, secret: Secret) {
        self.0.insert(name.into(), secret);
    }

    pub fn get(&self, name: &str) -> Option<&Secret> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// The value of the referenced key if the Secret was fetched and contains the key
    pub fn value(&self, reference: &SecretReference) -> Option<&[u8]> {
        key_value(self.get(&reference.secret_name)?, &reference.key)
    }
}

impl FromIterator<(String, Secret)> for Secrets {
    fn from_iter<T: IntoIterator<Item = (String, Secret)>>(iter: T) -> Self {
        Secrets(iter.into_iter().collect())
    }
}

/// The result of [`load`]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LoadedSecrets {
    pub secrets: Secrets,

    /// `MissingResource` conditions keyed by the name of the output which references a missing
    /// Secret
    pub missing: BTreeMap<String, StatusCondition>,
}

/// Fetches all Secrets which are referenced by the given outputs
///
/// A missing Secret does not abort the load but is recorded as a condition of every output which
/// references it. Other API errors are returned.
pub async fn load(
    client: &Client,
    namespace: &NamespaceName,
    outputs: &[v1::OutputSpec],
) -> Result<LoadedSecrets> {
    let mut loaded = LoadedSecrets::default();
    let mut missing_secrets: Vec<String> = vec![];

    let mut secret_names: Vec<String> = outputs
        .iter()
        .flat_map(v1::OutputSpec::secret_names)
        .collect();
    secret_names.sort();
    secret_names.dedup();

    for secret_name in secret_names {
        match client
            .get_opt::<Secret>(&secret_name, namespace.as_ref())
            .await
            .context(FetchSecretSnafu {
                secret_name: secret_name.clone(),
            })? {
            Some(secret) => loaded.secrets.insert(secret_name, secret),
            None => {
                tracing::debug!(secret.name = secret_name.as_str(), "Referenced Secret not found");
                missing_secrets.push(secret_name);
            }
        }
    }

    loaded.missing = missing_conditions(outputs, &missing_secrets);

    Ok(loaded)
}

/// Loads the Secrets which are referenced by receiver inputs
///
/// Receiver certificates are only mounted, so a missing Secret is not reported here; the
/// collector pods do not start until it exists.
pub async fn load_receiver_secrets(
    client: &Client,
    namespace: &NamespaceName,
    inputs: &[v1::InputSpec],
    secrets: &mut Secrets,
) -> Result<()> {
    let names = inputs
        .iter()
        .filter_map(|input| input.receiver.as_ref())
        .filter_map(|receiver| receiver.tls.as_ref())
        .flat_map(|tls| tls.secret_names());

    for secret_name in names {
        if secrets.contains(secret_name) {
            continue;
        }
        if let Some(secret) = client
            .get_opt::<Secret>(secret_name, namespace.as_ref())
            .await
            .context(FetchSecretSnafu { secret_name })?
        {
            secrets.insert(secret_name, secret);
        }
    }

    Ok(())
}

/// Fetches the Secrets with the given names, missing ones are skipped
///
/// Legacy outputs are migrated with the Secrets which exist; the migrated outputs are validated
/// afterwards and report the missing ones.
pub async fn load_named(
    client: &Client,
    namespace: &NamespaceName,
    secret_names: &[String],
) -> Result<Secrets> {
    let mut secrets = Secrets::new();
    for secret_name in secret_names {
        if let Some(secret) = client
            .get_opt::<Secret>(secret_name, namespace.as_ref())
            .await
            .context(FetchSecretSnafu { secret_name })?
        {
            secrets.insert(secret_name, secret);
        }
    }
    Ok(secrets)
}

fn missing_conditions(
    outputs: &[v1::OutputSpec],
    missing_secrets: &[String],
) -> BTreeMap<String, StatusCondition> {
    outputs
        .iter()
        .filter_map(|output| {
            let missing: Vec<String> = output
                .secret_names()
                .into_iter()
                .filter(|name| missing_secrets.contains(name))
                .collect();
            (!missing.is_empty()).then(|| {
                (
                    output.name.clone(),
                    StatusCondition::missing_resource(
                        Entry::Output,
                        &output.name,
                        format!("secrets not found: {}", missing.join(", ")),
                    ),
                )
            })
        })
        .collect()
}

/// The value of the given key in the Secret
///
/// `data` takes precedence over `stringData`. Empty values count as absent.
pub fn key_value<'a>(secret: &'a Secret, key: &str) -> Option<&'a [u8]> {
    let from_data = secret
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .map(|value| value.0.as_slice());
    let from_string_data = secret
        .string_data
        .as_ref()
        .and_then(|data| data.get(key))
        .map(|value| value.as_bytes());

    from_data.or(from_string_data).filter(|value| !value.is_empty())
}

/// Returns true if the Secret contains all given keys
pub fn has_keys(secret: &Secret, keys: &[&str]) -> bool {
    keys.iter().all(|key| key_value(secret, key).is_some())
}

pub fn has_username_password(secret: &Secret) -> bool {
    has_keys(secret, &[KEY_USERNAME, KEY_PASSWORD])
}

pub fn has_tls_cert_and_key(secret: &Secret) -> bool {
    has_keys(secret, &[KEY_TLS_CERT, KEY_TLS_KEY])
}

pub fn has_ca_bundle(secret: &Secret) -> bool {
    has_keys(secret, &[KEY_CA_BUNDLE])
}

/// Accepts the legacy spelling `sharedKey` as well
pub fn has_shared_key(secret: &Secret) -> bool {
    has_keys(secret, &[KEY_SHARED_KEY]) || has_keys(secret, &[KEY_SHARED_KEY_LEGACY])
}

pub fn has_passphrase(secret: &Secret) -> bool {
    has_keys(secret, &[KEY_PASSPHRASE])
}

pub fn has_bearer_token_file_key(secret: &Secret) -> bool {
    has_keys(secret, &[KEY_BEARER_TOKEN_FILE])
}

pub fn has_aws_role_arn_key(secret: &Secret) -> bool {
    has_keys(secret, &[KEY_AWS_ROLE_ARN])
}

pub fn has_aws_credentials_key(secret: &Secret) -> bool {
    has_keys(secret, &[KEY_AWS_CREDENTIALS])
}

pub fn has_aws_access_key_id(secret: &Secret) -> bool {
    has_keys(secret, &[KEY_AWS_ACCESS_KEY_ID])
}

pub fn has_aws_secret_access_key(secret: &Secret) -> bool {
    has_keys(secret, &[KEY_AWS_SECRET_ACCESS_KEY])
}

pub fn has_google_application_credentials(secret: &Secret) -> bool {
    has_keys(secret, &[KEY_GOOGLE_APPLICATION_CREDENTIALS])
}

pub fn has_splunk_hec_token(secret: &Secret) -> bool {
    has_keys(secret, &[KEY_SPLUNK_HEC_TOKEN])
}

/// Whitespace does not count as a mechanism
pub fn has_sasl_mechanism(secret: &Secret) -> bool {
    sasl_mechanism(secret).is_some()
}

/// The trimmed SASL mechanism, e.g. `SCRAM-SHA-512`
pub fn sasl_mechanism(secret: &Secret) -> Option<String> {
    key_value(secret, KEY_SASL_MECHANISM)
        .map(|value| String::from_utf8_lossy(value).trim().to_owned())
        .filter(|mechanism| !mechanism.is_empty())
}

/// Test helper which builds a Secret with the given string values in `data`
#[cfg(test)]
pub fn secret_with(name: &str, entries: &[(&str, &str)]) -> Secret {
    use stackable_operator::k8s_openapi::{
        ByteString, apimachinery::pkg::apis::meta::v1::ObjectMeta,
    };

    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_owned()),
            ..ObjectMeta::default()
        },
        data: Some(
            entries
                .iter()
                .map(|(key, value)| (key.to_string(), ByteString(value.as_bytes().to_vec())))
                .collect(),
        ),
        ..Secret::default()
    }
}
