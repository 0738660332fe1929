use stackable_operator::k8s_openapi::api::core::v1::Secret;

use super::{
    PluginOps, migrate_shell, migrate_tuning, parse_template, required_block, secret_name,
    validate_secret_key, validate_template, validate_tls,
};
use crate::{
    crd::{common::SecretReference, logging::v1 as legacy, observability::v1},
    generator::{
        self, Context,
        buffer::{BufferOptions, buffer},
        elements::{Block, quote, store_id},
        security::secret_reference_path,
    },
    secrets::{self, Secrets},
};

/// Field which holds the evaluated log ID
const LOG_ID_KEY: &str = "_gcl_log_id";

pub struct GoogleCloudLoggingPlugin;

impl PluginOps for GoogleCloudLoggingPlugin {
    fn output_type(&self) -> v1::OutputType {
        v1::OutputType::GoogleCloudLogging
    }

    fn migrate(&self, output: &legacy::OutputSpec, secret: Option<&Secret>) -> v1::OutputSpec {
        let google_cloud_logging = output.google_cloud_logging.clone().unwrap_or_default();
        let authentication = secret
            .filter(|secret| secrets::has_google_application_credentials(secret))
            .and_then(secret_name)
            .map(|name| v1::GoogleCloudLoggingAuthentication {
                credentials: SecretReference::new(
                    name,
                    secrets::KEY_GOOGLE_APPLICATION_CREDENTIALS,
                ),
            });

        v1::OutputSpec {
            google_cloud_logging: Some(v1::GoogleCloudLogging {
                authentication,
                id: migrate_id(&google_cloud_logging),
                log_id: google_cloud_logging.log_id,
                tuning: migrate_tuning(output.tuning.as_ref(), false),
            }),
            ..migrate_shell(output, v1::OutputType::GoogleCloudLogging, secret)
        }
    }

    fn validate(&self, output: &v1::OutputSpec, secrets: &Secrets) -> Vec<String> {
        let Some(google_cloud_logging) = &output.google_cloud_logging else {
            return vec![
                "googleCloudLogging output requires the googleCloudLogging block".to_owned(),
            ];
        };
        let mut messages = vec![];

        if google_cloud_logging.id.value.trim().is_empty() {
            messages.push(format!(
                "the {} ID must not be empty",
                google_cloud_logging.id.type_
            ));
        }
        if google_cloud_logging.log_id.trim().is_empty() {
            messages.push("logId must not be empty".to_owned());
        }
        messages.extend(validate_template("logId", &google_cloud_logging.log_id));
        match &google_cloud_logging.authentication {
            Some(authentication) => {
                messages.extend(validate_secret_key(secrets, &authentication.credentials))
            }
            None => messages.push("googleCloudLogging output requires credentials".to_owned()),
        }

        messages.extend(validate_tls(output, secrets));
        messages
    }

    fn emit(&self, output: &v1::OutputSpec, ctx: &Context<'_>) -> generator::Result<Vec<Block>> {
        let google_cloud_logging = required_block(output, &output.google_cloud_logging)?;
        let log_id = parse_template(output, &google_cloud_logging.log_id)?;

        let log_id_filter = Block::with_argument("filter", "**")
            .param("@type", "record_modifier")
            .child(Block::new("record").param(LOG_ID_KEY, format!("${{{}}}", log_id.to_ruby())));

        let sink = Block::with_argument("match", "**")
            .param("@type", "google_cloud")
            .param("@id", store_id(&output.name))
            .param(
                id_parameter(google_cloud_logging.id.type_),
                quote(&google_cloud_logging.id.value),
            )
            .param("log_name_key", LOG_ID_KEY)
            .param("use_metadata_service", "false")
            .param_opt(
                "credentials_path",
                google_cloud_logging
                    .authentication
                    .as_ref()
                    .map(|authentication| secret_reference_path(&authentication.credentials)),
            )
            .child(buffer(
                &output.name,
                ctx.collector_buffer(),
                &BufferOptions {
                    tuning: google_cloud_logging.tuning.as_ref(),
                    ..BufferOptions::default()
                },
            ));

        Ok(vec![log_id_filter, sink])
    }
}

/// The first ID which is set, in the order billing account, organization, folder and project
fn migrate_id(google_cloud_logging: &legacy::GoogleCloudLogging) -> v1::GoogleCloudLoggingId {
    [
        (
            v1::GoogleCloudLoggingIdType::BillingAccount,
            &google_cloud_logging.billing_account_id,
        ),
        (
            v1::GoogleCloudLoggingIdType::Organization,
            &google_cloud_logging.organization_id,
        ),
        (
            v1::GoogleCloudLoggingIdType::Folder,
            &google_cloud_logging.folder_id,
        ),
        (
            v1::GoogleCloudLoggingIdType::Project,
            &google_cloud_logging.project_id,
        ),
    ]
    .into_iter()
    .find_map(|(type_, value)| {
        value
            .as_ref()
            .filter(|value| !value.is_empty())
            .map(|value| v1::GoogleCloudLoggingId {
                type_,
                value: value.clone(),
            })
    })
    .unwrap_or(v1::GoogleCloudLoggingId {
        type_: v1::GoogleCloudLoggingIdType::Project,
        value: String::new(),
    })
}

fn id_parameter(type_: v1::GoogleCloudLoggingIdType) -> &'static str {
    match type_ {
        v1::GoogleCloudLoggingIdType::BillingAccount => "billing_account_id",
        v1::GoogleCloudLoggingIdType::Folder => "folder_id",
        v1::GoogleCloudLoggingIdType::Organization => "organization_id",
        v1::GoogleCloudLoggingIdType::Project => "project_id",
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::GoogleCloudLoggingPlugin;
    use crate::{
        crd::{common::SecretReference, observability::v1},
        generator::test_support::with_context,
        outputs::{
            PluginOps,
            test_support::{legacy_output, secret},
        },
        secrets::Secrets,
    };

    #[test]
    fn test_migrate_prefers_billing_account() {
        let output = legacy_output(
            "
            name: gcl
            type: googleCloudLogging
            secret:
              name: gcl-secret
            googleCloudLogging:
              billingAccountId: billing
              projectId: project
              logId: my-log
            ",
        );
        let secret = secret("gcl-secret", &["google-application-credentials.json"]);

        let migrated = GoogleCloudLoggingPlugin.migrate(&output, Some(&secret));

        assert_eq!(
            Some(v1::GoogleCloudLogging {
                authentication: Some(v1::GoogleCloudLoggingAuthentication {
                    credentials: SecretReference::new(
                        "gcl-secret",
                        "google-application-credentials.json"
                    ),
                }),
                id: v1::GoogleCloudLoggingId {
                    type_: v1::GoogleCloudLoggingIdType::BillingAccount,
                    value: "billing".to_owned(),
                },
                log_id: "my-log".to_owned(),
                tuning: None,
            }),
            migrated.google_cloud_logging
        );
    }

    #[test]
    fn test_validate_requires_id_and_credentials() {
        let output = GoogleCloudLoggingPlugin.migrate(
            &legacy_output(
                "
                name: gcl
                type: googleCloudLogging
                googleCloudLogging:
                  logId: my-log
                ",
            ),
            None,
        );

        assert_eq!(
            2,
            GoogleCloudLoggingPlugin
                .validate(&output, &Secrets::new())
                .len()
        );
    }

    #[test]
    fn test_emit() {
        let output: v1::OutputSpec = serde_yaml::from_str(
            "
            name: gcl
            type: googleCloudLogging
            googleCloudLogging:
              id:
                type: project
                value: my-project
              logId: '{.log_type}'
              authentication:
                credentials:
                  key: google-application-credentials.json
                  secretName: gcl-secret
            ",
        )
        .expect("should be a valid output");

        let blocks = with_context(|ctx| GoogleCloudLoggingPlugin.emit(&output, ctx))
            .expect("should emit the googleCloudLogging output");

        assert!(
            blocks[0]
                .to_string()
                .contains(r#"_gcl_log_id ${record.dig("log_type").to_s}"#)
        );
        assert!(blocks[1].to_string().starts_with(concat!(
            "<match **>\n",
            "  @type google_cloud\n",
            "  @id gcl\n",
            "  project_id \"my-project\"\n",
            "  log_name_key _gcl_log_id\n",
            "  use_metadata_service false\n",
            "  credentials_path /var/run/ocp-collector/secrets/gcl-secret/google-application-credentials.json\n",
        )));
    }
}
