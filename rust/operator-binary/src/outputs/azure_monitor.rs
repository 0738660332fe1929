use std::{borrow::Cow, sync::LazyLock};

use regex::Regex;
use stackable_operator::k8s_openapi::api::core::v1::Secret;

use super::{
    PluginOps, migrate_shell, migrate_tuning, required_block, secret_name, validate_secret_key,
    validate_tls,
};
use crate::{
    crd::{common::SecretReference, logging::v1 as legacy, observability::v1},
    generator::{
        self, Context,
        buffer::{BufferOptions, buffer},
        elements::{Block, store_id},
        security::{read_file, secret_reference_path},
    },
    secrets::{self, Secrets},
};

const DEFAULT_HOST: &str = "ods.opinsights.azure.com";

/// Letters, digits and underscores, at most 100 characters
static LOG_TYPE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9_]{1,100}$").expect("failed to compile the log type regex")
});

pub struct AzureMonitorPlugin;

impl PluginOps for AzureMonitorPlugin {
    fn output_type(&self) -> v1::OutputType {
        v1::OutputType::AzureMonitor
    }

    fn migrate(&self, output: &legacy::OutputSpec, secret: Option<&Secret>) -> v1::OutputSpec {
        let azure_monitor = output.azure_monitor.clone().unwrap_or_default();
        let authentication = secret.and_then(|secret| {
            let name = secret_name(secret)?;
            Some(v1::AzureMonitorAuthentication {
                shared_key: secrets::has_shared_key(secret)
                    .then(|| SecretReference::new(name, secrets::KEY_SHARED_KEY)),
            })
        });

        v1::OutputSpec {
            azure_monitor: Some(v1::AzureMonitor {
                authentication,
                customer_id: azure_monitor.customer_id,
                log_type: azure_monitor.log_type,
                azure_resource_id: azure_monitor.azure_resource_id,
                host: azure_monitor.host,
                tuning: migrate_tuning(output.tuning.as_ref(), false),
            }),
            ..migrate_shell(output, v1::OutputType::AzureMonitor, secret)
        }
    }

    fn validate(&self, output: &v1::OutputSpec, secrets: &Secrets) -> Vec<String> {
        let Some(azure_monitor) = &output.azure_monitor else {
            return vec!["azureMonitor output requires the azureMonitor block".to_owned()];
        };
        let mut messages = vec![];

        if azure_monitor.customer_id.trim().is_empty() {
            messages.push("customerId must not be empty".to_owned());
        }
        if !LOG_TYPE_REGEX.is_match(&azure_monitor.log_type) {
            messages.push(format!(
                "logType {:?} must consist of at most 100 letters, digits or underscores",
                azure_monitor.log_type
            ));
        }
        match shared_key(azure_monitor) {
            Some(reference) => {
                messages.extend(validate_secret_key(
                    secrets,
                    &effective_shared_key(reference, secrets),
                ));
            }
            None => messages.push("azureMonitor output requires a shared key".to_owned()),
        }

        messages.extend(validate_tls(output, secrets));
        messages
    }

    fn emit(&self, output: &v1::OutputSpec, ctx: &Context<'_>) -> generator::Result<Vec<Block>> {
        let azure_monitor = required_block(output, &output.azure_monitor)?;

        let sink = Block::with_argument("match", "**")
            .param("@type", "azure-loganalytics")
            .param("@id", store_id(&output.name))
            .param("customer_id", &azure_monitor.customer_id)
            .param_opt(
                "shared_key",
                shared_key(azure_monitor).map(|reference| {
                    read_file(&secret_reference_path(&effective_shared_key(
                        reference,
                        ctx.secrets,
                    )))
                }),
            )
            .param("log_type", &azure_monitor.log_type)
            .param(
                "endpoint",
                azure_monitor
                    .host
                    .as_deref()
                    .filter(|host| !host.is_empty())
                    .unwrap_or(DEFAULT_HOST),
            )
            .param_opt(
                "azure_resource_id",
                azure_monitor
                    .azure_resource_id
                    .as_deref()
                    .filter(|id| !id.is_empty()),
            )
            .param("add_time_field", "true")
            .param("time_field_name", "time_generated")
            .param("time_format", "%Y-%m-%dT%H:%M:%S.%NZ")
            .param("add_tag_field", "true")
            .param("tag_field_name", "tag")
            .child(buffer(
                &output.name,
                ctx.collector_buffer(),
                &BufferOptions {
                    tuning: azure_monitor.tuning.as_ref(),
                    ..BufferOptions::default()
                },
            ));

        Ok(vec![sink])
    }
}

fn shared_key(azure_monitor: &v1::AzureMonitor) -> Option<&SecretReference> {
    azure_monitor
        .authentication
        .as_ref()
        .and_then(|authentication| authentication.shared_key.as_ref())
}

/// Secrets of migrated forwarders may still store the key under its legacy spelling
fn effective_shared_key<'a>(
    reference: &'a SecretReference,
    secrets: &Secrets,
) -> Cow<'a, SecretReference> {
    let legacy_spelling =
        SecretReference::new(&reference.secret_name, secrets::KEY_SHARED_KEY_LEGACY);
    if reference.key == secrets::KEY_SHARED_KEY
        && secrets.value(reference).is_none()
        && secrets.value(&legacy_spelling).is_some()
    {
        Cow::Owned(legacy_spelling)
    } else {
        Cow::Borrowed(reference)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::AzureMonitorPlugin;
    use crate::{
        crd::{common::SecretReference, observability::v1},
        generator::test_support::with_context,
        outputs::{
            PluginOps,
            test_support::{legacy_output, secret_with},
        },
        secrets::Secrets,
    };

    fn migrated() -> v1::OutputSpec {
        let output = legacy_output(
            "
            name: az
            type: azureMonitor
            secret:
              name: my-secret
            azureMonitor:
              customerId: cust
              logType: app
              azureResourceId: my-id
              host: my-host
            tuning:
              delivery: AtLeastOnce
            ",
        );
        let secret = secret_with("my-secret", &[("sharedKey", "shared-key")]);

        AzureMonitorPlugin.migrate(&output, Some(&secret))
    }

    #[test]
    fn test_migrate() {
        assert_eq!(
            Some(v1::AzureMonitor {
                authentication: Some(v1::AzureMonitorAuthentication {
                    shared_key: Some(SecretReference::new("my-secret", "shared_key")),
                }),
                customer_id: "cust".to_owned(),
                log_type: "app".to_owned(),
                azure_resource_id: Some("my-id".to_owned()),
                host: Some("my-host".to_owned()),
                tuning: Some(v1::OutputTuningSpec {
                    delivery: Some(v1::DeliveryMode::AtLeastOnce),
                    ..v1::OutputTuningSpec::default()
                }),
            }),
            migrated().azure_monitor
        );
    }

    #[test]
    fn test_legacy_key_spelling_is_accepted() {
        let secrets: Secrets = [(
            "my-secret".to_owned(),
            secret_with("my-secret", &[("sharedKey", "shared-key")]),
        )]
        .into_iter()
        .collect();

        assert_eq!(
            Vec::<String>::new(),
            AzureMonitorPlugin.validate(&migrated(), &secrets)
        );
    }

    #[test]
    fn test_validate_log_type() {
        let mut output = migrated();
        if let Some(azure_monitor) = output.azure_monitor.as_mut() {
            azure_monitor.log_type = "my-type".to_owned();
        }

        assert_eq!(1, AzureMonitorPlugin.validate(&output, &Secrets::new()).len());
    }

    #[test]
    fn test_emit() {
        let blocks = with_context(|ctx| AzureMonitorPlugin.emit(&migrated(), ctx))
            .expect("should emit the azureMonitor output");

        let sink = blocks[0].to_string();
        assert!(sink.starts_with(concat!(
            "<match **>\n",
            "  @type azure-loganalytics\n",
            "  @id az\n",
            "  customer_id cust\n",
            "  shared_key \"#{File.exists?('/var/run/ocp-collector/secrets/my-secret/shared_key') ? open('/var/run/ocp-collector/secrets/my-secret/shared_key','r') do |f|f.read.chomp end : ''}\"\n",
            "  log_type app\n",
            "  endpoint my-host\n",
            "  azure_resource_id my-id\n",
        )));
    }
}
