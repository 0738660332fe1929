use std::sync::LazyLock;

use regex::Regex;
use stackable_operator::k8s_openapi::api::core::v1::Secret;

use super::{
    PluginOps, migrate_shell, migrate_tuning, parse_template, required_block, secret_name,
    validate_secret_key, validate_template, validate_tls, validate_url,
};
use crate::{
    crd::{
        common::{BearerToken, SecretReference},
        logging::v1 as legacy,
        observability::v1,
    },
    generator::{
        self, Context,
        buffer::{BufferOptions, buffer},
        elements::{Block, quote},
        security::{bearer_token_path, secret_reference_path},
    },
    secrets::{self, Secrets},
};

/// Prefix of the group name if the legacy output does not set one
const DEFAULT_GROUP_PREFIX: &str = r#"{.openshift.cluster_id||"none"}"#;

const ROLE_SESSION_NAME: &str = "cluster-logging";

static ROLE_ARN_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(arn:aws:(iam|sts)::\d{12}:role/\S+)\s?")
        .expect("failed to compile the role ARN regex")
});

pub struct CloudwatchPlugin;

impl PluginOps for CloudwatchPlugin {
    fn output_type(&self) -> v1::OutputType {
        v1::OutputType::Cloudwatch
    }

    fn migrate(&self, output: &legacy::OutputSpec, secret: Option<&Secret>) -> v1::OutputSpec {
        let cloudwatch = output.cloudwatch.clone().unwrap_or_default();

        v1::OutputSpec {
            cloudwatch: Some(v1::Cloudwatch {
                url: output.url.clone().filter(|url| !url.is_empty()),
                authentication: secret.and_then(migrate_authentication),
                tuning: migrate_tuning(output.tuning.as_ref(), true),
                region: cloudwatch.region,
                group_name: group_name(cloudwatch.group_prefix.as_deref(), cloudwatch.group_by),
            }),
            ..migrate_shell(output, v1::OutputType::Cloudwatch, secret)
        }
    }

    fn validate(&self, output: &v1::OutputSpec, secrets: &Secrets) -> Vec<String> {
        let Some(cloudwatch) = &output.cloudwatch else {
            return vec!["cloudwatch output requires the cloudwatch block".to_owned()];
        };

        let mut messages: Vec<String> = [
            cloudwatch
                .url
                .as_deref()
                .and_then(|url| validate_url(url, &["http", "https"])),
            validate_template("groupName", &cloudwatch.group_name),
            cloudwatch
                .region
                .trim()
                .is_empty()
                .then(|| "region must not be empty".to_owned()),
        ]
        .into_iter()
        .flatten()
        .collect();

        match &cloudwatch.authentication {
            None => messages.push("cloudwatch output requires authentication".to_owned()),
            Some(v1::CloudwatchAuthentication {
                type_: v1::CloudwatchAuthType::AccessKey,
                aws_access_key: Some(access_key),
                ..
            }) => messages.extend(
                [&access_key.key_id, &access_key.key_secret]
                    .into_iter()
                    .filter_map(|reference| validate_secret_key(secrets, reference)),
            ),
            Some(v1::CloudwatchAuthentication {
                type_: v1::CloudwatchAuthType::IamRole,
                iam_role: Some(iam_role),
                ..
            }) => {
                messages.extend(validate_secret_key(secrets, &iam_role.role_arn));
                if let Some(value) = secrets.value(&iam_role.role_arn) {
                    if parse_role_arn(&String::from_utf8_lossy(value)).is_none() {
                        messages.push(format!(
                            "secret {:?} does not contain a valid role ARN under the key {:?}",
                            iam_role.role_arn.secret_name, iam_role.role_arn.key
                        ));
                    }
                }
                if let Some(secret) = &iam_role.token.secret {
                    messages.extend(validate_secret_key(
                        secrets,
                        &SecretReference::new(&secret.name, &secret.key),
                    ));
                }
            }
            Some(authentication) => messages.push(format!(
                "authentication of type {} requires the corresponding block",
                authentication.type_
            )),
        }

        messages.extend(validate_tls(output, secrets));
        messages
    }

    fn emit(&self, output: &v1::OutputSpec, ctx: &Context<'_>) -> generator::Result<Vec<Block>> {
        let cloudwatch = required_block(output, &output.cloudwatch)?;
        let group_name = parse_template(output, &cloudwatch.group_name)?;

        let group_and_stream = Block::with_argument("filter", "**")
            .param("@type", "record_modifier")
            .child(
                Block::new("record")
                    .param("cw_group_name", format!("${{{}}}", group_name.to_ruby()))
                    .param(
                        "cw_stream_name",
                        r##"${record['log_type'] == 'application' ? tag : "#{record['hostname']}.#{tag}"}"##,
                    ),
            );

        let sink = Block::with_argument("match", "**")
            .param("@type", "cloudwatch_logs")
            .param("auto_create_stream", "true")
            .param("region", &cloudwatch.region)
            .param("log_group_name_key", "cw_group_name")
            .param("log_stream_name_key", "cw_stream_name")
            .param("remove_log_stream_name_key", "true")
            .param("remove_log_group_name_key", "true")
            .param("concurrency", 2);
        let sink = with_credentials(sink, cloudwatch, ctx.secrets)
            .param("include_time_key", "true")
            .param("log_rejected_request", "true")
            .when(cloudwatch.url.is_some(), |block| {
                block
                    .param_opt("endpoint", cloudwatch.url.as_deref())
                    .param("ssl_verify_peer", "false")
            })
            .child(buffer(
                &output.name,
                ctx.collector_buffer(),
                &BufferOptions {
                    tuning: cloudwatch.tuning.as_ref(),
                    disable_chunk_backup: true,
                    ..BufferOptions::default()
                },
            ));

        Ok(vec![group_and_stream, sink])
    }
}

/// The log group of the records, e.g. `prefix.{.log_type||"none"}`
fn group_name(prefix: Option<&str>, group_by: Option<legacy::LogGroupByType>) -> String {
    let prefix = prefix
        .map(str::trim)
        .filter(|prefix| !prefix.is_empty())
        .unwrap_or(DEFAULT_GROUP_PREFIX);
    let field = match group_by {
        Some(legacy::LogGroupByType::LogType) | None => ".log_type",
        Some(legacy::LogGroupByType::NamespaceName) => ".kubernetes.namespace_name",
        Some(legacy::LogGroupByType::NamespaceUuid) => ".kubernetes.namespace_uid",
    };
    format!(r#"{prefix}.{{{field}||"none"}}"#)
}

/// A role ARN in the Secret selects the IAM role, otherwise a complete access key is used
fn migrate_authentication(secret: &Secret) -> Option<v1::CloudwatchAuthentication> {
    let name = secret_name(secret)?;

    if secrets::has_aws_role_arn_key(secret) || secrets::has_aws_credentials_key(secret) {
        let role_key = if secrets::has_aws_credentials_key(secret) {
            secrets::KEY_AWS_CREDENTIALS
        } else {
            secrets::KEY_AWS_ROLE_ARN
        };
        let token = if secrets::has_bearer_token_file_key(secret) {
            BearerToken::from_secret(name, secrets::KEY_BEARER_TOKEN_FILE)
        } else {
            BearerToken::from_service_account()
        };
        return Some(v1::CloudwatchAuthentication {
            type_: v1::CloudwatchAuthType::IamRole,
            aws_access_key: None,
            iam_role: Some(v1::CloudwatchIamRole {
                role_arn: SecretReference::new(name, role_key),
                token,
            }),
        });
    }

    if secrets::has_aws_access_key_id(secret) && secrets::has_aws_secret_access_key(secret) {
        return Some(v1::CloudwatchAuthentication {
            type_: v1::CloudwatchAuthType::AccessKey,
            aws_access_key: Some(v1::CloudwatchAccessKey {
                key_id: SecretReference::new(name, secrets::KEY_AWS_ACCESS_KEY_ID),
                key_secret: SecretReference::new(name, secrets::KEY_AWS_SECRET_ACCESS_KEY),
            }),
            iam_role: None,
        });
    }

    None
}

/// Extracts the role ARN from a value which may also contain a complete credentials file
pub fn parse_role_arn(value: &str) -> Option<String> {
    ROLE_ARN_REGEX
        .captures(value)
        .and_then(|captures| captures.get(1))
        .map(|role_arn| role_arn.as_str().to_owned())
}

/// Adds either the static access key or the web identity credentials to the sink
fn with_credentials(sink: Block, cloudwatch: &v1::Cloudwatch, secrets: &Secrets) -> Block {
    let Some(authentication) = &cloudwatch.authentication else {
        return sink;
    };

    match (
        authentication.type_,
        &authentication.aws_access_key,
        &authentication.iam_role,
    ) {
        (v1::CloudwatchAuthType::AccessKey, Some(access_key), _) => sink
            .param("aws_key_id", read_stripped(&access_key.key_id))
            .param("aws_sec_key", read_stripped(&access_key.key_secret)),
        (v1::CloudwatchAuthType::IamRole, _, Some(iam_role)) => {
            let role_arn = secrets
                .value(&iam_role.role_arn)
                .and_then(|value| parse_role_arn(&String::from_utf8_lossy(value)))
                .unwrap_or_default();
            sink.child(
                Block::new("web_identity_credentials")
                    .param("role_arn", quote(&role_arn))
                    .param(
                        "web_identity_token_file",
                        quote(&bearer_token_path(&iam_role.token)),
                    )
                    .param("role_session_name", quote(ROLE_SESSION_NAME)),
            )
        }
        _ => sink,
    }
}

fn read_stripped(reference: &SecretReference) -> String {
    let path = secret_reference_path(reference);
    format!("\"#{{open('{path}','r') do |f|f.read.strip end}}\"")
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{CloudwatchPlugin, parse_role_arn};
    use crate::{
        crd::{
            common::{BearerToken, SecretReference},
            observability::v1,
        },
        generator::test_support::with_context,
        outputs::{
            PluginOps,
            test_support::{legacy_output, secret},
        },
    };

    #[test]
    fn test_migrate_access_key() {
        let output = legacy_output(
            "
            name: cw
            type: cloudwatch
            secret:
              name: cw-secret
            cloudwatch:
              region: us-east-1
              groupBy: logType
              groupPrefix: prefix
            ",
        );
        let secret = secret(
            "cw-secret",
            &["aws_access_key_id", "aws_secret_access_key"],
        );

        let migrated = CloudwatchPlugin.migrate(&output, Some(&secret));

        let cloudwatch = migrated.cloudwatch.expect("should have the cloudwatch block");
        assert_eq!(r#"prefix.{.log_type||"none"}"#, cloudwatch.group_name);
        assert_eq!(
            Some(v1::CloudwatchAuthentication {
                type_: v1::CloudwatchAuthType::AccessKey,
                aws_access_key: Some(v1::CloudwatchAccessKey {
                    key_id: SecretReference::new("cw-secret", "aws_access_key_id"),
                    key_secret: SecretReference::new("cw-secret", "aws_secret_access_key"),
                }),
                iam_role: None,
            }),
            cloudwatch.authentication
        );
    }

    #[test]
    fn test_migrate_iam_role_with_token() {
        let output = legacy_output(
            "
            name: cw
            type: cloudwatch
            secret:
              name: cw-secret
            cloudwatch:
              region: us-east-1
              groupBy: namespaceName
            ",
        );
        let secret = secret("cw-secret", &["role_arn", "bearer_token_file"]);

        let migrated = CloudwatchPlugin.migrate(&output, Some(&secret));

        let cloudwatch = migrated.cloudwatch.expect("should have the cloudwatch block");
        assert_eq!(
            r#"{.openshift.cluster_id||"none"}.{.kubernetes.namespace_name||"none"}"#,
            cloudwatch.group_name
        );
        assert_eq!(
            Some(v1::CloudwatchAuthentication {
                type_: v1::CloudwatchAuthType::IamRole,
                aws_access_key: None,
                iam_role: Some(v1::CloudwatchIamRole {
                    role_arn: SecretReference::new("cw-secret", "role_arn"),
                    token: BearerToken::from_secret("cw-secret", "bearer_token_file"),
                }),
            }),
            cloudwatch.authentication
        );
    }

    #[test]
    fn test_parse_role_arn() {
        assert_eq!(
            Some("arn:aws:iam::123456789012:role/my-role".to_owned()),
            parse_role_arn("arn:aws:iam::123456789012:role/my-role")
        );
        assert_eq!(
            Some("arn:aws:sts::123456789012:role/my-role".to_owned()),
            parse_role_arn(
                "[default]\nrole_arn = arn:aws:sts::123456789012:role/my-role\nweb_identity_token_file = /t"
            )
        );
        assert_eq!(None, parse_role_arn("arn:aws:iam::123:role/short-account"));
    }

    #[test]
    fn test_emit_access_key() {
        let output: v1::OutputSpec = serde_yaml::from_str(
            r#"
            name: cw
            type: cloudwatch
            cloudwatch:
              region: us-east-1
              groupName: 'app.{.log_type||"none"}'
              authentication:
                type: accessKey
                awsAccessKey:
                  keyID:
                    key: aws_access_key_id
                    secretName: cw-secret
                  keySecret:
                    key: aws_secret_access_key
                    secretName: cw-secret
            "#,
        )
        .expect("should be a valid output");

        let blocks = with_context(|ctx| CloudwatchPlugin.emit(&output, ctx))
            .expect("should emit the cloudwatch output");

        assert_eq!(2, blocks.len());
        assert!(blocks[0].to_string().contains(
            r#"cw_group_name ${"app." + (record.dig("log_type") || "none").to_s}"#
        ));
        let sink = blocks[1].to_string();
        assert!(sink.contains(concat!(
            "  concurrency 2\n",
            "  aws_key_id \"#{open('/var/run/ocp-collector/secrets/cw-secret/aws_access_key_id','r') do |f|f.read.strip end}\"\n",
            "  aws_sec_key \"#{open('/var/run/ocp-collector/secrets/cw-secret/aws_secret_access_key','r') do |f|f.read.strip end}\"\n",
            "  include_time_key true\n",
        )));
        assert!(!sink.contains("endpoint"));
        assert!(sink.contains("    disable_chunk_backup true\n"));
    }
}
