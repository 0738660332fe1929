use std::collections::BTreeSet;

use stackable_operator::k8s_openapi::api::core::v1::Secret;

use super::{
    PluginOps, dotted, insecure_skip_verify, legacy_url, migrate_http_authentication,
    migrate_shell, migrate_tuning, parse_template, parse_url, required_block,
    validate_http_authentication, validate_template, validate_tls, validate_url,
};
use crate::{
    crd::{logging::v1 as legacy, observability::v1},
    generator::{
        self, Context,
        buffer::{BufferOptions, buffer},
        elements::{Block, store_id},
        security::{TlsPaths, bearer_token_path, read_file, secret_reference_path},
        template::Template,
    },
    secrets::Secrets,
};

const LABEL_KUBERNETES_HOST: &str = "kubernetes.host";
const LABEL_TAG: &str = "tag";

/// Labels of the stream if none are configured
pub const DEFAULT_LABEL_KEYS: [&str; 4] = [
    "log_type",
    "kubernetes.namespace_name",
    "kubernetes.pod_name",
    "kubernetes.container_name",
];

/// Labels which are always added
const REQUIRED_LABEL_KEYS: [&str; 2] = [LABEL_KUBERNETES_HOST, LABEL_TAG];

/// Field which holds the evaluated tenant
const TENANT_KEY: &str = "_tenant";

pub struct LokiPlugin;

impl PluginOps for LokiPlugin {
    fn output_type(&self) -> v1::OutputType {
        v1::OutputType::Loki
    }

    fn migrate(&self, output: &legacy::OutputSpec, secret: Option<&Secret>) -> v1::OutputSpec {
        let loki = output.loki.clone().unwrap_or_default();

        v1::OutputSpec {
            loki: Some(v1::Loki {
                url: legacy_url(output),
                authentication: migrate_http_authentication(secret),
                tuning: migrate_tuning(output.tuning.as_ref(), true),
                label_keys: loki.label_keys,
                tenant_key: loki
                    .tenant_key
                    .filter(|key| !key.is_empty())
                    .map(|key| format!(r#"{{{}||"none"}}"#, dotted(&key))),
            }),
            ..migrate_shell(output, v1::OutputType::Loki, secret)
        }
    }

    fn validate(&self, output: &v1::OutputSpec, secrets: &Secrets) -> Vec<String> {
        let Some(loki) = &output.loki else {
            return vec!["loki output requires the loki block".to_owned()];
        };

        let mut messages: Vec<String> = [
            validate_url(&loki.url, &["http", "https"]),
            loki.tenant_key
                .as_deref()
                .and_then(|tenant_key| validate_template("tenantKey", tenant_key)),
        ]
        .into_iter()
        .flatten()
        .collect();
        messages.extend(validate_label_keys(&loki.label_keys));
        messages.extend(validate_http_authentication(
            loki.authentication.as_ref(),
            secrets,
        ));
        messages.extend(validate_tls(output, secrets));
        messages
    }

    fn emit(&self, output: &v1::OutputSpec, ctx: &Context<'_>) -> generator::Result<Vec<Block>> {
        let loki = required_block(output, &output.loki)?;
        let url = parse_url(output, &loki.url)?;
        let tenant = match &loki.tenant_key {
            Some(tenant_key) => Some(parse_template(output, tenant_key)?),
            None => None,
        };

        let label_keys = label_keys(&loki.label_keys);
        let mut blocks = vec![label_filter(&label_keys, tenant.as_ref())];
        blocks.push(sink(
            &LokiSink {
                output,
                url: &url[..url::Position::AfterPath],
                authentication: loki.authentication.as_ref(),
                tuning: loki.tuning.as_ref(),
                tenant: tenant.as_ref(),
                label_keys: &label_keys,
                match_pattern: "**",
                id_suffix: None,
            },
            ctx,
        ));
        Ok(blocks)
    }
}

/// The configured label keys or the defaults, always including the required ones, sorted
pub fn label_keys(configured: &[String]) -> Vec<String> {
    let mut keys: BTreeSet<String> = if configured.is_empty() {
        DEFAULT_LABEL_KEYS.iter().map(|key| key.to_string()).collect()
    } else {
        configured
            .iter()
            .map(|key| key.trim_start_matches('.').to_owned())
            .collect()
    };
    keys.extend(REQUIRED_LABEL_KEYS.iter().map(|key| key.to_string()));
    keys.into_iter().collect()
}

pub fn validate_label_keys(label_keys: &[String]) -> Vec<String> {
    label_keys
        .iter()
        .filter(|key| {
            key.trim_start_matches('.')
                .split('.')
                .any(|segment| segment.is_empty())
        })
        .map(|key| format!("label key {key:?} is not a valid field path"))
        .collect()
}

/// The name of the temporary field which holds the value of a label, e.g. `_kubernetes_host`
fn label_field(key: &str) -> String {
    format!("_{}", key.replace('.', "_"))
}

/// Copies the label values and the tenant into temporary fields which the sink removes
pub fn label_filter(label_keys: &[String], tenant: Option<&Template>) -> Block {
    let record = label_keys
        .iter()
        .fold(Block::new("record"), |record, key| {
            let value = match key.as_str() {
                LABEL_TAG => "${tag}".to_owned(),
                LABEL_KUBERNETES_HOST => r##""#{ENV['NODE_NAME']}""##.to_owned(),
                _ => {
                    let path: Vec<String> = key.split('.').map(str::to_owned).collect();
                    format!("${{{}}}", generator::template::record_dig(&path))
                }
            };
            record.param(&label_field(key), value)
        })
        .param_opt(
            TENANT_KEY,
            tenant
                .filter(|tenant| !tenant.is_static())
                .map(|tenant| format!("${{{}}}", tenant.to_ruby())),
        );

    Block::with_argument("filter", "**")
        .param("@type", "record_modifier")
        .child(record)
}

/// Everything which differs between a Loki output and a tenant of a LokiStack
pub struct LokiSink<'a> {
    pub output: &'a v1::OutputSpec,
    /// The URL without query and fragment
    pub url: &'a str,
    pub authentication: Option<&'a v1::HttpAuthentication>,
    pub tuning: Option<&'a v1::OutputTuningSpec>,
    pub tenant: Option<&'a Template>,
    pub label_keys: &'a [String],
    pub match_pattern: &'a str,
    /// Distinguishes the sinks of one output, e.g. the tenants of a LokiStack
    pub id_suffix: Option<&'a str>,
}

pub fn sink(loki: &LokiSink<'_>, ctx: &Context<'_>) -> Block {
    let paths = TlsPaths::of_output(loki.output.tls.as_ref());
    let dynamic_tenant = loki.tenant.is_some_and(|tenant| !tenant.is_static());
    let id = match loki.id_suffix {
        Some(suffix) => store_id(&format!("{}_{suffix}", loki.output.name)),
        None => store_id(&loki.output.name),
    };

    Block::with_argument("match", loki.match_pattern)
        .param("@type", "loki")
        .param("@id", &id)
        .param("line_format", "json")
        .param("url", loki.url)
        .param_opt(
            "tenant",
            loki.tenant.map(|tenant| match tenant.literal() {
                Some(literal) => literal,
                None => format!("${{{TENANT_KEY}}}"),
            }),
        )
        .when(dynamic_tenant, |block| block.param("remove_keys", TENANT_KEY))
        .param_opt(
            "username",
            loki.authentication
                .and_then(|authentication| authentication.username.as_ref())
                .map(|username| read_file(&secret_reference_path(username))),
        )
        .param_opt(
            "password",
            loki.authentication
                .and_then(|authentication| authentication.password.as_ref())
                .map(|password| read_file(&secret_reference_path(password))),
        )
        .param_opt(
            "bearer_token_file",
            loki.authentication
                .and_then(|authentication| authentication.token.as_ref())
                .map(|token| format!("'{}'", bearer_token_path(token))),
        )
        .param_opt("key", paths.key.as_deref().map(|path| format!("'{path}'")))
        .param_opt(
            "cert",
            paths.certificate.as_deref().map(|path| format!("'{path}'")),
        )
        .param_opt("ca_cert", paths.ca.as_deref().map(|path| format!("'{path}'")))
        .when(insecure_skip_verify(loki.output), |block| {
            block.param("insecure_tls", "true")
        })
        .child(
            Block::new("label").lines(
                loki.label_keys
                    .iter()
                    .map(|key| format!("{} {}", key.replace('.', "_"), label_field(key))),
            ),
        )
        .child(buffer(
            &id,
            ctx.collector_buffer(),
            &BufferOptions {
                keys: if dynamic_tenant {
                    vec![TENANT_KEY.to_owned()]
                } else {
                    vec![]
                },
                tuning: loki.tuning,
                ..BufferOptions::default()
            },
        ))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{LokiPlugin, label_keys};
    use crate::{
        crd::observability::v1,
        generator::test_support::with_context,
        outputs::{PluginOps, test_support::legacy_output},
        secrets::Secrets,
    };

    #[test]
    fn test_migrate_tenant_key() {
        let output = legacy_output(
            "
            name: loki-receiver
            type: loki
            url: https://logs-us-west1.grafana.net/a-tenant
            loki:
              tenantKey: kubernetes.namespace_name
              labelKeys: [kubernetes.labels.app]
            ",
        );

        let loki = LokiPlugin
            .migrate(&output, None)
            .loki
            .expect("should have the loki block");

        assert_eq!(
            Some(r#"{.kubernetes.namespace_name||"none"}"#.to_owned()),
            loki.tenant_key
        );
        assert_eq!(vec!["kubernetes.labels.app".to_owned()], loki.label_keys);
    }

    #[test]
    fn test_label_keys() {
        assert_eq!(
            vec![
                "kubernetes.container_name",
                "kubernetes.host",
                "kubernetes.namespace_name",
                "kubernetes.pod_name",
                "log_type",
                "tag"
            ],
            label_keys(&[])
        );
        assert_eq!(
            vec!["kubernetes.host", "kubernetes.labels.app", "tag"],
            label_keys(&["kubernetes.labels.app".to_owned(), "tag".to_owned()])
        );
    }

    #[test]
    fn test_validate() {
        let output: v1::OutputSpec = serde_yaml::from_str(
            "
            name: loki
            type: loki
            loki:
              url: ftp://loki.example.com
              labelKeys: [kubernetes..name]
            ",
        )
        .expect("should be a valid output");

        assert_eq!(2, LokiPlugin.validate(&output, &Secrets::new()).len());
    }

    #[test]
    fn test_emit() {
        let output: v1::OutputSpec = serde_yaml::from_str(
            r#"
            name: loki-receiver
            type: loki
            loki:
              url: https://logs-us-west1.grafana.net/a-tenant?x=1
              tenantKey: '{.kubernetes.namespace_name||"none"}'
              labelKeys: [kubernetes.labels.app]
              authentication:
                token:
                  from: secret
                  secret:
                    name: a-secret-ref
                    key: token
            "#,
        )
        .expect("should be a valid output");

        let blocks = with_context(|ctx| LokiPlugin.emit(&output, ctx))
            .expect("should emit the loki output");

        assert_eq!(
            concat!(
                "<filter **>\n",
                "  @type record_modifier\n",
                "  <record>\n",
                "    _kubernetes_host \"#{ENV['NODE_NAME']}\"\n",
                "    _kubernetes_labels_app ${record.dig(\"kubernetes\",\"labels\",\"app\")}\n",
                "    _tag ${tag}\n",
                "    _tenant ${(record.dig(\"kubernetes\",\"namespace_name\") || \"none\").to_s}\n",
                "  </record>\n",
                "</filter>\n",
            ),
            blocks[0].to_string()
        );
        let sink = blocks[1].to_string();
        assert!(sink.starts_with(concat!(
            "<match **>\n",
            "  @type loki\n",
            "  @id loki_receiver\n",
            "  line_format json\n",
            "  url https://logs-us-west1.grafana.net/a-tenant\n",
            "  tenant ${_tenant}\n",
            "  remove_keys _tenant\n",
            "  bearer_token_file '/var/run/ocp-collector/secrets/a-secret-ref/token'\n",
            "  <label>\n",
            "    kubernetes_host _kubernetes_host\n",
            "    kubernetes_labels_app _kubernetes_labels_app\n",
            "    tag _tag\n",
            "  </label>\n",
            "  <buffer _tenant>\n",
        )));
    }
}
