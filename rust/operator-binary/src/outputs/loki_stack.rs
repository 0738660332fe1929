//! Output to the gateway of a LokiStack
//!
//! The gateway serves one tenant per log type. Records are retagged by their `log_type` and
//! every tenant gets its own Loki sink.

use stackable_operator::k8s_openapi::api::core::v1::Secret;

use super::{
    PluginOps, legacy_url, migrate_http_authentication, migrate_shell, migrate_tuning,
    required_block, validate_http_authentication, validate_tls,
    loki::{self, LokiSink},
};
use crate::{
    crd::{
        common::{BearerToken, OutputTlsSpec, TlsSpec, ValueReference},
        logging::v1 as legacy,
        observability::v1,
    },
    generator::{self, Context, elements::Block},
    secrets::Secrets,
};

const DEFAULT_NAMESPACE: &str = "openshift-logging";
const GATEWAY_PORT: u16 = 8080;
const TAG_PREFIX: &str = "lokistack";
const SERVICE_CA_KEY: &str = "service-ca.crt";

pub const TENANTS: [&str; 3] = [
    v1::INPUT_NAME_APPLICATION,
    v1::INPUT_NAME_INFRASTRUCTURE,
    v1::INPUT_NAME_AUDIT,
];

pub struct LokiStackPlugin;

impl PluginOps for LokiStackPlugin {
    fn output_type(&self) -> v1::OutputType {
        v1::OutputType::LokiStack
    }

    /// Legacy outputs pointing at a gateway tenant are converted to their LokiStack
    fn migrate(&self, output: &legacy::OutputSpec, secret: Option<&Secret>) -> v1::OutputSpec {
        let loki = output.loki.clone().unwrap_or_default();

        v1::OutputSpec {
            loki_stack: Some(v1::LokiStack {
                authentication: migrate_http_authentication(secret),
                target: target_from_url(&legacy_url(output)).unwrap_or_default(),
                tuning: migrate_tuning(output.tuning.as_ref(), true),
                label_keys: loki.label_keys,
            }),
            ..migrate_shell(output, v1::OutputType::LokiStack, secret)
        }
    }

    fn validate(&self, output: &v1::OutputSpec, secrets: &Secrets) -> Vec<String> {
        let Some(loki_stack) = &output.loki_stack else {
            return vec!["lokiStack output requires the lokiStack block".to_owned()];
        };
        let mut messages = vec![];

        if loki_stack.target.name.trim().is_empty() {
            messages.push("the name of the target LokiStack must not be empty".to_owned());
        }
        messages.extend(loki::validate_label_keys(&loki_stack.label_keys));
        messages.extend(validate_http_authentication(
            loki_stack.authentication.as_ref(),
            secrets,
        ));
        messages.extend(validate_tls(output, secrets));
        messages
    }

    fn emit(&self, output: &v1::OutputSpec, ctx: &Context<'_>) -> generator::Result<Vec<Block>> {
        let loki_stack = required_block(output, &output.loki_stack)?;
        let label_keys = loki::label_keys(&loki_stack.label_keys);
        let service_account_token = v1::HttpAuthentication {
            token: Some(BearerToken::from_service_account()),
            ..v1::HttpAuthentication::default()
        };
        let authentication = loki_stack
            .authentication
            .as_ref()
            .filter(|authentication| *authentication != &v1::HttpAuthentication::default())
            .unwrap_or(&service_account_token);

        let retag = Block::with_argument("match", "**")
            .param("@type", "rewrite_tag_filter")
            .child(
                Block::new("rule")
                    .param("key", "log_type")
                    .param("pattern", format!("^({})$", TENANTS.join("|")))
                    .param("tag", format!("{TAG_PREFIX}.$1")),
            );

        let mut blocks = vec![loki::label_filter(&label_keys, None), retag];
        for tenant in TENANTS {
            let url = gateway_url(&loki_stack.target, tenant);
            let match_pattern = format!("{TAG_PREFIX}.{tenant}");
            blocks.push(loki::sink(
                &LokiSink {
                    output,
                    url: &url,
                    authentication: Some(authentication),
                    tuning: loki_stack.tuning.as_ref(),
                    tenant: None,
                    label_keys: &label_keys,
                    match_pattern: &match_pattern,
                    id_suffix: Some(tenant),
                },
                ctx,
            ));
        }
        Ok(blocks)
    }
}

/// The URL of the tenant on the gateway of the LokiStack
pub fn gateway_url(target: &v1::LokiStackTarget, tenant: &str) -> String {
    let namespace = target
        .namespace
        .as_deref()
        .filter(|namespace| !namespace.is_empty())
        .unwrap_or(DEFAULT_NAMESPACE);
    format!(
        "https://{}-gateway-http.{namespace}.svc:{GATEWAY_PORT}/api/logs/v1/{tenant}",
        target.name
    )
}

/// The LokiStack behind a gateway URL, e.g. `https://lokistack-dev-gateway-http.openshift-logging.svc:8080/api/logs/v1/application`
pub fn target_from_url(url: &str) -> Option<v1::LokiStackTarget> {
    let url = url::Url::parse(url).ok()?;
    let host = url.host_str()?;
    let (service, rest) = host.split_once('.')?;
    let name = service.strip_suffix("-gateway-http")?;
    let namespace = rest.strip_suffix(".svc").unwrap_or(rest);
    url.path()
        .starts_with("/api/logs/v1/")
        .then(|| v1::LokiStackTarget {
            namespace: Some(namespace.to_owned()),
            name: name.to_owned(),
        })
}

/// The output which forwards to the LokiStack of the ClusterLogging log store
///
/// It authenticates with the token of the collector service account and trusts the service CA
/// of the gateway.
pub fn default_output(output_name: &str, loki_stack_name: &str, namespace: &str) -> v1::OutputSpec {
    v1::OutputSpec {
        loki_stack: Some(v1::LokiStack {
            authentication: Some(v1::HttpAuthentication {
                token: Some(BearerToken::from_service_account()),
                ..v1::HttpAuthentication::default()
            }),
            target: v1::LokiStackTarget {
                namespace: Some(namespace.to_owned()),
                name: loki_stack_name.to_owned(),
            },
            ..v1::LokiStack::default()
        }),
        tls: Some(OutputTlsSpec {
            tls: TlsSpec {
                ca: Some(ValueReference {
                    key: SERVICE_CA_KEY.to_owned(),
                    config_map_name: Some(format!("{loki_stack_name}-gateway-ca-bundle")),
                    secret_name: None,
                }),
                ..TlsSpec::default()
            },
            ..OutputTlsSpec::default()
        }),
        ..v1::OutputSpec::new(output_name, v1::OutputType::LokiStack)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{LokiStackPlugin, default_output, gateway_url, target_from_url};
    use crate::{
        crd::observability::v1,
        generator::test_support::with_context,
        outputs::PluginOps,
        secrets::Secrets,
    };

    #[test]
    fn test_gateway_url() {
        let target = v1::LokiStackTarget {
            namespace: None,
            name: "lokistack-dev".to_owned(),
        };

        assert_eq!(
            "https://lokistack-dev-gateway-http.openshift-logging.svc:8080/api/logs/v1/audit",
            gateway_url(&target, "audit")
        );
    }

    #[test]
    fn test_target_from_url() {
        assert_eq!(
            Some(v1::LokiStackTarget {
                namespace: Some("my-logging".to_owned()),
                name: "lokistack-dev".to_owned(),
            }),
            target_from_url(
                "https://lokistack-dev-gateway-http.my-logging.svc:8080/api/logs/v1/application"
            )
        );
        assert_eq!(None, target_from_url("https://loki.example.com/api/logs/v1/application"));
    }

    #[test]
    fn test_default_output_is_valid() {
        let output = default_output("default-lokistack", "lokistack-dev", "openshift-logging");

        assert_eq!(
            Vec::<String>::new(),
            LokiStackPlugin.validate(&output, &Secrets::new())
        );
    }

    #[test]
    fn test_emit_one_sink_per_tenant() {
        let output = default_output("default-lokistack", "lokistack-dev", "openshift-logging");

        let blocks = with_context(|ctx| LokiStackPlugin.emit(&output, ctx))
            .expect("should emit the lokiStack output");

        assert_eq!(5, blocks.len());
        assert_eq!(
            concat!(
                "<match **>\n",
                "  @type rewrite_tag_filter\n",
                "  <rule>\n",
                "    key log_type\n",
                "    pattern ^(application|infrastructure|audit)$\n",
                "    tag lokistack.$1\n",
                "  </rule>\n",
                "</match>\n",
            ),
            blocks[1].to_string()
        );
        assert!(blocks[3].to_string().starts_with(concat!(
            "<match lokistack.infrastructure>\n",
            "  @type loki\n",
            "  @id default_lokistack_infrastructure\n",
            "  line_format json\n",
            "  url https://lokistack-dev-gateway-http.openshift-logging.svc:8080/api/logs/v1/infrastructure\n",
            "  bearer_token_file '/var/run/ocp-collector/serviceaccount/token'\n",
            "  ca_cert '/var/run/ocp-collector/config/lokistack-dev-gateway-ca-bundle/service-ca.crt'\n",
        )));
    }
}
