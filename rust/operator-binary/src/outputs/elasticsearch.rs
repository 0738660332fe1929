use stackable_operator::k8s_openapi::api::core::v1::Secret;

use super::{
    PluginOps, bearer_header_value, compression, insecure_skip_verify, legacy_url,
    migrate_http_authentication, migrate_shell, migrate_tuning, min_tls_version, parse_template,
    parse_url, required_block, validate_http_authentication, validate_template, validate_tls,
    validate_url,
};
use crate::{
    crd::{
        logging::{DEFAULT_ELASTICSEARCH_VERSION, v1 as legacy},
        observability::v1,
    },
    generator::{
        self, Context,
        buffer::{BufferOptions, buffer},
        elements::{Block, quote, store_id},
        security::{TlsPaths, read_file, secret_reference_path},
    },
    secrets::Secrets,
};

pub const DEFAULT_INDEX: &str = r#"{.log_type||"none"}"#;
const DEFAULT_PORT: u16 = 9200;

/// Field which holds the evaluated index template
const INDEX_KEY: &str = "viaq_index_name";

pub struct ElasticsearchPlugin;

impl PluginOps for ElasticsearchPlugin {
    fn output_type(&self) -> v1::OutputType {
        v1::OutputType::Elasticsearch
    }

    fn migrate(&self, output: &legacy::OutputSpec, secret: Option<&Secret>) -> v1::OutputSpec {
        let structured = output
            .elasticsearch
            .as_ref()
            .map(|elasticsearch| &elasticsearch.structured);
        let index = match structured.map(|structured| {
            (
                structured.structured_type_key.as_deref(),
                structured.structured_type_name.as_deref(),
            )
        }) {
            Some((Some(key), Some(name))) if !key.is_empty() && !name.is_empty() => {
                format!("{{{}||{name:?}}}", super::dotted(key))
            }
            _ => DEFAULT_INDEX.to_owned(),
        };

        v1::OutputSpec {
            elasticsearch: Some(v1::Elasticsearch {
                url: legacy_url(output),
                authentication: migrate_http_authentication(secret),
                tuning: migrate_tuning(output.tuning.as_ref(), true),
                index,
                version: output
                    .elasticsearch
                    .as_ref()
                    .and_then(|elasticsearch| elasticsearch.version)
                    .unwrap_or(DEFAULT_ELASTICSEARCH_VERSION),
            }),
            ..migrate_shell(output, v1::OutputType::Elasticsearch, secret)
        }
    }

    fn validate(&self, output: &v1::OutputSpec, secrets: &Secrets) -> Vec<String> {
        let Some(elasticsearch) = &output.elasticsearch else {
            return vec!["elasticsearch output requires the elasticsearch block".to_owned()];
        };

        let mut messages: Vec<String> = [
            validate_url(&elasticsearch.url, &["http", "https"]),
            validate_template("index", &elasticsearch.index),
        ]
        .into_iter()
        .flatten()
        .collect();
        if elasticsearch.version < 6 {
            messages.push(format!(
                "Elasticsearch version {} is not supported, the minimum is 6",
                elasticsearch.version
            ));
        }
        messages.extend(validate_http_authentication(
            elasticsearch.authentication.as_ref(),
            secrets,
        ));
        messages.extend(validate_tls(output, secrets));
        messages
    }

    fn emit(&self, output: &v1::OutputSpec, ctx: &Context<'_>) -> generator::Result<Vec<Block>> {
        let elasticsearch = required_block(output, &output.elasticsearch)?;
        let url = parse_url(output, &elasticsearch.url)?;
        let index = parse_template(output, &elasticsearch.index)?;
        let id = store_id(&output.name);
        let retry_id = format!("retry_{id}");

        let index_filter = Block::with_argument("filter", "**")
            .param("@type", "record_modifier")
            .child(
                Block::new("record").param(INDEX_KEY, format!("${{{}}}", index.to_ruby())),
            );

        let sink = |plugin_id: &str, retry_tag: Option<&str>| {
            let paths = TlsPaths::of_output(output.tls.as_ref());
            let authentication = elasticsearch.authentication.as_ref();
            let pattern = if retry_tag.is_some() {
                "**"
            } else {
                retry_id.as_str()
            };
            Block::with_argument("match", pattern)
                .param("@type", "elasticsearch")
                .param("@id", plugin_id)
                .param("host", url.host_str().unwrap_or_default())
                .param("port", url.port().unwrap_or(DEFAULT_PORT))
                .param("scheme", url.scheme())
                .when(url.scheme() == "https", |block| {
                    block
                        .param_opt("client_key", paths.key.as_deref())
                        .param_opt("client_cert", paths.certificate.as_deref())
                        .param_opt("ca_file", paths.ca.as_deref())
                        .param_opt(
                            "client_key_pass",
                            paths.key_passphrase.as_deref().map(read_file),
                        )
                        .when(insecure_skip_verify(output), |block| {
                            block.param("ssl_verify", "false")
                        })
                        .param_opt("ssl_min_version", min_tls_version(output))
                })
                .param_opt(
                    "user",
                    authentication
                        .and_then(|authentication| authentication.username.as_ref())
                        .map(|username| read_file(&secret_reference_path(username))),
                )
                .param_opt(
                    "password",
                    authentication
                        .and_then(|authentication| authentication.password.as_ref())
                        .map(|password| read_file(&secret_reference_path(password))),
                )
                .param_opt(
                    "custom_headers",
                    authentication
                        .and_then(|authentication| authentication.token.as_ref())
                        .map(|token| {
                            let headers = serde_json::json!({
                                "Authorization": bearer_header_value(token)
                            });
                            quote(&headers.to_string())
                        }),
                )
                .param("target_index_key", INDEX_KEY)
                .param("id_key", "viaq_msg_id")
                .param("remove_keys", INDEX_KEY)
                .when(elasticsearch.version >= 8, |block| {
                    block.param("suppress_type_name", "true")
                })
                .when(elasticsearch.version < 8, |block| {
                    block
                        .param("verify_es_version_at_startup", "false")
                        .param("type_name", "_doc")
                })
                .param_opt("retry_tag", retry_tag)
                .param_opt(
                    "compression_level",
                    compression(elasticsearch.tuning.as_ref()).map(|_| "default_compression"),
                )
                .param("http_backend", "typhoeus")
                .param("write_operation", "create")
                .param("reload_connections", "'true'")
                .param("reload_after", "'200'")
                .param(
                    "sniffer_class_name",
                    "'Fluent::Plugin::ElasticsearchSimpleSniffer'",
                )
                .param("reload_on_failure", "false")
                .param("request_timeout", "2147483648")
                .child(buffer(
                    &output.name,
                    ctx.collector_buffer(),
                    &BufferOptions {
                        tuning: elasticsearch.tuning.as_ref(),
                        ..BufferOptions::default()
                    },
                ))
        };

        Ok(vec![
            index_filter,
            sink(&retry_id, None),
            sink(&id, Some(&retry_id)),
        ])
    }
}
