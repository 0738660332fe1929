use stackable_operator::k8s_openapi::api::core::v1::Secret;

use super::{
    PluginOps, compression, dotted, insecure_skip_verify, legacy_url, migrate_shell,
    migrate_tuning, parse_template, parse_url, required_block, secret_name, validate_secret_key,
    validate_template, validate_tls, validate_url,
};
use crate::{
    crd::{common::SecretReference, logging::v1 as legacy, observability::v1},
    generator::{
        self, Context,
        buffer::{BufferOptions, buffer},
        elements::{Block, store_id},
        security::{TlsPaths, read_file, secret_reference_path},
    },
    secrets::{self, Secrets},
};

/// Field which holds the evaluated index
const INDEX_KEY: &str = "_splunk_index";

pub struct SplunkPlugin;

impl PluginOps for SplunkPlugin {
    fn output_type(&self) -> v1::OutputType {
        v1::OutputType::Splunk
    }

    fn migrate(&self, output: &legacy::OutputSpec, secret: Option<&Secret>) -> v1::OutputSpec {
        let splunk = output.splunk.clone().unwrap_or_default();
        let authentication = secret
            .filter(|secret| secrets::has_splunk_hec_token(secret))
            .and_then(secret_name)
            .map(|name| v1::SplunkAuthentication {
                token: SecretReference::new(name, secrets::KEY_SPLUNK_HEC_TOKEN),
            });
        let index = match (splunk.index_key, splunk.index_name) {
            (Some(key), _) if !key.is_empty() => Some(format!(r#"{{{}||""}}"#, dotted(&key))),
            (_, Some(name)) if !name.is_empty() => Some(name),
            _ => None,
        };

        v1::OutputSpec {
            splunk: Some(v1::Splunk {
                url: legacy_url(output),
                authentication,
                tuning: migrate_tuning(output.tuning.as_ref(), true),
                index,
            }),
            ..migrate_shell(output, v1::OutputType::Splunk, secret)
        }
    }

    fn validate(&self, output: &v1::OutputSpec, secrets: &Secrets) -> Vec<String> {
        let Some(splunk) = &output.splunk else {
            return vec!["splunk output requires the splunk block".to_owned()];
        };

        let mut messages: Vec<String> = [
            validate_url(&splunk.url, &["http", "https"]),
            splunk
                .index
                .as_deref()
                .and_then(|index| validate_template("index", index)),
        ]
        .into_iter()
        .flatten()
        .collect();
        match &splunk.authentication {
            Some(authentication) => {
                messages.extend(validate_secret_key(secrets, &authentication.token))
            }
            None => messages.push("splunk output requires a HEC token".to_owned()),
        }
        messages.extend(validate_tls(output, secrets));
        messages
    }

    fn emit(&self, output: &v1::OutputSpec, ctx: &Context<'_>) -> generator::Result<Vec<Block>> {
        let splunk = required_block(output, &output.splunk)?;
        let url = parse_url(output, &splunk.url)?;
        let index = match splunk.index.as_deref().filter(|index| !index.is_empty()) {
            Some(index) => Some(parse_template(output, index)?),
            None => None,
        };
        let paths = TlsPaths::of_output(output.tls.as_ref());
        let dynamic_index = index.as_ref().filter(|index| !index.is_static());

        let mut blocks = vec![];
        if let Some(index) = dynamic_index {
            blocks.push(
                Block::with_argument("filter", "**")
                    .param("@type", "record_modifier")
                    .child(
                        Block::new("record").param(INDEX_KEY, format!("${{{}}}", index.to_ruby())),
                    ),
            );
        }

        blocks.push(
            Block::with_argument("match", "**")
                .param("@type", "splunk_hec")
                .param("@id", store_id(&output.name))
                .param("protocol", url.scheme())
                .param("hec_host", url.host_str().unwrap_or_default())
                .param_opt("hec_port", url.port_or_known_default())
                .param_opt(
                    "hec_token",
                    splunk.authentication.as_ref().map(|authentication| {
                        read_file(&secret_reference_path(&authentication.token))
                    }),
                )
                .param_opt(
                    "index",
                    index
                        .as_ref()
                        .and_then(|index| index.literal())
                        .filter(|index| !index.is_empty()),
                )
                .when(dynamic_index.is_some(), |block| {
                    block
                        .param("index_key", INDEX_KEY)
                        .param("keep_keys", "false")
                })
                .when(compression(splunk.tuning.as_ref()) == Some("gzip"), |block| {
                    block.param("gzip_compression", "true")
                })
                .param_opt("ca_file", paths.ca.as_deref())
                .param_opt("client_cert", paths.certificate.as_deref())
                .param_opt("client_key", paths.key.as_deref())
                .when(insecure_skip_verify(output), |block| {
                    block.param("insecure_ssl", "true")
                })
                .child(Block::new("format").param("@type", "json"))
                .child(buffer(
                    &output.name,
                    ctx.collector_buffer(),
                    &BufferOptions {
                        tuning: splunk.tuning.as_ref(),
                        ..BufferOptions::default()
                    },
                )),
        );

        Ok(blocks)
    }
}
