use std::collections::BTreeMap;

use stackable_operator::k8s_openapi::api::core::v1::Secret;

use super::{
    PluginOps, bearer_header_value, compression, dedot_labels, insecure_skip_verify, legacy_url,
    migrate_http_authentication, migrate_shell, migrate_tuning, min_tls_version, required_block,
    validate_http_authentication, validate_tls, validate_url,
};
use crate::{
    crd::{logging::v1 as legacy, observability::v1},
    generator::{
        self, Context,
        buffer::{BufferOptions, buffer},
        elements::{Block, quote, store_id},
        security::{TlsPaths, read_file, secret_reference_path},
    },
    secrets::Secrets,
};

const DEFAULT_METHOD: &str = "post";
const METHODS: [&str; 2] = ["GET", "POST"];

pub struct HttpPlugin;

impl PluginOps for HttpPlugin {
    fn output_type(&self) -> v1::OutputType {
        v1::OutputType::Http
    }

    fn migrate(&self, output: &legacy::OutputSpec, secret: Option<&Secret>) -> v1::OutputSpec {
        let http = output.http.clone().unwrap_or_default();

        v1::OutputSpec {
            http: Some(v1::Http {
                url: legacy_url(output),
                authentication: migrate_http_authentication(secret),
                tuning: migrate_tuning(output.tuning.as_ref(), true),
                headers: http.headers,
                timeout: http.timeout,
                method: http.method,
            }),
            ..migrate_shell(output, v1::OutputType::Http, secret)
        }
    }

    fn validate(&self, output: &v1::OutputSpec, secrets: &Secrets) -> Vec<String> {
        let Some(http) = &output.http else {
            return vec!["http output requires the http block".to_owned()];
        };

        let mut messages: Vec<String> = validate_url(&http.url, &["http", "https"])
            .into_iter()
            .collect();
        if let Some(method) = &http.method {
            if !METHODS.contains(&method.to_uppercase().as_str()) {
                messages.push(format!(
                    "method {method:?} is not supported, use one of {METHODS:?}"
                ));
            }
        }
        if http.timeout.is_some_and(|timeout| timeout <= 0) {
            messages.push("timeout must be a positive number of seconds".to_owned());
        }
        messages.extend(validate_http_authentication(
            http.authentication.as_ref(),
            secrets,
        ));
        messages.extend(validate_tls(output, secrets));
        messages
    }

    fn emit(&self, output: &v1::OutputSpec, ctx: &Context<'_>) -> generator::Result<Vec<Block>> {
        let http = required_block(output, &output.http)?;
        let paths = TlsPaths::of_output(output.tls.as_ref());
        let authentication = http.authentication.as_ref();

        let mut headers: BTreeMap<String, String> = http.headers.clone().unwrap_or_default();
        if let Some(token) = authentication.and_then(|authentication| authentication.token.as_ref())
        {
            headers.insert("Authorization".to_owned(), bearer_header_value(token));
        }
        let basic_auth = authentication.and_then(|authentication| {
            authentication
                .username
                .as_ref()
                .zip(authentication.password.as_ref())
        });

        let sink = Block::with_argument("match", "**")
            .param("@type", "http")
            .param("@id", store_id(&output.name))
            .param("endpoint", &http.url)
            .param(
                "http_method",
                http.method
                    .as_deref()
                    .map(str::to_lowercase)
                    .unwrap_or_else(|| DEFAULT_METHOD.to_owned()),
            )
            .param("content_type", quote("application/x-ndjson"))
            .param_opt("open_timeout", http.timeout)
            .param_opt("read_timeout", http.timeout)
            .param_opt(
                "headers",
                (!headers.is_empty()).then(|| quote(&serde_json::json!(headers).to_string())),
            )
            .param_opt("compress", compression(http.tuning.as_ref()))
            .child_opt(basic_auth.map(|(username, password)| {
                Block::new("auth")
                    .param("method", "basic")
                    .param("username", read_file(&secret_reference_path(username)))
                    .param("password", read_file(&secret_reference_path(password)))
            }))
            .param_opt("tls_private_key_path", paths.key.as_deref().map(single_quote))
            .param_opt(
                "tls_client_cert_path",
                paths.certificate.as_deref().map(single_quote),
            )
            .param_opt("tls_ca_cert_path", paths.ca.as_deref().map(single_quote))
            .param_opt(
                "tls_client_private_key_passphrase",
                paths.key_passphrase.as_deref().map(read_file),
            )
            .when(insecure_skip_verify(output), |block| {
                block.param("tls_verify_mode", "none")
            })
            .param_opt("tls_version", min_tls_version(output))
            .child(Block::new("format").param("@type", "json"))
            .param("json_array", "false")
            .child(buffer(
                &output.name,
                ctx.collector_buffer(),
                &BufferOptions {
                    tuning: http.tuning.as_ref(),
                    disable_chunk_backup: true,
                    ..BufferOptions::default()
                },
            ));

        Ok(vec![dedot_labels(), sink])
    }
}

fn single_quote(path: &str) -> String {
    format!("'{path}'")
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::HttpPlugin;
    use crate::{
        crd::{common::SecretReference, observability::v1},
        generator::test_support::with_context,
        outputs::{
            PluginOps,
            test_support::{legacy_output, secret},
        },
        secrets::Secrets,
    };

    fn migrated() -> v1::OutputSpec {
        let output = legacy_output(
            "
            name: http-receiver
            type: http
            url: https://my-logstore.com/logs/app-logs
            secret:
              name: http-receiver
            http:
              timeout: 50
              headers:
                k1: v1
                k2: v2
            tuning:
              compression: gzip
            ",
        );
        let secret = secret("http-receiver", &["username", "password"]);

        HttpPlugin.migrate(&output, Some(&secret))
    }

    #[test]
    fn test_migrate() {
        let http = migrated().http.expect("should have the http block");

        assert_eq!("https://my-logstore.com/logs/app-logs", http.url);
        assert_eq!(Some(50), http.timeout);
        assert_eq!(
            Some(SecretReference::new("http-receiver", "password")),
            http.authentication
                .and_then(|authentication| authentication.password)
        );
        assert_eq!(
            Some("gzip".to_owned()),
            http.tuning.and_then(|tuning| tuning.compression)
        );
    }

    #[test]
    fn test_validate_method() {
        let mut output = migrated();
        if let Some(http) = output.http.as_mut() {
            http.method = Some("delete".to_owned());
        }

        assert_eq!(1, HttpPlugin.validate(&output, &Secrets::new()).len());
    }

    #[test]
    fn test_emit() {
        let blocks = with_context(|ctx| HttpPlugin.emit(&migrated(), ctx))
            .expect("should emit the http output");

        assert_eq!(2, blocks.len());
        assert!(blocks[0].to_string().contains("remove_keys _dummy_, _dummy2_, _dummy3_"));
        assert!(blocks[1].to_string().starts_with(concat!(
            "<match **>\n",
            "  @type http\n",
            "  @id http_receiver\n",
            "  endpoint https://my-logstore.com/logs/app-logs\n",
            "  http_method post\n",
            "  content_type \"application/x-ndjson\"\n",
            "  open_timeout 50\n",
            "  read_timeout 50\n",
            "  headers \"{\\\"k1\\\":\\\"v1\\\",\\\"k2\\\":\\\"v2\\\"}\"\n",
            "  compress gzip\n",
            "  <auth>\n",
            "    method basic\n",
            "    username \"#{File.exists?('/var/run/ocp-collector/secrets/http-receiver/username') ? open('/var/run/ocp-collector/secrets/http-receiver/username','r') do |f|f.read.chomp end : ''}\"\n",
        )));
    }
}
