//! Output to a syslog server using the `remote_syslog` plugin
//!
//! Header fields may be templates. Fields which reference the record are evaluated into
//! temporary fields first and become chunk keys of the buffer.

use stackable_operator::k8s_openapi::api::core::v1::Secret;

use super::{
    PluginOps, insecure_skip_verify, legacy_url, migrate_shell, parse_template, parse_url,
    required_block, validate_template, validate_tls, validate_url,
};
use crate::{
    crd::{logging::v1 as legacy, observability::v1},
    generator::{
        self, Context,
        buffer::{BufferOptions, buffer},
        elements::{Block, store_id},
        security::{TlsPaths, read_file},
        template::Template,
    },
    secrets::Secrets,
};

const DEFAULT_PORT: u16 = 514;
const DEFAULT_FACILITY: &str = "user";
const DEFAULT_SEVERITY: &str = "debug";
const PACKET_SIZE: u32 = 4096;
const PAYLOAD_KEY: &str = "_syslog_payload";
const LEGACY_MESSAGE_PREFIX: &str = "$.message";

const FACILITIES: [&str; 24] = [
    "kern", "user", "mail", "daemon", "auth", "syslog", "lpr", "news", "uucp", "cron",
    "authpriv", "ftp", "ntp", "security", "console", "solaris-cron", "local0", "local1", "local2",
    "local3", "local4", "local5", "local6", "local7",
];
const SEVERITIES: [&str; 8] = [
    "emerg", "alert", "crit", "err", "warning", "notice", "info", "debug",
];

pub struct SyslogPlugin;

impl PluginOps for SyslogPlugin {
    fn output_type(&self) -> v1::OutputType {
        v1::OutputType::Syslog
    }

    fn migrate(&self, output: &legacy::OutputSpec, secret: Option<&Secret>) -> v1::OutputSpec {
        let syslog = output.syslog.clone().unwrap_or_default();

        v1::OutputSpec {
            syslog: Some(v1::Syslog {
                url: legacy_url(output),
                rfc: syslog.rfc.as_deref().and_then(migrate_rfc),
                severity: syslog.severity.map(migrate_field),
                facility: syslog.facility.map(migrate_field),
                payload_key: syslog
                    .payload_key
                    .filter(|key| !key.is_empty())
                    .map(|key| format!("{{.{key}}}")),
                app_name: syslog.app_name.map(migrate_field),
                proc_id: syslog.proc_id.map(migrate_field),
                msg_id: syslog.msg_id.map(migrate_field),
                enrichment: syslog
                    .add_log_source
                    .then_some(v1::EnrichmentType::KubernetesMinimal),
            }),
            ..migrate_shell(output, v1::OutputType::Syslog, secret)
        }
    }

    fn validate(&self, output: &v1::OutputSpec, secrets: &Secrets) -> Vec<String> {
        let Some(syslog) = &output.syslog else {
            return vec!["syslog output requires the syslog block".to_owned()];
        };

        let mut messages: Vec<String> = validate_url(&syslog.url, &["tcp", "udp", "tls"])
            .into_iter()
            .collect();
        for (field, value) in header_fields(syslog) {
            if let Some(value) = value {
                messages.extend(validate_template(field, value));
            }
        }
        messages.extend(
            syslog
                .payload_key
                .as_deref()
                .and_then(|payload_key| validate_template("payloadKey", payload_key)),
        );
        messages.extend(validate_static_value(
            "facility",
            syslog.facility.as_deref(),
            &FACILITIES,
        ));
        messages.extend(validate_static_value(
            "severity",
            syslog.severity.as_deref(),
            &SEVERITIES,
        ));
        messages.extend(validate_tls(output, secrets));
        messages
    }

    fn emit(&self, output: &v1::OutputSpec, ctx: &Context<'_>) -> generator::Result<Vec<Block>> {
        let syslog = required_block(output, &output.syslog)?;
        let url = parse_url(output, &syslog.url)?;
        let secure = url.scheme() == "tls";
        let protocol = if url.scheme() == "udp" { "udp" } else { "tcp" };
        let paths = TlsPaths::of_output(output.tls.as_ref());

        let mut fields = vec![];
        for (field, value) in header_fields(syslog) {
            if let Some(value) = value.filter(|value| !value.is_empty()) {
                fields.push(HeaderField::new(field, parse_template(output, value)?));
            }
        }
        let payload = match &syslog.payload_key {
            Some(payload_key) => Some(parse_template(output, payload_key)?),
            None => None,
        };

        let mut blocks = vec![parse_json_message()];
        if syslog.enrichment == Some(v1::EnrichmentType::KubernetesMinimal) {
            blocks.push(add_log_source());
        }
        let record = fields
            .iter()
            .filter(|field| !field.template.is_static())
            .map(|field| {
                (
                    field.record_key(),
                    format!("${{{}}}", field.template.to_ruby()),
                )
            })
            .chain(
                payload
                    .iter()
                    .map(|payload| (PAYLOAD_KEY.to_owned(), format!("${{{}}}", payload.to_ruby()))),
            )
            .fold(Block::new("record"), |record, (key, value)| {
                record.param(&key, value)
            });
        if !record.is_empty() {
            blocks.push(
                Block::with_argument("filter", "**")
                    .param("@type", "record_modifier")
                    .child(record),
            );
        }

        let value_of = |name: &str| {
            fields
                .iter()
                .find(|field| field.name == name)
                .map(HeaderField::value)
        };
        let chunk_keys: Vec<String> = fields
            .iter()
            .filter(|field| !field.template.is_static())
            .map(HeaderField::record_key)
            .collect();

        blocks.push(
            Block::with_argument("match", "**")
                .param("@type", "remote_syslog")
                .param("@id", store_id(&output.name))
                .param("host", url.host_str().unwrap_or_default())
                .param("port", url.port().unwrap_or(DEFAULT_PORT))
                .param("rfc", syslog.rfc.unwrap_or(v1::SyslogRfc::Rfc5424))
                .param(
                    "facility",
                    value_of("facility").unwrap_or_else(|| DEFAULT_FACILITY.to_owned()),
                )
                .param(
                    "severity",
                    value_of("severity").unwrap_or_else(|| DEFAULT_SEVERITY.to_owned()),
                )
                .param_opt("appname", value_of("appName"))
                .param_opt("msgid", value_of("msgID"))
                .param_opt("procid", value_of("procID"))
                .param("protocol", protocol)
                .param("packet_size", PACKET_SIZE)
                .param("hostname", r##""#{ENV['NODE_NAME']}""##)
                .when(secure || output.tls.is_some(), |block| {
                    block.param("tls", "true")
                })
                .param_opt(
                    "client_cert_key",
                    paths.key.as_deref().map(|path| format!("'{path}'")),
                )
                .param_opt(
                    "client_cert",
                    paths.certificate.as_deref().map(|path| format!("'{path}'")),
                )
                .param_opt("ca_file", paths.ca.as_deref().map(|path| format!("'{path}'")))
                .param_opt(
                    "client_cert_key_password",
                    paths.key_passphrase.as_deref().map(read_file),
                )
                .when(insecure_skip_verify(output), |block| {
                    block.param("verify_mode", "0")
                })
                .when(protocol == "tcp", |block| {
                    block
                        .param("timeout", "60")
                        .param("timeout_exception", "true")
                        .param("keep_alive", "true")
                        .param("keep_alive_idle", "75")
                        .param("keep_alive_cnt", "9")
                        .param("keep_alive_intvl", "7200")
                })
                .child(match &payload {
                    Some(_) => Block::new("format")
                        .param("@type", "single_json_value")
                        .param("message_key", PAYLOAD_KEY),
                    None => Block::new("format").param("@type", "json"),
                })
                .child(buffer(
                    &output.name,
                    ctx.collector_buffer(),
                    &BufferOptions {
                        keys: chunk_keys,
                        disable_chunk_backup: true,
                        ..BufferOptions::default()
                    },
                )),
        );

        Ok(blocks)
    }
}

/// A header field of the syslog message
struct HeaderField {
    name: &'static str,
    template: Template,
}

impl HeaderField {
    fn new(name: &'static str, template: Template) -> Self {
        HeaderField { name, template }
    }

    /// The temporary field which holds the evaluated template, e.g. `_syslog_appname`
    fn record_key(&self) -> String {
        format!("_syslog_{}", self.name.to_lowercase())
    }

    /// The literal value or a placeholder of the temporary field
    fn value(&self) -> String {
        self.template
            .literal()
            .unwrap_or_else(|| format!("${{{}}}", self.record_key()))
    }
}

fn header_fields(syslog: &v1::Syslog) -> [(&'static str, Option<&str>); 5] {
    [
        ("severity", syslog.severity.as_deref()),
        ("facility", syslog.facility.as_deref()),
        ("appName", syslog.app_name.as_deref()),
        ("procID", syslog.proc_id.as_deref()),
        ("msgID", syslog.msg_id.as_deref()),
    ]
}

/// Fields of the parsed message, e.g. `$.message.app`, become templates, e.g. `{.app||"none"}`
fn migrate_field(value: String) -> String {
    match value.strip_prefix(LEGACY_MESSAGE_PREFIX) {
        Some(path) if path.starts_with('.') => format!(r#"{{{path}||"none"}}"#),
        _ => value,
    }
}

fn migrate_rfc(rfc: &str) -> Option<v1::SyslogRfc> {
    match rfc.to_lowercase().as_str() {
        "rfc3164" => Some(v1::SyslogRfc::Rfc3164),
        "rfc5424" => Some(v1::SyslogRfc::Rfc5424),
        _ => None,
    }
}

/// Checks a static value against the known names; templates are evaluated per record
fn validate_static_value(field: &str, value: Option<&str>, known: &[&str]) -> Option<String> {
    let value = value.filter(|value| !value.is_empty() && !value.contains('{'))?;
    let is_known =
        known.contains(&value.to_lowercase().as_str()) || value.parse::<u8>().is_ok();
    (!is_known).then(|| format!("{field} {value:?} is not one of {known:?}"))
}

/// Parses JSON messages so that templates can reference their fields
fn parse_json_message() -> Block {
    Block::with_argument("filter", "**")
        .param("@type", "parse_json_field")
        .param("json_fields", "message")
        .param("merge_json_log", "false")
        .param("replace_json_log", "true")
}

/// Prefixes the message with the namespace, container and pod of its origin
fn add_log_source() -> Block {
    Block::with_argument("filter", "**")
        .param("@type", "record_modifier")
        .child(
            Block::new("record")
                .param(
                    "kubernetes_info",
                    "${if record.has_key?('kubernetes'); record['kubernetes']; else {}; end}",
                )
                .param(
                    "namespace_info",
                    "${if record['kubernetes_info'] != nil && record['kubernetes_info'] != {}; \"namespace_name=\" + record['kubernetes_info']['namespace_name']; else nil; end}",
                )
                .param(
                    "pod_info",
                    "${if record['kubernetes_info'] != nil && record['kubernetes_info'] != {}; \"pod_name=\" + record['kubernetes_info']['pod_name']; else nil; end}",
                )
                .param(
                    "container_info",
                    "${if record['kubernetes_info'] != nil && record['kubernetes_info'] != {}; \"container_name=\" + record['kubernetes_info']['container_name']; else nil; end}",
                )
                .param(
                    "msg_key",
                    "${if record.has_key?('message') && record['message'] != nil; record['message']; else nil; end}",
                )
                .param(
                    "msg_info",
                    "${if record['msg_key'] != nil && record['msg_key'].is_a?(Hash); require 'json'; \"message=\"+record['message'].to_json; elsif record['msg_key'] != nil; \"message=\"+record['message']; else nil; end}",
                )
                .param(
                    "message",
                    "${if record['msg_key'] != nil && record['kubernetes_info'] != nil && record['kubernetes_info'] != {}; record['namespace_info'] + \", \" + record['container_info'] + \", \" + record['pod_info'] + \", \" + record['msg_info']; else record['message']; end}",
                ),
        )
        .param(
            "remove_keys",
            "kubernetes_info, namespace_info, pod_info, container_info, msg_key, msg_info",
        )
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::SyslogPlugin;
    use crate::{
        crd::observability::v1,
        generator::test_support::with_context,
        outputs::{PluginOps, test_support::legacy_output},
        secrets::Secrets,
    };

    #[test]
    fn test_migrate() {
        let output = legacy_output(
            "
            name: syslog-receiver
            type: syslog
            url: tcp://sl.svc.messaging.cluster.local:9654
            syslog:
              rfc: RFC3164
              facility: local0
              appName: $.message.app
              procID: $.message.proc.id
              msgID: mymsg
              payloadKey: message
              addLogSource: true
            ",
        );

        assert_eq!(
            Some(v1::Syslog {
                url: "tcp://sl.svc.messaging.cluster.local:9654".to_owned(),
                rfc: Some(v1::SyslogRfc::Rfc3164),
                severity: None,
                facility: Some("local0".to_owned()),
                payload_key: Some("{.message}".to_owned()),
                app_name: Some(r#"{.app||"none"}"#.to_owned()),
                proc_id: Some(r#"{.proc.id||"none"}"#.to_owned()),
                msg_id: Some("mymsg".to_owned()),
                enrichment: Some(v1::EnrichmentType::KubernetesMinimal),
            }),
            SyslogPlugin.migrate(&output, None).syslog
        );
    }

    #[test]
    fn test_validate() {
        let output: v1::OutputSpec = serde_yaml::from_str(
            "
            name: syslog
            type: syslog
            syslog:
              url: http://syslog.example.com
              facility: nonsense
              severity: '{.level'
            ",
        )
        .expect("should be a valid output");

        assert_eq!(3, SyslogPlugin.validate(&output, &Secrets::new()).len());
    }

    #[test]
    fn test_emit_udp() {
        let output: v1::OutputSpec = serde_yaml::from_str(
            "
            name: syslog-receiver
            type: syslog
            syslog:
              url: udp://sl.svc.messaging.cluster.local:9654
            ",
        )
        .expect("should be a valid output");

        let blocks = with_context(|ctx| SyslogPlugin.emit(&output, ctx))
            .expect("should emit the syslog output");

        assert_eq!(2, blocks.len());
        assert!(blocks[1].to_string().starts_with(concat!(
            "<match **>\n",
            "  @type remote_syslog\n",
            "  @id syslog_receiver\n",
            "  host sl.svc.messaging.cluster.local\n",
            "  port 9654\n",
            "  rfc rfc5424\n",
            "  facility user\n",
            "  severity debug\n",
            "  protocol udp\n",
            "  packet_size 4096\n",
            "  hostname \"#{ENV['NODE_NAME']}\"\n",
            "  <format>\n",
            "    @type json\n",
            "  </format>\n",
            "  <buffer>\n",
        )));
    }

    #[test]
    fn test_emit_templated_fields() {
        let output: v1::OutputSpec = serde_yaml::from_str(
            r#"
            name: syslog-receiver
            type: syslog
            syslog:
              url: tls://sl.svc.messaging.cluster.local:6514
              rfc: RFC5424
              appName: '{.kubernetes.container_name||"none"}'
              msgID: mymsg
              payloadKey: '{.message}'
            "#,
        )
        .expect("should be a valid output");

        let blocks = with_context(|ctx| SyslogPlugin.emit(&output, ctx))
            .expect("should emit the syslog output");

        assert_eq!(3, blocks.len());
        assert_eq!(
            concat!(
                "<filter **>\n",
                "  @type record_modifier\n",
                "  <record>\n",
                "    _syslog_appname ${(record.dig(\"kubernetes\",\"container_name\") || \"none\").to_s}\n",
                "    _syslog_payload ${record.dig(\"message\").to_s}\n",
                "  </record>\n",
                "</filter>\n",
            ),
            blocks[1].to_string()
        );
        let sink = blocks[2].to_string();
        assert!(sink.contains("  appname ${_syslog_appname}\n  msgid mymsg\n"));
        assert!(sink.contains("  tls true\n"));
        assert!(sink.contains("    message_key _syslog_payload\n"));
        assert!(sink.contains("  <buffer _syslog_appname>\n"));
    }
}
