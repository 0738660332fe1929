//! The sources of the collector
//!
//! A node log source is only tailed if a referenced input needs it. Every receiver input gets
//! its own listener which sends its records directly to the label of the input.

use std::collections::BTreeSet;

use super::{
    Context, Result,
    buffer::BUFFER_ROOT,
    elements::{Block, label_name, quote, store_id},
    preamble::{CONCAT_LABEL, INGRESS_LABEL},
    routing::input_label,
    security::{TlsPaths, read_file, secret_path},
};
use crate::crd::observability::v1;

pub const CONTAINER_LOG_DIR: &str = "/var/log/pods";

/// A line written by the CRI container runtime, e.g.
/// `2024-01-01T00:00:00.000000001Z stdout P first part of the line`
///
/// `logtag` is `P` for a partial line and `F` for the last part of a line.
pub const CRI_LINE_EXPRESSION: &str =
    r"^(?<@timestamp>[^\s]+) (?<stream>stdout|stderr) (?<logtag>[FP]) (?<message>.*)$";

pub const JOURNAL_TAG: &str = "journal";
pub const HOST_AUDIT_TAG: &str = "linux-audit.log";
pub const KUBE_API_AUDIT_TAG: &str = "k8s-audit.log";
pub const OPENSHIFT_AUDIT_TAG: &str = "openshift-audit.log";
pub const OVN_AUDIT_TAG: &str = "ovn-audit.log";

/// Namespaces whose containers are infrastructure
pub const INFRASTRUCTURE_NAMESPACES: [&str; 4] = ["openshift", "openshift-*", "default", "kube-*"];

/// Pods of the logging stack itself which are never collected
const EXCLUDED_POD_GLOBS: [&str; 5] = [
    "logfilesmetricexporter-*/*",
    "elasticsearch-*/*",
    "*/loki*",
    "*/gateway",
    "*/opa",
];

const POS_DIR: &str = "pos";

/// The receiver secrets carry the serving certificate of the receiver service
const SERVING_CERT_KEY: &str = "tls.crt";
const SERVING_KEY_KEY: &str = "tls.key";

/// A log source on the node
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum LogSource {
    Container,
    Journal,
    HostAudit,
    KubeApiAudit,
    OpenshiftAudit,
    OvnAudit,
}

impl LogSource {
    /// The node log sources an input reads from; receivers read from none
    pub fn of_input(input: &v1::InputSpec) -> Vec<LogSource> {
        match input.type_ {
            v1::InputType::Application => vec![LogSource::Container],
            v1::InputType::Infrastructure => input
                .infrastructure
                .clone()
                .unwrap_or_default()
                .effective_sources()
                .into_iter()
                .map(|source| match source {
                    v1::InfrastructureSource::Container => LogSource::Container,
                    v1::InfrastructureSource::Node => LogSource::Journal,
                })
                .collect(),
            v1::InputType::Audit => input
                .audit
                .clone()
                .unwrap_or_default()
                .effective_sources()
                .into_iter()
                .map(|source| match source {
                    v1::AuditSource::Auditd => LogSource::HostAudit,
                    v1::AuditSource::KubeApi => LogSource::KubeApiAudit,
                    v1::AuditSource::OpenshiftApi => LogSource::OpenshiftAudit,
                    v1::AuditSource::Ovn => LogSource::OvnAudit,
                })
                .collect(),
            v1::InputType::Receiver => vec![],
        }
    }

    /// The fluentd tag pattern which matches the records of this source
    pub fn tag_pattern(self) -> &'static str {
        match self {
            LogSource::Container => "kubernetes.**",
            LogSource::Journal => "journal.**",
            LogSource::HostAudit => "linux-audit.log**",
            LogSource::KubeApiAudit => "k8s-audit.log**",
            LogSource::OpenshiftAudit => "openshift-audit.log**",
            LogSource::OvnAudit => "ovn-audit.log**",
        }
    }
}

/// The node log sources needed by the referenced inputs
pub fn required_sources(ctx: &Context<'_>) -> Result<BTreeSet<LogSource>> {
    Ok(ctx
        .referenced_inputs()?
        .iter()
        .flat_map(LogSource::of_input)
        .collect())
}

pub fn sources(ctx: &Context<'_>) -> Result<Vec<Block>> {
    let mut blocks: Vec<Block> = required_sources(ctx)?
        .into_iter()
        .map(|source| match source {
            LogSource::Container => container_source(ctx),
            LogSource::Journal => journal_source(),
            LogSource::HostAudit => host_audit_source(),
            LogSource::KubeApiAudit => api_audit_source(
                "k8s-audit-input",
                "/var/log/kube-apiserver/audit.log",
                "kube-apiserver.audit.log.pos",
                KUBE_API_AUDIT_TAG,
            ),
            LogSource::OpenshiftAudit => api_audit_source(
                "openshift-audit-input",
                "/var/log/oauth-apiserver/audit.log,/var/log/openshift-apiserver/audit.log,/var/log/oauth-server/audit.log",
                "oauth-apiserver.audit.log",
                OPENSHIFT_AUDIT_TAG,
            ),
            LogSource::OvnAudit => ovn_audit_source(),
        })
        .collect();

    for input in ctx.referenced_inputs()? {
        if let Some(receiver) = &input.receiver {
            blocks.push(receiver_source(ctx, &input.name, receiver));
        }
    }
    Ok(blocks)
}

fn pos_file(name: &str) -> String {
    format!("{BUFFER_ROOT}/{POS_DIR}/{name}")
}

fn container_source(ctx: &Context<'_>) -> Block {
    let excluded: Vec<String> = [format!("{}_{}-*/*", ctx.namespace, ctx.forwarder_name)]
        .into_iter()
        .chain(
            EXCLUDED_POD_GLOBS
                .iter()
                .map(|glob| format!("{}_{glob}", ctx.namespace)),
        )
        .map(|glob| format!("{CONTAINER_LOG_DIR}/{glob}/*.log"))
        .chain(
            ["*.gz", "*.tmp"]
                .iter()
                .map(|extension| format!("{CONTAINER_LOG_DIR}/*/*/{extension}")),
        )
        .map(|path| quote(&path))
        .collect();

    Block::new("source")
        .param("@type", "tail")
        .param("@id", "container-input")
        .param("path", quote(&format!("{CONTAINER_LOG_DIR}/*/*/*.log")))
        .param("exclude_path", format!("[{}]", excluded.join(", ")))
        .param("pos_file", quote(&pos_file("es-containers.log.pos")))
        .param("follow_inodes", "true")
        .param("refresh_interval", 5)
        .param("rotate_wait", 5)
        .param("tag", "kubernetes.*")
        .param("read_from_head", r#""true""#)
        .param("skip_refresh_on_startup", "true")
        .param("@label", label_name(CONCAT_LABEL))
        .child(
            Block::new("parse")
                .param("@type", "regexp")
                .param("expression", format!("/{CRI_LINE_EXPRESSION}/"))
                .param("time_key", "'@timestamp'")
                .param("keep_time_key", "true"),
        )
}

fn journal_source() -> Block {
    Block::new("source")
        .param("@type", "systemd")
        .param("@id", "systemd-input")
        .param("@label", label_name(INGRESS_LABEL))
        .param("path", "'/var/log/journal'")
        .child(
            Block::new("storage")
                .param("@type", "local")
                .param("persistent", "true")
                .param("path", format!("'{}'", pos_file("journal_pos.json"))),
        )
        .param("matches", r##""#{ENV['JOURNAL_FILTERS_JSON'] || '[]'}""##)
        .param("tag", JOURNAL_TAG)
        .param(
            "read_from_head",
            r##""#{if (val = ENV.fetch('JOURNAL_READ_FROM_HEAD','')) && (val.length > 0); val; else 'false'; end}""##,
        )
}

fn host_audit_source() -> Block {
    Block::new("source")
        .param("@type", "tail")
        .param("@id", "audit-input")
        .param("@label", label_name(INGRESS_LABEL))
        .param("path", quote("/var/log/audit/audit.log"))
        .param("pos_file", quote(&pos_file("audit.log.pos")))
        .param("follow_inodes", "true")
        .param("tag", HOST_AUDIT_TAG)
        .child(Block::new("parse").param("@type", "viaq_host_audit"))
}

fn api_audit_source(id: &str, path: &str, pos: &str, tag: &str) -> Block {
    Block::new("source")
        .param("@type", "tail")
        .param("@id", id)
        .param("@label", label_name(INGRESS_LABEL))
        .param("path", quote(path))
        .param("pos_file", quote(&pos_file(pos)))
        .param("follow_inodes", "true")
        .param("tag", tag)
        .child(
            Block::new("parse")
                .param("@type", "json")
                .param("time_key", "requestReceivedTimestamp")
                .param("keep_time_key", "true")
                .param("time_format", "%Y-%m-%dT%H:%M:%S.%N%z"),
        )
}

fn ovn_audit_source() -> Block {
    Block::new("source")
        .param("@type", "tail")
        .param("@id", "ovn-audit-input")
        .param("@label", label_name(INGRESS_LABEL))
        .param("path", quote("/var/log/ovn/acl-audit-log.log"))
        .param("pos_file", quote(&pos_file("acl-audit-log.pos")))
        .param("follow_inodes", "true")
        .param("tag", OVN_AUDIT_TAG)
        .param("refresh_interval", 5)
        .param("rotate_wait", 5)
        .param("read_from_head", "true")
        .child(Block::new("parse").param("@type", "none"))
}

/// The name of the Service and of the serving certificate Secret of a receiver input
pub fn receiver_service_name(forwarder_name: &str, input_name: &str) -> String {
    format!("{forwarder_name}-{input_name}")
}

fn receiver_source(ctx: &Context<'_>, input_name: &str, receiver: &v1::ReceiverSpec) -> Block {
    let serving_cert_secret = receiver_service_name(ctx.forwarder_name, input_name);
    let paths = receiver
        .tls
        .as_ref()
        .map(TlsPaths::new)
        .unwrap_or_default();
    let certificate = paths
        .certificate
        .clone()
        .unwrap_or_else(|| secret_path(&serving_cert_secret, SERVING_CERT_KEY));
    let key = paths
        .key
        .clone()
        .unwrap_or_else(|| secret_path(&serving_cert_secret, SERVING_KEY_KEY));

    let transport = Block::with_argument("transport", "tls")
        .param("cert_path", certificate)
        .param("private_key_path", key)
        .param_opt("ca_path", paths.ca.as_deref())
        .param_opt(
            "private_key_passphrase",
            paths.key_passphrase.as_deref().map(read_file),
        );

    let source = Block::new("source")
        .param("@id", format!("{}_input", store_id(input_name)))
        .param("@label", input_label(input_name))
        .param("port", receiver.port)
        .param("bind", r#""[::]""#);

    match receiver.type_ {
        v1::ReceiverType::Http => source
            .param("@type", "http")
            .child(transport)
            .child(Block::new("parse").param("@type", "json")),
        v1::ReceiverType::Syslog => source
            .param("@type", "syslog")
            .param("tag", store_id(input_name))
            .param("protocol_type", "tcp")
            .child(transport)
            .child(
                Block::new("parse")
                    .param("@type", "syslog")
                    .param("message_format", "auto"),
            ),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use pretty_assertions::assert_eq;

    use super::{LogSource, required_sources, sources};
    use crate::generator::test_support::{spec, with_spec};

    fn forwarder(inputs: &str, input_refs: &str) -> String {
        format!(
            "
            serviceAccount:
              name: logcollector
            inputs: {inputs}
            outputs:
              - name: loki
                type: loki
                loki:
                  url: https://loki.example.com:3100
            pipelines:
              - name: pipeline
                inputRefs: {input_refs}
                outputRefs: [loki]
            "
        )
    }

    #[test]
    fn test_required_sources_of_reserved_inputs() {
        let spec = spec(&forwarder("[]", "[infrastructure, audit]"));

        let required = with_spec(&spec, required_sources).expect("should resolve the inputs");

        assert_eq!(
            BTreeSet::from([
                LogSource::Container,
                LogSource::Journal,
                LogSource::HostAudit,
                LogSource::KubeApiAudit,
                LogSource::OpenshiftAudit,
                LogSource::OvnAudit,
            ]),
            required
        );
    }

    #[test]
    fn test_required_sources_of_selected_sources() {
        let spec = spec(&forwarder(
            "
              - name: nodes
                type: infrastructure
                infrastructure:
                  sources: [node]
              - name: ovn
                type: audit
                audit:
                  sources: [ovn]
            ",
            "[nodes, ovn]",
        ));

        let required = with_spec(&spec, required_sources).expect("should resolve the inputs");

        assert_eq!(
            BTreeSet::from([LogSource::Journal, LogSource::OvnAudit]),
            required
        );
    }

    #[test]
    fn test_container_source_excludes_collector_pods() {
        let spec = spec(&forwarder("[]", "[application]"));

        let blocks = with_spec(&spec, sources).expect("should emit the sources");

        assert_eq!(1, blocks.len());
        let source = blocks[0].to_string();
        assert!(source.contains(concat!(
            "  exclude_path [\"/var/log/pods/openshift-logging_collector-*/*/*.log\", ",
            "\"/var/log/pods/openshift-logging_logfilesmetricexporter-*/*/*.log\", ",
        )));
        assert!(source.contains("\"/var/log/pods/*/*/*.gz\", \"/var/log/pods/*/*/*.tmp\"]\n"));
        assert!(source.contains("  @label @CONCAT\n"));
    }

    #[test]
    fn test_receiver_source_uses_serving_certificate() {
        let spec = spec(&forwarder(
            "
              - name: audit-receiver
                type: receiver
                receiver:
                  type: http
                  port: 8443
                  http:
                    format: kubeAPIAudit
            ",
            "[audit-receiver]",
        ));

        let blocks = with_spec(&spec, sources).expect("should emit the sources");

        assert_eq!(
            concat!(
                "<source>\n",
                "  @id audit_receiver_input\n",
                "  @label @_INPUT_AUDIT_RECEIVER\n",
                "  port 8443\n",
                "  bind \"[::]\"\n",
                "  @type http\n",
                "  <transport tls>\n",
                "    cert_path /var/run/ocp-collector/secrets/collector-audit-receiver/tls.crt\n",
                "    private_key_path /var/run/ocp-collector/secrets/collector-audit-receiver/tls.key\n",
                "  </transport>\n",
                "  <parse>\n",
                "    @type json\n",
                "  </parse>\n",
                "</source>\n",
            ),
            blocks[0].to_string()
        );
    }
}
