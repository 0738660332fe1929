//! Routing of the records from the sources through the inputs and pipelines to the outputs
//!
//! ```text
//! sources -> @INGRESS -> @_APPLICATION    -> @_INPUT_<NAME> -> @<PIPELINE> -> @<OUTPUT>
//!                        @_INFRASTRUCTURE
//!                        @_AUDIT
//! receivers ----------------------------------^
//! ```
//!
//! Container logs are copied to the application and the infrastructure source type; the input
//! labels select the records by namespace. A record which goes to more than one label is deep
//! copied because the filters of the labels modify it.

use std::collections::BTreeSet;

use stackable_operator::k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;

use super::{
    Context, Error, Result,
    elements::{Block, label_name},
    filters::{self, drop_where, ruby_string, ruby_strings},
    preamble::{CONCAT_LABEL, INGRESS_LABEL},
    sources::{INFRASTRUCTURE_NAMESPACES, JOURNAL_TAG, LogSource, required_sources},
    trace_context::trace_context,
};
use crate::crd::observability::v1;

const APPLICATION_LABEL: &str = "_APPLICATION";
const INFRASTRUCTURE_LABEL: &str = "_INFRASTRUCTURE";
const AUDIT_LABEL: &str = "_AUDIT";

/// Labels which fluentd routes its own events to
const FLUENTD_LABELS: [&str; 2] = ["@ERROR", "@FLUENT_LOG"];

const NAMESPACE: &str = "record.dig('kubernetes', 'namespace_name').to_s";
const CONTAINER: &str = "record.dig('kubernetes', 'container_name').to_s";

const AUDIT_SOURCES: [LogSource; 4] = [
    LogSource::HostAudit,
    LogSource::KubeApiAudit,
    LogSource::OpenshiftAudit,
    LogSource::OvnAudit,
];

/// The label of an input
pub fn input_label(input_name: &str) -> String {
    label_name(&format!("_INPUT_{input_name}"))
}

/// Returns true if a pipeline or output of the given name would take over a label which the
/// generator or fluentd itself uses
///
/// The generated labels besides `@INGRESS` and `@CONCAT` all start with an underscore.
pub fn is_reserved_label(name: &str) -> bool {
    let label = label_name(name);
    label.starts_with("@_")
        || label == label_name(INGRESS_LABEL)
        || label == label_name(CONCAT_LABEL)
        || FLUENTD_LABELS.contains(&label.as_str())
}

/// Fails if two of the inputs, pipelines and outputs are routed to the same label
///
/// Names which only differ in the characters replaced by `_` share a label and a buffer path.
pub fn ensure_unique_labels(ctx: &Context<'_>) -> Result<()> {
    let inputs = ctx.referenced_inputs()?;
    let named_labels = inputs
        .iter()
        .map(|input| ("input", &input.name, input_label(&input.name)))
        .chain(
            ctx.spec
                .pipelines
                .iter()
                .map(|pipeline| ("pipeline", &pipeline.name, label_name(&pipeline.name))),
        )
        .chain(
            ctx.referenced_outputs()
                .into_iter()
                .map(|output| ("output", &output.name, label_name(&output.name))),
        );

    let mut seen = BTreeSet::new();
    for (kind, name, label) in named_labels {
        let reserved = kind != "input" && is_reserved_label(name);
        if reserved || seen.contains(&label) {
            return Err(Error::DuplicateLabel {
                kind,
                name: name.clone(),
                label,
            });
        }
        seen.insert(label);
    }
    Ok(())
}

/// Moves the records with matching tags to one label or deep copies them to several
fn dispatch(pattern: &str, targets: &[String]) -> Block {
    let block = Block::with_argument("match", pattern);
    match targets {
        [] => block.param("@type", "null"),
        [target] => block.param("@type", "relabel").param("@label", target),
        targets => block
            .param("@type", "copy")
            .param("copy_mode", "deep")
            .children(targets.iter().map(|target| {
                Block::new("store")
                    .param("@type", "relabel")
                    .param("@label", target)
            })),
    }
}

fn set_log_type(log_type: &str) -> Block {
    Block::with_argument("filter", "**")
        .param("@type", "record_modifier")
        .child(Block::new("record").param("log_type", log_type))
}

fn is_infrastructure_namespace() -> String {
    format!(
        "{}.any? {{ |p| File.fnmatch(p, ns) }}",
        ruby_strings(INFRASTRUCTURE_NAMESPACES)
    )
}

fn inputs_of_type(inputs: &[v1::InputSpec], type_: v1::InputType) -> Vec<&v1::InputSpec> {
    inputs.iter().filter(|input| input.type_ == type_).collect()
}

fn reads_containers(input: &v1::InputSpec) -> bool {
    LogSource::of_input(input).contains(&LogSource::Container)
}

fn reads_journal(input: &v1::InputSpec) -> bool {
    LogSource::of_input(input).contains(&LogSource::Journal)
}

fn viaq_data_model() -> Block {
    let levels = [
        ("warn", "Warning|WARN|^W[0-9]+|level=warn|Value:warn|\"level\":\"warn\""),
        ("info", "Info|INFO|^I[0-9]+|level=info|Value:info|\"level\":\"info\""),
        ("error", "Error|ERROR|^E[0-9]+|level=error|Value:error|\"level\":\"error\""),
        (
            "critical",
            "Critical|CRITICAL|^C[0-9]+|level=critical|Value:critical|\"level\":\"critical\"",
        ),
        ("debug", "Debug|DEBUG|^D[0-9]+|level=debug|Value:debug|\"level\":\"debug\""),
    ];

    Block::with_argument("filter", "**")
        .param("@type", "viaq_data_model")
        .param("enable_flatten_labels", "false")
        .param("enable_prune_empty_fields", "false")
        .param("keep_empty_fields", "'message'")
        .param("rename_time", "true")
        .param("pipeline_type", "'collector'")
        .param("process_kubernetes_events", "false")
        .children(levels.iter().map(|(name, pattern)| {
            Block::new("level")
                .param("name", name)
                .param("match", format!("'{pattern}'"))
        }))
        .child(
            Block::new("formatter")
                .param("tag", "\"journal.system**\"")
                .param("type", "sys_journal")
                .param(
                    "remove_keys",
                    "log,stream,MESSAGE,_SOURCE_REALTIME_TIMESTAMP,__REALTIME_TIMESTAMP,CONTAINER_ID,CONTAINER_ID_FULL,CONTAINER_NAME,PRIORITY,_BOOT_ID,_CAP_EFFECTIVE,_CMDLINE,_COMM,_EXE,_GID,_HOSTNAME,_MACHINE_ID,_PID,_SELINUX_CONTEXT,_SYSTEMD_CGROUP,_SYSTEMD_SLICE,_SYSTEMD_UNIT,_TRANSPORT,_UID",
                ),
        )
        .child(
            Block::new("formatter")
                .param(
                    "tag",
                    "\"k8s-audit.log** openshift-audit.log** ovn-audit.log**\"",
                )
                .param("type", "k8s_json_file")
                .param("remove_keys", "stream")
                .param("process_kubernetes_events", "'true'"),
        )
        .child(
            Block::new("formatter")
                .param("tag", "\"kubernetes.var.log.pods**\"")
                .param("type", "k8s_json_file")
                .param("remove_keys", "stream"),
        )
}

/// Common processing of the node logs and their routing by source type
pub fn ingress(ctx: &Context<'_>) -> Result<Vec<Block>> {
    let sources = required_sources(ctx)?;
    if sources.is_empty() {
        return Ok(vec![]);
    }
    let inputs = ctx.referenced_inputs()?;
    let has = |source: LogSource| sources.contains(&source);

    let mut label = Block::with_argument("label", label_name(INGRESS_LABEL));

    if has(LogSource::Journal) {
        label = label
            .child(
                Block::with_argument("filter", JOURNAL_TAG)
                    .param("@type", "grep")
                    .child(
                        Block::new("exclude")
                            .param("key", "PRIORITY")
                            .param("pattern", "^7$"),
                    ),
            )
            .child(
                Block::with_argument("match", JOURNAL_TAG)
                    .param("@type", "rewrite_tag_filter")
                    .param("@label", label_name(INGRESS_LABEL))
                    .child(
                        Block::new("rule")
                            .param("key", "_TRANSPORT")
                            .param("pattern", ".+")
                            .param("tag", "journal.system"),
                    ),
            );
    }
    if has(LogSource::OvnAudit) {
        label = label.child(
            Block::with_argument("filter", LogSource::OvnAudit.tag_pattern())
                .param("@type", "record_modifier")
                .child(
                    Block::new("record")
                        .param(
                            "@timestamp",
                            "${DateTime.parse(record['message'].split('|')[0]).rfc3339(6)}",
                        )
                        .param("level", "${record['message'].split('|')[3].downcase}"),
                ),
        );
    }
    if has(LogSource::Container) {
        label = label
            .child(
                Block::with_argument("filter", LogSource::Container.tag_pattern())
                    .param("@id", "kubernetes-metadata")
                    .param("@type", "kubernetes_metadata")
                    .param("kubernetes_url", "'https://kubernetes.default.svc'")
                    .param("annotation_match", r#"["^containerType\.logging\.openshift\.io\/.*$"]"#)
                    .param("allow_orphans", "false")
                    .param("cache_size", "'1000'")
                    .param("ssl_partial_chain", "'true'"),
            )
            .child(trace_context(LogSource::Container.tag_pattern()));
    }
    if has(LogSource::KubeApiAudit) {
        label = label.child(
            Block::with_argument("filter", LogSource::KubeApiAudit.tag_pattern())
                .param("@type", "record_modifier")
                .child(Block::new("record").param("k8s_audit_level", "${record['level']}")),
        );
    }
    if has(LogSource::OpenshiftAudit) {
        label = label.child(
            Block::with_argument("filter", LogSource::OpenshiftAudit.tag_pattern())
                .param("@type", "record_modifier")
                .child(
                    Block::new("record").param("openshift_audit_level", "${record['level']}"),
                ),
        );
    }
    label = label.child(viaq_data_model());

    let application = !inputs_of_type(&inputs, v1::InputType::Application).is_empty();
    let infrastructure = inputs_of_type(&inputs, v1::InputType::Infrastructure);
    let audit = !inputs_of_type(&inputs, v1::InputType::Audit).is_empty();

    let mut container_targets = vec![];
    if application {
        container_targets.push(label_name(APPLICATION_LABEL));
    }
    if infrastructure.iter().any(|input| reads_containers(input)) {
        container_targets.push(label_name(INFRASTRUCTURE_LABEL));
    }
    let journal_targets: Vec<String> = infrastructure
        .iter()
        .any(|input| reads_journal(input))
        .then(|| label_name(INFRASTRUCTURE_LABEL))
        .into_iter()
        .collect();
    let audit_targets: Vec<String> = audit
        .then(|| label_name(AUDIT_LABEL))
        .into_iter()
        .collect();
    let audit_patterns: Vec<&str> = AUDIT_SOURCES
        .iter()
        .map(|source| source.tag_pattern())
        .collect();

    label = label
        .child(dispatch(LogSource::Container.tag_pattern(), &container_targets))
        .child(dispatch(LogSource::Journal.tag_pattern(), &journal_targets))
        .child(dispatch(&audit_patterns.join(" "), &audit_targets))
        .child(Block::with_argument("match", "**").param("@type", "stdout"));

    Ok(vec![label])
}

/// One label per source type which sets the log type and passes the records to the inputs
pub fn source_types(ctx: &Context<'_>) -> Result<Vec<Block>> {
    let inputs = ctx.referenced_inputs()?;

    Ok([
        (v1::InputType::Application, APPLICATION_LABEL, v1::INPUT_NAME_APPLICATION),
        (v1::InputType::Infrastructure, INFRASTRUCTURE_LABEL, v1::INPUT_NAME_INFRASTRUCTURE),
        (v1::InputType::Audit, AUDIT_LABEL, v1::INPUT_NAME_AUDIT),
    ]
    .into_iter()
    .filter_map(|(type_, label, log_type)| {
        let targets: Vec<String> = inputs_of_type(&inputs, type_)
            .iter()
            .map(|input| input_label(&input.name))
            .collect();
        (!targets.is_empty()).then(|| {
            Block::with_argument("label", label_name(label))
                .child(set_log_type(log_type))
                .child(dispatch("**", &targets))
        })
    })
    .collect())
}

/// The Ruby expression which is true for the labels matching the selector
pub fn label_selector(selector: &LabelSelector) -> Option<String> {
    let mut conditions = vec![];
    for (key, value) in selector.match_labels.iter().flatten() {
        conditions.push(format!("l[{}] == {}", ruby_string(key), ruby_string(value)));
    }
    for requirement in selector.match_expressions.iter().flatten() {
        let key = ruby_string(&requirement.key);
        let values = ruby_strings(requirement.values.iter().flatten().map(String::as_str));
        conditions.push(match requirement.operator.as_str() {
            "In" => format!("{values}.include?(l[{key}])"),
            "NotIn" => format!("!{values}.include?(l[{key}])"),
            "Exists" => format!("l.key?({key})"),
            _ => format!("!l.key?({key})"),
        });
    }
    (!conditions.is_empty()).then(|| conditions.join(" && "))
}

fn namespace_container_condition(spec: &v1::NamespaceContainerSpec) -> String {
    let namespace = match &spec.namespace {
        Some(namespace) => format!("File.fnmatch({}, ns)", ruby_string(namespace)),
        None => "!infra".to_owned(),
    };
    match &spec.container {
        Some(container) => format!("({namespace} && File.fnmatch({}, c))", ruby_string(container)),
        None => format!("({namespace})"),
    }
}

/// Containers of infrastructure namespaces are only selected if an include names their
/// namespace
fn application_selection(application: &v1::Application) -> String {
    let included = if application.includes.is_empty() {
        "!infra".to_owned()
    } else {
        application
            .includes
            .iter()
            .map(namespace_container_condition)
            .collect::<Vec<_>>()
            .join(" || ")
    };
    let mut drop = format!(
        "ns = {NAMESPACE}; c = {CONTAINER}; infra = {}; !({included})",
        is_infrastructure_namespace()
    );
    if !application.excludes.is_empty() {
        let excluded: Vec<String> = application
            .excludes
            .iter()
            .map(|spec| {
                let mut spec = spec.clone();
                // an exclude without a namespace applies to every namespace
                if spec.namespace.is_none() {
                    spec.namespace = Some("*".to_owned());
                }
                namespace_container_condition(&spec)
            })
            .collect();
        drop.push_str(&format!(" || {}", excluded.join(" || ")));
    }
    if let Some(selector) = application.selector.as_ref().and_then(label_selector) {
        drop.push_str(&format!(
            " || !(lambda {{ |l| {selector} }}.call(record.dig('kubernetes', 'labels') || Hash.new))"
        ));
    }
    drop
}

fn infrastructure_selection(infrastructure: &v1::Infrastructure) -> String {
    let sources = infrastructure.effective_sources();
    let mut kept = vec![];
    if sources.contains(&v1::InfrastructureSource::Container) {
        kept.push(format!(
            "(tag.start_with?('kubernetes.') && {})",
            is_infrastructure_namespace()
        ));
    }
    if sources.contains(&v1::InfrastructureSource::Node) {
        kept.push(format!("tag.start_with?('{JOURNAL_TAG}')"));
    }
    format!("ns = {NAMESPACE}; !({})", kept.join(" || "))
}

fn audit_selection(audit: &v1::Audit) -> Option<String> {
    let selected: BTreeSet<v1::AuditSource> = audit.effective_sources().into_iter().collect();
    if selected.len() == 4 {
        return None;
    }
    let prefixes: Vec<&str> = selected
        .iter()
        .map(|source| {
            let pattern = match source {
                v1::AuditSource::Auditd => LogSource::HostAudit,
                v1::AuditSource::KubeApi => LogSource::KubeApiAudit,
                v1::AuditSource::OpenshiftApi => LogSource::OpenshiftAudit,
                v1::AuditSource::Ovn => LogSource::OvnAudit,
            }
            .tag_pattern();
            pattern.trim_end_matches('*')
        })
        .collect();
    Some(format!(
        "!{}.any? {{ |p| tag.start_with?(p) }}",
        ruby_strings(prefixes)
    ))
}

/// One label per referenced input which selects its records and passes them to its pipelines
pub fn inputs(ctx: &Context<'_>) -> Result<Vec<Block>> {
    ctx.referenced_inputs()?
        .iter()
        .map(|input| {
            let mut label = Block::with_argument("label", input_label(&input.name));

            let selection = match input.type_ {
                v1::InputType::Application => Some(application_selection(
                    &input.application.clone().unwrap_or_default(),
                )),
                v1::InputType::Infrastructure => Some(infrastructure_selection(
                    &input.infrastructure.clone().unwrap_or_default(),
                )),
                v1::InputType::Audit => audit_selection(&input.audit.clone().unwrap_or_default()),
                v1::InputType::Receiver => {
                    let log_type = match input.receiver.as_ref().map(|receiver| receiver.type_) {
                        Some(v1::ReceiverType::Syslog) => v1::INPUT_NAME_INFRASTRUCTURE,
                        _ => v1::INPUT_NAME_AUDIT,
                    };
                    label = label.child(set_log_type(log_type));
                    None
                }
            };
            if let Some(selection) = selection {
                label = label.children(drop_where(&selection));
            }

            let targets: Vec<String> = ctx
                .pipelines_of_input(&input.name)
                .iter()
                .map(|pipeline| label_name(&pipeline.name))
                .collect();
            Ok(label.child(dispatch("**", &targets)))
        })
        .collect()
}

/// One label per pipeline which applies its filters and passes the records to its outputs
pub fn pipelines(ctx: &Context<'_>) -> Result<Vec<Block>> {
    ctx.spec
        .pipelines
        .iter()
        .map(|pipeline| {
            let pipeline_filters = pipeline
                .filter_refs
                .iter()
                .map(|name| {
                    ctx.filter(name).ok_or_else(|| Error::UnknownFilter {
                        pipeline: pipeline.name.clone(),
                        name: name.clone(),
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            let targets = pipeline
                .output_refs
                .iter()
                .map(|name| {
                    ctx.output(name)
                        .map(|output| label_name(&output.name))
                        .ok_or_else(|| Error::UnknownOutput {
                            pipeline: pipeline.name.clone(),
                            name: name.clone(),
                        })
                })
                .collect::<Result<Vec<_>>>()?;

            // detect_exceptions emits the joined records again at the start of the label
            let detect_multiline = pipeline_filters
                .iter()
                .any(|filter| filter.type_ == v1::FilterType::DetectMultiline);

            Ok(Block::with_argument("label", label_name(&pipeline.name))
                .when(detect_multiline, |label| label.child(filters::detect_multiline()))
                .children(
                    pipeline_filters
                        .iter()
                        .flat_map(|filter| filters::filter_blocks(filter)),
                )
                .child(dispatch("**", &targets)))
        })
        .collect()
}

/// One label per referenced output with the blocks of its plugin
pub fn outputs(ctx: &Context<'_>) -> Result<Vec<Block>> {
    ctx.referenced_outputs()
        .into_iter()
        .map(|output| {
            let plugin =
                ctx.plugins
                    .get(output.type_)
                    .ok_or_else(|| Error::UnsupportedOutputType {
                        output: output.name.clone(),
                        output_type: output.type_,
                    })?;
            Ok(Block::with_argument("label", label_name(&output.name))
                .children(plugin.emit(output, ctx)?))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::is_reserved_label;

    #[test]
    fn test_is_reserved_label() {
        for reserved in [
            "ingress",
            "concat",
            "_application",
            "_infrastructure",
            "-audit",
            "_input_app",
            "error",
            "fluent-log",
        ] {
            assert!(is_reserved_label(reserved), "{reserved}");
        }
        for name in ["es", "app-to-es", "ingress-logs", "errors", "input_app"] {
            assert!(!is_reserved_label(name), "{name}");
        }
    }
}
