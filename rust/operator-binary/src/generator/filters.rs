//! The user defined filters of a pipeline
//!
//! Filters which need more than a fluentd plugin parameter are Ruby expressions evaluated by
//! `record_modifier`. A value consisting of a single `${...}` is evaluated as Ruby code, so the
//! expressions are free to use blocks and semicolons but must stay on one line.

use std::collections::BTreeMap;

use super::{
    elements::Block,
    template::{record_dig, split_path},
};
use crate::crd::{
    common::{AuditPolicyRule, DropCondition, DropTest, KubeApiAudit, PruneFilterSpec},
    observability::v1,
};

const DROP_KEY: &str = "_drop_";
const DUMMY_KEY: &str = "_dummy_";

/// Response codes which are omitted if the filter does not name any
pub const DEFAULT_OMITTED_RESPONSE_CODES: [i32; 4] = [404, 409, 422, 429];

const READ_ONLY_VERBS: [&str; 3] = ["get", "list", "watch"];

/// The filter blocks of a pipeline; `detectMultiline` is handled by [`detect_multiline`]
pub fn filter_blocks(filter: &v1::FilterSpec) -> Vec<Block> {
    match filter.type_ {
        v1::FilterType::DetectMultiline => vec![],
        v1::FilterType::Drop => filter.drop.as_deref().map(drop_records).unwrap_or_default(),
        v1::FilterType::KubeApiAudit => {
            kube_api_audit(&filter.kube_api_audit.clone().unwrap_or_default())
        }
        v1::FilterType::OpenshiftLabels => filter
            .openshift_labels
            .as_ref()
            .filter(|labels| !labels.is_empty())
            .map(|labels| vec![openshift_labels(labels)])
            .unwrap_or_default(),
        v1::FilterType::Parse => vec![parse_json()],
        v1::FilterType::Prune => filter.prune.as_ref().map(prune).unwrap_or_default(),
    }
}

/// Drops every record for which the Ruby expression is true
///
/// The expression may modify the record before it is evaluated.
pub fn drop_where(condition: &str) -> Vec<Block> {
    vec![
        Block::with_argument("filter", "**")
            .param("@type", "record_modifier")
            .child(Block::new("record").param(DROP_KEY, format!("${{{condition}}}"))),
        Block::with_argument("filter", "**")
            .param("@type", "grep")
            .child(
                Block::new("exclude")
                    .param("key", DROP_KEY)
                    .param("pattern", "/^true$/"),
            ),
        Block::with_argument("filter", "**")
            .param("@type", "record_modifier")
            .param("remove_keys", DROP_KEY),
    ]
}

/// Runs a Ruby statement for its side effects on the records with matching tags
pub fn mutate(pattern: &str, statement: &str) -> Block {
    Block::with_argument("filter", pattern)
        .param("@type", "record_modifier")
        .param("remove_keys", DUMMY_KEY)
        .child(Block::new("record").param(DUMMY_KEY, format!("${{{statement}; nil}}")))
}

/// A single quoted Ruby string
pub fn ruby_string(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// A Ruby array of single quoted strings
pub fn ruby_strings<'a>(values: impl IntoIterator<Item = &'a str>) -> String {
    let values: Vec<String> = values.into_iter().map(ruby_string).collect();
    format!("[{}]", values.join(", "))
}

fn field(path: &str) -> String {
    record_dig(&split_path(path))
}

fn condition(condition: &DropCondition) -> String {
    let value = field(&condition.field);
    let matches = |pattern: &str| {
        format!(
            "(!{value}.nil? && {value}.to_s.match?(Regexp.new({})))",
            ruby_string(pattern)
        )
    };
    match (&condition.matches, &condition.not_matches) {
        (Some(pattern), _) => matches(pattern),
        (None, Some(pattern)) => format!("!{}", matches(pattern)),
        (None, None) => "true".to_owned(),
    }
}

/// A record is dropped if all conditions of any test hold
pub fn drop_records(tests: &[DropTest]) -> Vec<Block> {
    let tests: Vec<String> = tests
        .iter()
        .filter(|test| !test.conditions.is_empty())
        .map(|test| {
            let conditions: Vec<String> = test.conditions.iter().map(condition).collect();
            format!("({})", conditions.join(" && "))
        })
        .collect();
    if tests.is_empty() {
        return vec![];
    }
    drop_where(&tests.join(" || "))
}

/// Removes the fields in `in`, then keeps only the fields in `notIn`
pub fn prune(prune: &PruneFilterSpec) -> Vec<Block> {
    let mut blocks = vec![];

    if let Some(paths) = prune.r#in.as_ref().filter(|paths| !paths.is_empty()) {
        let statements: Vec<String> = paths
            .iter()
            .map(|path| {
                let mut segments = split_path(path);
                let last = segments.pop().unwrap_or_default();
                if segments.is_empty() {
                    format!("record.delete({last:?})")
                } else {
                    format!(
                        "(h = {}).is_a?(Hash) && h.delete({last:?})",
                        record_dig(&segments)
                    )
                }
            })
            .collect();
        blocks.push(mutate("**", &statements.join("; ")));
    }

    if let Some(paths) = prune.not_in.as_ref().filter(|paths| !paths.is_empty()) {
        let kept: Vec<String> = paths
            .iter()
            .map(|path| format!("{:?}", split_path(path)))
            .collect();
        let statement = format!(
            "kept = Hash.new; [{}].each {{ |p| v = record.dig(*p); next if v.nil?; \
             parent = p[0..-2].inject(kept) {{ |h, k| h[k] = Hash.new unless h[k].is_a?(Hash); h[k] }}; \
             parent[p[-1]] = v }}; record.replace(kept)",
            kept.join(", ")
        );
        blocks.push(mutate("**", &statement));
    }

    blocks
}

/// Merges the labels into `openshift.labels`
pub fn openshift_labels(labels: &BTreeMap<String, String>) -> Block {
    let pairs: Vec<String> = labels
        .iter()
        .map(|(key, value)| format!("[{}, {}]", ruby_string(key), ruby_string(value)))
        .collect();
    let statement = format!(
        "o = (record['openshift'] ||= Hash.new); \
         o['labels'] = (o['labels'] || Hash.new).merge(Hash[[{}]])",
        pairs.join(", ")
    );
    mutate("**", &statement)
}

/// Parses a JSON message into `structured`
pub fn parse_json() -> Block {
    Block::with_argument("filter", "**")
        .param("@type", "parser")
        .param("key_name", "message")
        .param("reserve_data", "true")
        .param("hash_value_field", "structured")
        .param("remove_key_name_field", "false")
        .param("emit_invalid_record_to_error", "false")
        .child(Block::new("parse").param("@type", "json"))
}

/// Joins the lines of a stack trace into one record
///
/// The records are emitted again at the start of the label without the `kubernetes` tag prefix.
pub fn detect_multiline() -> Block {
    Block::with_argument("match", "kubernetes.**")
        .param("@type", "detect_exceptions")
        .param("remove_tag_prefix", "'kubernetes'")
        .param("message", "message")
        .param("force_line_breaks", "true")
        .param("multiline_flush_interval", ".2")
}

fn glob_match(patterns: &[String], value: &str) -> String {
    format!(
        "{}.any? {{ |p| File.fnmatch(p, {value}) }}",
        ruby_strings(patterns.iter().map(String::as_str))
    )
}

fn rule_condition(rule: &AuditPolicyRule) -> String {
    let mut conditions = vec![];
    if !rule.users.is_empty() {
        conditions.push(glob_match(&rule.users, "u"));
    }
    if !rule.user_groups.is_empty() {
        conditions.push(format!(
            "g.any? {{ |x| {} }}",
            glob_match(&rule.user_groups, "x")
        ));
    }
    if !rule.verbs.is_empty() {
        conditions.push(format!(
            "{}.include?(v)",
            ruby_strings(rule.verbs.iter().map(String::as_str))
        ));
    }
    if !rule.namespaces.is_empty() {
        conditions.push(format!(
            "{}.include?(o['namespace'].to_s)",
            ruby_strings(rule.namespaces.iter().map(String::as_str))
        ));
    }
    if !rule.resources.is_empty() {
        let resources: Vec<String> = rule
            .resources
            .iter()
            .map(|group| {
                let mut condition = format!("o['apiGroup'].to_s == {}", ruby_string(&group.group));
                if !group.resources.is_empty() {
                    condition.push_str(" && ");
                    condition.push_str(&glob_match(&group.resources, "o['resource'].to_s"));
                }
                format!("({condition})")
            })
            .collect();
        conditions.push(resources.join(" || "));
    }

    if conditions.is_empty() {
        "true".to_owned()
    } else {
        conditions
            .iter()
            .map(|condition| format!("({condition})"))
            .collect::<Vec<_>>()
            .join(" && ")
    }
}

/// The Ruby expression which selects the audit level of an event
///
/// The first matching rule wins. Events matching no rule get the default level: read-only
/// requests of system users are not logged, other system requests are logged with their
/// request and requests of users with request and response.
fn audit_level(rules: &[AuditPolicyRule]) -> String {
    let read_only = ruby_strings(READ_ONLY_VERBS);
    let default = format!(
        "(u.start_with?('system:') && {read_only}.include?(v)) ? 'None' : \
         ((u.empty? || u.start_with?('system:')) ? 'Request' : 'RequestResponse')"
    );
    let mut expression = String::new();
    for (index, rule) in rules.iter().enumerate() {
        let keyword = if index == 0 { "if" } else { "elsif" };
        expression.push_str(&format!(
            "{keyword} {} then {} ",
            rule_condition(rule),
            ruby_string(&rule.level)
        ));
    }
    if expression.is_empty() {
        format!("({default})")
    } else {
        format!("({expression}else {default} end)")
    }
}

/// Applies an audit policy to Kubernetes API audit events
pub fn kube_api_audit(audit: &KubeApiAudit) -> Vec<Block> {
    let codes = audit
        .omit_response_codes
        .clone()
        .unwrap_or_else(|| DEFAULT_OMITTED_RESPONSE_CODES.to_vec());
    let codes: Vec<String> = codes.iter().map(i32::to_string).collect();

    let policy = format!(
        "lambda {{ |e| \
         return false unless e['kind'] == 'Event'; \
         return true if {stages}.include?(e['stage']); \
         return true if [{codes}].include?(e.dig('responseStatus', 'code')); \
         u = e.dig('user', 'username').to_s; g = Array(e.dig('user', 'groups')); \
         v = e['verb'].to_s; o = e['objectRef'] || Hash.new; \
         level = {level}; e['level'] = level; \
         return true if level == 'None'; \
         e.delete('responseObject') unless level == 'RequestResponse'; \
         e.delete('requestObject') if level == 'Metadata'; \
         false }}.call(record)",
        stages = ruby_strings(audit.omit_stages.iter().map(String::as_str)),
        codes = codes.join(", "),
        level = audit_level(&audit.rules),
    );
    drop_where(&policy)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use pretty_assertions::assert_eq;

    use super::{drop_records, filter_blocks, kube_api_audit, openshift_labels, prune, ruby_string};
    use crate::crd::{
        common::{AuditPolicyRule, KubeApiAudit, PruneFilterSpec},
        observability::v1,
    };

    fn filter(yaml: &str) -> v1::FilterSpec {
        serde_yaml::from_str(yaml).expect("should be a valid filter")
    }

    #[test]
    fn test_ruby_string_escapes_quotes() {
        assert_eq!(r"'it\'s a \\d'", ruby_string(r"it's a \d"));
    }

    #[test]
    fn test_drop_any_test_with_all_conditions() {
        let filter = filter(
            r#"
            name: drop-debug
            type: drop
            drop:
              - test:
                  - field: .kubernetes.namespace_name
                    matches: "^open"
                  - field: .level
                    notMatches: "error"
              - test:
                  - field: .message
                    matches: "healthz"
            "#,
        );

        let blocks = drop_records(filter.drop.as_deref().unwrap_or_default());

        assert_eq!(3, blocks.len());
        assert_eq!(
            concat!(
                "<filter **>\n",
                "  @type record_modifier\n",
                "  <record>\n",
                "    _drop_ ${",
                "((!record.dig(\"kubernetes\",\"namespace_name\").nil? && record.dig(\"kubernetes\",\"namespace_name\").to_s.match?(Regexp.new('^open'))) && ",
                "!(!record.dig(\"level\").nil? && record.dig(\"level\").to_s.match?(Regexp.new('error')))) || ",
                "((!record.dig(\"message\").nil? && record.dig(\"message\").to_s.match?(Regexp.new('healthz'))))",
                "}\n",
                "  </record>\n",
                "</filter>\n",
            ),
            blocks[0].to_string()
        );
        assert_eq!(
            concat!(
                "<filter **>\n",
                "  @type grep\n",
                "  <exclude>\n",
                "    key _drop_\n",
                "    pattern /^true$/\n",
                "  </exclude>\n",
                "</filter>\n",
            ),
            blocks[1].to_string()
        );
    }

    #[test]
    fn test_drop_without_tests_is_empty() {
        assert_eq!(0, drop_records(&[]).len());
    }

    #[test]
    fn test_prune_in_and_not_in() {
        let blocks = prune(&PruneFilterSpec {
            r#in: Some(vec![
                ".kubernetes.labels".to_owned(),
                ".hostname".to_owned(),
            ]),
            not_in: Some(vec![
                ".log_type".to_owned(),
                ".kubernetes.\"app.io/name\"".to_owned(),
            ]),
        });

        assert_eq!(2, blocks.len());
        assert!(blocks[0].to_string().contains(concat!(
            "    _dummy_ ${(h = record.dig(\"kubernetes\")).is_a?(Hash) && h.delete(\"labels\"); ",
            "record.delete(\"hostname\"); nil}\n",
        )));
        assert!(blocks[0].to_string().contains("  remove_keys _dummy_\n"));
        assert!(
            blocks[1]
                .to_string()
                .contains(r#"kept = Hash.new; [["log_type"], ["kubernetes", "app.io/name"]].each {"#)
        );
    }

    #[test]
    fn test_openshift_labels_are_sorted() {
        let labels = BTreeMap::from([
            ("zone".to_owned(), "east".to_owned()),
            ("cluster".to_owned(), "prod's".to_owned()),
        ]);

        assert!(openshift_labels(&labels).to_string().contains(
            r"merge(Hash[[['cluster', 'prod\'s'], ['zone', 'east']]]); nil}"
        ));
    }

    #[test]
    fn test_detect_multiline_has_no_filter_blocks() {
        let filter = filter("{name: multiline, type: detectMultiline}");

        assert_eq!(0, filter_blocks(&filter).len());
    }

    #[test]
    fn test_kube_api_audit_rules_in_order() {
        let blocks = kube_api_audit(&KubeApiAudit {
            rules: vec![
                AuditPolicyRule {
                    level: "None".to_owned(),
                    verbs: vec!["watch".to_owned()],
                    ..AuditPolicyRule::default()
                },
                AuditPolicyRule {
                    level: "Metadata".to_owned(),
                    users: vec!["system:*".to_owned()],
                    ..AuditPolicyRule::default()
                },
            ],
            omit_stages: vec!["RequestReceived".to_owned()],
            omit_response_codes: None,
        });

        let policy = blocks[0].to_string();
        assert!(policy.contains("return true if ['RequestReceived'].include?(e['stage']);"));
        assert!(policy.contains("return true if [404, 409, 422, 429].include?(e.dig('responseStatus', 'code'));"));
        assert!(policy.contains(concat!(
            "level = (if (['watch'].include?(v)) then 'None' ",
            "elsif (['system:*'].any? { |p| File.fnmatch(p, u) }) then 'Metadata' else ",
        )));
    }

    #[test]
    fn test_kube_api_audit_explicitly_no_omitted_codes() {
        let blocks = kube_api_audit(&KubeApiAudit {
            omit_response_codes: Some(vec![]),
            ..KubeApiAudit::default()
        });

        assert!(blocks[0].to_string().contains("return true if [].include?(e.dig('responseStatus', 'code'));"));
    }
}
