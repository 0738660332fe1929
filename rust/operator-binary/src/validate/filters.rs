use regex::Regex;

use crate::{
    controller::conditions::{Entry, StatusCondition},
    crd::{
        common::{DropTest, PruneFilterSpec},
        observability::v1,
    },
    framework::validation::is_field_path,
};

/// Fields without which a record cannot be routed and delivered
const REQUIRED_FIELDS: [&str; 3] = [".log_type", ".log_source", ".message"];

pub fn validate(spec: &v1::ClusterLogForwarderSpec) -> Vec<StatusCondition> {
    spec.filters
        .iter()
        .enumerate()
        .map(|(index, filter)| {
            let mut messages = vec![];

            if filter.name.is_empty() {
                messages.push(format!("filter[{index}] must have a name"));
            } else if spec.filters[..index]
                .iter()
                .any(|other| other.name == filter.name)
            {
                messages.push(format!("filter name {:?} is not unique", filter.name));
            }

            match filter.type_ {
                v1::FilterType::Drop => {
                    messages.extend(validate_drop(filter.drop.as_deref().unwrap_or_default()))
                }
                v1::FilterType::Prune => messages.extend(validate_prune(filter.prune.as_ref())),
                v1::FilterType::OpenshiftLabels => {
                    if filter
                        .openshift_labels
                        .as_ref()
                        .is_none_or(|labels| labels.is_empty())
                    {
                        messages.push(
                            "openshiftLabels filter requires at least one label".to_owned(),
                        );
                    }
                }
                v1::FilterType::DetectMultiline
                | v1::FilterType::KubeApiAudit
                | v1::FilterType::Parse => {}
            }

            if messages.is_empty() {
                StatusCondition::valid_entry(Entry::Filter, &filter.name)
            } else {
                StatusCondition::invalid_entry(Entry::Filter, &filter.name, messages.join(", "))
            }
        })
        .collect()
}

fn validate_drop(tests: &[DropTest]) -> Vec<String> {
    if tests.is_empty() {
        return vec!["drop filter must have at least one test".to_owned()];
    }

    let mut messages = vec![];
    for (index, test) in tests.iter().enumerate() {
        for condition in &test.conditions {
            if let Err(error) = is_field_path(&condition.field) {
                messages.push(format!("test[{index}]: {error}"));
            }
            match (&condition.matches, &condition.not_matches) {
                (Some(pattern), None) | (None, Some(pattern)) => {
                    if Regex::new(pattern).is_err() {
                        messages.push(format!(
                            "test[{index}]: {pattern:?} is not a valid regular expression"
                        ));
                    }
                }
                _ => messages.push(format!(
                    "test[{index}]: exactly one of matches or notMatches must be set"
                )),
            }
        }
    }
    messages
}

fn validate_prune(prune: Option<&PruneFilterSpec>) -> Vec<String> {
    let (included, excluded) = match prune {
        Some(PruneFilterSpec {
            r#in: None,
            not_in: None,
        })
        | None => return vec!["prune filter requires one or both of in and notIn".to_owned()],
        Some(prune) => (prune.r#in.as_deref(), prune.not_in.as_deref()),
    };

    let mut messages: Vec<String> = included
        .into_iter()
        .chain(excluded)
        .flatten()
        .filter_map(|path| is_field_path(path).err())
        .map(|error| error.to_string())
        .collect();

    if let Some(included) = included {
        let pruned_required: Vec<&str> = REQUIRED_FIELDS
            .into_iter()
            .filter(|field| included.iter().any(|path| path == field))
            .collect();
        if !pruned_required.is_empty() {
            messages.push(format!(
                "{pruned_required:?} are required fields and must be removed from the in list"
            ));
        }
    }

    if let Some(excluded) = excluded {
        let missing_required: Vec<&str> = REQUIRED_FIELDS
            .into_iter()
            .filter(|field| !excluded.iter().any(|path| path == field))
            .collect();
        if !missing_required.is_empty() {
            messages.push(format!(
                "{missing_required:?} are required fields and must be included in the notIn list"
            ));
        }
    }

    messages
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::validate;
    use crate::generator::test_support::spec;

    fn results(filters: &str) -> Vec<(bool, String)> {
        validate(&spec(&format!(
            "{{serviceAccount: {{name: logcollector}}, pipelines: [], filters: {filters}}}"
        )))
        .into_iter()
        .map(|condition| (condition.status, condition.message))
        .collect()
    }

    #[test]
    fn test_drop_filter() {
        let results = results(
            r#"[
                {name: no-tests, type: drop, drop: []},
                {name: valid, type: drop, drop: [{test: [{field: .level, matches: "debug|trace"}]}]},
                {name: both, type: drop, drop: [{test: [{field: .level, matches: a, notMatches: b}]}]},
                {name: bad-regex, type: drop, drop: [{test: [{field: .level, notMatches: "("}]}]},
                {name: bad-path, type: drop, drop: [{test: [{field: level, matches: a}]}]}
            ]"#,
        );

        assert_eq!(
            vec![false, true, false, false, false],
            results.iter().map(|(status, _)| *status).collect::<Vec<_>>()
        );
        assert_eq!("drop filter must have at least one test", results[0].1);
        assert_eq!(
            "test[0]: exactly one of matches or notMatches must be set",
            results[2].1
        );
        assert_eq!(
            "test[0]: \"(\" is not a valid regular expression",
            results[3].1
        );
        assert!(results[4].1.starts_with("test[0]: value \"level\" does not match"));
    }

    #[test]
    fn test_prune_filter() {
        let results = results(
            r#"[
                {name: empty, type: prune, prune: {}},
                {name: in, type: prune, prune: {in: [.kubernetes.labels, .message]}},
                {name: not-in, type: prune, prune: {notIn: [.log_type, .message]}},
                {name: valid, type: prune, prune: {in: [.kubernetes.annotations], notIn: [.log_type, .log_source, .message, .hostname]}}
            ]"#,
        );

        assert_eq!(
            vec![
                (false, "prune filter requires one or both of in and notIn".to_owned()),
                (
                    false,
                    "[\".message\"] are required fields and must be removed from the in list"
                        .to_owned()
                ),
                (
                    false,
                    "[\".log_source\"] are required fields and must be included in the notIn list"
                        .to_owned()
                ),
                (true, "filter \"valid\" is valid".to_owned()),
            ],
            results
        );
    }

    #[test]
    fn test_duplicate_names() {
        let results = results(
            "[{name: parse, type: parse}, {name: parse, type: detectMultiline}]",
        );

        assert!(results[0].0);
        assert_eq!((false, "filter name \"parse\" is not unique".to_owned()), results[1]);
    }
}
