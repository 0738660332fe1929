use crate::{
    controller::conditions::{Entry, StatusCondition},
    crd::observability::v1,
    generator::{elements::label_name, routing::is_reserved_label},
};

pub fn validate(spec: &v1::ClusterLogForwarderSpec) -> Vec<StatusCondition> {
    spec.pipelines
        .iter()
        .enumerate()
        .map(|(index, pipeline)| {
            let mut messages = vec![];

            if pipeline.name.is_empty() {
                messages.push(format!("pipeline[{index}] must have a name"));
            } else if is_reserved_label(&pipeline.name) {
                messages.push(format!(
                    "pipeline name {:?} is reserved for internal routing",
                    pipeline.name
                ));
            } else if let Some(other) = spec.pipelines[..index]
                .iter()
                .find(|other| label_name(&other.name) == label_name(&pipeline.name))
            {
                messages.push(if other.name == pipeline.name {
                    format!("pipeline name {:?} is not unique", pipeline.name)
                } else {
                    format!(
                        "pipeline name {:?} cannot be told apart from the pipeline {:?}",
                        pipeline.name, other.name
                    )
                });
            } else if let Some(output) = spec
                .outputs
                .iter()
                .find(|output| label_name(&output.name) == label_name(&pipeline.name))
            {
                messages.push(format!(
                    "pipeline name {:?} cannot be told apart from the output {:?}",
                    pipeline.name, output.name
                ));
            }

            if pipeline.input_refs.is_empty() {
                messages.push("pipeline must reference at least one input".to_owned());
            }
            if pipeline.output_refs.is_empty() {
                messages.push("pipeline must reference at least one output".to_owned());
            }

            let unknown_inputs = unknown(&pipeline.input_refs, |name| {
                spec.resolve_input(name).is_some()
            });
            if !unknown_inputs.is_empty() {
                messages.push(format!("inputs not found: {unknown_inputs:?}"));
            }
            let unknown_outputs =
                unknown(&pipeline.output_refs, |name| spec.output(name).is_some());
            if !unknown_outputs.is_empty() {
                messages.push(format!("outputs not found: {unknown_outputs:?}"));
            }
            let unknown_filters =
                unknown(&pipeline.filter_refs, |name| spec.filter(name).is_some());
            if !unknown_filters.is_empty() {
                messages.push(format!("filters not found: {unknown_filters:?}"));
            }

            if messages.is_empty() {
                StatusCondition::valid_entry(Entry::Pipeline, &pipeline.name)
            } else {
                StatusCondition::invalid_entry(Entry::Pipeline, &pipeline.name, messages.join(", "))
            }
        })
        .collect()
}

fn unknown<'a>(references: &'a [String], exists: impl Fn(&str) -> bool) -> Vec<&'a str> {
    references
        .iter()
        .map(String::as_str)
        .filter(|&name| !exists(name))
        .collect()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::validate;
    use crate::generator::test_support::spec;

    #[test]
    fn test_references_must_resolve() {
        let conditions = validate(&spec(
            "
            serviceAccount: {name: logcollector}
            outputs:
              - name: es
                type: elasticsearch
                elasticsearch: {url: https://es.example.com, index: app, version: 8}
            filters:
              - name: parse
                type: parse
            pipelines:
              - name: valid
                inputRefs: [application, audit]
                outputRefs: [es]
                filterRefs: [parse]
              - name: broken
                inputRefs: [my-apps]
                outputRefs: [es, default]
                filterRefs: [labels]
              - name: valid
                inputRefs: [infrastructure]
                outputRefs: []
            ",
        ));

        let results: Vec<(bool, &str)> = conditions
            .iter()
            .map(|condition| (condition.status, condition.message.as_str()))
            .collect();
        assert_eq!(
            vec![
                (true, "pipeline \"valid\" is valid"),
                (
                    false,
                    "inputs not found: [\"my-apps\"], outputs not found: [\"default\"], \
                    filters not found: [\"labels\"]"
                ),
                (
                    false,
                    "pipeline name \"valid\" is not unique, pipeline must reference at least one \
                    output"
                ),
            ],
            results
        );
    }

    #[test]
    fn test_names_must_map_to_distinct_labels() {
        let conditions = validate(&spec(
            "
            serviceAccount: {name: logcollector}
            outputs:
              - {name: es, type: http, http: {url: https://a.example.com}}
            pipelines:
              - {name: es, inputRefs: [application], outputRefs: [es]}
              - {name: to-es, inputRefs: [application], outputRefs: [es]}
              - {name: to.es, inputRefs: [audit], outputRefs: [es]}
              - {name: ingress, inputRefs: [audit], outputRefs: [es]}
            ",
        ));

        let results: Vec<(bool, &str)> = conditions
            .iter()
            .map(|condition| (condition.status, condition.message.as_str()))
            .collect();
        assert_eq!(
            vec![
                (
                    false,
                    "pipeline name \"es\" cannot be told apart from the output \"es\""
                ),
                (true, "pipeline \"to-es\" is valid"),
                (
                    false,
                    "pipeline name \"to.es\" cannot be told apart from the pipeline \"to-es\""
                ),
                (false, "pipeline name \"ingress\" is reserved for internal routing"),
            ],
            results
        );
    }
}
