use crate::{
    controller::conditions::{Entry, StatusCondition},
    crd::observability::{OUTPUT_NAME_DEFAULT, v1},
    generator::{elements::label_name, routing::is_reserved_label},
    outputs::OutputPlugins,
    secrets::LoadedSecrets,
};

pub fn validate(
    spec: &v1::ClusterLogForwarderSpec,
    plugins: &OutputPlugins,
    loaded: &LoadedSecrets,
) -> Vec<StatusCondition> {
    spec.outputs
        .iter()
        .enumerate()
        .map(|(index, output)| {
            let mut messages = vec![];

            if output.name.is_empty() {
                messages.push(format!("output[{index}] must have a name"));
            } else if output.name == OUTPUT_NAME_DEFAULT {
                messages.push(format!(
                    "output name {OUTPUT_NAME_DEFAULT:?} is reserved"
                ));
            } else if is_reserved_label(&output.name) {
                messages.push(format!(
                    "output name {:?} is reserved for internal routing",
                    output.name
                ));
            } else if let Some(other) = spec.outputs[..index]
                .iter()
                .find(|other| label_name(&other.name) == label_name(&output.name))
            {
                messages.push(if other.name == output.name {
                    format!("output name {:?} is not unique", output.name)
                } else {
                    format!(
                        "output name {:?} cannot be told apart from the output {:?}",
                        output.name, other.name
                    )
                });
            }

            let configured_types = output.configured_types();
            if configured_types != [output.type_] {
                messages.push(format!(
                    "{} output must set exactly the {} block",
                    output.type_, output.type_
                ));
            }

            if let Some(rate_limit) = output.rate_limit {
                if rate_limit.max_records_per_second <= 0 {
                    messages.push("rateLimit.maxRecordsPerSecond must be positive".to_owned());
                }
            }

            if messages.is_empty() {
                if let Some(missing) = loaded.missing.get(&output.name) {
                    return missing.clone();
                }
                match plugins.get(output.type_) {
                    Some(plugin) => messages.extend(plugin.validate(output, &loaded.secrets)),
                    None => messages.push(format!(
                        "output type {} is not supported",
                        output.type_
                    )),
                }
            }

            if messages.is_empty() {
                StatusCondition::valid_entry(Entry::Output, &output.name)
            } else {
                StatusCondition::invalid_entry(Entry::Output, &output.name, messages.join(", "))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use pretty_assertions::assert_eq;

    use super::validate;
    use crate::{
        controller::conditions::{Entry, Reason, StatusCondition},
        generator::test_support::spec,
        outputs::{OutputPlugins, test_support::secret},
        secrets::{LoadedSecrets, Secrets},
    };

    const OUTPUTS: &str = "
        serviceAccount: {name: logcollector}
        outputs:
          - name: default
            type: http
            http: {url: https://collector.example.com}
          - name: es
            type: elasticsearch
            elasticsearch:
              url: https://es.example.com:9200
              index: app
              version: 8
              authentication:
                username: {secretName: es-secret, key: username}
                password: {secretName: es-secret, key: password}
          - name: es
            type: elasticsearch
            elasticsearch: {url: https://other.example.com, index: app, version: 8}
          - name: mixed
            type: http
            http: {url: https://collector.example.com}
            syslog: {url: tcp://syslog.example.com:514}
          - name: no-scheme
            type: http
            http: {url: collector.example.com}
        pipelines: []
        ";

    #[test]
    fn test_validate_outputs() {
        let loaded = LoadedSecrets {
            secrets: Secrets::from_iter([(
                "es-secret".to_owned(),
                secret("es-secret", &["username", "password"]),
            )]),
            missing: BTreeMap::new(),
        };

        let results: Vec<(bool, String)> =
            validate(&spec(OUTPUTS), &OutputPlugins::register_all(), &loaded)
                .into_iter()
                .map(|condition| (condition.status, condition.message))
                .collect();

        assert_eq!(
            (false, "output name \"default\" is reserved".to_owned()),
            results[0]
        );
        assert_eq!((true, "output \"es\" is valid".to_owned()), results[1]);
        assert_eq!(
            (false, "output name \"es\" is not unique".to_owned()),
            results[2]
        );
        assert_eq!(
            (
                false,
                "http output must set exactly the http block".to_owned()
            ),
            results[3]
        );
        assert!(!results[4].0);
    }

    #[test]
    fn test_missing_secret_is_reported_as_missing_resource() {
        let missing = StatusCondition::missing_resource(
            Entry::Output,
            "es",
            "secrets not found: es-secret",
        );
        let loaded = LoadedSecrets {
            secrets: Secrets::new(),
            missing: BTreeMap::from([("es".to_owned(), missing.clone())]),
        };

        let conditions = validate(&spec(OUTPUTS), &OutputPlugins::register_all(), &loaded);

        assert_eq!(missing, conditions[1]);
        assert_eq!(Reason::MissingResource, conditions[1].reason);
    }

    #[test]
    fn test_names_must_map_to_distinct_labels() {
        let conditions = validate(
            &spec(
                "
                serviceAccount: {name: logcollector}
                outputs:
                  - {name: es, type: http, http: {url: https://a.example.com}}
                  - {name: my-out, type: http, http: {url: https://b.example.com}}
                  - {name: my_out, type: http, http: {url: https://c.example.com}}
                  - {name: concat, type: http, http: {url: https://d.example.com}}
                pipelines: []
                ",
            ),
            &OutputPlugins::register_all(),
            &LoadedSecrets::default(),
        );

        let results: Vec<(bool, &str)> = conditions
            .iter()
            .map(|condition| (condition.status, condition.message.as_str()))
            .collect();
        assert_eq!(
            vec![
                (true, "output \"es\" is valid"),
                (true, "output \"my-out\" is valid"),
                (
                    false,
                    "output name \"my_out\" cannot be told apart from the output \"my-out\""
                ),
                (false, "output name \"concat\" is reserved for internal routing"),
            ],
            results
        );
    }
}
