use std::collections::BTreeMap;

use crate::{
    controller::conditions::{Entry, StatusCondition},
    crd::observability::v1,
    framework::types::common::Port,
    generator::routing::input_label,
};

pub fn validate(spec: &v1::ClusterLogForwarderSpec) -> Vec<StatusCondition> {
    let mut seen_ports: BTreeMap<Port, &str> = BTreeMap::new();

    spec.inputs
        .iter()
        .enumerate()
        .map(|(index, input)| {
            let mut messages = vec![];

            if input.name.is_empty() {
                messages.push(format!("input[{index}] must have a name"));
            } else if v1::InputSpec::is_reserved_name(&input.name) {
                messages.push(format!(
                    "input name {:?} is reserved and cannot be used for a custom input",
                    input.name
                ));
            } else if let Some(other) = spec.inputs[..index]
                .iter()
                .find(|other| input_label(&other.name) == input_label(&input.name))
            {
                messages.push(if other.name == input.name {
                    format!("input name {:?} is not unique", input.name)
                } else {
                    format!(
                        "input name {:?} cannot be told apart from the input {:?}",
                        input.name, other.name
                    )
                });
            }

            messages.extend(validate_blocks(input));

            if let Some(receiver) = &input.receiver {
                match validate_receiver(receiver) {
                    Ok(port) => match seen_ports.get(&port) {
                        Some(other) => messages.push(format!(
                            "receiver port {port} is already used by input {other:?}"
                        )),
                        None => {
                            seen_ports.insert(port, &input.name);
                        }
                    },
                    Err(receiver_messages) => messages.extend(receiver_messages),
                }
            }

            if messages.is_empty() {
                StatusCondition::valid_entry(Entry::Input, &input.name)
            } else {
                StatusCondition::invalid_entry(Entry::Input, &input.name, messages.join(", "))
            }
        })
        .collect()
}

/// Exactly the block which belongs to the input type must be set
fn validate_blocks(input: &v1::InputSpec) -> Vec<String> {
    let blocks = [
        (v1::InputType::Application, input.application.is_some()),
        (v1::InputType::Infrastructure, input.infrastructure.is_some()),
        (v1::InputType::Audit, input.audit.is_some()),
        (v1::InputType::Receiver, input.receiver.is_some()),
    ];

    let mut messages = vec![];
    for (type_, is_set) in blocks {
        if type_ == input.type_ && !is_set {
            messages.push(format!("{type_} input requires the {type_} block"));
        }
        if type_ != input.type_ && is_set {
            messages.push(format!(
                "{} input must not set the {type_} block",
                input.type_
            ));
        }
    }
    messages
}

fn validate_receiver(receiver: &v1::ReceiverSpec) -> Result<Port, Vec<String>> {
    let mut messages = vec![];

    match (receiver.type_, &receiver.http) {
        (v1::ReceiverType::Http, None) => {
            messages.push("http receiver requires the http block with a format".to_owned())
        }
        (v1::ReceiverType::Syslog, Some(_)) => {
            messages.push("syslog receiver must not set the http block".to_owned())
        }
        _ => {}
    }

    match Port::unprivileged(receiver.port) {
        Ok(port) if messages.is_empty() => Ok(port),
        Ok(_) => Err(messages),
        Err(error) => {
            messages.push(format!("invalid receiver port {}: {error}", receiver.port));
            Err(messages)
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::validate;
    use crate::generator::test_support::spec;

    fn messages(yaml: &str) -> Vec<(String, bool, String)> {
        validate(&spec(yaml))
            .into_iter()
            .map(|condition| (condition.type_, condition.status, condition.message))
            .collect()
    }

    #[test]
    fn test_valid_inputs() {
        let results = messages(
            "
            serviceAccount: {name: logcollector}
            inputs:
              - name: my-apps
                type: application
                application:
                  includes:
                    - namespace: my-*
              - name: http-audit
                type: receiver
                receiver:
                  type: http
                  port: 8443
                  http:
                    format: kubeAPIAudit
            pipelines: []
            ",
        );

        assert!(results.iter().all(|(_, status, _)| *status), "{results:?}");
    }

    #[test]
    fn test_reserved_and_duplicate_names() {
        let results = messages(
            "
            serviceAccount: {name: logcollector}
            inputs:
              - name: application
                type: application
                application: {}
              - name: infra
                type: infrastructure
                infrastructure: {}
              - name: infra
                type: infrastructure
                infrastructure: {}
              - name: my-infra
                type: infrastructure
                infrastructure: {}
              - name: my.infra
                type: infrastructure
                infrastructure: {}
            pipelines: []
            ",
        );

        assert_eq!(
            vec![false, true, false, true, false],
            results.iter().map(|(_, status, _)| *status).collect::<Vec<_>>()
        );
        assert!(results[0].2.contains("is reserved"));
        assert!(results[2].2.contains("is not unique"));
        assert_eq!(
            "input name \"my.infra\" cannot be told apart from the input \"my-infra\"",
            results[4].2
        );
    }

    #[test]
    fn test_block_must_match_type() {
        let results = messages(
            "
            serviceAccount: {name: logcollector}
            inputs:
              - name: my-audit
                type: audit
                application: {}
            pipelines: []
            ",
        );

        assert_eq!(
            "observability.openshift.io/ValidInput-my-audit",
            results[0].0
        );
        assert_eq!(
            "audit input requires the audit block, audit input must not set the application block",
            results[0].2
        );
    }

    #[test]
    fn test_receiver_ports() {
        let results = messages(
            "
            serviceAccount: {name: logcollector}
            inputs:
              - name: syslog-a
                type: receiver
                receiver: {type: syslog, port: 10514}
              - name: syslog-b
                type: receiver
                receiver: {type: syslog, port: 10514}
              - name: syslog-c
                type: receiver
                receiver: {type: syslog, port: 514}
              - name: http-d
                type: receiver
                receiver: {type: http, port: 8080}
            pipelines: []
            ",
        );

        assert!(results[0].1);
        assert_eq!(
            "receiver port 10514 is already used by input \"syslog-a\"",
            results[1].2
        );
        assert!(results[2].2.starts_with("invalid receiver port 514"));
        assert_eq!(
            "http receiver requires the http block with a format",
            results[3].2
        );
    }
}
