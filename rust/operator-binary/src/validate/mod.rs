//! Semantic validation of a migrated forwarder
//!
//! Every named entry gets a condition of its own. The overall `Valid` condition is true if no
//! entry failed and the service account is authorized. Outputs which only lack a referenced
//! Secret do not invalidate the forwarder; they are removed by [`deployable_spec`] instead.

use std::collections::BTreeMap;

use crate::{
    controller::conditions::{ForwarderConditions, Reason, StatusCondition, TYPE_VALID},
    crd::observability::v1,
    outputs::OutputPlugins,
    secrets::LoadedSecrets,
};

pub mod filters;
pub mod inputs;
pub mod lfme;
pub mod outputs;
pub mod permissions;
pub mod pipelines;

/// Validates all entries of the forwarder
///
/// `authorized` is the result of [`permissions::authorize`].
pub fn validate(
    spec: &v1::ClusterLogForwarderSpec,
    plugins: &OutputPlugins,
    loaded: &LoadedSecrets,
    authorized: StatusCondition,
) -> ForwarderConditions {
    let mut conditions = ForwarderConditions {
        overall: vec![],
        inputs: inputs::validate(spec),
        outputs: outputs::validate(spec, plugins, loaded),
        filters: filters::validate(spec),
        pipelines: pipelines::validate(spec),
    };

    let is_authorized = authorized.status;
    let valid = if !is_authorized {
        StatusCondition::new(
            TYPE_VALID,
            false,
            Reason::ValidationFailure,
            authorized.message.clone(),
        )
    } else if conditions.all_entries_valid() {
        StatusCondition::new(TYPE_VALID, true, Reason::ValidationSuccess, "")
    } else {
        StatusCondition::new(
            TYPE_VALID,
            false,
            Reason::ValidationFailure,
            "one or more of inputs, outputs, filters or pipelines are invalid",
        )
    };

    conditions.push_overall(authorized);
    conditions.push_overall(valid);
    conditions
}

/// Returns true if the `Valid` condition in the given conditions is true
pub fn is_valid(conditions: &ForwarderConditions) -> bool {
    conditions
        .overall
        .iter()
        .any(|condition| condition.type_ == TYPE_VALID && condition.status)
}

/// The part of the forwarder which can be deployed
///
/// Outputs with missing Secrets are removed together with their references. Pipelines without
/// any remaining output are removed as well.
pub fn deployable_spec(
    spec: &v1::ClusterLogForwarderSpec,
    missing: &BTreeMap<String, StatusCondition>,
) -> v1::ClusterLogForwarderSpec {
    let mut deployable = spec.clone();

    deployable
        .outputs
        .retain(|output| !missing.contains_key(&output.name));

    for pipeline in &mut deployable.pipelines {
        pipeline
            .output_refs
            .retain(|output_ref| !missing.contains_key(output_ref));
    }
    deployable
        .pipelines
        .retain(|pipeline| !pipeline.output_refs.is_empty());

    deployable
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use pretty_assertions::assert_eq;

    use super::{deployable_spec, is_valid, validate};
    use crate::{
        controller::conditions::{
            Entry, Reason, StatusCondition, TYPE_AUTHORIZED, TYPE_VALID,
        },
        generator::test_support::spec,
        outputs::{OutputPlugins, test_support::secret},
        secrets::{LoadedSecrets, Secrets},
    };

    const FORWARDER: &str = "
        serviceAccount: {name: logcollector}
        outputs:
          - name: es
            type: elasticsearch
            elasticsearch: {url: https://es.example.com:9200, index: app, version: 8}
          - name: loki
            type: loki
            loki:
              url: https://loki.example.com
              authentication:
                token: {from: secret, secret: {name: loki-token, key: token}}
        pipelines:
          - name: to-both
            inputRefs: [application]
            outputRefs: [es, loki]
          - name: to-loki
            inputRefs: [audit]
            outputRefs: [loki]
        ";

    fn authorized() -> StatusCondition {
        StatusCondition::new(
            TYPE_AUTHORIZED,
            true,
            Reason::ClusterRolesExist,
            "permitted to collect log types: [\"application\", \"audit\"]",
        )
    }

    fn loaded_without_loki_token() -> LoadedSecrets {
        LoadedSecrets {
            secrets: Secrets::new(),
            missing: BTreeMap::from([(
                "loki".to_owned(),
                StatusCondition::missing_resource(
                    Entry::Output,
                    "loki",
                    "secrets not found: loki-token",
                ),
            )]),
        }
    }

    #[test]
    fn test_missing_secret_keeps_forwarder_valid() {
        let conditions = validate(
            &spec(FORWARDER),
            &OutputPlugins::register_all(),
            &loaded_without_loki_token(),
            authorized(),
        );

        assert!(is_valid(&conditions));
        assert_eq!(Reason::MissingResource, conditions.outputs[1].reason);
    }

    #[test]
    fn test_unauthorized_forwarder_is_invalid() {
        let unauthorized = StatusCondition::new(
            TYPE_AUTHORIZED,
            false,
            Reason::ServiceAccountDoesNotExist,
            "service account \"logcollector\" not found",
        );
        let loaded = LoadedSecrets {
            secrets: Secrets::from_iter([(
                "loki-token".to_owned(),
                secret("loki-token", &["token"]),
            )]),
            missing: BTreeMap::new(),
        };

        let conditions = validate(
            &spec(FORWARDER),
            &OutputPlugins::register_all(),
            &loaded,
            unauthorized,
        );

        assert!(!is_valid(&conditions));
        let valid = conditions
            .overall
            .iter()
            .find(|condition| condition.type_ == TYPE_VALID)
            .expect("should contain the Valid condition");
        assert_eq!(
            "service account \"logcollector\" not found",
            valid.message
        );
    }

    #[test]
    fn test_deployable_spec_drops_outputs_with_missing_secrets() {
        let deployable = deployable_spec(&spec(FORWARDER), &loaded_without_loki_token().missing);

        assert_eq!(
            vec!["es"],
            deployable
                .outputs
                .iter()
                .map(|output| output.name.as_str())
                .collect::<Vec<_>>()
        );
        assert_eq!(1, deployable.pipelines.len());
        assert_eq!(vec!["es".to_owned()], deployable.pipelines[0].output_refs);
    }
}
