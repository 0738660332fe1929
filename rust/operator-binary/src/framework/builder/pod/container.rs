use std::collections::BTreeMap;

use stackable_operator::k8s_openapi::api::core::v1::{EnvVar, EnvVarSource, ObjectFieldSelector};
use strum::Display;

type EnvVarName = String;

/// Fields of the pod which can be exposed as environment variables
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum FieldPath {
    #[strum(serialize = "metadata.name")]
    PodName,
    #[strum(serialize = "spec.nodeName")]
    NodeName,
    #[strum(serialize = "status.podIP")]
    PodIp,
}

/// Environment variables of a container, sorted by name
///
/// The order is stable so that a comparison with the deployed container does not report
/// spurious differences.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EnvVarSet(BTreeMap<EnvVarName, EnvVar>);

impl EnvVarSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(mut self, name: impl Into<EnvVarName>, value: impl Into<String>) -> Self {
        let name: EnvVarName = name.into();

        self.0.insert(
            name.clone(),
            EnvVar {
                name,
                value: Some(value.into()),
                value_from: None,
            },
        );

        self
    }

    pub fn with_field_path(
        mut self,
        name: impl Into<EnvVarName>,
        field_path: FieldPath,
    ) -> Self {
        let name: EnvVarName = name.into();

        self.0.insert(
            name.clone(),
            EnvVar {
                name,
                value: None,
                value_from: Some(EnvVarSource {
                    // The API server sets the version, so it is set here as well to
                    // compare equal to the deployed container.
                    field_ref: Some(ObjectFieldSelector {
                        api_version: Some("v1".to_owned()),
                        field_path: field_path.to_string(),
                    }),
                    ..EnvVarSource::default()
                }),
            },
        );

        self
    }
}

impl From<EnvVarSet> for Vec<EnvVar> {
    fn from(value: EnvVarSet) -> Self {
        value.0.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use stackable_operator::k8s_openapi::api::core::v1::{EnvVar, EnvVarSource, ObjectFieldSelector};

    use super::{EnvVarSet, FieldPath};

    #[test]
    fn test_env_var_set_is_sorted_by_name() {
        let env_vars: Vec<EnvVar> = EnvVarSet::new()
            .with_value("LOG_LEVEL", "warn")
            .with_field_path("NODE_NAME", FieldPath::NodeName)
            .with_value("BUFFER_SIZE_LIMIT", "8m")
            .into();

        assert_eq!(
            vec![
                EnvVar {
                    name: "BUFFER_SIZE_LIMIT".to_owned(),
                    value: Some("8m".to_owned()),
                    value_from: None,
                },
                EnvVar {
                    name: "LOG_LEVEL".to_owned(),
                    value: Some("warn".to_owned()),
                    value_from: None,
                },
                EnvVar {
                    name: "NODE_NAME".to_owned(),
                    value: None,
                    value_from: Some(EnvVarSource {
                        field_ref: Some(ObjectFieldSelector {
                            api_version: Some("v1".to_owned()),
                            field_path: "spec.nodeName".to_owned(),
                        }),
                        ..EnvVarSource::default()
                    }),
                },
            ],
            env_vars
        );
    }

    #[test]
    fn test_env_var_set_overrides_existing_values() {
        let env_vars: Vec<EnvVar> = EnvVarSet::new()
            .with_value("LOG_LEVEL", "warn")
            .with_value("LOG_LEVEL", "debug")
            .into();

        assert_eq!(
            vec![EnvVar {
                name: "LOG_LEVEL".to_owned(),
                value: Some("debug".to_owned()),
                value_from: None,
            }],
            env_vars
        );
    }
}
