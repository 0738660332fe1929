use stackable_operator::kvp::{Label, Labels};

use crate::framework::{
    ComponentName, ControllerName, IsLabelValue, OperatorName, ProductVersion,
};

pub const MAX_LABEL_VALUE_LENGTH: usize = 63;

pub const APP_NAME_LABEL: &str = "app.kubernetes.io/name";
pub const APP_INSTANCE_LABEL: &str = "app.kubernetes.io/instance";
pub const APP_COMPONENT_LABEL: &str = "app.kubernetes.io/component";
pub const APP_PART_OF_LABEL: &str = "app.kubernetes.io/part-of";
pub const APP_MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const APP_VERSION_LABEL: &str = "app.kubernetes.io/version";

pub const PART_OF: &str = "cluster-logging";

/// Recommended labels for all objects created for the given owner
///
/// In contrast to `Labels::recommended`, no vendor label is added and the component replaces the
/// role and role-group labels.
pub fn recommended_labels(
    owner: &impl IsLabelValue,
    component: &ComponentName,
    product_version: &ProductVersion,
    operator_name: &OperatorName,
    controller_name: &ControllerName,
) -> Labels {
    let mut labels = component_selector(owner, component);
    labels.insert(label(APP_PART_OF_LABEL, PART_OF));
    labels.insert(label(
        APP_MANAGED_BY_LABEL,
        // The operator and controller names are constants which fit into one label value.
        &format!(
            "{}_{}",
            operator_name.to_label_value(),
            controller_name.to_label_value()
        ),
    ));
    labels.insert(label(
        APP_VERSION_LABEL,
        &product_version.to_label_value(),
    ));
    labels
}

/// Labels which select the pods of a component of the given owner
pub fn component_selector(owner: &impl IsLabelValue, component: &ComponentName) -> Labels {
    let mut labels = Labels::new();
    labels.insert(label(APP_NAME_LABEL, &component.to_label_value()));
    labels.insert(label(APP_INSTANCE_LABEL, &owner.to_label_value()));
    labels.insert(label(APP_COMPONENT_LABEL, &component.to_label_value()));
    labels
}

/// Infallible variant of `Label::try_from` for keys and values which are known to be valid
pub fn label(key: &str, value: &str) -> Label {
    Label::try_from((key, value)).expect(
        "Label should be created because the key is a statically defined label key and the value \
        is a valid label value.",
    )
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use crate::framework::{
        ComponentName, ControllerName, IsLabelValue, OperatorName, ProductVersion,
        kvp::label::{component_selector, recommended_labels},
    };

    struct Forwarder;

    impl IsLabelValue for Forwarder {
        fn to_label_value(&self) -> String {
            "my-forwarder".to_owned()
        }
    }

    #[test]
    fn test_recommended_labels() {
        let actual_labels = recommended_labels(
            &Forwarder,
            &ComponentName::from_str_unsafe("collector"),
            &ProductVersion::from_str_unsafe("6.2.0"),
            &OperatorName::from_str_unsafe("cluster-logging-operator"),
            &ControllerName::from_str_unsafe("clusterlogforwarder"),
        );

        let expected_labels: BTreeMap<String, String> = [
            ("app.kubernetes.io/component", "collector"),
            ("app.kubernetes.io/instance", "my-forwarder"),
            (
                "app.kubernetes.io/managed-by",
                "cluster-logging-operator_clusterlogforwarder",
            ),
            ("app.kubernetes.io/name", "collector"),
            ("app.kubernetes.io/part-of", "cluster-logging"),
            ("app.kubernetes.io/version", "6.2.0"),
        ]
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .into();

        assert_eq!(expected_labels, actual_labels.into());
    }

    #[test]
    fn test_component_selector() {
        let actual_labels =
            component_selector(&Forwarder, &ComponentName::from_str_unsafe("collector"));

        let expected_labels: BTreeMap<String, String> = [
            ("app.kubernetes.io/component", "collector"),
            ("app.kubernetes.io/instance", "my-forwarder"),
            ("app.kubernetes.io/name", "collector"),
        ]
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .into();

        assert_eq!(expected_labels, actual_labels.into());
    }
}
