use stackable_operator::kvp::Annotation;

/// Infallible variant of `Annotation::try_from` for keys which are statically defined
pub fn annotation(key: &str, value: &str) -> Annotation {
    Annotation::try_from((key, value)).expect(
        "Annotation should be created because the key is a statically defined annotation key.",
    )
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use stackable_operator::kvp::Annotations;

    use super::annotation;

    #[test]
    fn test_annotation() {
        let mut annotations = Annotations::new();
        annotations.insert(annotation(
            "service.beta.openshift.io/serving-cert-secret-name",
            "collector-metrics",
        ));

        assert_eq!(
            BTreeMap::from([(
                "service.beta.openshift.io/serving-cert-secret-name".to_owned(),
                "collector-metrics".to_owned()
            )]),
            BTreeMap::from(annotations)
        );
    }
}
