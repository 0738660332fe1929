use snafu::{Snafu, ensure};
use strum::{EnumDiscriminants, IntoStaticStr};

/// The only LogFileMetricExporter which is deployed
pub const LFME_NAME: &str = "instance";
pub const LFME_NAMESPACE: &str = "openshift-logging";

#[derive(Snafu, Debug, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display(
        "invalid name {name:?} or namespace {namespace:?}, only a LogFileMetricExporter named \
        {LFME_NAME:?} in {LFME_NAMESPACE:?} is supported"
    ))]
    NotSingleton { name: String, namespace: String },
}

pub fn validate(namespace: &str, name: &str) -> Result<(), Error> {
    ensure!(
        name == LFME_NAME && namespace == LFME_NAMESPACE,
        NotSingletonSnafu { name, namespace }
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{ErrorDiscriminants, validate};

    #[test]
    fn test_validate() {
        for (namespace, name) in [
            ("some-ns", "not-instance"),
            ("some-ns", "instance"),
            ("openshift-logging", "my-instance"),
        ] {
            assert_eq!(
                Err(ErrorDiscriminants::NotSingleton),
                validate(namespace, name).map_err(ErrorDiscriminants::from),
                "{namespace}/{name}"
            );
        }

        assert!(validate("openshift-logging", "instance").is_ok());
    }
}
