// Type-safe wrappers that cannot throw errors
// The point is, to move the validation "upwards".

use std::{fmt::Display, str::FromStr};

use kvp::label::MAX_LABEL_VALUE_LENGTH;
use snafu::{ResultExt, Snafu, ensure};
use stackable_operator::kvp::LabelValue;
use strum::{EnumDiscriminants, IntoStaticStr};

pub mod builder;
pub mod controller_utils;
pub mod kvp;
pub mod macros;
pub mod types;
pub mod validation;

#[derive(Snafu, Debug, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("maximum length exceeded"))]
    LengthExceeded { length: usize, max_length: usize },

    #[snafu(display("object name not RFC 1123 compliant"))]
    InvalidObjectName {
        source: stackable_operator::validation::Errors,
    },

    #[snafu(display("failed to use as label"))]
    InvalidLabelValue {
        source: stackable_operator::kvp::LabelValueError,
    },

    #[snafu(display("not a valid UID"))]
    InvalidUid { source: uuid::Error },
}

/// Has a name that can be used as a DNS subdomain name as defined in RFC 1123.
/// Most resource types, e.g. a Pod, require such a compliant name.
pub trait HasObjectName {
    fn to_object_name(&self) -> String;
}

/// Has a Kubernetes UID
pub trait HasUid {
    fn to_uid(&self) -> String;
}

/// Is a valid label value as defined in RFC 1123.
pub trait IsLabelValue {
    fn to_label_value(&self) -> String;
}

/// Restricted string type with attributes like maximum length.
macro_rules! attributed_string_type {
    ($name:ident, $description:literal, $example:literal $(, $attribute:tt)*) => {
        #[doc = concat!($description, ", e.g. \"", $example, "\"")]
        #[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
        pub struct $name(String);

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {

                $(attributed_string_type!(@from_str $name, s, $attribute);)*

                Ok(Self(s.to_owned()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        #[cfg(test)]
        impl $name {
            #[allow(dead_code)]
            pub fn from_str_unsafe(s: &str) -> Self {
                FromStr::from_str(s).expect("should be a valid {name}")
            }

            // A dead_code warning is emitted if there is no unit test that calls this function.
            pub fn test_example() {
                Self::from_str_unsafe($example);
            }
        }

        $(attributed_string_type!(@trait_impl $name, $attribute);)*
    };
    (@from_str $name:ident, $s:expr, (max_length = $max_length:expr)) => {
        let length = $s.len() as usize;
        ensure!(
            length <= $name::MAX_LENGTH,
            LengthExceededSnafu {
                length,
                max_length: $name::MAX_LENGTH,
            }
        );
    };
    (@from_str $name:ident, $s:expr, is_object_name) => {
        stackable_operator::validation::is_lowercase_rfc_1123_subdomain($s).context(InvalidObjectNameSnafu)?;
    };
    (@from_str $name:ident, $s:expr, is_valid_label_value) => {
        LabelValue::from_str($s).context(InvalidLabelValueSnafu)?;
    };
    (@from_str $name:ident, $s:expr, is_uid) => {
        uuid::Uuid::parse_str($s).context(InvalidUidSnafu)?;
    };
    (@trait_impl $name:ident, (max_length = $max_length:expr)) => {
        impl $name {
            // type arithmetic would be better
            pub const MAX_LENGTH: usize = $max_length;
        }
    };
    (@trait_impl $name:ident, is_object_name) => {
        impl HasObjectName for $name {
            fn to_object_name(&self) -> String {
                self.0.clone()
            }
        }
    };
    (@trait_impl $name:ident, is_valid_label_value) => {
        impl IsLabelValue for $name {
            fn to_label_value(&self) -> String {
                self.0.clone()
            }
        }
    };
    (@trait_impl $name:ident, is_uid) => {
        impl From<uuid::Uuid> for $name {
            fn from(value: uuid::Uuid) -> Self {
                Self(value.to_string())
            }
        }

        impl HasUid for $name {
            fn to_uid(&self) -> String {
                self.0.clone()
            }
        }
    };
}

attributed_string_type! {
    ProductVersion,
    "The version of the operator and the collector it deploys",
    "6.2.0",
    (max_length = MAX_LABEL_VALUE_LENGTH),
    is_valid_label_value
}
attributed_string_type! {
    ForwarderName,
    "The name of a ClusterLogForwarder",
    "collector",
    // Suffixes like `-trustbundle` or the name of a receiver input are appended to produce
    // resource names which must still be valid label values.
    (max_length = 40),
    is_object_name,
    is_valid_label_value
}
attributed_string_type! {
    ComponentName,
    "The name of a component deployed by the operator",
    "collector",
    (max_length = 32),
    is_object_name,
    is_valid_label_value
}
attributed_string_type! {
    ControllerName,
    "The name of a controller in an operator",
    "clusterlogforwarder",
    (max_length = MAX_LABEL_VALUE_LENGTH),
    is_valid_label_value
}
attributed_string_type! {
    OperatorName,
    "The name of an operator",
    "cluster-logging-operator",
    (max_length = MAX_LABEL_VALUE_LENGTH),
    is_valid_label_value
}
attributed_string_type! {
    NamespaceName,
    "The name of a Namespace",
    "openshift-logging",
    (max_length = MAX_LABEL_VALUE_LENGTH),
    is_object_name,
    is_valid_label_value
}
attributed_string_type! {
    Uid,
    "The UID of a Kubernetes object",
    "c27b3971-ea72-42d3-8d8e-3a8a5fa96e0c",
    is_uid
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use uuid::uuid;

    use super::{
        ComponentName, ControllerName, ForwarderName, NamespaceName, OperatorName, ProductVersion,
        Uid,
    };
    use crate::framework::{HasObjectName, IsLabelValue};

    #[test]
    fn test_attributed_string_type_examples() {
        ProductVersion::test_example();
        ForwarderName::test_example();
        ComponentName::test_example();
        ControllerName::test_example();
        OperatorName::test_example();
        NamespaceName::test_example();
        Uid::test_example();
    }

    #[test]
    fn test_attributed_string_type_fmt() {
        assert_eq!(
            "my-forwarder".to_owned(),
            format!("{}", ForwarderName::from_str_unsafe("my-forwarder"))
        );
    }

    #[test]
    fn test_attributed_string_type_max_length() {
        assert_eq!(40, ForwarderName::MAX_LENGTH);

        assert!(ForwarderName::from_str(&"a".repeat(ForwarderName::MAX_LENGTH)).is_ok());
        assert!(ForwarderName::from_str(&"a".repeat(ForwarderName::MAX_LENGTH + 1)).is_err());
    }

    #[test]
    fn test_attributed_string_type_is_object_name() {
        assert_eq!(
            "valid-object.name.123",
            ForwarderName::from_str_unsafe("valid-object.name.123").to_object_name()
        );
        // A valid object name contains only lowercase characters.
        assert!(ForwarderName::from_str("InvalidObjectName").is_err());
    }

    #[test]
    fn test_attributed_string_type_is_valid_label_value() {
        assert_eq!(
            "valid-label_value.123",
            ControllerName::from_str_unsafe("valid-label_value.123").to_label_value()
        );
        // A valid label value must end with an alphanumeric character.
        assert!(ControllerName::from_str("invalid-label-value-").is_err());
    }

    #[test]
    fn test_attributed_string_type_is_uid() {
        assert_eq!(
            Uid::from_str_unsafe("e6ac237d-a6d4-43a1-8135-f36506110912"),
            Uid::from(uuid!("e6ac237d-a6d4-43a1-8135-f36506110912"))
        );
        assert!(Uid::from_str("not-a-uid").is_err());
    }
}
