//! Typed accessors for the metadata of reconciled objects

use std::str::FromStr;

use snafu::{OptionExt, ResultExt, Snafu};
use stackable_operator::kube::runtime::reflector::Lookup;
use strum::{EnumDiscriminants, IntoStaticStr};

use crate::framework::{ForwarderName, NamespaceName, Uid};

#[derive(Snafu, Debug, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("the object has no {field}"))]
    MissingField { field: &'static str },

    #[snafu(display("the {field} {value:?} is invalid"))]
    InvalidField {
        source: crate::framework::Error,
        field: &'static str,
        value: String,
    },
}

type Result<T, E = Error> = std::result::Result<T, E>;

fn parse_field<T>(field: &'static str, value: Option<std::borrow::Cow<'_, str>>) -> Result<T>
where
    T: FromStr<Err = crate::framework::Error>,
{
    let value = value.context(MissingFieldSnafu { field })?;
    T::from_str(&value).context(InvalidFieldSnafu {
        field,
        value: value.into_owned(),
    })
}

/// The name of a forwarder, which is short enough to be suffixed for the owned objects
pub fn get_forwarder_name(forwarder: &impl Lookup) -> Result<ForwarderName> {
    parse_field("name", forwarder.name())
}

pub fn get_namespace(resource: &impl Lookup) -> Result<NamespaceName> {
    parse_field("namespace", resource.namespace())
}

pub fn get_uid(resource: &impl Lookup) -> Result<Uid> {
    parse_field("uid", resource.uid())
}
