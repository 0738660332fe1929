//! Templates which are evaluated per log record, e.g. `app-{.kubernetes.namespace_name||"none"}`
//!
//! A template is rendered as a Ruby expression for the `record_modifier` plugin.

use std::str::FromStr;

use snafu::{Snafu, ensure};
use strum::{EnumDiscriminants, IntoStaticStr};

use crate::framework::validation::is_field_path;

#[derive(Snafu, Debug, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("template {template:?} contains an unclosed '{{'"))]
    Unclosed { template: String },

    #[snafu(display("template {template:?} contains an unexpected '}}'"))]
    UnexpectedClose { template: String },

    #[snafu(display("template {template:?} contains the invalid field path {path:?}"))]
    InvalidFieldPath { template: String, path: String },

    #[snafu(display("the default value {default:?} in template {template:?} must be quoted"))]
    UnquotedDefault { template: String, default: String },
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Segment {
    Literal(String),
    Field {
        /// Unquoted path segments, e.g. `["kubernetes", "labels", "app.kubernetes.io/name"]`
        path: Vec<String>,
        default: Option<String>,
    },
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Template(Vec<Segment>);

impl FromStr for Template {
    type Err = Error;

    fn from_str(template: &str) -> Result<Self, Self::Err> {
        let mut segments = vec![];
        let mut rest = template;

        while !rest.is_empty() {
            match (rest.find('{'), rest.find('}')) {
                (None, None) => {
                    segments.push(Segment::Literal(rest.to_owned()));
                    rest = "";
                }
                (Some(_), None) => return UnclosedSnafu { template }.fail(),
                (Some(open), Some(close)) if open < close => {
                    if open > 0 {
                        segments.push(Segment::Literal(rest[..open].to_owned()));
                    }
                    segments.push(parse_field(template, &rest[open + 1..close])?);
                    rest = &rest[close + 1..];
                }
                (_, Some(_)) => return UnexpectedCloseSnafu { template }.fail(),
            }
        }

        Ok(Template(segments))
    }
}

fn parse_field(template: &str, expression: &str) -> Result<Segment, Error> {
    let (path, default) = match expression.split_once("||") {
        Some((path, default)) => (path.trim(), Some(default.trim())),
        None => (expression.trim(), None),
    };

    ensure!(
        is_field_path(path).is_ok(),
        InvalidFieldPathSnafu { template, path }
    );

    let default = match default {
        Some(default) => {
            ensure!(
                default.len() >= 2 && default.starts_with('"') && default.ends_with('"'),
                UnquotedDefaultSnafu { template, default }
            );
            Some(default[1..default.len() - 1].to_owned())
        }
        None => None,
    };

    Ok(Segment::Field {
        path: split_path(path),
        default,
    })
}

/// Splits a validated field path into its unquoted segments
pub fn split_path(path: &str) -> Vec<String> {
    let mut segments = vec![];
    let mut rest = path;
    while let Some(stripped) = rest.strip_prefix('.') {
        if let Some(quoted) = stripped.strip_prefix('"') {
            let end = quoted.find('"').unwrap_or(quoted.len());
            segments.push(quoted[..end].to_owned());
            rest = quoted.get(end + 1..).unwrap_or_default();
        } else {
            let end = stripped.find('.').unwrap_or(stripped.len());
            segments.push(stripped[..end].to_owned());
            rest = &stripped[end..];
        }
    }
    segments
}

/// The Ruby expression which reads the field at the given path, e.g. `record.dig("a","b")`
pub fn record_dig(path: &[String]) -> String {
    let keys = path
        .iter()
        .map(|segment| format!("{segment:?}"))
        .collect::<Vec<_>>()
        .join(",");
    format!("record.dig({keys})")
}

impl Template {
    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    /// True if the template does not reference any field
    pub fn is_static(&self) -> bool {
        self.0
            .iter()
            .all(|segment| matches!(segment, Segment::Literal(_)))
    }

    /// The Ruby expression which evaluates the template for a record
    pub fn to_ruby(&self) -> String {
        if self.0.is_empty() {
            return "\"\"".to_owned();
        }
        self.0
            .iter()
            .map(|segment| match segment {
                Segment::Literal(literal) => format!("{literal:?}"),
                Segment::Field {
                    path,
                    default: Some(default),
                } => format!("({} || {default:?}).to_s", record_dig(path)),
                Segment::Field {
                    path,
                    default: None,
                } => format!("{}.to_s", record_dig(path)),
            })
            .collect::<Vec<_>>()
            .join(" + ")
    }

    /// The value of a static template
    pub fn literal(&self) -> Option<String> {
        self.is_static().then(|| {
            self.0
                .iter()
                .filter_map(|segment| match segment {
                    Segment::Literal(literal) => Some(literal.as_str()),
                    Segment::Field { .. } => None,
                })
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use pretty_assertions::assert_eq;

    use super::{ErrorDiscriminants, Segment, Template, split_path};

    #[test]
    fn test_parse_template() {
        let template = Template::from_str(r#"app-{.kubernetes.namespace_name||"none"}"#)
            .expect("should be a valid template");

        assert_eq!(
            &[
                Segment::Literal("app-".to_owned()),
                Segment::Field {
                    path: vec!["kubernetes".to_owned(), "namespace_name".to_owned()],
                    default: Some("none".to_owned()),
                },
            ],
            template.segments()
        );
        assert_eq!(
            r#""app-" + (record.dig("kubernetes","namespace_name") || "none").to_s"#,
            template.to_ruby()
        );
    }

    #[test]
    fn test_static_template() {
        let template = Template::from_str("application").expect("should be a valid template");

        assert!(template.is_static());
        assert_eq!(Some("application".to_owned()), template.literal());
        assert_eq!(r#""application""#, template.to_ruby());
    }

    #[test]
    fn test_quoted_path_segments() {
        assert_eq!(
            vec!["kubernetes", "labels", "app.kubernetes.io/name"],
            split_path(r#".kubernetes.labels."app.kubernetes.io/name""#)
        );

        let template = Template::from_str(r#"{.kubernetes.labels."app.kubernetes.io/name"}"#)
            .expect("should be a valid template");
        assert_eq!(
            r#"record.dig("kubernetes","labels","app.kubernetes.io/name").to_s"#,
            template.to_ruby()
        );
    }

    #[test]
    fn test_invalid_templates() {
        assert_eq!(
            Err(ErrorDiscriminants::Unclosed),
            Template::from_str("{.log_type").map_err(ErrorDiscriminants::from)
        );
        assert_eq!(
            Err(ErrorDiscriminants::UnexpectedClose),
            Template::from_str("log_type}").map_err(ErrorDiscriminants::from)
        );
        assert_eq!(
            Err(ErrorDiscriminants::InvalidFieldPath),
            Template::from_str("{log_type}").map_err(ErrorDiscriminants::from)
        );
        assert_eq!(
            Err(ErrorDiscriminants::UnquotedDefault),
            Template::from_str("{.log_type||none}").map_err(ErrorDiscriminants::from)
        );
    }
}
