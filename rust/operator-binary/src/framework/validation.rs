use std::sync::LazyLock;

use regex::Regex;
use snafu::{Snafu, ensure};
use stackable_operator::validation::RFC_1123_SUBDOMAIN_MAX_LENGTH;

/// Format of a key for a ConfigMap or Secret
pub const CONFIG_MAP_KEY_FMT: &str = "[-._a-zA-Z0-9]+";
const CONFIG_MAP_KEY_ERROR_MSG: &str =
    "a valid config key must consist of alphanumeric characters, '-', '_' or '.'";
static CONFIG_MAP_KEY_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!("^{CONFIG_MAP_KEY_FMT}$")).expect("failed to compile ConfigMap key regex")
});

/// Format of a path to a field of a log record, e.g. `.kubernetes.labels."app.kubernetes.io/name"`
pub const FIELD_PATH_FMT: &str = r#"(\.[a-zA-Z0-9_]+|\."[^"]+")(\.[a-zA-Z0-9_]+|\."[^"]+")*"#;
const FIELD_PATH_ERROR_MSG: &str = "a field path must be a sequence of segments starting with \
    '.', each consisting of alphanumeric characters and '_' or being a quoted string";
static FIELD_PATH_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!("^{FIELD_PATH_FMT}$")).expect("failed to compile field path regex")
});

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("value {value:?} does not match the regular expression {regex:?}: {message}"))]
    Regex {
        value: String,
        regex: &'static str,
        message: &'static str,
    },

    #[snafu(display("value {value:?} exceeds the maximum length of {max_length}"))]
    TooLong { value: String, max_length: usize },
}

type Result = std::result::Result<(), Error>;

/// Tests if the given value is a valid key for a ConfigMap or Secret
///
/// see <https://github.com/kubernetes/kubernetes/blob/v1.34.1/staging/src/k8s.io/apimachinery/pkg/util/validation/validation.go#L435>
pub fn is_config_map_key(value: &str) -> Result {
    let max_length = RFC_1123_SUBDOMAIN_MAX_LENGTH;
    ensure!(
        value.len() < max_length,
        TooLongSnafu {
            value: value.to_owned(),
            max_length
        }
    );

    ensure!(
        CONFIG_MAP_KEY_REGEX.is_match(value),
        RegexSnafu {
            value: value.to_owned(),
            regex: CONFIG_MAP_KEY_FMT,
            message: CONFIG_MAP_KEY_ERROR_MSG
        }
    );

    Ok(())
}

/// Tests if the given value is a path to a field of a log record
pub fn is_field_path(value: &str) -> Result {
    ensure!(
        FIELD_PATH_REGEX.is_match(value),
        RegexSnafu {
            value: value.to_owned(),
            regex: FIELD_PATH_FMT,
            message: FIELD_PATH_ERROR_MSG
        }
    );

    Ok(())
}
