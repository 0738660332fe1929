//! Extraction of the W3C trace context of container logs
//!
//! The fields `trace_id`, `span_id` and `trace_flags` are taken from the first place which has
//! them: the `structured` field, the message parsed as JSON and finally the message text, where
//! the keys may be written as `trace_id`, `traceId`, `trace-id` or `trace.id`. Fields which are
//! found nowhere stay unset and fields which are already set are kept.
//!
//! All patterns are matched case-insensitively and the values are stored in lowercase.

use super::{
    elements::Block,
    filters::{mutate, ruby_string},
};

/// A trace context field with the patterns of its key and of its hex value
struct Field {
    name: &'static str,
    key: &'static str,
    value: &'static str,
}

static FIELDS: [Field; 3] = [
    Field {
        name: "trace_id",
        key: "trace[_.-]?id",
        value: "[0-9a-f]{32}",
    },
    Field {
        name: "span_id",
        key: "span[_.-]?id",
        value: "[0-9a-f]{16}",
    },
    Field {
        name: "trace_flags",
        key: "trace[_.-]?flags",
        value: "[0-9a-f]{1,2}",
    },
];

impl Field {
    /// Matches a whole key of the structured record
    fn key_pattern(&self) -> String {
        format!(r"\A{}\z", self.key)
    }

    /// Matches a whole value of the structured record
    fn value_pattern(&self) -> String {
        format!(r"\A{}\z", self.value)
    }

    /// Matches `key=value` or `"key": "value"` in the message text and captures the value
    fn message_pattern(&self) -> String {
        format!(r#"{}['"]?\s*[:=]\s*['"]?({})\b"#, self.key, self.value)
    }
}

fn fields() -> String {
    let fields: Vec<String> = FIELDS
        .iter()
        .map(|field| {
            format!(
                "[{}, {}, {}, {}]",
                ruby_string(field.name),
                ruby_string(&field.key_pattern()),
                ruby_string(&field.value_pattern()),
                ruby_string(&field.message_pattern())
            )
        })
        .collect();
    format!("[{}]", fields.join(", "))
}

/// The filter which sets the trace context fields of a record
pub fn trace_context(pattern: &str) -> Block {
    let statement = format!(
        "j = record['structured'].is_a?(Hash) ? record['structured'] : \
         (JSON.parse(record['message'].to_s) rescue nil); \
         j = Hash.new unless j.is_a?(Hash); \
         m = record['message'].to_s; \
         {fields}.each {{ |k, kp, vp, mp| \
         next unless record[k].nil?; \
         e = j.find {{ |jk, jv| jk.to_s.match?(Regexp.new(kp, Regexp::IGNORECASE)) && \
         jv.to_s.match?(Regexp.new(vp, Regexp::IGNORECASE)) }}; \
         v = e ? e[1].to_s : m[Regexp.new(mp, Regexp::IGNORECASE), 1]; \
         record[k] = v.downcase unless v.nil? }}",
        fields = fields()
    );
    mutate(pattern, &statement)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use pretty_assertions::assert_eq;
    use regex::{Regex, RegexBuilder};
    use serde_json::{Value, json};

    use super::{FIELDS, Field, fields, trace_context};

    const TRACE_ID: &str = "4bf92f3577b34da6a3ce929d0e0e4736";
    const SPAN_ID: &str = "00f067aa0ba902b7";

    fn regex(pattern: &str) -> Regex {
        RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .expect("should be a valid pattern")
    }

    fn field(name: &str) -> &'static Field {
        FIELDS
            .iter()
            .find(|field| field.name == name)
            .expect("should be a trace context field")
    }

    /// The value which the message pattern of the field captures
    fn from_message(name: &str, message: &str) -> Option<String> {
        regex(&field(name).message_pattern())
            .captures(message)
            .map(|captures| captures[1].to_owned())
    }

    /// The fields which the filter sets on the record
    fn extracted(record: &Value) -> BTreeMap<&'static str, String> {
        let message = record
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let structured = match record.get("structured") {
            Some(Value::Object(structured)) => structured.clone(),
            _ => match serde_json::from_str(message) {
                Ok(Value::Object(parsed)) => parsed,
                _ => serde_json::Map::new(),
            },
        };
        let text = |value: &Value| match value {
            Value::String(value) => value.clone(),
            value => value.to_string(),
        };

        FIELDS
            .iter()
            .filter(|field| record.get(field.name).is_none_or(Value::is_null))
            .filter_map(|field| {
                let (key, value) = (regex(&field.key_pattern()), regex(&field.value_pattern()));
                structured
                    .iter()
                    .find(|(k, v)| key.is_match(k) && value.is_match(&text(v)))
                    .map(|(_, v)| text(v))
                    .or_else(|| from_message(field.name, message))
                    .map(|value| (field.name, value.to_lowercase()))
            })
            .collect()
    }

    #[test]
    fn test_key_pattern() {
        let key = regex(&field("trace_id").key_pattern());

        for valid in ["trace_id", "traceId", "trace-id", "trace.id", "TRACEID"] {
            assert!(key.is_match(valid), "{valid}");
        }
        for invalid in ["trace__id", "my_trace_id", "trace_id_x", "trace id", "span_id"] {
            assert!(!key.is_match(invalid), "{invalid}");
        }
    }

    #[test]
    fn test_value_pattern_widths() {
        let too_long = format!("{TRACE_ID}0");
        let table = [
            ("trace_id", TRACE_ID, true),
            ("trace_id", "4BF92F3577B34DA6A3CE929D0E0E4736", true),
            ("trace_id", &TRACE_ID[1..], false),
            ("trace_id", too_long.as_str(), false),
            ("trace_id", "4bf92f3577b34da6a3ce929d0e0e473g", false),
            ("span_id", SPAN_ID, true),
            ("span_id", &SPAN_ID[1..], false),
            ("span_id", TRACE_ID, false),
            ("trace_flags", "1", true),
            ("trace_flags", "01", true),
            ("trace_flags", "001", false),
            ("trace_flags", "", false),
            ("trace_flags", "zz", false),
        ];

        for (name, value, valid) in table {
            assert_eq!(
                valid,
                regex(&field(name).value_pattern()).is_match(value),
                "{name} {value:?}"
            );
        }
    }

    #[test]
    fn test_message_pattern() {
        let table = [
            ("trace_id", format!("trace_id={TRACE_ID}"), Some(TRACE_ID)),
            ("trace_id", format!(r#"{{"traceId": "{TRACE_ID}"}}"#), Some(TRACE_ID)),
            ("trace_id", format!("request done trace.id = {TRACE_ID} ok"), Some(TRACE_ID)),
            ("trace_id", format!("trace-id: '{TRACE_ID}'"), Some(TRACE_ID)),
            ("trace_id", format!("trace_id={}", &TRACE_ID[1..]), None),
            ("trace_id", format!("trace_id={TRACE_ID}0"), None),
            ("trace_id", format!("trace_id {TRACE_ID}"), None),
            ("trace_id", "no trace context".to_owned(), None),
            ("span_id", format!("spanId={SPAN_ID}"), Some(SPAN_ID)),
            ("span_id", format!("span_id={TRACE_ID}"), None),
            ("trace_flags", "trace_flags=01".to_owned(), Some("01")),
            ("trace_flags", "traceFlags: 1,".to_owned(), Some("1")),
            ("trace_flags", "trace_flags=001".to_owned(), None),
            ("trace_flags", "trace_flags=".to_owned(), None),
        ];

        for (name, message, expected) in table {
            assert_eq!(
                expected.map(str::to_owned),
                from_message(name, &message),
                "{name} in {message:?}"
            );
        }
    }

    #[test]
    fn test_extraction_order() {
        let other_trace_id = "0af7651916cd43dd8448eb211c80319c";

        // The structured field comes first
        assert_eq!(
            BTreeMap::from([("trace_id", TRACE_ID.to_owned())]),
            extracted(&json!({
                "structured": {"traceId": TRACE_ID},
                "message": format!("trace_id={other_trace_id}"),
            }))
        );
        // Then the message parsed as JSON
        assert_eq!(
            BTreeMap::from([
                ("span_id", SPAN_ID.to_owned()),
                ("trace_id", other_trace_id.to_owned()),
            ]),
            extracted(&json!({
                "message": json!({"trace-id": other_trace_id, "span.id": SPAN_ID}).to_string(),
            }))
        );
        // Then the message text, where uppercase values are stored in lowercase
        assert_eq!(
            BTreeMap::from([
                ("trace_flags", "01".to_owned()),
                ("trace_id", TRACE_ID.to_owned()),
            ]),
            extracted(&json!({
                "message": format!("GET / trace_id={} trace_flags=01", TRACE_ID.to_uppercase()),
            }))
        );
        // A structured value of the wrong width is skipped in favor of the message text
        assert_eq!(
            BTreeMap::from([("trace_id", other_trace_id.to_owned())]),
            extracted(&json!({
                "structured": {"trace_id": &TRACE_ID[1..]},
                "message": format!("trace_id={other_trace_id}"),
            }))
        );
        // Fields which are already set are kept
        assert_eq!(
            BTreeMap::new(),
            extracted(&json!({
                "trace_id": other_trace_id,
                "message": format!("trace_id={TRACE_ID}"),
            }))
        );
    }

    #[test]
    fn test_fields_carry_the_patterns() {
        assert!(fields().starts_with(concat!(
            r"[['trace_id', '\\Atrace[_.-]?id\\z', '\\A[0-9a-f]{32}\\z', ",
            r#"'trace[_.-]?id[\'"]?\\s*[:=]\\s*[\'"]?([0-9a-f]{32})\\b'], "#,
        )));
        assert_eq!(3, fields().matches("['").count());
    }

    #[test]
    fn test_trace_context_is_a_single_line() {
        let filter = trace_context("kubernetes.**").to_string();

        assert!(filter.starts_with("<filter kubernetes.**>\n  @type record_modifier\n"));
        assert_eq!(7, filter.lines().count());
        assert!(filter.contains("JSON.parse(record['message'].to_s) rescue nil"));
        assert!(filter.contains("record[k] = v.downcase unless v.nil? }; nil}\n"));
    }
}
