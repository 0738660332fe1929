//! System settings, metrics sources and the concatenation of partial container lines

use super::{
    Context, Result,
    elements::{Block, label_name},
};

pub const CONCAT_LABEL: &str = "CONCAT";
pub const INGRESS_LABEL: &str = "INGRESS";

/// The field which the container source sets to `P` for a partial line
const PARTIAL_KEY: &str = "logtag";
const PARTIAL_VALUE: &str = "P";

pub const METRICS_CERT_DIR: &str = "/etc/collector/metrics";

pub fn system(_ctx: &Context<'_>) -> Result<Vec<Block>> {
    Ok(vec![
        Block::new("system").param("log_level", r##""#{ENV['LOG_LEVEL'] || 'warn'}""##),
    ])
}

/// The Prometheus endpoint of the collector and the monitors which feed it
///
/// `prometheus_tail_monitor` is left out because its labels contain the paths of the pod logs.
pub fn metrics_sources(_ctx: &Context<'_>) -> Result<Vec<Block>> {
    let hostname_labels = || Block::new("labels").param("hostname", "${hostname}");

    Ok(vec![
        Block::new("source")
            .param("@type", "prometheus")
            .param("bind", r#""[::]""#)
            .child(
                Block::with_argument("transport", "tls")
                    .param("cert_path", format!("{METRICS_CERT_DIR}/tls.crt"))
                    .param("private_key_path", format!("{METRICS_CERT_DIR}/tls.key")),
            ),
        Block::new("source")
            .param("@type", "prometheus_monitor")
            .child(hostname_labels()),
        Block::new("source")
            .param("@type", "collected_tail_monitor")
            .child(hostname_labels()),
        Block::new("source")
            .param("@type", "prometheus_output_monitor")
            .child(hostname_labels()),
    ])
}

/// Joins the partial lines of the container runtime before the records enter the ingress
pub fn concat_partial_lines(_ctx: &Context<'_>) -> Result<Vec<Block>> {
    Ok(vec![
        Block::with_argument("label", label_name(CONCAT_LABEL))
            .child(
                Block::with_argument("filter", "kubernetes.**")
                    .param("@type", "concat_partial")
                    .param("key", "message")
                    .param("partial_key", PARTIAL_KEY)
                    .param("partial_value", PARTIAL_VALUE),
            )
            .child(relabel("kubernetes.**", INGRESS_LABEL)),
    ])
}

/// `<match pattern>` which moves the records to the label of the given name
pub fn relabel(pattern: &str, target: &str) -> Block {
    Block::with_argument("match", pattern)
        .param("@type", "relabel")
        .param("@label", label_name(target))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use regex::Regex;

    use super::{PARTIAL_KEY, PARTIAL_VALUE, concat_partial_lines, system};
    use crate::generator::{
        elements::render_all, sources::CRI_LINE_EXPRESSION, test_support::with_context,
    };

    /// Parses the lines like the container source and joins them like the `concat_partial`
    /// filter, returning the timestamp and message of every emitted record
    fn collect(lines: &[&str]) -> Vec<(String, String)> {
        // `@` is not allowed in the group names of the regex crate
        let cri_line = Regex::new(&CRI_LINE_EXPRESSION.replace("?<@timestamp>", "?<timestamp>"))
            .expect("should be a valid expression");

        let mut held = String::new();
        let mut records = vec![];
        for line in lines {
            let Some(fields) = cri_line.captures(line) else {
                continue;
            };
            if &fields[PARTIAL_KEY] == PARTIAL_VALUE {
                held.push_str(&fields["message"]);
            } else {
                records.push((
                    fields["timestamp"].to_owned(),
                    std::mem::take(&mut held) + &fields["message"],
                ));
            }
        }
        records
    }

    #[test]
    fn test_system_log_level_from_environment() {
        let blocks = with_context(system).expect("should emit the system block");

        assert_eq!(
            concat!(
                "<system>\n",
                "  log_level \"#{ENV['LOG_LEVEL'] || 'warn'}\"\n",
                "</system>\n",
            ),
            render_all(&blocks)
        );
    }

    #[test]
    fn test_concat_relabels_to_ingress() {
        let blocks = with_context(concat_partial_lines).expect("should emit the concat label");

        assert_eq!(
            concat!(
                "<label @CONCAT>\n",
                "  <filter kubernetes.**>\n",
                "    @type concat_partial\n",
                "    key message\n",
                "    partial_key logtag\n",
                "    partial_value P\n",
                "  </filter>\n",
                "  <match kubernetes.**>\n",
                "    @type relabel\n",
                "    @label @INGRESS\n",
                "  </match>\n",
                "</label>\n",
            ),
            render_all(&blocks)
        );
    }

    #[test]
    fn test_partial_lines_are_joined() {
        assert_eq!(
            vec![(
                "2024-05-02T10:00:00.000000002Z".to_owned(),
                "The begining a new full record".to_owned()
            )],
            collect(&[
                "2024-05-02T10:00:00.000000001Z stdout P The begining ",
                "2024-05-02T10:00:00.000000002Z stdout F a new full record",
            ])
        );

        assert_eq!(
            vec![
                ("t1".to_owned(), "first".to_owned()),
                ("t4".to_owned(), "second line in three parts".to_owned()),
                ("t5".to_owned(), String::new()),
            ],
            collect(&[
                "t1 stdout F first",
                "t2 stderr P second ",
                "t3 stderr P line ",
                "t4 stderr F in three parts",
                "t5 stdout F ",
            ])
        );
    }

    #[test]
    fn test_malformed_lines_are_not_parsed() {
        assert_eq!(
            Vec::<(String, String)>::new(),
            collect(&[
                "t1 stdout | not a log tag",
                "t2 stdin F unknown stream",
                "t3 stdout X unknown tag",
                "no fields",
            ])
        );
        // A partial line which is never completed is not emitted
        assert_eq!(
            Vec::<(String, String)>::new(),
            collect(&["t1 stdout P dangling"])
        );
    }
}
