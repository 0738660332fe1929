//! The file buffer of the outputs
//!
//! Settings of the output tuning take precedence over the buffer settings of the collector
//! which take precedence over the defaults. Size limits fall back to environment variables of
//! the collector pod.

use stackable_operator::k8s_openapi::apimachinery::pkg::api::resource::Quantity;

use super::elements::{Block, store_id};
use crate::crd::{common::FluentdBufferSpec, observability::v1};

pub const BUFFER_ROOT: &str = "/var/lib/fluentd";

const DEFAULT_FLUSH_MODE: &str = "interval";
const DEFAULT_FLUSH_INTERVAL: &str = "1s";
const DEFAULT_FLUSH_THREAD_COUNT: i32 = 2;
const DEFAULT_RETRY_TYPE: &str = "exponential_backoff";
const DEFAULT_RETRY_WAIT: &str = "1s";
const DEFAULT_RETRY_MAX_INTERVAL: &str = "60s";
const DEFAULT_RETRY_TIMEOUT: &str = "60m";
const DEFAULT_OVERFLOW_ACTION: &str = "block";

/// Options which differ between the output plugins
#[derive(Clone, Debug, Default)]
pub struct BufferOptions<'a> {
    /// Chunk keys, e.g. `tag` or `_topic`
    pub keys: Vec<String>,
    pub tuning: Option<&'a v1::OutputTuningSpec>,
    /// Discards chunks which cannot be written instead of backing them up
    pub disable_chunk_backup: bool,
}

/// The `<buffer>` section of the output with the given name
pub fn buffer(
    output_name: &str,
    collector_buffer: Option<&FluentdBufferSpec>,
    options: &BufferOptions,
) -> Block {
    let defaults = FluentdBufferSpec::default();
    let spec = collector_buffer.unwrap_or(&defaults);
    let tuning = options.tuning;

    let flush_mode = spec.flush_mode.as_deref().unwrap_or(DEFAULT_FLUSH_MODE);
    let retry_wait = tuning
        .and_then(|tuning| tuning.min_retry_duration.as_ref())
        .map(|duration| format!("{}s", duration.as_secs()))
        .or_else(|| spec.retry_wait.clone())
        .unwrap_or_else(|| DEFAULT_RETRY_WAIT.to_owned());
    let retry_max_interval = tuning
        .and_then(|tuning| tuning.max_retry_duration.as_ref())
        .map(|duration| format!("{}s", duration.as_secs()))
        .or_else(|| spec.retry_max_interval.clone())
        .unwrap_or_else(|| DEFAULT_RETRY_MAX_INTERVAL.to_owned());
    let chunk_limit_size = tuning
        .and_then(|tuning| tuning.max_write.as_ref())
        .map(fluentd_size)
        .or_else(|| spec.chunk_limit_size.clone())
        .unwrap_or_else(|| r##""#{ENV['BUFFER_SIZE_LIMIT'] || '8m'}""##.to_owned());
    let overflow_action = match tuning.and_then(|tuning| tuning.delivery) {
        Some(v1::DeliveryMode::AtMostOnce) => "drop_oldest_chunk".to_owned(),
        Some(v1::DeliveryMode::AtLeastOnce) => DEFAULT_OVERFLOW_ACTION.to_owned(),
        None => spec
            .overflow_action
            .clone()
            .unwrap_or_else(|| DEFAULT_OVERFLOW_ACTION.to_owned()),
    };

    let block = if options.keys.is_empty() {
        Block::new("buffer")
    } else {
        Block::with_argument("buffer", options.keys.join(","))
    };

    block
        .param("@type", "file")
        .param("path", format!("'{BUFFER_ROOT}/{}'", store_id(output_name)))
        .param("flush_mode", flush_mode)
        .when(flush_mode == "interval", |block| {
            block.param(
                "flush_interval",
                spec.flush_interval.as_deref().unwrap_or(DEFAULT_FLUSH_INTERVAL),
            )
        })
        .param(
            "flush_thread_count",
            spec.flush_thread_count.unwrap_or(DEFAULT_FLUSH_THREAD_COUNT),
        )
        .param(
            "retry_type",
            spec.retry_type.as_deref().unwrap_or(DEFAULT_RETRY_TYPE),
        )
        .param("retry_wait", retry_wait)
        .param("retry_max_interval", retry_max_interval)
        .param(
            "retry_timeout",
            spec.retry_timeout.as_deref().unwrap_or(DEFAULT_RETRY_TIMEOUT),
        )
        .param(
            "queued_chunks_limit_size",
            r##""#{ENV['BUFFER_QUEUE_LIMIT'] || '32'}""##,
        )
        .param(
            "total_limit_size",
            spec.total_limit_size.clone().unwrap_or_else(|| {
                r##""#{ENV['TOTAL_LIMIT_SIZE_PER_BUFFER'] || '8589934592'}""##.to_owned()
            }),
        )
        .param("chunk_limit_size", chunk_limit_size)
        .param("overflow_action", overflow_action)
        .when(options.disable_chunk_backup, |block| {
            block.param("disable_chunk_backup", "true")
        })
}

/// Converts a Kubernetes quantity into the size notation of fluentd, e.g. `10Mi` into `10m`
pub fn fluentd_size(quantity: &Quantity) -> String {
    let value = quantity.0.trim();
    let value = value.strip_suffix('i').unwrap_or(value);
    value.to_lowercase()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use stackable_operator::{
        k8s_openapi::apimachinery::pkg::api::resource::Quantity, time::Duration,
    };

    use super::{BufferOptions, buffer, fluentd_size};
    use crate::crd::{common::FluentdBufferSpec, observability::v1};

    #[test]
    fn test_default_buffer() {
        assert_eq!(
            concat!(
                "<buffer>\n",
                "  @type file\n",
                "  path '/var/lib/fluentd/es_1'\n",
                "  flush_mode interval\n",
                "  flush_interval 1s\n",
                "  flush_thread_count 2\n",
                "  retry_type exponential_backoff\n",
                "  retry_wait 1s\n",
                "  retry_max_interval 60s\n",
                "  retry_timeout 60m\n",
                "  queued_chunks_limit_size \"#{ENV['BUFFER_QUEUE_LIMIT'] || '32'}\"\n",
                "  total_limit_size \"#{ENV['TOTAL_LIMIT_SIZE_PER_BUFFER'] || '8589934592'}\"\n",
                "  chunk_limit_size \"#{ENV['BUFFER_SIZE_LIMIT'] || '8m'}\"\n",
                "  overflow_action block\n",
                "</buffer>\n",
            ),
            buffer("es-1", None, &BufferOptions::default()).to_string()
        );
    }

    #[test]
    fn test_tuning_overrides_collector_buffer() {
        let collector_buffer = FluentdBufferSpec {
            chunk_limit_size: Some("16m".to_owned()),
            flush_mode: Some("immediate".to_owned()),
            overflow_action: Some("throw_exception".to_owned()),
            ..FluentdBufferSpec::default()
        };
        let tuning = v1::OutputTuningSpec {
            delivery: Some(v1::DeliveryMode::AtMostOnce),
            max_write: Some(Quantity("10Mi".to_owned())),
            min_retry_duration: Some(Duration::from_secs(5)),
            ..v1::OutputTuningSpec::default()
        };
        let options = BufferOptions {
            keys: vec!["_topic".to_owned()],
            tuning: Some(&tuning),
            disable_chunk_backup: true,
        };

        assert_eq!(
            concat!(
                "<buffer _topic>\n",
                "  @type file\n",
                "  path '/var/lib/fluentd/kafka'\n",
                "  flush_mode immediate\n",
                "  flush_thread_count 2\n",
                "  retry_type exponential_backoff\n",
                "  retry_wait 5s\n",
                "  retry_max_interval 60s\n",
                "  retry_timeout 60m\n",
                "  queued_chunks_limit_size \"#{ENV['BUFFER_QUEUE_LIMIT'] || '32'}\"\n",
                "  total_limit_size \"#{ENV['TOTAL_LIMIT_SIZE_PER_BUFFER'] || '8589934592'}\"\n",
                "  chunk_limit_size 10m\n",
                "  overflow_action drop_oldest_chunk\n",
                "  disable_chunk_backup true\n",
                "</buffer>\n",
            ),
            buffer("kafka", Some(&collector_buffer), &options).to_string()
        );
    }

    #[test]
    fn test_fluentd_size() {
        assert_eq!("10m", fluentd_size(&Quantity("10Mi".to_owned())));
        assert_eq!("1g", fluentd_size(&Quantity("1G".to_owned())));
        assert_eq!("4096", fluentd_size(&Quantity("4096".to_owned())));
    }
}
