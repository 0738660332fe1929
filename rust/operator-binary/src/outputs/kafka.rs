use stackable_operator::k8s_openapi::api::core::v1::Secret;

use super::{
    PluginOps, compression, dedot_labels, migrate_shell, parse_template, parse_url,
    required_block, secret_name, validate_secret_key, validate_template, validate_tls,
    validate_url,
};
use crate::{
    crd::{common::SecretReference, logging::v1 as legacy, observability::v1},
    generator::{
        self, Context,
        buffer::{BufferOptions, buffer},
        elements::{Block, store_id},
        security::{TlsPaths, is_secure, read_file, secret_reference_path},
    },
    secrets::{self, Secrets},
};

const DEFAULT_TOPIC: &str = "topic";
const DEFAULT_SASL_MECHANISM: &str = "PLAIN";
const SCHEMES: [&str; 2] = ["tcp", "tls"];

/// Field which holds the evaluated topic if the topic is a template
const TOPIC_KEY: &str = "_kafka_topic";

pub struct KafkaPlugin;

impl PluginOps for KafkaPlugin {
    fn output_type(&self) -> v1::OutputType {
        v1::OutputType::Kafka
    }

    fn migrate(&self, output: &legacy::OutputSpec, secret: Option<&Secret>) -> v1::OutputSpec {
        let kafka = output.kafka.clone().unwrap_or_default();

        v1::OutputSpec {
            kafka: Some(v1::Kafka {
                url: output.url.clone().filter(|url| !url.is_empty()),
                authentication: secret.and_then(migrate_authentication),
                // Retry durations do not apply to Kafka
                tuning: output.tuning.as_ref().map(|tuning| v1::OutputTuningSpec {
                    delivery: tuning.delivery.map(|delivery| match delivery {
                        legacy::DeliveryMode::AtLeastOnce => v1::DeliveryMode::AtLeastOnce,
                        legacy::DeliveryMode::AtMostOnce => v1::DeliveryMode::AtMostOnce,
                    }),
                    compression: tuning.compression.clone(),
                    max_write: tuning.max_write.clone(),
                    ..v1::OutputTuningSpec::default()
                }),
                topic: kafka.topic.filter(|topic| !topic.is_empty()),
                brokers: kafka.brokers,
            }),
            ..migrate_shell(output, v1::OutputType::Kafka, secret)
        }
    }

    fn validate(&self, output: &v1::OutputSpec, secrets: &Secrets) -> Vec<String> {
        let Some(kafka) = &output.kafka else {
            return vec!["kafka output requires the kafka block".to_owned()];
        };
        let mut messages = vec![];

        if kafka.url.is_none() && kafka.brokers.is_empty() {
            messages.push("kafka output requires either a URL or brokers".to_owned());
        }
        messages.extend(
            kafka
                .url
                .iter()
                .chain(&kafka.brokers)
                .filter_map(|url| validate_url(url, &SCHEMES)),
        );
        if let Some(topic) = &kafka.topic {
            messages.extend(validate_template("topic", topic));
        }
        if let Some(sasl) = kafka
            .authentication
            .as_ref()
            .and_then(|authentication| authentication.sasl.as_ref())
        {
            if sasl.username.is_some() != sasl.password.is_some() {
                messages.push("SASL username and password must be set together".to_owned());
            }
            messages.extend(
                [&sasl.username, &sasl.password]
                    .into_iter()
                    .flatten()
                    .filter_map(|reference| validate_secret_key(secrets, reference)),
            );
        }

        messages.extend(validate_tls(output, secrets));
        messages
    }

    fn emit(&self, output: &v1::OutputSpec, ctx: &Context<'_>) -> generator::Result<Vec<Block>> {
        let kafka = required_block(output, &output.kafka)?;
        let brokers = brokers(output, kafka)?;
        let topic = match &kafka.topic {
            Some(topic) => Some(parse_template(output, topic)?),
            None => None,
        };
        let url_topic = match &kafka.url {
            Some(url) => parse_url(output, url)?
                .path()
                .trim_start_matches('/')
                .to_owned(),
            None => String::new(),
        };

        let mut blocks = vec![dedot_labels()];
        let (default_topic, buffer_key) = match topic.as_ref().map(|topic| (topic, topic.literal()))
        {
            Some((_, Some(literal))) => (literal.clone(), format!("_{literal}")),
            Some((template, None)) => {
                blocks.push(
                    Block::with_argument("filter", "**")
                        .param("@type", "record_modifier")
                        .child(
                            Block::new("record")
                                .param(TOPIC_KEY, format!("${{{}}}", template.to_ruby())),
                        ),
                );
                (DEFAULT_TOPIC.to_owned(), TOPIC_KEY.to_owned())
            }
            None if !url_topic.is_empty() => (url_topic.clone(), format!("_{url_topic}")),
            None => (DEFAULT_TOPIC.to_owned(), format!("_{DEFAULT_TOPIC}")),
        };
        let dynamic_topic = buffer_key == TOPIC_KEY;

        let paths = TlsPaths::of_output(output.tls.as_ref());
        let sasl = kafka
            .authentication
            .as_ref()
            .and_then(|authentication| authentication.sasl.as_ref());
        let secure = kafka.url.iter().chain(&kafka.brokers).any(|url| is_secure(url));

        let sink = Block::with_argument("match", "**")
            .param("@type", "kafka2")
            .param("@id", store_id(&output.name))
            .param("brokers", brokers.join(","))
            .param("default_topic", default_topic)
            .when(dynamic_topic, |block| block.param("topic_key", TOPIC_KEY))
            .param("use_event_time", "true")
            .param_opt(
                "username",
                sasl.and_then(|sasl| sasl.username.as_ref())
                    .map(|username| read_file(&secret_reference_path(username))),
            )
            .param_opt(
                "password",
                sasl.and_then(|sasl| sasl.password.as_ref())
                    .map(|password| read_file(&secret_reference_path(password))),
            )
            .param_opt("ssl_client_cert_key", paths.key.as_deref())
            .param_opt("ssl_client_cert", paths.certificate.as_deref())
            .param_opt("ssl_ca_cert", paths.ca.as_deref())
            .param_opt(
                "ssl_client_cert_key_password",
                paths.key_passphrase.as_deref().map(read_file),
            )
            .when(sasl.is_some(), |block| {
                block
                    .param("sasl_over_ssl", secure)
                    .param_opt(
                        "scram_mechanism",
                        sasl.and_then(|sasl| sasl.mechanism.as_deref())
                            .and_then(scram_mechanism),
                    )
            })
            .param_opt("compression_codec", compression(kafka.tuning.as_ref()))
            .child(Block::new("format").param("@type", "json"))
            .child(buffer(
                &output.name,
                ctx.collector_buffer(),
                &BufferOptions {
                    keys: vec![buffer_key],
                    tuning: kafka.tuning.as_ref(),
                    disable_chunk_backup: true,
                },
            ));

        blocks.push(sink);
        Ok(blocks)
    }
}

/// SASL with the mechanism `PLAIN` unless the Secret sets another one
fn migrate_authentication(secret: &Secret) -> Option<v1::KafkaAuthentication> {
    let name = secret_name(secret)?;
    let (username, password) = if secrets::has_username_password(secret) {
        (
            Some(SecretReference::new(name, secrets::KEY_USERNAME)),
            Some(SecretReference::new(name, secrets::KEY_PASSWORD)),
        )
    } else {
        (None, None)
    };
    let mechanism = match secrets::sasl_mechanism(secret) {
        Some(mechanism) if secrets::has_sasl_mechanism(secret) => mechanism,
        _ => DEFAULT_SASL_MECHANISM.to_owned(),
    };

    Some(v1::KafkaAuthentication {
        sasl: Some(v1::SaslAuthentication {
            username,
            password,
            mechanism: Some(mechanism),
        }),
    })
}

/// The `host:port` of every broker, falling back to the host of the URL
fn brokers(output: &v1::OutputSpec, kafka: &v1::Kafka) -> generator::Result<Vec<String>> {
    let mut brokers = vec![];
    for broker in &kafka.brokers {
        brokers.extend(host_and_port(&parse_url(output, broker)?));
    }
    if brokers.is_empty() {
        if let Some(url) = &kafka.url {
            brokers.extend(host_and_port(&parse_url(output, url)?));
        }
    }
    Ok(brokers)
}

fn host_and_port(url: &url::Url) -> Option<String> {
    let host = url.host_str().filter(|host| !host.is_empty())?;
    Some(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_owned(),
    })
}

/// `SCRAM-SHA-512` becomes `sha512`, other mechanisms need no setting
fn scram_mechanism(mechanism: &str) -> Option<String> {
    mechanism
        .to_uppercase()
        .strip_prefix("SCRAM-")
        .map(|digest| digest.replace('-', "").to_lowercase())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{KafkaPlugin, scram_mechanism};
    use crate::{
        crd::{common::SecretReference, observability::v1},
        generator::test_support::with_context,
        outputs::{
            PluginOps,
            test_support::{legacy_output, secret_with},
        },
        secrets::Secrets,
    };

    #[test]
    fn test_migrate_sasl_mechanism_from_secret() {
        let output = legacy_output(
            "
            name: kafka-receiver
            type: kafka
            url: tls://broker1.example.com:9092/topic
            secret:
              name: kafka-secret
            kafka:
              topic: app-logs
            tuning:
              delivery: AtMostOnce
              minRetryDuration: 5s
            ",
        );
        let secret = secret_with(
            "kafka-secret",
            &[
                ("username", "user"),
                ("password", "pass"),
                ("sasl.mechanism", "SCRAM-SHA-256"),
            ],
        );

        let kafka = KafkaPlugin
            .migrate(&output, Some(&secret))
            .kafka
            .expect("should have the kafka block");

        assert_eq!(
            Some(v1::KafkaAuthentication {
                sasl: Some(v1::SaslAuthentication {
                    username: Some(SecretReference::new("kafka-secret", "username")),
                    password: Some(SecretReference::new("kafka-secret", "password")),
                    mechanism: Some("SCRAM-SHA-256".to_owned()),
                }),
            }),
            kafka.authentication
        );
        assert_eq!(Some("app-logs".to_owned()), kafka.topic);
        assert_eq!(
            Some(v1::OutputTuningSpec {
                delivery: Some(v1::DeliveryMode::AtMostOnce),
                ..v1::OutputTuningSpec::default()
            }),
            kafka.tuning
        );
    }

    #[test]
    fn test_migrate_default_mechanism() {
        let output = legacy_output(
            "
            name: kafka-receiver
            type: kafka
            url: tcp://broker1.example.com:9092/topic
            secret:
              name: kafka-secret
            ",
        );
        for secret in [
            secret_with("kafka-secret", &[("ca-bundle.crt", "ca")]),
            secret_with("kafka-secret", &[("sasl.mechanism", " ")]),
        ] {
            let sasl = KafkaPlugin
                .migrate(&output, Some(&secret))
                .kafka
                .and_then(|kafka| kafka.authentication)
                .and_then(|authentication| authentication.sasl)
                .expect("should have SASL authentication");

            assert_eq!(Some("PLAIN".to_owned()), sasl.mechanism);
            assert_eq!(None, sasl.username);
        }
    }

    #[test]
    fn test_validate_requires_brokers() {
        let output = v1::OutputSpec {
            kafka: Some(v1::Kafka::default()),
            ..v1::OutputSpec::new("kafka", v1::OutputType::Kafka)
        };

        assert_eq!(
            vec!["kafka output requires either a URL or brokers".to_owned()],
            KafkaPlugin.validate(&output, &Secrets::new())
        );
    }

    #[test]
    fn test_scram_mechanism() {
        assert_eq!(Some("sha512".to_owned()), scram_mechanism("SCRAM-SHA-512"));
        assert_eq!(None, scram_mechanism("PLAIN"));
    }

    #[test]
    fn test_emit_topic_from_url() {
        let output: v1::OutputSpec = serde_yaml::from_str(
            "
            name: kafka-receiver
            type: kafka
            kafka:
              url: tls://broker1-kafka.svc.messaging.cluster.local:9092/topic
            ",
        )
        .expect("should be a valid output");

        let blocks = with_context(|ctx| KafkaPlugin.emit(&output, ctx))
            .expect("should emit the kafka output");

        assert_eq!(2, blocks.len());
        let sink = blocks[1].to_string();
        assert!(sink.starts_with(concat!(
            "<match **>\n",
            "  @type kafka2\n",
            "  @id kafka_receiver\n",
            "  brokers broker1-kafka.svc.messaging.cluster.local:9092\n",
            "  default_topic topic\n",
            "  use_event_time true\n",
            "  <format>\n",
            "    @type json\n",
            "  </format>\n",
            "  <buffer _topic>\n",
        )));
    }

    #[test]
    fn test_emit_templated_topic() {
        let output: v1::OutputSpec = serde_yaml::from_str(
            r#"
            name: kafka
            type: kafka
            kafka:
              brokers:
                - tcp://b1:9092
                - tcp://b2:9092
              topic: 'logs-{.log_type||"none"}'
            "#,
        )
        .expect("should be a valid output");

        let blocks = with_context(|ctx| KafkaPlugin.emit(&output, ctx))
            .expect("should emit the kafka output");

        assert_eq!(3, blocks.len());
        assert!(blocks[1].to_string().contains(
            r#"_kafka_topic ${"logs-" + (record.dig("log_type") || "none").to_s}"#
        ));
        let sink = blocks[2].to_string();
        assert!(sink.contains("  brokers b1:9092,b2:9092\n"));
        assert!(sink.contains("  topic_key _kafka_topic\n"));
        assert!(sink.contains("  <buffer _kafka_topic>\n"));
    }
}
