//! Builds the DaemonSet, Service and ServiceMonitor of the LogFileMetricExporter
//!
//! All objects are named after the component because only one exporter is deployed.

use std::marker::PhantomData;

use stackable_operator::{
    builder::{meta::ObjectMetaBuilder, pod::container::ContainerBuilder},
    k8s_openapi::{
        api::{
            apps::v1::{DaemonSet, DaemonSetSpec},
            core::v1::{
                Container, ContainerPort, PodSpec, PodTemplateSpec, SecretVolumeSource, Service,
                ServicePort, ServiceSpec, Volume,
            },
        },
        apimachinery::pkg::{
            apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference},
            util::intstr::IntOrString,
        },
    },
    kvp::{Annotations, Labels},
};

use super::{
    PRIORITY_CLASS_NAME, SERVING_CERT_ANNOTATION, host_path_volume, https_service_monitor,
    linux_node_selector, node_agent_security_context, node_agent_tolerations, read_only_mount,
    replace_all_update_strategy,
};
use crate::{
    constant,
    controller::{ContextNames, KubernetesResources, Prepared},
    crd::{external::ServiceMonitor, lfme::v1alpha1, logging::DEFAULT_SERVICE_ACCOUNT_NAME},
    framework::{
        ComponentName, ControllerName, NamespaceName,
        builder::meta::owned_object_meta,
        kvp::{
            annotation::annotation,
            label::{component_selector, recommended_labels},
        },
    },
};

constant!(pub EXPORTER_COMPONENT: ComponentName = "logfilesmetricexporter");

pub const EXPORTER_PORT: u16 = 2112;
pub const EXPORTER_PORT_NAME: &str = "exporter-port";

/// Serving certificate of the exporter, created by the service CA operator
pub const EXPORTER_SECRET_NAME: &str = "lfme-secret";

const METRICS_VOLUME_NAME: &str = "lfme-metrics";
const METRICS_DIR: &str = "/etc/logfilemetricexporter/metrics";

const POD_LOGS_DIR: &str = "/var/log/pods";
const HOST_LOG_DIRS: [(&str, &str); 2] = [
    ("varlogcontainers", "/var/log/containers"),
    ("varlogpods", POD_LOGS_DIR),
];

const SERVICE_MONITOR_JOB_LABEL: &str = "monitor-logfilesmetricexporter";
const TERMINATION_GRACE_PERIOD_SECONDS: i64 = 10;

const MIN_TLS_VERSION: &str = "VersionTLS12";
const CIPHER_SUITES: [&str; 9] = [
    "TLS_AES_128_GCM_SHA256",
    "TLS_AES_256_GCM_SHA384",
    "TLS_CHACHA20_POLY1305_SHA256",
    "TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256",
    "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256",
    "TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384",
    "TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384",
    "TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256",
    "TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256",
];

/// The LogFileMetricExporter singleton which passed the validation
#[derive(Clone, Debug)]
pub struct ValidatedExporter {
    pub namespace: NamespaceName,
    pub owner_reference: OwnerReference,
    pub spec: v1alpha1::LogFileMetricExporterSpec,
}

pub struct ExporterBuilder<'a> {
    names: &'a ContextNames,
    controller_name: &'a ControllerName,
    exporter: &'a ValidatedExporter,
    image: &'a str,
}

impl<'a> ExporterBuilder<'a> {
    pub fn new(
        names: &'a ContextNames,
        controller_name: &'a ControllerName,
        exporter: &'a ValidatedExporter,
        image: &'a str,
    ) -> ExporterBuilder<'a> {
        ExporterBuilder {
            names,
            controller_name,
            exporter,
            image,
        }
    }

    pub fn build(&self) -> KubernetesResources<Prepared> {
        KubernetesResources {
            services: vec![self.build_service()],
            service_monitors: vec![self.build_service_monitor()],
            daemon_sets: vec![self.build_daemon_set()],
            status: PhantomData,
            ..KubernetesResources::default()
        }
    }

    pub fn build_daemon_set(&self) -> DaemonSet {
        let spec = DaemonSetSpec {
            selector: LabelSelector {
                match_labels: Some(self.selector().into()),
                ..LabelSelector::default()
            },
            template: self.build_pod_template(),
            update_strategy: Some(replace_all_update_strategy()),
            ..DaemonSetSpec::default()
        };

        DaemonSet {
            metadata: self.metadata(Annotations::new()),
            spec: Some(spec),
            status: None,
        }
    }

    fn build_pod_template(&self) -> PodTemplateSpec {
        let spec = &self.exporter.spec;

        let mut volumes: Vec<Volume> = HOST_LOG_DIRS
            .iter()
            .map(|(name, path)| host_path_volume(name, path))
            .collect();
        volumes.push(Volume {
            name: METRICS_VOLUME_NAME.to_owned(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(EXPORTER_SECRET_NAME.to_owned()),
                ..SecretVolumeSource::default()
            }),
            ..Volume::default()
        });

        PodTemplateSpec {
            metadata: Some(
                ObjectMetaBuilder::new()
                    .with_labels(self.recommended_labels())
                    .build(),
            ),
            spec: Some(PodSpec {
                containers: vec![self.build_container()],
                node_selector: Some(linux_node_selector(spec.node_selector.as_ref())),
                priority_class_name: Some(PRIORITY_CLASS_NAME.to_owned()),
                service_account_name: Some(DEFAULT_SERVICE_ACCOUNT_NAME.to_owned()),
                termination_grace_period_seconds: Some(TERMINATION_GRACE_PERIOD_SECONDS),
                tolerations: Some(node_agent_tolerations(spec.tolerations.as_deref())),
                volumes: Some(volumes),
                ..PodSpec::default()
            }),
        }
    }

    fn build_container(&self) -> Container {
        let mut volume_mounts: Vec<_> = HOST_LOG_DIRS
            .iter()
            .map(|(name, path)| read_only_mount(name, path))
            .collect();
        volume_mounts.push(read_only_mount(METRICS_VOLUME_NAME, METRICS_DIR));

        let mut container_builder = ContainerBuilder::new(EXPORTER_COMPONENT.as_ref())
            .expect("should be a valid container name");
        container_builder
            .image(self.image)
            .image_pull_policy("IfNotPresent")
            .command(vec!["/bin/bash".to_owned()])
            .args(vec!["-c".to_owned(), exporter_command()])
            .add_volume_mounts(volume_mounts)
            .expect("The mount paths are statically defined and unique.")
            .add_container_ports(vec![ContainerPort {
                name: Some(EXPORTER_PORT_NAME.to_owned()),
                container_port: EXPORTER_PORT.into(),
                protocol: Some("TCP".to_owned()),
                ..ContainerPort::default()
            }])
            .security_context(node_agent_security_context());

        if let Some(resources) = self.exporter.spec.resources.clone() {
            container_builder.resources(resources);
        }

        container_builder.build()
    }

    pub fn build_service(&self) -> Service {
        let mut annotations = Annotations::new();
        annotations.insert(annotation(SERVING_CERT_ANNOTATION, EXPORTER_SECRET_NAME));

        Service {
            metadata: self.metadata(annotations),
            spec: Some(ServiceSpec {
                ports: Some(vec![ServicePort {
                    name: Some(EXPORTER_PORT_NAME.to_owned()),
                    port: EXPORTER_PORT.into(),
                    protocol: Some("TCP".to_owned()),
                    target_port: Some(IntOrString::String(EXPORTER_PORT_NAME.to_owned())),
                    ..ServicePort::default()
                }]),
                selector: Some(self.selector().into()),
                ..ServiceSpec::default()
            }),
            status: None,
        }
    }

    pub fn build_service_monitor(&self) -> ServiceMonitor {
        https_service_monitor(
            self.metadata(Annotations::new()),
            SERVICE_MONITOR_JOB_LABEL,
            self.selector(),
            self.exporter.namespace.as_ref(),
            EXPORTER_COMPONENT.as_ref(),
            EXPORTER_PORT_NAME,
        )
    }

    fn metadata(&self, annotations: Annotations) -> ObjectMeta {
        owned_object_meta(
            EXPORTER_COMPONENT.to_string(),
            self.exporter.namespace.to_string(),
            self.exporter.owner_reference.clone(),
            self.recommended_labels(),
            annotations,
        )
    }

    fn recommended_labels(&self) -> Labels {
        recommended_labels(
            &*EXPORTER_COMPONENT,
            &EXPORTER_COMPONENT,
            &self.names.product_version,
            &self.names.operator_name,
            self.controller_name,
        )
    }

    fn selector(&self) -> Labels {
        component_selector(&*EXPORTER_COMPONENT, &EXPORTER_COMPONENT)
    }
}

fn exporter_command() -> String {
    format!(
        "/usr/local/bin/log-file-metric-exporter -verbosity=2 -dir={POD_LOGS_DIR} \
        -http=:{EXPORTER_PORT} -keyFile={METRICS_DIR}/tls.key -crtFile={METRICS_DIR}/tls.crt \
        -tlsMinVersion={MIN_TLS_VERSION} -cipherSuites={}",
        CIPHER_SUITES.join(",")
    )
}
