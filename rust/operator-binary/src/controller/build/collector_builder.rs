use std::marker::PhantomData;

use sha2::{Digest, Sha256};
use stackable_operator::{
    builder::{meta::ObjectMetaBuilder, pod::container::ContainerBuilder},
    k8s_openapi::{
        api::{
            apps::v1::{DaemonSet, DaemonSetSpec},
            core::v1::{
                ConfigMap, ConfigMapVolumeSource, Container, ContainerPort, KeyToPath, PodSpec,
                PodTemplateSpec, ProjectedVolumeSource, SecretVolumeSource, Service,
                ServiceAccountTokenProjection, ServicePort, ServiceSpec, Volume, VolumeMount,
                VolumeProjection,
            },
            rbac::v1::{PolicyRule, Role, RoleBinding, RoleRef, Subject},
        },
        apimachinery::pkg::{
            apis::meta::v1::{LabelSelector, ObjectMeta},
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
    controller::{ContextNames, KubernetesResources, Prepared, forwarder::ValidatedForwarder},
    crd::{external::ServiceMonitor, observability::v1},
    framework::{
        ComponentName, ControllerName,
        builder::pod::container::{EnvVarSet, FieldPath},
        kvp::{
            annotation::annotation,
            label::{component_selector, label, recommended_labels},
        },
    },
    generator::{
        CONCAT_PARTIAL_PLUGIN, RUN_SCRIPT,
        buffer::BUFFER_ROOT,
        preamble::METRICS_CERT_DIR,
        security::{
            CONFIG_MAPS_MOUNT_DIR, SECRETS_MOUNT_DIR, SERVICE_ACCOUNT_TOKEN_DIR,
            SERVICE_ACCOUNT_TOKEN_FILE,
        },
        sources::receiver_service_name,
    },
};

constant!(pub COLLECTOR_COMPONENT: ComponentName = "collector");
constant!(pub RECEIVER_COMPONENT: ComponentName = "receiver");

pub const CONFIGURATION_FILE_FLUENT_CONF: &str = "fluent.conf";
pub const CONFIGURATION_FILE_CONCAT_PARTIAL: &str = "filter_concat_partial.rb";
pub const CONFIGURATION_FILE_RUN_SCRIPT: &str = "run.sh";

pub const METRICS_PORT_NAME: &str = "metrics";
pub const METRICS_PORT: u16 = 24231;

/// Changes of the configuration change this variable and therefore roll the pods
pub const CONFIG_HASH_ENV: &str = "COLLECTOR_CONF_HASH";

const CONTAINER_NAME: &str = "collector";
const CONFIG_DIR: &str = "/etc/fluent/configs.d/user";

const CONFIG_VOLUME_NAME: &str = "config";
const METRICS_VOLUME_NAME: &str = "metrics";
const BUFFER_VOLUME_NAME: &str = "datadir";
const TRUSTED_CA_VOLUME_NAME: &str = "trusted-ca";
const SERVICE_ACCOUNT_TOKEN_VOLUME_NAME: &str = "sa-token";

const TRUSTED_CA_DIR: &str = "/etc/pki/ca-trust/extracted/pem";
const TRUSTED_CA_KEY: &str = "ca-bundle.crt";
const TRUSTED_CA_FILE: &str = "tls-ca-bundle.pem";
const INJECT_TRUSTED_CA_LABEL: &str = "config.openshift.io/inject-trusted-cabundle";

const SERVICE_ACCOUNT_TOKEN_EXPIRATION_SECONDS: i64 = 3600;
const TERMINATION_GRACE_PERIOD_SECONDS: i64 = 10;

/// The SecurityContextConstraints which allow the collector to read the host logs
const LOGGING_SCC: &str = "logging-scc";

const SERVICE_MONITOR_JOB_LABEL: &str = "monitor-collector";

/// Host directories with the logs of containers, the journal and the audit logs
const HOST_LOG_DIRS: [(&str, &str); 8] = [
    ("varlogpods", "/var/log/pods"),
    ("varlogjournal", "/var/log/journal"),
    ("varlogaudit", "/var/log/audit"),
    ("varlogovn", "/var/log/ovn"),
    ("varlogkubeapiserver", "/var/log/kube-apiserver"),
    ("varlogoauthapiserver", "/var/log/oauth-apiserver"),
    ("varlogopenshiftapiserver", "/var/log/openshift-apiserver"),
    ("varlogoauthserver", "/var/log/oauth-server"),
];

const MAX_VOLUME_NAME_LENGTH: usize = 63;

pub struct CollectorBuilder<'a> {
    names: &'a ContextNames,
    controller_name: &'a ControllerName,
    forwarder: &'a ValidatedForwarder,
    image: &'a str,
    fluent_conf: String,
}

impl<'a> CollectorBuilder<'a> {
    pub fn new(
        names: &'a ContextNames,
        controller_name: &'a ControllerName,
        forwarder: &'a ValidatedForwarder,
        image: &'a str,
        fluent_conf: String,
    ) -> CollectorBuilder<'a> {
        CollectorBuilder {
            names,
            controller_name,
            forwarder,
            image,
            fluent_conf,
        }
    }

    pub fn build(&self) -> KubernetesResources<Prepared> {
        let mut services = vec![self.build_metrics_service()];
        services.extend(self.build_receiver_services());

        KubernetesResources {
            config_maps: vec![self.build_config_map(), self.build_trusted_ca_bundle()],
            roles: vec![self.build_role()],
            role_bindings: vec![self.build_role_binding()],
            services,
            service_monitors: vec![self.build_service_monitor()],
            daemon_sets: vec![self.build_daemon_set()],
            status: PhantomData,
        }
    }

    pub fn config_map_name(&self) -> String {
        format!("{}-config", self.forwarder.name)
    }

    pub fn trusted_ca_bundle_name(&self) -> String {
        format!("{}-trustbundle", self.forwarder.name)
    }

    /// Name of the metrics Service and of its serving certificate Secret
    pub fn metrics_service_name(&self) -> String {
        format!("{}-metrics", self.forwarder.name)
    }

    /// Name of the Role and the RoleBinding
    pub fn rbac_name(&self) -> String {
        format!("{}-collector", self.forwarder.name)
    }

    /// Labels of the receiver Services which are used to find orphaned ones
    pub fn receiver_selector(&self) -> Labels {
        component_selector(&self.forwarder.name, &RECEIVER_COMPONENT)
    }

    pub fn build_config_map(&self) -> ConfigMap {
        let data = [
            (
                CONFIGURATION_FILE_FLUENT_CONF.to_owned(),
                self.fluent_conf.clone(),
            ),
            (
                CONFIGURATION_FILE_CONCAT_PARTIAL.to_owned(),
                CONCAT_PARTIAL_PLUGIN.to_owned(),
            ),
            (
                CONFIGURATION_FILE_RUN_SCRIPT.to_owned(),
                RUN_SCRIPT.to_owned(),
            ),
        ]
        .into();

        ConfigMap {
            metadata: self.common_metadata(
                self.config_map_name(),
                &COLLECTOR_COMPONENT,
                Labels::new(),
                Annotations::new(),
            ),
            data: Some(data),
            ..ConfigMap::default()
        }
    }

    /// An empty ConfigMap which is filled with the trusted CA bundle of the cluster
    pub fn build_trusted_ca_bundle(&self) -> ConfigMap {
        let mut labels = Labels::new();
        labels.insert(label(INJECT_TRUSTED_CA_LABEL, "true"));

        ConfigMap {
            metadata: self.common_metadata(
                self.trusted_ca_bundle_name(),
                &COLLECTOR_COMPONENT,
                labels,
                Annotations::new(),
            ),
            ..ConfigMap::default()
        }
    }

    pub fn build_daemon_set(&self) -> DaemonSet {
        let metadata = self.common_metadata(
            self.forwarder.name.to_string(),
            &COLLECTOR_COMPONENT,
            Labels::new(),
            Annotations::new(),
        );

        let spec = DaemonSetSpec {
            selector: LabelSelector {
                match_labels: Some(self.pod_selector().into()),
                ..LabelSelector::default()
            },
            template: self.build_pod_template(),
            update_strategy: Some(replace_all_update_strategy()),
            ..DaemonSetSpec::default()
        };

        DaemonSet {
            metadata,
            spec: Some(spec),
            status: None,
        }
    }

    fn build_pod_template(&self) -> PodTemplateSpec {
        let collector = self.forwarder.spec.collector.as_ref();
        let (volumes, volume_mounts) = self.volumes();

        let metadata = ObjectMetaBuilder::new()
            .with_labels(self.recommended_labels(&COLLECTOR_COMPONENT))
            .build();

        PodTemplateSpec {
            metadata: Some(metadata),
            spec: Some(PodSpec {
                containers: vec![self.build_container(volume_mounts)],
                node_selector: Some(linux_node_selector(
                    collector.and_then(|collector| collector.node_selector.as_ref()),
                )),
                priority_class_name: Some(PRIORITY_CLASS_NAME.to_owned()),
                service_account_name: Some(self.forwarder.spec.service_account.name.clone()),
                termination_grace_period_seconds: Some(TERMINATION_GRACE_PERIOD_SECONDS),
                tolerations: Some(node_agent_tolerations(
                    collector.and_then(|collector| collector.tolerations.as_deref()),
                )),
                volumes: Some(volumes),
                ..PodSpec::default()
            }),
        }
    }

    fn build_container(&self, volume_mounts: Vec<VolumeMount>) -> Container {
        let mut container_ports = vec![ContainerPort {
            name: Some(METRICS_PORT_NAME.to_owned()),
            container_port: METRICS_PORT.into(),
            protocol: Some("TCP".to_owned()),
            ..ContainerPort::default()
        }];
        container_ports.extend(self.receivers().map(|(_, receiver)| ContainerPort {
            container_port: receiver.port,
            protocol: Some("TCP".to_owned()),
            ..ContainerPort::default()
        }));

        let env_vars = EnvVarSet::new()
            .with_value(CONFIG_HASH_ENV, self.config_hash())
            .with_value("LOG_LEVEL", &self.forwarder.log_level)
            .with_field_path("NODE_NAME", FieldPath::NodeName)
            .with_field_path("POD_IP", FieldPath::PodIp)
            .with_field_path("POD_NAME", FieldPath::PodName);

        let mut container_builder =
            ContainerBuilder::new(CONTAINER_NAME).expect("should be a valid container name");
        container_builder
            .image(self.image)
            .image_pull_policy("IfNotPresent")
            .command(vec![
                "/bin/bash".to_owned(),
                format!("{CONFIG_DIR}/{CONFIGURATION_FILE_RUN_SCRIPT}"),
            ])
            .add_env_vars(env_vars.into())
            .add_volume_mounts(volume_mounts)
            .expect(
                "The mount paths are statically defined or derived from unique names, so there \
                should be no duplicates.",
            )
            .add_container_ports(container_ports)
            .security_context(node_agent_security_context());

        if let Some(resources) = self
            .forwarder
            .spec
            .collector
            .as_ref()
            .and_then(|collector| collector.resources.clone())
        {
            container_builder.resources(resources);
        }

        container_builder.build()
    }

    /// The volumes of the pod and the mounts of the collector container
    fn volumes(&self) -> (Vec<Volume>, Vec<VolumeMount>) {
        let mut volumes = vec![
            Volume {
                name: CONFIG_VOLUME_NAME.to_owned(),
                config_map: Some(ConfigMapVolumeSource {
                    name: self.config_map_name(),
                    ..ConfigMapVolumeSource::default()
                }),
                ..Volume::default()
            },
            Volume {
                name: METRICS_VOLUME_NAME.to_owned(),
                secret: Some(SecretVolumeSource {
                    secret_name: Some(self.metrics_service_name()),
                    ..SecretVolumeSource::default()
                }),
                ..Volume::default()
            },
            host_path_volume(BUFFER_VOLUME_NAME, BUFFER_ROOT),
            Volume {
                name: TRUSTED_CA_VOLUME_NAME.to_owned(),
                config_map: Some(ConfigMapVolumeSource {
                    name: self.trusted_ca_bundle_name(),
                    items: Some(vec![KeyToPath {
                        key: TRUSTED_CA_KEY.to_owned(),
                        path: TRUSTED_CA_FILE.to_owned(),
                        ..KeyToPath::default()
                    }]),
                    ..ConfigMapVolumeSource::default()
                }),
                ..Volume::default()
            },
            Volume {
                name: SERVICE_ACCOUNT_TOKEN_VOLUME_NAME.to_owned(),
                projected: Some(ProjectedVolumeSource {
                    sources: Some(vec![VolumeProjection {
                        service_account_token: Some(ServiceAccountTokenProjection {
                            expiration_seconds: Some(SERVICE_ACCOUNT_TOKEN_EXPIRATION_SECONDS),
                            path: SERVICE_ACCOUNT_TOKEN_FILE.to_owned(),
                            ..ServiceAccountTokenProjection::default()
                        }),
                        ..VolumeProjection::default()
                    }]),
                    ..ProjectedVolumeSource::default()
                }),
                ..Volume::default()
            },
        ];
        let mut volume_mounts = vec![
            read_only_mount(CONFIG_VOLUME_NAME, CONFIG_DIR),
            read_only_mount(METRICS_VOLUME_NAME, METRICS_CERT_DIR),
            VolumeMount {
                name: BUFFER_VOLUME_NAME.to_owned(),
                mount_path: BUFFER_ROOT.to_owned(),
                ..VolumeMount::default()
            },
            read_only_mount(TRUSTED_CA_VOLUME_NAME, TRUSTED_CA_DIR),
            read_only_mount(SERVICE_ACCOUNT_TOKEN_VOLUME_NAME, SERVICE_ACCOUNT_TOKEN_DIR),
        ];

        for (name, path) in HOST_LOG_DIRS {
            volumes.push(host_path_volume(name, path));
            volume_mounts.push(read_only_mount(name, path));
        }

        for secret_name in self.secret_names() {
            let volume_name = volume_name("secret", &secret_name);
            volumes.push(Volume {
                name: volume_name.clone(),
                secret: Some(SecretVolumeSource {
                    secret_name: Some(secret_name.clone()),
                    ..SecretVolumeSource::default()
                }),
                ..Volume::default()
            });
            volume_mounts.push(read_only_mount(
                &volume_name,
                &format!("{SECRETS_MOUNT_DIR}/{secret_name}"),
            ));
        }

        for config_map_name in self.forwarder.spec.config_map_names() {
            let volume_name = volume_name("configmap", &config_map_name);
            volumes.push(Volume {
                name: volume_name.clone(),
                config_map: Some(ConfigMapVolumeSource {
                    name: config_map_name.clone(),
                    ..ConfigMapVolumeSource::default()
                }),
                ..Volume::default()
            });
            volume_mounts.push(read_only_mount(
                &volume_name,
                &format!("{CONFIG_MAPS_MOUNT_DIR}/{config_map_name}"),
            ));
        }

        (volumes, volume_mounts)
    }

    /// The Secrets referenced by the outputs and receivers and the serving certificates of the
    /// receivers
    fn secret_names(&self) -> Vec<String> {
        let mut secret_names = self.forwarder.spec.secret_names();
        secret_names.extend(self.receivers().map(|(input_name, _)| {
            receiver_service_name(self.forwarder.name.as_ref(), input_name)
        }));
        secret_names.sort();
        secret_names.dedup();
        secret_names
    }

    fn config_hash(&self) -> String {
        let mut hasher = Sha256::new();
        for content in [
            self.fluent_conf.as_str(),
            CONCAT_PARTIAL_PLUGIN,
            RUN_SCRIPT,
        ] {
            hasher.update(content.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }

    pub fn build_metrics_service(&self) -> Service {
        let service_name = self.metrics_service_name();
        let mut annotations = Annotations::new();
        annotations.insert(annotation(SERVING_CERT_ANNOTATION, &service_name));

        Service {
            metadata: self.common_metadata(
                service_name,
                &COLLECTOR_COMPONENT,
                Labels::new(),
                annotations,
            ),
            spec: Some(ServiceSpec {
                ports: Some(vec![ServicePort {
                    name: Some(METRICS_PORT_NAME.to_owned()),
                    port: METRICS_PORT.into(),
                    protocol: Some("TCP".to_owned()),
                    target_port: Some(IntOrString::String(METRICS_PORT_NAME.to_owned())),
                    ..ServicePort::default()
                }]),
                selector: Some(self.pod_selector().into()),
                ..ServiceSpec::default()
            }),
            status: None,
        }
    }

    /// One Service per receiver input with a serving certificate of the same name
    pub fn build_receiver_services(&self) -> Vec<Service> {
        self.receivers()
            .map(|(input_name, receiver)| {
                let service_name = receiver_service_name(self.forwarder.name.as_ref(), input_name);
                let mut annotations = Annotations::new();
                annotations.insert(annotation(SERVING_CERT_ANNOTATION, &service_name));

                Service {
                    metadata: self.common_metadata(
                        service_name,
                        &RECEIVER_COMPONENT,
                        Labels::new(),
                        annotations,
                    ),
                    spec: Some(ServiceSpec {
                        ports: Some(vec![ServicePort {
                            name: Some(receiver.type_.to_string()),
                            port: receiver.port,
                            protocol: Some("TCP".to_owned()),
                            target_port: Some(IntOrString::Int(receiver.port)),
                            ..ServicePort::default()
                        }]),
                        selector: Some(self.pod_selector().into()),
                        ..ServiceSpec::default()
                    }),
                    status: None,
                }
            })
            .collect()
    }

    pub fn build_service_monitor(&self) -> ServiceMonitor {
        https_service_monitor(
            self.common_metadata(
                self.forwarder.name.to_string(),
                &COLLECTOR_COMPONENT,
                Labels::new(),
                Annotations::new(),
            ),
            SERVICE_MONITOR_JOB_LABEL,
            self.pod_selector(),
            self.forwarder.namespace.as_ref(),
            &self.metrics_service_name(),
            METRICS_PORT_NAME,
        )
    }

    /// Allows the service account of the collector to use the SecurityContextConstraints which
    /// permit the host mounts
    pub fn build_role(&self) -> Role {
        Role {
            metadata: self.common_metadata(
                self.rbac_name(),
                &COLLECTOR_COMPONENT,
                Labels::new(),
                Annotations::new(),
            ),
            rules: Some(vec![PolicyRule {
                api_groups: Some(vec!["security.openshift.io".to_owned()]),
                resources: Some(vec!["securitycontextconstraints".to_owned()]),
                resource_names: Some(vec![LOGGING_SCC.to_owned()]),
                verbs: vec!["use".to_owned()],
                ..PolicyRule::default()
            }]),
        }
    }

    pub fn build_role_binding(&self) -> RoleBinding {
        RoleBinding {
            metadata: self.common_metadata(
                self.rbac_name(),
                &COLLECTOR_COMPONENT,
                Labels::new(),
                Annotations::new(),
            ),
            role_ref: RoleRef {
                api_group: "rbac.authorization.k8s.io".to_owned(),
                kind: "Role".to_owned(),
                name: self.rbac_name(),
            },
            subjects: Some(vec![Subject {
                kind: "ServiceAccount".to_owned(),
                name: self.forwarder.spec.service_account.name.clone(),
                namespace: Some(self.forwarder.namespace.to_string()),
                ..Subject::default()
            }]),
        }
    }

    fn receivers(&self) -> impl Iterator<Item = (&str, &v1::ReceiverSpec)> {
        self.forwarder
            .spec
            .inputs
            .iter()
            .filter_map(|input| Some((input.name.as_str(), input.receiver.as_ref()?)))
    }

    fn common_metadata(
        &self,
        resource_name: impl Into<String>,
        component: &ComponentName,
        extra_labels: Labels,
        annotations: Annotations,
    ) -> ObjectMeta {
        ObjectMetaBuilder::new()
            .name(resource_name)
            .namespace(self.forwarder.namespace.to_string())
            .ownerreference(self.forwarder.owner_reference.clone())
            .with_labels(self.recommended_labels(component))
            .with_labels(extra_labels)
            .with_annotations(annotations)
            .build()
    }

    fn recommended_labels(&self, component: &ComponentName) -> Labels {
        recommended_labels(
            &self.forwarder.name,
            component,
            &self.names.product_version,
            &self.names.operator_name,
            self.controller_name,
        )
    }

    fn pod_selector(&self) -> Labels {
        component_selector(&self.forwarder.name, &COLLECTOR_COMPONENT)
    }
}

/// A volume name which is a valid DNS label
///
/// Names which are too long are shortened and made unique with a hash of the full name.
fn volume_name(prefix: &str, name: &str) -> String {
    let volume_name = format!("{prefix}-{}", name.replace('.', "-"));
    if volume_name.len() <= MAX_VOLUME_NAME_LENGTH {
        return volume_name;
    }

    let hash = format!("{:x}", Sha256::digest(name.as_bytes()));
    let truncated = volume_name[..MAX_VOLUME_NAME_LENGTH - 9].trim_end_matches('-');
    format!("{truncated}-{}", &hash[..8])
}
