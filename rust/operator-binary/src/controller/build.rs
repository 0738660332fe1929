//! Builders of the objects which are owned by a forwarder or the exporter

use std::collections::BTreeMap;

use stackable_operator::{
    k8s_openapi::{
        api::{
            apps::v1::{DaemonSetUpdateStrategy, RollingUpdateDaemonSet},
            core::v1::{
                Capabilities, HostPathVolumeSource, SELinuxOptions, SeccompProfile,
                SecurityContext, Toleration, Volume, VolumeMount,
            },
        },
        apimachinery::pkg::{
            apis::meta::v1::{LabelSelector, ObjectMeta},
            util::intstr::IntOrString,
        },
    },
    kvp::Labels,
};

use crate::crd::external::{
    Endpoint, NamespaceSelector, ServiceMonitor, ServiceMonitorSpec, TlsConfig,
};

pub mod collector_builder;
pub mod exporter_builder;

/// Annotation which instructs the service CA operator to create a serving certificate Secret
pub const SERVING_CERT_ANNOTATION: &str = "service.beta.openshift.io/serving-cert-secret-name";

const OS_NODE_SELECTOR_KEY: &str = "kubernetes.io/os";
const OS_NODE_SELECTOR_VALUE: &str = "linux";

pub const PRIORITY_CLASS_NAME: &str = "system-node-critical";

const SERVICE_MONITOR_CA_FILE: &str =
    "/etc/prometheus/configmaps/serving-certs-ca-bundle/service-ca.crt";
const PROMETHEUS_TOKEN_FILE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";

/// The node selector of the given spec with the operating system forced to Linux
pub fn linux_node_selector(
    node_selector: Option<&BTreeMap<String, String>>,
) -> BTreeMap<String, String> {
    let mut node_selector = node_selector.cloned().unwrap_or_default();
    node_selector.insert(
        OS_NODE_SELECTOR_KEY.to_owned(),
        OS_NODE_SELECTOR_VALUE.to_owned(),
    );
    node_selector
}

/// Tolerations which allow the pods to run on control plane nodes and on nodes with disk
/// pressure, followed by the given ones
pub fn node_agent_tolerations(tolerations: Option<&[Toleration]>) -> Vec<Toleration> {
    let mut all_tolerations = vec![
        Toleration {
            key: Some("node-role.kubernetes.io/master".to_owned()),
            operator: Some("Exists".to_owned()),
            effect: Some("NoSchedule".to_owned()),
            ..Toleration::default()
        },
        Toleration {
            key: Some("node.kubernetes.io/disk-pressure".to_owned()),
            operator: Some("Exists".to_owned()),
            effect: Some("NoSchedule".to_owned()),
            ..Toleration::default()
        },
    ];
    for toleration in tolerations.unwrap_or_default() {
        if !all_tolerations.contains(toleration) {
            all_tolerations.push(toleration.clone());
        }
    }
    all_tolerations
}

pub fn host_path_volume(name: &str, path: &str) -> Volume {
    Volume {
        name: name.to_owned(),
        host_path: Some(HostPathVolumeSource {
            path: path.to_owned(),
            ..HostPathVolumeSource::default()
        }),
        ..Volume::default()
    }
}

pub fn read_only_mount(name: &str, mount_path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_owned(),
        mount_path: mount_path.to_owned(),
        read_only: Some(true),
        ..VolumeMount::default()
    }
}

/// Security context of the containers which read the host logs
pub fn node_agent_security_context() -> SecurityContext {
    SecurityContext {
        allow_privilege_escalation: Some(false),
        capabilities: Some(Capabilities {
            drop: Some(vec!["ALL".to_owned()]),
            ..Capabilities::default()
        }),
        se_linux_options: Some(SELinuxOptions {
            type_: Some("spc_t".to_owned()),
            ..SELinuxOptions::default()
        }),
        seccomp_profile: Some(SeccompProfile {
            type_: "RuntimeDefault".to_owned(),
            ..SeccompProfile::default()
        }),
        ..SecurityContext::default()
    }
}

/// Replaces all pods at once; the node agents do not serve requests which must stay available
pub fn replace_all_update_strategy() -> DaemonSetUpdateStrategy {
    DaemonSetUpdateStrategy {
        type_: Some("RollingUpdate".to_owned()),
        rolling_update: Some(RollingUpdateDaemonSet {
            max_unavailable: Some(IntOrString::String("100%".to_owned())),
            ..RollingUpdateDaemonSet::default()
        }),
    }
}

/// A ServiceMonitor which scrapes the given port of the selected Service over HTTPS
///
/// The server certificate is issued by the service CA for `<service>.<namespace>.svc`.
pub fn https_service_monitor(
    metadata: ObjectMeta,
    job_label: &str,
    selector: Labels,
    namespace: &str,
    service_name: &str,
    port_name: &str,
) -> ServiceMonitor {
    ServiceMonitor {
        metadata,
        spec: ServiceMonitorSpec {
            job_label: Some(job_label.to_owned()),
            selector: LabelSelector {
                match_labels: Some(selector.into()),
                ..LabelSelector::default()
            },
            namespace_selector: Some(NamespaceSelector {
                match_names: vec![namespace.to_owned()],
            }),
            endpoints: vec![Endpoint {
                port: port_name.to_owned(),
                path: Some("/metrics".to_owned()),
                scheme: Some("https".to_owned()),
                bearer_token_file: Some(PROMETHEUS_TOKEN_FILE.to_owned()),
                tls_config: Some(TlsConfig {
                    ca_file: Some(SERVICE_MONITOR_CA_FILE.to_owned()),
                    server_name: Some(format!("{service_name}.{namespace}.svc")),
                }),
            }],
        },
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use pretty_assertions::assert_eq;
    use stackable_operator::k8s_openapi::api::core::v1::Toleration;

    use super::{linux_node_selector, node_agent_tolerations};

    #[test]
    fn test_linux_node_selector() {
        assert_eq!(
            BTreeMap::from([("kubernetes.io/os".to_owned(), "linux".to_owned())]),
            linux_node_selector(None)
        );

        let node_selector = BTreeMap::from([
            ("kubernetes.io/os".to_owned(), "windows".to_owned()),
            ("node-role.kubernetes.io/worker".to_owned(), "".to_owned()),
        ]);
        assert_eq!(
            BTreeMap::from([
                ("kubernetes.io/os".to_owned(), "linux".to_owned()),
                ("node-role.kubernetes.io/worker".to_owned(), "".to_owned()),
            ]),
            linux_node_selector(Some(&node_selector))
        );
    }

    #[test]
    fn test_node_agent_tolerations() {
        let infra = Toleration {
            key: Some("node-role.kubernetes.io/infra".to_owned()),
            operator: Some("Exists".to_owned()),
            effect: Some("NoSchedule".to_owned()),
            ..Toleration::default()
        };
        let defaults = node_agent_tolerations(None);

        let tolerations = node_agent_tolerations(Some(&[infra.clone(), defaults[0].clone()]));

        assert_eq!(2, defaults.len());
        assert_eq!(
            vec![defaults[0].clone(), defaults[1].clone(), infra],
            tolerations
        );
    }
}
