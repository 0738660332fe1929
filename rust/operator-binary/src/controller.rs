//! The controllers of the operator
//!
//! The forwarder controller reconciles the ClusterLogForwarders of both API groups into collector
//! DaemonSets, the exporter controller reconciles the LogFileMetricExporter and the dashboard
//! controller maintains the logging dashboard of the console.

use std::{marker::PhantomData, sync::Arc};

use stackable_operator::{
    client::Client,
    k8s_openapi::api::{
        apps::v1::DaemonSet,
        core::v1::{ConfigMap, Service},
        rbac::v1::{Role, RoleBinding},
    },
    kube::runtime::controller::Action,
    time::Duration,
};

use crate::{
    crd::external::ServiceMonitor,
    framework::{ControllerName, OperatorName, ProductVersion},
    metrics::Metrics,
    outputs::OutputPlugins,
};

pub mod apply;
pub mod build;
pub mod conditions;
pub mod dashboard;
pub mod dereference;
pub mod forwarder;
pub mod lfme;
pub mod update_status;

/// Requeue delay after a write was rejected because the object changed in the meantime
const CONFLICT_REQUEUE: Duration = Duration::from_secs(1);

/// Requeue delay after a transient error
const ERROR_REQUEUE: Duration = Duration::from_secs(5);

/// Requeue delay after a successful reconciliation, so that the health is refreshed
const RESYNC_REQUEUE: Duration = Duration::from_secs(300);

pub fn conflict_requeue() -> Action {
    Action::requeue(*CONFLICT_REQUEUE)
}

pub fn error_requeue() -> Action {
    Action::requeue(*ERROR_REQUEUE)
}

pub fn resync_requeue() -> Action {
    Action::requeue(*RESYNC_REQUEUE)
}

/// Names which are used for the labels of all objects created by the operator
#[derive(Clone, Debug)]
pub struct ContextNames {
    pub operator_name: OperatorName,
    pub product_version: ProductVersion,
}

/// Images of the deployed workloads
#[derive(Clone, Debug)]
pub struct Images {
    pub collector: String,
    pub exporter: String,
}

/// Shared state of all controllers
pub struct Context {
    pub client: Client,
    pub names: ContextNames,
    pub images: Images,
    pub plugins: OutputPlugins,
    pub metrics: Arc<Metrics>,
}

impl Context {
    pub fn new(
        client: Client,
        names: ContextNames,
        images: Images,
        plugins: OutputPlugins,
        metrics: Arc<Metrics>,
    ) -> Self {
        Context {
            client,
            names,
            images,
            plugins,
            metrics,
        }
    }

    /// The controller name which is used as the reporter of events and as field manager
    pub fn full_controller_name(&self, controller_name: &ControllerName) -> String {
        format!("{}_{}", self.names.operator_name, controller_name)
    }
}

/// Marker for resources which are not yet applied
pub struct Prepared;

/// Marker for resources which are applied to the cluster
pub struct Applied;

/// The objects which are owned by a forwarder or the exporter
pub struct KubernetesResources<T> {
    pub config_maps: Vec<ConfigMap>,
    pub roles: Vec<Role>,
    pub role_bindings: Vec<RoleBinding>,
    pub services: Vec<Service>,
    pub service_monitors: Vec<ServiceMonitor>,
    pub daemon_sets: Vec<DaemonSet>,
    pub status: PhantomData<T>,
}

impl<T> Default for KubernetesResources<T> {
    fn default() -> Self {
        KubernetesResources {
            config_maps: vec![],
            roles: vec![],
            role_bindings: vec![],
            services: vec![],
            service_monitors: vec![],
            daemon_sets: vec![],
            status: PhantomData,
        }
    }
}
