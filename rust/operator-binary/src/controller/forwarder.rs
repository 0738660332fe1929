//! The ClusterLogForwarder controllers
//!
//! A forwarder of the legacy `logging.openshift.io` API is migrated into the current API first,
//! together with the ClusterLogging of the same name. Both controllers then share the same
//! steps: dereference, validate, generate, build, apply and write the status.

use std::{fmt::Debug, sync::Arc};

use serde::de::DeserializeOwned;
use snafu::{ResultExt, Snafu};
use stackable_operator::{
    k8s_openapi::{
        NamespaceResourceScope, apimachinery::pkg::apis::meta::v1::OwnerReference,
    },
    kube::{
        Resource,
        api::ObjectMeta,
        core::{DeserializeGuard, error_boundary},
        runtime::controller::Action,
    },
    logging::controller::ReconcilerError,
};
use strum::{EnumDiscriminants, IntoStaticStr};

use super::{
    Context, conflict_requeue,
    apply::{self, Applier},
    build::collector_builder::CollectorBuilder,
    conditions::{self, ForwarderConditions, Reason, StatusCondition, TYPE_DEGRADED, TYPE_READY},
    dereference::{self, dereference},
    error_requeue, resync_requeue,
    update_status::{self, update_status},
};
use crate::{
    constant,
    crd::{
        cluster_logging::v1 as cluster_logging,
        common::ManagementState,
        logging::v1 as legacy,
        observability::{LOG_LEVEL_ANNOTATION, v1},
    },
    framework::{
        self, ControllerName, ForwarderName, NamespaceName,
        builder::meta::ownerreference_from_resource,
        controller_utils::{self, get_forwarder_name, get_namespace, get_uid},
    },
    generator,
    migrate::{ForwarderSource, LegacyForwarder, migrate, migrate_status},
    secrets,
    validate,
};

constant!(pub FORWARDER_CONTROLLER_NAME: ControllerName = "clusterlogforwarder");
constant!(pub LEGACY_FORWARDER_CONTROLLER_NAME: ControllerName = "clusterlogforwarder-legacy");

const DEFAULT_LOG_LEVEL: &str = "warn";
const LOG_LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "fatal"];

const UNMANAGED_MESSAGE: &str = "Updates are ignored when the managementState is Unmanaged";

#[derive(Snafu, Debug, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("ClusterLogForwarder object is invalid"))]
    InvalidForwarder {
        source: error_boundary::InvalidObject,
    },

    #[snafu(display("failed to get the forwarder name"))]
    GetForwarderName { source: controller_utils::Error },

    #[snafu(display("failed to get the namespace"))]
    GetNamespace { source: controller_utils::Error },

    #[snafu(display("failed to get the UID"))]
    GetUid { source: controller_utils::Error },

    #[snafu(display("failed to fetch the ClusterLogging of the forwarder"))]
    FetchClusterLogging {
        source: stackable_operator::client::Error,
    },

    #[snafu(display("failed to load the Secrets of the legacy outputs"))]
    LoadLegacySecrets { source: secrets::Error },

    #[snafu(display("failed to fetch the objects referenced by the forwarder"))]
    Dereference { source: dereference::Error },

    #[snafu(display("the forwarder is invalid: {message}"))]
    ValidationFailed { message: String },

    #[snafu(display("failed to generate the collector configuration"))]
    GenerateConfig { source: generator::Error },

    #[snafu(display("failed to apply the collector resources"))]
    ApplyResources { source: apply::Error },

    #[snafu(display("failed to delete the orphaned receiver Services"))]
    DeleteOrphanedServices { source: apply::Error },

    #[snafu(display("failed to update the status"))]
    UpdateStatus { source: update_status::Error },
}

type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Returns true if a write was rejected because the object changed concurrently
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::ApplyResources { source } | Error::DeleteOrphanedServices { source } => {
                source.is_conflict()
            }
            Error::UpdateStatus { source } => source.is_conflict(),
            _ => false,
        }
    }
}

impl ReconcilerError for Error {
    fn category(&self) -> &'static str {
        ErrorDiscriminants::from(self).into()
    }
}

pub fn error_policy<T>(
    _obj: Arc<DeserializeGuard<T>>,
    error: &Error,
    _ctx: Arc<Context>,
) -> Action {
    error_action(error)
}

fn error_action(error: &Error) -> Action {
    match error {
        // The forwarder is requeued when it is modified.
        Error::InvalidForwarder { .. }
        | Error::GetForwarderName { .. }
        | Error::GetNamespace { .. }
        | Error::ValidationFailed { .. } => Action::await_change(),
        _ => error_requeue(),
    }
}

/// A forwarder in the current API which passed the validation
///
/// The spec only contains the outputs which can be deployed.
#[derive(Clone, Debug)]
pub struct ValidatedForwarder {
    pub name: ForwarderName,
    pub namespace: NamespaceName,
    pub owner_reference: OwnerReference,
    pub log_level: String,
    pub spec: v1::ClusterLogForwarderSpec,
}

pub async fn reconcile(
    forwarder: Arc<DeserializeGuard<v1::ClusterLogForwarder>>,
    ctx: Arc<Context>,
) -> Result<Action> {
    let forwarder = forwarder
        .0
        .as_ref()
        .map_err(error_boundary::InvalidObject::clone)
        .context(InvalidForwarderSnafu)?;
    let namespace = get_namespace(forwarder).context(GetNamespaceSnafu)?;

    let spec = migrate(
        ForwarderSource::Current(&forwarder.spec),
        namespace.as_ref(),
        &ctx.plugins,
    );
    let unmanaged = forwarder.spec.management_state == ManagementState::Unmanaged;
    let previous_status = forwarder.status.clone().unwrap_or_default();

    requeue_on_conflict(
        reconcile_forwarder(
            &ctx,
            forwarder,
            &FORWARDER_CONTROLLER_NAME,
            spec,
            unmanaged,
            previous_status,
        )
        .await,
    )
}

pub async fn reconcile_legacy(
    forwarder: Arc<DeserializeGuard<legacy::ClusterLogForwarder>>,
    ctx: Arc<Context>,
) -> Result<Action> {
    let forwarder = forwarder
        .0
        .as_ref()
        .map_err(error_boundary::InvalidObject::clone)
        .context(InvalidForwarderSnafu)?;
    let namespace = get_namespace(forwarder).context(GetNamespaceSnafu)?;

    // An invalid name is reported in the status by `reconcile_forwarder`.
    let cluster_logging = match get_forwarder_name(forwarder) {
        Ok(name) => ctx
            .client
            .get_opt::<cluster_logging::ClusterLogging>(name.as_ref(), namespace.as_ref())
            .await
            .context(FetchClusterLoggingSnafu)?,
        Err(_) => None,
    };
    let cluster_logging_spec = cluster_logging
        .as_ref()
        .map(|cluster_logging| &cluster_logging.spec);
    let unmanaged = cluster_logging_spec.is_some_and(|cluster_logging| {
        cluster_logging.management_state == ManagementState::Unmanaged
    });

    let legacy_secrets =
        secrets::load_named(&ctx.client, &namespace, &forwarder.spec.secret_names())
            .await
            .context(LoadLegacySecretsSnafu)?;

    let spec = migrate(
        ForwarderSource::Legacy(LegacyForwarder {
            spec: &forwarder.spec,
            cluster_logging: cluster_logging_spec,
            secrets: &legacy_secrets,
        }),
        namespace.as_ref(),
        &ctx.plugins,
    );
    let previous_status = forwarder
        .status
        .as_ref()
        .map(migrate_status)
        .unwrap_or_default();

    requeue_on_conflict(
        reconcile_forwarder(
            &ctx,
            forwarder,
            &LEGACY_FORWARDER_CONTROLLER_NAME,
            spec,
            unmanaged,
            previous_status,
        )
        .await,
    )
}

/// Turns conflicts into a short requeue, so that they are neither retried with backoff nor
/// reported as events
fn requeue_on_conflict(result: Result<Action>) -> Result<Action> {
    match result {
        Err(error) if error.is_conflict() => {
            tracing::debug!(
                error = &error as &dyn std::error::Error,
                "Object was changed concurrently, requeuing"
            );
            Ok(conflict_requeue())
        }
        result => result,
    }
}

async fn reconcile_forwarder<T>(
    ctx: &Context,
    forwarder: &T,
    controller_name: &ControllerName,
    spec: v1::ClusterLogForwarderSpec,
    unmanaged: bool,
    previous_status: v1::ClusterLogForwarderStatus,
) -> Result<Action>
where
    T: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + DeserializeOwned,
{
    if forwarder.meta().deletion_timestamp.is_some() {
        // The owned objects are garbage-collected by Kubernetes.
        return Ok(Action::await_change());
    }

    let status_writer = StatusWriter {
        ctx,
        forwarder,
        field_manager: ctx.full_controller_name(controller_name),
        previous_status: &previous_status,
        generation: forwarder.meta().generation,
    };

    let name = match get_forwarder_name(forwarder) {
        Ok(name) => name,
        Err(error) => {
            let mut conditions = ForwarderConditions::default();
            conditions.push_overall(StatusCondition::new(
                TYPE_READY,
                false,
                Reason::ValidationFailure,
                invalid_name_message(&error),
            ));
            status_writer.write(conditions, &spec).await?;
            return Err(error).context(GetForwarderNameSnafu);
        }
    };
    let namespace = get_namespace(forwarder).context(GetNamespaceSnafu)?;
    let uid = get_uid(forwarder).context(GetUidSnafu)?;

    tracing::info!(
        forwarder.name = %name,
        forwarder.namespace = %namespace,
        "Reconciling forwarder"
    );

    if unmanaged {
        tracing::info!(
            forwarder.name = %name,
            forwarder.namespace = %namespace,
            "Forwarder is unmanaged, skipping"
        );
        let mut conditions = ForwarderConditions::default();
        conditions.push_overall(StatusCondition::new(
            TYPE_READY,
            false,
            Reason::ManagementStateUnmanaged,
            UNMANAGED_MESSAGE,
        ));
        status_writer.write(conditions, &spec).await?;
        ctx.metrics.set_operator_info(false, true);
        return Ok(Action::await_change());
    }
    ctx.metrics.set_operator_info(true, true);

    let dereferenced = dereference(&ctx.client, &namespace, &spec)
        .await
        .context(DereferenceSnafu)?;

    let mut conditions = validate::validate(
        &spec,
        &ctx.plugins,
        &dereferenced.secrets,
        dereferenced.authorized.clone(),
    );

    if !validate::is_valid(&conditions) {
        let message = validation_message(&conditions);
        conditions.push_overall(StatusCondition::new(
            TYPE_READY,
            false,
            Reason::ValidationFailure,
            message.clone(),
        ));
        status_writer.write(conditions, &spec).await?;
        ctx.metrics.set_forwarder_info(&spec, false);
        return ValidationFailedSnafu { message }.fail();
    }

    let validated = ValidatedForwarder {
        owner_reference: ownerreference_from_resource(
            forwarder,
            &name,
            &uid,
            Some(true),
            Some(true),
        ),
        log_level: log_level(forwarder.meta()),
        spec: validate::deployable_spec(&spec, &dereferenced.secrets.missing),
        name,
        namespace,
    };

    let generated = generator::generate(&generator::Context {
        forwarder_name: validated.name.as_ref(),
        namespace: validated.namespace.as_ref(),
        spec: &validated.spec,
        secrets: &dereferenced.secrets.secrets,
        cluster_info: &dereferenced.cluster_info,
        plugins: &ctx.plugins,
    });
    let fluent_conf = match generated {
        Ok(fluent_conf) => fluent_conf,
        Err(error) => {
            let message = error.to_string();
            conditions.push_overall(StatusCondition::new(
                TYPE_DEGRADED,
                true,
                Reason::DeploymentError,
                message.clone(),
            ));
            conditions.push_overall(StatusCondition::new(
                TYPE_READY,
                false,
                Reason::DeploymentError,
                message,
            ));
            status_writer.write(conditions, &spec).await?;
            ctx.metrics.set_forwarder_info(&spec, false);
            return Err(error).context(GenerateConfigSnafu);
        }
    };

    let collector_builder = CollectorBuilder::new(
        &ctx.names,
        controller_name,
        &validated,
        &ctx.images.collector,
        fluent_conf,
    );
    let applier = Applier::new(
        &ctx.client,
        status_writer.field_manager.clone(),
        &validated.namespace,
    );
    let applied = applier
        .apply(collector_builder.build())
        .await
        .context(ApplyResourcesSnafu)?;
    applier
        .delete_orphaned_services(&collector_builder.receiver_selector(), &applied.services)
        .await
        .context(DeleteOrphanedServicesSnafu)?;

    let fully_deployed = dereferenced.secrets.missing.is_empty();
    conditions.push_overall(degraded_condition(
        dereferenced.secrets.missing.keys().map(String::as_str),
    ));
    conditions.push_overall(StatusCondition::new(
        TYPE_READY,
        true,
        Reason::ReconciliationComplete,
        "",
    ));
    status_writer.write(conditions, &spec).await?;
    ctx.metrics.set_forwarder_info(&spec, fully_deployed);

    tracing::info!(
        forwarder.name = %validated.name,
        forwarder.namespace = %validated.namespace,
        "Forwarder reconciled"
    );

    Ok(resync_requeue())
}

/// Writes the conditions of a reconcile pass into the status of the forwarder
struct StatusWriter<'a, T> {
    ctx: &'a Context,
    forwarder: &'a T,
    field_manager: String,
    previous_status: &'a v1::ClusterLogForwarderStatus,
    generation: Option<i64>,
}

impl<T> StatusWriter<'_, T>
where
    T: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + DeserializeOwned,
{
    async fn write(
        &self,
        conditions: ForwarderConditions,
        spec: &v1::ClusterLogForwarderSpec,
    ) -> Result<()> {
        let status = conditions.merge_into(
            self.previous_status,
            spec,
            &conditions::now(),
            self.generation,
        );
        update_status(&self.ctx.client, &self.field_manager, self.forwarder, &status)
            .await
            .context(UpdateStatusSnafu)
    }
}

/// The `Degraded` condition, which is true if outputs were left out because of missing
/// resources
fn degraded_condition<'a>(missing_outputs: impl Iterator<Item = &'a str>) -> StatusCondition {
    let missing_outputs: Vec<&str> = missing_outputs.collect();
    if missing_outputs.is_empty() {
        StatusCondition::new(TYPE_DEGRADED, false, Reason::ReconciliationComplete, "")
    } else {
        StatusCondition::new(
            TYPE_DEGRADED,
            true,
            Reason::MissingResource,
            format!(
                "outputs are not deployed because of missing resources: {}",
                missing_outputs.join(", ")
            ),
        )
    }
}

/// The message of the `Ready` condition of an invalid forwarder
fn validation_message(conditions: &ForwarderConditions) -> String {
    let failures = conditions.failure_messages();
    if failures.is_empty() {
        conditions
            .overall
            .iter()
            .find(|condition| !condition.status)
            .map(|condition| condition.message.clone())
            .unwrap_or_default()
    } else {
        failures.join("; ")
    }
}

/// The message of the `Ready` condition of a forwarder whose name cannot be used
fn invalid_name_message(error: &controller_utils::Error) -> String {
    match error {
        controller_utils::Error::InvalidField {
            source: framework::Error::LengthExceeded { length, max_length },
            value,
            ..
        } => format!(
            "the name {value:?} is too long, it has {length} characters but at most \
             {max_length} are allowed"
        ),
        controller_utils::Error::InvalidField { source, .. } => format!("{error}: {source}"),
        controller_utils::Error::MissingField { .. } => error.to_string(),
    }
}

/// The log level of the collector, taken from the annotation of the forwarder
fn log_level(metadata: &ObjectMeta) -> String {
    metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(LOG_LEVEL_ANNOTATION))
        .map(|level| level.to_lowercase())
        .filter(|level| LOG_LEVELS.contains(&level.as_str()))
        .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_owned())
}
