//! The LogFileMetricExporter controller
//!
//! Only the singleton `instance` in `openshift-logging` is deployed; any other exporter is marked
//! as invalid.

use std::sync::Arc;

use snafu::{ResultExt, Snafu};
use stackable_operator::{
    builder::meta::OwnerReferenceBuilder,
    kube::{
        Resource, ResourceExt,
        core::{DeserializeGuard, error_boundary},
        runtime::controller::Action,
    },
    logging::controller::ReconcilerError,
};
use strum::{EnumDiscriminants, IntoStaticStr};

use super::{
    Context, conflict_requeue,
    apply::{self, Applier},
    build::exporter_builder::{ExporterBuilder, ValidatedExporter},
    conditions::{self, Reason, StatusCondition, TYPE_READY},
    error_requeue, resync_requeue,
    update_status::{self, update_status},
};
use crate::{
    constant,
    crd::lfme::v1alpha1,
    framework::{
        ControllerName,
        controller_utils::{self, get_namespace},
    },
    validate,
};

constant!(pub LFME_CONTROLLER_NAME: ControllerName = "logfilemetricexporter");

#[derive(Snafu, Debug, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("LogFileMetricExporter object is invalid"))]
    InvalidExporter {
        source: error_boundary::InvalidObject,
    },

    #[snafu(display("failed to get the namespace"))]
    GetNamespace { source: controller_utils::Error },

    #[snafu(display("the LogFileMetricExporter is not deployed"))]
    ValidationFailed { source: validate::lfme::Error },

    #[snafu(display("failed to build the owner reference"))]
    BuildOwnerReference {
        source: stackable_operator::builder::meta::Error,
    },

    #[snafu(display("failed to apply the exporter resources"))]
    ApplyResources { source: apply::Error },

    #[snafu(display("failed to update the status"))]
    UpdateStatus { source: update_status::Error },
}

type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::ApplyResources { source } => source.is_conflict(),
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

pub fn error_policy(
    _obj: Arc<DeserializeGuard<v1alpha1::LogFileMetricExporter>>,
    error: &Error,
    _ctx: Arc<Context>,
) -> Action {
    match error {
        Error::InvalidExporter { .. } | Error::ValidationFailed { .. } => Action::await_change(),
        _ => error_requeue(),
    }
}

pub async fn reconcile(
    exporter: Arc<DeserializeGuard<v1alpha1::LogFileMetricExporter>>,
    ctx: Arc<Context>,
) -> Result<Action> {
    let exporter = exporter
        .0
        .as_ref()
        .map_err(error_boundary::InvalidObject::clone)
        .context(InvalidExporterSnafu)?;

    if exporter.meta().deletion_timestamp.is_some() {
        return Ok(Action::await_change());
    }

    match reconcile_exporter(&ctx, exporter).await {
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

async fn reconcile_exporter(
    ctx: &Context,
    exporter: &v1alpha1::LogFileMetricExporter,
) -> Result<Action> {
    let namespace = get_namespace(exporter).context(GetNamespaceSnafu)?;
    let name = exporter.name_any();
    let field_manager = ctx.full_controller_name(&LFME_CONTROLLER_NAME);

    tracing::info!(
        exporter.name = name.as_str(),
        exporter.namespace = %namespace,
        "Reconciling LogFileMetricExporter"
    );

    if let Err(error) = validate::lfme::validate(namespace.as_ref(), &name) {
        let condition = StatusCondition::new(
            TYPE_READY,
            false,
            Reason::Invalid,
            format!("validation failed: {error}"),
        );
        write_status(ctx, &field_manager, exporter, condition).await?;
        ctx.metrics.set_lfme_info(false, false);
        return Err(error).context(ValidationFailedSnafu);
    }

    let validated = ValidatedExporter {
        owner_reference: OwnerReferenceBuilder::new()
            .initialize_from_resource(exporter)
            .block_owner_deletion_opt(Some(true))
            .controller_opt(Some(true))
            .build()
            .context(BuildOwnerReferenceSnafu)?,
        namespace,
        spec: exporter.spec.clone(),
    };

    let resources = ExporterBuilder::new(
        &ctx.names,
        &LFME_CONTROLLER_NAME,
        &validated,
        &ctx.images.exporter,
    )
    .build();
    let applied = Applier::new(&ctx.client, field_manager.clone(), &validated.namespace)
        .apply(resources)
        .await;

    if let Err(error) = applied {
        if !error.is_conflict() {
            let condition =
                StatusCondition::new(TYPE_READY, false, Reason::Invalid, error.to_string());
            write_status(ctx, &field_manager, exporter, condition).await?;
            ctx.metrics.set_lfme_info(true, false);
        }
        return Err(error).context(ApplyResourcesSnafu);
    }

    let condition = StatusCondition::new(TYPE_READY, true, Reason::Valid, "");
    write_status(ctx, &field_manager, exporter, condition).await?;
    ctx.metrics.set_lfme_info(true, true);

    tracing::info!(
        exporter.name = name.as_str(),
        exporter.namespace = %validated.namespace,
        "LogFileMetricExporter reconciled"
    );

    Ok(resync_requeue())
}

async fn write_status(
    ctx: &Context,
    field_manager: &str,
    exporter: &v1alpha1::LogFileMetricExporter,
    condition: StatusCondition,
) -> Result<()> {
    let status = exporter_status(exporter, condition);
    update_status(&ctx.client, field_manager, exporter, &status)
        .await
        .context(UpdateStatusSnafu)
}

fn exporter_status(
    exporter: &v1alpha1::LogFileMetricExporter,
    condition: StatusCondition,
) -> v1alpha1::LogFileMetricExporterStatus {
    let mut status = exporter.status.clone().unwrap_or_default();
    conditions::set_condition(
        &mut status.conditions,
        condition,
        &conditions::now(),
        exporter.meta().generation,
    );
    status
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use stackable_operator::kube::api::ObjectMeta;

    use super::exporter_status;
    use crate::{
        controller::conditions::{Reason, StatusCondition, TYPE_READY, find},
        crd::lfme::v1alpha1,
    };

    fn exporter() -> v1alpha1::LogFileMetricExporter {
        v1alpha1::LogFileMetricExporter {
            metadata: ObjectMeta {
                name: Some("instance".to_owned()),
                namespace: Some("openshift-logging".to_owned()),
                generation: Some(2),
                ..ObjectMeta::default()
            },
            spec: v1alpha1::LogFileMetricExporterSpec::default(),
            status: None,
        }
    }

    #[test]
    fn test_exporter_status_replaces_the_ready_condition() {
        let mut exporter = exporter();
        exporter.status = Some(exporter_status(
            &exporter,
            StatusCondition::new(TYPE_READY, false, Reason::Invalid, "failed"),
        ));

        let status = exporter_status(
            &exporter,
            StatusCondition::new(TYPE_READY, true, Reason::Valid, ""),
        );

        assert_eq!(1, status.conditions.len());
        let ready = find(&status.conditions, TYPE_READY).expect("should contain Ready");
        assert_eq!("True", ready.status);
        assert_eq!("Valid", ready.reason);
        assert_eq!(Some(2), ready.observed_generation);
    }
}
