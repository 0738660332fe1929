//! Checks that the service account of a forwarder may collect the referenced log types

use std::{collections::BTreeSet, sync::LazyLock};

use regex::Regex;
use snafu::{ResultExt, Snafu};
use stackable_operator::{
    client::Client,
    k8s_openapi::api::{
        authorization::v1::{ResourceAttributes, SubjectAccessReview, SubjectAccessReviewSpec},
        core::v1::ServiceAccount,
    },
    kube::{Api, api::PostParams},
};
use strum::{EnumDiscriminants, IntoStaticStr};

use crate::{
    controller::conditions::{Reason, StatusCondition, TYPE_AUTHORIZED},
    crd::observability::{
        INPUT_NAME_APPLICATION, INPUT_NAME_AUDIT, INPUT_NAME_INFRASTRUCTURE, v1,
    },
    framework::NamespaceName,
};

const COLLECT_VERB: &str = "collect";
const LOGS_RESOURCE: &str = "logs";
const OBSERVABILITY_GROUP: &str = "observability.openshift.io";

/// Namespaces whose container logs belong to the infrastructure logs
static INFRASTRUCTURE_NAMESPACES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new("^default$|^openshift.*$|^kube.*$")
        .expect("failed to compile the infrastructure namespace regex")
});

#[derive(Snafu, Debug, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("failed to fetch the ServiceAccount {name:?}"))]
    FetchServiceAccount {
        source: stackable_operator::client::Error,
        name: String,
    },

    #[snafu(display("failed to review the access to the {log_type} logs"))]
    ReviewAccess {
        source: stackable_operator::kube::Error,
        log_type: String,
    },
}

type Result<T, E = Error> = std::result::Result<T, E>;

/// The log types which the collector must be allowed to collect
///
/// Returns the log types and whether any receiver input is referenced.
pub fn required_log_types(spec: &v1::ClusterLogForwarderSpec) -> (BTreeSet<&'static str>, bool) {
    let mut log_types = BTreeSet::new();
    let mut has_receivers = false;

    let referenced: BTreeSet<&str> = spec
        .pipelines
        .iter()
        .flat_map(|pipeline| pipeline.input_refs.iter().map(String::as_str))
        .collect();

    for name in &referenced {
        match *name {
            INPUT_NAME_APPLICATION => log_types.insert(INPUT_NAME_APPLICATION),
            INPUT_NAME_INFRASTRUCTURE => log_types.insert(INPUT_NAME_INFRASTRUCTURE),
            INPUT_NAME_AUDIT => log_types.insert(INPUT_NAME_AUDIT),
            _ => continue,
        };
    }

    for input in spec
        .inputs
        .iter()
        .filter(|input| referenced.contains(input.name.as_str()))
    {
        match input.type_ {
            v1::InputType::Application => {
                log_types.insert(INPUT_NAME_APPLICATION);
                let includes_infrastructure = input
                    .application
                    .iter()
                    .flat_map(|application| &application.includes)
                    .filter_map(|include| include.namespace.as_deref())
                    .any(|namespace| INFRASTRUCTURE_NAMESPACES.is_match(namespace));
                if includes_infrastructure {
                    log_types.insert(INPUT_NAME_INFRASTRUCTURE);
                }
            }
            v1::InputType::Infrastructure => {
                log_types.insert(INPUT_NAME_INFRASTRUCTURE);
            }
            v1::InputType::Audit => {
                log_types.insert(INPUT_NAME_AUDIT);
            }
            v1::InputType::Receiver => {
                has_receivers = true;
                if input
                    .receiver
                    .as_ref()
                    .is_some_and(|receiver| receiver.type_ == v1::ReceiverType::Syslog)
                {
                    log_types.insert(INPUT_NAME_INFRASTRUCTURE);
                }
            }
        }
    }

    (log_types, has_receivers)
}

/// Returns the `Authorized` condition of the forwarder
pub async fn authorize(
    client: &Client,
    namespace: &NamespaceName,
    spec: &v1::ClusterLogForwarderSpec,
) -> Result<StatusCondition> {
    let service_account_name = &spec.service_account.name;
    if client
        .get_opt::<ServiceAccount>(service_account_name, namespace.as_ref())
        .await
        .context(FetchServiceAccountSnafu {
            name: service_account_name,
        })?
        .is_none()
    {
        return Ok(StatusCondition::new(
            TYPE_AUTHORIZED,
            false,
            Reason::ServiceAccountDoesNotExist,
            format!("service account {service_account_name:?} not found"),
        ));
    }

    let (log_types, has_receivers) = required_log_types(spec);
    if log_types.is_empty() && has_receivers {
        return Ok(authorized(&log_types));
    }
    if log_types.is_empty() {
        return Ok(StatusCondition::new(
            TYPE_AUTHORIZED,
            false,
            Reason::ClusterRoleMissing,
            "no inputs were found to evaluate the permissions",
        ));
    }

    let user = format!("system:serviceaccount:{namespace}:{service_account_name}");
    let api: Api<SubjectAccessReview> = Api::all(client.as_kube_client());
    let mut denied = vec![];
    for log_type in &log_types {
        let review = api
            .create(&PostParams::default(), &subject_access_review(&user, log_type))
            .await
            .context(ReviewAccessSnafu { log_type: *log_type })?;
        let allowed = review.status.is_some_and(|status| status.allowed);
        tracing::debug!(user, log_type, allowed, "Reviewed the access to the logs");
        if !allowed {
            denied.push(*log_type);
        }
    }

    if denied.is_empty() {
        Ok(authorized(&log_types))
    } else {
        Ok(StatusCondition::new(
            TYPE_AUTHORIZED,
            false,
            Reason::ClusterRoleMissing,
            format!(
                "insufficient permissions on service account, not authorized to collect {denied:?} logs"
            ),
        ))
    }
}

fn authorized(log_types: &BTreeSet<&str>) -> StatusCondition {
    StatusCondition::new(
        TYPE_AUTHORIZED,
        true,
        Reason::ClusterRolesExist,
        format!(
            "permitted to collect log types: {:?}",
            log_types.iter().collect::<Vec<_>>()
        ),
    )
}

fn subject_access_review(user: &str, log_type: &str) -> SubjectAccessReview {
    SubjectAccessReview {
        spec: SubjectAccessReviewSpec {
            user: Some(user.to_owned()),
            resource_attributes: Some(ResourceAttributes {
                group: Some(OBSERVABILITY_GROUP.to_owned()),
                resource: Some(LOGS_RESOURCE.to_owned()),
                verb: Some(COLLECT_VERB.to_owned()),
                name: Some(log_type.to_owned()),
                ..ResourceAttributes::default()
            }),
            ..SubjectAccessReviewSpec::default()
        },
        ..SubjectAccessReview::default()
    }
}
