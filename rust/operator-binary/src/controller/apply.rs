//! Applies the prepared objects to the cluster
//!
//! Every object is fetched first and compared with the desired state. Missing objects are
//! created, differing ones are patched and equal ones are left untouched. A patch carries the
//! resource version of the fetched object, so a concurrent change is rejected with a conflict.

use std::{collections::BTreeMap, fmt::Debug, marker::PhantomData};

use serde::{Serialize, de::DeserializeOwned};
use snafu::{OptionExt, ResultExt, Snafu};
use stackable_operator::{
    client::Client,
    k8s_openapi::{NamespaceResourceScope, api::core::v1::Service},
    kube::{
        Api, Resource,
        api::{DeleteParams, ListParams, Patch, PatchParams, PostParams},
    },
    kvp::Labels,
};
use strum::{EnumDiscriminants, IntoStaticStr};

use super::{Applied, KubernetesResources, Prepared};
use crate::{comparators::Comparable, framework::NamespaceName};

#[derive(Snafu, Debug, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("the {kind} has no name"))]
    MissingName { kind: String },

    #[snafu(display("failed to get the {kind} {name:?}"))]
    GetResource {
        source: stackable_operator::kube::Error,
        kind: String,
        name: String,
    },

    #[snafu(display("failed to create the {kind} {name:?}"))]
    CreateResource {
        source: stackable_operator::kube::Error,
        kind: String,
        name: String,
    },

    #[snafu(display("failed to patch the {kind} {name:?}"))]
    PatchResource {
        source: stackable_operator::kube::Error,
        kind: String,
        name: String,
    },

    #[snafu(display("the {kind} {name:?} was changed concurrently"))]
    Conflict { kind: String, name: String },

    #[snafu(display("failed to list the Services"))]
    ListServices {
        source: stackable_operator::client::Error,
    },

    #[snafu(display("failed to delete the orphaned Service {name:?}"))]
    DeleteService {
        source: stackable_operator::kube::Error,
        name: String,
    },
}

type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }
}

pub struct Applier<'a> {
    client: &'a Client,
    field_manager: String,
    namespace: NamespaceName,
}

impl<'a> Applier<'a> {
    pub fn new(
        client: &'a Client,
        field_manager: String,
        namespace: &NamespaceName,
    ) -> Applier<'a> {
        Applier {
            client,
            field_manager,
            namespace: namespace.clone(),
        }
    }

    /// Applies the given objects, ConfigMaps and RBAC objects before the workloads which need
    /// them
    pub async fn apply(
        &self,
        resources: KubernetesResources<Prepared>,
    ) -> Result<KubernetesResources<Applied>> {
        let config_maps = self.apply_all(resources.config_maps).await?;
        let roles = self.apply_all(resources.roles).await?;
        let role_bindings = self.apply_all(resources.role_bindings).await?;
        let services = self.apply_all(resources.services).await?;
        let service_monitors = self.apply_all(resources.service_monitors).await?;
        let daemon_sets = self.apply_all(resources.daemon_sets).await?;

        Ok(KubernetesResources {
            config_maps,
            roles,
            role_bindings,
            services,
            service_monitors,
            daemon_sets,
            status: PhantomData,
        })
    }

    async fn apply_all<T>(&self, resources: Vec<T>) -> Result<Vec<T>>
    where
        T: Resource<DynamicType = (), Scope = NamespaceResourceScope>
            + Comparable
            + Clone
            + Debug
            + DeserializeOwned
            + Serialize,
    {
        let mut applied_resources = vec![];
        for resource in resources {
            applied_resources.push(self.apply_one(resource).await?);
        }
        Ok(applied_resources)
    }

    pub async fn apply_one<T>(&self, mut desired: T) -> Result<T>
    where
        T: Resource<DynamicType = (), Scope = NamespaceResourceScope>
            + Comparable
            + Clone
            + Debug
            + DeserializeOwned
            + Serialize,
    {
        let kind = T::kind(&()).into_owned();
        let name = desired
            .meta()
            .name
            .clone()
            .context(MissingNameSnafu { kind: kind.clone() })?;
        let namespace = desired
            .meta()
            .namespace
            .clone()
            .unwrap_or_else(|| self.namespace.to_string());
        let api: Api<T> = Api::namespaced(self.client.as_kube_client(), &namespace);

        let current = api.get_opt(&name).await.context(GetResourceSnafu {
            kind: kind.clone(),
            name: name.clone(),
        })?;

        match current {
            None => {
                tracing::debug!(kind = kind.as_str(), name = name.as_str(), "Creating object");
                let params = PostParams {
                    field_manager: Some(self.field_manager.clone()),
                    ..PostParams::default()
                };
                match api.create(&params, &desired).await {
                    Ok(created) => Ok(created),
                    Err(stackable_operator::kube::Error::Api(response)) if response.code == 409 => {
                        ConflictSnafu { kind, name }.fail()
                    }
                    Err(source) => Err(source).context(CreateResourceSnafu { kind, name }),
                }
            }
            Some(current) if current.is_same(&desired) => {
                tracing::debug!(
                    kind = kind.as_str(),
                    name = name.as_str(),
                    "Object is up to date"
                );
                Ok(current)
            }
            Some(current) => {
                tracing::debug!(kind = kind.as_str(), name = name.as_str(), "Patching object");
                desired.meta_mut().resource_version = current.meta().resource_version.clone();
                let params = PatchParams {
                    field_manager: Some(self.field_manager.clone()),
                    ..PatchParams::default()
                };
                match api.patch(&name, &params, &Patch::Merge(&desired)).await {
                    Ok(patched) => Ok(patched),
                    Err(stackable_operator::kube::Error::Api(response)) if response.code == 409 => {
                        ConflictSnafu { kind, name }.fail()
                    }
                    Err(source) => Err(source).context(PatchResourceSnafu { kind, name }),
                }
            }
        }
    }

    /// Deletes the Services with the given labels which are not part of the desired Services
    pub async fn delete_orphaned_services(
        &self,
        selector: &Labels,
        desired: &[Service],
    ) -> Result<Vec<String>> {
        let list_params = ListParams::default().labels(&label_selector(selector));
        let existing = self
            .client
            .list::<Service>(self.namespace.as_ref(), &list_params)
            .await
            .context(ListServicesSnafu)?;

        let orphans = orphaned_names(&existing, desired);

        let api: Api<Service> =
            Api::namespaced(self.client.as_kube_client(), self.namespace.as_ref());
        for name in &orphans {
            tracing::info!(service.name = name.as_str(), "Deleting orphaned Service");
            match api.delete(name, &DeleteParams::default()).await {
                Ok(_) => {}
                Err(stackable_operator::kube::Error::Api(response)) if response.code == 404 => {}
                Err(source) => {
                    return Err(source).context(DeleteServiceSnafu { name: name.clone() });
                }
            }
        }

        Ok(orphans)
    }
}

/// Formats labels as a label selector, e.g. `app.kubernetes.io/name=collector,...`
fn label_selector(labels: &Labels) -> String {
    BTreeMap::<String, String>::from(labels.clone())
        .into_iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(",")
}

fn orphaned_names(existing: &[Service], desired: &[Service]) -> Vec<String> {
    existing
        .iter()
        .filter_map(|service| service.metadata.name.clone())
        .filter(|name| {
            !desired
                .iter()
                .any(|service| service.metadata.name.as_ref() == Some(name))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use stackable_operator::{
        k8s_openapi::api::core::v1::Service, kube::api::ObjectMeta, kvp::Labels,
    };

    use super::{label_selector, orphaned_names};
    use crate::framework::kvp::label::label;

    fn service(name: &str) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some(name.to_owned()),
                ..ObjectMeta::default()
            },
            ..Service::default()
        }
    }

    #[test]
    fn test_label_selector() {
        let mut labels = Labels::new();
        labels.insert(label("app.kubernetes.io/name", "receiver"));
        labels.insert(label("app.kubernetes.io/instance", "collector"));

        assert_eq!(
            "app.kubernetes.io/instance=collector,app.kubernetes.io/name=receiver",
            label_selector(&labels)
        );
    }

    #[test]
    fn test_orphaned_names() {
        let existing = [
            service("collector-http-audit"),
            service("collector-syslog"),
            service("collector-removed"),
        ];
        let desired = [service("collector-http-audit"), service("collector-syslog")];

        assert_eq!(
            vec!["collector-removed".to_owned()],
            orphaned_names(&existing, &desired)
        );
        assert!(orphaned_names(&existing[..1], &desired).is_empty());
    }
}
