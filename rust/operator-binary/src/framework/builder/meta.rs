use stackable_operator::{
    builder::meta::{ObjectMetaBuilder, OwnerReferenceBuilder},
    k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference},
    kube::Resource,
    kvp::{Annotations, Labels},
};

use crate::framework::{HasObjectName, HasUid};

/// Infallible variant of `stackable_operator::builder::meta::ObjectMetaBuilder::ownerreference_from_resource`
///
/// The name and UID are passed separately because they were already validated and the given
/// resource is only consulted for its api_version and kind.
pub fn ownerreference_from_resource(
    resource: &impl Resource<DynamicType = ()>,
    name: &impl HasObjectName,
    uid: &impl HasUid,
    block_owner_deletion: Option<bool>,
    controller: Option<bool>,
) -> OwnerReference {
    OwnerReferenceBuilder::new()
        // Set api_version and kind, and additionally the name and UID if they exist.
        .initialize_from_resource(resource)
        .name(name.to_object_name())
        .uid(uid.to_uid())
        .block_owner_deletion_opt(block_owner_deletion)
        .controller_opt(controller)
        .build()
        .expect(
            "OwnerReference should be created because the resource has an api_version and kind, \
            and the name and uid are set explicitly.",
        )
}

/// Metadata of an object which is controlled by the given owner and therefore garbage-collected
/// together with it
pub fn owned_object_meta(
    name: impl Into<String>,
    namespace: impl Into<String>,
    owner_reference: OwnerReference,
    labels: Labels,
    annotations: Annotations,
) -> ObjectMeta {
    ObjectMetaBuilder::new()
        .name(name)
        .namespace(namespace)
        .ownerreference(owner_reference)
        .with_labels(labels)
        .with_annotations(annotations)
        .build()
}
