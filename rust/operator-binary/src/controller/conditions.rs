//! Status conditions of the forwarder and the log file metric exporter
//!
//! Validators produce [`StatusCondition`]s which carry no timestamps. They are converted into
//! Kubernetes conditions only when the status is written, so that the transition time of an
//! unchanged condition is kept.

use stackable_operator::k8s_openapi::{
    apimachinery::pkg::apis::meta::v1::{Condition, Time},
    jiff::Timestamp,
};
use strum::{Display, IntoStaticStr};

use crate::crd::observability::v1;

const GROUP_PREFIX: &str = "observability.openshift.io/";

pub const TYPE_READY: &str = "Ready";
pub const TYPE_DEGRADED: &str = "Degraded";
pub const TYPE_VALID: &str = "observability.openshift.io/Valid";
pub const TYPE_AUTHORIZED: &str = "observability.openshift.io/Authorized";

pub const STATUS_TRUE: &str = "True";
pub const STATUS_FALSE: &str = "False";

#[derive(Clone, Copy, Debug, Display, Eq, IntoStaticStr, PartialEq)]
pub enum Reason {
    ClusterRoleMissing,
    ClusterRolesExist,
    DeploymentError,
    Invalid,
    ManagementStateUnmanaged,
    MissingResource,
    ReconciliationComplete,
    ServiceAccountDoesNotExist,
    Valid,
    ValidationFailure,
    ValidationSuccess,
}

/// The kinds of named entries of a forwarder which get a condition each
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum Entry {
    #[strum(serialize = "ValidInput")]
    Input,
    #[strum(serialize = "ValidOutput")]
    Output,
    #[strum(serialize = "ValidFilter")]
    Filter,
    #[strum(serialize = "ValidPipeline")]
    Pipeline,
}

impl Entry {
    fn type_prefix(&self) -> String {
        format!("{GROUP_PREFIX}{self}-")
    }

    /// The condition type of the entry with the given name, e.g.
    /// `observability.openshift.io/ValidOutput-my-es`
    pub fn condition_type(&self, name: &str) -> String {
        format!("{}{name}", self.type_prefix())
    }
}

/// A condition without a transition time and generation
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StatusCondition {
    pub type_: String,
    pub status: bool,
    pub reason: Reason,
    pub message: String,
}

impl StatusCondition {
    pub fn new(
        type_: impl Into<String>,
        status: bool,
        reason: Reason,
        message: impl Into<String>,
    ) -> Self {
        StatusCondition {
            type_: type_.into(),
            status,
            reason,
            message: message.into(),
        }
    }

    pub fn valid_entry(entry: Entry, name: &str) -> Self {
        let kind = match entry {
            Entry::Input => "input",
            Entry::Output => "output",
            Entry::Filter => "filter",
            Entry::Pipeline => "pipeline",
        };
        StatusCondition::new(
            entry.condition_type(name),
            true,
            Reason::ValidationSuccess,
            format!("{kind} {name:?} is valid"),
        )
    }

    pub fn invalid_entry(entry: Entry, name: &str, message: impl Into<String>) -> Self {
        StatusCondition::new(
            entry.condition_type(name),
            false,
            Reason::ValidationFailure,
            message,
        )
    }

    pub fn missing_resource(entry: Entry, name: &str, message: impl Into<String>) -> Self {
        StatusCondition::new(
            entry.condition_type(name),
            false,
            Reason::MissingResource,
            message,
        )
    }

    fn status_str(&self) -> &'static str {
        if self.status { STATUS_TRUE } else { STATUS_FALSE }
    }

    /// Returns true if the given Kubernetes condition has the same type, status, reason and
    /// message
    fn matches(&self, condition: &Condition) -> bool {
        condition.type_ == self.type_
            && condition.status == self.status_str()
            && condition.reason == self.reason.to_string()
            && condition.message == self.message
    }

    fn into_condition(self, now: &Time, observed_generation: Option<i64>) -> Condition {
        Condition {
            last_transition_time: now.clone(),
            message: self.message.clone(),
            observed_generation,
            reason: self.reason.to_string(),
            status: self.status_str().to_owned(),
            type_: self.type_,
        }
    }
}

/// The current time as a Kubernetes timestamp
pub fn now() -> Time {
    Time(Timestamp::now())
}

/// Inserts or replaces the condition of the same type
///
/// The transition time of the existing condition is kept if type, status, reason and message did
/// not change; only the observed generation is updated then.
pub fn set_condition(
    conditions: &mut Vec<Condition>,
    condition: StatusCondition,
    now: &Time,
    observed_generation: Option<i64>,
) {
    match conditions
        .iter_mut()
        .find(|existing| existing.type_ == condition.type_)
    {
        Some(existing) if condition.matches(existing) => {
            existing.observed_generation = observed_generation;
        }
        Some(existing) => {
            *existing = condition.into_condition(now, observed_generation);
        }
        None => conditions.push(condition.into_condition(now, observed_generation)),
    }
}

/// Removes the conditions of entries whose names are not in the given list
pub fn prune_conditions(conditions: &mut Vec<Condition>, entry: Entry, names: &[&str]) {
    let prefix = entry.type_prefix();
    conditions.retain(|condition| match condition.type_.strip_prefix(&prefix) {
        Some(name) => names.contains(&name),
        None => true,
    });
}

/// Returns the condition of the given type if it exists
#[cfg(test)]
pub fn find<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|condition| condition.type_ == type_)
}

/// The conditions which are written into the status of a forwarder at the end of a reconcile
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ForwarderConditions {
    pub overall: Vec<StatusCondition>,
    pub inputs: Vec<StatusCondition>,
    pub outputs: Vec<StatusCondition>,
    pub filters: Vec<StatusCondition>,
    pub pipelines: Vec<StatusCondition>,
}

impl ForwarderConditions {
    pub fn push_overall(&mut self, condition: StatusCondition) {
        self.overall.push(condition);
    }

    pub fn extend(&mut self, other: ForwarderConditions) {
        self.overall.extend(other.overall);
        self.inputs.extend(other.inputs);
        self.outputs.extend(other.outputs);
        self.filters.extend(other.filters);
        self.pipelines.extend(other.pipelines);
    }

    /// Returns true if no entry failed the validation
    ///
    /// Entries which only lack a referenced resource count as valid, they are left out of the
    /// deployment instead.
    pub fn all_entries_valid(&self) -> bool {
        [&self.inputs, &self.outputs, &self.filters, &self.pipelines]
            .into_iter()
            .flatten()
            .all(|condition| condition.status || condition.reason == Reason::MissingResource)
    }

    /// Messages of all failed entry conditions
    pub fn failure_messages(&self) -> Vec<String> {
        [&self.inputs, &self.outputs, &self.filters, &self.pipelines]
            .into_iter()
            .flatten()
            .filter(|condition| !condition.status)
            .map(|condition| condition.message.clone())
            .collect()
    }

    /// Merges these conditions into the previous status
    ///
    /// Conditions of entries which no longer exist in the given spec are pruned.
    pub fn merge_into(
        self,
        previous: &v1::ClusterLogForwarderStatus,
        spec: &v1::ClusterLogForwarderSpec,
        now: &Time,
        observed_generation: Option<i64>,
    ) -> v1::ClusterLogForwarderStatus {
        let mut status = previous.clone();

        let input_names: Vec<&str> = spec.inputs.iter().map(|i| i.name.as_str()).collect();
        let output_names: Vec<&str> = spec.outputs.iter().map(|o| o.name.as_str()).collect();
        let filter_names: Vec<&str> = spec.filters.iter().map(|f| f.name.as_str()).collect();
        let pipeline_names: Vec<&str> = spec.pipelines.iter().map(|p| p.name.as_str()).collect();

        prune_conditions(&mut status.inputs, Entry::Input, &input_names);
        prune_conditions(&mut status.outputs, Entry::Output, &output_names);
        prune_conditions(&mut status.filters, Entry::Filter, &filter_names);
        prune_conditions(&mut status.pipelines, Entry::Pipeline, &pipeline_names);

        for (conditions, updates) in [
            (&mut status.conditions, self.overall),
            (&mut status.inputs, self.inputs),
            (&mut status.outputs, self.outputs),
            (&mut status.filters, self.filters),
            (&mut status.pipelines, self.pipelines),
        ] {
            for condition in updates {
                set_condition(conditions, condition, now, observed_generation);
            }
        }

        status.observed_generation = observed_generation;
        status
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use stackable_operator::k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};

    use super::{
        Entry, ForwarderConditions, Reason, StatusCondition, TYPE_READY, prune_conditions,
        set_condition,
    };
    use crate::crd::observability::v1;

    fn time(value: &str) -> Time {
        serde_json::from_value(serde_json::Value::String(value.to_owned()))
            .expect("should be a valid RFC 3339 timestamp")
    }

    fn ready(message: &str) -> StatusCondition {
        StatusCondition::new(TYPE_READY, true, Reason::ReconciliationComplete, message)
    }

    #[test]
    fn test_entry_condition_type() {
        assert_eq!(
            "observability.openshift.io/ValidOutput-my-es",
            Entry::Output.condition_type("my-es")
        );
        assert_eq!(
            "observability.openshift.io/ValidPipeline-to-es",
            Entry::Pipeline.condition_type("to-es")
        );
    }

    #[test]
    fn test_set_condition_keeps_transition_time_if_unchanged() {
        let earlier = time("2025-01-01T00:00:00Z");
        let later = time("2025-01-02T00:00:00Z");
        let mut conditions = vec![];

        set_condition(&mut conditions, ready(""), &earlier, Some(1));
        set_condition(&mut conditions, ready(""), &later, Some(2));

        assert_eq!(1, conditions.len());
        assert_eq!(earlier, conditions[0].last_transition_time);
        assert_eq!(Some(2), conditions[0].observed_generation);
    }

    #[test]
    fn test_set_condition_moves_transition_time_if_changed() {
        let earlier = time("2025-01-01T00:00:00Z");
        let later = time("2025-01-02T00:00:00Z");
        let mut conditions = vec![];

        set_condition(&mut conditions, ready(""), &earlier, Some(1));
        set_condition(&mut conditions, ready("changed"), &later, Some(1));

        assert_eq!(
            vec![Condition {
                last_transition_time: later,
                message: "changed".to_owned(),
                observed_generation: Some(1),
                reason: "ReconciliationComplete".to_owned(),
                status: "True".to_owned(),
                type_: "Ready".to_owned(),
            }],
            conditions
        );
    }

    #[test]
    fn test_prune_conditions() {
        let now = time("2025-01-01T00:00:00Z");
        let mut conditions = vec![];
        for name in ["kept", "removed"] {
            set_condition(
                &mut conditions,
                StatusCondition::valid_entry(Entry::Output, name),
                &now,
                None,
            );
        }
        set_condition(&mut conditions, ready(""), &now, None);

        prune_conditions(&mut conditions, Entry::Output, &["kept"]);

        assert_eq!(
            vec![
                "observability.openshift.io/ValidOutput-kept",
                "Ready"
            ],
            conditions
                .iter()
                .map(|condition| condition.type_.as_str())
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_merge_into_sets_observed_generation() {
        let spec: v1::ClusterLogForwarderSpec = serde_yaml::from_str(
            "
            serviceAccount:
              name: logcollector
            pipelines: []
            ",
        )
        .expect("should be a valid spec");

        let mut conditions = ForwarderConditions::default();
        conditions.push_overall(ready(""));

        let status = conditions.merge_into(
            &v1::ClusterLogForwarderStatus::default(),
            &spec,
            &time("2025-01-01T00:00:00Z"),
            Some(3),
        );

        assert_eq!(Some(3), status.observed_generation);
        assert_eq!(Some(3), status.conditions[0].observed_generation);
    }

    #[test]
    fn test_all_entries_valid() {
        let mut conditions = ForwarderConditions::default();
        conditions
            .outputs
            .push(StatusCondition::valid_entry(Entry::Output, "es"));
        assert!(conditions.all_entries_valid());

        conditions.outputs.push(StatusCondition::missing_resource(
            Entry::Output,
            "cw",
            "secret \"cw\" not found",
        ));
        assert!(conditions.all_entries_valid());
        assert_eq!(
            vec!["secret \"cw\" not found".to_owned()],
            conditions.failure_messages()
        );

        conditions.outputs.push(StatusCondition::invalid_entry(
            Entry::Output,
            "http",
            "url must not be empty",
        ));
        assert!(!conditions.all_entries_valid());
    }
}
