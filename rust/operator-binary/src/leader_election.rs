//! Leader election with a coordination Lease
//!
//! Only the holder of the Lease runs the controllers. The holder renews the Lease periodically;
//! another instance takes it over when it was not renewed within the lease duration.

use std::time::{Duration, Instant};

use snafu::{ResultExt, Snafu};
use stackable_operator::{
    client::Client,
    k8s_openapi::{
        api::coordination::v1::{Lease, LeaseSpec},
        apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta},
        jiff::Timestamp,
    },
    kube::{Api, api::PostParams},
};
use strum::{EnumDiscriminants, IntoStaticStr};

pub const LEASE_NAME: &str = "cluster-logging-operator-lock";
const LEASE_DURATION_SECONDS: i32 = 15;
const RENEW_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Snafu, Debug, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("failed to get the Lease {LEASE_NAME:?}"))]
    GetLease {
        source: stackable_operator::kube::Error,
    },

    #[snafu(display("failed to create the Lease {LEASE_NAME:?}"))]
    CreateLease {
        source: stackable_operator::kube::Error,
    },

    #[snafu(display("failed to update the Lease {LEASE_NAME:?}"))]
    UpdateLease {
        source: stackable_operator::kube::Error,
    },

    #[snafu(display("lost the leadership to {holder:?}"))]
    LeadershipLost { holder: String },
}

type Result<T, E = Error> = std::result::Result<T, E>;

pub struct LeaderElection {
    api: Api<Lease>,
    holder_identity: String,
}

impl LeaderElection {
    /// The holder identity is the pod name or a random identity if it is unknown
    pub fn new(client: &Client, namespace: &str, pod_name: Option<String>) -> Self {
        let holder_identity = pod_name
            .unwrap_or_else(|| format!("cluster-logging-operator-{}", uuid::Uuid::new_v4()));

        LeaderElection {
            api: Api::namespaced(client.as_kube_client(), namespace),
            holder_identity,
        }
    }

    /// Waits until this instance holds the Lease
    pub async fn acquire(&self) -> Result<()> {
        loop {
            if self.try_acquire_or_renew().await? {
                tracing::info!(
                    lease.name = LEASE_NAME,
                    holder = self.holder_identity,
                    "Acquired the leadership"
                );
                return Ok(());
            }
            tracing::debug!(lease.name = LEASE_NAME, "Waiting for the leadership");
            tokio::time::sleep(RENEW_INTERVAL).await;
        }
    }

    /// Renews the Lease until the leadership is lost
    ///
    /// Failed renewals are retried as long as the Lease has not expired.
    pub async fn keep(&self) -> Result<()> {
        let lease_duration = Duration::from_secs(LEASE_DURATION_SECONDS.unsigned_abs().into());
        let mut last_renewal = Instant::now();

        loop {
            tokio::time::sleep(RENEW_INTERVAL).await;

            match self.try_acquire_or_renew().await {
                Ok(true) => last_renewal = Instant::now(),
                Ok(false) => {
                    return LeadershipLostSnafu {
                        holder: self.current_holder().await.unwrap_or_default(),
                    }
                    .fail();
                }
                Err(error) if last_renewal.elapsed() < lease_duration => {
                    tracing::warn!(
                        error = &error as &dyn std::error::Error,
                        "Failed to renew the Lease, retrying"
                    );
                }
                Err(error) => return Err(error),
            }
        }
    }

    async fn current_holder(&self) -> Option<String> {
        self.api
            .get_opt(LEASE_NAME)
            .await
            .ok()
            .flatten()
            .and_then(|lease| lease.spec)
            .and_then(|spec| spec.holder_identity)
    }

    /// Returns true if this instance holds the Lease afterwards
    async fn try_acquire_or_renew(&self) -> Result<bool> {
        let now = Timestamp::now();

        let Some(mut lease) = self.api.get_opt(LEASE_NAME).await.context(GetLeaseSnafu)? else {
            let lease = Lease {
                metadata: ObjectMeta {
                    name: Some(LEASE_NAME.to_owned()),
                    ..ObjectMeta::default()
                },
                spec: Some(self.acquired_spec(None, now)),
            };
            return match self.api.create(&PostParams::default(), &lease).await {
                Ok(_) => Ok(true),
                Err(stackable_operator::kube::Error::Api(response)) if response.code == 409 => {
                    Ok(false)
                }
                Err(error) => Err(error).context(CreateLeaseSnafu),
            };
        };

        let spec = lease.spec.clone().unwrap_or_default();
        let holds_lease = spec.holder_identity.as_deref() == Some(self.holder_identity.as_str());
        if !holds_lease && !is_expired(&spec, now) {
            return Ok(false);
        }

        lease.spec = Some(if holds_lease {
            LeaseSpec {
                renew_time: Some(MicroTime(now)),
                ..spec
            }
        } else {
            self.acquired_spec(Some(&spec), now)
        });

        match self
            .api
            .replace(LEASE_NAME, &PostParams::default(), &lease)
            .await
        {
            Ok(_) => Ok(true),
            Err(stackable_operator::kube::Error::Api(response)) if response.code == 409 => {
                Ok(false)
            }
            Err(error) => Err(error).context(UpdateLeaseSnafu),
        }
    }

    fn acquired_spec(&self, previous: Option<&LeaseSpec>, now: Timestamp) -> LeaseSpec {
        LeaseSpec {
            holder_identity: Some(self.holder_identity.clone()),
            lease_duration_seconds: Some(LEASE_DURATION_SECONDS),
            acquire_time: Some(MicroTime(now)),
            renew_time: Some(MicroTime(now)),
            lease_transitions: Some(
                previous
                    .and_then(|spec| spec.lease_transitions)
                    .map_or(0, |transitions| transitions + 1),
            ),
            ..LeaseSpec::default()
        }
    }
}

/// A Lease without a holder or renew time is free
fn is_expired(spec: &LeaseSpec, now: Timestamp) -> bool {
    let Some(renew_time) = &spec.renew_time else {
        return true;
    };
    if spec.holder_identity.is_none() {
        return true;
    }
    let duration = spec.lease_duration_seconds.unwrap_or(LEASE_DURATION_SECONDS);
    now.as_second() > renew_time.0.as_second() + i64::from(duration)
}

#[cfg(test)]
mod tests {
    use stackable_operator::k8s_openapi::{
        api::coordination::v1::LeaseSpec, apimachinery::pkg::apis::meta::v1::MicroTime,
        jiff::Timestamp,
    };

    use super::is_expired;

    fn timestamp(second: i64) -> Timestamp {
        Timestamp::from_second(second).expect("should be a valid timestamp")
    }

    fn held_lease(renewed_at: i64) -> LeaseSpec {
        LeaseSpec {
            holder_identity: Some("cluster-logging-operator-abc".to_owned()),
            lease_duration_seconds: Some(15),
            renew_time: Some(MicroTime(timestamp(renewed_at))),
            ..LeaseSpec::default()
        }
    }

    #[test]
    fn test_is_expired() {
        let lease = held_lease(1_000);

        assert!(!is_expired(&lease, timestamp(1_010)));
        assert!(!is_expired(&lease, timestamp(1_015)));
        assert!(is_expired(&lease, timestamp(1_016)));
    }

    #[test]
    fn test_free_lease_is_expired() {
        assert!(is_expired(&LeaseSpec::default(), timestamp(1_000)));
        assert!(is_expired(
            &LeaseSpec {
                holder_identity: None,
                ..held_lease(1_000)
            },
            timestamp(1_001)
        ));
    }
}
