//! Common types that do not belong (yet) to a more specific module
use snafu::{ResultExt, Snafu, ensure};
use strum::{EnumDiscriminants, IntoStaticStr};

#[derive(Snafu, Debug, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("{value} is not a port number"))]
    OutOfRange {
        source: std::num::TryFromIntError,
        value: i32,
    },

    #[snafu(display("port {port} is privileged, it must be at least {MIN_UNPRIVILEGED_PORT}"))]
    PrivilegedPort { port: u16 },
}

/// The lowest port which a process without `CAP_NET_BIND_SERVICE` can bind to
pub const MIN_UNPRIVILEGED_PORT: u16 = 1024;

/// A port which the collector can listen on without elevated privileges
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Port(u16);

impl Port {
    pub fn unprivileged(value: i32) -> Result<Self, Error> {
        let port = u16::try_from(value).context(OutOfRangeSnafu { value })?;
        ensure!(port >= MIN_UNPRIVILEGED_PORT, PrivilegedPortSnafu { port });
        Ok(Port(port))
    }
}

impl std::fmt::Display for Port {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::{ErrorDiscriminants, Port};

    #[test]
    fn test_port_unprivileged() {
        assert_eq!("1024", Port::unprivileged(1024).expect("should be valid").to_string());
        assert_eq!("65535", Port::unprivileged(65535).expect("should be valid").to_string());

        for privileged in [0, 514, 1023] {
            assert_eq!(
                Err(ErrorDiscriminants::PrivilegedPort),
                Port::unprivileged(privileged).map_err(ErrorDiscriminants::from)
            );
        }
        for out_of_range in [-1, 65536] {
            assert_eq!(
                Err(ErrorDiscriminants::OutOfRange),
                Port::unprivileged(out_of_range).map_err(ErrorDiscriminants::from)
            );
        }
    }
}
