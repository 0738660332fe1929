//! The custom resources which are read and written by this operator

pub mod cluster_logging;
pub mod common;
pub mod external;
pub mod lfme;
pub mod logging;
pub mod observability;
