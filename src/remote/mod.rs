//! Localhost control plane: the operator service and the matching client
//! used by the CLI.
pub mod client;
pub mod service;
pub mod table;
