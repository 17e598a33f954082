//! lgtm relay — library crate shared by the `lgtm` binary and the
//! integration tests in `tests/`.

pub mod agent;
pub mod config;
pub mod errors;
pub mod github;
pub mod protocol;
pub mod relay;
