//! Helpers run by the drivers' CI pipelines.
//!
//! - `create-or-modify-comment`: keep one bot comment up to date on the pull
//!   request whose head is the local checkout's HEAD, authenticating as a
//!   GitHub App installation.
//! - `auth-fixture`: provision external-identity users (AWS IAM, OIDC) on a
//!   freshly started database through its shell.
//! - `orchestration`: write and prepare server orchestration configs.

pub mod checkout;
pub mod config;
pub mod fixtures;
pub mod github;
pub mod orchestration;
pub mod reconcile;
pub mod report;

/// Install the stderr `fmt` subscriber, filtered by `RUST_LOG`.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}
