//! Boot a Compute Engine instance with a startup script, list the zone's
//! instances, then delete the instance again.
//!
//! - [`gcp`] - authentication and HTTP plumbing
//! - [`compute`] - instance lifecycle on top of operation polling
//! - [`config`] - file and command-line settings
//! - [`demo`] - the start / list / prompt / stop sequence

pub mod compute;
pub mod config;
pub mod demo;
pub mod gcp;

/// Version injected at compile time via GCE_STARTUP_VERSION env var (set by CI/CD),
/// or the crate version for local builds.
pub const VERSION: &str = match option_env!("GCE_STARTUP_VERSION") {
    Some(v) => v,
    None => env!("CARGO_PKG_VERSION"),
};
