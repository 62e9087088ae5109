//! Compute Engine instance lifecycle
//!
//! [`ComputeClient`] wraps one project and zone. Mutating calls submit a
//! request, then block on the returned operation until it is `DONE`; failures
//! reported by the server surface as [`ApiOperationError`].
//!
//! # Module Structure
//!
//! - [`instances`] - start, list and stop instances
//! - [`operation`] - operation addressing and the polling loop
//! - [`types`] - request and resource types
//! - [`error`] - typed errors
//!
//! # Example
//!
//! ```ignore
//! use gce_startup::compute::{ComputeClient, ComputeConfig, MetadataItem};
//!
//! async fn example(auth: gce_startup::gcp::auth::Authenticator) -> anyhow::Result<()> {
//!     let client = ComputeClient::new(ComputeConfig::new("my-project", "us-central1-a"), auth)?;
//!     client
//!         .start_instance("demo", "startup.sh".as_ref(), &[MetadataItem::new("text", "hi")])
//!         .await?;
//!     client.stop_instance("demo").await?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod instances;
pub mod operation;
pub mod types;

pub use error::{ApiOperationError, ComputeError};
pub use instances::{validate_instance_name, STARTUP_SCRIPT_KEY};
pub use operation::{OperationRef, OperationScope, PollPolicy};
pub use types::{Instance, Metadata, MetadataItem, Operation, OperationStatus};

use crate::gcp::auth::Authenticator;
use crate::gcp::client::{GcpClient, DEFAULT_COMPUTE_ENDPOINT};
use anyhow::Result;

/// Storage scope granted to the instance's service account so the startup
/// script can upload its output
pub const DEFAULT_INSTANCE_SCOPES: &[&str] = &["https://www.googleapis.com/auth/devstorage.read_write"];

/// Project, zone and instance defaults for a [`ComputeClient`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputeConfig {
    pub project_id: String,
    pub zone: String,
    /// API root, e.g. `https://compute.googleapis.com/compute/v1`
    pub endpoint: String,
    pub machine_type: String,
    pub source_image: String,
    pub network: String,
    pub service_account_scopes: Vec<String>,
}

impl ComputeConfig {
    pub fn new(project_id: &str, zone: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            zone: zone.to_string(),
            endpoint: DEFAULT_COMPUTE_ENDPOINT.to_string(),
            machine_type: "n1-standard-1".to_string(),
            source_image: "projects/debian-cloud/global/images/family/debian-12".to_string(),
            network: "global/networks/default".to_string(),
            service_account_scopes: DEFAULT_INSTANCE_SCOPES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }
}

/// Compute Engine client for one project and zone
#[derive(Clone, Debug)]
pub struct ComputeClient {
    gcp: GcpClient,
    config: ComputeConfig,
    poll_policy: PollPolicy,
}

impl ComputeClient {
    pub fn new(config: ComputeConfig, auth: Authenticator) -> Result<Self> {
        let gcp = GcpClient::new(auth, &config.project_id, &config.zone, &config.endpoint)?;
        tracing::debug!(
            "Compute client for {}/{} via {} credentials",
            config.project_id,
            config.zone,
            gcp.auth.kind()
        );

        Ok(Self {
            gcp,
            config,
            poll_policy: PollPolicy::default(),
        })
    }

    pub fn with_poll_policy(mut self, policy: PollPolicy) -> Self {
        self.poll_policy = policy;
        self
    }

    pub fn config(&self) -> &ComputeConfig {
        &self.config
    }
}
