//! GCP Client
//!
//! Combines an [`Authenticator`] with the HTTP wrapper and knows how to build
//! Compute Engine URLs for one project and zone.

use super::auth::Authenticator;
use super::http::GcpHttpClient;
use anyhow::Result;
use serde_json::Value;

/// Public Compute Engine v1 endpoint
pub const DEFAULT_COMPUTE_ENDPOINT: &str = "https://compute.googleapis.com/compute/v1";

/// Main GCP client
#[derive(Clone, Debug)]
pub struct GcpClient {
    pub auth: Authenticator,
    pub http: GcpHttpClient,
    pub project_id: String,
    pub zone: String,
    endpoint: String,
}

impl GcpClient {
    /// Create a new GCP client against `endpoint`
    pub fn new(auth: Authenticator, project_id: &str, zone: &str, endpoint: &str) -> Result<Self> {
        Ok(Self {
            auth,
            http: GcpHttpClient::new()?,
            project_id: project_id.to_string(),
            zone: zone.to_string(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    /// Make a GET request to a GCP API
    pub async fn get(&self, url: &str) -> Result<Value> {
        let token = self.auth.token().await?;
        self.http.get(url, &token).await
    }

    /// Make a POST request to a GCP API
    pub async fn post(&self, url: &str, body: Option<&Value>) -> Result<Value> {
        let token = self.auth.token().await?;
        self.http.post(url, &token, body).await
    }

    /// Make a DELETE request to a GCP API
    pub async fn delete(&self, url: &str) -> Result<Value> {
        let token = self.auth.token().await?;
        self.http.delete(url, &token).await
    }

    /// Build Compute Engine API URL
    pub fn compute_url(&self, path: &str) -> String {
        self.compute_project_url(&self.project_id, path)
    }

    /// Build Compute Engine API URL for an explicit project
    pub fn compute_project_url(&self, project_id: &str, path: &str) -> String {
        format!("{}/projects/{}/{}", self.endpoint, project_id, path)
    }

    /// Build zonal Compute Engine API URL
    pub fn compute_zonal_url(&self, resource: &str) -> String {
        self.compute_url(&format!("zones/{}/{}", self.zone, resource))
    }
}

/// Extract short name from GCP resource URL
/// e.g., "https://www.googleapis.com/compute/v1/projects/my-project/zones/us-central1-a" -> "us-central1-a"
pub fn extract_short_name(url: &str) -> &str {
    url.rsplit('/').next().unwrap_or(url)
}
