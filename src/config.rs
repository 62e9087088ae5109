//! Configuration Management
//!
//! Settings come from a JSON file (by default
//! `{config_dir}/gce-startup/config.json`), overlaid with command-line
//! flags. Project and zone fall back to the gcloud defaults.

use crate::compute::ComputeConfig;
use crate::demo::DemoPlan;
use crate::gcp::auth;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const APP_DIR: &str = "gce-startup";

/// Zone used when neither the config nor gcloud names one
pub const FALLBACK_ZONE: &str = "us-central1-a";

/// User configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub project_id: Option<String>,
    pub zone: Option<String>,
    pub instance_name: Option<String>,
    pub startup_script: Option<PathBuf>,
    /// Image the startup script downloads
    pub image_url: Option<String>,
    /// Text drawn onto the image
    pub image_text: Option<String>,
    /// Cloud Storage bucket receiving `output.png`
    pub gcs_bucket: Option<String>,
    /// OAuth client secrets; enables the installed-app flow
    pub client_secrets: Option<PathBuf>,
    pub credential_store: Option<PathBuf>,
    pub machine_type: Option<String>,
    pub source_image: Option<String>,
    pub network: Option<String>,
    pub api_endpoint: Option<String>,
}

impl Config {
    fn app_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join(APP_DIR))
    }

    /// Default config file path
    pub fn config_path() -> Option<PathBuf> {
        Self::app_dir().map(|p| p.join("config.json"))
    }

    /// Load configuration from the default location
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Self::default(),
        }
    }

    /// Load configuration from `path`; unreadable files yield the defaults
    pub fn load_from(path: &Path) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!("Could not read config {}: {}", path.display(), e);
                return Self::default();
            }
        };

        serde_json::from_str(&content).unwrap_or_else(|e| {
            tracing::warn!("Ignoring malformed config {}: {}", path.display(), e);
            Self::default()
        })
    }

    /// Values set in `other` win over values in `self`
    pub fn overlay(self, other: Config) -> Self {
        Self {
            project_id: other.project_id.or(self.project_id),
            zone: other.zone.or(self.zone),
            instance_name: other.instance_name.or(self.instance_name),
            startup_script: other.startup_script.or(self.startup_script),
            image_url: other.image_url.or(self.image_url),
            image_text: other.image_text.or(self.image_text),
            gcs_bucket: other.gcs_bucket.or(self.gcs_bucket),
            client_secrets: other.client_secrets.or(self.client_secrets),
            credential_store: other.credential_store.or(self.credential_store),
            machine_type: other.machine_type.or(self.machine_type),
            source_image: other.source_image.or(self.source_image),
            network: other.network.or(self.network),
            api_endpoint: other.api_endpoint.or(self.api_endpoint),
        }
    }

    /// Get effective project (config > gcloud default)
    pub fn effective_project(&self) -> Option<String> {
        self.project_id.clone().or_else(auth::get_default_project)
    }

    /// Get effective zone (config > gcloud default > fallback)
    pub fn effective_zone(&self) -> String {
        self.zone
            .clone()
            .or_else(auth::get_default_zone)
            .unwrap_or_else(|| FALLBACK_ZONE.to_string())
    }

    /// Where OAuth credentials are cached between runs
    pub fn credential_store_path(&self) -> PathBuf {
        self.credential_store.clone().unwrap_or_else(|| {
            Self::app_dir()
                .map(|p| p.join("oauth2.json"))
                .unwrap_or_else(|| PathBuf::from("oauth2.json"))
        })
    }

    /// Compute client settings for `project` and `zone`
    pub fn compute_config(&self, project: &str, zone: &str) -> ComputeConfig {
        let mut config = ComputeConfig::new(project, zone);
        if let Some(endpoint) = &self.api_endpoint {
            config = config.with_endpoint(endpoint);
        }
        if let Some(machine_type) = &self.machine_type {
            config.machine_type = machine_type.clone();
        }
        if let Some(image) = &self.source_image {
            config.source_image = image.clone();
        }
        if let Some(network) = &self.network {
            config.network = network.clone();
        }
        config
    }

    /// The demo's instance name, script and metadata
    pub fn demo_plan(&self) -> Result<DemoPlan> {
        let bucket = self
            .gcs_bucket
            .clone()
            .context("No Cloud Storage bucket configured. Set gcs_bucket or pass --bucket")?;
        let image_url = self
            .image_url
            .clone()
            .context("No image URL configured. Set image_url or pass --image-url")?;

        Ok(DemoPlan {
            instance_name: self
                .instance_name
                .clone()
                .unwrap_or_else(|| "startup-script-demo".to_string()),
            startup_script: self
                .startup_script
                .clone()
                .unwrap_or_else(|| PathBuf::from("scripts/startup.sh")),
            image_url,
            image_text: self
                .image_text
                .clone()
                .unwrap_or_else(|| "Hello from Compute Engine".to_string()),
            bucket,
        })
    }
}
