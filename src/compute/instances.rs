//! Instance lifecycle: start, list, stop

use super::error::ComputeError;
use super::types::{
    AccessConfig, AttachedDisk, InitializeParams, Instance, InstanceList, InstanceRequest,
    Metadata, MetadataItem, NetworkInterface, Operation, ServiceAccount,
};
use super::{ComputeClient, ComputeConfig};
use anyhow::Context;
use serde_json::Value;
use std::path::Path;

/// Metadata key the guest agent runs at boot
pub const STARTUP_SCRIPT_KEY: &str = "startup-script";

/// Check an instance name against Compute Engine's naming rule
/// `[a-z]([-a-z0-9]{0,61}[a-z0-9])?`
pub fn validate_instance_name(name: &str) -> Result<(), ComputeError> {
    let valid = !name.is_empty()
        && name.len() <= 63
        && name.starts_with(|c: char| c.is_ascii_lowercase())
        && !name.ends_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');

    if valid {
        Ok(())
    } else {
        Err(ComputeError::InvalidRequest(format!(
            "'{}' is not a valid instance name",
            name
        )))
    }
}

/// Build the insert body: configured defaults, caller metadata, then the
/// startup script as the final item
pub fn build_instance_request(
    config: &ComputeConfig,
    name: &str,
    startup_script: &str,
    metadata: &[MetadataItem],
) -> InstanceRequest {
    let mut items = metadata.to_vec();
    items.push(MetadataItem::new(STARTUP_SCRIPT_KEY, startup_script));

    InstanceRequest {
        name: name.to_string(),
        machine_type: format!("zones/{}/machineTypes/{}", config.zone, config.machine_type),
        disks: vec![AttachedDisk {
            boot: true,
            auto_delete: true,
            disk_type: "PERSISTENT".to_string(),
            initialize_params: InitializeParams {
                source_image: config.source_image.clone(),
            },
        }],
        network_interfaces: vec![NetworkInterface {
            network: config.network.clone(),
            access_configs: vec![AccessConfig {
                kind: "ONE_TO_ONE_NAT".to_string(),
                name: "External NAT".to_string(),
            }],
        }],
        service_accounts: vec![ServiceAccount {
            email: "default".to_string(),
            scopes: config.service_account_scopes.clone(),
        }],
        metadata: Metadata { items },
    }
}

impl ComputeClient {
    /// Create an instance that runs `startup_script` at boot and wait for the
    /// insert operation to finish
    pub async fn start_instance(
        &self,
        name: &str,
        startup_script: &Path,
        metadata: &[MetadataItem],
    ) -> Result<Operation, ComputeError> {
        validate_instance_name(name)?;
        if metadata.iter().any(|item| item.key == STARTUP_SCRIPT_KEY) {
            return Err(ComputeError::InvalidRequest(format!(
                "metadata key '{}' is reserved for the startup script",
                STARTUP_SCRIPT_KEY
            )));
        }

        let script = tokio::fs::read_to_string(startup_script)
            .await
            .map_err(|source| ComputeError::StartupScript {
                path: startup_script.to_path_buf(),
                source,
            })?;

        let request = build_instance_request(&self.config, name, &script, metadata);
        let body = serde_json::to_value(&request).context("Failed to encode instance request")?;

        tracing::info!(
            "Inserting instance {} in {}/{}",
            name,
            self.config.project_id,
            self.config.zone
        );
        let url = self.gcp.compute_zonal_url("instances");
        let submitted = submitted_operation(
            &format!("insert instance {}", name),
            self.gcp.post(&url, Some(&body)).await,
        )?;

        self.wait_for_operation(submitted).await
    }

    /// List the zone's instances in server order, following every page
    pub async fn list_instances(&self) -> Result<Vec<Instance>, ComputeError> {
        let base_url = self.gcp.compute_zonal_url("instances");
        let mut instances = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let url = match &page_token {
                Some(token) => format!("{}?pageToken={}", base_url, urlencoding::encode(token)),
                None => base_url.clone(),
            };

            let page: InstanceList = serde_json::from_value(self.gcp.get(&url).await?)
                .context("Malformed instance list")?;
            instances.extend(page.items);

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        tracing::debug!("Listed {} instances", instances.len());
        Ok(instances)
    }

    /// Delete an instance and wait for the delete operation to finish
    pub async fn stop_instance(&self, name: &str) -> Result<Operation, ComputeError> {
        validate_instance_name(name)?;

        tracing::info!("Deleting instance {}", name);
        let url = self.gcp.compute_zonal_url(&format!("instances/{}", name));
        let submitted = submitted_operation(
            &format!("delete instance {}", name),
            self.gcp.delete(&url).await,
        )?;

        self.wait_for_operation(submitted).await
    }
}

/// Decode the Operation a mutating call responded with
fn submitted_operation(
    call: &str,
    response: anyhow::Result<Value>,
) -> Result<Operation, ComputeError> {
    let value = response.map_err(|err| ComputeError::from_submit(call, err))?;
    let operation: Operation = serde_json::from_value(value)
        .with_context(|| format!("Expected an operation in response to {}", call))?;
    tracing::debug!("{} submitted as {}", call, operation.name);
    Ok(operation)
}
