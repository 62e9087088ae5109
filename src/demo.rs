//! Demo driver
//!
//! Start an instance with the startup script, list instances, wait for the
//! user, then delete the instance. Operation failures are reported and end
//! the run; nothing is retried or rolled back.

use crate::compute::{ApiOperationError, ComputeClient, ComputeError, MetadataItem};
use anyhow::{Context, Result};
use std::io::{BufRead, Write};
use std::path::PathBuf;

/// What the demo boots and where its output goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemoPlan {
    pub instance_name: String,
    pub startup_script: PathBuf,
    pub image_url: String,
    pub image_text: String,
    pub bucket: String,
}

impl DemoPlan {
    /// Metadata read by the startup script on the instance
    pub fn metadata(&self) -> Vec<MetadataItem> {
        vec![
            MetadataItem::new("url", &self.image_url),
            MetadataItem::new("text", &self.image_text),
            MetadataItem::new("cs-bucket", &self.bucket),
        ]
    }

    /// Public URL of the image the startup script uploads
    pub fn output_url(&self) -> String {
        format!("http://storage.googleapis.com/{}/output.png", self.bucket)
    }
}

/// Pause until the user is ready to continue
pub trait Prompt {
    fn wait_for_enter(&mut self, message: &str) -> Result<()>;
}

/// Reads a line from stdin
pub struct StdinPrompt;

impl Prompt for StdinPrompt {
    fn wait_for_enter(&mut self, message: &str) -> Result<()> {
        let mut stdout = std::io::stdout();
        write!(stdout, "{} ", message)?;
        stdout.flush()?;

        let mut line = String::new();
        std::io::stdin()
            .lock()
            .read_line(&mut line)
            .context("Failed to read from stdin")?;
        Ok(())
    }
}

/// Continues immediately
pub struct AutoConfirm;

impl Prompt for AutoConfirm {
    fn wait_for_enter(&mut self, message: &str) -> Result<()> {
        tracing::debug!("Auto-confirming prompt: {}", message);
        Ok(())
    }
}

/// How a demo run ended
#[derive(Debug)]
pub enum DemoOutcome {
    Completed,
    StartFailed(ApiOperationError),
    StopFailed(ApiOperationError),
}

impl DemoOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// Run the demo against `client`, writing progress to `out`
///
/// Only [`ApiOperationError`]s are caught here; every other failure is
/// returned to the caller.
pub async fn run<P, W>(
    client: &ComputeClient,
    plan: &DemoPlan,
    prompt: &mut P,
    out: &mut W,
) -> Result<DemoOutcome>
where
    P: Prompt + ?Sized,
    W: Write + ?Sized,
{
    writeln!(out, "Starting up an instance")?;
    match client
        .start_instance(&plan.instance_name, &plan.startup_script, &plan.metadata())
        .await
    {
        Ok(_) => {}
        Err(ComputeError::Operation(err)) => {
            tracing::error!("Instance {} failed to start: {}", plan.instance_name, err);
            writeln!(out, "Error starting instance")?;
            writeln!(out, "{}", err)?;
            return Ok(DemoOutcome::StartFailed(err));
        }
        Err(err) => return Err(err.into()),
    }

    writeln!(out, "Here are your running instances:")?;
    for instance in client.list_instances().await? {
        writeln!(out, "{}", instance.name)?;
    }

    writeln!(out, "Visit {}", plan.output_url())?;
    writeln!(out, "It might take a minute for the output.png file to show up.")?;
    out.flush()?;
    prompt.wait_for_enter("Hit Enter when done to shutdown instance")?;

    writeln!(out, "Shutting down the instance")?;
    match client.stop_instance(&plan.instance_name).await {
        Ok(_) => Ok(DemoOutcome::Completed),
        Err(ComputeError::Operation(err)) => {
            tracing::error!("Instance {} failed to stop: {}", plan.instance_name, err);
            writeln!(out, "Error stopping instance")?;
            writeln!(out, "{}", err)?;
            Ok(DemoOutcome::StopFailed(err))
        }
        Err(err) => Err(err.into()),
    }
}
