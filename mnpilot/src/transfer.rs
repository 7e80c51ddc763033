//! Artifact upload and result retrieval.
//!
//! Before a run the driver script and topology document are copied to the
//! remote host; after it, the newest timestamped result directory under a
//! known remote base is copied back. Both use one-shot commands on the
//! transport, never the interactive shell.

use std::path::{Component, Path, PathBuf};

use log::{debug, info};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TransferError};
use crate::transport::{ExecOutput, Transport, shell_quote};

/// Remote directory the simulator writes its results under.
pub const DEFAULT_REMOTE_RESULTS: &str = "/tmp/test_results";

/// Local directory results are copied into.
pub const DEFAULT_LOCAL_RESULTS: &str = "./mn_result_raw";

/// What to upload and how to invoke it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationPlan {
    /// Local path of the simulation driver script.
    pub driver_script: PathBuf,

    /// Local path of the topology document.
    pub topology: PathBuf,

    /// Where the script lands on the remote host.
    #[serde(default = "default_remote_script")]
    pub remote_script_path: String,

    /// Where the topology lands on the remote host.
    #[serde(default = "default_remote_topology")]
    pub remote_topology_path: String,
}

fn default_remote_script() -> String {
    "/tmp/mininet-script.py".to_string()
}

fn default_remote_topology() -> String {
    "/tmp/input-topo.json".to_string()
}

impl SimulationPlan {
    /// Plan with the default remote locations.
    pub fn new(driver_script: impl Into<PathBuf>, topology: impl Into<PathBuf>) -> Self {
        Self {
            driver_script: driver_script.into(),
            topology: topology.into(),
            remote_script_path: default_remote_script(),
            remote_topology_path: default_remote_topology(),
        }
    }

    /// The privileged command that runs the uploaded script.
    pub fn command(&self) -> String {
        format!(
            "sudo python3 {} {}",
            shell_quote(&self.remote_script_path),
            shell_quote(&self.remote_topology_path)
        )
    }

    fn files(&self) -> [(&Path, &str); 2] {
        [
            (self.driver_script.as_path(), self.remote_script_path.as_str()),
            (self.topology.as_path(), self.remote_topology_path.as_str()),
        ]
    }
}

/// Copy the plan's local files to the remote host.
///
/// Every local file is checked before anything is sent.
pub async fn upload_artifacts<T: Transport>(
    transport: &mut T,
    plan: &SimulationPlan,
) -> Result<()> {
    for (local, _) in plan.files() {
        if !tokio::fs::try_exists(local).await.unwrap_or(false) {
            return Err(TransferError::MissingLocalFile(local.display().to_string()).into());
        }
    }

    for (local, remote) in plan.files() {
        let contents = tokio::fs::read(local)
            .await
            .map_err(|source| TransferError::Local {
                path: local.display().to_string(),
                source,
            })?;
        debug!("uploading {} ({} bytes) to {}", local.display(), contents.len(), remote);
        transport.write_file(&contents, remote).await?;
        info!("uploaded {} to {}", local.display(), remote);
    }

    Ok(())
}

/// Copy the newest `YYYYMMDD_HHMMSS` directory under `remote_base` into
/// `local_base/<timestamp>/`.
///
/// Returns the local directory, or `None` if the remote has no results.
pub async fn retrieve_results<T: Transport>(
    transport: &mut T,
    remote_base: &str,
    local_base: &Path,
) -> Result<Option<PathBuf>> {
    let listing = transport
        .exec(&format!("ls -1 {}", shell_quote(remote_base)))
        .await?;
    if !listing.success() {
        info!("no results directory at {}", remote_base);
        return Ok(None);
    }

    let Some(timestamp) = latest_timestamp(&listing.stdout_str()) else {
        info!("no timestamped results under {}", remote_base);
        return Ok(None);
    };

    let remote_dir = format!("{}/{}", remote_base.trim_end_matches('/'), timestamp);
    let local_dir = local_base.join(&timestamp);
    info!("copying {} to {}", remote_dir, local_dir.display());

    let find = format!("find {} -type f", shell_quote(&remote_dir));
    let files = checked(transport.exec(&find).await?, &find)?;

    create_dir(&local_dir).await?;
    for remote_path in String::from_utf8_lossy(&files.stdout).lines() {
        let Some(relative) = relative_path(&remote_dir, remote_path) else {
            debug!("skipping {}", remote_path);
            continue;
        };

        let cat = format!("cat {}", shell_quote(remote_path));
        let contents = checked(transport.exec(&cat).await?, &cat)?;

        let local_path = local_dir.join(relative);
        if let Some(parent) = local_path.parent() {
            create_dir(parent).await?;
        }
        tokio::fs::write(&local_path, &contents.stdout)
            .await
            .map_err(|source| TransferError::Local {
                path: local_path.display().to_string(),
                source,
            })?;
        debug!("copied {}", relative.display());
    }

    Ok(Some(local_dir))
}

/// Newest timestamped entry in an `ls -1` listing.
fn latest_timestamp(listing: &str) -> Option<String> {
    let pattern = Regex::new(r"^\d{8}_\d{6}$").ok()?;
    listing
        .lines()
        .map(str::trim)
        .filter(|name| pattern.is_match(name))
        .max()
        .map(str::to_string)
}

/// Path of `remote_path` below `remote_dir`, if it stays inside it.
fn relative_path<'a>(remote_dir: &str, remote_path: &'a str) -> Option<&'a Path> {
    let relative = Path::new(remote_path.trim()).strip_prefix(remote_dir).ok()?;
    let normal = relative
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    (normal && !relative.as_os_str().is_empty()).then_some(relative)
}

fn checked(output: ExecOutput, command: &str) -> Result<ExecOutput> {
    if output.success() {
        return Ok(output);
    }
    Err(TransferError::RemoteCommand {
        command: command.to_string(),
        status: output.exit_status.unwrap_or(u32::MAX),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    }
    .into())
}

async fn create_dir(path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|source| {
            TransferError::Local {
                path: path.display().to_string(),
                source,
            }
            .into()
        })
}
