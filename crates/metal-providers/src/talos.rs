//! Immutable-OS installer.
//!
//! [`TalosInstaller`] drives a vendor rescue environment through the full
//! wipe-and-image sequence over a [`RescueShell`] command transport. The
//! vendor-specific parts (triggering rescue mode, the SSH client itself)
//! live in the vendor adapter; everything here is vendor-neutral and
//! testable against a scripted shell.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ProviderError, ProviderResult};

/// Credentials for reaching a node's rescue environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerCreds {
    pub ip: String,
    pub username: String,
    pub ssh_key_base64: String,
    pub ssh_key_password: String,
    pub ssh_key_fingerprint: String,
}

/// Options for an OS install.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallOptions {
    /// OS release, e.g. `1.7.6`. Must match `^1\.\d+\.\d+$`.
    pub version: String,
    /// Target architecture, e.g. `amd64`. Required.
    pub arch: String,
}

impl InstallOptions {
    /// Validate the option constraints.
    pub fn validate(&self) -> ProviderResult<()> {
        let version_pattern =
            Regex::new(r"^1\.\d+\.\d+$").map_err(|e| ProviderError::validation(e.to_string()))?;
        if !version_pattern.is_match(&self.version) {
            return Err(ProviderError::validation(format!(
                "invalid install version: {}",
                self.version
            )));
        }
        if self.arch.is_empty() {
            return Err(ProviderError::validation("install arch is required"));
        }
        Ok(())
    }
}

/// The immutable-OS installer for one vendor.
#[async_trait]
pub trait TalosProvider: Send + Sync {
    /// Put the node into the rescue environment, wipe it, and write the OS
    /// image. The node reboots into maintenance mode on success.
    async fn install(&self, creds: &ServerCreds, opts: &InstallOptions) -> ProviderResult<()>;
}

/// Command transport into a rescue environment.
#[async_trait]
pub trait RescueShell: Send + Sync {
    /// Run a command, returning its stdout. Non-zero exits are errors.
    async fn run(&self, command: &str) -> ProviderResult<String>;
}

/// Default source of OS release images.
const DEFAULT_RELEASE_BASE: &str = "https://github.com/siderolabs/talos/releases/download";

/// Interval between TCP reachability probes.
const SSH_PROBE_INTERVAL: Duration = Duration::from_secs(5);

/// Vendor-neutral wipe-and-image sequence.
pub struct TalosInstaller {
    client: reqwest::Client,
    release_base: String,
    ssh_port: u16,
    max_ssh_probes: u32,
}

impl TalosInstaller {
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            release_base: DEFAULT_RELEASE_BASE.to_owned(),
            ssh_port: 22,
            max_ssh_probes: 60,
        }
    }

    /// Override the release download base (tests point this at a local
    /// server).
    #[must_use]
    pub fn with_release_base(mut self, base: impl Into<String>) -> Self {
        self.release_base = base.into();
        self
    }

    /// Override the SSH port probed for reachability.
    #[must_use]
    pub fn with_ssh_port(mut self, port: u16) -> Self {
        self.ssh_port = port;
        self
    }

    /// The raw image URL for a release.
    #[must_use]
    pub fn release_url(&self, opts: &InstallOptions) -> String {
        format!(
            "{}/v{}/metal-{}.raw.xz",
            self.release_base, opts.version, opts.arch
        )
    }

    /// Run the full install sequence over an open rescue shell.
    pub async fn install_over(
        &self,
        shell: &dyn RescueShell,
        creds: &ServerCreds,
        opts: &InstallOptions,
    ) -> ProviderResult<()> {
        opts.validate()?;

        self.wait_for_ssh(&creds.ip).await?;

        info!(ip = %creds.ip, version = %opts.version, "starting OS install");

        // Stop any software RAID left over from the previous tenant. The
        // command fails when no arrays exist; that is fine.
        let _ = shell.run("mdadm --stop --scan").await;

        let disks = self.discover_disks(shell).await?;
        let target = disks
            .first()
            .ok_or_else(|| ProviderError::Rejected("no disks found on node".to_owned()))?
            .clone();

        for disk in &disks {
            self.wipe_disk(shell, disk).await?;
        }

        let url = self.release_url(opts);
        self.verify_release(&url).await?;

        info!(ip = %creds.ip, disk = %target, url = %url, "writing image");
        shell
            .run(&format!(
                "wget -qO- '{url}' | xz -d | dd of=/dev/{target} bs=4M"
            ))
            .await?;
        shell.run("sync").await?;
        shell.run("reboot").await?;

        Ok(())
    }

    /// Poll TCP reachability of the SSH port until connectable.
    async fn wait_for_ssh(&self, ip: &str) -> ProviderResult<()> {
        let addr = format!("{ip}:{}", self.ssh_port);
        for attempt in 0..self.max_ssh_probes {
            match tokio::net::TcpStream::connect(&addr).await {
                Ok(_) => {
                    debug!(addr = %addr, attempt, "ssh port reachable");
                    return Ok(());
                }
                Err(e) => {
                    debug!(addr = %addr, attempt, error = %e, "ssh port not yet reachable");
                    tokio::time::sleep(SSH_PROBE_INTERVAL).await;
                }
            }
        }
        Err(ProviderError::upstream(format!(
            "ssh port never became reachable at {addr}"
        )))
    }

    /// Enumerate physical disks, lexicographically ordered.
    async fn discover_disks(&self, shell: &dyn RescueShell) -> ProviderResult<Vec<String>> {
        let output = shell
            .run("lsblk -dno NAME,TYPE | awk '$2==\"disk\" {print $1}'")
            .await?;
        let mut disks: Vec<String> = output
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(ToOwned::to_owned)
            .collect();
        disks.sort();
        Ok(disks)
    }

    /// Wipe one disk: fresh GPT label, one full partition, a filesystem on
    /// it, then delete the table and wipe every signature. Writing real
    /// structures first guarantees nothing from the previous tenant
    /// survives in a recognizable form.
    async fn wipe_disk(&self, shell: &dyn RescueShell, disk: &str) -> ProviderResult<()> {
        debug!(disk = %disk, "wiping disk");
        shell
            .run(&format!("parted -s /dev/{disk} mklabel gpt"))
            .await?;
        shell
            .run(&format!("parted -s /dev/{disk} mkpart primary 0% 100%"))
            .await?;
        shell.run(&format!("mkfs.ext4 -F /dev/{disk}1")).await?;
        shell.run(&format!("sfdisk --delete /dev/{disk}")).await?;
        shell.run(&format!("wipefs -a /dev/{disk}")).await?;
        Ok(())
    }

    /// HEAD the release URL so a typo'd version fails before any disk is
    /// written over.
    async fn verify_release(&self, url: &str) -> ProviderResult<()> {
        let response = self.client.head(url).send().await?;
        if !response.status().is_success() {
            return Err(ProviderError::Rejected(format!(
                "release not available: {url} ({})",
                response.status()
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for TalosInstaller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TalosInstaller")
            .field("release_base", &self.release_base)
            .finish_non_exhaustive()
    }
}

/// Scripted shell for tests: records commands and replays canned outputs.
#[derive(Debug, Default)]
pub struct MockRescueShell {
    commands: Mutex<Vec<String>>,
    outputs: Mutex<std::collections::HashMap<String, String>>,
}

impl MockRescueShell {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the output of a command containing `needle`.
    pub fn script_output(&self, needle: impl Into<String>, output: impl Into<String>) {
        self.outputs
            .lock()
            .expect("lock poisoned")
            .insert(needle.into(), output.into());
    }

    /// Commands run so far, in order.
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().expect("lock poisoned").clone()
    }
}

#[async_trait]
impl RescueShell for MockRescueShell {
    async fn run(&self, command: &str) -> ProviderResult<String> {
        self.commands
            .lock()
            .expect("lock poisoned")
            .push(command.to_owned());
        let outputs = self.outputs.lock().expect("lock poisoned");
        Ok(outputs
            .iter()
            .find(|(needle, _)| command.contains(needle.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_pattern_enforced() {
        let good = InstallOptions {
            version: "1.7.6".to_owned(),
            arch: "amd64".to_owned(),
        };
        assert!(good.validate().is_ok());

        let major_bump = InstallOptions {
            version: "2.0.0".to_owned(),
            arch: "amd64".to_owned(),
        };
        assert!(matches!(
            major_bump.validate(),
            Err(ProviderError::Validation(_))
        ));

        let garbage = InstallOptions {
            version: "1.7".to_owned(),
            arch: "amd64".to_owned(),
        };
        assert!(garbage.validate().is_err());
    }

    #[test]
    fn arch_is_required() {
        let opts = InstallOptions {
            version: "1.7.6".to_owned(),
            arch: String::new(),
        };
        assert!(opts.validate().is_err());
    }

    #[test]
    fn release_url_shape() {
        let installer = TalosInstaller::new(reqwest::Client::new());
        let url = installer.release_url(&InstallOptions {
            version: "1.7.6".to_owned(),
            arch: "amd64".to_owned(),
        });
        assert_eq!(
            url,
            "https://github.com/siderolabs/talos/releases/download/v1.7.6/metal-amd64.raw.xz"
        );
    }

    #[tokio::test]
    async fn disks_are_sorted_lexicographically() {
        let shell = MockRescueShell::new();
        shell.script_output("lsblk", "sdb\nsda\nnvme0n1\n");

        let installer = TalosInstaller::new(reqwest::Client::new());
        let disks = installer.discover_disks(&shell).await.expect("disks");
        assert_eq!(disks, vec!["nvme0n1", "sda", "sdb"]);
    }

    #[tokio::test]
    async fn wipe_runs_full_sequence() {
        let shell = MockRescueShell::new();
        let installer = TalosInstaller::new(reqwest::Client::new());
        installer.wipe_disk(&shell, "sda").await.expect("wipe");

        let commands = shell.commands();
        assert_eq!(
            commands,
            vec![
                "parted -s /dev/sda mklabel gpt",
                "parted -s /dev/sda mkpart primary 0% 100%",
                "mkfs.ext4 -F /dev/sda1",
                "sfdisk --delete /dev/sda",
                "wipefs -a /dev/sda",
            ]
        );
    }

    #[tokio::test]
    async fn install_writes_first_disk_and_reboots() {
        // Local listener stands in for the node's SSH port.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let port = listener.local_addr().expect("addr").port();
        tokio::spawn(async move {
            loop {
                let _ = listener.accept().await;
            }
        });

        let head_server = httpmock::MockServer::start_async().await;
        let head = head_server
            .mock_async(|when, then| {
                when.method(httpmock::Method::HEAD)
                    .path("/v1.7.6/metal-amd64.raw.xz");
                then.status(200);
            })
            .await;

        let shell = MockRescueShell::new();
        shell.script_output("lsblk", "sdb\nsda\n");

        let installer = TalosInstaller::new(reqwest::Client::new())
            .with_release_base(head_server.base_url())
            .with_ssh_port(port);

        let creds = ServerCreds {
            ip: "127.0.0.1".to_owned(),
            username: "root".to_owned(),
            ssh_key_base64: String::new(),
            ssh_key_password: String::new(),
            ssh_key_fingerprint: String::new(),
        };
        let opts = InstallOptions {
            version: "1.7.6".to_owned(),
            arch: "amd64".to_owned(),
        };

        installer
            .install_over(&shell, &creds, &opts)
            .await
            .expect("install");

        head.assert_async().await;
        let commands = shell.commands();
        let dd = commands
            .iter()
            .find(|c| c.contains("dd of="))
            .expect("dd command");
        assert!(dd.contains("dd of=/dev/sda"), "image goes to first disk");
        assert!(dd.contains("xz -d"));
        assert_eq!(commands.last().map(String::as_str), Some("reboot"));
        assert!(commands.iter().any(|c| c == "sync"));
    }
}
