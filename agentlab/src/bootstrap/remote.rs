//! SSH access to the host being bootstrapped.

use agentlab_common::{CliError, mask_sensitive_command};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;

use crate::context::RequestContext;
use crate::reachability::shell_quote;
use crate::subprocess::{CommandOutput, run_command, run_command_with_input};

const CONNECT_TIMEOUT_SECS: u32 = 15;

/// A shell on the remote host.
#[allow(async_fn_in_trait)]
pub trait Remote {
    /// `[user@]host` as given by the operator.
    fn destination(&self) -> &str;

    /// Run `script` through the remote login shell.
    async fn run(
        &self,
        ctx: &RequestContext,
        script: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, CliError>;

    /// Copy a local file to `remote_path` by piping it into `cat`.
    async fn upload(
        &self,
        ctx: &RequestContext,
        local: &Path,
        remote_path: &str,
        timeout: Duration,
    ) -> Result<(), CliError>;
}

/// Host key policy for bootstrap connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostKeyPolicy {
    /// Trust on first use.
    AcceptNew,
    /// Only keys already present in this known_hosts file.
    Pinned(PathBuf),
}

#[derive(Debug, Clone)]
pub struct SshRemote {
    pub destination: String,
    pub port: Option<u16>,
    pub identity: Option<PathBuf>,
    pub host_keys: HostKeyPolicy,
}

impl SshRemote {
    /// Options and destination, without the remote command.
    pub fn ssh_args(&self) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={CONNECT_TIMEOUT_SECS}"),
        ];
        match &self.host_keys {
            HostKeyPolicy::AcceptNew => {
                args.push("-o".into());
                args.push("StrictHostKeyChecking=accept-new".into());
            }
            HostKeyPolicy::Pinned(file) => {
                args.push("-o".into());
                args.push(format!("UserKnownHostsFile={}", file.display()));
                args.push("-o".into());
                args.push("StrictHostKeyChecking=yes".into());
            }
        }
        if let Some(port) = self.port {
            args.push("-p".into());
            args.push(port.to_string());
        }
        if let Some(identity) = &self.identity {
            args.push("-i".into());
            args.push(identity.display().to_string());
        }
        args.push(self.destination.clone());
        args
    }

    fn command(&self, remote: &str) -> (Command, String) {
        let mut cmd = Command::new("ssh");
        let args = self.ssh_args();
        cmd.args(&args).arg(remote);
        let display = mask_sensitive_command(&format!("ssh {} {}", args.join(" "), remote));
        (cmd, display)
    }
}

impl Remote for SshRemote {
    fn destination(&self) -> &str {
        &self.destination
    }

    async fn run(
        &self,
        ctx: &RequestContext,
        script: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, CliError> {
        let (cmd, display) = self.command(script);
        run_command(ctx, cmd, &display, timeout).await
    }

    async fn upload(
        &self,
        ctx: &RequestContext,
        local: &Path,
        remote_path: &str,
        timeout: Duration,
    ) -> Result<(), CliError> {
        let file = std::fs::File::open(local).map_err(|e| {
            CliError::operation(format!("open {}: {e}", local.display()))
        })?;
        let (cmd, display) = self.command(&format!("cat > {}", shell_quote(remote_path)));
        let out = run_command_with_input(ctx, cmd, file, &display, timeout).await?;
        if out.success {
            Ok(())
        } else {
            Err(out.failure("upload"))
        }
    }
}

/// Split `[user@]host` into its parts.
pub fn split_destination(destination: &str) -> (Option<&str>, &str) {
    match destination.rsplit_once('@') {
        Some((user, host)) if !user.is_empty() => (Some(user), host),
        Some((_, host)) => (None, host),
        None => (None, destination),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accept_new_by_default() {
        let remote = SshRemote {
            destination: "root@pve".into(),
            port: Some(2222),
            identity: Some(PathBuf::from("/home/me/.ssh/id_ed25519")),
            host_keys: HostKeyPolicy::AcceptNew,
        };
        assert_eq!(
            remote.ssh_args().join(" "),
            "-o BatchMode=yes -o ConnectTimeout=15 -o StrictHostKeyChecking=accept-new \
             -p 2222 -i /home/me/.ssh/id_ed25519 root@pve"
        );
    }

    #[test]
    fn test_pinned_known_hosts() {
        let remote = SshRemote {
            destination: "pve".into(),
            port: None,
            identity: None,
            host_keys: HostKeyPolicy::Pinned(PathBuf::from("/etc/agentlab/known_hosts")),
        };
        let args = remote.ssh_args().join(" ");
        assert!(args.contains("UserKnownHostsFile=/etc/agentlab/known_hosts"));
        assert!(args.contains("StrictHostKeyChecking=yes"));
        assert!(!args.contains("accept-new"));
    }

    #[test]
    fn test_command_display_masks_tokens() {
        let remote = SshRemote {
            destination: "root@pve".into(),
            port: None,
            identity: None,
            host_keys: HostKeyPolicy::AcceptNew,
        };
        let (_, display) = remote.command("scripts/install_host.sh --control-token s3cret");
        assert!(!display.contains("s3cret"));
    }

    #[test]
    fn test_split_destination() {
        assert_eq!(split_destination("root@pve"), (Some("root"), "pve"));
        assert_eq!(split_destination("pve.tailnet.ts.net"), (None, "pve.tailnet.ts.net"));
        assert_eq!(split_destination("@pve"), (None, "pve"));
    }
}
