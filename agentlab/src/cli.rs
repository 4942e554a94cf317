//! Command-line grammar.
//!
//! Global flags are only accepted before the first subcommand; everything
//! after it belongs to the subcommand.

use clap::{ArgGroup, Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "agentlab")]
#[command(
    version,
    about = "AgentLab CLI - drive agentlabd sandboxes, jobs and workspaces",
    propagate_version = true
)]
pub struct Cli {
    /// Remote agentlabd endpoint (http[s]://host[:port]); empty uses the local socket
    #[arg(long, value_name = "URL")]
    pub endpoint: Option<String>,

    /// Bearer token for the remote endpoint
    #[arg(long, value_name = "TOKEN")]
    pub token: Option<String>,

    /// Path to the agentlabd Unix socket
    #[arg(long, value_name = "PATH")]
    pub socket: Option<PathBuf>,

    /// Machine-readable JSON output; disables prompts
    #[arg(long)]
    pub json: bool,

    /// Request timeout (e.g. 150ms, 10s, 2m)
    #[arg(long, value_name = "DURATION", value_parser = humantime::parse_duration)]
    pub timeout: Option<Duration>,

    /// Debug logging on stderr
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show daemon health and counts
    Status,

    /// Run and inspect jobs
    #[command(subcommand)]
    Job(JobCommand),

    /// Manage sandboxes
    #[command(subcommand)]
    Sandbox(SandboxCommand),

    /// Manage persistent workspaces
    #[command(subcommand)]
    Workspace(WorkspaceCommand),

    /// Manage sessions (workspace + profile pairs)
    #[command(subcommand)]
    Session(SessionCommand),

    /// List profiles
    #[command(subcommand)]
    Profile(ProfileCommand),

    /// Post and tail scoped messages
    #[command(subcommand)]
    Msg(MsgCommand),

    /// Tail sandbox events
    Logs(LogsArgs),

    /// SSH into a sandbox
    Ssh(SshArgs),

    /// Save credentials for a remote agentlabd
    Connect(ConnectArgs),

    /// Remove saved credentials
    Disconnect,

    /// Check (and optionally repair) this host's agentlab setup
    Init(InitArgs),

    /// Set up a Proxmox host over SSH and save credentials for it
    Bootstrap(BootstrapArgs),
}

// =============================================================================
// Shared argument groups
// =============================================================================

/// Workspace selection shared by `job run` and `session create`.
#[derive(Args, Debug, Clone, Default)]
pub struct WorkspaceSelectArgs {
    /// Existing workspace id or name, or `new:<name>` to create one
    #[arg(long, value_name = "ID|NAME|new:NAME")]
    pub workspace: Option<String>,

    /// Create a workspace with this name
    #[arg(long, value_name = "NAME")]
    pub workspace_create: Option<String>,

    /// Size for a created workspace (<N>G or <N>GB)
    #[arg(long, value_name = "SIZE")]
    pub workspace_size: Option<String>,

    /// Storage for a created workspace
    #[arg(long, value_name = "STORAGE")]
    pub workspace_storage: Option<String>,
}

/// Exactly one message scope.
#[derive(Args, Debug, Clone)]
#[command(group(ArgGroup::new("scope").required(true).args(["job", "workspace", "session"])))]
pub struct ScopeArgs {
    #[arg(long, value_name = "ID")]
    pub job: Option<String>,

    #[arg(long, value_name = "ID")]
    pub workspace: Option<String>,

    #[arg(long, value_name = "ID")]
    pub session: Option<String>,
}

impl ScopeArgs {
    /// `(scope_type, scope_id)` for the wire.
    pub fn scope(&self) -> (&'static str, String) {
        match (&self.job, &self.workspace, &self.session) {
            (Some(id), _, _) => ("job", id.clone()),
            (_, Some(id), _) => ("workspace", id.clone()),
            (_, _, Some(id)) => ("session", id.clone()),
            _ => ("job", String::new()),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct TailArgs {
    /// Number of recent entries to show first
    #[arg(long, value_name = "N")]
    pub tail: Option<u32>,

    /// Page size while following
    #[arg(long, value_name = "L")]
    pub limit: Option<u32>,

    /// Keep polling for new entries
    #[arg(short, long)]
    pub follow: bool,
}

#[derive(Args, Debug, Clone)]
pub struct DoctorArgs {
    /// Output file or directory
    #[arg(long, value_name = "PATH")]
    pub out: Option<String>,
}

// =============================================================================
// job
// =============================================================================

#[derive(Subcommand, Debug)]
pub enum JobCommand {
    /// Submit a job
    Run(JobRunArgs),

    /// Preflight a job without submitting it
    Validate(JobRunArgs),

    /// List jobs
    List {
        #[arg(long, value_name = "N")]
        limit: Option<u32>,
    },

    /// Show one job
    Show {
        id: String,
        /// Include the last N events
        #[arg(long, value_name = "N")]
        events_tail: Option<u32>,
    },

    /// List or download job artifacts
    #[command(subcommand)]
    Artifacts(ArtifactsCommand),

    /// Download a diagnostic bundle for a job
    Doctor {
        id: String,
        #[command(flatten)]
        doctor: DoctorArgs,
    },
}

#[derive(Args, Debug, Clone)]
pub struct JobRunArgs {
    /// Git repository URL
    #[arg(long, value_name = "URL")]
    pub repo: String,

    /// Sandbox profile
    #[arg(long)]
    pub profile: String,

    /// Task to run
    #[arg(long)]
    pub task: String,

    /// Git ref to check out
    #[arg(long = "ref", value_name = "REF")]
    pub git_ref: Option<String>,

    #[arg(long)]
    pub mode: Option<String>,

    /// Time to live in minutes
    #[arg(long, value_name = "MINUTES")]
    pub ttl: Option<u32>,

    /// Keep the sandbox after the job finishes
    #[arg(long)]
    pub keepalive: bool,

    /// Run in the branch's session, creating it when missing
    #[arg(long)]
    pub branch: Option<String>,

    /// Attach a workspace derived from the repo name when none is given
    #[arg(long)]
    pub stateful: bool,

    #[command(flatten)]
    pub workspace: WorkspaceSelectArgs,
}

#[derive(Subcommand, Debug)]
pub enum ArtifactsCommand {
    /// List artifacts of a job
    List { id: String },

    /// Download one artifact (the bundle by default)
    Download {
        id: String,
        /// Exact artifact path
        #[arg(long)]
        path: Option<String>,
        /// Exact artifact name
        #[arg(long)]
        name: Option<String>,
        /// The canonical bundle, else the latest artifact
        #[arg(long)]
        bundle: bool,
        /// The most recent artifact
        #[arg(long)]
        latest: bool,
        /// Output file or directory
        #[arg(long, value_name = "PATH")]
        out: Option<String>,
    },
}

// =============================================================================
// sandbox
// =============================================================================

#[derive(Subcommand, Debug)]
pub enum SandboxCommand {
    /// Create a sandbox from a profile or +modifiers
    New(SandboxNewArgs),

    /// List sandboxes
    List,

    /// Show one sandbox
    Show { vmid: u32 },

    Start { vmid: u32 },

    /// Stop one sandbox, or all with --all
    Stop {
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        vmid: Option<u32>,
        #[arg(long)]
        all: bool,
        #[arg(long)]
        force: bool,
    },

    Pause { vmid: u32 },

    Resume { vmid: u32 },

    /// Revert a sandbox to its template snapshot
    Revert {
        vmid: u32,
        /// Leave the sandbox stopped afterwards
        #[arg(long)]
        no_restart: bool,
        #[arg(long)]
        force: bool,
    },

    /// Destroy a sandbox
    Destroy {
        vmid: u32,
        #[arg(long)]
        force: bool,
    },

    /// Manage sandbox leases
    #[command(subcommand)]
    Lease(LeaseCommand),

    /// Destroy expired sandboxes
    Prune {
        #[arg(long)]
        force: bool,
    },

    /// Publish a sandbox port on the tailnet
    Expose {
        vmid: u32,
        /// Port as :PORT or PORT
        #[arg(value_name = ":PORT")]
        port: String,
        #[arg(long)]
        force: bool,
    },

    /// Remove a published port
    Unexpose { name: String },

    /// List published ports
    Exposures,

    /// Download a diagnostic bundle for a sandbox
    Doctor {
        vmid: u32,
        #[command(flatten)]
        doctor: DoctorArgs,
    },
}

#[derive(Args, Debug, Clone)]
pub struct SandboxNewArgs {
    /// Profile modifiers such as +secure +small
    #[arg(value_name = "+MODIFIER")]
    pub modifiers: Vec<String>,

    #[arg(long, conflicts_with = "modifiers")]
    pub profile: Option<String>,

    #[arg(long)]
    pub name: Option<String>,

    #[arg(long)]
    pub keepalive: bool,

    /// Lease in minutes
    #[arg(long, value_name = "MINUTES")]
    pub ttl: Option<u32>,

    /// Workspace id or name to attach
    #[arg(long)]
    pub workspace: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum LeaseCommand {
    /// Extend a sandbox lease
    Renew {
        vmid: u32,
        /// New lease in minutes
        #[arg(long, value_name = "MINUTES")]
        ttl: u32,
    },
}

// =============================================================================
// workspace
// =============================================================================

#[derive(Subcommand, Debug)]
pub enum WorkspaceCommand {
    Create {
        #[arg(long)]
        name: String,
        /// Size as <N>G or <N>GB
        #[arg(long)]
        size: String,
        #[arg(long)]
        storage: Option<String>,
    },

    List,

    Show { workspace: String },

    /// Attach a workspace to a sandbox
    Attach { workspace: String, vmid: u32 },

    /// Detach a workspace from its sandbox
    Detach { workspace: String },

    /// Move a workspace onto a fresh sandbox of another profile
    Rebind {
        workspace: String,
        #[arg(long)]
        profile: String,
        #[arg(long, value_name = "MINUTES")]
        ttl: Option<u32>,
        /// Keep the previous sandbox
        #[arg(long)]
        keep_old: bool,
    },

    /// Copy a workspace
    Fork {
        workspace: String,
        #[arg(long)]
        name: String,
        #[arg(long, value_name = "SNAPSHOT")]
        from_snapshot: Option<String>,
    },

    /// Check the workspace filesystem
    Fsck {
        workspace: String,
        /// Repair problems (destructive)
        #[arg(long)]
        repair: bool,
        #[arg(long)]
        force: bool,
    },

    /// Check workspace health
    Check { workspace: String },

    /// Workspace snapshots
    #[command(subcommand)]
    Snapshot(SnapshotCommand),
}

#[derive(Subcommand, Debug)]
pub enum SnapshotCommand {
    List {
        workspace: String,
    },
    Create {
        workspace: String,
        name: String,
    },
    /// Roll a workspace back to a snapshot
    Restore {
        workspace: String,
        name: String,
        #[arg(long)]
        force: bool,
    },
}

// =============================================================================
// session
// =============================================================================

#[derive(Subcommand, Debug)]
pub enum SessionCommand {
    Create {
        #[arg(long)]
        name: String,
        #[arg(long)]
        profile: String,
        #[arg(long)]
        branch: Option<String>,
        #[command(flatten)]
        workspace: WorkspaceSelectArgs,
    },

    List,

    Show { session: String },

    /// Start a sandbox for the session
    Resume { session: String },

    /// Stop the session's sandbox
    Stop { session: String },

    /// Copy a session and its workspace
    Fork {
        session: String,
        #[arg(long)]
        name: String,
        #[command(flatten)]
        workspace: WorkspaceSelectArgs,
    },

    /// Download a diagnostic bundle for a session
    Doctor {
        session: String,
        #[command(flatten)]
        doctor: DoctorArgs,
    },
}

#[derive(Subcommand, Debug)]
pub enum ProfileCommand {
    List,
}

// =============================================================================
// msg / logs
// =============================================================================

#[derive(Subcommand, Debug)]
pub enum MsgCommand {
    /// Post a message
    Post {
        #[command(flatten)]
        scope: ScopeArgs,
        #[arg(long)]
        author: Option<String>,
        #[arg(long)]
        kind: Option<String>,
        text: String,
    },

    /// Show recent messages
    Tail {
        #[command(flatten)]
        scope: ScopeArgs,
        #[command(flatten)]
        tail: TailArgs,
    },
}

#[derive(Args, Debug)]
pub struct LogsArgs {
    pub vmid: u32,
    #[command(flatten)]
    pub tail: TailArgs,
}

// =============================================================================
// ssh / connect / init / bootstrap
// =============================================================================

#[derive(Args, Debug)]
pub struct SshArgs {
    pub vmid: u32,

    #[arg(long, default_value = crate::reachability::DEFAULT_SSH_USER)]
    pub user: String,

    #[arg(long, default_value_t = crate::reachability::DEFAULT_SSH_PORT)]
    pub port: u16,

    /// SSH private key (default: AGENTLAB_SSH_IDENTITY)
    #[arg(long, value_name = "PATH")]
    pub identity: Option<String>,

    #[arg(long)]
    pub jump_host: Option<String>,

    #[arg(long)]
    pub jump_user: Option<String>,

    /// Fail instead of starting a stopped sandbox
    #[arg(long)]
    pub no_start: bool,

    /// Keep probing until SSH answers
    #[arg(long)]
    pub wait: bool,

    /// Replace this process with ssh
    #[arg(long)]
    pub exec: bool,

    /// Remote command
    #[arg(last = true)]
    pub command: Vec<String>,
}

#[derive(Args, Debug)]
pub struct ConnectArgs {
    #[arg(long, value_name = "URL")]
    pub endpoint: String,

    #[arg(long)]
    pub token: Option<String>,

    #[arg(long)]
    pub jump_host: Option<String>,

    #[arg(long)]
    pub jump_user: Option<String>,
}

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Repair what the checks find (requires root)
    #[arg(long)]
    pub apply: bool,

    /// Host config path
    #[arg(long, default_value = agentlab_common::config::host::DEFAULT_HOST_CONFIG_PATH)]
    pub config: PathBuf,

    /// agentlab assets checkout (scripts/, skills/)
    #[arg(long)]
    pub assets: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct BootstrapArgs {
    /// [user@]host of the Proxmox node
    #[arg(long)]
    pub host: String,

    #[arg(long)]
    pub ssh_port: Option<u16>,

    #[arg(long, value_name = "PATH")]
    pub identity: Option<PathBuf>,

    /// Pin host keys to this known_hosts file instead of accept-new
    #[arg(long, value_name = "PATH")]
    pub known_hosts: Option<PathBuf>,

    /// agentlab assets checkout (scripts/, skills/, dist/)
    #[arg(long)]
    pub assets: Option<PathBuf>,

    #[arg(long, value_name = "PATH")]
    pub agentlab_bin: Option<PathBuf>,

    #[arg(long, value_name = "PATH")]
    pub agentlabd_bin: Option<PathBuf>,

    #[arg(long, value_name = "URL")]
    pub agentlab_url: Option<String>,

    #[arg(long, value_name = "URL")]
    pub agentlabd_url: Option<String>,

    #[arg(long, default_value_t = crate::bootstrap::DEFAULT_CONTROL_PORT)]
    pub control_port: u16,

    #[arg(long)]
    pub control_token: Option<String>,

    #[arg(long)]
    pub rotate_control_token: bool,

    #[arg(long, conflicts_with = "no_tailscale_serve")]
    pub tailscale_serve: bool,

    #[arg(long)]
    pub no_tailscale_serve: bool,

    /// Join the tailnet and advertise the agent subnet
    #[arg(long)]
    pub tailscale_authkey: Option<String>,

    /// Approve the advertised route through the Tailscale API
    #[arg(long)]
    pub tailscale_admin_key: Option<String>,

    /// Pass --force to the network scripts
    #[arg(long)]
    pub force: bool,

    /// Leave the remote working directory in place
    #[arg(long)]
    pub keep_temp: bool,
}
