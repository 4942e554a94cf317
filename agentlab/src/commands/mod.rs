//! Command handlers.
//!
//! Each handler parses nothing itself: clap has already validated the
//! grammar. Handlers resolve credentials, call the daemon, and render either
//! text or a single JSON document depending on `--json`.

pub mod bootstrap;
pub mod connect;
pub mod helpers;
pub mod init;
pub mod job;
pub mod logs;
pub mod msg;
pub mod profile;
pub mod sandbox;
pub mod session;
pub mod ssh;
pub mod status;
pub mod workspace;

use agentlab_common::{
    ClientConfig, CliError, CredentialFlags, EnvParser, ResolvedCredentials, resolve_credentials,
};
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

use crate::cli::Commands;
use crate::confirm::{Prompter, confirm};
use crate::context::RequestContext;
use crate::output::Output;
use crate::transport::{Client, DEFAULT_REQUEST_TIMEOUT};

/// Exit with `code` after the handler already rendered its own output.
#[derive(Debug, thiserror::Error)]
#[error("exit status {0}")]
pub struct SilentExit(pub i32);

/// Everything a handler needs besides its own arguments.
pub struct AppContext {
    pub out: Output,
    /// Root context: cancelled on Ctrl-C, no deadline of its own.
    pub ctx: RequestContext,
    /// `--timeout`, when given.
    pub timeout: Option<Duration>,
    pub flags: CredentialFlags,
    pub prompter: Box<dyn Prompter>,
}

impl AppContext {
    pub fn is_json(&self) -> bool {
        self.out.is_json()
    }

    pub fn request_timeout(&self) -> Duration {
        self.timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT)
    }

    /// Context bounded by `--timeout` if given, else by `default`.
    pub fn budget(&self, default: Duration) -> RequestContext {
        self.ctx.with_timeout(self.timeout.unwrap_or(default))
    }

    pub fn config_path(&self) -> Result<PathBuf> {
        let env = EnvParser::from_process();
        Ok(ClientConfig::default_path(&env)?)
    }

    pub fn load_config(&self) -> Result<Option<ClientConfig>> {
        let path = self.config_path()?;
        Ok(ClientConfig::load(&path)?)
    }

    /// Flags over environment over credentials file.
    pub fn credentials(&self) -> Result<ResolvedCredentials> {
        self.credentials_with(&self.flags)
    }

    /// Like [`AppContext::credentials`] with command-specific flags.
    pub fn credentials_with(&self, flags: &CredentialFlags) -> Result<ResolvedCredentials> {
        let env = EnvParser::from_process();
        let file = self.load_config()?;
        let creds = resolve_credentials(flags, &env, file.as_ref())?;
        debug!(
            "endpoint {:?} from {}",
            creds.endpoint.value, creds.endpoint.source
        );
        Ok(creds)
    }

    pub fn api(&self) -> Result<Client> {
        let creds = self.credentials()?;
        Client::new(&creds, self.request_timeout()).context("create agentlabd client")
    }

    /// Destructive-operation gate.
    pub fn confirm(&self, action: &str, force: bool) -> Result<(), CliError> {
        confirm(action, force, self.is_json(), self.prompter.as_ref())
    }
}

/// Run one parsed command.
pub async fn dispatch(app: &AppContext, command: Commands) -> Result<()> {
    match command {
        Commands::Status => status::status(app).await,
        Commands::Job(cmd) => job::run(app, cmd).await,
        Commands::Sandbox(cmd) => sandbox::run(app, cmd).await,
        Commands::Workspace(cmd) => workspace::run(app, cmd).await,
        Commands::Session(cmd) => session::run(app, cmd).await,
        Commands::Profile(cmd) => profile::run(app, cmd).await,
        Commands::Msg(cmd) => msg::run(app, cmd).await,
        Commands::Logs(args) => logs::logs(app, args).await,
        Commands::Ssh(args) => ssh::ssh(app, args).await,
        Commands::Connect(args) => connect::connect(app, args).await,
        Commands::Disconnect => connect::disconnect(app).await,
        Commands::Init(args) => init::init(app, args).await,
        Commands::Bootstrap(args) => bootstrap::bootstrap(app, args).await,
    }
}
