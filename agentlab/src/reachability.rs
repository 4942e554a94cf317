//! Sandbox reachability for `agentlab ssh`.
//!
//! Drives a sandbox from whatever state the daemon reports to a usable SSH
//! route: start it if stopped, wait for an IP, probe the SSH port directly,
//! and fall back to a ProxyJump through the control host when the agent
//! subnet is not routable from here. The daemon's state is authoritative;
//! a regression while waiting fails instead of retrying.

use agentlab_common::{CliError, ErrorKind, Sandbox, SandboxState};
use anyhow::Result;
use serde::Serialize;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::context::{Interrupted, RequestContext};
use crate::subprocess::Runner;
use crate::transport::{ApiError, Client, api_path};

pub const DEFAULT_SSH_USER: &str = "agent";
pub const DEFAULT_SSH_PORT: u16 = 22;
pub const PROBE_TIMEOUT: Duration = Duration::from_millis(750);
pub const IP_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const PROBE_INTERVAL: Duration = Duration::from_secs(1);
const JUMP_PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const ROUTE_DIAGNOSTIC_TIMEOUT: Duration = Duration::from_secs(2);

/// SSH output that proves the jump path reached the sandbox's sshd even
/// though batch-mode auth was refused.
const AUTH_FAILURE_PATTERNS: &[&str] = &[
    "permission denied",
    "publickey",
    "host key verification failed",
    "too many authentication failures",
    "no supported authentication methods",
];

// =============================================================================
// Seams
// =============================================================================

/// The slice of the daemon API the engine needs.
#[allow(async_fn_in_trait)]
pub trait SandboxApi {
    async fn get_sandbox(&self, ctx: &RequestContext, vmid: u32) -> Result<Sandbox>;
    async fn start_sandbox(&self, ctx: &RequestContext, vmid: u32) -> Result<Sandbox>;
}

impl SandboxApi for Client {
    async fn get_sandbox(&self, ctx: &RequestContext, vmid: u32) -> Result<Sandbox> {
        let path = api_path("/v1/sandboxes", &[&vmid.to_string()])?;
        Ok(self.get(ctx, &path).await?)
    }

    async fn start_sandbox(&self, ctx: &RequestContext, vmid: u32) -> Result<Sandbox> {
        let path = api_path("/v1/sandboxes", &[&vmid.to_string(), "start"])?;
        Ok(self.post_empty(ctx, &path).await?)
    }
}

/// Network checks against a sandbox.
#[allow(async_fn_in_trait)]
pub trait Prober {
    /// Direct TCP connect to `ip:port` within `timeout`.
    async fn tcp_probe(&self, ip: &str, port: u16, timeout: Duration) -> bool;

    /// Batch-mode SSH through the jump host; true when the path is viable.
    async fn jump_probe(&self, ctx: &RequestContext, target: &SshTarget) -> bool;

    /// A hint when the local routing table has no tailnet route to `ip`.
    async fn route_diagnostic(&self, ctx: &RequestContext, ip: &str) -> Option<String>;
}

/// Probes with real sockets and subprocesses.
pub struct SystemProber<'a, R: Runner> {
    pub runner: &'a R,
}

impl<R: Runner> Prober for SystemProber<'_, R> {
    async fn tcp_probe(&self, ip: &str, port: u16, timeout: Duration) -> bool {
        let addr = format!("{}:{}", bracket_ipv6(ip), port);
        match tokio::time::timeout(timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!("tcp probe {} failed: {}", addr, e);
                false
            }
            Err(_) => {
                debug!("tcp probe {} timed out", addr);
                false
            }
        }
    }

    async fn jump_probe(&self, ctx: &RequestContext, target: &SshTarget) -> bool {
        let argv = target.probe_argv();
        let args: Vec<&str> = argv[1..].iter().map(String::as_str).collect();
        match self.runner.run(ctx, &argv[0], &args, JUMP_PROBE_TIMEOUT).await {
            Ok(out) if out.success => true,
            Ok(out) => {
                let viable = is_auth_failure(&out.combined());
                debug!("jump probe exit {:?}, viable={}", out.code, viable);
                viable
            }
            Err(e) => {
                debug!("jump probe failed: {}", e);
                false
            }
        }
    }

    async fn route_diagnostic(&self, ctx: &RequestContext, ip: &str) -> Option<String> {
        let out = self
            .runner
            .run(ctx, "ip", &["route", "get", ip], ROUTE_DIAGNOSTIC_TIMEOUT)
            .await
            .ok()?;
        if !out.success {
            return None;
        }
        route_hint(ip, &out.stdout)
    }
}

fn bracket_ipv6(ip: &str) -> String {
    if ip.contains(':') && !ip.starts_with('[') {
        format!("[{ip}]")
    } else {
        ip.to_string()
    }
}

/// Whether SSH output shows the remote sshd answered.
pub fn is_auth_failure(output: &str) -> bool {
    let lower = output.to_lowercase();
    AUTH_FAILURE_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Hint for an `ip route get` answer that does not go via tailscale0.
pub fn route_hint(ip: &str, route_output: &str) -> Option<String> {
    if route_output.contains("dev tailscale0") {
        return None;
    }
    Some(format!(
        "no tailnet route to {ip}; run `tailscale up --accept-routes` and approve the agent subnet route"
    ))
}

// =============================================================================
// SSH command
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JumpHost {
    pub user: Option<String>,
    pub host: String,
}

impl JumpHost {
    pub fn spec(&self) -> String {
        match &self.user {
            Some(user) => format!("{user}@{}", self.host),
            None => self.host.clone(),
        }
    }
}

/// Everything needed to build an `ssh` invocation for one sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub user: String,
    pub ip: String,
    pub port: u16,
    pub identity: Option<String>,
    pub jump: Option<JumpHost>,
    pub remote_command: Vec<String>,
}

impl SshTarget {
    fn base_argv(&self, extra_opts: &[&str]) -> Vec<String> {
        let mut argv: Vec<String> = vec!["ssh".into()];
        for opt in extra_opts
            .iter()
            .chain(&["StrictHostKeyChecking=no", "UserKnownHostsFile=/dev/null", "LogLevel=ERROR"])
        {
            argv.push("-o".into());
            argv.push((*opt).to_string());
        }
        if self.port != DEFAULT_SSH_PORT {
            argv.push("-p".into());
            argv.push(self.port.to_string());
        }
        if let Some(identity) = &self.identity {
            argv.push("-i".into());
            argv.push(identity.clone());
        }
        if let Some(jump) = &self.jump {
            argv.push("-J".into());
            argv.push(jump.spec());
        }
        argv.push(format!("{}@{}", self.user, self.ip));
        argv
    }

    /// Interactive (or remote command) invocation.
    pub fn argv(&self) -> Vec<String> {
        let mut argv = self.base_argv(&[]);
        argv.extend(self.remote_command.iter().cloned());
        argv
    }

    /// Non-interactive probe that exits immediately.
    pub fn probe_argv(&self) -> Vec<String> {
        let mut argv = self.base_argv(&["BatchMode=yes", "ConnectTimeout=5"]);
        argv.push("true".into());
        argv
    }

    /// `argv()` as a copy-pasteable shell line.
    pub fn command_line(&self) -> String {
        self.argv()
            .iter()
            .map(|a| shell_quote(a))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Quote only when the argument has characters a shell would interpret.
pub fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_=/,.+@:%".contains(c));
    if safe {
        arg.to_string()
    } else {
        shell_escape::unix::escape(arg.into()).into_owned()
    }
}

// =============================================================================
// State machine
// =============================================================================

/// Engine phase, logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Fetching,
    Starting,
    WaitingIp,
    Probing,
    JumpFallback,
    Ready,
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Route {
    Direct,
    Jump,
}

#[derive(Debug, Clone)]
pub struct ReachOptions {
    pub user: String,
    pub port: u16,
    pub identity: Option<String>,
    pub jump: Option<JumpHost>,
    pub remote_command: Vec<String>,
    pub no_start: bool,
    /// Keep probing until SSH answers or the context ends.
    pub wait: bool,
    /// Fail instead of warning when no route can be found.
    pub require_route: bool,
    pub ip_poll_interval: Duration,
    pub probe_interval: Duration,
}

impl ReachOptions {
    pub fn new(user: String, port: u16) -> Self {
        Self {
            user,
            port,
            identity: None,
            jump: None,
            remote_command: Vec::new(),
            no_start: false,
            wait: false,
            require_route: false,
            ip_poll_interval: IP_POLL_INTERVAL,
            probe_interval: PROBE_INTERVAL,
        }
    }
}

/// A sandbox with a decided SSH route.
#[derive(Debug, Clone)]
pub struct Reachable {
    pub sandbox: Sandbox,
    pub target: SshTarget,
    pub route: Route,
    /// False when the route was chosen without a successful probe.
    pub verified: bool,
    pub warnings: Vec<String>,
}

struct Engine<'a, A, P> {
    api: &'a A,
    prober: &'a P,
    ctx: &'a RequestContext,
    vmid: u32,
    opts: &'a ReachOptions,
    phase: Phase,
}

impl<A: SandboxApi, P: Prober> Engine<'_, A, P> {
    fn enter(&mut self, phase: Phase) {
        debug!("sandbox {}: {:?} -> {:?}", self.vmid, self.phase, phase);
        self.phase = phase;
    }

    fn fail(&mut self, err: CliError) -> anyhow::Error {
        self.enter(Phase::Fail);
        err.into()
    }

    fn no_ip(&mut self, state: SandboxState) -> anyhow::Error {
        let vmid = self.vmid;
        self.fail(CliError::operation(format!(
            "sandbox {vmid} is {state} and has no IP"
        )))
    }

    async fn fetch(&mut self) -> Result<Sandbox> {
        self.enter(Phase::Fetching);
        let sandbox = self.api.get_sandbox(self.ctx, self.vmid).await?;
        let vmid = self.vmid;
        match sandbox.state {
            SandboxState::Stopped if self.opts.no_start => Err(self.fail(
                CliError::operation(format!("sandbox {vmid} is STOPPED"))
                    .with_next(format!("run `agentlab sandbox start {vmid}` or drop --no-start")),
            )),
            SandboxState::Stopped => {
                self.enter(Phase::Starting);
                info!("starting sandbox {}", vmid);
                self.api.start_sandbox(self.ctx, vmid).await
            }
            SandboxState::Suspended => Err(self.fail(
                CliError::operation(format!("sandbox {vmid} is SUSPENDED"))
                    .with_next(format!("run `agentlab sandbox resume {vmid}`")),
            )),
            state if state.is_terminal() => Err(self.no_ip(state)),
            _ => Ok(sandbox),
        }
    }

    async fn wait_for_ip(&mut self, mut sandbox: Sandbox) -> Result<Sandbox> {
        if !sandbox.ip.is_empty() {
            return Ok(sandbox);
        }
        if !sandbox.state.awaits_ip() {
            return Err(self.no_ip(sandbox.state));
        }
        self.enter(Phase::WaitingIp);
        let vmid = self.vmid;
        loop {
            let last = sandbox.state;
            let interrupted = match self.ctx.sleep(self.opts.ip_poll_interval).await {
                Ok(()) => match self.api.get_sandbox(self.ctx, vmid).await {
                    Ok(next) => {
                        sandbox = next;
                        None
                    }
                    Err(e) => match e.downcast_ref::<ApiError>() {
                        Some(ApiError::Timeout { .. }) => Some(Interrupted::DeadlineExceeded),
                        Some(ApiError::Canceled { .. }) => Some(Interrupted::Canceled),
                        _ => return Err(e),
                    },
                },
                Err(reason) => Some(reason),
            };
            match interrupted {
                Some(Interrupted::DeadlineExceeded) => {
                    return Err(self.fail(
                        CliError::new(
                            ErrorKind::Timeout,
                            format!(
                                "timed out waiting for sandbox {vmid} IP (sandbox is {last} with no IP yet)"
                            ),
                        )
                        .with_hint("re-run with a longer --timeout"),
                    ));
                }
                Some(Interrupted::Canceled) => {
                    return Err(self.fail(CliError::new(
                        ErrorKind::Canceled,
                        format!("canceled while waiting for sandbox {vmid} IP"),
                    )));
                }
                None => {}
            }
            if !sandbox.ip.is_empty() {
                return Ok(sandbox);
            }
            if !sandbox.state.awaits_ip() {
                return Err(self.no_ip(sandbox.state));
            }
            debug!("sandbox {} is {} with no IP yet", vmid, sandbox.state);
        }
    }

    fn target(&self, ip: &str, jump: Option<JumpHost>) -> SshTarget {
        SshTarget {
            user: self.opts.user.clone(),
            ip: ip.to_string(),
            port: self.opts.port,
            identity: self.opts.identity.clone(),
            jump,
            remote_command: self.opts.remote_command.clone(),
        }
    }

    async fn probe(&mut self, sandbox: Sandbox) -> Result<Reachable> {
        self.enter(Phase::Probing);
        let ip = sandbox.ip.clone();
        let direct = self.target(&ip, None);
        let jumped = self
            .opts
            .jump
            .clone()
            .map(|jump| self.target(&ip, Some(jump)));

        let ready = |target: SshTarget, route, verified, warnings| Reachable {
            sandbox: sandbox.clone(),
            target,
            route,
            verified,
            warnings,
        };

        if self.prober.tcp_probe(&ip, self.opts.port, PROBE_TIMEOUT).await {
            self.enter(Phase::Ready);
            return Ok(ready(direct, Route::Direct, true, Vec::new()));
        }

        if !self.opts.wait {
            if let Some(jumped) = jumped {
                self.enter(Phase::JumpFallback);
                let viable = self.prober.jump_probe(self.ctx, &jumped).await;
                let mut warnings = Vec::new();
                if !viable {
                    let spec = jumped.jump.as_ref().map(JumpHost::spec).unwrap_or_default();
                    warnings.push(format!(
                        "could not verify SSH to {ip} through jump host {spec}; using it anyway"
                    ));
                }
                self.enter(Phase::Ready);
                return Ok(ready(jumped, Route::Jump, viable, warnings));
            }
            let diagnostic = self.prober.route_diagnostic(self.ctx, &ip).await;
            let message = format!(
                "sandbox {} at {}:{} is not reachable from this machine",
                self.vmid, ip, self.opts.port
            );
            if self.opts.require_route {
                return Err(self.fail(
                    CliError::operation(message)
                        .with_hints(diagnostic)
                        .with_hint("set a jump host with --jump-host or `agentlab connect --jump-host`"),
                ));
            }
            let mut warnings = vec![message];
            warnings.extend(diagnostic);
            self.enter(Phase::Ready);
            return Ok(ready(direct, Route::Direct, false, warnings));
        }

        loop {
            if let Some(jumped) = &jumped {
                self.enter(Phase::JumpFallback);
                if self.prober.jump_probe(self.ctx, jumped).await {
                    self.enter(Phase::Ready);
                    return Ok(ready(jumped.clone(), Route::Jump, true, Vec::new()));
                }
            }
            if let Err(reason) = self.ctx.sleep(self.opts.probe_interval).await {
                let vmid = self.vmid;
                let err = match reason {
                    Interrupted::Canceled => CliError::new(
                        ErrorKind::Canceled,
                        format!("canceled while waiting for SSH on sandbox {vmid}"),
                    ),
                    Interrupted::DeadlineExceeded => {
                        let diagnostic = self.prober.route_diagnostic(self.ctx, &ip).await;
                        CliError::new(
                            ErrorKind::Timeout,
                            format!(
                                "timed out waiting for SSH on sandbox {vmid} ({ip}:{})",
                                self.opts.port
                            ),
                        )
                        .with_hints(diagnostic)
                    }
                };
                return Err(self.fail(err));
            }
            self.enter(Phase::Probing);
            if self.prober.tcp_probe(&ip, self.opts.port, PROBE_TIMEOUT).await {
                self.enter(Phase::Ready);
                return Ok(ready(direct, Route::Direct, true, Vec::new()));
            }
        }
    }
}

/// Run the engine for one sandbox under `ctx`.
pub async fn reach<A: SandboxApi, P: Prober>(
    api: &A,
    prober: &P,
    ctx: &RequestContext,
    vmid: u32,
    opts: &ReachOptions,
) -> Result<Reachable> {
    let mut engine = Engine {
        api,
        prober,
        ctx,
        vmid,
        opts,
        phase: Phase::Init,
    };
    let sandbox = engine.fetch().await?;
    let sandbox = engine.wait_for_ip(sandbox).await?;
    engine.probe(sandbox).await
}
