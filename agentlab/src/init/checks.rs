//! Individual host readiness checks.

use agentlab_common::HostConfig;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::context::RequestContext;
use crate::subprocess::{CommandOutput, Runner};

const CHECK_TIMEOUT: Duration = Duration::from_secs(10);

pub const CONTROL_PLANE: &str = "control_plane";
pub const TAILSCALE_SERVE: &str = "tailscale_serve";
pub const BRIDGE_VMBR1: &str = "bridge_vmbr1";
pub const IP_FORWARD: &str = "ip_forward";
pub const NFTABLES: &str = "nftables";
pub const PROFILES: &str = "profiles";
pub const TEMPLATES: &str = "templates";
pub const SKILL_BUNDLE: &str = "skill_bundle";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Ok,
    Missing,
    Upgrade,
    Error,
    Skipped,
}

impl CheckStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Missing => "missing",
            Self::Upgrade => "upgrade",
            Self::Error => "error",
            Self::Skipped => "skipped",
        }
    }

    /// Whether this result counts against overall readiness.
    pub fn is_problem(self) -> bool {
        matches!(self, Self::Missing | Self::Upgrade | Self::Error)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    #[serde(default)]
    pub detail: String,
}

impl CheckResult {
    fn new(name: &str, status: CheckStatus, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status,
            detail: detail.into(),
        }
    }
}

/// `name`/`version` from a skill manifest's front matter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SkillManifest {
    #[serde(default, deserialize_with = "scalar_string")]
    pub name: String,
    #[serde(default, deserialize_with = "scalar_string")]
    pub version: String,
}

/// Accepts `1.2` as well as `"1.2"`.
fn scalar_string<'de, D>(de: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde_yaml_ng::Value;
    Ok(match Value::deserialize(de)? {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    })
}

impl SkillManifest {
    /// Reads the `---` delimited front matter. Missing or malformed front
    /// matter yields an empty manifest.
    pub fn parse(raw: &str) -> Self {
        let Some(front) = raw
            .strip_prefix("---")
            .and_then(|rest| rest.split_once("\n---").map(|(front, _)| front))
        else {
            return Self::default();
        };
        match serde_yaml_ng::from_str::<Option<Self>>(front) {
            Ok(manifest) => manifest.unwrap_or_default(),
            Err(e) => {
                debug!("skill manifest front matter: {}", e);
                Self::default()
            }
        }
    }

    pub fn load(dir: &Path) -> Option<Self> {
        let raw = std::fs::read_to_string(dir.join("SKILL.md")).ok()?;
        Some(Self::parse(&raw))
    }
}

/// Inputs shared by every check.
pub struct Checker<'a, R: Runner> {
    pub runner: &'a R,
    pub ctx: &'a RequestContext,
    pub config: Option<&'a HostConfig>,
    pub config_path: &'a Path,
    pub ip_forward_path: &'a Path,
    pub assets: Option<&'a Path>,
    pub skill_install_dir: &'a Path,
}

impl<R: Runner> Checker<'_, R> {
    async fn run(&self, program: &str, args: &[&str]) -> Option<CommandOutput> {
        match self.runner.run(self.ctx, program, args, CHECK_TIMEOUT).await {
            Ok(out) => Some(out),
            Err(e) => {
                debug!("{} unavailable: {}", program, e);
                None
            }
        }
    }

    pub fn control_plane(&self) -> CheckResult {
        match self.config {
            None => CheckResult::new(
                CONTROL_PLANE,
                CheckStatus::Missing,
                format!("{} not found", self.config_path.display()),
            ),
            Some(cfg) if cfg.has_remote_control() => CheckResult::new(
                CONTROL_PLANE,
                CheckStatus::Ok,
                format!("control_listen {}", cfg.control_listen.trim()),
            ),
            Some(_) => CheckResult::new(
                CONTROL_PLANE,
                CheckStatus::Missing,
                "control_listen and control_auth_token must both be set",
            ),
        }
    }

    pub async fn tailscale_serve(&self) -> CheckResult {
        let Some(port) = self
            .config
            .filter(|c| c.has_remote_control())
            .and_then(|c| c.control_host_port().ok())
            .map(|(_, port)| port)
        else {
            return CheckResult::new(TAILSCALE_SERVE, CheckStatus::Skipped, "remote control not configured");
        };
        let Some(out) = self.run("tailscale", &["serve", "status"]).await else {
            return CheckResult::new(TAILSCALE_SERVE, CheckStatus::Missing, "tailscale is not installed");
        };
        if !out.success {
            return CheckResult::new(TAILSCALE_SERVE, CheckStatus::Error, out.combined());
        }
        if serve_forwards_port(&out.stdout, port) {
            CheckResult::new(
                TAILSCALE_SERVE,
                CheckStatus::Ok,
                format!("serving tcp port {port}"),
            )
        } else {
            CheckResult::new(
                TAILSCALE_SERVE,
                CheckStatus::Missing,
                format!("no tailscale serve rule for tcp://…:{port}"),
            )
        }
    }

    pub async fn bridge_vmbr1(&self) -> CheckResult {
        let Some(cfg) = self.config else {
            return CheckResult::new(BRIDGE_VMBR1, CheckStatus::Skipped, "host config not found");
        };
        let network = match cfg.agent_network() {
            Ok(n) => n,
            Err(e) => return CheckResult::new(BRIDGE_VMBR1, CheckStatus::Error, e.to_string()),
        };
        let out = self
            .run("ip", &["-4", "-o", "addr", "show", "dev", "vmbr1"])
            .await;
        let Some(addr) = out
            .filter(|o| o.success)
            .and_then(|o| parse_inet_addr(&o.stdout))
        else {
            return CheckResult::new(BRIDGE_VMBR1, CheckStatus::Missing, "vmbr1 has no IPv4 address");
        };
        if network.contains(addr) {
            CheckResult::new(
                BRIDGE_VMBR1,
                CheckStatus::Ok,
                format!("vmbr1 {addr} in {network}"),
            )
        } else {
            CheckResult::new(
                BRIDGE_VMBR1,
                CheckStatus::Error,
                format!("vmbr1 address {addr} is outside agent_subnet {network}"),
            )
        }
    }

    pub fn ip_forward(&self) -> CheckResult {
        match std::fs::read_to_string(self.ip_forward_path) {
            Ok(v) if v.trim() == "1" => CheckResult::new(IP_FORWARD, CheckStatus::Ok, "enabled"),
            Ok(v) => CheckResult::new(
                IP_FORWARD,
                CheckStatus::Missing,
                format!("net.ipv4.ip_forward = {}", v.trim()),
            ),
            Err(e) => CheckResult::new(
                IP_FORWARD,
                CheckStatus::Error,
                format!("read {}: {e}", self.ip_forward_path.display()),
            ),
        }
    }

    pub async fn nftables(&self) -> CheckResult {
        let mut missing = Vec::new();
        for (family, table) in [("inet", "agentlab"), ("ip", "agentlab_nat")] {
            let Some(out) = self.run("nft", &["list", "table", family, table]).await else {
                return CheckResult::new(NFTABLES, CheckStatus::Missing, "nft is not installed");
            };
            if out.success {
                continue;
            }
            if out.combined().to_lowercase().contains("operation not permitted") {
                return CheckResult::new(NFTABLES, CheckStatus::Skipped, "requires root");
            }
            missing.push(format!("{family} {table}"));
        }
        if missing.is_empty() {
            CheckResult::new(NFTABLES, CheckStatus::Ok, "inet agentlab, ip agentlab_nat")
        } else {
            CheckResult::new(
                NFTABLES,
                CheckStatus::Missing,
                format!("missing table {}", missing.join(", ")),
            )
        }
    }

    /// Profile check plus the template VMIDs the profiles reference.
    pub fn profiles(&self) -> (CheckResult, BTreeSet<u32>) {
        let dir = self
            .config
            .map(|c| c.profiles_dir.clone())
            .unwrap_or_else(|| HostConfig::default().profiles_dir);
        let mut templates = BTreeSet::new();
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                return (
                    CheckResult::new(PROFILES, CheckStatus::Missing, format!("{}: {e}", dir.display())),
                    templates,
                );
            }
        };
        let mut files: Vec<PathBuf> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                matches!(
                    p.extension().and_then(|e| e.to_str()),
                    Some("yaml") | Some("yml")
                )
            })
            .collect();
        files.sort();

        let mut errors = Vec::new();
        let mut count = 0;
        for file in &files {
            let parsed = std::fs::read_to_string(file)
                .map_err(|e| e.to_string())
                .and_then(|raw| {
                    serde_yaml_ng::from_str::<serde_yaml_ng::Value>(&raw).map_err(|e| e.to_string())
                });
            match parsed {
                Ok(value) if value.as_mapping().is_some_and(|m| !m.is_empty()) => {
                    count += 1;
                    collect_template_vmids(&value, &mut templates);
                }
                Ok(_) => errors.push(format!("{}: empty profile", file.display())),
                Err(e) => errors.push(format!("{}: {e}", file.display())),
            }
        }

        let result = if !errors.is_empty() {
            CheckResult::new(PROFILES, CheckStatus::Error, errors.join("; "))
        } else if count == 0 {
            CheckResult::new(
                PROFILES,
                CheckStatus::Missing,
                format!("no profiles in {}", dir.display()),
            )
        } else {
            CheckResult::new(
                PROFILES,
                CheckStatus::Ok,
                format!("{count} profile file(s) in {}", dir.display()),
            )
        };
        (result, templates)
    }

    pub async fn templates(&self, vmids: &BTreeSet<u32>) -> CheckResult {
        if vmids.is_empty() {
            return CheckResult::new(TEMPLATES, CheckStatus::Skipped, "no template_vmid in profiles");
        }
        let mut bad = Vec::new();
        for vmid in vmids {
            let id = vmid.to_string();
            match self.run("qm", &["config", &id]).await {
                Some(out) if out.success && is_template_config(&out.stdout) => {}
                Some(out) if out.success => bad.push(format!("{vmid} is not a template")),
                Some(_) => bad.push(format!("{vmid} does not exist")),
                None => {
                    return CheckResult::new(TEMPLATES, CheckStatus::Error, "qm is not available");
                }
            }
        }
        let listed: Vec<String> = vmids.iter().map(u32::to_string).collect();
        if bad.is_empty() {
            CheckResult::new(TEMPLATES, CheckStatus::Ok, format!("templates {}", listed.join(", ")))
        } else {
            CheckResult::new(TEMPLATES, CheckStatus::Missing, bad.join("; "))
        }
    }

    pub fn skill_bundle(&self) -> CheckResult {
        let Some(source) = self
            .assets
            .and_then(|a| SkillManifest::load(&a.join("skills/agentlab")))
        else {
            return CheckResult::new(SKILL_BUNDLE, CheckStatus::Skipped, "skill source not found");
        };
        match SkillManifest::load(self.skill_install_dir) {
            None => CheckResult::new(
                SKILL_BUNDLE,
                CheckStatus::Missing,
                format!("not installed at {}", self.skill_install_dir.display()),
            ),
            Some(installed) if installed == source => CheckResult::new(
                SKILL_BUNDLE,
                CheckStatus::Ok,
                format!("{} {}", installed.name, installed.version),
            ),
            Some(installed) => CheckResult::new(
                SKILL_BUNDLE,
                CheckStatus::Upgrade,
                format!(
                    "installed {} {}, source {} {}",
                    installed.name, installed.version, source.name, source.version
                ),
            ),
        }
    }
}

/// `tailscale serve status` lists a TCP forward to `port`.
pub fn serve_forwards_port(status: &str, port: u16) -> bool {
    let Ok(re) = Regex::new(r"tcp://[^\s:/]+:(\d+)") else {
        return false;
    };
    re.captures_iter(status)
        .any(|c| c[1].parse::<u16>().ok() == Some(port))
}

/// First `inet A.B.C.D/NN` address in `ip -o addr` output.
pub fn parse_inet_addr(output: &str) -> Option<IpAddr> {
    let mut words = output.split_whitespace();
    while let Some(word) = words.next() {
        if word == "inet" {
            let cidr = words.next()?;
            let addr = cidr.split('/').next()?;
            return addr.parse().ok();
        }
    }
    None
}

pub fn is_template_config(qm_config: &str) -> bool {
    qm_config.lines().any(|l| {
        l.split_once(':')
            .is_some_and(|(k, v)| k.trim() == "template" && v.trim() == "1")
    })
}

fn collect_template_vmids(value: &serde_yaml_ng::Value, out: &mut BTreeSet<u32>) {
    match value {
        serde_yaml_ng::Value::Mapping(map) => {
            for (key, inner) in map {
                if key.as_str() == Some("template_vmid")
                    && let Some(vmid) = inner.as_u64().and_then(|v| u32::try_from(v).ok())
                {
                    out.insert(vmid);
                }
                collect_template_vmids(inner, out);
            }
        }
        serde_yaml_ng::Value::Sequence(items) => {
            for item in items {
                collect_template_vmids(item, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serve_status_parsing() {
        let status = "|-- tcp://pve.tailnet.ts.net:8845 (tailnet only)\n    |-- tcp://127.0.0.1:8845\n";
        assert!(serve_forwards_port(status, 8845));
        assert!(!serve_forwards_port(status, 8846));
        assert!(!serve_forwards_port("No serve config", 8845));
    }

    #[test]
    fn test_parse_inet_addr() {
        let out = "5: vmbr1    inet 10.77.0.1/16 brd 10.77.255.255 scope global vmbr1\\       valid_lft forever";
        assert_eq!(parse_inet_addr(out), "10.77.0.1".parse().ok());
        assert_eq!(parse_inet_addr(""), None);
    }

    #[test]
    fn test_template_config() {
        assert!(is_template_config("name: ubuntu\ntemplate: 1\nmemory: 4096\n"));
        assert!(!is_template_config("name: ubuntu\nmemory: 4096\n"));
    }

    #[test]
    fn test_skill_manifest_front_matter() {
        let m = SkillManifest::parse("---\nname: agentlab\nversion: \"1.2.0\"\n---\n# AgentLab\nname: ignored\n");
        assert_eq!(m.name, "agentlab");
        assert_eq!(m.version, "1.2.0");
    }

    #[test]
    fn test_skill_manifest_ignores_nested_keys() {
        let m = SkillManifest::parse(
            "---\nmetadata:\n  name: inner\n  version: 9.9.9\nname: outer\nversion: 1.2\n---\n",
        );
        assert_eq!(m.name, "outer");
        assert_eq!(m.version, "1.2");
    }

    #[test]
    fn test_skill_manifest_without_front_matter() {
        assert_eq!(SkillManifest::parse("# AgentLab\nname: x\n"), SkillManifest::default());
        assert_eq!(SkillManifest::parse("---\nname: [unclosed\n---\n"), SkillManifest::default());
    }

    #[test]
    fn test_collect_template_vmids() {
        let value: serde_yaml_ng::Value = serde_yaml_ng::from_str(
            "name: yolo\ntemplate_vmid: 9000\nvariants:\n  - template_vmid: 9001\n",
        )
        .unwrap();
        let mut out = BTreeSet::new();
        collect_template_vmids(&value, &mut out);
        assert_eq!(out.into_iter().collect::<Vec<_>>(), vec![9000, 9001]);
    }
}
