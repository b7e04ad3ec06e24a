//! Sessions owned by an external command-line tool (`az`, `gcloud`).
//!
//! Nothing secret is stored for these records: the tool keeps its own token
//! cache, and this adapter only locates the tool, drives its login command and
//! parses its "who am I" output.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::process::Command;

use crate::config::CliConfig;
use crate::error::{AccessError, Result};
use crate::models::{CliTool, CredentialPayload, CredentialRecord, Variant};

use super::{AccountRef, Identity, LiveSession, SessionAdapter};

/// One external command to run.
#[derive(Debug, Clone)]
pub struct CliInvocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Attach the terminal so the tool can prompt or print a device code.
    pub interactive: bool,
}

impl CliInvocation {
    /// Command line with password arguments masked, for logs.
    pub fn redacted(&self) -> String {
        let mut out = vec![self.program.display().to_string()];
        let mut mask_next = false;
        for arg in &self.args {
            if mask_next {
                out.push("***".to_string());
                mask_next = false;
                continue;
            }
            mask_next = matches!(arg.as_str(), "--password" | "-p");
            out.push(arg.clone());
        }
        out.join(" ")
    }
}

#[derive(Debug, Clone, Default)]
pub struct CliOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CliOutput {
    fn failure_reason(&self) -> String {
        let stderr = self.stderr.trim();
        match (self.code, stderr.is_empty()) {
            (Some(code), true) => format!("exit status {code}"),
            (Some(code), false) => format!("exit status {code}: {stderr}"),
            (None, true) => "terminated by signal".to_string(),
            (None, false) => stderr.to_string(),
        }
    }
}

/// Process boundary for CLI-delegated sessions.
#[async_trait]
pub trait CliRunner: Send + Sync {
    async fn run(&self, invocation: &CliInvocation, timeout: Duration) -> Result<CliOutput>;
}

/// Runs the tool as a child process, killed if it outlives `timeout`.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

#[async_trait]
impl CliRunner for ProcessRunner {
    async fn run(&self, invocation: &CliInvocation, timeout: Duration) -> Result<CliOutput> {
        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .stdout(Stdio::piped())
            .kill_on_drop(true);
        if invocation.interactive {
            command.stdin(Stdio::inherit()).stderr(Stdio::inherit());
        } else {
            command.stdin(Stdio::null()).stderr(Stdio::piped());
        }

        tracing::debug!(command = %invocation.redacted(), "Running CLI tool");
        let child = command.spawn().map_err(|e| {
            AccessError::credential(format!(
                "failed to start {}: {e}",
                invocation.program.display()
            ))
        })?;

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(output) => output.map_err(|e| {
                AccessError::credential(format!(
                    "failed to wait for {}: {e}",
                    invocation.program.display()
                ))
            })?,
            Err(_) => {
                return Err(AccessError::Timeout {
                    flow: invocation.redacted(),
                    seconds: timeout.as_secs(),
                })
            }
        };

        Ok(CliOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

fn executable_names(tool: CliTool) -> Vec<String> {
    let program = tool.program();
    if cfg!(windows) {
        vec![
            format!("{program}.cmd"),
            format!("{program}.exe"),
            program.to_string(),
        ]
    } else {
        vec![program.to_string()]
    }
}

/// Install locations checked after `PATH`.
fn known_locations(tool: CliTool) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = match tool {
        CliTool::Az => [
            "/usr/bin/az",
            "/usr/local/bin/az",
            "/opt/homebrew/bin/az",
            "/opt/az/bin/az",
            r"C:\Program Files\Microsoft SDKs\Azure\CLI2\wbin\az.cmd",
            r"C:\Program Files (x86)\Microsoft SDKs\Azure\CLI2\wbin\az.cmd",
        ]
        .iter()
        .map(PathBuf::from)
        .collect(),
        CliTool::Gcloud => [
            "/usr/bin/gcloud",
            "/usr/local/bin/gcloud",
            "/opt/homebrew/bin/gcloud",
            "/usr/lib/google-cloud-sdk/bin/gcloud",
            "/snap/bin/gcloud",
            r"C:\Program Files (x86)\Google\Cloud SDK\google-cloud-sdk\bin\gcloud.cmd",
        ]
        .iter()
        .map(PathBuf::from)
        .collect(),
    };
    if tool == CliTool::Gcloud {
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join("google-cloud-sdk").join("bin").join("gcloud"));
        }
    }
    paths
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

fn locate_in(
    tool: CliTool,
    configured: Option<&Path>,
    path_env: Option<OsString>,
    known: Vec<PathBuf>,
) -> Result<PathBuf> {
    let mut checked = Vec::new();

    if let Some(path) = configured {
        if is_executable(path) {
            return Ok(path.to_path_buf());
        }
        checked.push(path.display().to_string());
    }

    if let Some(path_env) = path_env {
        let names = executable_names(tool);
        for dir in std::env::split_paths(&path_env) {
            if let Some(found) = names.iter().map(|n| dir.join(n)).find(|p| is_executable(p)) {
                return Ok(found);
            }
        }
        checked.push("PATH".to_string());
    }

    for path in known {
        if is_executable(&path) {
            return Ok(path);
        }
        checked.push(path.display().to_string());
    }

    Err(AccessError::ToolNotFound {
        tool: tool.program().to_string(),
        checked: checked.join(", "),
    })
}

/// Find the tool: an explicitly configured path, then `PATH`, then the known
/// install locations.
pub fn locate_tool(tool: CliTool, configured: Option<&Path>) -> Result<PathBuf> {
    locate_in(
        tool,
        configured,
        std::env::var_os("PATH"),
        known_locations(tool),
    )
}

/// How to log a CLI tool in.
#[derive(Debug, Clone)]
pub enum CliLogin {
    /// Browser-based login.
    Interactive,
    /// The tool prints a code for the user to enter on another device.
    DeviceCode,
    UsernamePassword {
        username: String,
        password: SecretString,
        tenant: Option<String>,
    },
    ServicePrincipal {
        client_id: String,
        secret: SecretString,
        tenant: String,
    },
    /// `gcloud auth activate-service-account` with a key file on disk.
    ServiceAccountKey { key_file: PathBuf },
}

impl CliLogin {
    fn is_interactive(&self) -> bool {
        matches!(self, CliLogin::Interactive | CliLogin::DeviceCode)
    }
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

fn login_args(tool: CliTool, login: &CliLogin) -> Result<Vec<String>> {
    let unsupported = || {
        AccessError::credential(format!(
            "{} does not support this login method",
            tool.program()
        ))
    };

    let args = match (tool, login) {
        (CliTool::Az, CliLogin::Interactive) => strings(&["login", "--output", "json"]),
        (CliTool::Az, CliLogin::DeviceCode) => {
            strings(&["login", "--use-device-code", "--output", "json"])
        }
        (
            CliTool::Az,
            CliLogin::UsernamePassword {
                username,
                password,
                tenant,
            },
        ) => {
            let mut args = strings(&["login", "--username", username.as_str()]);
            args.push("--password".to_string());
            args.push(password.expose_secret().to_string());
            if let Some(tenant) = tenant {
                args.extend(strings(&["--tenant", tenant.as_str()]));
            }
            args.extend(strings(&["--output", "json"]));
            args
        }
        (
            CliTool::Az,
            CliLogin::ServicePrincipal {
                client_id,
                secret,
                tenant,
            },
        ) => {
            let mut args = strings(&["login", "--service-principal", "--username", client_id.as_str()]);
            args.push("--password".to_string());
            args.push(secret.expose_secret().to_string());
            args.extend(strings(&["--tenant", tenant.as_str(), "--output", "json"]));
            args
        }
        (CliTool::Gcloud, CliLogin::Interactive) => strings(&["auth", "login"]),
        (CliTool::Gcloud, CliLogin::DeviceCode) => {
            strings(&["auth", "login", "--no-launch-browser"])
        }
        (CliTool::Gcloud, CliLogin::ServiceAccountKey { key_file }) => vec![
            "auth".to_string(),
            "activate-service-account".to_string(),
            format!("--key-file={}", key_file.display()),
        ],
        (CliTool::Az, CliLogin::ServiceAccountKey { .. })
        | (CliTool::Gcloud, CliLogin::UsernamePassword { .. })
        | (CliTool::Gcloud, CliLogin::ServicePrincipal { .. }) => return Err(unsupported()),
    };
    Ok(args)
}

fn whoami_args(tool: CliTool) -> Vec<String> {
    match tool {
        CliTool::Az => strings(&["account", "list", "--output", "json"]),
        CliTool::Gcloud => strings(&["auth", "list", "--format=json"]),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AzAccount {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    tenant_id: Option<String>,
    #[serde(default)]
    is_default: bool,
    #[serde(default)]
    user: Option<AzUser>,
}

#[derive(Deserialize)]
struct AzUser {
    name: String,
}

#[derive(Deserialize)]
struct GcloudAccount {
    account: String,
    #[serde(default)]
    status: String,
}

/// Parse `az account list` / `az login` JSON.
fn parse_az(stdout: &str) -> serde_json::Result<Identity> {
    let accounts: Vec<AzAccount> = serde_json::from_str(stdout)?;
    let default = accounts
        .iter()
        .find(|a| a.is_default)
        .or_else(|| accounts.first());

    Ok(Identity {
        principal: default.and_then(|a| a.user.as_ref()).map(|u| u.name.clone()),
        account: default.map(|a| a.id.clone()),
        tenant: default.and_then(|a| a.tenant_id.clone()),
        accounts: accounts
            .iter()
            .map(|a| AccountRef {
                id: a.id.clone(),
                name: a.name.clone(),
                tenant: a.tenant_id.clone(),
                is_default: a.is_default,
            })
            .collect(),
        ..Default::default()
    })
}

/// Parse `gcloud auth list --format=json`.
fn parse_gcloud(stdout: &str) -> serde_json::Result<Identity> {
    let accounts: Vec<GcloudAccount> = serde_json::from_str(stdout)?;
    Ok(Identity {
        principal: accounts
            .iter()
            .find(|a| a.status.eq_ignore_ascii_case("active"))
            .map(|a| a.account.clone()),
        accounts: accounts
            .iter()
            .map(|a| AccountRef {
                id: a.account.clone(),
                is_default: a.status.eq_ignore_ascii_case("active"),
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    })
}

fn parse_identity(tool: CliTool, stdout: &str) -> serde_json::Result<Identity> {
    match tool {
        CliTool::Az => parse_az(stdout),
        CliTool::Gcloud => parse_gcloud(stdout),
    }
}

/// A CLI tool that holds (or should hold) a logged-in session.
#[derive(Debug, Clone)]
pub struct CliSession {
    pub tool: CliTool,
    pub program: PathBuf,
    pub identity: Identity,
    logged_in: bool,
}

impl CliSession {
    pub fn logged_in(&self) -> bool {
        self.logged_in
    }

    #[cfg(test)]
    pub(crate) fn for_tests(tool: CliTool) -> Self {
        Self {
            tool,
            program: PathBuf::from(tool.program()),
            identity: Identity::default(),
            logged_in: true,
        }
    }
}

pub struct CliDelegatedAdapter {
    runner: Arc<dyn CliRunner>,
    config: CliConfig,
}

impl CliDelegatedAdapter {
    pub fn new(runner: Arc<dyn CliRunner>, config: CliConfig) -> Self {
        Self { runner, config }
    }

    pub fn locate(&self, tool: CliTool) -> Result<PathBuf> {
        let configured = match tool {
            CliTool::Az => self.config.az_path.as_deref(),
            CliTool::Gcloud => self.config.gcloud_path.as_deref(),
        };
        locate_tool(tool, configured)
    }

    async fn run(&self, program: &Path, args: Vec<String>, interactive: bool) -> Result<CliOutput> {
        let invocation = CliInvocation {
            program: program.to_path_buf(),
            args,
            interactive,
        };
        self.runner.run(&invocation, self.config.timeout).await
    }

    /// Ask the tool which accounts it is logged in as.
    async fn whoami(&self, tool: CliTool, program: &Path) -> Result<CliSession> {
        let output = self.run(program, whoami_args(tool), false).await?;
        let build = |identity: Identity, logged_in: bool| CliSession {
            tool,
            program: program.to_path_buf(),
            identity,
            logged_in,
        };

        if !output.success {
            tracing::info!(tool = tool.program(), reason = %output.failure_reason(), "CLI tool has no usable session");
            return Ok(build(
                Identity {
                    warning: Some(output.failure_reason()),
                    ..Default::default()
                },
                false,
            ));
        }

        match parse_identity(tool, &output.stdout) {
            Ok(identity) => {
                let logged_in = !identity.accounts.is_empty();
                Ok(build(identity, logged_in))
            }
            Err(e) => {
                tracing::warn!(tool = tool.program(), error = %e, "Could not parse CLI account listing");
                Ok(build(
                    Identity::unparsed(
                        &output.stdout,
                        format!("could not parse {} output: {e}", tool.program()),
                    ),
                    !output.stdout.trim().is_empty(),
                ))
            }
        }
    }

    /// Run the tool's login command, then report who it logged in as.
    ///
    /// A login that succeeds but prints nothing parseable still returns a
    /// session; the raw output and a warning ride along in its identity.
    pub async fn login(&self, tool: CliTool, login: &CliLogin) -> Result<CliSession> {
        let program = self.locate(tool)?;
        let args = login_args(tool, login)?;
        let output = self.run(&program, args, login.is_interactive()).await?;
        if !output.success {
            return Err(AccessError::credential(format!(
                "{} login failed: {}",
                tool.program(),
                output.failure_reason()
            )));
        }
        tracing::info!(tool = tool.program(), "CLI login completed");

        if tool == CliTool::Az {
            if let Ok(identity) = parse_az(&output.stdout) {
                if !identity.accounts.is_empty() {
                    return Ok(CliSession {
                        tool,
                        program,
                        identity,
                        logged_in: true,
                    });
                }
            }
        }

        let mut session = self.whoami(tool, &program).await?;
        if !session.logged_in && !output.stdout.trim().is_empty() {
            session.identity = Identity::unparsed(
                &output.stdout,
                format!(
                    "{} login succeeded but no account could be read back",
                    tool.program()
                ),
            );
        }
        session.logged_in = true;
        Ok(session)
    }

    fn session<'a>(&self, session: &'a LiveSession) -> Result<&'a CliSession> {
        match session {
            LiveSession::CliDelegated(s) => Ok(s),
            other => Err(other.mismatch(Variant::CliDelegated)),
        }
    }
}

#[async_trait]
impl SessionAdapter for CliDelegatedAdapter {
    fn variant(&self) -> Variant {
        Variant::CliDelegated
    }

    async fn materialize(&self, record: &CredentialRecord) -> Result<LiveSession> {
        let CredentialPayload::CliDelegated(payload) = &record.payload else {
            return Err(AccessError::credential(format!(
                "record {:?} is {}, not cli-delegated",
                record.name,
                record.variant()
            )));
        };
        let program = self.locate(payload.tool)?;
        let session = self.whoami(payload.tool, &program).await?;
        Ok(LiveSession::CliDelegated(session))
    }

    fn is_expired(&self, _session: &LiveSession) -> bool {
        false
    }

    async fn is_valid(&self, session: &LiveSession) -> Result<bool> {
        Ok(self.session(session)?.logged_in)
    }

    async fn identify(&self, session: &LiveSession) -> Result<Identity> {
        Ok(self.session(session)?.identity.clone())
    }
}
