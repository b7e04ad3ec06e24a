#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use accesskeep::access::AccessManager;
use accesskeep::clock::{Clock, FixedClock};
use accesskeep::config::Config;
use accesskeep::error::Result;
use accesskeep::session::{CliInvocation, CliOutput, CliRunner};
use accesskeep::storage::{CredentialStore, JsonFileStore};
use accesskeep::token::unsigned_jwt;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

/// Fixed "now" shared by the integration tests.
pub const NOW: i64 = 1_800_000_000;

pub const TEST_RSA_KEY: &str = include_str!("../fixtures/test-rsa-key.pem");

/// Access token shaped like an Entra ID token expiring at `exp`.
pub fn access_token(exp: i64, upn: &str) -> String {
    unsigned_jwt(&json!({
        "aud": "https://management.azure.com",
        "tid": "tenant-1",
        "oid": "obj-1",
        "upn": upn,
        "scp": "user_impersonation",
        "exp": exp,
    }))
}

/// CLI runner that replays canned outputs and records what it was asked to run.
#[derive(Default)]
pub struct FakeRunner {
    outputs: Mutex<VecDeque<CliOutput>>,
    calls: Mutex<Vec<CliInvocation>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_success(&self, stdout: &str) -> &Self {
        self.outputs.lock().unwrap().push_back(CliOutput {
            success: true,
            code: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
        });
        self
    }

    pub fn push_failure(&self, code: i32, stderr: &str) -> &Self {
        self.outputs.lock().unwrap().push_back(CliOutput {
            success: false,
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.to_string(),
        });
        self
    }

    pub fn calls(&self) -> Vec<CliInvocation> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CliRunner for FakeRunner {
    async fn run(&self, invocation: &CliInvocation, _timeout: Duration) -> Result<CliOutput> {
        self.calls.lock().unwrap().push(invocation.clone());
        Ok(self
            .outputs
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default())
    }
}

/// An executable placeholder the CLI adapter can "locate".
#[cfg(unix)]
pub fn fake_tool(dir: &Path, name: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Everything an access-manager test needs, rooted in one temp directory.
pub struct Harness {
    pub store: Arc<JsonFileStore>,
    pub runner: Arc<FakeRunner>,
    pub clock: Arc<FixedClock>,
    pub manager: AccessManager,
}

impl Harness {
    pub fn new(data_dir: &Path, config: Config) -> Self {
        let store = Arc::new(JsonFileStore::new(data_dir));
        let runner = Arc::new(FakeRunner::new());
        let clock = Arc::new(FixedClock::at_unix(NOW));
        let manager = AccessManager::with_parts(
            store.clone() as Arc<dyn CredentialStore>,
            config,
            Client::new(),
            runner.clone() as Arc<dyn CliRunner>,
            clock.clone() as Arc<dyn Clock>,
        );
        Self {
            store,
            runner,
            clock,
            manager,
        }
    }
}
