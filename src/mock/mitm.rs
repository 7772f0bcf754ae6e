//! mitmproxy-backed [`NetworkProxy`]
//!
//! `mitmdump` runs a small addon that reads the rules from a JSON file and
//! reloads it whenever the file changes, so swapping rules is a file write.

use super::{MockRules, NetworkProxy};
use crate::driver::common::{poll_until, wait_until, PollConfig};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};

const ADDON: &str = r#"import json
import os
import re

from mitmproxy import ctx, http


class MockRules:
    def __init__(self):
        self.rules = []
        self.mtime = None

    def load(self, loader):
        loader.add_option("mock_rules", str, "", "JSON file with mock rules")

    def refresh(self):
        path = ctx.options.mock_rules
        try:
            mtime = os.path.getmtime(path)
        except OSError:
            return
        if mtime == self.mtime:
            return
        with open(path) as f:
            self.rules = json.load(f)
        self.mtime = mtime
        ctx.log.info("Loaded %d mock rules" % len(self.rules))

    def request(self, flow):
        self.refresh()
        for rule in self.rules:
            method = rule.get("method")
            if method and method.upper() != flow.request.method.upper():
                continue
            if not re.fullmatch(rule["path"], flow.request.path):
                continue
            response = rule["response"]
            flow.response = http.Response.make(
                response.get("status", 200),
                (response.get("body") or "").encode("utf-8"),
                response.get("headers") or {},
            )
            return


addons = [MockRules()]
"#;

pub struct MitmProxy {
    port: u16,
    work_dir: PathBuf,
    /// Explicit mitmdump binary; looked up in PATH when unset
    binary: Option<PathBuf>,
    child: Option<Child>,
}

impl MitmProxy {
    /// `work_dir` holds the addon script and the live rules file
    pub fn new(port: u16, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            port,
            work_dir: work_dir.into(),
            binary: None,
            child: None,
        }
    }

    pub fn with_binary(mut self, binary: Option<PathBuf>) -> Self {
        self.binary = binary;
        self
    }

    pub fn rules_file(&self) -> PathBuf {
        self.work_dir.join("mock-rules.json")
    }

    fn addon_file(&self) -> PathBuf {
        self.work_dir.join("mock-addon.py")
    }

    /// Replace the rules file in one rename so the addon never reads a partial file
    async fn write_rules(&self, rules: &MockRules) -> Result<()> {
        let json = serde_json::to_vec_pretty(rules)?;
        let target = self.rules_file();
        let staging = self.work_dir.join("mock-rules.json.tmp");
        tokio::fs::write(&staging, json)
            .await
            .with_context(|| format!("Failed to write {}", staging.display()))?;
        tokio::fs::rename(&staging, &target)
            .await
            .with_context(|| format!("Failed to replace {}", target.display()))?;
        Ok(())
    }

    async fn port_in_use(port: u16) -> bool {
        TcpStream::connect(("127.0.0.1", port)).await.is_ok()
    }
}

#[async_trait]
impl NetworkProxy for MitmProxy {
    fn port(&self) -> u16 {
        self.port
    }

    fn is_started(&self) -> bool {
        self.child.is_some()
    }

    async fn start(&mut self, rules: &MockRules) -> Result<()> {
        if self.child.is_some() {
            bail!("Mock proxy already running on port {}", self.port);
        }

        let port = self.port;
        if Self::port_in_use(port).await {
            bail!("Port {} is already in use, cannot start the mock proxy", port);
        }

        let mitmdump = match &self.binary {
            Some(path) => path.clone(),
            None => which::which("mitmdump")
                .context("mitmdump not found in PATH. Install mitmproxy to use mockNetwork")?,
        };

        tokio::fs::create_dir_all(&self.work_dir)
            .await
            .with_context(|| format!("Failed to create {}", self.work_dir.display()))?;
        tokio::fs::write(self.addon_file(), ADDON)
            .await
            .context("Failed to write mock addon")?;
        self.write_rules(rules).await?;

        let mut child = Command::new(&mitmdump)
            .arg("-p")
            .arg(port.to_string())
            .arg("-s")
            .arg(self.addon_file())
            .arg("--set")
            .arg(format!("mock_rules={}", self.rules_file().display()))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to start {}", mitmdump.display()))?;

        let ready = poll_until(PollConfig::new(10000, 200), || {
            let exited = child.try_wait();
            async move {
                match exited {
                    Ok(Some(status)) => {
                        bail!("mitmdump exited with {} before listening on port {}", status, port)
                    }
                    Ok(None) => Ok(Self::port_in_use(port).await.then_some(())),
                    Err(e) => Err(anyhow::Error::new(e).context("Failed to poll mitmdump")),
                }
            }
        })
        .await;

        match ready {
            Ok(Some(())) => {}
            Ok(None) => {
                let _ = child.kill().await;
                bail!("Mock proxy did not start listening on port {}", port);
            }
            Err(e) => {
                let _ = child.kill().await;
                return Err(e);
            }
        }

        log::info!("Mock proxy listening on port {}", port);
        self.child = Some(child);
        Ok(())
    }

    async fn replace_rules(&mut self, rules: &MockRules) -> Result<()> {
        if self.child.is_none() {
            bail!("Mock proxy is not running");
        }
        self.write_rules(rules).await
    }

    async fn stop(&mut self) -> Result<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        child.kill().await.context("Failed to stop mitmdump")?;

        let port = self.port;
        let freed = wait_until(
            || async move { !Self::port_in_use(port).await },
            PollConfig::new(10000, 200),
        )
        .await;
        if !freed {
            log::warn!("Port {} still in use after stopping the mock proxy", port);
        }
        log::info!("Mock proxy stopped");
        Ok(())
    }
}

impl Drop for MitmProxy {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            let _ = child.start_kill();
        }
    }
}

/// Default working directory for proxy files
pub fn default_work_dir(state_dir: &Path) -> PathBuf {
    state_dir.join("lumi-mock")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replace_requires_running_proxy() {
        let mut proxy = MitmProxy::new(18085, std::env::temp_dir());
        assert!(!proxy.is_started());
        assert!(proxy.replace_rules(&MockRules::default()).await.is_err());
        assert!(proxy.stop().await.is_ok());
    }

    #[tokio::test]
    async fn test_rules_file_is_json_list() {
        let dir = std::env::temp_dir().join(format!("lumi-mitm-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let proxy = MitmProxy::new(18086, &dir);

        let rules = MockRules::from_yaml("- path: /ping\n  method: GET\n  response: {body: pong}\n").unwrap();
        proxy.write_rules(&rules).await.unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(proxy.rules_file()).unwrap()).unwrap();
        assert_eq!(written[0]["path"], "/ping");
        assert_eq!(written[0]["response"]["body"], "pong");
        assert!(!dir.join("mock-rules.json.tmp").exists());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_start_refuses_busy_port() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let dir = std::env::temp_dir().join(format!("lumi-mitm-{}", uuid::Uuid::new_v4()));
        let mut proxy = MitmProxy::new(port, &dir);

        let err = proxy.start(&MockRules::default()).await.unwrap_err();
        assert!(err.to_string().contains("already in use"));
        assert!(!proxy.is_started());
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_start_fails_when_process_exits() {
        let Ok(exits_at_once) = which::which("false") else {
            return;
        };
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let dir = std::env::temp_dir().join(format!("lumi-mitm-{}", uuid::Uuid::new_v4()));
        let mut proxy = MitmProxy::new(port, &dir).with_binary(Some(exits_at_once));

        let err = proxy.start(&MockRules::default()).await.unwrap_err();
        assert!(err.to_string().contains("exited"), "{}", err);
        assert!(!proxy.is_started());

        std::fs::remove_dir_all(&dir).ok();
    }
}
