//! Network mocking
//!
//! A single local proxy process answers requests from a rule file. The first
//! `mockNetwork` command starts it and points the device at it; later ones only
//! swap the rule set.

pub mod mitm;
pub mod rules;

use crate::driver::traits::Driver;
use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;

pub use mitm::MitmProxy;
pub use rules::{MockResponse, MockRule, MockRules};

/// Mocking proxy process bound to a local port
#[async_trait]
pub trait NetworkProxy: Send + Sync {
    fn port(&self) -> u16;

    fn is_started(&self) -> bool;

    async fn start(&mut self, rules: &MockRules) -> Result<()>;

    /// Swap the active rules of a running proxy
    async fn replace_rules(&mut self, rules: &MockRules) -> Result<()>;

    /// Stop the process and release the port
    async fn stop(&mut self) -> Result<()>;
}

/// Idempotent front of a [`NetworkProxy`]
pub struct NetworkMockController {
    proxy: Box<dyn NetworkProxy>,
    /// Address the device uses to reach the proxy
    host: String,
}

impl NetworkMockController {
    pub fn new(proxy: Box<dyn NetworkProxy>, host: impl Into<String>) -> Self {
        Self {
            proxy,
            host: host.into(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.proxy.is_started()
    }

    /// Start the proxy with the rules in `rule_file`, or hot-swap them
    pub async fn start_or_update(&mut self, driver: &dyn Driver, rule_file: &Path) -> Result<()> {
        let rules = MockRules::load(rule_file)?;

        if self.proxy.is_started() {
            log::info!(
                "Replacing network mock rules ({} rules from {})",
                rules.len(),
                rule_file.display()
            );
            return self.proxy.replace_rules(&rules).await;
        }

        log::info!(
            "Starting network mock proxy on port {} ({} rules)",
            self.proxy.port(),
            rules.len()
        );
        self.proxy.start(&rules).await?;
        driver.set_proxy(&self.host, self.proxy.port()).await
    }

    /// Stop the proxy if running and restore the device's direct connection
    pub async fn shutdown(&mut self, driver: &dyn Driver) -> Result<()> {
        if !self.proxy.is_started() {
            return Ok(());
        }
        self.proxy.stop().await?;
        driver.reset_proxy().await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// What a [`CountingProxy`] went through
    #[derive(Debug, Default)]
    pub struct ProxyLog {
        pub starts: usize,
        pub stops: usize,
        pub active_rules: Option<MockRules>,
    }

    /// In-memory proxy counting process starts
    #[derive(Clone, Default)]
    pub struct CountingProxy {
        pub log: Arc<Mutex<ProxyLog>>,
        started: bool,
    }

    #[async_trait]
    impl NetworkProxy for CountingProxy {
        fn port(&self) -> u16 {
            8085
        }

        fn is_started(&self) -> bool {
            self.started
        }

        async fn start(&mut self, rules: &MockRules) -> Result<()> {
            self.started = true;
            let mut log = self.log.lock().unwrap();
            log.starts += 1;
            log.active_rules = Some(rules.clone());
            Ok(())
        }

        async fn replace_rules(&mut self, rules: &MockRules) -> Result<()> {
            self.log.lock().unwrap().active_rules = Some(rules.clone());
            Ok(())
        }

        async fn stop(&mut self) -> Result<()> {
            self.started = false;
            self.log.lock().unwrap().stops += 1;
            Ok(())
        }
    }
}
