// ── iptables process adapter ──
//
// Every operation is one `iptables -w ...` child process, run under a
// deadline and killed if it overruns. Lock contention and timeouts are
// retried a bounded number of times; everything else surfaces at once.

use std::io;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use futures_util::FutureExt;
use tokio::process::Command;
use tracing::{debug, trace, warn};

use crate::backend::{BackendFuture, Deletion, RuleBackend};
use crate::error::Error;
use crate::rule::{Chain, Invocation, Policy, Protocol, Rule, Table, Target};

/// Locations searched when no explicit path is configured.
pub const SEARCH_PATHS: &[&str] = &[
    "/usr/sbin/iptables",
    "/sbin/iptables",
    "/usr/bin/iptables",
    "/bin/iptables",
];

/// Runtime settings for the process adapter.
#[derive(Debug, Clone)]
pub struct IptablesConfig {
    pub binary: PathBuf,
    /// Deadline for a single invocation.
    pub timeout: Duration,
    /// Extra attempts after a transient failure.
    pub retries: u32,
    /// Base delay between attempts, multiplied by the attempt number.
    pub retry_backoff: Duration,
}

impl Default for IptablesConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from(SEARCH_PATHS[0]),
            timeout: Duration::from_secs(5),
            retries: 2,
            retry_backoff: Duration::from_millis(200),
        }
    }
}

impl IptablesConfig {
    /// Resolve the binary: the override if it exists, otherwise the first
    /// hit in [`SEARCH_PATHS`].
    pub fn locate(override_path: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = override_path {
            return path.is_file().then(|| path.to_path_buf());
        }
        SEARCH_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|candidate| candidate.is_file())
    }
}

/// [`RuleBackend`] that shells out to `iptables`.
#[derive(Debug, Clone)]
pub struct Iptables {
    config: IptablesConfig,
}

impl Iptables {
    pub fn new(config: IptablesConfig) -> Self {
        Self { config }
    }

    pub fn binary(&self) -> &Path {
        &self.config.binary
    }

    fn tool(&self) -> String {
        self.config.binary.display().to_string()
    }

    /// Run one invocation, retrying transient failures.
    async fn run(&self, invocation: &Invocation) -> Result<Output, Error> {
        let mut attempt: u32 = 0;
        loop {
            match self.run_once(invocation.args(), true).await {
                Err(e) if e.is_transient() && attempt < self.config.retries => {
                    attempt += 1;
                    warn!(error = %e, attempt, "transient iptables failure, retrying");
                    tokio::time::sleep(self.config.retry_backoff * attempt).await;
                }
                other => return other,
            }
        }
    }

    async fn run_once(&self, args: &[String], wait_for_lock: bool) -> Result<Output, Error> {
        let command = format!("iptables {}", args.join(" "));
        let mut cmd = Command::new(&self.config.binary);
        if wait_for_lock {
            cmd.arg("-w");
        }
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        trace!(%command, "running");
        let output = match tokio::time::timeout(self.config.timeout, cmd.output()).await {
            Err(_) => {
                return Err(Error::Timeout {
                    command,
                    timeout_ms: u64::try_from(self.config.timeout.as_millis())
                        .unwrap_or(u64::MAX),
                });
            }
            Ok(Err(e))
                if matches!(
                    e.kind(),
                    io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
                ) =>
            {
                return Err(Error::Unavailable {
                    tool: self.tool(),
                    reason: e.to_string(),
                });
            }
            Ok(Err(source)) => {
                return Err(Error::Io {
                    tool: self.tool(),
                    source,
                });
            }
            Ok(Ok(output)) => output,
        };

        if output.status.success() {
            return Ok(output);
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
        let lowered = stderr.to_ascii_lowercase();
        if lowered.contains("permission denied") {
            return Err(Error::Unavailable {
                tool: self.tool(),
                reason: stderr,
            });
        }
        match output.status.code() {
            Some(4) => Err(Error::Busy { command }),
            code => Err(Error::CommandFailed {
                command,
                code,
                stderr,
            }),
        }
    }
}

impl RuleBackend for Iptables {
    fn name(&self) -> &'static str {
        "iptables"
    }

    fn probe(&self) -> BackendFuture<'_, ()> {
        async move {
            let version = self.run_once(&["--version".to_owned()], false).await?;
            debug!(
                version = %String::from_utf8_lossy(&version.stdout).trim(),
                "iptables found"
            );

            // A check against a rule that cannot exist exercises the mac,
            // comment and tcp match modules without touching any table.
            let canary = Rule::new()
                .mac_source("02:00:00:00:00:00")
                .protocol(Protocol::Tcp)
                .dport(9)
                .comment("pisowall-probe")
                .jump(Target::Accept);
            match self
                .run(&Invocation::check(Table::Filter, &Chain::Forward, &canary))
                .await
            {
                Ok(_) => Ok(()),
                Err(e) if e.is_no_match() => Ok(()),
                Err(Error::CommandFailed { stderr, .. }) => Err(Error::Unavailable {
                    tool: self.tool(),
                    reason: stderr,
                }),
                Err(e) => Err(e),
            }
        }
        .boxed()
    }

    fn insert_head<'a>(
        &'a self,
        table: Table,
        chain: &'a Chain,
        rule: &'a Rule,
    ) -> BackendFuture<'a, ()> {
        async move {
            self.run(&Invocation::insert_head(table, chain, rule))
                .await
                .map(drop)
        }
        .boxed()
    }

    fn append<'a>(
        &'a self,
        table: Table,
        chain: &'a Chain,
        rule: &'a Rule,
    ) -> BackendFuture<'a, ()> {
        async move {
            self.run(&Invocation::append(table, chain, rule))
                .await
                .map(drop)
        }
        .boxed()
    }

    fn delete<'a>(
        &'a self,
        table: Table,
        chain: &'a Chain,
        rule: &'a Rule,
    ) -> BackendFuture<'a, Deletion> {
        async move {
            match self.run(&Invocation::delete(table, chain, rule)).await {
                Ok(_) => Ok(Deletion::Removed),
                Err(e) if e.is_no_match() => Ok(Deletion::NoMatch),
                Err(e) => Err(e),
            }
        }
        .boxed()
    }

    fn exists<'a>(
        &'a self,
        table: Table,
        chain: &'a Chain,
        rule: &'a Rule,
    ) -> BackendFuture<'a, bool> {
        async move {
            match self.run(&Invocation::check(table, chain, rule)).await {
                Ok(_) => Ok(true),
                Err(e) if e.is_no_match() => Ok(false),
                Err(e) => Err(e),
            }
        }
        .boxed()
    }

    fn list<'a>(&'a self, table: Table, chain: &'a Chain) -> BackendFuture<'a, Vec<Rule>> {
        async move {
            let output = self.run(&Invocation::list(table, chain)).await?;
            let stdout = String::from_utf8_lossy(&output.stdout);
            Ok(stdout
                .lines()
                .filter_map(Rule::from_listing)
                .map(|(_, rule)| rule)
                .collect())
        }
        .boxed()
    }

    fn flush<'a>(&'a self, table: Table, chain: Option<&'a Chain>) -> BackendFuture<'a, ()> {
        async move {
            self.run(&Invocation::flush(table, chain))
                .await
                .map(drop)
        }
        .boxed()
    }

    fn delete_chains(&self, table: Table) -> BackendFuture<'_, ()> {
        async move {
            self.run(&Invocation::delete_chains(table))
                .await
                .map(drop)
        }
        .boxed()
    }

    fn set_policy<'a>(
        &'a self,
        table: Table,
        chain: &'a Chain,
        policy: Policy,
    ) -> BackendFuture<'a, ()> {
        async move {
            self.run(&Invocation::set_policy(table, chain, policy))
                .await
                .map(drop)
        }
        .boxed()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn missing_binary() -> Iptables {
        Iptables::new(IptablesConfig {
            binary: PathBuf::from("/nonexistent/pisowall/iptables"),
            timeout: Duration::from_millis(500),
            retries: 0,
            retry_backoff: Duration::ZERO,
        })
    }

    #[test]
    fn locate_rejects_missing_override() {
        assert!(IptablesConfig::locate(Some(Path::new("/nonexistent/iptables"))).is_none());
    }

    #[tokio::test]
    async fn missing_binary_reports_unavailable() {
        let backend = missing_binary();
        let err = backend.probe().await.unwrap_err();
        assert!(err.is_unavailable(), "unexpected error: {err}");

        let err = backend
            .insert_head(Table::Filter, &Chain::Forward, &Rule::new().jump(Target::Accept))
            .await
            .unwrap_err();
        assert!(err.is_unavailable());
    }

    #[tokio::test]
    async fn listing_a_missing_binary_does_not_yield_empty_rules() {
        let backend = missing_binary();
        assert!(backend.list(Table::Filter, &Chain::Forward).await.is_err());
    }
}
