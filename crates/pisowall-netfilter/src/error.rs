use thiserror::Error;

/// Top-level error type for the `pisowall-netfilter` crate.
///
/// Covers every failure mode of talking to the kernel packet filter:
/// the tool being absent, the command hanging, lock contention with other
/// netfilter users, and a plain non-zero exit. `pisowall-core` maps these
/// into its own domain errors.
#[derive(Debug, Error)]
pub enum Error {
    // ── Availability ────────────────────────────────────────────────
    /// The enforcement tool could not be found or executed at all.
    #[error("{tool} is not available: {reason}")]
    Unavailable { tool: String, reason: String },

    // ── Execution ───────────────────────────────────────────────────
    /// The command did not finish inside its deadline and was killed.
    #[error("`{command}` timed out after {timeout_ms}ms")]
    Timeout { command: String, timeout_ms: u64 },

    /// Another process holds the xtables lock (iptables exit status 4).
    #[error("`{command}` could not acquire the xtables lock")]
    Busy { command: String },

    /// The command ran and exited non-zero.
    #[error("`{command}` failed (exit {code:?}): {stderr}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    /// Spawning or waiting on the child process failed.
    #[error("I/O error running {tool}: {source}")]
    Io {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    // ── Data ────────────────────────────────────────────────────────
    /// A line of `-S` output did not look like a rule specification.
    #[error("unparseable rule listing: {line}")]
    Parse { line: String },
}

impl Error {
    /// Returns `true` if retrying the same command may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Busy { .. })
    }

    /// Returns `true` if the tool itself is missing or unusable.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }

    /// Returns `true` if iptables reported that the rule (or chain) it was
    /// asked to touch does not exist.
    pub fn is_no_match(&self) -> bool {
        match self {
            Self::CommandFailed {
                code: Some(1),
                stderr,
                ..
            } => {
                let stderr = stderr.to_ascii_lowercase();
                stderr.contains("does a matching rule exist")
                    || stderr.contains("bad rule")
                    || stderr.contains("no chain/target/match by that name")
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_missing_rule_as_no_match() {
        let err = Error::CommandFailed {
            command: "iptables -D FORWARD -j ACCEPT".into(),
            code: Some(1),
            stderr: "iptables: Bad rule (does a matching rule exist in that chain?).".into(),
        };
        assert!(err.is_no_match());
        assert!(!err.is_transient());
    }

    #[test]
    fn other_exit_codes_are_not_no_match() {
        let err = Error::CommandFailed {
            command: "iptables -A FORWARD".into(),
            code: Some(2),
            stderr: "iptables v1.8.9: unknown option".into(),
        };
        assert!(!err.is_no_match());
    }

    #[test]
    fn lock_contention_and_timeouts_are_transient() {
        assert!(Error::Busy { command: "x".into() }.is_transient());
        assert!(
            Error::Timeout {
                command: "x".into(),
                timeout_ms: 10
            }
            .is_transient()
        );
        assert!(
            !Error::Unavailable {
                tool: "iptables".into(),
                reason: "not found".into()
            }
            .is_transient()
        );
    }
}
