// ── Rule backend abstraction ──
//
// One object-safe interface over "something that holds netfilter rules".
// The process adapter drives the real kernel tables; the in-memory table
// stands in for tests and for platforms without iptables.

use futures_util::future::BoxFuture;

use crate::error::Error;
use crate::rule::{Chain, Policy, Rule, Table};

/// Boxed future returned by every backend operation.
pub type BackendFuture<'a, T> = BoxFuture<'a, Result<T, Error>>;

/// Outcome of a single delete attempt.
///
/// `NoMatch` is the explicit sentinel that ends a remove-all-duplicates
/// loop; it is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deletion {
    Removed,
    NoMatch,
}

/// Operations a netfilter backend must support.
pub trait RuleBackend: Send + Sync {
    /// Short name for logs (`iptables`, `memory`, `simulated`).
    fn name(&self) -> &'static str;

    /// `true` when rules are not reaching the kernel.
    fn is_simulated(&self) -> bool {
        false
    }

    /// Check that the backend is usable (tool present, required match
    /// modules loadable).
    fn probe(&self) -> BackendFuture<'_, ()>;

    /// Insert `rule` at position 1 of `chain`.
    fn insert_head<'a>(
        &'a self,
        table: Table,
        chain: &'a Chain,
        rule: &'a Rule,
    ) -> BackendFuture<'a, ()>;

    /// Append `rule` to the end of `chain`.
    fn append<'a>(&'a self, table: Table, chain: &'a Chain, rule: &'a Rule)
    -> BackendFuture<'a, ()>;

    /// Delete the first rule in `chain` equal to `rule`.
    fn delete<'a>(
        &'a self,
        table: Table,
        chain: &'a Chain,
        rule: &'a Rule,
    ) -> BackendFuture<'a, Deletion>;

    /// Whether a rule equal to `rule` exists in `chain`.
    fn exists<'a>(&'a self, table: Table, chain: &'a Chain, rule: &'a Rule)
    -> BackendFuture<'a, bool>;

    /// All rules of `chain`, in evaluation order.
    fn list<'a>(&'a self, table: Table, chain: &'a Chain) -> BackendFuture<'a, Vec<Rule>>;

    /// Flush one chain, or every chain of the table when `chain` is `None`.
    fn flush<'a>(&'a self, table: Table, chain: Option<&'a Chain>) -> BackendFuture<'a, ()>;

    /// Delete every user-defined chain of the table.
    fn delete_chains(&self, table: Table) -> BackendFuture<'_, ()>;

    fn set_policy<'a>(
        &'a self,
        table: Table,
        chain: &'a Chain,
        policy: Policy,
    ) -> BackendFuture<'a, ()>;
}
