// ── In-memory rule table ──
//
// Behaves like the kernel tables closely enough for the driver's
// delete-until-no-match loops and verification reads: ordered chains,
// first-match deletion, head insertion. Faults can be injected to
// exercise the error paths above it.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use futures_util::FutureExt;
use futures_util::future::ready;

use crate::backend::{BackendFuture, Deletion, RuleBackend};
use crate::error::Error;
use crate::rule::{Chain, Invocation, Policy, Rule, Table};

/// A failure mode the in-memory table can be told to exhibit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Every call fails as if the tool were missing.
    Unavailable,
    /// Every call fails with a timeout.
    Timeout,
    /// Mutations report success but change nothing.
    IgnoreWrites,
}

#[derive(Debug, Default)]
struct State {
    chains: HashMap<(Table, Chain), Vec<Rule>>,
    policies: HashMap<(Table, Chain), Policy>,
    journal: Vec<String>,
    fault: Option<Fault>,
}

/// [`RuleBackend`] holding rules in process memory.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<State>,
    simulated: bool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// A table standing in for iptables on hosts where enforcement is
    /// mocked. Reports itself as simulated.
    pub fn simulated() -> Self {
        Self {
            state: Mutex::default(),
            simulated: true,
        }
    }

    /// Inject (or clear, with `None`) a fault for all later calls.
    pub fn set_fault(&self, fault: Option<Fault>) {
        self.lock().fault = fault;
    }

    /// Snapshot of one chain, in evaluation order.
    pub fn rules(&self, table: Table, chain: &Chain) -> Vec<Rule> {
        self.lock()
            .chains
            .get(&(table, chain.clone()))
            .cloned()
            .unwrap_or_default()
    }

    pub fn policy(&self, table: Table, chain: &Chain) -> Option<Policy> {
        self.lock().policies.get(&(table, chain.clone())).copied()
    }

    /// Every mutating invocation so far, rendered as iptables arguments.
    pub fn journal(&self) -> Vec<String> {
        self.lock().journal.clone()
    }

    pub fn clear_journal(&self) {
        self.lock().journal.clear();
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_fault(&self, state: &State, what: &Invocation) -> Result<(), Error> {
        match state.fault {
            Some(Fault::Unavailable) => Err(Error::Unavailable {
                tool: self.name().to_owned(),
                reason: "fault injected".into(),
            }),
            Some(Fault::Timeout) => Err(Error::Timeout {
                command: what.to_string(),
                timeout_ms: 0,
            }),
            Some(Fault::IgnoreWrites) | None => Ok(()),
        }
    }

    /// Apply a mutation unless writes are being ignored.
    fn mutate<T>(
        &self,
        invocation: &Invocation,
        ignored: T,
        apply: impl FnOnce(&mut State) -> T,
    ) -> Result<T, Error> {
        let mut state = self.lock();
        self.check_fault(&state, invocation)?;
        if state.fault == Some(Fault::IgnoreWrites) {
            return Ok(ignored);
        }
        state.journal.push(invocation.to_string());
        Ok(apply(&mut *state))
    }

    fn read<T>(&self, invocation: &Invocation, read: impl FnOnce(&State) -> T) -> Result<T, Error> {
        let state = self.lock();
        self.check_fault(&state, invocation)?;
        Ok(read(&*state))
    }
}

impl RuleBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        if self.simulated { "simulated" } else { "memory" }
    }

    fn is_simulated(&self) -> bool {
        self.simulated
    }

    fn probe(&self) -> BackendFuture<'_, ()> {
        let state = self.lock();
        let result = match state.fault {
            Some(Fault::Unavailable) => Err(Error::Unavailable {
                tool: self.name().to_owned(),
                reason: "fault injected".into(),
            }),
            _ => Ok(()),
        };
        ready(result).boxed()
    }

    fn insert_head<'a>(
        &'a self,
        table: Table,
        chain: &'a Chain,
        rule: &'a Rule,
    ) -> BackendFuture<'a, ()> {
        let invocation = Invocation::insert_head(table, chain, rule);
        let result = self.mutate(&invocation, (), |state| {
            state
                .chains
                .entry((table, chain.clone()))
                .or_default()
                .insert(0, rule.clone());
        });
        ready(result).boxed()
    }

    fn append<'a>(
        &'a self,
        table: Table,
        chain: &'a Chain,
        rule: &'a Rule,
    ) -> BackendFuture<'a, ()> {
        let invocation = Invocation::append(table, chain, rule);
        let result = self.mutate(&invocation, (), |state| {
            state
                .chains
                .entry((table, chain.clone()))
                .or_default()
                .push(rule.clone());
        });
        ready(result).boxed()
    }

    fn delete<'a>(
        &'a self,
        table: Table,
        chain: &'a Chain,
        rule: &'a Rule,
    ) -> BackendFuture<'a, Deletion> {
        let invocation = Invocation::delete(table, chain, rule);
        let result = self.mutate(&invocation, Deletion::NoMatch, |state| {
            let Some(rules) = state.chains.get_mut(&(table, chain.clone())) else {
                return Deletion::NoMatch;
            };
            match rules.iter().position(|r| r == rule) {
                Some(index) => {
                    rules.remove(index);
                    Deletion::Removed
                }
                None => Deletion::NoMatch,
            }
        });
        ready(result).boxed()
    }

    fn exists<'a>(
        &'a self,
        table: Table,
        chain: &'a Chain,
        rule: &'a Rule,
    ) -> BackendFuture<'a, bool> {
        let invocation = Invocation::check(table, chain, rule);
        let result = self.read(&invocation, |state| {
            state
                .chains
                .get(&(table, chain.clone()))
                .is_some_and(|rules| rules.contains(rule))
        });
        ready(result).boxed()
    }

    fn list<'a>(&'a self, table: Table, chain: &'a Chain) -> BackendFuture<'a, Vec<Rule>> {
        let invocation = Invocation::list(table, chain);
        let result = self.read(&invocation, |state| {
            state
                .chains
                .get(&(table, chain.clone()))
                .cloned()
                .unwrap_or_default()
        });
        ready(result).boxed()
    }

    fn flush<'a>(&'a self, table: Table, chain: Option<&'a Chain>) -> BackendFuture<'a, ()> {
        let invocation = Invocation::flush(table, chain);
        let result = self.mutate(&invocation, (), |state| {
            for ((t, c), rules) in &mut state.chains {
                if *t == table && chain.is_none_or(|wanted| wanted == c) {
                    rules.clear();
                }
            }
        });
        ready(result).boxed()
    }

    fn delete_chains(&self, table: Table) -> BackendFuture<'_, ()> {
        let invocation = Invocation::delete_chains(table);
        let result = self.mutate(&invocation, (), |state| {
            state
                .chains
                .retain(|(t, c), _| *t != table || c.is_builtin());
        });
        ready(result).boxed()
    }

    fn set_policy<'a>(
        &'a self,
        table: Table,
        chain: &'a Chain,
        policy: Policy,
    ) -> BackendFuture<'a, ()> {
        let invocation = Invocation::set_policy(table, chain, policy);
        let result = self.mutate(&invocation, (), |state| {
            state.policies.insert((table, chain.clone()), policy);
        });
        ready(result).boxed()
    }
}
