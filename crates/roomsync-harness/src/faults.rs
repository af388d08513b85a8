//! Fault injection for the in-memory store.
//!
//! Two sources of failure, checked in order:
//! - [`FaultRule`]s: targeted failures by path prefix and operation, optionally
//!   limited to a number of hits
//! - a seeded random failure rate applied to every remaining operation
//!
//! The same seed always fails the same operations.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use roomsync_proto::{StoreError, StorePath};

/// Store operation class a rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOp {
    /// One-shot fetches.
    Read,
    /// Sets, removals and pushes.
    Write,
}

/// Error a matching rule produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// [`StoreError::PermissionDenied`] at the operation's path.
    PermissionDenied,
    /// [`StoreError::Unavailable`].
    Unavailable,
}

/// Targeted failure for operations under a path prefix.
#[derive(Debug, Clone)]
pub struct FaultRule {
    prefix: StorePath,
    op: FaultOp,
    kind: FaultKind,
    /// Hits left before the rule expires. `None` never expires.
    remaining: Option<u32>,
}

impl FaultRule {
    /// Deny every write under `prefix`.
    pub fn deny_writes(prefix: &str) -> Self {
        Self {
            prefix: StorePath::new(prefix),
            op: FaultOp::Write,
            kind: FaultKind::PermissionDenied,
            remaining: None,
        }
    }

    /// Fail every read under `prefix` as unavailable.
    pub fn fail_reads(prefix: &str) -> Self {
        Self {
            prefix: StorePath::new(prefix),
            op: FaultOp::Read,
            kind: FaultKind::Unavailable,
            remaining: None,
        }
    }

    /// Expire after `hits` matching operations.
    #[must_use]
    pub fn times(mut self, hits: u32) -> Self {
        self.remaining = Some(hits);
        self
    }

    /// Produce `kind` instead of the default error.
    #[must_use]
    pub fn with_kind(mut self, kind: FaultKind) -> Self {
        self.kind = kind;
        self
    }

    fn matches(&self, op: FaultOp, path: &StorePath) -> bool {
        self.op == op && self.remaining != Some(0) && path.starts_with(&self.prefix)
    }
}

fn error_for(kind: FaultKind, path: &StorePath) -> StoreError {
    match kind {
        FaultKind::PermissionDenied => StoreError::PermissionDenied { path: path.clone() },
        FaultKind::Unavailable => StoreError::Unavailable { reason: "injected fault".into() },
    }
}

/// Fault configuration of one store.
#[derive(Debug, Clone)]
pub struct FaultPlan {
    rules: Vec<FaultRule>,
    /// Probability in `[0.0, 1.0]` that an operation fails.
    failure_rate: f64,
    rng: ChaCha8Rng,
    injected: usize,
}

impl Default for FaultPlan {
    fn default() -> Self {
        Self::none()
    }
}

impl FaultPlan {
    /// No failures.
    pub fn none() -> Self {
        Self::random(0, 0.0)
    }

    /// Fail operations at random with probability `failure_rate`, clamped to
    /// `[0.0, 1.0]`.
    pub fn random(seed: u64, failure_rate: f64) -> Self {
        Self {
            rules: Vec::new(),
            failure_rate: failure_rate.clamp(0.0, 1.0),
            rng: ChaCha8Rng::seed_from_u64(seed),
            injected: 0,
        }
    }

    /// Add a targeted rule.
    #[must_use]
    pub fn with_rule(mut self, rule: FaultRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Add a targeted rule in place.
    pub fn add_rule(&mut self, rule: FaultRule) {
        self.rules.push(rule);
    }

    /// Number of failures injected so far.
    pub fn injected(&self) -> usize {
        self.injected
    }

    /// Decide whether an operation fails.
    pub(crate) fn check(&mut self, op: FaultOp, path: &StorePath) -> Result<(), StoreError> {
        if let Some(rule) = self.rules.iter_mut().find(|rule| rule.matches(op, path)) {
            if let Some(remaining) = rule.remaining.as_mut() {
                *remaining -= 1;
            }
            self.injected += 1;
            return Err(error_for(rule.kind, path));
        }
        if self.failure_rate > 0.0 && self.rng.gen_bool(self.failure_rate) {
            self.injected += 1;
            return Err(error_for(FaultKind::Unavailable, path));
        }
        Ok(())
    }
}
