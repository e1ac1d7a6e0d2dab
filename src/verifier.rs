//! Axiom verifier: structural governance checks over one evaluation snapshot.
//!
//! Each check yields a [`Finding`]. Checks are independent and exhaustive: a
//! violated check lists every offending item, and one check failing never
//! stops the others. Nothing is cached; callers re-run against current state.

use crate::error::LedgerError;
use crate::facts::FactSnapshot;
use crate::ledger::{LedgerPosition, LedgerSnapshot};
use crate::liability::{LiabilityResolver, UnboundLiability};
use crate::types::{ActionId, AgentId, Intent};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::ops::Range;

/// The three structural axioms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axiom {
    /// Every action is preceded by an intent whose boundary permits it
    IntentPrecedence,
    /// Every effect resolves to a liability bearer
    BearerCompleteness,
    /// An action has a trace exactly when that trace verifies
    AuditabilityEquivalence,
}

impl Axiom {
    pub const ALL: [Axiom; 3] = [
        Self::IntentPrecedence,
        Self::BearerCompleteness,
        Self::AuditabilityEquivalence,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IntentPrecedence => "intent_precedence",
            Self::BearerCompleteness => "bearer_completeness",
            Self::AuditabilityEquivalence => "auditability_equivalence",
        }
    }
}

impl std::fmt::Display for Axiom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentGap {
    /// No intent was declared strictly before the action
    NoPriorIntent,
    /// Prior intents exist but none of their boundaries permit the action
    OutsideBoundary,
}

/// The intent nearest to an offending action, for remediation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentCandidate {
    pub objective: String,
    pub declared_at: u64,
    pub boundary: Vec<String>,
}

impl From<&Intent> for IntentCandidate {
    fn from(intent: &Intent) -> Self {
        Self {
            objective: intent.objective.clone(),
            declared_at: intent.declared_at,
            boundary: intent.boundary.iter().map(|p| p.pattern().to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "gap", rename_all = "snake_case")]
pub enum AuditGap {
    /// The action is referenced but has no trace in the ledger
    MissingTrace,
    /// The trace exists but its chain position does not verify
    Unverifiable { broken_at: LedgerPosition, error: LedgerError },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "violation", rename_all = "snake_case")]
pub enum Violation {
    IntentPrecedence {
        action: ActionId,
        position: LedgerPosition,
        agent: AgentId,
        action_name: String,
        timestamp: u64,
        gap: IntentGap,
        closest_intent: Option<IntentCandidate>,
    },
    UnboundEffect(UnboundLiability),
    Unauditable {
        action: ActionId,
        position: Option<LedgerPosition>,
        gap: AuditGap,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "violations", rename_all = "snake_case")]
pub enum Finding {
    Satisfied,
    Violated(Vec<Violation>),
}

impl Finding {
    fn from_violations(violations: Vec<Violation>) -> Self {
        if violations.is_empty() {
            Self::Satisfied
        } else {
            Self::Violated(violations)
        }
    }

    pub fn is_satisfied(&self) -> bool {
        matches!(self, Self::Satisfied)
    }

    pub fn violations(&self) -> &[Violation] {
        match self {
            Self::Satisfied => &[],
            Self::Violated(v) => v,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxiomFinding {
    pub axiom: Axiom,
    pub finding: Finding,
}

/// Stateless checks over a ledger snapshot and a fact snapshot.
#[derive(Debug, Clone, Copy)]
pub struct AxiomVerifier<'a> {
    ledger: &'a LedgerSnapshot,
    facts: &'a FactSnapshot,
}

impl<'a> AxiomVerifier<'a> {
    pub fn new(ledger: &'a LedgerSnapshot, facts: &'a FactSnapshot) -> Self {
        Self { ledger, facts }
    }

    /// Run all three checks over `range` (clamped to the ledger).
    pub fn verify_all(&self, range: Range<LedgerPosition>) -> Vec<AxiomFinding> {
        let range = self.clamp(range);
        Axiom::ALL
            .iter()
            .map(|&axiom| AxiomFinding {
                axiom,
                finding: match axiom {
                    Axiom::IntentPrecedence => self.intent_precedence(range.clone()),
                    Axiom::BearerCompleteness => self.bearer_completeness(),
                    Axiom::AuditabilityEquivalence => self.auditability_equivalence(range.clone()),
                },
            })
            .collect()
    }

    pub fn intent_precedence(&self, range: Range<LedgerPosition>) -> Finding {
        let range = self.clamp(range);
        let violations = self
            .ledger
            .range(range)
            .filter_map(|(position, entry)| {
                let action = &entry.action;
                let intents = self.facts.intents_for(&action.agent);
                let prior: Vec<&Intent> = intents
                    .iter()
                    .filter(|i| i.declared_at < action.timestamp)
                    .collect();
                if prior.iter().any(|i| i.permits(action)) {
                    return None;
                }
                let (gap, closest) = match prior.iter().max_by_key(|i| i.declared_at) {
                    Some(latest) => (IntentGap::OutsideBoundary, Some(*latest)),
                    None => (
                        IntentGap::NoPriorIntent,
                        intents.iter().min_by_key(|i| i.declared_at),
                    ),
                };
                Some(Violation::IntentPrecedence {
                    action: entry.trace.action_ref,
                    position,
                    agent: action.agent.clone(),
                    action_name: action.name.clone(),
                    timestamp: action.timestamp,
                    gap,
                    closest_intent: closest.map(IntentCandidate::from),
                })
            })
            .collect();
        Finding::from_violations(violations)
    }

    /// Every recorded effect must resolve to a bearer.
    pub fn bearer_completeness(&self) -> Finding {
        let resolver = LiabilityResolver::new(self.ledger, self.facts);
        Finding::from_violations(
            resolver
                .unbound(self.facts.effects())
                .into_iter()
                .map(Violation::UnboundEffect)
                .collect(),
        )
    }

    /// Traced actions in `range` must verify; actions named as the origin of
    /// an effect must be traced.
    pub fn auditability_equivalence(&self, range: Range<LedgerPosition>) -> Finding {
        let range = self.clamp(range);
        let mut violations = Vec::new();

        if let Some((broken_at, error)) = self.ledger.first_broken_position() {
            for (position, entry) in self.ledger.range(range.start.max(broken_at)..range.end) {
                violations.push(Violation::Unauditable {
                    action: entry.trace.action_ref,
                    position: Some(position),
                    gap: AuditGap::Unverifiable { broken_at, error: error.clone() },
                });
            }
        }

        let claimed: BTreeSet<ActionId> =
            self.facts.effects().iter().filter_map(|e| e.origin).collect();
        for action in claimed {
            if self.ledger.position_of(&action).is_none() {
                violations.push(Violation::Unauditable {
                    action,
                    position: None,
                    gap: AuditGap::MissingTrace,
                });
            }
        }
        Finding::from_violations(violations)
    }

    fn clamp(&self, range: Range<LedgerPosition>) -> Range<LedgerPosition> {
        let end = range.end.min(self.ledger.len());
        range.start.min(end)..end
    }
}
