//! Liability resolution: effect to bearer, or an explicit unbound marker.

use crate::facts::FactSnapshot;
use crate::ledger::LedgerSnapshot;
use crate::types::{ActionId, AgentId, Effect, Liability};
use serde::{Deserialize, Serialize};

/// Why an effect could not be bound to a liability record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum UnboundReason {
    /// The effect names no causal action
    NoCausalOrigin,
    /// The named action has no trace in the ledger
    OriginNotInLedger { action: ActionId },
    /// The originating agent is not in the fact store
    AgentUnknown { agent: AgentId },
    /// The originating agent was provisioned without a liability link
    NoLiabilityLink { agent: AgentId },
    /// The agent links to a liability record that does not exist
    DanglingLiabilityLink { agent: AgentId, liability: String },
}

/// Governance finding: an effect with no resolvable bearer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnboundLiability {
    pub effect: Effect,
    pub reason: UnboundReason,
}

/// Outcome of [`LiabilityResolver::resolve`]. Exactly one per effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Resolution {
    Bound { effect: String, liability: Liability },
    Unbound(UnboundLiability),
}

impl Resolution {
    pub fn is_bound(&self) -> bool {
        matches!(self, Self::Bound { .. })
    }
}

/// Maps effects to liability through the ledger and fact store.
///
/// Reads one consistent pair of snapshots, so repeated resolution of the same
/// effect always yields the same result.
#[derive(Debug, Clone, Copy)]
pub struct LiabilityResolver<'a> {
    ledger: &'a LedgerSnapshot,
    facts: &'a FactSnapshot,
}

impl<'a> LiabilityResolver<'a> {
    pub fn new(ledger: &'a LedgerSnapshot, facts: &'a FactSnapshot) -> Self {
        Self { ledger, facts }
    }

    pub fn resolve(&self, effect: &Effect) -> Resolution {
        match self.bearer_of(effect) {
            Ok(liability) => Resolution::Bound {
                effect: effect.id.clone(),
                liability: liability.clone(),
            },
            Err(reason) => Resolution::Unbound(UnboundLiability {
                effect: effect.clone(),
                reason,
            }),
        }
    }

    /// Every unbound effect among `effects`, in input order.
    pub fn unbound(&self, effects: &[Effect]) -> Vec<UnboundLiability> {
        effects
            .iter()
            .filter_map(|e| match self.resolve(e) {
                Resolution::Unbound(u) => Some(u),
                Resolution::Bound { .. } => None,
            })
            .collect()
    }

    fn bearer_of(&self, effect: &Effect) -> Result<&'a Liability, UnboundReason> {
        let action = effect.origin.ok_or(UnboundReason::NoCausalOrigin)?;
        let position = self
            .ledger
            .position_of(&action)
            .ok_or(UnboundReason::OriginNotInLedger { action })?;
        let agent_id = self
            .ledger
            .at(position)
            .map(|e| &e.action.agent)
            .ok_or(UnboundReason::OriginNotInLedger { action })?;
        let agent = self
            .facts
            .agent(agent_id)
            .ok_or_else(|| UnboundReason::AgentUnknown { agent: agent_id.clone() })?;
        let link = agent
            .liability_link
            .as_deref()
            .ok_or_else(|| UnboundReason::NoLiabilityLink { agent: agent_id.clone() })?;
        self.facts
            .liability(link)
            .ok_or_else(|| UnboundReason::DanglingLiabilityLink {
                agent: agent_id.clone(),
                liability: link.to_string(),
            })
    }
}
