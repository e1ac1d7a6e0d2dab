//! Fact store: per-agent evidence, liabilities, intents and effects.
//!
//! Pure data. Populated by the identity/config subsystem and the agent
//! runtime; read by every analysis component through a [`FactSnapshot`].

use crate::error::{GovResult, GovernanceError};
use crate::types::{Agent, AgentId, Effect, EvidenceSet, Intent, Liability};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone)]
struct AgentEntry {
    agent: Agent,
    evidence: EvidenceSet,
}

/// Immutable copy of the fact store taken for one evaluation.
#[derive(Debug, Clone, Default)]
pub struct FactSnapshot {
    agents: BTreeMap<AgentId, AgentEntry>,
    liabilities: HashMap<String, Liability>,
    intents: HashMap<AgentId, Vec<Intent>>,
    effects: Vec<Effect>,
}

impl FactSnapshot {
    /// `None` means the agent is unknown, which is distinct from all-false evidence.
    pub fn evidence(&self, agent: &AgentId) -> Option<&EvidenceSet> {
        self.agents.get(agent).map(|e| &e.evidence)
    }

    pub fn agent(&self, agent: &AgentId) -> Option<&Agent> {
        self.agents.get(agent).map(|e| &e.agent)
    }

    pub fn agent_ids(&self) -> impl Iterator<Item = &AgentId> {
        self.agents.keys()
    }

    pub fn liability(&self, id: &str) -> Option<&Liability> {
        self.liabilities.get(id)
    }

    /// Intents of `agent` in declaration order.
    pub fn intents_for(&self, agent: &AgentId) -> &[Intent] {
        self.intents.get(agent).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn effects(&self) -> &[Effect] {
        &self.effects
    }
}

/// Thread-safe fact store.
#[derive(Debug, Default)]
pub struct FactStore {
    facts: Arc<RwLock<FactSnapshot>>,
}

impl FactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent with its evidence. Identity is immutable: registering
    /// the same id twice is rejected.
    pub fn register_agent(&self, agent: Agent, evidence: EvidenceSet) -> GovResult<()> {
        agent.validate()?;
        let mut facts = self.facts.write()?;
        if facts.agents.contains_key(&agent.id) {
            return Err(GovernanceError::DuplicateAgent { agent: agent.id });
        }
        facts.agents.insert(agent.id.clone(), AgentEntry { agent, evidence });
        Ok(())
    }

    /// Replace the evidence held for a registered agent.
    pub fn update_evidence(&self, agent: &AgentId, evidence: EvidenceSet) -> GovResult<()> {
        let mut facts = self.facts.write()?;
        match facts.agents.get_mut(agent) {
            Some(entry) => {
                entry.evidence = evidence;
                Ok(())
            }
            None => Err(GovernanceError::AgentNotFound { agent: agent.clone() }),
        }
    }

    pub fn evidence(&self, agent: &AgentId) -> GovResult<EvidenceSet> {
        let facts = self.facts.read()?;
        facts
            .evidence(agent)
            .copied()
            .ok_or_else(|| GovernanceError::AgentNotFound { agent: agent.clone() })
    }

    pub fn agent(&self, agent: &AgentId) -> GovResult<Agent> {
        let facts = self.facts.read()?;
        facts
            .agent(agent)
            .cloned()
            .ok_or_else(|| GovernanceError::AgentNotFound { agent: agent.clone() })
    }

    /// Liability records persist for the lifetime of the store.
    pub fn register_liability(&self, liability: Liability) -> GovResult<()> {
        liability.validate()?;
        let mut facts = self.facts.write()?;
        if facts.liabilities.contains_key(&liability.id) {
            return Err(GovernanceError::DuplicateLiability { liability: liability.id });
        }
        facts.liabilities.insert(liability.id.clone(), liability);
        Ok(())
    }

    /// Record an intent. Intents are append-only and never amended.
    pub fn declare_intent(&self, intent: Intent) -> GovResult<()> {
        intent.validate()?;
        let mut facts = self.facts.write()?;
        if !facts.agents.contains_key(&intent.agent) {
            return Err(GovernanceError::AgentNotFound { agent: intent.agent });
        }
        facts.intents.entry(intent.agent.clone()).or_default().push(intent);
        Ok(())
    }

    pub fn record_effect(&self, effect: Effect) -> GovResult<()> {
        effect.validate()?;
        let mut facts = self.facts.write()?;
        if facts.effects.iter().any(|e| e.id == effect.id) {
            return Err(GovernanceError::Validation {
                field: "id".to_string(),
                message: format!("effect '{}' already recorded", effect.id),
            });
        }
        facts.effects.push(effect);
        Ok(())
    }

    pub fn snapshot(&self) -> GovResult<FactSnapshot> {
        Ok(self.facts.read()?.clone())
    }
}
