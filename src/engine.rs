//! Engine configuration and composition of the governance components.
use crate::classifier::{RiskClassifier, DEFAULT_PRIORITY};
use crate::error::{GovResult, GovernanceError};
use crate::facts::FactStore;
use crate::governor::Governor;
use crate::ledger::{LedgerPosition, TraceLedger};
use crate::liability::{LiabilityResolver, Resolution};
use crate::report::AuditReport;
use crate::types::{AgentId, Authority, Effect, EvidenceKind, RiskLevel};
use crate::verifier::{AxiomFinding, AxiomVerifier};
use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;
use tracing::debug;

/// Explicit engine configuration, passed in at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Classifier priority ordering, highest level first.
    pub priority: Vec<EvidenceKind>,
    pub authorities: Vec<Authority>,
    /// Minimum level a [`Governor`] requires before recording an action.
    pub admission_floor: RiskLevel,
    pub max_report_agents: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            priority: DEFAULT_PRIORITY.to_vec(),
            authorities: Vec::new(),
            admission_floor: RiskLevel::Declared,
            max_report_agents: 100_000,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> GovResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> GovResult<()> {
        RiskClassifier::with_priority(&self.priority)?;
        if self.max_report_agents == 0 {
            return Err(GovernanceError::Validation {
                field: "max_report_agents".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if let Some(a) = self.authorities.iter().find(|a| a.jurisdiction.trim().is_empty()) {
            return Err(GovernanceError::Validation {
                field: "authorities".to_string(),
                message: format!("authority {:?} has an empty jurisdiction", a.sovereign),
            });
        }
        Ok(())
    }
}

/// Composes the fact store, ledger, classifier, resolver and verifier.
#[derive(Debug, Clone)]
pub struct GovernanceEngine {
    config: EngineConfig,
    classifier: RiskClassifier,
    facts: Arc<FactStore>,
    ledger: Arc<TraceLedger>,
}

impl GovernanceEngine {
    pub fn new(config: EngineConfig, facts: Arc<FactStore>, ledger: Arc<TraceLedger>) -> GovResult<Self> {
        config.validate()?;
        let classifier = RiskClassifier::with_priority(&config.priority)?;
        Ok(Self { config, classifier, facts, ledger })
    }

    /// Engine over an empty fact store and in-memory ledger.
    pub fn in_memory(config: EngineConfig) -> GovResult<Self> {
        Self::new(config, Arc::new(FactStore::new()), Arc::new(TraceLedger::default()))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn classifier(&self) -> &RiskClassifier {
        &self.classifier
    }

    pub fn facts(&self) -> &Arc<FactStore> {
        &self.facts
    }

    pub fn ledger(&self) -> &Arc<TraceLedger> {
        &self.ledger
    }

    /// `None` for agents missing from the fact store.
    pub fn classify(&self, agent: &AgentId) -> GovResult<Option<RiskLevel>> {
        let facts = self.facts.snapshot()?;
        Ok(self.classifier.classify_agent(&facts, agent))
    }

    pub fn resolve(&self, effect: &Effect) -> GovResult<Resolution> {
        let ledger = self.ledger.snapshot()?;
        let facts = self.facts.snapshot()?;
        Ok(LiabilityResolver::new(&ledger, &facts).resolve(effect))
    }

    pub fn evaluate(&self, range: Range<LedgerPosition>) -> GovResult<Vec<AxiomFinding>> {
        let ledger = self.ledger.snapshot()?;
        let facts = self.facts.snapshot()?;
        Ok(AxiomVerifier::new(&ledger, &facts).verify_all(range))
    }

    /// Execution-side recorder for `agent`; registers its key with the ledger.
    pub fn governor(&self, agent: AgentId, key: SigningKey) -> GovResult<Governor> {
        Governor::new(
            agent,
            key,
            Arc::clone(&self.facts),
            Arc::clone(&self.ledger),
            self.classifier.clone(),
            self.config.admission_floor,
        )
    }

    /// Build the audit report for `agents` over `range` (clamped to the ledger).
    ///
    /// Findings never fail the call; only a poisoned store lock or an
    /// oversized agent list does.
    pub fn report(&self, agents: &[AgentId], range: Range<LedgerPosition>) -> GovResult<AuditReport> {
        if agents.len() > self.config.max_report_agents {
            return Err(GovernanceError::Validation {
                field: "agents".to_string(),
                message: format!(
                    "{} agents requested, limit is {}",
                    agents.len(),
                    self.config.max_report_agents
                ),
            });
        }

        let ledger = self.ledger.snapshot()?;
        let facts = self.facts.snapshot()?;
        let end = range.end.min(ledger.len());
        let range = range.start.min(end)..end;

        let mut per_agent_risk = BTreeMap::new();
        let mut unknown_agents = Vec::new();
        for agent in agents {
            match self.classifier.classify_agent(&facts, agent) {
                Some(level) => {
                    per_agent_risk.insert(agent.clone(), level);
                }
                None => unknown_agents.push(agent.clone()),
            }
        }

        let verifier = AxiomVerifier::new(&ledger, &facts);
        let axiom_findings = verifier.verify_all(range.clone());
        let unbound_effects = LiabilityResolver::new(&ledger, &facts).unbound(facts.effects());
        let unenforced_actions = ledger
            .range(range.clone())
            .filter(|(_, e)| !self.config.authorities.iter().any(|a| a.governs(&e.action)))
            .map(|(_, e)| e.trace.action_ref)
            .collect();

        let report = AuditReport {
            report_id: String::new(),
            per_agent_risk,
            unknown_agents,
            ledger_integrity: ledger.verify(range.clone()),
            ledger_range: range,
            axiom_findings,
            unbound_effects,
            unenforced_actions,
        }
        .seal();

        debug!(
            report = %report.report_id,
            agents = report.per_agent_risk.len(),
            unbound = report.unbound_effects.len(),
            clean = report.is_clean(),
            "audit report composed"
        );
        Ok(report)
    }

    /// Report over every registered agent.
    pub fn report_all(&self, range: Range<LedgerPosition>) -> GovResult<AuditReport> {
        let agents: Vec<AgentId> = self.facts.snapshot()?.agent_ids().cloned().collect();
        self.report(&agents, range)
    }
}
