//! Trace Governor - governance verification for autonomous agents.
//!
//! Classifies agents into a risk lattice, keeps a signed hash-chained ledger
//! of their actions, binds effects to liability bearers and checks the
//! structural axioms that tie them together.

pub mod classifier;
pub mod dsl;
pub mod engine;
pub mod error;
pub mod facts;
pub mod governor;
pub mod ledger;
pub mod liability;
pub mod report;
pub mod types;
pub mod verifier;

pub use classifier::RiskClassifier;
pub use dsl::{BoundaryPredicate, IntentDsl};
pub use engine::{EngineConfig, GovernanceEngine};
pub use error::{GovResult, GovernanceError, LedgerError};
pub use facts::{FactSnapshot, FactStore};
pub use governor::Governor;
pub use ledger::{KeyRing, LedgerEntry, LedgerPosition, LedgerSnapshot, TraceLedger};
pub use liability::{LiabilityResolver, Resolution, UnboundLiability, UnboundReason};
pub use report::AuditReport;
pub use types::{
    compute_content_hash, Action, ActionId, Agent, AgentId, Authority, Effect, Entity,
    EvidenceKind, EvidenceSet, Hash256, Intent, Liability, RiskLevel, Trace,
};
pub use verifier::{Axiom, AxiomFinding, AxiomVerifier, Finding, Violation};
