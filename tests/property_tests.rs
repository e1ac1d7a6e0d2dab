//! Property tests: classification is monotonic for any priority ordering,
//! tampering is detected at the mutated position, and rejected appends leave
//! the chain untouched.

use ed25519_dalek::SigningKey;
use proptest::prelude::*;
use trace_governor::{
    Action, Agent, AgentId, Effect, Entity, EvidenceKind, EvidenceSet, FactStore, Hash256,
    KeyRing, LedgerEntry, LedgerError, LedgerSnapshot, Liability, LiabilityResolver, RiskClassifier,
    RiskLevel, Trace, TraceLedger,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn arb_evidence() -> impl Strategy<Value = EvidenceSet> {
    any::<[bool; 5]>().prop_map(|flags| {
        EvidenceKind::ALL
            .iter()
            .zip(flags)
            .filter(|(_, on)| *on)
            .fold(EvidenceSet::none(), |set, (kind, _)| set.with(*kind))
    })
}

fn arb_priority() -> impl Strategy<Value = Vec<EvidenceKind>> {
    Just(EvidenceKind::ALL.to_vec()).prop_shuffle()
}

fn union(a: &EvidenceSet, b: &EvidenceSet) -> EvidenceSet {
    EvidenceKind::ALL
        .iter()
        .filter(|k| a.get(**k) || b.get(**k))
        .fold(EvidenceSet::none(), |set, k| set.with(*k))
}

fn signer(seed: u8) -> (AgentId, SigningKey) {
    let key = SigningKey::from_bytes(&[seed; 32]);
    (AgentId::derive(key.verifying_key().as_bytes()), key)
}

fn flip(hash: Hash256, byte: usize) -> Hash256 {
    let mut bytes = *hash.as_bytes();
    bytes[byte % 32] ^= 0x80;
    Hash256::from_bytes(bytes)
}

/// Build a valid chain of `len` entries signed by one agent.
fn chain(len: usize) -> (Vec<LedgerEntry>, KeyRing) {
    let (agent, key) = signer(7);
    let mut keys = KeyRing::new();
    keys.register(agent.clone(), key.verifying_key()).unwrap();
    let ledger = TraceLedger::new(keys.clone());
    for i in 0..len as u64 {
        ledger
            .append_sealed(
                Action::new(agent.clone(), format!("STEP_{}", i), i, i),
                Hash256::digest(&i.to_be_bytes()),
                Hash256::digest(&(i + 1).to_be_bytes()),
                &key,
            )
            .unwrap();
    }
    (ledger.snapshot().unwrap().iter().cloned().collect(), keys)
}

#[derive(Debug, Clone, Copy)]
enum Tamper {
    Signature,
    PreState,
    PostState,
    PreviousHash,
    ActionRef,
    ActionName,
}

fn arb_tamper() -> impl Strategy<Value = Tamper> {
    prop_oneof![
        Just(Tamper::Signature),
        Just(Tamper::PreState),
        Just(Tamper::PostState),
        Just(Tamper::PreviousHash),
        Just(Tamper::ActionRef),
        Just(Tamper::ActionName),
    ]
}

fn apply(entry: &mut LedgerEntry, tamper: Tamper, byte: usize) {
    let trace = &mut entry.trace;
    match tamper {
        Tamper::Signature => trace.signature.0[byte % 64] ^= 0x01,
        Tamper::PreState => trace.pre_state_hash = flip(trace.pre_state_hash, byte),
        Tamper::PostState => trace.post_state_hash = flip(trace.post_state_hash, byte),
        Tamper::PreviousHash => trace.previous_hash = flip(trace.previous_hash, byte),
        Tamper::ActionRef => trace.action_ref = flip(trace.action_ref, byte),
        Tamper::ActionName => entry.action.name.push('X'),
    }
}

#[derive(Debug, Clone, Copy)]
enum Op {
    Valid,
    StaleChain,
    ForeignKey,
    BackInTime,
    Replay,
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Valid),
        1 => Just(Op::StaleChain),
        1 => Just(Op::ForeignKey),
        1 => Just(Op::BackInTime),
        1 => Just(Op::Replay),
    ]
}

// ---------------------------------------------------------------------------
// Property Tests
// ---------------------------------------------------------------------------

proptest! {
    /// Classification is total and deterministic for any ordering.
    #[test]
    fn classification_is_deterministic(evidence in arb_evidence(), priority in arb_priority()) {
        let classifier = RiskClassifier::with_priority(&priority).unwrap();
        let level = classifier.classify(&evidence);
        prop_assert_eq!(level, classifier.classify(&evidence));
        prop_assert_eq!(level == RiskLevel::Wild, evidence == EvidenceSet::none());
    }

    /// Adding evidence never lowers the level, whatever the ordering.
    #[test]
    fn classification_is_monotonic(
        base in arb_evidence(),
        extra in arb_evidence(),
        priority in arb_priority(),
    ) {
        let classifier = RiskClassifier::with_priority(&priority).unwrap();
        let grown = union(&base, &extra);
        prop_assert!(base.is_subset_of(&grown));
        prop_assert!(classifier.classify(&base) <= classifier.classify(&grown));
    }

    /// A single mutation at position p is reported at p; the prefix before it
    /// still verifies and no range covering p does.
    #[test]
    fn tampering_is_detected_at_mutated_position(
        len in 1usize..8,
        target in any::<prop::sample::Index>(),
        tamper in arb_tamper(),
        byte in 0usize..64,
    ) {
        let (mut entries, keys) = chain(len);
        let position = target.index(len);
        apply(&mut entries[position], tamper, byte);

        let snapshot = LedgerSnapshot::from_entries(entries, keys);
        let (broken, error) = snapshot.first_broken_position().unwrap();
        prop_assert_eq!(broken, position);
        prop_assert_eq!(error.position(), Some(position));
        prop_assert!(snapshot.verify(0..position).is_ok());
        for end in position + 1..=len {
            prop_assert!(snapshot.verify(0..end).is_err());
        }
    }

    /// Rejected appends leave length, tail and verification unchanged.
    #[test]
    fn rejected_appends_are_atomic(ops in prop::collection::vec(arb_op(), 1..24)) {
        let (agent, key) = signer(1);
        let (_, foreign) = signer(2);
        let mut keys = KeyRing::new();
        keys.register(agent.clone(), key.verifying_key()).unwrap();
        let ledger = TraceLedger::new(keys);

        let mut clock = 10u64;
        let mut nonce = 0u64;
        ledger
            .append_sealed(Action::new(agent.clone(), "START", clock, nonce), Hash256::GENESIS, Hash256::GENESIS, &key)
            .unwrap();
        let mut expected = 1usize;

        for op in ops {
            let tail = ledger.tail_hash().unwrap();
            nonce += 1;
            let result = match op {
                Op::Valid => {
                    clock += 1;
                    ledger.append_sealed(Action::new(agent.clone(), "STEP", clock, nonce), Hash256::GENESIS, Hash256::GENESIS, &key)
                }
                Op::StaleChain => {
                    let action = Action::new(agent.clone(), "STEP", clock, nonce);
                    let trace = Trace::seal(action.id(), Hash256::GENESIS, Hash256::GENESIS, Hash256::GENESIS, &key);
                    ledger.append(action, trace)
                }
                Op::ForeignKey => ledger.append_sealed(
                    Action::new(agent.clone(), "STEP", clock, nonce),
                    Hash256::GENESIS,
                    Hash256::GENESIS,
                    &foreign,
                ),
                Op::BackInTime => ledger.append_sealed(
                    Action::new(agent.clone(), "STEP", 0, nonce),
                    Hash256::GENESIS,
                    Hash256::GENESIS,
                    &key,
                ),
                Op::Replay => ledger.append_sealed(
                    Action::new(agent.clone(), "STEP", clock, 0),
                    Hash256::GENESIS,
                    Hash256::GENESIS,
                    &key,
                ),
            };

            match op {
                Op::Valid => {
                    prop_assert_eq!(result.unwrap(), expected);
                    expected += 1;
                }
                Op::StaleChain => prop_assert!(matches!(result, Err(LedgerError::ChainMismatch { .. })), "unexpected result: {:?}", result),
                Op::ForeignKey => prop_assert!(matches!(result, Err(LedgerError::SignatureInvalid { .. })), "unexpected result: {:?}", result),
                Op::BackInTime => prop_assert!(matches!(result, Err(LedgerError::NonMonotonicTimestamp { .. })), "unexpected result: {:?}", result),
                Op::Replay => prop_assert!(matches!(result, Err(LedgerError::ReplayedNonce { .. })), "unexpected result: {:?}", result),
            }
            if !matches!(op, Op::Valid) {
                prop_assert_eq!(ledger.tail_hash().unwrap(), tail);
            }
            prop_assert_eq!(ledger.len().unwrap(), expected);
            prop_assert!(ledger.verify(0..expected).is_ok());
        }
    }

    /// Resolution is idempotent and every effect lands in exactly one bucket.
    #[test]
    fn resolution_is_idempotent_and_total(
        linked in any::<bool>(),
        origins in prop::collection::vec(prop::option::of(0usize..6), 0..10),
    ) {
        let (agent, key) = signer(3);
        let facts = FactStore::new();
        let mut record = Agent::new(agent.clone());
        if linked {
            facts.register_liability(Liability::new("L", Entity::Agent { id: agent.clone() }, "all", 1)).unwrap();
            record = record.with_liability_link("L");
        }
        facts.register_agent(record, EvidenceSet::none()).unwrap();

        let mut keys = KeyRing::new();
        keys.register(agent.clone(), key.verifying_key()).unwrap();
        let ledger = TraceLedger::new(keys);
        let mut actions = Vec::new();
        for i in 0..3u64 {
            let action = Action::new(agent.clone(), "STEP", i, i);
            ledger.append_sealed(action.clone(), Hash256::GENESIS, Hash256::GENESIS, &key).unwrap();
            actions.push(action.id());
        }

        // Origins 0..3 are traced actions, 3..6 are hashes with no trace.
        let effects: Vec<Effect> = origins
            .iter()
            .enumerate()
            .map(|(i, origin)| {
                let origin = origin.map(|o| match actions.get(o) {
                    Some(id) => *id,
                    None => Hash256::digest(&[o as u8]),
                });
                Effect::new(format!("e{}", i), origin, "")
            })
            .collect();

        let ledger = ledger.snapshot().unwrap();
        let facts = facts.snapshot().unwrap();
        let resolver = LiabilityResolver::new(&ledger, &facts);
        let mut bound = 0;
        for effect in &effects {
            let first = resolver.resolve(effect);
            prop_assert_eq!(&first, &resolver.resolve(effect));
            let traced = effect.origin.map_or(false, |o| actions.contains(&o));
            prop_assert_eq!(first.is_bound(), linked && traced);
            if first.is_bound() {
                bound += 1;
            }
        }
        prop_assert_eq!(bound + resolver.unbound(&effects).len(), effects.len());
    }
}
