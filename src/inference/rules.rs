//! Built-in inference rules
//!
//! A rule is a cheap guard plus a producer over a snapshot of the tenant's
//! atoms. Rules never write to the atomspace themselves; the engine
//! reinserts their output, and content addressing deduplicates anything
//! re-derived.

use crate::atom::Atom;
use crate::error::CoreResult;
use crate::types::{AtomType, TruthValue};
use std::collections::{HashMap, HashSet};

/// Context handed to a rule application.
#[derive(Debug, Clone)]
pub struct RuleContext {
    pub tenant_id: String,
    pub iteration: usize,
}

/// A pair of guard and producer turning an atom snapshot into new atoms.
pub trait InferenceRule: Send + Sync {
    fn name(&self) -> &str;

    /// Informational priority; rule order is registration order.
    fn priority(&self) -> i32;

    /// Cheap guard evaluated before dispatching the rule to a worker.
    fn can_apply(&self, atoms: &[Atom]) -> bool;

    /// Produce new atoms from the snapshot. Must not mutate the snapshot.
    fn apply(&self, ctx: &RuleContext, atoms: &[Atom]) -> CoreResult<Vec<Atom>>;
}

/// The default rule set every tenant engine starts with.
pub fn default_rules() -> Vec<std::sync::Arc<dyn InferenceRule>> {
    vec![
        std::sync::Arc::new(DeductionRule),
        std::sync::Arc::new(InductionRule),
        std::sync::Arc::new(AbductionRule),
    ]
}

/// Confidence discount applied to each deduction step.
const DEDUCTION_CONFIDENCE_PENALTY: f64 = 0.9;

/// Truth assigned to induced similarity links.
const INDUCTION_TRUTH: TruthValue = TruthValue {
    strength: 0.7,
    confidence: 0.8,
};

/// Inheritance links from the snapshot whose outgoing atoms all resolve.
/// Links referencing deleted atoms are dangling and must not feed rules.
fn resolvable_inheritance_links<'a>(
    atoms: &'a [Atom],
    by_id: &HashMap<&str, &Atom>,
) -> Vec<&'a Atom> {
    atoms
        .iter()
        .filter(|a| a.atom_type == AtomType::InheritanceLink)
        .filter(|a| a.outgoing.len() == 2)
        .filter(|a| a.outgoing.iter().all(|id| by_id.contains_key(id.as_str())))
        .collect()
}

fn index_by_id(atoms: &[Atom]) -> HashMap<&str, &Atom> {
    atoms.iter().map(|a| (a.id.as_str(), a)).collect()
}

/// Transitive chaining over inheritance: from `A -> B` and `B -> C`,
/// derive `A -> C` with product truth `(s1*s2, c1*c2*0.9)`.
///
/// Despite the classical name, this is the transitive closure of
/// inheritance under a product truth combiner, not modus ponens over
/// arbitrary implications.
pub struct DeductionRule;

impl InferenceRule for DeductionRule {
    fn name(&self) -> &str {
        "deduction"
    }

    fn priority(&self) -> i32 {
        100
    }

    fn can_apply(&self, atoms: &[Atom]) -> bool {
        atoms.len() >= 2
            && atoms
                .iter()
                .any(|a| a.atom_type == AtomType::InheritanceLink)
    }

    fn apply(&self, ctx: &RuleContext, atoms: &[Atom]) -> CoreResult<Vec<Atom>> {
        let by_id = index_by_id(atoms);
        let links = resolvable_inheritance_links(atoms, &by_id);

        let mut derived = Vec::new();
        let mut emitted = HashSet::new();
        for first in &links {
            for second in &links {
                if first.outgoing[1] != second.outgoing[0] {
                    continue;
                }
                let source = &first.outgoing[0];
                let target = &second.outgoing[1];
                let truth = TruthValue {
                    strength: first.truth_value.strength * second.truth_value.strength,
                    confidence: first.truth_value.confidence
                        * second.truth_value.confidence
                        * DEDUCTION_CONFIDENCE_PENALTY,
                };
                let atom = Atom::inheritance(source, target, &ctx.tenant_id)?.with_truth(truth);
                if emitted.insert(atom.id.clone()) {
                    derived.push(atom);
                }
            }
        }
        Ok(derived)
    }
}

/// Co-inheritance similarity: sources sharing an inheritance target are
/// similar. Pairs already related by inheritance in either direction are
/// left alone; siblings, not ancestor chains, are the signal here.
pub struct InductionRule;

impl InferenceRule for InductionRule {
    fn name(&self) -> &str {
        "induction"
    }

    fn priority(&self) -> i32 {
        90
    }

    fn can_apply(&self, atoms: &[Atom]) -> bool {
        atoms
            .iter()
            .filter(|a| a.atom_type == AtomType::InheritanceLink)
            .count()
            >= 3
    }

    fn apply(&self, ctx: &RuleContext, atoms: &[Atom]) -> CoreResult<Vec<Atom>> {
        let by_id = index_by_id(atoms);
        let links = resolvable_inheritance_links(atoms, &by_id);

        let mut inherits: HashSet<(&str, &str)> = HashSet::new();
        let mut by_target: HashMap<&str, Vec<&str>> = HashMap::new();
        for link in &links {
            let source = link.outgoing[0].as_str();
            let target = link.outgoing[1].as_str();
            inherits.insert((source, target));
            let sources = by_target.entry(target).or_default();
            if !sources.contains(&source) {
                sources.push(source);
            }
        }

        let mut derived = Vec::new();
        let mut emitted = HashSet::new();
        for sources in by_target.values() {
            if sources.len() < 2 {
                continue;
            }
            for i in 0..sources.len() {
                for j in (i + 1)..sources.len() {
                    let (a, b) = (sources[i], sources[j]);
                    if inherits.contains(&(a, b)) || inherits.contains(&(b, a)) {
                        continue;
                    }
                    let atom =
                        Atom::similarity(a, b, &ctx.tenant_id)?.with_truth(INDUCTION_TRUTH);
                    if emitted.insert(atom.id.clone()) {
                        derived.push(atom);
                    }
                }
            }
        }
        Ok(derived)
    }
}

/// Hypothesis generation placeholder. Registered so tenants carry the full
/// default set, but produces nothing yet.
pub struct AbductionRule;

impl InferenceRule for AbductionRule {
    fn name(&self) -> &str {
        "abduction"
    }

    fn priority(&self) -> i32 {
        50
    }

    fn can_apply(&self, atoms: &[Atom]) -> bool {
        atoms.len() >= 2
    }

    fn apply(&self, _ctx: &RuleContext, _atoms: &[Atom]) -> CoreResult<Vec<Atom>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> RuleContext {
        RuleContext {
            tenant_id: "demo".into(),
            iteration: 0,
        }
    }

    fn chain_fixture() -> (Vec<Atom>, Atom, Atom, Atom) {
        let cat = Atom::concept("Cat", "demo").unwrap();
        let mammal = Atom::concept("Mammal", "demo").unwrap();
        let animal = Atom::concept("Animal", "demo").unwrap();
        let l1 = Atom::inheritance(&cat.id, &mammal.id, "demo").unwrap();
        let l2 = Atom::inheritance(&mammal.id, &animal.id, "demo").unwrap();
        let atoms = vec![cat.clone(), mammal.clone(), animal.clone(), l1, l2];
        (atoms, cat, mammal, animal)
    }

    #[test]
    fn test_deduction_chains_inheritance() {
        let (atoms, cat, _, animal) = chain_fixture();
        let rule = DeductionRule;
        assert!(rule.can_apply(&atoms));

        let derived = rule.apply(&ctx(), &atoms).unwrap();
        assert_eq!(derived.len(), 1);
        let link = &derived[0];
        assert_eq!(link.atom_type, AtomType::InheritanceLink);
        assert_eq!(link.outgoing, vec![cat.id.clone(), animal.id.clone()]);
        assert!((link.truth_value.strength - 1.0).abs() < 1e-9);
        assert!((link.truth_value.confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_deduction_multiplies_truth() {
        let a = Atom::concept("A", "demo").unwrap();
        let b = Atom::concept("B", "demo").unwrap();
        let c = Atom::concept("C", "demo").unwrap();
        let l1 = Atom::inheritance(&a.id, &b.id, "demo")
            .unwrap()
            .with_truth(TruthValue::new(0.8, 0.5).unwrap());
        let l2 = Atom::inheritance(&b.id, &c.id, "demo")
            .unwrap()
            .with_truth(TruthValue::new(0.5, 0.4).unwrap());
        let atoms = vec![a, b, c, l1, l2];

        let derived = DeductionRule.apply(&ctx(), &atoms).unwrap();
        assert_eq!(derived.len(), 1);
        let tv = derived[0].truth_value;
        assert!((tv.strength - 0.4).abs() < 1e-9);
        assert!((tv.confidence - 0.5 * 0.4 * 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_deduction_skips_dangling_links() {
        let (mut atoms, cat, mammal, _) = chain_fixture();
        // Remove the Mammal node; both links now dangle on one side.
        atoms.retain(|a| a.id != mammal.id);
        let derived = DeductionRule.apply(&ctx(), &atoms).unwrap();
        assert!(derived.is_empty());
        let _ = cat;
    }

    #[test]
    fn test_deduction_guard() {
        let cat = Atom::concept("Cat", "demo").unwrap();
        assert!(!DeductionRule.can_apply(&[cat.clone()]));
        let dog = Atom::concept("Dog", "demo").unwrap();
        assert!(!DeductionRule.can_apply(&[cat, dog]));
    }

    #[test]
    fn test_induction_pairs_co_inheriting_sources() {
        let cat = Atom::concept("Cat", "demo").unwrap();
        let dog = Atom::concept("Dog", "demo").unwrap();
        let whale = Atom::concept("Whale", "demo").unwrap();
        let mammal = Atom::concept("Mammal", "demo").unwrap();
        let atoms = vec![
            cat.clone(),
            dog.clone(),
            whale.clone(),
            mammal.clone(),
            Atom::inheritance(&cat.id, &mammal.id, "demo").unwrap(),
            Atom::inheritance(&dog.id, &mammal.id, "demo").unwrap(),
            Atom::inheritance(&whale.id, &mammal.id, "demo").unwrap(),
        ];

        let rule = InductionRule;
        assert!(rule.can_apply(&atoms));
        let derived = rule.apply(&ctx(), &atoms).unwrap();
        assert_eq!(derived.len(), 3);
        for link in &derived {
            assert_eq!(link.atom_type, AtomType::SimilarityLink);
            assert_eq!(link.truth_value, INDUCTION_TRUTH);
        }
    }

    #[test]
    fn test_induction_skips_inheritance_related_pairs() {
        // Cat -> Mammal -> Animal plus the derived Cat -> Animal: Cat and
        // Mammal both inherit from Animal, but Cat -> Mammal already holds.
        let (mut atoms, cat, mammal, animal) = chain_fixture();
        atoms.push(Atom::inheritance(&cat.id, &animal.id, "demo").unwrap());

        let derived = InductionRule.apply(&ctx(), &atoms).unwrap();
        assert!(derived.is_empty(), "no similarity for {:?}", (cat.id, mammal.id));
    }

    #[test]
    fn test_induction_guard_needs_three_links() {
        let (atoms, ..) = chain_fixture();
        assert!(!InductionRule.can_apply(&atoms));
    }

    #[test]
    fn test_abduction_is_empty() {
        let (atoms, ..) = chain_fixture();
        let rule = AbductionRule;
        assert!(rule.can_apply(&atoms));
        assert!(rule.apply(&ctx(), &atoms).unwrap().is_empty());
    }

    #[test]
    fn test_default_rules_order() {
        let rules = default_rules();
        let names: Vec<&str> = rules.iter().map(|r| r.name()).collect();
        assert_eq!(names, vec!["deduction", "induction", "abduction"]);
    }
}
