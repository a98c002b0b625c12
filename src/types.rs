//! Core value types: atom kinds, truth values, attention values

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of an atom. Node kinds carry no outgoing set; link kinds connect
/// an ordered sequence of other atoms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AtomType {
    Node,
    ConceptNode,
    PredicateNode,
    VariableNode,
    Link,
    InheritanceLink,
    SimilarityLink,
    ExecutionLink,
    EvaluationLink,
}

impl AtomType {
    /// Stable string form, used in content addressing and per-type stats.
    pub fn as_str(&self) -> &'static str {
        match self {
            AtomType::Node => "Node",
            AtomType::ConceptNode => "ConceptNode",
            AtomType::PredicateNode => "PredicateNode",
            AtomType::VariableNode => "VariableNode",
            AtomType::Link => "Link",
            AtomType::InheritanceLink => "InheritanceLink",
            AtomType::SimilarityLink => "SimilarityLink",
            AtomType::ExecutionLink => "ExecutionLink",
            AtomType::EvaluationLink => "EvaluationLink",
        }
    }

    pub fn is_link(&self) -> bool {
        matches!(
            self,
            AtomType::Link
                | AtomType::InheritanceLink
                | AtomType::SimilarityLink
                | AtomType::ExecutionLink
                | AtomType::EvaluationLink
        )
    }

    pub fn is_node(&self) -> bool {
        !self.is_link()
    }
}

impl fmt::Display for AtomType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Probabilistic truth: strength and confidence, both in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TruthValue {
    pub strength: f64,
    pub confidence: f64,
}

impl TruthValue {
    /// Create a truth value, rejecting out-of-range components.
    pub fn new(strength: f64, confidence: f64) -> CoreResult<Self> {
        if !(0.0..=1.0).contains(&strength) {
            return Err(CoreError::InvalidInput(format!(
                "truth strength {} outside [0, 1]",
                strength
            )));
        }
        if !(0.0..=1.0).contains(&confidence) {
            return Err(CoreError::InvalidInput(format!(
                "truth confidence {} outside [0, 1]",
                confidence
            )));
        }
        Ok(Self {
            strength,
            confidence,
        })
    }

    /// Fully certain truth, the default for freshly created atoms.
    pub fn full() -> Self {
        Self {
            strength: 1.0,
            confidence: 1.0,
        }
    }

    /// Merge two independently sourced beliefs, weighting strength by
    /// confidence. Two vacuous inputs collapse to maximal ignorance.
    ///
    /// This is a caller utility; inferred atoms use per-rule formulas.
    pub fn revise(&self, other: &TruthValue) -> TruthValue {
        let w1 = self.confidence;
        let w2 = other.confidence;
        if w1 + w2 == 0.0 {
            return TruthValue {
                strength: 0.5,
                confidence: 0.0,
            };
        }
        TruthValue {
            strength: (self.strength * w1 + other.strength * w2) / (w1 + w2),
            confidence: (self.confidence * other.confidence).sqrt(),
        }
    }
}

impl Default for TruthValue {
    fn default() -> Self {
        Self::full()
    }
}

/// Short-, long-, and very-long-term importance of an atom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AttentionValue {
    pub sti: i16,
    pub lti: i16,
    pub vlti: i16,
}

impl AttentionValue {
    /// Multiplicative short-term decay, floored toward negative infinity.
    pub fn decayed(&self, factor: f64) -> AttentionValue {
        AttentionValue {
            sti: (self.sti as f64 * factor).floor() as i16,
            lti: self.lti,
            vlti: self.vlti,
        }
    }

    /// Additive short-term boost, saturating at the i16 bounds.
    pub fn boosted(&self, sti_delta: i16, lti_delta: i16) -> AttentionValue {
        AttentionValue {
            sti: self.sti.saturating_add(sti_delta),
            lti: self.lti.saturating_add(lti_delta),
            vlti: self.vlti,
        }
    }
}
