//! Content-addressed atoms: nodes and links

use crate::error::{CoreError, CoreResult};
use crate::types::{AtomType, AttentionValue, TruthValue};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Separator between content-address components. Atom names never contain
/// control characters in practice, so this keeps the encoding unambiguous.
const ADDRESS_SEP: &str = "\x1f";

/// The smallest unit of knowledge: a named node or a link over other atoms.
///
/// Identity is a function of content: two atoms with the same type, name,
/// and outgoing ids share an id, regardless of tenant or timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Atom {
    pub id: String,
    pub atom_type: AtomType,
    pub name: String,
    pub tenant_id: String,
    pub truth_value: TruthValue,
    pub attention_value: AttentionValue,
    /// Ordered ids of the atoms this link connects; empty for nodes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outgoing: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Number of successful updates applied to this atom.
    #[serde(default)]
    pub revision: u64,
}

impl Atom {
    /// Create a node atom.
    pub fn node(atom_type: AtomType, name: &str, tenant_id: &str) -> CoreResult<Self> {
        if atom_type.is_link() {
            return Err(CoreError::InvalidInput(format!(
                "{} is a link type, not a node type",
                atom_type
            )));
        }
        Self::build(atom_type, name, tenant_id, Vec::new())
    }

    /// Create a link atom over the given outgoing atom ids.
    pub fn link(
        atom_type: AtomType,
        name: &str,
        outgoing: Vec<String>,
        tenant_id: &str,
    ) -> CoreResult<Self> {
        if atom_type.is_node() {
            return Err(CoreError::InvalidInput(format!(
                "{} is a node type, not a link type",
                atom_type
            )));
        }
        if outgoing.is_empty() {
            return Err(CoreError::InvalidInput(
                "link requires at least one outgoing atom".into(),
            ));
        }
        Self::build(atom_type, name, tenant_id, outgoing)
    }

    /// Convenience constructor for a ConceptNode.
    pub fn concept(name: &str, tenant_id: &str) -> CoreResult<Self> {
        Self::node(AtomType::ConceptNode, name, tenant_id)
    }

    /// Convenience constructor for a PredicateNode.
    pub fn predicate(name: &str, tenant_id: &str) -> CoreResult<Self> {
        Self::node(AtomType::PredicateNode, name, tenant_id)
    }

    /// Canonical InheritanceLink `source -> target` with full truth.
    ///
    /// Rules and the facade both construct inheritance through here so a
    /// re-derivation is content-identical to the original.
    pub fn inheritance(source_id: &str, target_id: &str, tenant_id: &str) -> CoreResult<Self> {
        Self::link(
            AtomType::InheritanceLink,
            "",
            vec![source_id.to_string(), target_id.to_string()],
            tenant_id,
        )
    }

    /// Canonical SimilarityLink over an unordered pair. Endpoints are
    /// sorted so {a, b} and {b, a} derive the same id.
    pub fn similarity(a_id: &str, b_id: &str, tenant_id: &str) -> CoreResult<Self> {
        let (lo, hi) = if a_id <= b_id {
            (a_id, b_id)
        } else {
            (b_id, a_id)
        };
        Self::link(
            AtomType::SimilarityLink,
            "",
            vec![lo.to_string(), hi.to_string()],
            tenant_id,
        )
    }

    /// Builder-style truth assignment.
    pub fn with_truth(mut self, truth_value: TruthValue) -> Self {
        self.truth_value = truth_value;
        self
    }

    /// Compute the content address over (type, name, outgoing ids).
    pub fn content_address(atom_type: AtomType, name: &str, outgoing: &[String]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(atom_type.as_str().as_bytes());
        hasher.update(ADDRESS_SEP.as_bytes());
        hasher.update(name.as_bytes());
        for id in outgoing {
            hasher.update(ADDRESS_SEP.as_bytes());
            hasher.update(id.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// True when this atom is a link.
    pub fn is_link(&self) -> bool {
        self.atom_type.is_link()
    }

    fn build(
        atom_type: AtomType,
        name: &str,
        tenant_id: &str,
        outgoing: Vec<String>,
    ) -> CoreResult<Self> {
        if tenant_id.is_empty() {
            return Err(CoreError::InvalidInput("tenant id must not be empty".into()));
        }
        let now = Utc::now();
        Ok(Self {
            id: Self::content_address(atom_type, name, &outgoing),
            atom_type,
            name: name.to_string(),
            tenant_id: tenant_id.to_string(),
            truth_value: TruthValue::default(),
            attention_value: AttentionValue::default(),
            outgoing,
            created_at: now,
            updated_at: now,
            revision: 0,
        })
    }
}
