//! Mindspace: a sharded, multi-tenant, in-memory hypergraph knowledge
//! store with a parallel inference engine, a priority-scheduled agent
//! executor, and staged cognitive pipelines.
//!
//! The core is composed bottom-up:
//!
//! - [`atom`] / [`types`]: content-addressed atoms with truth and
//!   attention values
//! - [`shard`]: one indexed in-memory store behind a bounded,
//!   multiplexed request surface
//! - [`sharding`]: hash routing across shards with parallel cross-shard
//!   queries and an advisory rebalance monitor
//! - [`inference`]: per-tenant rule registries driven to a fixpoint by a
//!   worker pool
//! - [`agents`]: autonomous agents run periodically in priority order
//!   with bounded deadlines
//! - [`pipeline`]: staged workflows over a tenant's atomspace
//! - [`runtime`]: the facade tying tenants to engines, agents, and
//!   pipelines
//!
//! Everything is in-memory; persistence and the HTTP surface live
//! outside this crate.

pub mod agents;
pub mod atom;
pub mod atomspace;
pub mod cancel;
pub mod config;
pub mod error;
pub mod inference;
pub mod pipeline;
pub mod runtime;
pub mod shard;
pub mod sharding;
pub mod telemetry;
pub mod types;

pub use atom::Atom;
pub use atomspace::TenantAtomSpace;
pub use cancel::CancelToken;
pub use config::CoreConfig;
pub use error::{CoreError, CoreResult};
pub use runtime::{CognitiveRuntime, Health, RuntimeStats};
pub use types::{AtomType, AttentionValue, TruthValue};
