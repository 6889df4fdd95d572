//! vmnet-core: tree topologies, workloads and constrained quadratic models
//! for two-stage VM placement and path routing.
//!
//! The crate builds problems; it never solves them. Solving lives in
//! `vmnet-hybrid`, which either hands a [`ConstrainedModel`] to an exact
//! backend or compiles it into an unconstrained penalty model for a sampler.
//!
//! # Example
//!
//! ```
//! use vmnet_core::{build_vm_model, TopologyConfig, WorkloadConfig};
//!
//! let tree = TopologyConfig::binary(2, 10.0, 5.0, 10.0, 2.0).build()?;
//! let workload = WorkloadConfig::default().generate(&tree)?;
//! let model = build_vm_model(&tree, &workload.vms)?;
//!
//! assert_eq!(model.num_constraints(), workload.num_vms() + 2 * tree.num_nodes());
//! # Ok::<(), vmnet_core::ModelError>(())
//! ```

#![warn(missing_docs)]

pub mod assignment;
pub mod builder;
pub mod error;
pub mod ids;
pub mod model;
pub mod topology;
pub mod workload;

pub use assignment::Assignment;
pub use builder::{
    build_full_model, build_path_model, build_vm_model, decode_placement, decode_routes,
    FullModelBuilder, PathModelBuilder, PlacementCost, VmModelBuilder,
};
pub use error::{ModelError, ModelResult};
pub use ids::{FlowId, LinkId, NodeId, VmId};
pub use model::{
    ConstrainedModel, Constraint, ConstraintKind, Expr, ModelStats, Sense, VarId, VarKey, VarKind,
    Variable,
};
pub use topology::{Direction, Link, Node, TierRule, TopologyConfig, Tree};
pub use workload::{FlowDemand, VmDemand, VmPlacement, Workload, WorkloadConfig};
