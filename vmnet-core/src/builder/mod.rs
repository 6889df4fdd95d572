//! Builders turning a topology and a workload into constrained models.
//!
//! - [`build_vm_model`]: stage one, VM placement.
//! - [`build_path_model`]: stage two, routing between the placed VMs.
//! - [`build_full_model`]: both stages in a single joint model.

mod full;
mod path;
mod vm;

pub use full::{build_full_model, FullModelBuilder};
pub use path::{build_path_model, decode_routes, PathModelBuilder};
pub use vm::{build_vm_model, decode_placement, VmModelBuilder};

use crate::error::{ModelError, ModelResult};
use crate::ids::{FlowId, LinkId, NodeId};
use crate::model::{ConstrainedModel, ConstraintKind, Expr, Sense, VarId, VarKey};
use crate::topology::{Direction, Tree};
use crate::workload::FlowDemand;

/// Placement objective.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum PlacementCost {
    /// Idle power of every switched-on node plus dynamic power per unit of
    /// compute placed on it.
    #[default]
    Power,

    /// Cost per unit of compute placed on a node of each tier (root first).
    TierWeighted(Vec<f64>),
}

impl PlacementCost {
    fn validate(&self, tree: &Tree) -> ModelResult<()> {
        if let PlacementCost::TierWeighted(per_tier) = self {
            if per_tier.len() != tree.depth() + 1 {
                return Err(ModelError::Configuration(format!(
                    "{} tier costs given for {} tiers",
                    per_tier.len(),
                    tree.depth() + 1
                )));
            }
            if per_tier.iter().any(|c| !c.is_finite()) {
                return Err(ModelError::Configuration(
                    "tier costs must be finite".into(),
                ));
            }
        }
        Ok(())
    }

    /// Objective coefficient of placing `compute` units on `node`.
    fn placement_coef(&self, tree: &Tree, node: NodeId, compute: f64) -> ModelResult<f64> {
        let n = tree.node(node)?;
        Ok(match self {
            PlacementCost::Power => n.dynamic_power * compute,
            PlacementCost::TierWeighted(per_tier) => per_tier[n.tier] * compute,
        })
    }

    fn charges_idle_power(&self) -> bool {
        matches!(self, PlacementCost::Power)
    }
}

/// Route variable ids laid out as `[flow][link][direction]`.
struct RouteVars {
    num_links: usize,
    ids: Vec<VarId>,
}

impl RouteVars {
    fn add(model: &mut ConstrainedModel, num_flows: usize, tree: &Tree) -> ModelResult<Self> {
        let num_links = tree.num_links();
        let mut ids = Vec::with_capacity(num_flows * num_links * 2);
        for f in 0..num_flows {
            for l in 0..num_links {
                for dir in Direction::BOTH {
                    ids.push(model.add_binary(VarKey::Route {
                        flow: FlowId(f),
                        link: LinkId(l),
                        dir,
                    })?);
                }
            }
        }
        Ok(Self { num_links, ids })
    }

    fn get(&self, flow: FlowId, link: LinkId, dir: Direction) -> VarId {
        let d = match dir {
            Direction::Up => 0,
            Direction::Down => 1,
        };
        self.ids[(flow.0 * self.num_links + link.0) * 2 + d]
    }

    /// Net outflow of `flow` at `node`: routes leaving minus routes entering.
    fn net_outflow(&self, tree: &Tree, flow: FlowId, node: NodeId) -> ModelResult<Expr> {
        let mut e = Expr::new();
        for l in tree.incident_links(node)? {
            let Some(link) = tree.link(l) else { continue };
            for dir in Direction::BOTH {
                let v = self.get(flow, l, dir);
                if link.source(dir) == node {
                    e.add_term(v, 1.0);
                } else if link.target(dir) == node {
                    e.add_term(v, -1.0);
                }
            }
        }
        Ok(e)
    }
}

/// Link activation variables, one per link.
fn add_link_active(model: &mut ConstrainedModel, tree: &Tree) -> ModelResult<Vec<VarId>> {
    (0..tree.num_links())
        .map(|l| model.add_binary(VarKey::LinkActive { link: LinkId(l) }))
        .collect()
}

/// `Σ_f rate_f · (up + down) − bandwidth · on ≤ 0` for every link.
fn add_link_capacity(
    model: &mut ConstrainedModel,
    tree: &Tree,
    flows: &[FlowDemand],
    routes: &RouteVars,
    link_active: &[VarId],
) -> ModelResult<()> {
    for link in tree.links() {
        let mut e = Expr::new();
        for (f, flow) in flows.iter().enumerate() {
            for dir in Direction::BOTH {
                e.add_term(routes.get(FlowId(f), link.id, dir), flow.data_rate);
            }
        }
        e.add_term(link_active[link.id.0], -link.bandwidth);
        model.add_constraint(
            format!("bw-{}", link.id),
            ConstraintKind::LinkCapacity,
            e,
            Sense::Le,
            0.0,
        )?;
    }
    Ok(())
}

/// `on_l − s_n ≤ 0` for link `l` and endpoint `n`.
fn add_activation(
    model: &mut ConstrainedModel,
    link: LinkId,
    link_var: VarId,
    node: NodeId,
    node_var: VarId,
) -> ModelResult<()> {
    model.add_constraint(
        format!("act-{}-{}", link, node),
        ConstraintKind::LinkActivation,
        Expr::linear([(link_var, 1.0), (node_var, -1.0)]),
        Sense::Le,
        0.0,
    )?;
    Ok(())
}
