//! Joint placement and routing model.

use super::vm::{
    add_assignment, add_node_active, add_node_capacity, add_placement, add_placement_objective,
};
use super::{add_activation, add_link_active, add_link_capacity, PlacementCost, RouteVars};
use crate::error::ModelResult;
use crate::ids::FlowId;
use crate::model::{ConstrainedModel, ConstraintKind, Expr, Sense};
use crate::topology::{Direction, Tree};
use crate::workload::Workload;

/// Build the joint model with the default power objective.
pub fn build_full_model(tree: &Tree, workload: &Workload) -> ModelResult<ConstrainedModel> {
    FullModelBuilder::new(tree, workload).build()
}

/// Joint model builder.
///
/// Same placement block as the VM model. Flow conservation uses the
/// placement variables instead of a fixed placement:
/// `out(f, n) − in(f, n) − x(src_f, n) + x(dst_f, n) = 0`.
/// Every link needs both endpoints on.
pub struct FullModelBuilder<'a> {
    tree: &'a Tree,
    workload: &'a Workload,
    cost: PlacementCost,
}

impl<'a> FullModelBuilder<'a> {
    /// Create a builder.
    pub fn new(tree: &'a Tree, workload: &'a Workload) -> Self {
        Self {
            tree,
            workload,
            cost: PlacementCost::default(),
        }
    }

    /// Use a different placement objective.
    pub fn with_cost(mut self, cost: PlacementCost) -> Self {
        self.cost = cost;
        self
    }

    /// Build the model.
    pub fn build(&self) -> ModelResult<ConstrainedModel> {
        self.workload.validate()?;
        self.cost.validate(self.tree)?;

        let tree = self.tree;
        let vms = &self.workload.vms;
        let flows = &self.workload.flows;
        let mut model = ConstrainedModel::new("full_model");

        let active = add_node_active(&mut model, tree)?;
        let placement = add_placement(&mut model, tree, vms.len())?;
        let routes = RouteVars::add(&mut model, flows.len(), tree)?;
        let link_active = add_link_active(&mut model, tree)?;

        let mut objective = Expr::new();
        add_placement_objective(&mut objective, tree, vms, &self.cost, &active, &placement)?;
        for link in tree.links() {
            let hop_cost = tree.nodes()[link.parent.0].dynamic_power
                + tree.nodes()[link.child.0].dynamic_power;
            for f in 0..flows.len() {
                for dir in Direction::BOTH {
                    objective.add_term(routes.get(FlowId(f), link.id, dir), hop_cost);
                }
            }
        }
        model.set_objective(objective)?;

        add_assignment(&mut model, tree, &placement)?;
        add_node_capacity(&mut model, tree, vms, &active, &placement)?;

        for (f, flow) in flows.iter().enumerate() {
            let flow_id = FlowId(f);
            for n in tree.nodes() {
                let mut e = routes.net_outflow(tree, flow_id, n.id)?;
                e.add_term(placement[flow.src.0][n.id.0], -1.0);
                e.add_term(placement[flow.dst.0][n.id.0], 1.0);
                model.add_constraint(
                    format!("flow-{}-{}", flow_id, n.id),
                    ConstraintKind::FlowConservation,
                    e,
                    Sense::Eq,
                    0.0,
                )?;
            }
        }

        add_link_capacity(&mut model, tree, flows, &routes, &link_active)?;

        for link in tree.links() {
            for endpoint in [link.parent, link.child] {
                add_activation(
                    &mut model,
                    link.id,
                    link_active[link.id.0],
                    endpoint,
                    active[endpoint.0],
                )?;
            }
        }

        log::debug!("Full model: {}", model.stats());
        Ok(model)
    }
}
