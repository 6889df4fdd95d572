//! Stage two: path planning model.

use super::{add_activation, add_link_active, add_link_capacity, RouteVars};
use crate::assignment::Assignment;
use crate::error::{ModelError, ModelResult};
use crate::ids::{FlowId, LinkId, NodeId, VmId};
use crate::model::{ConstrainedModel, ConstraintKind, Expr, Sense, VarId, VarKey};
use crate::topology::{Direction, Tree};
use crate::workload::{validate_flows, FlowDemand, VmPlacement};

/// Build the routing model for a solved placement.
pub fn build_path_model(
    tree: &Tree,
    placement: &VmPlacement,
    flows: &[FlowDemand],
) -> ModelResult<ConstrainedModel> {
    PathModelBuilder::new(tree, flows)
        .with_placement(placement)
        .build()
}

/// Routing model builder.
///
/// Routing needs fixed endpoints, so [`PathModelBuilder::build`] fails with
/// [`ModelError::Dependency`] until a placement has been supplied.
///
/// Nodes that host no VM are relays: they get a switch variable `s(n)`, pay
/// idle power when on, and dynamic power for every routed hop touching them.
/// Hosting nodes are already on from stage one.
pub struct PathModelBuilder<'a> {
    tree: &'a Tree,
    flows: &'a [FlowDemand],
    placement: Option<&'a VmPlacement>,
}

impl<'a> PathModelBuilder<'a> {
    /// Create a builder without a placement.
    pub fn new(tree: &'a Tree, flows: &'a [FlowDemand]) -> Self {
        Self {
            tree,
            flows,
            placement: None,
        }
    }

    /// Supply the stage-one placement.
    pub fn with_placement(mut self, placement: &'a VmPlacement) -> Self {
        self.placement = Some(placement);
        self
    }

    /// Build the model.
    pub fn build(&self) -> ModelResult<ConstrainedModel> {
        let placement = self.placement.ok_or_else(|| {
            ModelError::Dependency("path model requested before a VM placement exists".into())
        })?;
        let referenced = self
            .flows
            .iter()
            .map(|f| f.src.0.max(f.dst.0) + 1)
            .max()
            .unwrap_or(0);
        placement.validate(self.tree, referenced)?;
        validate_flows(self.flows, placement.num_vms())?;

        let tree = self.tree;
        let mut model = ConstrainedModel::new("path_model");

        let routes = RouteVars::add(&mut model, self.flows.len(), tree)?;
        let link_active = add_link_active(&mut model, tree)?;
        let mut relay: Vec<Option<VarId>> = vec![None; tree.num_nodes()];
        for n in tree.nodes() {
            if !placement.hosts_any(n.id) {
                relay[n.id.0] = Some(model.add_binary(VarKey::NodeActive { node: n.id })?);
            }
        }

        let mut objective = Expr::new();
        for n in tree.nodes() {
            if let Some(s) = relay[n.id.0] {
                objective.add_term(s, n.idle_power);
            }
        }
        for link in tree.links() {
            let hop_cost: f64 = [link.parent, link.child]
                .iter()
                .filter(|e| relay[e.0].is_some())
                .map(|e| tree.nodes()[e.0].dynamic_power)
                .sum();
            if hop_cost == 0.0 {
                continue;
            }
            for f in 0..self.flows.len() {
                for dir in Direction::BOTH {
                    objective.add_term(routes.get(FlowId(f), link.id, dir), hop_cost);
                }
            }
        }
        model.set_objective(objective)?;

        for (f, flow) in self.flows.iter().enumerate() {
            let flow_id = FlowId(f);
            let src = host_of(placement, flow.src)?;
            let dst = host_of(placement, flow.dst)?;
            for n in tree.nodes() {
                let mut supply = 0.0;
                if n.id == src {
                    supply += 1.0;
                }
                if n.id == dst {
                    supply -= 1.0;
                }
                model.add_constraint(
                    format!("flow-{}-{}", flow_id, n.id),
                    ConstraintKind::FlowConservation,
                    routes.net_outflow(tree, flow_id, n.id)?,
                    Sense::Eq,
                    supply,
                )?;
            }
        }

        add_link_capacity(&mut model, tree, self.flows, &routes, &link_active)?;

        for link in tree.links() {
            for endpoint in [link.parent, link.child] {
                if let Some(s) = relay[endpoint.0] {
                    add_activation(&mut model, link.id, link_active[link.id.0], endpoint, s)?;
                }
            }
        }

        log::debug!("Path model: {}", model.stats());
        Ok(model)
    }
}

fn host_of(placement: &VmPlacement, vm: VmId) -> ModelResult<NodeId> {
    placement
        .host(vm)
        .ok_or_else(|| ModelError::Dependency(format!("{} has no host", vm)))
}

/// Links carrying each flow in a routing (or full model) assignment.
///
/// Returns, per flow, the `(link, direction)` pairs whose route variable is
/// set, in link order. A link set in both directions carries no net flow and
/// is left out.
pub fn decode_routes(
    tree: &Tree,
    num_flows: usize,
    assignment: &Assignment,
) -> Vec<Vec<(LinkId, Direction)>> {
    (0..num_flows)
        .map(|f| {
            let used = |link: LinkId, dir: Direction| {
                assignment
                    .get(&VarKey::Route {
                        flow: FlowId(f),
                        link,
                        dir,
                    })
                    .is_some_and(|x| x.round() == 1.0)
            };
            tree.links()
                .iter()
                .flat_map(|l| Direction::BOTH.map(|d| (l.id, d)))
                .filter(|&(link, dir)| used(link, dir) && !used(link, dir.opposite()))
                .collect()
        })
        .collect()
}
