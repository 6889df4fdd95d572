//! Stage one: VM placement model.

use super::PlacementCost;
use crate::assignment::Assignment;
use crate::error::{ModelError, ModelResult};
use crate::ids::{NodeId, VmId};
use crate::model::{ConstrainedModel, ConstraintKind, Expr, Sense, VarId, VarKey};
use crate::topology::Tree;
use crate::workload::{validate_vms, VmDemand, VmPlacement};

/// Build the placement model with the default power objective.
pub fn build_vm_model(tree: &Tree, vms: &[VmDemand]) -> ModelResult<ConstrainedModel> {
    VmModelBuilder::new(tree, vms).build()
}

/// Placement model builder.
///
/// Variables: `x(vm, n)` for every VM and node, `s(n)` for every node.
/// Constraints: `Σ_n x(vm, n) = 1` per VM, and per node and resource
/// `Σ_vm demand · x(vm, n) − capacity · s(n) ≤ 0`.
pub struct VmModelBuilder<'a> {
    tree: &'a Tree,
    vms: &'a [VmDemand],
    cost: PlacementCost,
}

impl<'a> VmModelBuilder<'a> {
    /// Create a builder.
    pub fn new(tree: &'a Tree, vms: &'a [VmDemand]) -> Self {
        Self {
            tree,
            vms,
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
        validate_vms(self.vms)?;
        self.cost.validate(self.tree)?;

        let mut model = ConstrainedModel::new("vm_model");
        let active = add_node_active(&mut model, self.tree)?;
        let placement = add_placement(&mut model, self.tree, self.vms.len())?;

        let mut objective = Expr::new();
        add_placement_objective(
            &mut objective,
            self.tree,
            self.vms,
            &self.cost,
            &active,
            &placement,
        )?;
        model.set_objective(objective)?;

        add_assignment(&mut model, self.tree, &placement)?;
        add_node_capacity(&mut model, self.tree, self.vms, &active, &placement)?;

        log::debug!("VM model: {}", model.stats());
        Ok(model)
    }
}

/// `s(n)` for every node.
pub(super) fn add_node_active(
    model: &mut ConstrainedModel,
    tree: &Tree,
) -> ModelResult<Vec<VarId>> {
    tree.nodes()
        .iter()
        .map(|n| model.add_binary(VarKey::NodeActive { node: n.id }))
        .collect()
}

/// `x(vm, n)` for every VM and node, laid out as `[vm][node]`.
pub(super) fn add_placement(
    model: &mut ConstrainedModel,
    tree: &Tree,
    num_vms: usize,
) -> ModelResult<Vec<Vec<VarId>>> {
    (0..num_vms)
        .map(|vm| {
            tree.nodes()
                .iter()
                .map(|n| {
                    model.add_binary(VarKey::Placement {
                        vm: VmId(vm),
                        node: n.id,
                    })
                })
                .collect()
        })
        .collect()
}

pub(super) fn add_placement_objective(
    objective: &mut Expr,
    tree: &Tree,
    vms: &[VmDemand],
    cost: &PlacementCost,
    active: &[VarId],
    placement: &[Vec<VarId>],
) -> ModelResult<()> {
    if cost.charges_idle_power() {
        for n in tree.nodes() {
            objective.add_term(active[n.id.0], n.idle_power);
        }
    }
    for (vm, row) in placement.iter().enumerate() {
        for (n, &var) in row.iter().enumerate() {
            let coef = cost.placement_coef(tree, NodeId(n), vms[vm].compute)?;
            objective.add_term(var, coef);
        }
    }
    Ok(())
}

/// Every VM lands on exactly one node.
pub(super) fn add_assignment(
    model: &mut ConstrainedModel,
    tree: &Tree,
    placement: &[Vec<VarId>],
) -> ModelResult<()> {
    debug_assert!(placement.iter().all(|row| row.len() == tree.num_nodes()));
    for (vm, row) in placement.iter().enumerate() {
        model.add_constraint(
            format!("assign-{}", VmId(vm)),
            ConstraintKind::Assignment,
            Expr::linear(row.iter().map(|&v| (v, 1.0))),
            Sense::Eq,
            1.0,
        )?;
    }
    Ok(())
}

/// Compute and memory demand fit every switched-on node.
pub(super) fn add_node_capacity(
    model: &mut ConstrainedModel,
    tree: &Tree,
    vms: &[VmDemand],
    active: &[VarId],
    placement: &[Vec<VarId>],
) -> ModelResult<()> {
    for node in tree.nodes() {
        let n = node.id.0;
        let dims = [
            ("cpu", node.compute, vms.iter().map(|v| v.compute).collect::<Vec<_>>()),
            ("mem", node.memory, vms.iter().map(|v| v.memory).collect()),
        ];
        for (name, capacity, demand) in dims {
            let mut e = Expr::new();
            for (vm, d) in demand.iter().enumerate() {
                e.add_term(placement[vm][n], *d);
            }
            e.add_term(active[n], -capacity);
            model.add_constraint(
                format!("{}-{}", name, node.id),
                ConstraintKind::Capacity,
                e,
                Sense::Le,
                0.0,
            )?;
        }
    }
    Ok(())
}

/// Read the host of every VM out of a solved placement model assignment.
///
/// Each VM must have exactly one placement variable set; anything else means
/// the assignment is not a usable stage-one result.
pub fn decode_placement(
    tree: &Tree,
    num_vms: usize,
    assignment: &Assignment,
) -> ModelResult<VmPlacement> {
    let mut hosts = Vec::with_capacity(num_vms);
    for vm in 0..num_vms {
        let vm = VmId(vm);
        let mut chosen = tree.nodes().iter().filter(|n| {
            assignment
                .get(&VarKey::Placement { vm, node: n.id })
                .is_some_and(|x| x.round() == 1.0)
        });
        match (chosen.next(), chosen.next()) {
            (Some(n), None) => hosts.push(n.id),
            (None, _) => {
                return Err(ModelError::Dependency(format!("{} is not placed", vm)));
            }
            (Some(a), Some(b)) => {
                return Err(ModelError::Dependency(format!(
                    "{} is placed on both {} and {}",
                    vm, a.id, b.id
                )));
            }
        }
    }
    Ok(VmPlacement::new(hosts))
}
