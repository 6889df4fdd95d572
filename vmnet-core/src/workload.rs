//! VM and flow demands.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::error::{ModelError, ModelResult};
use crate::ids::{FlowId, NodeId, VmId};
use crate::topology::Tree;

/// Resource demand of one virtual machine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VmDemand {
    /// Compute demand.
    pub compute: f64,
    /// Memory demand.
    pub memory: f64,
}

impl VmDemand {
    /// Demand with only a compute component.
    pub fn compute(compute: f64) -> Self {
        Self {
            compute,
            memory: 0.0,
        }
    }
}

/// Traffic demand between two VMs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowDemand {
    /// Sending VM.
    pub src: VmId,
    /// Receiving VM.
    pub dst: VmId,
    /// Data rate carried on every link of the path.
    pub data_rate: f64,
}

/// Complete demand set of one problem instance.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Workload {
    /// VM demands, indexed by `VmId`.
    pub vms: Vec<VmDemand>,
    /// Flow demands, indexed by `FlowId`.
    pub flows: Vec<FlowDemand>,
}

impl Workload {
    /// Create a workload, checking that every flow references existing VMs
    /// and that all demands are finite and non-negative.
    pub fn new(vms: Vec<VmDemand>, flows: Vec<FlowDemand>) -> ModelResult<Self> {
        let w = Self { vms, flows };
        w.validate()?;
        Ok(w)
    }

    /// Check demands and flow endpoints.
    pub fn validate(&self) -> ModelResult<()> {
        validate_vms(&self.vms)?;
        validate_flows(&self.flows, self.vms.len())
    }

    /// Number of VMs.
    pub fn num_vms(&self) -> usize {
        self.vms.len()
    }

    /// Number of flows.
    pub fn num_flows(&self) -> usize {
        self.flows.len()
    }

    /// Iterate over flows with their ids.
    pub fn flows(&self) -> impl Iterator<Item = (FlowId, &FlowDemand)> {
        self.flows.iter().enumerate().map(|(i, f)| (FlowId(i), f))
    }
}

pub(crate) fn validate_vms(vms: &[VmDemand]) -> ModelResult<()> {
    for (i, vm) in vms.iter().enumerate() {
        for (name, value) in [("compute", vm.compute), ("memory", vm.memory)] {
            if !value.is_finite() || value < 0.0 {
                return Err(ModelError::Configuration(format!(
                    "{} has invalid {} demand: {}",
                    VmId(i),
                    name,
                    value
                )));
            }
        }
    }
    Ok(())
}

pub(crate) fn validate_flows(flows: &[FlowDemand], num_vms: usize) -> ModelResult<()> {
    for (i, flow) in flows.iter().enumerate() {
        if !flow.data_rate.is_finite() || flow.data_rate < 0.0 {
            return Err(ModelError::Configuration(format!(
                "{} has invalid data rate: {}",
                FlowId(i),
                flow.data_rate
            )));
        }
        for vm in [flow.src, flow.dst] {
            if vm.0 >= num_vms {
                return Err(ModelError::Configuration(format!(
                    "{} references {} but only {} VMs exist",
                    FlowId(i),
                    vm,
                    num_vms
                )));
            }
        }
    }
    Ok(())
}

/// Workload generator.
///
/// One VM per leaf server, CPU demand `server_capacity / 2 + 1` (so a server
/// fits a single VM), and flows pairing consecutive VMs. With a seed, demands
/// and rates are drawn around those values and the pairing is shuffled.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadConfig {
    /// Compute capacity the demands are derived from.
    pub server_capacity: u32,

    /// Memory demand of every VM.
    pub vm_memory: f64,

    /// Average data rate per flow.
    pub datarate_avg: u32,

    /// Number of VMs (`None` = one per leaf).
    pub vms: Option<usize>,

    /// Seed for randomized demands (`None` = deterministic defaults).
    pub seed: Option<u64>,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            server_capacity: 10,
            vm_memory: 0.0,
            datarate_avg: 4,
            vms: None,
            seed: None,
        }
    }
}

impl WorkloadConfig {
    /// Set the seed for randomized demands.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Set the number of VMs.
    pub fn with_vms(mut self, vms: usize) -> Self {
        self.vms = Some(vms);
        self
    }

    /// Generate the workload for `tree`.
    pub fn generate(&self, tree: &Tree) -> ModelResult<Workload> {
        let num_vms = self.vms.unwrap_or_else(|| tree.leaves().count());
        let num_flows = num_vms.div_ceil(2);
        let half = self.server_capacity / 2;

        let mut order: Vec<usize> = (0..num_vms).collect();
        let (cpu, rates) = match self.seed {
            Some(seed) => {
                let mut rng = StdRng::seed_from_u64(seed);
                let low = half + 1;
                let high = self.server_capacity.saturating_sub(1).max(low);
                let cpu: Vec<f64> = (0..num_vms)
                    .map(|_| rng.random_range(low..=high) as f64)
                    .collect();
                let rate_low = self.datarate_avg.saturating_sub(1);
                let rates: Vec<f64> = (0..num_flows)
                    .map(|_| rng.random_range(rate_low..=self.datarate_avg + 1) as f64)
                    .collect();
                order.shuffle(&mut rng);
                (cpu, rates)
            }
            None => (
                vec![(half + 1) as f64; num_vms],
                vec![self.datarate_avg as f64; num_flows],
            ),
        };

        let vms = cpu
            .into_iter()
            .map(|c| VmDemand {
                compute: c,
                memory: self.vm_memory,
            })
            .collect();

        // With an odd VM count the last flow wraps to the first VM of the order
        let flows = (0..num_flows)
            .map(|f| FlowDemand {
                src: VmId(order[2 * f]),
                dst: VmId(order[(2 * f + 1) % num_vms]),
                data_rate: rates[f],
            })
            .collect();

        Workload::new(vms, flows)
    }
}

/// Decoded stage-one result: the host node of every VM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmPlacement {
    hosts: Vec<NodeId>,
}

impl VmPlacement {
    /// Create a placement from host nodes indexed by `VmId`.
    pub fn new(hosts: Vec<NodeId>) -> Self {
        Self { hosts }
    }

    /// Host of a VM.
    pub fn host(&self, vm: VmId) -> Option<NodeId> {
        self.hosts.get(vm.0).copied()
    }

    /// All hosts, indexed by `VmId`.
    pub fn hosts(&self) -> &[NodeId] {
        &self.hosts
    }

    /// Number of placed VMs.
    pub fn num_vms(&self) -> usize {
        self.hosts.len()
    }

    /// Check whether any VM runs on `node`.
    pub fn hosts_any(&self, node: NodeId) -> bool {
        self.hosts.contains(&node)
    }

    /// Check the placement against a tree and a VM count.
    pub fn validate(&self, tree: &Tree, num_vms: usize) -> ModelResult<()> {
        if self.hosts.len() < num_vms {
            return Err(ModelError::Dependency(format!(
                "placement covers {} VMs but {} are referenced",
                self.hosts.len(),
                num_vms
            )));
        }
        if let Some((vm, node)) = self
            .hosts
            .iter()
            .enumerate()
            .find(|(_, n)| !tree.contains(**n))
        {
            return Err(ModelError::Dependency(format!(
                "placement puts {} on {} which is not in the tree",
                VmId(vm),
                node
            )));
        }
        Ok(())
    }
}
