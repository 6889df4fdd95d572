//! Tree-shaped network topology.
//!
//! Nodes are laid out breadth-first: the root is node 0, then every node of
//! tier 1, then tier 2, and so on. Every non-root node `n` owns exactly one
//! uplink, whose id is `n - 1`. This numbering makes the tree invariant hold by
//! construction: `links = nodes - 1` and every node reaches the root.

use std::ops::Range;

use crate::error::{ModelError, ModelResult};
use crate::ids::{LinkId, NodeId};

/// Resource and power rule for every node of one tier, plus the uplink that
/// connects that tier's nodes to their parents.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierRule {
    /// Compute capacity of each node in the tier.
    pub compute: f64,

    /// Memory capacity of each node in the tier.
    pub memory: f64,

    /// Power drawn by a node that is switched on.
    pub idle_power: f64,

    /// Power drawn per unit of load carried by the node.
    pub dynamic_power: f64,

    /// Bandwidth of the link towards the parent (ignored on the root tier).
    pub uplink_bandwidth: f64,

    /// Latency of the link towards the parent (ignored on the root tier).
    pub uplink_latency: f64,
}

impl TierRule {
    fn validate(&self, tier: usize) -> ModelResult<()> {
        let fields = [
            ("compute", self.compute),
            ("memory", self.memory),
            ("idle_power", self.idle_power),
            ("dynamic_power", self.dynamic_power),
            ("uplink_bandwidth", self.uplink_bandwidth),
            ("uplink_latency", self.uplink_latency),
        ];
        for (name, value) in fields {
            if !value.is_finite() || value < 0.0 {
                return Err(ModelError::Configuration(format!(
                    "tier {} has invalid {}: {}",
                    tier, name, value
                )));
            }
        }
        Ok(())
    }
}

/// Shape and capacity rules of a tree.
#[derive(Debug, Clone, PartialEq)]
pub struct TopologyConfig {
    /// Children per node for each tier transition (`branching[t]` is the
    /// fan-out of tier `t` nodes). Length must be `tiers.len() - 1`.
    pub branching: Vec<usize>,

    /// One rule per tier, root first.
    pub tiers: Vec<TierRule>,
}

impl TopologyConfig {
    /// Create a configuration from explicit branching factors and tier rules.
    pub fn new(branching: Vec<usize>, tiers: Vec<TierRule>) -> Self {
        Self { branching, tiers }
    }

    /// Binary tree of the given depth with per-tier decreasing capacities.
    ///
    /// Only the leaf tier (the servers) has compute and memory capacity.
    /// Links start at `link_capacity * depth` below the root and shrink by 2
    /// per tier; idle power starts at `idle_power * depth` and shrinks by 5 per
    /// tier; dynamic power starts at `dynamic_power * depth` and shrinks by 1.
    pub fn binary(
        depth: usize,
        server_capacity: f64,
        link_capacity: f64,
        idle_power: f64,
        dynamic_power: f64,
    ) -> Self {
        const LINK_DECREASE: f64 = 2.0;
        const IDLE_DECREASE: f64 = 5.0;
        const DYN_DECREASE: f64 = 1.0;

        let scale = depth as f64;
        let tiers = (0..=depth)
            .map(|tier| {
                let t = tier as f64;
                let is_leaf = tier == depth;
                TierRule {
                    compute: if is_leaf { server_capacity } else { 0.0 },
                    memory: if is_leaf { server_capacity } else { 0.0 },
                    idle_power: (idle_power * scale - IDLE_DECREASE * t).max(0.0),
                    dynamic_power: (dynamic_power * scale - DYN_DECREASE * t).max(0.0),
                    uplink_bandwidth: if tier == 0 {
                        0.0
                    } else {
                        (link_capacity * scale - LINK_DECREASE * (t - 1.0)).max(0.0)
                    },
                    uplink_latency: if tier == 0 { 0.0 } else { 1.0 },
                }
            })
            .collect();

        Self {
            branching: vec![2; depth],
            tiers,
        }
    }

    /// Number of tiers, root included.
    pub fn levels(&self) -> usize {
        self.tiers.len()
    }

    /// Check the shape and the capacity rules.
    pub fn validate(&self) -> ModelResult<()> {
        if self.tiers.is_empty() {
            return Err(ModelError::Configuration(
                "topology needs at least one tier".into(),
            ));
        }
        if self.branching.len() + 1 != self.tiers.len() {
            return Err(ModelError::Configuration(format!(
                "{} branching factors given for {} tiers (expected {})",
                self.branching.len(),
                self.tiers.len(),
                self.tiers.len() - 1
            )));
        }
        if let Some(tier) = self.branching.iter().position(|&b| b == 0) {
            return Err(ModelError::Configuration(format!(
                "branching factor of tier {} must be at least 1",
                tier
            )));
        }
        for (tier, rule) in self.tiers.iter().enumerate() {
            rule.validate(tier)?;
        }
        Ok(())
    }

    /// Build the tree described by this configuration.
    pub fn build(&self) -> ModelResult<Tree> {
        Tree::build(self)
    }
}

/// Build a tree from a tier count, branching factors and tier rules.
pub fn build(levels: usize, branching: &[usize], rules: &[TierRule]) -> ModelResult<Tree> {
    if levels != rules.len() {
        return Err(ModelError::Configuration(format!(
            "{} tier rules given for {} levels",
            rules.len(),
            levels
        )));
    }
    TopologyConfig::new(branching.to_vec(), rules.to_vec()).build()
}

/// A network node (switch or server).
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Node id.
    pub id: NodeId,

    /// Tier in the tree (root = 0).
    pub tier: usize,

    /// Compute capacity.
    pub compute: f64,

    /// Memory capacity.
    pub memory: f64,

    /// Power drawn when switched on.
    pub idle_power: f64,

    /// Power drawn per unit of load.
    pub dynamic_power: f64,
}

/// Traversal direction of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Direction {
    /// Child towards parent.
    Up,
    /// Parent towards child.
    Down,
}

impl Direction {
    /// Both directions, `Up` first.
    pub const BOTH: [Direction; 2] = [Direction::Up, Direction::Down];

    /// The other direction.
    pub fn opposite(self) -> Direction {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
        }
    }
}

/// A link between a node and its parent.
#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    /// Link id.
    pub id: LinkId,

    /// Upper endpoint.
    pub parent: NodeId,

    /// Lower endpoint.
    pub child: NodeId,

    /// Bandwidth capacity.
    pub bandwidth: f64,

    /// Latency.
    pub latency: f64,
}

impl Link {
    /// Endpoints as `(parent, child)`.
    pub fn endpoints(&self) -> (NodeId, NodeId) {
        (self.parent, self.child)
    }

    /// Node the traffic leaves when traversing in `dir`.
    pub fn source(&self, dir: Direction) -> NodeId {
        match dir {
            Direction::Up => self.child,
            Direction::Down => self.parent,
        }
    }

    /// Node the traffic enters when traversing in `dir`.
    pub fn target(&self, dir: Direction) -> NodeId {
        match dir {
            Direction::Up => self.parent,
            Direction::Down => self.child,
        }
    }

    /// Check whether `node` is an endpoint.
    pub fn touches(&self, node: NodeId) -> bool {
        self.parent == node || self.child == node
    }
}

/// Immutable tree topology.
#[derive(Debug, Clone)]
pub struct Tree {
    nodes: Vec<Node>,
    links: Vec<Link>,
    children: Vec<Vec<NodeId>>,
    tiers: Vec<Range<usize>>,
}

impl Tree {
    /// Build the tree described by `config`.
    pub fn build(config: &TopologyConfig) -> ModelResult<Self> {
        config.validate()?;

        let mut nodes = Vec::new();
        let mut links = Vec::new();
        let mut children: Vec<Vec<NodeId>> = Vec::new();
        let mut tiers = Vec::with_capacity(config.levels());

        let root = &config.tiers[0];
        nodes.push(Node {
            id: NodeId(0),
            tier: 0,
            compute: root.compute,
            memory: root.memory,
            idle_power: root.idle_power,
            dynamic_power: root.dynamic_power,
        });
        children.push(Vec::new());
        tiers.push(0..1);

        for (tier, rule) in config.tiers.iter().enumerate().skip(1) {
            let fan_out = config.branching[tier - 1];
            let parents = tiers[tier - 1].clone();
            let start = nodes.len();
            for parent in parents {
                for _ in 0..fan_out {
                    let id = NodeId(nodes.len());
                    nodes.push(Node {
                        id,
                        tier,
                        compute: rule.compute,
                        memory: rule.memory,
                        idle_power: rule.idle_power,
                        dynamic_power: rule.dynamic_power,
                    });
                    links.push(Link {
                        id: LinkId(id.0 - 1),
                        parent: NodeId(parent),
                        child: id,
                        bandwidth: rule.uplink_bandwidth,
                        latency: rule.uplink_latency,
                    });
                    children.push(Vec::new());
                    children[parent].push(id);
                }
            }
            tiers.push(start..nodes.len());
        }

        log::debug!(
            "Built tree: {} tiers, {} nodes, {} links",
            tiers.len(),
            nodes.len(),
            links.len()
        );

        Ok(Self {
            nodes,
            links,
            children,
            tiers,
        })
    }

    /// Number of nodes.
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Number of links.
    pub fn num_links(&self) -> usize {
        self.links.len()
    }

    /// Depth of the tree (number of tiers minus one).
    pub fn depth(&self) -> usize {
        self.tiers.len() - 1
    }

    /// All nodes in id order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// All links in id order.
    pub fn links(&self) -> &[Link] {
        &self.links
    }

    /// Look up a node.
    pub fn node(&self, id: NodeId) -> ModelResult<&Node> {
        self.nodes.get(id.0).ok_or(ModelError::UnknownNode(id))
    }

    /// Look up a link.
    pub fn link(&self, id: LinkId) -> Option<&Link> {
        self.links.get(id.0)
    }

    /// Check whether `id` is a node of this tree.
    pub fn contains(&self, id: NodeId) -> bool {
        id.0 < self.nodes.len()
    }

    /// Nodes adjacent to a link, as `(parent, child)`.
    pub fn link_nodes(&self, id: LinkId) -> Option<(NodeId, NodeId)> {
        self.link(id).map(Link::endpoints)
    }

    /// Parent of a node (`None` for the root).
    pub fn parent(&self, id: NodeId) -> ModelResult<Option<NodeId>> {
        self.node(id)?;
        Ok(self.uplink_unchecked(id).map(|l| self.links[l.0].parent))
    }

    /// Link towards the parent (`None` for the root).
    pub fn uplink(&self, id: NodeId) -> ModelResult<Option<LinkId>> {
        self.node(id)?;
        Ok(self.uplink_unchecked(id))
    }

    /// Children of a node.
    pub fn children(&self, id: NodeId) -> ModelResult<&[NodeId]> {
        self.node(id)?;
        Ok(&self.children[id.0])
    }

    /// Links touching a node: the uplink first (if any), then the child links.
    pub fn incident_links(&self, id: NodeId) -> ModelResult<Vec<LinkId>> {
        self.node(id)?;
        let mut out = Vec::with_capacity(self.children[id.0].len() + 1);
        out.extend(self.uplink_unchecked(id));
        out.extend(self.children[id.0].iter().map(|c| LinkId(c.0 - 1)));
        Ok(out)
    }

    /// Node ids of one tier.
    pub fn tier_nodes(&self, tier: usize) -> impl Iterator<Item = NodeId> + '_ {
        self.tiers
            .get(tier)
            .cloned()
            .unwrap_or(0..0)
            .map(NodeId)
    }

    /// Leaf nodes (deepest tier).
    pub fn leaves(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.tier_nodes(self.depth())
    }

    /// Ordered links from `a` to `b`. Empty when `a == b`.
    pub fn path(&self, a: NodeId, b: NodeId) -> ModelResult<Vec<LinkId>> {
        Ok(self.route(a, b)?.into_iter().map(|(l, _)| l).collect())
    }

    /// Ordered links from `a` to `b` with the direction each is traversed in.
    pub fn route(&self, a: NodeId, b: NodeId) -> ModelResult<Vec<(LinkId, Direction)>> {
        let tier_a = self.node(a)?.tier;
        let tier_b = self.node(b)?.tier;

        let mut up = Vec::with_capacity(tier_a);
        let mut down = Vec::with_capacity(tier_b);
        let (mut x, mut tx) = (a, tier_a);
        let (mut y, mut ty) = (b, tier_b);

        while tx > ty {
            let l = self.climb(&mut x);
            up.push((l, Direction::Up));
            tx -= 1;
        }
        while ty > tx {
            let l = self.climb(&mut y);
            down.push((l, Direction::Down));
            ty -= 1;
        }
        while x != y {
            let lx = self.climb(&mut x);
            up.push((lx, Direction::Up));
            let ly = self.climb(&mut y);
            down.push((ly, Direction::Down));
        }

        down.reverse();
        up.extend(down);
        Ok(up)
    }

    /// Sum of link latencies along the path from `a` to `b`.
    pub fn path_latency(&self, a: NodeId, b: NodeId) -> ModelResult<f64> {
        Ok(self
            .path(a, b)?
            .iter()
            .map(|l| self.links[l.0].latency)
            .sum())
    }

    fn uplink_unchecked(&self, id: NodeId) -> Option<LinkId> {
        if id.0 == 0 {
            None
        } else {
            Some(LinkId(id.0 - 1))
        }
    }

    // Moves `node` to its parent and returns the link crossed.
    // Callers only climb from tiers >= 1, so the node is never the root.
    fn climb(&self, node: &mut NodeId) -> LinkId {
        let link = LinkId(node.0 - 1);
        *node = self.links[link.0].parent;
        link
    }
}
