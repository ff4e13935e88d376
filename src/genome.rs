//! Network chromosome: the genome of one candidate neural network.
//!
//! A [`NeatChromosome`] owns its full node and connection sets. Nodes are
//! addressed by their stable integer [`NodeId`] in an ordered map;
//! connections live in a `SlotMap` arena. Cycles (recurrent connections,
//! self-loops included) are plain `(source, target)` edge records, never
//! reference cycles: activation resolves them by double-buffering node values
//! instead of relying on traversal order.
//!
//! Activation processes nodes layer by layer in ascending depth. Forward
//! connections read the source value already updated this pass, recurrent
//! connections read the previous step's value, which is what allows cyclic
//! topologies without deadlock.

use std::collections::BTreeMap;

use rand::Rng;
use serde::{Deserialize, Serialize};
use slotmap::SlotMap;

use crate::actions::{ActionSpace, ExecutionTrace, InputFeatures};
use crate::activation::softmax;
use crate::config::{ConnectionMode, NeatConfig};
use crate::gene::{ConnectionGene, ConnectionKey, Innovation, NodeGene, NodeId, NodeKind};
use crate::innovation::EvolutionContext;

mod node_list {
    //! Serialize the node map as a plain node list; ids live inside the
    //! genes, so external tooling sees them verbatim and the map rebuilds on
    //! deserialization.

    use std::collections::BTreeMap;

    use serde::de::Deserializer;
    use serde::ser::Serializer;
    use serde::{Deserialize, Serialize};

    use crate::gene::{NodeGene, NodeId};

    pub fn serialize<S: Serializer>(
        nodes: &BTreeMap<NodeId, NodeGene>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(nodes.values())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<NodeId, NodeGene>, D::Error> {
        let nodes = Vec::<NodeGene>::deserialize(deserializer)?;
        Ok(nodes.into_iter().map(|n| (n.id, n)).collect())
    }
}

/// One candidate network in the population.
///
/// The fitness-related fields are per-generation scratch state, recomputed
/// every generation and excluded from both structural cloning and
/// serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeatChromosome {
    /// Node genes, ordered by stable id.
    #[serde(with = "node_list")]
    pub nodes: BTreeMap<NodeId, NodeGene>,
    /// Connection genes.
    pub connections: SlotMap<ConnectionKey, ConnectionGene>,
    /// Configuration this chromosome was generated under.
    #[serde(default)]
    pub config: NeatConfig,
    /// Events recorded by the external evaluator while this chromosome drove
    /// the target program.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<ExecutionTrace>,

    /// Raw fitness written back by the evaluation callback.
    #[serde(skip)]
    pub fitness: f64,
    /// Fitness after age adjustment and sharing within the species.
    #[serde(skip)]
    pub shared_fitness: f64,
    /// Offspring this chromosome is expected to contribute.
    #[serde(skip)]
    pub expected_offspring: f64,
    /// Species this chromosome currently belongs to.
    #[serde(skip)]
    pub species: Option<usize>,
    /// Survivor flag: parents reproduce, everyone else is purged.
    #[serde(skip)]
    pub is_parent: bool,
    /// Whether this is the single fittest chromosome of the generation.
    #[serde(skip)]
    pub is_population_champion: bool,
    /// Coverage verdict recorded by the evaluation callback.
    #[serde(skip)]
    pub covered: bool,
}

impl NeatChromosome {
    /// Generate a fresh chromosome for the given action space and the input
    /// features discovered so far.
    ///
    /// Creates one input node per named feature, a bias node, one
    /// classification output per action and one regression output per action
    /// parameter, then wires them according to
    /// [`ConnectionMode`](crate::config::ConnectionMode). All node ids and
    /// connection innovations come from `ctx`, so chromosomes generated
    /// back-to-back share identities and alignment works across them.
    pub fn generate<R: Rng>(
        config: NeatConfig,
        action_space: &ActionSpace,
        features: &InputFeatures,
        ctx: &mut EvolutionContext,
        rng: &mut R,
    ) -> Self {
        let mut chromosome = Self {
            nodes: BTreeMap::new(),
            connections: SlotMap::with_key(),
            config,
            trace: None,
            fitness: 0.0,
            shared_fitness: 0.0,
            expected_offspring: 0.0,
            species: None,
            is_parent: false,
            is_population_champion: false,
            covered: false,
        };

        let bias = ctx.bias_node();
        chromosome.nodes.insert(bias, NodeGene::bias(bias));

        for (sprite, sprite_features) in features {
            for feature in sprite_features.keys() {
                let id = ctx.input_node(sprite, feature);
                chromosome
                    .nodes
                    .insert(id, NodeGene::input(id, sprite, feature));
            }
        }

        for action in action_space.actions() {
            let id = ctx.output_node(&action.name, None);
            chromosome
                .nodes
                .insert(id, NodeGene::classification(id, &action.name));
            for parameter in &action.parameters {
                let id = ctx.output_node(&action.name, Some(parameter));
                chromosome
                    .nodes
                    .insert(id, NodeGene::regression(id, &action.name, parameter));
            }
        }

        let sources: Vec<NodeId> = match chromosome.config.connection_mode {
            ConnectionMode::Full => chromosome
                .nodes
                .values()
                .filter(|n| n.kind.is_input())
                .map(|n| n.id)
                .collect(),
            ConnectionMode::Sprite => {
                let sprites: Vec<&String> = features.keys().collect();
                let chosen = sprites
                    .get(rng.random_range(0..sprites.len().max(1)))
                    .copied();
                chromosome
                    .nodes
                    .values()
                    .filter(|n| match &n.kind {
                        NodeKind::Bias => true,
                        NodeKind::Input { sprite, .. } => Some(sprite) == chosen,
                        _ => false,
                    })
                    .map(|n| n.id)
                    .collect()
            }
        };
        let targets: Vec<NodeId> = chromosome
            .nodes
            .values()
            .filter(|n| n.kind.is_output())
            .map(|n| n.id)
            .collect();

        for &source in &sources {
            for &target in &targets {
                let innovation = ctx.connection_innovation(source, target, false);
                let weight = rng.random::<f64>() * 2.0 - 1.0;
                chromosome.connections.insert(ConnectionGene::new(
                    source, target, false, weight, innovation,
                ));
            }
        }

        chromosome
    }

    /// Deep-copy the structural genes, dropping all per-generation scratch
    /// state and runtime activation values.
    #[must_use]
    pub fn clone_structure(&self) -> Self {
        let mut nodes = self.nodes.clone();
        for node in nodes.values_mut() {
            node.reset();
        }
        Self {
            nodes,
            connections: self.connections.clone(),
            config: self.config.clone(),
            trace: None,
            fitness: 0.0,
            shared_fitness: 0.0,
            expected_offspring: 0.0,
            species: None,
            is_parent: false,
            is_population_champion: false,
            covered: false,
        }
    }

    /// Feed one step of input features through the network.
    ///
    /// Previously unseen `(sprite, feature)` pairs register a fresh input
    /// node through `ctx` so every chromosome that later sees the same named
    /// feature reuses the same node identity.
    ///
    /// Returns `false` for a defect network: no output node received any
    /// activation. Callers must discard or retry such a chromosome rather
    /// than read its outputs.
    pub fn activate(&mut self, features: &InputFeatures, ctx: &mut EvolutionContext) -> bool {
        let mut missing: Vec<(String, String)> = Vec::new();
        for (sprite, sprite_features) in features {
            for feature in sprite_features.keys() {
                if !self.has_input(sprite, feature) {
                    missing.push((sprite.clone(), feature.clone()));
                }
            }
        }
        for (sprite, feature) in missing {
            let id = ctx.input_node(&sprite, &feature);
            self.nodes
                .insert(id, NodeGene::input(id, &sprite, &feature));
        }

        self.activate_known(features)
    }

    /// Activation pass over the already-registered nodes.
    fn activate_known(&mut self, features: &InputFeatures) -> bool {
        // Phase 1: inputs and bias are set directly. A missing feature key
        // leaves the node at 0 and not-activated for this step.
        for node in self.nodes.values_mut() {
            match &node.kind {
                NodeKind::Bias => {
                    node.value = 1.0;
                    node.activated = true;
                    node.activation_count += 1;
                }
                NodeKind::Input { sprite, feature } => {
                    match features.get(sprite).and_then(|m| m.get(feature)) {
                        Some(&value) => {
                            node.value = value;
                            node.activated = true;
                            node.activation_count += 1;
                        }
                        None => {
                            node.value = 0.0;
                            node.activated = false;
                        }
                    }
                }
                _ => node.activated = false,
            }
        }

        // Phase 2: remaining nodes in ascending depth order. Forward edges
        // read the source value updated this pass, recurrent edges the
        // previous step's value.
        let schedule: Vec<NodeId> = {
            let mut ids: Vec<&NodeGene> = self
                .nodes
                .values()
                .filter(|n| !n.kind.is_input())
                .collect();
            ids.sort_by(|a, b| a.depth.total_cmp(&b.depth).then(a.id.cmp(&b.id)));
            ids.into_iter().map(|n| n.id).collect()
        };

        for id in schedule {
            let mut sum = 0.0;
            let mut any_live_source = false;
            for conn in self.connections.values() {
                if !conn.enabled || conn.target != id {
                    continue;
                }
                let Some(source) = self.nodes.get(&conn.source) else {
                    continue;
                };
                if conn.recurrent {
                    if source.activation_count > 0 {
                        sum += source.prev_value * conn.weight;
                        any_live_source = true;
                    }
                } else if source.activated {
                    sum += source.value * conn.weight;
                    any_live_source = true;
                }
            }

            if let Some(node) = self.nodes.get_mut(&id) {
                node.input_sum = sum;
                if any_live_source {
                    node.value = node.activation.apply(sum);
                    node.activated = true;
                    node.activation_count += 1;
                } else {
                    node.activated = false;
                }
            }
        }

        let defect = !self
            .nodes
            .values()
            .any(|n| n.kind.is_output() && n.activated);

        // End of step: publish this step's values for next step's recurrent
        // reads.
        for node in self.nodes.values_mut() {
            node.prev_value = node.value;
        }

        !defect
    }

    /// Sanity-check activation with a dummy all-ones feature set derived from
    /// this chromosome's own input nodes. Used by breeding to detect defect
    /// children before they enter the population.
    pub fn activate_dummy(&mut self) -> bool {
        let mut features: InputFeatures = BTreeMap::new();
        for node in self.nodes.values() {
            if let NodeKind::Input { sprite, feature } = &node.kind {
                features
                    .entry(sprite.clone())
                    .or_default()
                    .insert(feature.clone(), 1.0);
            }
        }
        self.reset();
        self.activate_known(&features)
    }

    /// Reset all runtime activation state.
    pub fn reset(&mut self) {
        for node in self.nodes.values_mut() {
            node.reset();
        }
    }

    /// Whether a path exists from `target` onward to `source`, meaning a new
    /// `source -> target` edge would close a cycle.
    ///
    /// Depth-first search following enabled connections, bounded by
    /// `|nodes|^2` steps so it terminates on already-cyclic graphs.
    #[must_use]
    pub fn is_recurrent_path(&self, source: NodeId, target: NodeId) -> bool {
        if source == target {
            return true;
        }

        let budget = self.nodes.len().saturating_mul(self.nodes.len());
        let mut steps = 0usize;
        let mut visited: Vec<NodeId> = Vec::new();
        let mut stack = vec![target];

        while let Some(current) = stack.pop() {
            steps += 1;
            if steps > budget {
                return false;
            }
            if current == source {
                return true;
            }
            if visited.contains(&current) {
                continue;
            }
            visited.push(current);
            for conn in self.connections.values() {
                if conn.enabled && conn.source == current {
                    stack.push(conn.target);
                }
            }
        }

        false
    }

    /// Classify a candidate edge: recurrent if it closes a cycle, is a
    /// self-loop, or goes backward (or sideways) in depth.
    #[must_use]
    pub fn classifies_recurrent(&self, source: NodeId, target: NodeId) -> bool {
        if source == target {
            return true;
        }
        if self.is_recurrent_path(source, target) {
            return true;
        }
        match (self.nodes.get(&source), self.nodes.get(&target)) {
            (Some(s), Some(t)) => t.depth <= s.depth,
            _ => false,
        }
    }

    /// Compatibility distance to another chromosome for speciation.
    ///
    /// Connection lists are walked in lockstep by ascending innovation
    /// number, counting matching, disjoint and excess genes. A missing
    /// comparand yields the maximal sentinel so it is always treated as a new
    /// species.
    #[must_use]
    pub fn compatibility_distance(&self, other: Option<&NeatChromosome>) -> f64 {
        let Some(other) = other else {
            return f64::MAX;
        };

        let mut left: Vec<(Innovation, f64)> = self
            .connections
            .values()
            .map(|c| (c.innovation, c.weight))
            .collect();
        let mut right: Vec<(Innovation, f64)> = other
            .connections
            .values()
            .map(|c| (c.innovation, c.weight))
            .collect();
        left.sort_unstable_by_key(|(innovation, _)| *innovation);
        right.sort_unstable_by_key(|(innovation, _)| *innovation);

        let mut matching = 0usize;
        let mut disjoint = 0usize;
        let mut excess = 0usize;
        let mut weight_diff = 0.0;

        let mut i = 0;
        let mut j = 0;
        while i < left.len() || j < right.len() {
            match (left.get(i), right.get(j)) {
                (Some(&(a, wa)), Some(&(b, wb))) => {
                    if a == b {
                        matching += 1;
                        weight_diff += (wa - wb).abs();
                        i += 1;
                        j += 1;
                    } else if a < b {
                        disjoint += 1;
                        i += 1;
                    } else {
                        disjoint += 1;
                        j += 1;
                    }
                }
                (Some(_), None) | (None, Some(_)) => {
                    excess += 1;
                    if i < left.len() {
                        i += 1;
                    } else {
                        j += 1;
                    }
                }
                (None, None) => break,
            }
        }

        let max_size = left.len().max(right.len()).max(1) as f64;
        let mut distance = (excess as f64 * self.config.excess_coefficient
            + disjoint as f64 * self.config.disjoint_coefficient)
            / max_size;
        if matching > 0 {
            distance += self.config.weight_coefficient * (weight_diff / matching as f64);
        }
        distance
    }

    /// Split an enabled connection through a fresh hidden node.
    ///
    /// The original connection is disabled and replaced by
    /// `source -> node` (weight 1, preserving the signal) and
    /// `node -> target` (original weight). The joint innovation record comes
    /// from the ledger, so repeating the same split anywhere in the run
    /// reuses the same node id and innovation pair.
    ///
    /// Returns `None` if the connection is missing, disabled, or this
    /// chromosome already holds the split's hidden node.
    pub fn split_connection(
        &mut self,
        key: ConnectionKey,
        ctx: &mut EvolutionContext,
    ) -> Option<NodeId> {
        let conn = self.connections.get(key)?;
        if !conn.enabled {
            return None;
        }
        let source = conn.source;
        let target = conn.target;
        let recurrent = conn.recurrent;
        let weight = conn.weight;
        let innovation = conn.innovation;

        let split = ctx.split_innovation(source, target, innovation);
        if self.nodes.contains_key(&split.node) {
            return None;
        }

        let (depth, outgoing_recurrent) = {
            let s = self.nodes.get(&source)?.depth;
            let t = self.nodes.get(&target)?.depth;
            let mid = (s + t) / 2.0;
            // splitting a recurrent edge parks the hidden node at or above
            // the target, so the outgoing half must stay recurrent or the
            // target would read it before it activates each pass
            (mid, mid >= t)
        };

        if let Some(conn) = self.connections.get_mut(key) {
            conn.enabled = false;
        }

        let hidden = NodeGene::hidden(split.node, self.config.hidden_activation, depth);
        self.nodes.insert(split.node, hidden);
        self.connections.insert(ConnectionGene::new(
            source,
            split.node,
            recurrent,
            1.0,
            split.incoming,
        ));
        self.connections.insert(ConnectionGene::new(
            split.node,
            target,
            outgoing_recurrent,
            weight,
            split.outgoing,
        ));

        Some(split.node)
    }

    /// Whether an input node for the named feature exists.
    #[must_use]
    pub fn has_input(&self, sprite: &str, feature: &str) -> bool {
        self.nodes.values().any(|n| {
            matches!(&n.kind, NodeKind::Input { sprite: s, feature: f } if s == sprite && f == feature)
        })
    }

    /// Whether an edge with this exact matching key already exists.
    #[must_use]
    pub fn has_connection(&self, source: NodeId, target: NodeId, recurrent: bool) -> bool {
        self.connections
            .values()
            .any(|c| c.source == source && c.target == target && c.recurrent == recurrent)
    }

    /// Find a connection by its innovation number.
    #[must_use]
    pub fn find_connection_by_innovation(&self, innovation: Innovation) -> Option<ConnectionKey> {
        self.connections
            .iter()
            .find(|(_, c)| c.innovation == innovation)
            .map(|(key, _)| key)
    }

    /// Input nodes grouped by source sprite name.
    #[must_use]
    pub fn inputs_by_sprite(&self) -> BTreeMap<String, Vec<NodeId>> {
        let mut groups: BTreeMap<String, Vec<NodeId>> = BTreeMap::new();
        for node in self.nodes.values() {
            if let NodeKind::Input { sprite, .. } = &node.kind {
                groups.entry(sprite.clone()).or_default().push(node.id);
            }
        }
        groups
    }

    /// Output nodes grouped by the action they represent.
    #[must_use]
    pub fn outputs_by_action(&self) -> BTreeMap<String, Vec<NodeId>> {
        let mut groups: BTreeMap<String, Vec<NodeId>> = BTreeMap::new();
        for node in self.nodes.values() {
            match &node.kind {
                NodeKind::Classification { action } | NodeKind::Regression { action, .. } => {
                    groups.entry(action.clone()).or_default().push(node.id);
                }
                _ => {}
            }
        }
        groups
    }

    /// Nodes grouped into layers by ascending depth.
    #[must_use]
    pub fn depth_layers(&self) -> Vec<(f64, Vec<NodeId>)> {
        let mut sorted: Vec<&NodeGene> = self.nodes.values().collect();
        sorted.sort_by(|a, b| a.depth.total_cmp(&b.depth).then(a.id.cmp(&b.id)));

        let mut layers: Vec<(f64, Vec<NodeId>)> = Vec::new();
        for node in sorted {
            match layers.last_mut() {
                Some((depth, ids)) if (node.depth - *depth).abs() < 1e-9 => ids.push(node.id),
                _ => layers.push((node.depth, vec![node.id])),
            }
        }
        layers
    }

    /// Number of distinct depth layers. An acyclic input-to-output path
    /// stabilizes within this many activation passes.
    #[must_use]
    pub fn max_depth(&self) -> usize {
        self.depth_layers().len()
    }

    /// Softmax distribution over the classification outputs, ordered by node
    /// id. Never-activated outputs contribute their default value.
    #[must_use]
    pub fn classification_distribution(&self) -> Vec<(String, f64)> {
        let mut entries: Vec<(String, f64)> = self
            .nodes
            .values()
            .filter_map(|n| match &n.kind {
                NodeKind::Classification { action } => Some((action.clone(), n.value)),
                _ => None,
            })
            .collect();

        let mut values: Vec<f64> = entries.iter().map(|(_, v)| *v).collect();
        softmax(&mut values);
        for (entry, value) in entries.iter_mut().zip(values) {
            entry.1 = value;
        }
        entries
    }

    /// Current value of the regression output for `(action, parameter)`.
    #[must_use]
    pub fn regression_value(&self, action: &str, parameter: &str) -> Option<f64> {
        self.nodes.values().find_map(|n| match &n.kind {
            NodeKind::Regression {
                action: a,
                parameter: p,
            } if a == action && p == parameter => Some(n.value),
            _ => None,
        })
    }

    /// Number of enabled connections.
    #[must_use]
    pub fn num_enabled_connections(&self) -> usize {
        self.connections.values().filter(|c| c.enabled).count()
    }
}
