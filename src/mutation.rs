//! Mutation operator.
//!
//! [`Mutation`] owns the operator configuration and an optional
//! [`WeightTrainer`] that can substitute gradient-based weight tuning for
//! random perturbation. All structural moves route through the shared
//! [`EvolutionContext`] so repeated structural changes reuse node ids and
//! innovation numbers.

use log::debug;
use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::config::NeatConfig;
use crate::gene::{ConnectionGene, ConnectionKey, NodeId, NodeKind};
use crate::genome::NeatChromosome;
use crate::innovation::EvolutionContext;

/// Weights are kept inside this band after any mutation.
const WEIGHT_CAP: f64 = 8.0;

/// Fraction of recurrent add-connection attempts that try a self-loop.
const SELF_LOOP_RATE: f64 = 0.25;

/// Per-connection probability of replacing a weight outright instead of
/// perturbing it.
const WEIGHT_REPLACE_RATE: f64 = 0.1;

/// Retry budget before a mutation attempt is accepted as a no-op.
const MUTATION_ATTEMPTS: usize = 50;

/// Pluggable weight trainer, e.g. backpropagation against recorded targets.
///
/// Returns the final loss on success, or `None` when the trainer has nothing
/// to train against, in which case the operator falls back to random weight
/// mutation.
pub trait WeightTrainer {
    /// Adjust the chromosome's connection weights in place.
    fn train(&mut self, chromosome: &mut NeatChromosome) -> Option<f64>;
}

/// The mutation operator.
pub struct Mutation {
    config: NeatConfig,
    trainer: Option<Box<dyn WeightTrainer + Send>>,
}

impl Mutation {
    /// Create an operator without a gradient trainer.
    #[must_use]
    pub fn new(config: NeatConfig) -> Self {
        Self {
            config,
            trainer: None,
        }
    }

    /// Create an operator with a gradient trainer, consulted with probability
    /// `gradient_prob` whenever weight mutation is selected.
    #[must_use]
    pub fn with_trainer(config: NeatConfig, trainer: Box<dyn WeightTrainer + Send>) -> Self {
        Self {
            config,
            trainer: Some(trainer),
        }
    }

    /// Produce a mutated copy of `parent`.
    ///
    /// The parent is never modified. Mutation is retried until the child
    /// differs from the parent structurally or in at least one weight; if all
    /// retries fall through, one connection weight is perturbed directly so
    /// the caller always receives a changed chromosome (unless the parent has
    /// no connections at all).
    pub fn apply<R: Rng>(
        &mut self,
        parent: &NeatChromosome,
        ctx: &mut EvolutionContext,
        rng: &mut R,
    ) -> NeatChromosome {
        for _ in 0..MUTATION_ATTEMPTS {
            let mut child = parent.clone_structure();
            self.mutate(&mut child, ctx, rng);
            if differs(parent, &child) {
                return child;
            }
        }

        debug!("mutation retries exhausted, forcing a weight perturbation");
        let mut child = parent.clone_structure();
        let keys: Vec<ConnectionKey> = child.connections.keys().collect();
        if !keys.is_empty() {
            let key = keys[rng.random_range(0..keys.len())];
            if let Some(conn) = child.connections.get_mut(key) {
                conn.weight = (conn.weight
                    + (rng.random::<f64>() * 2.0 - 1.0) * self.config.perturbation_power)
                    .clamp(-WEIGHT_CAP, WEIGHT_CAP);
            }
        }
        child
    }

    /// Produce a lightly mutated copy of a champion: either one added
    /// connection or weight mutation, never node splits or toggles.
    pub fn apply_to_champion<R: Rng>(
        &mut self,
        champion: &NeatChromosome,
        ctx: &mut EvolutionContext,
        rng: &mut R,
    ) -> NeatChromosome {
        let mut child = champion.clone_structure();
        if rng.random_bool(self.config.champion_connection_prob) {
            if !self.add_connection(&mut child, ctx, rng) {
                self.mutate_weights(&mut child, rng);
            }
        } else {
            self.mutate_weights(&mut child, rng);
        }
        child
    }

    /// One round of mutation. Structural moves are exclusive; the
    /// non-structural moves fire independently.
    fn mutate<R: Rng>(
        &mut self,
        child: &mut NeatChromosome,
        ctx: &mut EvolutionContext,
        rng: &mut R,
    ) {
        if rng.random_bool(self.config.add_node_prob) {
            self.add_node(child, ctx, rng);
        } else if rng.random_bool(self.config.add_connection_prob) {
            self.add_connection(child, ctx, rng);
        } else {
            if rng.random_bool(self.config.toggle_enable_prob) {
                self.toggle_enable(child, rng);
            }
            if rng.random_bool(self.config.reenable_prob) {
                self.reenable(child, rng);
            }
            if rng.random_bool(self.config.weight_mutation_prob) {
                let trained = match self.trainer.as_mut() {
                    Some(trainer) if rng.random_bool(self.config.gradient_prob) => {
                        trainer.train(child).is_some()
                    }
                    _ => false,
                };
                if !trained {
                    self.mutate_weights(child, rng);
                }
            }
        }
    }

    /// Add one connection between existing nodes.
    ///
    /// The recurrence class is drawn first; a candidate pair whose
    /// classification contradicts the drawn class is rejected and redrawn,
    /// up to `add_connection_tries` attempts. Silently leaves the chromosome
    /// unchanged when the budget runs out, which happens naturally on
    /// near-fully-connected networks.
    pub fn add_connection<R: Rng>(
        &self,
        child: &mut NeatChromosome,
        ctx: &mut EvolutionContext,
        rng: &mut R,
    ) -> bool {
        let sources: Vec<NodeId> = child.nodes.keys().copied().collect();
        let targets: Vec<NodeId> = child
            .nodes
            .values()
            .filter(|n| !n.kind.is_input())
            .map(|n| n.id)
            .collect();
        if sources.is_empty() || targets.is_empty() {
            return false;
        }

        let recurrent = rng.random_bool(self.config.recurrent_prob);
        for _ in 0..self.config.add_connection_tries {
            let (source, target) = if recurrent && rng.random_bool(SELF_LOOP_RATE) {
                let id = targets[rng.random_range(0..targets.len())];
                (id, id)
            } else {
                (
                    sources[rng.random_range(0..sources.len())],
                    targets[rng.random_range(0..targets.len())],
                )
            };

            if !recurrent && source == target {
                continue;
            }
            if child.classifies_recurrent(source, target) != recurrent {
                continue;
            }
            if child.has_connection(source, target, recurrent) {
                continue;
            }

            let innovation = ctx.connection_innovation(source, target, recurrent);
            let weight = (rng.random::<f64>() * 2.0 - 1.0) * self.config.perturbation_power;
            child.connections.insert(ConnectionGene::new(
                source, target, recurrent, weight, innovation,
            ));
            return true;
        }
        false
    }

    /// Split a random enabled connection through a new hidden node.
    ///
    /// Connections out of the bias node are not split; a hidden node fed only
    /// by bias carries no program signal.
    pub fn add_node<R: Rng>(
        &self,
        child: &mut NeatChromosome,
        ctx: &mut EvolutionContext,
        rng: &mut R,
    ) -> bool {
        let candidates: Vec<ConnectionKey> = child
            .connections
            .iter()
            .filter(|(_, c)| {
                c.enabled
                    && !matches!(
                        child.nodes.get(&c.source).map(|n| &n.kind),
                        Some(NodeKind::Bias)
                    )
            })
            .map(|(key, _)| key)
            .collect();
        if candidates.is_empty() {
            return false;
        }

        for _ in 0..20 {
            let key = candidates[rng.random_range(0..candidates.len())];
            if child.split_connection(key, ctx).is_some() {
                return true;
            }
        }
        false
    }

    /// Flip the enabled flag of `toggle_times` random connections.
    fn toggle_enable<R: Rng>(&self, child: &mut NeatChromosome, rng: &mut R) {
        let keys: Vec<ConnectionKey> = child.connections.keys().collect();
        if keys.is_empty() {
            return;
        }
        for _ in 0..self.config.toggle_times {
            let key = keys[rng.random_range(0..keys.len())];
            if let Some(conn) = child.connections.get_mut(key) {
                conn.enabled = !conn.enabled;
            }
        }
    }

    /// Re-enable one random disabled connection.
    fn reenable<R: Rng>(&self, child: &mut NeatChromosome, rng: &mut R) {
        let disabled: Vec<ConnectionKey> = child
            .connections
            .iter()
            .filter(|(_, c)| !c.enabled)
            .map(|(key, _)| key)
            .collect();
        if disabled.is_empty() {
            return;
        }
        let key = disabled[rng.random_range(0..disabled.len())];
        if let Some(conn) = child.connections.get_mut(key) {
            conn.enabled = true;
        }
    }

    /// Perturb every connection weight.
    ///
    /// Each weight is either replaced with a fresh uniform draw (small
    /// probability) or shifted by a Gaussian sample centered on the current
    /// weight, then capped.
    pub fn mutate_weights<R: Rng>(&self, child: &mut NeatChromosome, rng: &mut R) {
        for conn in child.connections.values_mut() {
            if rng.random_bool(WEIGHT_REPLACE_RATE) {
                conn.weight = (rng.random::<f64>() * 2.0 - 1.0) * self.config.perturbation_power;
            } else if let Ok(normal) = Normal::new(conn.weight, self.config.perturbation_power) {
                conn.weight = normal.sample(rng);
            }
            conn.weight = conn.weight.clamp(-WEIGHT_CAP, WEIGHT_CAP);
        }
    }
}

/// Whether two chromosomes differ structurally or in any weight or enabled
/// flag.
fn differs(parent: &NeatChromosome, child: &NeatChromosome) -> bool {
    if parent.nodes.len() != child.nodes.len()
        || parent.connections.len() != child.connections.len()
    {
        return true;
    }

    let mut left: Vec<(u64, u64, bool)> = parent
        .connections
        .values()
        .map(|c| (c.innovation, c.weight.to_bits(), c.enabled))
        .collect();
    let mut right: Vec<(u64, u64, bool)> = child
        .connections
        .values()
        .map(|c| (c.innovation, c.weight.to_bits(), c.enabled))
        .collect();
    left.sort_unstable();
    right.sort_unstable();
    left != right
}
