//! Crossover operator.
//!
//! Connection genes are aligned by innovation number. The fitter parent
//! donates the child's structure (all its nodes and connections, including
//! disjoint and excess genes); on matching genes the weight is inherited from
//! either parent at random or averaged, and a gene disabled in either parent
//! has a chance of staying disabled in the child.

use std::collections::HashMap;

use rand::Rng;

use crate::config::NeatConfig;
use crate::gene::{ConnectionGene, Innovation};
use crate::genome::NeatChromosome;

/// Probability that a gene disabled in either parent stays disabled.
const INHERIT_DISABLED_RATE: f64 = 0.75;

/// The crossover operator.
#[derive(Debug, Clone)]
pub struct Crossover {
    config: NeatConfig,
}

impl Crossover {
    /// Create the operator.
    #[must_use]
    pub fn new(config: NeatConfig) -> Self {
        Self { config }
    }

    /// Breed a child from two parents.
    ///
    /// The parent with higher raw fitness dominates; ties go to the simpler
    /// parent (fewer connections), then to a coin flip. Neither parent is
    /// modified.
    pub fn apply<R: Rng>(
        &self,
        parent_a: &NeatChromosome,
        parent_b: &NeatChromosome,
        rng: &mut R,
    ) -> NeatChromosome {
        let (fitter, other) = if parent_a.fitness > parent_b.fitness {
            (parent_a, parent_b)
        } else if parent_b.fitness > parent_a.fitness {
            (parent_b, parent_a)
        } else if parent_a.connections.len() < parent_b.connections.len() {
            (parent_a, parent_b)
        } else if parent_b.connections.len() < parent_a.connections.len() {
            (parent_b, parent_a)
        } else if rng.random_bool(0.5) {
            (parent_a, parent_b)
        } else {
            (parent_b, parent_a)
        };

        let mut child = fitter.clone_structure();
        let other_genes: HashMap<Innovation, &ConnectionGene> = other
            .connections
            .values()
            .map(|c| (c.innovation, c))
            .collect();

        for conn in child.connections.values_mut() {
            let Some(matched) = other_genes.get(&conn.innovation) else {
                continue;
            };

            if rng.random_bool(self.config.crossover_weight_average_rate) {
                conn.weight = (conn.weight + matched.weight) / 2.0;
            } else if rng.random_bool(0.5) {
                conn.weight = matched.weight;
            }

            if !conn.enabled || !matched.enabled {
                conn.enabled = !rng.random_bool(INHERIT_DISABLED_RATE);
            }
        }

        child
    }
}
