//! Configuration for chromosome generation, the genetic operators and the
//! population manager.

use serde::{Deserialize, Serialize};

use crate::activation::Activation;

/// How the generator wires a fresh chromosome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ConnectionMode {
    /// Every input and the bias connect to every output.
    #[default]
    Full,
    /// The bias and the inputs of one randomly chosen sprite connect to every
    /// output; remaining inputs start unconnected and can be wired in by
    /// mutation later.
    Sprite,
}

/// All tunables of the neuroevolution core.
///
/// Probabilities are expected in `[0.0, 1.0]`; values outside that range are
/// not rejected but produce skewed operator behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeatConfig {
    // Population
    /// Number of chromosomes kept alive between generations.
    pub population_size: usize,
    /// Species count the compatibility threshold is steered toward.
    pub species_target: usize,
    /// Initial compatibility threshold; adjusted by ±0.3 per generation
    /// toward `species_target`, floored at 0.1.
    pub compatibility_threshold: f64,
    /// Fraction of each species (by fitness rank) flagged as parents.
    pub parents_per_species: f64,

    // Compatibility distance
    /// Coefficient for excess genes.
    pub excess_coefficient: f64,
    /// Coefficient for disjoint genes.
    pub disjoint_coefficient: f64,
    /// Coefficient for the average weight difference on matching genes.
    pub weight_coefficient: f64,

    // Fitness sharing
    /// Generations without all-time-best improvement before a species is
    /// penalized (and, plus 5, before the whole population refocuses).
    pub penalizing_age: usize,
    /// Fitness multiplier for species of age <= 10. Keep > 1.
    pub age_significance: f64,

    // Reproduction
    /// Offspring credits reserved for the population champion's species.
    pub champion_offspring: usize,
    /// How many of the champion credits are spent on unmutated clones before
    /// switching to lightly mutated champion children.
    pub champion_clones: usize,
    /// Probability that an offspring slot is filled by mutation of a single
    /// parent instead of crossover.
    pub mutation_without_crossover: f64,
    /// Probability that the second crossover parent comes from a different
    /// species.
    pub interspecies_mating: f64,
    /// Probability that a matching gene's weight is averaged between parents
    /// instead of picked from one of them.
    pub crossover_weight_average_rate: f64,
    /// Probability that a crossover child is left unmutated.
    pub crossover_without_mutation: f64,

    // Mutation
    /// Probability of the add-node structural move.
    pub add_node_prob: f64,
    /// Probability of the add-connection structural move.
    pub add_connection_prob: f64,
    /// Probability that a champion receives an added connection instead of
    /// weight perturbation.
    pub champion_connection_prob: f64,
    /// Probability that an added connection is recurrent.
    pub recurrent_prob: f64,
    /// Attempts before add-connection gives up without a structural change.
    pub add_connection_tries: usize,
    /// Probability of the toggle-enable move.
    pub toggle_enable_prob: f64,
    /// How many random connections the toggle-enable move flips.
    pub toggle_times: usize,
    /// Probability of re-enabling one disabled connection.
    pub reenable_prob: f64,
    /// Probability of the weight-mutation move.
    pub weight_mutation_prob: f64,
    /// Scale of weight perturbation and replacement, and of fresh connection
    /// weights.
    pub perturbation_power: f64,
    /// Probability of substituting gradient-descent weight training for
    /// genetic weight mutation when a trainer is attached.
    pub gradient_prob: f64,

    // Generation
    /// How fresh chromosomes are wired.
    pub connection_mode: ConnectionMode,
    /// Activation function given to hidden nodes created by splits.
    pub hidden_activation: Activation,
}

impl Default for NeatConfig {
    fn default() -> Self {
        Self {
            population_size: 100,
            species_target: 5,
            compatibility_threshold: 3.0,
            parents_per_species: 0.2,
            excess_coefficient: 1.0,
            disjoint_coefficient: 1.0,
            weight_coefficient: 0.4,
            penalizing_age: 20,
            age_significance: 1.1,
            champion_offspring: 3,
            champion_clones: 1,
            mutation_without_crossover: 0.25,
            interspecies_mating: 0.001,
            crossover_weight_average_rate: 0.4,
            crossover_without_mutation: 0.2,
            add_node_prob: 0.03,
            add_connection_prob: 0.05,
            champion_connection_prob: 0.3,
            recurrent_prob: 0.1,
            add_connection_tries: 50,
            toggle_enable_prob: 0.1,
            toggle_times: 3,
            reenable_prob: 0.05,
            weight_mutation_prob: 0.6,
            perturbation_power: 2.5,
            gradient_prob: 0.0,
            connection_mode: ConnectionMode::Full,
            hidden_activation: Activation::Tanh,
        }
    }
}

impl NeatConfig {
    /// Compact configuration for tests: small population, aggressive
    /// structural mutation.
    #[must_use]
    pub fn minimal(population_size: usize) -> Self {
        Self {
            population_size,
            species_target: 3,
            add_node_prob: 0.1,
            add_connection_prob: 0.2,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_probabilities_in_range() {
        let config = NeatConfig::default();
        for p in [
            config.parents_per_species,
            config.mutation_without_crossover,
            config.interspecies_mating,
            config.crossover_weight_average_rate,
            config.crossover_without_mutation,
            config.add_node_prob,
            config.add_connection_prob,
            config.champion_connection_prob,
            config.recurrent_prob,
            config.toggle_enable_prob,
            config.reenable_prob,
            config.weight_mutation_prob,
            config.gradient_prob,
        ] {
            assert!((0.0..=1.0).contains(&p), "probability out of range: {p}");
        }
    }

    #[test]
    fn test_minimal_overrides() {
        let config = NeatConfig::minimal(10);
        assert_eq!(config.population_size, 10);
        assert!(config.add_connection_prob > NeatConfig::default().add_connection_prob);
    }
}
