//! Species: a cluster of structurally similar chromosomes.
//!
//! A species stores arena keys into the population's chromosome `SlotMap`
//! plus a structural snapshot of one member as its representative. Fitness
//! sharing, parent selection and breeding all happen per species; the
//! population manager decides how many offspring each species receives.

use log::{debug, warn};
use rand::Rng;
use slotmap::SlotMap;

use crate::config::NeatConfig;
use crate::crossover::Crossover;
use crate::genome::NeatChromosome;
use crate::innovation::EvolutionContext;
use crate::mutation::Mutation;
use crate::population::GenomeKey;

/// Shared fitness never drops below this, so even hopeless species keep a
/// nonzero reproduction chance.
const FITNESS_FLOOR: f64 = 0.0001;

/// Fitness multiplier for species stagnant past the penalizing age.
const STAGNATION_PENALTY: f64 = 0.99;

/// Species younger than this receive the age-significance boost.
const YOUTH_AGE: usize = 10;

/// Attempts to breed a working child before accepting a defect one.
const BREED_ATTEMPTS: usize = 100;

/// One species.
#[derive(Debug)]
pub struct Species {
    /// Stable species identifier, unique within the run.
    pub id: usize,
    /// Generations this species has existed.
    pub age: usize,
    /// Members of the current generation.
    pub members: Vec<GenomeKey>,
    /// Generations since `best_fitness_ever` last improved.
    pub generations_since_improvement: usize,
    /// Best raw fitness any member ever reached.
    pub best_fitness_ever: f64,
    /// Offspring allocated for the next generation.
    pub expected_offspring: usize,
    representative: NeatChromosome,
}

impl Species {
    /// Found a species around its first member.
    #[must_use]
    pub fn new(id: usize, representative: NeatChromosome) -> Self {
        Self {
            id,
            age: 0,
            members: Vec::new(),
            generations_since_improvement: 0,
            best_fitness_ever: 0.0,
            expected_offspring: 0,
            representative,
        }
    }

    /// The structural snapshot candidates are compared against.
    #[must_use]
    pub fn representative(&self) -> &NeatChromosome {
        &self.representative
    }

    /// Replace the representative, typically with a member of the new
    /// generation.
    pub fn set_representative(&mut self, representative: NeatChromosome) {
        self.representative = representative;
    }

    /// Whether a candidate belongs to this species under the given threshold.
    #[must_use]
    pub fn is_compatible(&self, candidate: &NeatChromosome, threshold: f64) -> bool {
        candidate.compatibility_distance(Some(&self.representative)) < threshold
    }

    /// The member with the highest raw fitness.
    #[must_use]
    pub fn champion(&self, genomes: &SlotMap<GenomeKey, NeatChromosome>) -> Option<GenomeKey> {
        self.members
            .iter()
            .copied()
            .filter(|key| genomes.contains_key(*key))
            .max_by(|a, b| genomes[*a].fitness.total_cmp(&genomes[*b].fitness))
    }

    /// Members flagged as parents.
    #[must_use]
    pub fn parents(&self, genomes: &SlotMap<GenomeKey, NeatChromosome>) -> Vec<GenomeKey> {
        self.members
            .iter()
            .copied()
            .filter(|key| genomes.get(*key).is_some_and(|g| g.is_parent))
            .collect()
    }

    /// Mean raw fitness of the members.
    #[must_use]
    pub fn average_fitness(&self, genomes: &SlotMap<GenomeKey, NeatChromosome>) -> f64 {
        if self.members.is_empty() {
            return 0.0;
        }
        let sum: f64 = self
            .members
            .iter()
            .filter_map(|key| genomes.get(*key))
            .map(|g| g.fitness)
            .sum();
        sum / self.members.len() as f64
    }

    /// Age the species one generation and recompute shared fitness.
    ///
    /// Raw fitness is boosted for young species, penalized once the species
    /// has stagnated past `penalizing_age`, floored, then divided by the
    /// member count. Also flags the top `parents_per_species` fraction (at
    /// least the champion) as parents.
    pub fn update_fitness(
        &mut self,
        genomes: &mut SlotMap<GenomeKey, NeatChromosome>,
        config: &NeatConfig,
    ) {
        self.age += 1;
        self.members.retain(|key| genomes.contains_key(*key));
        if self.members.is_empty() {
            return;
        }

        let best = self
            .members
            .iter()
            .map(|key| genomes[*key].fitness)
            .fold(f64::NEG_INFINITY, f64::max);
        if best > self.best_fitness_ever {
            self.best_fitness_ever = best;
            self.generations_since_improvement = 0;
        } else {
            self.generations_since_improvement += 1;
        }

        let stagnant = self.generations_since_improvement > config.penalizing_age;
        let size = self.members.len() as f64;
        for key in &self.members {
            let genome = &mut genomes[*key];
            let mut adjusted = genome.fitness;
            if self.age <= YOUTH_AGE {
                adjusted *= config.age_significance;
            }
            if stagnant {
                adjusted *= STAGNATION_PENALTY;
            }
            genome.shared_fitness = adjusted.max(FITNESS_FLOOR) / size;
        }

        // fittest first, so parent flagging and champion lookups are rank
        // based
        self.members
            .sort_by(|a, b| genomes[*b].fitness.total_cmp(&genomes[*a].fitness));
        let parent_count = ((self.members.len() as f64 * config.parents_per_species).ceil()
            as usize)
            .clamp(1, self.members.len());
        for (rank, key) in self.members.iter().enumerate() {
            genomes[*key].is_parent = rank < parent_count;
        }
    }

    /// Breed the allocated number of offspring from this species' parents.
    ///
    /// Breeding priority per slot: population-champion credits first (exact
    /// clones, then lightly mutated champions), then one clone of the species
    /// champion, then the regular mix of mutation-only and crossover
    /// offspring. Every child is activation-checked with dummy input;
    /// defect children are rebred a bounded number of times.
    #[allow(clippy::too_many_arguments)]
    pub fn reproduce<R: Rng>(
        &self,
        offspring: usize,
        genomes: &SlotMap<GenomeKey, NeatChromosome>,
        all_parents: &[GenomeKey],
        mutation: &mut Mutation,
        crossover: &Crossover,
        ctx: &mut EvolutionContext,
        config: &NeatConfig,
        rng: &mut R,
    ) -> Vec<NeatChromosome> {
        let parents = self.parents(genomes);
        if parents.is_empty() || offspring == 0 {
            return Vec::new();
        }

        let population_champion = self
            .members
            .iter()
            .copied()
            .find(|key| genomes.get(*key).is_some_and(|g| g.is_population_champion));
        let champion_credits = if population_champion.is_some() {
            config.champion_offspring.min(offspring)
        } else {
            0
        };

        let mut children = Vec::with_capacity(offspring);
        for slot in 0..offspring {
            let mut child = self.breed_slot(
                slot,
                champion_credits,
                population_champion,
                &parents,
                genomes,
                all_parents,
                mutation,
                crossover,
                ctx,
                config,
                rng,
            );
            let mut alive = child.activate_dummy();
            let mut attempts = 1;
            while !alive && attempts < BREED_ATTEMPTS {
                child = self.breed_slot(
                    slot,
                    champion_credits,
                    population_champion,
                    &parents,
                    genomes,
                    all_parents,
                    mutation,
                    crossover,
                    ctx,
                    config,
                    rng,
                );
                alive = child.activate_dummy();
                attempts += 1;
            }
            if !alive {
                warn!(
                    "species {} bred only defect children in {} attempts, cloning a parent instead",
                    self.id, attempts
                );
                child = genomes[parents[rng.random_range(0..parents.len())]].clone_structure();
            }
            child.reset();
            children.push(child);
        }

        debug!(
            "species {} bred {} offspring from {} parents",
            self.id,
            children.len(),
            parents.len()
        );
        children
    }

    #[allow(clippy::too_many_arguments)]
    fn breed_slot<R: Rng>(
        &self,
        slot: usize,
        champion_credits: usize,
        population_champion: Option<GenomeKey>,
        parents: &[GenomeKey],
        genomes: &SlotMap<GenomeKey, NeatChromosome>,
        all_parents: &[GenomeKey],
        mutation: &mut Mutation,
        crossover: &Crossover,
        ctx: &mut EvolutionContext,
        config: &NeatConfig,
        rng: &mut R,
    ) -> NeatChromosome {
        if slot < champion_credits {
            // Safe: champion_credits > 0 only when the key exists.
            let champion = &genomes[population_champion.unwrap_or(parents[0])];
            if slot < config.champion_clones {
                return champion.clone_structure();
            }
            return mutation.apply_to_champion(champion, ctx, rng);
        }

        if slot == champion_credits {
            if let Some(champion) = self.champion(genomes) {
                return genomes[champion].clone_structure();
            }
        }

        if parents.len() == 1 || rng.random_bool(config.mutation_without_crossover) {
            let parent = &genomes[parents[rng.random_range(0..parents.len())]];
            return mutation.apply(parent, ctx, rng);
        }

        let mother = &genomes[parents[rng.random_range(0..parents.len())]];
        // interspecies mating draws from parents outside this species only
        let outsiders: Vec<GenomeKey> = all_parents
            .iter()
            .copied()
            .filter(|key| !self.members.contains(key))
            .collect();
        let father = if !outsiders.is_empty() && rng.random_bool(config.interspecies_mating) {
            &genomes[outsiders[rng.random_range(0..outsiders.len())]]
        } else {
            &genomes[parents[rng.random_range(0..parents.len())]]
        };

        let child = crossover.apply(mother, father, rng);
        let distance = mother.compatibility_distance(Some(father));
        if distance > 0.0 && !rng.random_bool(config.crossover_without_mutation) {
            return mutation.apply(&child, ctx, rng);
        }
        child
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{Action, ActionSpace, InputFeatures};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn setup(
        count: usize,
    ) -> (
        SlotMap<GenomeKey, NeatChromosome>,
        Species,
        EvolutionContext,
        ChaCha8Rng,
    ) {
        let mut ctx = EvolutionContext::new();
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let mut features = InputFeatures::new();
        features.insert(
            "Cat".into(),
            [("x", 0.3), ("y", -0.1)]
                .into_iter()
                .map(|(k, v)| (k.to_owned(), v))
                .collect(),
        );
        let space = ActionSpace::new(vec![Action::new("Wait"), Action::new("KeyPress:space")]);

        let mut genomes = SlotMap::with_key();
        let mut species = None;
        for i in 0..count {
            let mut genome = NeatChromosome::generate(
                NeatConfig::default(),
                &space,
                &features,
                &mut ctx,
                &mut rng,
            );
            genome.fitness = (i + 1) as f64;
            let key = genomes.insert(genome);
            let sp = species
                .get_or_insert_with(|| Species::new(0, genomes[key].clone_structure()));
            sp.members.push(key);
        }
        let species = species.unwrap_or_else(|| {
            Species::new(
                0,
                NeatChromosome::generate(
                    NeatConfig::default(),
                    &space,
                    &features,
                    &mut ctx,
                    &mut rng,
                ),
            )
        });
        (genomes, species, ctx, rng)
    }

    #[test]
    fn test_compatibility_uses_representative() {
        let (genomes, species, _ctx, _rng) = setup(3);
        let member = genomes.values().next().unwrap();
        assert!(species.is_compatible(member, 3.0));
    }

    #[test]
    fn test_update_fitness_shares_and_flags_parents() {
        let (mut genomes, mut species, _ctx, _rng) = setup(10);
        let config = NeatConfig::default();

        species.update_fitness(&mut genomes, &config);

        assert_eq!(species.age, 1);
        assert!((species.best_fitness_ever - 10.0).abs() < 1e-9);
        assert_eq!(species.generations_since_improvement, 0);

        // top 20% of 10 members
        let parents = species.parents(&genomes);
        assert_eq!(parents.len(), 2);
        let champion = species.champion(&genomes).unwrap();
        assert!(genomes[champion].is_parent);
        assert!((genomes[champion].fitness - 10.0).abs() < 1e-9);

        // shared fitness is boosted for youth then divided by size
        let expected = 10.0 * config.age_significance / 10.0;
        assert!((genomes[champion].shared_fitness - expected).abs() < 1e-9);
    }

    #[test]
    fn test_stagnation_penalty_applies_past_penalizing_age() {
        let (mut genomes, mut species, _ctx, _rng) = setup(4);
        let config = NeatConfig {
            penalizing_age: 2,
            age_significance: 1.0,
            ..NeatConfig::default()
        };

        species.update_fitness(&mut genomes, &config);
        let fresh = genomes[species.champion(&genomes).unwrap()].shared_fitness;

        // no fitness improvement for a while
        for _ in 0..5 {
            species.update_fitness(&mut genomes, &config);
        }
        assert_eq!(species.generations_since_improvement, 5);
        let stale = genomes[species.champion(&genomes).unwrap()].shared_fitness;
        assert!(stale < fresh);
    }

    #[test]
    fn test_fitness_floor_keeps_sharing_positive() {
        let (mut genomes, mut species, _ctx, _rng) = setup(5);
        for genome in genomes.values_mut() {
            genome.fitness = 0.0;
        }
        species.update_fitness(&mut genomes, &NeatConfig::default());
        for genome in genomes.values() {
            assert!(genome.shared_fitness > 0.0);
        }
    }

    #[test]
    fn test_reproduce_fills_allocation() {
        let (mut genomes, mut species, mut ctx, mut rng) = setup(10);
        let config = NeatConfig::default();
        species.update_fitness(&mut genomes, &config);

        let all_parents = species.parents(&genomes);
        let mut mutation = Mutation::new(config.clone());
        let crossover = Crossover::new(config.clone());

        let children = species.reproduce(
            8,
            &genomes,
            &all_parents,
            &mut mutation,
            &crossover,
            &mut ctx,
            &config,
            &mut rng,
        );
        assert_eq!(children.len(), 8);
        for child in &children {
            assert!(!child.is_parent);
            assert!((child.fitness - 0.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_champion_credits_produce_clones() {
        let (mut genomes, mut species, mut ctx, mut rng) = setup(10);
        let config = NeatConfig::default();
        species.update_fitness(&mut genomes, &config);

        let champion = species.champion(&genomes).unwrap();
        genomes[champion].is_population_champion = true;
        let champion_connections: Vec<u64> = genomes[champion]
            .connections
            .values()
            .map(|c| c.weight.to_bits())
            .collect();

        let all_parents = species.parents(&genomes);
        let mut mutation = Mutation::new(config.clone());
        let crossover = Crossover::new(config.clone());
        let children = species.reproduce(
            6,
            &genomes,
            &all_parents,
            &mut mutation,
            &crossover,
            &mut ctx,
            &config,
            &mut rng,
        );

        // the first champion_clones children are byte-for-byte weight copies
        let clone_weights: Vec<u64> = children[0]
            .connections
            .values()
            .map(|c| c.weight.to_bits())
            .collect();
        assert_eq!(clone_weights, champion_connections);
        assert!(!children[0].is_population_champion);
    }

    #[test]
    fn test_interspecies_mate_comes_from_other_species() {
        let (mut genomes, mut species, mut ctx, mut rng) = setup(6);
        let config = NeatConfig {
            interspecies_mating: 1.0,
            mutation_without_crossover: 0.0,
            crossover_without_mutation: 1.0,
            ..NeatConfig::default()
        };
        species.update_fitness(&mut genomes, &config);

        // a structurally richer parent belonging to some other species
        let champion = species.champion(&genomes).unwrap();
        let insider_nodes = genomes[champion].nodes.len();
        let mut outsider = genomes[champion].clone_structure();
        for _ in 0..2 {
            let key = outsider
                .connections
                .iter()
                .find(|(_, c)| c.enabled)
                .map(|(k, _)| k)
                .unwrap();
            outsider.split_connection(key, &mut ctx).unwrap();
        }
        outsider.fitness = 100.0;
        outsider.is_parent = true;
        let outsider_nodes = outsider.nodes.len();
        assert!(outsider_nodes > insider_nodes);
        let outsider_key = genomes.insert(outsider);

        let mut all_parents = species.parents(&genomes);
        all_parents.push(outsider_key);

        let mut mutation = Mutation::new(config.clone());
        let crossover = Crossover::new(config.clone());
        let children = species.reproduce(
            6,
            &genomes,
            &all_parents,
            &mut mutation,
            &crossover,
            &mut ctx,
            &config,
            &mut rng,
        );

        // slot 0 clones the species champion; every crossover slot mates
        // with the outsider, whose higher fitness donates its structure
        assert_eq!(children[0].nodes.len(), insider_nodes);
        for child in &children[1..] {
            assert_eq!(child.nodes.len(), outsider_nodes);
        }
    }

    #[test]
    fn test_exhausted_breeding_falls_back_to_parent_clone() {
        let mut ctx = EvolutionContext::new();
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let mut features = InputFeatures::new();
        features.insert("Cat".into(), [("x".to_owned(), 0.4)].into_iter().collect());
        let space = ActionSpace::new(vec![Action::new("Wait")]);
        let config = NeatConfig {
            mutation_without_crossover: 1.0,
            add_node_prob: 0.0,
            add_connection_prob: 0.0,
            toggle_enable_prob: 1.0,
            toggle_times: 1,
            reenable_prob: 0.0,
            weight_mutation_prob: 0.0,
            ..NeatConfig::default()
        };

        let mut genome =
            NeatChromosome::generate(config.clone(), &space, &features, &mut ctx, &mut rng);
        // a single-connection network: every toggle yields a defect child
        let bias = ctx.bias_node();
        let cut: Vec<_> = genome
            .connections
            .iter()
            .filter(|(_, c)| c.source == bias)
            .map(|(k, _)| k)
            .collect();
        for key in cut {
            genome.connections.remove(key);
        }
        assert_eq!(genome.connections.len(), 1);
        genome.fitness = 1.0;

        let mut genomes = SlotMap::with_key();
        let key = genomes.insert(genome);
        let mut species = Species::new(0, genomes[key].clone_structure());
        species.members.push(key);
        species.update_fitness(&mut genomes, &config);

        let all_parents = species.parents(&genomes);
        let mut mutation = Mutation::new(config.clone());
        let crossover = Crossover::new(config.clone());
        let mut children = species.reproduce(
            4,
            &genomes,
            &all_parents,
            &mut mutation,
            &crossover,
            &mut ctx,
            &config,
            &mut rng,
        );

        // breeding attempts are exhausted for every non-clone slot, yet no
        // defect child reaches the population
        assert_eq!(children.len(), 4);
        for child in children.iter_mut() {
            assert!(child.activate_dummy());
        }
    }

    #[test]
    fn test_single_parent_species_still_reproduces() {
        let (mut genomes, mut species, mut ctx, mut rng) = setup(1);
        let config = NeatConfig::default();
        species.update_fitness(&mut genomes, &config);

        let all_parents = species.parents(&genomes);
        let mut mutation = Mutation::new(config.clone());
        let crossover = Crossover::new(config.clone());
        let children = species.reproduce(
            3,
            &genomes,
            &all_parents,
            &mut mutation,
            &crossover,
            &mut ctx,
            &config,
            &mut rng,
        );
        assert_eq!(children.len(), 3);
    }
}
