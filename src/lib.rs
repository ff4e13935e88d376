//! # Neatest
//!
//! A `NeuroEvolution` of Augmenting Topologies (NEAT) engine for
//! coverage-driven test generation of interactive, sprite-based programs.
//! Chromosomes encode recurrent neural networks that read named program
//! features and emit input actions; evolution searches for networks whose
//! action sequences reach uncovered program behavior.
//!
//! ## Features
//!
//! - **Explicit Evolution Context**: innovation numbers, node identities and
//!   input/output tables live in one injectable [`EvolutionContext`], not in
//!   globals, so runs are reproducible and testable in isolation
//! - **Named I/O**: input nodes are keyed by `(sprite, feature)` name and
//!   output nodes by action, so networks generated or extended at different
//!   times stay structurally aligned
//! - **Arena-Graph Model**: connection genes in flat `SlotMap` buffers,
//!   cycles as plain edge records resolved by double-buffered activation
//! - **Pluggable Reproduction**: offspring allocation behind the
//!   [`ReproductionPolicy`] trait, gradient weight tuning behind
//!   [`WeightTrainer`]
//! - **Async Evaluation Boundary**: the [`SearchDriver`] awaits a
//!   [`FitnessEvaluator`] per chromosome, then evolves synchronously
//!
//! ## Quick Start
//!
//! ```rust
//! use neatest::{Action, ActionSpace, InputFeatures, NeatConfig, Population};
//! use rand::SeedableRng;
//! use rand_chacha::ChaCha8Rng;
//!
//! // One sprite exposing one feature, two available actions
//! let mut features = InputFeatures::new();
//! features
//!     .entry("Cat".to_owned())
//!     .or_default()
//!     .insert("x".to_owned(), 0.5);
//! let space = ActionSpace::new(vec![
//!     Action::new("Wait"),
//!     Action::with_parameters("MouseMove", ["x", "y"]),
//! ]);
//!
//! let mut rng = ChaCha8Rng::seed_from_u64(42);
//! let mut population = Population::new(NeatConfig::minimal(20), &space, &features, &mut rng);
//!
//! for _ in 0..3 {
//!     let (genomes, ctx) = population.split_for_evaluation();
//!     for genome in genomes.values_mut() {
//!         genome.activate(&features, ctx);
//!         // stand-in fitness; real runs use a FitnessEvaluator
//!         genome.fitness = genome.classification_distribution()[0].1;
//!     }
//!     population.evolve(&mut rng);
//! }
//! println!("best fitness ever: {}", population.best_fitness_ever());
//! ```
//!
//! ## Architecture
//!
//! ### Stable Identities
//!
//! Every node id and innovation number is minted exactly once by the shared
//! context and reused for every later occurrence of the same named input,
//! output, edge or split. Two chromosomes that independently grow the same
//! structure end up gene-aligned, which is what compatibility distance and
//! crossover rely on.
//!
//! ### Two-Phase Generation Loop
//!
//! Evaluation is async and touches chromosomes one at a time; evolution runs
//! synchronously on the control thread between evaluation rounds. The shared
//! context is only mutated between the two phases, so no locking is needed.

pub mod actions;
pub mod activation;
pub mod config;
pub mod crossover;
pub mod gene;
pub mod genome;
pub mod innovation;
pub mod mutation;
pub mod population;
pub mod search;
pub mod species;

// Re-exports for convenience
pub use actions::{Action, ActionSpace, ExecutionTrace, InputFeatures, TraceEvent};
pub use activation::Activation;
pub use config::{ConnectionMode, NeatConfig};
pub use crossover::Crossover;
pub use gene::{ConnectionGene, ConnectionKey, Innovation, NodeGene, NodeId, NodeKind};
pub use genome::NeatChromosome;
pub use innovation::{EvolutionContext, InnovationLedger, InnovationRecord, SplitInnovation};
pub use mutation::{Mutation, WeightTrainer};
pub use population::{
    GenomeKey, NeatPolicy, Population, PopulationError, RandomPolicy, ReproductionPolicy,
};
pub use search::{
    CoverageTarget, EvaluationOutcome, FitnessEvaluator, SearchDriver, SearchResult, StopReason,
    StoppingCondition,
};
pub use species::Species;
