//! Generation loop: asynchronous evaluation, synchronous evolution.
//!
//! The [`SearchDriver`] alternates two phases. In the evaluation phase every
//! chromosome is handed to the [`FitnessEvaluator`], which drives the target
//! program with it (usually over some async boundary) and reports fitness
//! plus any coverage targets the run hit. In the evolution phase the
//! population turns over synchronously on the control thread. No chromosome
//! is mutated while it is being evaluated.

use std::collections::BTreeSet;

use log::info;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::actions::ExecutionTrace;
use crate::genome::NeatChromosome;
use crate::innovation::EvolutionContext;
use crate::population::Population;

/// Generations evaluated when no stopping condition is installed.
const DEFAULT_GENERATION_LIMIT: usize = 100;

/// One coverage goal in the target program, e.g. a script block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageTarget {
    /// Stable identifier of the goal.
    pub id: String,
}

impl CoverageTarget {
    /// A coverage target by id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// What one evaluation of one chromosome produced.
#[derive(Debug, Clone, Default)]
pub struct EvaluationOutcome {
    /// Raw fitness of the run.
    pub fitness: f64,
    /// Ids of the coverage targets this run hit.
    pub covered_targets: Vec<String>,
    /// Recorded action sequence, if the evaluator keeps one.
    pub trace: Option<ExecutionTrace>,
}

/// Evaluates chromosomes against the target program.
///
/// Implementations typically activate the chromosome step by step against a
/// running simulation, so evaluation is async; the driver awaits each
/// evaluation before touching the chromosome again.
#[allow(async_fn_in_trait)]
pub trait FitnessEvaluator {
    /// Run one chromosome and report the outcome.
    ///
    /// The evaluator activates the chromosome itself (through
    /// [`NeatChromosome::activate`]) and may register newly discovered input
    /// features via `ctx`.
    async fn evaluate(
        &mut self,
        chromosome: &mut NeatChromosome,
        ctx: &mut EvolutionContext,
    ) -> EvaluationOutcome;
}

/// When the search loop stops. Any satisfied condition ends the run.
#[derive(Debug, Clone, PartialEq)]
pub enum StoppingCondition {
    /// Stop after this many evaluated generations.
    Generations(usize),
    /// Stop once every configured coverage target has been hit.
    FullCoverage,
    /// Stop once some chromosome reaches this raw fitness.
    FitnessAtLeast(f64),
}

/// Why the search ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The generation limit was hit.
    GenerationLimit,
    /// Every coverage target was hit.
    FullCoverage,
    /// The fitness goal was reached.
    FitnessReached,
}

/// Summary of a finished search.
#[derive(Debug, Clone)]
pub struct SearchResult {
    /// Generations evaluated.
    pub generations: usize,
    /// Best raw fitness seen anywhere in the run.
    pub best_fitness: f64,
    /// Ids of all coverage targets hit across the run.
    pub covered: BTreeSet<String>,
    /// The condition that ended the run.
    pub reason: StopReason,
}

/// Drives the evaluate/evolve loop to a stopping condition.
pub struct SearchDriver<E> {
    population: Population,
    evaluator: E,
    targets: Vec<CoverageTarget>,
    conditions: Vec<StoppingCondition>,
    covered: BTreeSet<String>,
}

impl<E: FitnessEvaluator> SearchDriver<E> {
    /// Create a driver over a population and an evaluator.
    ///
    /// Without any [`Self::stop_when`] condition the driver falls back to a
    /// limit of 100 generations.
    #[must_use]
    pub fn new(population: Population, evaluator: E, targets: Vec<CoverageTarget>) -> Self {
        Self {
            population,
            evaluator,
            targets,
            conditions: Vec::new(),
            covered: BTreeSet::new(),
        }
    }

    /// Add a stopping condition.
    #[must_use]
    pub fn stop_when(mut self, condition: StoppingCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// The population being evolved.
    #[must_use]
    pub fn population(&self) -> &Population {
        &self.population
    }

    /// Coverage targets hit so far.
    #[must_use]
    pub fn covered(&self) -> &BTreeSet<String> {
        &self.covered
    }

    /// Run the loop until a stopping condition holds.
    pub async fn run<R: Rng>(&mut self, rng: &mut R) -> SearchResult {
        let mut best_fitness = f64::NEG_INFINITY;
        let mut generations = 0;

        loop {
            self.evaluate_generation().await;
            generations += 1;

            let generation_best = self
                .population
                .genomes()
                .values()
                .map(|g| g.fitness)
                .fold(f64::NEG_INFINITY, f64::max);
            best_fitness = best_fitness.max(generation_best);
            info!(
                "generation {generations} evaluated: best fitness {generation_best:.3}, {} of {} targets covered",
                self.covered.len(),
                self.targets.len()
            );

            if let Some(reason) = self.stop_reason(generations, best_fitness) {
                return SearchResult {
                    generations,
                    best_fitness,
                    covered: self.covered.clone(),
                    reason,
                };
            }

            self.population.evolve(rng);
        }
    }

    /// Evaluate every chromosome of the current generation, one at a time,
    /// writing outcomes back before the next chromosome starts.
    async fn evaluate_generation(&mut self) {
        let (genomes, ctx) = self.population.split_for_evaluation();
        for genome in genomes.values_mut() {
            let outcome = self.evaluator.evaluate(genome, ctx).await;
            genome.fitness = outcome.fitness;
            genome.covered = !outcome.covered_targets.is_empty();
            genome.trace = outcome.trace;
            self.covered.extend(outcome.covered_targets);
        }
    }

    fn stop_reason(&self, generations: usize, best_fitness: f64) -> Option<StopReason> {
        let mut has_generation_limit = false;
        for condition in &self.conditions {
            match condition {
                StoppingCondition::Generations(limit) => {
                    has_generation_limit = true;
                    if generations >= *limit {
                        return Some(StopReason::GenerationLimit);
                    }
                }
                StoppingCondition::FullCoverage => {
                    if !self.targets.is_empty()
                        && self.targets.iter().all(|t| self.covered.contains(&t.id))
                    {
                        return Some(StopReason::FullCoverage);
                    }
                }
                StoppingCondition::FitnessAtLeast(goal) => {
                    if best_fitness >= *goal {
                        return Some(StopReason::FitnessReached);
                    }
                }
            }
        }
        if !has_generation_limit && generations >= DEFAULT_GENERATION_LIMIT {
            return Some(StopReason::GenerationLimit);
        }
        None
    }
}
