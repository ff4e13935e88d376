//! Benchmarks for neatest.

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use neatest::{
    Action, ActionSpace, Crossover, EvolutionContext, InputFeatures, Mutation, NeatChromosome,
    NeatConfig, Population,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

fn bench_features() -> InputFeatures {
    let mut features = InputFeatures::new();
    for sprite in ["Cat", "Ball", "Stage"] {
        features.insert(
            sprite.to_owned(),
            ["x", "y", "dx", "dy", "size"]
                .into_iter()
                .map(|name| (name.to_owned(), 0.5))
                .collect(),
        );
    }
    features
}

fn bench_actions() -> ActionSpace {
    ActionSpace::new(vec![
        Action::new("Wait"),
        Action::new("KeyPress:space"),
        Action::new("KeyPress:left"),
        Action::new("KeyPress:right"),
        Action::with_parameters("MouseMove", ["x", "y"]),
    ])
}

fn bench_generation(c: &mut Criterion) {
    let features = bench_features();
    let space = bench_actions();

    c.bench_function("chromosome_generate", |b| {
        let mut ctx = EvolutionContext::new();
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        b.iter(|| {
            black_box(NeatChromosome::generate(
                NeatConfig::default(),
                &space,
                &features,
                &mut ctx,
                &mut rng,
            ));
        });
    });
}

fn bench_activation(c: &mut Criterion) {
    let features = bench_features();
    let space = bench_actions();
    let mut ctx = EvolutionContext::new();
    let mut rng = ChaCha8Rng::seed_from_u64(42);

    let config = NeatConfig {
        add_node_prob: 0.5,
        add_connection_prob: 0.5,
        ..NeatConfig::default()
    };
    let mut chromosome =
        NeatChromosome::generate(config.clone(), &space, &features, &mut ctx, &mut rng);
    let mut mutation = Mutation::new(config);
    for _ in 0..20 {
        chromosome = mutation.apply(&chromosome, &mut ctx, &mut rng);
    }

    c.bench_function("chromosome_activate", |b| {
        b.iter(|| {
            black_box(chromosome.activate(&features, &mut ctx));
        });
    });
}

fn bench_mutation(c: &mut Criterion) {
    let features = bench_features();
    let space = bench_actions();
    let mut ctx = EvolutionContext::new();
    let mut rng = ChaCha8Rng::seed_from_u64(42);

    let chromosome = NeatChromosome::generate(
        NeatConfig::default(),
        &space,
        &features,
        &mut ctx,
        &mut rng,
    );
    let mut mutation = Mutation::new(NeatConfig::default());

    c.bench_function("mutation_apply", |b| {
        b.iter(|| {
            black_box(mutation.apply(&chromosome, &mut ctx, &mut rng));
        });
    });
}

fn bench_crossover(c: &mut Criterion) {
    let features = bench_features();
    let space = bench_actions();
    let mut ctx = EvolutionContext::new();
    let mut rng = ChaCha8Rng::seed_from_u64(42);

    let parent = NeatChromosome::generate(
        NeatConfig::default(),
        &space,
        &features,
        &mut ctx,
        &mut rng,
    );
    let mut mutation = Mutation::new(NeatConfig::default());
    let mut a = parent.clone_structure();
    let mut b_parent = parent.clone_structure();
    for _ in 0..5 {
        a = mutation.apply(&a, &mut ctx, &mut rng);
        b_parent = mutation.apply(&b_parent, &mut ctx, &mut rng);
    }
    let crossover = Crossover::new(NeatConfig::default());

    c.bench_function("crossover_apply", |b| {
        b.iter(|| {
            black_box(crossover.apply(&a, &b_parent, &mut rng));
        });
    });
}

fn bench_compatibility_distance(c: &mut Criterion) {
    let features = bench_features();
    let space = bench_actions();
    let mut ctx = EvolutionContext::new();
    let mut rng = ChaCha8Rng::seed_from_u64(42);

    let parent = NeatChromosome::generate(
        NeatConfig::default(),
        &space,
        &features,
        &mut ctx,
        &mut rng,
    );
    let mut mutation = Mutation::new(NeatConfig::default());
    let mut a = parent.clone_structure();
    let mut b_parent = parent.clone_structure();
    for _ in 0..10 {
        a = mutation.apply(&a, &mut ctx, &mut rng);
        b_parent = mutation.apply(&b_parent, &mut ctx, &mut rng);
    }

    c.bench_function("compatibility_distance", |b| {
        b.iter(|| {
            black_box(a.compatibility_distance(Some(&b_parent)));
        });
    });
}

fn bench_evolve(c: &mut Criterion) {
    let features = bench_features();
    let space = bench_actions();

    c.bench_function("population_evolve_50", |b| {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let mut population =
            Population::new(NeatConfig::minimal(50), &space, &features, &mut rng);
        b.iter(|| {
            let (genomes, ctx) = population.split_for_evaluation();
            for genome in genomes.values_mut() {
                genome.activate(&features, ctx);
                genome.fitness = genome.num_enabled_connections() as f64;
            }
            population.evolve(&mut rng);
        });
    });
}

criterion_group!(
    benches,
    bench_generation,
    bench_activation,
    bench_mutation,
    bench_crossover,
    bench_compatibility_distance,
    bench_evolve,
);
criterion_main!(benches);
