//! Benchmark for slot resolution and full pack fulfillment.
//!
//! TARGET: 1,000,000 slot resolutions per second
//!
//! Run with: cargo bench --package packmint_engine --bench selection_benchmark

use alloy_primitives::{Address, U256};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use packmint_engine::{
    DistributionEngine, EngineConfig, ItemDefinition, MemoryLedger, Rarity, RarityCatalog,
    RaritySelector, SequentialCoordinator, SupplyRegistry, TierTables,
};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

const BUNDLE_SIZE: u32 = 15;

fn create_test_catalog() -> (RarityCatalog, SupplyRegistry) {
    let mut catalog = RarityCatalog::new();
    let supply = SupplyRegistry::new();

    // 100 items spread over every tier, scarce tiers capped
    for i in 0..100u32 {
        let rarity = match i % 10 {
            0..=4 => Rarity::Common,
            5..=7 => Rarity::Uncommon,
            8 => Rarity::Rare,
            _ if i % 20 == 9 => Rarity::Mythical,
            _ => Rarity::Serialized,
        };
        let mut item = ItemDefinition::new(i, format!("Card_{i}"), rarity);
        if rarity.is_scarce() {
            item = item.with_max_issuance(u64::MAX);
        }
        supply.register(item.id, item.max_issuance).unwrap();
        catalog.add_item(item).unwrap();
    }

    (catalog, supply)
}

fn random_words(rng: &mut ChaCha20Rng, count: usize) -> Vec<U256> {
    (0..count)
        .map(|_| U256::from_limbs([rng.next_u64(), rng.next_u64(), rng.next_u64(), rng.next_u64()]))
        .collect()
}

fn benchmark_single_slot(c: &mut Criterion) {
    let (catalog, supply) = create_test_catalog();
    let tables = TierTables::default();
    let selector = RaritySelector::new(&catalog, &supply, &tables, 14);
    let mut rng = ChaCha20Rng::seed_from_u64(42);
    let words = random_words(&mut rng, 1024);

    c.bench_function("single_slot_resolution", |b| {
        let mut i = 0usize;
        b.iter(|| {
            i = (i + 1) % words.len();
            black_box(selector.resolve_slot(black_box(i % 15), words[i]))
        });
    });
}

fn benchmark_bundle(c: &mut Criterion) {
    let (catalog, supply) = create_test_catalog();
    let tables = TierTables::default();
    let selector = RaritySelector::new(&catalog, &supply, &tables, 14);
    let mut rng = ChaCha20Rng::seed_from_u64(7);
    let bundles: Vec<Vec<U256>> = (0..256)
        .map(|_| random_words(&mut rng, BUNDLE_SIZE as usize))
        .collect();

    let mut group = c.benchmark_group("bundle_resolution");
    group.throughput(Throughput::Elements(u64::from(BUNDLE_SIZE)));
    group.bench_function("resolve_15_slots", |b| {
        let mut i = 0usize;
        b.iter(|| {
            i = (i + 1) % bundles.len();
            black_box(selector.resolve_bundle(&bundles[i]))
        });
    });
    group.finish();
}

fn benchmark_open_and_fulfill(c: &mut Criterion) {
    let coordinator = Address::repeat_byte(0xC0);
    let buyer = Address::repeat_byte(0x11);
    let config = EngineConfig::new(BUNDLE_SIZE, u64::from(BUNDLE_SIZE) * 10_000_000, coordinator)
        .with_item(ItemDefinition::new(1, "Squire", Rarity::Common))
        .with_item(ItemDefinition::new(2, "Archer", Rarity::Common))
        .with_item(ItemDefinition::new(10, "Knight", Rarity::Uncommon))
        .with_item(ItemDefinition::new(20, "Paladin", Rarity::Rare))
        .with_item(ItemDefinition::new(30, "Archmage", Rarity::Mythical).with_max_issuance(100))
        .with_item(ItemDefinition::new(40, "Crown #1", Rarity::Serialized).with_max_issuance(1));
    let engine =
        DistributionEngine::from_config(&config, SequentialCoordinator::new(), MemoryLedger::new())
            .unwrap();
    let mut rng = ChaCha20Rng::seed_from_u64(99);
    let words = random_words(&mut rng, BUNDLE_SIZE as usize);

    c.bench_function("open_and_fulfill_pack", |b| {
        b.iter(|| {
            let id = engine.open_pack_at(buyer, 0).unwrap();
            black_box(engine.fulfill(coordinator, id, &words).unwrap())
        });
    });
}

criterion_group!(
    benches,
    benchmark_single_slot,
    benchmark_bundle,
    benchmark_open_and_fulfill
);
criterion_main!(benches);
