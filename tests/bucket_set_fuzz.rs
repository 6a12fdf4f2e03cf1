//! Randomized drain/reassign fuzz against a reference model.
//!
//! Each run builds a structure over a random priority assignment, then
//! alternates yields with contract-respecting reassignments: a priority only
//! relaxes monotonically toward the bucket being emitted, never behind it and
//! never back up to a value it already left (the way distance and degree
//! algorithms drive the structure), or the identifier is deleted outright.
//! The model tracks which identifiers remain and at which priority; the run
//! checks that every surviving identifier is emitted exactly once at its
//! priority-at-emission, that emitted bucket numbers are monotone, and that
//! the structure drains to zero.

use bucketing::{BucketDest, BucketId, BucketSet, Id, NULL_BKT, Order};
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};

#[derive(Clone)]
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        let seed = if seed == 0 {
            0xDEAD_BEEF_DEAD_BEEFu64
        } else {
            seed
        };
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    fn range_inclusive_u32(&mut self, min: u32, max: u32) -> u32 {
        assert!(min <= max);
        let span = (max - min) as u64 + 1;
        min + (self.next_u64() % span) as u32
    }

    fn chance(&mut self, one_in: u64) -> bool {
        self.next_u64() % one_in == 0
    }
}

struct PriorityTable {
    slots: Vec<AtomicU32>,
}

impl PriorityTable {
    fn new(values: &[BucketId]) -> Self {
        Self {
            slots: values.iter().map(|&v| AtomicU32::new(v)).collect(),
        }
    }

    fn get(&self, id: Id) -> BucketId {
        self.slots[id as usize].load(AtomicOrdering::Relaxed)
    }

    fn set(&self, id: Id, value: BucketId) {
        self.slots[id as usize].store(value, AtomicOrdering::Relaxed)
    }
}

fn initial_priorities(rng: &mut XorShift64, n: usize, span: u32) -> Vec<BucketId> {
    (0..n)
        .map(|_| {
            if rng.chance(10) {
                NULL_BKT
            } else {
                rng.range_inclusive_u32(0, span - 1)
            }
        })
        .collect()
}

/// New priority for an identifier currently at `prev`: relaxed toward the
/// bucket being emitted, never past it and never back up. Unemitted
/// identifiers always sit on the open side of the cursor, which this also
/// verifies.
fn legal_reassignment(
    rng: &mut XorShift64,
    order: Order,
    emitted_raw: BucketId,
    prev: BucketId,
) -> BucketId {
    match order {
        Order::Increasing => {
            assert!(prev >= emitted_raw, "queued id behind the cursor");
            rng.range_inclusive_u32(emitted_raw, prev)
        }
        Order::Decreasing => {
            assert!(prev <= emitted_raw, "queued id ahead of the cursor");
            rng.range_inclusive_u32(0, prev)
        }
    }
}

fn run_fuzz(seed: u64, n: usize, total_buckets: usize, order: Order) {
    let mut rng = XorShift64::new(seed);
    let span = 1 + (rng.next_u64() % 300) as u32;

    let initial = initial_priorities(&mut rng, n, span);
    let table = PriorityTable::new(&initial);
    let mut set = BucketSet::with_total_buckets(n, |id: Id| table.get(id), order, total_buckets);

    // Model: identifiers still queued, each at its current priority.
    let mut remaining: BTreeMap<Id, BucketId> = initial
        .iter()
        .enumerate()
        .filter(|&(_, &p)| p != NULL_BKT)
        .map(|(id, &p)| (id as Id, p))
        .collect();
    assert_eq!(set.num_queued(), remaining.len());

    let mut last_raw: Option<BucketId> = None;
    loop {
        let bucket = set.next_bucket();
        if bucket.is_null() {
            break;
        }
        let raw = bucket.id;

        if let Some(prev) = last_raw {
            match order {
                Order::Increasing => assert!(raw >= prev, "bucket order regressed: {prev} -> {raw}"),
                Order::Decreasing => assert!(raw <= prev, "bucket order regressed: {prev} -> {raw}"),
            }
        }
        last_raw = Some(raw);

        assert!(!bucket.identifiers.is_empty());
        assert!(bucket.num_filtered >= bucket.identifiers.len());
        for id in bucket.identifiers.iter() {
            let expected = remaining
                .remove(&id)
                .unwrap_or_else(|| panic!("id {id} emitted twice or never queued"));
            assert_eq!(expected, raw, "id {id} emitted from the wrong bucket");
        }

        // Reassign a random slice of the still-queued identifiers through the
        // public transition protocol.
        let mut moves: Vec<(Id, BucketId, BucketId)> = Vec::new();
        for (&id, &prev) in remaining.iter() {
            if !rng.chance(4) {
                continue;
            }
            let next = if rng.chance(12) {
                NULL_BKT
            } else {
                legal_reassignment(&mut rng, order, raw, prev)
            };
            moves.push((id, prev, next));
        }

        let mut entries: Vec<(Id, BucketDest)> = Vec::with_capacity(moves.len());
        for &(id, prev, next) in &moves {
            table.set(id, next);
            entries.push((id, set.get_bucket(prev, next)));
            if next == NULL_BKT {
                remaining.remove(&id);
            } else {
                remaining.insert(id, next);
            }
        }
        set.update_buckets(|j| Some(entries[j]), entries.len());
    }

    assert!(
        remaining.is_empty(),
        "{} identifiers were never emitted",
        remaining.len()
    );
    assert_eq!(set.num_queued(), 0);
}

/// Static assignment, no reassignment between yields: the drain must match
/// the model ordering exactly, bucket by bucket.
fn run_static_drain(seed: u64, n: usize, total_buckets: usize, order: Order) {
    let mut rng = XorShift64::new(seed);
    let span = 1 + (rng.next_u64() % 5_000) as u32;
    let initial = initial_priorities(&mut rng, n, span);

    let moved = initial.clone();
    let mut set = BucketSet::with_total_buckets(
        n,
        move |id: Id| moved[id as usize],
        order,
        total_buckets,
    );

    let mut expect: BTreeMap<BucketId, Vec<Id>> = BTreeMap::new();
    for (id, &p) in initial.iter().enumerate() {
        if p != NULL_BKT {
            expect.entry(p).or_default().push(id as Id);
        }
    }

    let mut yields: Vec<(BucketId, Vec<Id>)> = Vec::new();
    loop {
        let bucket = set.next_bucket();
        if bucket.is_null() {
            break;
        }
        yields.push((bucket.id, bucket.identifiers.into_ids()));
    }

    let model: Vec<(BucketId, Vec<Id>)> = match order {
        Order::Increasing => expect.into_iter().collect(),
        Order::Decreasing => expect.into_iter().rev().collect(),
    };
    assert_eq!(yields, model);
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 24, ..ProptestConfig::default() })]

    #[test]
    fn fuzz_reassigning_drain_matches_model(
        seed in any::<u64>(),
        n_multiplier in 1usize..=8,
        total_buckets in prop_oneof![Just(2usize), Just(4), Just(8), Just(128)],
        decreasing in any::<bool>(),
    ) {
        let order = if decreasing { Order::Decreasing } else { Order::Increasing };
        run_fuzz(seed, 512 * n_multiplier, total_buckets, order);
    }

    #[test]
    fn fuzz_static_drain_matches_model(
        seed in any::<u64>(),
        n_multiplier in 1usize..=8,
        total_buckets in prop_oneof![Just(2usize), Just(4), Just(128)],
        decreasing in any::<bool>(),
    ) {
        let order = if decreasing { Order::Decreasing } else { Order::Increasing };
        run_static_drain(seed, 1024 * n_multiplier, total_buckets, order);
    }
}
