//! Tuning constants for the bucketing structure.
//!
//! # Design Decisions
//!
//! The bulk-update thresholds mirror the grain sizes the parallel runtime is
//! efficient at: below [`SEQUENTIAL_THRESHOLD`] entries a fork-join dispatch
//! costs more than the work it distributes, and [`BLOCK_SIZE_TARGET`] keeps
//! each histogram/scatter block large enough that its counters stay resident
//! in L1 between the two passes over the input.
//!
//! All invariants verified at compile time via `const` assertions.

/// CPU cache line size in bytes.
///
/// Scratch rows touched by concurrent workers (per-block histograms, per-block
/// scatter cursors) are padded to this granularity so neighboring workers never
/// write the same line.
pub const CACHE_LINE_SIZE: usize = 64;

/// Scratch counters per cache line. Histogram and cursor row strides are
/// rounded up to a multiple of this value.
pub const COUNTERS_PER_CACHE_LINE: usize = CACHE_LINE_SIZE / size_of::<u32>();

/// Default number of materialized buckets (open window plus the overflow
/// slot). Workload-dependent: larger values amortize window advances, smaller
/// values avoid scanning empty slots. Overridable per structure via
/// [`BucketSet::with_total_buckets`](crate::bucket_set::BucketSet::with_total_buckets).
pub const DEFAULT_TOTAL_BUCKETS: usize = 128;

/// Smallest legal bucket count: one open bucket plus the overflow slot.
pub const MIN_TOTAL_BUCKETS: usize = 2;

/// Below this many update entries (or on a single-thread pool), bulk updates
/// take the sequential path.
pub const SEQUENTIAL_THRESHOLD: usize = 2048;

/// Target entries per block in the parallel bulk-update path. The block count
/// is `k / BLOCK_SIZE_TARGET` rounded up to a power of two.
pub const BLOCK_SIZE_TARGET: usize = 4096;

// =============================================================================
// Compile-time design integrity assertions
// =============================================================================

const _: () = assert!(
    CACHE_LINE_SIZE.is_power_of_two(),
    "Cache line size must be a power of two for alignment arithmetic"
);
const _: () = assert!(
    CACHE_LINE_SIZE.is_multiple_of(size_of::<u32>()),
    "Cache line must hold a whole number of u32 counters"
);
const _: () = assert!(COUNTERS_PER_CACHE_LINE == CACHE_LINE_SIZE / size_of::<u32>());
const _: () = assert!(COUNTERS_PER_CACHE_LINE > 0);

const _: () = assert!(MIN_TOTAL_BUCKETS >= 2, "Need one open bucket plus overflow");
const _: () = assert!(DEFAULT_TOTAL_BUCKETS >= MIN_TOTAL_BUCKETS);

const _: () = assert!(SEQUENTIAL_THRESHOLD > 0);
const _: () = assert!(BLOCK_SIZE_TARGET > 0);
const _: () = assert!(
    SEQUENTIAL_THRESHOLD <= BLOCK_SIZE_TARGET,
    "Sequential gate must not exceed the per-block work target"
);

// Bucket identifiers are u32; the structure addresses them with usize.
const _: () = assert!(
    size_of::<usize>() >= size_of::<u32>(),
    "Platform must have at least 32-bit addressing"
);
