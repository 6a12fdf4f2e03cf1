//! Priority-bucketed frontier over a fixed identifier universe.
//!
//! The structure drives round-based algorithms that process identifiers in
//! priority order while priorities keep changing between rounds (shortest
//! paths by distance band, set cover by coverage, core decomposition by
//! induced degree). Callers repeatedly take the next non-empty bucket with
//! [`BucketSet::next_bucket`] and move identifiers to new buckets in bulk
//! with [`BucketSet::update_buckets`].
//!
//! # Lazy Window
//!
//! The priority range is unbounded, but at any moment only a narrow band of
//! it is active. Only `total_buckets` slots are materialized: the first
//! `total_buckets - 1` map a contiguous priority window onto slots, and the
//! last slot is an overflow sink for every identifier whose priority lies
//! beyond the window. When the cursor walks off the window, the overflow
//! slot is snapshotted and redistributed over the next window (`unpack`).
//! Ordering is therefore exact within a window and monotone across windows.
//!
//! # Bulk Updates
//!
//! `update_buckets` is the classic three-pass radix partition: per-block
//! histograms, a transposed (slot-major, block-minor) exclusive prefix sum,
//! and a scatter into per-slot append regions. The transposition makes each
//! slot's additions contiguous, so one capacity reservation per slot
//! suffices and block writers own disjoint segments. Scratch rows are padded
//! to cache-line granularity; sharding is by block index, never by worker
//! identity. Small or single-threaded updates take a plain sequential path.
//!
//! # Emission Filter
//!
//! An identifier's priority may change between its insertion into a slot and
//! the slot's emission, so slots can hold stale entries. Rather than eagerly
//! removing them, emission re-reads the priority map and keeps only
//! identifiers whose priority still equals the emitted bucket number. This
//! keeps updates O(1) per identifier and confines validation to emission;
//! [`Bucket::num_filtered`] reports the pre-filter slot size.
//!
//! # Concurrency Contract
//!
//! Public operations are phased: all state mutation happens on the calling
//! thread, and parallelism lives strictly inside the bulk update (histogram,
//! scatter) and the emission filter. Concurrent calls into the structure are
//! not supported. The priority map is queried from multiple workers during
//! those phases and must be `Sync`.
//!
//! # Failure Model
//!
//! There is no recoverable error. A detected structural violation (overflow
//! count disagreeing with the queued total during `unpack`) panics, as does
//! allocation failure; a bulk update that panics midway leaves the structure
//! poisoned.

use rayon::prelude::*;

use crate::constants::{
    BLOCK_SIZE_TARGET, COUNTERS_PER_CACHE_LINE, DEFAULT_TOTAL_BUCKETS, MIN_TOTAL_BUCKETS,
    SEQUENTIAL_THRESHOLD,
};
use crate::frontier::VertexSubset;
use crate::parallel;
use crate::stdx::IdArray;
use crate::util::align_up;

/// Identifier of an object being bucketed, in `[0, n)`.
pub type Id = u32;

/// A bucket number: the priority an identifier currently holds.
pub type BucketId = u32;

/// A destination slot in the materialized window, `[0, total_buckets)`,
/// or [`NULL_BKT`] for "no write needed".
pub type BucketDest = u32;

/// Sentinel priority: "not in any bucket".
pub const NULL_BKT: BucketId = BucketId::MAX;

/// Direction the buckets are traversed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Increasing,
    Decreasing,
}

/// Capability the structure needs from the caller: the *current* priority of
/// an identifier, or [`NULL_BKT`] when it is in no bucket.
///
/// Queried concurrently from worker threads during construction, window
/// advances, and the emission filter.
pub trait PriorityMap: Sync {
    fn priority(&self, id: Id) -> BucketId;
}

impl<F> PriorityMap for F
where
    F: Fn(Id) -> BucketId + Sync,
{
    #[inline]
    fn priority(&self, id: Id) -> BucketId {
        self(id)
    }
}

/// One yielded bucket: its raw priority, the surviving identifiers, and the
/// pre-filter slot size.
///
/// The id buffer inside `identifiers` is freshly allocated; ownership passes
/// to the caller.
#[derive(Debug)]
pub struct Bucket {
    /// Raw priority of the emitted bucket; [`NULL_BKT`] when the structure
    /// is exhausted.
    pub id: BucketId,
    pub identifiers: VertexSubset,
    /// Slot size before the emission filter; stale entries make this exceed
    /// `identifiers.len()`.
    pub num_filtered: usize,
}

impl Bucket {
    fn null(universe: usize) -> Self {
        Self {
            id: NULL_BKT,
            identifiers: VertexSubset::empty(universe),
            num_filtered: 0,
        }
    }

    /// `true` for the exhaustion sentinel.
    #[inline]
    pub fn is_null(&self) -> bool {
        self.id == NULL_BKT
    }
}

/// The materialized priority window: pure range arithmetic, separable from
/// the storage so bulk-update closures can carry a copy.
#[derive(Debug, Clone, Copy)]
struct Window {
    order: Order,
    /// Increasing: the window is `[cur_range * w, (cur_range + 1) * w)`.
    /// Decreasing: the window is `[(cur_range - 1) * w, cur_range * w)`.
    /// Products are formed in `u64`: priorities are `u32` and the range
    /// index can sit right at the top of that space.
    cur_range: u64,
    open_buckets: usize,
}

impl Window {
    /// Maps a raw priority to its destination slot under this window:
    /// a window slot, the overflow slot, or [`NULL_BKT`] for priorities that
    /// are null or stale (already behind the window; reachable through lazy
    /// reinsertion paths).
    fn slot_for(&self, priority: BucketId) -> BucketDest {
        if priority == NULL_BKT {
            return NULL_BKT;
        }
        let p = priority as u64;
        let width = self.open_buckets as u64;
        match self.order {
            Order::Increasing => {
                if p < self.cur_range * width {
                    return NULL_BKT;
                }
                if p < (self.cur_range + 1) * width {
                    (p % width) as BucketDest
                } else {
                    self.open_buckets as BucketDest
                }
            }
            Order::Decreasing => {
                if p >= self.cur_range * width {
                    return NULL_BKT;
                }
                // p >= (cur_range - 1) * width, written without underflow.
                if p + width >= self.cur_range * width {
                    // Slots enumerate the window from highest priority down.
                    (width - (p % width) - 1) as BucketDest
                } else {
                    self.open_buckets as BucketDest
                }
            }
        }
    }

    /// Inverse of [`slot_for`](Self::slot_for) at the cursor: the raw
    /// priority a window slot stands for.
    fn raw_priority(&self, slot: usize) -> u64 {
        debug_assert!(slot < self.open_buckets);
        let width = self.open_buckets as u64;
        match self.order {
            Order::Increasing => self.cur_range * width + slot as u64,
            Order::Decreasing => self.cur_range * width - slot as u64 - 1,
        }
    }
}

/// Raw bucket-slot base pointers for the scatter phase.
///
/// Workers write at indices proven disjoint by the prefix sum, so sharing
/// the bases across threads is sound even though they alias bucket storage.
struct ScatterTargets {
    bases: Vec<*mut Id>,
}

// SAFETY: the pointers are only written through `write`, whose callers hold
// disjoint (slot, offset) coordinates by construction of the prefix sum.
unsafe impl Sync for ScatterTargets {}

impl ScatterTargets {
    fn new(bkts: &mut [IdArray]) -> Self {
        Self {
            bases: bkts.iter_mut().map(IdArray::append_base).collect(),
        }
    }

    /// # Safety
    ///
    /// `offset` must lie inside `slot`'s reserved append region, and no other
    /// writer may target the same `(slot, offset)`.
    #[inline]
    unsafe fn write(&self, slot: usize, offset: usize, id: Id) {
        unsafe { self.bases[slot].add(offset).write(id) };
    }
}

/// Parallel, lazy, priority-bucketed frontier. See the module docs.
pub struct BucketSet<D: PriorityMap> {
    universe: usize,
    d: D,
    window: Window,
    total_buckets: usize,
    /// `total_buckets` arrays; index `open_buckets` is the overflow slot.
    bkts: Vec<IdArray>,
    /// Cursor within the window, always in `[0, open_buckets)` between calls.
    cur_bkt: usize,
    /// Total identifiers queued across all slots (stale entries included).
    num_elms: usize,
    allocated: bool,
}

impl<D: PriorityMap> BucketSet<D> {
    /// Creates a bucketing structure over `n` identifiers with the default
    /// bucket count, distributing every identifier by its current priority.
    /// Identifiers whose priority is [`NULL_BKT`] are left out.
    pub fn new(n: usize, d: D, order: Order) -> Self {
        Self::with_total_buckets(n, d, order, DEFAULT_TOTAL_BUCKETS)
    }

    /// [`new`](Self::new) with an explicit materialized bucket count
    /// (window slots plus the overflow slot).
    ///
    /// # Panics
    ///
    /// Panics if `total_buckets < 2` or `n` exceeds the identifier space.
    pub fn with_total_buckets(n: usize, d: D, order: Order, total_buckets: usize) -> Self {
        assert!(total_buckets >= MIN_TOTAL_BUCKETS);
        assert!(n <= Id::MAX as usize, "identifier universe exceeds u32");
        let open_buckets = total_buckets - 1;
        let width = open_buckets as u64;

        let cur_range = match order {
            Order::Increasing => {
                // NULL_BKT sorts as the maximum, so it can only be the
                // minimum when every identifier is outside the structure.
                let min_b = parallel::reduce_min(n, |i| d.priority(i as Id)).unwrap_or(NULL_BKT);
                min_b as u64 / width
            }
            Order::Decreasing => {
                let max_b = parallel::reduce_max(n, |i| {
                    let b = d.priority(i as Id);
                    if b == NULL_BKT { 0 } else { b }
                })
                .unwrap_or(0);
                (max_b as u64 + width) / width
            }
        };

        let mut set = Self {
            universe: n,
            d,
            window: Window {
                order,
                cur_range,
                open_buckets,
            },
            total_buckets,
            bkts: (0..total_buckets).map(|_| IdArray::new()).collect(),
            cur_bkt: 0,
            num_elms: 0,
            allocated: true,
        };

        {
            let window = set.window;
            let d = &set.d;
            Self::bulk_update(
                &mut set.bkts,
                &mut set.num_elms,
                &|i| {
                    let id = i as Id;
                    Some((id, window.slot_for(d.priority(id))))
                },
                n,
            );
        }
        set.assert_counts();
        set
    }

    /// Size of the identifier universe.
    #[inline]
    pub fn universe(&self) -> usize {
        self.universe
    }

    /// Identifiers currently queued, stale entries included.
    #[inline]
    pub fn num_queued(&self) -> usize {
        self.num_elms
    }

    /// Index of the priority window currently materialized. Monotone
    /// non-decreasing over the structure's lifetime for [`Order::Increasing`],
    /// non-increasing for [`Order::Decreasing`].
    #[inline]
    pub fn current_range(&self) -> u64 {
        self.window.cur_range
    }

    /// Window slots (`total_buckets - 1`).
    #[inline]
    pub fn open_buckets(&self) -> usize {
        self.window.open_buckets
    }

    #[inline]
    pub fn total_buckets(&self) -> usize {
        self.total_buckets
    }

    /// Yields the next non-empty bucket, advancing the window as needed.
    /// Returns the sentinel (`id == NULL_BKT`) once nothing is queued.
    pub fn next_bucket(&mut self) -> Bucket {
        debug_assert!(self.allocated, "bucket storage released");
        loop {
            while self.bkts[self.cur_bkt].is_empty() && self.num_elms > 0 {
                self.cur_bkt += 1;
                if self.cur_bkt == self.window.open_buckets {
                    self.unpack();
                    self.cur_bkt = 0;
                }
            }
            if self.num_elms == 0 {
                self.assert_counts();
                return Bucket::null(self.universe);
            }
            if let Some(bucket) = self.emit_cur_bucket() {
                self.assert_counts();
                return bucket;
            }
        }
    }

    /// Destination for an identifier transitioning from priority `prev` to
    /// `next`; [`NULL_BKT`] when no write is needed.
    ///
    /// An identifier already sitting in its destination slot is not
    /// reinserted, with one deliberate exception: reinsertion into the slot
    /// currently being emitted is allowed, so an algorithm can re-trigger
    /// work within the same round.
    pub fn get_bucket(&self, prev: BucketId, next: BucketId) -> BucketDest {
        let pb = self.window.slot_for(prev);
        let nb = self.window.slot_for(next);
        if nb != NULL_BKT && (prev == NULL_BKT || pb != nb || nb as usize == self.cur_bkt) {
            return nb;
        }
        NULL_BKT
    }

    /// Bulk insertion of up to `k` identifiers. `f(j)` supplies the `j`-th
    /// entry as `(id, destination slot)`, with destinations computed by
    /// [`get_bucket`](Self::get_bucket); an entry that is `None` or whose
    /// destination is [`NULL_BKT`] is skipped. Returns the number inserted.
    ///
    /// Within one call, identifiers landing in the same slot keep the order
    /// of their indices in `f`; across calls, later insertions append after
    /// earlier ones.
    pub fn update_buckets<F>(&mut self, f: F, k: usize) -> usize
    where
        F: Fn(usize) -> Option<(Id, BucketDest)> + Sync,
    {
        debug_assert!(self.allocated, "bucket storage released");
        let added = Self::bulk_update(&mut self.bkts, &mut self.num_elms, &f, k);
        self.assert_counts();
        added
    }

    /// Releases all bucket storage. Idempotent; the structure must not be
    /// used afterward.
    pub fn del(&mut self) {
        if self.allocated {
            self.bkts = Vec::new();
            self.num_elms = 0;
            self.allocated = false;
        }
    }

    fn bulk_update<F>(bkts: &mut [IdArray], num_elms: &mut usize, f: &F, k: usize) -> usize
    where
        F: Fn(usize) -> Option<(Id, BucketDest)> + Sync,
    {
        assert!(k <= u32::MAX as usize, "update exceeds the id space");
        if k < SEQUENTIAL_THRESHOLD || rayon::current_num_threads() == 1 {
            return Self::bulk_update_seq(bkts, num_elms, f, k);
        }

        let total_buckets = bkts.len();
        let count_before = *num_elms;

        let num_blocks = (k / BLOCK_SIZE_TARGET).max(1).next_power_of_two();
        let block_size = k.div_ceil(num_blocks);

        // 1. Per-block histograms. Rows are cache-line padded so neighboring
        //    blocks never count into the same line.
        let row_stride = align_up(total_buckets, COUNTERS_PER_CACHE_LINE);
        let mut hists: Vec<u32> = vec![0; num_blocks * row_stride];
        hists
            .par_chunks_mut(row_stride)
            .enumerate()
            .for_each(|(block, hist)| {
                let start = (block * block_size).min(k);
                let end = (start + block_size).min(k);
                for j in start..end {
                    if let Some((_, dest)) = f(j) {
                        if dest != NULL_BKT {
                            debug_assert!((dest as usize) < total_buckets);
                            hist[dest as usize] += 1;
                        }
                    }
                }
            });

        // 2. Exclusive prefix sum over the transposed histograms (slot-major,
        //    block-minor): offsets[slot * num_blocks + block]. Each slot's
        //    additions thereby occupy one contiguous destination range.
        let scan_len = num_blocks * total_buckets;
        let mut offsets: Vec<u32> = vec![0; scan_len + 1];
        let hists_ref = &hists;
        let total = parallel::scan_add(
            scan_len,
            |i| {
                let block = i % num_blocks;
                let slot = i / num_blocks;
                hists_ref[block * row_stride + slot]
            },
            &mut offsets,
        );

        // 3. Reserve each slot's append region; logical sizes advance only
        //    after the scatter.
        for slot in 0..total_buckets {
            let added = (offsets[(slot + 1) * num_blocks] - offsets[slot * num_blocks]) as usize;
            bkts[slot].reserve_additional(added);
            *num_elms += added;
        }
        debug_assert_eq!(*num_elms - count_before, total as usize);

        // 4. Rebase to per-block write cursors. Rows are block-major so each
        //    scatter worker owns one padded row: sharding is by block index,
        //    not worker identity.
        let mut cursors: Vec<u32> = vec![0; num_blocks * row_stride];
        let offsets_ref = &offsets;
        cursors
            .par_chunks_mut(row_stride)
            .enumerate()
            .for_each(|(block, row)| {
                for slot in 0..total_buckets {
                    row[slot] =
                        offsets_ref[slot * num_blocks + block] - offsets_ref[slot * num_blocks];
                }
            });

        // 5. Scatter. The prefix sum partitioned each slot's append region
        //    into disjoint per-block segments, so writers never collide.
        let targets = ScatterTargets::new(bkts);
        cursors
            .par_chunks_mut(row_stride)
            .enumerate()
            .for_each(|(block, cursor)| {
                let start = (block * block_size).min(k);
                let end = (start + block_size).min(k);
                for j in start..end {
                    if let Some((id, dest)) = f(j) {
                        if dest != NULL_BKT {
                            let slot = dest as usize;
                            // SAFETY: cursor[slot] stays inside this block's
                            // segment of the slot's append region, reserved in
                            // step 3 and disjoint from every other block's.
                            unsafe { targets.write(slot, cursor[slot] as usize, id) };
                            cursor[slot] += 1;
                        }
                    }
                }
            });
        drop(targets);

        // 6. Publish the new logical sizes.
        for slot in 0..total_buckets {
            let added = (offsets[(slot + 1) * num_blocks] - offsets[slot * num_blocks]) as usize;
            // SAFETY: the block cursors jointly filled [0, added) of this
            // slot's append region.
            unsafe { bkts[slot].publish(added) };
        }

        *num_elms - count_before
    }

    fn bulk_update_seq<F>(bkts: &mut [IdArray], num_elms: &mut usize, f: &F, k: usize) -> usize
    where
        F: Fn(usize) -> Option<(Id, BucketDest)>,
    {
        let count_before = *num_elms;
        for j in 0..k {
            if let Some((id, dest)) = f(j) {
                if dest != NULL_BKT {
                    debug_assert!((dest as usize) < bkts.len());
                    bkts[dest as usize].push(id);
                    *num_elms += 1;
                }
            }
        }
        *num_elms - count_before
    }

    /// Emits the slot under the cursor, or `None` when the emission filter
    /// leaves nothing (the slot held only stale entries).
    fn emit_cur_bucket(&mut self) -> Option<Bucket> {
        let slot = self.cur_bkt;
        let size = self.bkts[slot].len();
        debug_assert!(size > 0);
        let raw = self.window.raw_priority(slot);
        debug_assert!(raw < NULL_BKT as u64);

        // Keep only identifiers still in this bucket at emission time.
        let d = &self.d;
        let ids = parallel::filter_stable(self.bkts[slot].as_slice(), |v| {
            d.priority(v) as u64 == raw
        });

        self.num_elms -= size;
        self.bkts[slot].clear();

        if ids.is_empty() {
            return None;
        }
        Some(Bucket {
            id: raw as BucketId,
            num_filtered: size,
            identifiers: VertexSubset::from_ids(self.universe, ids),
        })
    }

    /// Advances the window one range and redistributes the overflow slot:
    /// identifiers now inside the new window go to its slots, still-distant
    /// ones return to overflow, and externally deleted ones (priority now
    /// [`NULL_BKT`]) are dropped.
    fn unpack(&mut self) {
        let overflow = self.window.open_buckets;
        let m = self.bkts[overflow].len();

        // The cursor only walks off the window once every window slot is
        // empty, so the overflow slot must account for every queued
        // identifier. Anything else is corruption.
        assert_eq!(
            m, self.num_elms,
            "bucket structure corrupted: overflow holds {m} ids, {} queued",
            self.num_elms
        );

        let snapshot: Vec<Id> = self.bkts[overflow].as_slice().to_vec();
        self.bkts[overflow].clear();

        match self.window.order {
            Order::Increasing => self.window.cur_range += 1,
            Order::Decreasing => {
                assert!(self.window.cur_range > 0, "window advanced below zero");
                self.window.cur_range -= 1;
            }
        }

        {
            let window = self.window;
            let d = &self.d;
            let snapshot = &snapshot;
            Self::bulk_update(
                &mut self.bkts,
                &mut self.num_elms,
                &move |i| {
                    let v = snapshot[i];
                    Some((v, window.slot_for(d.priority(v))))
                },
                m,
            );
        }
        // The redistribution re-counted the snapshotted identifiers.
        self.num_elms -= m;
        self.assert_counts();
    }

    #[inline]
    fn assert_counts(&self) {
        debug_assert_eq!(
            self.num_elms,
            self.bkts.iter().map(IdArray::len).sum::<usize>()
        );
    }
}
