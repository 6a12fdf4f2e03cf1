//! Fork-join primitives behind the bulk bucket operations.
//!
//! Every primitive has a sequential fast path gated on input size and on
//! [`rayon::current_num_threads`]: below [`SEQUENTIAL_THRESHOLD`] elements a
//! fork-join dispatch costs more than the loop it would distribute. All
//! parallel variants produce bit-identical results to their sequential
//! counterparts (stable order, same totals).

use rayon::prelude::*;

use crate::constants::SEQUENTIAL_THRESHOLD;

/// Exclusive prefix sum over the virtual sequence `values(0..len)`.
///
/// Writes the exclusive prefix into `out[0..len]` and the grand total into
/// `out[len]`; returns the total. `out` must have length `len + 1`.
///
/// The parallel path is the classic two-pass scan: per-chunk sums in
/// parallel, a sequential exclusive scan over the chunk sums, then a parallel
/// fill of each chunk from its rebased running sum.
pub fn scan_add<G>(len: usize, values: G, out: &mut [u32]) -> u32
where
    G: Fn(usize) -> u32 + Sync,
{
    assert_eq!(out.len(), len + 1);

    if len <= SEQUENTIAL_THRESHOLD || rayon::current_num_threads() == 1 {
        let mut sum = 0u32;
        for i in 0..len {
            out[i] = sum;
            sum += values(i);
        }
        out[len] = sum;
        return sum;
    }

    let chunk = SEQUENTIAL_THRESHOLD;
    let chunk_count = len.div_ceil(chunk);

    let mut chunk_sums: Vec<u32> = (0..chunk_count)
        .into_par_iter()
        .map(|c| {
            let start = c * chunk;
            let end = (start + chunk).min(len);
            (start..end).map(&values).sum()
        })
        .collect();

    let mut total = 0u32;
    for sum in chunk_sums.iter_mut() {
        let inc = *sum;
        *sum = total;
        total += inc;
    }

    let (body, tail) = out.split_at_mut(len);
    body.par_chunks_mut(chunk)
        .zip(chunk_sums.par_iter())
        .enumerate()
        .for_each(|(c, (dst, &base))| {
            let start = c * chunk;
            let mut sum = base;
            for (i, slot) in dst.iter_mut().enumerate() {
                *slot = sum;
                sum += values(start + i);
            }
        });
    tail[0] = total;

    total
}

/// Order-preserving filter of `input` into a fresh buffer.
pub fn filter_stable<P>(input: &[u32], pred: P) -> Vec<u32>
where
    P: Fn(u32) -> bool + Sync,
{
    if input.len() <= SEQUENTIAL_THRESHOLD || rayon::current_num_threads() == 1 {
        input.iter().copied().filter(|&v| pred(v)).collect()
    } else {
        // Rayon's collect keeps survivors in input order.
        input.par_iter().copied().filter(|&v| pred(v)).collect()
    }
}

/// Minimum of the virtual sequence `values(0..len)`; `None` when `len == 0`.
pub fn reduce_min<G>(len: usize, values: G) -> Option<u32>
where
    G: Fn(usize) -> u32 + Sync + Send,
{
    if len <= SEQUENTIAL_THRESHOLD || rayon::current_num_threads() == 1 {
        (0..len).map(values).min()
    } else {
        (0..len).into_par_iter().map(values).min()
    }
}

/// Maximum of the virtual sequence `values(0..len)`; `None` when `len == 0`.
pub fn reduce_max<G>(len: usize, values: G) -> Option<u32>
where
    G: Fn(usize) -> u32 + Sync + Send,
{
    if len <= SEQUENTIAL_THRESHOLD || rayon::current_num_threads() == 1 {
        (0..len).map(values).max()
    } else {
        (0..len).into_par_iter().map(values).max()
    }
}
