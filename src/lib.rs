pub mod bucket_set;
pub mod constants;
pub mod frontier;
pub mod parallel;
pub mod stdx;
pub mod util;

pub use bucket_set::{Bucket, BucketDest, BucketId, BucketSet, Id, NULL_BKT, Order, PriorityMap};
pub use frontier::VertexSubset;
