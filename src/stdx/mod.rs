pub mod id_array;

pub use id_array::IdArray;
