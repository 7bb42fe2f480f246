//! Array persistence in NumPy formats.

mod npy;
mod npz;

pub use npy::{from_npy_bytes, load_npy, save_npy, to_npy_bytes, NpyError};
pub use npz::{from_npz_bytes, load_npz, save_npz, to_npz_bytes, NpzError};
