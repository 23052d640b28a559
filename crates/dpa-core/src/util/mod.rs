pub mod zeroize;

pub use zeroize::zeroize_bytes;
