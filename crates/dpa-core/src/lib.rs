#![deny(warnings)]
#![deny(clippy::all)]

pub mod crypto;
pub mod io_ext;
pub mod util;

pub use crypto::ctr::CtrSession;
pub use crypto::CryptoError;
pub use util::zeroize_bytes;
