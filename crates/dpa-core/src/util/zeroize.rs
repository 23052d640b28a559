#[cfg(feature = "zeroize")]
use zeroize::Zeroize;

/// Best-effort scrubbing of keystream and key buffers.
///
/// Limitations:
/// - Without the `zeroize` feature this is a plain overwrite the compiler is
///   free to elide.
/// - Copies made by the OS (swap, core dumps) are out of reach.
#[cfg(feature = "zeroize")]
pub fn zeroize_bytes(buf: &mut [u8]) {
    buf.zeroize();
}

#[cfg(not(feature = "zeroize"))]
pub fn zeroize_bytes(buf: &mut [u8]) {
    for byte in buf.iter_mut() {
        *byte = 0;
    }
}
