use std::io::{self, Read, Write};

const COPY_BUF_LEN: usize = 8192;

/// Copies exactly `len` bytes, passing every buffer through `transform`
/// before it is written. Fails with `UnexpectedEof` if the reader runs dry.
pub fn copy_exact_with<R, W, F>(
    reader: &mut R,
    writer: &mut W,
    mut len: u64,
    mut transform: F,
) -> io::Result<()>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
    F: FnMut(&mut [u8]),
{
    let mut buffer = [0u8; COPY_BUF_LEN];

    while len > 0 {
        let to_read = std::cmp::min(len, buffer.len() as u64) as usize;
        let read = reader.read(&mut buffer[..to_read])?;
        if read == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "truncated input",
            ));
        }
        transform(&mut buffer[..read]);
        writer.write_all(&buffer[..read])?;
        len -= read as u64;
    }

    crate::util::zeroize_bytes(&mut buffer);
    Ok(())
}
