use base64::{Engine as _, engine::general_purpose::STANDARD};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("frame holds no data")]
    EmptyFrame,
    #[error("could not reserve {needed} bytes for the encoded frame")]
    Allocation { needed: usize },
}

/// Base64 length of `len` input bytes, with padding.
pub fn encoded_len(len: usize) -> usize {
    len.div_ceil(3) * 4
}

/// Encode raw frame bytes as standard padded base64.
///
/// The output buffer is reserved up front so an allocation failure surfaces as
/// an error instead of aborting the process.
pub fn encode_frame(bytes: &[u8]) -> Result<String, EncodeError> {
    if bytes.is_empty() {
        return Err(EncodeError::EmptyFrame);
    }
    let needed = encoded_len(bytes.len());
    let mut out = String::new();
    out.try_reserve_exact(needed)
        .map_err(|_| EncodeError::Allocation { needed })?;
    STANDARD.encode_string(bytes, &mut out);
    Ok(out)
}
