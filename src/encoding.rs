//! Byte <-> text transcoding shared by every backend.
//!
//! Binary secret fields travel through text-oriented storage APIs (DynamoDB
//! `S` attributes, Firestore `stringValue`s, object bodies), so they are
//! carried as URL-safe base64. Output is always padded; input is accepted
//! with or without padding.

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;

pub use base64::DecodeError;

const URL_SAFE_TOLERANT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(true)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Encode bytes as padded URL-safe base64.
pub fn encode(data: &[u8]) -> String {
    URL_SAFE_TOLERANT.encode(data)
}

/// Decode URL-safe base64, padded or not.
pub fn decode(text: impl AsRef<[u8]>) -> Result<Vec<u8>, DecodeError> {
    URL_SAFE_TOLERANT.decode(text)
}
