//! Byte-value coercion between boundary values and engine byte strings.
//!
//! Keys and values are accepted as text (UTF-8 encoded) or raw byte
//! buffers (copied verbatim); no conversion is inferred from content.
//! The caller picks the output form by calling the text-flavored or
//! buffer-flavored op.

use burrow_runtime::HostValue;

/// Coerce a boundary value into engine bytes. `None` for any shape
/// other than text or buffer; the op maps that to invalid-params.
pub fn to_bytes(value: &HostValue) -> Option<Vec<u8>> {
    match value {
        HostValue::Text(text) => Some(text.as_bytes().to_vec()),
        HostValue::Buffer(bytes) => Some(bytes.clone()),
        _ => None,
    }
}

/// Total conversion of engine bytes to a text value. Byte sequences
/// that are not valid UTF-8 get the replacement character, matching the
/// host boundary's UTF-8 string constructor.
pub fn bytes_to_text(bytes: &[u8]) -> HostValue {
    HostValue::Text(String::from_utf8_lossy(bytes).into_owned())
}

/// Lossless, total conversion of engine bytes to a raw buffer.
pub fn bytes_to_buffer(bytes: Vec<u8>) -> HostValue {
    HostValue::Buffer(bytes)
}
