use std::str;

pub const MAX_INPUT_SIZE: usize = 64 * 1024;

/// `data` capped to [`MAX_INPUT_SIZE`].
#[allow(dead_code)]
#[inline]
pub fn truncate(data: &[u8]) -> &[u8] {
    &data[..data.len().min(MAX_INPUT_SIZE)]
}

/// A UTF-8 view of `data` capped to [`MAX_INPUT_SIZE`]. Up to three bytes are
/// trimmed when the cap splits a codepoint.
#[allow(dead_code)]
#[inline]
pub fn truncate_utf8(data: &[u8]) -> Option<&str> {
    let cap = data.len().min(MAX_INPUT_SIZE);
    for trim in 0..=3 {
        if cap < trim {
            break;
        }
        if let Ok(text) = str::from_utf8(&data[..cap - trim]) {
            return Some(text);
        }
    }
    None
}
