//! Pointer parsing and normalization helpers.

/// Parses a pointer coming from the payload or from user input.
///
/// Accepted forms are `0x`-prefixed hexadecimal, plain decimal and an
/// optional leading `#` (as emitted by some payload views).
///
/// Returns `None` when the input is not a pointer.
pub fn parse_ptr(input: &str) -> Option<u64> {
    let input = input.trim();
    let input = input.strip_prefix('#').unwrap_or(input);

    if let Some(hex) = input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
    {
        u64::from_str_radix(hex, 16).ok()
    } else {
        input.parse().ok()
    }
}

/// Parses a pointer carried by a JSON value (either a number or a string).
pub fn parse_ptr_value(value: &serde_json::Value) -> Option<u64> {
    match value {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => parse_ptr(s),
        _ => None,
    }
}

/// Returns the canonical hex form of a pointer (`0x` followed by lowercase
/// digits, no padding).
pub fn hex_ptr(ptr: u64) -> String {
    format!("{ptr:#x}")
}

/// Clears the thumb bit of odd code addresses.
///
/// Only meaningful for range membership checks: registry keys always keep
/// the address as reported by the payload.
pub const fn strip_thumb_bit(ptr: u64) -> u64 {
    if ptr % 2 != 0 { ptr - 1 } else { ptr }
}
