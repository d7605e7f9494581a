use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
/// Enumerates supported `HexError` values.
pub enum HexError {
    #[error("hex payload must have an even number of digits, found {0}")]
    OddLength(usize),
    #[error("invalid hex digit '{digit}' at position {position}")]
    InvalidDigit { digit: char, position: usize },
}

/// Lowercase hex rendering used for payload display and the `payload_hex` wire field.
pub fn encode_hex(bytes: &[u8]) -> String {
    let mut text = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        text.push_str(&format!("{byte:02x}"));
    }
    text
}

pub fn decode_hex(text: &str) -> Result<Vec<u8>, HexError> {
    // Counted in characters, not bytes: multibyte input must land in the
    // invalid-digit path instead of skewing the pairing.
    let digits = text.chars().collect::<Vec<_>>();
    if digits.len() % 2 != 0 {
        return Err(HexError::OddLength(digits.len()));
    }
    let mut bytes = Vec::with_capacity(digits.len() / 2);
    for (index, pair) in digits.chunks(2).enumerate() {
        let high = hex_value(pair[0], index * 2)?;
        let low = hex_value(pair[1], index * 2 + 1)?;
        bytes.push((high << 4) | low);
    }
    Ok(bytes)
}

fn hex_value(digit: char, position: usize) -> Result<u8, HexError> {
    digit
        .to_digit(16)
        .map(|value| value as u8)
        .ok_or(HexError::InvalidDigit { digit, position })
}
