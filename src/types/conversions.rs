use ethers::types::H256;

// Hex text as used in cache keys and beacon API responses: `0x` prefix, lower case
pub fn normalize_hex(value: &str) -> Result<String, ConversionError> {
    let trimmed = value.trim();
    let digits = strip_hex_prefix(trimmed);
    if digits.is_empty() {
        return Err(ConversionError::EmptyHex);
    }
    if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ConversionError::InvalidHex(trimmed.to_string()));
    }
    if digits.len() % 2 != 0 {
        return Err(ConversionError::OddLength(digits.len()));
    }
    Ok(format!("0x{}", digits.to_ascii_lowercase()))
}

// Para pubkeys y hashes de tamaño fijo
pub fn parse_fixed_hex<const N: usize>(value: &str) -> Result<[u8; N], ConversionError> {
    let digits = strip_hex_prefix(value.trim());
    let bytes = hex::decode(digits).map_err(|e| ConversionError::InvalidHex(e.to_string()))?;
    if bytes.len() != N {
        return Err(ConversionError::InvalidLength {
            expected: N,
            actual: bytes.len(),
        });
    }
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes);
    Ok(out)
}

pub fn h256_to_string(hash: &H256) -> String {
    format!("0x{}", hex::encode(hash.as_bytes()))
}

fn strip_hex_prefix(value: &str) -> &str {
    value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value)
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConversionError {
    #[error("Empty hex value")]
    EmptyHex,
    #[error("Invalid hex: {0}")]
    InvalidHex(String),
    #[error("Odd number of hex digits: {0}")]
    OddLength(usize),
    #[error("Invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}
