//! Record key encoding.
//!
//! Integer keys are stored as 8 big-endian bytes so that bytewise key order
//! equals numeric order.

pub fn encode(value: u64) -> [u8; 8] {
    value.to_be_bytes()
}

/// Decode a key written by [`encode`]. Returns `None` for keys of any other width.
pub fn decode(bytes: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = bytes.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_order_matches_numeric_order() {
        let mut keys: Vec<[u8; 8]> = [300u64, 2, 256, 1, 70_000].iter().map(|v| encode(*v)).collect();
        keys.sort();
        let decoded: Vec<u64> = keys.iter().filter_map(|k| decode(k)).collect();
        assert_eq!(decoded, vec![1, 2, 256, 300, 70_000]);
    }

    #[test]
    fn test_decode_rejects_short_keys() {
        assert_eq!(decode(&[0, 1]), None);
        assert_eq!(decode(&encode(9)), Some(9));
    }
}
