//! Deterministic hashing of cell values for bucketing.

use tabflow_types::flex_type::FlexType;

const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

/// 64-bit FNV-1a over a byte slice.
pub fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Hash of a non-null cell. Integers and floats hash their little-endian
/// bit patterns, strings their UTF-8 bytes. `Undefined` has no hash.
pub fn hash_value(value: &FlexType) -> Option<u64> {
    match value {
        FlexType::Integer(i) => Some(fnv1a(&i.to_le_bytes())),
        FlexType::Float(f) => Some(fnv1a(&f.to_bits().to_le_bytes())),
        FlexType::String(s) => Some(fnv1a(s.as_bytes())),
        FlexType::Undefined => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fnv1a_known_values() {
        assert_eq!(fnv1a(b""), 0xcbf29ce484222325);
        assert_eq!(fnv1a(b"a"), 0xaf63dc4c8601ec8c);
        assert_eq!(fnv1a(b"foobar"), 0x85944171f73967e8);
    }

    #[test]
    fn test_hash_value() {
        assert_eq!(hash_value(&FlexType::Undefined), None);
        assert_eq!(hash_value(&FlexType::from("a")), Some(fnv1a(b"a")));
        assert_ne!(
            hash_value(&FlexType::Integer(1)),
            hash_value(&FlexType::Integer(2))
        );
    }
}
