//! User identifier normalization
//!
//! Teams refers to users by MRI (`8:orgid:<object id>`). Different storage
//! sources spell the same user as `orgid:<id>`, a bare GUID, or a base64
//! encoding of the GUID's binary form. Everything funnels through
//! [`normalize_mri`].

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;

const ORGID_PREFIX: &str = "8:orgid:";

/// Canonical `8:orgid:<id>` form of a user identifier, or `None` if empty.
///
/// GUIDs are lowercased and base64-encoded GUIDs are expanded. Any other id
/// is kept verbatim.
pub fn normalize_mri(raw: &str) -> Option<String> {
    let id = object_id_of(raw)?;
    Some(format!("{}{}", ORGID_PREFIX, id))
}

/// Object id part of a user identifier, normalized like [`normalize_mri`].
pub fn object_id_of(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let id = raw
        .strip_prefix(ORGID_PREFIX)
        .or_else(|| raw.strip_prefix("orgid:"))
        .unwrap_or(raw)
        .trim();
    if id.is_empty() {
        return None;
    }
    if is_guid(id) {
        return Some(id.to_lowercase());
    }
    if let Some(guid) = guid_from_base64(id) {
        return Some(guid);
    }
    Some(id.to_string())
}

/// `xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx` with hex digits.
pub fn is_guid(s: &str) -> bool {
    s.len() == 36
        && s.char_indices().all(|(i, c)| match i {
            8 | 13 | 18 | 23 => c == '-',
            _ => c.is_ascii_hexdigit(),
        })
}

/// Decode a base64 (standard or url-safe) 16-byte GUID.
///
/// The binary layout is Microsoft's: the first three groups are stored
/// little-endian, the last eight bytes in order.
pub fn guid_from_base64(s: &str) -> Option<String> {
    if s.len() != 22 && s.len() != 24 {
        return None;
    }
    let unpadded = s.trim_end_matches('=');
    let bytes = URL_SAFE_NO_PAD
        .decode(unpadded)
        .or_else(|_| STANDARD.decode(s))
        .ok()?;
    let b: [u8; 16] = bytes.try_into().ok()?;

    let d1 = u32::from_le_bytes([b[0], b[1], b[2], b[3]]);
    let d2 = u16::from_le_bytes([b[4], b[5]]);
    let d3 = u16::from_le_bytes([b[6], b[7]]);
    Some(format!(
        "{:08x}-{:04x}-{:04x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
        d1, d2, d3, b[8], b[9], b[10], b[11], b[12], b[13], b[14], b[15]
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    // 00112233-4455-6677-8899-aabbccddeeff in mixed-endian binary form
    const GUID_BYTES: [u8; 16] = [
        0x33, 0x22, 0x11, 0x00, 0x55, 0x44, 0x77, 0x66, 0x88, 0x99, 0xaa, 0xbb, 0xcc, 0xdd, 0xee,
        0xff,
    ];

    #[test]
    fn test_prefix_forms_normalize_identically() {
        let guid = "0f8fad5b-d9cb-469f-a165-70867728950e";
        let expected = format!("8:orgid:{}", guid);
        assert_eq!(normalize_mri(guid).unwrap(), expected);
        assert_eq!(normalize_mri(&format!("orgid:{}", guid)).unwrap(), expected);
        assert_eq!(normalize_mri(&format!("8:orgid:{}", guid)).unwrap(), expected);
        assert_eq!(
            normalize_mri(&format!("8:orgid:{}", guid.to_uppercase())).unwrap(),
            expected
        );
    }

    #[test]
    fn test_non_guid_ids_are_kept_verbatim() {
        assert_eq!(normalize_mri("8:orgid:abc-123").unwrap(), "8:orgid:abc-123");
        assert_eq!(normalize_mri("orgid:abc-123").unwrap(), "8:orgid:abc-123");
    }

    #[test]
    fn test_empty_is_rejected() {
        assert!(normalize_mri("").is_none());
        assert!(normalize_mri("8:orgid:").is_none());
        assert!(normalize_mri("orgid:  ").is_none());
    }

    #[test]
    fn test_guid_from_standard_base64() {
        let encoded = STANDARD.encode(GUID_BYTES);
        assert_eq!(encoded.len(), 24);
        assert_eq!(
            guid_from_base64(&encoded).unwrap(),
            "00112233-4455-6677-8899-aabbccddeeff"
        );
    }

    #[test]
    fn test_guid_from_url_safe_base64() {
        let encoded = URL_SAFE_NO_PAD.encode(GUID_BYTES);
        assert_eq!(encoded.len(), 22);
        assert_eq!(
            guid_from_base64(&encoded).unwrap(),
            "00112233-4455-6677-8899-aabbccddeeff"
        );
        assert_eq!(
            normalize_mri(&format!("orgid:{}", encoded)).unwrap(),
            "8:orgid:00112233-4455-6677-8899-aabbccddeeff"
        );
    }

    #[test]
    fn test_guid_roundtrip_through_uuid_crate() {
        // uuid's little-endian field layout is the same mixed-endian form.
        let id = uuid::Uuid::new_v4();
        let encoded = STANDARD.encode(id.to_bytes_le());
        assert_eq!(guid_from_base64(&encoded).unwrap(), id.to_string());
    }

    #[test]
    fn test_guid_from_base64_rejects_wrong_sizes() {
        assert!(guid_from_base64(&STANDARD.encode([0u8; 15])).is_none());
        assert!(guid_from_base64(&STANDARD.encode([0u8; 17])).is_none());
        assert!(guid_from_base64("not base64 at all!!!!!").is_none());
    }

    #[test]
    fn test_is_guid() {
        assert!(is_guid("0f8fad5b-d9cb-469f-a165-70867728950e"));
        assert!(!is_guid("0f8fad5b-d9cb-469f-a165-70867728950"));
        assert!(!is_guid("0f8fad5bxd9cb-469f-a165-70867728950e"));
        assert!(!is_guid("zf8fad5b-d9cb-469f-a165-70867728950e"));
    }
}
