//! Active Directory `objectGUID` formatting.
//!
//! AD stores the GUID as 16 raw bytes whose first three groups are
//! little-endian. The canonical text form reverses those groups.

/// Format a binary `objectGUID` in the mixed-endian AD text form.
///
/// Anything that is not 16 bytes long is returned hex-encoded as-is.
pub fn format_guid(bytes: &[u8]) -> String {
    if bytes.len() != 16 {
        return hex::encode(bytes);
    }

    format!(
        "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
        bytes[3], bytes[2], bytes[1], bytes[0],
        bytes[5], bytes[4],
        bytes[7], bytes[6],
        bytes[8], bytes[9],
        bytes[10], bytes[11], bytes[12], bytes[13], bytes[14], bytes[15]
    )
}

/// Inverse of [`format_guid`]: the 16 on-the-wire bytes of a text GUID.
pub fn parse_guid(guid: &str) -> Option<[u8; 16]> {
    let compact: String = guid
        .trim()
        .trim_start_matches('{')
        .trim_end_matches('}')
        .chars()
        .filter(|c| *c != '-')
        .collect();
    let decoded = hex::decode(compact).ok()?;
    let text: [u8; 16] = decoded.try_into().ok()?;

    let mut wire = text;
    wire[0..4].copy_from_slice(&[text[3], text[2], text[1], text[0]]);
    wire[4..6].copy_from_slice(&[text[5], text[4]]);
    wire[6..8].copy_from_slice(&[text[7], text[6]]);
    Some(wire)
}

/// Search filter value for a GUID: every byte escaped as `\xx`.
pub fn guid_filter_value(guid: &str) -> Option<String> {
    let wire = parse_guid(guid)?;
    Some(wire.iter().map(|b| format!("\\{b:02x}")).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const WIRE: [u8; 16] = [
        0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F,
        0x10,
    ];

    #[test]
    fn test_format_guid() {
        assert_eq!(format_guid(&WIRE), "04030201-0605-0807-090a-0b0c0d0e0f10");
    }

    #[test]
    fn test_short_input_is_hex() {
        assert_eq!(format_guid(&[0xab, 0xcd]), "abcd");
    }

    #[test]
    fn test_parse_guid_restores_wire_order() {
        assert_eq!(parse_guid("04030201-0605-0807-090a-0b0c0d0e0f10"), Some(WIRE));
        assert_eq!(parse_guid("{04030201-0605-0807-090A-0B0C0D0E0F10}"), Some(WIRE));
        assert_eq!(parse_guid("not-a-guid"), None);
    }

    #[test]
    fn test_guid_filter_value() {
        let value = guid_filter_value("04030201-0605-0807-090a-0b0c0d0e0f10").unwrap();
        assert!(value.starts_with("\\01\\02\\03\\04"));
        assert_eq!(value.len(), 48);
    }
}
