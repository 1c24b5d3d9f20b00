//! Security identifiers (`objectSid`).
//!
//! A SID is a revision, a 48-bit identifier authority and a list of 32-bit
//! sub-authorities. The last sub-authority of an account SID is its relative
//! ID; everything before it identifies the domain.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectSid {
    pub revision: u8,
    pub authority: u64,
    pub sub_authorities: Vec<u32>,
}

impl ObjectSid {
    /// Decode the binary form returned by the directory.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, String> {
        if bytes.len() < 8 {
            return Err(format!("SID too short ({} bytes)", bytes.len()));
        }
        let revision = bytes[0];
        let count = bytes[1] as usize;
        if bytes.len() != 8 + count * 4 {
            return Err(format!(
                "SID length {} does not match {} sub-authorities",
                bytes.len(),
                count
            ));
        }

        let authority = bytes[2..8]
            .iter()
            .fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
        let sub_authorities = bytes[8..]
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        Ok(Self {
            revision,
            authority,
            sub_authorities,
        })
    }

    /// The SID without its relative ID.
    pub fn domain_sid(&self) -> ObjectSid {
        let mut sub_authorities = self.sub_authorities.clone();
        sub_authorities.pop();
        Self {
            revision: self.revision,
            authority: self.authority,
            sub_authorities,
        }
    }

    pub fn relative_id(&self) -> Option<u32> {
        self.sub_authorities.last().copied()
    }
}

impl fmt::Display for ObjectSid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S-{}-{}", self.revision, self.authority)?;
        for sub in &self.sub_authorities {
            write!(f, "-{sub}")?;
        }
        Ok(())
    }
}

impl FromStr for ObjectSid {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let rest = s
            .strip_prefix("S-")
            .or_else(|| s.strip_prefix("s-"))
            .ok_or_else(|| format!("'{s}' is not a SID"))?;
        let mut parts = rest.split('-');

        let revision = parts
            .next()
            .and_then(|p| p.parse::<u8>().ok())
            .ok_or_else(|| format!("'{s}' has no valid revision"))?;
        let authority = parts
            .next()
            .and_then(|p| p.parse::<u64>().ok())
            .ok_or_else(|| format!("'{s}' has no valid authority"))?;
        let sub_authorities = parts
            .map(|p| p.parse::<u32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| format!("'{s}' has an invalid sub-authority: {e}"))?;

        Ok(Self {
            revision,
            authority,
            sub_authorities,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_bytes() -> Vec<u8> {
        // S-1-5-21-1004336348-1177238915-682003330-1105
        let mut bytes = vec![1u8, 5, 0, 0, 0, 0, 0, 5];
        for sub in [21u32, 1004336348, 1177238915, 682003330, 1105] {
            bytes.extend_from_slice(&sub.to_le_bytes());
        }
        bytes
    }

    #[test]
    fn test_from_bytes_and_display() {
        let sid = ObjectSid::from_bytes(&sample_bytes()).unwrap();
        assert_eq!(sid.to_string(), "S-1-5-21-1004336348-1177238915-682003330-1105");
        assert_eq!(sid.relative_id(), Some(1105));
        assert_eq!(
            sid.domain_sid().to_string(),
            "S-1-5-21-1004336348-1177238915-682003330"
        );
    }

    #[test]
    fn test_parse_text_form() {
        let sid: ObjectSid = "S-1-5-21-1004336348-1177238915-682003330-1105".parse().unwrap();
        assert_eq!(sid, ObjectSid::from_bytes(&sample_bytes()).unwrap());
    }

    #[test]
    fn test_rejects_garbage() {
        assert!("X-1-5".parse::<ObjectSid>().is_err());
        assert!("S-1-5-21-abc".parse::<ObjectSid>().is_err());
        assert!(ObjectSid::from_bytes(&[1, 2, 0]).is_err());
        assert!(ObjectSid::from_bytes(&[1, 2, 0, 0, 0, 0, 0, 5, 1, 0, 0, 0]).is_err());
    }
}
