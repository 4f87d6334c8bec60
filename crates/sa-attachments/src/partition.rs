//! Path partitioning
//!
//! Maps a record identifier to the directory segments placed between the
//! type prefix and the filename, so no single remote directory collects
//! every file of a type.
//!
//! | mode       | identifier | segments                                  |
//! |------------|------------|-------------------------------------------|
//! | `disabled` | any        | none                                      |
//! | `uuid`     | 32 hex     | two 16-character halves                   |
//! | `uuid`     | other text | halves of the first 32 SHA-512 hex chars  |
//! | `default`  | integer    | zero-padded to 8 digits, whole 4-digit chunks |
//! | `default`  | other      | SHA-512 hex digest in four 32-char chunks |

use sa_core::PartitionMode;
use sha2::{Digest, Sha512};
use uuid::Uuid;

use crate::model::AttachmentId;

/// Placeholder for a missing UUID half
const MISSING_SEGMENT: &str = "-";

/// Width integers are zero-padded to
const INTEGER_WIDTH: usize = 8;

const INTEGER_CHUNK: usize = 4;
const UUID_HALF: usize = 16;
const HASH_CHUNK: usize = 32;

/// Directory segments for an identifier
pub fn partition(id: &AttachmentId, mode: PartitionMode) -> Vec<String> {
    match mode {
        PartitionMode::Disabled => Vec::new(),
        PartitionMode::Uuid => partition_uuid(id),
        PartitionMode::Default => match id.as_integer() {
            Some(n) => partition_integer(n),
            None => partition_hashed(&id.to_string()),
        },
    }
}

/// `5` -> `["0000", "0005"]`, `123456789012` -> `["1234", "5678", "9012"]`
///
/// Only whole 4-digit chunks become segments; trailing digits of wider
/// integers are dropped (`123456789` -> `["1234", "5678"]`), which keeps the
/// layout identical to existing remote trees.
fn partition_integer(n: i64) -> Vec<String> {
    let padded = format!("{:0width$}", n, width = INTEGER_WIDTH);
    chunk(&padded, INTEGER_CHUNK)
        .into_iter()
        .filter(|segment| segment.len() == INTEGER_CHUNK)
        .collect()
}

fn partition_uuid(id: &AttachmentId) -> Vec<String> {
    let hex = match id {
        AttachmentId::Uuid(u) => u.simple().to_string(),
        AttachmentId::Integer(n) => n.to_string(),
        AttachmentId::Text(s) => match Uuid::parse_str(s) {
            Ok(u) => u.simple().to_string(),
            Err(_) if s.chars().all(|c| c.is_ascii_hexdigit()) => s.clone(),
            // Anything else could smuggle separators into the path.
            Err(_) => hex::encode(Sha512::digest(s.as_bytes()))[..2 * UUID_HALF].to_string(),
        },
    };

    let first: String = hex.chars().take(UUID_HALF).collect();
    let second: String = hex.chars().skip(UUID_HALF).collect();
    vec![or_placeholder(first), or_placeholder(second)]
}

fn partition_hashed(value: &str) -> Vec<String> {
    let digest = hex::encode(Sha512::digest(value.as_bytes()));
    chunk(&digest, HASH_CHUNK)
}

fn or_placeholder(segment: String) -> String {
    if segment.is_empty() {
        MISSING_SEGMENT.to_string()
    } else {
        segment
    }
}

/// Split an ASCII string into fixed-width chunks; the last may be shorter
fn chunk(value: &str, width: usize) -> Vec<String> {
    value
        .as_bytes()
        .chunks(width)
        .map(|c| String::from_utf8_lossy(c).into_owned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn default_mode(id: impl Into<AttachmentId>) -> Vec<String> {
        partition(&id.into(), PartitionMode::Default)
    }

    #[test]
    fn test_small_integer() {
        assert_eq!(default_mode(5), vec!["0000", "0005"]);
        assert_eq!(default_mode(0), vec!["0000", "0000"]);
        assert_eq!(default_mode(12345678), vec!["1234", "5678"]);
    }

    #[test]
    fn test_large_integer() {
        assert_eq!(
            default_mode(123456789012_i64),
            vec!["1234", "5678", "9012"]
        );
        assert_eq!(default_mode(123456789_i64), vec!["1234", "5678"]);
        assert_eq!(default_mode(1234567890_i64), vec!["1234", "5678"]);
        assert_eq!(
            default_mode(1234567890123_i64),
            vec!["1234", "5678", "9012"]
        );
    }

    #[test]
    fn test_integer_valued_text() {
        assert_eq!(default_mode("42"), vec!["0000", "0042"]);
    }

    #[test]
    fn test_text_is_hashed() {
        let segments = default_mode("report-2024");
        let digest = hex::encode(Sha512::digest(b"report-2024"));

        assert_eq!(segments.len(), 4);
        assert_eq!(segments.concat(), digest);
    }

    #[test]
    fn test_traversal_text_is_hashed() {
        let segments = default_mode("../../etc");
        assert_eq!(segments.len(), 4);
        assert!(segments.iter().all(|s| !s.contains('/') && s != ".."));
    }

    #[test]
    fn test_disabled() {
        assert!(partition(&AttachmentId::from(5), PartitionMode::Disabled).is_empty());
        assert!(partition(&AttachmentId::from("x"), PartitionMode::Disabled).is_empty());
    }

    #[test]
    fn test_uuid() {
        let uuid = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        assert_eq!(
            partition(&AttachmentId::from(uuid), PartitionMode::Uuid),
            vec!["550e8400e29b41d4", "a716446655440000"]
        );

        let hyphenated = AttachmentId::from("550e8400-e29b-41d4-a716-446655440000");
        assert_eq!(
            partition(&hyphenated, PartitionMode::Uuid),
            vec!["550e8400e29b41d4", "a716446655440000"]
        );
    }

    #[test]
    fn test_short_uuid_uses_placeholder() {
        assert_eq!(
            partition(&AttachmentId::from("abc123"), PartitionMode::Uuid),
            vec!["abc123", "-"]
        );
        assert_eq!(
            partition(&AttachmentId::from(""), PartitionMode::Uuid),
            vec!["-", "-"]
        );
        assert_eq!(
            partition(&AttachmentId::from(7), PartitionMode::Uuid),
            vec!["7", "-"]
        );
    }

    #[test]
    fn test_uuid_mode_rejects_separators() {
        let segments = partition(&AttachmentId::from("../secret"), PartitionMode::Uuid);
        let digest = hex::encode(Sha512::digest(b"../secret"));

        assert_eq!(segments, vec![&digest[..16], &digest[16..32]]);
    }

    proptest! {
        #[test]
        fn integer_partition_reassembles(n in 0i64..100_000_000) {
            let segments = default_mode(n);
            prop_assert_eq!(segments.len(), 2);
            prop_assert!(segments.iter().all(|s| s.len() == 4));
            prop_assert_eq!(segments.concat(), format!("{:08}", n));
        }

        #[test]
        fn text_partition_is_deterministic_sha512(s in "\\PC*") {
            prop_assume!(AttachmentId::from(s.as_str()).as_integer().is_none());
            let segments = default_mode(s.as_str());
            let digest = hex::encode(Sha512::digest(s.as_bytes()));

            prop_assert_eq!(segments.len(), 4);
            prop_assert!(segments.iter().all(|seg| seg.len() == 32
                && seg.chars().all(|c| c.is_ascii_hexdigit())));
            prop_assert_eq!(&segments, &default_mode(s.as_str()));
            prop_assert_eq!(segments.concat(), digest);
        }
    }
}
