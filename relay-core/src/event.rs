use secp256k1::schnorr::Signature;
use secp256k1::{Secp256k1, Verification, XOnlyPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A single submitted event.
///
/// `id` and `signature` are trusted only after [`Event::validate`] has run
/// (pipeline stage 1). Events are immutable once constructed — there is no
/// setter that would let a downstream stage mutate `content`, `tags`, or
/// any other field after the hash/signature check has passed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub pubkey: String,
    pub created_at: i64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    #[serde(rename = "sig")]
    pub signature: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EventValidationError {
    #[error("invalid: event id does not match")]
    IdMismatch,
    #[error("invalid: event signature verification failed")]
    BadSignature,
}

impl Event {
    /// Canonical serialization used for both the content-hash and the
    /// identity the submitter's signature covers:
    /// `[0, pubkey, created_at, kind, tags, content]`, rendered with
    /// `serde_json`'s default (compact, no whitespace) formatting.
    fn canonical_json(&self) -> Vec<u8> {
        let value = serde_json::json!([
            0,
            self.pubkey,
            self.created_at,
            self.kind,
            self.tags,
            self.content,
        ]);
        serde_json::to_vec(&value).expect("canonical event tuple always serializes")
    }

    fn computed_id(&self) -> String {
        let digest = Sha256::digest(self.canonical_json());
        hex::encode(digest)
    }

    /// Stage 1 of the admission pipeline: recompute the canonical hash and
    /// compare against `id`, then verify `signature` against `pubkey` over
    /// `id`. Id mismatch is checked before signature verification.
    pub fn validate<C: Verification>(&self, secp: &Secp256k1<C>) -> Result<(), EventValidationError> {
        if self.computed_id() != self.id {
            return Err(EventValidationError::IdMismatch);
        }

        let pubkey = XOnlyPublicKey::from_slice(
            &hex::decode(&self.pubkey).map_err(|_| EventValidationError::BadSignature)?,
        )
        .map_err(|_| EventValidationError::BadSignature)?;
        let sig = Signature::from_slice(
            &hex::decode(&self.signature).map_err(|_| EventValidationError::BadSignature)?,
        )
        .map_err(|_| EventValidationError::BadSignature)?;
        let id_bytes: [u8; 32] = hex::decode(&self.id)
            .map_err(|_| EventValidationError::BadSignature)?
            .try_into()
            .map_err(|_| EventValidationError::BadSignature)?;
        let message = secp256k1::Message::from_digest_slice(&id_bytes)
            .map_err(|_| EventValidationError::BadSignature)?;

        secp.verify_schnorr(&sig, &message, &pubkey)
            .map_err(|_| EventValidationError::BadSignature)
    }

    /// The unix-seconds value of the first well-formed `expiration` tag, if
    /// any. A tag is well-formed when it has at least two elements and the
    /// second parses as a plain base-10 integer; malformed expiration tags
    /// are ignored rather than rejecting the event.
    pub fn expiration(&self) -> Option<i64> {
        self.tags.iter().find_map(|tag| {
            if tag.first().map(String::as_str) != Some("expiration") {
                return None;
            }
            tag.get(1).and_then(|v| v.parse::<i64>().ok())
        })
    }

    /// `true` if the event carries a well-formed, already-past expiration.
    pub fn is_expired(&self, now: i64) -> bool {
        matches!(self.expiration(), Some(exp) if exp <= now)
    }

    /// Number of leading zero bits in `id`, read as a big-endian integer.
    pub fn id_leading_zero_bits(&self) -> u32 {
        leading_zero_bits(&self.id)
    }

    /// Number of leading zero bits in `pubkey`, read as a big-endian integer.
    pub fn pubkey_leading_zero_bits(&self) -> u32 {
        leading_zero_bits(&self.pubkey)
    }
}

/// Leading-zero-bit count of a hex string interpreted as a big-endian
/// unsigned integer. An unparseable hex string counts as zero bits of
/// work rather than panicking — malformed ids/pubkeys are already
/// rejected by stage 1 before proof-of-work is ever consulted.
pub fn leading_zero_bits(hex_str: &str) -> u32 {
    let mut count = 0u32;
    for c in hex_str.chars() {
        let nibble = match c.to_digit(16) {
            Some(n) => n as u8,
            None => return count,
        };
        if nibble == 0 {
            count += 4;
            continue;
        }
        count += nibble.leading_zeros() - 4;
        break;
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leading_zero_bits_all_zero_nibbles() {
        assert_eq!(leading_zero_bits("0000abcd"), 16);
    }

    #[test]
    fn leading_zero_bits_counts_within_nibble() {
        // '1' = 0001 -> 3 leading zero bits within that nibble.
        assert_eq!(leading_zero_bits("1fff"), 3);
        // '2' = 0010 -> 2 leading zero bits.
        assert_eq!(leading_zero_bits("2fff"), 2);
    }

    #[test]
    fn leading_zero_bits_no_zeros() {
        assert_eq!(leading_zero_bits("ffff"), 0);
    }

    #[test]
    fn leading_zero_bits_all_zero_string() {
        assert_eq!(leading_zero_bits("00000000"), 32);
    }

    #[test]
    fn expiration_reads_first_well_formed_tag() {
        let event = Event {
            id: "x".into(),
            pubkey: "y".into(),
            created_at: 0,
            kind: 1,
            tags: vec![
                vec!["p".into(), "deadbeef".into()],
                vec!["expiration".into(), "1700000500".into()],
                vec!["expiration".into(), "9999999999".into()],
            ],
            content: String::new(),
            signature: "z".into(),
        };
        assert_eq!(event.expiration(), Some(1_700_000_500));
    }

    #[test]
    fn expiration_ignores_malformed_tag() {
        let event = Event {
            id: "x".into(),
            pubkey: "y".into(),
            created_at: 0,
            kind: 1,
            tags: vec![vec!["expiration".into(), "not-a-number".into()]],
            content: String::new(),
            signature: "z".into(),
        };
        assert_eq!(event.expiration(), None);
    }

    #[test]
    fn is_expired_boundary_is_inclusive() {
        let event = Event {
            id: "x".into(),
            pubkey: "y".into(),
            created_at: 0,
            kind: 1,
            tags: vec![vec!["expiration".into(), "1700000000".into()]],
            content: String::new(),
            signature: "z".into(),
        };
        assert!(event.is_expired(1_700_000_000));
        assert!(!event.is_expired(1_699_999_999));
    }
}
