use crate::event::{leading_zero_bits, Event};
use crate::settings::Settings;

/// Pure function over `(event, settings, now)`. Never touches the network,
/// datastore, or cache, and its result depends only on its arguments.
///
/// Returns `Some(reason)` for the first violated check, checked in a fixed
/// order; `None` means the event clears every policy check.
pub fn evaluate(event: &Event, settings: &Settings, now: i64) -> Option<String> {
    let limits = &settings.limits.event;

    for content_limit in &limits.content {
        if !content_limit.applies_to(event.kind) {
            continue;
        }
        if event.content.len() > content_limit.max_length {
            return Some(format!(
                "rejected: content is longer than {} bytes",
                content_limit.max_length
            ));
        }
    }

    if let Some(max_positive) = limits.created_at.max_positive_delta {
        if max_positive > 0 && event.created_at > now + max_positive {
            return Some(format!(
                "rejected: created_at is more than {max_positive} seconds in the future"
            ));
        }
    }

    if let Some(max_negative) = limits.created_at.max_negative_delta {
        if max_negative > 0 && event.created_at < now - max_negative {
            return Some(format!(
                "rejected: created_at is more than {max_negative} seconds in the past"
            ));
        }
    }

    if let Some(threshold) = limits.event_id.min_leading_zero_bits {
        let actual = leading_zero_bits(&event.id);
        if actual < threshold {
            return Some(format!("pow: difficulty {actual}<{threshold}"));
        }
    }

    if let Some(threshold) = limits.pubkey.min_leading_zero_bits {
        let actual = leading_zero_bits(&event.pubkey);
        if actual < threshold {
            return Some(format!("pow: pubkey difficulty {actual}<{threshold}"));
        }
    }

    if !limits.pubkey.whitelist.is_empty()
        && !limits
            .pubkey
            .whitelist
            .iter()
            .any(|prefix| event.pubkey.starts_with(prefix.as_str()))
    {
        return Some("blocked: pubkey not allowed".to_string());
    }

    if !limits.pubkey.blacklist.is_empty()
        && limits
            .pubkey
            .blacklist
            .iter()
            .any(|prefix| event.pubkey.starts_with(prefix.as_str()))
    {
        return Some("blocked: pubkey not allowed".to_string());
    }

    if !limits.kind.whitelist.is_empty()
        && !limits.kind.whitelist.iter().any(|m| m.matches(event.kind))
    {
        return Some(format!("blocked: event kind {} not allowed", event.kind));
    }

    if !limits.kind.blacklist.is_empty()
        && limits.kind.blacklist.iter().any(|m| m.matches(event.kind))
    {
        return Some(format!("blocked: event kind {} not allowed", event.kind));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{ContentLimit, CreatedAtLimit, EventIdLimit, KindLimit, KindMatcher, PubkeyLimit};

    fn event(kind: u16, content_len: usize, created_at: i64) -> Event {
        Event {
            id: "ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff".into(),
            pubkey: "ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff".into(),
            created_at,
            kind,
            tags: vec![],
            content: "x".repeat(content_len),
            signature: "00".into(),
        }
    }

    #[test]
    fn content_too_long_kind_scoped() {
        let mut settings = Settings::default();
        settings.limits.event.content = vec![ContentLimit {
            max_length: 200,
            kinds: Some(vec![KindMatcher::Exact(1)]),
        }];

        let e1 = event(1, 300, 1_700_000_000);
        assert_eq!(
            evaluate(&e1, &settings, 1_700_000_000),
            Some("rejected: content is longer than 200 bytes".to_string())
        );

        let e2 = event(2, 300, 1_700_000_000);
        assert_eq!(evaluate(&e2, &settings, 1_700_000_000), None);
    }

    #[test]
    fn future_skew_rejects() {
        let mut settings = Settings::default();
        settings.limits.event.created_at = CreatedAtLimit {
            max_positive_delta: Some(600),
            max_negative_delta: None,
        };
        let e = event(1, 10, 1_700_000_900);
        assert_eq!(
            evaluate(&e, &settings, 1_700_000_000),
            Some("rejected: created_at is more than 600 seconds in the future".to_string())
        );
    }

    #[test]
    fn past_skew_rejects() {
        let mut settings = Settings::default();
        settings.limits.event.created_at = CreatedAtLimit {
            max_positive_delta: None,
            max_negative_delta: Some(600),
        };
        let e = event(1, 10, 1_699_999_000);
        assert_eq!(
            evaluate(&e, &settings, 1_700_000_000),
            Some("rejected: created_at is more than 600 seconds in the past".to_string())
        );
    }

    #[test]
    fn event_id_pow_miss() {
        let mut settings = Settings::default();
        settings.limits.event.event_id = EventIdLimit {
            min_leading_zero_bits: Some(16),
        };
        let mut e = event(1, 10, 1_700_000_000);
        // 12 leading zero bits: three zero nibbles then a non-zero nibble.
        e.id = "000a000000000000000000000000000000000000000000000000000000000a".into();
        assert_eq!(
            evaluate(&e, &settings, 1_700_000_000),
            Some("pow: difficulty 12<16".to_string())
        );
    }

    #[test]
    fn pubkey_allowlist_blocks_non_matching() {
        let mut settings = Settings::default();
        settings.limits.event.pubkey = PubkeyLimit {
            whitelist: vec!["aaaa".to_string()],
            ..Default::default()
        };
        let e = event(1, 10, 1_700_000_000);
        assert_eq!(
            evaluate(&e, &settings, 1_700_000_000),
            Some("blocked: pubkey not allowed".to_string())
        );
    }

    #[test]
    fn kind_denylist_blocks_matching_range() {
        let mut settings = Settings::default();
        settings.limits.event.kind = KindLimit {
            whitelist: vec![],
            blacklist: vec![KindMatcher::Range([100, 200])],
        };
        let e = event(150, 10, 1_700_000_000);
        assert_eq!(
            evaluate(&e, &settings, 1_700_000_000),
            Some("blocked: event kind 150 not allowed".to_string())
        );
    }

    #[test]
    fn clean_event_passes() {
        let settings = Settings::default();
        let e = event(1, 10, 1_700_000_000);
        assert_eq!(evaluate(&e, &settings, 1_700_000_000), None);
    }
}
