// Subject builders for the admin API, plus token wildcard matching.
//
// Subjects are dot-separated tokens. In a pattern `*` matches exactly one token
// and a trailing `>` matches one or more remaining tokens.

pub const DEFAULT_API_PREFIX: &str = "$JS.API";
pub const ACK_PREFIX: &str = "$JS.ACK";
pub const INBOX_PREFIX: &str = "_INBOX";

pub fn stream_create(prefix: &str, stream: &str) -> String {
    format!("{prefix}.STREAM.CREATE.{stream}")
}

pub fn stream_info(prefix: &str, stream: &str) -> String {
    format!("{prefix}.STREAM.INFO.{stream}")
}

/// Durable consumers use `CONSUMER.DURABLE.CREATE`, ephemeral ones omit the name.
pub fn consumer_create(prefix: &str, stream: &str, durable: Option<&str>) -> String {
    match durable {
        Some(durable) => format!("{prefix}.CONSUMER.DURABLE.CREATE.{stream}.{durable}"),
        None => format!("{prefix}.CONSUMER.CREATE.{stream}"),
    }
}

pub fn consumer_info(prefix: &str, stream: &str, consumer: &str) -> String {
    format!("{prefix}.CONSUMER.INFO.{stream}.{consumer}")
}

pub fn consumer_delete(prefix: &str, stream: &str, consumer: &str) -> String {
    format!("{prefix}.CONSUMER.DELETE.{stream}.{consumer}")
}

pub fn consumer_next(prefix: &str, stream: &str, consumer: &str) -> String {
    format!("{prefix}.CONSUMER.MSG.NEXT.{stream}.{consumer}")
}

/// Returns true when `subject` is matched by `pattern`.
///
/// ```
/// use sluice_wire::subjects::matches;
///
/// assert!(matches("orders.*", "orders.eu"));
/// assert!(!matches("orders.*", "orders.eu.paid"));
/// assert!(matches("orders.>", "orders.eu.paid"));
/// assert!(!matches("orders.>", "orders"));
/// ```
pub fn matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');
    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return pattern_tokens.next().is_none(),
            (Some("*"), Some(_)) => {}
            (Some(p), Some(s)) if p == s => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_place_tokens_in_order() {
        assert_eq!(
            consumer_next(DEFAULT_API_PREFIX, "ORDERS", "worker"),
            "$JS.API.CONSUMER.MSG.NEXT.ORDERS.worker"
        );
        assert_eq!(
            consumer_create(DEFAULT_API_PREFIX, "ORDERS", Some("worker")),
            "$JS.API.CONSUMER.DURABLE.CREATE.ORDERS.worker"
        );
        assert_eq!(
            consumer_create(DEFAULT_API_PREFIX, "ORDERS", None),
            "$JS.API.CONSUMER.CREATE.ORDERS"
        );
    }

    #[test]
    fn literal_subjects_match_exactly() {
        assert!(matches("a.b.c", "a.b.c"));
        assert!(!matches("a.b.c", "a.b"));
        assert!(!matches("a.b", "a.b.c"));
        assert!(!matches("a.b.c", "a.x.c"));
    }

    #[test]
    fn wildcards_match_tokens() {
        assert!(matches("*", "a"));
        assert!(!matches("*", "a.b"));
        assert!(matches(">", "a.b.c"));
        assert!(matches("$JS.API.CONSUMER.MSG.NEXT.*.*", "$JS.API.CONSUMER.MSG.NEXT.S.c"));
        assert!(matches("$JS.ACK.>", "$JS.ACK.S.c.1.1.1.0.0"));
        assert!(!matches("a.>.c", "a.b.c"));
    }
}
