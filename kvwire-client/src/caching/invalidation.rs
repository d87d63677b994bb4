//! Invalidation messages delivered on the tracking redirect connection.

use bytes::Bytes;
use kvwire_common::Value;

use super::store::CacheStore;

/// Server-reserved channel carrying tracking invalidations.
pub const INVALIDATE_CHANNEL: &str = "__redis__:invalidate";

/// Parsed invalidation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invalidation {
    /// These keys changed.
    Keys(Vec<Bytes>),
    /// The server flushed its keyspace or lost tracking state; drop everything.
    Flush,
}

impl Invalidation {
    /// Recognizes both renderings:
    ///
    /// ```text
    /// RESP2 pub/sub: ["message", "__redis__:invalidate", keys | null]
    /// RESP3 push:    >["invalidate", keys | null]
    /// ```
    ///
    /// Returns `None` for anything else.
    pub fn parse(value: &Value) -> Option<Invalidation> {
        let items = value.as_items()?;
        let payload = match items {
            [kind, channel, payload]
                if kind.eq_ignore_case("message")
                    && channel.to_text().as_deref() == Some(INVALIDATE_CHANNEL) =>
            {
                payload
            }
            [kind, payload] if kind.eq_ignore_case("invalidate") => payload,
            _ => return None,
        };
        match payload {
            Value::Null => Some(Invalidation::Flush),
            payload => {
                let keys = payload
                    .as_items()?
                    .iter()
                    .filter_map(Value::to_bytes)
                    .collect();
                Some(Invalidation::Keys(keys))
            }
        }
    }

    /// Applies the invalidation; returns the number of replies dropped.
    pub fn apply(&self, store: &CacheStore) -> usize {
        match self {
            Invalidation::Keys(keys) => keys.iter().map(|key| store.invalidate(key)).sum(),
            Invalidation::Flush => {
                let removed = store.len();
                store.clear();
                removed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resp::decode;
    use kvwire_common::Encoding;

    fn value(wire: &[u8]) -> Value {
        decode(wire, Encoding::Text).unwrap().unwrap().0
    }

    #[test]
    fn resp2_message() {
        let message = value(
            b"*3\r\n$7\r\nmessage\r\n$20\r\n__redis__:invalidate\r\n*2\r\n$1\r\na\r\n$1\r\nb\r\n",
        );
        assert_eq!(
            Invalidation::parse(&message),
            Some(Invalidation::Keys(vec!["a".into(), "b".into()]))
        );
    }

    #[test]
    fn resp3_push() {
        let push = value(b">2\r\n$10\r\ninvalidate\r\n*1\r\n$1\r\nk\r\n");
        assert_eq!(
            Invalidation::parse(&push),
            Some(Invalidation::Keys(vec!["k".into()]))
        );
    }

    #[test]
    fn null_key_list_flushes() {
        let resp2 =
            value(b"*3\r\n$7\r\nmessage\r\n$20\r\n__redis__:invalidate\r\n*-1\r\n");
        let resp3 = value(b">2\r\n$10\r\ninvalidate\r\n_\r\n");
        assert_eq!(Invalidation::parse(&resp2), Some(Invalidation::Flush));
        assert_eq!(Invalidation::parse(&resp3), Some(Invalidation::Flush));
    }

    #[test]
    fn other_messages_are_ignored() {
        let other = value(b"*3\r\n$7\r\nmessage\r\n$4\r\nnews\r\n$2\r\nhi\r\n");
        assert_eq!(Invalidation::parse(&other), None);
        assert_eq!(Invalidation::parse(&Value::from("OK")), None);
    }

    #[test]
    fn apply_drops_matching_replies() {
        let store = CacheStore::new(4);
        store.insert(&crate::commands::get("a"), Value::from(1i64));
        store.insert(&crate::commands::get("b"), Value::from(2i64));

        assert_eq!(Invalidation::Keys(vec!["a".into()]).apply(&store), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(Invalidation::Flush.apply(&store), 1);
        assert!(store.is_empty());
    }
}
