//! Classifier predicates evaluated over an accepted connection's buffered
//! prefix.

use std::borrow::Cow;

/// Two classifiers on the same endpoint are equal, and therefore rejected
/// at registration, exactly when their ids compare equal.
pub type ClassifierId = Cow<'static, str>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Matched {
    /// The buffered prefix is enough to claim this connection.
    Accept,
    /// The buffered prefix already rules this classifier out.
    Reject,
    /// Not enough bytes yet to decide either way.
    NeedMoreData,
}

pub trait Classifier: Send + Sync {
    fn id(&self) -> ClassifierId;
    fn classify(&self, buffered: &[u8]) -> Matched;
}

/// Matches connections whose buffered prefix starts with a fixed byte
/// string, e.g. an HTTP request line or a TLS client hello's first bytes.
pub struct PrefixClassifier {
    id: ClassifierId,
    prefix: &'static [u8],
}

impl PrefixClassifier {
    pub fn new(id: impl Into<ClassifierId>, prefix: &'static [u8]) -> Self {
        Self { id: id.into(), prefix }
    }
}

impl Classifier for PrefixClassifier {
    fn id(&self) -> ClassifierId {
        self.id.clone()
    }

    fn classify(&self, buffered: &[u8]) -> Matched {
        if buffered.len() >= self.prefix.len() {
            if &buffered[..self.prefix.len()] == self.prefix {
                Matched::Accept
            } else {
                Matched::Reject
            }
        } else if buffered == &self.prefix[..buffered.len()] {
            Matched::NeedMoreData
        } else {
            Matched::Reject
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_once_the_full_prefix_is_buffered() {
        let classifier = PrefixClassifier::new("http", b"GET ");
        assert_eq!(classifier.classify(b"GE"), Matched::NeedMoreData);
        assert_eq!(classifier.classify(b"GET "), Matched::Accept);
        assert_eq!(classifier.classify(b"GET /x HTTP/1.1\r\n"), Matched::Accept);
    }

    #[test]
    fn rejects_a_diverging_prefix_without_waiting_for_more_bytes() {
        let classifier = PrefixClassifier::new("tls", &[0x16, 0x03]);
        assert_eq!(classifier.classify(&[0xFF]), Matched::Reject);
        assert_eq!(classifier.classify(&[0x16, 0x03, 0x01]), Matched::Accept);
    }

    #[test]
    fn ids_compare_by_value_for_duplicate_detection() {
        let a = PrefixClassifier::new("http", b"GET ");
        let b = PrefixClassifier::new(Cow::Borrowed("http"), b"POST ");
        assert_eq!(a.id(), b.id());
    }
}
