//! Topic routing keys and binding patterns.
//!
//! A routing key is a dot-delimited list of words. Change notifications use
//! exactly three: `<owner>.<entity>.<updated|deleted>`. Subscribers bind with
//! a pattern in which `*` stands for exactly one word and `#` for zero or more
//! words, so they can filter by owner, by layout, by kind, or any mix.

use serde::{Deserialize, Serialize};

use citylayout_core::{DomainError, DomainResult, LayoutId, OwnerId};

use crate::notification::ChangeKind;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoutingKey(String);

impl RoutingKey {
    pub fn for_change(owner: OwnerId, entity: LayoutId, kind: ChangeKind) -> Self {
        Self(format!("{owner}.{entity}.{kind}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn words(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }
}

impl core::fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Segment {
    Word(String),
    /// `*`
    One,
    /// `#`
    Any,
}

/// Subscriber-side binding pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicPattern {
    source: String,
    segments: Vec<Segment>,
}

impl TopicPattern {
    pub fn parse(pattern: &str) -> DomainResult<Self> {
        if pattern.is_empty() {
            return Err(DomainError::validation("topic pattern is empty"));
        }

        let mut segments = Vec::new();
        for word in pattern.split('.') {
            let segment = match word {
                "*" => Segment::One,
                "#" => Segment::Any,
                "" => {
                    return Err(DomainError::validation(format!(
                        "topic pattern '{pattern}' has an empty word"
                    )));
                }
                w if w.contains(['*', '#']) => {
                    return Err(DomainError::validation(format!(
                        "wildcard must be a whole word in '{pattern}'"
                    )));
                }
                w => Segment::Word(w.to_string()),
            };
            segments.push(segment);
        }

        Ok(Self {
            source: pattern.to_string(),
            segments,
        })
    }

    /// Every notification.
    pub fn all() -> Self {
        Self {
            source: "#".to_string(),
            segments: vec![Segment::Any],
        }
    }

    /// Every change to any layout of `owner`.
    pub fn owner(owner: OwnerId) -> Self {
        Self {
            source: format!("{owner}.*.*"),
            segments: vec![Segment::Word(owner.to_string()), Segment::One, Segment::One],
        }
    }

    /// Every change to one layout.
    pub fn layout(owner: OwnerId, entity: LayoutId) -> Self {
        Self {
            source: format!("{owner}.{entity}.*"),
            segments: vec![
                Segment::Word(owner.to_string()),
                Segment::Word(entity.to_string()),
                Segment::One,
            ],
        }
    }

    /// One kind of change across every owner.
    pub fn kind(kind: ChangeKind) -> Self {
        Self {
            source: format!("*.*.{kind}"),
            segments: vec![Segment::One, Segment::One, Segment::Word(kind.as_str().to_string())],
        }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, key: &RoutingKey) -> bool {
        let words: Vec<&str> = key.words().collect();
        match_words(&self.segments, &words)
    }

    /// Leading literal words, up to the first wildcard.
    ///
    /// Brokers with prefix-only channel globbing subscribe on this prefix and
    /// filter precisely with [`TopicPattern::matches`].
    pub fn literal_prefix(&self) -> Vec<&str> {
        self.segments
            .iter()
            .map_while(|s| match s {
                Segment::Word(w) => Some(w.as_str()),
                _ => None,
            })
            .collect()
    }

    /// True when the pattern has no wildcard at all.
    pub fn is_exact(&self) -> bool {
        self.segments.iter().all(|s| matches!(s, Segment::Word(_)))
    }
}

impl core::fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.source)
    }
}

impl core::str::FromStr for TopicPattern {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn match_words(segments: &[Segment], words: &[&str]) -> bool {
    match segments.split_first() {
        None => words.is_empty(),
        Some((Segment::Any, rest)) => (0..=words.len()).any(|skip| match_words(rest, &words[skip..])),
        Some((Segment::One, rest)) => !words.is_empty() && match_words(rest, &words[1..]),
        Some((Segment::Word(w), rest)) => {
            words.first().is_some_and(|first| *first == w.as_str()) && match_words(rest, &words[1..])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(owner: OwnerId, entity: LayoutId, kind: ChangeKind) -> RoutingKey {
        RoutingKey::for_change(owner, entity, kind)
    }

    #[test]
    fn routing_key_is_owner_entity_kind() {
        let owner: OwnerId = "0191c0de-0000-7000-8000-00000000000a".parse().unwrap();
        let entity: LayoutId = "0191c0de-0000-7000-8000-00000000000b".parse().unwrap();
        assert_eq!(
            key(owner, entity, ChangeKind::Deleted).as_str(),
            "0191c0de-0000-7000-8000-00000000000a.0191c0de-0000-7000-8000-00000000000b.deleted"
        );
    }

    #[test]
    fn star_matches_exactly_one_word() {
        let p = TopicPattern::parse("a.*.updated").unwrap();
        assert!(p.matches(&RoutingKey("a.b.updated".into())));
        assert!(!p.matches(&RoutingKey("a.updated".into())));
        assert!(!p.matches(&RoutingKey("a.b.c.updated".into())));
    }

    #[test]
    fn hash_matches_zero_or_more_words() {
        let p = TopicPattern::parse("a.#").unwrap();
        assert!(p.matches(&RoutingKey("a".into())));
        assert!(p.matches(&RoutingKey("a.b".into())));
        assert!(p.matches(&RoutingKey("a.b.deleted".into())));
        assert!(!p.matches(&RoutingKey("b.a".into())));

        let mid = TopicPattern::parse("#.deleted").unwrap();
        assert!(mid.matches(&RoutingKey("x.y.deleted".into())));
        assert!(!mid.matches(&RoutingKey("x.y.updated".into())));
    }

    #[test]
    fn convenience_patterns_filter_by_owner_layout_and_kind() {
        let owner = OwnerId::new();
        let other = OwnerId::new();
        let entity = LayoutId::new();

        let by_owner = TopicPattern::owner(owner);
        assert!(by_owner.matches(&key(owner, entity, ChangeKind::Updated)));
        assert!(!by_owner.matches(&key(other, entity, ChangeKind::Updated)));

        let by_layout = TopicPattern::layout(owner, entity);
        assert!(by_layout.matches(&key(owner, entity, ChangeKind::Deleted)));
        assert!(!by_layout.matches(&key(owner, LayoutId::new(), ChangeKind::Deleted)));

        let deletes = TopicPattern::kind(ChangeKind::Deleted);
        assert!(deletes.matches(&key(other, entity, ChangeKind::Deleted)));
        assert!(!deletes.matches(&key(other, entity, ChangeKind::Updated)));

        assert!(TopicPattern::all().matches(&key(owner, entity, ChangeKind::Updated)));
        assert_eq!(TopicPattern::parse(by_owner.as_str()).unwrap(), by_owner);
    }

    #[test]
    fn malformed_patterns_are_rejected() {
        assert!(TopicPattern::parse("").is_err());
        assert!(TopicPattern::parse("a..b").is_err());
        assert!(TopicPattern::parse("a.b*").is_err());
    }

    #[test]
    fn literal_prefix_stops_at_first_wildcard() {
        let p = TopicPattern::parse("a.b.*.c").unwrap();
        assert_eq!(p.literal_prefix(), vec!["a", "b"]);
        assert!(!p.is_exact());
        assert!(TopicPattern::parse("a.b.c").unwrap().is_exact());
    }
}
