//! Memory items
//!
//! The fundamental unit of the graph. Each item carries a closed kind, free
//! text, ordered tags, clamped importance/energy scalars, an optional TTL,
//! and access/feedback counters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::memory::clamp01;

// ============================================================================
// ITEM KINDS
// ============================================================================

/// Kinds of memory items
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    /// Something that happened at a point in time
    Event,
    /// A discrete piece of information
    #[default]
    Fact,
    /// An intention for the future
    Plan,
    /// A consolidation summary over older items
    Reflection,
    /// A named person, place, or thing
    Entity,
    /// A guiding rule
    Principle,
    /// A reusable method
    Technique,
    /// A caution learned the hard way
    Warning,
    /// A multi-step procedure
    Workflow,
    /// A connector between otherwise distant topics
    Bridge,
}

impl ItemKind {
    /// String representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Event => "event",
            ItemKind::Fact => "fact",
            ItemKind::Plan => "plan",
            ItemKind::Reflection => "reflection",
            ItemKind::Entity => "entity",
            ItemKind::Principle => "principle",
            ItemKind::Technique => "technique",
            ItemKind::Warning => "warning",
            ItemKind::Workflow => "workflow",
            ItemKind::Bridge => "bridge",
        }
    }

    /// Parse from a string name; unrecognized names fall back to `Fact`
    pub fn parse_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "event" => ItemKind::Event,
            "fact" => ItemKind::Fact,
            "plan" => ItemKind::Plan,
            "reflection" => ItemKind::Reflection,
            "entity" => ItemKind::Entity,
            "principle" => ItemKind::Principle,
            "technique" => ItemKind::Technique,
            "warning" => ItemKind::Warning,
            "workflow" => ItemKind::Workflow,
            "bridge" => ItemKind::Bridge,
            _ => ItemKind::Fact,
        }
    }
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// TTL DURATIONS
// ============================================================================

/// Parse a duration string with the grammar `N(ms|s|m|h|d)`
///
/// Returns the duration in milliseconds, or `None` when malformed.
pub fn parse_duration_ms(s: &str) -> Option<i64> {
    let s = s.trim();
    let split = s.find(|c: char| !c.is_ascii_digit())?;
    if split == 0 {
        return None;
    }
    let n: i64 = s[..split].parse().ok()?;
    let factor = match &s[split..] {
        "ms" => 1,
        "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        "d" => 86_400_000,
        _ => return None,
    };
    n.checked_mul(factor)
}

// ============================================================================
// MEMORY ITEM
// ============================================================================

/// An item in the memory graph
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryItem {
    /// Unique identifier (`m_<timestamp36>_<hex8>`), immutable once assigned
    pub id: String,
    /// Kind of item
    pub kind: ItemKind,
    /// The remembered text
    pub text: String,
    /// Ordered, de-duplicated tags
    pub tags: Vec<String>,
    /// Inherent significance in [0, 1]
    pub importance: f64,
    /// Decaying liveness in [0, 1]
    pub energy: f64,
    /// Optional lifetime as a duration string (`Nms|s|m|h|d`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<String>,
    /// Agent namespace; empty means global
    #[serde(default)]
    pub scope: String,
    /// When the item was created
    pub created_at: DateTime<Utc>,
    /// When the item was last modified
    pub updated_at: DateTime<Utc>,
    /// When the item was last read
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_accessed_at: Option<DateTime<Utc>>,
    /// Number of reads
    pub access_count: u32,
    /// Feedback successes
    pub success: u32,
    /// Feedback failures
    pub fail: u32,
}

impl MemoryItem {
    /// TTL in milliseconds, when present and well-formed
    pub fn ttl_ms(&self) -> Option<i64> {
        self.ttl.as_deref().and_then(parse_duration_ms)
    }

    /// Whether the TTL has elapsed at `now`
    pub fn ttl_elapsed(&self, now: DateTime<Utc>) -> bool {
        match self.ttl_ms() {
            Some(ttl) => now.timestamp_millis() - self.created_at.timestamp_millis() >= ttl,
            None => false,
        }
    }

    /// Milliseconds since the item was last touched (access, else creation)
    pub fn recency_ms(&self, now: DateTime<Utc>) -> i64 {
        let last = self.last_accessed_at.unwrap_or(self.created_at);
        (now.timestamp_millis() - last.timestamp_millis()).max(0)
    }
}

// ============================================================================
// INPUT
// ============================================================================

/// Input for `remember`
///
/// Uses `deny_unknown_fields` so callers cannot smuggle extra state in.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RememberInput {
    /// Text to remember
    pub text: String,
    /// Kind name (unrecognized names become `fact`)
    #[serde(default)]
    pub kind: Option<String>,
    /// Importance in [0, 1]
    #[serde(default)]
    pub importance: Option<f64>,
    /// Optional TTL duration string
    #[serde(default)]
    pub ttl: Option<String>,
    /// Tags
    #[serde(default)]
    pub tags: Vec<String>,
    /// Agent namespace
    #[serde(default)]
    pub scope: Option<String>,
}

impl RememberInput {
    /// Validate domains and formats; no state is touched on error
    pub fn validate(&self) -> Result<()> {
        if self.text.trim().is_empty() {
            return Err(EngineError::Validation("text cannot be empty".to_string()));
        }
        if let Some(importance) = self.importance {
            if !(0.0..=1.0).contains(&importance) {
                return Err(EngineError::Validation(format!(
                    "importance {} outside [0, 1]",
                    importance
                )));
            }
        }
        if let Some(ttl) = &self.ttl {
            if parse_duration_ms(ttl).is_none() {
                return Err(EngineError::Validation(format!(
                    "malformed ttl '{}' (expected N(ms|s|m|h|d))",
                    ttl
                )));
            }
        }
        for tag in &self.tags {
            if tag.trim().is_empty() {
                return Err(EngineError::Validation("empty tag".to_string()));
            }
        }
        Ok(())
    }

    /// Ordered, de-duplicated tags
    pub fn normalized_tags(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        self.tags
            .iter()
            .filter(|t| seen.insert(t.as_str()))
            .cloned()
            .collect()
    }

    /// Build the item, minting nothing; the graph core assigns id and clock
    pub fn into_item(self, id: String, now: DateTime<Utc>) -> MemoryItem {
        let tags = self.normalized_tags();
        MemoryItem {
            id,
            kind: ItemKind::parse_name(self.kind.as_deref().unwrap_or("fact")),
            text: self.text,
            tags,
            importance: clamp01(self.importance.unwrap_or(0.5)),
            energy: 1.0,
            ttl: self.ttl,
            scope: self.scope.unwrap_or_default(),
            created_at: now,
            updated_at: now,
            last_accessed_at: None,
            access_count: 0,
            success: 0,
            fail: 0,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_roundtrip() {
        for kind in [
            ItemKind::Event,
            ItemKind::Fact,
            ItemKind::Plan,
            ItemKind::Reflection,
            ItemKind::Entity,
            ItemKind::Principle,
            ItemKind::Technique,
            ItemKind::Warning,
            ItemKind::Workflow,
            ItemKind::Bridge,
        ] {
            assert_eq!(ItemKind::parse_name(kind.as_str()), kind);
        }
        assert_eq!(ItemKind::parse_name("insight"), ItemKind::Fact);
    }

    #[test]
    fn test_duration_grammar() {
        assert_eq!(parse_duration_ms("250ms"), Some(250));
        assert_eq!(parse_duration_ms("30s"), Some(30_000));
        assert_eq!(parse_duration_ms("5m"), Some(300_000));
        assert_eq!(parse_duration_ms("2h"), Some(7_200_000));
        assert_eq!(parse_duration_ms("30d"), Some(2_592_000_000));
        assert_eq!(parse_duration_ms("30"), None);
        assert_eq!(parse_duration_ms("d"), None);
        assert_eq!(parse_duration_ms("30w"), None);
        assert_eq!(parse_duration_ms("-5d"), None);
    }

    #[test]
    fn test_validate_rejects_bad_domains() {
        let base = RememberInput {
            text: "remember me".to_string(),
            kind: None,
            importance: None,
            ttl: None,
            tags: vec![],
            scope: None,
        };

        let mut bad = base.clone();
        bad.importance = Some(1.5);
        assert!(bad.validate().is_err());

        let mut bad = base.clone();
        bad.ttl = Some("7w".to_string());
        assert!(bad.validate().is_err());

        let mut bad = base.clone();
        bad.tags = vec!["ok".to_string(), "  ".to_string()];
        assert!(bad.validate().is_err());

        let mut bad = base.clone();
        bad.text = "   ".to_string();
        assert!(bad.validate().is_err());

        assert!(base.validate().is_ok());
    }

    #[test]
    fn test_tags_deduplicated_in_order() {
        let input = RememberInput {
            text: "t".to_string(),
            kind: None,
            importance: None,
            ttl: None,
            tags: vec!["b".into(), "a".into(), "b".into()],
            scope: None,
        };
        assert_eq!(input.normalized_tags(), vec!["b", "a"]);
    }

    #[test]
    fn test_ttl_elapsed() {
        let now = Utc::now();
        let input = RememberInput {
            text: "short-lived".to_string(),
            kind: None,
            importance: None,
            ttl: Some("1h".to_string()),
            tags: vec![],
            scope: None,
        };
        let item = input.into_item("m_1_00000000".to_string(), now);
        assert!(!item.ttl_elapsed(now));
        assert!(item.ttl_elapsed(now + chrono::Duration::hours(2)));
    }
}
