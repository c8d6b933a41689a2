//! Event and condition triggers.
//!
//! A trigger pairs a matcher with a named action and an approval level.
//! Event triggers match on event names (with the bus wildcard rule);
//! condition triggers evaluate a predicate over the event payload.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::approval::HdmLevel;
use super::event::BusEvent;

/// Predicate over an event. Errors are treated as a non-match.
pub type TriggerPredicate = Arc<dyn Fn(&BusEvent) -> anyhow::Result<bool> + Send + Sync>;

/// How a trigger decides whether an event matches.
#[derive(Clone)]
pub enum TriggerMatch {
    /// Event-name pattern under the bus wildcard rule.
    Pattern(String),
    /// Predicate over the event payload.
    Predicate(TriggerPredicate),
}

impl std::fmt::Debug for TriggerMatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pattern(p) => f.debug_tuple("Pattern").field(p).finish(),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// Trigger kind discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    Event,
    Condition,
}

/// A registered trigger.
#[derive(Debug, Clone)]
pub struct Trigger {
    pub id: String,
    pub name: String,
    pub kind: TriggerKind,
    pub matcher: TriggerMatch,
    /// Name of the engine action dispatched when this trigger fires.
    pub action: String,
    pub hdm_level: HdmLevel,
    pub enabled: bool,
    /// Minimum interval between consecutive firings.
    pub cooldown: Option<std::time::Duration>,
    pub fire_count: u64,
    pub last_fired: Option<DateTime<Utc>>,
}

impl Trigger {
    /// Whether the cooldown window since the last firing has elapsed.
    pub fn cooldown_ready(&self, now: DateTime<Utc>) -> bool {
        match (self.cooldown, self.last_fired) {
            (Some(cooldown), Some(last)) => now
                .signed_duration_since(last)
                .to_std()
                .map(|elapsed| elapsed >= cooldown)
                .unwrap_or(true),
            _ => true,
        }
    }

    /// Serializable projection for state snapshots and `trigger:fire`
    /// event payloads.
    pub fn projection(&self) -> TriggerProjection {
        TriggerProjection {
            id: self.id.clone(),
            name: self.name.clone(),
            kind: self.kind,
            pattern: match &self.matcher {
                TriggerMatch::Pattern(p) => Some(p.clone()),
                TriggerMatch::Predicate(_) => None,
            },
            action: self.action.clone(),
            hdm_level: self.hdm_level,
            enabled: self.enabled,
            fire_count: self.fire_count,
            last_fired: self.last_fired,
        }
    }
}

/// Persistable view of a trigger. Predicates cannot be serialized, so
/// condition triggers project with `pattern: None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerProjection {
    pub id: String,
    pub name: String,
    pub kind: TriggerKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    pub action: String,
    pub hdm_level: HdmLevel,
    pub enabled: bool,
    pub fire_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_fired: Option<DateTime<Utc>>,
}

/// Registration input for a trigger.
#[derive(Clone)]
pub struct TriggerConfig {
    pub id: String,
    pub name: String,
    pub matcher: TriggerMatch,
    pub action: String,
    pub hdm_level: HdmLevel,
    pub enabled: bool,
    pub cooldown: Option<std::time::Duration>,
}

impl TriggerConfig {
    /// Event trigger matching `pattern` under the bus wildcard rule.
    pub fn event(
        id: impl Into<String>,
        name: impl Into<String>,
        pattern: impl Into<String>,
        action: impl Into<String>,
        hdm_level: HdmLevel,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            matcher: TriggerMatch::Pattern(pattern.into()),
            action: action.into(),
            hdm_level,
            enabled: true,
            cooldown: None,
        }
    }

    /// Condition trigger evaluating `predicate` against each event.
    pub fn condition<F>(
        id: impl Into<String>,
        name: impl Into<String>,
        predicate: F,
        action: impl Into<String>,
        hdm_level: HdmLevel,
    ) -> Self
    where
        F: Fn(&BusEvent) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            name: name.into(),
            matcher: TriggerMatch::Predicate(Arc::new(predicate)),
            action: action.into(),
            hdm_level,
            enabled: true,
            cooldown: None,
        }
    }

    pub fn with_cooldown(mut self, cooldown: std::time::Duration) -> Self {
        self.cooldown = Some(cooldown);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub(crate) fn into_trigger(self) -> Trigger {
        let kind = match &self.matcher {
            TriggerMatch::Pattern(_) => TriggerKind::Event,
            TriggerMatch::Predicate(_) => TriggerKind::Condition,
        };
        Trigger {
            id: self.id,
            name: self.name,
            kind,
            matcher: self.matcher,
            action: self.action,
            hdm_level: self.hdm_level,
            enabled: self.enabled,
            cooldown: self.cooldown,
            fire_count: 0,
            last_fired: None,
        }
    }
}
