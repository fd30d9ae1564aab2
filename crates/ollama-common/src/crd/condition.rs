//! Condition set shared by Model and Prompt status
//!
//! Two condition types are used: `Synced` (did the last reconcile finish
//! without error) and `Ready` (is the resource's effect actually available).
//! A [`ConditionSet`] holds at most one condition per type and is only ever
//! mutated through [`ConditionSet::set`].

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition type reporting whether the last reconcile succeeded
pub const TYPE_SYNCED: &str = "Synced";

/// Condition type reporting whether the resource is usable
pub const TYPE_READY: &str = "Ready";

/// Well-known condition reasons
pub mod reasons {
    /// Last reconcile finished without error
    pub const RECONCILE_SUCCESS: &str = "ReconcileSuccess";
    /// Last reconcile returned an error
    pub const RECONCILE_ERROR: &str = "ReconcileError";
    /// Resource is available
    pub const AVAILABLE: &str = "Available";
    /// Resource is not available
    pub const UNAVAILABLE: &str = "Unavailable";
    /// Resource is being created
    pub const CREATING: &str = "Creating";
}

/// Condition status following Kubernetes conventions
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Kubernetes-style condition
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type (`Synced` or `Ready`)
    #[serde(rename = "type")]
    pub type_: String,

    /// True, False or Unknown
    pub status: ConditionStatus,

    /// Machine-readable reason
    pub reason: String,

    /// Human-readable detail
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    /// Last time the condition changed value
    pub last_transition_time: DateTime<Utc>,

    /// Generation of the resource this condition was computed from
    #[serde(default, skip_serializing_if = "is_zero")]
    pub observed_generation: i64,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

impl Condition {
    /// Create a new condition stamped with the current time
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
            observed_generation: 0,
        }
    }

    /// Synced=True: the last reconcile succeeded
    pub fn reconcile_success() -> Self {
        Self::new(
            TYPE_SYNCED,
            ConditionStatus::True,
            reasons::RECONCILE_SUCCESS,
            "",
        )
    }

    /// Synced=False carrying the error message
    pub fn reconcile_error(err: &dyn std::fmt::Display) -> Self {
        Self::new(
            TYPE_SYNCED,
            ConditionStatus::False,
            reasons::RECONCILE_ERROR,
            err.to_string(),
        )
    }

    /// Ready=True
    pub fn available() -> Self {
        Self::new(TYPE_READY, ConditionStatus::True, reasons::AVAILABLE, "")
    }

    /// Ready=False because the resource is not available
    pub fn unavailable() -> Self {
        Self::new(TYPE_READY, ConditionStatus::False, reasons::UNAVAILABLE, "")
    }

    /// Ready=False because the resource is being created
    pub fn creating() -> Self {
        Self::new(TYPE_READY, ConditionStatus::False, reasons::CREATING, "")
    }

    /// Replace the message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Stamp the generation this condition was computed from
    pub fn with_observed_generation(mut self, generation: i64) -> Self {
        self.observed_generation = generation;
        self
    }

    /// Same type, status, reason and message.
    ///
    /// Transition time and observed generation are ignored.
    pub fn equivalent(&self, other: &Condition) -> bool {
        self.type_ == other.type_
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }

    /// Whether the condition status is True
    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

/// At most one condition per type, in insertion order
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(transparent)]
pub struct ConditionSet(Vec<Condition>);

impl ConditionSet {
    /// Build a set from conditions, applying [`ConditionSet::set`] semantics
    pub fn from_conditions(conditions: impl IntoIterator<Item = Condition>) -> Self {
        let mut set = Self::default();
        set.set(conditions);
        set
    }

    /// Condition of the given type
    pub fn get(&self, type_: &str) -> Option<&Condition> {
        self.0.iter().find(|c| c.type_ == type_)
    }

    /// Iterate conditions in stored order
    pub fn iter(&self) -> impl Iterator<Item = &Condition> {
        self.0.iter()
    }

    /// Number of conditions held
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when no condition is held
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Set conditions, replacing any existing condition of the same type.
    ///
    /// An equivalent condition leaves the stored one untouched (keeping its
    /// transition time) except that a higher observed generation is adopted.
    pub fn set(&mut self, conditions: impl IntoIterator<Item = Condition>) {
        for incoming in conditions {
            match self.0.iter_mut().find(|c| c.type_ == incoming.type_) {
                Some(existing) if existing.equivalent(&incoming) => {
                    if existing.observed_generation < incoming.observed_generation {
                        existing.observed_generation = incoming.observed_generation;
                    }
                }
                Some(existing) => *existing = incoming,
                None => self.0.push(incoming),
            }
        }
    }

    /// Whether the stored condition of this type is equivalent to `condition`
    pub fn has(&self, condition: &Condition) -> bool {
        self.get(&condition.type_)
            .is_some_and(|existing| existing.equivalent(condition))
    }

    /// Equality ignoring order, transition times and observed generations
    pub fn equivalent(&self, other: &ConditionSet) -> bool {
        self.len() == other.len() && self.iter().all(|c| other.has(c))
    }
}

impl<'a> IntoIterator for &'a ConditionSet {
    type Item = &'a Condition;
    type IntoIter = std::slice::Iter<'a, Condition>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
