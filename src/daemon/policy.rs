//! Threshold policy: pure decision function plus the per-monitor state it reads.
//!
//! `decide` never mutates anything. The owning monitor applies the returned
//! [`Decision`] to its own [`MonitorState`] via [`MonitorState::advance`]; no other
//! monitor ever sees that state.
//!
//! Rules:
//! - Reclaim fires when utilization ≥ `reclaim_at` and at least
//!   `reclaim_cooldown_ticks` ticks have passed since the last reclaim. The first
//!   breach after startup is eligible immediately.
//! - Escalate fires when utilization ≥ `escalate_at`, once per process lifetime.
//! - Both crossed in the same tick: Escalate wins and Reclaim is skipped.
//! - The breach level (reported on change) moves up immediately and steps down
//!   one level per tick only after clearing the lower threshold by `hysteresis_pct`.

#![allow(missing_docs)]

use std::fmt;

use serde::{Deserialize, Serialize};

/// Static thresholds for one monitored resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRule {
    pub resource_label: String,
    pub reclaim_at: f64,
    /// `None` disables escalation for this resource.
    pub escalate_at: Option<f64>,
    pub hysteresis_pct: f64,
    pub reclaim_cooldown_ticks: u64,
}

/// Corrective action chosen for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    None,
    Reclaim,
    Escalate,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Reclaim => write!(f, "reclaim"),
            Self::Escalate => write!(f, "escalate"),
        }
    }
}

/// Coarse breach band, ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreachLevel {
    Normal,
    Reclaim,
    Escalate,
}

impl fmt::Display for BreachLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::Reclaim => write!(f, "reclaim"),
            Self::Escalate => write!(f, "escalate"),
        }
    }
}

/// Output of one policy evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub action: Action,
    pub level: BreachLevel,
    /// `Some(previous)` when `level` differs from the prior tick's level.
    pub level_changed_from: Option<BreachLevel>,
}

/// Mutable cross-tick state owned by exactly one monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorState {
    level: BreachLevel,
    /// `None` until the first reclaim.
    ticks_since_reclaim: Option<u64>,
    escalated: bool,
    ticks: u64,
}

impl Default for MonitorState {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitorState {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            level: BreachLevel::Normal,
            ticks_since_reclaim: None,
            escalated: false,
            ticks: 0,
        }
    }

    #[must_use]
    pub const fn level(&self) -> BreachLevel {
        self.level
    }

    #[must_use]
    pub const fn escalated(&self) -> bool {
        self.escalated
    }

    #[must_use]
    pub const fn ticks(&self) -> u64 {
        self.ticks
    }

    #[must_use]
    pub const fn ticks_since_reclaim(&self) -> Option<u64> {
        self.ticks_since_reclaim
    }

    /// Whether a reclaim is allowed on the upcoming tick.
    #[must_use]
    pub fn reclaim_ready(&self, cooldown_ticks: u64) -> bool {
        self.ticks_since_reclaim
            .is_none_or(|since| since.saturating_add(1) >= cooldown_ticks)
    }

    /// Apply a decision made against this state.
    pub fn advance(&mut self, decision: &Decision) {
        self.ticks = self.ticks.saturating_add(1);
        self.level = decision.level;
        match decision.action {
            Action::Reclaim => self.ticks_since_reclaim = Some(0),
            Action::Escalate => {
                self.escalated = true;
                self.bump_reclaim_counter();
            }
            Action::None => self.bump_reclaim_counter(),
        }
    }

    /// Record a tick of a pattern-only monitor.
    pub fn advance_pattern(&mut self, action: Action) {
        self.ticks = self.ticks.saturating_add(1);
        if action == Action::Escalate {
            self.escalated = true;
        }
    }

    fn bump_reclaim_counter(&mut self) {
        if let Some(since) = self.ticks_since_reclaim.as_mut() {
            *since = since.saturating_add(1);
        }
    }
}

/// Decide the action for one utilization reading.
#[must_use]
pub fn decide(utilization: f64, rule: &ThresholdRule, state: &MonitorState) -> Decision {
    let level = classify_with_hysteresis(state.level, utilization, rule);
    let level_changed_from = (level != state.level).then_some(state.level);

    let escalate_crossed = rule.escalate_at.is_some_and(|at| utilization >= at);
    // At or above escalate_at, reclaim is skipped even after escalating.
    let action = if escalate_crossed {
        if state.escalated {
            Action::None
        } else {
            Action::Escalate
        }
    } else if utilization >= rule.reclaim_at && state.reclaim_ready(rule.reclaim_cooldown_ticks) {
        Action::Reclaim
    } else {
        Action::None
    };

    Decision {
        action,
        level,
        level_changed_from,
    }
}

/// Boolean policy for pattern-triggered monitors: escalate the first time the
/// pattern is seen, never again. No hysteresis.
#[must_use]
pub fn decide_pattern(seen: bool, state: &MonitorState) -> Action {
    if seen && !state.escalated {
        Action::Escalate
    } else {
        Action::None
    }
}

fn raw_classify(utilization: f64, rule: &ThresholdRule) -> BreachLevel {
    if rule.escalate_at.is_some_and(|at| utilization >= at) {
        BreachLevel::Escalate
    } else if utilization >= rule.reclaim_at {
        BreachLevel::Reclaim
    } else {
        BreachLevel::Normal
    }
}

fn classify_with_hysteresis(
    current: BreachLevel,
    utilization: f64,
    rule: &ThresholdRule,
) -> BreachLevel {
    let raw = raw_classify(utilization, rule);

    // Fast attack.
    if raw >= current {
        return raw;
    }

    // Slow decay: one level per tick, and only once clear of the band.
    match current {
        BreachLevel::Escalate => {
            let at = rule.escalate_at.unwrap_or(rule.reclaim_at);
            if utilization < at - rule.hysteresis_pct {
                BreachLevel::Reclaim
            } else {
                BreachLevel::Escalate
            }
        }
        BreachLevel::Reclaim => {
            if utilization < rule.reclaim_at - rule.hysteresis_pct {
                BreachLevel::Normal
            } else {
                BreachLevel::Reclaim
            }
        }
        BreachLevel::Normal => BreachLevel::Normal,
    }
}
