//! Debounce Tracker Implementation

use crate::config::DebounceConfig;
use crate::types::{AlarmId, ChangeType, SourceKey};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Debounce state of one source key
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlarmCaseState {
    /// Currently accepted state (true = alarm active)
    pub confirmed_state: bool,
    /// Tentative state awaiting confirmation, always != `confirmed_state`
    pub pending_state: Option<bool>,
    /// When `pending_state` first diverged
    pub debounce_started_at: Option<DateTime<Utc>>,
    /// Open alarm record for the current violation, if persisted
    pub bound_alarm_id: Option<AlarmId>,
    /// Number of violations confirmed so far on this key
    pub episode: u64,
    /// Episode and confirmation time of the most recent violation→normal commit
    pub last_ended: Option<(u64, DateTime<Utc>)>,
}

impl AlarmCaseState {
    fn clear_pending(&mut self) {
        self.pending_state = None;
        self.debounce_started_at = None;
    }
}

/// Result of feeding one reading into the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionOutcome {
    /// Confirmed state after this reading
    pub confirmed_state: bool,
    /// Whether this reading committed a transition
    pub state_changed: bool,
    /// Direction, when `state_changed`
    pub change_type: Option<ChangeType>,
    /// Alarm bound to the key. For a violation→normal commit this is the
    /// alarm to close; it has already been detached from the key.
    pub bound_alarm_id: Option<AlarmId>,
    /// Violation episode the reading belongs to
    pub episode: u64,
}

/// Per-key hysteresis state machine.
///
/// The map is guarded by a single lock; each key is written by exactly one
/// analysis worker, so no per-entry locking is needed.
pub struct DebounceTracker {
    config: DebounceConfig,
    states: Mutex<HashMap<SourceKey, AlarmCaseState>>,
}

impl DebounceTracker {
    /// Create a new tracker
    pub fn new(config: DebounceConfig) -> Self {
        info!(
            "Creating debounce tracker: normal->violation={}ms, violation->normal={}ms",
            config.normal_to_violation_ms, config.violation_to_normal_ms
        );
        Self {
            config,
            states: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &DebounceConfig {
        &self.config
    }

    fn states(&self) -> MutexGuard<'_, HashMap<SourceKey, AlarmCaseState>> {
        self.states.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Feed one per-frame verdict for `key` observed at `now`
    pub fn update(&self, key: SourceKey, detected: bool, now: DateTime<Utc>) -> TransitionOutcome {
        let mut states = self.states();
        let state = states.entry(key).or_default();

        let mut outcome = TransitionOutcome {
            confirmed_state: state.confirmed_state,
            state_changed: false,
            change_type: None,
            bound_alarm_id: state.bound_alarm_id,
            episode: state.episode,
        };

        // Agreement cancels any countdown in progress
        if detected == state.confirmed_state {
            if state.pending_state.take().is_some() {
                debug!(%key, "Debounce cancelled, signal reverted to {}", detected);
            }
            state.debounce_started_at = None;
            return outcome;
        }

        let started_at = match (state.pending_state, state.debounce_started_at) {
            (Some(_), Some(started_at)) => started_at,
            _ => {
                state.pending_state = Some(detected);
                state.debounce_started_at = Some(now);
                debug!(%key, "Debounce started towards {}", detected);
                return outcome;
            }
        };

        let (required, change_type) = if state.confirmed_state {
            (self.config.violation_to_normal(), ChangeType::ViolationToNormal)
        } else {
            (self.config.normal_to_violation(), ChangeType::NormalToViolation)
        };

        // A clock step backwards counts as no time elapsed
        let elapsed = (now - started_at).to_std().unwrap_or(Duration::ZERO);
        if elapsed < required {
            return outcome;
        }

        state.confirmed_state = detected;
        state.clear_pending();
        match change_type {
            ChangeType::NormalToViolation => {
                state.episode += 1;
                if let Some(stale) = state.bound_alarm_id.take() {
                    warn!(%key, "Discarding stale alarm binding {}", stale);
                }
                outcome.bound_alarm_id = None;
            }
            ChangeType::ViolationToNormal => {
                outcome.bound_alarm_id = state.bound_alarm_id.take();
                state.last_ended = Some((state.episode, now));
            }
        }

        info!(
            %key,
            "Confirmed {} after {}ms (episode {})",
            change_type.as_str(),
            elapsed.as_millis(),
            state.episode
        );

        outcome.confirmed_state = state.confirmed_state;
        outcome.state_changed = true;
        outcome.change_type = Some(change_type);
        outcome.episode = state.episode;
        outcome
    }

    /// Attach a freshly created alarm to the violation `episode` of `key`.
    ///
    /// Returns false when that violation already ended (or a newer one
    /// started) before the alarm was persisted; the caller owns the alarm
    /// then and must close it.
    pub fn bind_alarm_id(&self, key: SourceKey, episode: u64, alarm_id: AlarmId) -> bool {
        let mut states = self.states();
        let Some(state) = states.get_mut(&key) else {
            warn!(%key, "Cannot bind alarm {}: unknown source", alarm_id);
            return false;
        };

        if !state.confirmed_state || state.episode != episode || state.bound_alarm_id.is_some() {
            warn!(
                %key,
                "Cannot bind alarm {}: episode {} is over (current episode {}, active={})",
                alarm_id, episode, state.episode, state.confirmed_state
            );
            return false;
        }

        state.bound_alarm_id = Some(alarm_id);
        debug!(%key, "Bound alarm {} to episode {}", alarm_id, episode);
        true
    }

    /// When violation `episode` of `key` was confirmed over. Only the most
    /// recently ended episode is remembered.
    pub fn episode_ended_at(&self, key: &SourceKey, episode: u64) -> Option<DateTime<Utc>> {
        self.states()
            .get(key)
            .and_then(|state| state.last_ended)
            .filter(|(ended, _)| *ended == episode)
            .map(|(_, at)| at)
    }

    /// Copy of the state for `key`
    pub fn snapshot(&self, key: &SourceKey) -> Option<AlarmCaseState> {
        self.states().get(key).cloned()
    }

    /// Forget `key` entirely
    pub fn reset(&self, key: &SourceKey) -> Option<AlarmCaseState> {
        self.states().remove(key)
    }

    /// Number of tracked keys
    pub fn len(&self) -> usize {
        self.states().len()
    }

    pub fn is_empty(&self) -> bool {
        self.states().is_empty()
    }

    /// Keys whose confirmed state is currently active
    pub fn active_keys(&self) -> Vec<SourceKey> {
        self.states()
            .iter()
            .filter(|(_, s)| s.confirmed_state)
            .map(|(k, _)| *k)
            .collect()
    }
}

impl Default for DebounceTracker {
    fn default() -> Self {
        Self::new(DebounceConfig::default())
    }
}
