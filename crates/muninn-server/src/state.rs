// crates/muninn-server/src/state.rs
// Single-owner mutable engine state: worker spawn cooldown and the
// prediction cache. Explicit init/reset instead of process-wide singletons.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Cooldown between opportunistic worker spawns.
const SPAWN_COOLDOWN: Duration = Duration::from_secs(300);

/// Prediction cache TTL.
const CACHE_TTL: Duration = Duration::from_secs(60);

/// Prediction cache capacity; eviction is an expired-first scan.
const CACHE_CAPACITY: usize = 100;

/// A cached workflow prediction.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedPrediction {
    pub predicted_tool: String,
    pub confidence: f64,
}

struct CacheEntry {
    value: CachedPrediction,
    inserted_at: Instant,
}

/// Owner struct for the engine's in-process mutable state.
pub struct EngineState {
    last_worker_spawn: Mutex<Option<Instant>>,
    predictions: Mutex<HashMap<String, CacheEntry>>,
}

impl EngineState {
    pub fn new() -> Self {
        Self {
            last_worker_spawn: Mutex::new(None),
            predictions: Mutex::new(HashMap::new()),
        }
    }

    /// Reset all state (tests and explicit reinitialization).
    pub fn reset(&self) {
        *self.last_worker_spawn.lock().unwrap_or_else(|e| e.into_inner()) = None;
        self.predictions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Claim the right to spawn a worker. Returns false inside the
    /// cooldown window; claiming updates the timestamp.
    pub fn try_claim_worker_spawn(&self) -> bool {
        let mut guard = self.last_worker_spawn.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        match *guard {
            Some(last) if now.duration_since(last) < SPAWN_COOLDOWN => false,
            _ => {
                *guard = Some(now);
                true
            }
        }
    }

    /// Cached prediction for a trigram key, if fresh.
    pub fn cached_prediction(&self, key: &str) -> Option<CachedPrediction> {
        let guard = self.predictions.lock().unwrap_or_else(|e| e.into_inner());
        guard
            .get(key)
            .filter(|entry| entry.inserted_at.elapsed() < CACHE_TTL)
            .map(|entry| entry.value.clone())
    }

    /// Insert a prediction, evicting expired entries first and then an
    /// arbitrary entry if still at capacity.
    pub fn cache_prediction(&self, key: &str, value: CachedPrediction) {
        let mut guard = self.predictions.lock().unwrap_or_else(|e| e.into_inner());
        if guard.len() >= CACHE_CAPACITY {
            guard.retain(|_, entry| entry.inserted_at.elapsed() < CACHE_TTL);
            if guard.len() >= CACHE_CAPACITY {
                if let Some(oldest) = guard
                    .iter()
                    .min_by_key(|(_, entry)| entry.inserted_at)
                    .map(|(k, _)| k.clone())
                {
                    guard.remove(&oldest);
                }
            }
        }
        guard.insert(
            key.to_string(),
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }
}

impl Default for EngineState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_cooldown() {
        let state = EngineState::new();
        assert!(state.try_claim_worker_spawn());
        assert!(!state.try_claim_worker_spawn(), "second claim inside cooldown");
        state.reset();
        assert!(state.try_claim_worker_spawn());
    }

    #[test]
    fn test_prediction_cache_hit() {
        let state = EngineState::new();
        let prediction = CachedPrediction {
            predicted_tool: "Edit".into(),
            confidence: 0.667,
        };
        state.cache_prediction("Read,Grep,Read", prediction.clone());
        assert_eq!(state.cached_prediction("Read,Grep,Read"), Some(prediction));
        assert_eq!(state.cached_prediction("other"), None);
    }

    #[test]
    fn test_prediction_cache_capacity() {
        let state = EngineState::new();
        for i in 0..150 {
            state.cache_prediction(
                &format!("key{i}"),
                CachedPrediction {
                    predicted_tool: "Read".into(),
                    confidence: 0.5,
                },
            );
        }
        let guard = state.predictions.lock().unwrap();
        assert!(guard.len() <= CACHE_CAPACITY);
    }
}
