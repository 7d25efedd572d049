// src/services/attempts.rs

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

use crate::services::grader::ExerciseAttempt;

struct Entry {
    attempt: Arc<ExerciseAttempt>,
    touched: Instant,
}

/// Live attempts, held in memory only. Idle attempts expire after `ttl`.
pub struct AttemptRegistry {
    ttl: Duration,
    attempts: Mutex<HashMap<String, Entry>>,
}

impl AttemptRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.attempts.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Stores an attempt and returns its id.
    pub fn insert(&self, attempt: ExerciseAttempt) -> (String, Arc<ExerciseAttempt>) {
        let now = Instant::now();
        let id = Uuid::new_v4().to_string();
        let attempt = Arc::new(attempt);

        let mut attempts = self.lock();
        let before = attempts.len();
        attempts.retain(|_, e| now.duration_since(e.touched) < self.ttl);
        if attempts.len() < before {
            tracing::debug!("expired {} idle attempts", before - attempts.len());
        }
        attempts.insert(
            id.clone(),
            Entry {
                attempt: Arc::clone(&attempt),
                touched: now,
            },
        );
        (id, attempt)
    }

    pub fn get(&self, id: &str) -> Option<Arc<ExerciseAttempt>> {
        let now = Instant::now();
        let mut attempts = self.lock();
        let expired = match attempts.get_mut(id) {
            None => return None,
            Some(entry) if now.duration_since(entry.touched) >= self.ttl => true,
            Some(entry) => {
                entry.touched = now;
                return Some(Arc::clone(&entry.attempt));
            }
        };
        if expired {
            attempts.remove(id);
        }
        None
    }

    pub fn remove(&self, id: &str) -> bool {
        self.lock().remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::exercise::{Exercise, Question};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn attempt() -> ExerciseAttempt {
        let exercise = Exercise {
            id: "e1".to_string(),
            group_id: "g1".to_string(),
            questions: vec![Question {
                question: "The ___ is red.".to_string(),
                answer: "apple".to_string(),
            }],
            created_at: chrono::Utc::now(),
        };
        ExerciseAttempt::start(&exercise, &mut StdRng::seed_from_u64(1)).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_attempt_expires() {
        let registry = AttemptRegistry::new(Duration::from_secs(60));
        let (id, _) = registry.insert(attempt());

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(registry.get(&id).is_some());

        // The read above refreshed it.
        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(registry.get(&id).is_some());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(registry.get(&id).is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_insert_sweeps_expired() {
        let registry = AttemptRegistry::new(Duration::from_secs(10));
        registry.insert(attempt());
        tokio::time::advance(Duration::from_secs(11)).await;
        registry.insert(attempt());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_remove() {
        let registry = AttemptRegistry::new(Duration::from_secs(10));
        let (id, attempt) = registry.insert(attempt());
        assert_eq!(attempt.exercise_id(), "e1");
        assert!(registry.remove(&id));
        assert!(!registry.remove(&id));
    }
}
