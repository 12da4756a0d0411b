use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

use crate::models::MovieId;

pub const MAX_RATING: u8 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreferenceKind {
    Watched,
    Saved,
    Rated,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PreferenceError {
    #[error("Rating {0} is outside 1..=10")]
    RatingOutOfRange(u8),
}

/// Key-value storage for per-movie user state, keyed by `(kind, movie id)`.
/// Flags are stored as `1`, ratings as their value; `None` clears the key.
pub trait PreferenceStore: Send + Sync {
    fn get(&self, kind: PreferenceKind, movie_id: MovieId) -> Option<i64>;
    fn set(&self, kind: PreferenceKind, movie_id: MovieId, value: Option<i64>);
    fn count(&self, kind: PreferenceKind) -> usize;
}

#[derive(Debug, Default)]
pub struct InMemoryPreferences {
    entries: Mutex<HashMap<(PreferenceKind, MovieId), i64>>,
}

impl PreferenceStore for InMemoryPreferences {
    fn get(&self, kind: PreferenceKind, movie_id: MovieId) -> Option<i64> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.get(&(kind, movie_id)).copied()
    }

    fn set(&self, kind: PreferenceKind, movie_id: MovieId, value: Option<i64>) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match value {
            Some(v) => {
                entries.insert((kind, movie_id), v);
            }
            None => {
                entries.remove(&(kind, movie_id));
            }
        }
    }

    fn count(&self, kind: PreferenceKind) -> usize {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.keys().filter(|(k, _)| *k == kind).count()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MoviePreferences {
    pub watched: bool,
    pub saved: bool,
    pub rating: Option<u8>,
}

/// Typed access to a [`PreferenceStore`].
#[derive(Clone)]
pub struct Preferences {
    store: Arc<dyn PreferenceStore>,
}

impl Default for Preferences {
    fn default() -> Self {
        Self::new(Arc::new(InMemoryPreferences::default()))
    }
}

impl Preferences {
    pub fn new(store: Arc<dyn PreferenceStore>) -> Self {
        Self { store }
    }

    pub fn is_watched(&self, movie_id: MovieId) -> bool {
        self.flag(PreferenceKind::Watched, movie_id)
    }

    /// Returns whether the stored state changed.
    pub fn set_watched(&self, movie_id: MovieId, watched: bool) -> bool {
        self.set_flag(PreferenceKind::Watched, movie_id, watched)
    }

    pub fn is_saved(&self, movie_id: MovieId) -> bool {
        self.flag(PreferenceKind::Saved, movie_id)
    }

    pub fn set_saved(&self, movie_id: MovieId, saved: bool) -> bool {
        self.set_flag(PreferenceKind::Saved, movie_id, saved)
    }

    pub fn rating(&self, movie_id: MovieId) -> Option<u8> {
        self.store
            .get(PreferenceKind::Rated, movie_id)
            .and_then(|v| u8::try_from(v).ok())
    }

    pub fn set_rating(&self, movie_id: MovieId, rating: u8) -> Result<(), PreferenceError> {
        if !(1..=MAX_RATING).contains(&rating) {
            return Err(PreferenceError::RatingOutOfRange(rating));
        }
        self.store
            .set(PreferenceKind::Rated, movie_id, Some(i64::from(rating)));
        Ok(())
    }

    pub fn clear_rating(&self, movie_id: MovieId) {
        self.store.set(PreferenceKind::Rated, movie_id, None);
    }

    pub fn watched_count(&self) -> usize {
        self.store.count(PreferenceKind::Watched)
    }

    pub fn for_movie(&self, movie_id: MovieId) -> MoviePreferences {
        MoviePreferences {
            watched: self.is_watched(movie_id),
            saved: self.is_saved(movie_id),
            rating: self.rating(movie_id),
        }
    }

    fn flag(&self, kind: PreferenceKind, movie_id: MovieId) -> bool {
        self.store.get(kind, movie_id).is_some_and(|v| v != 0)
    }

    fn set_flag(&self, kind: PreferenceKind, movie_id: MovieId, value: bool) -> bool {
        if self.flag(kind, movie_id) == value {
            return false;
        }
        self.store.set(kind, movie_id, value.then_some(1));
        true
    }
}
