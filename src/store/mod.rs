// src/store/mod.rs

//! Data access seams.
//!
//! Handlers and services only see these traits. `memory` backs tests and
//! local runs; `postgres` backs deployments.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{
    account::SubscriptionState,
    category::{Category, Subcategory},
    checkout::{CheckoutSessionDoc, NewCheckoutSession},
    exercise::{Exercise, Question},
    group::{Group, WordList},
    product::Product,
};

/// Errors surfaced by store adapters.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid document: {0}")]
    Invariant(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound("row".to_string()),
            other => StoreError::Connection(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Vocabulary content: categories, subcategories, groups and exercises.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn list_categories(&self) -> Result<Vec<Category>, StoreError>;
    async fn get_category(&self, id: &str) -> Result<Option<Category>, StoreError>;
    async fn create_category(&self, name: &str, product: Option<&str>) -> Result<Category, StoreError>;
    async fn update_category(&self, id: &str, name: &str, product: Option<&str>) -> Result<Category, StoreError>;
    async fn delete_category(&self, id: &str) -> Result<(), StoreError>;

    async fn list_subcategories(&self, category_id: &str) -> Result<Vec<Subcategory>, StoreError>;
    async fn get_subcategory(&self, id: &str) -> Result<Option<Subcategory>, StoreError>;
    async fn create_subcategory(&self, category_id: &str, name: &str) -> Result<Subcategory, StoreError>;
    async fn delete_subcategory(&self, id: &str) -> Result<(), StoreError>;

    async fn list_groups(&self, subcategory_id: &str) -> Result<Vec<Group>, StoreError>;
    async fn get_group(&self, id: &str) -> Result<Option<Group>, StoreError>;
    async fn create_group(&self, subcategory_id: &str, number: i32, free: bool) -> Result<Group, StoreError>;
    async fn update_group(&self, id: &str, number: i32, free: bool) -> Result<Group, StoreError>;
    async fn set_words(&self, group_id: &str, words: &WordList) -> Result<(), StoreError>;
    async fn delete_group(&self, id: &str) -> Result<(), StoreError>;

    /// Exercises of a group, oldest first.
    async fn list_exercises(&self, group_id: &str) -> Result<Vec<Exercise>, StoreError>;
    async fn get_exercise(&self, id: &str) -> Result<Option<Exercise>, StoreError>;
    async fn create_exercise(&self, group_id: &str, questions: &[Question]) -> Result<Exercise, StoreError>;
    async fn update_exercise(&self, id: &str, questions: &[Question]) -> Result<Exercise, StoreError>;
    async fn delete_exercise(&self, id: &str) -> Result<(), StoreError>;
}

/// Product catalog maintained by the payment sync process.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Products with `active == true`, with their prices.
    async fn active_products(&self) -> Result<Vec<Product>, StoreError>;
}

/// Per-account subscription documents.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn subscription(&self, uid: &str) -> Result<SubscriptionState, StoreError>;
}

/// Source of successive snapshots of one document.
#[async_trait]
pub trait SnapshotSource<T: Send + 'static>: Send {
    /// The next snapshot. `None` once the source is closed.
    async fn next(&mut self) -> Option<Result<T, StoreError>>;
}

/// A live watch on a single document.
///
/// The first snapshot is the state at attach time, so a change made between
/// creating the document and attaching is still observed. Dropping the watch
/// unsubscribes.
pub struct DocumentWatch<T: Send + 'static> {
    source: Box<dyn SnapshotSource<T>>,
}

impl<T: Send + 'static> DocumentWatch<T> {
    pub fn new(source: impl SnapshotSource<T> + 'static) -> Self {
        Self {
            source: Box::new(source),
        }
    }

    pub async fn next(&mut self) -> Option<Result<T, StoreError>> {
        self.source.next().await
    }
}

impl<T: Send + 'static> std::fmt::Debug for DocumentWatch<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentWatch").finish_non_exhaustive()
    }
}

/// Checkout session records under an account.
#[async_trait]
pub trait CheckoutStore: Send + Sync {
    /// Writes a new session record and returns its id once acknowledged.
    async fn create_session(&self, uid: &str, session: &NewCheckoutSession) -> Result<String, StoreError>;

    /// Watches a session record for the payment extension's mutation.
    async fn watch_session(&self, uid: &str, id: &str) -> Result<DocumentWatch<CheckoutSessionDoc>, StoreError>;
}
