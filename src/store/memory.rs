// src/store/memory.rs

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use std::time::Duration;

use async_trait::async_trait;
use tokio::{sync::watch, time::Instant};
use uuid::Uuid;

use super::{
    AccountStore, CatalogStore, CheckoutStore, ContentStore, DocumentWatch, SnapshotSource,
    StoreError,
};
use crate::models::{
    account::{AccountDocument, MainField, SubscriptionState},
    category::{Category, Subcategory},
    checkout::{CheckoutSessionDoc, NewCheckoutSession},
    exercise::{Exercise, Question},
    group::{Group, WordList},
    product::Product,
};

/// Unwatched checkout sessions older than this are dropped.
const SESSION_RETENTION: Duration = Duration::from_secs(60 * 60);

struct SessionSlot {
    uid: String,
    tx: watch::Sender<CheckoutSessionDoc>,
    created: Instant,
}

#[derive(Default)]
struct Inner {
    categories: Vec<Category>,
    subcategories: Vec<Subcategory>,
    groups: Vec<Group>,
    exercises: Vec<Exercise>,
    products: Vec<Product>,
    accounts: HashMap<String, AccountDocument>,
    sessions: HashMap<String, SessionSlot>,
}

/// Process-local store.
///
/// Checkout documents are held in `watch` channels so that watchers see the
/// latest value on attach. The `complete_session` / `fail_session` helpers
/// play the part of the payment extension.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
    offline: AtomicBool,
}

fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::Acquire) {
            return Err(StoreError::Connection("store unavailable".to_string()));
        }
        Ok(())
    }

    /// Makes every checkout write fail, as a dropped connection would.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Release);
    }

    /// Inserts or replaces a catalog product.
    pub fn put_product(&self, product: Product) {
        let mut inner = self.lock();
        inner.products.retain(|p| p.id != product.id);
        inner.products.push(product);
    }

    /// Inserts or replaces a subcategory row as stored, without checking its parent.
    pub fn put_subcategory(&self, subcategory: Subcategory) {
        let mut inner = self.lock();
        inner.subcategories.retain(|s| s.id != subcategory.id);
        inner.subcategories.push(subcategory);
    }

    /// Sets the account's `main` field as the subscription sync would.
    pub fn set_subscription(&self, uid: &str, product: Option<&str>) {
        self.set_main_field(uid, product.map(|p| MainField::One(p.to_string())));
    }

    pub fn set_main_field(&self, uid: &str, main: Option<MainField>) {
        self.lock()
            .accounts
            .insert(uid.to_string(), AccountDocument { main });
    }

    pub fn session(&self, id: &str) -> Option<CheckoutSessionDoc> {
        self.lock().sessions.get(id).map(|slot| slot.tx.borrow().clone())
    }

    /// Ids of the sessions created for `uid`.
    pub fn sessions_for(&self, uid: &str) -> Vec<String> {
        self.lock()
            .sessions
            .iter()
            .filter(|(_, slot)| slot.uid == uid)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Number of watches currently attached to a session document.
    pub fn live_watches(&self, id: &str) -> usize {
        self.lock()
            .sessions
            .get(id)
            .map(|slot| slot.tx.receiver_count())
            .unwrap_or(0)
    }

    fn mutate_session(
        &self,
        id: &str,
        f: impl FnOnce(&mut CheckoutSessionDoc),
    ) -> Result<(), StoreError> {
        let inner = self.lock();
        let slot = inner
            .sessions
            .get(id)
            .ok_or_else(|| StoreError::NotFound(format!("checkout session {id}")))?;
        slot.tx.send_modify(f);
        Ok(())
    }

    /// Writes `sessionId` on the document.
    pub fn complete_session(&self, id: &str, session_id: &str) -> Result<(), StoreError> {
        let session_id = session_id.to_string();
        self.mutate_session(id, move |doc| doc.session_id = Some(session_id))
    }

    /// Writes `error` on the document.
    pub fn fail_session(&self, id: &str, message: &str) -> Result<(), StoreError> {
        let message = message.to_string();
        self.mutate_session(id, move |doc| doc.error = Some(message))
    }

    /// Rewrites the document without changing its fields.
    pub fn touch_session(&self, id: &str) -> Result<(), StoreError> {
        self.mutate_session(id, |_| {})
    }
}

#[async_trait]
impl ContentStore for InMemoryStore {
    async fn list_categories(&self) -> Result<Vec<Category>, StoreError> {
        Ok(self.lock().categories.clone())
    }

    async fn get_category(&self, id: &str) -> Result<Option<Category>, StoreError> {
        Ok(self.lock().categories.iter().find(|c| c.id == id).cloned())
    }

    async fn create_category(&self, name: &str, product: Option<&str>) -> Result<Category, StoreError> {
        let category = Category {
            id: new_id(),
            name: name.to_string(),
            product: product.map(str::to_string),
        };
        self.lock().categories.push(category.clone());
        Ok(category)
    }

    async fn update_category(&self, id: &str, name: &str, product: Option<&str>) -> Result<Category, StoreError> {
        let mut inner = self.lock();
        let category = inner
            .categories
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("category {id}")))?;
        category.name = name.to_string();
        category.product = product.map(str::to_string);
        Ok(category.clone())
    }

    async fn delete_category(&self, id: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let before = inner.categories.len();
        inner.categories.retain(|c| c.id != id);
        if inner.categories.len() == before {
            return Err(StoreError::NotFound(format!("category {id}")));
        }
        let subs: Vec<String> = inner
            .subcategories
            .iter()
            .filter(|s| s.parent == id)
            .map(|s| s.id.clone())
            .collect();
        for sub in subs {
            remove_subcategory(&mut inner, &sub);
        }
        Ok(())
    }

    async fn list_subcategories(&self, category_id: &str) -> Result<Vec<Subcategory>, StoreError> {
        Ok(self
            .lock()
            .subcategories
            .iter()
            .filter(|s| s.parent == category_id)
            .cloned()
            .collect())
    }

    async fn get_subcategory(&self, id: &str) -> Result<Option<Subcategory>, StoreError> {
        Ok(self.lock().subcategories.iter().find(|s| s.id == id).cloned())
    }

    async fn create_subcategory(&self, category_id: &str, name: &str) -> Result<Subcategory, StoreError> {
        let mut inner = self.lock();
        if !inner.categories.iter().any(|c| c.id == category_id) {
            return Err(StoreError::NotFound(format!("category {category_id}")));
        }
        let sub = Subcategory {
            id: new_id(),
            parent: category_id.to_string(),
            name: name.to_string(),
        };
        inner.subcategories.push(sub.clone());
        Ok(sub)
    }

    async fn delete_subcategory(&self, id: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if !inner.subcategories.iter().any(|s| s.id == id) {
            return Err(StoreError::NotFound(format!("subcategory {id}")));
        }
        remove_subcategory(&mut inner, id);
        Ok(())
    }

    async fn list_groups(&self, subcategory_id: &str) -> Result<Vec<Group>, StoreError> {
        let mut groups: Vec<Group> = self
            .lock()
            .groups
            .iter()
            .filter(|g| g.subcategory_id == subcategory_id)
            .cloned()
            .collect();
        groups.sort_by_key(|g| g.number);
        Ok(groups)
    }

    async fn get_group(&self, id: &str) -> Result<Option<Group>, StoreError> {
        Ok(self.lock().groups.iter().find(|g| g.id == id).cloned())
    }

    async fn create_group(&self, subcategory_id: &str, number: i32, free: bool) -> Result<Group, StoreError> {
        let mut inner = self.lock();
        if !inner.subcategories.iter().any(|s| s.id == subcategory_id) {
            return Err(StoreError::NotFound(format!("subcategory {subcategory_id}")));
        }
        let group = Group {
            id: new_id(),
            subcategory_id: subcategory_id.to_string(),
            number,
            free,
            words: WordList::new(),
        };
        inner.groups.push(group.clone());
        Ok(group)
    }

    async fn update_group(&self, id: &str, number: i32, free: bool) -> Result<Group, StoreError> {
        let mut inner = self.lock();
        let group = inner
            .groups
            .iter_mut()
            .find(|g| g.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("group {id}")))?;
        group.number = number;
        group.free = free;
        Ok(group.clone())
    }

    async fn set_words(&self, group_id: &str, words: &WordList) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let group = inner
            .groups
            .iter_mut()
            .find(|g| g.id == group_id)
            .ok_or_else(|| StoreError::NotFound(format!("group {group_id}")))?;
        group.words = words.clone();
        Ok(())
    }

    async fn delete_group(&self, id: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let before = inner.groups.len();
        inner.groups.retain(|g| g.id != id);
        if inner.groups.len() == before {
            return Err(StoreError::NotFound(format!("group {id}")));
        }
        inner.exercises.retain(|e| e.group_id != id);
        Ok(())
    }

    async fn list_exercises(&self, group_id: &str) -> Result<Vec<Exercise>, StoreError> {
        let mut exercises: Vec<Exercise> = self
            .lock()
            .exercises
            .iter()
            .filter(|e| e.group_id == group_id)
            .cloned()
            .collect();
        exercises.sort_by_key(|e| e.created_at);
        Ok(exercises)
    }

    async fn get_exercise(&self, id: &str) -> Result<Option<Exercise>, StoreError> {
        Ok(self.lock().exercises.iter().find(|e| e.id == id).cloned())
    }

    async fn create_exercise(&self, group_id: &str, questions: &[Question]) -> Result<Exercise, StoreError> {
        let mut inner = self.lock();
        if !inner.groups.iter().any(|g| g.id == group_id) {
            return Err(StoreError::NotFound(format!("group {group_id}")));
        }
        let exercise = Exercise {
            id: new_id(),
            group_id: group_id.to_string(),
            questions: questions.to_vec(),
            created_at: chrono::Utc::now(),
        };
        inner.exercises.push(exercise.clone());
        Ok(exercise)
    }

    async fn update_exercise(&self, id: &str, questions: &[Question]) -> Result<Exercise, StoreError> {
        let mut inner = self.lock();
        let exercise = inner
            .exercises
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("exercise {id}")))?;
        exercise.questions = questions.to_vec();
        Ok(exercise.clone())
    }

    async fn delete_exercise(&self, id: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let before = inner.exercises.len();
        inner.exercises.retain(|e| e.id != id);
        if inner.exercises.len() == before {
            return Err(StoreError::NotFound(format!("exercise {id}")));
        }
        Ok(())
    }
}

fn remove_subcategory(inner: &mut Inner, id: &str) {
    inner.subcategories.retain(|s| s.id != id);
    let groups: Vec<String> = inner
        .groups
        .iter()
        .filter(|g| g.subcategory_id == id)
        .map(|g| g.id.clone())
        .collect();
    inner.groups.retain(|g| g.subcategory_id != id);
    inner.exercises.retain(|e| !groups.contains(&e.group_id));
}

#[async_trait]
impl CatalogStore for InMemoryStore {
    async fn active_products(&self) -> Result<Vec<Product>, StoreError> {
        Ok(self
            .lock()
            .products
            .iter()
            .filter(|p| p.active)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl AccountStore for InMemoryStore {
    async fn subscription(&self, uid: &str) -> Result<SubscriptionState, StoreError> {
        let inner = self.lock();
        let main = inner.accounts.get(uid).and_then(|doc| doc.main.as_ref());
        SubscriptionState::from_main_field(main).map_err(|e| StoreError::Invariant(e.to_string()))
    }
}

struct MemorySessionWatch {
    rx: watch::Receiver<CheckoutSessionDoc>,
    primed: bool,
}

#[async_trait]
impl SnapshotSource<CheckoutSessionDoc> for MemorySessionWatch {
    async fn next(&mut self) -> Option<Result<CheckoutSessionDoc, StoreError>> {
        if !self.primed {
            self.primed = true;
            return Some(Ok(self.rx.borrow_and_update().clone()));
        }
        match self.rx.changed().await {
            Ok(()) => Some(Ok(self.rx.borrow_and_update().clone())),
            Err(_) => None,
        }
    }
}

#[async_trait]
impl CheckoutStore for InMemoryStore {
    async fn create_session(&self, uid: &str, session: &NewCheckoutSession) -> Result<String, StoreError> {
        self.check_online()?;
        let id = new_id();
        let doc = CheckoutSessionDoc {
            id: id.clone(),
            uid: uid.to_string(),
            request: session.clone(),
            session_id: None,
            error: None,
        };
        let (tx, _) = watch::channel(doc);
        let now = Instant::now();
        let mut inner = self.lock();
        inner
            .sessions
            .retain(|_, slot| slot.tx.receiver_count() > 0 || now.duration_since(slot.created) < SESSION_RETENTION);
        inner.sessions.insert(
            id.clone(),
            SessionSlot {
                uid: uid.to_string(),
                tx,
                created: now,
            },
        );
        Ok(id)
    }

    async fn watch_session(&self, uid: &str, id: &str) -> Result<DocumentWatch<CheckoutSessionDoc>, StoreError> {
        self.check_online()?;
        let inner = self.lock();
        let slot = inner
            .sessions
            .get(id)
            .filter(|slot| slot.uid == uid)
            .ok_or_else(|| StoreError::NotFound(format!("checkout session {id}")))?;
        Ok(DocumentWatch::new(MemorySessionWatch {
            rx: slot.tx.subscribe(),
            primed: false,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> NewCheckoutSession {
        NewCheckoutSession::subscription("price_1", "a@example.com", "http://localhost/subscription")
    }

    #[tokio::test]
    async fn test_watch_sees_mutation_made_before_attach() {
        let store = InMemoryStore::new();
        let id = store.create_session("u1", &request()).await.unwrap();
        store.complete_session(&id, "cs_test_1").unwrap();

        let mut watch = store.watch_session("u1", &id).await.unwrap();
        let first = watch.next().await.unwrap().unwrap();
        assert_eq!(first.session_id.as_deref(), Some("cs_test_1"));
    }

    #[tokio::test]
    async fn test_dropping_watch_unsubscribes() {
        let store = InMemoryStore::new();
        let id = store.create_session("u1", &request()).await.unwrap();

        let watch = store.watch_session("u1", &id).await.unwrap();
        assert_eq!(store.live_watches(&id), 1);
        drop(watch);
        assert_eq!(store.live_watches(&id), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_old_unwatched_sessions_are_swept() {
        let store = InMemoryStore::new();
        let stale = store.create_session("u1", &request()).await.unwrap();
        let watched = store.create_session("u2", &request()).await.unwrap();
        let _watch = store.watch_session("u2", &watched).await.unwrap();

        tokio::time::advance(SESSION_RETENTION + Duration::from_secs(1)).await;
        let fresh = store.create_session("u3", &request()).await.unwrap();

        assert!(matches!(
            store.watch_session("u1", &stale).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(store.watch_session("u2", &watched).await.is_ok());
        assert!(store.watch_session("u3", &fresh).await.is_ok());
    }

    #[tokio::test]
    async fn test_watch_requires_owner() {
        let store = InMemoryStore::new();
        let id = store.create_session("u1", &request()).await.unwrap();
        assert!(matches!(
            store.watch_session("u2", &id).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_deleting_category_cascades() {
        let store = InMemoryStore::new();
        let cat = store.create_category("General", None).await.unwrap();
        let sub = store.create_subcategory(&cat.id, "Sublist 1").await.unwrap();
        let group = store.create_group(&sub.id, 1, true).await.unwrap();
        let ex = store.create_exercise(&group.id, &[]).await.unwrap();

        store.delete_category(&cat.id).await.unwrap();

        assert!(store.get_subcategory(&sub.id).await.unwrap().is_none());
        assert!(store.get_group(&group.id).await.unwrap().is_none());
        assert!(store.get_exercise(&ex.id).await.unwrap().is_none());
    }
}
