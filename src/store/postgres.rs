// src/store/postgres.rs

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use sqlx::{
    FromRow, PgPool,
    postgres::{PgListener, PgPoolOptions},
    types::Json,
};
use tokio::sync::watch;
use uuid::Uuid;

use super::{
    AccountStore, CatalogStore, CheckoutStore, ContentStore, DocumentWatch, SnapshotSource,
    StoreError,
};
use crate::models::{
    account::{AccountDocument, SubscriptionState},
    category::{Category, Subcategory},
    checkout::{CheckoutSessionDoc, NewCheckoutSession},
    exercise::{Exercise, Question},
    group::{Group, WordList},
    product::{Price, Product},
};

/// Channel the `checkout_sessions` trigger notifies on, with the row id as payload.
const CHECKOUT_CHANNEL: &str = "checkout_sessions";

/// Pause before rebuilding a listener whose reconnect failed.
const LISTENER_BACKOFF: Duration = Duration::from_secs(1);

/// Postgres-backed store.
///
/// All checkout watches share one `LISTEN` connection, opened on a pool of
/// its own so waiting checkouts never hold connections from `pool`.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    sessions: Arc<SessionHub>,
}

impl PgStore {
    /// Opens the checkout listener and starts relaying its notifications.
    pub async fn connect(pool: PgPool) -> Result<Self, StoreError> {
        let listener_pool = PgPoolOptions::new()
            .max_connections(1)
            .connect_lazy_with((*pool.connect_options()).clone());
        let listener = open_listener(&listener_pool).await?;

        let sessions = Arc::new(SessionHub::default());
        tokio::spawn(relay_notifications(listener, listener_pool, Arc::downgrade(&sessions)));

        Ok(Self { pool, sessions })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Number of open watches on a checkout session.
    pub fn live_watches(&self, id: &str) -> usize {
        self.sessions.live(id)
    }
}

fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn not_found(what: &str, id: &str) -> StoreError {
    StoreError::NotFound(format!("{what} {id}"))
}

#[derive(FromRow)]
struct GroupRow {
    id: String,
    subcategory_id: String,
    number: i32,
    free: bool,
    words: Json<WordList>,
}

impl From<GroupRow> for Group {
    fn from(row: GroupRow) -> Self {
        Group {
            id: row.id,
            subcategory_id: row.subcategory_id,
            number: row.number,
            free: row.free,
            words: row.words.0,
        }
    }
}

#[derive(FromRow)]
struct ExerciseRow {
    id: String,
    group_id: String,
    questions: Json<Vec<Question>>,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl From<ExerciseRow> for Exercise {
    fn from(row: ExerciseRow) -> Self {
        Exercise {
            id: row.id,
            group_id: row.group_id,
            questions: row.questions.0,
            created_at: row.created_at,
        }
    }
}

#[derive(FromRow)]
struct ProductRow {
    id: String,
    name: String,
    description: Option<String>,
    active: bool,
}

#[derive(FromRow)]
struct PriceRow {
    id: String,
    product_id: String,
    unit_amount: i64,
}

#[derive(FromRow)]
struct SessionRow {
    id: String,
    uid: String,
    price: String,
    customer_email: String,
    mode: String,
    success_url: String,
    cancel_url: String,
    session_id: Option<String>,
    error: Option<String>,
}

impl From<SessionRow> for CheckoutSessionDoc {
    fn from(row: SessionRow) -> Self {
        CheckoutSessionDoc {
            id: row.id,
            uid: row.uid,
            request: NewCheckoutSession {
                price: row.price,
                customer_email: row.customer_email,
                mode: row.mode,
                success_url: row.success_url,
                cancel_url: row.cancel_url,
            },
            session_id: row.session_id,
            error: row.error,
        }
    }
}

const GROUP_COLUMNS: &str = "id, subcategory_id, number, free, words";
const EXERCISE_COLUMNS: &str = "id, group_id, questions, created_at";

#[async_trait]
impl ContentStore for PgStore {
    async fn list_categories(&self) -> Result<Vec<Category>, StoreError> {
        let rows = sqlx::query_as::<_, (String, String, Option<String>)>(
            "SELECT id, name, product FROM categories ORDER BY created_at, name",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, name, product)| Category { id, name, product })
            .collect())
    }

    async fn get_category(&self, id: &str) -> Result<Option<Category>, StoreError> {
        let row = sqlx::query_as::<_, (String, String, Option<String>)>(
            "SELECT id, name, product FROM categories WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id, name, product)| Category { id, name, product }))
    }

    async fn create_category(&self, name: &str, product: Option<&str>) -> Result<Category, StoreError> {
        let id = new_id();
        sqlx::query("INSERT INTO categories (id, name, product) VALUES ($1, $2, $3)")
            .bind(&id)
            .bind(name)
            .bind(product)
            .execute(&self.pool)
            .await?;

        Ok(Category {
            id,
            name: name.to_string(),
            product: product.map(str::to_string),
        })
    }

    async fn update_category(&self, id: &str, name: &str, product: Option<&str>) -> Result<Category, StoreError> {
        let result = sqlx::query("UPDATE categories SET name = $1, product = $2 WHERE id = $3")
            .bind(name)
            .bind(product)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(not_found("category", id));
        }
        Ok(Category {
            id: id.to_string(),
            name: name.to_string(),
            product: product.map(str::to_string),
        })
    }

    async fn delete_category(&self, id: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM categories WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(not_found("category", id));
        }
        Ok(())
    }

    async fn list_subcategories(&self, category_id: &str) -> Result<Vec<Subcategory>, StoreError> {
        let rows = sqlx::query_as::<_, (String, String, String)>(
            "SELECT id, parent, name FROM subcategories WHERE parent = $1",
        )
        .bind(category_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, parent, name)| Subcategory { id, parent, name })
            .collect())
    }

    async fn get_subcategory(&self, id: &str) -> Result<Option<Subcategory>, StoreError> {
        let row = sqlx::query_as::<_, (String, String, String)>(
            "SELECT id, parent, name FROM subcategories WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id, parent, name)| Subcategory { id, parent, name }))
    }

    async fn create_subcategory(&self, category_id: &str, name: &str) -> Result<Subcategory, StoreError> {
        let id = new_id();
        sqlx::query("INSERT INTO subcategories (id, parent, name) VALUES ($1, $2, $3)")
            .bind(&id)
            .bind(category_id)
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                    not_found("category", category_id)
                }
                other => other.into(),
            })?;

        Ok(Subcategory {
            id,
            parent: category_id.to_string(),
            name: name.to_string(),
        })
    }

    async fn delete_subcategory(&self, id: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM subcategories WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(not_found("subcategory", id));
        }
        Ok(())
    }

    async fn list_groups(&self, subcategory_id: &str) -> Result<Vec<Group>, StoreError> {
        let rows: Vec<GroupRow> = sqlx::query_as(&format!(
            "SELECT {GROUP_COLUMNS} FROM word_groups WHERE subcategory_id = $1 ORDER BY number"
        ))
        .bind(subcategory_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Group::from).collect())
    }

    async fn get_group(&self, id: &str) -> Result<Option<Group>, StoreError> {
        let row: Option<GroupRow> =
            sqlx::query_as(&format!("SELECT {GROUP_COLUMNS} FROM word_groups WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(Group::from))
    }

    async fn create_group(&self, subcategory_id: &str, number: i32, free: bool) -> Result<Group, StoreError> {
        let id = new_id();
        sqlx::query("INSERT INTO word_groups (id, subcategory_id, number, free) VALUES ($1, $2, $3, $4)")
            .bind(&id)
            .bind(subcategory_id)
            .bind(number)
            .bind(free)
            .execute(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                    not_found("subcategory", subcategory_id)
                }
                other => other.into(),
            })?;

        Ok(Group {
            id,
            subcategory_id: subcategory_id.to_string(),
            number,
            free,
            words: WordList::new(),
        })
    }

    async fn update_group(&self, id: &str, number: i32, free: bool) -> Result<Group, StoreError> {
        let row: Option<GroupRow> = sqlx::query_as(&format!(
            "UPDATE word_groups SET number = $1, free = $2 WHERE id = $3 RETURNING {GROUP_COLUMNS}"
        ))
        .bind(number)
        .bind(free)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Group::from).ok_or_else(|| not_found("group", id))
    }

    async fn set_words(&self, group_id: &str, words: &WordList) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE word_groups SET words = $1 WHERE id = $2")
            .bind(Json(words))
            .bind(group_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(not_found("group", group_id));
        }
        Ok(())
    }

    async fn delete_group(&self, id: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM word_groups WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(not_found("group", id));
        }
        Ok(())
    }

    async fn list_exercises(&self, group_id: &str) -> Result<Vec<Exercise>, StoreError> {
        let rows: Vec<ExerciseRow> = sqlx::query_as(&format!(
            "SELECT {EXERCISE_COLUMNS} FROM exercises WHERE group_id = $1 ORDER BY created_at ASC"
        ))
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Exercise::from).collect())
    }

    async fn get_exercise(&self, id: &str) -> Result<Option<Exercise>, StoreError> {
        let row: Option<ExerciseRow> =
            sqlx::query_as(&format!("SELECT {EXERCISE_COLUMNS} FROM exercises WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(Exercise::from))
    }

    async fn create_exercise(&self, group_id: &str, questions: &[Question]) -> Result<Exercise, StoreError> {
        let row: ExerciseRow = sqlx::query_as(&format!(
            "INSERT INTO exercises (id, group_id, questions) VALUES ($1, $2, $3) RETURNING {EXERCISE_COLUMNS}"
        ))
        .bind(new_id())
        .bind(group_id)
        .bind(Json(questions))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => not_found("group", group_id),
            other => other.into(),
        })?;

        Ok(row.into())
    }

    async fn update_exercise(&self, id: &str, questions: &[Question]) -> Result<Exercise, StoreError> {
        let row: Option<ExerciseRow> = sqlx::query_as(&format!(
            "UPDATE exercises SET questions = $1 WHERE id = $2 RETURNING {EXERCISE_COLUMNS}"
        ))
        .bind(Json(questions))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Exercise::from).ok_or_else(|| not_found("exercise", id))
    }

    async fn delete_exercise(&self, id: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM exercises WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(not_found("exercise", id));
        }
        Ok(())
    }
}

#[async_trait]
impl CatalogStore for PgStore {
    async fn active_products(&self) -> Result<Vec<Product>, StoreError> {
        let products: Vec<ProductRow> = sqlx::query_as(
            "SELECT id, name, description, active FROM products WHERE active = TRUE ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;

        let ids: Vec<String> = products.iter().map(|p| p.id.clone()).collect();
        let prices: Vec<PriceRow> = sqlx::query_as(
            "SELECT id, product_id, unit_amount FROM prices WHERE active = TRUE AND product_id = ANY($1) ORDER BY id",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_product: HashMap<String, Vec<Price>> = HashMap::new();
        for row in prices {
            by_product.entry(row.product_id).or_default().push(Price {
                id: row.id,
                unit_amount: row.unit_amount,
            });
        }

        Ok(products
            .into_iter()
            .map(|p| Product {
                prices: by_product.remove(&p.id).unwrap_or_default(),
                id: p.id,
                name: p.name,
                description: p.description,
                active: p.active,
            })
            .collect())
    }
}

#[async_trait]
impl AccountStore for PgStore {
    async fn subscription(&self, uid: &str) -> Result<SubscriptionState, StoreError> {
        let row = sqlx::query_as::<_, (Json<AccountDocument>,)>("SELECT data FROM accounts WHERE uid = $1")
            .bind(uid)
            .fetch_optional(&self.pool)
            .await?;

        let doc = row.map(|(data,)| data.0).unwrap_or_default();
        SubscriptionState::from_main_field(doc.main.as_ref())
            .map_err(|e| StoreError::Invariant(e.to_string()))
    }
}

async fn fetch_session(pool: &PgPool, id: &str) -> Result<CheckoutSessionDoc, StoreError> {
    let row: SessionRow = sqlx::query_as(
        r#"
        SELECT id, uid, price, customer_email, mode, success_url, cancel_url, session_id, error
        FROM checkout_sessions
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| not_found("checkout session", id))?;

    Ok(row.into())
}

/// Wakes session watches when their row changes.
///
/// Each watched id maps to a counter bumped on every notification for it.
/// Watches only react to the bump and re-read the row, so bursts coalesce.
#[derive(Default)]
struct SessionHub {
    waiters: Mutex<HashMap<String, watch::Sender<u64>>>,
}

impl SessionHub {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, watch::Sender<u64>>> {
        self.waiters.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn subscribe(&self, id: &str) -> watch::Receiver<u64> {
        self.lock()
            .entry(id.to_string())
            .or_insert_with(|| watch::channel(0).0)
            .subscribe()
    }

    fn notify(&self, id: &str) {
        if let Some(tx) = self.lock().get(id) {
            tx.send_modify(|n| *n = n.wrapping_add(1));
        }
    }

    /// Wakes every watch. Used after a reconnect, when notifications may have been lost.
    fn notify_all(&self) {
        for tx in self.lock().values() {
            tx.send_modify(|n| *n = n.wrapping_add(1));
        }
    }

    fn release(&self, id: &str) {
        let mut waiters = self.lock();
        if waiters.get(id).is_some_and(|tx| tx.receiver_count() == 0) {
            waiters.remove(id);
        }
    }

    fn live(&self, id: &str) -> usize {
        self.lock().get(id).map(|tx| tx.receiver_count()).unwrap_or(0)
    }
}

async fn open_listener(pool: &PgPool) -> Result<PgListener, StoreError> {
    let mut listener = PgListener::connect_with(pool).await?;
    listener.listen(CHECKOUT_CHANNEL).await?;
    Ok(listener)
}

/// Forwards notifications to the hub until the store is dropped.
async fn relay_notifications(mut listener: PgListener, listener_pool: PgPool, hub: Weak<SessionHub>) {
    loop {
        let event = listener.try_recv().await;
        let Some(sessions) = hub.upgrade() else {
            break;
        };
        match event {
            Ok(Some(notification)) => sessions.notify(notification.payload()),
            Ok(None) => {
                // Reconnected and listening again; anything sent in the gap is gone.
                tracing::warn!("checkout listener reconnected, re-reading watched sessions");
                sessions.notify_all();
            }
            Err(e) => {
                drop(sessions);
                tracing::warn!("checkout listener failed: {}", e);
                tokio::time::sleep(LISTENER_BACKOFF).await;
                match open_listener(&listener_pool).await {
                    Ok(fresh) => {
                        listener = fresh;
                        if let Some(sessions) = hub.upgrade() {
                            sessions.notify_all();
                        }
                    }
                    Err(e) => tracing::warn!("checkout listener reconnect failed: {}", e),
                }
            }
        }
    }
    tracing::debug!("checkout listener stopped");
}

/// Follows one checkout row. Every wake-up from the hub re-reads the row.
struct PgSessionWatch {
    wake: Option<watch::Receiver<u64>>,
    sessions: Arc<SessionHub>,
    pool: PgPool,
    id: String,
    primed: bool,
}

#[async_trait]
impl SnapshotSource<CheckoutSessionDoc> for PgSessionWatch {
    async fn next(&mut self) -> Option<Result<CheckoutSessionDoc, StoreError>> {
        let wake = self.wake.as_mut()?;
        if !self.primed {
            self.primed = true;
            wake.borrow_and_update();
            return Some(fetch_session(&self.pool, &self.id).await);
        }
        match wake.changed().await {
            Ok(()) => {
                wake.borrow_and_update();
                Some(fetch_session(&self.pool, &self.id).await)
            }
            Err(_) => None,
        }
    }
}

impl Drop for PgSessionWatch {
    fn drop(&mut self) {
        self.wake.take();
        self.sessions.release(&self.id);
    }
}

#[async_trait]
impl CheckoutStore for PgStore {
    async fn create_session(&self, uid: &str, session: &NewCheckoutSession) -> Result<String, StoreError> {
        let id = new_id();
        sqlx::query(
            r#"
            INSERT INTO checkout_sessions (id, uid, price, customer_email, mode, success_url, cancel_url)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&id)
        .bind(uid)
        .bind(&session.price)
        .bind(&session.customer_email)
        .bind(&session.mode)
        .bind(&session.success_url)
        .bind(&session.cancel_url)
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    async fn watch_session(&self, uid: &str, id: &str) -> Result<DocumentWatch<CheckoutSessionDoc>, StoreError> {
        // Subscribe before the first read so no notification can fall in between.
        let watch = PgSessionWatch {
            wake: Some(self.sessions.subscribe(id)),
            sessions: Arc::clone(&self.sessions),
            pool: self.pool.clone(),
            id: id.to_string(),
            primed: false,
        };

        let owner = sqlx::query_as::<_, (String,)>("SELECT uid FROM checkout_sessions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match owner {
            Some((owner,)) if owner == uid => Ok(DocumentWatch::new(watch)),
            _ => Err(not_found("checkout session", id)),
        }
    }
}
