//! [`RemoteStore`] backed by PostgreSQL.

use crate::config::Config;
use crate::db::{self, Pool, StoredEntity};
use crate::error::{Result, StoreError};
use async_trait::async_trait;
use futures::{stream, StreamExt};
use shelf_core::{Entity, EntityStream, Key, KeyId, RemoteError, RemoteQuery, RemoteStore};
use std::sync::Arc;
use tokio::sync::{mpsc, OnceCell};

/// Rows buffered ahead of a slow query consumer.
const QUERY_PREFETCH: usize = 64;

static SHARED: OnceCell<Arc<PgRemoteStore>> = OnceCell::const_new();

/// Return the process-wide store, creating its pool on first use.
///
/// Concurrent first callers wait for a single initialization. Later
/// calls ignore `config` and return the same handle.
pub async fn ensure_initialized(config: &Config) -> Result<Arc<PgRemoteStore>> {
    SHARED
        .get_or_try_init(|| async {
            let pool = db::create_pool(config).await?;
            tracing::info!(
                max_connections = config.max_connections,
                "Connected to PostgreSQL"
            );
            Ok::<_, StoreError>(Arc::new(PgRemoteStore::new(pool)))
        })
        .await
        .map(Arc::clone)
}

#[derive(Debug, Clone, Copy)]
enum Write {
    Insert,
    Update,
    Upsert,
}

/// Entities of every kind in a single `entities` table.
#[derive(Debug, Clone)]
pub struct PgRemoteStore {
    pool: Pool,
}

impl PgRemoteStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Apply pending schema migrations.
    pub async fn migrate(&self) -> Result<()> {
        db::run_migrations(&self.pool).await?;
        Ok(())
    }

    async fn write(&self, mode: Write, entities: Vec<Entity>) -> Result<Vec<Key>> {
        let mut tx = self.pool.begin().await?;
        let mut keys = Vec::with_capacity(entities.len());

        let explicit = entities
            .iter()
            .filter_map(|e| match e.key.id {
                Some(KeyId::Id(id)) => Some(id),
                _ => None,
            })
            .max();
        if let Some(id) = explicit {
            db::reserve_id(&mut tx, id).await?;
        }

        for entity in entities {
            let key = db::complete_key(&mut tx, entity.key).await?;
            let Some(id) = &key.id else {
                return Err(StoreError::MalformedKey(key.to_string()));
            };
            let key_name = db::encode_key_name(id);

            match mode {
                Write::Insert => {
                    db::insert_entity(&mut tx, &key.kind, &key_name, &entity.data).await?
                }
                Write::Update => {
                    if !db::update_entity(&mut tx, &key.kind, &key_name, &entity.data).await? {
                        return Err(StoreError::NotFound(key.to_string()));
                    }
                }
                Write::Upsert => {
                    db::upsert_entity(&mut tx, &key.kind, &key_name, &entity.data).await?
                }
            }
            keys.push(key);
        }

        tx.commit().await?;
        tracing::debug!(?mode, count = keys.len(), "Committed entity batch");
        Ok(keys)
    }

    async fn delete_keys(&self, keys: Vec<Key>) -> Result<()> {
        let mut by_kind: Vec<(String, Vec<String>)> = Vec::new();
        for key in keys {
            let Some(id) = &key.id else { continue };
            let key_name = db::encode_key_name(id);
            match by_kind.iter_mut().find(|(kind, _)| *kind == key.kind) {
                Some((_, names)) => names.push(key_name),
                None => by_kind.push((key.kind, vec![key_name])),
            }
        }

        let mut tx = self.pool.begin().await?;
        let mut removed = 0;
        for (kind, names) in &by_kind {
            removed += db::delete_entities(&mut tx, kind, names).await?;
        }
        tx.commit().await?;

        tracing::debug!(removed, "Deleted entities");
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for PgRemoteStore {
    async fn run_query(&self, query: RemoteQuery) -> std::result::Result<EntityStream, RemoteError> {
        let (tx, rx) = mpsc::channel(QUERY_PREFETCH);
        let pool = self.pool.clone();

        tokio::spawn(async move {
            let mut builder = db::select_query(&query);
            let mut rows = builder.build_query_as::<StoredEntity>().fetch(&pool);

            while let Some(row) = rows.next().await {
                let item = row
                    .map_err(StoreError::from)
                    .and_then(StoredEntity::into_entity)
                    .map_err(RemoteError::from);
                let failed = item.is_err();
                // A closed channel means the consumer dropped the stream.
                if tx.send(item).await.is_err() || failed {
                    break;
                }
            }
        });

        Ok(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed())
    }

    async fn insert(&self, entities: Vec<Entity>) -> std::result::Result<Vec<Key>, RemoteError> {
        Ok(self.write(Write::Insert, entities).await?)
    }

    async fn update(&self, entities: Vec<Entity>) -> std::result::Result<Vec<Key>, RemoteError> {
        Ok(self.write(Write::Update, entities).await?)
    }

    async fn upsert(&self, entities: Vec<Entity>) -> std::result::Result<Vec<Key>, RemoteError> {
        Ok(self.write(Write::Upsert, entities).await?)
    }

    async fn delete(&self, keys: Vec<Key>) -> std::result::Result<(), RemoteError> {
        Ok(self.delete_keys(keys).await?)
    }
}
