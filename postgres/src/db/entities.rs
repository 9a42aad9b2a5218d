//! Database operations for the entities table.

use crate::error::StoreError;
use shelf_core::{Entity, Fields, Key, KeyId};
use sqlx::types::Json;
use sqlx::{PgConnection, Row};

/// A stored entity row from the database.
#[derive(Debug)]
pub struct StoredEntity {
    pub kind: String,
    pub key_name: String,
    pub data: Fields,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredEntity {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        let Json(data) = row.try_get::<Json<Fields>, _>("data")?;
        Ok(StoredEntity {
            kind: row.try_get("kind")?,
            key_name: row.try_get("key_name")?,
            data,
        })
    }
}

impl StoredEntity {
    /// Convert the database row to a core entity.
    pub fn into_entity(self) -> Result<Entity, StoreError> {
        let id = decode_key_name(&self.key_name)?;
        Ok(Entity::new(
            Key {
                kind: self.kind,
                id: Some(id),
            },
            self.data,
        ))
    }
}

/// Encode a key id into its `key_name` column form.
///
/// Numeric ids become `id:<n>` and names become `name:<s>`, so the two
/// spaces never collide.
pub fn encode_key_name(id: &KeyId) -> String {
    match id {
        KeyId::Id(id) => format!("id:{}", id),
        KeyId::Name(name) => format!("name:{}", name),
    }
}

/// Decode a `key_name` column value.
pub fn decode_key_name(key_name: &str) -> Result<KeyId, StoreError> {
    match key_name.split_once(':') {
        Some(("id", id)) => id
            .parse()
            .map(KeyId::Id)
            .map_err(|_| StoreError::MalformedKey(key_name.to_string())),
        Some(("name", name)) => Ok(KeyId::Name(name.to_string())),
        _ => Err(StoreError::MalformedKey(key_name.to_string())),
    }
}

/// Complete `key` in place, allocating an id from the sequence if needed.
pub async fn complete_key(conn: &mut PgConnection, mut key: Key) -> Result<Key, sqlx::Error> {
    if key.id.is_none() {
        let (id,): (i64,) = sqlx::query_as("SELECT nextval('entity_ids')")
            .fetch_one(&mut *conn)
            .await?;
        key.id = Some(KeyId::Id(id));
    }
    Ok(key)
}

/// Move the id sequence past `id` so later allocations cannot reuse it.
pub async fn reserve_id(conn: &mut PgConnection, id: i64) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        SELECT setval('entity_ids', GREATEST($1, (SELECT last_value FROM entity_ids)))
        "#,
    )
    .bind(id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Insert an entity; fails on an existing key.
pub async fn insert_entity(
    conn: &mut PgConnection,
    kind: &str,
    key_name: &str,
    data: &Fields,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO entities (kind, key_name, data)
        VALUES ($1, $2, $3)
        "#,
    )
    .bind(kind)
    .bind(key_name)
    .bind(Json(data))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Replace the data of an existing entity. Returns false if it is missing.
pub async fn update_entity(
    conn: &mut PgConnection,
    kind: &str,
    key_name: &str,
    data: &Fields,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE entities
        SET data = $3, updated_at = now()
        WHERE kind = $1 AND key_name = $2
        "#,
    )
    .bind(kind)
    .bind(key_name)
    .bind(Json(data))
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Upsert an entity (insert or replace).
pub async fn upsert_entity(
    conn: &mut PgConnection,
    kind: &str,
    key_name: &str,
    data: &Fields,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO entities (kind, key_name, data)
        VALUES ($1, $2, $3)
        ON CONFLICT (kind, key_name) DO UPDATE SET
            data = EXCLUDED.data,
            updated_at = now()
        "#,
    )
    .bind(kind)
    .bind(key_name)
    .bind(Json(data))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Delete every listed key name of `kind`. Missing keys are ignored.
pub async fn delete_entities(
    conn: &mut PgConnection,
    kind: &str,
    key_names: &[String],
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        DELETE FROM entities
        WHERE kind = $1 AND key_name = ANY($2)
        "#,
    )
    .bind(kind)
    .bind(key_names)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}
