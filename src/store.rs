//! Persistence of analysed images and their observations.
//!
//! Records serialise to the export document format: PascalCase keys with the
//! encoded image under `Base64`.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::category::{Category, CategoryId, CategoryManager, Observation};
use crate::error::PipelineError;
use crate::geometry::Rect;

#[cfg(all(feature = "sqlite", not(target_arch = "wasm32")))]
pub use sqlite::SqliteStore;

// ============================================================================
// Records
// ============================================================================

/// One stored detection, flattened together with its category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ObservationRecord {
    pub id: Option<i64>,
    pub confidence: f64,
    pub category_id: CategoryId,
    pub category_label: String,
    pub bound_box_left: f32,
    pub bound_box_right: f32,
    pub bound_box_top: f32,
    pub bound_box_bottom: f32,
    /// Milliseconds since the Unix epoch.
    #[serde(rename = "UploadDate")]
    pub upload_time: i64,
}

impl ObservationRecord {
    #[must_use]
    pub fn from_observation(observation: &Observation, category: &Category) -> Self {
        let bbox = observation.bbox();
        Self {
            id: None,
            confidence: observation.confidence(),
            category_id: category.id(),
            category_label: category.label().to_owned(),
            bound_box_left: bbox.left,
            bound_box_right: bbox.right,
            bound_box_top: bbox.top,
            bound_box_bottom: bbox.bottom,
            upload_time: now_millis(),
        }
    }

    #[must_use]
    pub fn bbox(&self) -> Rect {
        Rect::new(
            self.bound_box_left,
            self.bound_box_top,
            self.bound_box_right,
            self.bound_box_bottom,
        )
    }
}

/// An image with its final observations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ImageRecord {
    /// Assigned by the store on first insert.
    pub id: Option<i64>,
    pub name: String,
    /// Milliseconds since the Unix epoch.
    pub creation_time: Option<i64>,
    #[serde(rename = "Base64", with = "base64_bytes")]
    pub image: Vec<u8>,
    pub observations: Vec<ObservationRecord>,
}

impl ImageRecord {
    #[must_use]
    pub fn new(name: impl Into<String>, creation_time: Option<i64>, image: Vec<u8>) -> Self {
        Self {
            id: None,
            name: name.into(),
            creation_time,
            image,
            observations: Vec::new(),
        }
    }

    /// Replaces the stored observations with every member of `manager`.
    #[must_use]
    pub fn with_observations(mut self, manager: &CategoryManager) -> Self {
        self.observations = manager
            .categories()
            .flat_map(|category| {
                manager
                    .observations_of(category.id())
                    .map(move |obs| ObservationRecord::from_observation(obs, category))
            })
            .collect();
        self
    }

    /// Rebuilds a registry from the stored observations.
    #[must_use]
    pub fn category_manager(&self) -> CategoryManager {
        let mut manager = CategoryManager::new();
        for record in &self.observations {
            manager.observe_labeled(
                record.category_id,
                &record.category_label,
                record.confidence,
                record.bbox(),
            );
        }
        manager
    }

    /// Renders the indented export document.
    ///
    /// # Errors
    ///
    /// `Storage` if serialisation fails.
    pub fn to_json(&self) -> Result<String, PipelineError> {
        serde_json::to_string_pretty(self).map_err(|e| PipelineError::Storage(e.to_string()))
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Store
// ============================================================================

#[async_trait::async_trait]
pub trait ObservationStore: Send + Sync {
    /// Inserts `record`, or replaces the image with the same id together with
    /// all of its observations. Returns the image id.
    async fn insert_or_update(&self, record: &ImageRecord) -> Result<i64, PipelineError>;
    async fn get_image(&self, id: i64) -> Result<Option<ImageRecord>, PipelineError>;
    /// All images, oldest first; images without a creation time come last.
    async fn all_images(&self) -> Result<Vec<ImageRecord>, PipelineError>;
    /// Deletes an image and its observations. Returns whether it existed.
    async fn delete_image(&self, id: i64) -> Result<bool, PipelineError>;
    /// Removes every table and all stored data.
    async fn drop_tables(&self) -> Result<(), PipelineError>;
}

#[cfg(all(feature = "sqlite", not(target_arch = "wasm32")))]
mod sqlite {
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    use rusqlite::{params, Connection, OptionalExtension, Row};
    use tracing::{debug, instrument};

    use super::{ImageRecord, ObservationRecord, ObservationStore};
    use crate::error::PipelineError;

    const SCHEMA: &str = r"
        PRAGMA foreign_keys = ON;

        CREATE TABLE IF NOT EXISTS images (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            creation_time INTEGER,
            data BLOB NOT NULL
        );

        CREATE TABLE IF NOT EXISTS observations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            image_id INTEGER NOT NULL REFERENCES images(id) ON DELETE CASCADE,
            confidence REAL NOT NULL,
            category_id INTEGER NOT NULL,
            category_label TEXT NOT NULL,
            bbox_left REAL NOT NULL,
            bbox_right REAL NOT NULL,
            bbox_top REAL NOT NULL,
            bbox_bottom REAL NOT NULL,
            upload_time INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_observations_image ON observations(image_id);
    ";

    /// SQLite-backed store. Queries run on the blocking pool.
    #[derive(Clone)]
    pub struct SqliteStore {
        conn: Arc<Mutex<Connection>>,
    }

    impl std::fmt::Debug for SqliteStore {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("SqliteStore").finish_non_exhaustive()
        }
    }

    impl SqliteStore {
        /// Opens (or creates) the database at `path`.
        ///
        /// # Errors
        ///
        /// `Storage` if the file cannot be opened or the schema not created.
        pub fn new(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
            Self::with_connection(Connection::open(path)?)
        }

        /// # Errors
        ///
        /// `Storage` if the schema cannot be created.
        pub fn new_in_memory() -> Result<Self, PipelineError> {
            Self::with_connection(Connection::open_in_memory()?)
        }

        fn with_connection(conn: Connection) -> Result<Self, PipelineError> {
            conn.execute_batch(SCHEMA)?;
            Ok(Self {
                conn: Arc::new(Mutex::new(conn)),
            })
        }

        async fn run<T, F>(&self, f: F) -> Result<T, PipelineError>
        where
            T: Send + 'static,
            F: FnOnce(&mut Connection) -> Result<T, PipelineError> + Send + 'static,
        {
            let conn = Arc::clone(&self.conn);
            tokio::task::spawn_blocking(move || {
                let mut guard = conn
                    .lock()
                    .map_err(|_| PipelineError::Storage("connection lock poisoned".into()))?;
                f(&mut guard)
            })
            .await
            .map_err(|e| PipelineError::Worker(e.to_string()))?
        }
    }

    fn image_from_row(row: &Row<'_>) -> rusqlite::Result<ImageRecord> {
        Ok(ImageRecord {
            id: Some(row.get(0)?),
            name: row.get(1)?,
            creation_time: row.get(2)?,
            image: row.get(3)?,
            observations: Vec::new(),
        })
    }

    fn load_observations(
        conn: &Connection,
        image_id: i64,
    ) -> Result<Vec<ObservationRecord>, PipelineError> {
        let mut stmt = conn.prepare_cached(
            "SELECT id, confidence, category_id, category_label,
                    bbox_left, bbox_right, bbox_top, bbox_bottom, upload_time
             FROM observations WHERE image_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map([image_id], |row| {
            Ok(ObservationRecord {
                id: Some(row.get(0)?),
                confidence: row.get(1)?,
                category_id: row.get(2)?,
                category_label: row.get(3)?,
                bound_box_left: row.get(4)?,
                bound_box_right: row.get(5)?,
                bound_box_top: row.get(6)?,
                bound_box_bottom: row.get(7)?,
                upload_time: row.get(8)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    #[async_trait::async_trait]
    impl ObservationStore for SqliteStore {
        #[instrument(skip(self, record), fields(name = %record.name, observations = record.observations.len()))]
        async fn insert_or_update(&self, record: &ImageRecord) -> Result<i64, PipelineError> {
            let record = record.clone();
            self.run(move |conn| {
                let tx = conn.transaction()?;
                let id = match record.id {
                    Some(id) => {
                        tx.execute(
                            "INSERT INTO images (id, name, creation_time, data)
                             VALUES (?1, ?2, ?3, ?4)
                             ON CONFLICT(id) DO UPDATE SET
                                name = excluded.name,
                                creation_time = excluded.creation_time,
                                data = excluded.data",
                            params![id, record.name, record.creation_time, record.image],
                        )?;
                        tx.execute("DELETE FROM observations WHERE image_id = ?1", [id])?;
                        id
                    }
                    None => {
                        tx.execute(
                            "INSERT INTO images (name, creation_time, data) VALUES (?1, ?2, ?3)",
                            params![record.name, record.creation_time, record.image],
                        )?;
                        tx.last_insert_rowid()
                    }
                };
                {
                    let mut stmt = tx.prepare_cached(
                        "INSERT INTO observations (image_id, confidence, category_id,
                            category_label, bbox_left, bbox_right, bbox_top, bbox_bottom,
                            upload_time)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    )?;
                    for obs in &record.observations {
                        stmt.execute(params![
                            id,
                            obs.confidence,
                            obs.category_id,
                            obs.category_label,
                            obs.bound_box_left,
                            obs.bound_box_right,
                            obs.bound_box_top,
                            obs.bound_box_bottom,
                            obs.upload_time,
                        ])?;
                    }
                }
                tx.commit()?;
                debug!(id, "Image stored");
                Ok(id)
            })
            .await
        }

        async fn get_image(&self, id: i64) -> Result<Option<ImageRecord>, PipelineError> {
            self.run(move |conn| {
                let image = conn
                    .query_row(
                        "SELECT id, name, creation_time, data FROM images WHERE id = ?1",
                        [id],
                        image_from_row,
                    )
                    .optional()?;
                match image {
                    Some(mut image) => {
                        image.observations = load_observations(conn, id)?;
                        Ok(Some(image))
                    }
                    None => Ok(None),
                }
            })
            .await
        }

        async fn all_images(&self) -> Result<Vec<ImageRecord>, PipelineError> {
            self.run(|conn| {
                let mut images = {
                    let mut stmt = conn.prepare(
                        "SELECT id, name, creation_time, data FROM images
                         ORDER BY creation_time IS NULL, creation_time, id",
                    )?;
                    let rows = stmt.query_map([], image_from_row)?;
                    rows.collect::<rusqlite::Result<Vec<_>>>()?
                };
                for image in &mut images {
                    if let Some(id) = image.id {
                        image.observations = load_observations(conn, id)?;
                    }
                }
                Ok(images)
            })
            .await
        }

        #[instrument(skip(self))]
        async fn delete_image(&self, id: i64) -> Result<bool, PipelineError> {
            self.run(move |conn| {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM observations WHERE image_id = ?1", [id])?;
                let removed = tx.execute("DELETE FROM images WHERE id = ?1", [id])?;
                tx.commit()?;
                Ok(removed > 0)
            })
            .await
        }

        /// Drops both tables and recreates the empty schema.
        async fn drop_tables(&self) -> Result<(), PipelineError> {
            self.run(|conn| {
                conn.execute_batch(
                    "DROP TABLE IF EXISTS observations;
                     DROP TABLE IF EXISTS images;",
                )?;
                conn.execute_batch(SCHEMA)?;
                debug!("Tables dropped");
                Ok(())
            })
            .await
        }
    }
}
