use chrono::Utc;
use rusqlite::{params, Connection, Result as SqlResult, Row};
use std::path::{Path, PathBuf};

use super::data::SpotRecord;
use crate::config::WriteMode;
use crate::error::{PipelineError, Result};
use crate::imaging::segment::Segmentation;
use crate::metadata::MetadataRecord;

/// Columns every `spots` table must carry, whoever created it
const REQUIRED_COLUMNS: [&str; 9] = [
    "source_file",
    "magnification",
    "z_slice",
    "channel",
    "label_id",
    "area",
    "mean_intensity",
    "centroid_x",
    "centroid_y",
];

const INSERT_SPOT: &str = "INSERT INTO spots (
        source_file, magnification, sample, z_slice, channel,
        label_id, area, mean_intensity, integrated_intensity,
        centroid_x, centroid_y,
        bbox_min_x, bbox_min_y, bbox_max_x, bbox_max_y,
        processed_at
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)";

const SELECT_SPOTS: &str = "SELECT source_file, magnification, COALESCE(sample, ''), z_slice, channel,
        label_id, area, mean_intensity, COALESCE(integrated_intensity, 0.0),
        centroid_x, centroid_y,
        COALESCE(bbox_min_x, 0), COALESCE(bbox_min_y, 0),
        COALESCE(bbox_max_x, 0), COALESCE(bbox_max_y, 0)
    FROM spots";

/// The SpotStore owns the SQLite connection for one batch.
/// Rows are only ever inserted; nothing is deduplicated or updated.
pub struct SpotStore {
    conn: Connection,
    db_path: PathBuf,
}

impl SpotStore {
    /// Open (or create) the database and make sure the `spots` table is usable.
    ///
    /// With `WriteMode::Replace` all existing spot rows are deleted right away,
    /// so the batch that follows starts from an empty table.
    pub fn open(db_path: &Path, mode: WriteMode) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| PipelineError::storage(db_path, e))?;
            }
        }

        let conn = Connection::open(db_path).map_err(|e| PipelineError::storage(db_path, e))?;

        let mut store = SpotStore {
            conn,
            db_path: db_path.to_path_buf(),
        };
        store
            .init_schema()
            .map_err(|e| PipelineError::storage(db_path, e))?;
        store.verify_schema()?;
        store
            .init_index()
            .map_err(|e| PipelineError::storage(db_path, e))?;

        if mode == WriteMode::Replace {
            let removed = store.clear()?;
            log::info!("🧹 Replace mode: removed {} existing spot rows", removed);
        }

        log::info!("📁 Spot store ready at: {}", db_path.display());
        Ok(store)
    }

    /// Create the table if it doesn't exist
    fn init_schema(&mut self) -> SqlResult<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS spots (
                id                    INTEGER PRIMARY KEY AUTOINCREMENT,
                source_file           TEXT NOT NULL,
                magnification         REAL,
                sample                TEXT,
                z_slice               INTEGER,
                channel               TEXT,
                label_id              INTEGER,
                area                  INTEGER,
                mean_intensity        REAL,
                integrated_intensity  REAL,
                centroid_x            REAL,
                centroid_y            REAL,
                bbox_min_x            INTEGER,
                bbox_min_y            INTEGER,
                bbox_max_x            INTEGER,
                bbox_max_y            INTEGER,
                processed_at          INTEGER
            )",
            [],
        )?;

        Ok(())
    }

    /// Lookup index for per-file queries; needs a verified schema
    fn init_index(&self) -> SqlResult<()> {
        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_spots_source_file
             ON spots(source_file)",
            [],
        )?;
        Ok(())
    }

    /// A pre-existing `spots` table from another tool may lack our columns
    fn verify_schema(&self) -> Result<()> {
        let columns = self
            .table_columns()
            .map_err(|e| PipelineError::storage(&self.db_path, e))?;

        let extended = [
            "sample",
            "integrated_intensity",
            "bbox_min_x",
            "bbox_min_y",
            "bbox_max_x",
            "bbox_max_y",
            "processed_at",
        ];
        let missing: Vec<&str> = REQUIRED_COLUMNS
            .iter()
            .chain(extended.iter())
            .copied()
            .filter(|required| !columns.iter().any(|c| c.as_str() == *required))
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::storage(
                &self.db_path,
                format!("schema mismatch: spots table lacks column(s) {}", missing.join(", ")),
            ))
        }
    }

    fn table_columns(&self) -> SqlResult<Vec<String>> {
        let mut stmt = self.conn.prepare("PRAGMA table_info(spots)")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(names)
    }

    /// Get the path to the database file
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Number of spot rows currently stored
    pub fn spot_count(&self) -> Result<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM spots", [], |row| row.get(0))
            .map_err(|e| PipelineError::storage(&self.db_path, e))
    }

    /// Delete every spot row. Returns how many rows were removed.
    pub fn clear(&self) -> Result<usize> {
        self.conn
            .execute("DELETE FROM spots", [])
            .map_err(|e| PipelineError::storage(&self.db_path, e))
    }

    /// Insert one row per region of a single image.
    ///
    /// All rows of the image go in one transaction, so a failure leaves
    /// no partial set behind. Returns the number of rows written.
    pub fn insert_spots(
        &mut self,
        source_file: &str,
        metadata: &MetadataRecord,
        segmentation: &Segmentation,
    ) -> Result<usize> {
        let records: Vec<SpotRecord> = segmentation
            .regions
            .iter()
            .map(|region| SpotRecord::new(source_file, metadata, region))
            .collect();

        self.insert_records(&records)
            .map_err(|e| PipelineError::storage(&self.db_path, e))?;

        Ok(records.len())
    }

    fn insert_records(&mut self, records: &[SpotRecord]) -> SqlResult<()> {
        let now = Utc::now().timestamp();
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(INSERT_SPOT)?;
            for r in records {
                stmt.execute(params![
                    r.source_file,
                    r.magnification,
                    r.sample,
                    r.z_slice,
                    r.channel,
                    r.label_id,
                    r.area,
                    r.mean_intensity,
                    r.integrated_intensity,
                    r.centroid_x,
                    r.centroid_y,
                    r.bbox.0,
                    r.bbox.1,
                    r.bbox.2,
                    r.bbox.3,
                    now,
                ])?;
            }
        }
        tx.commit()
    }

    /// All rows recorded for one source file, in insertion order
    pub fn spots_for(&self, source_file: &str) -> Result<Vec<SpotRecord>> {
        let sql = format!("{} WHERE source_file = ?1 ORDER BY id", SELECT_SPOTS);
        self.query_spots(&sql, params![source_file])
    }

    /// Every row in the store, in insertion order
    pub fn all_spots(&self) -> Result<Vec<SpotRecord>> {
        let sql = format!("{} ORDER BY id", SELECT_SPOTS);
        self.query_spots(&sql, params![])
    }

    fn query_spots(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<SpotRecord>> {
        let run = || -> SqlResult<Vec<SpotRecord>> {
            let mut stmt = self.conn.prepare(sql)?;
            let rows = stmt.query_map(args, spot_from_row)?;

            let mut spots = Vec::new();
            for spot in rows {
                spots.push(spot?);
            }
            Ok(spots)
        };
        run().map_err(|e| PipelineError::storage(&self.db_path, e))
    }

    /// Close the connection explicitly, surfacing any error SQLite reports.
    /// Dropping the store also closes it.
    pub fn close(self) -> Result<()> {
        let path = self.db_path;
        self.conn
            .close()
            .map_err(|(_, e)| PipelineError::storage(&path, e))
    }
}

fn spot_from_row(row: &Row<'_>) -> SqlResult<SpotRecord> {
    Ok(SpotRecord {
        source_file: row.get(0)?,
        magnification: row.get(1)?,
        sample: row.get(2)?,
        z_slice: row.get(3)?,
        channel: row.get(4)?,
        label_id: row.get(5)?,
        area: row.get(6)?,
        mean_intensity: row.get(7)?,
        integrated_intensity: row.get(8)?,
        centroid_x: row.get(9)?,
        centroid_y: row.get(10)?,
        bbox: (row.get(11)?, row.get(12)?, row.get(13)?, row.get(14)?),
    })
}

// Implement Debug for better error messages
impl std::fmt::Debug for SpotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpotStore")
            .field("db_path", &self.db_path)
            .finish()
    }
}
