// SPDX-License-Identifier: MIT OR Apache-2.0

//! CSV ingest triggered by an object upload.
//!
//! An object stored as `<anything>/<table>/<file>.csv` is appended to the
//! warehouse table named by its parent folder.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::{ServiceError, ServiceResult};
use crate::services::Services;
use crate::warehouse::is_valid_identifier;

/// Object size as delivered by storage notifications, either a number or a decimal string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ObjectSize {
    Bytes(u64),
    Text(String),
}

impl Default for ObjectSize {
    fn default() -> Self {
        Self::Bytes(0)
    }
}

impl ObjectSize {
    pub fn bytes(&self) -> ServiceResult<u64> {
        match self {
            Self::Bytes(n) => Ok(*n),
            Self::Text(raw) => raw
                .trim()
                .parse()
                .map_err(|_| ServiceError::invalid(format!("Invalid object size '{}'", raw))),
        }
    }
}

/// Object-finalize notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageEvent {
    pub bucket: String,
    pub name: String,
    #[serde(default)]
    pub size: ObjectSize,
}

impl StorageEvent {
    /// Table named by the object's parent folder, if the path has one.
    pub fn table_name(&self) -> Option<&str> {
        let segments: Vec<&str> = self.name.split('/').collect();
        if segments.len() > 1 {
            Some(segments[segments.len() - 2])
        } else {
            None
        }
    }
}

/// What an upload event did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UploadOutcome {
    Loaded {
        table: String,
        rows_loaded: usize,
        bad_records: usize,
        total_rows: u64,
    },
    Skipped {
        reason: String,
    },
}

/// Loads the uploaded CSV object into the table named by its folder.
pub fn upload_csv(services: &mut Services, event: &StorageEvent) -> ServiceResult<UploadOutcome> {
    let size = event.size.bytes()?;
    let table = match event.table_name() {
        Some(table) if size > 0 => table.to_string(),
        _ => {
            info!("No table name present for {}/{}", event.bucket, event.name);
            return Ok(UploadOutcome::Skipped {
                reason: "No table name present".to_string(),
            });
        }
    };
    if !is_valid_identifier(&table) {
        return Err(ServiceError::invalid(format!(
            "Invalid table name '{}'",
            table
        )));
    }
    info!("Table id is {}", table);

    let data = services
        .drive
        .read_object(&event.bucket, &event.name)
        .map_err(ServiceError::unavailable)?
        .ok_or_else(|| {
            ServiceError::not_found(format!("Object {}/{} not found", event.bucket, event.name))
        })?;

    let options = services.settings.csv_options();
    let report = services
        .warehouse
        .load_csv(&table, &data, &options)
        .map_err(ServiceError::unavailable)?;
    let total_rows = services
        .warehouse
        .row_count(&table)
        .map_err(ServiceError::unavailable)?;
    info!("Total {} rows in table", total_rows);

    Ok(UploadOutcome::Loaded {
        table,
        rows_loaded: report.rows_loaded,
        bad_records: report.bad_records,
        total_rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::{temp_services, POSTINGS_CSV};
    use std::fs;

    fn event(name: &str, size: ObjectSize) -> StorageEvent {
        StorageEvent {
            bucket: "uploads".to_string(),
            name: name.to_string(),
            size,
        }
    }

    #[test]
    fn test_size_accepts_string_or_number() {
        let from_text: StorageEvent =
            serde_json::from_str(r#"{"bucket":"b","name":"t/a.csv","size":"42"}"#).unwrap();
        assert_eq!(from_text.size.bytes().unwrap(), 42);
        let from_number: StorageEvent =
            serde_json::from_str(r#"{"bucket":"b","name":"t/a.csv","size":42}"#).unwrap();
        assert_eq!(from_number.size.bytes().unwrap(), 42);
        assert!(ObjectSize::Text("lots".into()).bytes().is_err());
    }

    #[test]
    fn test_table_name_is_parent_folder() {
        assert_eq!(
            event("exports/job_posts/a.csv", ObjectSize::Bytes(1)).table_name(),
            Some("job_posts")
        );
        assert_eq!(event("a.csv", ObjectSize::Bytes(1)).table_name(), None);
    }

    #[test]
    fn test_skipped_without_folder_or_size() {
        let (_dir, mut services) = temp_services();
        let outcome = upload_csv(&mut services, &event("a.csv", ObjectSize::Bytes(10))).unwrap();
        assert_eq!(
            outcome,
            UploadOutcome::Skipped {
                reason: "No table name present".to_string()
            }
        );
        let outcome =
            upload_csv(&mut services, &event("job_posts/a.csv", ObjectSize::Bytes(0))).unwrap();
        assert!(matches!(outcome, UploadOutcome::Skipped { .. }));
    }

    #[test]
    fn test_loads_object_into_table() {
        let (dir, mut services) = temp_services();
        let object_dir = dir.path().join("drive/uploads/job_posts");
        fs::create_dir_all(&object_dir).unwrap();
        fs::write(object_dir.join("a.csv"), POSTINGS_CSV).unwrap();

        let ev = event("job_posts/a.csv", ObjectSize::Text("100".into()));
        let outcome = upload_csv(&mut services, &ev).unwrap();
        assert_eq!(
            outcome,
            UploadOutcome::Loaded {
                table: "job_posts".to_string(),
                rows_loaded: 3,
                bad_records: 0,
                total_rows: 3,
            }
        );

        // a second upload appends
        let outcome = upload_csv(&mut services, &ev).unwrap();
        assert!(matches!(outcome, UploadOutcome::Loaded { total_rows: 6, .. }));
    }

    #[test]
    fn test_missing_object_and_bad_table() {
        let (_dir, mut services) = temp_services();
        let err = upload_csv(&mut services, &event("job_posts/none.csv", ObjectSize::Bytes(5)))
            .unwrap_err();
        assert_eq!(err.status_code(), 404);

        let err = upload_csv(&mut services, &event("job-posts/a.csv", ObjectSize::Bytes(5)))
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
    }
}
