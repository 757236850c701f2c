// External crates
use anyhow::{bail, Context, Result};
use log::{info, warn};
use polars::prelude::*;
use std::fs::{self, File};
use std::path::Path;
use tempfile::NamedTempFile;

// Internal modules
use crate::constants::{
    FEATURE_COLUMNS, MAX_SPEED_COLUMN, MOUSE_DOWN_COLUMN, SESSION_COLUMN, TIMESTAMP_COLUMN,
};

/// One recorded event of an interaction session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
    pub session_uid: String,
    pub timestamp: f64,
    pub dot_x: f64,
    pub dot_y: f64,
    pub mouse_x: f64,
    pub mouse_y: f64,
    pub mouse_down: bool,
    pub max_speed: f64,
}

impl SessionEvent {
    /// Model features in column order: dotX, dotY, mouseX, mouseY
    pub fn features(&self) -> [f64; 4] {
        [self.dot_x, self.dot_y, self.mouse_x, self.mouse_y]
    }
}

/// Read a session log into a DataFrame
///
/// The format is picked from the extension: `.parquet` or `.csv`.
///
/// # Arguments
///
/// * `file_path` - Path to the dataset file
///
/// # Returns
///
/// Returns the raw DataFrame, or an error if the file is missing or unreadable
pub fn read_session_dataframe<P: AsRef<Path>>(file_path: P) -> Result<DataFrame> {
    let path = file_path.as_ref();
    if !path.exists() {
        bail!("Data file not found: {}", path.display());
    }

    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();

    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let df = match extension.as_str() {
        "parquet" => ParquetReader::new(file)
            .finish()
            .with_context(|| format!("Failed to read parquet file {}", path.display()))?,
        "csv" => CsvReader::new(file)
            .finish()
            .with_context(|| format!("Failed to read CSV file {}", path.display()))?,
        other => bail!(
            "Unsupported dataset format '{}' for {} (expected .parquet or .csv)",
            other,
            path.display()
        ),
    };

    info!("Loaded {} records from {}", df.height(), path.display());
    info!("Columns: {:?}", df.get_column_names());
    Ok(df)
}

/// Extract a numeric column as `Option<f64>` values, accepting integer, boolean
/// and temporal physical types
fn numeric_column(df: &DataFrame, name: &str) -> Result<Vec<Option<f64>>> {
    let column = df
        .column(name)
        .with_context(|| format!("Required column '{}' not found", name))?;
    let column = if column.dtype().is_temporal() {
        column.to_physical_repr()
    } else {
        column.clone()
    };
    let column = column
        .cast(&DataType::Float64)
        .with_context(|| format!("Column '{}' is not numeric", name))?;
    Ok(column.f64()?.into_iter().collect())
}

/// Convert a session DataFrame into typed events
///
/// Rows with a null in any required column are skipped with a warning. The
/// optional `mouseDown` column defaults to `false` when absent.
pub fn dataframe_to_events(df: &DataFrame) -> Result<Vec<SessionEvent>> {
    let sessions = df
        .column(SESSION_COLUMN)
        .with_context(|| format!("Required column '{}' not found", SESSION_COLUMN))?
        .cast(&DataType::String)?;
    let sessions = sessions.str()?;

    let timestamps = numeric_column(df, TIMESTAMP_COLUMN)?;
    let dot_x = numeric_column(df, FEATURE_COLUMNS[0])?;
    let dot_y = numeric_column(df, FEATURE_COLUMNS[1])?;
    let mouse_x = numeric_column(df, FEATURE_COLUMNS[2])?;
    let mouse_y = numeric_column(df, FEATURE_COLUMNS[3])?;
    let max_speed = numeric_column(df, MAX_SPEED_COLUMN)?;
    let mouse_down = if df.schema().contains(MOUSE_DOWN_COLUMN) {
        numeric_column(df, MOUSE_DOWN_COLUMN)?
    } else {
        vec![Some(0.0); df.height()]
    };

    let mut events = Vec::with_capacity(df.height());
    let mut skipped = 0usize;
    for (row, uid) in sessions.into_iter().enumerate() {
        let event = match (
            uid,
            timestamps[row],
            dot_x[row],
            dot_y[row],
            mouse_x[row],
            mouse_y[row],
            max_speed[row],
        ) {
            (Some(uid), Some(ts), Some(dx), Some(dy), Some(mx), Some(my), Some(speed)) => {
                SessionEvent {
                    session_uid: uid.to_string(),
                    timestamp: ts,
                    dot_x: dx,
                    dot_y: dy,
                    mouse_x: mx,
                    mouse_y: my,
                    mouse_down: mouse_down[row].unwrap_or(0.0) != 0.0,
                    max_speed: speed,
                }
            }
            _ => {
                skipped += 1;
                continue;
            }
        };
        events.push(event);
    }

    if skipped > 0 {
        warn!("Skipped {} rows with missing values", skipped);
    }
    Ok(events)
}

/// Load a session log file straight into typed events
pub fn load_session_events<P: AsRef<Path>>(file_path: P) -> Result<Vec<SessionEvent>> {
    let df = read_session_dataframe(file_path)?;
    dataframe_to_events(&df)
}

/// Write `bytes` to `path` through a temporary file in the same directory
///
/// Parent directories are created as needed. Readers see either the previous
/// file or the complete new one.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    use std::io::Write as _;

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(bytes)?;
    file.flush()?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_fails_fast() {
        let result = load_session_events("does/not/exist.parquet");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("not found"));
    }

    #[test]
    fn test_unsupported_extension() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("sessions.txt");
        std::fs::write(&path, "sessionUid\n")?;
        assert!(read_session_dataframe(&path).is_err());
        Ok(())
    }

    #[test]
    fn test_csv_round_into_events() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("sessions.csv");
        std::fs::write(
            &path,
            "sessionUid,timestamp,dotX,dotY,mouseX,mouseY,mouseDown,maxSpeed\n\
             a,2,10.0,20.0,5.0,5.0,1,2.5\n\
             a,1,11.0,21.0,6.0,6.0,0,2.5\n\
             b,1,0.0,0.0,,1.0,0,3.0\n",
        )?;

        let events = load_session_events(&path)?;
        // Row with empty mouseX is dropped
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].session_uid, "a");
        assert_eq!(events[0].timestamp, 2.0);
        assert!(events[0].mouse_down);
        assert!(!events[1].mouse_down);
        assert_eq!(events[1].features(), [11.0, 21.0, 6.0, 6.0]);
        assert_eq!(events[1].max_speed, 2.5);
        Ok(())
    }

    #[test]
    fn test_missing_required_column() {
        let df = DataFrame::new(vec![
            Series::new(SESSION_COLUMN.into(), vec!["a", "a"]).into(),
            Series::new(TIMESTAMP_COLUMN.into(), vec![1i64, 2]).into(),
        ])
        .unwrap();
        let err = dataframe_to_events(&df).unwrap_err();
        assert!(err.to_string().contains("dotX"));
    }

    #[test]
    fn test_integer_session_ids_and_no_mouse_down() {
        let df = DataFrame::new(vec![
            Series::new(SESSION_COLUMN.into(), vec![7i64, 7]).into(),
            Series::new(TIMESTAMP_COLUMN.into(), vec![1i64, 2]).into(),
            Series::new("dotX".into(), vec![1.0f64, 2.0]).into(),
            Series::new("dotY".into(), vec![1.0f64, 2.0]).into(),
            Series::new("mouseX".into(), vec![0.0f64, 0.0]).into(),
            Series::new("mouseY".into(), vec![0.0f64, 0.0]).into(),
            Series::new(MAX_SPEED_COLUMN.into(), vec![2i64, 2]).into(),
        ])
        .unwrap();
        let events = dataframe_to_events(&df).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].session_uid, "7");
        assert_eq!(events[1].max_speed, 2.0);
        assert!(!events[0].mouse_down);
    }

    #[test]
    fn test_write_atomic_replaces_whole_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("public").join("lstm_dot_behavior.meta.json");

        write_atomic(&path, b"{\"version\":\"first\"}").unwrap();
        write_atomic(&path, b"{}").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"{}");

        // No temporary files are left next to the artifact
        assert_eq!(fs::read_dir(path.parent().unwrap()).unwrap().count(), 1);
    }

    #[test]
    fn test_write_atomic_under_a_file_fails_cleanly() {
        let dir = tempdir().unwrap();
        // A regular file where a directory is expected
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"x").unwrap();
        assert!(write_atomic(&blocker.join("meta.json"), b"{}").is_err());
        assert_eq!(fs::read(&blocker).unwrap(), b"x");
    }
}
