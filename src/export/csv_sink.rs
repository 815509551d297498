//! [`TabularSink`] writing `;`-separated CSV files with polars.
//!
//! Layout of the export directory:
//!
//! * one file per module, named after the module id without separators
//!   (`70ee50000001.csv`), with columns `timestamp;datetime;<metrics...>`;
//! * `stations.csv` holding one snapshot row per station and run, with
//!   columns `station_id;timestamp;datetime;temperature;humidity;min_temp;max_temp`.
//!
//! Files are only ever opened for appending. The header is written when a
//! file is created. A final line left without its newline by an interrupted
//! write is cut off before the file is read or appended to, so the cursor
//! never counts a row the next append would lose.

use crate::export::error::SinkError;
use crate::export::sink::TabularSink;
use crate::types::measurement::{Measurement, StationSnapshot};
use crate::utils::format_timestamp;
use log::{debug, info, warn};
use polars::prelude::*;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const SEPARATOR: u8 = b';';
pub const SNAPSHOT_FILE_NAME: &str = "stations.csv";

const TIMESTAMP_COLUMN: &str = "timestamp";
const DATETIME_COLUMN: &str = "datetime";
const STATION_COLUMN: &str = "station_id";
const SNAPSHOT_METRICS: [&str; 4] = ["temperature", "humidity", "min_temp", "max_temp"];
const TAIL_CHUNK: usize = 4096;

#[derive(Debug, Clone)]
pub struct CsvSink {
    directory: PathBuf,
}

impl CsvSink {
    /// Opens (and creates if needed) an export directory.
    pub fn new(directory: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let directory = directory.into();
        fs::create_dir_all(&directory)
            .map_err(|e| SinkError::DirCreation(directory.clone(), e))?;
        Ok(Self { directory })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// File holding the history of `module_id`.
    pub fn module_path(&self, module_id: &str) -> PathBuf {
        let stem: String = module_id
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .map(|c| c.to_ascii_lowercase())
            .collect();
        self.directory.join(format!("{stem}.csv"))
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.directory.join(SNAPSHOT_FILE_NAME)
    }

    /// Reads the given columns of a CSV file, `None` when the file doesn't
    /// exist or is empty.
    ///
    /// Unparsable cells (e.g. from a line torn by an interrupted write) are
    /// read as nulls instead of failing the whole file.
    fn read_columns(path: &Path, columns: &[&str]) -> Result<Option<DataFrame>, SinkError> {
        match fs::metadata(path) {
            Ok(metadata) if metadata.len() > 0 => {}
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SinkError::Io(path.to_path_buf(), e)),
        }

        let projection: Arc<[PlSmallStr]> =
            columns.iter().map(|c| PlSmallStr::from_str(c)).collect();
        let df = CsvReadOptions::default()
            .with_has_header(true)
            .with_ignore_errors(true)
            .with_columns(Some(projection))
            .map_parse_options(|options| options.with_separator(SEPARATOR))
            .try_into_reader_with_file_path(Some(path.to_path_buf()))
            .map_err(|e| SinkError::Polars(path.to_path_buf(), e))?
            .finish()
            .map_err(|e| SinkError::Polars(path.to_path_buf(), e))?;
        Ok(Some(df))
    }

    /// Largest value of the timestamp column. This is the last row of a
    /// well-formed file, and stays correct if the final line was cut short.
    fn max_timestamp(path: &Path, df: &DataFrame) -> Result<Option<i64>, SinkError> {
        let column = df
            .column(TIMESTAMP_COLUMN)
            .and_then(|c| c.cast(&DataType::Int64))
            .map_err(|e| SinkError::Polars(path.to_path_buf(), e))?;
        let timestamps = column
            .as_materialized_series()
            .i64()
            .map_err(|e| SinkError::Polars(path.to_path_buf(), e))?;
        Ok(timestamps.max())
    }

    /// Column names from the first line of `path`, `None` for a missing or
    /// empty file.
    fn read_header(path: &Path) -> Result<Option<Vec<String>>, SinkError> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SinkError::Io(path.to_path_buf(), e)),
        };
        let mut line = String::new();
        BufReader::new(file)
            .read_line(&mut line)
            .map_err(|e| SinkError::Io(path.to_path_buf(), e))?;
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            return Ok(None);
        }
        Ok(Some(
            line.split(char::from(SEPARATOR))
                .map(|name| name.trim_matches('"').to_string())
                .collect(),
        ))
    }

    /// Truncates `path` after its last newline. Returns the number of bytes
    /// removed; a file without any newline is emptied.
    fn drop_torn_tail(path: &Path) -> Result<u64, SinkError> {
        let io_error = |e: io::Error| SinkError::Io(path.to_path_buf(), e);
        let mut file = match OpenOptions::new().read(true).write(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(io_error(e)),
        };
        let len = file.metadata().map_err(io_error)?.len();

        let mut end = len;
        let mut chunk = [0u8; TAIL_CHUNK];
        while end > 0 {
            let start = end.saturating_sub(TAIL_CHUNK as u64);
            let buf = &mut chunk[..(end - start) as usize];
            file.seek(SeekFrom::Start(start)).map_err(io_error)?;
            file.read_exact(buf).map_err(io_error)?;
            if let Some(newline) = buf.iter().rposition(|b| *b == b'\n') {
                end = start + newline as u64 + 1;
                break;
            }
            end = start;
        }

        if end < len {
            file.set_len(end).map_err(io_error)?;
            warn!(
                "Dropped {} byte(s) of an incomplete last line in {}",
                len - end,
                path.display()
            );
        }
        Ok(len - end)
    }

    fn append_frame(path: &Path, header: &[String], frame: &mut DataFrame) -> Result<(), SinkError> {
        Self::drop_torn_tail(path)?;
        let existing = Self::read_header(path)?;
        if let Some(found) = &existing {
            if found.as_slice() != header {
                return Err(SinkError::SchemaMismatch {
                    path: path.to_path_buf(),
                    expected: header.join(", "),
                    found: found.join(", "),
                });
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| SinkError::Io(path.to_path_buf(), e))?;
        CsvWriter::new(&mut file)
            .include_header(existing.is_none())
            .with_separator(SEPARATOR)
            .finish(frame)
            .map_err(|e| SinkError::Polars(path.to_path_buf(), e))?;
        file.flush()
            .map_err(|e| SinkError::Io(path.to_path_buf(), e))?;

        debug!("Appended {} row(s) to {}", frame.height(), path.display());
        Ok(())
    }
}

impl TabularSink for CsvSink {
    fn last_timestamp(&self, module_id: &str) -> Result<Option<i64>, SinkError> {
        let path = self.module_path(module_id);
        Self::drop_torn_tail(&path)?;
        match Self::read_columns(&path, &[TIMESTAMP_COLUMN])? {
            Some(df) => Self::max_timestamp(&path, &df),
            None => Ok(None),
        }
    }

    fn append(
        &mut self,
        module_id: &str,
        metrics: &[String],
        rows: &[Measurement],
    ) -> Result<(), SinkError> {
        if rows.is_empty() {
            return Ok(());
        }
        let path = self.module_path(module_id);
        if let Some(row) = rows.iter().find(|m| !m.has_metrics(metrics)) {
            let found: Vec<&str> = row.values.iter().map(|(name, _)| name.as_str()).collect();
            return Err(SinkError::SchemaMismatch {
                path,
                expected: metrics.join(", "),
                found: found.join(", "),
            });
        }

        let mut header = vec![TIMESTAMP_COLUMN.to_string(), DATETIME_COLUMN.to_string()];
        header.extend(metrics.iter().cloned());

        let mut columns = vec![
            Column::new(
                TIMESTAMP_COLUMN.into(),
                rows.iter().map(|m| m.timestamp).collect::<Vec<i64>>(),
            ),
            Column::new(
                DATETIME_COLUMN.into(),
                rows.iter()
                    .map(|m| format_timestamp(m.timestamp))
                    .collect::<Vec<String>>(),
            ),
        ];
        for metric in metrics {
            let values: Vec<Option<f64>> = rows.iter().map(|m| m.get(metric)).collect();
            columns.push(Column::new(metric.as_str().into(), values));
        }
        let mut frame =
            DataFrame::new(columns).map_err(|e| SinkError::Polars(path.clone(), e))?;

        Self::append_frame(&path, &header, &mut frame)?;
        info!(
            "Wrote {} row(s) for module {} to {}",
            rows.len(),
            module_id,
            path.display()
        );
        Ok(())
    }

    fn last_snapshot_timestamp(&self, station_id: &str) -> Result<Option<i64>, SinkError> {
        let path = self.snapshot_path();
        Self::drop_torn_tail(&path)?;
        let Some(df) = Self::read_columns(&path, &[STATION_COLUMN, TIMESTAMP_COLUMN])? else {
            return Ok(None);
        };
        let station_rows = df
            .lazy()
            .filter(col(STATION_COLUMN).eq(lit(station_id)))
            .collect()
            .map_err(|e| SinkError::Polars(path.clone(), e))?;
        Self::max_timestamp(&path, &station_rows)
    }

    fn append_snapshot(&mut self, snapshot: &StationSnapshot) -> Result<(), SinkError> {
        let path = self.snapshot_path();

        let mut header = vec![
            STATION_COLUMN.to_string(),
            TIMESTAMP_COLUMN.to_string(),
            DATETIME_COLUMN.to_string(),
        ];
        header.extend(SNAPSHOT_METRICS.iter().map(|m| m.to_string()));

        let values = [
            snapshot.temperature,
            snapshot.humidity,
            snapshot.min_temp,
            snapshot.max_temp,
        ];
        let mut columns = vec![
            Column::new(STATION_COLUMN.into(), vec![snapshot.station_id.clone()]),
            Column::new(TIMESTAMP_COLUMN.into(), vec![snapshot.timestamp]),
            Column::new(
                DATETIME_COLUMN.into(),
                vec![format_timestamp(snapshot.timestamp)],
            ),
        ];
        for (name, value) in SNAPSHOT_METRICS.iter().zip(values) {
            columns.push(Column::new((*name).into(), vec![value]));
        }
        let mut frame =
            DataFrame::new(columns).map_err(|e| SinkError::Polars(path.clone(), e))?;

        Self::append_frame(&path, &header, &mut frame)?;
        info!(
            "Wrote snapshot of station {} at {}",
            snapshot.station_id, snapshot.timestamp
        );
        Ok(())
    }
}
