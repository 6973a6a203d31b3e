use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use indexmap::IndexMap;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};
use uqrun_core::{
    to_canonical_json_bytes, ErrorInfo, OutputMap, OutputSchema, OutputValue, ParameterSpec,
    Scalar, UqError,
};

use crate::row::{FailureKind, ResultRow, RowStatus};
use crate::table::ResultTable;

const FIXED_COLUMNS: [&str; 5] = [
    "index",
    "status",
    "failure_kind",
    "failure_detail",
    "completed_at",
];

/// Supported on-disk formats, chosen from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreFormat {
    Csv,
    Sqlite,
}

impl StoreFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("sqlite") | Some("db") => StoreFormat::Sqlite,
            _ => StoreFormat::Csv,
        }
    }
}

enum Sink {
    Csv(csv::Writer<File>),
    Sqlite(Connection),
}

/// Persisted, append-only result table.
///
/// `open` creates the file or reloads an existing one (checking its columns),
/// `append` validates a row and flushes it to disk, `close` releases the file.
pub struct ResultStore {
    path: PathBuf,
    sink: Sink,
    table: ResultTable,
}

impl ResultStore {
    pub fn open(
        path: impl Into<PathBuf>,
        parameters: Vec<ParameterSpec>,
        outputs: OutputSchema,
    ) -> Result<Self, UqError> {
        let path = path.into();
        ensure_parent(&path)?;
        let mut table = ResultTable::new(parameters, outputs);
        let sink = match StoreFormat::from_path(&path) {
            StoreFormat::Csv => open_csv(&path, &mut table)?,
            StoreFormat::Sqlite => open_sqlite(&path, &mut table)?,
        };
        info!(
            path = %path.display(),
            rows = table.len(),
            "result store opened"
        );
        Ok(Self { path, sink, table })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn table(&self) -> &ResultTable {
        &self.table
    }

    /// Validates `row`, records it and flushes it to disk.
    pub fn append(&mut self, row: ResultRow) -> Result<(), UqError> {
        let index = row.index;
        self.table.insert(row)?;
        let Some(stored) = self.table.get(index) else {
            return Ok(());
        };
        match &mut self.sink {
            Sink::Csv(writer) => {
                let record = csv_record(self.table.parameters(), self.table.outputs(), stored);
                writer
                    .write_record(&record)
                    .map_err(|err| wrap_csv("store.csv_write", &self.path, err))?;
                writer
                    .flush()
                    .map_err(|err| UqError::io("store.csv_flush", &self.path, err))?;
            }
            Sink::Sqlite(conn) => insert_sqlite(conn, stored)?,
        }
        debug!(index, status = ?stored.failure_kind(), "result row appended");
        Ok(())
    }

    /// Flushes and releases the store, returning the in-memory table.
    pub fn close(self) -> Result<ResultTable, UqError> {
        match self.sink {
            Sink::Csv(mut writer) => writer
                .flush()
                .map_err(|err| UqError::io("store.csv_flush", &self.path, err))?,
            Sink::Sqlite(conn) => conn.close().map_err(|(_, err)| {
                UqError::Store(
                    ErrorInfo::new("store.sqlite_close", err.to_string())
                        .with_context("path", self.path.display().to_string()),
                )
            })?,
        }
        Ok(self.table)
    }
}

/// Loads a result store read-only, without keeping the file open.
pub fn load_table(
    path: &Path,
    parameters: Vec<ParameterSpec>,
    outputs: OutputSchema,
) -> Result<ResultTable, UqError> {
    if !path.exists() {
        return Ok(ResultTable::new(parameters, outputs));
    }
    ResultStore::open(path, parameters, outputs)?.close()
}

fn columns(parameters: &[ParameterSpec], outputs: &OutputSchema) -> Vec<String> {
    FIXED_COLUMNS
        .iter()
        .map(|c| c.to_string())
        .chain(parameters.iter().map(|spec| spec.name.clone()))
        .chain(outputs.names().map(str::to_string))
        .collect()
}

fn open_csv(path: &Path, table: &mut ResultTable) -> Result<Sink, UqError> {
    let expected = columns(table.parameters(), table.outputs());
    let has_content = fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false);
    if has_content {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .from_path(path)
            .map_err(|err| wrap_csv("store.csv_open", path, err))?;
        let header: Vec<String> = reader
            .headers()
            .map_err(|err| wrap_csv("store.csv_header", path, err))?
            .iter()
            .map(str::to_string)
            .collect();
        if header != expected {
            return Err(UqError::Store(
                ErrorInfo::new("store.schema_mismatch", "result file columns differ from study")
                    .with_context("path", path.display().to_string())
                    .with_context("expected", expected.join(","))
                    .with_context("actual", header.join(","))
                    .with_hint("use a new result file or restore the original study configuration"),
            ));
        }
        for record in reader.records() {
            let record = record.map_err(|err| wrap_csv("store.csv_read", path, err))?;
            let row = parse_csv_row(table.parameters(), table.outputs(), &record)?;
            table.insert(row)?;
        }
    }
    let file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .map_err(|err| UqError::io("store.csv_open", path, err))?;
    let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);
    if !has_content {
        writer
            .write_record(&expected)
            .map_err(|err| wrap_csv("store.csv_header", path, err))?;
        writer
            .flush()
            .map_err(|err| UqError::io("store.csv_flush", path, err))?;
    }
    Ok(Sink::Csv(writer))
}

fn csv_record(parameters: &[ParameterSpec], outputs: &OutputSchema, row: &ResultRow) -> Vec<String> {
    let (status, kind, detail) = match &row.status {
        RowStatus::Succeeded => ("succeeded", String::new(), String::new()),
        RowStatus::Failed { kind, detail } => ("failed", kind.to_string(), detail.clone()),
    };
    let mut record = vec![
        row.index.to_string(),
        status.to_string(),
        kind,
        detail,
        row.completed_at.clone(),
    ];
    for spec in parameters {
        record.push(row.inputs.get(&spec.name).map(|v| v.to_string()).unwrap_or_default());
    }
    for spec in outputs.outputs() {
        let cell = row
            .outputs
            .as_ref()
            .and_then(|map| map.get(&spec.name))
            .map(encode_output)
            .unwrap_or_default();
        record.push(cell);
    }
    record
}

fn parse_csv_row(
    parameters: &[ParameterSpec],
    outputs: &OutputSchema,
    record: &StringRecord,
) -> Result<ResultRow, UqError> {
    let cell = |idx: usize| record.get(idx).unwrap_or("");
    let index = cell(0).parse::<usize>().map_err(|_| {
        UqError::Store(
            ErrorInfo::new("store.csv_index", "row index is not an integer")
                .with_context("value", cell(0)),
        )
    })?;
    let status = match cell(1) {
        "succeeded" => RowStatus::Succeeded,
        "failed" => RowStatus::Failed {
            kind: cell(2).parse::<FailureKind>()?,
            detail: cell(3).to_string(),
        },
        other => {
            return Err(UqError::Store(
                ErrorInfo::new("store.csv_status", "unknown row status")
                    .with_context("index", index.to_string())
                    .with_context("value", other),
            ))
        }
    };
    let offset = FIXED_COLUMNS.len();
    let mut inputs = IndexMap::new();
    for (col, spec) in parameters.iter().enumerate() {
        inputs.insert(spec.name.clone(), Scalar::parse(spec.kind, cell(offset + col))?);
    }
    let row_outputs = if status.is_success() {
        let offset = offset + parameters.len();
        let mut map = OutputMap::new();
        for (col, spec) in outputs.outputs().iter().enumerate() {
            map.insert(spec.name.clone(), decode_output(&spec.shape, cell(offset + col))?);
        }
        Some(map)
    } else {
        None
    };
    Ok(ResultRow {
        index,
        inputs,
        status,
        outputs: row_outputs,
        completed_at: cell(4).to_string(),
    })
}

fn open_sqlite(path: &Path, table: &mut ResultTable) -> Result<Sink, UqError> {
    let conn = Connection::open(path).map_err(|err| sqlite_err("store.sqlite_open", path, err))?;
    conn.execute_batch(
        r#"CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS results (
            idx INTEGER PRIMARY KEY,
            status TEXT NOT NULL,
            failure_kind TEXT,
            failure_detail TEXT,
            completed_at TEXT NOT NULL,
            inputs TEXT NOT NULL,
            outputs TEXT
        );"#,
    )
    .map_err(|err| sqlite_err("store.sqlite_schema", path, err))?;

    let schema_bytes = to_canonical_json_bytes(&(table.parameters(), table.outputs()))?;
    let schema = String::from_utf8_lossy(&schema_bytes).to_string();
    let existing: Option<String> = conn
        .query_row("SELECT value FROM meta WHERE key = 'schema'", [], |row| {
            row.get(0)
        })
        .optional()
        .map_err(|err| sqlite_err("store.sqlite_schema", path, err))?;
    match existing {
        Some(stored) if stored != schema => {
            return Err(UqError::Store(
                ErrorInfo::new("store.schema_mismatch", "result database schema differs from study")
                    .with_context("path", path.display().to_string())
                    .with_hint("use a new result file or restore the original study configuration"),
            ))
        }
        Some(_) => {}
        None => {
            conn.execute(
                "INSERT INTO meta (key, value) VALUES ('schema', ?1)",
                params![schema],
            )
            .map_err(|err| sqlite_err("store.sqlite_schema", path, err))?;
        }
    }

    let rows = {
        let mut stmt = conn
            .prepare(
                "SELECT idx, status, failure_kind, failure_detail, completed_at, inputs, outputs
                 FROM results ORDER BY idx",
            )
            .map_err(|err| sqlite_err("store.sqlite_query", path, err))?;
        let mapped = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, Option<String>>(6)?,
                ))
            })
            .map_err(|err| sqlite_err("store.sqlite_query", path, err))?;
        mapped
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| sqlite_err("store.sqlite_row", path, err))?
    };
    for (idx, status, kind, detail, completed_at, inputs, outputs) in rows {
        let status = match status.as_str() {
            "succeeded" => RowStatus::Succeeded,
            _ => RowStatus::Failed {
                kind: kind.as_deref().unwrap_or("run").parse()?,
                detail: detail.unwrap_or_default(),
            },
        };
        let encoded_inputs: BTreeMap<String, String> = decode_json(&inputs)?;
        let mut row_inputs = IndexMap::new();
        for spec in table.parameters() {
            let text = encoded_inputs.get(&spec.name).map(String::as_str).unwrap_or("");
            row_inputs.insert(spec.name.clone(), Scalar::parse(spec.kind, text)?);
        }
        let row_outputs = match outputs {
            Some(text) => {
                let encoded: BTreeMap<String, String> = decode_json(&text)?;
                let mut map = OutputMap::new();
                for spec in table.outputs().outputs() {
                    let cell = encoded.get(&spec.name).map(String::as_str).unwrap_or("");
                    map.insert(spec.name.clone(), decode_output(&spec.shape, cell)?);
                }
                Some(map)
            }
            None => None,
        };
        table.insert(ResultRow {
            index: idx as usize,
            inputs: row_inputs,
            status,
            outputs: row_outputs,
            completed_at,
        })?;
    }
    Ok(Sink::Sqlite(conn))
}

fn insert_sqlite(conn: &Connection, row: &ResultRow) -> Result<(), UqError> {
    let (status, kind, detail) = match &row.status {
        RowStatus::Succeeded => ("succeeded", None, None),
        RowStatus::Failed { kind, detail } => ("failed", Some(kind.as_str()), Some(detail.as_str())),
    };
    let inputs: BTreeMap<&str, String> = row
        .inputs
        .iter()
        .map(|(name, value)| (name.as_str(), value.to_string()))
        .collect();
    let outputs = row.outputs.as_ref().map(|map| {
        map.iter()
            .map(|(name, value)| (name.as_str(), encode_output(value)))
            .collect::<BTreeMap<_, _>>()
    });
    let inputs = encode_json(&inputs)?;
    let outputs = outputs.as_ref().map(encode_json).transpose()?;
    conn.execute(
        "INSERT INTO results (idx, status, failure_kind, failure_detail, completed_at, inputs, outputs)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            row.index as i64,
            status,
            kind,
            detail,
            row.completed_at,
            inputs,
            outputs
        ],
    )
    .map_err(|err| {
        UqError::Store(
            ErrorInfo::new("store.sqlite_insert", err.to_string())
                .with_context("index", row.index.to_string()),
        )
    })?;
    Ok(())
}

/// Space separated elements; scalars are a single element.
fn encode_output(value: &OutputValue) -> String {
    match value {
        OutputValue::Scalar(v) => v.to_string(),
        OutputValue::Array(values) => values
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(" "),
    }
}

fn decode_output(shape: &[usize], text: &str) -> Result<OutputValue, UqError> {
    let values = text
        .split_whitespace()
        .map(|part| {
            part.parse::<f64>().map_err(|_| {
                UqError::Store(
                    ErrorInfo::new("store.output_cell", "output cell is not numeric")
                        .with_context("value", text),
                )
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    match (shape.is_empty(), values.as_slice()) {
        (true, [single]) => Ok(OutputValue::Scalar(*single)),
        _ => Ok(OutputValue::Array(values)),
    }
}

fn encode_json<T: serde::Serialize>(value: &T) -> Result<String, UqError> {
    serde_json::to_string(value)
        .map_err(|err| UqError::Serde(ErrorInfo::new("store.json_encode", err.to_string())))
}

fn decode_json<T: serde::de::DeserializeOwned>(text: &str) -> Result<T, UqError> {
    serde_json::from_str(text)
        .map_err(|err| UqError::Serde(ErrorInfo::new("store.json_decode", err.to_string())))
}

fn ensure_parent(path: &Path) -> Result<(), UqError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .map_err(|err| UqError::io("store.create_dir", parent, err))?;
        }
    }
    Ok(())
}

fn wrap_csv(code: &str, path: &Path, err: csv::Error) -> UqError {
    UqError::Store(
        ErrorInfo::new(code, "CSV result store failure")
            .with_context("path", path.display().to_string())
            .with_hint(err.to_string()),
    )
}

fn sqlite_err(code: &str, path: &Path, err: rusqlite::Error) -> UqError {
    UqError::Store(
        ErrorInfo::new(code, err.to_string()).with_context("path", path.display().to_string()),
    )
}
