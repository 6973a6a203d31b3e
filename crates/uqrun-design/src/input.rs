use std::fs;
use std::path::Path;

use csv::{ReaderBuilder, WriterBuilder};
use uqrun_core::{ErrorInfo, ParameterSpec, PointSet, Scalar, UqError};

/// Writes the point set as CSV: an `index` column followed by one column per
/// parameter, values rendered with each parameter's declared representation.
pub fn write_input(points: &PointSet, path: &Path) -> Result<(), UqError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| UqError::io("input-create", parent, err))?;
    }
    let mut writer = WriterBuilder::new()
        .from_path(path)
        .map_err(|err| wrap_csv("input-open", path, err))?;
    let mut header = vec!["index".to_string()];
    header.extend(points.schema().iter().map(|spec| spec.name.clone()));
    writer
        .write_record(&header)
        .map_err(|err| wrap_csv("input-write-header", path, err))?;
    for point in points.points() {
        let mut record = vec![point.index.to_string()];
        for spec in points.schema() {
            let value = point.get(&spec.name).map(|v| spec.format(v)).unwrap_or_default();
            record.push(value);
        }
        writer
            .write_record(&record)
            .map_err(|err| wrap_csv("input-write-row", path, err))?;
    }
    writer
        .flush()
        .map_err(|err| UqError::io("input-flush", path, err))?;
    Ok(())
}

/// Reads a point set previously written by [`write_input`].
///
/// The header must list exactly the schema's parameter names, in order.
pub fn read_input(path: &Path, schema: &[ParameterSpec]) -> Result<PointSet, UqError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|err| wrap_csv("input-open", path, err))?;
    let header = reader
        .headers()
        .map_err(|err| wrap_csv("input-read-header", path, err))?
        .clone();
    let expected: Vec<&str> = std::iter::once("index")
        .chain(schema.iter().map(|spec| spec.name.as_str()))
        .collect();
    let actual: Vec<&str> = header.iter().collect();
    if actual != expected {
        return Err(UqError::Config(
            ErrorInfo::new("input-header", "input file columns differ from the study variables")
                .with_context("path", path.display().to_string())
                .with_context("expected", expected.join(","))
                .with_context("actual", actual.join(",")),
        ));
    }
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|err| wrap_csv("input-read-row", path, err))?;
        let row = schema
            .iter()
            .enumerate()
            .map(|(col, spec)| Scalar::parse(spec.kind, record.get(col + 1).unwrap_or("")))
            .collect::<Result<Vec<_>, _>>()?;
        rows.push(row);
    }
    PointSet::from_rows(schema.to_vec(), rows)
}

fn wrap_csv(code: &str, path: &Path, err: csv::Error) -> UqError {
    UqError::Io(
        ErrorInfo::new(code, "CSV input file failure")
            .with_context("path", path.display().to_string())
            .with_hint(err.to_string()),
    )
}
