//! Parquet string coercion
//!
//! Every staged file is rewritten with all columns cast to `String` so the
//! warehouse loader sees one uniform text schema across years.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use ons_common::{OnsError, Result};
use polars::prelude::*;
use tracing::debug;

/// Shape of a normalized file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizeSummary {
    pub rows: usize,
    pub columns: usize,
}

fn format_err(path: &Path, err: PolarsError) -> OnsError {
    OnsError::DataFormat(format!("{}: {}", path.display(), err))
}

/// Cast every column of a frame to `String`
pub fn coerce_to_strings(df: &mut DataFrame) -> PolarsResult<()> {
    let names: Vec<String> = df.get_column_names().iter().map(|n| n.to_string()).collect();

    for name in names {
        if df.column(&name)?.dtype() == &DataType::String {
            continue;
        }
        let casted = df.column(&name)?.cast(&DataType::String)?;
        df.with_column(casted)?;
    }

    Ok(())
}

/// Rewrite a Parquet file in place with string-typed columns
///
/// The new content is written beside the original and renamed over it, so a
/// failure leaves the downloaded payload untouched.
pub fn normalize_parquet(path: &Path) -> Result<NormalizeSummary> {
    let file = File::open(path)?;
    let mut df = ParquetReader::new(file)
        .finish()
        .map_err(|e| format_err(path, e))?;

    coerce_to_strings(&mut df).map_err(|e| format_err(path, e))?;

    let tmp = tmp_path(path);
    let result = File::create(&tmp)
        .map_err(OnsError::from)
        .and_then(|out| {
            ParquetWriter::new(out)
                .finish(&mut df)
                .map(|_| ())
                .map_err(|e| format_err(path, e))
        });
    if let Err(e) = result {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    fs::rename(&tmp, path)?;

    let summary = NormalizeSummary {
        rows: df.height(),
        columns: df.width(),
    };
    debug!(path = %path.display(), rows = summary.rows, columns = summary.columns, "Normalized");
    Ok(summary)
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_parquet(path: &Path, df: &mut DataFrame) {
        let file = File::create(path).unwrap();
        ParquetWriter::new(file).finish(df).unwrap();
    }

    fn read_parquet(path: &Path) -> DataFrame {
        ParquetReader::new(File::open(path).unwrap()).finish().unwrap()
    }

    #[test]
    fn test_all_columns_become_strings() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ear-2024.parquet");
        let mut df = df!(
            "id_reservatorio" => ["FURNAS", "SOBRADINHO"],
            "val_volumeutilcon" => [55.5f64, 12.25],
            "cod_subsistema" => [1i64, 2],
        )
        .unwrap();
        write_parquet(&path, &mut df);

        let summary = normalize_parquet(&path).unwrap();
        assert_eq!(summary, NormalizeSummary { rows: 2, columns: 3 });

        let reread = read_parquet(&path);
        for column in reread.get_columns() {
            assert_eq!(column.dtype(), &DataType::String, "column {}", column.name());
        }
        let values: Vec<_> = reread
            .column("cod_subsistema")
            .unwrap()
            .str()
            .unwrap()
            .into_iter()
            .map(|v| v.map(str::to_string))
            .collect();
        assert_eq!(values, vec![Some("1".to_string()), Some("2".to_string())]);
        assert!(!tmp_path(&path).exists());
    }

    #[test]
    fn test_garbage_payload_is_data_format_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.parquet");
        fs::write(&path, b"<html>not parquet</html>").unwrap();

        let err = normalize_parquet(&path).unwrap_err();
        assert!(matches!(err, OnsError::DataFormat(_)));
        assert_eq!(fs::read(&path).unwrap(), b"<html>not parquet</html>");
    }
}
