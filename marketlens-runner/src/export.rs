//! Report and table export: JSON and CSV.
//!
//! `save_report` writes the artifact set for one analysis under
//! `{symbol}_{as_of}/`:
//! - `report.json`: the full `AnalysisReport`
//! - `factors.csv`: one row per bullish/bearish/neutral factor
//! - `faults.csv`: modules that produced no output

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use marketlens_core::analysis::ResultBundle;
use marketlens_core::domain::Table;

use crate::report::AnalysisReport;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("CSV write failed: {0}")]
    Csv(#[from] csv::Error),
    #[error("CSV output is not valid UTF-8")]
    Utf8,
    #[error("failed to write {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
}

// ─── JSON ───────────────────────────────────────────────────────────

pub fn export_json(report: &AnalysisReport) -> Result<String, ExportError> {
    Ok(serde_json::to_string_pretty(report)?)
}

// ─── CSV ────────────────────────────────────────────────────────────

/// A table as CSV. Columns are the union over all rows with the date column
/// first; missing cells are empty.
pub fn table_csv(table: &Table) -> Result<String, ExportError> {
    let date_col = table.date_column();
    let mut columns: Vec<&str> = date_col.into_iter().collect();
    columns.extend(table.columns().into_iter().filter(|c| Some(*c) != date_col));

    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(&columns)?;
    for row in table.rows() {
        wtr.write_record(
            columns
                .iter()
                .map(|c| row.get(*c).map(|v| v.to_string()).unwrap_or_default()),
        )?;
    }
    finish(wtr)
}

/// Columns: kind, factor.
pub fn factors_csv(bundle: &ResultBundle) -> Result<String, ExportError> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["kind", "factor"])?;
    for (kind, list) in [
        ("bullish", &bundle.bullish),
        ("bearish", &bundle.bearish),
        ("neutral", &bundle.neutral),
    ] {
        for factor in list {
            wtr.write_record([kind, factor.as_str()])?;
        }
    }
    finish(wtr)
}

/// Columns: module, reason.
pub fn faults_csv(bundle: &ResultBundle) -> Result<String, ExportError> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["module", "reason"])?;
    for fault in &bundle.faults {
        wtr.write_record([fault.module.as_str(), fault.reason.as_str()])?;
    }
    finish(wtr)
}

fn finish(wtr: csv::Writer<Vec<u8>>) -> Result<String, ExportError> {
    let data = wtr.into_inner().map_err(|e| ExportError::Csv(e.into_error().into()))?;
    String::from_utf8(data).map_err(|_| ExportError::Utf8)
}

// ─── Files ──────────────────────────────────────────────────────────

/// Write the artifact set for one report; returns its directory.
pub fn save_report(report: &AnalysisReport, output_dir: &Path) -> Result<PathBuf, ExportError> {
    let dir = output_dir.join(format!(
        "{}_{}",
        sanitize(&report.symbol),
        report.as_of.format("%Y%m%d")
    ));
    create_dir(&dir)?;
    write_file(&dir.join("report.json"), &export_json(report)?)?;
    write_file(&dir.join("factors.csv"), &factors_csv(&report.bundle)?)?;
    write_file(&dir.join("faults.csv"), &faults_csv(&report.bundle)?)?;
    Ok(dir)
}

/// Write `table` to `{output_dir}/{name}.csv`.
pub fn save_table(table: &Table, output_dir: &Path, name: &str) -> Result<PathBuf, ExportError> {
    create_dir(output_dir)?;
    let path = output_dir.join(format!("{}.csv", sanitize(name)));
    write_file(&path, &table_csv(table)?)?;
    Ok(path)
}

/// Symbols like `BTC/USDT` must not create subdirectories.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

fn create_dir(dir: &Path) -> Result<(), ExportError> {
    fs::create_dir_all(dir).map_err(|source| ExportError::Io {
        path: dir.to_path_buf(),
        source,
    })
}

fn write_file(path: &Path, content: &str) -> Result<(), ExportError> {
    fs::write(path, content).map_err(|source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    })
}
