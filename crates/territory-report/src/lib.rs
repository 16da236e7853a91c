//! Delivery history report.
//!
//! Reads closed delivery cycles through the lifecycle engine and renders
//! them as an XLSX workbook: one sheet per band of territory numbers, one
//! column pair per territory, one name row and one date row per cycle.
//! Never writes to the stores.
//!
//! # Modules
//!
//! - [`layout`] -- Band and cell layout, independent of the file format.
//! - [`xlsx`] -- Rendering with `rust_xlsxwriter`.

pub mod layout;
pub mod xlsx;

use territory_core::LifecycleEngine;
use territory_core::LifecycleError;
use territory_core::config::ReportConfig;
use tracing::info;

pub use layout::{HistoryRange, MAX_SPAN, SheetLayout, build_sheets};

/// Suggested download name for the workbook.
pub const FILE_NAME: &str = "historial-territorios.xlsx";

/// Errors that can occur while producing the report.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    /// The requested territory range is empty, starts at zero, or spans
    /// more than [`layout::MAX_SPAN`] numbers.
    #[error("invalid territory range {start}-{end}")]
    InvalidRange {
        /// First number requested.
        start: u32,
        /// Last number requested.
        end: u32,
    },

    /// A sheet has more rows or columns than a worksheet allows.
    #[error("sheet {sheet} does not fit in a worksheet")]
    TooLarge {
        /// Sheet name.
        sheet: String,
    },

    /// Reading the history failed.
    #[error("history read failed: {0}")]
    Lifecycle(#[from] LifecycleError),

    /// The XLSX writer failed.
    #[error("xlsx error: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),
}

/// Render the history of territories in `range` (all territories with
/// history when `None`) to XLSX bytes.
///
/// # Errors
///
/// Returns [`ReportError`] if the history cannot be read or rendered.
pub async fn render_history(
    engine: &LifecycleEngine,
    range: Option<HistoryRange>,
    config: &ReportConfig,
) -> Result<Vec<u8>, ReportError> {
    let history = engine.closed_cycles().await?;
    let users = engine.user_index().await?;
    let range = range.unwrap_or_else(|| HistoryRange::covering(&history));

    let sheets = build_sheets(&history, &users, range, config.band_width, &config.title)?;
    let bytes = xlsx::render(&sheets)?;
    info!(
        start = range.start,
        end = range.end,
        sheets = sheets.len(),
        bytes = bytes.len(),
        "history report rendered"
    );
    Ok(bytes)
}
