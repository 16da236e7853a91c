//! Sheet layout for the history report, independent of the file format.
//!
//! Territories are split into bands of `band_width` consecutive numbers,
//! one sheet per band. Each territory owns a pair of columns: a merged
//! `Num. N` header, then for each closed cycle a merged row with the
//! holder's name and a row with the delivery and return dates.

use std::collections::BTreeMap;

use territory_core::calendar::format_dmy;
use territory_types::{DeliveryRecord, User, UserId};

use crate::ReportError;

/// Most territory numbers one report may span.
pub const MAX_SPAN: u32 = 10_000;

/// Inclusive range of territory numbers to report on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryRange {
    /// First territory number.
    pub start: u32,
    /// Last territory number.
    pub end: u32,
}

impl HistoryRange {
    /// A validated range.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::InvalidRange`] when `start` is zero, after
    /// `end`, or more than [`MAX_SPAN`] numbers before it.
    pub const fn new(start: u32, end: u32) -> Result<Self, ReportError> {
        if start == 0 || start > end || end.saturating_sub(start) >= MAX_SPAN {
            return Err(ReportError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// `1..=highest` territory number with history, at least `1..=1`.
    pub fn covering(history: &BTreeMap<u32, Vec<DeliveryRecord>>) -> Self {
        let end = history.keys().next_back().copied().unwrap_or(1).max(1);
        Self { start: 1, end }
    }
}

/// One closed cycle as printed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleCell {
    /// Holder's name, upper-cased.
    pub name: String,
    /// `dd/mm/yyyy`.
    pub delivered_on: String,
    /// `dd/mm/yyyy`, empty if the record lacks a return date.
    pub returned_on: String,
}

/// A territory's column pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerritoryColumn {
    /// Territory number.
    pub number: u32,
    /// Closed cycles, oldest first.
    pub cycles: Vec<CycleCell>,
}

/// One worksheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetLayout {
    /// Sheet name, `"{first}-{last}"`.
    pub name: String,
    /// Title cell text.
    pub title: String,
    /// Column pairs in territory order.
    pub columns: Vec<TerritoryColumn>,
}

impl SheetLayout {
    /// Deepest cycle list on the sheet.
    pub fn depth(&self) -> usize {
        self.columns.iter().map(|c| c.cycles.len()).max().unwrap_or(0)
    }
}

/// Lay out `history` (closed cycles grouped by territory) for `range`.
///
/// Users missing from `users` are printed by id.
///
/// # Errors
///
/// Returns [`ReportError::InvalidRange`] when `band_width` is zero or the
/// range spans more than [`MAX_SPAN`] numbers.
pub fn build_sheets(
    history: &BTreeMap<u32, Vec<DeliveryRecord>>,
    users: &BTreeMap<UserId, User>,
    range: HistoryRange,
    band_width: u32,
    title: &str,
) -> Result<Vec<SheetLayout>, ReportError> {
    let invalid = ReportError::InvalidRange {
        start: range.start,
        end: range.end,
    };
    if range.end.saturating_sub(range.start) >= MAX_SPAN {
        return Err(invalid);
    }
    let step = usize::try_from(band_width)
        .ok()
        .filter(|w| *w > 0)
        .ok_or(invalid)?;

    let sheets = (range.start..=range.end)
        .step_by(step)
        .map(|first| {
            let last = first
                .saturating_add(band_width.saturating_sub(1))
                .min(range.end);
            SheetLayout {
                name: format!("{first}-{last}"),
                title: title.to_owned(),
                columns: (first..=last)
                    .map(|number| TerritoryColumn {
                        number,
                        cycles: history
                            .get(&number)
                            .map(|records| {
                                records.iter().map(|r| cycle_cell(r, users)).collect()
                            })
                            .unwrap_or_default(),
                    })
                    .collect(),
            }
        })
        .collect();
    Ok(sheets)
}

fn cycle_cell(record: &DeliveryRecord, users: &BTreeMap<UserId, User>) -> CycleCell {
    let name = users
        .get(&record.user_id)
        .map_or_else(|| record.user_id.to_string(), |u| u.name.clone());
    CycleCell {
        name: name.to_uppercase(),
        delivered_on: format_dmy(record.delivered_on),
        returned_on: record.returned_on.map(format_dmy).unwrap_or_default(),
    }
}
