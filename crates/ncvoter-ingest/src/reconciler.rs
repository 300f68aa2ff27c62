//! Column-count reconciliation of snapshot lines against the file header
//!
//! The statewide export has drifted over the years by a few known columns.
//! Lines carrying exactly those extra cells are repaired by dropping them;
//! any other width mismatch is rejected.

use ncvoter_common::{RawRow, VoterError};

pub const MESSAGE_EXTRA_ONE: &str =
    "Line has an extra 1 cell than the headers we have. (removing 45)";
pub const MESSAGE_EXTRA_THREE: &str =
    "Line has an extra 3 cells than the headers we have. (removing 45-47)";
pub const MESSAGE_TOO_MANY: &str = "More cells in this line than we know what to do with.";
pub const MESSAGE_TOO_FEW: &str = "Less cells in this line than the headers we have.";

/// Historically known extra columns, as indices into the oversized line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDrift {
    /// Dropped when a line has exactly one cell more than the header
    pub one_extra: Vec<usize>,
    /// Dropped when a line has exactly three cells more than the header
    pub three_extra: Vec<usize>,
}

impl Default for ColumnDrift {
    fn default() -> Self {
        Self {
            one_extra: vec![45],
            three_extra: vec![45, 46, 47],
        }
    }
}

/// Outcome of reconciling one line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciled {
    /// Width matched the header
    Exact(RawRow),
    /// Known drift columns were dropped; record a warning and keep the row
    Repaired { row: RawRow, message: &'static str },
    /// Unrecognized width; record an error and skip the line
    Rejected { message: &'static str },
}

/// Strip null bytes, whitespace and one layer of surrounding quotes
fn clean_cell(cell: &str) -> String {
    let cell = cell.replace('\0', "");
    let trimmed = cell.trim();
    let unquoted = trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(trimmed);
    unquoted.trim().to_string()
}

/// Split and normalize the header line into lower-cased field names
pub fn parse_header(line: &str, delimiter: char) -> Result<Vec<String>, VoterError> {
    let header: Vec<String> = line
        .replace('\0', "")
        .split(delimiter)
        .map(|cell| clean_cell(cell).to_lowercase())
        .collect();

    if header.iter().all(|h| h.is_empty()) {
        return Err(VoterError::InvalidHeader("header line is empty".to_string()));
    }
    if let Some(dup) = header
        .iter()
        .enumerate()
        .find(|(i, h)| !h.is_empty() && header[..*i].contains(h))
        .map(|(_, h)| h)
    {
        return Err(VoterError::InvalidHeader(format!("duplicate column '{}'", dup)));
    }

    Ok(header)
}

/// Turns raw lines into sparse rows keyed by header name
#[derive(Debug, Clone)]
pub struct RowReconciler {
    header: Vec<String>,
    delimiter: char,
    drift: ColumnDrift,
}

impl RowReconciler {
    pub fn new(header: Vec<String>, delimiter: char) -> Self {
        Self::with_drift(header, delimiter, ColumnDrift::default())
    }

    pub fn with_drift(header: Vec<String>, delimiter: char, drift: ColumnDrift) -> Self {
        Self {
            header,
            delimiter,
            drift,
        }
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn reconcile(&self, line: &str) -> Reconciled {
        let cells: Vec<&str> = line.split(self.delimiter).collect();
        let width = self.header.len();

        match cells.len() {
            n if n == width => Reconciled::Exact(self.sparse(cells.into_iter())),
            n if n == width + 1 => self.repair(cells, &self.drift.one_extra, MESSAGE_EXTRA_ONE),
            n if n == width + 3 => {
                self.repair(cells, &self.drift.three_extra, MESSAGE_EXTRA_THREE)
            }
            n if n > width => Reconciled::Rejected {
                message: MESSAGE_TOO_MANY,
            },
            _ => Reconciled::Rejected {
                message: MESSAGE_TOO_FEW,
            },
        }
    }

    fn repair(&self, cells: Vec<&str>, drop: &[usize], message: &'static str) -> Reconciled {
        // A drift index past the end would leave the line too wide
        if drop.iter().any(|&i| i >= cells.len()) {
            return Reconciled::Rejected {
                message: MESSAGE_TOO_MANY,
            };
        }
        let kept = cells
            .into_iter()
            .enumerate()
            .filter(|(i, _)| !drop.contains(i))
            .map(|(_, c)| c);
        Reconciled::Repaired {
            row: self.sparse(kept),
            message,
        }
    }

    fn sparse<'a>(&self, cells: impl Iterator<Item = &'a str>) -> RawRow {
        self.header
            .iter()
            .zip(cells)
            .filter(|(name, _)| !name.is_empty())
            .filter_map(|(name, cell)| {
                let value = clean_cell(cell);
                (!value.is_empty()).then(|| (name.clone(), value))
            })
            .collect()
    }
}
