//! Typed coercion of reconciled rows
//!
//! Cells arrive as text. Configured integer, flag and date columns are
//! converted so that stored payloads carry real types, and the snapshot
//! date is split off as the change timestamp.

use crate::config::IngestConfig;
use crate::error::RowError;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use ncvoter_common::{FieldValue, RawRow, RowData};

const SNAPSHOT_DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];
const SNAPSHOT_DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y"];
const REGISTRATION_DATE_FORMAT: &str = "%m/%d/%Y";

/// A typed row plus the snapshot timestamp carried on the line, if any
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRow {
    pub data: RowData,
    pub snapshot_dt: Option<DateTime<Utc>>,
}

/// Parse a snapshot timestamp in any of the formats the exports have used
pub fn parse_snapshot_dt(value: &str) -> Option<DateTime<Utc>> {
    for format in SNAPSHOT_DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Some(dt.and_utc());
        }
    }
    for format in SNAPSHOT_DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
        }
    }
    None
}

fn parse_bool(value: &str) -> bool {
    value.eq_ignore_ascii_case("y")
}

fn coerce(field: &str, value: &str, config: &IngestConfig) -> Result<FieldValue, RowError> {
    let is = |list: &[String]| list.iter().any(|f| f == field);

    if is(&config.integer_fields) {
        return value
            .parse::<i64>()
            .map(FieldValue::Integer)
            .map_err(|e| RowError::invalid(field, value, e.to_string()));
    }
    if is(&config.boolean_fields) {
        return Ok(FieldValue::Bool(parse_bool(value)));
    }
    if is(&config.date_fields) {
        return NaiveDate::parse_from_str(value, REGISTRATION_DATE_FORMAT)
            .map(|d| FieldValue::Text(d.format("%Y-%m-%d").to_string()))
            .map_err(|e| RowError::invalid(field, value, e.to_string()));
    }
    Ok(FieldValue::Text(value.to_string()))
}

/// Convert a reconciled row into typed data. Only present cells are touched,
/// so the result is exactly as sparse as the input.
pub fn parse_row(raw: &RawRow, config: &IngestConfig) -> Result<ParsedRow, RowError> {
    let mut data = RowData::new();
    let mut snapshot_dt = None;

    for (field, value) in raw {
        if *field == config.snapshot_field {
            snapshot_dt = Some(
                parse_snapshot_dt(value)
                    .ok_or_else(|| RowError::invalid(field, value, "unrecognized date format"))?,
            );
            continue;
        }
        data.insert(field.clone(), coerce(field, value, config)?);
    }

    Ok(ParsedRow { data, snapshot_dt })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn raw(pairs: &[(&str, &str)]) -> RawRow {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_typed_columns() {
        let config = IngestConfig::default();
        let row = raw(&[
            ("ncid", "AA1"),
            ("county_id", "92"),
            ("drivers_lic", "y"),
            ("confidential_ind", "N"),
            ("registr_dt", "03/07/1994"),
            ("last_name", "LAMBERT"),
        ]);

        let parsed = parse_row(&row, &config).unwrap();
        assert_eq!(parsed.data["county_id"], FieldValue::Integer(92));
        assert_eq!(parsed.data["drivers_lic"], FieldValue::Bool(true));
        assert_eq!(parsed.data["confidential_ind"], FieldValue::Bool(false));
        assert_eq!(parsed.data["registr_dt"], FieldValue::from("1994-03-07"));
        assert_eq!(parsed.data["last_name"], FieldValue::from("LAMBERT"));
        assert_eq!(parsed.snapshot_dt, None);
    }

    #[test]
    fn test_snapshot_field_is_split_off() {
        let config = IngestConfig::default();
        let row = raw(&[("ncid", "AA1"), ("snapshot_dt", "2024-01-01 00:00:00")]);

        let parsed = parse_row(&row, &config).unwrap();
        assert!(!parsed.data.contains_key("snapshot_dt"));
        assert_eq!(
            parsed.snapshot_dt,
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_snapshot_formats() {
        let expected = Utc.with_ymd_and_hms(2016, 11, 8, 0, 0, 0).unwrap();
        assert_eq!(parse_snapshot_dt("2016-11-08"), Some(expected));
        assert_eq!(parse_snapshot_dt("11/08/2016"), Some(expected));
        assert_eq!(parse_snapshot_dt("2016-11-08 00:00:00"), Some(expected));
        assert_eq!(parse_snapshot_dt("yesterday"), None);
    }

    #[test]
    fn test_invalid_integer_is_row_error() {
        let config = IngestConfig::default();
        let row = raw(&[("ncid", "AA1"), ("county_id", "WAKE")]);
        let err = parse_row(&row, &config).unwrap_err();
        assert!(matches!(err, RowError::InvalidValue { ref field, .. } if field == "county_id"));
    }
}
