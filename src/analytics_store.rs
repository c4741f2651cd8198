// =============================================================================
// AnalyticsStore — append-only, universe-scoped, schema-validated JSONL
// =============================================================================
//
// One file per stream per universe: logs/<universe>/equity.jsonl and
// logs/<universe>/trades.jsonl. Writes are serialized by a per-stream mutex
// and append with O_APPEND semantics so concurrent writers never interleave
// partial lines. Schema violations are a hard error, never a silent drop.
// =============================================================================

use std::fmt;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::universe::{log_path, Universe, ValidityClass};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaValidationError {
    UniverseMismatch { expected: String, got: String },
    MissingField(String),
    InvalidSide(String),
}

impl fmt::Display for SchemaValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaValidationError::UniverseMismatch { expected, got } => {
                write!(f, "universe mismatch: store is {expected}, record carries {got}")
            }
            SchemaValidationError::MissingField(field) => write!(f, "missing required field: {field}"),
            SchemaValidationError::InvalidSide(side) => write!(f, "invalid side '{side}', expected buy or sell"),
        }
    }
}

impl std::error::Error for SchemaValidationError {}

/// Parses a period string into a UTC cutoff. `None` means "no cutoff".
pub fn period_cutoff(period: &str) -> Option<DateTime<Utc>> {
    let period = period.trim();
    if period.is_empty() || period.eq_ignore_ascii_case("all") {
        return None;
    }
    if period.eq_ignore_ascii_case("ytd") {
        let now = Utc::now();
        return Some(Utc.with_ymd_and_hms(now.year(), 1, 1, 0, 0, 0).unwrap());
    }

    let (digits, unit) = period.split_at(period.len() - 1);
    let n: i64 = digits.parse().ok()?;
    let now = Utc::now();
    match unit {
        "d" => Some(now - chrono::Duration::days(n)),
        "w" => Some(now - chrono::Duration::weeks(n)),
        "m" => Some(now - chrono::Duration::days(30 * n)),
        _ => None,
    }
}

fn tag_provenance(mut record: Value, universe: Universe) -> Result<Value, SchemaValidationError> {
    let obj = record.as_object_mut().expect("records are always JSON objects");

    match obj.get("universe") {
        Some(Value::String(u)) if u != &universe.to_string() => {
            return Err(SchemaValidationError::UniverseMismatch {
                expected: universe.to_string(),
                got: u.clone(),
            });
        }
        _ => {
            obj.insert("universe".to_string(), json!(universe.to_string()));
        }
    }

    let session_id = obj.get("session_id").and_then(Value::as_str).unwrap_or("").to_string();
    if session_id.is_empty() {
        return Err(SchemaValidationError::MissingField("session_id".to_string()));
    }

    match obj.get("data_lineage_id") {
        None | Some(Value::Null) => {
            obj.insert("data_lineage_id".to_string(), json!("unknown_lineage"));
        }
        Some(Value::String(s)) if s.is_empty() => {
            return Err(SchemaValidationError::MissingField("data_lineage_id".to_string()));
        }
        Some(_) => {}
    }

    if !obj.contains_key("validity_class") {
        let vc = match universe.default_validity_class() {
            ValidityClass::LiveVerified => "LIVE_VERIFIED",
            ValidityClass::PaperOnly => "PAPER_ONLY",
            ValidityClass::SimValidForTraining => "SIM_VALID_FOR_TRAINING",
            ValidityClass::SimInvalidForTraining => "SIM_INVALID_FOR_TRAINING",
        };
        obj.insert("validity_class".to_string(), json!(vc));
    }

    if !obj.contains_key("timestamp") {
        obj.insert("timestamp".to_string(), json!(Utc::now().to_rfc3339()));
    }

    Ok(record)
}

fn validate_trade(record: &Value) -> Result<(), SchemaValidationError> {
    let obj = record.as_object().expect("records are always JSON objects");
    let symbol = obj.get("symbol").and_then(Value::as_str).unwrap_or("");
    if symbol.is_empty() {
        return Err(SchemaValidationError::MissingField("symbol".to_string()));
    }
    let side = obj.get("side").and_then(Value::as_str).unwrap_or("");
    if side != "buy" && side != "sell" {
        return Err(SchemaValidationError::InvalidSide(side.to_string()));
    }
    Ok(())
}

/// Append-only, universe-scoped analytics persistence.
pub struct AnalyticsStore {
    pub universe: Universe,
    equity_path: PathBuf,
    trades_path: PathBuf,
    equity_lock: Mutex<()>,
    trades_lock: Mutex<()>,
}

impl AnalyticsStore {
    pub fn new(universe: Universe) -> Self {
        Self {
            universe,
            equity_path: log_path(universe, "equity.jsonl"),
            trades_path: log_path(universe, "trades.jsonl"),
            equity_lock: Mutex::new(()),
            trades_lock: Mutex::new(()),
        }
    }

    pub async fn record_equity(&self, snapshot: Value) -> Result<(), SchemaValidationError> {
        let record = tag_provenance(snapshot, self.universe)?;
        let _guard = self.equity_lock.lock().await;
        append_line(&self.equity_path, &record);
        Ok(())
    }

    pub async fn record_trade(&self, trade: Value) -> Result<(), SchemaValidationError> {
        let record = tag_provenance(trade, self.universe)?;
        validate_trade(&record)?;
        let _guard = self.trades_lock.lock().await;
        append_line(&self.trades_path, &record);
        Ok(())
    }

    pub fn load_equity(&self, period: &str) -> Vec<Value> {
        load_filtered(&self.equity_path, period, None)
    }

    pub fn load_trades(&self, period: &str, limit: Option<usize>) -> Vec<Value> {
        load_filtered(&self.trades_path, period, limit)
    }
}

fn append_line(path: &PathBuf, record: &Value) {
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let mut file = match OpenOptions::new().create(true).append(true).open(path) {
        Ok(f) => f,
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "failed to open analytics stream for append");
            return;
        }
    };
    if let Err(e) = writeln!(file, "{record}") {
        tracing::error!(path = %path.display(), error = %e, "failed to append analytics record");
    }
}

fn load_filtered(path: &PathBuf, period: &str, limit: Option<usize>) -> Vec<Value> {
    let cutoff = period_cutoff(period);
    let file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(_) => return Vec::new(),
    };
    let reader = BufReader::new(file);

    let mut rows: Vec<Value> = Vec::new();
    for line in reader.lines() {
        let Ok(line) = line else { continue };
        if line.trim().is_empty() {
            continue;
        }
        let Ok(value) = serde_json::from_str::<Value>(&line) else {
            tracing::warn!(path = %path.display(), "skipping malformed analytics line");
            continue;
        };

        if let Some(cutoff) = cutoff {
            let ts = value
                .get("timestamp")
                .and_then(Value::as_str)
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc));
            if let Some(ts) = ts {
                if ts < cutoff {
                    continue;
                }
            }
        }

        rows.push(value);
    }

    if let Some(limit) = limit {
        let start = rows.len().saturating_sub(limit);
        rows.split_off(start)
    } else {
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_cutoff_grammar() {
        assert!(period_cutoff("").is_none());
        assert!(period_cutoff("all").is_none());
        assert!(period_cutoff("ALL").is_none());

        let ytd = period_cutoff("ytd").unwrap();
        assert_eq!(ytd.month(), 1);
        assert_eq!(ytd.day(), 1);

        let thirty_days = period_cutoff("30d").unwrap();
        let expected = Utc::now() - chrono::Duration::days(30);
        assert!((thirty_days - expected).num_seconds().abs() < 2);
    }

    #[test]
    fn tag_provenance_fills_defaults() {
        let record = json!({ "session_id": "s1", "data_lineage_id": "l1" });
        let tagged = tag_provenance(record, Universe::Simulation).unwrap();
        assert_eq!(tagged["universe"], json!("simulation"));
        assert_eq!(tagged["validity_class"], json!("SIM_VALID_FOR_TRAINING"));
        assert!(tagged.get("timestamp").is_some());
    }

    #[test]
    fn tag_provenance_rejects_universe_mismatch() {
        let record = json!({ "universe": "live", "session_id": "s", "data_lineage_id": "l" });
        let err = tag_provenance(record, Universe::Paper).unwrap_err();
        assert!(matches!(err, SchemaValidationError::UniverseMismatch { .. }));
    }

    #[test]
    fn tag_provenance_requires_session_id() {
        let record = json!({ "data_lineage_id": "l" });
        let err = tag_provenance(record, Universe::Simulation).unwrap_err();
        assert_eq!(err, SchemaValidationError::MissingField("session_id".to_string()));
    }

    #[test]
    fn tag_provenance_defaults_absent_lineage_but_rejects_empty_lineage() {
        let absent = json!({ "session_id": "s1" });
        let tagged = tag_provenance(absent, Universe::Simulation).unwrap();
        assert_eq!(tagged["data_lineage_id"], json!("unknown_lineage"));

        let empty = json!({ "session_id": "s1", "data_lineage_id": "" });
        let err = tag_provenance(empty, Universe::Simulation).unwrap_err();
        assert_eq!(err, SchemaValidationError::MissingField("data_lineage_id".to_string()));
    }

    #[test]
    fn validate_trade_requires_symbol_and_side() {
        let ok = json!({ "symbol": "AAPL", "side": "buy" });
        assert!(validate_trade(&ok).is_ok());

        let bad_side = json!({ "symbol": "AAPL", "side": "short" });
        assert!(matches!(validate_trade(&bad_side), Err(SchemaValidationError::InvalidSide(_))));

        let no_symbol = json!({ "side": "buy" });
        assert!(matches!(validate_trade(&no_symbol), Err(SchemaValidationError::MissingField(_))));
    }
}
