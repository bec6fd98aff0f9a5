use serde::de::DeserializeOwned;

use crate::error::StoreError;

/// Get a required column value from a row, returning CorruptRow on failure.
pub fn get<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    row.get(idx).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: e.to_string(),
    })
}

/// Decode a JSON text column into `T`.
pub fn parse_json<T: DeserializeOwned>(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: format!("invalid JSON: {e}"),
    })
}

/// Parse a string into an enum, returning CorruptRow on failure.
pub fn parse_enum<T: std::str::FromStr>(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    raw.parse().map_err(|_| StoreError::CorruptRow {
        table,
        column,
        detail: format!("unknown variant: {raw}"),
    })
}

/// Parse an RFC 3339 timestamp column.
pub fn parse_timestamp(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<chrono::DateTime<chrono::Utc>, StoreError> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&chrono::Utc))
        .map_err(|e| StoreError::CorruptRow {
            table,
            column,
            detail: format!("invalid timestamp {raw}: {e}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoints::StepKind;

    #[test]
    fn parse_enum_success() {
        let kind: StepKind = parse_enum("dispatch", "checkpoints", "node").unwrap();
        assert_eq!(kind, StepKind::Dispatch);
    }

    #[test]
    fn parse_enum_failure() {
        let result: Result<StepKind, _> = parse_enum("INVALID", "checkpoints", "node");
        assert!(matches!(
            result,
            Err(StoreError::CorruptRow { table: "checkpoints", column: "node", .. })
        ));
    }

    #[test]
    fn parse_json_typed() {
        let v: Vec<u32> = parse_json("[1,2,3]", "writes", "message").unwrap();
        assert_eq!(v, vec![1, 2, 3]);
    }

    #[test]
    fn parse_json_failure() {
        let result: Result<serde_json::Value, _> = parse_json("not valid json", "checkpoints", "state");
        assert!(matches!(
            result,
            Err(StoreError::CorruptRow { table: "checkpoints", column: "state", .. })
        ));
    }

    #[test]
    fn parse_timestamp_roundtrip() {
        let now = chrono::Utc::now();
        let parsed = parse_timestamp(&now.to_rfc3339(), "checkpoints", "created_at").unwrap();
        assert_eq!(parsed, now);
        assert!(parse_timestamp("yesterday", "checkpoints", "created_at").is_err());
    }
}
