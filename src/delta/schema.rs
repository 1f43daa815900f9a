// ABOUTME: Table layout and SQL dialect differences for the delta sync tables
// ABOUTME: Provisioning DDL, default extraction queries and placeholder styles per backend

use crate::utils::quote_ident;

/// Destination table holding one row per customer.
pub const DESTINATION_TABLE: &str = "acompanhamento_clientes";

/// Table holding one persisted watermark per sync key.
pub const WATERMARK_TABLE: &str = "etl_watermark";

pub const KEY_COLUMN: &str = "id_cliente";

pub const TIMESTAMP_COLUMN: &str = "atualizado_em";

/// Destination columns in the order values are bound.
pub const DESTINATION_COLUMNS: [&str; 5] = [KEY_COLUMN, "status", "substatus", "obs", TIMESTAMP_COLUMN];

const POSTGRES_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS acompanhamento_clientes (
    id_cliente    INTEGER PRIMARY KEY,
    status        TEXT,
    substatus     TEXT,
    obs           TEXT,
    atualizado_em TIMESTAMPTZ
);

CREATE TABLE IF NOT EXISTS etl_watermark (
    key     TEXT PRIMARY KEY,
    last_ts TIMESTAMPTZ
);
"#;

// Timestamps are fixed-width RFC 3339 UTC text so that text order is time order.
const SQLITE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS acompanhamento_clientes (
    id_cliente    INTEGER PRIMARY KEY,
    status        TEXT,
    substatus     TEXT,
    obs           TEXT,
    atualizado_em TEXT
);

CREATE TABLE IF NOT EXISTS etl_watermark (
    key     TEXT PRIMARY KEY,
    last_ts TEXT
);
"#;

/// SQL flavour spoken by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
    Sqlite,
}

impl Dialect {
    /// Bound parameter reference for 1-based position `n`.
    pub fn placeholder(self, n: usize) -> String {
        match self {
            Dialect::Postgres => format!("${}", n),
            Dialect::Sqlite => format!("?{}", n),
        }
    }

    /// Expression choosing the later of two timestamps, ignoring a NULL existing value.
    pub fn greatest(self, existing: &str, incoming: &str) -> String {
        match self {
            // GREATEST skips NULL arguments
            Dialect::Postgres => format!("GREATEST({}, {})", existing, incoming),
            // scalar max() returns NULL if any argument is NULL
            Dialect::Sqlite => format!("max(COALESCE({0}, {1}), {1})", existing, incoming),
        }
    }

    /// Most parameters one statement may bind.
    pub fn max_params(self) -> usize {
        match self {
            Dialect::Postgres => 65_000, // protocol limit is 65535
            Dialect::Sqlite => 32_000,   // SQLITE_MAX_VARIABLE_NUMBER is 32766
        }
    }

    /// Idempotent DDL creating the destination and watermark tables.
    pub fn create_tables_sql(self) -> &'static str {
        match self {
            Dialect::Postgres => POSTGRES_DDL,
            Dialect::Sqlite => SQLITE_DDL,
        }
    }

    /// Extraction query used when none is configured.
    ///
    /// Selects `(id_cliente, status, substatus, obs, atualizado_em)` strictly after
    /// the bound watermark.
    pub fn default_source_query(self) -> String {
        format!(
            "SELECT id_cliente, status, substatus, obs, atualizado_em \
             FROM cliente_acomp WHERE atualizado_em > {}",
            self.placeholder(1)
        )
    }

    pub fn read_watermark_sql(self) -> String {
        format!(
            "SELECT last_ts FROM {} WHERE key = {}",
            WATERMARK_TABLE,
            self.placeholder(1)
        )
    }

    /// Single-row watermark upsert. The stored value never moves backwards.
    pub fn write_watermark_sql(self) -> String {
        let existing = format!("{}.last_ts", WATERMARK_TABLE);
        let incoming = match self {
            Dialect::Postgres => "EXCLUDED.last_ts",
            Dialect::Sqlite => "excluded.last_ts",
        };
        format!(
            "INSERT INTO {table} (key, last_ts) VALUES ({p1}, {p2}) \
             ON CONFLICT (key) DO UPDATE SET last_ts = {greatest}",
            table = WATERMARK_TABLE,
            p1 = self.placeholder(1),
            p2 = self.placeholder(2),
            greatest = self.greatest(&existing, incoming)
        )
    }
}

/// Rows per statement after capping `page_size` by the dialect's parameter limit.
pub fn effective_page_size(dialect: Dialect, page_size: usize) -> usize {
    let limit = std::cmp::max(1, dialect.max_params() / DESTINATION_COLUMNS.len());
    page_size.clamp(1, limit)
}

/// Build the multi-row upsert for one page of `num_rows` records.
///
/// Generates a query like:
/// ```sql
/// INSERT INTO "acompanhamento_clientes" ("id_cliente", "status", "substatus", "obs", "atualizado_em")
/// VALUES ($1, $2, $3, $4, $5), ($6, $7, $8, $9, $10)
/// ON CONFLICT ("id_cliente") DO UPDATE SET
///   "status" = EXCLUDED."status",
///   "substatus" = EXCLUDED."substatus",
///   "obs" = EXCLUDED."obs",
///   "atualizado_em" = GREATEST("acompanhamento_clientes"."atualizado_em", EXCLUDED."atualizado_em")
/// ```
///
/// Status columns always take the incoming value, even when the incoming
/// timestamp is older than the stored one; only the timestamp is monotonic.
pub fn build_upsert_query(dialect: Dialect, num_rows: usize) -> String {
    let quoted_columns: Vec<String> = DESTINATION_COLUMNS.iter().map(|c| quote_ident(c)).collect();
    let excluded = match dialect {
        Dialect::Postgres => "EXCLUDED",
        Dialect::Sqlite => "excluded",
    };

    let num_cols = DESTINATION_COLUMNS.len();
    let value_rows: Vec<String> = (0..num_rows)
        .map(|row_idx| {
            let placeholders: Vec<String> = (0..num_cols)
                .map(|col_idx| dialect.placeholder(row_idx * num_cols + col_idx + 1))
                .collect();
            format!("({})", placeholders.join(", "))
        })
        .collect();

    let mut update_columns: Vec<String> = DESTINATION_COLUMNS
        .iter()
        .filter(|c| **c != KEY_COLUMN && **c != TIMESTAMP_COLUMN)
        .map(|c| format!("{0} = {1}.{0}", quote_ident(c), excluded))
        .collect();

    let ts = quote_ident(TIMESTAMP_COLUMN);
    update_columns.push(format!(
        "{} = {}",
        ts,
        dialect.greatest(
            &format!("{}.{}", quote_ident(DESTINATION_TABLE), ts),
            &format!("{}.{}", excluded, ts)
        )
    ));

    format!(
        "INSERT INTO {} ({}) VALUES {} ON CONFLICT ({}) DO UPDATE SET {}",
        quote_ident(DESTINATION_TABLE),
        quoted_columns.join(", "),
        value_rows.join(", "),
        quote_ident(KEY_COLUMN),
        update_columns.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_upsert_query_single_row() {
        let query = build_upsert_query(Dialect::Postgres, 1);

        assert!(query.starts_with("INSERT INTO \"acompanhamento_clientes\""));
        assert!(query.contains(
            "(\"id_cliente\", \"status\", \"substatus\", \"obs\", \"atualizado_em\")"
        ));
        assert!(query.contains("VALUES ($1, $2, $3, $4, $5)"));
        assert!(query.contains("ON CONFLICT (\"id_cliente\") DO UPDATE SET"));
        assert!(query.contains("\"status\" = EXCLUDED.\"status\""));
        assert!(query.contains("\"obs\" = EXCLUDED.\"obs\""));
        assert!(query.contains(
            "\"atualizado_em\" = GREATEST(\"acompanhamento_clientes\".\"atualizado_em\", EXCLUDED.\"atualizado_em\")"
        ));
        assert!(!query.contains("\"id_cliente\" = EXCLUDED"));
    }

    #[test]
    fn test_build_upsert_query_multiple_rows() {
        let query = build_upsert_query(Dialect::Postgres, 2);
        assert!(query.contains("($1, $2, $3, $4, $5), ($6, $7, $8, $9, $10)"));
    }

    #[test]
    fn test_build_upsert_query_sqlite() {
        let query = build_upsert_query(Dialect::Sqlite, 2);
        assert!(query.contains("(?1, ?2, ?3, ?4, ?5), (?6, ?7, ?8, ?9, ?10)"));
        assert!(query.contains("\"substatus\" = excluded.\"substatus\""));
        assert!(query.contains(
            "max(COALESCE(\"acompanhamento_clientes\".\"atualizado_em\", excluded.\"atualizado_em\"), excluded.\"atualizado_em\")"
        ));
    }

    #[test]
    fn test_effective_page_size_caps_by_params() {
        assert_eq!(effective_page_size(Dialect::Postgres, 1000), 1000);
        assert_eq!(effective_page_size(Dialect::Postgres, 100_000), 13_000);
        assert_eq!(effective_page_size(Dialect::Sqlite, 100_000), 6_400);
        assert_eq!(effective_page_size(Dialect::Sqlite, 0), 1);
    }

    #[test]
    fn test_default_source_query_is_exclusive() {
        assert!(Dialect::Postgres
            .default_source_query()
            .ends_with("WHERE atualizado_em > $1"));
        assert!(Dialect::Sqlite
            .default_source_query()
            .ends_with("WHERE atualizado_em > ?1"));
    }

    #[test]
    fn test_write_watermark_sql_is_monotonic() {
        let sql = Dialect::Postgres.write_watermark_sql();
        assert!(sql.contains("ON CONFLICT (key) DO UPDATE"));
        assert!(sql.contains("GREATEST(etl_watermark.last_ts, EXCLUDED.last_ts)"));

        let sql = Dialect::Sqlite.write_watermark_sql();
        assert!(sql.contains("VALUES (?1, ?2)"));
        assert!(sql.contains("max(COALESCE(etl_watermark.last_ts, excluded.last_ts), excluded.last_ts)"));
    }

    #[test]
    fn test_ddl_creates_both_tables() {
        for dialect in [Dialect::Postgres, Dialect::Sqlite] {
            let ddl = dialect.create_tables_sql();
            assert!(ddl.contains("CREATE TABLE IF NOT EXISTS acompanhamento_clientes"));
            assert!(ddl.contains("CREATE TABLE IF NOT EXISTS etl_watermark"));
        }
    }
}
