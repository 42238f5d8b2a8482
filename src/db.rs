use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{types::ToSql, Connection};

use crate::fields::{is_safe_identifier, FieldSpec};

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }
    }
    let conn = Connection::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS pdf_pages (
            id                     INTEGER PRIMARY KEY,
            jpg_filename           TEXT UNIQUE NOT NULL,
            form_type              TEXT,
            firstname_gemini_8qf   TEXT,
            lastname_gemini_8qf    TEXT,
            date_signed_gemini_8qf TEXT,
            dob_gemini_8850        TEXT,
            street_address         TEXT,
            street2_gemini_8850    TEXT,
            city_gemini_8850       TEXT,
            zip_gemini_8850        TEXT,
            extracted_ssn          TEXT,
            state_gemini           TEXT,
            signature_name         TEXT,
            form_is_signed         TEXT,
            worked_before          TEXT,
            snap_benefits          TEXT,
            snap_3_of_5_months     TEXT,
            tanf_welfare           TEXT,
            ssi_benefits           TEXT,
            unemployed_27_weeks    TEXT,
            ticket_to_work         TEXT,
            felony_conviction      TEXT,
            veteran                TEXT,
            nyyf_high_school       TEXT,
            nyyf_hse_program       TEXT,
            nyyf_any_statement_true TEXT,
            nyyf_minor_with_permission TEXT,
            nyyf_working_papers    TEXT,
            nyyf_age_18_to_24      TEXT,
            created_at             TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_pdf_pages_form_type ON pdf_pages(form_type);

        CREATE TABLE IF NOT EXISTS extraction_runs (
            run_id       TEXT NOT NULL,
            field        TEXT NOT NULL,
            started_at   TEXT NOT NULL,
            finished_at  TEXT NOT NULL,
            batches      INTEGER NOT NULL,
            selected     INTEGER NOT NULL,
            succeeded    INTEGER NOT NULL,
            not_found    INTEGER NOT NULL,
            invalid      INTEGER NOT NULL,
            errors       INTEGER NOT NULL,
            written      INTEGER NOT NULL,
            failed_batches INTEGER NOT NULL,
            PRIMARY KEY (run_id, field)
        );
        ",
    )?;
    Ok(())
}

// ── Ingestion ──

/// Insert image references; existing filenames are left untouched.
pub fn insert_pages(conn: &Connection, pages: &[(String, Option<String>)]) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut count = 0;
    {
        let mut stmt =
            tx.prepare("INSERT OR IGNORE INTO pdf_pages (jpg_filename, form_type) VALUES (?1, ?2)")?;
        for (reference, form_type) in pages {
            count += stmt.execute(rusqlite::params![reference, form_type])?;
        }
    }
    tx.commit()?;
    Ok(count)
}

// ── Work selection ──

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRecord {
    pub id: i64,
    pub image_reference: String,
    pub form_type: Option<String>,
}

fn checked_column(field: &FieldSpec) -> Result<&'static str> {
    anyhow::ensure!(
        is_safe_identifier(field.column),
        "refusing unsafe column name {:?}",
        field.column
    );
    Ok(field.column)
}

/// `WHERE` clause and params selecting rows still pending for `field`.
fn pending_filter(field: &FieldSpec) -> Result<(String, Vec<Box<dyn ToSql>>)> {
    let column = checked_column(field)?;
    let mut clause = format!("{} IS NULL", column);
    let mut params: Vec<Box<dyn ToSql>> = Vec::new();
    if !field.form_types.is_empty() {
        let placeholders: Vec<String> = field
            .form_types
            .iter()
            .map(|ft| {
                params.push(Box::new(ft.to_string()));
                format!("?{}", params.len())
            })
            .collect();
        clause.push_str(&format!(" AND form_type IN ({})", placeholders.join(", ")));
    }
    Ok((clause, params))
}

pub fn select_pending(conn: &Connection, field: &FieldSpec, limit: usize) -> Result<Vec<PendingRecord>> {
    select_pending_after(conn, field, None, limit)
}

/// Pending rows with `id > after`, in id order. The driver advances `after` so a
/// single run never revisits a row it already tried.
pub fn select_pending_after(
    conn: &Connection,
    field: &FieldSpec,
    after: Option<i64>,
    limit: usize,
) -> Result<Vec<PendingRecord>> {
    anyhow::ensure!(limit > 0, "batch limit must be positive");
    let (mut clause, mut params) = pending_filter(field)?;
    if let Some(after) = after {
        params.push(Box::new(after));
        clause.push_str(&format!(" AND id > ?{}", params.len()));
    }
    let sql = format!(
        "SELECT id, jpg_filename, form_type FROM pdf_pages WHERE {} ORDER BY id LIMIT {}",
        clause, limit
    );
    let mut stmt = conn.prepare(&sql)?;
    let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let rows = stmt
        .query_map(param_refs.as_slice(), |row| {
            Ok(PendingRecord {
                id: row.get(0)?,
                image_reference: row.get(1)?,
                form_type: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn count_pending(conn: &Connection, field: &FieldSpec) -> Result<usize> {
    let (clause, params) = pending_filter(field)?;
    let sql = format!("SELECT COUNT(*) FROM pdf_pages WHERE {}", clause);
    let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let n: usize = conn.query_row(&sql, param_refs.as_slice(), |r| r.get(0))?;
    Ok(n)
}

pub fn count_filled(conn: &Connection, field: &FieldSpec) -> Result<usize> {
    let column = checked_column(field)?;
    let sql = format!("SELECT COUNT(*) FROM pdf_pages WHERE {} IS NOT NULL", column);
    let n: usize = conn.query_row(&sql, [], |r| r.get(0))?;
    Ok(n)
}

/// Pending counts per form type, largest first.
pub fn pending_by_form_type(conn: &Connection, field: &FieldSpec) -> Result<Vec<(String, usize)>> {
    let (clause, params) = pending_filter(field)?;
    let sql = format!(
        "SELECT COALESCE(form_type, '(none)'), COUNT(*) FROM pdf_pages WHERE {}
         GROUP BY form_type ORDER BY COUNT(*) DESC, form_type",
        clause
    );
    let mut stmt = conn.prepare(&sql)?;
    let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let rows = stmt
        .query_map(param_refs.as_slice(), |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Write-back ──

/// Keyed update of one column inside a single transaction. Any failing row
/// rolls back every row in `pairs`.
pub fn update_column(
    conn: &Connection,
    column: &str,
    pairs: &[(String, i64)],
) -> rusqlite::Result<usize> {
    if !is_safe_identifier(column) {
        return Err(rusqlite::Error::InvalidColumnName(column.to_string()));
    }
    let tx = conn.unchecked_transaction()?;
    let mut count = 0;
    {
        let sql = format!("UPDATE pdf_pages SET {} = ?1 WHERE id = ?2", column);
        let mut stmt = tx.prepare(&sql)?;
        for (value, id) in pairs {
            count += stmt.execute(rusqlite::params![value, id])?;
        }
    }
    tx.commit()?;
    Ok(count)
}

#[cfg(test)]
pub fn field_value(conn: &Connection, column: &str, id: i64) -> Result<Option<String>> {
    anyhow::ensure!(is_safe_identifier(column), "refusing unsafe column name {:?}", column);
    let sql = format!("SELECT {} FROM pdf_pages WHERE id = ?1", column);
    let value = conn.query_row(&sql, [id], |r| r.get(0))?;
    Ok(value)
}

// ── Run log ──

pub struct RunRow<'a> {
    pub run_id: &'a str,
    pub field: &'a str,
    pub started_at: String,
    pub finished_at: String,
    pub batches: usize,
    pub selected: usize,
    pub succeeded: usize,
    pub not_found: usize,
    pub invalid: usize,
    pub errors: usize,
    pub written: usize,
    pub failed_batches: usize,
}

pub fn insert_run(conn: &Connection, row: &RunRow) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO extraction_runs
         (run_id, field, started_at, finished_at, batches, selected, succeeded,
          not_found, invalid, errors, written, failed_batches)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        rusqlite::params![
            row.run_id,
            row.field,
            row.started_at,
            row.finished_at,
            row.batches as i64,
            row.selected as i64,
            row.succeeded as i64,
            row.not_found as i64,
            row.invalid as i64,
            row.errors as i64,
            row.written as i64,
            row.failed_batches as i64,
        ],
    )?;
    Ok(())
}

// ── Schema dump ──

pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
}

pub fn table_structure(conn: &Connection) -> Result<Vec<(String, Vec<ColumnInfo>)>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let tables = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut out = Vec::with_capacity(tables.len());
    for table in tables {
        let mut info = conn.prepare(&format!("PRAGMA table_info(\"{}\")", table.replace('"', "\"\"")))?;
        let columns = info
            .query_map([], |row| {
                let not_null: i64 = row.get(3)?;
                let pk: i64 = row.get(5)?;
                Ok(ColumnInfo {
                    name: row.get(1)?,
                    data_type: row.get(2)?,
                    nullable: not_null == 0 && pk == 0,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        out.push((table, columns));
    }
    Ok(out)
}

#[cfg(test)]
pub fn test_conn() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    init_schema(&conn).unwrap();
    conn
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::{catalog, find};

    fn seed(conn: &Connection) {
        insert_pages(
            conn,
            &[
                ("a.jpg".to_string(), Some("8850 Form".to_string())),
                ("b.jpg".to_string(), Some("8 Question Form".to_string())),
                ("c.jpg".to_string(), Some("8850 Form".to_string())),
                ("d.jpg".to_string(), None),
            ],
        )
        .unwrap();
    }

    #[test]
    fn schema_has_every_catalog_column() {
        let conn = test_conn();
        let tables = table_structure(&conn).unwrap();
        let (_, cols) = tables.iter().find(|(t, _)| t == "pdf_pages").unwrap();
        for f in catalog() {
            assert!(cols.iter().any(|c| c.name == f.column), "missing {}", f.column);
        }
        let id = cols.iter().find(|c| c.name == "id").unwrap();
        assert!(!id.nullable);
    }

    #[test]
    fn insert_pages_ignores_duplicates() {
        let conn = test_conn();
        seed(&conn);
        let n = insert_pages(&conn, &[("a.jpg".to_string(), None), ("e.jpg".to_string(), None)]).unwrap();
        assert_eq!(n, 1);
    }

    #[test]
    fn select_pending_filters_by_null_column_and_form_type() {
        let conn = test_conn();
        seed(&conn);
        let zip = find("zip_8850").unwrap();
        let rows = select_pending(&conn, zip, 100).unwrap();
        let refs: Vec<&str> = rows.iter().map(|r| r.image_reference.as_str()).collect();
        assert_eq!(refs, vec!["a.jpg", "c.jpg"]);

        update_column(&conn, zip.column, &[("12345".to_string(), rows[0].id)]).unwrap();
        let rows = select_pending(&conn, zip, 100).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].image_reference, "c.jpg");
    }

    #[test]
    fn multi_form_type_filter_and_limit() {
        let conn = test_conn();
        seed(&conn);
        let ssn = find("ssn").unwrap();
        assert_eq!(count_pending(&conn, ssn).unwrap(), 3);
        assert_eq!(select_pending(&conn, ssn, 2).unwrap().len(), 2);
        let by_type = pending_by_form_type(&conn, ssn).unwrap();
        assert_eq!(by_type[0], ("8850 Form".to_string(), 2));
    }

    #[test]
    fn classifier_claims_rows_without_form_type() {
        let conn = test_conn();
        seed(&conn);
        let classifier = find("form_type").unwrap();
        let rows = select_pending(&conn, classifier, 100).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].image_reference, "d.jpg");
    }

    #[test]
    fn cursor_skips_earlier_ids() {
        let conn = test_conn();
        seed(&conn);
        let zip = find("zip_8850").unwrap();
        let first = select_pending(&conn, zip, 1).unwrap();
        let rest = select_pending_after(&conn, zip, Some(first[0].id), 10).unwrap();
        assert_eq!(rest.len(), 1);
        assert!(rest[0].id > first[0].id);
    }

    #[test]
    fn update_column_rejects_unsafe_names() {
        let conn = test_conn();
        assert!(update_column(&conn, "zip; DROP TABLE pdf_pages", &[]).is_err());
    }

    #[test]
    fn run_rows_round_trip_counts() {
        let conn = test_conn();
        insert_run(
            &conn,
            &RunRow {
                run_id: "run-1",
                field: "zip_8850",
                started_at: "a".into(),
                finished_at: "b".into(),
                batches: 1,
                selected: 3,
                succeeded: 2,
                not_found: 1,
                invalid: 0,
                errors: 0,
                written: 2,
                failed_batches: 0,
            },
        )
        .unwrap();
        let written: i64 = conn
            .query_row("SELECT written FROM extraction_runs WHERE run_id = 'run-1'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(written, 2);
    }
}
