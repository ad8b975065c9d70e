use crate::errors::{StoreError, StoreResult};
use crate::model::{Group, GroupRef, NewResult, ResultData, ResultRecord, TestCase};
use crate::query::{encode_token, Page, QueryFilter, ResultPage};
use rusqlite::{params, Connection};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Hard cap on page size; callers asking for more get clamped.
pub const MAX_PAGE_SIZE: u32 = 250;

#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
    // Monotonic within the process: same-millisecond inserts still get ids
    // consistent with creation order, which the pagination tie-break relies on.
    ids: Arc<Mutex<ulid::Generator>>,
}

struct BaseRow {
    id: String,
    testcase_name: String,
    testcase_ref_url: Option<String>,
    outcome: String,
    note: Option<String>,
    ref_url: Option<String>,
    submit_time: i64,
}

impl Store {
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            ids: Arc::new(Mutex::new(ulid::Generator::new())),
        })
    }

    pub fn memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            ids: Arc::new(Mutex::new(ulid::Generator::new())),
        })
    }

    fn next_id(&self) -> String {
        let mut generator = self.ids.lock().unwrap();
        // Random-part overflow within one millisecond is the only error case;
        // fall back to a fresh random ulid.
        generator
            .generate()
            .unwrap_or_else(|_| ulid::Ulid::new())
            .to_string()
    }

    pub fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(crate::storage::schema::DDL)?;
        Ok(())
    }

    /// Inserts one result with its metadata and group memberships in a single
    /// transaction. The testcase and any unseen groups are created on the
    /// way. Nothing is visible until commit; on any failure the whole call
    /// rolls back and at most zero results exist for it.
    pub fn create_result(&self, new: &NewResult) -> StoreResult<ResultRecord> {
        if new.testcase.trim().is_empty() {
            return Err(StoreError::Validation(
                "testcase name must be non-empty".into(),
            ));
        }
        if new.outcome.trim().is_empty() {
            return Err(StoreError::Validation("outcome must be non-empty".into()));
        }
        for g in &new.groups {
            if g.uuid.trim().is_empty() {
                return Err(StoreError::Validation(
                    "group uuid must be non-empty".into(),
                ));
            }
        }

        let id = self.next_id();
        let submit_time = chrono::Utc::now().timestamp_millis();

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        upsert_testcase(&tx, &new.testcase, new.testcase_ref_url.as_deref())?;
        for g in &new.groups {
            upsert_group(&tx, g)?;
        }

        tx.execute(
            "INSERT INTO results(id, testcase_name, outcome, note, ref_url, submit_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![id, new.testcase, new.outcome, new.note, new.ref_url, submit_time],
        )?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO result_data(result_id, key, value) VALUES (?1, ?2, ?3)",
            )?;
            for (key, value) in &new.data {
                stmt.execute(params![id, key, value])?;
            }
        }
        {
            let mut stmt = tx.prepare(
                "INSERT INTO result_groups(result_id, group_uuid) VALUES (?1, ?2)
                 ON CONFLICT(result_id, group_uuid) DO NOTHING",
            )?;
            for g in &new.groups {
                stmt.execute(params![id, g.uuid])?;
            }
        }

        let record = fetch_result(&tx, &id)?.ok_or_else(|| {
            StoreError::Storage(rusqlite::Error::QueryReturnedNoRows)
        })?;
        tx.commit()?;

        debug!(result_id = %record.id, testcase = %record.testcase.name, outcome = %record.outcome, "result created");
        Ok(record)
    }

    pub fn get_result(&self, id: &str) -> StoreResult<ResultRecord> {
        let conn = self.conn.lock().unwrap();
        fetch_result(&conn, id)?.ok_or_else(|| StoreError::NotFound(format!("result {id}")))
    }

    pub fn get_testcase(&self, name: &str) -> StoreResult<TestCase> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT name, ref_url FROM testcases WHERE name = ?1")?;
        let mut rows = stmt.query(params![name])?;
        if let Some(row) = rows.next()? {
            Ok(TestCase {
                name: row.get(0)?,
                ref_url: row.get(1)?,
            })
        } else {
            Err(StoreError::NotFound(format!("testcase {name}")))
        }
    }

    pub fn get_group(&self, uuid: &str) -> StoreResult<Group> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT uuid, description, ref_url FROM groups WHERE uuid = ?1")?;
        let mut rows = stmt.query(params![uuid])?;
        if let Some(row) = rows.next()? {
            Ok(Group {
                uuid: row.get(0)?,
                description: row.get(1)?,
                ref_url: row.get(2)?,
            })
        } else {
            Err(StoreError::NotFound(format!("group {uuid}")))
        }
    }

    /// Explicit upsert entry point; also used implicitly by create_result.
    pub fn ensure_testcase(&self, name: &str, ref_url: Option<&str>) -> StoreResult<TestCase> {
        if name.trim().is_empty() {
            return Err(StoreError::Validation(
                "testcase name must be non-empty".into(),
            ));
        }
        {
            let conn = self.conn.lock().unwrap();
            upsert_testcase(&conn, name, ref_url)?;
        }
        self.get_testcase(name)
    }

    /// Upserts a group; a missing uuid gets a generated one.
    pub fn ensure_group(&self, group: &GroupRef) -> StoreResult<Group> {
        let mut g = group.clone();
        if g.uuid.trim().is_empty() {
            g.uuid = ulid::Ulid::new().to_string();
        }
        {
            let conn = self.conn.lock().unwrap();
            upsert_group(&conn, &g)?;
        }
        self.get_group(&g.uuid)
    }

    pub fn list_testcases(&self, prefix: Option<&str>) -> StoreResult<Vec<TestCase>> {
        let conn = self.conn.lock().unwrap();
        let (sql, pattern) = match prefix {
            Some(p) => (
                "SELECT name, ref_url FROM testcases WHERE name LIKE ?1 ESCAPE '\\' ORDER BY name",
                Some(format!("{}%", crate::query::escape_like(p))),
            ),
            None => ("SELECT name, ref_url FROM testcases ORDER BY name", None),
        };
        let mut stmt = conn.prepare(sql)?;
        let mapper = |row: &rusqlite::Row| {
            Ok(TestCase {
                name: row.get(0)?,
                ref_url: row.get(1)?,
            })
        };
        let rows = match &pattern {
            Some(p) => stmt.query_map(params![p], mapper)?,
            None => stmt.query_map([], mapper)?,
        };
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn list_groups(&self) -> StoreResult<Vec<Group>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT uuid, description, ref_url FROM groups ORDER BY uuid")?;
        let rows = stmt.query_map([], |row| {
            Ok(Group {
                uuid: row.get(0)?,
                description: row.get(1)?,
                ref_url: row.get(2)?,
            })
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    /// Cursor-paged query. Ordering is (submit_time, id), descending unless
    /// asked otherwise; the id tie-break keeps pages stable under identical
    /// timestamps. The returned token resumes strictly after the last row of
    /// this page, so already-returned rows never reappear.
    pub fn query_results(&self, filter: &QueryFilter, page: &Page) -> StoreResult<ResultPage> {
        let limit = page.limit.clamp(1, MAX_PAGE_SIZE) as usize;
        let (mut clauses, mut values) = filter.to_sql()?;

        if let Some(token) = &page.token {
            let (t, id) = crate::query::decode_token(token)?;
            if page.ascending {
                clauses.push("(r.submit_time > ? OR (r.submit_time = ? AND r.id > ?))".into());
            } else {
                clauses.push("(r.submit_time < ? OR (r.submit_time = ? AND r.id < ?))".into());
            }
            values.push(Box::new(t));
            values.push(Box::new(t));
            values.push(Box::new(id));
        }

        let conn = self.conn.lock().unwrap();
        let mut bases = select_results(
            &conn,
            &clauses,
            &values,
            page.ascending,
            Some(limit as i64 + 1),
        )?;

        let has_more = bases.len() > limit;
        bases.truncate(limit);

        let next_token = if has_more {
            bases
                .last()
                .map(|b| encode_token(b.submit_time, &b.id))
        } else {
            None
        };

        let mut results = Vec::with_capacity(bases.len());
        for base in bases {
            results.push(hydrate(&conn, base)?);
        }

        Ok(ResultPage {
            results,
            next_token,
        })
    }

    /// Newest result per testcase among those matching the filter.
    pub fn latest_results(&self, filter: &QueryFilter) -> StoreResult<Vec<ResultRecord>> {
        let (clauses, values) = filter.to_sql()?;
        let conn = self.conn.lock().unwrap();
        let bases = select_results(&conn, &clauses, &values, false, None)?;

        let mut seen: HashSet<String> = HashSet::new();
        let mut results = Vec::new();
        for base in bases {
            if seen.insert(base.testcase_name.clone()) {
                results.push(hydrate(&conn, base)?);
            }
        }
        Ok(results)
    }
}

const BASE_SELECT: &str = "SELECT r.id, r.testcase_name, t.ref_url, r.outcome, r.note, r.ref_url, r.submit_time \
     FROM results r JOIN testcases t ON t.name = r.testcase_name";

fn select_results(
    conn: &Connection,
    clauses: &[String],
    values: &[Box<dyn rusqlite::ToSql>],
    ascending: bool,
    limit: Option<i64>,
) -> StoreResult<Vec<BaseRow>> {
    let mut sql = String::from(BASE_SELECT);
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(if ascending {
        " ORDER BY r.submit_time ASC, r.id ASC"
    } else {
        " ORDER BY r.submit_time DESC, r.id DESC"
    });

    let mut owned_limit: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
    if let Some(n) = limit {
        sql.push_str(" LIMIT ?");
        owned_limit.push(Box::new(n));
    }

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        rusqlite::params_from_iter(values.iter().chain(owned_limit.iter())),
        |row| {
            Ok(BaseRow {
                id: row.get(0)?,
                testcase_name: row.get(1)?,
                testcase_ref_url: row.get(2)?,
                outcome: row.get(3)?,
                note: row.get(4)?,
                ref_url: row.get(5)?,
                submit_time: row.get(6)?,
            })
        },
    )?;

    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

fn fetch_result(conn: &Connection, id: &str) -> StoreResult<Option<ResultRecord>> {
    let sql = format!("{BASE_SELECT} WHERE r.id = ?1");
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params![id])?;
    let Some(row) = rows.next()? else {
        return Ok(None);
    };
    let base = BaseRow {
        id: row.get(0)?,
        testcase_name: row.get(1)?,
        testcase_ref_url: row.get(2)?,
        outcome: row.get(3)?,
        note: row.get(4)?,
        ref_url: row.get(5)?,
        submit_time: row.get(6)?,
    };
    drop(rows);
    drop(stmt);
    Ok(Some(hydrate(conn, base)?))
}

fn hydrate(conn: &Connection, base: BaseRow) -> StoreResult<ResultRecord> {
    let data = load_data(conn, &base.id)?;
    let groups = load_groups(conn, &base.id)?;
    Ok(ResultRecord {
        id: base.id,
        testcase: TestCase {
            name: base.testcase_name,
            ref_url: base.testcase_ref_url,
        },
        outcome: base.outcome,
        note: base.note,
        ref_url: base.ref_url,
        submit_time: base.submit_time,
        groups,
        data,
    })
}

fn load_data(conn: &Connection, result_id: &str) -> StoreResult<ResultData> {
    let mut stmt = conn
        .prepare("SELECT key, value FROM result_data WHERE result_id = ?1 ORDER BY id ASC")?;
    let rows = stmt.query_map(params![result_id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    let mut data = ResultData::new();
    for r in rows {
        let (key, value) = r?;
        data.entry(key).or_default().push(value);
    }
    Ok(data)
}

fn load_groups(conn: &Connection, result_id: &str) -> StoreResult<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT group_uuid FROM result_groups WHERE result_id = ?1 ORDER BY rowid ASC",
    )?;
    let rows = stmt.query_map(params![result_id], |row| row.get::<_, String>(0))?;
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

/// Resolve-by-unique-key with insert-on-conflict: races on the name collapse
/// onto the unique constraint instead of producing duplicates. A supplied
/// ref_url replaces the stored one; absence leaves it untouched.
fn upsert_testcase(
    conn: &Connection,
    name: &str,
    ref_url: Option<&str>,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO testcases(name, ref_url) VALUES (?1, ?2)
         ON CONFLICT(name) DO UPDATE SET ref_url = COALESCE(excluded.ref_url, testcases.ref_url)",
        params![name, ref_url],
    )?;
    Ok(())
}

fn upsert_group(conn: &Connection, group: &GroupRef) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO groups(uuid, description, ref_url) VALUES (?1, ?2, ?3)
         ON CONFLICT(uuid) DO UPDATE SET
            description = COALESCE(excluded.description, groups.description),
            ref_url = COALESCE(excluded.ref_url, groups.ref_url)",
        params![group.uuid, group.description, group.ref_url],
    )?;
    Ok(())
}
