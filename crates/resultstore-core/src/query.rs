use crate::errors::{StoreError, StoreResult};
use crate::model::ResultRecord;
use rusqlite::ToSql;
use serde::Serialize;

/// Filter criteria for result queries. Values within one field are OR'd,
/// distinct fields are AND'd.
#[derive(Debug, Clone, Default)]
pub struct QueryFilter {
    /// Exact testcase names.
    pub testcases: Vec<String>,
    /// Testcase name prefix match.
    pub testcase_prefix: Option<String>,
    pub outcomes: Vec<String>,
    pub groups: Vec<String>,
    /// Metadata key -> accepted values. Repeated keys in the source query
    /// collapse into one entry with multiple values (OR within the key).
    pub data: Vec<(String, Vec<String>)>,
    /// Inclusive lower bound on submit_time (UTC millis).
    pub since: Option<i64>,
    /// Exclusive upper bound on submit_time (UTC millis).
    pub until: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct Page {
    pub limit: u32,
    pub token: Option<String>,
    pub ascending: bool,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: 20,
            token: None,
            ascending: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultPage {
    pub results: Vec<ResultRecord>,
    /// Present when more rows exist; feed back in to resume after the last
    /// row of this page.
    pub next_token: Option<String>,
}

impl QueryFilter {
    /// Translates the filter into WHERE clauses plus positional parameters,
    /// in matching order. Clause text uses unnumbered placeholders so callers
    /// can append their own.
    pub(crate) fn to_sql(&self) -> StoreResult<(Vec<String>, Vec<Box<dyn ToSql>>)> {
        let mut clauses: Vec<String> = Vec::new();
        let mut values: Vec<Box<dyn ToSql>> = Vec::new();

        if !self.testcases.is_empty() {
            clauses.push(format!(
                "r.testcase_name IN ({})",
                placeholders(self.testcases.len())
            ));
            for name in &self.testcases {
                values.push(Box::new(name.clone()));
            }
        }

        if let Some(prefix) = &self.testcase_prefix {
            clauses.push("r.testcase_name LIKE ? ESCAPE '\\'".into());
            values.push(Box::new(format!("{}%", escape_like(prefix))));
        }

        if !self.outcomes.is_empty() {
            clauses.push(format!("r.outcome IN ({})", placeholders(self.outcomes.len())));
            for outcome in &self.outcomes {
                values.push(Box::new(outcome.clone()));
            }
        }

        if !self.groups.is_empty() {
            clauses.push(format!(
                "EXISTS (SELECT 1 FROM result_groups rg WHERE rg.result_id = r.id AND rg.group_uuid IN ({}))",
                placeholders(self.groups.len())
            ));
            for uuid in &self.groups {
                values.push(Box::new(uuid.clone()));
            }
        }

        for (key, accepted) in &self.data {
            if accepted.is_empty() {
                return Err(StoreError::Validation(format!(
                    "metadata filter '{key}' has no values"
                )));
            }
            clauses.push(format!(
                "EXISTS (SELECT 1 FROM result_data d WHERE d.result_id = r.id AND d.key = ? AND d.value IN ({}))",
                placeholders(accepted.len())
            ));
            values.push(Box::new(key.clone()));
            for v in accepted {
                values.push(Box::new(v.clone()));
            }
        }

        if let Some(since) = self.since {
            clauses.push("r.submit_time >= ?".into());
            values.push(Box::new(since));
        }
        if let Some(until) = self.until {
            clauses.push("r.submit_time < ?".into());
            values.push(Box::new(until));
        }

        Ok((clauses, values))
    }
}

fn placeholders(n: usize) -> String {
    let mut s = String::with_capacity(n * 2);
    for i in 0..n {
        if i > 0 {
            s.push(',');
        }
        s.push('?');
    }
    s
}

/// Escapes LIKE metacharacters so user input matches literally.
pub(crate) fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// The cursor token is the last-seen (submit_time, id) pair. Opaque to
/// callers; the shape is not a compatibility surface.
pub fn encode_token(submit_time: i64, id: &str) -> String {
    format!("{submit_time}:{id}")
}

pub(crate) fn decode_token(token: &str) -> StoreResult<(i64, String)> {
    let (t, id) = token
        .split_once(':')
        .ok_or_else(|| StoreError::Validation(format!("malformed page token '{token}'")))?;
    let submit_time: i64 = t
        .parse()
        .map_err(|_| StoreError::Validation(format!("malformed page token '{token}'")))?;
    if id.is_empty() {
        return Err(StoreError::Validation(format!(
            "malformed page token '{token}'"
        )));
    }
    Ok((submit_time, id.to_string()))
}
