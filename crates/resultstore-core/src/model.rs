use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metadata attached to a result: key -> values in insertion order.
/// Keys are non-unique; a key may carry several values.
pub type ResultData = BTreeMap<String, Vec<String>>;

/// Outcomes commonly emitted by CI pipelines. The outcome field itself is an
/// open string; this list exists only for display and CLI hints.
pub const COMMON_OUTCOMES: &[&str] = &[
    "PASSED",
    "INFO",
    "FAILED",
    "ERROR",
    "ABORTED",
    "NEEDS_INSPECTION",
];

/// A named, reusable check. Created lazily the first time a result
/// references an unseen name. Only ref_url is mutable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub name: String,
    pub ref_url: Option<String>,
}

/// A batch/run grouping related results (e.g. one pipeline execution).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub uuid: String,
    pub description: Option<String>,
    pub ref_url: Option<String>,
}

/// One immutable outcome record. There is no update or delete: corrections
/// are made by submitting new results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub id: String,
    pub testcase: TestCase,
    pub outcome: String,
    pub note: Option<String>,
    pub ref_url: Option<String>,
    /// UTC milliseconds, set once at insert.
    pub submit_time: i64,
    pub groups: Vec<String>,
    pub data: ResultData,
}

/// Group reference carried on a new result. A fresh group row is created
/// when the uuid is unseen; description/ref_url refresh existing rows.
#[derive(Debug, Clone, Default)]
pub struct GroupRef {
    pub uuid: String,
    pub description: Option<String>,
    pub ref_url: Option<String>,
}

impl GroupRef {
    pub fn by_uuid(uuid: &str) -> Self {
        Self {
            uuid: uuid.to_string(),
            ..Self::default()
        }
    }
}

/// Input for result creation. Metadata is a flat pair list so repeated keys
/// keep their submitted order.
#[derive(Debug, Clone, Default)]
pub struct NewResult {
    pub testcase: String,
    pub testcase_ref_url: Option<String>,
    pub outcome: String,
    pub note: Option<String>,
    pub ref_url: Option<String>,
    pub groups: Vec<GroupRef>,
    pub data: Vec<(String, String)>,
}

impl NewResult {
    pub fn new(testcase: &str, outcome: &str) -> Self {
        Self {
            testcase: testcase.to_string(),
            outcome: outcome.to_string(),
            ..Self::default()
        }
    }
}
