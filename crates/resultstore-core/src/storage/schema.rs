pub const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS testcases (
  name TEXT PRIMARY KEY,
  ref_url TEXT
);

CREATE TABLE IF NOT EXISTS groups (
  uuid TEXT PRIMARY KEY,
  description TEXT,
  ref_url TEXT
);

CREATE TABLE IF NOT EXISTS results (
  id TEXT PRIMARY KEY,
  testcase_name TEXT NOT NULL REFERENCES testcases(name),
  outcome TEXT NOT NULL,
  note TEXT,
  ref_url TEXT,
  submit_time INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS result_data (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  result_id TEXT NOT NULL REFERENCES results(id),
  key TEXT NOT NULL,
  value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS result_groups (
  result_id TEXT NOT NULL REFERENCES results(id),
  group_uuid TEXT NOT NULL REFERENCES groups(uuid),
  PRIMARY KEY (result_id, group_uuid)
);

CREATE INDEX IF NOT EXISTS idx_results_order ON results(submit_time, id);
CREATE INDEX IF NOT EXISTS idx_results_testcase ON results(testcase_name);
CREATE INDEX IF NOT EXISTS idx_results_outcome ON results(outcome);
CREATE INDEX IF NOT EXISTS idx_result_data_kv ON result_data(key, value);
CREATE INDEX IF NOT EXISTS idx_result_data_result ON result_data(result_id);
CREATE INDEX IF NOT EXISTS idx_result_groups_group ON result_groups(group_uuid);
"#;
