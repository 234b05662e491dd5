pub const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS runs (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  started_at TEXT NOT NULL,
  finished_at TEXT,
  status TEXT NOT NULL,
  config_json TEXT
);

CREATE TABLE IF NOT EXISTS tests (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  run_id INTEGER NOT NULL REFERENCES runs(id),
  load_percent INTEGER NOT NULL,
  cap_level INTEGER NOT NULL,
  start_ts TEXT NOT NULL,
  end_ts TEXT,
  status TEXT NOT NULL,
  error TEXT
);

CREATE TABLE IF NOT EXISTS bmc (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  run_id INTEGER NOT NULL REFERENCES runs(id),
  timestamp TEXT NOT NULL,
  power_watts REAL NOT NULL,
  cap_level REAL
);

CREATE TABLE IF NOT EXISTS rapl (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  run_id INTEGER NOT NULL REFERENCES runs(id),
  timestamp TEXT NOT NULL,
  package_id TEXT NOT NULL,
  power_watts REAL NOT NULL
);

CREATE TABLE IF NOT EXISTS capping_commands (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  run_id INTEGER NOT NULL REFERENCES runs(id),
  timestamp TEXT NOT NULL,
  command_type TEXT NOT NULL,
  value INTEGER
);

CREATE TABLE IF NOT EXISTS system_info (
  id INTEGER PRIMARY KEY CHECK (id = 1),
  hostname TEXT NOT NULL,
  os TEXT,
  cpu TEXT,
  firmware TEXT,
  bmc_type TEXT,
  extra_json TEXT,
  updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tests_run ON tests(run_id, id);
CREATE INDEX IF NOT EXISTS idx_bmc_timestamp ON bmc(timestamp);
CREATE INDEX IF NOT EXISTS idx_rapl_timestamp ON rapl(timestamp);
CREATE INDEX IF NOT EXISTS idx_capping_commands_timestamp ON capping_commands(timestamp);
"#;
