/// DDL for one service database.
/// WAL mode + foreign keys enabled at connection time.
#[derive(Clone, Copy, Debug)]
pub struct Schema {
    pub name: &'static str,
    pub version: u32,
    /// DDL batches, applied in order.
    pub tables: &'static [&'static str],
}

const USERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    email TEXT NOT NULL UNIQUE COLLATE NOCASE,
    name TEXT NOT NULL,
    password_hash TEXT NOT NULL,
    role TEXT NOT NULL DEFAULT 'USER',
    created_at TEXT NOT NULL
);
"#;

const VERSION_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);
"#;

const BOARD_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS boards (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT,
    color TEXT NOT NULL,
    owner_id TEXT REFERENCES users(id) ON DELETE SET NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS board_columns (
    id TEXT PRIMARY KEY,
    board_id TEXT NOT NULL REFERENCES boards(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    position INTEGER NOT NULL,
    bg_color TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS projects (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT,
    board_id TEXT NOT NULL REFERENCES boards(id) ON DELETE CASCADE,
    column_id TEXT NOT NULL REFERENCES board_columns(id) ON DELETE CASCADE,
    owner_id TEXT REFERENCES users(id) ON DELETE SET NULL,
    status TEXT NOT NULL DEFAULT 'TODO',
    created_at TEXT NOT NULL,
    completed_at TEXT,
    pomodoro_start TEXT,
    total_seconds_spent INTEGER NOT NULL DEFAULT 0,
    paused_elapsed_seconds INTEGER NOT NULL DEFAULT 0,
    pomodoro_duration INTEGER NOT NULL DEFAULT 25,
    break_duration INTEGER NOT NULL DEFAULT 5,
    is_break INTEGER NOT NULL DEFAULT 0,
    estimated_pomodoros INTEGER NOT NULL DEFAULT 1,
    completed_pomodoros INTEGER NOT NULL DEFAULT 0,
    current_cycle INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    description TEXT,
    status TEXT NOT NULL DEFAULT 'TODO',
    created_at TEXT NOT NULL,
    completed_at TEXT,
    pomodoro_start TEXT,
    total_seconds_spent INTEGER NOT NULL DEFAULT 0,
    paused_elapsed_seconds INTEGER NOT NULL DEFAULT 0,
    pomodoro_duration INTEGER NOT NULL DEFAULT 25,
    break_duration INTEGER NOT NULL DEFAULT 5,
    is_break INTEGER NOT NULL DEFAULT 0,
    estimated_pomodoros INTEGER NOT NULL DEFAULT 1,
    completed_pomodoros INTEGER NOT NULL DEFAULT 0,
    current_cycle INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS subtasks (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    task_id TEXT REFERENCES tasks(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    completed INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    pomodoro_start TEXT,
    total_seconds_spent INTEGER NOT NULL DEFAULT 0,
    paused_elapsed_seconds INTEGER NOT NULL DEFAULT 0,
    pomodoro_duration INTEGER NOT NULL DEFAULT 25,
    break_duration INTEGER NOT NULL DEFAULT 5,
    is_break INTEGER NOT NULL DEFAULT 0,
    estimated_pomodoros INTEGER NOT NULL DEFAULT 1,
    completed_pomodoros INTEGER NOT NULL DEFAULT 0,
    current_cycle INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS pomodoro_logs (
    id TEXT PRIMARY KEY,
    subtask_id TEXT NOT NULL REFERENCES subtasks(id) ON DELETE CASCADE,
    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    start_time TEXT NOT NULL,
    end_time TEXT,
    pomodoros_used INTEGER NOT NULL DEFAULT 1,
    completed INTEGER NOT NULL DEFAULT 0,
    distractions INTEGER NOT NULL DEFAULT 0,
    notes TEXT,
    break_type TEXT NOT NULL DEFAULT 'NONE',
    cycle_number INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS time_entries (
    id TEXT PRIMARY KEY,
    user_id TEXT REFERENCES users(id) ON DELETE SET NULL,
    project_id TEXT REFERENCES projects(id) ON DELETE SET NULL,
    task_id TEXT REFERENCES tasks(id) ON DELETE SET NULL,
    subtask_id TEXT REFERENCES subtasks(id) ON DELETE SET NULL,
    description TEXT,
    tags TEXT NOT NULL DEFAULT '[]',
    start_time TEXT,
    end_time TEXT,
    pomodoro INTEGER NOT NULL DEFAULT 0,
    billable INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_columns_board ON board_columns(board_id, position);
CREATE INDEX IF NOT EXISTS idx_projects_board ON projects(board_id);
CREATE INDEX IF NOT EXISTS idx_projects_owner ON projects(owner_id);
CREATE INDEX IF NOT EXISTS idx_tasks_project ON tasks(project_id);
CREATE INDEX IF NOT EXISTS idx_subtasks_task ON subtasks(task_id);
CREATE INDEX IF NOT EXISTS idx_subtasks_project ON subtasks(project_id);
CREATE INDEX IF NOT EXISTS idx_logs_subtask ON pomodoro_logs(subtask_id);
CREATE INDEX IF NOT EXISTS idx_logs_user_start ON pomodoro_logs(user_id, start_time);
CREATE INDEX IF NOT EXISTS idx_entries_user_start ON time_entries(user_id, start_time);
"#;

const HABITUS_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS habits (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    tag TEXT NOT NULL,
    frequency TEXT NOT NULL,
    max_quantity INTEGER NOT NULL,
    current_quantity INTEGER NOT NULL DEFAULT 0,
    done INTEGER NOT NULL DEFAULT 0,
    date_done TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_habits_user ON habits(user_id);
"#;

pub const BOARD: Schema = Schema {
    name: "board",
    version: 1,
    tables: &[USERS_TABLE, BOARD_TABLES, VERSION_TABLE],
};

pub const HABITUS: Schema = Schema {
    name: "habitus",
    version: 1,
    tables: &[USERS_TABLE, HABITUS_TABLES, VERSION_TABLE],
};

pub const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = NORMAL;
"#;
