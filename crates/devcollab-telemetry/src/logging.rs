//! Warnings and errors kept in SQLite so the board service can show recent
//! problems per user, project or WebSocket client.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing::{span, Level};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

pub const MAX_QUERY_LIMIT: u32 = 1000;
const DEFAULT_QUERY_LIMIT: u32 = 100;

/// Fields promoted to their own columns. Looked up on the event first, then
/// on enclosing spans from the innermost out.
const CONTEXT_FIELDS: [&str; 3] = ["user_id", "project_id", "client_id"];

const SCHEMA: &str = "
    PRAGMA journal_mode = WAL;
    PRAGMA synchronous = NORMAL;
    CREATE TABLE IF NOT EXISTS logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp TEXT NOT NULL,
        level TEXT NOT NULL,
        severity INTEGER NOT NULL,
        target TEXT NOT NULL,
        message TEXT NOT NULL,
        fields TEXT,
        user_id TEXT,
        project_id TEXT,
        client_id TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_logs_severity ON logs(severity);
    CREATE INDEX IF NOT EXISTS idx_logs_user ON logs(user_id);
    CREATE INDEX IF NOT EXISTS idx_logs_project ON logs(project_id);
";

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    pub id: i64,
    pub timestamp: String,
    pub level: String,
    pub target: String,
    pub message: String,
    pub fields: Option<Value>,
    pub user_id: Option<String>,
    pub project_id: Option<String>,
    pub client_id: Option<String>,
}

/// Filters for [`SqliteLogSink::query`].
///
/// `level` is a floor: `warn` returns warnings and errors.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogQuery {
    pub level: Option<String>,
    pub user_id: Option<String>,
    pub project_id: Option<String>,
    pub client_id: Option<String>,
    /// Substring of the message.
    pub contains: Option<String>,
    /// RFC 3339 lower bound on the timestamp.
    pub since: Option<String>,
    pub limit: Option<u32>,
}

/// Higher is more severe; ERROR is 4.
fn severity(level: Level) -> i64 {
    match level {
        Level::ERROR => 4,
        Level::WARN => 3,
        Level::INFO => 2,
        Level::DEBUG => 1,
        Level::TRACE => 0,
    }
}

pub struct SqliteLogSink {
    conn: Mutex<Connection>,
}

impl SqliteLogSink {
    pub fn new(db_path: &Path) -> Result<Self, rusqlite::Error> {
        if let Some(parent) = db_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        Self::with_connection(Connection::open(db_path)?)
    }

    pub fn in_memory() -> Result<Self, rusqlite::Error> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, rusqlite::Error> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn insert(&self, entry: &LogEntry) -> Result<(), rusqlite::Error> {
        let [user_id, project_id, client_id] = &entry.context.0;
        self.conn.lock().execute(
            "INSERT INTO logs (timestamp, level, severity, target, message, fields,
             user_id, project_id, client_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                entry.timestamp,
                entry.level.as_str(),
                severity(entry.level),
                entry.target,
                entry.message,
                entry.fields.as_ref().map(Value::to_string),
                user_id,
                project_id,
                client_id,
            ],
        )?;
        Ok(())
    }

    /// Newest first. Unknown level names match nothing.
    pub fn query(&self, q: &LogQuery) -> Result<Vec<LogRecord>, rusqlite::Error> {
        let mut clauses = Vec::new();
        let mut params: Vec<rusqlite::types::Value> = Vec::new();
        let mut push = |clause: &str, value: rusqlite::types::Value| {
            params.push(value);
            clauses.push(format!("{clause} ?{}", params.len()));
        };

        if let Some(level) = &q.level {
            let floor = Level::from_str(level).map(severity).unwrap_or(i64::MAX);
            push("severity >=", floor.into());
        }
        for (column, value) in [
            ("user_id =", &q.user_id),
            ("project_id =", &q.project_id),
            ("client_id =", &q.client_id),
            ("timestamp >=", &q.since),
        ] {
            if let Some(value) = value {
                push(column, value.clone().into());
            }
        }
        if let Some(text) = &q.contains {
            push("message LIKE", format!("%{text}%").into());
        }

        let filter = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let limit = q.limit.unwrap_or(DEFAULT_QUERY_LIMIT).min(MAX_QUERY_LIMIT);
        let sql = format!(
            "SELECT id, timestamp, level, target, message, fields, user_id, project_id, client_id
             FROM logs {filter} ORDER BY id DESC LIMIT {limit}"
        );

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(params), |row| {
            let fields: Option<String> = row.get(5)?;
            Ok(LogRecord {
                id: row.get(0)?,
                timestamp: row.get(1)?,
                level: row.get(2)?,
                target: row.get(3)?,
                message: row.get(4)?,
                fields: fields.and_then(|f| serde_json::from_str(&f).ok()),
                user_id: row.get(6)?,
                project_id: row.get(7)?,
                client_id: row.get(8)?,
            })
        })?;
        rows.collect()
    }

    pub fn count(&self) -> Result<i64, rusqlite::Error> {
        self.conn
            .lock()
            .query_row("SELECT COUNT(*) FROM logs", [], |row| row.get(0))
    }
}

/// Values of [`CONTEXT_FIELDS`], by position.
#[derive(Clone, Debug, Default, PartialEq)]
struct ContextIds([Option<String>; 3]);

impl ContextIds {
    fn slot(name: &str) -> Option<usize> {
        CONTEXT_FIELDS.iter().position(|f| *f == name)
    }

    fn is_complete(&self) -> bool {
        self.0.iter().all(Option::is_some)
    }

    fn is_empty(&self) -> bool {
        self.0.iter().all(Option::is_none)
    }

    /// Take values from `outer` only where this one has none.
    fn fill_from(&mut self, outer: &ContextIds) {
        for (mine, theirs) in self.0.iter_mut().zip(&outer.0) {
            if mine.is_none() {
                mine.clone_from(theirs);
            }
        }
    }
}

struct LogEntry {
    timestamp: String,
    level: Level,
    target: String,
    message: String,
    fields: Option<Value>,
    context: ContextIds,
}

#[derive(Default)]
struct FieldCollector {
    message: String,
    fields: Map<String, Value>,
    context: ContextIds,
}

impl FieldCollector {
    fn put(&mut self, field: &Field, value: Value) {
        self.fields.insert(field.name().to_string(), value);
    }

    fn put_text(&mut self, field: &Field, text: String) {
        if field.name() == "message" {
            self.message = text;
        } else if let Some(slot) = ContextIds::slot(field.name()) {
            self.context.0[slot] = Some(text);
        } else {
            self.put(field, Value::String(text));
        }
    }
}

impl Visit for FieldCollector {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let text = format!("{value:?}");
        let text = match text.strip_prefix('"').and_then(|t| t.strip_suffix('"')) {
            Some(inner) if field.name() != "message" => inner.to_string(),
            _ => text,
        };
        self.put_text(field, text);
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.put_text(field, value.to_string());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field, value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field, value.into());
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        if let Some(n) = serde_json::Number::from_f64(value) {
            self.put(field, Value::Number(n));
        }
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field, value.into());
    }
}

/// Persists WARN and ERROR events to a [`SqliteLogSink`].
pub struct SqliteLogLayer {
    sink: Arc<SqliteLogSink>,
}

impl SqliteLogLayer {
    pub fn new(sink: Arc<SqliteLogSink>) -> Self {
        Self { sink }
    }
}

impl<S> Layer<S> for SqliteLogLayer
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let mut collector = FieldCollector::default();
        attrs.record(&mut collector);
        if collector.context.is_empty() {
            return;
        }
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(collector.context);
        }
    }

    fn on_event(&self, event: &tracing::Event<'_>, ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level > Level::WARN {
            return;
        }

        let mut collector = FieldCollector::default();
        event.record(&mut collector);

        if let Some(scope) = ctx.event_scope(event) {
            for span in scope {
                if collector.context.is_complete() {
                    break;
                }
                if let Some(outer) = span.extensions().get::<ContextIds>() {
                    collector.context.fill_from(outer);
                }
            }
        }

        let entry = LogEntry {
            timestamp: Utc::now().to_rfc3339(),
            level,
            target: event.metadata().target().to_string(),
            message: collector.message,
            fields: (!collector.fields.is_empty()).then_some(Value::Object(collector.fields)),
            context: collector.context,
        };
        // Logging from here would re-enter this layer.
        let _ = self.sink.insert(&entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    fn entry(level: Level, message: &str) -> LogEntry {
        LogEntry {
            timestamp: "2026-03-02T12:00:00+00:00".into(),
            level,
            target: "devcollab_server::routes".into(),
            message: message.into(),
            fields: None,
            context: ContextIds::default(),
        }
    }

    fn with_ids(user: Option<&str>, project: Option<&str>, message: &str) -> LogEntry {
        LogEntry {
            context: ContextIds([user.map(Into::into), project.map(Into::into), None]),
            ..entry(Level::WARN, message)
        }
    }

    fn capture(f: impl FnOnce()) -> Arc<SqliteLogSink> {
        let sink = Arc::new(SqliteLogSink::in_memory().unwrap());
        let subscriber = tracing_subscriber::registry().with(SqliteLogLayer::new(Arc::clone(&sink)));
        tracing::subscriber::with_default(subscriber, f);
        sink
    }

    #[test]
    fn on_disk_sink_creates_parent_dirs() {
        let dir = std::env::temp_dir().join(format!("devcollab-logs-{}", uuid::Uuid::now_v7()));
        let sink = SqliteLogSink::new(&dir.join("nested/logs.db")).unwrap();
        sink.insert(&entry(Level::WARN, "rate limited")).unwrap();
        assert_eq!(sink.count().unwrap(), 1);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn level_is_a_floor() {
        let sink = SqliteLogSink::in_memory().unwrap();
        sink.insert(&entry(Level::WARN, "slow query")).unwrap();
        sink.insert(&entry(Level::ERROR, "db locked")).unwrap();

        let level = |l: &str| {
            sink.query(&LogQuery {
                level: Some(l.into()),
                ..Default::default()
            })
            .unwrap()
            .len()
        };
        assert_eq!(level("error"), 1);
        assert_eq!(level("WARN"), 2);
        assert_eq!(level("info"), 2);
        assert_eq!(level("loud"), 0);
    }

    #[test]
    fn filters_combine() {
        let sink = SqliteLogSink::in_memory().unwrap();
        sink.insert(&with_ids(Some("user_a"), Some("proj_1"), "timer drift")).unwrap();
        sink.insert(&with_ids(Some("user_b"), Some("proj_1"), "estimate rejected")).unwrap();
        sink.insert(&with_ids(Some("user_a"), None, "login throttled")).unwrap();

        let run = |q: LogQuery| -> Vec<String> {
            sink.query(&q).unwrap().into_iter().map(|r| r.message).collect()
        };
        assert_eq!(
            run(LogQuery {
                project_id: Some("proj_1".into()),
                ..Default::default()
            }),
            vec!["estimate rejected", "timer drift"]
        );
        assert_eq!(
            run(LogQuery {
                user_id: Some("user_a".into()),
                project_id: Some("proj_1".into()),
                ..Default::default()
            }),
            vec!["timer drift"]
        );
        assert_eq!(
            run(LogQuery {
                contains: Some("throttle".into()),
                ..Default::default()
            }),
            vec!["login throttled"]
        );
    }

    #[test]
    fn limit_is_capped_and_newest_first() {
        let sink = SqliteLogSink::in_memory().unwrap();
        for i in 0..5 {
            sink.insert(&entry(Level::WARN, &format!("msg {i}"))).unwrap();
        }
        let rows = sink
            .query(&LogQuery {
                limit: Some(2),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(rows.iter().map(|r| r.message.as_str()).collect::<Vec<_>>(), ["msg 4", "msg 3"]);

        let all = sink
            .query(&LogQuery {
                limit: Some(u32::MAX),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(all.len(), 5);
    }

    #[test]
    fn layer_keeps_only_warnings_and_errors() {
        let sink = capture(|| {
            tracing::debug!("noise");
            tracing::info!("project created");
            tracing::warn!(attempts = 3, stale = true, "timer already running");
        });
        let rows = sink.query(&LogQuery::default()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].level, "WARN");
        assert_eq!(rows[0].message, "timer already running");
        let fields = rows[0].fields.as_ref().unwrap();
        assert_eq!(fields["attempts"], 3);
        assert_eq!(fields["stale"], true);
    }

    #[test]
    fn ids_come_from_nearest_span() {
        let sink = capture(|| {
            let request = tracing::info_span!("request", user_id = "user_outer", project_id = "proj_7");
            let _r = request.enter();
            let socket = tracing::info_span!("socket", client_id = "client_1", user_id = "user_inner");
            let _s = socket.enter();
            tracing::warn!("send queue full");
        });
        let row = &sink.query(&LogQuery::default()).unwrap()[0];
        assert_eq!(row.user_id.as_deref(), Some("user_inner"));
        assert_eq!(row.project_id.as_deref(), Some("proj_7"));
        assert_eq!(row.client_id.as_deref(), Some("client_1"));
        assert!(row.fields.is_none());
    }

    #[test]
    fn event_ids_win_over_spans() {
        let sink = capture(|| {
            let span = tracing::info_span!("request", user_id = "user_span");
            let _e = span.enter();
            tracing::error!(user_id = %"user_event", "store failure");
        });
        let row = &sink.query(&LogQuery::default()).unwrap()[0];
        assert_eq!(row.user_id.as_deref(), Some("user_event"));
        assert_eq!(row.level, "ERROR");
    }
}
