use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use devcollab_core::ids::{BoardId, ColumnId, UserId};
use devcollab_core::palette;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::{self, fmt_time};

const BOARD_COLUMNS: &str = "id, name, description, color, owner_id, created_at";
const COLUMN_COLUMNS: &str = "id, board_id, name, position, bg_color";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnRow {
    pub id: ColumnId,
    pub board_id: BoardId,
    pub name: String,
    pub position: i64,
    pub bg_color: String,
}

impl ColumnRow {
    fn from_row(row: &rusqlite::Row<'_>) -> Result<Self, StoreError> {
        const T: &str = "board_columns";
        Ok(Self {
            id: ColumnId::from_raw(row_helpers::get::<String>(row, 0, T, "id")?),
            board_id: BoardId::from_raw(row_helpers::get::<String>(row, 1, T, "board_id")?),
            name: row_helpers::get(row, 2, T, "name")?,
            position: row_helpers::get(row, 3, T, "position")?,
            bg_color: row_helpers::get(row, 4, T, "bg_color")?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardRow {
    pub id: BoardId,
    pub name: String,
    pub description: Option<String>,
    pub color: String,
    pub owner_id: Option<UserId>,
    pub created_at: DateTime<Utc>,
    /// Ordered by position. Empty for list queries.
    #[serde(default)]
    pub columns: Vec<ColumnRow>,
}

impl BoardRow {
    fn from_row(row: &rusqlite::Row<'_>) -> Result<Self, StoreError> {
        const T: &str = "boards";
        Ok(Self {
            id: BoardId::from_raw(row_helpers::get::<String>(row, 0, T, "id")?),
            name: row_helpers::get(row, 1, T, "name")?,
            description: row_helpers::get_opt(row, 2, T, "description")?,
            color: row_helpers::get(row, 3, T, "color")?,
            owner_id: row_helpers::get_opt::<String>(row, 4, T, "owner_id")?.map(UserId::from_raw),
            created_at: row_helpers::get_time(row, 5, T, "created_at")?,
            columns: Vec::new(),
        })
    }
}

pub struct BoardRepo {
    db: Database,
}

impl BoardRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a board with the default `To Do`, `Doing`, `Done` columns.
    #[instrument(skip(self), fields(name))]
    pub fn create(
        &self,
        name: &str,
        description: Option<&str>,
        color: Option<&str>,
        owner_id: Option<&UserId>,
    ) -> Result<BoardRow, StoreError> {
        let mut board = BoardRow {
            id: BoardId::new(),
            name: name.to_string(),
            description: description.map(str::to_string),
            color: color.unwrap_or(palette::DEFAULT_BOARD_COLOR).to_string(),
            owner_id: owner_id.cloned(),
            created_at: row_helpers::now(),
            columns: Vec::new(),
        };
        board.columns = palette::DEFAULT_COLUMNS
            .iter()
            .zip(0..)
            .map(|(name, position)| ColumnRow {
                id: ColumnId::new(),
                board_id: board.id.clone(),
                name: (*name).to_string(),
                position,
                bg_color: palette::column_color(position).to_string(),
            })
            .collect();

        self.db.with_tx(|tx| {
            tx.execute(
                "INSERT INTO boards (id, name, description, color, owner_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    board.id.as_str(),
                    board.name,
                    board.description,
                    board.color,
                    board.owner_id.as_ref().map(UserId::as_str),
                    fmt_time(&board.created_at),
                ],
            )?;
            for column in &board.columns {
                insert_column(tx, column)?;
            }
            Ok(())
        })?;
        Ok(board)
    }

    /// Get a board together with its columns.
    #[instrument(skip(self), fields(board_id = %id))]
    pub fn get(&self, id: &BoardId) -> Result<BoardRow, StoreError> {
        let mut board = self
            .query_boards("WHERE id = ?1", &[&id.as_str()])?
            .pop()
            .ok_or_else(|| StoreError::NotFound(format!("board {id}")))?;
        board.columns = self.list_columns(id)?;
        Ok(board)
    }

    #[instrument(skip(self))]
    pub fn list(&self) -> Result<Vec<BoardRow>, StoreError> {
        self.query_boards("ORDER BY created_at", &[])
    }

    #[instrument(skip(self), fields(owner_id = %owner_id))]
    pub fn list_by_owner(&self, owner_id: &UserId) -> Result<Vec<BoardRow>, StoreError> {
        self.query_boards("WHERE owner_id = ?1 ORDER BY created_at", &[&owner_id.as_str()])
    }

    /// Save name, description and colour.
    #[instrument(skip(self, board), fields(board_id = %board.id))]
    pub fn update(&self, board: &BoardRow) -> Result<(), StoreError> {
        let changed = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE boards SET name = ?2, description = ?3, color = ?4 WHERE id = ?1",
                rusqlite::params![board.id.as_str(), board.name, board.description, board.color],
            )?)
        })?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("board {}", board.id)));
        }
        Ok(())
    }

    /// Delete a board; its columns and projects go with it.
    #[instrument(skip(self), fields(board_id = %id))]
    pub fn delete(&self, id: &BoardId) -> Result<(), StoreError> {
        let changed = self
            .db
            .with_conn(|conn| Ok(conn.execute("DELETE FROM boards WHERE id = ?1", [id.as_str()])?))?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("board {id}")));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(board_id = %board_id))]
    pub fn list_columns(&self, board_id: &BoardId) -> Result<Vec<ColumnRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMN_COLUMNS} FROM board_columns WHERE board_id = ?1 ORDER BY position"
            ))?;
            let mut rows = stmt.query([board_id.as_str()])?;
            let mut columns = Vec::new();
            while let Some(row) = rows.next()? {
                columns.push(ColumnRow::from_row(row)?);
            }
            Ok(columns)
        })
    }

    /// Append a column after the board's last one.
    #[instrument(skip(self), fields(board_id = %board_id, name))]
    pub fn add_column(
        &self,
        board_id: &BoardId,
        name: &str,
        bg_color: Option<&str>,
    ) -> Result<ColumnRow, StoreError> {
        self.db.with_tx(|tx| {
            let exists: i64 = tx.query_row(
                "SELECT COUNT(*) FROM boards WHERE id = ?1",
                [board_id.as_str()],
                |row| row.get(0),
            )?;
            if exists == 0 {
                return Err(StoreError::NotFound(format!("board {board_id}")));
            }
            let position: i64 = tx.query_row(
                "SELECT COALESCE(MAX(position) + 1, 0) FROM board_columns WHERE board_id = ?1",
                [board_id.as_str()],
                |row| row.get(0),
            )?;
            let column = ColumnRow {
                id: ColumnId::new(),
                board_id: board_id.clone(),
                name: name.to_string(),
                position,
                bg_color: bg_color
                    .map(str::to_string)
                    .unwrap_or_else(|| palette::column_color(position).to_string()),
            };
            insert_column(tx, &column)?;
            Ok(column)
        })
    }

    #[instrument(skip(self), fields(column_id = %id))]
    pub fn get_column(&self, id: &ColumnId) -> Result<ColumnRow, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {COLUMN_COLUMNS} FROM board_columns WHERE id = ?1"))?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => ColumnRow::from_row(row),
                None => Err(StoreError::NotFound(format!("column {id}"))),
            }
        })
    }

    /// Save name, position and colour of a column.
    #[instrument(skip(self, column), fields(column_id = %column.id))]
    pub fn update_column(&self, column: &ColumnRow) -> Result<(), StoreError> {
        let changed = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE board_columns SET name = ?2, position = ?3, bg_color = ?4 WHERE id = ?1",
                rusqlite::params![column.id.as_str(), column.name, column.position, column.bg_color],
            )?)
        })?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("column {}", column.id)));
        }
        Ok(())
    }

    /// Delete a column; projects in it go with it.
    #[instrument(skip(self), fields(column_id = %id))]
    pub fn delete_column(&self, id: &ColumnId) -> Result<(), StoreError> {
        let changed = self.db.with_conn(|conn| {
            Ok(conn.execute("DELETE FROM board_columns WHERE id = ?1", [id.as_str()])?)
        })?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("column {id}")));
        }
        Ok(())
    }

    fn query_boards(
        &self,
        clause: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<BoardRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT {BOARD_COLUMNS} FROM boards {clause}"))?;
            let mut rows = stmt.query(params)?;
            let mut boards = Vec::new();
            while let Some(row) = rows.next()? {
                boards.push(BoardRow::from_row(row)?);
            }
            Ok(boards)
        })
    }
}

fn insert_column(conn: &rusqlite::Connection, column: &ColumnRow) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO board_columns (id, board_id, name, position, bg_color)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![
            column.id.as_str(),
            column.board_id.as_str(),
            column.name,
            column.position,
            column.bg_color,
        ],
    )?;
    Ok(())
}
