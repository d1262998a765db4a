//! SQLite-backed `TreeBackend` with durable persistence.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use tracing::debug;

use crate::{
    Node, NodeId, NodeKind, StorageFault, StoreResult, TreeBackend, TreeStoreError,
};

const NODE_COLUMNS: &str = "id, content, type, parent, model";

/// Persistent SQLite backend. The connection is opened once and shared by
/// every call; dropping the backend closes it.
#[derive(Debug)]
pub struct SqliteTreeBackend {
    path: Option<PathBuf>,
    connection: Mutex<Connection>,
    assistant_label: &'static str,
}

impl SqliteTreeBackend {
    /// Opens (or creates) the database at `path`, creating parent directories
    /// and schema as needed.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let connection = Connection::open(&path)?;
        connection.busy_timeout(Duration::from_secs(5))?;
        connection.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            "#,
        )?;
        Self::from_connection(Some(path), connection)
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::from_connection(None, Connection::open_in_memory()?)
    }

    fn from_connection(path: Option<PathBuf>, connection: Connection) -> StoreResult<Self> {
        initialize_schema(&connection)?;
        let assistant_label = detect_assistant_label(&connection)?;
        debug!(
            path = ?path,
            assistant_label,
            "opened sqlite tree backend"
        );
        Ok(Self {
            path,
            connection: Mutex::new(connection),
            assistant_label,
        })
    }

    /// Database file path, `None` for in-memory databases.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Releases the connection, surfacing any error SQLite reports on close.
    pub fn close(self) -> StoreResult<()> {
        let connection = self
            .connection
            .into_inner()
            .map_err(|_| StorageFault::LockPoisoned("sqlite connection"))?;
        connection.close().map_err(|(_, error)| error)?;
        Ok(())
    }

    fn connection(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.connection
            .lock()
            .map_err(|_| StorageFault::LockPoisoned("sqlite connection").into())
    }

    fn query_nodes(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> StoreResult<Vec<Node>> {
        let connection = self.connection()?;
        let mut statement = connection.prepare(sql)?;
        let mut rows = statement.query(params)?;
        let mut nodes = Vec::new();
        while let Some(row) = rows.next()? {
            nodes.push(node_from_row(row)?);
        }
        Ok(nodes)
    }
}

impl TreeBackend for SqliteTreeBackend {
    fn insert_node(&self, node: &Node) -> StoreResult<()> {
        let kind = match node.kind {
            NodeKind::User => NodeKind::User.as_str(),
            NodeKind::Assistant => self.assistant_label,
        };
        let result = self.connection()?.execute(
            r#"
            INSERT INTO Node (id, content, type, parent, model)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                node.id.as_str(),
                node.content,
                kind,
                node.parent.as_ref().map(NodeId::as_str),
                node.model,
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(error, _))
                if error.code == ErrorCode::ConstraintViolation
                    && error.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
            {
                Err(TreeStoreError::InvalidArgument(format!(
                    "node id '{}' already exists",
                    node.id
                )))
            }
            Err(error) => Err(error.into()),
        }
    }

    fn get_node(&self, id: &NodeId) -> StoreResult<Option<Node>> {
        let connection = self.connection()?;
        let row = connection
            .query_row(
                &format!("SELECT {NODE_COLUMNS} FROM Node WHERE id = ?1"),
                params![id.as_str()],
                raw_node_from_row,
            )
            .optional()?;
        row.map(RawNode::into_node).transpose()
    }

    fn root_nodes(&self) -> StoreResult<Vec<Node>> {
        self.query_nodes(
            &format!("SELECT {NODE_COLUMNS} FROM Node WHERE parent IS NULL ORDER BY id"),
            [],
        )
    }

    fn child_nodes(&self, parent_id: &NodeId) -> StoreResult<Vec<Node>> {
        self.query_nodes(
            &format!("SELECT {NODE_COLUMNS} FROM Node WHERE parent = ?1 ORDER BY id"),
            params![parent_id.as_str()],
        )
    }

    fn child_ids(&self, parent_id: &NodeId) -> StoreResult<Vec<NodeId>> {
        let connection = self.connection()?;
        let mut statement =
            connection.prepare("SELECT id FROM Node WHERE parent = ?1 ORDER BY id")?;
        let ids = statement
            .query_map(params![parent_id.as_str()], |row| row.get::<_, String>(0))?
            .map(|id| id.map(NodeId::from_persisted))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    fn all_nodes(&self) -> StoreResult<Vec<Node>> {
        self.query_nodes(&format!("SELECT {NODE_COLUMNS} FROM Node ORDER BY id"), [])
    }

    fn delete_node(&self, id: &NodeId) -> StoreResult<usize> {
        let removed = self
            .connection()?
            .execute("DELETE FROM Node WHERE id = ?1", params![id.as_str()])?;
        Ok(removed)
    }

    fn read_setting(&self, key: &str) -> StoreResult<Option<String>> {
        let value = self
            .connection()?
            .query_row(
                "SELECT value FROM Config WHERE key = ?1",
                params![key],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?;
        Ok(value.flatten())
    }

    fn write_setting(&self, key: &str, value: &str) -> StoreResult<()> {
        self.connection()?.execute(
            r#"
            INSERT INTO Config (key, value) VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
            params![key, value],
        )?;
        Ok(())
    }

    fn remove_setting(&self, key: &str) -> StoreResult<()> {
        self.connection()?
            .execute("DELETE FROM Config WHERE key = ?1", params![key])?;
        Ok(())
    }
}

fn initialize_schema(connection: &Connection) -> StoreResult<()> {
    connection.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS Node (
            id TEXT PRIMARY KEY,
            content TEXT NOT NULL,
            type TEXT NOT NULL,
            parent TEXT NULL,
            model TEXT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_node_parent ON Node (parent);

        CREATE TABLE IF NOT EXISTS Config (
            key TEXT PRIMARY KEY,
            value TEXT
        );
        "#,
    )?;
    Ok(())
}

/// Databases created by the original Go tool constrain `type` to
/// `('user', 'llm')`; assistant turns must be written with that label there.
fn detect_assistant_label(connection: &Connection) -> StoreResult<&'static str> {
    let table_sql: Option<String> = connection
        .query_row(
            "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = 'Node'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    let legacy = table_sql
        .map(|sql| sql.contains("'llm'") && !sql.contains("'assistant'"))
        .unwrap_or(false);
    Ok(if legacy { "llm" } else { "assistant" })
}

struct RawNode {
    id: String,
    content: String,
    kind: String,
    parent: Option<String>,
    model: Option<String>,
}

impl RawNode {
    fn into_node(self) -> StoreResult<Node> {
        Ok(Node {
            id: NodeId::from_persisted(self.id),
            content: self.content,
            kind: kind_from_db(&self.kind)?,
            parent: self.parent.map(NodeId::from_persisted),
            model: self.model,
        })
    }
}

fn raw_node_from_row(row: &Row<'_>) -> rusqlite::Result<RawNode> {
    Ok(RawNode {
        id: row.get(0)?,
        content: row.get(1)?,
        kind: row.get(2)?,
        parent: row.get(3)?,
        model: row.get(4)?,
    })
}

fn node_from_row(row: &Row<'_>) -> StoreResult<Node> {
    raw_node_from_row(row)?.into_node()
}

fn kind_from_db(value: &str) -> StoreResult<NodeKind> {
    match value {
        "user" => Ok(NodeKind::User),
        "assistant" | "llm" => Ok(NodeKind::Assistant),
        _ => Err(StorageFault::InvalidPersistedValue {
            field: "type",
            value: value.to_string(),
        }
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::SqliteTreeBackend;
    use crate::{Node, NodeId, NodeKind, TreeBackend, TreeStoreError, CURRENT_NODE_KEY};
    use rusqlite::Connection;
    use tempfile::tempdir;

    fn node(id: &str, parent: Option<&str>, kind: NodeKind) -> Node {
        Node {
            id: NodeId::parse(id).expect("node id"),
            content: format!("content of {id}"),
            kind,
            parent: parent.map(|parent| NodeId::parse(parent).expect("parent id")),
            model: None,
        }
    }

    #[test]
    fn integration_persists_nodes_and_settings_across_reopen() {
        let temp = tempdir().expect("create tempdir");
        let db_path = temp.path().join("nested").join("bonsai.db");

        {
            let backend = SqliteTreeBackend::open(&db_path).expect("open sqlite backend");
            backend
                .insert_node(&node("a", None, NodeKind::User))
                .expect("insert root");
            let mut reply = node("b", Some("a"), NodeKind::Assistant);
            reply.model = Some("m1".to_string());
            backend.insert_node(&reply).expect("insert reply");
            backend
                .write_setting(CURRENT_NODE_KEY, "b")
                .expect("write pointer");
            backend.close().expect("close backend");
        }

        let reopened = SqliteTreeBackend::open(&db_path).expect("reopen sqlite backend");
        assert_eq!(reopened.path(), Some(db_path.as_path()));
        let all = reopened.all_nodes().expect("all nodes");
        assert_eq!(all.len(), 2);
        let reply = reopened
            .get_node(&NodeId::parse("b").expect("id"))
            .expect("get node")
            .expect("reply exists");
        assert_eq!(reply.kind, NodeKind::Assistant);
        assert_eq!(reply.model.as_deref(), Some("m1"));
        assert_eq!(
            reopened
                .read_setting(CURRENT_NODE_KEY)
                .expect("read pointer")
                .as_deref(),
            Some("b")
        );
    }

    #[test]
    fn unit_write_setting_overwrites_and_remove_is_idempotent() {
        let backend = SqliteTreeBackend::open_in_memory().expect("open in-memory backend");
        backend.write_setting(CURRENT_NODE_KEY, "x").expect("first write");
        backend.write_setting(CURRENT_NODE_KEY, "y").expect("second write");
        assert_eq!(
            backend.read_setting(CURRENT_NODE_KEY).expect("read").as_deref(),
            Some("y")
        );

        backend.remove_setting(CURRENT_NODE_KEY).expect("remove");
        backend.remove_setting(CURRENT_NODE_KEY).expect("remove again");
        assert_eq!(backend.read_setting(CURRENT_NODE_KEY).expect("read"), None);
    }

    #[test]
    fn unit_duplicate_insert_is_rejected_as_invalid_argument() {
        let backend = SqliteTreeBackend::open_in_memory().expect("open in-memory backend");
        backend
            .insert_node(&node("dup", None, NodeKind::User))
            .expect("first insert");
        let error = backend
            .insert_node(&node("dup", None, NodeKind::User))
            .expect_err("duplicate insert should fail");
        assert!(matches!(error, TreeStoreError::InvalidArgument(_)));
    }

    #[test]
    fn regression_non_key_constraint_violation_is_a_storage_fault() {
        let temp = tempdir().expect("create tempdir");
        let db_path = temp.path().join("checked.db");
        {
            let connection = Connection::open(&db_path).expect("open raw connection");
            connection
                .execute_batch(
                    r#"
                    CREATE TABLE Node (
                        id TEXT PRIMARY KEY,
                        content TEXT NOT NULL CHECK (length(content) > 0),
                        type TEXT NOT NULL,
                        parent TEXT,
                        model TEXT
                    );
                    "#,
                )
                .expect("seed checked schema");
        }

        let backend = SqliteTreeBackend::open(&db_path).expect("open checked database");
        let mut empty = node("empty", None, NodeKind::User);
        empty.content = String::new();
        let error = backend
            .insert_node(&empty)
            .expect_err("check constraint should reject empty content");
        assert!(error.is_storage_fault(), "unexpected error: {error:?}");

        backend
            .insert_node(&node("kept", None, NodeKind::User))
            .expect("insert");
        let error = backend
            .insert_node(&node("kept", None, NodeKind::User))
            .expect_err("duplicate id");
        assert!(matches!(error, TreeStoreError::InvalidArgument(_)));
    }

    #[test]
    fn functional_child_listing_is_ordered_by_id() {
        let backend = SqliteTreeBackend::open_in_memory().expect("open in-memory backend");
        backend
            .insert_node(&node("root", None, NodeKind::User))
            .expect("insert root");
        for id in ["c", "a", "b"] {
            backend
                .insert_node(&node(id, Some("root"), NodeKind::User))
                .expect("insert child");
        }
        let root = NodeId::parse("root").expect("id");
        let ids = backend
            .child_ids(&root)
            .expect("child ids")
            .into_iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["a", "b", "c"]);
        let nodes = backend.child_nodes(&root).expect("child nodes");
        assert_eq!(nodes[0].id.as_str(), "a");
    }

    #[test]
    fn regression_opens_legacy_database_with_llm_kind_constraint() {
        let temp = tempdir().expect("create tempdir");
        let db_path = temp.path().join("legacy.db");
        {
            let connection = Connection::open(&db_path).expect("open raw connection");
            connection
                .execute_batch(
                    r#"
                    CREATE TABLE Node (
                        id TEXT PRIMARY KEY,
                        content TEXT NOT NULL,
                        type TEXT NOT NULL CHECK (type IN ('user', 'llm')),
                        parent TEXT,
                        children TEXT DEFAULT '[]',
                        model TEXT
                    );
                    CREATE TABLE Config (key TEXT PRIMARY KEY, value TEXT);
                    INSERT INTO Node (id, content, type, parent, children, model)
                    VALUES ('old', 'legacy reply', 'llm', NULL, '[]', 'gpt-4');
                    "#,
                )
                .expect("seed legacy schema");
        }

        let backend = SqliteTreeBackend::open(&db_path).expect("open legacy database");
        let old = backend
            .get_node(&NodeId::parse("old").expect("id"))
            .expect("get legacy node")
            .expect("legacy node exists");
        assert_eq!(old.kind, NodeKind::Assistant);

        backend
            .insert_node(&node("new", Some("old"), NodeKind::Assistant))
            .expect("assistant insert honours legacy constraint");
        let new = backend
            .get_node(&NodeId::parse("new").expect("id"))
            .expect("get new node")
            .expect("new node exists");
        assert_eq!(new.kind, NodeKind::Assistant);
    }

    #[test]
    fn regression_unknown_persisted_kind_is_a_storage_fault() {
        let backend = SqliteTreeBackend::open_in_memory().expect("open in-memory backend");
        backend
            .connection()
            .expect("lock connection")
            .execute(
                "INSERT INTO Node (id, content, type) VALUES ('x', 'body', 'system')",
                [],
            )
            .expect("raw insert");
        let error = backend
            .get_node(&NodeId::parse("x").expect("id"))
            .expect_err("unknown kind should fail to decode");
        assert!(error.is_storage_fault());
    }
}
