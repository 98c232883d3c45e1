use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;
use uuid::Uuid;

use crate::models::{
    Conversation, ConversationSummary, ConversationUpdate, MemoryRecord, Message, MessagePage,
    MessageRole, NewConversation, Role, User,
};
use crate::{Result, StoreError};

mod embedded {
    use refinery::embed_migrations;
    embed_migrations!("migrations");
}

/// Repository over SQLite for accounts and conversation history.
///
/// Thread-safe via an internal `Mutex<Connection>`. Calls block; async
/// callers wrap them in `spawn_blocking` or accept the short critical section.
pub struct ConversationStore {
    conn: Mutex<Connection>,
}

impl ConversationStore {
    /// Open (or create) the database at `path` and run pending migrations.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;

        let mut store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        debug!(path = %path.display(), "Opened conversation store");
        Ok(store)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        let mut store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&mut self) -> Result<()> {
        embedded::migrations::runner()
            .run(self.conn.get_mut())
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        Ok(())
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    /// Cheap liveness probe used by the health endpoint.
    pub fn ping(&self) -> Result<()> {
        self.conn().query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }

    // ── Users ───────────────────────────────────────────────────────

    pub fn create_user(&self, username: &str, password_hash: &str, role: Role) -> Result<User> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let now_str = fmt_dt(&now);

        self.conn()
            .execute(
                "INSERT INTO users (id, username, password_hash, role, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![id, username, password_hash, role.as_str(), now_str],
            )
            .map_err(|e| StoreError::from_insert(e, || format!("username '{username}' is taken")))?;

        Ok(User {
            id,
            username: username.to_string(),
            password_hash: password_hash.to_string(),
            role,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        Ok(self
            .conn()
            .query_row(
                "SELECT id, username, password_hash, role, created_at, updated_at
                 FROM users WHERE username = ?1",
                params![username],
                row_to_user,
            )
            .optional()?)
    }

    pub fn get_user(&self, id: &str) -> Result<User> {
        self.conn()
            .query_row(
                "SELECT id, username, password_hash, role, created_at, updated_at
                 FROM users WHERE id = ?1",
                params![id],
                row_to_user,
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("user {id}")))
    }

    /// Delete an account. Its conversations and messages go with it.
    pub fn delete_user(&self, id: &str) -> Result<()> {
        let changed = self
            .conn()
            .execute("DELETE FROM users WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("user {id}")));
        }
        Ok(())
    }

    // ── Conversations ───────────────────────────────────────────────

    /// Create a conversation together with its first user message and reply.
    ///
    /// All three rows and the last-message pointer commit together.
    pub fn create_conversation(
        &self,
        new: NewConversation<'_>,
    ) -> Result<(Conversation, Vec<Message>)> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let created = fmt_dt(&new.user_at);
        tx.execute(
            "INSERT INTO conversations (id, user_id, name, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![new.id, new.user_id, new.name, created],
        )
        .map_err(|e| {
            StoreError::from_insert(e, || format!("conversation {} already exists", new.id))
        })?;

        let question = insert_message(&tx, new.id, MessageRole::User, new.user_message, new.user_at)?;
        let answer = insert_message(&tx, new.id, MessageRole::Assistant, new.reply, new.reply_at)?;
        set_last_message(&tx, new.id, &answer)?;
        tx.commit()?;

        let conversation = Conversation {
            id: new.id.to_string(),
            user_id: new.user_id.to_string(),
            name: new.name.to_string(),
            last_message_id: Some(answer.id),
            last_msg_time: Some(answer.created_at),
            created_at: new.user_at,
            updated_at: answer.created_at,
        };
        Ok((conversation, vec![question, answer]))
    }

    /// Fetch a conversation, scoped to its owner.
    pub fn get_conversation(&self, id: &str, user_id: &str) -> Result<Conversation> {
        self.conn()
            .query_row(
                "SELECT id, user_id, name, last_message_id, last_msg_time, created_at, updated_at
                 FROM conversations WHERE id = ?1 AND user_id = ?2",
                params![id, user_id],
                row_to_conversation,
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("conversation {id}")))
    }

    /// List a user's conversations, newest activity first.
    ///
    /// Conversations without messages sort after those with messages, then by
    /// `updated_at`.
    pub fn list_conversations(&self, user_id: &str) -> Result<Vec<ConversationSummary>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, name, last_msg_time, updated_at FROM conversations
             WHERE user_id = ?1
             ORDER BY last_msg_time IS NULL, last_msg_time DESC, updated_at DESC",
        )?;
        let rows = stmt.query_map(params![user_id], |row| {
            Ok(ConversationSummary {
                id: row.get(0)?,
                name: row.get(1)?,
                last_msg_time: row.get::<_, Option<String>>(2)?.map(|s| parse_dt(&s)),
                updated_at: parse_dt(&row.get::<_, String>(3)?),
            })
        })?;
        let list = rows.collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(list)
    }

    /// Rename and/or pin a conversation.
    ///
    /// Pinning stamps the last-message time with now so it lists first.
    pub fn update_conversation(
        &self,
        id: &str,
        user_id: &str,
        update: &ConversationUpdate,
    ) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let now = fmt_dt(&Utc::now());

        let exists: Option<String> = tx
            .query_row(
                "SELECT id FROM conversations WHERE id = ?1 AND user_id = ?2",
                params![id, user_id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(StoreError::NotFound(format!("conversation {id}")));
        }

        if let Some(name) = update.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            tx.execute(
                "UPDATE conversations SET name = ?1, updated_at = ?2 WHERE id = ?3",
                params![name, now, id],
            )?;
        }
        if update.pin_to_top {
            tx.execute(
                "UPDATE conversations SET last_msg_time = ?1, updated_at = ?1 WHERE id = ?2",
                params![now, id],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Delete a conversation and all of its messages.
    pub fn delete_conversation(&self, id: &str, user_id: &str) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let owned: Option<String> = tx
            .query_row(
                "SELECT id FROM conversations WHERE id = ?1 AND user_id = ?2",
                params![id, user_id],
                |row| row.get(0),
            )
            .optional()?;
        if owned.is_none() {
            return Err(StoreError::NotFound(format!("conversation {id}")));
        }
        let removed = tx.execute(
            "DELETE FROM messages WHERE conversation_id = ?1",
            params![id],
        )?;
        tx.execute("DELETE FROM conversations WHERE id = ?1", params![id])?;
        tx.commit()?;

        debug!(conversation_id = id, removed, "Deleted conversation");
        Ok(())
    }

    // ── Messages ────────────────────────────────────────────────────

    /// Append one message without moving the last-message pointer.
    pub fn append_message(
        &self,
        conversation_id: &str,
        role: MessageRole,
        content: &str,
        at: DateTime<Utc>,
    ) -> Result<Message> {
        let conn = self.conn();
        insert_message(&conn, conversation_id, role, content, at)
    }

    /// Write a user message, its reply and the pointer to the reply.
    pub fn append_exchange(
        &self,
        conversation_id: &str,
        user_message: &str,
        user_at: DateTime<Utc>,
        reply: &str,
        reply_at: DateTime<Utc>,
    ) -> Result<Vec<Message>> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let question = insert_message(&tx, conversation_id, MessageRole::User, user_message, user_at)?;
        let answer = insert_message(&tx, conversation_id, MessageRole::Assistant, reply, reply_at)?;
        set_last_message(&tx, conversation_id, &answer)?;
        tx.commit()?;
        Ok(vec![question, answer])
    }

    /// Persist a completed assistant reply and point the conversation at it.
    ///
    /// Both writes commit together or not at all.
    pub fn record_reply(
        &self,
        conversation_id: &str,
        content: &str,
        at: DateTime<Utc>,
    ) -> Result<Message> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let message = insert_message(&tx, conversation_id, MessageRole::Assistant, content, at)?;
        set_last_message(&tx, conversation_id, &message)?;
        tx.commit()?;
        Ok(message)
    }

    /// Page backwards through history. Results come back oldest first.
    pub fn list_messages(&self, conversation_id: &str, page: &MessagePage) -> Result<Vec<Message>> {
        let conn = self.conn();
        let limit = page.limit as i64;

        let mut messages = match page.before {
            Some(cursor) => {
                let mut stmt = conn.prepare(
                    "SELECT id, conversation_id, role, content, created_at FROM messages
                     WHERE conversation_id = ?1
                       AND (created_at < ?2 OR (created_at = ?2 AND id < ?3))
                     ORDER BY created_at DESC, id DESC
                     LIMIT ?4",
                )?;
                let rows = stmt.query_map(
                    params![conversation_id, fmt_dt(&cursor.created_at), cursor.id, limit],
                    row_to_message,
                )?;
                rows.collect::<std::result::Result<Vec<_>, _>>()?
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT id, conversation_id, role, content, created_at FROM messages
                     WHERE conversation_id = ?1
                     ORDER BY created_at DESC, id DESC
                     LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![conversation_id, limit], row_to_message)?;
                rows.collect::<std::result::Result<Vec<_>, _>>()?
            }
        };
        messages.reverse();
        Ok(messages)
    }

    // ── Memory ──────────────────────────────────────────────────────

    pub fn get_memory(&self, user_id: &str, key: &str) -> Result<Option<MemoryRecord>> {
        Ok(self
            .conn()
            .query_row(
                "SELECT user_id, key, value, created_at, updated_at
                 FROM user_memory WHERE user_id = ?1 AND key = ?2",
                params![user_id, key],
                row_to_memory,
            )
            .optional()?)
    }

    /// Insert or replace a memory document. `created_at` survives a replace.
    pub fn put_memory(
        &self,
        user_id: &str,
        key: &str,
        value: &serde_json::Value,
    ) -> Result<MemoryRecord> {
        let encoded = serde_json::to_string(value)?;
        let now = fmt_dt(&Utc::now());

        let conn = self.conn();
        let changed = conn.execute(
            "INSERT INTO user_memory (user_id, key, value, created_at, updated_at)
             SELECT ?1, ?2, ?3, ?4, ?4 WHERE EXISTS (SELECT 1 FROM users WHERE id = ?1)
             ON CONFLICT (user_id, key) DO UPDATE
                SET value = excluded.value, updated_at = excluded.updated_at",
            params![user_id, key, encoded, now],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("user {user_id}")));
        }

        conn.query_row(
            "SELECT user_id, key, value, created_at, updated_at
             FROM user_memory WHERE user_id = ?1 AND key = ?2",
            params![user_id, key],
            row_to_memory,
        )
        .map_err(StoreError::from)
    }

    /// Remove a memory document. Returns whether one existed.
    pub fn delete_memory(&self, user_id: &str, key: &str) -> Result<bool> {
        let changed = self.conn().execute(
            "DELETE FROM user_memory WHERE user_id = ?1 AND key = ?2",
            params![user_id, key],
        )?;
        Ok(changed > 0)
    }
}

fn insert_message(
    conn: &Connection,
    conversation_id: &str,
    role: MessageRole,
    content: &str,
    at: DateTime<Utc>,
) -> Result<Message> {
    conn.execute(
        "INSERT INTO messages (conversation_id, role, content, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![conversation_id, role.as_str(), content, fmt_dt(&at)],
    )?;
    Ok(Message {
        id: conn.last_insert_rowid(),
        conversation_id: conversation_id.to_string(),
        role,
        content: content.to_string(),
        created_at: at,
    })
}

fn set_last_message(conn: &Connection, conversation_id: &str, message: &Message) -> Result<()> {
    let at = fmt_dt(&message.created_at);
    let changed = conn.execute(
        "UPDATE conversations SET last_message_id = ?1, last_msg_time = ?2, updated_at = ?2
         WHERE id = ?3",
        params![message.id, at, conversation_id],
    )?;
    if changed == 0 {
        return Err(StoreError::NotFound(format!("conversation {conversation_id}")));
    }
    Ok(())
}

/// Fixed-width UTC timestamps so text ordering matches time ordering.
fn fmt_dt(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_dt(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_enum<T: std::str::FromStr<Err = String>>(idx: usize, s: &str) -> rusqlite::Result<T> {
    s.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            e.into(),
        )
    })
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        password_hash: row.get(2)?,
        role: parse_enum(3, &row.get::<_, String>(3)?)?,
        created_at: parse_dt(&row.get::<_, String>(4)?),
        updated_at: parse_dt(&row.get::<_, String>(5)?),
    })
}

fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        last_message_id: row.get(3)?,
        last_msg_time: row.get::<_, Option<String>>(4)?.map(|s| parse_dt(&s)),
        created_at: parse_dt(&row.get::<_, String>(5)?),
        updated_at: parse_dt(&row.get::<_, String>(6)?),
    })
}

fn row_to_memory(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryRecord> {
    let raw: String = row.get(2)?;
    let value = serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(MemoryRecord {
        user_id: row.get(0)?,
        key: row.get(1)?,
        value,
        created_at: parse_dt(&row.get::<_, String>(3)?),
        updated_at: parse_dt(&row.get::<_, String>(4)?),
    })
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        role: parse_enum(2, &row.get::<_, String>(2)?)?,
        content: row.get(3)?,
        created_at: parse_dt(&row.get::<_, String>(4)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageCursor;
    use chrono::Duration;

    fn test_store() -> ConversationStore {
        ConversationStore::open_in_memory().unwrap()
    }

    fn alice(store: &ConversationStore) -> User {
        store.create_user("alice", "hash", Role::User).unwrap()
    }

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
            + Duration::seconds(secs)
    }

    fn new_conv<'a>(id: &'a str, user_id: &'a str, at: i64) -> NewConversation<'a> {
        NewConversation {
            id,
            user_id,
            name: "Greetings",
            user_message: "hello",
            user_at: t(at),
            reply: "hi there",
            reply_at: t(at + 1),
        }
    }

    #[test]
    fn test_create_and_find_user() {
        let store = test_store();
        let user = alice(&store);

        let found = store.find_user_by_username("alice").unwrap().unwrap();
        assert_eq!(found.id, user.id);
        assert_eq!(found.role, Role::User);
        assert!(store.find_user_by_username("bob").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_username_conflicts() {
        let store = test_store();
        alice(&store);
        let err = store.create_user("alice", "other", Role::User).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn test_delete_user_cascades() {
        let store = test_store();
        let user = alice(&store);
        store.create_conversation(new_conv("c1", &user.id, 0)).unwrap();

        store.delete_user(&user.id).unwrap();

        assert!(matches!(store.get_user(&user.id), Err(StoreError::NotFound(_))));
        assert!(store.list_messages("c1", &MessagePage::default()).unwrap().is_empty());
        assert!(matches!(store.delete_user(&user.id), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_create_conversation_writes_exchange() {
        let store = test_store();
        let user = alice(&store);

        let (conv, messages) = store.create_conversation(new_conv("c1", &user.id, 0)).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[1].role, MessageRole::Assistant);
        assert_eq!(conv.last_message_id, Some(messages[1].id));

        let loaded = store.get_conversation("c1", &user.id).unwrap();
        assert_eq!(loaded.name, "Greetings");
        assert_eq!(loaded.last_message_id, Some(messages[1].id));
        assert_eq!(loaded.last_msg_time, Some(t(1)));
    }

    #[test]
    fn test_create_conversation_duplicate_id() {
        let store = test_store();
        let user = alice(&store);
        store.create_conversation(new_conv("c1", &user.id, 0)).unwrap();
        let err = store.create_conversation(new_conv("c1", &user.id, 5)).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.list_messages("c1", &MessagePage::default()).unwrap().len(), 2);
    }

    #[test]
    fn test_conversation_scoped_to_owner() {
        let store = test_store();
        let user = alice(&store);
        let bob = store.create_user("bob", "hash", Role::User).unwrap();
        store.create_conversation(new_conv("c1", &user.id, 0)).unwrap();

        assert!(matches!(
            store.get_conversation("c1", &bob.id),
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.delete_conversation("c1", &bob.id),
            Err(StoreError::NotFound(_))
        ));
        assert!(store.list_conversations(&bob.id).unwrap().is_empty());
    }

    #[test]
    fn test_list_conversations_order() {
        let store = test_store();
        let user = alice(&store);
        store.create_conversation(new_conv("older", &user.id, 0)).unwrap();
        store.create_conversation(new_conv("newer", &user.id, 100)).unwrap();

        let list = store.list_conversations(&user.id).unwrap();
        let ids: Vec<_> = list.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["newer", "older"]);
    }

    #[test]
    fn test_update_conversation_rename_and_pin() {
        let store = test_store();
        let user = alice(&store);
        store.create_conversation(new_conv("a", &user.id, 0)).unwrap();
        store.create_conversation(new_conv("b", &user.id, 100)).unwrap();

        store
            .update_conversation(
                "a",
                &user.id,
                &ConversationUpdate {
                    name: Some("  Renamed  ".into()),
                    pin_to_top: true,
                },
            )
            .unwrap();

        let list = store.list_conversations(&user.id).unwrap();
        assert_eq!(list[0].id, "a");
        assert_eq!(list[0].name, "Renamed");
    }

    #[test]
    fn test_update_blank_name_is_ignored() {
        let store = test_store();
        let user = alice(&store);
        store.create_conversation(new_conv("a", &user.id, 0)).unwrap();
        store
            .update_conversation(
                "a",
                &user.id,
                &ConversationUpdate {
                    name: Some("   ".into()),
                    pin_to_top: false,
                },
            )
            .unwrap();
        assert_eq!(store.get_conversation("a", &user.id).unwrap().name, "Greetings");
    }

    #[test]
    fn test_update_missing_conversation() {
        let store = test_store();
        let user = alice(&store);
        let err = store
            .update_conversation("nope", &user.id, &ConversationUpdate::default())
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn test_delete_conversation_removes_messages() {
        let store = test_store();
        let user = alice(&store);
        store.create_conversation(new_conv("c1", &user.id, 0)).unwrap();

        store.delete_conversation("c1", &user.id).unwrap();

        assert!(store.list_messages("c1", &MessagePage::default()).unwrap().is_empty());
        assert!(store.list_conversations(&user.id).unwrap().is_empty());
    }

    #[test]
    fn test_record_reply_moves_pointer() {
        let store = test_store();
        let user = alice(&store);
        store.create_conversation(new_conv("c1", &user.id, 0)).unwrap();
        store
            .append_message("c1", MessageRole::User, "more?", t(10))
            .unwrap();

        let reply = store.record_reply("c1", "sure", t(11)).unwrap();

        let conv = store.get_conversation("c1", &user.id).unwrap();
        assert_eq!(conv.last_message_id, Some(reply.id));
        assert_eq!(conv.last_msg_time, Some(t(11)));
        assert_eq!(store.list_messages("c1", &MessagePage::default()).unwrap().len(), 4);
    }

    #[test]
    fn test_record_reply_unknown_conversation_writes_nothing() {
        let store = test_store();
        assert!(store.record_reply("ghost", "text", t(0)).is_err());
        assert!(store.list_messages("ghost", &MessagePage::default()).unwrap().is_empty());
    }

    #[test]
    fn test_append_exchange() {
        let store = test_store();
        let user = alice(&store);
        store.create_conversation(new_conv("c1", &user.id, 0)).unwrap();

        let written = store
            .append_exchange("c1", "again", t(20), "once more", t(21))
            .unwrap();

        let conv = store.get_conversation("c1", &user.id).unwrap();
        assert_eq!(conv.last_message_id, Some(written[1].id));
    }

    #[test]
    fn test_list_messages_pagination() {
        let store = test_store();
        let user = alice(&store);
        store.create_conversation(new_conv("c1", &user.id, 0)).unwrap();
        for i in 0..5 {
            store
                .append_message("c1", MessageRole::User, &format!("m{i}"), t(10 + i))
                .unwrap();
        }

        let latest = store.list_messages("c1", &MessagePage::new(Some(3))).unwrap();
        let contents: Vec<_> = latest.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m2", "m3", "m4"]);

        let oldest = &latest[0];
        let earlier = store
            .list_messages(
                "c1",
                &MessagePage::new(Some(3)).before(MessageCursor {
                    created_at: oldest.created_at,
                    id: oldest.id,
                }),
            )
            .unwrap();
        let contents: Vec<_> = earlier.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["hi there", "m0", "m1"]);
    }

    #[test]
    fn test_cursor_breaks_timestamp_ties_by_id() {
        let store = test_store();
        let user = alice(&store);
        store.create_conversation(new_conv("c1", &user.id, 0)).unwrap();
        let a = store.append_message("c1", MessageRole::User, "a", t(50)).unwrap();
        let b = store.append_message("c1", MessageRole::User, "b", t(50)).unwrap();

        let page = store
            .list_messages(
                "c1",
                &MessagePage::new(Some(10)).before(MessageCursor {
                    created_at: b.created_at,
                    id: b.id,
                }),
            )
            .unwrap();
        assert_eq!(page.last().unwrap().id, a.id);
    }

    #[test]
    fn test_memory_put_get_replace() {
        let store = test_store();
        let user = alice(&store);
        assert!(store.get_memory(&user.id, "profile").unwrap().is_none());

        let first = store
            .put_memory(&user.id, "profile", &serde_json::json!({ "likes": ["tea"] }))
            .unwrap();
        assert_eq!(first.value["likes"][0], "tea");

        let second = store
            .put_memory(&user.id, "profile", &serde_json::json!({ "likes": ["coffee"] }))
            .unwrap();
        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at >= first.updated_at);

        let stored = store.get_memory(&user.id, "profile").unwrap().unwrap();
        assert_eq!(stored.value, serde_json::json!({ "likes": ["coffee"] }));
    }

    #[test]
    fn test_memory_scoped_to_user() {
        let store = test_store();
        let user = alice(&store);
        let bob = store.create_user("bob", "hash", Role::User).unwrap();
        store
            .put_memory(&user.id, "profile", &serde_json::json!("alice's"))
            .unwrap();

        assert!(store.get_memory(&bob.id, "profile").unwrap().is_none());
        assert!(!store.delete_memory(&bob.id, "profile").unwrap());
        assert!(store.delete_memory(&user.id, "profile").unwrap());
        assert!(store.get_memory(&user.id, "profile").unwrap().is_none());
    }

    #[test]
    fn test_memory_requires_user_and_cascades() {
        let store = test_store();
        let err = store
            .put_memory("ghost", "profile", &serde_json::json!({}))
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));

        let user = alice(&store);
        store.put_memory(&user.id, "profile", &serde_json::json!({})).unwrap();
        store.delete_user(&user.id).unwrap();
        assert!(store.get_memory(&user.id, "profile").unwrap().is_none());
    }

    #[test]
    fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("parley.db");
        {
            let store = ConversationStore::open(&path).unwrap();
            alice(&store);
        }
        let store = ConversationStore::open(&path).unwrap();
        assert!(store.find_user_by_username("alice").unwrap().is_some());
        store.ping().unwrap();
    }
}
