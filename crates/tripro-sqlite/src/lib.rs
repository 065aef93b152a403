use std::{
    ops::Bound,
    str::FromStr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use rust_decimal::Decimal;
use time::{format_description::well_known::Rfc3339, Date, Month, OffsetDateTime};
use uuid::Uuid;

use tripro_core::{
    Account, AccountType, DocumentRef, JournalEntry, JournalLine, JournalStatus, LedgerLine, Record,
    RecordKind, Settings, SubType,
};

pub use tripro_core::storage::{StorageBackend, StorageError, TransactionId};

pub struct SqliteStorage {
    conn: Mutex<Connection>,
    tx_counter: AtomicU64,
    active_tx: Mutex<Vec<TransactionId>>,
}

fn sql_err(e: rusqlite::Error) -> StorageError {
    StorageError::Other(e.to_string())
}

impl SqliteStorage {
    pub fn new(path: &str) -> Result<Self, StorageError> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()
        } else {
            Connection::open(path)
        }
        .map_err(sql_err)?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(sql_err)?;

        let storage = Self {
            conn: Mutex::new(conn),
            tx_counter: AtomicU64::new(1),
            active_tx: Mutex::new(Vec::new()),
        };
        storage.init_schema()?;
        Ok(storage)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn
            .lock()
            .map_err(|e| StorageError::Other(e.to_string()))
    }

    fn active_tx(&self) -> Result<MutexGuard<'_, Vec<TransactionId>>, StorageError> {
        self.active_tx
            .lock()
            .map_err(|e| StorageError::Other(e.to_string()))
    }

    fn init_schema(&self) -> Result<(), StorageError> {
        let conn = self.conn()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS accounts (
                id TEXT PRIMARY KEY,
                code TEXT NOT NULL,
                name TEXT NOT NULL,
                account_type TEXT NOT NULL,
                parent_id TEXT,
                is_group INTEGER NOT NULL DEFAULT 0,
                sub_type TEXT,
                is_active INTEGER NOT NULL DEFAULT 1,
                deleted_at TEXT,
                FOREIGN KEY (parent_id) REFERENCES accounts(id)
            );

            CREATE INDEX IF NOT EXISTS idx_accounts_code ON accounts(code);

            CREATE TABLE IF NOT EXISTS journal_entries (
                id TEXT PRIMARY KEY,
                sequence INTEGER NOT NULL UNIQUE,
                date TEXT NOT NULL,
                reference TEXT NOT NULL UNIQUE,
                description TEXT NOT NULL,
                status TEXT NOT NULL,
                related_kind TEXT,
                related_id TEXT,
                created_at TEXT NOT NULL,
                deleted_at TEXT
            );

            CREATE TABLE IF NOT EXISTS journal_lines (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                journal_id TEXT NOT NULL,
                line_no INTEGER NOT NULL,
                account_id TEXT NOT NULL,
                debit TEXT NOT NULL,
                credit TEXT NOT NULL,
                description TEXT,
                cost_center_id TEXT,
                FOREIGN KEY (journal_id) REFERENCES journal_entries(id),
                FOREIGN KEY (account_id) REFERENCES accounts(id)
            );

            CREATE INDEX IF NOT EXISTS idx_journal_date
                ON journal_entries(date, sequence);

            CREATE INDEX IF NOT EXISTS idx_lines_account
                ON journal_lines(account_id);

            CREATE INDEX IF NOT EXISTS idx_lines_journal
                ON journal_lines(journal_id);

            CREATE TABLE IF NOT EXISTS records (
                kind TEXT NOT NULL,
                id TEXT NOT NULL,
                body TEXT NOT NULL,
                deleted_at TEXT,
                PRIMARY KEY (kind, id)
            );

            CREATE TABLE IF NOT EXISTS settings (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                body TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sequence_counter (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                value INTEGER NOT NULL
            );

            INSERT OR IGNORE INTO sequence_counter (id, value) VALUES (1, 0);
            ",
        )
        .map_err(sql_err)?;
        Ok(())
    }

    fn next_sequence(conn: &Connection) -> Result<u64, StorageError> {
        conn.execute(
            "UPDATE sequence_counter SET value = value + 1 WHERE id = 1",
            [],
        )
        .map_err(sql_err)?;
        let seq: u64 = conn
            .query_row("SELECT value FROM sequence_counter WHERE id = 1", [], |r| {
                r.get(0)
            })
            .map_err(sql_err)?;
        Ok(seq)
    }

    fn load_lines(conn: &Connection, journal_id: &str) -> Result<Vec<JournalLine>, StorageError> {
        let mut stmt = conn
            .prepare(
                "SELECT account_id, debit, credit, description, cost_center_id
                 FROM journal_lines WHERE journal_id = ?1 ORDER BY line_no",
            )
            .map_err(sql_err)?;
        let rows = stmt
            .query_map(params![journal_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                ))
            })
            .map_err(sql_err)?;

        let mut lines = Vec::new();
        for row in rows {
            let (account_id, debit, credit, description, cost_center_id) = row.map_err(sql_err)?;
            lines.push(JournalLine {
                account_id: Arc::from(account_id),
                debit: str_to_decimal(&debit)?,
                credit: str_to_decimal(&credit)?,
                description: description.map(Arc::from),
                cost_center_id: cost_center_id.map(Arc::from),
            });
        }
        Ok(lines)
    }

    fn query_journals(
        conn: &Connection,
        filter: &str,
        values: &[String],
    ) -> Result<Vec<JournalEntry>, StorageError> {
        let sql = format!(
            "SELECT {} FROM journal_entries WHERE {} ORDER BY date, sequence",
            JOURNAL_COLUMNS, filter
        );
        let mut stmt = conn.prepare(&sql).map_err(sql_err)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), read_journal_row)
            .map_err(sql_err)?;

        let mut journals = Vec::new();
        for row in rows {
            let row = row.map_err(sql_err)?;
            let lines = Self::load_lines(conn, &row.0)?;
            journals.push(journal_from_row(row, lines)?);
        }
        Ok(journals)
    }

    fn query_accounts(conn: &Connection, filter: &str, value: Option<&str>) -> Result<Vec<Account>, StorageError> {
        let sql = format!(
            "SELECT {} FROM accounts WHERE {} ORDER BY code",
            ACCOUNT_COLUMNS, filter
        );
        let mut stmt = conn.prepare(&sql).map_err(sql_err)?;
        let rows = stmt
            .query_map(params_from_iter(value.iter()), read_account_row)
            .map_err(sql_err)?;
        let mut accounts = Vec::new();
        for row in rows {
            accounts.push(account_from_row(row.map_err(sql_err)?)?);
        }
        Ok(accounts)
    }

    fn code_taken(conn: &Connection, code: &str, except_id: &str) -> Result<bool, StorageError> {
        conn.query_row(
            "SELECT COUNT(*) > 0 FROM accounts WHERE code = ?1 AND id <> ?2 AND deleted_at IS NULL",
            params![code, except_id],
            |row| row.get(0),
        )
        .map_err(sql_err)
    }

    fn live_account_exists(conn: &Connection, id: &str) -> Result<bool, StorageError> {
        conn.query_row(
            "SELECT COUNT(*) > 0 FROM accounts WHERE id = ?1 AND deleted_at IS NULL",
            params![id],
            |row| row.get(0),
        )
        .map_err(sql_err)
    }

    fn query_records(
        &self,
        kind: RecordKind,
        deleted: bool,
    ) -> Result<Vec<(Record, Option<OffsetDateTime>)>, StorageError> {
        let conn = self.conn()?;
        let sql = if deleted {
            "SELECT body, deleted_at FROM records WHERE kind = ?1 AND deleted_at IS NOT NULL ORDER BY rowid"
        } else {
            "SELECT body, deleted_at FROM records WHERE kind = ?1 AND deleted_at IS NULL ORDER BY rowid"
        };
        let mut stmt = conn.prepare(sql).map_err(sql_err)?;
        let rows = stmt
            .query_map(params![kind.as_str()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
            })
            .map_err(sql_err)?;

        let mut records = Vec::new();
        for row in rows {
            let (body, deleted_at) = row.map_err(sql_err)?;
            records.push((str_to_record(&body)?, opt_str_to_datetime(deleted_at)?));
        }
        Ok(records)
    }
}

const ACCOUNT_COLUMNS: &str =
    "id, code, name, account_type, parent_id, is_group, sub_type, is_active, deleted_at";

const JOURNAL_COLUMNS: &str =
    "id, sequence, date, reference, description, status, related_kind, related_id, created_at, deleted_at";

type AccountRow = (
    String,
    String,
    String,
    String,
    Option<String>,
    bool,
    Option<String>,
    bool,
    Option<String>,
);

type JournalRow = (
    String,
    u64,
    String,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    String,
    Option<String>,
);

fn read_account_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AccountRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
    ))
}

fn read_journal_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<JournalRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
    ))
}

fn account_from_row(row: AccountRow) -> Result<Account, StorageError> {
    let (id, code, name, account_type, parent_id, is_group, sub_type, is_active, deleted_at) = row;
    Ok(Account {
        id: Arc::from(id),
        code: Arc::from(code),
        name: Arc::from(name),
        account_type: AccountType::from_str(&account_type)
            .map_err(|e| StorageError::Other(e.to_string()))?,
        parent_id: parent_id.map(Arc::from),
        is_group,
        sub_type: match sub_type.as_deref() {
            Some("current") => Some(SubType::Current),
            Some("non_current") => Some(SubType::NonCurrent),
            _ => None,
        },
        is_active,
        deleted_at: opt_str_to_datetime(deleted_at)?,
    })
}

fn journal_from_row(row: JournalRow, lines: Vec<JournalLine>) -> Result<JournalEntry, StorageError> {
    let (id, sequence, date, reference, description, status, related_kind, related_id, created_at, deleted_at) =
        row;
    let related_document = match (related_kind, related_id) {
        (Some(kind), Some(id)) => Some(DocumentRef {
            kind: RecordKind::from_str(&kind).map_err(StorageError::Other)?,
            id: str_to_uuid(&id)?,
        }),
        _ => None,
    };
    Ok(JournalEntry {
        id: str_to_uuid(&id)?,
        sequence,
        date: str_to_date(&date)?,
        reference: Arc::from(reference),
        description: Arc::from(description),
        status: JournalStatus::from_str(&status).map_err(StorageError::Other)?,
        lines,
        related_document,
        created_at: str_to_datetime(&created_at)?,
        deleted_at: opt_str_to_datetime(deleted_at)?,
    })
}

fn sub_type_to_str(sub_type: Option<SubType>) -> Option<&'static str> {
    sub_type.map(|s| match s {
        SubType::Current => "current",
        SubType::NonCurrent => "non_current",
    })
}

fn date_to_str(d: Date) -> String {
    format!("{:04}-{:02}-{:02}", d.year(), d.month() as u8, d.day())
}

fn str_to_date(s: &str) -> Result<Date, StorageError> {
    let invalid = || StorageError::Other(format!("Invalid date: {}", s));
    let mut parts = s.split('-');
    let year = parts.next().and_then(|p| p.parse::<i32>().ok()).ok_or_else(invalid)?;
    let month = parts.next().and_then(|p| p.parse::<u8>().ok()).ok_or_else(invalid)?;
    let day = parts.next().and_then(|p| p.parse::<u8>().ok()).ok_or_else(invalid)?;
    let month = Month::try_from(month).map_err(|_| invalid())?;
    Date::from_calendar_date(year, month, day).map_err(|_| invalid())
}

fn datetime_to_str(at: OffsetDateTime) -> Result<String, StorageError> {
    at.format(&Rfc3339)
        .map_err(|e| StorageError::Other(e.to_string()))
}

fn str_to_datetime(s: &str) -> Result<OffsetDateTime, StorageError> {
    OffsetDateTime::parse(s, &Rfc3339).map_err(|e| StorageError::Other(format!("Invalid timestamp: {}", e)))
}

fn opt_datetime_to_str(at: Option<OffsetDateTime>) -> Result<Option<String>, StorageError> {
    at.map(datetime_to_str).transpose()
}

fn opt_str_to_datetime(s: Option<String>) -> Result<Option<OffsetDateTime>, StorageError> {
    s.as_deref().map(str_to_datetime).transpose()
}

fn str_to_decimal(s: &str) -> Result<Decimal, StorageError> {
    Decimal::from_str(s).map_err(|e| StorageError::Other(format!("Invalid decimal: {}", e)))
}

fn str_to_uuid(s: &str) -> Result<Uuid, StorageError> {
    Uuid::parse_str(s).map_err(|e| StorageError::Other(format!("Invalid id: {}", e)))
}

fn str_to_record(s: &str) -> Result<Record, StorageError> {
    serde_json::from_str(s).map_err(|e| StorageError::Other(format!("Invalid record: {}", e)))
}

fn range_filter(column: &str, from: Bound<Date>, to: Bound<Date>) -> (String, Vec<String>) {
    let (from_op, from_str) = match from {
        Bound::Included(d) => (">=", date_to_str(d)),
        Bound::Excluded(d) => (">", date_to_str(d)),
        Bound::Unbounded => (">=", "0000-01-01".to_string()),
    };
    let (to_op, to_str) = match to {
        Bound::Included(d) => ("<=", date_to_str(d)),
        Bound::Excluded(d) => ("<", date_to_str(d)),
        Bound::Unbounded => ("<=", "9999-12-31".to_string()),
    };
    (
        format!("{col} {} ?1 AND {col} {} ?2", from_op, to_op, col = column),
        vec![from_str, to_str],
    )
}

impl StorageBackend for SqliteStorage {
    fn create_account(&self, account: &Account) -> Result<(), StorageError> {
        let conn = self.conn()?;
        let exists: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM accounts WHERE id = ?1",
                params![account.id.as_ref()],
                |row| row.get(0),
            )
            .map_err(sql_err)?;
        if exists {
            return Err(StorageError::DuplicateAccount(account.id.to_string()));
        }
        if Self::code_taken(&conn, &account.code, &account.id)? {
            return Err(StorageError::DuplicateAccountCode(account.code.to_string()));
        }
        if let Some(parent) = &account.parent_id {
            if !Self::live_account_exists(&conn, parent)? {
                return Err(StorageError::ParentNotFound(parent.to_string()));
            }
        }

        conn.execute(
            "INSERT INTO accounts (id, code, name, account_type, parent_id, is_group, sub_type, is_active, deleted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                account.id.as_ref(),
                account.code.as_ref(),
                account.name.as_ref(),
                account.account_type.as_str(),
                account.parent_id.as_deref(),
                account.is_group,
                sub_type_to_str(account.sub_type),
                account.is_active,
                opt_datetime_to_str(account.deleted_at)?,
            ],
        )
        .map_err(sql_err)?;
        Ok(())
    }

    fn update_account(&self, account: &Account) -> Result<(), StorageError> {
        let conn = self.conn()?;
        if Self::code_taken(&conn, &account.code, &account.id)? {
            return Err(StorageError::DuplicateAccountCode(account.code.to_string()));
        }
        if let Some(parent) = &account.parent_id {
            if parent == &account.id || !Self::live_account_exists(&conn, parent)? {
                return Err(StorageError::ParentNotFound(parent.to_string()));
            }
        }
        let changed = conn
            .execute(
                "UPDATE accounts SET code = ?2, name = ?3, account_type = ?4, parent_id = ?5,
                 is_group = ?6, sub_type = ?7, is_active = ?8, deleted_at = ?9 WHERE id = ?1",
                params![
                    account.id.as_ref(),
                    account.code.as_ref(),
                    account.name.as_ref(),
                    account.account_type.as_str(),
                    account.parent_id.as_deref(),
                    account.is_group,
                    sub_type_to_str(account.sub_type),
                    account.is_active,
                    opt_datetime_to_str(account.deleted_at)?,
                ],
            )
            .map_err(sql_err)?;
        if changed == 0 {
            return Err(StorageError::AccountNotFound(account.id.to_string()));
        }
        Ok(())
    }

    fn get_account(&self, id: &str) -> Result<Option<Account>, StorageError> {
        let conn = self.conn()?;
        Ok(Self::query_accounts(&conn, "id = ?1", Some(id))?.into_iter().next())
    }

    fn find_account_by_code(&self, code: &str) -> Result<Option<Account>, StorageError> {
        let conn = self.conn()?;
        Ok(Self::query_accounts(&conn, "code = ?1 AND deleted_at IS NULL", Some(code))?
            .into_iter()
            .next())
    }

    fn list_accounts(&self) -> Result<Vec<Account>, StorageError> {
        let conn = self.conn()?;
        Self::query_accounts(&conn, "deleted_at IS NULL", None)
    }

    fn delete_account(&self, id: &str, at: OffsetDateTime) -> Result<(), StorageError> {
        let conn = self.conn()?;
        if !Self::live_account_exists(&conn, id)? {
            return Err(StorageError::AccountNotFound(id.to_string()));
        }
        let in_use: bool = conn
            .query_row(
                "SELECT EXISTS (SELECT 1 FROM journal_lines WHERE account_id = ?1)
                     OR EXISTS (SELECT 1 FROM accounts WHERE parent_id = ?1 AND deleted_at IS NULL)",
                params![id],
                |row| row.get(0),
            )
            .map_err(sql_err)?;
        if in_use {
            return Err(StorageError::AccountInUse(id.to_string()));
        }
        conn.execute(
            "UPDATE accounts SET deleted_at = ?2 WHERE id = ?1",
            params![id, datetime_to_str(at)?],
        )
        .map_err(sql_err)?;
        Ok(())
    }

    fn insert_journal(&self, entry: &JournalEntry) -> Result<JournalEntry, StorageError> {
        let mut conn = self.conn()?;
        let sp = conn.savepoint().map_err(sql_err)?;

        let duplicate: bool = sp
            .query_row(
                "SELECT COUNT(*) > 0 FROM journal_entries WHERE reference = ?1",
                params![entry.reference.as_ref()],
                |row| row.get(0),
            )
            .map_err(sql_err)?;
        if duplicate {
            return Err(StorageError::DuplicateReference(entry.reference.to_string()));
        }
        for line in &entry.lines {
            let exists: bool = sp
                .query_row(
                    "SELECT COUNT(*) > 0 FROM accounts WHERE id = ?1",
                    params![line.account_id.as_ref()],
                    |row| row.get(0),
                )
                .map_err(sql_err)?;
            if !exists {
                return Err(StorageError::AccountNotFound(line.account_id.to_string()));
            }
        }

        let mut stored = entry.clone();
        if stored.sequence == 0 {
            stored.sequence = Self::next_sequence(&sp)?;
        } else {
            sp.execute(
                "UPDATE sequence_counter SET value = MAX(value, ?1) WHERE id = 1",
                params![stored.sequence],
            )
            .map_err(sql_err)?;
        }

        let jid = stored.id.to_string();
        sp.execute(
            "INSERT INTO journal_entries (id, sequence, date, reference, description, status, related_kind, related_id, created_at, deleted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                jid,
                stored.sequence,
                date_to_str(stored.date),
                stored.reference.as_ref(),
                stored.description.as_ref(),
                stored.status.as_str(),
                stored.related_document.map(|d| d.kind.as_str()),
                stored.related_document.map(|d| d.id.to_string()),
                datetime_to_str(stored.created_at)?,
                opt_datetime_to_str(stored.deleted_at)?,
            ],
        )
        .map_err(sql_err)?;

        for (line_no, line) in stored.lines.iter().enumerate() {
            sp.execute(
                "INSERT INTO journal_lines (journal_id, line_no, account_id, debit, credit, description, cost_center_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    jid,
                    line_no as i64,
                    line.account_id.as_ref(),
                    line.debit.to_string(),
                    line.credit.to_string(),
                    line.description.as_deref(),
                    line.cost_center_id.as_deref(),
                ],
            )
            .map_err(sql_err)?;
        }

        sp.commit().map_err(sql_err)?;
        Ok(stored)
    }

    fn get_journal(&self, id: Uuid) -> Result<Option<JournalEntry>, StorageError> {
        let conn = self.conn()?;
        Ok(Self::query_journals(&conn, "id = ?1", &[id.to_string()])?
            .into_iter()
            .next())
    }

    fn find_journal_by_reference(&self, reference: &str) -> Result<Option<JournalEntry>, StorageError> {
        let conn = self.conn()?;
        Ok(Self::query_journals(&conn, "reference = ?1", &[reference.to_string()])?
            .into_iter()
            .next())
    }

    fn list_journals(&self, from: Bound<Date>, to: Bound<Date>) -> Result<Vec<JournalEntry>, StorageError> {
        let conn = self.conn()?;
        let (filter, values) = range_filter("date", from, to);
        Self::query_journals(&conn, &filter, &values)
    }

    fn set_journal_status(&self, id: Uuid, status: JournalStatus) -> Result<(), StorageError> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE journal_entries SET status = ?2 WHERE id = ?1",
                params![id.to_string(), status.as_str()],
            )
            .map_err(sql_err)?;
        if changed == 0 {
            return Err(StorageError::JournalNotFound(id));
        }
        Ok(())
    }

    fn set_journal_deleted(&self, id: Uuid, at: Option<OffsetDateTime>) -> Result<(), StorageError> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE journal_entries SET deleted_at = ?2 WHERE id = ?1",
                params![id.to_string(), opt_datetime_to_str(at)?],
            )
            .map_err(sql_err)?;
        if changed == 0 {
            return Err(StorageError::JournalNotFound(id));
        }
        Ok(())
    }

    fn ledger_lines(&self, account_ids: &[Arc<str>], from: Bound<Date>, to: Bound<Date>) -> Result<Vec<LedgerLine>, StorageError> {
        let conn = self.conn()?;
        let (range, mut values) = range_filter("j.date", from, to);
        let mut sql = format!(
            "SELECT j.id, j.sequence, j.date, j.reference, j.description, l.account_id, l.debit, l.credit
             FROM journal_lines l JOIN journal_entries j ON j.id = l.journal_id
             WHERE j.status = 'posted' AND j.deleted_at IS NULL AND {}",
            range
        );
        if !account_ids.is_empty() {
            let placeholders: Vec<String> = (0..account_ids.len())
                .map(|i| format!("?{}", i + 3))
                .collect();
            sql.push_str(&format!(" AND l.account_id IN ({})", placeholders.join(", ")));
            values.extend(account_ids.iter().map(|a| a.to_string()));
        }
        sql.push_str(" ORDER BY j.date, j.sequence, l.line_no");

        let mut stmt = conn.prepare(&sql).map_err(sql_err)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, u64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                ))
            })
            .map_err(sql_err)?;

        let mut lines = Vec::new();
        for row in rows {
            let (jid, sequence, date, reference, description, account_id, debit, credit) =
                row.map_err(sql_err)?;
            lines.push(LedgerLine {
                journal_id: str_to_uuid(&jid)?,
                sequence,
                date: str_to_date(&date)?,
                reference: Arc::from(reference),
                description: Arc::from(description),
                account_id: Arc::from(account_id),
                debit: str_to_decimal(&debit)?,
                credit: str_to_decimal(&credit)?,
            });
        }
        Ok(lines)
    }

    fn get_balance(&self, account_id: &str, to: Bound<Date>) -> Result<Decimal, StorageError> {
        let conn = self.conn()?;
        let (range, mut values) = range_filter("j.date", Bound::Unbounded, to);
        values.push(account_id.to_string());
        let sql = format!(
            "SELECT l.debit, l.credit
             FROM journal_lines l JOIN journal_entries j ON j.id = l.journal_id
             WHERE j.status = 'posted' AND j.deleted_at IS NULL AND {} AND l.account_id = ?3",
            range
        );
        let mut stmt = conn.prepare(&sql).map_err(sql_err)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(sql_err)?;

        let mut balance = Decimal::ZERO;
        for row in rows {
            let (debit, credit) = row.map_err(sql_err)?;
            balance += str_to_decimal(&debit)? - str_to_decimal(&credit)?;
        }
        Ok(balance)
    }

    fn put_record(&self, record: &Record) -> Result<(), StorageError> {
        let conn = self.conn()?;
        let body = serde_json::to_string(record).map_err(|e| StorageError::Other(e.to_string()))?;
        conn.execute(
            "INSERT INTO records (kind, id, body) VALUES (?1, ?2, ?3)
             ON CONFLICT(kind, id) DO UPDATE SET body = excluded.body",
            params![record.kind().as_str(), record.id().to_string(), body],
        )
        .map_err(sql_err)?;
        Ok(())
    }

    fn get_record(&self, kind: RecordKind, id: Uuid) -> Result<Option<Record>, StorageError> {
        let conn = self.conn()?;
        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM records WHERE kind = ?1 AND id = ?2 AND deleted_at IS NULL",
                params![kind.as_str(), id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(sql_err)?;
        body.as_deref().map(str_to_record).transpose()
    }

    fn list_records(&self, kind: RecordKind) -> Result<Vec<Record>, StorageError> {
        Ok(self
            .query_records(kind, false)?
            .into_iter()
            .map(|(record, _)| record)
            .collect())
    }

    fn list_deleted_records(&self, kind: RecordKind) -> Result<Vec<(Record, OffsetDateTime)>, StorageError> {
        Ok(self
            .query_records(kind, true)?
            .into_iter()
            .filter_map(|(record, at)| at.map(|at| (record, at)))
            .collect())
    }

    fn set_record_deleted(&self, kind: RecordKind, id: Uuid, at: Option<OffsetDateTime>) -> Result<(), StorageError> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE records SET deleted_at = ?3 WHERE kind = ?1 AND id = ?2",
                params![kind.as_str(), id.to_string(), opt_datetime_to_str(at)?],
            )
            .map_err(sql_err)?;
        if changed == 0 {
            return Err(StorageError::RecordNotFound(kind, id));
        }
        Ok(())
    }

    fn purge_record(&self, kind: RecordKind, id: Uuid) -> Result<(), StorageError> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "DELETE FROM records WHERE kind = ?1 AND id = ?2",
                params![kind.as_str(), id.to_string()],
            )
            .map_err(sql_err)?;
        if changed == 0 {
            return Err(StorageError::RecordNotFound(kind, id));
        }
        Ok(())
    }

    fn get_settings(&self) -> Result<Settings, StorageError> {
        let conn = self.conn()?;
        let body: Option<String> = conn
            .query_row("SELECT body FROM settings WHERE id = 1", [], |row| row.get(0))
            .optional()
            .map_err(sql_err)?;
        match body {
            Some(body) => serde_json::from_str(&body)
                .map_err(|e| StorageError::Other(format!("Invalid settings: {}", e))),
            None => Ok(Settings::default()),
        }
    }

    fn put_settings(&self, settings: &Settings) -> Result<(), StorageError> {
        let conn = self.conn()?;
        let body = serde_json::to_string(settings).map_err(|e| StorageError::Other(e.to_string()))?;
        conn.execute(
            "INSERT OR REPLACE INTO settings (id, body) VALUES (1, ?1)",
            params![body],
        )
        .map_err(sql_err)?;
        Ok(())
    }

    fn begin_transaction(&self) -> Result<TransactionId, StorageError> {
        let mut active = self.active_tx()?;
        let conn = self.conn()?;
        let tx_id = self.tx_counter.fetch_add(1, Ordering::SeqCst);
        conn.execute_batch(&format!("SAVEPOINT tripro_tx_{}", tx_id))
            .map_err(sql_err)?;
        active.push(tx_id);
        tracing::debug!(tx_id, "SQLite transaction started");
        Ok(tx_id)
    }

    fn commit_transaction(&self, tx_id: TransactionId) -> Result<(), StorageError> {
        let mut active = self.active_tx()?;
        if active.last() != Some(&tx_id) {
            return Err(StorageError::NoActiveTransaction);
        }
        let conn = self.conn()?;
        conn.execute_batch(&format!("RELEASE SAVEPOINT tripro_tx_{}", tx_id))
            .map_err(sql_err)?;
        active.pop();
        tracing::debug!(tx_id, "SQLite transaction committed");
        Ok(())
    }

    fn rollback_transaction(&self, tx_id: TransactionId) -> Result<(), StorageError> {
        let mut active = self.active_tx()?;
        if active.last() != Some(&tx_id) {
            return Err(StorageError::NoActiveTransaction);
        }
        let conn = self.conn()?;
        conn.execute_batch(&format!(
            "ROLLBACK TO SAVEPOINT tripro_tx_{id}; RELEASE SAVEPOINT tripro_tx_{id}",
            id = tx_id
        ))
        .map_err(sql_err)?;
        active.pop();
        tracing::debug!(tx_id, "SQLite transaction rolled back");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tripro_core::{models::records::Employee, models::records::EmployeeStatus, TypedRecord};

    fn date(y: i32, m: u8, d: u8) -> Date {
        Date::from_calendar_date(y, Month::try_from(m).unwrap(), d).unwrap()
    }

    fn storage() -> SqliteStorage {
        let storage = SqliteStorage::new(":memory:").unwrap();
        storage
            .create_account(&Account::new("bank", "1232", "Bank", AccountType::Asset))
            .unwrap();
        storage
            .create_account(&Account::new("equity", "31", "Capital", AccountType::Equity))
            .unwrap();
        storage
    }

    fn investment(reference: &str, on: Date, amount: Decimal, status: JournalStatus) -> JournalEntry {
        JournalEntry {
            id: Uuid::new_v4(),
            sequence: 0,
            date: on,
            reference: Arc::from(reference),
            description: Arc::from("Investment"),
            status,
            lines: vec![
                JournalLine::debit("bank", amount).with_description("deposit"),
                JournalLine::credit("equity", amount),
            ],
            related_document: None,
            created_at: OffsetDateTime::UNIX_EPOCH,
            deleted_at: None,
        }
    }

    #[test]
    fn test_sqlite_basic_operations() {
        let storage = storage();
        let stored = storage
            .insert_journal(&investment("JE-000001", date(2023, 1, 1), dec!(1000.50), JournalStatus::Posted))
            .unwrap();
        assert_eq!(stored.sequence, 1);

        assert_eq!(storage.get_balance("bank", Bound::Unbounded).unwrap(), dec!(1000.50));
        assert_eq!(storage.get_balance("equity", Bound::Unbounded).unwrap(), dec!(-1000.50));
        assert_eq!(
            storage.get_balance("bank", Bound::Excluded(date(2023, 1, 1))).unwrap(),
            Decimal::ZERO
        );

        let loaded = storage.find_journal_by_reference("JE-000001").unwrap().unwrap();
        assert_eq!(loaded, stored);
        assert_eq!(loaded.lines[0].description.as_deref(), Some("deposit"));
    }

    #[test]
    fn test_sqlite_transaction_rollback() {
        let storage = storage();
        let tx_id = storage.begin_transaction().unwrap();
        storage
            .insert_journal(&investment("JE-1", date(2023, 1, 1), dec!(500), JournalStatus::Posted))
            .unwrap();
        storage.rollback_transaction(tx_id).unwrap();

        let bal = storage.get_balance("bank", Bound::Unbounded).unwrap();
        assert_eq!(bal, Decimal::ZERO, "Balance should be 0 after rollback");
        assert!(storage.find_journal_by_reference("JE-1").unwrap().is_none());
    }

    #[test]
    fn test_sqlite_nested_transactions() {
        let storage = storage();
        let outer = storage.begin_transaction().unwrap();
        storage
            .insert_journal(&investment("JE-1", date(2023, 1, 1), dec!(100), JournalStatus::Posted))
            .unwrap();
        let inner = storage.begin_transaction().unwrap();
        storage
            .insert_journal(&investment("JE-2", date(2023, 1, 2), dec!(50), JournalStatus::Posted))
            .unwrap();
        assert!(matches!(
            storage.commit_transaction(outer),
            Err(StorageError::NoActiveTransaction)
        ));
        storage.rollback_transaction(inner).unwrap();
        storage.commit_transaction(outer).unwrap();

        assert_eq!(storage.get_balance("bank", Bound::Unbounded).unwrap(), dec!(100));
    }

    #[test]
    fn test_sqlite_drafts_and_deleted_entries_are_excluded() {
        let storage = storage();
        let draft = storage
            .insert_journal(&investment("JE-1", date(2023, 2, 1), dec!(70), JournalStatus::Draft))
            .unwrap();
        assert!(storage
            .ledger_lines(&[], Bound::Unbounded, Bound::Unbounded)
            .unwrap()
            .is_empty());

        storage.set_journal_status(draft.id, JournalStatus::Posted).unwrap();
        let lines = storage
            .ledger_lines(&[Arc::from("bank")], Bound::Unbounded, Bound::Unbounded)
            .unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].debit, dec!(70));

        storage
            .set_journal_deleted(draft.id, Some(OffsetDateTime::UNIX_EPOCH))
            .unwrap();
        assert_eq!(storage.get_balance("bank", Bound::Unbounded).unwrap(), Decimal::ZERO);
        assert_eq!(
            storage.list_journals(Bound::Unbounded, Bound::Unbounded).unwrap().len(),
            1
        );
    }

    #[test]
    fn test_sqlite_records_and_settings() {
        let storage = storage();
        let employee = Employee {
            id: Uuid::new_v4(),
            full_name: "Sara".to_string(),
            salary: dec!(7000),
            status: EmployeeStatus::Active,
        };
        storage.put_record(&employee.clone().into_record()).unwrap();
        let loaded = storage.get_record(RecordKind::Employee, employee.id).unwrap();
        assert_eq!(loaded, Some(employee.clone().into_record()));

        let mut settings = storage.get_settings().unwrap();
        assert_eq!(settings.currency, "EGP");
        settings.company_name = "TriPro".to_string();
        settings.last_closed_date = Some(date(2023, 12, 31));
        storage.put_settings(&settings).unwrap();
        assert_eq!(storage.get_settings().unwrap(), settings);

        storage
            .set_record_deleted(RecordKind::Employee, employee.id, Some(OffsetDateTime::UNIX_EPOCH))
            .unwrap();
        assert!(storage.list_records(RecordKind::Employee).unwrap().is_empty());
        assert_eq!(storage.list_deleted_records(RecordKind::Employee).unwrap().len(), 1);
    }

    #[test]
    fn test_sqlite_account_rules() {
        let storage = storage();
        storage
            .create_account(&Account::new("assets", "1", "Assets", AccountType::Asset).group())
            .unwrap();
        storage
            .create_account(&Account::new("cash", "1231", "Cash", AccountType::Asset).under("assets"))
            .unwrap();
        assert!(matches!(
            storage.create_account(&Account::new("cash2", "1231", "Cash", AccountType::Asset)),
            Err(StorageError::DuplicateAccountCode(_))
        ));
        assert!(matches!(
            storage.delete_account("assets", OffsetDateTime::UNIX_EPOCH),
            Err(StorageError::AccountInUse(_))
        ));
        storage.delete_account("cash", OffsetDateTime::UNIX_EPOCH).unwrap();
        storage.delete_account("assets", OffsetDateTime::UNIX_EPOCH).unwrap();

        let codes: Vec<String> = storage
            .list_accounts()
            .unwrap()
            .iter()
            .map(|a| a.code.to_string())
            .collect();
        assert_eq!(codes, vec!["1232", "31"]);
        assert!(storage.get_account("cash").unwrap().unwrap().deleted_at.is_some());
    }
}
