//! Statement shape validation and insert-verb rewriting
//!
//! The validator gates the *shape* of a single-row, single-table write and
//! nothing more; the database stays the authority on semantic validity.
//! Kept intentionally shallow: a regex, not a SQL parser.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Shape of an acceptable queued write: `INSERT [IGNORE] | REPLACE` into a
/// single table with an explicit column list and a single value list,
/// optional trailing semicolon, optional surrounding whitespace.
static INSERT_SHAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s*(INSERT(\s+IGNORE)?|REPLACE)\s+INTO\s+[A-Za-z_][A-Za-z0-9_]*\s*\(([^)]+)\)\s*VALUES\s*\(([^)]+)\)\s*;?\s*$",
    )
    .expect("insert shape pattern is valid")
});

/// First occurrence of any insert verb phrase, tolerant of casing and
/// irregular internal whitespace.
static INSERT_VERB: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(INSERT\s+IGNORE\s+INTO|INSERT\s+INTO|REPLACE\s+INTO)")
        .expect("insert verb pattern is valid")
});

/// Conflict semantics for a queued write statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum InsertType {
    /// Plain `INSERT INTO` (fails on duplicate keys)
    #[default]
    Insert,
    /// `REPLACE INTO` (delete-then-insert on conflict)
    Replace,
    /// `INSERT IGNORE INTO` (silently skip on conflict)
    InsertIgnore,
}

impl InsertType {
    /// Canonical SQL verb phrase for this insert type
    pub const fn verb(self) -> &'static str {
        match self {
            Self::Insert => "INSERT INTO",
            Self::Replace => "REPLACE INTO",
            Self::InsertIgnore => "INSERT IGNORE INTO",
        }
    }
}

impl std::fmt::Display for InsertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.verb())
    }
}

/// Check whether a statement is a well-formed single-row, single-table
/// INSERT/REPLACE with explicit column and value lists.
///
/// Multi-row VALUES clauses, subqueries and multi-statement batches are
/// rejected. UPSERT-style trailing clauses are rejected too; callers who
/// need them enqueue with the correctness check bypassed.
pub fn is_insert_statement(sql: &str) -> bool {
    ensure_insert_statement(sql).is_ok()
}

/// Like [`is_insert_statement`], but reports a rejection as an
/// [`Error::Statement`] carrying the offending SQL
pub fn ensure_insert_statement(sql: &str) -> Result<()> {
    if INSERT_SHAPE.is_match(sql) {
        Ok(())
    } else {
        Err(Error::Statement {
            sql: sql.to_string(),
        })
    }
}

/// Rewrite the verb of a write statement in place.
///
/// Replaces only the first occurrence of any of the three verb phrases with
/// the canonical phrase for `target`; the rest of the statement text is
/// untouched. No-op when none of the phrases is present. Idempotent.
pub fn rewrite_insert_type(sql: &str, target: InsertType) -> String {
    match INSERT_VERB.find(sql) {
        Some(found) => {
            let verb = target.verb();
            let mut out = String::with_capacity(sql.len() + verb.len());
            out.push_str(&sql[..found.start()]);
            out.push_str(verb);
            out.push_str(&sql[found.end()..]);
            out
        }
        None => sql.to_string(),
    }
}
