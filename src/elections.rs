//! Election & Candidate Reference Data
//!
//! CRUD over the elections and candidates the frontend renders odds from.
//! Peripheral plumbing: the wager engine records the selections the client
//! submits and never reads these tables.

use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::ledger::error::LedgerError;
use crate::ledger::store::LedgerDb;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub id: i64,
    pub election_id: String,
    pub name: String,
    pub party: Option<String>,
    pub odds: f64,
    pub image: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Election {
    pub id: String,
    pub title: String,
    pub constituency: Option<String>,
    pub kind: String,
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Clone)]
pub struct ElectionStore {
    db: LedgerDb,
}

impl ElectionStore {
    pub fn new(db: LedgerDb) -> Self {
        Self { db }
    }

    pub async fn create_election(
        &self,
        id: &str,
        title: &str,
        constituency: Option<&str>,
        kind: &str,
    ) -> Result<(), LedgerError> {
        if id.trim().is_empty() || title.trim().is_empty() {
            return Err(LedgerError::InvalidInput(
                "Election id and title are required".into(),
            ));
        }
        let conn = self.db.conn().await;
        let exists: Option<String> = conn
            .prepare_cached("SELECT id FROM elections WHERE id = ?1")?
            .query_row(params![id], |row| row.get(0))
            .optional()?;
        if exists.is_some() {
            return Err(LedgerError::InvalidInput(
                "Election with this ID already exists".into(),
            ));
        }
        conn.execute(
            "INSERT INTO elections (id, title, constituency, kind) VALUES (?1, ?2, ?3, ?4)",
            params![id, title, constituency, kind],
        )?;
        Ok(())
    }

    pub async fn get_election(&self, id: &str) -> Result<Election, LedgerError> {
        let conn = self.db.conn().await;
        let election = conn
            .prepare_cached("SELECT id, title, constituency, kind FROM elections WHERE id = ?1")?
            .query_row(params![id], |row| {
                Ok(Election {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    constituency: row.get(2)?,
                    kind: row.get(3)?,
                    candidates: Vec::new(),
                })
            })
            .optional()?;
        let mut election = election.ok_or_else(|| LedgerError::NotFound("Election".into()))?;
        election.candidates = Self::candidates_for(&conn, &election.id)?;
        Ok(election)
    }

    pub async fn list_elections(&self) -> Result<Vec<Election>, LedgerError> {
        let conn = self.db.conn().await;
        let mut stmt =
            conn.prepare_cached("SELECT id, title, constituency, kind FROM elections ORDER BY id")?;
        let mut elections = stmt
            .query_map([], |row| {
                Ok(Election {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    constituency: row.get(2)?,
                    kind: row.get(3)?,
                    candidates: Vec::new(),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        for election in &mut elections {
            election.candidates = Self::candidates_for(&conn, &election.id)?;
        }
        Ok(elections)
    }

    pub async fn update_election(
        &self,
        id: &str,
        title: Option<&str>,
        constituency: Option<&str>,
        kind: Option<&str>,
    ) -> Result<(), LedgerError> {
        let conn = self.db.conn().await;
        let rows = conn.execute(
            "UPDATE elections SET \
                title = COALESCE(?1, title), \
                constituency = COALESCE(?2, constituency), \
                kind = COALESCE(?3, kind) \
             WHERE id = ?4",
            params![title, constituency, kind, id],
        )?;
        if rows == 0 {
            return Err(LedgerError::NotFound("Election".into()));
        }
        Ok(())
    }

    /// Delete an election and all its candidates.
    pub async fn delete_election(&self, id: &str) -> Result<(), LedgerError> {
        let mut conn = self.db.conn().await;
        let tx = conn
            .transaction()
            .map_err(|e| LedgerError::Internal(e.to_string()))?;
        tx.execute("DELETE FROM candidates WHERE election_id = ?1", params![id])?;
        let rows = tx.execute("DELETE FROM elections WHERE id = ?1", params![id])?;
        if rows == 0 {
            return Err(LedgerError::NotFound("Election".into()));
        }
        tx.commit()
            .map_err(|e| LedgerError::Internal(e.to_string()))?;
        Ok(())
    }

    pub async fn create_candidate(
        &self,
        election_id: &str,
        name: &str,
        party: Option<&str>,
        odds: f64,
        image: Option<&str>,
    ) -> Result<i64, LedgerError> {
        if !(odds > 0.0) {
            return Err(LedgerError::InvalidInput("Odds must be positive".into()));
        }
        let conn = self.db.conn().await;
        conn.execute(
            "INSERT INTO candidates (election_id, name, party, odds, image) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![election_id, name, party, odds, image],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub async fn update_candidate(
        &self,
        id: i64,
        name: Option<&str>,
        party: Option<&str>,
        odds: Option<f64>,
        image: Option<&str>,
    ) -> Result<(), LedgerError> {
        if let Some(odds) = odds {
            if !(odds > 0.0) {
                return Err(LedgerError::InvalidInput("Odds must be positive".into()));
            }
        }
        let conn = self.db.conn().await;
        let rows = conn.execute(
            "UPDATE candidates SET \
                name = COALESCE(?1, name), \
                party = COALESCE(?2, party), \
                odds = COALESCE(?3, odds), \
                image = COALESCE(?4, image) \
             WHERE id = ?5",
            params![name, party, odds, image, id],
        )?;
        if rows == 0 {
            return Err(LedgerError::NotFound("Candidate".into()));
        }
        Ok(())
    }

    pub async fn delete_candidate(&self, id: i64) -> Result<(), LedgerError> {
        let conn = self.db.conn().await;
        let rows = conn.execute("DELETE FROM candidates WHERE id = ?1", params![id])?;
        if rows == 0 {
            return Err(LedgerError::NotFound("Candidate".into()));
        }
        Ok(())
    }

    fn candidates_for(
        conn: &rusqlite::Connection,
        election_id: &str,
    ) -> Result<Vec<Candidate>, LedgerError> {
        let mut stmt = conn.prepare_cached(
            "SELECT id, election_id, name, party, odds, image FROM candidates \
             WHERE election_id = ?1 ORDER BY id",
        )?;
        let candidates = stmt
            .query_map(params![election_id], |row| {
                Ok(Candidate {
                    id: row.get(0)?,
                    election_id: row.get(1)?,
                    name: row.get(2)?,
                    party: row.get(3)?,
                    odds: row.get(4)?,
                    image: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    async fn create_test_store() -> (ElectionStore, NamedTempFile) {
        let temp = NamedTempFile::new().unwrap();
        let db = LedgerDb::new(temp.path().to_str().unwrap()).unwrap();
        (ElectionStore::new(db), temp)
    }

    #[tokio::test]
    async fn test_election_crud_roundtrip() {
        let (store, _temp) = create_test_store().await;

        store
            .create_election("pres-2026", "Presidential 2026", None, "presidential")
            .await
            .unwrap();
        store
            .create_candidate("pres-2026", "Candidate A", Some("Party X"), 1.5, None)
            .await
            .unwrap();
        store
            .create_candidate("pres-2026", "Candidate B", Some("Party Y"), 2.0, None)
            .await
            .unwrap();

        let election = store.get_election("pres-2026").await.unwrap();
        assert_eq!(election.title, "Presidential 2026");
        assert_eq!(election.candidates.len(), 2);
        assert_eq!(election.candidates[0].name, "Candidate A");

        store
            .update_election("pres-2026", Some("Presidential 2026 (final)"), None, None)
            .await
            .unwrap();
        let election = store.get_election("pres-2026").await.unwrap();
        assert_eq!(election.title, "Presidential 2026 (final)");

        store.delete_election("pres-2026").await.unwrap();
        let err = store.get_election("pres-2026").await.unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn test_duplicate_election_id_rejected() {
        let (store, _temp) = create_test_store().await;
        store
            .create_election("e1", "First", None, "presidential")
            .await
            .unwrap();
        let err = store
            .create_election("e1", "Second", None, "presidential")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_input");
    }

    #[tokio::test]
    async fn test_candidate_odds_validated() {
        let (store, _temp) = create_test_store().await;
        store
            .create_election("e1", "First", None, "presidential")
            .await
            .unwrap();
        assert!(store
            .create_candidate("e1", "Bad", None, 0.0, None)
            .await
            .is_err());
        let id = store
            .create_candidate("e1", "Good", None, 1.8, None)
            .await
            .unwrap();
        assert!(store
            .update_candidate(id, None, None, Some(-1.0), None)
            .await
            .is_err());
        store
            .update_candidate(id, None, None, Some(2.2), None)
            .await
            .unwrap();
    }
}
