//! Warm-start cache of learned strategies, persisted in SQLite.
//!
//! Only `best_known_strategy` survives a restart. Circuit and throttle
//! state are rebuilt from live traffic.

use std::path::Path;

use rusqlite::{params, Connection};
use tracing::{debug, info, warn};

use super::OriginRegistry;
use crate::models::Strategy;

/// Open a database connection with proper concurrency settings.
fn open_db(db_path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA busy_timeout = 30000;
    "#,
    )?;
    init_strategy_table(&conn)?;
    Ok(conn)
}

/// Create the strategy table if missing.
pub fn init_strategy_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS origin_strategy (
            origin TEXT PRIMARY KEY,
            strategy TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );
    "#,
    )
}

/// Seed the registry with strategies saved by a previous run.
pub async fn load_strategies(registry: &OriginRegistry, db_path: &Path) -> rusqlite::Result<usize> {
    let rows: Vec<(String, String)> = {
        let conn = open_db(db_path)?;
        let mut stmt = conn.prepare("SELECT origin, strategy FROM origin_strategy")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect::<rusqlite::Result<_>>()?
    };

    let mut count = 0;
    for (origin, name) in rows {
        match Strategy::from_str(&name) {
            Some(strategy) if !strategy.is_live() => {
                warn!("Ignoring fallback strategy {} cached for {}", strategy, origin)
            }
            Some(strategy) => {
                registry.seed_strategy(&origin, strategy).await;
                debug!("Restored strategy {} for {}", strategy, origin);
                count += 1;
            }
            None => warn!("Ignoring unknown strategy '{}' cached for {}", name, origin),
        }
    }

    if count > 0 {
        info!("Loaded learned strategies for {} origins", count);
    }
    Ok(count)
}

/// Save every origin's learned strategy.
pub async fn save_strategies(registry: &OriginRegistry, db_path: &Path) -> rusqlite::Result<usize> {
    let learned: Vec<(String, Strategy)> = registry
        .snapshots()
        .await
        .into_iter()
        .filter_map(|s| s.best_known_strategy.map(|st| (s.origin, st)))
        .collect();

    let mut conn = open_db(db_path)?;
    let tx = conn.transaction()?;
    for (origin, strategy) in &learned {
        tx.execute(
            r#"INSERT OR REPLACE INTO origin_strategy (origin, strategy, updated_at)
               VALUES (?, ?, CURRENT_TIMESTAMP)"#,
            params![origin, strategy.as_str()],
        )?;
    }
    tx.commit()?;

    if !learned.is_empty() {
        debug!("Saved learned strategies for {} origins", learned.len());
    }
    Ok(learned.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::{CircuitConfig, ThrottleConfig};

    fn registry() -> OriginRegistry {
        OriginRegistry::new(CircuitConfig::default(), ThrottleConfig::default(), 1)
    }

    #[tokio::test]
    async fn test_round_trip_through_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strategies.db");

        let reg = registry();
        reg.seed_strategy("prothomalo.com", Strategy::Browser).await;
        reg.seed_strategy("thedailystar.net", Strategy::Stealth).await;
        // Known origin with nothing learned is not saved.
        reg.slot("bdnews24.com", None).await;
        assert_eq!(save_strategies(&reg, &path).await.unwrap(), 2);

        let restored = registry();
        assert_eq!(load_strategies(&restored, &path).await.unwrap(), 2);
        let snap = restored.snapshot("prothomalo.com").await.unwrap();
        assert_eq!(snap.best_known_strategy, Some(Strategy::Browser));
    }

    #[tokio::test]
    async fn test_unknown_and_fallback_rows_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strategies.db");
        {
            let conn = open_db(&path).unwrap();
            conn.execute(
                "INSERT INTO origin_strategy (origin, strategy) VALUES ('a.com', 'teleport')",
                [],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO origin_strategy (origin, strategy) VALUES ('b.com', 'archive')",
                [],
            )
            .unwrap();
        }
        let reg = registry();
        assert_eq!(load_strategies(&reg, &path).await.unwrap(), 0);
        assert!(reg.snapshot("b.com").await.is_none());
    }
}
