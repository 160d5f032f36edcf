use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS pods (
            id                          TEXT PRIMARY KEY,
            name                        TEXT NOT NULL,
            total_streak                INTEGER NOT NULL DEFAULT 0,
            last_shown_message_user_id  TEXT,
            created_at                  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS users (
            id                          TEXT PRIMARY KEY,
            username                    TEXT NOT NULL UNIQUE,
            password                    TEXT NOT NULL,
            display_name                TEXT NOT NULL,
            pod_id                      TEXT REFERENCES pods(id),
            current_streak              INTEGER NOT NULL DEFAULT 0,
            last_check_in               TEXT,
            last_successful_day         TEXT,
            availability_start_minute   INTEGER NOT NULL DEFAULT 540,
            availability_end_minute     INTEGER NOT NULL DEFAULT 1260,
            tz_offset_minutes           INTEGER NOT NULL DEFAULT 0,
            availability_message        TEXT,
            restores_used_this_month    INTEGER NOT NULL DEFAULT 0,
            restores_reset_at           TEXT NOT NULL,
            is_synthetic                INTEGER NOT NULL DEFAULT 0,
            goal_category               TEXT,
            onboarded                   INTEGER NOT NULL DEFAULT 0,
            created_at                  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_users_pod
            ON users(pod_id);

        CREATE INDEX IF NOT EXISTS idx_users_waiting
            ON users(onboarded, created_at) WHERE pod_id IS NULL;

        CREATE TABLE IF NOT EXISTS checkins (
            id              TEXT PRIMARY KEY,
            user_id         TEXT NOT NULL REFERENCES users(id),
            date            TEXT NOT NULL,
            stayed_on_track INTEGER NOT NULL,
            created_at      TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(user_id, date)
        );

        CREATE TABLE IF NOT EXISTS streak_restores (
            id                  TEXT PRIMARY KEY,
            user_id             TEXT NOT NULL REFERENCES users(id),
            restored_date       TEXT NOT NULL,
            streak_at_restore   INTEGER NOT NULL,
            month               INTEGER NOT NULL,
            year                INTEGER NOT NULL,
            created_at          TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_restores_user
            ON streak_restores(user_id, year, month);

        CREATE TABLE IF NOT EXISTS crisis_alerts (
            id              TEXT PRIMARY KEY,
            user_id         TEXT NOT NULL REFERENCES users(id),
            pod_id          TEXT NOT NULL REFERENCES pods(id),
            message         TEXT,
            status          TEXT NOT NULL DEFAULT 'active',
            response_count  INTEGER NOT NULL DEFAULT 0,
            created_at      TEXT NOT NULL DEFAULT (datetime('now')),
            resolved_at     TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_alerts_pod
            ON crisis_alerts(pod_id, status);

        -- Round-robin cursor for pod names
        CREATE TABLE IF NOT EXISTS matcher_state (
            id              INTEGER PRIMARY KEY CHECK (id = 1),
            next_name_index INTEGER NOT NULL DEFAULT 0
        );

        INSERT OR IGNORE INTO matcher_state (id, next_name_index) VALUES (1, 0);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
