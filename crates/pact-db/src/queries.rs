use crate::Database;
use crate::models::{CheckInRow, CrisisAlertRow, PodRow, UserRow};
use anyhow::Result;
use rusqlite::Connection;

/// Outcome of a write guarded by a constraint or precondition.
/// `Applied` means the row changed; the other variants are idempotent
/// rejections, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guarded {
    Applied,
    Rejected,
}

impl Guarded {
    pub fn applied(self) -> bool {
        self == Guarded::Applied
    }
}

impl Database {
    // -- Users --

    #[allow(clippy::too_many_arguments)]
    pub fn create_user(
        &self,
        id: &str,
        username: &str,
        password_hash: &str,
        display_name: &str,
        availability_start_minute: i64,
        availability_end_minute: i64,
        tz_offset_minutes: i64,
        goal_category: Option<&str>,
        restores_reset_at: &str,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, password, display_name,
                    availability_start_minute, availability_end_minute,
                    tz_offset_minutes, goal_category, restores_reset_at, onboarded)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 1)",
                rusqlite::params![
                    id,
                    username,
                    password_hash,
                    display_name,
                    availability_start_minute,
                    availability_end_minute,
                    tz_offset_minutes,
                    goal_category,
                    restores_reset_at,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("{USER_COLUMNS} WHERE username = ?1"))?;
            let row = stmt.query_row([username], map_user_row).optional()?;
            Ok(row)
        })
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{USER_COLUMNS} WHERE id = ?1"))?;
            let row = stmt.query_row([id], map_user_row).optional()?;
            Ok(row)
        })
    }

    pub fn get_pod_members(&self, pod_id: &str) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!("{USER_COLUMNS} WHERE pod_id = ?1 ORDER BY created_at"))?;
            let rows = stmt
                .query_map([pod_id], map_user_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Onboarded users with no pod, oldest first.
    pub fn unassigned_onboarded_users(&self, limit: usize) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{USER_COLUMNS} WHERE pod_id IS NULL AND onboarded = 1
                 ORDER BY created_at ASC LIMIT ?1"
            ))?;
            let rows = stmt
                .query_map([limit as i64], map_user_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Users the decay sweep must examine.
    pub fn users_with_active_streaks(&self) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("{USER_COLUMNS} WHERE current_streak > 0"))?;
            let rows = stmt
                .query_map([], map_user_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Check-ins --

    /// Persist a check-in and the resulting streak fields in one
    /// transaction. The UNIQUE(user_id, date) constraint is the
    /// serialization point: a concurrent duplicate loses the insert and the
    /// whole transaction rolls back with `Rejected`, leaving streak state
    /// untouched.
    pub fn record_check_in(
        &self,
        checkin_id: &str,
        user_id: &str,
        date: &str,
        stayed_on_track: bool,
        new_streak: i64,
        new_last_successful_day: Option<&str>,
    ) -> Result<Guarded> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let inserted = tx.execute(
                "INSERT INTO checkins (id, user_id, date, stayed_on_track)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![checkin_id, user_id, date, stayed_on_track],
            );
            match inserted {
                Ok(_) => {}
                Err(e) if is_unique_violation(&e) => return Ok(Guarded::Rejected),
                Err(e) => return Err(e.into()),
            }

            tx.execute(
                "UPDATE users SET current_streak = ?2, last_successful_day = ?3,
                    last_check_in = ?4
                 WHERE id = ?1",
                rusqlite::params![user_id, new_streak, new_last_successful_day, date],
            )?;

            tx.commit()?;
            Ok(Guarded::Applied)
        })
    }

    pub fn get_check_in(&self, user_id: &str, date: &str) -> Result<Option<CheckInRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, date, stayed_on_track, created_at
                 FROM checkins WHERE user_id = ?1 AND date = ?2",
            )?;
            let row = stmt
                .query_row([user_id, date], |row| {
                    Ok(CheckInRow {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        date: row.get(2)?,
                        stayed_on_track: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                })
                .optional()?;
            Ok(row)
        })
    }

    /// Zero an abandoned streak (decay sweep).
    pub fn decay_streak(&self, user_id: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE users SET current_streak = 0, last_successful_day = NULL
                 WHERE id = ?1",
                [user_id],
            )?;
            Ok(())
        })
    }

    // -- Restores --

    /// Start a new restore cycle: quota back to 0, reset mark advanced.
    pub fn reset_restore_cycle(&self, user_id: &str, next_reset_at: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE users SET restores_used_this_month = 0, restores_reset_at = ?2
                 WHERE id = ?1",
                rusqlite::params![user_id, next_reset_at],
            )?;
            Ok(())
        })
    }

    /// Consume one restore and apply the recovered streak, atomically.
    /// The conditional UPDATE is the increment-with-cap: when the quota is
    /// already spent it matches no row and nothing else happens.
    #[allow(clippy::too_many_arguments)]
    pub fn use_restore(
        &self,
        audit_id: &str,
        user_id: &str,
        restored_date: &str,
        streak_at_restore: i64,
        new_streak: i64,
        new_last_successful_day: &str,
        month: i64,
        year: i64,
        quota_cap: i64,
    ) -> Result<Guarded> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let consumed = tx.execute(
                "UPDATE users SET restores_used_this_month = restores_used_this_month + 1
                 WHERE id = ?1 AND restores_used_this_month < ?2",
                rusqlite::params![user_id, quota_cap],
            )?;
            if consumed == 0 {
                return Ok(Guarded::Rejected);
            }

            tx.execute(
                "UPDATE users SET current_streak = ?2, last_successful_day = ?3
                 WHERE id = ?1",
                rusqlite::params![user_id, new_streak, new_last_successful_day],
            )?;

            tx.execute(
                "INSERT INTO streak_restores
                    (id, user_id, restored_date, streak_at_restore, month, year)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![audit_id, user_id, restored_date, streak_at_restore, month, year],
            )?;

            tx.commit()?;
            Ok(Guarded::Applied)
        })
    }

    // -- Pods --

    pub fn get_pod(&self, pod_id: &str) -> Result<Option<PodRow>> {
        self.with_conn(|conn| query_pod(conn, pod_id))
    }

    /// Create a pod and assign every listed user to it, as one atomic unit.
    /// Each assignment is guarded on `pod_id IS NULL`; if any user was
    /// concurrently assigned elsewhere the whole batch rolls back and the
    /// caller re-collects.
    pub fn create_pod_with_members(
        &self,
        pod_id: &str,
        name: &str,
        member_ids: &[String],
    ) -> Result<Guarded> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            tx.execute(
                "INSERT INTO pods (id, name) VALUES (?1, ?2)",
                rusqlite::params![pod_id, name],
            )?;

            for user_id in member_ids {
                let changed = tx.execute(
                    "UPDATE users SET pod_id = ?2 WHERE id = ?1 AND pod_id IS NULL",
                    rusqlite::params![user_id, pod_id],
                )?;
                if changed == 0 {
                    return Ok(Guarded::Rejected);
                }
            }

            tx.commit()?;
            Ok(Guarded::Applied)
        })
    }

    /// Pods with fewer members than `capacity`, fullest first so existing
    /// pods fill before new ones open.
    pub fn pods_with_room(&self, capacity: i64) -> Result<Vec<(PodRow, i64)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT p.id, p.name, p.total_streak, p.last_shown_message_user_id,
                        p.created_at, COUNT(u.id) AS members
                 FROM pods p LEFT JOIN users u ON u.pod_id = p.id
                 GROUP BY p.id
                 HAVING members < ?1
                 ORDER BY members DESC, p.created_at ASC",
            )?;
            let rows = stmt
                .query_map([capacity], |row| {
                    Ok((
                        PodRow {
                            id: row.get(0)?,
                            name: row.get(1)?,
                            total_streak: row.get(2)?,
                            last_shown_message_user_id: row.get(3)?,
                            created_at: row.get(4)?,
                        },
                        row.get::<_, i64>(5)?,
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Place one user into an existing pod if it still has room and the
    /// user is still unassigned. Membership is recounted inside the
    /// transaction so capacity is never exceeded.
    pub fn try_join_pod(&self, user_id: &str, pod_id: &str, capacity: i64) -> Result<Guarded> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let members: i64 = tx.query_row(
                "SELECT COUNT(*) FROM users WHERE pod_id = ?1",
                [pod_id],
                |row| row.get(0),
            )?;
            if members >= capacity {
                return Ok(Guarded::Rejected);
            }

            let changed = tx.execute(
                "UPDATE users SET pod_id = ?2 WHERE id = ?1 AND pod_id IS NULL",
                rusqlite::params![user_id, pod_id],
            )?;
            if changed == 0 {
                return Ok(Guarded::Rejected);
            }

            tx.commit()?;
            Ok(Guarded::Applied)
        })
    }

    /// Full recomputation of the denormalized pod total — a SUM over the
    /// current members, never an incremental delta. Returns the new total.
    pub fn recompute_pod_total(&self, pod_id: &str) -> Result<i64> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE pods SET total_streak =
                    (SELECT COALESCE(SUM(current_streak), 0) FROM users WHERE pod_id = ?1)
                 WHERE id = ?1",
                [pod_id],
            )?;
            let total = conn.query_row(
                "SELECT total_streak FROM pods WHERE id = ?1",
                [pod_id],
                |row| row.get(0),
            )?;
            Ok(total)
        })
    }

    /// Compare-and-set on the rotation cursor. Fails when another request
    /// rotated first.
    pub fn set_last_shown_message_user(
        &self,
        pod_id: &str,
        expected: Option<&str>,
        chosen: &str,
    ) -> Result<Guarded> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE pods SET last_shown_message_user_id = ?2
                 WHERE id = ?1 AND last_shown_message_user_id IS ?3",
                rusqlite::params![pod_id, chosen, expected],
            )?;
            Ok(if changed == 1 { Guarded::Applied } else { Guarded::Rejected })
        })
    }

    /// Advance the round-robin pod-name cursor and return its prior value.
    pub fn next_pod_name_index(&self) -> Result<u64> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let index: i64 = tx.query_row(
                "SELECT next_name_index FROM matcher_state WHERE id = 1",
                [],
                |row| row.get(0),
            )?;
            tx.execute(
                "UPDATE matcher_state SET next_name_index = next_name_index + 1 WHERE id = 1",
                [],
            )?;
            tx.commit()?;
            Ok(index as u64)
        })
    }

    // -- Crisis alerts --

    pub fn insert_crisis_alert(
        &self,
        id: &str,
        user_id: &str,
        pod_id: &str,
        message: Option<&str>,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO crisis_alerts (id, user_id, pod_id, message)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![id, user_id, pod_id, message],
            )?;
            Ok(())
        })
    }

    pub fn get_crisis_alert(&self, id: &str) -> Result<Option<CrisisAlertRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{ALERT_COLUMNS} WHERE id = ?1"))?;
            let row = stmt.query_row([id], map_alert_row).optional()?;
            Ok(row)
        })
    }

    pub fn active_alerts_for_pod(&self, pod_id: &str) -> Result<Vec<CrisisAlertRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{ALERT_COLUMNS} WHERE pod_id = ?1 AND status = 'active' ORDER BY created_at"
            ))?;
            let rows = stmt
                .query_map([pod_id], map_alert_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// active → resolved, once. A second resolve matches no row.
    pub fn resolve_crisis_alert(&self, id: &str) -> Result<Guarded> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE crisis_alerts
                 SET status = 'resolved', resolved_at = datetime('now')
                 WHERE id = ?1 AND status = 'active'",
                [id],
            )?;
            Ok(if changed == 1 { Guarded::Applied } else { Guarded::Rejected })
        })
    }

    /// Returns the new count, or None when the alert is missing or already
    /// resolved.
    pub fn increment_alert_responses(&self, id: &str) -> Result<Option<i64>> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE crisis_alerts SET response_count = response_count + 1
                 WHERE id = ?1 AND status = 'active'",
                [id],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            let count = conn.query_row(
                "SELECT response_count FROM crisis_alerts WHERE id = ?1",
                [id],
                |row| row.get(0),
            )?;
            Ok(Some(count))
        })
    }
}

const USER_COLUMNS: &str = "SELECT id, username, password, display_name, pod_id, current_streak,
    last_check_in, last_successful_day, availability_start_minute,
    availability_end_minute, tz_offset_minutes, availability_message,
    restores_used_this_month, restores_reset_at, is_synthetic, goal_category,
    onboarded, created_at FROM users";

const ALERT_COLUMNS: &str = "SELECT id, user_id, pod_id, message, status, response_count,
    created_at, resolved_at FROM crisis_alerts";

fn map_user_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        password: row.get(2)?,
        display_name: row.get(3)?,
        pod_id: row.get(4)?,
        current_streak: row.get(5)?,
        last_check_in: row.get(6)?,
        last_successful_day: row.get(7)?,
        availability_start_minute: row.get(8)?,
        availability_end_minute: row.get(9)?,
        tz_offset_minutes: row.get(10)?,
        availability_message: row.get(11)?,
        restores_used_this_month: row.get(12)?,
        restores_reset_at: row.get(13)?,
        is_synthetic: row.get(14)?,
        goal_category: row.get(15)?,
        onboarded: row.get(16)?,
        created_at: row.get(17)?,
    })
}

fn map_alert_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CrisisAlertRow> {
    Ok(CrisisAlertRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        pod_id: row.get(2)?,
        message: row.get(3)?,
        status: row.get(4)?,
        response_count: row.get(5)?,
        created_at: row.get(6)?,
        resolved_at: row.get(7)?,
    })
}

fn query_pod(conn: &Connection, pod_id: &str) -> Result<Option<PodRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, total_streak, last_shown_message_user_id, created_at
         FROM pods WHERE id = ?1",
    )?;
    let row = stmt
        .query_row([pod_id], |row| {
            Ok(PodRow {
                id: row.get(0)?,
                name: row.get(1)?,
                total_streak: row.get(2)?,
                last_shown_message_user_id: row.get(3)?,
                created_at: row.get(4)?,
            })
        })
        .optional()?;
    Ok(row)
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn add_user(db: &Database, username: &str) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        db.create_user(
            &id,
            username,
            "hash",
            username,
            540,
            1260,
            0,
            Some("fitness"),
            "2024-02-01T00:00:00Z",
        )
        .unwrap();
        id
    }

    #[test]
    fn duplicate_check_in_is_rejected_without_mutation() {
        let db = db();
        let uid = add_user(&db, "ana");

        let first = db
            .record_check_in("c1", &uid, "2024-01-11", true, 1, Some("2024-01-11"))
            .unwrap();
        assert!(first.applied());

        // Second attempt for the same (user, date) with a bogus streak value
        // must be rejected and must not touch the row.
        let second = db
            .record_check_in("c2", &uid, "2024-01-11", true, 99, Some("2024-01-11"))
            .unwrap();
        assert!(!second.applied());

        let user = db.get_user_by_id(&uid).unwrap().unwrap();
        assert_eq!(user.current_streak, 1);
    }

    #[test]
    fn restore_quota_caps_at_three() {
        let db = db();
        let uid = add_user(&db, "ben");

        for i in 0..3 {
            let outcome = db
                .use_restore(
                    &format!("r{i}"),
                    &uid,
                    "2024-01-10",
                    i,
                    i + 1,
                    "2024-01-10",
                    1,
                    2024,
                    3,
                )
                .unwrap();
            assert!(outcome.applied());
        }

        let fourth = db
            .use_restore("r3", &uid, "2024-01-11", 3, 4, "2024-01-11", 1, 2024, 3)
            .unwrap();
        assert!(!fourth.applied());

        let user = db.get_user_by_id(&uid).unwrap().unwrap();
        assert_eq!(user.restores_used_this_month, 3);
        // Streak not advanced by the rejected attempt.
        assert_eq!(user.current_streak, 3);
    }

    #[test]
    fn pod_total_is_exact_member_sum() {
        let db = db();
        let ids: Vec<String> = ["carla", "dan", "eve"]
            .iter()
            .map(|u| add_user(&db, u))
            .collect();

        let created = db
            .create_pod_with_members("pod1", "Daybreak", &ids)
            .unwrap();
        assert!(created.applied());

        for (uid, streak) in ids.iter().zip([2i64, 0, 5]) {
            db.record_check_in(
                &format!("c-{uid}"),
                uid,
                "2024-01-11",
                true,
                streak,
                Some("2024-01-11"),
            )
            .unwrap();
        }

        assert_eq!(db.recompute_pod_total("pod1").unwrap(), 7);
    }

    #[test]
    fn pod_creation_rolls_back_when_a_member_is_taken() {
        let db = db();
        let a = add_user(&db, "fred");
        let b = add_user(&db, "gina");
        let c = add_user(&db, "hugo");

        db.create_pod_with_members("pod1", "Daybreak", &[a.clone()])
            .unwrap();

        // `a` already belongs to pod1, so this batch must reject and assign
        // nobody.
        let outcome = db
            .create_pod_with_members("pod2", "Northstar", &[b.clone(), a.clone(), c.clone()])
            .unwrap();
        assert!(!outcome.applied());

        assert_eq!(db.get_user_by_id(&b).unwrap().unwrap().pod_id, None);
        assert_eq!(db.get_user_by_id(&c).unwrap().unwrap().pod_id, None);
        assert_eq!(
            db.get_user_by_id(&a).unwrap().unwrap().pod_id.as_deref(),
            Some("pod1")
        );
    }

    #[test]
    fn join_pod_respects_capacity() {
        let db = db();
        let members: Vec<String> = (0..4)
            .map(|i| add_user(&db, &format!("user{i}")))
            .collect();
        db.create_pod_with_members("pod1", "Daybreak", &members)
            .unwrap();

        let late = add_user(&db, "late");
        let outcome = db.try_join_pod(&late, "pod1", 4).unwrap();
        assert!(!outcome.applied());
        assert_eq!(db.get_user_by_id(&late).unwrap().unwrap().pod_id, None);
    }

    #[test]
    fn rotation_cursor_is_compare_and_set() {
        let db = db();
        let a = add_user(&db, "ida");
        db.create_pod_with_members("pod1", "Daybreak", &[a.clone()])
            .unwrap();

        assert!(db
            .set_last_shown_message_user("pod1", None, &a)
            .unwrap()
            .applied());
        // Stale expectation loses.
        assert!(!db
            .set_last_shown_message_user("pod1", None, &a)
            .unwrap()
            .applied());
        assert!(db
            .set_last_shown_message_user("pod1", Some(&a), &a)
            .unwrap()
            .applied());
    }

    #[test]
    fn alert_resolution_is_terminal() {
        let db = db();
        let uid = add_user(&db, "jon");
        db.create_pod_with_members("pod1", "Daybreak", &[uid.clone()])
            .unwrap();
        db.insert_crisis_alert("alert1", &uid, "pod1", Some("rough night"))
            .unwrap();

        assert_eq!(db.increment_alert_responses("alert1").unwrap(), Some(1));
        assert!(db.resolve_crisis_alert("alert1").unwrap().applied());
        assert!(!db.resolve_crisis_alert("alert1").unwrap().applied());
        // Responses on a resolved alert are not counted.
        assert_eq!(db.increment_alert_responses("alert1").unwrap(), None);

        let row = db.get_crisis_alert("alert1").unwrap().unwrap();
        assert_eq!(row.status, "resolved");
        assert!(row.resolved_at.is_some());
    }

    #[test]
    fn name_cursor_round_robins() {
        let db = db();
        assert_eq!(db.next_pod_name_index().unwrap(), 0);
        assert_eq!(db.next_pod_name_index().unwrap(), 1);
        assert_eq!(db.next_pod_name_index().unwrap(), 2);
    }
}
