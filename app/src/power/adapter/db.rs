use anyhow::Context as _;
use sqlx::{PgPool, Postgres, Transaction};

use crate::core::time::{DateTime, Duration};
use crate::core::timeseries::DataPoint;
use crate::power::store::{CycleSession, HistoryCursor, HistoryFilter, HistoryPage, PowerStore};
use crate::power::{Outage, OutageId, PowerSnapshot, RoomSnapshot, SwitchReport, SystemStatus};
use crate::switch::SwitchCheckResult;

//advisory lock key shared by every monitor instance writing to the same database
const CYCLE_LOCK_KEY: i64 = 0x0070_6f77_6572;

pub struct PgPowerRepository {
    pool: PgPool,
}

impl PgPowerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!()
            .run(&self.pool)
            .await
            .context("Error running database migrations")
    }
}

impl PowerStore for PgPowerRepository {
    type Session = PgCycleSession;

    #[tracing::instrument(skip(self))]
    async fn begin_cycle(&self) -> anyhow::Result<Option<PgCycleSession>> {
        let mut tx = self.pool.begin().await.context("Error starting cycle transaction")?;

        let locked: bool = sqlx::query_scalar("SELECT pg_try_advisory_xact_lock($1)")
            .bind(CYCLE_LOCK_KEY)
            .fetch_one(&mut *tx)
            .await
            .context("Error acquiring cycle lock")?;

        if !locked {
            tx.rollback().await.context("Error releasing cycle transaction")?;
            return Ok(None);
        }

        Ok(Some(PgCycleSession { tx }))
    }

    async fn latest_power_snapshot(&self) -> anyhow::Result<Option<PowerSnapshot>> {
        sqlx::query_as::<_, PowerSnapshotRow>(LATEST_POWER_SNAPSHOT)
            .fetch_optional(&self.pool)
            .await
            .context("Error reading latest power snapshot")?
            .map(PowerSnapshot::try_from)
            .transpose()
    }

    #[tracing::instrument(skip(self))]
    async fn status_history(&self, filter: &HistoryFilter) -> anyhow::Result<HistoryPage<SystemStatus>> {
        let rows: Vec<(i64, chrono::DateTime<chrono::Utc>, String)> = sqlx::query_as(
            r#"SELECT id, timestamp, system_status
               FROM power_snapshot
               WHERE ($1::timestamptz IS NULL OR (timestamp, id) < ($1, $2))
               ORDER BY timestamp DESC, id DESC
               LIMIT $3"#,
        )
        .bind(filter.before.map(|c| c.timestamp.into_db()))
        .bind(filter.before.map(|c| c.id))
        .bind(filter.limit)
        .fetch_all(&self.pool)
        .await
        .context("Error reading power status history")?;

        let last = rows.last().map(|(id, timestamp, _)| history_cursor(*id, *timestamp));
        let points = rows
            .into_iter()
            .map(|(_, timestamp, status)| -> anyhow::Result<_> { Ok(DataPoint::new(status.parse()?, timestamp.into())) })
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(HistoryPage { points, last })
    }

    #[tracing::instrument(skip(self))]
    async fn room_history(&self, room: &str, filter: &HistoryFilter) -> anyhow::Result<HistoryPage<bool>> {
        let rows: Vec<(i64, chrono::DateTime<chrono::Utc>, bool)> = sqlx::query_as(
            r#"SELECT id, timestamp, room_power_on
               FROM room_snapshot
               WHERE room = $1
               AND ($2::timestamptz IS NULL OR (timestamp, id) < ($2, $3))
               ORDER BY timestamp DESC, id DESC
               LIMIT $4"#,
        )
        .bind(room)
        .bind(filter.before.map(|c| c.timestamp.into_db()))
        .bind(filter.before.map(|c| c.id))
        .bind(filter.limit)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("Error reading power history of room {}", room))?;

        Ok(HistoryPage {
            last: rows.last().map(|(id, timestamp, _)| history_cursor(*id, *timestamp)),
            points: rows
                .into_iter()
                .map(|(_, timestamp, on)| DataPoint::new(on, timestamp.into()))
                .collect(),
        })
    }

    async fn latest_room_snapshots(&self) -> anyhow::Result<Vec<RoomSnapshot>> {
        let rows: Vec<RoomSnapshotRow> = sqlx::query_as(
            r#"SELECT DISTINCT ON (room) timestamp, room, switches_online, switches_total, room_power_on
               FROM room_snapshot
               ORDER BY room, timestamp DESC"#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Error reading latest room snapshots")?;

        Ok(rows.into_iter().map(RoomSnapshot::from).collect())
    }

    async fn latest_switch_results(&self) -> anyhow::Result<Vec<SwitchReport>> {
        let rows: Vec<SwitchReportRow> = sqlx::query_as(
            r#"SELECT DISTINCT ON (label) label, room, timestamp, reachable, authentic,
                      detection_method, response_time_ms, actual_mac, explanation
               FROM switch_check
               ORDER BY label, timestamp DESC"#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Error reading latest switch results")?;

        rows.into_iter().map(SwitchReport::try_from).collect()
    }

    async fn recent_outages(&self, limit: i64) -> anyhow::Result<Vec<Outage>> {
        let rows: Vec<OutageRow> = sqlx::query_as(
            r#"SELECT id, status, started, ended
               FROM outage
               ORDER BY id DESC
               LIMIT $1"#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Error reading outages")?;

        rows.into_iter().map(Outage::try_from).collect()
    }
}

/// Transaction holding the cycle advisory lock until commit or drop.
pub struct PgCycleSession {
    tx: Transaction<'static, Postgres>,
}

impl CycleSession for PgCycleSession {
    async fn latest_power_snapshot(&mut self) -> anyhow::Result<Option<PowerSnapshot>> {
        sqlx::query_as::<_, PowerSnapshotRow>(LATEST_POWER_SNAPSHOT)
            .fetch_optional(&mut *self.tx)
            .await
            .context("Error reading preceding power snapshot")?
            .map(PowerSnapshot::try_from)
            .transpose()
    }

    async fn next_outage_id(&mut self) -> anyhow::Result<OutageId> {
        //snapshots may reference ids of outages that were never recorded
        let next: i64 = sqlx::query_scalar(
            r#"SELECT GREATEST(
                   COALESCE((SELECT MAX(id) FROM outage), 0),
                   COALESCE((SELECT MAX(outage_id) FROM power_snapshot), 0)
               ) + 1"#,
        )
        .fetch_one(&mut *self.tx)
        .await
        .context("Error allocating outage id")?;

        Ok(OutageId::from(next))
    }

    async fn append_switch_result(&mut self, result: &SwitchCheckResult) -> anyhow::Result<()> {
        let trail = serde_json::to_value(&result.trail)?;

        sqlx::query(
            r#"INSERT INTO switch_check (timestamp, label, room, ip, expected_mac, actual_mac, backup_connected,
                   reachable, mac_validated, authentic, detection_method, detection_code, response_time_ms,
                   explanation, trail)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)"#,
        )
        .bind(result.timestamp.into_db())
        .bind(&result.switch.label)
        .bind(&result.switch.room)
        .bind(result.switch.ip.to_string())
        .bind(result.switch.mac.to_string())
        .bind(result.actual_mac.map(|m| m.to_string()))
        .bind(result.switch.backup_connected)
        .bind(result.reachable)
        .bind(result.mac_validated)
        .bind(result.authentic)
        .bind(result.detection_method.code())
        .bind(result.detection_method.numeric_code())
        .bind(result.response_time.map(|d| d.as_millis_f64()))
        .bind(result.explain())
        .bind(trail)
        .execute(&mut *self.tx)
        .await
        .with_context(|| format!("Error saving check result of switch {}", result.switch.label))?;

        Ok(())
    }

    async fn append_power_snapshot(&mut self, snapshot: &PowerSnapshot) -> anyhow::Result<()> {
        sqlx::query(
            r#"INSERT INTO power_snapshot (timestamp, main_switches_online, main_switches_total,
                   backup_switches_online, backup_switches_total, main_power_on, backup_power_on,
                   system_status, outage_id, is_outage_start, is_outage_end)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"#,
        )
        .bind(snapshot.timestamp.into_db())
        .bind(snapshot.main_switches_online as i32)
        .bind(snapshot.main_switches_total as i32)
        .bind(snapshot.backup_switches_online as i32)
        .bind(snapshot.backup_switches_total as i32)
        .bind(snapshot.main_power_on)
        .bind(snapshot.backup_power_on)
        .bind(snapshot.system_status.code())
        .bind(snapshot.outage_id)
        .bind(snapshot.is_outage_start)
        .bind(snapshot.is_outage_end)
        .execute(&mut *self.tx)
        .await
        .context("Error saving power snapshot")?;

        Ok(())
    }

    async fn append_room_snapshot(&mut self, snapshot: &RoomSnapshot) -> anyhow::Result<()> {
        sqlx::query(
            r#"INSERT INTO room_snapshot (timestamp, room, switches_online, switches_total, room_power_on)
               VALUES ($1, $2, $3, $4, $5)"#,
        )
        .bind(snapshot.timestamp.into_db())
        .bind(&snapshot.room)
        .bind(snapshot.switches_online as i32)
        .bind(snapshot.switches_total as i32)
        .bind(snapshot.room_power_on)
        .execute(&mut *self.tx)
        .await
        .with_context(|| format!("Error saving snapshot of room {}", snapshot.room))?;

        Ok(())
    }

    async fn open_outage(&mut self, id: OutageId, status: SystemStatus, started: DateTime) -> anyhow::Result<()> {
        sqlx::query(r#"INSERT INTO outage (id, status, started) VALUES ($1, $2, $3)"#)
            .bind(id)
            .bind(status.code())
            .bind(started.into_db())
            .execute(&mut *self.tx)
            .await
            .with_context(|| format!("Error opening outage {}", id))?;

        Ok(())
    }

    async fn close_outage(&mut self, id: OutageId, ended: DateTime) -> anyhow::Result<()> {
        let result = sqlx::query(r#"UPDATE outage SET ended = $2 WHERE id = $1 AND ended IS NULL"#)
            .bind(id)
            .bind(ended.into_db())
            .execute(&mut *self.tx)
            .await
            .with_context(|| format!("Error closing outage {}", id))?;

        if result.rows_affected() == 0 {
            tracing::warn!("No open outage record with id {} to close", id);
        }

        Ok(())
    }

    async fn commit(self) -> anyhow::Result<()> {
        self.tx.commit().await.context("Error committing monitoring cycle")
    }
}

const LATEST_POWER_SNAPSHOT: &str = r#"SELECT timestamp, main_switches_online, main_switches_total,
        backup_switches_online, backup_switches_total, main_power_on, backup_power_on,
        system_status, outage_id, is_outage_start, is_outage_end
    FROM power_snapshot
    ORDER BY timestamp DESC
    LIMIT 1"#;

#[derive(Debug, sqlx::FromRow)]
struct PowerSnapshotRow {
    timestamp: chrono::DateTime<chrono::Utc>,
    main_switches_online: i32,
    main_switches_total: i32,
    backup_switches_online: i32,
    backup_switches_total: i32,
    main_power_on: bool,
    backup_power_on: bool,
    system_status: String,
    outage_id: Option<i64>,
    is_outage_start: bool,
    is_outage_end: bool,
}

impl TryFrom<PowerSnapshotRow> for PowerSnapshot {
    type Error = anyhow::Error;

    fn try_from(row: PowerSnapshotRow) -> Result<Self, Self::Error> {
        Ok(PowerSnapshot {
            timestamp: row.timestamp.into(),
            main_switches_online: count(row.main_switches_online),
            main_switches_total: count(row.main_switches_total),
            backup_switches_online: count(row.backup_switches_online),
            backup_switches_total: count(row.backup_switches_total),
            main_power_on: row.main_power_on,
            backup_power_on: row.backup_power_on,
            system_status: row.system_status.parse()?,
            outage_id: row.outage_id.map(OutageId::from),
            is_outage_start: row.is_outage_start,
            is_outage_end: row.is_outage_end,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RoomSnapshotRow {
    timestamp: chrono::DateTime<chrono::Utc>,
    room: String,
    switches_online: i32,
    switches_total: i32,
    room_power_on: bool,
}

impl From<RoomSnapshotRow> for RoomSnapshot {
    fn from(row: RoomSnapshotRow) -> Self {
        RoomSnapshot {
            timestamp: row.timestamp.into(),
            room: row.room,
            switches_online: count(row.switches_online),
            switches_total: count(row.switches_total),
            room_power_on: row.room_power_on,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SwitchReportRow {
    label: String,
    room: String,
    timestamp: chrono::DateTime<chrono::Utc>,
    reachable: bool,
    authentic: bool,
    detection_method: String,
    response_time_ms: Option<f64>,
    actual_mac: Option<String>,
    explanation: String,
}

impl TryFrom<SwitchReportRow> for SwitchReport {
    type Error = anyhow::Error;

    fn try_from(row: SwitchReportRow) -> Result<Self, Self::Error> {
        Ok(SwitchReport {
            detection_method: row.detection_method.parse()?,
            actual_mac: row.actual_mac.map(|mac| mac.parse()).transpose()?,
            response_time: row
                .response_time_ms
                .map(|ms| Duration::micros((ms * 1000.0).round() as i64)),
            label: row.label,
            room: row.room,
            timestamp: row.timestamp.into(),
            reachable: row.reachable,
            authentic: row.authentic,
            explanation: row.explanation,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct OutageRow {
    id: i64,
    status: String,
    started: chrono::DateTime<chrono::Utc>,
    ended: Option<chrono::DateTime<chrono::Utc>>,
}

impl TryFrom<OutageRow> for Outage {
    type Error = anyhow::Error;

    fn try_from(row: OutageRow) -> Result<Self, Self::Error> {
        Ok(Outage {
            id: OutageId::from(row.id),
            status: row.status.parse()?,
            started: row.started.into(),
            ended: row.ended.map(Into::into),
        })
    }
}

fn count(value: i32) -> usize {
    value.max(0) as usize
}

fn history_cursor(id: i64, timestamp: chrono::DateTime<chrono::Utc>) -> HistoryCursor {
    HistoryCursor {
        timestamp: timestamp.into(),
        id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::switch::DetectionMethod;

    #[test]
    fn test_snapshot_row_with_unknown_status_is_rejected() {
        let row = PowerSnapshotRow {
            timestamp: chrono::Utc::now(),
            main_switches_online: 1,
            main_switches_total: 3,
            backup_switches_online: 0,
            backup_switches_total: 0,
            main_power_on: false,
            backup_power_on: true,
            system_status: "BROWNOUT".to_string(),
            outage_id: Some(3),
            is_outage_start: false,
            is_outage_end: false,
        };

        assert!(PowerSnapshot::try_from(row).is_err());
    }

    #[test]
    fn test_switch_row_conversion() {
        let row = SwitchReportRow {
            label: "hall".to_string(),
            room: "hall".to_string(),
            timestamp: chrono::Utc::now(),
            reachable: true,
            authentic: true,
            detection_method: "ARP_REFRESH".to_string(),
            response_time_ms: Some(1.25),
            actual_mac: Some("AA:BB:CC:DD:EE:FF".to_string()),
            explanation: "hall [ARP_REFRESH]".to_string(),
        };

        let report = SwitchReport::try_from(row).unwrap();

        assert_eq!(report.detection_method, DetectionMethod::ArpRefresh);
        assert_eq!(report.response_time, Some(Duration::micros(1250)));
        assert_eq!(report.actual_mac, Some("aa:bb:cc:dd:ee:ff".parse().unwrap()));
    }
}
