use crate::core::time::DateTime;
use crate::core::timeseries::DataPoint;
use crate::power::{Outage, OutageId, PowerSnapshot, RoomSnapshot, SwitchReport, SystemStatus};
use crate::switch::SwitchCheckResult;

/// Position of a history row. Rows sharing a timestamp are told apart by their insertion id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct HistoryCursor {
    pub timestamp: DateTime,
    pub id: i64,
}

/// Newest-first page of history, optionally strictly older than `before`.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryFilter {
    pub before: Option<HistoryCursor>,
    pub limit: i64,
}

impl HistoryFilter {
    pub fn newest(limit: i64) -> Self {
        Self { before: None, limit }
    }

    pub fn older_than(&self, before: HistoryCursor) -> Self {
        Self {
            before: Some(before),
            limit: self.limit,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryPage<V> {
    pub points: Vec<DataPoint<V>>,
    //cursor of the oldest row in this page
    pub last: Option<HistoryCursor>,
}

pub trait PowerStore {
    type Session: CycleSession;

    /// Starts the write side of a monitoring cycle. Returns `None` if another cycle
    /// currently holds the guard.
    async fn begin_cycle(&self) -> anyhow::Result<Option<Self::Session>>;

    async fn latest_power_snapshot(&self) -> anyhow::Result<Option<PowerSnapshot>>;

    async fn status_history(&self, filter: &HistoryFilter) -> anyhow::Result<HistoryPage<SystemStatus>>;

    async fn room_history(&self, room: &str, filter: &HistoryFilter) -> anyhow::Result<HistoryPage<bool>>;

    async fn latest_room_snapshots(&self) -> anyhow::Result<Vec<RoomSnapshot>>;

    async fn latest_switch_results(&self) -> anyhow::Result<Vec<SwitchReport>>;

    async fn recent_outages(&self, limit: i64) -> anyhow::Result<Vec<Outage>>;
}

/// Writes of one cycle. Nothing becomes visible before `commit`; dropping the session discards it.
pub trait CycleSession {
    async fn latest_power_snapshot(&mut self) -> anyhow::Result<Option<PowerSnapshot>>;

    async fn next_outage_id(&mut self) -> anyhow::Result<OutageId>;

    async fn append_switch_result(&mut self, result: &SwitchCheckResult) -> anyhow::Result<()>;

    async fn append_power_snapshot(&mut self, snapshot: &PowerSnapshot) -> anyhow::Result<()>;

    async fn append_room_snapshot(&mut self, snapshot: &RoomSnapshot) -> anyhow::Result<()>;

    async fn open_outage(&mut self, id: OutageId, status: SystemStatus, started: DateTime) -> anyhow::Result<()>;

    async fn close_outage(&mut self, id: OutageId, ended: DateTime) -> anyhow::Result<()>;

    async fn commit(self) -> anyhow::Result<()>;
}
