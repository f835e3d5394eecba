use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::core::time::DateTime;
use crate::core::timeseries::DataPoint;
use crate::power::store::{CycleSession, HistoryCursor, HistoryFilter, HistoryPage, PowerStore};
use crate::power::{Outage, OutageId, PowerSnapshot, RoomSnapshot, SwitchReport, SystemStatus};
use crate::switch::SwitchCheckResult;

#[derive(Debug, Default)]
struct State {
    locked: bool,
    unreachable: bool,
    fail_writes: bool,
    switches: Vec<SwitchReport>,
    power: Vec<PowerSnapshot>,
    rooms: Vec<RoomSnapshot>,
    outages: Vec<Outage>,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryPowerStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryPowerStore {
    pub fn fail_writes(&self, fail: bool) {
        self.state.lock().unwrap().fail_writes = fail;
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unwrap().unreachable = unreachable;
    }

    pub fn power_snapshots(&self) -> Vec<PowerSnapshot> {
        self.state.lock().unwrap().power.clone()
    }

    pub fn outages(&self) -> Vec<Outage> {
        self.state.lock().unwrap().outages.clone()
    }

    pub fn insert_status(&self, status: SystemStatus, timestamp: DateTime) {
        self.state.lock().unwrap().power.push(PowerSnapshot {
            timestamp,
            main_switches_online: 0,
            main_switches_total: 0,
            backup_switches_online: 0,
            backup_switches_total: 0,
            main_power_on: status.is_online(),
            backup_power_on: false,
            system_status: status,
            outage_id: None,
            is_outage_start: false,
            is_outage_end: false,
        });
    }
}

//row ids are positions in insertion order
fn newest_first<T, V>(
    items: &[T],
    timestamp: impl Fn(&T) -> DateTime,
    value: impl Fn(&T) -> V,
    filter: &HistoryFilter,
) -> HistoryPage<V> {
    let mut rows: Vec<(HistoryCursor, &T)> = items
        .iter()
        .enumerate()
        .map(|(id, item)| {
            let cursor = HistoryCursor {
                timestamp: timestamp(item),
                id: id as i64,
            };
            (cursor, item)
        })
        .filter(|(cursor, _)| filter.before.is_none_or(|before| *cursor < before))
        .collect();

    rows.sort_by(|a, b| b.0.cmp(&a.0));
    rows.truncate(filter.limit.max(0) as usize);

    HistoryPage {
        last: rows.last().map(|(cursor, _)| *cursor),
        points: rows
            .into_iter()
            .map(|(cursor, item)| DataPoint::new(value(item), cursor.timestamp))
            .collect(),
    }
}

fn latest_per_key<T: Clone>(
    items: &[T],
    key: impl Fn(&T) -> String,
    timestamp: impl Fn(&T) -> DateTime,
) -> Vec<T> {
    let mut latest: BTreeMap<String, &T> = BTreeMap::new();

    for item in items {
        let newer = latest.get(&key(item)).is_none_or(|current| timestamp(current) <= timestamp(item));
        if newer {
            latest.insert(key(item), item);
        }
    }

    latest.into_values().cloned().collect()
}

impl PowerStore for InMemoryPowerStore {
    type Session = InMemorySession;

    async fn begin_cycle(&self) -> anyhow::Result<Option<InMemorySession>> {
        let mut state = self.state.lock().unwrap();
        if state.unreachable {
            anyhow::bail!("connection refused");
        }
        if state.locked {
            return Ok(None);
        }
        state.locked = true;

        Ok(Some(InMemorySession {
            state: self.state.clone(),
            pending: State::default(),
        }))
    }

    async fn latest_power_snapshot(&self) -> anyhow::Result<Option<PowerSnapshot>> {
        let state = self.state.lock().unwrap();
        Ok(state.power.iter().max_by_key(|s| s.timestamp).cloned())
    }

    async fn status_history(&self, filter: &HistoryFilter) -> anyhow::Result<HistoryPage<SystemStatus>> {
        let state = self.state.lock().unwrap();
        Ok(newest_first(&state.power, |s| s.timestamp, |s| s.system_status, filter))
    }

    async fn room_history(&self, room: &str, filter: &HistoryFilter) -> anyhow::Result<HistoryPage<bool>> {
        let state = self.state.lock().unwrap();
        let rooms: Vec<RoomSnapshot> = state.rooms.iter().filter(|r| r.room == room).cloned().collect();
        Ok(newest_first(&rooms, |r| r.timestamp, |r| r.room_power_on, filter))
    }

    async fn latest_room_snapshots(&self) -> anyhow::Result<Vec<RoomSnapshot>> {
        let state = self.state.lock().unwrap();
        Ok(latest_per_key(&state.rooms, |r| r.room.clone(), |r| r.timestamp))
    }

    async fn latest_switch_results(&self) -> anyhow::Result<Vec<SwitchReport>> {
        let state = self.state.lock().unwrap();
        Ok(latest_per_key(&state.switches, |r| r.label.clone(), |r| r.timestamp))
    }

    async fn recent_outages(&self, limit: i64) -> anyhow::Result<Vec<Outage>> {
        let state = self.state.lock().unwrap();
        let mut outages = state.outages.clone();
        outages.sort_by(|a, b| b.id.cmp(&a.id));
        outages.truncate(limit.max(0) as usize);
        Ok(outages)
    }
}

pub struct InMemorySession {
    state: Arc<Mutex<State>>,
    pending: State,
}

impl InMemorySession {
    fn check_writable(&self) -> anyhow::Result<()> {
        if self.state.lock().unwrap().fail_writes {
            anyhow::bail!("store is read-only");
        }
        Ok(())
    }
}

impl CycleSession for InMemorySession {
    async fn latest_power_snapshot(&mut self) -> anyhow::Result<Option<PowerSnapshot>> {
        let state = self.state.lock().unwrap();
        Ok(state.power.iter().max_by_key(|s| s.timestamp).cloned())
    }

    async fn next_outage_id(&mut self) -> anyhow::Result<OutageId> {
        let state = self.state.lock().unwrap();
        Ok(state
            .outages
            .iter()
            .map(|o| o.id)
            .max()
            .map(|id| id.next())
            .unwrap_or(OutageId::first()))
    }

    async fn append_switch_result(&mut self, result: &SwitchCheckResult) -> anyhow::Result<()> {
        self.check_writable()?;
        self.pending.switches.push(SwitchReport {
            label: result.switch.label.clone(),
            room: result.switch.room.clone(),
            timestamp: result.timestamp,
            reachable: result.reachable,
            authentic: result.authentic,
            detection_method: result.detection_method,
            response_time: result.response_time,
            actual_mac: result.actual_mac,
            explanation: result.explain(),
        });
        Ok(())
    }

    async fn append_power_snapshot(&mut self, snapshot: &PowerSnapshot) -> anyhow::Result<()> {
        self.check_writable()?;
        self.pending.power.push(snapshot.clone());
        Ok(())
    }

    async fn append_room_snapshot(&mut self, snapshot: &RoomSnapshot) -> anyhow::Result<()> {
        self.check_writable()?;
        self.pending.rooms.push(snapshot.clone());
        Ok(())
    }

    async fn open_outage(&mut self, id: OutageId, status: SystemStatus, started: DateTime) -> anyhow::Result<()> {
        self.check_writable()?;
        self.pending.outages.push(Outage {
            id,
            status,
            started,
            ended: None,
        });
        Ok(())
    }

    async fn close_outage(&mut self, id: OutageId, ended: DateTime) -> anyhow::Result<()> {
        self.check_writable()?;
        //closing touches committed state, so stage it as a copy with the end time set
        let state = self.state.lock().unwrap();
        let outage = state
            .outages
            .iter()
            .find(|o| o.id == id)
            .ok_or_else(|| anyhow::anyhow!("Outage {} not found", id))?;
        self.pending.outages.push(Outage {
            ended: Some(ended),
            ..outage.clone()
        });
        Ok(())
    }

    async fn commit(mut self) -> anyhow::Result<()> {
        self.check_writable()?;
        let pending = std::mem::take(&mut self.pending);

        let mut state = self.state.lock().unwrap();
        state.switches.extend(pending.switches);
        state.power.extend(pending.power);
        state.rooms.extend(pending.rooms);
        for outage in pending.outages {
            state.outages.retain(|o| o.id != outage.id);
            state.outages.push(outage);
        }
        drop(state);

        Ok(())
    }
}

impl Drop for InMemorySession {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.locked = false;
        }
    }
}
