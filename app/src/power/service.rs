use std::future::Future;

use infrastructure::EventEmitter;
use serde::Serialize;

use crate::network::NetworkProbe;
use crate::power::aggregate::aggregate;
use crate::power::outage::{OutageDecision, track};
use crate::power::store::{CycleSession, HistoryFilter, HistoryPage, PowerStore};
use crate::power::uptime::UptimeScanner;
use crate::power::{
    CycleError, Outage, PowerEvent, PowerRules, PowerSnapshot, RoomSnapshot, SwitchReport, Uptime,
};
use crate::switch::{Switch, SwitchCheckResult, SwitchChecker, validate_switches};
use crate::t;

const HISTORY_PAGE_SIZE: i64 = 500;

/// Everything one monitoring cycle computed, whether or not it could be saved.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub results: Vec<SwitchCheckResult>,
    pub snapshot: PowerSnapshot,
    pub rooms: Vec<RoomSnapshot>,
    pub outage: OutageDecision,
}

impl CycleReport {
    pub fn summary(&self) -> String {
        let s = &self.snapshot;
        format!(
            "{} (main {}/{}, backup {}/{}{})",
            s.system_status,
            s.main_switches_online,
            s.main_switches_total,
            s.backup_switches_online,
            s.backup_switches_total,
            s.outage_id.map(|id| format!(", outage {}", id)).unwrap_or_default()
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PowerStatus {
    pub snapshot: PowerSnapshot,
    pub rooms: Vec<RoomSnapshot>,
}

pub struct PowerMonitorService<N, S> {
    checker: SwitchChecker<N>,
    store: S,
    switches: Vec<Switch>,
    rules: PowerRules,
    emitter: EventEmitter<PowerEvent>,
}

impl<N: NetworkProbe, S: PowerStore> PowerMonitorService<N, S> {
    pub fn new(
        checker: SwitchChecker<N>,
        store: S,
        switches: Vec<Switch>,
        rules: PowerRules,
        emitter: EventEmitter<PowerEvent>,
    ) -> Self {
        Self {
            checker,
            store,
            switches,
            rules,
            emitter,
        }
    }

    #[tracing::instrument(skip(self), fields(switches = self.switches.len()))]
    pub async fn run_cycle(&self) -> Result<CycleReport, CycleError> {
        validate_switches(&self.switches).map_err(CycleError::Config)?;
        self.rules.validate().map_err(CycleError::Config)?;

        //store failures do not stop probing, the computed report travels inside the error
        let opened = match self.store.begin_cycle().await {
            Ok(Some(mut session)) => match session.latest_power_snapshot().await {
                Ok(preceding) => Ok((session, preceding)),
                Err(e) => Err(("preceding snapshot", e)),
            },
            Ok(None) => return Err(CycleError::Busy),
            Err(e) => Err(("cycle start", e)),
        };

        let results = self.checker.check_all(&self.switches).await;
        let timestamp = t!(now);

        let aggregate = aggregate(&results, &self.rules);
        let status = aggregate.status();
        let decision = match &opened {
            Ok((_, preceding)) => track(status, preceding.as_ref()),
            Err(_) => OutageDecision::Unknown,
        };

        let mut report = CycleReport {
            snapshot: PowerSnapshot {
                timestamp,
                main_switches_online: aggregate.main_online,
                main_switches_total: aggregate.main_total,
                backup_switches_online: aggregate.backup_online,
                backup_switches_total: aggregate.backup_total,
                main_power_on: aggregate.main_power_on,
                backup_power_on: aggregate.backup_power_on,
                system_status: status,
                outage_id: None,
                is_outage_start: false,
                is_outage_end: false,
            },
            rooms: aggregate.room_snapshots(timestamp),
            results,
            outage: decision,
        };

        let mut session = match opened {
            Ok((session, _)) => session,
            Err((operation, e)) => return Err(self.persistence_failed(operation, e, Some(&report))),
        };

        let allocated = match decision {
            OutageDecision::Start => Some(
                session
                    .next_outage_id()
                    .await
                    .map_err(|e| self.persistence_failed("outage id", e, Some(&report)))?,
            ),
            _ => None,
        };
        decision.apply(&mut report.snapshot, allocated);

        if let Err((operation, e)) = persist(&mut session, &report).await {
            return Err(self.persistence_failed(operation, e, Some(&report)));
        }
        session
            .commit()
            .await
            .map_err(|e| self.persistence_failed("commit", e, Some(&report)))?;

        self.publish(&report);

        Ok(report)
    }

    fn publish(&self, report: &CycleReport) {
        let snapshot = &report.snapshot;

        infrastructure::meter::set(
            "power_system_status",
            snapshot.system_status.numeric_code() as f64,
            &[("status", snapshot.system_status.code())],
        );
        infrastructure::meter::set(
            "power_switches_online",
            snapshot.main_switches_online as f64,
            &[("circuit", "main")],
        );
        infrastructure::meter::set(
            "power_switches_online",
            snapshot.backup_switches_online as f64,
            &[("circuit", "backup")],
        );

        match (report.outage, snapshot.outage_id) {
            (OutageDecision::Start, Some(id)) => {
                tracing::warn!("Power outage {} started with status {}", id, snapshot.system_status);
                self.emitter.send(PowerEvent::OutageStarted {
                    id,
                    status: snapshot.system_status,
                    started: snapshot.timestamp,
                });
            }
            (OutageDecision::End(id), _) => {
                tracing::info!(
                    "Power outage {} ended",
                    id.map(|id| id.to_string()).unwrap_or_else(|| "without id".to_string())
                );
                self.emitter.send(PowerEvent::OutageEnded {
                    id,
                    ended: snapshot.timestamp,
                });
            }
            _ => {}
        }

        self.emitter.send(PowerEvent::CycleCompleted {
            snapshot: snapshot.clone(),
            rooms: report.rooms.clone(),
        });
    }

    fn persistence_failed(&self, operation: &'static str, error: anyhow::Error, report: Option<&CycleReport>) -> CycleError {
        let error = CycleError::persistence(operation, error, report);

        infrastructure::meter::increment("power_cycle_failures", &[("kind", error.kind())]);

        if let CycleError::Persistence { message, .. } = &error {
            self.emitter.send(PowerEvent::PersistenceFailed {
                operation,
                message: message.clone(),
                status: report.map(|r| r.snapshot.system_status),
                timestamp: report.map(|r| r.snapshot.timestamp).unwrap_or_else(|| t!(now)),
            });
        }

        error
    }

    pub async fn current_status(&self) -> anyhow::Result<Option<PowerStatus>> {
        let Some(snapshot) = self.store.latest_power_snapshot().await? else {
            return Ok(None);
        };
        let rooms = self.store.latest_room_snapshots().await?;

        Ok(Some(PowerStatus { snapshot, rooms }))
    }

    pub async fn house_uptime(&self) -> anyhow::Result<Option<Uptime>> {
        scan_uptime(HISTORY_PAGE_SIZE, |filter| async move { self.store.status_history(&filter).await }).await
    }

    pub async fn room_uptime(&self, room: &str) -> anyhow::Result<Option<Uptime>> {
        scan_uptime(HISTORY_PAGE_SIZE, |filter| async move {
            self.store.room_history(room, &filter).await
        })
        .await
    }

    pub async fn switches(&self) -> anyhow::Result<Vec<SwitchReport>> {
        self.store.latest_switch_results().await
    }

    pub async fn outages(&self, limit: i64) -> anyhow::Result<Vec<Outage>> {
        self.store.recent_outages(limit).await
    }

    #[cfg(test)]
    fn checker_network(&self) -> &N {
        self.checker.network()
    }
}

async fn persist<C: CycleSession>(
    session: &mut C,
    report: &CycleReport,
) -> Result<(), (&'static str, anyhow::Error)> {
    for result in &report.results {
        session
            .append_switch_result(result)
            .await
            .map_err(|e| ("switch result", e))?;
    }

    session
        .append_power_snapshot(&report.snapshot)
        .await
        .map_err(|e| ("power snapshot", e))?;

    for room in &report.rooms {
        session.append_room_snapshot(room).await.map_err(|e| ("room snapshot", e))?;
    }

    let snapshot = &report.snapshot;
    match (report.outage, snapshot.outage_id) {
        (OutageDecision::Start, Some(id)) => session
            .open_outage(id, snapshot.system_status, snapshot.timestamp)
            .await
            .map_err(|e| ("outage start", e))?,
        (OutageDecision::End(Some(id)), _) => session
            .close_outage(id, snapshot.timestamp)
            .await
            .map_err(|e| ("outage end", e))?,
        _ => {}
    }

    Ok(())
}

async fn scan_uptime<V, F, Fut>(page_size: i64, mut fetch: F) -> anyhow::Result<Option<Uptime>>
where
    V: PartialEq,
    F: FnMut(HistoryFilter) -> Fut,
    Fut: Future<Output = anyhow::Result<HistoryPage<V>>>,
{
    let mut scanner = UptimeScanner::new();
    let mut filter = HistoryFilter::newest(page_size);

    loop {
        let page = fetch(filter.clone()).await?;
        let exhausted = (page.points.len() as i64) < filter.limit;

        if scanner.feed(page.points) || exhausted {
            break;
        }

        match page.last {
            Some(last) => filter = filter.older_than(last),
            None => break,
        }
    }

    Ok(scanner.finish(t!(now)))
}
