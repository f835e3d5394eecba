use serde::Serialize;

use crate::power::{OutageId, PowerSnapshot, SystemStatus};

/// What the current cycle means for the outage episode, compared to the preceding snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "outage_id", rename_all = "snake_case")]
pub enum OutageDecision {
    Steady,
    Start,
    Continue(OutageId),
    //preceding snapshots without an id have no outage record to close
    End(Option<OutageId>),
    //the preceding snapshot could not be read
    Unknown,
}

pub fn track(current: SystemStatus, preceding: Option<&PowerSnapshot>) -> OutageDecision {
    let preceding_online = preceding.is_none_or(|p| p.system_status.is_online());

    match (current.is_online(), preceding_online) {
        (true, true) => OutageDecision::Steady,
        (true, false) => OutageDecision::End(preceding.and_then(|p| p.outage_id)),
        (false, true) => OutageDecision::Start,
        (false, false) => match preceding.and_then(|p| p.outage_id) {
            Some(id) => OutageDecision::Continue(id),
            None => {
                tracing::warn!("Preceding outage snapshot carries no outage id, starting a new episode");
                OutageDecision::Start
            }
        },
    }
}

impl OutageDecision {
    /// Fills the outage fields of a fresh snapshot. `allocated` is the id reserved for a new episode.
    pub fn apply(&self, snapshot: &mut PowerSnapshot, allocated: Option<OutageId>) {
        let (outage_id, is_start, is_end) = match self {
            OutageDecision::Steady => (None, false, false),
            OutageDecision::Start => (allocated, true, false),
            OutageDecision::Continue(id) => (Some(*id), false, false),
            OutageDecision::End(_) => (None, false, true),
            OutageDecision::Unknown => (None, false, false),
        };

        snapshot.outage_id = outage_id;
        snapshot.is_outage_start = is_start;
        snapshot.is_outage_end = is_end;
    }
}
