use std::future::Future;

use crate::core::time::Duration;
use crate::network::{MacAddress, NeighborEntry, NetworkProbe};
use crate::switch::{DetectionMethod, StageTrace, StageVerdict, Switch, SwitchCheckResult, ValidationStage};
use crate::t;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeSettings {
    pub ping_timeout: Duration,
    pub ping_count: u32,
    pub neighbor_timeout: Duration,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            ping_timeout: t!(2 seconds),
            ping_count: 1,
            neighbor_timeout: t!(2 seconds),
        }
    }
}

impl ProbeSettings {
    //one extra reply window on top of ping's own per-reply timeout
    fn ping_budget(&self) -> Duration {
        self.ping_timeout * (self.ping_count.max(1) as i32 + 1)
    }
}

/// Decides whether the device answering on a switch's address is really that switch.
///
/// Stages escalate in order and stop at the first conclusive one:
/// ping (plus MAC check), neighbor cache (fresh entries only), forced refresh.
/// Every stage runs at most once and is bounded by its own timeout. Timeouts and
/// probe errors make a stage inconclusive and end up in the trail.
pub struct AuthenticityValidator<'a, N> {
    network: &'a N,
    settings: ProbeSettings,
}

impl<'a, N: NetworkProbe> AuthenticityValidator<'a, N> {
    pub fn new(network: &'a N, settings: ProbeSettings) -> Self {
        Self { network, settings }
    }

    #[tracing::instrument(skip_all, fields(switch = %switch.label, room = %switch.room, ip = %switch.ip))]
    pub async fn validate(&self, switch: &Switch) -> SwitchCheckResult {
        let mut check = Check::new(switch);

        if let Some(method) = self.ping_stage(switch, &mut check).await {
            return check.finish(method);
        }

        if let Some(method) = self.neighbor_stage(switch, &mut check).await {
            return check.finish(method);
        }

        let method = self.refresh_stage(switch, &mut check).await;
        check.finish(method)
    }

    async fn ping_stage(&self, switch: &Switch, check: &mut Check) -> Option<DetectionMethod> {
        let reply = bounded(
            self.settings.ping_budget(),
            self.network
                .ping(switch.ip, self.settings.ping_timeout, self.settings.ping_count),
        )
        .await;

        let reply = match reply {
            Ok(reply) if reply.success => reply,
            Ok(_) => {
                check.trace(ValidationStage::Ping, StageVerdict::NoReply);
                return None;
            }
            Err(verdict) => {
                check.trace(ValidationStage::Ping, verdict);
                return None;
            }
        };

        check.reachable = true;
        check.response_time = reply.latency;
        check.trace(ValidationStage::Ping, StageVerdict::Replied { latency: reply.latency });

        //a successful ping has just refreshed the entry, so any state is good enough here
        let verdict = match bounded(self.settings.neighbor_timeout, self.network.lookup_neighbor(switch.ip)).await {
            Ok(Some(NeighborEntry { mac: Some(mac), .. })) if mac == switch.mac => {
                check.observe(Some(mac));
                check.trace(ValidationStage::Ping, StageVerdict::MacMatch { mac });
                return Some(DetectionMethod::PingMac);
            }
            Ok(Some(entry)) => {
                check.observe(entry.mac);
                StageVerdict::MacMismatch { found: entry.mac }
            }
            Ok(None) => StageVerdict::NoEntry,
            Err(verdict) => verdict,
        };

        check.trace(ValidationStage::Ping, verdict);

        tracing::warn!(
            "Switch {} in {} answers ping, but its MAC address could not be verified (found {})",
            switch.label,
            switch.room,
            check
                .actual_mac
                .map(|m| m.to_string())
                .unwrap_or_else(|| "none".to_string())
        );

        Some(DetectionMethod::PingOnly)
    }

    async fn neighbor_stage(&self, switch: &Switch, check: &mut Check) -> Option<DetectionMethod> {
        let verdict = self.inspect_neighbor(switch, check).await;
        let confirmed = matches!(verdict, StageVerdict::Fresh { .. });

        check.trace(ValidationStage::NeighborCache, verdict);

        confirmed.then_some(DetectionMethod::ArpFresh)
    }

    async fn refresh_stage(&self, switch: &Switch, check: &mut Check) -> DetectionMethod {
        let direct_reply = match bounded(
            self.settings.neighbor_timeout,
            self.network.refresh_neighbor(switch.ip, self.settings.neighbor_timeout),
        )
        .await
        {
            Ok(Some(mac)) => {
                check.observe(Some(mac));
                check.trace(ValidationStage::Refresh, StageVerdict::DirectReply { mac });
                Some(mac)
            }
            Ok(None) => {
                check.trace(ValidationStage::Refresh, StageVerdict::NoReply);
                None
            }
            Err(verdict) => {
                check.trace(ValidationStage::Refresh, verdict);
                None
            }
        };

        let verdict = self.inspect_neighbor(switch, check).await;
        let confirmed = matches!(verdict, StageVerdict::Fresh { .. });
        check.trace(ValidationStage::Refresh, verdict);

        if confirmed {
            DetectionMethod::ArpRefresh
        } else if direct_reply == Some(switch.mac) {
            DetectionMethod::Arping
        } else {
            DetectionMethod::Failed
        }
    }

    async fn inspect_neighbor(&self, switch: &Switch, check: &mut Check) -> StageVerdict {
        let entry = match bounded(self.settings.neighbor_timeout, self.network.lookup_neighbor(switch.ip)).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return StageVerdict::NoEntry,
            Err(verdict) => return verdict,
        };

        check.observe(entry.mac);

        match entry.mac {
            Some(mac) if entry.confirms(&switch.mac) => StageVerdict::Fresh {
                mac,
                state: entry.state,
            },
            Some(mac) if mac == switch.mac => StageVerdict::NotFresh { state: entry.state },
            found => StageVerdict::MacMismatch { found },
        }
    }
}

async fn bounded<T>(
    limit: Duration,
    step: impl Future<Output = anyhow::Result<T>>,
) -> Result<T, StageVerdict> {
    match tokio::time::timeout(limit.into(), step).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            tracing::debug!("Network probe failed: {:#}", e);
            Err(StageVerdict::ProbeError {
                message: format!("{:#}", e),
            })
        }
        Err(_) => Err(StageVerdict::TimedOut { timeout: limit }),
    }
}

struct Check {
    switch: Switch,
    reachable: bool,
    response_time: Option<Duration>,
    actual_mac: Option<MacAddress>,
    trail: Vec<StageTrace>,
}

impl Check {
    fn new(switch: &Switch) -> Self {
        Self {
            switch: switch.clone(),
            reachable: false,
            response_time: None,
            actual_mac: None,
            trail: Vec::with_capacity(4),
        }
    }

    fn trace(&mut self, stage: ValidationStage, verdict: StageVerdict) {
        tracing::debug!("{}: {}", stage, verdict);
        self.trail.push(StageTrace { stage, verdict });
    }

    //latest observation wins
    fn observe(&mut self, mac: Option<MacAddress>) {
        if mac.is_some() {
            self.actual_mac = mac;
        }
    }

    fn finish(self, method: DetectionMethod) -> SwitchCheckResult {
        let authentic = method.is_authentic();

        let result = SwitchCheckResult {
            timestamp: t!(now),
            reachable: self.reachable || authentic,
            mac_validated: authentic,
            authentic,
            detection_method: method,
            response_time: self.response_time,
            actual_mac: self.actual_mac,
            trail: self.trail,
            switch: self.switch,
        };

        tracing::debug!("Switch check finished: {}", result.explain());
        result
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::network::NeighborState;
    use crate::network::fake::{FakeDevice, FakeNetwork, entry};

    const IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 21);
    const MAC: &str = "aa:bb:cc:00:00:21";
    const OTHER_MAC: &str = "de:ad:be:ef:00:01";

    fn switch() -> Switch {
        Switch {
            label: "kitchen-plug".to_string(),
            ip: IP,
            mac: MAC.parse().unwrap(),
            room: "kitchen".to_string(),
            backup_connected: false,
        }
    }

    fn settings() -> ProbeSettings {
        ProbeSettings {
            ping_timeout: t!(50 millis),
            ping_count: 1,
            neighbor_timeout: t!(50 millis),
        }
    }

    async fn validate(network: &FakeNetwork) -> SwitchCheckResult {
        AuthenticityValidator::new(network, settings()).validate(&switch()).await
    }

    #[tokio::test]
    async fn test_ping_with_matching_mac() {
        let network = FakeNetwork::default().with(IP, FakeDevice::answering(MAC));

        let result = validate(&network).await;

        assert_eq!(result.detection_method, DetectionMethod::PingMac);
        assert!(result.authentic);
        assert!(result.reachable);
        assert!(result.mac_validated);
        assert_eq!(result.response_time, Some(Duration::micros(800)));
        assert_eq!(result.actual_mac, Some(MAC.parse().unwrap()));
        assert_eq!(network.calls(IP), (1, 1, 0));
    }

    #[tokio::test]
    async fn test_ping_with_foreign_mac_is_soft_failure() {
        let network = FakeNetwork::default().with(
            IP,
            FakeDevice::answering(MAC).with_neighbor(vec![Some(entry(OTHER_MAC, NeighborState::Reachable))]),
        );

        let result = validate(&network).await;

        assert_eq!(result.detection_method, DetectionMethod::PingOnly);
        assert!(!result.authentic);
        assert!(result.reachable);
        assert!(!result.mac_validated);
        assert_eq!(result.actual_mac, Some(OTHER_MAC.parse().unwrap()));
        assert_eq!(network.calls(IP), (1, 1, 0));
    }

    #[tokio::test]
    async fn test_ping_without_neighbor_entry() {
        let network = FakeNetwork::default().with(IP, FakeDevice::answering(MAC).with_neighbor(vec![None]));

        let result = validate(&network).await;

        assert_eq!(result.detection_method, DetectionMethod::PingOnly);
        assert_eq!(result.actual_mac, None);
    }

    #[tokio::test]
    async fn test_fresh_neighbor_entry_without_ping() {
        let network = FakeNetwork::default().with(
            IP,
            FakeDevice::silent().with_neighbor(vec![Some(entry(MAC, NeighborState::Delay))]),
        );

        let result = validate(&network).await;

        assert_eq!(result.detection_method, DetectionMethod::ArpFresh);
        assert!(result.authentic);
        assert!(result.reachable);
        assert_eq!(result.response_time, None);
        assert_eq!(network.calls(IP), (1, 1, 0));
    }

    #[tokio::test]
    async fn test_stale_entry_is_rejected() {
        let network = FakeNetwork::default().with(
            IP,
            FakeDevice::silent().with_neighbor(vec![Some(entry(MAC, NeighborState::Stale))]),
        );

        let result = validate(&network).await;

        assert_eq!(result.detection_method, DetectionMethod::Failed);
        assert!(!result.authentic);
        assert!(!result.reachable);
        assert!(!result.mac_validated);
        assert_eq!(result.actual_mac, Some(MAC.parse().unwrap()));
        assert_eq!(network.calls(IP), (1, 2, 1));
        assert_eq!(
            result.trail.iter().map(|t| t.stage).collect::<Vec<_>>(),
            vec![
                ValidationStage::Ping,
                ValidationStage::NeighborCache,
                ValidationStage::Refresh,
                ValidationStage::Refresh
            ]
        );
        assert_eq!(
            result.trail[1].verdict,
            StageVerdict::NotFresh {
                state: NeighborState::Stale
            }
        );
    }

    #[tokio::test]
    async fn test_fresh_entry_of_other_device_is_rejected() {
        let network = FakeNetwork::default().with(
            IP,
            FakeDevice::silent().with_neighbor(vec![Some(entry(OTHER_MAC, NeighborState::Reachable))]),
        );

        let result = validate(&network).await;

        assert_eq!(result.detection_method, DetectionMethod::Failed);
        assert!(!result.authentic);
        assert_eq!(result.actual_mac, Some(OTHER_MAC.parse().unwrap()));
        assert_eq!(network.calls(IP), (1, 2, 1));
    }

    #[tokio::test]
    async fn test_entry_confirmed_after_refresh() {
        let network = FakeNetwork::default().with(
            IP,
            FakeDevice::silent().with_neighbor(vec![
                Some(entry(MAC, NeighborState::Stale)),
                Some(entry(MAC, NeighborState::Reachable)),
            ]),
        );

        let result = validate(&network).await;

        assert_eq!(result.detection_method, DetectionMethod::ArpRefresh);
        assert!(result.authentic);
        assert_eq!(network.calls(IP), (1, 2, 1));
    }

    #[tokio::test]
    async fn test_direct_arp_reply_from_expected_device() {
        let device = FakeDevice {
            refresh_reply: Some(MAC.parse().unwrap()),
            ..FakeDevice::silent().with_neighbor(vec![Some(entry(MAC, NeighborState::Probe))])
        };
        let network = FakeNetwork::default().with(IP, device);

        let result = validate(&network).await;

        assert_eq!(result.detection_method, DetectionMethod::Arping);
        assert!(result.authentic);
    }

    #[tokio::test]
    async fn test_direct_arp_reply_from_other_device_fails() {
        let device = FakeDevice {
            refresh_reply: Some(OTHER_MAC.parse().unwrap()),
            ..FakeDevice::silent()
        };
        let network = FakeNetwork::default().with(IP, device);

        let result = validate(&network).await;

        assert_eq!(result.detection_method, DetectionMethod::Failed);
        assert_eq!(result.actual_mac, Some(OTHER_MAC.parse().unwrap()));
    }

    #[tokio::test]
    async fn test_hanging_ping_times_out_and_escalates() {
        let device = FakeDevice {
            ping_delay: Some(t!(5 seconds)),
            ..FakeDevice::answering(MAC).with_neighbor(vec![Some(entry(MAC, NeighborState::Reachable))])
        };
        let network = FakeNetwork::default().with(IP, device);

        let started = std::time::Instant::now();
        let result = validate(&network).await;

        assert!(started.elapsed() < std::time::Duration::from_secs(2));
        assert_eq!(result.detection_method, DetectionMethod::ArpFresh);
        assert!(matches!(result.trail[0].verdict, StageVerdict::TimedOut { .. }));
    }

    #[tokio::test]
    async fn test_probe_error_is_inconclusive() {
        let device = FakeDevice {
            ping: None,
            ..Default::default()
        };
        let network = FakeNetwork::default().with(IP, device);

        let result = validate(&network).await;

        assert_eq!(result.detection_method, DetectionMethod::Failed);
        assert!(matches!(result.trail[0].verdict, StageVerdict::ProbeError { .. }));
    }

    #[tokio::test]
    async fn test_explanation_names_every_stage() {
        let network = FakeNetwork::default().with(IP, FakeDevice::silent());

        let explanation = validate(&network).await.explain();

        assert!(explanation.starts_with("kitchen-plug [FAILED]"));
        assert!(explanation.contains("ping: no reply"));
        assert!(explanation.contains("neighbor cache: no neighbor entry"));
        assert!(explanation.contains("neighbor refresh: no reply"));
    }
}
