use std::collections::BTreeMap;

use crate::core::time::DateTime;
use crate::power::{PowerRules, RoomSnapshot, SystemStatus};
use crate::switch::SwitchCheckResult;

#[derive(Debug, Clone, PartialEq)]
pub struct PowerAggregate {
    pub main_online: usize,
    pub main_total: usize,
    pub backup_online: usize,
    pub backup_total: usize,
    pub main_power_on: bool,
    pub backup_power_on: bool,
    pub rooms: Vec<RoomTally>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoomTally {
    pub room: String,
    pub online: usize,
    pub total: usize,
    pub power_on: bool,
}

impl PowerAggregate {
    pub fn status(&self) -> SystemStatus {
        SystemStatus::classify(self.main_power_on, self.backup_power_on, self.backup_total)
    }

    pub fn room_snapshots(&self, timestamp: DateTime) -> Vec<RoomSnapshot> {
        self.rooms
            .iter()
            .map(|room| RoomSnapshot {
                timestamp,
                room: room.room.clone(),
                switches_online: room.online,
                switches_total: room.total,
                room_power_on: room.power_on,
            })
            .collect()
    }
}

/// Reduces the authenticity results of one cycle into circuit and room power state.
/// Only authentic switches count as online.
pub fn aggregate(results: &[SwitchCheckResult], rules: &PowerRules) -> PowerAggregate {
    let mut main = (0, 0);
    let mut backup = (0, 0);
    let mut rooms: BTreeMap<&str, (usize, usize)> = BTreeMap::new();

    for result in results {
        let online = result.authentic as usize;

        let circuit = if result.switch.backup_connected {
            &mut backup
        } else {
            &mut main
        };
        circuit.0 += online;
        circuit.1 += 1;

        let room = rooms.entry(result.switch.room.as_str()).or_default();
        room.0 += online;
        room.1 += 1;
    }

    let main_power_on = main.1 > 0 && meets(main.0, main.1, rules.main_threshold);

    //one dead switch on the backup circuit is enough to distrust it
    let backup_power_on = if backup.1 == 0 {
        rules.vacant_backup_powered
    } else {
        backup.0 == backup.1
    };

    let rooms = rooms
        .into_iter()
        .map(|(room, (online, total))| RoomTally {
            room: room.to_string(),
            online,
            total,
            power_on: meets(online, total, rules.room_threshold),
        })
        .collect();

    PowerAggregate {
        main_online: main.0,
        main_total: main.1,
        backup_online: backup.0,
        backup_total: backup.1,
        main_power_on,
        backup_power_on,
        rooms,
    }
}

fn meets(online: usize, total: usize, threshold: f64) -> bool {
    total > 0 && online as f64 / total as f64 >= threshold
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::switch::{DetectionMethod, Switch};
    use crate::t;

    fn result(n: u8, room: &str, backup: bool, authentic: bool) -> SwitchCheckResult {
        SwitchCheckResult {
            switch: Switch {
                label: format!("switch-{}", n),
                ip: Ipv4Addr::new(10, 0, 0, n),
                mac: format!("aa:bb:cc:00:00:{:02x}", n).parse().unwrap(),
                room: room.to_string(),
                backup_connected: backup,
            },
            timestamp: t!(now),
            reachable: authentic,
            mac_validated: authentic,
            authentic,
            detection_method: if authentic {
                DetectionMethod::PingMac
            } else {
                DetectionMethod::Failed
            },
            response_time: None,
            actual_mac: None,
            trail: vec![],
        }
    }

    fn main_switches(online: &[bool]) -> Vec<SwitchCheckResult> {
        online
            .iter()
            .enumerate()
            .map(|(i, on)| result(i as u8 + 1, "living", false, *on))
            .collect()
    }

    #[test]
    fn test_main_threshold_is_inclusive() {
        let agg = aggregate(&main_switches(&[true, false]), &PowerRules::default());

        assert!(agg.main_power_on);
        assert_eq!((agg.main_online, agg.main_total), (1, 2));
    }

    #[test]
    fn test_main_is_monotonic() {
        let rules = PowerRules::default();
        let mut online = vec![false; 5];
        let mut was_on = false;

        for i in 0..online.len() {
            online[i] = true;
            let on = aggregate(&main_switches(&online), &rules).main_power_on;
            assert!(on || !was_on, "main power dropped after switch {} came online", i);
            was_on = on;
        }

        assert!(was_on);
    }

    #[test]
    fn test_no_main_switches_means_no_main_power() {
        let agg = aggregate(&[result(1, "cellar", true, true)], &PowerRules::default());

        assert!(!agg.main_power_on);
        assert!(agg.backup_power_on);
    }

    #[test]
    fn test_backup_requires_every_switch() {
        let mut results = main_switches(&[false]);
        results.push(result(10, "cellar", true, true));
        results.push(result(11, "cellar", true, true));
        results.push(result(12, "office", true, true));
        assert!(aggregate(&results, &PowerRules::default()).backup_power_on);

        results.push(result(13, "office", true, false));
        let agg = aggregate(&results, &PowerRules::default());
        assert!(!agg.backup_power_on);
        assert_eq!((agg.backup_online, agg.backup_total), (3, 4));
    }

    #[test]
    fn test_vacant_backup_is_configurable() {
        let results = main_switches(&[false, false]);

        assert!(aggregate(&results, &PowerRules::default()).backup_power_on);

        let rules = PowerRules {
            vacant_backup_powered: false,
            ..Default::default()
        };
        let agg = aggregate(&results, &rules);
        assert!(!agg.backup_power_on);
        assert_eq!(agg.status(), SystemStatus::Offline);
    }

    #[test]
    fn test_rooms_ignore_backup_flag() {
        let results = vec![
            result(1, "kitchen", false, true),
            result(2, "kitchen", true, false),
            result(3, "bedroom", false, false),
            result(4, "bedroom", true, false),
            result(5, "bedroom", false, true),
        ];

        let agg = aggregate(&results, &PowerRules::default());

        assert_eq!(
            agg.rooms,
            vec![
                RoomTally {
                    room: "bedroom".to_string(),
                    online: 1,
                    total: 3,
                    power_on: false,
                },
                RoomTally {
                    room: "kitchen".to_string(),
                    online: 1,
                    total: 2,
                    power_on: true,
                },
            ]
        );
    }

    #[test]
    fn test_ping_only_does_not_count() {
        let mut ambiguous = result(1, "living", false, false);
        ambiguous.reachable = true;
        ambiguous.detection_method = DetectionMethod::PingOnly;

        let agg = aggregate(&[ambiguous], &PowerRules::default());

        assert_eq!(agg.main_online, 0);
        assert!(!agg.main_power_on);
    }
}
