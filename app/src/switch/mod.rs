mod domain;
mod validator;

use futures::{StreamExt as _, stream};

pub use domain::*;
pub use validator::{AuthenticityValidator, ProbeSettings};

use crate::network::NetworkProbe;

/// Checks a set of switches concurrently, at most `max_parallel` at a time.
pub struct SwitchChecker<N> {
    network: N,
    settings: ProbeSettings,
    max_parallel: usize,
}

impl<N: NetworkProbe> SwitchChecker<N> {
    pub fn new(network: N, settings: ProbeSettings, max_parallel: usize) -> Self {
        Self {
            network,
            settings,
            max_parallel: max_parallel.max(1),
        }
    }

    /// Waits for every switch. Results come back in configuration order.
    pub async fn check_all(&self, switches: &[Switch]) -> Vec<SwitchCheckResult> {
        let validator = AuthenticityValidator::new(&self.network, self.settings);

        let mut results: Vec<(usize, SwitchCheckResult)> = stream::iter(switches.iter().enumerate())
            .map(|(index, switch)| {
                let validator = &validator;
                async move { (index, validator.validate(switch).await) }
            })
            .buffer_unordered(self.max_parallel)
            .collect()
            .await;

        results.sort_by_key(|(index, _)| *index);
        results.into_iter().map(|(_, result)| result).collect()
    }

    #[cfg(test)]
    pub fn network(&self) -> &N {
        &self.network
    }
}
