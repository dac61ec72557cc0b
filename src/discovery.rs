//! Port discovery: filter OS serial devices by naming pattern, rank them,
//! and probe each with a short open/close to find one nobody else holds.

use std::collections::HashSet;
use std::time::Duration;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::protocol::platform_patterns;
use crate::transport::{Connector, LinkSettings};
use crate::types::PortCandidate;

/// Substring rule used to recognise a controller by device name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortRule {
    pub needle: String,
    pub confidence: f32,
}

impl PortRule {
    /// Rules for the OS this binary was built for.
    pub fn platform_defaults() -> Vec<PortRule> {
        platform_patterns()
            .iter()
            .map(|p| PortRule {
                needle: p.needle.to_string(),
                confidence: p.confidence,
            })
            .collect()
    }
}

/// Ranks and probes candidate serial devices.
///
/// Discovery never retries: one call walks the ranked list once and returns.
/// Retry cadence belongs to the connection task.
#[derive(Debug, Clone)]
pub struct PortDiscovery {
    rules: Vec<PortRule>,
    settings: LinkSettings,
    probe_timeout: Duration,
}

impl PortDiscovery {
    pub fn new(rules: Vec<PortRule>, settings: LinkSettings, probe_timeout: Duration) -> Self {
        Self {
            rules,
            settings,
            probe_timeout,
        }
    }

    /// Best rule confidence for `name`, or `None` if no rule matches.
    pub fn score(&self, name: &str) -> Option<f32> {
        self.rules
            .iter()
            .filter(|r| name.contains(r.needle.as_str()))
            .map(|r| r.confidence)
            .fold(None, |best, c| Some(best.map_or(c, |b: f32| b.max(c))))
    }

    /// Matching devices from `ports`, highest confidence first, ties by name.
    pub fn rank(&self, ports: &[String]) -> Vec<PortCandidate> {
        let mut out: Vec<PortCandidate> = ports
            .iter()
            .filter_map(|name| {
                self.score(name).map(|confidence| PortCandidate {
                    name: name.clone(),
                    confidence,
                })
            })
            .collect();
        out.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| a.name.cmp(&b.name))
        });
        out
    }

    /// Ranked candidates currently present, without probing.
    pub fn candidates(&self, connector: &dyn Connector) -> Vec<PortCandidate> {
        match connector.available_ports() {
            Ok(ports) => self.rank(&ports),
            Err(e) => {
                debug!("discovery: {e}");
                Vec::new()
            }
        }
    }

    /// First candidate that survives an open/close probe.
    pub fn discover(&self, connector: &dyn Connector) -> Option<PortCandidate> {
        self.discover_excluding(connector, &HashSet::new())
    }

    /// Like [`discover`](Self::discover) but skips names in `skip`.
    pub fn discover_excluding(
        &self,
        connector: &dyn Connector,
        skip: &HashSet<String>,
    ) -> Option<PortCandidate> {
        let candidates = self.candidates(connector);
        if candidates.is_empty() {
            debug!("discovery: no serial device matches the naming table");
        }
        for candidate in candidates {
            if skip.contains(&candidate.name) {
                continue;
            }
            match connector.open(&candidate.name, &self.settings, self.probe_timeout) {
                Ok(probe) => {
                    drop(probe);
                    info!(
                        "discovery: {} probed clean (confidence {:.2})",
                        candidate.name, candidate.confidence
                    );
                    return Some(candidate);
                }
                Err(e) => debug!("discovery: probe of {} failed: {e}", candidate.name),
            }
        }
        None
    }
}
