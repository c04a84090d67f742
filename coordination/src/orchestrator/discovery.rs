//! Addressing discovery
//!
//! Runs once per run, before the first challenge. Decides whether all
//! challenges share one evolving page or live at numbered addresses.

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::capability::{BrowserCapability, ToolError};
use crate::error::ConfigError;
use crate::run::AddressingMode;
use crate::signal::ResultClassifier;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Where the run starts. A value containing `{n}` is used as the
    /// template directly and skips discovery.
    pub entry_address: String,
    /// Label of the control that reveals challenge 1. Empty to skip.
    pub start_label: String,
    /// Address fragments that mark a single evolving page.
    pub dynamic_path_markers: Vec<String>,
    /// Address patterns whose first capture group is the challenge number.
    pub templated_patterns: Vec<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            entry_address: String::new(),
            start_label: "START".to_string(),
            dynamic_path_markers: vec!["/step".to_string()],
            templated_patterns: vec![
                r"/challenge/(\d+)".to_string(),
                r"/level/(\d+)".to_string(),
                r"/q/(\d+)".to_string(),
            ],
        }
    }
}

/// Compiled discovery rules.
#[derive(Debug, Clone)]
pub struct AddressDiscovery {
    entry_address: String,
    start_label: String,
    dynamic_markers: Vec<String>,
    templated: Vec<Regex>,
}

impl AddressDiscovery {
    pub fn new(config: &DiscoveryConfig) -> Result<Self, ConfigError> {
        let templated = config
            .templated_patterns
            .iter()
            .map(|p| {
                let re = Regex::new(p).map_err(|e| ConfigError::Pattern {
                    field: "discovery.templated_patterns".into(),
                    source: e,
                })?;
                if re.captures_len() < 2 {
                    return Err(ConfigError::Invalid {
                        field: "discovery.templated_patterns".into(),
                        reason: format!("'{}' has no capture group for the index", p),
                    });
                }
                Ok(re)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            entry_address: config.entry_address.trim().to_string(),
            start_label: config.start_label.trim().to_string(),
            dynamic_markers: config
                .dynamic_path_markers
                .iter()
                .filter(|m| !m.is_empty())
                .cloned()
                .collect(),
            templated,
        })
    }

    /// Decide the addressing mode by visiting the entry address.
    ///
    /// Only [`ToolError::is_fatal`] errors propagate. Everything else
    /// degrades to templated mode over the best address known.
    pub async fn discover(
        &self,
        browser: &dyn BrowserCapability,
        classifier: &ResultClassifier,
    ) -> Result<AddressingMode, ToolError> {
        if self.entry_address.contains(AddressingMode::PLACEHOLDER) {
            debug!(template = %self.entry_address, "explicit template, skipping discovery");
            return Ok(AddressingMode::Templated {
                template: self.entry_address.clone(),
            });
        }

        if !self.entry_address.is_empty() {
            if let Err(e) = browser.navigate(&self.entry_address).await {
                if e.is_fatal() {
                    return Err(e);
                }
                warn!(address = %self.entry_address, error = %e, "entry navigation failed");
            }
        }

        if !self.start_label.is_empty() {
            match browser.activate(&self.start_label).await {
                Ok(true) => info!(label = %self.start_label, "activated start control"),
                Ok(false) => debug!(label = %self.start_label, "no start control"),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!(label = %self.start_label, error = %e, "start control failed"),
            }
        }

        let current = match browser.current_address().await {
            Ok(address) => address,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(error = %e, "could not read current address, using entry address");
                self.entry_address.clone()
            }
        };

        let shows_step = match browser.extract_page_snapshot().await {
            Ok(snapshot) => classifier.read(&snapshot).step.is_some(),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(error = %e, "could not read entry page");
                false
            }
        };

        let mode = self.infer(&current, shows_step);
        info!(mode = %mode, "addressing discovered");
        Ok(mode)
    }

    /// Pure part of discovery: classify `address` given whether the page
    /// shows a step indicator.
    pub fn infer(&self, address: &str, shows_step: bool) -> AddressingMode {
        if shows_step || self.dynamic_markers.iter().any(|m| address.contains(m)) {
            return AddressingMode::Dynamic {
                address: address.to_string(),
            };
        }

        for re in &self.templated {
            if let Some(index) = re.captures(address).and_then(|c| c.get(1)) {
                let mut template = String::with_capacity(address.len());
                template.push_str(&address[..index.start()]);
                template.push_str(AddressingMode::PLACEHOLDER);
                template.push_str(&address[index.end()..]);
                return AddressingMode::Templated { template };
            }
        }

        debug!(address, "no addressing pattern, reusing current address");
        AddressingMode::Templated {
            template: address.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn discovery() -> AddressDiscovery {
        AddressDiscovery::new(&DiscoveryConfig::default()).unwrap()
    }

    #[test]
    fn test_step_path_is_dynamic() {
        let mode = discovery().infer("https://x.test/step1?v=3", false);
        assert!(mode.is_dynamic());
    }

    #[test]
    fn test_step_indicator_is_dynamic() {
        let mode = discovery().infer("https://x.test/play", true);
        assert_eq!(
            mode,
            AddressingMode::Dynamic {
                address: "https://x.test/play".into()
            }
        );
    }

    #[test]
    fn test_numbered_path_becomes_template() {
        let mode = discovery().infer("https://x.test/level/1?seed=42", false);
        assert_eq!(
            mode,
            AddressingMode::Templated {
                template: "https://x.test/level/{n}?seed=42".into()
            }
        );
        assert_eq!(mode.resolve(12), "https://x.test/level/12?seed=42");
    }

    #[test]
    fn test_unknown_address_falls_back() {
        let mode = discovery().infer("https://x.test/play", false);
        assert_eq!(
            mode,
            AddressingMode::Templated {
                template: "https://x.test/play".into()
            }
        );
    }

    #[test]
    fn test_pattern_without_group_rejected() {
        let config = DiscoveryConfig {
            templated_patterns: vec![r"/c/\d+".into()],
            ..DiscoveryConfig::default()
        };
        assert!(AddressDiscovery::new(&config).is_err());
    }
}
