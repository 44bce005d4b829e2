//! Monitor-wide tunables (§6), deserializable from the TOML config file.

use crate::backend::DiskSpaceLimits;
use crate::error::{MonitorError, Result};
use crate::status::EventMask;
use serde::Deserialize;
use std::time::Duration;

/// Settings that apply uniformly to every backend a monitor owns. Mirrors
/// the recognized-keys list in §6; anything the config layer doesn't
/// recognize is rejected by `serde`'s default "deny unknown fields" when the
/// embedding `MonitorConfig` uses it, not handled here.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    #[serde(with = "humantime_serde")]
    pub monitor_interval: Duration,

    #[serde(with = "humantime_serde")]
    pub backend_connect_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub backend_read_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub backend_write_timeout: Duration,
    pub backend_connect_attempts: u32,

    #[serde(with = "humantime_serde")]
    pub disk_space_check_interval: Duration,
    /// Raw `path:percent,path:percent,...` form from config; call
    /// [`parse_disk_space_threshold`] to turn it into [`DiskSpaceLimits`].
    pub disk_space_threshold: Option<String>,

    #[serde(with = "humantime_serde")]
    pub journal_max_age: Duration,

    pub script: Option<String>,
    #[serde(with = "humantime_serde")]
    pub script_timeout: Duration,
    /// Space-separated event names from config; resolved to an [`EventMask`]
    /// by the caller once all event names are known.
    pub events: Option<String>,

    /// Credentials substituted into a dispatched script's `$CREDENTIALS`
    /// token, so the script can reconnect with the same account the monitor
    /// itself probes with.
    pub monitor_user: Option<String>,
    pub monitor_password: Option<String>,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            monitor_interval: Duration::from_millis(2000),
            backend_connect_timeout: Duration::from_secs(3),
            backend_read_timeout: Duration::from_secs(1),
            backend_write_timeout: Duration::from_secs(2),
            backend_connect_attempts: 1,
            disk_space_check_interval: Duration::from_secs(0),
            disk_space_threshold: None,
            journal_max_age: Duration::from_secs(28800),
            script: None,
            script_timeout: Duration::from_secs(90),
            events: None,
            monitor_user: None,
            monitor_password: None,
        }
    }
}

impl MonitorSettings {
    pub fn disk_space_limits(&self) -> Result<DiskSpaceLimits> {
        match &self.disk_space_threshold {
            None => Ok(DiskSpaceLimits::empty()),
            Some(raw) => parse_disk_space_threshold(raw),
        }
    }
}

/// Parses a comma-separated `path:percent` list (`*` matching any path not
/// otherwise named), e.g. `/:80,/var/lib/mysql:90`.
pub fn parse_disk_space_threshold(raw: &str) -> Result<DiskSpaceLimits> {
    let mut limits = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (path, percent) = entry
            .rsplit_once(':')
            .ok_or_else(|| MonitorError::ConfigInvalid(format!("malformed disk threshold entry '{entry}'")))?;
        let percent: u8 = percent
            .trim()
            .parse()
            .map_err(|_| MonitorError::ConfigInvalid(format!("'{percent}' is not a valid percentage")))?;
        if percent == 0 || percent > 100 {
            return Err(MonitorError::ConfigInvalid(format!(
                "disk threshold percentage {percent} out of range 1..=100"
            )));
        }
        limits.push((path.trim().to_owned(), percent));
    }
    Ok(DiskSpaceLimits(limits))
}

/// Resolves a space-separated list of event names against `known`, producing
/// a mask of only the named events. An unrecognized name is a configuration
/// error rather than silently ignored.
pub fn parse_event_mask(raw: &str, known: &[(&str, EventMask)]) -> Result<EventMask> {
    let mut mask = 0;
    for name in raw.split_whitespace() {
        let bit = known
            .iter()
            .find(|(known_name, _)| *known_name == name)
            .map(|(_, bit)| *bit)
            .ok_or_else(|| MonitorError::ConfigInvalid(format!("unknown event name '{name}'")))?;
        mask |= bit;
    }
    Ok(mask)
}

impl MonitorSettings {
    /// Resolves the `events` setting (a space-separated list of event names,
    /// §6) into an [`EventMask`] the worker loop can test a classified event
    /// against before dispatching a script (§4.5 step 4). Unset means "every
    /// event dispatches" — the same default the original monitor core ships
    /// (`mxs_monitor_event_enum_values` defaulted to "all").
    pub fn event_mask(&self) -> Result<EventMask> {
        match &self.events {
            None => Ok(crate::status::all_events_mask()),
            Some(raw) => {
                let known: Vec<(&str, EventMask)> = crate::status::ALL_EVENTS
                    .iter()
                    .map(|&e| (e.name(), crate::status::event_bit(e)))
                    .collect();
                parse_event_mask(raw, &known)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mixed_path_and_wildcard_thresholds() {
        let limits = parse_disk_space_threshold("/:80, *:90").unwrap();
        assert_eq!(limits.0, vec![("/".to_string(), 80), ("*".to_string(), 90)]);
    }

    #[test]
    fn rejects_out_of_range_percentage() {
        assert!(parse_disk_space_threshold("/:150").is_err());
        assert!(parse_disk_space_threshold("/:0").is_err());
    }

    #[test]
    fn rejects_entry_missing_colon() {
        assert!(parse_disk_space_threshold("/var/lib/mysql").is_err());
    }

    #[test]
    fn event_mask_rejects_unknown_name() {
        let known = [("master_down", 1u32), ("master_up", 2)];
        assert!(parse_event_mask("master_down bogus_event", &known).is_err());
    }

    #[test]
    fn event_mask_combines_named_bits() {
        let known = [("master_down", 1u32), ("master_up", 2)];
        let mask = parse_event_mask("master_down master_up", &known).unwrap();
        assert_eq!(mask, 0b11);
    }

    #[test]
    fn unset_events_resolves_to_dispatch_everything() {
        let settings = MonitorSettings::default();
        assert_eq!(settings.event_mask().unwrap(), crate::status::all_events_mask());
    }

    #[test]
    fn named_events_resolve_to_a_narrower_mask() {
        let mut settings = MonitorSettings::default();
        settings.events = Some("master_down master_up".to_string());
        let mask = settings.event_mask().unwrap();
        assert_eq!(
            mask,
            crate::status::event_bit(crate::status::MonitorEvent::MasterDown)
                | crate::status::event_bit(crate::status::MonitorEvent::MasterUp)
        );
    }

    #[test]
    fn default_settings_match_documented_values() {
        let defaults = MonitorSettings::default();
        assert_eq!(defaults.monitor_interval, Duration::from_millis(2000));
        assert_eq!(defaults.backend_connect_attempts, 1);
        assert!(defaults.disk_space_threshold.is_none());
    }
}
