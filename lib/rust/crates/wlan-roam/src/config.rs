// Copyright 2019 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use {
    crate::CountryCode,
    anyhow::{ensure, Context, Error},
    serde::Deserialize,
    std::{fs, path::Path, time::Duration},
};

pub const DEFAULT_NUM_RSSI_CATEGORIES: usize = 15;

/// Read-only tunables of the roaming core. Every field has a default, so a config file only
/// needs to name what it overrides.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RoamConfig {
    pub num_rssi_categories: usize,
    /// dB between the thresholds of two neighboring RSSI categories.
    pub cat_rssi_offset_db: u8,
    /// Threshold of the best category, in dBm.
    pub best_category_rssi_dbm: i8,
    pub dfs_roaming_allowed: bool,
    pub prefer_5ghz: bool,
    pub roam_intra_band: bool,
    pub max_join_attempts: u8,
    pub roaming_timeout_ms: u64,
    pub wait_for_key_timeout_ms: u64,
    pub max_country_votes: usize,
    pub pmkid_cache_capacity: usize,
    pub bkid_cache_capacity: usize,
    pub command_queue_capacity: usize,
    #[serde(with = "country_code")]
    pub default_country: CountryCode,
    pub lost_link_roaming: bool,
}

impl Default for RoamConfig {
    fn default() -> Self {
        RoamConfig {
            num_rssi_categories: DEFAULT_NUM_RSSI_CATEGORIES,
            cat_rssi_offset_db: 5,
            best_category_rssi_dbm: -30,
            dfs_roaming_allowed: false,
            prefer_5ghz: false,
            roam_intra_band: false,
            max_join_attempts: 3,
            roaming_timeout_ms: 10_000,
            wait_for_key_timeout_ms: 5_000,
            max_country_votes: 100,
            pmkid_cache_capacity: 32,
            bkid_cache_capacity: 16,
            command_queue_capacity: 64,
            default_country: *b"00",
            lost_link_roaming: true,
        }
    }
}

impl RoamConfig {
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let cfg: RoamConfig = serde_json::from_str(json).context("malformed roam config")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .with_context(|| format!("failed to read roam config {}", path.display()))?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<(), Error> {
        ensure!(self.num_rssi_categories >= 1, "at least one RSSI category is required");
        ensure!(self.max_join_attempts >= 1, "max_join_attempts must be at least 1");
        ensure!(self.max_country_votes >= 1, "max_country_votes must be at least 1");
        ensure!(self.pmkid_cache_capacity >= 1, "pmkid_cache_capacity must be at least 1");
        ensure!(self.bkid_cache_capacity >= 1, "bkid_cache_capacity must be at least 1");
        ensure!(self.command_queue_capacity >= 1, "command_queue_capacity must be at least 1");
        Ok(())
    }

    pub fn roaming_timeout(&self) -> Duration {
        Duration::from_millis(self.roaming_timeout_ms)
    }

    pub fn wait_for_key_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_for_key_timeout_ms)
    }
}

mod country_code {
    use {
        crate::CountryCode,
        serde::{de::Error, Deserialize, Deserializer},
    };

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<CountryCode, D::Error> {
        let s = String::deserialize(d)?;
        let bytes = s.as_bytes();
        if bytes.len() != 2 {
            return Err(D::Error::custom(format!("country code {:?} is not 2 characters", s)));
        }
        Ok([bytes[0], bytes[1]])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_yields_defaults() {
        let cfg = RoamConfig::from_json("{}").expect("empty config should parse");
        assert_eq!(cfg, RoamConfig::default());
        assert_eq!(cfg.num_rssi_categories, 15);
        assert_eq!(cfg.wait_for_key_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn overrides() {
        let cfg = RoamConfig::from_json(
            r#"{ "prefer_5ghz": true, "default_country": "US", "max_join_attempts": 5 }"#,
        )
        .expect("config should parse");
        assert!(cfg.prefer_5ghz);
        assert_eq!(cfg.default_country, *b"US");
        assert_eq!(cfg.max_join_attempts, 5);
        assert_eq!(cfg.pmkid_cache_capacity, 32);
    }

    #[test]
    fn rejects_bad_country_code() {
        assert!(RoamConfig::from_json(r#"{ "default_country": "USA" }"#).is_err());
    }

    #[test]
    fn rejects_unknown_field() {
        assert!(RoamConfig::from_json(r#"{ "bogus": 1 }"#).is_err());
    }

    #[test]
    fn rejects_zero_capacity() {
        let err = RoamConfig::from_json(r#"{ "command_queue_capacity": 0 }"#)
            .expect_err("zero capacity should be rejected");
        assert!(format!("{}", err).contains("command_queue_capacity"));
    }

    #[test]
    fn missing_file() {
        let err = RoamConfig::load_from_file("/nonexistent/roam.json")
            .expect_err("missing file should fail");
        assert!(format!("{}", err).contains("/nonexistent/roam.json"));
    }
}
