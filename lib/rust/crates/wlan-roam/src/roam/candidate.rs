// Copyright 2019 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use {
    crate::{
        channel::{Band, ChannelCache},
        config::RoamConfig,
        profile::{ConnectedProfile, RoamProfile},
        BssDescription, MacFmt,
    },
    log::debug,
    std::cmp::Reverse,
};

/// Index of the RSSI category `rssi_dbm` falls in. Category 0 is the strongest; category `k`
/// starts `k * cat_rssi_offset_db` below `best_category_rssi_dbm`.
pub fn rssi_category(cfg: &RoamConfig, rssi_dbm: i8) -> usize {
    let last = cfg.num_rssi_categories.saturating_sub(1);
    let best = i32::from(cfg.best_category_rssi_dbm);
    let offset = i32::from(cfg.cat_rssi_offset_db);
    (0..last)
        .find(|k| i32::from(rssi_dbm) >= best - offset * (*k as i32))
        .unwrap_or(last)
}

/// Preference of a BSS by signal strength. Higher is better.
pub fn prefer_value(cfg: &RoamConfig, rssi_dbm: i8) -> usize {
    cfg.num_rssi_categories - rssi_category(cfg, rssi_dbm)
}

/// Filters `bss_list` down to the BSSs `profile` may join and ranks them, best first. BSSs that
/// compare equal keep their scan order. `current` is the link being roamed away from, if any.
pub fn select_candidates(
    cfg: &RoamConfig,
    channels: &ChannelCache,
    profile: &RoamProfile,
    bss_list: Vec<BssDescription>,
    current: Option<&ConnectedProfile>,
) -> Vec<BssDescription> {
    let roaming = current.is_some();
    let current_band = current.map(|c| Band::of(c.channel));
    let mut candidates: Vec<_> = bss_list
        .into_iter()
        .filter(|bss| bss.ssid == profile.ssid)
        .filter(|bss| profile.bssid.map_or(true, |pinned| pinned == bss.bssid))
        .filter(|bss| {
            let allowed = channels.channel_allowed(bss.channel, bss.is_dfs && roaming);
            if !allowed {
                debug!("skipping {} on disallowed channel {}", bss.bssid.to_mac_str(), bss.channel);
            }
            allowed
        })
        .collect();
    candidates.sort_by_key(|bss| {
        let intra_band =
            roaming && cfg.roam_intra_band && current_band == Some(Band::of(bss.channel));
        let five_ghz = cfg.prefer_5ghz && bss.is_5ghz();
        Reverse((intra_band, five_ghz, prefer_value(cfg, bss.rssi_dbm)))
    });
    candidates
}
