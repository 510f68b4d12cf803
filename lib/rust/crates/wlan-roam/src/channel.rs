// Copyright 2019 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use {
    crate::{ChannelNumber, CountryCode},
    log::{info, warn},
};

pub fn is_channel_24ghz(channel: ChannelNumber) -> bool {
    channel >= 1 && channel <= 14
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Band {
    TwoGhz,
    FiveGhz,
}

impl Band {
    pub fn of(channel: ChannelNumber) -> Band {
        if is_channel_24ghz(channel) {
            Band::TwoGhz
        } else {
            Band::FiveGhz
        }
    }
}

/// A run of channels sharing one transmit power limit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelPowerInfo {
    pub first_channel: ChannelNumber,
    pub num_channels: u8,
    pub tx_power: u8,
    /// Spacing between consecutive channel numbers of the run. Zero is read as one.
    pub inter_channel_offset: u8,
}

impl ChannelPowerInfo {
    pub fn channels(&self) -> impl Iterator<Item = ChannelNumber> {
        let first = u16::from(self.first_channel);
        let step = u16::from(self.inter_channel_offset.max(1));
        (0..u16::from(self.num_channels))
            .map(move |k| first + k * step)
            .take_while(|ch| *ch <= u16::from(u8::max_value()))
            .map(|ch| ch as ChannelNumber)
    }

    pub fn contains(&self, channel: ChannelNumber) -> bool {
        self.channels().any(|ch| ch == channel)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CountryVote {
    pub country: CountryCode,
    pub votes: u32,
}

/// Radio-wide channel power lists and the 802.11d country votes collected from scans.
#[derive(Debug)]
pub struct ChannelCache {
    power_24ghz: Vec<ChannelPowerInfo>,
    power_5ghz: Vec<ChannelPowerInfo>,
    votes: Vec<CountryVote>,
    max_votes: usize,
    default_country: CountryCode,
    dfs_roaming_allowed: bool,
    dropped_votes: u64,
}

impl ChannelCache {
    pub fn new(max_votes: usize, default_country: CountryCode, dfs_roaming_allowed: bool) -> Self {
        ChannelCache {
            power_24ghz: vec![],
            power_5ghz: vec![],
            votes: vec![],
            max_votes,
            default_country,
            dfs_roaming_allowed,
            dropped_votes: 0,
        }
    }

    /// Counts one vote for `country`. Returns false if the vote table is full and `country` is
    /// not in it yet; such votes are dropped.
    pub fn merge_11d_vote(&mut self, country: CountryCode) -> bool {
        if let Some(row) = self.votes.iter_mut().find(|row| row.country == country) {
            row.votes += 1;
            return true;
        }
        if self.votes.len() >= self.max_votes {
            self.dropped_votes += 1;
            return false;
        }
        self.votes.push(CountryVote { country, votes: 1 });
        true
    }

    /// Country with the most votes. Ties go to the country seen first.
    pub fn elect_country(&self) -> CountryCode {
        let mut winner: Option<&CountryVote> = None;
        for row in &self.votes {
            match winner {
                Some(best) if best.votes >= row.votes => {}
                _ => winner = Some(row),
            }
        }
        winner.map(|row| row.country).unwrap_or(self.default_country)
    }

    pub fn votes(&self) -> &[CountryVote] {
        &self.votes[..]
    }

    pub fn dropped_votes(&self) -> u64 {
        self.dropped_votes
    }

    pub fn clear_votes(&mut self) {
        if !self.votes.is_empty() {
            info!("clearing {} country vote(s)", self.votes.len());
        }
        self.votes.clear();
    }

    pub fn set_power_info(&mut self, band: Band, entries: Vec<ChannelPowerInfo>) {
        for entry in &entries {
            if entry.channels().any(|ch| Band::of(ch) != band) {
                warn!("channel run {:?} crosses out of {:?}", entry, band);
            }
        }
        match band {
            Band::TwoGhz => self.power_24ghz = entries,
            Band::FiveGhz => self.power_5ghz = entries,
        }
    }

    fn power_list(&self, band: Band) -> &[ChannelPowerInfo] {
        match band {
            Band::TwoGhz => &self.power_24ghz[..],
            Band::FiveGhz => &self.power_5ghz[..],
        }
    }

    fn is_unconfigured(&self) -> bool {
        self.power_24ghz.is_empty() && self.power_5ghz.is_empty()
    }

    /// Whether a BSS on `channel` may be joined. With no channel lists configured every channel
    /// is allowed. `is_dfs` should only be set when the join roams away from a live connection.
    pub fn channel_allowed(&self, channel: ChannelNumber, is_dfs: bool) -> bool {
        if is_dfs && !self.dfs_roaming_allowed {
            return false;
        }
        self.is_unconfigured()
            || self.power_list(Band::of(channel)).iter().any(|entry| entry.contains(channel))
    }

    pub fn max_tx_power(&self, channel: ChannelNumber) -> Option<u8> {
        self.power_list(Band::of(channel))
            .iter()
            .find(|entry| entry.contains(channel))
            .map(|entry| entry.tx_power)
    }

    /// Channels to put in a scan request. Empty means every supported channel.
    pub fn scan_channels(&self) -> Vec<ChannelNumber> {
        let mut channels: Vec<_> = self
            .power_24ghz
            .iter()
            .chain(self.power_5ghz.iter())
            .flat_map(|entry| entry.channels())
            .collect();
        channels.sort();
        channels.dedup();
        channels
    }
}

#[cfg(test)]
mod tests {
    use {super::*, proptest::prelude::*, test_case::test_case};

    fn cache() -> ChannelCache {
        ChannelCache::new(3, *b"00", false)
    }

    #[test_case(1 => true ; "lowest 2.4 GHz")]
    #[test_case(14 => true ; "highest 2.4 GHz")]
    #[test_case(36 => false ; "5 GHz")]
    #[test_case(0 => false ; "zero")]
    fn channel_24ghz(channel: ChannelNumber) -> bool {
        is_channel_24ghz(channel)
    }

    #[test]
    fn power_run_channels() {
        let run = ChannelPowerInfo {
            first_channel: 36,
            num_channels: 4,
            tx_power: 17,
            inter_channel_offset: 4,
        };
        assert_eq!(run.channels().collect::<Vec<_>>(), vec![36, 40, 44, 48]);
        let run = ChannelPowerInfo { first_channel: 1, num_channels: 3, tx_power: 20, inter_channel_offset: 0 };
        assert_eq!(run.channels().collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn vote_table_bounded() {
        let mut cache = cache();
        assert!(cache.merge_11d_vote(*b"US"));
        assert!(cache.merge_11d_vote(*b"DE"));
        assert!(cache.merge_11d_vote(*b"JP"));
        assert!(!cache.merge_11d_vote(*b"FR"));
        // Known countries still count once the table is full.
        assert!(cache.merge_11d_vote(*b"DE"));
        assert_eq!(cache.dropped_votes(), 1);
        assert_eq!(cache.votes().len(), 3);
        assert_eq!(cache.elect_country(), *b"DE");
    }

    #[test]
    fn election_ties_go_to_first_seen() {
        let mut cache = cache();
        cache.merge_11d_vote(*b"JP");
        cache.merge_11d_vote(*b"US");
        cache.merge_11d_vote(*b"US");
        cache.merge_11d_vote(*b"JP");
        assert_eq!(cache.elect_country(), *b"JP");
    }

    #[test]
    fn election_defaults_without_votes() {
        let mut cache = cache();
        assert_eq!(cache.elect_country(), *b"00");
        cache.merge_11d_vote(*b"US");
        cache.clear_votes();
        assert_eq!(cache.elect_country(), *b"00");
    }

    #[test]
    fn channel_allowed_rules() {
        let mut cache = cache();
        // Unconfigured lists allow everything but DFS.
        assert!(cache.channel_allowed(149, false));
        assert!(!cache.channel_allowed(52, true));

        cache.set_power_info(
            Band::TwoGhz,
            vec![ChannelPowerInfo { first_channel: 1, num_channels: 11, tx_power: 20, inter_channel_offset: 1 }],
        );
        cache.set_power_info(
            Band::FiveGhz,
            vec![ChannelPowerInfo { first_channel: 36, num_channels: 4, tx_power: 17, inter_channel_offset: 4 }],
        );
        assert!(cache.channel_allowed(11, false));
        assert!(!cache.channel_allowed(13, false));
        assert!(cache.channel_allowed(44, false));
        assert!(!cache.channel_allowed(149, false));
        assert_eq!(cache.max_tx_power(40), Some(17));
        assert_eq!(cache.max_tx_power(6), Some(20));
        assert_eq!(cache.max_tx_power(149), None);
        assert_eq!(cache.scan_channels().len(), 15);

        let dfs_ok = ChannelCache::new(3, *b"00", true);
        assert!(dfs_ok.channel_allowed(52, true));
    }

    fn plurality_votes() -> impl Strategy<Value = Vec<CountryCode>> {
        prop::collection::vec(0u32..6, 3)
            .prop_flat_map(|others| {
                let winner_votes = others.iter().cloned().max().unwrap_or(0) + 1;
                let mut votes = vec![*b"AA"; winner_votes as usize];
                for (code, count) in [*b"BB", *b"CC", *b"DD"].iter().zip(others.iter()) {
                    votes.extend(std::iter::repeat(*code).take(*count as usize));
                }
                Just(votes).prop_shuffle()
            })
    }

    proptest! {
        #[test]
        fn strict_plurality_wins_in_any_order(votes in plurality_votes()) {
            let mut cache = ChannelCache::new(100, *b"00", false);
            for code in votes {
                cache.merge_11d_vote(code);
            }
            prop_assert_eq!(cache.elect_country(), *b"AA");
        }
    }
}
