//! The rendition ladder.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One rung of the adaptive-bitrate ladder.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Quality {
    #[serde(rename = "480p")]
    Q480,
    #[serde(rename = "720p")]
    Q720,
    #[serde(rename = "1080p")]
    Q1080,
}

/// Every rung the pipeline knows about, lowest first.
pub const LADDER: [Quality; 3] = [Quality::Q480, Quality::Q720, Quality::Q1080];

impl Quality {
    pub fn height(self) -> u32 {
        match self {
            Quality::Q480 => 480,
            Quality::Q720 => 720,
            Quality::Q1080 => 1080,
        }
    }

    pub fn width(self) -> u32 {
        match self {
            Quality::Q480 => 854,
            Quality::Q720 => 1280,
            Quality::Q1080 => 1920,
        }
    }

    pub fn bitrate_kbps(self) -> u32 {
        match self {
            Quality::Q480 => 1000,
            Quality::Q720 => 2500,
            Quality::Q1080 => 5000,
        }
    }

    /// BANDWIDTH attribute for the master playlist. Derived from the
    /// configured bitrate, not measured after the encode.
    pub fn bandwidth(self) -> u64 {
        self.bitrate_kbps() as u64 * 1000
    }

    /// Path segment and display label ("480p", "720p", "1080p").
    pub fn label(self) -> &'static str {
        match self {
            Quality::Q480 => "480p",
            Quality::Q720 => "720p",
            Quality::Q1080 => "1080p",
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Select the rungs to encode for a source of the given native height:
/// every rung at or below the source, never upscaling. Sources shorter than
/// the lowest rung still get a 480p rendition so at least one playable
/// rendition always exists.
pub fn select_ladder(source_height: u32) -> Vec<Quality> {
    let rungs: Vec<Quality> = LADDER
        .iter()
        .copied()
        .filter(|q| q.height() <= source_height)
        .collect();
    if rungs.is_empty() {
        vec![Quality::Q480]
    } else {
        rungs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_ladder_for_1080p_source() {
        assert_eq!(
            select_ladder(1080),
            vec![Quality::Q480, Quality::Q720, Quality::Q1080]
        );
    }

    #[test]
    fn ladder_never_upscales() {
        assert_eq!(select_ladder(720), vec![Quality::Q480, Quality::Q720]);
        assert_eq!(select_ladder(719), vec![Quality::Q480]);
        assert_eq!(select_ladder(1079), vec![Quality::Q480, Quality::Q720]);
    }

    #[test]
    fn tiny_source_still_gets_lowest_rung() {
        assert_eq!(select_ladder(360), vec![Quality::Q480]);
        assert_eq!(select_ladder(0), vec![Quality::Q480]);
    }

    #[test]
    fn exact_height_is_included() {
        assert_eq!(select_ladder(480), vec![Quality::Q480]);
    }

    #[test]
    fn bandwidth_follows_configured_bitrate() {
        assert_eq!(Quality::Q480.bandwidth(), 1_000_000);
        assert_eq!(Quality::Q720.bandwidth(), 2_500_000);
        assert_eq!(Quality::Q1080.bandwidth(), 5_000_000);
    }

    #[test]
    fn labels() {
        assert_eq!(Quality::Q720.to_string(), "720p");
        assert_eq!(Quality::Q1080.label(), "1080p");
    }
}
