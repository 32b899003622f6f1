//! Network quality monitoring
//!
//! Classifies peer-connection statistics into a coarse quality level and
//! decides bitrate actions for the outbound video sender. The session runtime
//! drives the sampling tick; everything here is pure state.

use serde::Serialize;

use crate::constants::{BITRATE_RECOVERY_SAMPLES, POOR_QUALITY_BITRATE_CAP};
use crate::session::peer::InboundVideoStats;

/// Derived network quality, advisory only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkQuality {
    Excellent,
    Good,
    Fair,
    Poor,
}

/// One sampling tick's worth of statistics
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualitySample {
    /// Fraction of packets lost, 0.0..=1.0
    pub packet_loss: f64,
    /// Inter-arrival jitter in milliseconds
    pub jitter_ms: f64,
}

impl QualitySample {
    pub fn new(packet_loss: f64, jitter_ms: f64) -> Self {
        Self {
            packet_loss,
            jitter_ms,
        }
    }

    /// Derive a sample from the inbound video statistics entry. A missing
    /// entry (e.g. audio-only call) reads as a clean sample.
    pub fn from_stats(stats: Option<InboundVideoStats>) -> Self {
        match stats {
            Some(stats) => {
                let total = stats.packets_lost + stats.packets_received;
                let packet_loss = if total == 0 {
                    0.0
                } else {
                    stats.packets_lost as f64 / total as f64
                };
                Self::new(packet_loss, stats.jitter_ms)
            }
            None => Self::new(0.0, 0.0),
        }
    }

    /// Classify this sample. Thresholds are evaluated worst-first so a high
    /// loss ratio wins regardless of jitter.
    pub fn classify(&self) -> NetworkQuality {
        if self.packet_loss > 0.10 || self.jitter_ms > 100.0 {
            NetworkQuality::Poor
        } else if self.packet_loss > 0.05 || self.jitter_ms > 50.0 {
            NetworkQuality::Fair
        } else if self.packet_loss < 0.01 {
            NetworkQuality::Excellent
        } else {
            NetworkQuality::Good
        }
    }
}

/// Bitrate adjustment decided from a classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitrateAction {
    None,
    /// Cap the outbound video sender at the given bps.
    Cap(u32),
    /// Remove the cap.
    Lift,
}

/// Tracks the applied cap and decides when to lift it again.
///
/// The cap is applied once on the first poor sample and lifted after
/// [`BITRATE_RECOVERY_SAMPLES`] consecutive non-poor samples.
#[derive(Debug, Clone)]
pub struct BitrateController {
    cap_bps: u32,
    recovery_samples: u32,
    capped: bool,
    clean_streak: u32,
}

impl Default for BitrateController {
    fn default() -> Self {
        Self::new(POOR_QUALITY_BITRATE_CAP, BITRATE_RECOVERY_SAMPLES)
    }
}

impl BitrateController {
    pub fn new(cap_bps: u32, recovery_samples: u32) -> Self {
        Self {
            cap_bps,
            recovery_samples,
            capped: false,
            clean_streak: 0,
        }
    }

    pub fn is_capped(&self) -> bool {
        self.capped
    }

    /// Feed one classification, returning the action to apply.
    pub fn observe(&mut self, quality: NetworkQuality) -> BitrateAction {
        if quality == NetworkQuality::Poor {
            self.clean_streak = 0;
            if !self.capped {
                self.capped = true;
                return BitrateAction::Cap(self.cap_bps);
            }
            return BitrateAction::None;
        }

        if self.capped {
            self.clean_streak += 1;
            if self.clean_streak >= self.recovery_samples {
                self.capped = false;
                self.clean_streak = 0;
                return BitrateAction::Lift;
            }
        }
        BitrateAction::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_classification_points() {
        // High loss is poor regardless of jitter.
        assert_eq!(
            QualitySample::new(0.15, 0.0).classify(),
            NetworkQuality::Poor
        );
        assert_eq!(
            QualitySample::new(0.06, 10.0).classify(),
            NetworkQuality::Fair
        );
        assert_eq!(
            QualitySample::new(0.005, 5.0).classify(),
            NetworkQuality::Excellent
        );
        assert_eq!(
            QualitySample::new(0.02, 20.0).classify(),
            NetworkQuality::Good
        );
    }

    #[test]
    fn test_jitter_thresholds() {
        assert_eq!(
            QualitySample::new(0.0, 101.0).classify(),
            NetworkQuality::Poor
        );
        // Fair has precedence over excellent: low loss cannot mask jitter.
        assert_eq!(
            QualitySample::new(0.004, 60.0).classify(),
            NetworkQuality::Fair
        );
    }

    #[test]
    fn test_zero_denominator_reads_as_no_loss() {
        let sample = QualitySample::from_stats(Some(InboundVideoStats {
            packets_received: 0,
            packets_lost: 0,
            jitter_ms: 0.0,
        }));
        assert_eq!(sample.packet_loss, 0.0);
        assert_eq!(sample.classify(), NetworkQuality::Excellent);
    }

    #[test]
    fn test_loss_ratio_from_counts() {
        let sample = QualitySample::from_stats(Some(InboundVideoStats {
            packets_received: 850,
            packets_lost: 150,
            jitter_ms: 0.0,
        }));
        assert!((sample.packet_loss - 0.15).abs() < 1e-9);
    }

    #[test]
    fn test_cap_applied_once() {
        let mut controller = BitrateController::new(500_000, 3);
        assert_eq!(
            controller.observe(NetworkQuality::Poor),
            BitrateAction::Cap(500_000)
        );
        assert_eq!(controller.observe(NetworkQuality::Poor), BitrateAction::None);
        assert!(controller.is_capped());
    }

    #[test]
    fn test_cap_lifts_after_recovery_streak() {
        let mut controller = BitrateController::new(500_000, 3);
        controller.observe(NetworkQuality::Poor);

        assert_eq!(controller.observe(NetworkQuality::Good), BitrateAction::None);
        assert_eq!(controller.observe(NetworkQuality::Fair), BitrateAction::None);
        assert_eq!(
            controller.observe(NetworkQuality::Excellent),
            BitrateAction::Lift
        );
        assert!(!controller.is_capped());
    }

    #[test]
    fn test_poor_sample_resets_recovery_streak() {
        let mut controller = BitrateController::new(500_000, 3);
        controller.observe(NetworkQuality::Poor);
        controller.observe(NetworkQuality::Good);
        controller.observe(NetworkQuality::Good);
        assert_eq!(controller.observe(NetworkQuality::Poor), BitrateAction::None);
        // Streak starts over.
        controller.observe(NetworkQuality::Good);
        controller.observe(NetworkQuality::Good);
        assert_eq!(
            controller.observe(NetworkQuality::Good),
            BitrateAction::Lift
        );
    }

    proptest! {
        #[test]
        fn prop_heavy_loss_is_always_poor(loss in 0.101f64..1.0, jitter in 0.0f64..500.0) {
            prop_assert_eq!(QualitySample::new(loss, jitter).classify(), NetworkQuality::Poor);
        }

        #[test]
        fn prop_clean_samples_are_excellent(loss in 0.0f64..0.0099, jitter in 0.0f64..50.0) {
            prop_assert_eq!(
                QualitySample::new(loss, jitter).classify(),
                NetworkQuality::Excellent
            );
        }
    }
}
