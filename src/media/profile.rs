//! Capture quality profiles and constraint sets

use serde::{Deserialize, Serialize};

/// Capture quality profile requested by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityProfile {
    High,
    Low,
}

/// Video capture constraints
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoConstraints {
    pub ideal_width: Option<u32>,
    pub max_width: u32,
    pub ideal_height: Option<u32>,
    pub max_height: u32,
    pub ideal_frame_rate: Option<u32>,
    pub max_frame_rate: u32,
}

/// Audio capture constraints
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioConstraints {
    pub sample_rate: u32,
    pub channels: u16,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

/// Combined constraint set passed to a media source
///
/// `video: None` means the video constraint is omitted entirely, so no camera
/// access is requested at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaConstraints {
    pub video: Option<VideoConstraints>,
    pub audio: AudioConstraints,
    /// Advisory initial bitrate ceiling in bps. Capture constraints cannot
    /// enforce this; the quality monitor applies it on the outbound sender.
    pub bitrate_hint: Option<u32>,
}

impl QualityProfile {
    /// Build the constraint set for this profile.
    pub fn constraints(self, include_video: bool) -> MediaConstraints {
        match self {
            QualityProfile::High => MediaConstraints {
                video: include_video.then_some(VideoConstraints {
                    ideal_width: Some(1280),
                    max_width: 1920,
                    ideal_height: Some(720),
                    max_height: 1080,
                    ideal_frame_rate: Some(30),
                    max_frame_rate: 60,
                }),
                audio: AudioConstraints {
                    sample_rate: 48_000,
                    channels: 2,
                    echo_cancellation: true,
                    noise_suppression: true,
                    auto_gain_control: true,
                },
                bitrate_hint: None,
            },
            QualityProfile::Low => MediaConstraints {
                video: include_video.then_some(VideoConstraints {
                    ideal_width: None,
                    max_width: 640,
                    ideal_height: None,
                    max_height: 480,
                    ideal_frame_rate: None,
                    max_frame_rate: 15,
                }),
                audio: AudioConstraints {
                    sample_rate: 24_000,
                    channels: 1,
                    echo_cancellation: true,
                    noise_suppression: true,
                    auto_gain_control: true,
                },
                bitrate_hint: Some(500_000),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_high_profile_video() {
        let constraints = QualityProfile::High.constraints(true);
        let video = constraints.video.expect("high profile includes video");
        assert_eq!(video.ideal_width, Some(1280));
        assert_eq!(video.max_width, 1920);
        assert_eq!(video.max_frame_rate, 60);
        assert_eq!(constraints.audio.sample_rate, 48_000);
        assert_eq!(constraints.audio.channels, 2);
        assert!(constraints.audio.echo_cancellation);
        assert!(constraints.bitrate_hint.is_none());
    }

    #[test]
    fn test_low_profile_caps() {
        let constraints = QualityProfile::Low.constraints(true);
        let video = constraints.video.expect("video requested");
        assert_eq!(video.max_width, 640);
        assert_eq!(video.max_frame_rate, 15);
        assert_eq!(constraints.audio.sample_rate, 24_000);
        assert_eq!(constraints.audio.channels, 1);
        assert_eq!(constraints.bitrate_hint, Some(500_000));
    }

    #[test]
    fn test_audio_only_omits_video_constraint() {
        let constraints = QualityProfile::High.constraints(false);
        assert!(constraints.video.is_none());
    }
}
