//! Media acquisition
//!
//! Produces local capture streams under a quality profile and probes device
//! capabilities. Sessions consume this through the [`MediaSource`] trait so
//! call logic can be exercised without real hardware.

pub mod profile;
pub mod stream;

pub use profile::{AudioConstraints, MediaConstraints, QualityProfile, VideoConstraints};
pub use stream::{MediaStream, MediaTrack, TrackKind};

use cpal::traits::{DeviceTrait, HostTrait};
use serde::Serialize;
use std::future::Future;

use crate::constants::{FALLBACK_MAX_FRAME_RATE, FALLBACK_MAX_HEIGHT, FALLBACK_MAX_WIDTH};
use crate::error::MediaError;

/// Negotiable ranges reported by [`MediaSource::capabilities`]
#[derive(Debug, Clone, Serialize)]
pub struct DeviceCapabilities {
    pub max_width: u32,
    pub max_height: u32,
    pub max_frame_rate: u32,
    pub video_devices: usize,
    pub audio_devices: usize,
}

impl Default for DeviceCapabilities {
    fn default() -> Self {
        Self {
            max_width: FALLBACK_MAX_WIDTH,
            max_height: FALLBACK_MAX_HEIGHT,
            max_frame_rate: FALLBACK_MAX_FRAME_RATE,
            video_devices: 1,
            audio_devices: 1,
        }
    }
}

/// Source of local capture streams
pub trait MediaSource: Send + Sync + 'static {
    /// Acquire a capture stream under the given profile.
    ///
    /// When `include_video` is false the video constraint is omitted entirely,
    /// so no camera access is requested. On failure no partial stream is
    /// retained.
    fn acquire(
        &self,
        profile: QualityProfile,
        include_video: bool,
    ) -> impl Future<Output = Result<MediaStream, MediaError>> + Send;

    /// Probe available input devices and negotiable capability ranges.
    ///
    /// Falls back to fixed defaults when probing fails; never errors.
    fn capabilities(&self) -> impl Future<Output = DeviceCapabilities> + Send;
}

/// cpal-backed media source
///
/// Audio capture is validated against real input hardware. Camera capture is
/// delegated to the platform RTC stack, so the video track here is
/// materialized from the constraint set alone, and the capability report's
/// video figures are always the fixed fallbacks — cpal has no camera
/// enumeration, so only `audio_devices` is probed live.
#[derive(Debug, Clone, Default)]
pub struct DeviceMediaSource;

impl DeviceMediaSource {
    pub fn new() -> Self {
        Self
    }
}

impl MediaSource for DeviceMediaSource {
    async fn acquire(
        &self,
        profile: QualityProfile,
        include_video: bool,
    ) -> Result<MediaStream, MediaError> {
        let constraints = profile.constraints(include_video);

        // cpal device access is blocking; keep it off the event loop.
        tokio::task::spawn_blocking(move || acquire_blocking(&constraints))
            .await
            .map_err(|e| MediaError::CpalError(e.to_string()))?
    }

    async fn capabilities(&self) -> DeviceCapabilities {
        tokio::task::spawn_blocking(probe_blocking)
            .await
            .unwrap_or_default()
    }
}

fn acquire_blocking(constraints: &MediaConstraints) -> Result<MediaStream, MediaError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| MediaError::DeviceNotFound("no default audio input device".to_string()))?;

    let name = device
        .name()
        .unwrap_or_else(|_| "unknown input".to_string());

    // A device that refuses to report a config is effectively inaccessible
    // (in-use or permission-denied on most platforms).
    device
        .default_input_config()
        .map_err(|e| MediaError::AccessDenied(e.to_string()))?;

    let supports_requested = device
        .supported_input_configs()
        .map(|mut configs| {
            configs.any(|c| {
                let rate = cpal::SampleRate(constraints.audio.sample_rate);
                c.channels() >= constraints.audio.channels
                    && rate >= c.min_sample_rate()
                    && rate <= c.max_sample_rate()
            })
        })
        .unwrap_or(false);

    if !supports_requested {
        tracing::debug!(
            device = %name,
            sample_rate = constraints.audio.sample_rate,
            channels = constraints.audio.channels,
            "requested audio constraints not natively supported, device default will be used"
        );
    }

    // Build all tracks before constructing the stream so a failure cannot
    // leave a partially live set behind.
    let mut tracks = vec![MediaTrack::new(TrackKind::Audio, name)];
    if constraints.video.is_some() {
        tracks.push(MediaTrack::new(TrackKind::Video, "camera"));
    }

    Ok(MediaStream::new(tracks))
}

// Only the audio side is live here; video capability ranges stay at the
// fixed fallbacks (see `DeviceMediaSource`).
fn probe_blocking() -> DeviceCapabilities {
    let host = cpal::default_host();
    let audio_devices = host
        .input_devices()
        .map(|devices| devices.count())
        .unwrap_or(0);

    // Opportunistic probe: open a capture stream on the default input and let
    // it drop immediately. Errors only downgrade the report to defaults.
    if let Err(e) = open_probe_stream(&host) {
        tracing::debug!("capability probe failed, using fixed defaults: {e}");
    }

    DeviceCapabilities {
        audio_devices: audio_devices.max(1),
        ..DeviceCapabilities::default()
    }
}

fn open_probe_stream(host: &cpal::Host) -> Result<(), MediaError> {
    let device = host
        .default_input_device()
        .ok_or_else(|| MediaError::DeviceNotFound("no default audio input device".to_string()))?;
    let config = device
        .default_input_config()
        .map_err(|e| MediaError::ProbeFailed(e.to_string()))?;

    let _stream = device
        .build_input_stream(
            &config.config(),
            |_data: &[f32], _: &cpal::InputCallbackInfo| {},
            |err| tracing::debug!("probe stream error: {err}"),
            None,
        )
        .map_err(|e| MediaError::ProbeFailed(e.to_string()))?;

    // Stream drops here, releasing the device on every path.
    Ok(())
}
