//! Device Probe Utility
//!
//! Lists audio input devices and reports the capability ranges the call
//! engine would negotiate with, without joining a call.

use anyhow::Result;
use cpal::traits::{DeviceTrait, HostTrait};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use call_engine::media::{DeviceMediaSource, MediaSource, QualityProfile};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    println!("\n=== Audio Input Devices ===");
    let host = cpal::default_host();
    let default_name = host
        .default_input_device()
        .and_then(|d| d.name().ok());

    match host.input_devices() {
        Ok(devices) => {
            let mut found = false;
            for device in devices {
                found = true;
                let name = device.name().unwrap_or_else(|_| "unknown input".into());
                let default_marker = if Some(&name) == default_name.as_ref() {
                    " [DEFAULT]"
                } else {
                    ""
                };
                println!("  {name}{default_marker}");
                match device.default_input_config() {
                    Ok(config) => {
                        println!("    Sample rate: {} Hz", config.sample_rate().0);
                        println!("    Channels: {}", config.channels());
                        println!("    Format: {:?}", config.sample_format());
                    }
                    Err(e) => println!("    (config unavailable: {e})"),
                }
            }
            if !found {
                println!("  (none)");
            }
        }
        Err(e) => println!("  enumeration failed: {e}"),
    }

    let source = DeviceMediaSource::new();
    let caps = source.capabilities().await;
    println!("\n=== Negotiable Capabilities ===");
    println!("  Max resolution: {}x{}", caps.max_width, caps.max_height);
    println!("  Max frame rate: {} fps", caps.max_frame_rate);
    println!("  Audio devices:  {}", caps.audio_devices);

    for profile in [QualityProfile::High, QualityProfile::Low] {
        let constraints = profile.constraints(true);
        println!("\n=== {profile:?} Profile Constraints ===");
        if let Some(video) = &constraints.video {
            let ideal = match (video.ideal_width, video.ideal_height) {
                (Some(w), Some(h)) => format!("{w}x{h} ideal, "),
                _ => String::new(),
            };
            println!(
                "  Video: {}{}x{} max, up to {} fps",
                ideal, video.max_width, video.max_height, video.max_frame_rate,
            );
        }
        println!(
            "  Audio: {} Hz, {} channel(s)",
            constraints.audio.sample_rate, constraints.audio.channels,
        );
        if let Some(bps) = constraints.bitrate_hint {
            println!("  Bitrate hint: {bps} bps");
        }
    }
    println!();

    Ok(())
}
