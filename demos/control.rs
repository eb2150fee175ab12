//! Print the state of a DCM1 and optionally change one zone's volume
//!
//! Usage: cargo run --example control -- <host> [port] [zone level]

use cloud_dcm1::{Dcm1Mixer, LoggingListener, MixerConfig, DEFAULT_PORT};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cloud_dcm1=info".into()),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(host) = args.first() else {
        eprintln!("usage: control <host> [port] [zone level]");
        std::process::exit(2);
    };
    let port = match args.get(1) {
        Some(port) => port.parse()?,
        None => DEFAULT_PORT,
    };

    let mixer = Dcm1Mixer::new(MixerConfig::new(host.as_str(), port));
    mixer.register_listener(Arc::new(LoggingListener));
    mixer.connect().await?;

    if !mixer.wait_for_zone_data(Duration::from_secs(15)).await {
        println!("Zone data incomplete, showing what arrived");
    }

    let state = mixer.snapshot();
    for source in state.sources.values() {
        println!("Source {}: {}", source.id, source.display_name());
    }
    for zone in state.zones.values() {
        println!(
            "Zone {} {:<16} source {:?} level {:?}{} eq {}",
            zone.id,
            zone.display_name(),
            zone.current_source,
            zone.volume_level,
            if zone.muted { " (muted)" } else { "" },
            serde_json::to_string(&zone.eq)?,
        );
    }

    if let (Some(zone), Some(level)) = (args.get(2), args.get(3)) {
        let zone: u8 = zone.parse()?;
        let level: u8 = level.parse()?;
        let mut events = mixer.subscribe();
        mixer.set_zone_volume(zone, level)?;

        // Let the confirmation come back
        let _ = tokio::time::timeout(Duration::from_secs(3), events.recv()).await;
        if let Some(zone) = mixer.zone(zone) {
            println!("{} now at level {:?}", zone.name(), zone.volume_level());
        }
    }

    mixer.disconnect().await;
    Ok(())
}
