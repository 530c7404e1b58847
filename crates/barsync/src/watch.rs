//! `barsync watch`: connect airports and stream what happens to stdout.

use std::path::PathBuf;
use std::sync::Arc;

use barsync_api::WsConnector;
use barsync_core::{ConnectionSession, Origin, RegistryEvent, RelayNotice, SyncHub};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use crate::cli::{GlobalOpts, WatchArgs};
use crate::error::CliError;

pub async fn run(args: WatchArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let path: PathBuf = global
        .config
        .clone()
        .unwrap_or_else(barsync_config::config_path);
    let mut cfg = barsync_config::load_config_from(&path)?;

    // CLI flags override the file
    if let Some(key) = args.api_key {
        cfg.api_key = Some(key);
        cfg.api_key_env = None;
    }
    if let Some(url) = args.relay_url {
        cfg.relay_url = url;
    }

    let controller_id = args
        .controller_id
        .or_else(|| cfg.controller_id.clone())
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| CliError::Validation {
            field: "controller_id".into(),
            reason: "pass --controller-id or set controller_id in the config file".into(),
        })?;

    let airports = if args.airports.is_empty() {
        cfg.airports.clone()
    } else {
        args.airports
    };
    if airports.is_empty() {
        return Err(CliError::Validation {
            field: "airports".into(),
            reason: "name at least one airport, on the command line or in the config file".into(),
        });
    }

    let sync = barsync_config::to_sync_config(&cfg)?;
    let hub = SyncHub::new(sync, Arc::new(WsConnector::new()));
    let mut events = hub.registry().subscribe();
    let mut lost = hub.directory().subscribe_lost();
    let cancel = CancellationToken::new();

    for code in &airports {
        match hub.directory().connect_airport(code.as_str(), &controller_id).await {
            Ok(session) => {
                println!("{} {} connected", now(), session.airport());
                tokio::spawn(follow_session(session, cancel.clone()));
            }
            Err(e) => {
                cancel.cancel();
                hub.shutdown().await;
                return Err(e.into());
            }
        }
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => println!("{} {}", now(), format_event(&event)),
                Err(RecvError::Lagged(n)) => tracing::warn!(skipped = n, "event output lagged"),
                Err(RecvError::Closed) => break,
            },
            airport = lost.recv() => {
                if let Ok(airport) = airport {
                    println!("{} {airport} lost", now());
                }
                if hub.directory().sessions().is_empty() {
                    tracing::info!("no airports left");
                    break;
                }
            }
        }
    }

    cancel.cancel();
    hub.shutdown().await;
    Ok(())
}

/// Print link state, errors and presence notices for one session.
async fn follow_session(session: ConnectionSession, cancel: CancellationToken) {
    let airport = session.airport().clone();
    let mut state = session.subscribe_connection();
    let mut errors = session.subscribe_errors();
    let mut notices = session.subscribe_notices();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *state.borrow_and_update();
                println!("{} {airport} {current:?}", now());
            }
            Ok(message) = errors.recv() => eprintln!("{} {airport} error: {message}", now()),
            Ok(notice) = notices.recv() => println!("{} {airport} {}", now(), format_notice(&notice)),
        }
    }
}

fn format_event(event: &RegistryEvent) -> String {
    match event {
        RegistryEvent::StateChanged(change) => {
            let device = &change.device;
            let source = match change.origin {
                Origin::Local => "local",
                Origin::Relay => "relay",
            };
            format!(
                "{} {} {} ({source}, {})",
                device.airport,
                device.id,
                on_off(device.state),
                change.tag
            )
        }
        RegistryEvent::Registered { device, .. } => format!(
            "{} {} registered {}",
            device.airport,
            device.id,
            on_off(device.state)
        ),
        RegistryEvent::LeadOnBound { device } => format!(
            "{} {} paired with lead-on {}",
            device.airport,
            device.id,
            device.lead_on_id.as_deref().unwrap_or("-")
        ),
    }
}

fn format_notice(notice: &RelayNotice) -> String {
    match notice {
        RelayNotice::ControllerConnected { controller_id } => format!("controller {controller_id} joined"),
        RelayNotice::ControllerDisconnected { controller_id } => format!("controller {controller_id} left"),
    }
}

fn on_off(state: bool) -> &'static str {
    if state { "ON" } else { "OFF" }
}

fn now() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}
