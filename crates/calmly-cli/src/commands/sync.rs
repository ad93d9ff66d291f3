use calmly_core::{Engine, EntityType, SyncEvent, SyncReport, SyncStatus};
use tokio::sync::broadcast::error::RecvError;

use crate::commands::common::format_status_line;
use crate::error::CliError;

pub async fn run_sync(engine: &Engine, as_json: bool) -> Result<(), CliError> {
    let report = engine.sync_now().await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for line in format_report_lines(&report) {
            println!("{line}");
        }
    }
    Ok(())
}

/// Run the background loop until Ctrl-C, printing each finished cycle
pub async fn run_watch(engine: &Engine) -> Result<(), CliError> {
    let mut events = engine.subscribe_events();
    let _monitor = engine.start()?;
    println!(
        "Syncing every {}s. Press Ctrl-C to stop.",
        engine.config().sync_interval_secs
    );

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
            event = events.recv() => match event {
                Ok(event) => {
                    if let Some(line) = describe_event(&event) {
                        println!("{line}");
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Missed {skipped} sync events");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    engine.shutdown().await;
    println!("Stopped");
    Ok(())
}

pub fn run_status(engine: &Engine, as_json: bool) -> Result<(), CliError> {
    let statuses = EntityType::ALL
        .iter()
        .map(|&entity| engine.sync_status(entity))
        .collect::<Result<Vec<SyncStatus>, _>>()?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&statuses)?);
        return Ok(());
    }

    if !engine.is_sync_configured() {
        println!("Sync is not configured; changes stay local.");
    }
    if let Some(reason) = statuses.iter().find_map(|status| status.degraded.as_deref()) {
        println!("Local store is degraded and read-only: {reason}");
    }
    for status in &statuses {
        println!("{}", format_status_line(status));
    }
    Ok(())
}

pub fn format_report_lines(report: &SyncReport) -> Vec<String> {
    report
        .entities
        .iter()
        .map(|(entity, entity_report)| {
            if entity_report.skipped {
                let reason = entity_report.error.as_deref().unwrap_or("backing off");
                return format!("{:<14} skipped ({reason})", entity.as_str());
            }
            let mut line = format!(
                "{:<14} pushed={} pulled={} retrying={} dead_lettered={} deferred={}",
                entity.as_str(),
                entity_report.pushed,
                entity_report.pulled,
                entity_report.rescheduled,
                entity_report.dead_lettered,
                entity_report.deferred,
            );
            if let Some(error) = &entity_report.error {
                line.push_str("  error: ");
                line.push_str(error);
            }
            line
        })
        .collect()
}

fn describe_event(event: &SyncEvent) -> Option<String> {
    match event {
        SyncEvent::CycleFinished { trigger, report } => Some(format!(
            "Cycle ({trigger:?}) finished: pushed {}, pulled {}",
            report.total_pushed(),
            report.total_pulled()
        )),
        SyncEvent::AuthenticationRequired { entity, message } => Some(format!(
            "Backend refused credentials while syncing {entity}: {message}"
        )),
        SyncEvent::StorageFault { message } => Some(format!("Local storage fault: {message}")),
        SyncEvent::ConnectivityChanged { online } => Some(if *online {
            "Back online".to_string()
        } else {
            "Offline; changes are queued".to_string()
        }),
        SyncEvent::PhaseChanged { .. } => None,
    }
}
