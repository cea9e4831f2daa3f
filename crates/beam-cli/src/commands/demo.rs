use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use beam_config::BeamConfig;
use beam_core::{Event, MotionSample};
use beam_mesh::sim::{SimMesh, SimRadio};
use beam_mesh::{ConnectionManager, ManagerHandle};
use beam_motion::{MotionSlot, ScriptedMotionSource};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub(super) struct DemoOptions {
    pub bump_at_ms: u64,
    pub run_secs: u64,
    pub rssi: i16,
}

struct SimDevice {
    name: &'static str,
    handle: ManagerHandle,
    task: JoinHandle<beam_core::Result<()>>,
}

/// Two simulated devices discover each other, negotiate a radio link and
/// bump at the same moment.
pub(super) async fn cmd_demo(config: BeamConfig, opts: DemoOptions) -> beam_core::Result<()> {
    println!("📡 Beam v{} demo", env!("CARGO_PKG_VERSION"));
    println!(
        "   Service: {}   Bump at: {} ms   RSSI: {} dBm",
        config.mesh.service_id, opts.bump_at_ms, opts.rssi
    );
    println!();

    let mesh = SimMesh::new();
    let radio = SimRadio::new();
    radio.set_rssi("alpha-radio", "bravo-radio", opts.rssi);
    radio.set_rssi("bravo-radio", "alpha-radio", opts.rssi);

    let period = config.telemetry.period();
    let rest_ticks = (opts.bump_at_ms / config.telemetry.period_ms.max(1)) as usize;
    let cancel = CancellationToken::new();

    let (tx, mut rx) = mpsc::unbounded_channel::<(&'static str, Event)>();
    let mut devices = Vec::new();
    for (name, jolt) in [
        ("alpha", MotionSample::new(0.8, 0.7, 0.1)),
        ("bravo", MotionSample::new(0.75, 0.8, 0.0)),
    ] {
        let mut device_config = config.clone();
        device_config.mesh.display_name = format!("Beam {name}");

        let (transport, mesh_events) = mesh.join(name);
        let motion = MotionSlot::new();
        ScriptedMotionSource::bump(period, rest_ticks, 5, jolt).spawn(motion.clone(), cancel.clone());

        let manager = ConnectionManager::new(
            Arc::new(transport),
            Arc::new(radio.transport(format!("{name}-radio"))),
            device_config,
            motion,
        );
        let handle = manager.handle();
        forward_events(name, handle.subscribe(), tx.clone());
        let task = tokio::spawn(manager.run(mesh_events));
        devices.push(SimDevice { name, handle, task });
    }
    drop(tx);

    let deadline = tokio::time::sleep(Duration::from_secs(opts.run_secs));
    tokio::pin!(deadline);
    let mut bumped = HashSet::new();

    loop {
        tokio::select! {
            _ = &mut deadline => {
                println!();
                println!("⏱️  No bump within {} s", opts.run_secs);
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                println!();
                println!("Interrupted");
                break;
            }
            Some((name, event)) = rx.recv() => {
                println!("  [{name}] {}", event.status_line());
                if matches!(event, Event::GestureMatched { .. }) {
                    bumped.insert(name);
                    if bumped.len() == devices.len() {
                        println!();
                        println!("✅ Both devices felt the bump");
                        break;
                    }
                }
            }
        }
    }

    cancel.cancel();
    for device in devices {
        device.handle.shutdown();
        match device.task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(device = device.name, error = %e, "manager failed"),
            Err(e) => warn!(device = device.name, error = %e, "manager task panicked"),
        }
    }
    Ok(())
}

fn forward_events(
    name: &'static str,
    mut events: broadcast::Receiver<Event>,
    tx: mpsc::UnboundedSender<(&'static str, Event)>,
) {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(Event::Shutdown) | Err(broadcast::error::RecvError::Closed) => break,
                Ok(event) => {
                    if tx.send((name, event)).is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(device = name, skipped = n, "event display fell behind");
                }
            }
        }
    });
}
