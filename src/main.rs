use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use env_logger::Env;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, Duration};

use wand_flight::config::RigProfile;
use wand_flight::control_loop::{ControlLoop, LoopStats};
use wand_flight::controller::{ControllerStatus, FlightModeController, OperatorCommand};
use wand_flight::dashboard;
use wand_flight::dispatcher::SetpointDispatcher;
use wand_flight::gesture::{Catalog, GestureCalibrator};
use wand_flight::live_status::LiveStatus;
use wand_flight::pose_table::PoseTable;
use wand_flight::sim::{self, SimConfig, SimVehicle, WandScript};
use wand_flight::types::{point, BodyId};

#[derive(Parser, Debug)]
#[command(name = "wand_flight")]
#[command(about = "Wand-gesture flight control against a simulated rig", long_about = None)]
struct Args {
    /// Duration in seconds (0 = continuous)
    #[arg(value_name = "SECONDS", default_value = "30")]
    duration: u64,

    /// Rig profile (JSON); defaults apply when omitted
    #[arg(long)]
    profile: Option<PathBuf>,

    /// Calibrated grip catalog (JSON)
    #[arg(long, default_value = "grips.json")]
    catalog: PathBuf,

    /// Status server port (0 = disabled)
    #[arg(long, default_value = "8080")]
    port: u16,

    /// Send Lift this many seconds in
    #[arg(long, default_value = "1")]
    lift_at: u64,

    /// Send Land this many seconds in (0 = four seconds before the end)
    #[arg(long, default_value = "0")]
    land_at: u64,

    /// Battery reports low power after this many seconds
    #[arg(long)]
    low_power_after: Option<u64>,

    /// Output directory
    #[arg(long, default_value = "wand_flight_sessions")]
    output_dir: PathBuf,
}

#[derive(Serialize)]
struct SessionSummary {
    profile: String,
    catalog: PathBuf,
    uptime_seconds: u64,
    stats: LoopStats,
    final_status: ControllerStatus,
    vehicle_setpoints: u64,
    vehicle_stops: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    println!("[{}] Wand Flight Starting", ts_now());
    println!("  Duration: {} seconds (0=continuous)", args.duration);
    println!("  Catalog: {}", args.catalog.display());
    println!("  Output Dir: {}", args.output_dir.display());

    std::fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("creating {}", args.output_dir.display()))?;

    let profile = match &args.profile {
        Some(path) => RigProfile::load(path)?,
        None => RigProfile::default(),
    };
    log::info!("Rig profile: {}", profile.name);

    // Simulated rig: vehicle on the pad at the origin
    let vehicle = SimVehicle::new(point(0.0, 0.0, 0.0));
    let hover_point = point(0.0, 0.0, profile.lift_height);
    let sim_cfg = SimConfig::default();

    let calibrator = GestureCalibrator::new(Catalog::load(&args.catalog), &profile);
    let dispatcher = SetpointDispatcher::new(
        Some(Box::new(vehicle.clone())),
        profile.floor_height,
        profile.envelope.clone(),
    );
    let controller = FlightModeController::new(profile.clone(), calibrator, dispatcher);

    let poses = Arc::new(PoseTable::new());
    let flying_enabled = Arc::new(AtomicBool::new(true));
    let (cmd_tx, cmd_rx) = mpsc::channel::<OperatorCommand>(16);
    let (battery_tx, battery_rx) = watch::channel(None);
    let (status_tx, status_rx) = watch::channel(controller.status());

    // Producers (hold handles to keep tasks alive)
    let producers = vec![
        tokio::spawn(sim::vehicle_loop(vehicle.clone(), poses.clone(), sim_cfg.clone(), flying_enabled.clone())),
        tokio::spawn(sim::wand_loop(
            BodyId::LeftWand,
            WandScript::left(hover_point),
            poses.clone(),
            sim_cfg.clone(),
            flying_enabled.clone(),
        )),
        tokio::spawn(sim::wand_loop(
            BodyId::RightWand,
            WandScript::right(hover_point),
            poses.clone(),
            sim_cfg.clone(),
            flying_enabled.clone(),
        )),
        tokio::spawn(sim::battery_loop(
            battery_tx,
            args.low_power_after.map(Duration::from_secs),
            flying_enabled.clone(),
        )),
    ];

    if args.port > 0 {
        let feed = status_rx.clone();
        let port = args.port;
        tokio::spawn(async move {
            if let Err(e) = dashboard::start_dashboard(feed, port).await {
                log::error!("Status server stopped: {}", e);
            }
        });
    }

    let control = ControlLoop::new(controller, poses.clone(), cmd_rx, battery_rx, status_tx, flying_enabled.clone());
    let control_handle = tokio::spawn(control.run());

    let land_at = match (args.land_at, args.duration) {
        (0, d) if d > args.lift_at + 4 => Some(d - 4),
        (0, _) => None,
        (t, _) => Some(t),
    };
    let mut script = vec![(args.lift_at, OperatorCommand::Lift)];
    if let Some(t) = land_at {
        script.push((t, OperatorCommand::Land));
    }

    let start = Utc::now();
    let mut last_status_update = Utc::now();
    let status_path = args.output_dir.join("live_status.json");

    println!("[{}] Control loop started", ts_now());

    loop {
        let now = Utc::now();
        let elapsed = now.signed_duration_since(start).num_seconds().max(0) as u64;

        if args.duration > 0 && elapsed >= args.duration {
            println!("[{}] Duration reached, stopping...", ts_now());
            break;
        }

        while let Some(&(at, command)) = script.first() {
            if elapsed < at {
                break;
            }
            script.remove(0);
            println!("[{}] Operator: {:?}", ts_now(), command);
            if cmd_tx.send(command).await.is_err() {
                log::warn!("Control loop gone, dropping {:?}", command);
            }
        }

        // Update live status every 2 seconds
        if now.signed_duration_since(last_status_update).num_seconds() >= 2 {
            save_live_status(&status_rx.borrow(), &poses, elapsed, &status_path);
            last_status_update = now;
        }

        sleep(Duration::from_millis(50)).await;
    }

    flying_enabled.store(false, Ordering::Relaxed);
    let (controller, stats) = control_handle.await?;
    for handle in producers {
        handle.await?;
    }

    let uptime = Utc::now().signed_duration_since(start).num_seconds().max(0) as u64;
    let final_status = controller.status();
    save_live_status(&final_status, &poses, uptime, &args.output_dir.join("live_status_final.json"));

    let summary = SessionSummary {
        profile: profile.name.clone(),
        catalog: args.catalog.clone(),
        uptime_seconds: uptime,
        stats: stats.clone(),
        final_status: final_status.clone(),
        vehicle_setpoints: vehicle.setpoints_received(),
        vehicle_stops: vehicle.stops_received(),
    };
    let filename = args.output_dir.join(format!("session_{}.json", ts_now_clean()));
    let json = serde_json::to_string_pretty(&summary)?;
    std::fs::write(&filename, json)?;
    println!("[{}] Session summary written to {}", ts_now(), filename.display());

    // Print stats
    println!("\n=== Final Stats ===");
    println!("Ticks: {}", stats.ticks);
    println!("Mode changes: {}", stats.mode_changes);
    println!("Safety trips: {}", stats.safety_trips);
    println!("Grips learned / matched / lost: {} / {} / {}", stats.grips_learned, stats.grips_matched, stats.grips_lost);
    println!("Catalog entries: {}", final_status.catalog_size);
    println!("Setpoints sent: {} (stops: {})", final_status.setpoints_sent, final_status.stops_sent);
    println!("Final mode: {:?}", final_status.mode);
    if let Some(reason) = &final_status.reason {
        println!("Last reason: {}", reason);
    }

    Ok(())
}

fn save_live_status(status: &ControllerStatus, poses: &PoseTable, uptime: u64, path: &Path) {
    let live = LiveStatus::new(status, &poses.snapshot(), uptime);
    if let Err(e) = live.save(path) {
        log::warn!("Live status not written: {}", e);
    }
}

fn ts_now() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}

fn ts_now_clean() -> String {
    Utc::now().format("%Y%m%d_%H%M%S").to_string()
}
