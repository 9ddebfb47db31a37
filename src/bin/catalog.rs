//! Inspect a calibrated grip catalog.
//!
//! Usage:
//!   cargo run --bin catalog -- list --catalog grips.json
//!   cargo run --bin catalog -- match --left=-0.25,0,0.35 --right=0.25,0,0.35 --vehicle=0,0,0.5

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use env_logger::Env;
use std::path::PathBuf;

use wand_flight::config::RigProfile;
use wand_flight::gesture::{Catalog, GestureCalibrator};
use wand_flight::types::PoseSample;

#[derive(Parser, Debug)]
#[command(name = "catalog")]
#[command(about = "List calibrated grips or test a pose triple against them", long_about = None)]
struct Args {
    /// Calibrated grip catalog (JSON)
    #[arg(long, default_value = "grips.json", global = true)]
    catalog: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print every entry in load order
    List,
    /// Find the nearest grip for the given hand and vehicle positions
    Match {
        /// Left wand position "x,y,z"
        #[arg(long, allow_hyphen_values = true)]
        left: String,
        /// Right wand position "x,y,z"
        #[arg(long, allow_hyphen_values = true)]
        right: String,
        /// Vehicle position "x,y,z"
        #[arg(long, allow_hyphen_values = true)]
        vehicle: String,
        /// Per-hand match distance (m); defaults to the profile's match leeway
        #[arg(long)]
        leeway: Option<f64>,
        /// Rig profile (JSON)
        #[arg(long)]
        profile: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let catalog = Catalog::load(&args.catalog);

    match args.command {
        Command::List => {
            println!("{} grip(s) in {}", catalog.len(), args.catalog.display());
            for entry in catalog.entries() {
                println!(
                    "  {:<28} L [{:>7.3} {:>7.3} {:>7.3}]  R [{:>7.3} {:>7.3} {:>7.3}]",
                    entry.name,
                    entry.left[0],
                    entry.left[1],
                    entry.left[2],
                    entry.right[0],
                    entry.right[1],
                    entry.right[2],
                );
            }
        }
        Command::Match { left, right, vehicle, leeway, profile } => {
            let profile = match profile {
                Some(path) => RigProfile::load(&path)?,
                None => RigProfile::default(),
            };
            let leeway = leeway.unwrap_or(profile.match_leeway);
            let left = parse_position(&left).context("--left")?;
            let right = parse_position(&right).context("--right")?;
            let vehicle = parse_position(&vehicle).context("--vehicle")?;

            let calibrator = GestureCalibrator::new(catalog, &profile);
            match calibrator.match_grip(&left, &right, &vehicle, leeway) {
                Some(grip) => {
                    let (err_l, err_r) = grip.hand_errors(&left, &right, &vehicle);
                    println!("{} (left {:.3} m, right {:.3} m)", grip.name, err_l, err_r);
                }
                None => println!("no grip within {:.3} m", leeway),
            }
        }
    }

    Ok(())
}

fn parse_position(text: &str) -> Result<PoseSample> {
    let values = text
        .split(',')
        .map(|v| v.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("bad position {:?}", text))?;
    if values.len() != 3 {
        bail!("expected x,y,z, got {} value(s)", values.len());
    }
    Ok(PoseSample::at(values[0], values[1], values[2]))
}
