use std::{path::PathBuf, time::Duration};

use clap::Parser;
use log::info;
use nearme_logic::TrackerSettings;
use nearme_sim::{Scenario, prelude::*, run_scenario};

#[derive(Parser)]
/// Drive the distance tracker through a scripted scenario and log everything it draws
struct Cli {
    /// Scenario file to run, runs a built in demo if not given
    scenario: Option<PathBuf>,

    /// Milliseconds to wait between steps
    #[arg(long, default_value_t = 200)]
    step_delay_ms: u64,

    /// Padding around the two markers when fitting the camera
    #[arg(long)]
    camera_padding: Option<u32>,

    /// Print the final tracker state as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result {
    colog::init();

    let cli = Cli::parse();

    let scenario = match &cli.scenario {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            Scenario::from_json(&raw)?
        }
        None => Scenario::demo(),
    };

    let mut settings = TrackerSettings::default();
    if let Some(padding) = cli.camera_padding {
        settings.camera_padding = padding;
    }

    info!("Running {} steps", scenario.steps.len());

    let report = run_scenario(scenario, settings, Duration::from_millis(cli.step_delay_ms)).await?;

    if cli.json {
        let out = serde_json::to_string_pretty(&report).context("Failed to serialize report")?;
        println!("{out}");
    } else {
        println!("Frames drawn: {}", report.frames);
        println!("Final status: {}", report.final_state.status);
        if let Some(dist) = report.final_distance() {
            println!("Final distance: {dist:.2} km");
        }
    }

    Ok(())
}
