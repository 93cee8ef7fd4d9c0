use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;

use middleman::coupler;
use middleman::engine::{CouplerConfig, PipelineSelection, PollConfig, RegistrySync, TallyConfig};

/// Middleman - step-synchronized diagnostics coupler
#[derive(Parser, Debug)]
#[command(name = "middleman", version, about)]
struct Cli {
    /// Directory holding the producer's step files
    #[arg(long, value_name = "DIR", default_value = ".")]
    data_dir: PathBuf,

    /// Directory for reduced output and mirrors
    #[arg(long, value_name = "DIR", default_value = ".")]
    output_dir: PathBuf,

    /// Workers per pipeline (default: half the available cores)
    #[arg(long)]
    workers: Option<usize>,

    /// Pipelines to run (diffusion, heatload or both)
    #[arg(long, default_value_t = PipelineSelection::Both)]
    pipeline: PipelineSelection,

    /// First sleep, in milliseconds, while the producer is behind
    #[arg(long, default_value_t = 10)]
    poll_ms: u64,

    /// Escaped-registry visibility (broadcast or root-only)
    #[arg(long, default_value_t = RegistrySync::Broadcast)]
    registry_sync: RegistrySync,

    /// Seconds any single collective may wait for a peer
    #[arg(long, default_value_t = 300)]
    comm_timeout_secs: u64,

    /// Heatload tally bins over [psi-min, psi-max)
    #[arg(long, default_value_t = 256)]
    tally_cells: usize,

    /// Lower edge of the heatload tally
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    psi_min: f64,

    /// Upper edge of the heatload tally
    #[arg(long, default_value_t = 1.0, allow_negative_numbers = true)]
    psi_max: f64,
}

impl Cli {
    fn into_config(self) -> CouplerConfig {
        let defaults = PollConfig::default();
        let initial = Duration::from_millis(self.poll_ms);
        CouplerConfig {
            data_dir: self.data_dir,
            output_dir: self.output_dir,
            pipelines: self.pipeline,
            worker_count: self.workers,
            poll: PollConfig {
                initial,
                max: defaults.max.max(initial),
                growth: defaults.growth,
            },
            comm_timeout: Duration::from_secs(self.comm_timeout_secs),
            registry_sync: self.registry_sync,
            tally: TallyConfig {
                cells: self.tally_cells,
                psi_min: self.psi_min,
                psi_max: self.psi_max,
            },
            ..Default::default()
        }
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    match coupler::run(&cli.into_config()) {
        Ok(report) => {
            for (name, summary) in [("diffusion", &report.diffusion), ("heatload", &report.heatload)] {
                if let Some(s) = summary {
                    log::info!("{name}: {} steps in {:?}", s.steps, s.elapsed);
                }
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("{e}");
            ExitCode::from(1)
        }
    }
}
