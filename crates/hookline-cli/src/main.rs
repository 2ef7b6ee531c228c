#![allow(missing_docs)]
#![allow(clippy::print_stderr)]

use std::fs::File;
use std::path::PathBuf;

use miette::IntoDiagnostic;

use hookline_cli::{CliAction, CliOpts, CliTarget};

use tracing_subscriber::EnvFilter;

fn main() {
    let cli = CliOpts::parse_from_cmdline();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::builder()
                .with_env_var("HOOKLINE_LOG")
                .from_env_lossy(),
        )
        .init();

    let res = match cli.action {
        CliAction::Replay {
            config,
            output,
            target,
            script,
            recording,
        } => evaluate_replay(config, output, target, script, recording),
        CliAction::CheckConfig { config } => {
            hookline_cli::evaluate_check_config(&config, std::io::stdout())
        }
    };

    if let Err(e) = res {
        eprintln!("{e:?}");
        std::process::exit(1);
    }
}

fn evaluate_replay(
    config: String,
    output: Option<PathBuf>,
    target: CliTarget,
    script: Option<PathBuf>,
    recording: PathBuf,
) -> miette::Result<()> {
    if let Some(output) = output {
        let file = File::create(output).into_diagnostic()?;
        hookline_cli::evaluate_replay(&config, target, script, &recording, file)
    } else {
        hookline_cli::evaluate_replay(&config, target, script, &recording, std::io::stdout())
    }
}
