use std::path::PathBuf;

/// The Hookline relay.
#[derive(clap::Parser)]
pub struct CliOpts {
    /// The command to run.
    #[clap(subcommand)]
    pub action: CliAction,
}

/// The command to run.
#[derive(clap::Subcommand)]
pub enum CliAction {
    /// Command to relay a recorded payload session and dump its events.
    Replay {
        /// Relay configuration (KDL format).
        ///
        /// If it ends with `.kdl`, it is treated as a path to a configuration
        /// file for the relay. Otherwise it is directly parsed as inline
        /// KDL-formatted configuration.
        #[clap(short, long, value_name = "CONTENT/PATH", default_value = "")]
        config: String,

        /// Path to the optional destination of the event dump.
        #[clap(short, long, value_name = "PATH")]
        output: Option<PathBuf>,

        /// How the recorded target is reached.
        #[clap(flatten)]
        target: CliTarget,

        /// Path to a user script evaluated once the payload is loaded.
        #[clap(short, long, value_name = "PATH")]
        script: Option<PathBuf>,

        /// Path to the recorded payload session.
        recording: PathBuf,
    },

    /// Command to validate a relay configuration and dump its effective
    /// values.
    CheckConfig {
        /// Relay configuration (KDL format), inline or as a `.kdl` path.
        #[clap(short, long, value_name = "CONTENT/PATH")]
        config: String,
    },
}

/// Target of a replayed session.
#[derive(clap::Args)]
#[group(multiple = false)]
pub struct CliTarget {
    /// Attach to a process, given its ID or name.
    #[clap(short, long, value_name = "PID/NAME")]
    pub attach: Option<String>,

    /// Spawn the given package.
    #[clap(long, value_name = "PACKAGE")]
    pub spawn: Option<String>,
}

impl CliOpts {
    /// Parses the CLI from the command-line.
    ///
    /// # Warning
    ///
    /// Exits on error.
    pub fn parse_from_cmdline() -> Self {
        <Self as clap::Parser>::parse()
    }
}
