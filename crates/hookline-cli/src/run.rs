use std::io::Write;
use std::path::{Path, PathBuf};

use hookline_relay::Relay;
use hookline_relay::handler::Event;
use hookline_relay::session::{Target, UserScript};
use hookline_relay::ui::UiHooks;
use hookline_replay::{Recording, ReplayDevice};
use miette::IntoDiagnostic;
use tokio::sync::mpsc;

use crate::RelayConfig;
use crate::cli::CliTarget;
use crate::dump;

/// Process ID of the replayed target, when none is given.
pub const REPLAY_PID: u32 = 1;

/// Runs the subcommand for relaying a recorded payload session.
pub fn evaluate_replay(
    config: &str,
    target: CliTarget,
    script: Option<PathBuf>,
    recording: &Path,
    output: impl Write,
) -> miette::Result<()> {
    let config = RelayConfig::from_cli_arg(config)?;

    let recording = Recording::from_path(recording).into_diagnostic()?;

    let mut device = ReplayDevice::new().with_recording(recording);

    for reply in &config.replies {
        device = device.with_reply(reply.api.clone(), reply.value().into_diagnostic()?);
    }

    let attach_target = target
        .attach
        .as_deref()
        .map(str::parse::<Target>)
        .transpose()
        .into_diagnostic()?;

    if let Some(Target::Name(name)) = &attach_target {
        device = device.with_process(name.clone(), REPLAY_PID);
    }

    let options = config.relay_options();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .into_diagnostic()?;

    let events = runtime.block_on(async move {
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut relay = Relay::builder()
            .with_device(device)
            .with_event_handler(tx)
            .with_ui(TracingUi)
            .with_options(options)
            .build();

        let script = script.map(UserScript::Path);

        let status = match (target.spawn, attach_target) {
            (Some(package), _) => relay.spawn(&package, script).await,
            (None, Some(target)) => relay.attach(target, script).await,
            (None, None) => relay.attach(Target::Pid(REPLAY_PID), script).await,
        }
        .into_diagnostic()?;

        tracing::info!(?status, pid = relay.pid(), "payload injected");

        let count = relay.pump_pending().await;
        tracing::debug!(count, "recorded notifications relayed");

        if relay.is_attached() {
            relay.detach().await;
        }

        drop(relay);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }

        Ok::<Vec<Event>, miette::Report>(events)
    })?;

    dump::write_events(&events, config.pointer_size, output)
}

/// Runs the subcommand for validating a relay configuration.
pub fn evaluate_check_config(config: &str, output: impl Write) -> miette::Result<()> {
    let config = RelayConfig::from_cli_arg(config)?;

    dump::write_kdl(config.to_kdl(), output)
}

/// UI capabilities of the command line: everything goes to the logs.
struct TracingUi;

impl UiHooks for TracingUi {
    fn enable_kernel(&mut self) {
        tracing::info!("kernel features available");
    }

    fn append_ftrace(&mut self, line: &str) {
        tracing::info!(target: "ftrace", "{line}");
    }

    fn java_available(&mut self) {
        tracing::info!("java runtime available");
    }

    fn show_error(&mut self, message: &str) {
        tracing::error!("{message}");
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::{evaluate_check_config, evaluate_replay};
    use crate::cli::CliTarget;

    #[test]
    fn replay_recording() {
        let dir = tempfile::tempdir().expect("tempdir");

        let core = dir.path().join("core.js");
        std::fs::write(&core, "rpc.exports = {};").expect("write core script");

        let recording = dir.path().join("session.rec");
        let mut file = std::fs::File::create(&recording).expect("create recording");
        file.write_all(
            indoc::indoc! {r#"
                set_context:::{"reason":-1,"tid":1,"arch":"x64","platform":"linux","pointerSize":8,"java":false}
                hook_native_callback:::0x1000:::90:::::::::false
                log:::hello
            "#}
            .as_bytes(),
        )
        .expect("write recording");

        let config = format!(r#"core-script "{}""#, core.display());
        let target = CliTarget {
            attach: None,
            spawn: None,
        };

        let mut output = Vec::new();
        evaluate_replay(&config, target, None, &recording, &mut output).expect("replay");

        let output = String::from_utf8(output).expect("utf-8 output");
        let names: Vec<&str> = output
            .lines()
            .filter_map(|line| line.split_whitespace().next())
            .collect();

        assert_eq!(
            names,
            vec![
                "process-attached",
                "script-loaded",
                "log-event",
                "apply-context",
                "add-native-hook",
                "log",
                "process-detached",
            ]
        );
        assert!(output.contains("injected into := 1"));
        assert!(output.contains("0x0000000000001000"));
    }

    #[test]
    fn replay_with_pointer_size() {
        let dir = tempfile::tempdir().expect("tempdir");

        let core = dir.path().join("core.js");
        std::fs::write(&core, "rpc.exports = {};").expect("write core script");

        let recording = dir.path().join("session.rec");
        std::fs::write(&recording, "hook_native_callback:::0x1000:::90:::::::::false\n")
            .expect("write recording");

        let config = format!(
            r#"core-script "{}"
            pointer-size 4"#,
            core.display()
        );
        let target = CliTarget {
            attach: Some("1".to_owned()),
            spawn: None,
        };

        let mut output = Vec::new();
        evaluate_replay(&config, target, None, &recording, &mut output).expect("replay");

        let output = String::from_utf8(output).expect("utf-8 output");
        assert!(output.contains("0x00001000"));
        assert!(!output.contains("0x0000000000001000"));
    }

    #[test]
    fn replay_missing_core_script() {
        let dir = tempfile::tempdir().expect("tempdir");

        let recording = dir.path().join("session.rec");
        std::fs::write(&recording, "log:::hello\n").expect("write recording");

        let target = CliTarget {
            attach: Some("1234".to_owned()),
            spawn: None,
        };

        let res = evaluate_replay(
            r#"core-script "/nonexistent/core.js""#,
            target,
            None,
            &recording,
            std::io::sink(),
        );
        assert!(res.is_err());
    }

    #[test]
    fn check_config() {
        let mut output = Vec::new();
        evaluate_check_config("break-start", &mut output).expect("check config");

        let output = String::from_utf8(output).expect("utf-8 output");
        assert!(output.contains("core-script"));
        assert!(output.contains("break-start"));
        assert!(output.contains("pointer-size 8"));
    }
}
