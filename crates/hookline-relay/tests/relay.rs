// Once clippy takes `clippy.toml` into account (for `tests` targets),
// we can remove these.
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]
#![allow(clippy::print_stdout)]
#![allow(clippy::unwrap_used)]
#![allow(missing_docs)]

mod common;

use std::sync::{Arc, Mutex};

use hookline_relay::engine::{ApiValue, ChannelEvent, EngineError, InitFlags};
use hookline_relay::handler::{DataPayload, Event};
use hookline_relay::hook::{BreakLogic, HookArgs};
use hookline_relay::plugin::{Plugin, PluginError, StaticRegistrar};
use hookline_relay::range::{AddressRange, RangeStatus};
use hookline_relay::session::{SessionState, Target, UserScript};
use hookline_relay::{Error, READ_CHUNK_SIZE, Relay, ScriptStatus};
use hookline_replay::{Command, Operation, ReplayDevice};
use serde_json::json;
use test_log::test;

use self::common::{Harness, INITIAL_CONTEXT, PID, RecordedUi, core_script, hook_context};

fn native_ack(ptr: &str, bytes: &str) -> String {
    ["hook_native_callback", ptr, bytes, "", "", "false"].join(":::")
}

#[test(tokio::test)]
async fn attach_and_handshake() {
    let mut harness = Harness::new(ReplayDevice::new());

    let status = harness
        .relay
        .attach(Target::Pid(PID), None)
        .await
        .expect("attach");
    assert_eq!(status, ScriptStatus::Loaded);

    assert_eq!(
        harness.drain(),
        vec![
            Event::ProcessAttached {
                pid: PID,
                label: PID.to_string(),
            },
            Event::ScriptLoaded,
        ]
    );
    assert_eq!(harness.device.inits(), vec![InitFlags::default()]);

    harness.feed(INITIAL_CONTEXT).await;

    let events = harness.drain();
    assert_eq!(
        events[0],
        Event::LogEvent(format!("injected into := {PID}"))
    );
    assert!(matches!(events[1], Event::ContextApplied(_)));

    assert_eq!(harness.relay.arch(), "arm64");
    assert_eq!(harness.relay.platform(), "linux");
    assert_eq!(harness.relay.pointer_size(), 8);
    assert!(harness.relay.java_available());
    assert_eq!(harness.relay.context_tid(), 0);
    assert!(harness.relay.contexts().is_empty());
    assert_eq!(harness.ui.calls(), vec!["java_available".to_owned()]);
}

#[test(tokio::test)]
async fn attach_by_name() {
    let mut harness = Harness::new(ReplayDevice::new().with_process("app", 77));

    harness
        .relay
        .attach("app".parse().expect("target"), None)
        .await
        .expect("attach");

    assert_eq!(harness.relay.pid(), 77);
    assert_eq!(
        harness.drain()[0],
        Event::ProcessAttached {
            pid: 77,
            label: "app".to_owned(),
        }
    );

    let err = harness
        .relay
        .attach(Target::Name("missing".to_owned()), None)
        .await
        .expect_err("unknown process");
    assert_eq!(
        err.to_string(),
        "Frida Error: Process not found (ProcessNotFoundError)"
    );
}

#[test(tokio::test)]
async fn attach_preconditions() {
    let mut relay = Relay::<ReplayDevice>::builder().without_device().build();

    let err = relay
        .attach(Target::Pid(PID), None)
        .await
        .expect_err("no device");
    assert!(matches!(err, Error::NoDeviceAssigned));
    assert_eq!(err.to_string(), "No Device assigned");

    let mut relay = Relay::builder()
        .with_device(ReplayDevice::new())
        .core_script("/nonexistent/hookline/core.js")
        .build();

    let err = relay
        .attach(Target::Pid(PID), None)
        .await
        .expect_err("no core script");
    assert!(matches!(err, Error::CoreScriptNotFound(_)));
}

#[test(tokio::test)]
async fn load_failure_is_reported() {
    let mut harness = Harness::new(
        ReplayDevice::new().with_failure(Operation::Load, EngineError::ProcessNotResponding),
    );

    let status = harness
        .relay
        .attach(Target::Pid(PID), None)
        .await
        .expect("attach");

    assert_eq!(status, ScriptStatus::Failed);
    assert_eq!(status.code(), 1);
    assert!(harness.relay.is_attached());
    assert!(!harness.relay.has_script());
    assert_eq!(
        harness.ui.calls(),
        vec!["error Process not responding (ProcessNotRespondingError)".to_owned()]
    );
    assert!(!harness.drain().contains(&Event::ScriptLoaded));

    // without a payload, nothing reaches the target
    assert_eq!(harness.relay.dwarf_api("readBytes", vec![], 0).await, None);
    assert!(harness.device.calls().is_empty());
}

#[test(tokio::test)]
async fn contexts_are_removed_by_release_only() {
    let mut harness = Harness::attached(ReplayDevice::new()).await;

    harness.feed(&hook_context(42, "0x1000")).await;
    harness.feed(&hook_context(43, "0x2000")).await;

    assert_eq!(harness.relay.contexts().thread_ids(), vec![42, 43]);
    assert_eq!(harness.relay.context_tid(), 42);
    assert_eq!(
        harness.relay.current_context().and_then(|c| c.pc()),
        Some(0x1000)
    );
    assert_eq!(
        harness.log_events(),
        vec![
            "hook 0x1000 libc.so - open @thread := 42".to_owned(),
            "hook 0x2000 libc.so - open @thread := 43".to_owned(),
        ]
    );

    // a broadcast release only asks the payload
    assert_eq!(harness.relay.dwarf_api("release", vec![], 0).await, None);
    assert_eq!(harness.relay.contexts().len(), 2);

    harness.feed("release:::42").await;

    assert!(!harness.relay.contexts().contains(42));
    assert!(harness.relay.contexts().contains(43));
    assert_eq!(
        harness.drain(),
        vec![
            Event::LogEvent("releasing := 42".to_owned()),
            Event::ThreadResumed(42),
        ]
    );

    // non-numeric thread IDs still release, without a resume event
    harness.feed("release:::main").await;
    assert_eq!(
        harness.drain(),
        vec![Event::LogEvent("releasing := main".to_owned())]
    );
}

#[test(tokio::test)]
async fn broadcast_release() {
    let mut harness = Harness::attached(ReplayDevice::new()).await;

    // no context: nothing is sent
    assert_eq!(harness.relay.dwarf_api("release", vec![], 0).await, None);
    assert!(harness.device.commands().is_empty());

    harness.feed(&hook_context(43, "0x2000")).await;
    harness.feed(&hook_context(42, "0x1000")).await;

    assert_eq!(harness.relay.dwarf_api("release", vec![], 0).await, None);

    assert_eq!(
        harness.device.posts(),
        vec![json!({ "type": "42" }), json!({ "type": "43" })]
    );

    let calls = harness.device.calls_to("release");
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].thread_id, 42);
    assert_eq!(calls[0].args, vec![json!(42)]);
    assert_eq!(calls[1].thread_id, 43);
    assert_eq!(calls[1].args, vec![json!(43)]);
}

#[test(tokio::test)]
async fn calls_are_routed_to_the_active_thread() {
    let mut harness =
        Harness::attached(ReplayDevice::new().with_reply("getBacktrace", json!(["0x1000"])))
            .await;

    let value = harness.relay.dwarf_api("getBacktrace", vec![], 0).await;
    assert_eq!(value, Some(ApiValue::Json(json!(["0x1000"]))));
    assert!(harness.device.posts().is_empty());
    assert_eq!(harness.device.calls()[0].thread_id, 0);

    harness.feed(&hook_context(42, "0x1000")).await;
    harness.device.clear_commands();

    harness.relay.dwarf_api("getBacktrace", vec![], 0).await;
    assert_eq!(harness.device.posts(), vec![json!({ "type": "42" })]);
    assert_eq!(harness.device.calls()[0].thread_id, 42);

    // the payload asks for a release through the gateway
    harness.device.clear_commands();
    harness.feed("release_js:::42").await;

    let calls = harness.device.calls_to("release");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].thread_id, 42);
    assert_eq!(calls[0].args, vec![json!(42)]);
}

#[test(tokio::test)]
async fn api_errors_become_log_events() {
    let mut harness = Harness::attached(
        ReplayDevice::new().with_failing_api("evaluatePtr", EngineError::Other("boom".to_owned())),
    )
    .await;

    assert_eq!(harness.relay.dwarf_api("evaluatePtr", vec![], 0).await, None);
    assert_eq!(harness.log_events(), vec!["boom".to_owned()]);

    // a failed evaluation never stages a hook
    assert_eq!(harness.relay.hook_native("open", None).await, None);
    assert!(harness.device.calls_to("hookNative").is_empty());
}

#[test(tokio::test)]
async fn native_hook_acknowledgement() {
    let mut harness =
        Harness::attached(ReplayDevice::new().with_reply("evaluatePtr", json!("0x1000"))).await;

    let args = HookArgs {
        condition: Some("x0 == 1".to_owned()),
        logic: BreakLogic::Script("return 1".to_owned()),
    };

    let token = harness
        .relay
        .hook_native("open", Some(args))
        .await
        .expect("pending hook");

    assert!(harness.relay.hooks().is_pending(token));
    assert!(harness.relay.hooks().native().is_empty());
    assert_eq!(
        harness.device.calls_to("hookNative")[0].args,
        vec![json!("0x1000")]
    );

    harness.feed(&native_ack("0x1000", "90ff")).await;

    assert!(!harness.relay.hooks().is_pending(token));

    let hook = &harness.relay.hooks().native()[&0x1000];
    assert_eq!(hook.input, "open");
    assert_eq!(hook.bytes, vec![0x90, 0xff]);
    assert_eq!(hook.condition.as_deref(), Some("x0 == 1"));
    assert_eq!(hook.logic, BreakLogic::Script("return 1".to_owned()));

    assert!(matches!(
        harness.drain().as_slice(),
        [Event::NativeHookAdded(hook)] if hook.ptr == 0x1000
    ));

    // unsolicited acknowledgements use the address as input
    harness.feed(&native_ack("0x2000", "")).await;
    assert_eq!(harness.relay.hooks().native()[&0x2000].input, "0x2000");

    // internal hooks are never registered
    let internal = ["hook_native_callback", "0x3000", "", "", "", "true"].join(":::");
    harness.feed(&internal).await;
    assert!(!harness.relay.hooks().native().contains_key(&0x3000));
}

#[test(tokio::test)]
async fn rejected_hook_requests_are_dropped() {
    let mut harness =
        Harness::attached(ReplayDevice::new().with_reply("evaluatePtr", json!("0x1000"))).await;

    harness
        .device
        .fail_api("hookNative", EngineError::Other("no such address".to_owned()));
    harness
        .device
        .fail_api("hookJava", EngineError::Other("no such class".to_owned()));

    let args = HookArgs {
        condition: Some("x0 == 1".to_owned()),
        logic: BreakLogic::Always,
    };

    assert_eq!(harness.relay.hook_native("open", Some(args.clone())).await, None);
    assert_eq!(harness.relay.hook_java("com.app.Main", Some(args)).await, None);
    assert_eq!(harness.log_events().len(), 2);

    // late acknowledgements no longer match a staged request
    harness.feed(&native_ack("0x1000", "00")).await;
    harness.feed("hook_java_callback:::com.app.Main").await;

    let native = &harness.relay.hooks().native()[&0x1000];
    assert_eq!(native.input, "0x1000");
    assert_eq!(native.condition, None);
    assert_eq!(harness.relay.hooks().java()["com.app.Main"].condition, None);
}

#[test(tokio::test)]
async fn java_and_on_load_hooks() {
    let mut harness = Harness::attached(ReplayDevice::new()).await;

    let token = harness
        .relay
        .hook_java(" com.app.Main.onCreate ", None)
        .await
        .expect("pending hook");
    assert_eq!(
        harness.device.calls_to("hookJava")[0].args,
        vec![json!("com.app.Main.onCreate")]
    );
    assert_eq!(harness.relay.hook_java("   ", None).await, None);

    harness
        .feed("hook_java_callback:::com.app.Main.onCreate")
        .await;
    assert!(!harness.relay.hooks().is_pending(token));
    assert!(
        harness
            .relay
            .hooks()
            .java()
            .contains_key("com.app.Main.onCreate")
    );

    assert!(harness.relay.hook_native_on_load("libfoo.so").await);
    harness
        .feed("hook_native_on_load_callback:::libfoo.so")
        .await;
    assert!(!harness.relay.hook_native_on_load("libfoo.so").await);
    assert!(!harness.relay.hook_native_on_load("").await);

    assert!(harness.relay.hook_java_on_load("com.app.Loader").await);
    harness
        .feed("hook_java_on_load_callback:::com.app.Loader")
        .await;
    assert!(!harness.relay.hook_java_on_load("com.app.Loader").await);

    let names: Vec<&str> = harness.drain().iter().map(Event::name).collect();
    assert_eq!(
        names,
        vec![
            "add-java-hook",
            "add-native-on-load-hook",
            "add-java-on-load-hook"
        ]
    );
    assert_eq!(harness.device.calls_to("hookNativeOnLoad").len(), 1);
    assert_eq!(harness.device.calls_to("hookJavaOnLoad").len(), 1);
}

#[test(tokio::test)]
async fn hook_deletion() {
    let mut harness = Harness::attached(ReplayDevice::new()).await;

    harness.feed(&native_ack("0x1000", "00")).await;
    harness.drain();

    harness.feed("hook_deleted:::native:::0x1000").await;
    assert!(harness.relay.hooks().native().is_empty());

    // unknown hooks are republished all the same
    harness.feed("hook_deleted:::java:::com.app.Gone").await;

    assert_eq!(
        harness.drain(),
        vec![
            Event::HookDeleted(vec![
                "hook_deleted".to_owned(),
                "native".to_owned(),
                "0x1000".to_owned()
            ]),
            Event::HookDeleted(vec![
                "hook_deleted".to_owned(),
                "java".to_owned(),
                "com.app.Gone".to_owned()
            ]),
        ]
    );
}

#[test(tokio::test)]
async fn watchers() {
    let mut harness = Harness::attached(ReplayDevice::new()).await;

    assert_eq!(harness.relay.add_watcher(0).await, None);
    assert!(harness.device.calls().is_empty());

    harness.relay.add_watcher(0x7fff_0010).await;
    assert_eq!(
        harness.device.calls_to("addWatcher")[0].args,
        vec![json!("0x7fff0010")]
    );

    harness.feed("watcher_added:::0x7FFF0010:::3").await;

    assert!(harness.relay.is_address_watched(0x7fff_0010));
    assert!(harness.relay.hooks().watchers().contains_key("0x7fff0010"));

    harness.feed("watcher_removed:::0x7fff0010").await;
    assert!(!harness.relay.is_address_watched(0x7fff_0010));

    assert_eq!(
        harness.drain(),
        vec![
            Event::WatcherAdded {
                ptr: "0x7fff0010".to_owned(),
                flags: 3,
            },
            Event::WatcherRemoved {
                ptr: "0x7fff0010".to_owned(),
            },
        ]
    );
}

#[test(tokio::test)]
async fn chunked_memory_reads() {
    let mut harness = Harness::attached(
        ReplayDevice::new().with_reply("readBytes", ApiValue::Bytes(vec![0xaa; 4])),
    )
    .await;

    let data = harness
        .relay
        .read_memory(0x1000, READ_CHUNK_SIZE + 1)
        .await
        .expect("read");
    assert_eq!(data, vec![0xaa; 8]);

    let calls = harness.device.calls_to("readBytes");
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].args, vec![json!("0x1000"), json!(READ_CHUNK_SIZE)]);
    assert_eq!(calls[1].args, vec![json!("0x101000"), json!(1)]);

    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("dump.bin");
    assert!(
        harness
            .relay
            .dump_memory(&path, 0x1000, 4)
            .await
            .expect("dump")
    );
    assert_eq!(std::fs::read(&path).expect("read dump"), vec![0xaa; 4]);

    harness.device.fail_api(
        "readBytes",
        EngineError::Other("access violation".to_owned()),
    );
    assert_eq!(harness.relay.read_memory(0x1000, 4).await, None);
    assert!(
        !harness
            .relay
            .dump_memory(&dir.path().join("none.bin"), 0x1000, 4)
            .await
            .expect("dump")
    );
}

#[test(tokio::test)]
async fn memory_scan() {
    let mut harness = Harness::attached(ReplayDevice::new()).await;

    assert!(harness.relay.search(0x1000, 0x100, "41 ?? 43").await);
    assert_eq!(
        harness.device.calls_to("memoryScan")[0].args,
        vec![json!("0x1000"), json!(0x100), json!("41 ?? 43")]
    );

    assert!(!harness.relay.search(0x1000, 0x100, "4").await);
    assert_eq!(harness.device.calls_to("memoryScan").len(), 1);

    let ranges = json!([{ "base": "0x1000", "size": 16 }]);
    assert!(harness.relay.search_list(&ranges, "4142").await);
    assert_eq!(
        harness.device.calls_to("memoryScanList")[0].args,
        vec![json!(ranges.to_string()), json!("41 42")]
    );

    harness.feed("memoryscan_result:::").await;
    harness
        .feed(r#"memoryscan_result:::[{"address":"0x1004","size":3}]"#)
        .await;

    assert_eq!(
        harness.drain(),
        vec![
            Event::MemoryScanResult(vec![]),
            Event::MemoryScanResult(vec![json!({ "address": "0x1004", "size": 3 })]),
        ]
    );
}

#[test(tokio::test)]
async fn malformed_messages_never_mutate() {
    let mut harness = Harness::attached(ReplayDevice::new()).await;

    harness.feed("bogus:::1").await;
    harness.feed("hook_native_callback:::zz").await;
    harness.feed("watcher_added:::0x10").await;
    harness.feed("set_context:::{not json").await;
    harness.feed("untagged").await;

    assert!(harness.drain().is_empty());
    assert!(harness.relay.hooks().native().is_empty());
    assert!(harness.relay.hooks().watchers().is_empty());
    assert!(harness.relay.contexts().is_empty());
}

#[test(tokio::test)]
async fn data_and_misc_messages() {
    let mut harness = Harness::attached(ReplayDevice::new()).await;

    harness.device.send(ChannelEvent::Message {
        message: json!({ "type": "send", "payload": "set_data:::dump" }),
        data: Some(vec![1, 2]),
    });
    harness.relay.pump_pending().await;

    harness.feed("set_data:::notes:::hello").await;
    harness.feed("log:::hello world").await;
    harness.feed("set_context_value:::x0:::0x20").await;
    harness.feed("native_on_load_callback:::libfoo.so:::0x7000:::42").await;
    harness.feed("ftrace:::trace line").await;
    harness.feed("enable_kernel:::").await;

    assert_eq!(
        harness.drain(),
        vec![
            Event::SetData(DataPayload::Raw {
                key: "dump".to_owned(),
                data: vec![1, 2],
            }),
            Event::SetData(DataPayload::Plain {
                key: "notes".to_owned(),
                text: "hello".to_owned(),
            }),
            Event::Log("hello world".to_owned()),
            Event::ContextChanged {
                property: "x0".to_owned(),
                value: "0x20".to_owned(),
            },
            Event::LogEvent("Hook native onload libfoo.so @thread := 42".to_owned()),
            Event::NativeOnLoadHit {
                module: "libfoo.so".to_owned(),
                base: "0x7000".to_owned(),
            },
        ]
    );

    assert_eq!(
        harness.ui.calls(),
        vec![
            "java_available".to_owned(),
            "ftrace trace line".to_owned(),
            "enable_kernel".to_owned(),
        ]
    );
}

#[test(tokio::test)]
async fn reinitialize_keeps_subscribers() {
    let mut harness = Harness::attached(ReplayDevice::new()).await;

    harness.feed(&hook_context(42, "0x1000")).await;
    harness.feed(&native_ack("0x1000", "00")).await;

    harness.relay.reinitialize();

    assert!(!harness.relay.is_attached());
    assert!(harness.relay.contexts().is_empty());
    assert!(harness.relay.hooks().native().is_empty());
    assert_eq!(harness.relay.context_tid(), 0);
    assert_eq!(harness.relay.session(), &SessionState::default());
    assert_eq!(harness.relay.arch(), "");
    assert_eq!(harness.relay.pointer_size(), 0);
    harness.drain();

    let java_notifications = |ui: &RecordedUi| {
        ui.calls()
            .iter()
            .filter(|call| *call == "java_available")
            .count()
    };
    let before = java_notifications(&harness.ui);

    harness
        .relay
        .attach(Target::Pid(PID), None)
        .await
        .expect("attach");
    harness.feed(INITIAL_CONTEXT).await;

    assert_eq!(harness.relay.arch(), "arm64");
    assert_eq!(harness.relay.platform(), "linux");
    assert_eq!(harness.relay.pointer_size(), 8);
    assert!(harness.relay.java_available());
    assert_eq!(java_notifications(&harness.ui), before + 1);

    harness.feed(&hook_context(50, "0x1000")).await;
    assert_eq!(harness.relay.context_tid(), 50);

    let events = harness.drain();
    assert_eq!(
        events[0],
        Event::ProcessAttached {
            pid: PID,
            label: PID.to_string(),
        }
    );
    assert!(events.contains(&Event::LogEvent(format!("injected into := {PID}"))));
}

#[test(tokio::test)]
async fn failed_spawn_attach_kills_the_process() {
    let mut harness = Harness::new(
        ReplayDevice::new().with_failure(Operation::Attach, EngineError::ProcessNotResponding),
    );

    let err = harness
        .relay
        .spawn("com.app", None)
        .await
        .expect_err("attach failure");
    assert!(matches!(err, Error::Engine(_)));
    assert!(!harness.relay.is_attached());

    let commands = harness.device.commands();
    let Some(Command::Attach(pid)) = commands.get(1).cloned() else {
        panic!("unexpected commands: {commands:?}");
    };
    assert_eq!(
        commands,
        vec![
            Command::Spawn("com.app".to_owned()),
            Command::Attach(pid),
            Command::Kill(pid),
        ]
    );
    assert!(harness.drain().is_empty());
}

#[test(tokio::test)]
async fn spawn_resume_and_detach() {
    let mut harness = Harness::new(ReplayDevice::new());

    let status = harness
        .relay
        .spawn("com.app", Some(UserScript::Source("console.log(1)".to_owned())))
        .await
        .expect("spawn");
    assert_eq!(status, ScriptStatus::Loaded);

    let pid = harness.relay.pid();
    assert!(harness.relay.session().spawned);
    assert!(harness.relay.resumed());
    assert_eq!(harness.device.resumed(), vec![pid]);
    assert_eq!(
        harness.device.inits(),
        vec![InitFlags {
            spawned: true,
            ..InitFlags::default()
        }]
    );
    assert_eq!(
        harness.device.calls_to("evaluateFunction")[0].args,
        vec![json!("console.log(1)")]
    );

    // the process is resumed once
    harness.feed("resume:::").await;
    harness.relay.resume_proc().await;
    assert_eq!(harness.device.resumed(), vec![pid]);

    harness.drain();
    harness.device.clear_commands();
    harness.relay.detach().await;

    let commands = harness.device.commands();
    assert!(matches!(&commands[0], Command::Call(call) if call.api == "_detach"));
    assert_eq!(
        &commands[1..],
        &[Command::Unload, Command::Detach(pid), Command::Kill(pid)]
    );

    assert!(!harness.relay.is_attached());
    assert_eq!(harness.relay.pid(), 0);
    assert_eq!(
        harness.drain(),
        vec![Event::ProcessDetached {
            pid,
            reason: "application-requested".to_owned(),
            crash_log: None,
        }]
    );
}

#[test(tokio::test)]
async fn target_notifications() {
    let mut harness = Harness::attached(ReplayDevice::new()).await;

    harness.device.send(ChannelEvent::ScriptDestroyed);
    harness.relay.pump_pending().await;
    assert!(!harness.relay.has_script());
    assert!(harness.relay.is_attached());

    harness.device.send(ChannelEvent::Detached {
        reason: "process-terminated".to_owned(),
        crash_log: Some("SIGSEGV".to_owned()),
    });
    harness.relay.pump_pending().await;

    assert!(!harness.relay.is_attached());
    assert_eq!(
        harness.drain(),
        vec![
            Event::ScriptDestroyed,
            Event::ProcessDetached {
                pid: PID,
                reason: "process-terminated".to_owned(),
                crash_log: Some("SIGSEGV".to_owned()),
            },
        ]
    );

    // nothing left to relay
    assert!(!harness.relay.pump().await);
}

#[test(tokio::test)]
async fn restart_spawned_target() {
    let mut harness = Harness::new(ReplayDevice::new());

    harness
        .relay
        .spawn("com.app", Some(UserScript::Source("hook()".to_owned())))
        .await
        .expect("spawn");
    let first_pid = harness.relay.pid();

    let snapshot = harness.relay.dump_session("local");
    assert_eq!(snapshot.session_type, "local");
    assert_eq!(snapshot.package.as_deref(), Some("com.app"));
    assert_eq!(snapshot.user_script.as_deref(), Some("hook()"));

    let status = harness.relay.restart_proc().await.expect("restart");
    assert_eq!(status, ScriptStatus::Loaded);

    assert_ne!(harness.relay.pid(), first_pid);
    assert_eq!(harness.device.calls_to("evaluateFunction").len(), 2);
    assert!(harness.device.commands().contains(&Command::Kill(first_pid)));

    let mut attached = Harness::attached(ReplayDevice::new()).await;
    assert!(matches!(
        attached.relay.restart_proc().await,
        Err(Error::NothingToRestart)
    ));
}

#[test(tokio::test)]
async fn range_cache() {
    let mut harness = Harness::attached(
        ReplayDevice::new()
            .with_reply("getRange", json!({ "base": "0x1000", "size": "0x10" }))
            .with_reply("readBytes", ApiValue::Bytes(vec![0; 16]))
            .with_hooks(json!({
                "0x1005": { "nativePtr": "0x1005", "bytes": "9090" },
                "0x0": { "nativePtr": "0x0", "bytes": "ffff" },
            })),
    )
    .await;

    let mut range = AddressRange::new();

    let status = range
        .init_with_address(&mut harness.relay, 0x1008, 0, 0, true)
        .await;
    assert_eq!(status, RangeStatus::Populated);
    assert_eq!((range.base, range.size, range.tail), (0x1000, 0x10, 0x1010));
    assert_eq!(range.start_offset, 8);
    assert_eq!(&range.data[4..6], &[0x90, 0x90]);
    assert_eq!(range.data.iter().filter(|b| **b != 0).count(), 2);

    let status = range
        .init_with_address(&mut harness.relay, 0x100c, 0, 0, true)
        .await;
    assert_eq!(status, RangeStatus::Cached);
    assert_eq!(status.code(), -1);
    assert_eq!(range.start_offset, 0xc);
    assert_eq!(harness.device.calls_to("getRange").len(), 1);

    range.invalidate();
    let status = range
        .init_with_address(&mut harness.relay, 0x100c, 0, 0, false)
        .await;
    assert_eq!(status, RangeStatus::Failed);
    assert_eq!(status.code(), 1);
    assert_eq!(harness.device.calls_to("getRange").len(), 2);
    assert!(range.data.is_empty());
    assert_eq!((range.base, range.tail), (0, 0));

    let status = range
        .init_with_address(&mut harness.relay, 0x100c, 0, 0, true)
        .await;
    assert_eq!(status, RangeStatus::Populated);
    assert_eq!(range.data.len(), 16);
    assert_eq!(harness.device.calls_to("getRange").len(), 3);

    harness
        .device
        .fail_api("getRange", EngineError::Other("unmapped".to_owned()));
    let mut range = AddressRange::new();
    assert_eq!(
        range
            .init_with_address(&mut harness.relay, 0x9000, 0, 0, true)
            .await,
        RangeStatus::Failed
    );
}

struct AttachRecorder(Arc<Mutex<Vec<u32>>>);

impl Plugin for AttachRecorder {
    fn name(&self) -> &str {
        "recorder"
    }

    fn on_target_attached(&mut self, _session: &SessionState, pid: u32) -> Result<(), PluginError> {
        self.0.lock().unwrap().push(pid);
        Ok(())
    }
}

struct Broken;

impl Plugin for Broken {
    fn name(&self) -> &str {
        "broken"
    }

    fn on_target_attached(
        &mut self,
        _session: &SessionState,
        _pid: u32,
    ) -> Result<(), PluginError> {
        Err("unsupported target".into())
    }
}

#[test(tokio::test)]
async fn plugins_are_notified() {
    let core = core_script();
    let attached = Arc::new(Mutex::new(Vec::new()));
    let loads = Arc::new(Mutex::new(0));

    let registrar = StaticRegistrar::new({
        let attached = attached.clone();
        let loads = loads.clone();

        move || {
            *loads.lock().unwrap() += 1;

            vec![
                Box::new(Broken) as Box<dyn Plugin>,
                Box::new(AttachRecorder(attached.clone())),
            ]
        }
    });

    let mut relay = Relay::builder()
        .with_device(ReplayDevice::new())
        .with_plugin_registrar(registrar)
        .core_script(core.path())
        .build();

    assert_eq!(relay.plugins().collect::<Vec<_>>(), vec!["broken", "recorder"]);

    let status = relay
        .attach(Target::Pid(PID), None)
        .await
        .expect("attach");
    assert_eq!(status, ScriptStatus::Loaded);
    assert_eq!(*attached.lock().unwrap(), vec![PID]);

    relay.reinitialize();
    assert_eq!(*loads.lock().unwrap(), 2);
}
