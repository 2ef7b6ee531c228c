use std::io::Write;

use hookline_relay::handler::{DataPayload, Event};
use hookline_relay::hook::{BreakLogic, Hook};
use kdl::{KdlDocument, KdlEntry, KdlNode};
use miette::IntoDiagnostic;

/// Writes published events as a KDL document.
pub fn write_events<'a>(
    events: impl IntoIterator<Item = &'a Event>,
    pointer_size: u8,
    output: impl Write,
) -> miette::Result<()> {
    let mut kdl = KdlDocument::new();

    kdl.nodes_mut().extend(
        events
            .into_iter()
            .map(|event| dump_event_to_kdl_node(event, pointer_size)),
    );

    write_kdl(kdl, output)
}

/// Writes a KDL document, after formatting it.
pub fn write_kdl(mut kdl: KdlDocument, mut output: impl Write) -> miette::Result<()> {
    kdl.autoformat();

    output
        .write_all(kdl.to_string().as_bytes())
        .into_diagnostic()?;

    Ok(())
}

/// Renders a published event as a KDL node named after the event.
pub fn dump_event_to_kdl_node(event: &Event, pointer_size: u8) -> KdlNode {
    let mut node = KdlNode::new(event.name());

    match event {
        Event::ProcessAttached { pid, label } => {
            push_prop(&mut node, "pid", i128::from(*pid));
            push_prop(&mut node, "label", label.as_str());
        }
        Event::ProcessDetached {
            pid,
            reason,
            crash_log,
        } => {
            push_prop(&mut node, "pid", i128::from(*pid));
            push_prop(&mut node, "reason", reason.as_str());

            if let Some(crash_log) = crash_log {
                push_child(&mut node, {
                    let mut crash = KdlNode::new("crash-log");
                    push_arg(&mut crash, crash_log.as_str());
                    crash
                });
            }
        }
        Event::NativeHookAdded(hook)
        | Event::JavaHookAdded(hook)
        | Event::NativeOnLoadHookAdded(hook)
        | Event::JavaOnLoadHookAdded(hook) => dump_hook(&mut node, hook, pointer_size),
        Event::HookDeleted(fields) | Event::JavaTrace(fields) => {
            for field in fields {
                push_arg(&mut node, field.as_str());
            }
        }
        Event::NativeOnLoadHit { module, base } => {
            push_arg(&mut node, module.as_str());
            push_prop(&mut node, "base", base.as_str());
        }
        Event::JavaOnLoadHit { class } => push_arg(&mut node, class.as_str()),
        Event::WatcherAdded { ptr, flags } => {
            push_arg(&mut node, ptr.as_str());
            push_prop(&mut node, "flags", access_flags(*flags));
        }
        Event::WatcherRemoved { ptr } => push_arg(&mut node, ptr.as_str()),
        Event::RangesSet(value)
        | Event::ModulesSet(value)
        | Event::ContextApplied(value)
        | Event::Backtrace(value) => push_arg(&mut node, value.to_string()),
        Event::Log(text) | Event::LogEvent(text) | Event::EnumerateJavaClassesMatch(text) => {
            push_arg(&mut node, text.as_str());
        }
        Event::ThreadResumed(tid) => push_arg(&mut node, i128::from(*tid)),
        Event::EnumerateJavaMethodsComplete { class, methods } => {
            push_arg(&mut node, class.as_str());
            push_prop(&mut node, "methods", methods.to_string());
        }
        Event::MemoryScanResult(matches) => {
            if matches.is_empty() {
                push_arg(&mut node, "<none>");
            }

            for found in matches {
                push_child(&mut node, {
                    let mut child = KdlNode::new("match");
                    push_arg(&mut child, found.to_string());
                    child
                });
            }
        }
        Event::SetData(DataPayload::Raw { key, data }) => {
            push_arg(&mut node, key.as_str());
            push_prop(&mut node, "raw", hex::encode(data));
        }
        Event::SetData(DataPayload::Plain { key, text }) => {
            push_arg(&mut node, key.as_str());
            push_prop(&mut node, "text", text.as_str());
        }
        Event::ContextChanged { property, value } => {
            push_arg(&mut node, property.as_str());
            push_arg(&mut node, value.as_str());
        }
        Event::ScriptLoaded
        | Event::ScriptDestroyed
        | Event::EnumerateJavaClassesStart
        | Event::EnumerateJavaClassesComplete => (),
    }

    node
}

fn dump_hook(node: &mut KdlNode, hook: &Hook, pointer_size: u8) {
    if hook.ptr != 0 {
        push_prop(node, "addr", format_ptr(hook.ptr, pointer_size));
    }

    if !hook.input.is_empty() {
        push_arg(node, hook.input.as_str());
    }

    if !hook.bytes.is_empty() {
        push_prop(node, "bytes", hex::encode(&hook.bytes));
    }

    if hook.internal {
        push_prop(node, "internal", true);
    }

    if let Some(condition) = &hook.condition {
        push_child(node, {
            let mut child = KdlNode::new("condition");
            push_arg(&mut child, condition.as_str());
            child
        });
    }

    if let BreakLogic::Script(source) = &hook.logic {
        push_child(node, {
            let mut child = KdlNode::new("logic");
            push_arg(&mut child, source.as_str());
            child
        });
    }

    if let Some(symbol) = &hook.debug_symbol {
        push_child(node, {
            let mut child = KdlNode::new("symbol");
            push_arg(&mut child, symbol.to_string());
            child
        });
    }
}

/// Formats an address, padded to the target's pointer size.
fn format_ptr(ptr: u64, pointer_size: u8) -> String {
    let width = usize::from(pointer_size) * 2 + 2;
    format!("{ptr:#0width$x}")
}

fn access_flags(flags: u32) -> String {
    [(1, 'r'), (2, 'w'), (4, 'x')]
        .into_iter()
        .map(|(bit, c)| if flags & bit != 0 { c } else { '-' })
        .collect()
}

fn push_arg(node: &mut KdlNode, value: impl Into<kdl::KdlValue>) {
    node.entries_mut().push(KdlEntry::new(value));
}

fn push_prop(node: &mut KdlNode, key: &str, value: impl Into<kdl::KdlValue>) {
    node.entries_mut().push(KdlEntry::new_prop(key, value));
}

fn push_child(node: &mut KdlNode, child: KdlNode) {
    node.ensure_children().nodes_mut().push(child);
}
