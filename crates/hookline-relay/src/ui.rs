/// Capabilities of the front-end that a few payload messages need.
///
/// Every method defaults to a no-op, so headless consumers can use
/// [NoUi].
pub trait UiHooks {
    /// The payload reported kernel instrumentation support.
    fn enable_kernel(&mut self) {}

    /// Function trace data to append to the trace view.
    fn append_ftrace(&mut self, _data: &str) {}

    /// The target has a java runtime (unlocks java-only actions).
    fn java_available(&mut self) {}

    /// An error must be shown to the user.
    fn show_error(&mut self, _message: &str) {}
}

/// Front-end without any capability.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoUi;

impl UiHooks for NoUi {}
