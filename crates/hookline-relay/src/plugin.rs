use crate::session::SessionState;

/// Error returned by a plugin callback.
pub type PluginError = Box<dyn std::error::Error + Send + Sync>;

/// Trait for implementing an extension notified of the relay lifecycle.
pub trait Plugin {
    /// Name of the plugin, used for diagnostics.
    fn name(&self) -> &str;

    /// Function called once the payload is loaded into a new target.
    ///
    /// Errors are logged, they never abort the attach operation.
    fn on_target_attached(&mut self, session: &SessionState, pid: u32)
    -> Result<(), PluginError>;
}

/// Trait for implementing the discovery of plugins.
///
/// The relay asks for a fresh set of plugins when it is built and every
/// time it is reinitialized.
pub trait PluginRegistrar {
    /// Discovers and instantiates the available plugins.
    fn load_plugins(&mut self) -> Vec<Box<dyn Plugin>>;
}

/// Registrar handing out a fixed set of plugins, built on demand.
pub struct StaticRegistrar<F> {
    factory: F,
}

impl<F> StaticRegistrar<F>
where
    F: FnMut() -> Vec<Box<dyn Plugin>>,
{
    /// Creates a registrar from a plugin factory.
    pub const fn new(factory: F) -> Self {
        Self { factory }
    }
}

impl<F> PluginRegistrar for StaticRegistrar<F>
where
    F: FnMut() -> Vec<Box<dyn Plugin>>,
{
    fn load_plugins(&mut self) -> Vec<Box<dyn Plugin>> {
        (self.factory)()
    }
}
