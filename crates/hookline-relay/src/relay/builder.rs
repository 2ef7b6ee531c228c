use std::marker::PhantomData;
use std::path::PathBuf;

use super::{Relay, RelayOptions};
use crate::context::ContextStore;
use crate::engine::Device;
use crate::handler::{EventBus, EventHandler};
use crate::hook::HookRegistry;
use crate::plugin::PluginRegistrar;
use crate::session::SessionState;
use crate::ui::{NoUi, UiHooks};

/// Builder for [Relay].
///
/// It is usually created by calling [Relay::builder], and allows to
/// specify which device to attach with, and who consumes the relayed
/// events.
pub struct Builder<S> {
    state: S,
}

impl<D: Device> Builder<NeedsDevice<D>> {
    pub(super) const fn new() -> Self {
        Self {
            state: NeedsDevice(PhantomData),
        }
    }

    /// Specifies the device used for attaching to (or spawning) processes.
    pub fn with_device(self, device: D) -> Builder<Configured<D>> {
        Builder {
            state: Configured::new(Some(device)),
        }
    }

    /// Builds the relay without a device.
    ///
    /// Attaching fails until [Relay::set_device] is called.
    pub fn without_device(self) -> Builder<Configured<D>> {
        Builder {
            state: Configured::new(None),
        }
    }
}

impl<D: Device> Builder<Configured<D>> {
    /// Subscribes a consumer to every relayed event.
    ///
    /// Consumers are notified in subscription order.
    pub fn with_event_handler(mut self, handler: impl EventHandler + 'static) -> Self {
        self.state.events.subscribe(handler);
        self
    }

    /// Specifies the front-end capabilities.
    pub fn with_ui(mut self, ui: impl UiHooks + 'static) -> Self {
        self.state.ui = Box::new(ui);
        self
    }

    /// Specifies how plugins are discovered.
    ///
    /// Plugins are loaded right away, and reloaded on every
    /// [reinitialize](Relay::reinitialize).
    pub fn with_plugin_registrar(mut self, registrar: impl PluginRegistrar + 'static) -> Self {
        self.state.registrar = Some(Box::new(registrar));
        self
    }

    /// Specifies all the relay options at once.
    pub fn with_options(mut self, options: RelayOptions) -> Self {
        self.state.options = options;
        self
    }

    /// Specifies the path of the core payload script.
    pub fn core_script(mut self, path: impl Into<PathBuf>) -> Self {
        self.state.options.core_script = path.into();
        self
    }

    /// Specifies whether the payload breaks on the process entry point.
    pub fn break_start(mut self, enabled: bool) -> Self {
        self.state.options.break_start = enabled;
        self
    }

    /// Specifies whether the payload runs in debug mode.
    pub fn debug_script(mut self, enabled: bool) -> Self {
        self.state.options.debug_script = enabled;
        self
    }

    /// Builds the relay.
    pub fn build(self) -> Relay<D> {
        let Configured {
            device,
            events,
            ui,
            mut registrar,
            options,
        } = self.state;

        let plugins = registrar
            .as_mut()
            .map(|registrar| registrar.load_plugins())
            .unwrap_or_default();

        Relay {
            device,
            attachment: None,
            script: None,
            channel: None,
            session: SessionState::default(),
            hooks: HookRegistry::new(),
            contexts: ContextStore::new(),
            user_script: None,
            events,
            ui,
            registrar,
            plugins,
            options,
        }
    }
}

pub struct NeedsDevice<D>(PhantomData<D>);

pub struct Configured<D> {
    device: Option<D>,
    events: EventBus,
    ui: Box<dyn UiHooks>,
    registrar: Option<Box<dyn PluginRegistrar>>,
    options: RelayOptions,
}

impl<D> Configured<D> {
    fn new(device: Option<D>) -> Self {
        Self {
            device,
            events: EventBus::new(),
            ui: Box::new(NoUi),
            registrar: None,
            options: RelayOptions::default(),
        }
    }
}
