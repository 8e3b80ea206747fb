use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};

use tracing::{debug, info, warn};

use super::{Plugin, PluginContext, PluginError};
use crate::demux::{ChannelKind, Chunk};
use crate::supervisor::{ChildHandle, ExitInfo, LaunchOptions};

/// Lifecycle state of a registered plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Registered,
    Active,
    Disqualified,
}

struct PluginSlot {
    plugin: Box<dyn Plugin>,
    state: SlotState,
}

/// Outcome of initialising every registered plugin.
#[derive(Debug, Default)]
pub struct InitReport {
    pub active: Vec<&'static str>,
    pub failed: Vec<PluginError>,
}

/// Ordered set of plugins. Registration order is dispatch order for every
/// hook.
#[derive(Default)]
pub struct PluginRegistry {
    slots: Vec<PluginSlot>,
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.slots.iter().map(|s| (s.plugin.name(), s.state)))
            .finish()
    }
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from an ordered plugin list.
    pub fn with_plugins(plugins: impl IntoIterator<Item = Box<dyn Plugin>>) -> Self {
        let mut registry = Self::new();
        for plugin in plugins {
            registry.register(plugin);
        }
        registry
    }

    pub fn register(&mut self, plugin: Box<dyn Plugin>) {
        debug!(plugin = plugin.name(), "Plugin registered");
        self.slots.push(PluginSlot {
            plugin,
            state: SlotState::Registered,
        });
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.slots.iter().map(|s| s.plugin.name()).collect()
    }

    pub fn state(&self, name: &str) -> Option<SlotState> {
        self.slots
            .iter()
            .find(|s| s.plugin.name() == name)
            .map(|s| s.state)
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.state(name) == Some(SlotState::Active)
    }

    /// Run `init` on every registered plugin, in order.
    ///
    /// A plugin whose init fails or panics is disqualified; the remaining
    /// plugins are still initialised.
    pub fn init_all(&mut self, ctx: &PluginContext) -> InitReport {
        let mut report = InitReport::default();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.state != SlotState::Registered {
                continue;
            }
            let name = slot.plugin.name();
            match invoke(slot.plugin.as_mut(), "init", |p| p.init(ctx)) {
                Ok(()) => {
                    slot.state = SlotState::Active;
                    report.active.push(name);
                }
                Err(e) => {
                    warn!(plugin = name, index, error = %e, "Error initializing plugin");
                    slot.state = SlotState::Disqualified;
                    report.failed.push(e);
                }
            }
        }
        info!(
            active = report.active.len(),
            failed = report.failed.len(),
            "Plugins initialised"
        );
        report
    }

    pub fn dispatch_spawn_options(&mut self, options: &mut LaunchOptions) {
        self.for_each_active("on_spawn_options", |p| p.on_spawn_options(options));
    }

    pub fn dispatch_spawned(&mut self, child: &ChildHandle, options: &LaunchOptions) {
        self.for_each_active("on_process_spawned", |p| p.on_process_spawned(child, options));
    }

    pub fn dispatch_exit(&mut self, exit: &ExitInfo) {
        self.for_each_active("on_process_exit", |p| p.on_process_exit(exit));
    }

    pub fn dispatch_data(&mut self, kind: ChannelKind, chunk: &Chunk) {
        match kind {
            ChannelKind::Stdout => {
                self.for_each_active("on_stdout_data", |p| p.on_stdout_data(chunk));
            }
            ChannelKind::Stderr => {
                self.for_each_active("on_stderr_data", |p| p.on_stderr_data(chunk));
            }
            ChannelKind::Ipc => self.for_each_active("on_ipc_data", |p| p.on_ipc_data(chunk)),
        }
    }

    fn for_each_active<F>(&mut self, hook: &'static str, mut f: F)
    where
        F: FnMut(&mut dyn Plugin) -> anyhow::Result<()>,
    {
        for slot in &mut self.slots {
            if slot.state != SlotState::Active {
                continue;
            }
            if let Err(e) = invoke(slot.plugin.as_mut(), hook, &mut f) {
                warn!(plugin = e.plugin(), hook, error = %e, "Plugin hook failed");
            }
        }
    }
}

fn invoke<F>(plugin: &mut dyn Plugin, hook: &'static str, f: F) -> Result<(), PluginError>
where
    F: FnOnce(&mut dyn Plugin) -> anyhow::Result<()>,
{
    let name = plugin.name();
    match catch_unwind(AssertUnwindSafe(|| f(plugin))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(source)) => Err(PluginError::Hook { name, hook, source }),
        Err(payload) => Err(PluginError::Panicked {
            name,
            hook,
            message: panic_message(payload.as_ref()),
        }),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::plugin::test_support::{Log, Recorder, context};

    fn exit_code(status: i32) -> ExitInfo {
        ExitInfo {
            status: Some(status),
            signal: None,
        }
    }

    #[test]
    fn hooks_run_in_registration_order() {
        let log = Log::default();
        let (a, _) = Recorder::with_log("a", log.clone());
        let (b, _) = Recorder::with_log("b", log.clone());
        let mut registry = PluginRegistry::with_plugins([
            Box::new(a) as Box<dyn Plugin>,
            Box::new(b),
        ]);

        let report = registry.init_all(&context());
        assert_eq!(report.active, vec!["a", "b"]);
        registry.dispatch_exit(&exit_code(0));

        assert_eq!(
            log.entries(),
            vec!["a:init", "b:init", "a:exit:Some(0):None", "b:exit:Some(0):None"]
        );
    }

    #[test]
    fn failed_init_disqualifies_plugin() {
        let log = Log::default();
        let (mut bad, _) = Recorder::with_log("bad", log.clone());
        bad.fail_init = true;
        let (good, _) = Recorder::with_log("good", log.clone());
        let mut registry = PluginRegistry::new();
        registry.register(Box::new(bad));
        registry.register(Box::new(good));

        let report = registry.init_all(&context());
        assert_eq!(report.active, vec!["good"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].plugin(), "bad");
        assert_eq!(registry.state("bad"), Some(SlotState::Disqualified));

        registry.dispatch_data(ChannelKind::Stdout, &Chunk::copy_from(b"x"));
        registry.dispatch_exit(&exit_code(1));

        assert_eq!(
            log.entries(),
            vec!["bad:init", "good:init", "good:stdout:x", "good:exit:Some(1):None"]
        );
    }

    #[test]
    fn panicking_hook_does_not_stop_others() {
        let log = Log::default();
        let (mut loud, _) = Recorder::with_log("loud", log.clone());
        loud.panic_on_stdout = true;
        let (quiet, _) = Recorder::with_log("quiet", log.clone());
        let mut registry = PluginRegistry::new();
        registry.register(Box::new(loud));
        registry.register(Box::new(quiet));
        registry.init_all(&context());

        registry.dispatch_data(ChannelKind::Stdout, &Chunk::copy_from(b"a"));
        registry.dispatch_data(ChannelKind::Stderr, &Chunk::copy_from(b"b"));

        assert!(registry.is_active("loud"));
        assert_eq!(
            log.entries(),
            vec![
                "loud:init",
                "quiet:init",
                "quiet:stdout:a",
                "loud:stderr:b",
                "quiet:stderr:b"
            ]
        );
    }

    #[test]
    fn uninitialised_plugins_receive_nothing() {
        let (rec, log) = Recorder::new("rec");
        let mut registry = PluginRegistry::new();
        registry.register(Box::new(rec));

        registry.dispatch_exit(&exit_code(0));
        assert!(log.entries().is_empty());
        assert_eq!(registry.state("rec"), Some(SlotState::Registered));
    }

    #[test]
    fn init_runs_once() {
        let (rec, log) = Recorder::new("rec");
        let mut registry = PluginRegistry::new();
        registry.register(Box::new(rec));
        registry.init_all(&context());
        let second = registry.init_all(&context());

        assert!(second.active.is_empty());
        assert_eq!(log.entries(), vec!["rec:init"]);
    }

    #[test]
    fn panic_message_from_string_payload() {
        let payload: Box<dyn Any + Send> = Box::new(String::from("boom"));
        assert_eq!(panic_message(payload.as_ref()), "boom");
    }
}
