use std::collections::HashMap;

use crate::Sink;

/// Name -> sink mapping, populated once at startup and read-only thereafter.
#[derive(Default)]
pub struct SinkRegistry {
    sinks: HashMap<String, Box<dyn Sink>>,
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `sink` under `name`.
    ///
    /// # Panics
    ///
    /// Panics if `name` is already registered. Duplicate sink names are a
    /// startup configuration bug, discovered before the event loop ever
    /// runs, so there's no running server to protect by degrading instead
    /// of aborting.
    pub fn register(&mut self, name: impl Into<String>, sink: Box<dyn Sink>) {
        let name = name.into();
        assert!(!self.sinks.contains_key(&name), "duplicate sink name: {name}");
        self.sinks.insert(name, sink);
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Box<dyn Sink>> {
        self.sinks.get_mut(name)
    }

    /// Removes and returns the sink registered under `name`.
    ///
    /// Used at startup to hand the one selected sink off to the event loop;
    /// the registry itself is read-only and unused once the loop starts.
    pub fn take(&mut self, name: &str) -> Option<Box<dyn Sink>> {
        self.sinks.remove(name)
    }

    /// Names of every registered sink, used only for the startup listing.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sinks.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use telemetry_protocol::Record;

    struct NoopSink;
    impl Sink for NoopSink {
        fn open(&mut self, _options: &str) -> bool {
            true
        }
        fn process(&mut self, _rec: &Record, _send: &mut crate::SendFn<'_>) -> i32 {
            0
        }
    }

    #[test]
    fn registers_and_looks_up_by_name() {
        let mut registry = SinkRegistry::new();
        registry.register("noop", Box::new(NoopSink));
        assert!(registry.get_mut("noop").is_some());
        assert!(registry.get_mut("missing").is_none());
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["noop"]);
    }

    #[test]
    #[should_panic(expected = "duplicate sink name")]
    fn duplicate_registration_panics() {
        let mut registry = SinkRegistry::new();
        registry.register("noop", Box::new(NoopSink));
        registry.register("noop", Box::new(NoopSink));
    }
}
