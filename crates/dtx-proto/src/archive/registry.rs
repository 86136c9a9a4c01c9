//! [`ClassRegistry`]: maps archived Objective-C class names to a decode
//! function for their field dictionary.
//!
//! A class the registry has no entry for is not silently passed through —
//! the caller gets [`crate::error::ProtocolError::ArchiveClassMissing`] and
//! decides whether that's fatal. This mirrors the embedded class-name
//! registry the original tool keeps (`archiver.update_class_map`), which
//! raises rather than guesses when it meets an object it wasn't told how to
//! unarchive.

use std::collections::HashMap;

use super::value::Value;

/// A decode function for one archived class: given the object's resolved
/// field dictionary (as a [`Value::Dict`], with `$class` already stripped),
/// produce the `Value` that should represent it.
pub type Decoder = fn(Value) -> Value;

/// Registered decoders for archived classes.
#[derive(Clone)]
pub struct ClassRegistry {
    decoders: HashMap<String, Decoder>,
}

impl ClassRegistry {
    /// An empty registry: every class lookup will fail.
    #[must_use]
    pub fn new() -> Self {
        Self { decoders: HashMap::new() }
    }

    /// A registry preloaded with the classes this core always needs to
    /// understand: `NSNull`, and the `DTSysmonTapMessage` family of
    /// streaming-tap notifications, each of which just wraps a plain plist
    /// body that should be unwrapped as-is.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("NSNull", |_body| Value::Null);
        for class in [
            "DTSysmonTapMessage",
            "DTTapHeartbeatMessage",
            "DTTapStatusMessage",
            "DTKTraceTapMessage",
        ] {
            registry.register(class, pass_through);
        }
        registry
    }

    /// Register (or replace) the decoder for `class`.
    pub fn register(&mut self, class: impl Into<String>, decoder: Decoder) {
        self.decoders.insert(class.into(), decoder);
    }

    /// Look up and invoke the decoder registered for `class`, if any.
    #[must_use]
    pub fn decode(&self, class: &str, body: Value) -> Option<Value> {
        self.decoders.get(class).map(|decoder| decoder(body))
    }

    /// Whether a decoder is registered for `class`.
    #[must_use]
    pub fn contains(&self, class: &str) -> bool {
        self.decoders.contains_key(class)
    }
}

impl Default for ClassRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn pass_through(body: Value) -> Value {
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_cover_null_and_sysmon_family() {
        let registry = ClassRegistry::with_builtins();
        assert!(registry.contains("NSNull"));
        assert!(registry.contains("DTSysmonTapMessage"));
        assert!(registry.contains("DTTapHeartbeatMessage"));
        assert!(registry.contains("DTTapStatusMessage"));
        assert!(registry.contains("DTKTraceTapMessage"));
        assert!(!registry.contains("NSObject"));
    }

    #[test]
    fn null_decoder_ignores_body() {
        let registry = ClassRegistry::with_builtins();
        let decoded = registry.decode("NSNull", Value::Dict(vec![])).unwrap();
        assert_eq!(decoded, Value::Null);
    }

    #[test]
    fn sysmon_decoder_passes_body_through_unchanged() {
        let registry = ClassRegistry::with_builtins();
        let body = Value::Dict(vec![("CPUCount".to_string(), Value::Int(8))]);
        let decoded = registry.decode("DTSysmonTapMessage", body.clone()).unwrap();
        assert_eq!(decoded, body);
    }

    #[test]
    fn custom_decoder_can_be_registered() {
        let mut registry = ClassRegistry::new();
        registry.register("MyClass", |_body| Value::String("replaced".to_string()));
        let decoded = registry.decode("MyClass", Value::Null).unwrap();
        assert_eq!(decoded, Value::String("replaced".to_string()));
        assert!(registry.decode("OtherClass", Value::Null).is_none());
    }
}
