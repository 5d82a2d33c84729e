//! Registry of stage overrides served to the pipeline as an [`Oracle`].

use std::collections::HashMap;
use std::path::Path;

use hkp_core::{HkpError, HkpResult, Oracle, Stage};

/// Handler producing a proposal from a stage payload.
pub type OverrideHandler =
    Box<dyn Fn(&serde_json::Value) -> Option<serde_json::Value> + Send + Sync>;

/// Per-stage override handlers.
#[derive(Default)]
pub struct OverrideRegistry {
    handlers: HashMap<Stage, OverrideHandler>,
}

impl OverrideRegistry {
    /// Create an empty registry; every stage falls back.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `stage`, replacing any previous one.
    pub fn register<F>(&mut self, stage: Stage, handler: F)
    where
        F: Fn(&serde_json::Value) -> Option<serde_json::Value> + Send + Sync + 'static,
    {
        self.handlers.insert(stage, Box::new(handler));
    }

    /// Always propose `value` for `stage`.
    pub fn register_fixed(&mut self, stage: Stage, value: serde_json::Value) {
        self.register(stage, move |_| Some(value.clone()));
    }

    /// Load fixed proposals from a JSON object keyed by stage name.
    ///
    /// ```json
    /// { "score": { "score": 0.2, "factors": { ... }, "protection": "active" } }
    /// ```
    pub fn from_json_file(path: impl AsRef<Path>) -> HkpResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            HkpError::Validation(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let table: HashMap<Stage, serde_json::Value> = serde_json::from_str(&text)?;

        let mut registry = Self::new();
        for (stage, value) in table {
            registry.register_fixed(stage, value);
        }
        Ok(registry)
    }

    /// Stages with a registered handler.
    pub fn stages(&self) -> Vec<Stage> {
        self.handlers.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Oracle for OverrideRegistry {
    fn propose(&self, stage: Stage, payload: &serde_json::Value) -> Option<serde_json::Value> {
        let handler = self.handlers.get(&stage)?;
        tracing::debug!("Consulting override for {}", stage);
        handler(payload)
    }
}
