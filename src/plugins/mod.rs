//! Content-enrichment plugins.
//!
//! A [`Plugin`] looks at one page's content and optionally produces a JSON
//! annotation. [`PluginPipeline`] holds the registered plugins in
//! registration order and runs the enabled ones sequentially per page;
//! pages themselves run in parallel on the batch executor.
//!
//! Enrichment is best-effort: a plugin that returns an error *or panics* is
//! logged and its key is left out of that page's results. It never affects
//! the page text or any other plugin.

pub mod medical_term;
pub mod table_detector;

pub use medical_term::{MedicalTermPlugin, TermPattern};
pub use table_detector::TableDetectorPlugin;

use crate::config::ProcessingParameters;
use crate::error::PluginError;
use crate::output::PluginResults;
use image::DynamicImage;
use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};

/// What a plugin is shown for one page.
#[derive(Debug, Clone, Copy)]
pub struct PluginInput<'a> {
    /// Page text after OCR / conversion and normalisation.
    pub text: &'a str,
    /// Page raster, when the page came from a rendered or decoded image.
    pub image: Option<&'a DynamicImage>,
}

/// Per-page context passed alongside the content.
#[derive(Debug, Clone, Copy)]
pub struct PluginContext<'a> {
    pub page_index: usize,
    pub params: &'a ProcessingParameters,
}

/// A single enrichment capability.
pub trait Plugin: Send + Sync {
    /// Unique name; also the key in [`PluginResults`].
    fn name(&self) -> &str;

    /// Cheap precondition. The plugin is skipped for this page when false.
    fn validate(&self, input: &PluginInput<'_>) -> bool {
        let _ = input;
        true
    }

    /// Produce this plugin's structured output for the page.
    fn process(
        &self,
        input: &PluginInput<'_>,
        ctx: &PluginContext<'_>,
    ) -> Result<serde_json::Value, PluginError>;
}

/// Ordered plugin registry.
#[derive(Default)]
pub struct PluginPipeline {
    plugins: RwLock<Vec<Arc<dyn Plugin>>>,
}

impl std::fmt::Debug for PluginPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl PluginPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pipeline with the built-in medical-term and table-detector plugins.
    pub fn with_defaults() -> Self {
        let p = Self::new();
        // Names are distinct constants; registration cannot collide.
        let _ = p.register(Arc::new(MedicalTermPlugin::default()));
        let _ = p.register(Arc::new(TableDetectorPlugin::default()));
        p
    }

    /// Append a plugin. Names must be unique so outputs never overwrite
    /// each other.
    pub fn register(&self, plugin: Arc<dyn Plugin>) -> Result<(), PluginError> {
        let mut plugins = self.plugins.write();
        if plugins.iter().any(|p| p.name() == plugin.name()) {
            return Err(PluginError::Duplicate(plugin.name().to_string()));
        }
        debug!("Registered plugin '{}'", plugin.name());
        plugins.push(plugin);
        Ok(())
    }

    pub fn names(&self) -> Vec<String> {
        self.plugins
            .read()
            .iter()
            .map(|p| p.name().to_string())
            .collect()
    }

    /// Run every enabled plugin on one page, in registration order.
    pub fn run(&self, input: &PluginInput<'_>, ctx: &PluginContext<'_>) -> PluginResults {
        // Snapshot so a slow plugin does not hold the registry lock.
        let plugins: Vec<Arc<dyn Plugin>> = self.plugins.read().clone();
        let mut results = PluginResults::new();

        for plugin in plugins {
            let name = plugin.name();
            if !ctx.params.plugin_enabled(name) {
                continue;
            }
            match catch_unwind(AssertUnwindSafe(|| plugin.validate(input))) {
                Ok(true) => {}
                Ok(false) => {
                    debug!("Page {}: plugin '{}' skipped (validate=false)", ctx.page_index, name);
                    continue;
                }
                Err(_) => {
                    warn!("Page {}: plugin '{}' panicked in validate", ctx.page_index, name);
                    continue;
                }
            }
            match catch_unwind(AssertUnwindSafe(|| plugin.process(input, ctx))) {
                Ok(Ok(value)) => {
                    results.insert(name.to_string(), value);
                }
                Ok(Err(e)) => {
                    warn!("Page {}: {}", ctx.page_index, e);
                }
                Err(_) => {
                    warn!("Page {}: plugin '{}' panicked", ctx.page_index, name);
                }
            }
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo(&'static str);

    impl Plugin for Echo {
        fn name(&self) -> &str {
            self.0
        }
        fn process(
            &self,
            input: &PluginInput<'_>,
            _ctx: &PluginContext<'_>,
        ) -> Result<serde_json::Value, PluginError> {
            Ok(json!({ "len": input.text.len() }))
        }
    }

    struct Failing;

    impl Plugin for Failing {
        fn name(&self) -> &str {
            "failing"
        }
        fn process(
            &self,
            _input: &PluginInput<'_>,
            _ctx: &PluginContext<'_>,
        ) -> Result<serde_json::Value, PluginError> {
            Err(PluginError::Failed {
                plugin: "failing".into(),
                message: "boom".into(),
            })
        }
    }

    struct Panicking;

    impl Plugin for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }
        fn process(
            &self,
            _input: &PluginInput<'_>,
            _ctx: &PluginContext<'_>,
        ) -> Result<serde_json::Value, PluginError> {
            panic!("plugin bug")
        }
    }

    struct PanicsInValidate;

    impl Plugin for PanicsInValidate {
        fn name(&self) -> &str {
            "bad_validate"
        }
        fn validate(&self, _input: &PluginInput<'_>) -> bool {
            panic!("validate bug")
        }
        fn process(
            &self,
            _input: &PluginInput<'_>,
            _ctx: &PluginContext<'_>,
        ) -> Result<serde_json::Value, PluginError> {
            Ok(json!(null))
        }
    }

    struct NeverValid;

    impl Plugin for NeverValid {
        fn name(&self) -> &str {
            "never"
        }
        fn validate(&self, _input: &PluginInput<'_>) -> bool {
            false
        }
        fn process(
            &self,
            _input: &PluginInput<'_>,
            _ctx: &PluginContext<'_>,
        ) -> Result<serde_json::Value, PluginError> {
            Ok(json!(null))
        }
    }

    fn params_enabling(names: &[&str]) -> ProcessingParameters {
        ProcessingParameters::builder()
            .plugins(names.iter().copied())
            .build()
            .unwrap()
    }

    #[test]
    fn duplicate_names_rejected() {
        let p = PluginPipeline::new();
        p.register(Arc::new(Echo("a"))).unwrap();
        assert!(matches!(
            p.register(Arc::new(Echo("a"))),
            Err(PluginError::Duplicate(_))
        ));
    }

    #[test]
    fn registration_order_preserved() {
        let p = PluginPipeline::new();
        p.register(Arc::new(Echo("z"))).unwrap();
        p.register(Arc::new(Echo("a"))).unwrap();
        assert_eq!(p.names(), vec!["z", "a"]);
    }

    #[test]
    fn failures_and_panics_are_contained() {
        let p = PluginPipeline::new();
        p.register(Arc::new(Failing)).unwrap();
        p.register(Arc::new(Panicking)).unwrap();
        p.register(Arc::new(Echo("echo"))).unwrap();
        let params = params_enabling(&["failing", "panicking", "echo"]);
        let input = PluginInput {
            text: "abc",
            image: None,
        };
        let out = p.run(
            &input,
            &PluginContext {
                page_index: 1,
                params: &params,
            },
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out["echo"], json!({"len": 3}));
    }

    #[test]
    fn panic_in_validate_skips_only_that_plugin() {
        let p = PluginPipeline::new();
        p.register(Arc::new(PanicsInValidate)).unwrap();
        p.register(Arc::new(Echo("echo"))).unwrap();
        let params = params_enabling(&["bad_validate", "echo"]);
        let input = PluginInput {
            text: "abcd",
            image: None,
        };
        let out = p.run(
            &input,
            &PluginContext {
                page_index: 2,
                params: &params,
            },
        );
        assert_eq!(out.len(), 1);
        assert!(!out.contains_key("bad_validate"));
        assert_eq!(out["echo"], json!({"len": 4}));
    }

    #[test]
    fn disabled_and_invalid_plugins_skipped() {
        let p = PluginPipeline::new();
        p.register(Arc::new(Echo("off"))).unwrap();
        p.register(Arc::new(NeverValid)).unwrap();
        let params = params_enabling(&["never"]);
        let input = PluginInput {
            text: "abc",
            image: None,
        };
        let out = p.run(
            &input,
            &PluginContext {
                page_index: 1,
                params: &params,
            },
        );
        assert!(out.is_empty());
    }

    #[test]
    fn defaults_registered() {
        let p = PluginPipeline::with_defaults();
        assert_eq!(p.names(), vec!["medical_term", "table_detector"]);
    }
}
