use std::fmt;
use std::sync::Arc;

use crate::module::{IngestModuleFactory, ModuleOptions};

/// Which data-source pipeline a module's data-source half belongs to.
/// File modules always run in the first stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataSourceStage {
    #[default]
    First,
    /// Runs after every first-stage task, including all file tasks, is done.
    Second,
}

/// One configured module: factory, options, and whether it is enabled.
#[derive(Clone)]
pub struct IngestModuleTemplate {
    factory: Arc<dyn IngestModuleFactory>,
    options: ModuleOptions,
    enabled: bool,
    stage: DataSourceStage,
}

impl IngestModuleTemplate {
    pub fn new(factory: Arc<dyn IngestModuleFactory>) -> Self {
        Self {
            factory,
            options: ModuleOptions::Null,
            enabled: true,
            stage: DataSourceStage::First,
        }
    }

    pub fn with_options(mut self, options: ModuleOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_stage(mut self, stage: DataSourceStage) -> Self {
        self.stage = stage;
        self
    }

    pub fn display_name(&self) -> &str {
        self.factory.module_display_name()
    }

    pub fn factory(&self) -> &Arc<dyn IngestModuleFactory> {
        &self.factory
    }

    pub fn options(&self) -> &ModuleOptions {
        &self.options
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn stage(&self) -> DataSourceStage {
        self.stage
    }
}

impl fmt::Debug for IngestModuleTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestModuleTemplate")
            .field("module", &self.display_name())
            .field("enabled", &self.enabled)
            .field("stage", &self.stage)
            .finish()
    }
}

/// Module configuration for a job. Order of templates is pipeline order.
#[derive(Debug, Clone, Default)]
pub struct IngestJobSettings {
    /// Name of the execution context these settings were saved under.
    context: String,
    templates: Vec<IngestModuleTemplate>,
}

impl IngestJobSettings {
    pub fn new(context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            templates: Vec::new(),
        }
    }

    pub fn with_module(mut self, template: IngestModuleTemplate) -> Self {
        self.templates.push(template);
        self
    }

    pub fn add_module(&mut self, template: IngestModuleTemplate) {
        self.templates.push(template);
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn templates(&self) -> &[IngestModuleTemplate] {
        &self.templates
    }

    pub fn enabled_templates(&self) -> impl Iterator<Item = &IngestModuleTemplate> {
        self.templates.iter().filter(|t| t.enabled)
    }

    pub fn enabled_module_names(&self) -> Vec<String> {
        self.enabled_templates().map(|t| t.display_name().to_string()).collect()
    }
}
