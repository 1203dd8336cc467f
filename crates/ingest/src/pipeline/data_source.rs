use std::sync::Arc;

use tracing::debug;

use super::{guarded, ModuleRun, PipelineModule};
use crate::activity::ThreadActivity;
use crate::context::IngestJobContext;
use crate::data_source_job::DataSourceIngestJob;
use crate::error::{IngestError, IngestModuleError};
use crate::module::DataSourceIngestModule;
use crate::settings::{DataSourceStage, IngestModuleTemplate};

pub(crate) struct DataSourceIngestPipeline {
    stage: DataSourceStage,
    modules: Vec<PipelineModule<dyn DataSourceIngestModule>>,
}

impl DataSourceIngestPipeline {
    pub(crate) fn new(stage: DataSourceStage, templates: &[IngestModuleTemplate]) -> Self {
        let modules = templates
            .iter()
            .filter(|t| t.is_enabled() && t.stage() == stage)
            .filter_map(|t| {
                t.factory()
                    .create_data_source_module(t.options())
                    .map(|m| PipelineModule::new(t.display_name(), m))
            })
            .collect();
        Self { stage, modules }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub(crate) fn stage(&self) -> DataSourceStage {
        self.stage
    }

    pub(crate) fn start_up(&mut self, context: &IngestJobContext) -> Vec<IngestModuleError> {
        let mut errors = Vec::new();
        for module in &mut self.modules {
            let name = module.display_name.clone();
            let instance = &mut module.module;
            match guarded(&name, IngestError::StartUpFailed, || instance.start_up(context)) {
                Ok(()) => module.started = true,
                Err(e) => errors.push(e),
            }
        }
        errors
    }

    /// Run every module over the job's data source on the calling worker
    /// thread. Stops early once the job is cancelled. A module cancelled on
    /// its own is recorded and the next module runs.
    pub(crate) fn process(&mut self, job: &DataSourceIngestJob, thread_id: u64) -> Vec<IngestModuleError> {
        let mut errors = Vec::new();
        let activity = job.activity();
        for module in &mut self.modules {
            if job.is_cancelled() {
                break;
            }
            let name = module.display_name.clone();
            job.set_current_module(Some(Arc::new(ModuleRun::new(&name))));
            activity.set_task_progress(
                thread_id,
                ThreadActivity::data_source_task(job.job_id(), &name, job.data_source_name()),
            );
            debug!(job_id = job.job_id(), module = %name, data_source = %job.data_source_name(), "Running data source module");

            let instance = &mut module.module;
            let data_source = job.data_source();
            if let Err(e) = guarded(&name, IngestError::ProcessingFailed, || instance.process(data_source.as_ref())) {
                errors.push(e);
            }

            if job.is_cancelled() {
                break;
            }
            if job.current_module_is_cancelled() {
                job.current_module_cancellation_completed(&name);
            }
        }
        job.set_current_module(None);
        activity.set_task_progress_completed(thread_id);
        errors
    }

    pub(crate) fn shut_down(&mut self) -> Vec<IngestModuleError> {
        let mut errors = Vec::new();
        for module in self.modules.iter_mut().filter(|m| m.started) {
            module.started = false;
            let name = module.display_name.clone();
            let instance = &mut module.module;
            if let Err(e) = guarded(&name, IngestError::ProcessingFailed, || instance.shut_down()) {
                errors.push(e);
            }
        }
        errors
    }
}
