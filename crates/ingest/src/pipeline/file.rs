use caseflow_core::FileEntry;
use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::debug;

use super::{guarded, PipelineModule};
use crate::activity::ThreadActivity;
use crate::context::IngestJobContext;
use crate::data_source_job::DataSourceIngestJob;
use crate::error::{IngestError, IngestModuleError};
use crate::module::FileIngestModule;
use crate::settings::IngestModuleTemplate;

pub(crate) struct FileIngestPipeline {
    modules: Vec<PipelineModule<dyn FileIngestModule>>,
}

impl FileIngestPipeline {
    pub(crate) fn new(templates: &[IngestModuleTemplate]) -> Self {
        let modules = templates
            .iter()
            .filter(|t| t.is_enabled())
            .filter_map(|t| {
                t.factory()
                    .create_file_module(t.options())
                    .map(|m| PipelineModule::new(t.display_name(), m))
            })
            .collect();
        Self { modules }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.modules.is_empty()
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

    /// Run the file through every module in order. Modules not yet reached
    /// when the job is cancelled are skipped.
    pub(crate) fn process(
        &mut self,
        job: &DataSourceIngestJob,
        thread_id: u64,
        file: &FileEntry,
    ) -> Vec<IngestModuleError> {
        let mut errors = Vec::new();
        let activity = job.activity();
        for module in &mut self.modules {
            if job.is_cancelled() {
                break;
            }
            let name = module.display_name.clone();
            activity.set_task_progress(
                thread_id,
                ThreadActivity::file_task(job.job_id(), &name, job.data_source_name(), &file.name),
            );
            let instance = &mut module.module;
            if let Err(e) = guarded(&name, IngestError::ProcessingFailed, || instance.process(file)) {
                errors.push(e);
            }
        }
        activity.set_task_progress_completed(thread_id);

        if !job.is_cancelled() {
            job.fire_file_done(file);
        }
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

/// Fixed set of file pipelines, one per file worker thread. A worker takes a
/// pipeline for the duration of one file task and returns it afterwards, so
/// no module instance is ever used by two threads at once.
pub(crate) struct FilePipelinePool {
    capacity: usize,
    tx: Sender<FileIngestPipeline>,
    rx: Receiver<FileIngestPipeline>,
}

impl FilePipelinePool {
    pub(crate) fn new(pipelines: Vec<FileIngestPipeline>) -> Self {
        let capacity = pipelines.len().max(1);
        let (tx, rx) = bounded(capacity);
        for pipeline in pipelines {
            // Capacity matches the pipeline count.
            let _ = tx.send(pipeline);
        }
        Self {
            capacity: rx.len(),
            tx,
            rx,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.capacity == 0
    }

    /// Borrow a pipeline, blocking until one is free. `None` for an empty pool.
    pub(crate) fn take(&self) -> Option<FileIngestPipeline> {
        if self.capacity == 0 {
            return None;
        }
        self.rx.recv().ok()
    }

    pub(crate) fn give_back(&self, pipeline: FileIngestPipeline) {
        let _ = self.tx.send(pipeline);
    }

    /// Apply `f` to every pipeline currently in the pool.
    pub(crate) fn for_each_idle(&self, mut f: impl FnMut(&mut FileIngestPipeline)) {
        let idle: Vec<FileIngestPipeline> = self.rx.try_iter().collect();
        debug!(pipelines = idle.len(), capacity = self.capacity, "Visiting idle file pipelines");
        for mut pipeline in idle {
            f(&mut pipeline);
            self.give_back(pipeline);
        }
    }
}
