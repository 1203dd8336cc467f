//! Ingest job orchestration.
//!
//! [`IngestManager`] accepts jobs (a set of data sources plus module
//! settings), splits each into data-source and file tasks, runs them on fixed
//! worker pools, tracks per-thread activity, and publishes lifecycle events.
//! Cancellation is cooperative at every level: job, data source, and single
//! data-source module.

pub mod activity;
pub mod cancel;
pub mod context;
pub mod data_source_job;
pub mod error;
pub mod events;
pub mod job;
pub mod manager;
pub mod message;
pub mod module;
pub mod monitor;
pub mod pipeline;
pub mod scheduler;
pub mod settings;

mod executor;
mod ids;
mod queue;
mod task;

pub use activity::{ActivityTracker, ThreadActivity, ThreadActivitySnapshot};
pub use cancel::{CancellationState, CancellationToken};
pub use context::IngestJobContext;
pub use data_source_job::{DataSourceIngestJob, DataSourceJobSnapshot, IngestStage};
pub use error::{IngestError, IngestModuleError};
pub use events::{IngestJobEvent, IngestModuleEvent, Listener, ListenerId, ModuleContentEvent, ModuleDataEvent};
pub use job::{DataSourceIngestModuleHandle, IngestJob, ProgressSnapshot};
pub use manager::{CaseEvent, IngestManager, IngestManagerBuilder};
pub use message::{IngestMessage, MessageSink, MessageType, Notice};
pub use module::{DataSourceIngestModule, FileIngestModule, IngestModuleFactory, ModuleOptions};
pub use monitor::{DiskSpaceProbe, ResourceProbe};
pub use pipeline::ModuleRun;
pub use scheduler::PendingTasks;
pub use settings::{DataSourceStage, IngestJobSettings, IngestModuleTemplate};
