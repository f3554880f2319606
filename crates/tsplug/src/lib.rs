//! # tsplug
//!
//! Job orchestration and model lifecycle engine of the tsplug model plugin
//! host. A [`PluginService`] accepts train and inference requests, bounds
//! concurrent training per instance, runs the work on a [`JobDispatcher`]
//! worker pool and records every lifecycle transition in a
//! [`ModelRepository`].

pub mod admission;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod model;
pub mod monitor;
pub mod plugin;
pub mod progress;
pub mod reconciler;
pub mod service;
pub mod sink;
pub mod storage;
pub mod workspace;

pub use admission::{AdmissionController, AdmissionPermit, OwnerKey};
pub use config::{PollConfig, ServiceConfig};
pub use dispatcher::{DispatchError, DispatcherStats, Job, JobDispatcher, JobHandle, JobKind, JobOutcome};
pub use error::{Result, ServiceError};
pub use model::{
    InMemoryModelRepository, ModelError, ModelRecord, ModelRepository, ModelSummary,
    PostgresModelRepository,
};
pub use monitor::{DispatcherStatsHook, HealthMonitor, MonitorHook};
pub use plugin::{
    ComputeBackend, DefaultPlugin, InferenceContext, LocalComputePlugin, ModelPlugin, PluginError,
    RemoteComputePlugin, ResultPublisher, TrainContext,
};
pub use progress::TrainingProgress;
pub use reconciler::{
    PollPolicy, RemoteCompute, RemoteError, RemoteJobHandle, RemoteJobReconciler, RemoteSnapshot,
    RemoteStatus,
};
pub use service::{PluginService, TaskCreated};
pub use sink::{InMemorySink, InferencePoint, LogSink, PointStatus, ResultSink, TrainingReport};
pub use storage::{ArtifactCache, ArtifactKey, ArtifactStore, LocalArtifactStore};
pub use workspace::{Workspace, WorkspaceManager};

pub use tsplug_core::{Fingerprint, ModelId, ModelState, PluginRequest, TenantId, TimeKey};
