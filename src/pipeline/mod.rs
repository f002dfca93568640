//! # Mastering Pipeline
//!
//! [`PipelineOrchestrator`] runs one mastering job at a time on its own
//! task. The caller gets a [`PipelineHandle`] with a bounded stream of
//! [`StageEvent`]s, a way to cancel between stages and the final
//! [`PipelineResult`].
//!
//! Every run owns a [`PipelineRun`]: a private scratch directory that is
//! removed when the run ends, whether it succeeded or not.

pub mod events;
pub mod export;
pub mod orchestrator;
pub mod run;

pub use events::{Phase, PipelineState, Stage, StageEvent};
pub use export::{sanitize_export_name, ExportPaths};
pub use orchestrator::{PipelineHandle, PipelineInput, PipelineOrchestrator, PipelineResult};
pub use run::PipelineRun;
