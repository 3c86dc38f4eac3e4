pub mod columns;
pub mod config;
pub mod error;
pub mod features;
pub mod pipeline;
pub mod quality;
pub mod report;
pub mod table_io;
pub mod timestamps;
pub mod weather;

pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use pipeline::{run_pipeline, PipelineOutput};
