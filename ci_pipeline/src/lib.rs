//! Shipyard pipeline core: the build-and-deploy engine.
//!
//! Turns a stored build definition into a finished, packaged and deployed
//! artifact: variable substitution and parsing of the definition document,
//! a fixed-shape stage runner (setup → test → pre-build → build →
//! post-build), per-language build strategies, zip packaging, and a
//! fan-out to local, email and SSH/SFTP destinations.
//!
//! Persistence and the HTTP surface live outside this crate; the
//! orchestrator talks to storage only through [`store::BuildStore`].

pub mod build;
pub mod command;
pub mod definition;
pub mod deploy;
pub mod error;
pub mod git;
pub mod metrics;
pub mod packager;
pub mod pipeline;
pub mod report;
pub mod settings;
pub mod store;
pub mod strategy;
pub mod variables;

pub use build::{Build, BuildStatus};
pub use definition::{BuildDefinitionContent, Hoster, ProjectType, Repository};
pub use error::PipelineError;
pub use pipeline::{Pipeline, Trigger};
pub use settings::PipelineSettings;
pub use store::{BuildDefinition, BuildExecution, BuildStore, MemoryStore, NewBuildExecution};
