//! Stackgate - per-project container stacks behind a shared reverse proxy
//!
//! For a stack type, an owner and a project name this library:
//! - Creates the project workspace on disk and imports an uploaded zip archive
//! - Provisions a file-management sidecar with its own admin account
//! - Scaffolds a starter application when no archive was uploaded
//! - Renders a docker-compose manifest routed through the shared proxy network
//! - Brings the stack up with `docker compose up -d`

pub mod archive;
pub mod compose;
pub mod config;
pub mod docker;
pub mod error;
pub mod manifest;
pub mod orchestrator;
pub mod request;
pub mod runtime;
pub mod scaffold;
pub mod sidecar;
pub mod stack;
pub mod workspace;
