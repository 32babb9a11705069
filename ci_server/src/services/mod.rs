//! Server-side services: webhook verification and persistence.

pub mod github_service;
pub mod pg_store;
pub mod webhook_verifier;
