//! Command implementations for the ladle CLI
//!
//! - **install**: install, uninstall and download-only runs
//! - **query**: listing, status, manifest info and dependency trees
//! - **maintenance**: hold/unhold, cache and bucket management

pub mod install;
pub mod maintenance;
pub mod query;
