//! Version-control checkpoints for a target repository.

pub mod git;

pub use git::{GitTracker, strip_commit_metadata};
