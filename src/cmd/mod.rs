//! CLI command implementations.
//!
//! | Module    | Commands handled             |
//! |-----------|------------------------------|
//! | `serve`   | `Serve`                      |
//! | `repo`    | `Files`, `Commits`, `Revert` |
//! | `process` | `Process`                    |
//! | `config`  | `Config`                     |

pub mod config;
pub mod process;
pub mod repo;
pub mod serve;

pub use config::cmd_config;
pub use process::cmd_process;
pub use repo::{cmd_commits, cmd_files, cmd_revert};
pub use serve::cmd_serve;
