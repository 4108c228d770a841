pub mod agent;
pub mod commands;
pub mod config;
pub mod context;
pub mod conversation;
pub mod init;
pub mod llm;
pub mod logging;
pub mod schema;
pub mod templates;
pub mod toolkit;

/// `--version` text: package version plus build metadata from `build.rs`.
pub const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (commit: ",
    env!("CLLM_GIT_SHA"),
    ", built: ",
    env!("CLLM_BUILD_TS"),
    ")"
);
