pub mod config_cmd;
pub mod context;
pub mod daemon;
pub mod loop_cmd;
pub mod runs;
pub mod sweep;
