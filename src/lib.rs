pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod dialog;
pub mod error;
pub mod harness;
pub mod hooks;
pub mod monitor;
pub mod output;
pub mod plan;
pub mod procstat;
pub mod report;
pub mod supervisor;
pub mod timeout;
pub mod units;
pub mod util;
pub mod worker;
