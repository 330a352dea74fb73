//! metro - operator CLI for Metronome
//!
//! - `commands`: one function per subcommand, each returning its report
//! - `render`: plain-text tables for models, masters, and errors
//! - `telemetry`: tracing subscriber setup

pub mod commands;
pub mod render;
pub mod telemetry;
