//! CSV adapters used by the command-line replay tool.

pub mod command_reader;
pub mod payment_writer;
