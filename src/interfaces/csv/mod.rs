//! CSV adapters used by the command-line interface.

pub mod order_reader;
pub mod order_writer;
