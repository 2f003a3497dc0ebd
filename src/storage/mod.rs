//! Output channels for draws, diagnostics and initial values.
//!
//! A writer receives a header row of names followed by rows of numbers, plus
//! free-form messages. Writers are append-only.

mod arrow;
mod csv;
mod memory;

use std::{
    io,
    sync::{Arc, Mutex},
};

pub use arrow::ArrowWriter;
pub use csv::{CsvConfig, CsvWriter};
pub use memory::MemoryWriter;

pub trait Writer: Send {
    /// Write the names of the columns that follow.
    fn write_names(&mut self, names: &[String]) -> io::Result<()>;

    /// Append one row of values.
    fn write_values(&mut self, values: &[f64]) -> io::Result<()>;

    /// Append a free-form message.
    fn write_message(&mut self, _message: &str) -> io::Result<()> {
        Ok(())
    }

    /// Append an empty separator.
    fn write_blank(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullWriter;

impl Writer for NullWriter {
    fn write_names(&mut self, _names: &[String]) -> io::Result<()> {
        Ok(())
    }

    fn write_values(&mut self, _values: &[f64]) -> io::Result<()> {
        Ok(())
    }
}

/// A writer shared between chains. Every call holds the lock for its whole
/// duration, so rows of different chains never interleave.
impl<W: Writer> Writer for Arc<Mutex<W>> {
    fn write_names(&mut self, names: &[String]) -> io::Result<()> {
        self.lock().expect("Poisoned lock").write_names(names)
    }

    fn write_values(&mut self, values: &[f64]) -> io::Result<()> {
        self.lock().expect("Poisoned lock").write_values(values)
    }

    fn write_message(&mut self, message: &str) -> io::Result<()> {
        self.lock().expect("Poisoned lock").write_message(message)
    }

    fn write_blank(&mut self) -> io::Result<()> {
        self.lock().expect("Poisoned lock").write_blank()
    }
}

fn check_row_width(expected: Option<usize>, values: &[f64]) -> io::Result<()> {
    match expected {
        Some(width) if width != values.len() => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "Row has {} values but the header has {} names",
                values.len(),
                width
            ),
        )),
        _ => Ok(()),
    }
}
