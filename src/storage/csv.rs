//! CSV output with commented message lines.
//!
//! Header rows are comma separated names, values are written with a fixed
//! number of decimals and messages are prefixed with `# `.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::{check_row_width, Writer};

/// Configuration for CSV output files.
///
/// Files are named `chain_{id}.csv` inside the output directory.
#[derive(Debug, Clone)]
pub struct CsvConfig {
    /// Directory where CSV files will be written
    output_dir: PathBuf,
    /// Number of decimal places for floating point values
    precision: usize,
}

impl CsvConfig {
    /// Create a new CSV configuration.
    ///
    /// # Example
    ///
    /// ```rust
    /// use nuts_runner::CsvConfig;
    /// let config = CsvConfig::new("mcmc_output");
    /// ```
    pub fn new<P: AsRef<Path>>(output_dir: P) -> Self {
        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
            precision: 6,
        }
    }

    /// Set the precision (number of decimal places) for floating point values.
    ///
    /// Default is 6 decimal places.
    pub fn with_precision(mut self, precision: usize) -> Self {
        self.precision = precision;
        self
    }

    /// Create the file for one chain.
    pub fn create_writer(&self, chain_id: u64) -> Result<CsvWriter<BufWriter<File>>> {
        std::fs::create_dir_all(&self.output_dir).with_context(|| {
            format!("Failed to create output directory: {:?}", self.output_dir)
        })?;

        let file_path = self.output_dir.join(format!("chain_{}.csv", chain_id));
        let file = File::create(&file_path)
            .with_context(|| format!("Failed to create CSV file: {:?}", file_path))?;
        Ok(CsvWriter::new(BufWriter::new(file)).with_precision(self.precision))
    }
}

pub struct CsvWriter<W: Write + Send> {
    writer: W,
    precision: usize,
    width: Option<usize>,
}

impl<W: Write + Send> CsvWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            precision: 6,
            width: None,
        }
    }

    pub fn with_precision(mut self, precision: usize) -> Self {
        self.precision = precision;
        self
    }

    pub fn into_inner(mut self) -> io::Result<W> {
        self.writer.flush()?;
        Ok(self.writer)
    }

    fn format_value(&self, value: f64) -> String {
        if value.is_nan() {
            "NA".to_string()
        } else if value.is_infinite() {
            if value > 0.0 { "Inf" } else { "-Inf" }.to_string()
        } else if value.fract() == 0. && value.abs() < 1e15 {
            format!("{}", value as i64)
        } else {
            format!("{:.prec$}", value, prec = self.precision)
        }
    }
}

impl<W: Write + Send> Writer for CsvWriter<W> {
    fn write_names(&mut self, names: &[String]) -> io::Result<()> {
        self.width = Some(names.len());
        writeln!(self.writer, "{}", names.join(","))
    }

    fn write_values(&mut self, values: &[f64]) -> io::Result<()> {
        check_row_width(self.width, values)?;
        let row: Vec<String> = values.iter().map(|&v| self.format_value(v)).collect();
        writeln!(self.writer, "{}", row.join(","))
    }

    fn write_message(&mut self, message: &str) -> io::Result<()> {
        writeln!(self.writer, "# {}", message)
    }

    fn write_blank(&mut self) -> io::Result<()> {
        writeln!(self.writer, "#")
    }
}
