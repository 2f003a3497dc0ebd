use std::io;

use super::{check_row_width, Writer};

/// Collects output in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryWriter {
    pub names: Vec<String>,
    pub rows: Vec<Vec<f64>>,
    pub messages: Vec<String>,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// All values of the column called `name`.
    pub fn column(&self, name: &str) -> Option<Vec<f64>> {
        let idx = self.names.iter().position(|n| n == name)?;
        Some(self.rows.iter().map(|row| row[idx]).collect())
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }
}

impl Writer for MemoryWriter {
    fn write_names(&mut self, names: &[String]) -> io::Result<()> {
        self.names = names.to_vec();
        Ok(())
    }

    fn write_values(&mut self, values: &[f64]) -> io::Result<()> {
        let width = (!self.names.is_empty()).then_some(self.names.len());
        check_row_width(width, values)?;
        self.rows.push(values.to_vec());
        Ok(())
    }

    fn write_message(&mut self, message: &str) -> io::Result<()> {
        self.messages.push(message.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn columns() {
        let mut writer = MemoryWriter::new();
        writer
            .write_names(&["lp__".to_string(), "x".to_string()])
            .unwrap();
        writer.write_values(&[-1., 0.5]).unwrap();
        writer.write_values(&[-2., 1.5]).unwrap();
        assert_eq!(writer.column("x"), Some(vec![0.5, 1.5]));
        assert_eq!(writer.column("y"), None);
        assert!(writer.write_values(&[1.]).is_err());
        assert_eq!(writer.num_rows(), 2);
    }

    #[test]
    fn rows_without_header() {
        let mut writer = MemoryWriter::new();
        writer.write_values(&[1., 2., 3.]).unwrap();
        assert_eq!(writer.rows, vec![vec![1., 2., 3.]]);
    }
}
