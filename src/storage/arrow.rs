use std::io;
use std::sync::Arc;

use arrow::array::{ArrayBuilder, ArrayRef, Float64Builder, RecordBatch, RecordBatchOptions};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::error::ArrowError;

use super::{check_row_width, Writer};

/// Collects rows into Arrow columns, one `Float64` column per name.
pub struct ArrowWriter {
    names: Vec<String>,
    columns: Vec<Float64Builder>,
    messages: Vec<String>,
    num_rows: usize,
}

impl ArrowWriter {
    pub fn new() -> Self {
        Self {
            names: Vec::new(),
            columns: Vec::new(),
            messages: Vec::new(),
            num_rows: 0,
        }
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    fn schema(&self) -> Arc<Schema> {
        let fields: Vec<Field> = self
            .names
            .iter()
            .map(|name| Field::new(name, DataType::Float64, false))
            .collect();
        Arc::new(Schema::new(fields))
    }

    /// Copy the rows collected so far into a record batch.
    pub fn inspect(&self) -> Result<RecordBatch, ArrowError> {
        let columns: Vec<ArrayRef> = self
            .columns
            .iter()
            .map(|builder| Arc::new(builder.finish_cloned()) as ArrayRef)
            .collect();
        self.batch(columns)
    }

    /// Take all collected rows out as a record batch.
    pub fn finalize(mut self) -> Result<RecordBatch, ArrowError> {
        let columns: Vec<ArrayRef> = self
            .columns
            .iter_mut()
            .map(|builder| ArrayBuilder::finish(builder))
            .collect();
        self.batch(columns)
    }

    fn batch(&self, columns: Vec<ArrayRef>) -> Result<RecordBatch, ArrowError> {
        let options = RecordBatchOptions::new().with_row_count(Some(self.num_rows));
        RecordBatch::try_new_with_options(self.schema(), columns, &options)
    }
}

impl Default for ArrowWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl Writer for ArrowWriter {
    fn write_names(&mut self, names: &[String]) -> io::Result<()> {
        if self.num_rows > 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Header must be written before the first row",
            ));
        }
        self.names = names.to_vec();
        self.columns = names.iter().map(|_| Float64Builder::new()).collect();
        Ok(())
    }

    fn write_values(&mut self, values: &[f64]) -> io::Result<()> {
        check_row_width(Some(self.columns.len()), values)?;
        for (builder, &value) in self.columns.iter_mut().zip(values) {
            builder.append_value(value);
        }
        self.num_rows += 1;
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
    use arrow::array::{Array, Float64Array};
    use pretty_assertions::assert_eq;

    #[test]
    fn builds_record_batch() {
        let mut writer = ArrowWriter::new();
        writer
            .write_names(&["lp__".to_string(), "x".to_string()])
            .unwrap();
        writer.write_values(&[-0.5, 1.0]).unwrap();
        writer.write_values(&[-0.125, 0.5]).unwrap();
        writer.write_message("Adaptation terminated").unwrap();

        let partial = writer.inspect().unwrap();
        assert_eq!(partial.num_rows(), 2);

        writer.write_values(&[-2., 2.]).unwrap();
        assert!(writer.write_names(&["y".to_string()]).is_err());
        assert_eq!(writer.messages().len(), 1);

        let batch = writer.finalize().unwrap();
        assert_eq!(batch.num_rows(), 3);
        assert_eq!(batch.num_columns(), 2);
        let x = batch
            .column_by_name("x")
            .unwrap()
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap();
        assert_eq!(x.len(), 3);
        assert_eq!(x.value(2), 2.);
    }
}
