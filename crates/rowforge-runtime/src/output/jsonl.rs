use std::io::Write;

use serde_json::{Map, Value};

use rowforge_core::{FieldValue, Row};

use super::{OutputError, OutputStream};

/// Writes one JSON object per row. References are written as the target id.
pub struct JsonLinesOutputStream<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesOutputStream<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> OutputStream for JsonLinesOutputStream<W> {
    fn write_row(&mut self, row: &Row) -> Result<(), OutputError> {
        let mut object = Map::new();
        object.insert("_table".to_string(), Value::from(row.table()));
        object.insert("id".to_string(), Value::from(row.id()));
        for (name, value) in row.values() {
            object.insert(name.to_string(), json_value(value));
        }
        serde_json::to_writer(&mut self.writer, &Value::Object(object))?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), OutputError> {
        self.writer.flush()?;
        Ok(())
    }
}

fn json_value(value: &FieldValue) -> Value {
    match value {
        FieldValue::Null => Value::Null,
        FieldValue::Bool(value) => Value::from(*value),
        FieldValue::Int(value) => Value::from(*value),
        FieldValue::Float(value) => Value::from(*value),
        FieldValue::Text(value) => Value::from(value.as_str()),
        FieldValue::Date(_) => Value::from(value.to_string()),
        FieldValue::Reference(reference) => Value::from(reference.id()),
    }
}
