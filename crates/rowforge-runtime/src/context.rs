use std::collections::HashMap;
use std::sync::Arc;

use rowforge_core::{FieldValue, Row, RowPointer};
use rowforge_recipe::ObjectTemplate;

use crate::errors::{Result, RuntimeError};

#[derive(Debug, Clone)]
enum FrameRow {
    Building(Row),
    Finished(Arc<Row>),
}

impl FrameRow {
    fn row(&self) -> &Row {
        match self {
            FrameRow::Building(row) => row,
            FrameRow::Finished(row) => row,
        }
    }
}

/// One frame of recipe execution.
///
/// Frames link to the frame that spawned them. Variable lookups walk the
/// chain, so entering a template never copies the enclosing scope.
#[derive(Debug)]
pub struct RuntimeContext<'a> {
    parent: Option<&'a RuntimeContext<'a>>,
    template: Option<&'a ObjectTemplate>,
    row: Option<FrameRow>,
    vars: HashMap<String, FieldValue>,
}

impl<'a> RuntimeContext<'a> {
    pub fn root() -> Self {
        Self {
            parent: None,
            template: None,
            row: None,
            vars: HashMap::new(),
        }
    }

    pub fn child<'b>(&'b self, template: Option<&'b ObjectTemplate>) -> RuntimeContext<'b> {
        RuntimeContext {
            parent: Some(self),
            template,
            row: None,
            vars: HashMap::new(),
        }
    }

    pub fn template(&self) -> Option<&'a ObjectTemplate> {
        self.template
    }

    /// This frame followed by its ancestors.
    pub fn frames(&self) -> impl Iterator<Item = &RuntimeContext<'a>> {
        std::iter::successors(Some(self), |frame| frame.parent)
    }

    /// Bind a variable in this frame, shadowing outer bindings.
    pub fn define(&mut self, name: impl Into<String>, value: FieldValue) {
        self.vars.insert(name.into(), value);
    }

    pub fn lookup_var(&self, name: &str) -> Option<&FieldValue> {
        self.frames().find_map(|frame| frame.vars.get(name))
    }

    pub fn begin_row(&mut self, row: Row) {
        self.row = Some(FrameRow::Building(row));
    }

    pub fn set_field(&mut self, name: &str, value: FieldValue) -> Result<()> {
        match self.row.as_mut() {
            Some(FrameRow::Building(row)) => {
                row.insert(name, value);
                Ok(())
            }
            _ => Err(RuntimeError::ConsistencyViolation(format!(
                "field `{name}` set outside of row construction"
            ))),
        }
    }

    /// Freeze the row under construction; it stays visible to friends.
    pub fn finish_row(&mut self) -> Result<Arc<Row>> {
        match self.row.take() {
            Some(FrameRow::Building(row)) => {
                let row = Arc::new(row);
                self.row = Some(FrameRow::Finished(Arc::clone(&row)));
                Ok(row)
            }
            other => {
                self.row = other;
                Err(RuntimeError::ConsistencyViolation(
                    "no row under construction to finish".to_string(),
                ))
            }
        }
    }

    /// Field of this frame's own row, including `id`.
    pub fn current_row_field(&self, name: &str) -> Option<FieldValue> {
        self.row.as_ref().and_then(|row| row.row().field(name))
    }

    /// Pointer to a row still being built by this frame or an ancestor,
    /// matched by nickname or table name.
    pub fn row_in_progress(&self, name: &str) -> Option<RowPointer> {
        self.frames().find_map(|frame| match (&frame.row, frame.template) {
            (Some(FrameRow::Building(row)), Some(template))
                if template.nickname.as_deref() == Some(name) || template.table == name =>
            {
                Some(row.pointer())
            }
            _ => None,
        })
    }

    /// Copy of a row under construction, as populated so far.
    pub fn snapshot_in_progress(&self, pointer: &RowPointer) -> Option<Arc<Row>> {
        self.frames().find_map(|frame| match &frame.row {
            Some(FrameRow::Building(row))
                if row.id() == pointer.id && row.table() == pointer.table =>
            {
                Some(Arc::new(row.clone()))
            }
            _ => None,
        })
    }
}
