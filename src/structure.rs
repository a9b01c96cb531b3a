//! Flat field layouts and record values.
//!
//! A `Structure` fixes the field-index space for everything monitored through
//! it: field `i` of every `Record` built from the same structure means the same
//! thing, and change sets address fields by that index.

use std::collections::HashMap;
use std::sync::Arc;

use crate::bitset::BitSet;
use crate::error::ConfigError;
use crate::monitor::Monitored;
use crate::value::Value;

/// One named field of a structure.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    /// Field name, unique within the structure.
    pub name: String,
    /// Value a freshly built record holds in this field.
    pub initial: Value,
}

/// An immutable, ordered set of named fields.
#[derive(Debug, PartialEq)]
pub struct Structure {
    fields: Vec<FieldDef>,
    by_name: HashMap<String, usize>,
}

impl Structure {
    /// Start building a structure.
    #[must_use]
    pub fn builder() -> StructureBuilder {
        StructureBuilder::default()
    }

    /// Number of fields, i.e. the size of the change-set index space.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if the structure has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Index of a field by name.
    #[must_use]
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    /// Name of the field at `index`.
    #[must_use]
    pub fn field_name(&self, index: usize) -> Option<&str> {
        self.fields.get(index).map(|f| f.name.as_str())
    }

    /// Field definitions in index order.
    #[must_use]
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// Names of the fields set in `bits`, in index order.
    #[must_use]
    pub fn names_of<'a>(&'a self, bits: &BitSet) -> Vec<&'a str> {
        bits.iter().filter_map(|i| self.field_name(i)).collect()
    }
}

/// Builder for [`Structure`].
#[derive(Debug, Default)]
pub struct StructureBuilder {
    fields: Vec<FieldDef>,
}

impl StructureBuilder {
    /// Append a field.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, initial: impl Into<Value>) -> Self {
        self.fields.push(FieldDef {
            name: name.into(),
            initial: initial.into(),
        });
        self
    }

    /// Finish the structure.
    ///
    /// Fails if a field name is empty or used twice.
    pub fn build(self) -> Result<Arc<Structure>, ConfigError> {
        let mut by_name = HashMap::with_capacity(self.fields.len());
        for (index, field) in self.fields.iter().enumerate() {
            if field.name.trim().is_empty() {
                return Err(ConfigError::EmptyFieldName { index });
            }
            if by_name.insert(field.name.clone(), index).is_some() {
                return Err(ConfigError::DuplicateField {
                    name: field.name.clone(),
                });
            }
        }
        Ok(Arc::new(Structure {
            fields: self.fields,
            by_name,
        }))
    }
}

/// A value instance of a [`Structure`].
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    structure: Arc<Structure>,
    values: Vec<Value>,
}

impl Record {
    /// Create a record holding every field's initial value.
    #[must_use]
    pub fn new(structure: Arc<Structure>) -> Self {
        let values = structure.fields.iter().map(|f| f.initial.clone()).collect();
        Self { structure, values }
    }

    /// The structure this record was built from.
    #[must_use]
    pub fn structure(&self) -> &Arc<Structure> {
        &self.structure
    }

    /// Field value by index.
    #[must_use]
    pub fn value(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Field value by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.structure.field_index(name).and_then(|i| self.values.get(i))
    }

    /// Set a field by name. Returns false if the structure has no such field.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> bool {
        match self.structure.field_index(name) {
            Some(index) => {
                self.values[index] = value.into();
                true
            }
            None => false,
        }
    }

    /// Builder-style [`Record::set`]; unknown names are ignored.
    #[must_use]
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    /// Set a field by index. Returns false if out of range.
    pub fn set_index(&mut self, index: usize, value: impl Into<Value>) -> bool {
        match self.values.get_mut(index) {
            Some(slot) => {
                *slot = value.into();
                true
            }
            None => false,
        }
    }

    /// Values in index order.
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }
}

impl Monitored for Record {
    fn field_count(&self) -> usize {
        self.values.len()
    }

    fn is_compatible(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.structure, &other.structure) || self.structure == other.structure
    }

    fn diff_into(&self, newer: &Self, changed: &mut BitSet) {
        for (index, (old, new)) in self.values.iter().zip(&newer.values).enumerate() {
            if !old.same_as(new) {
                changed.set(index);
            }
        }
    }

    fn copy_from(&mut self, other: &Self) {
        if !Arc::ptr_eq(&self.structure, &other.structure) {
            self.structure = Arc::clone(&other.structure);
        }
        if self.values.len() == other.values.len() {
            for (dst, src) in self.values.iter_mut().zip(&other.values) {
                dst.assign(src);
            }
        } else {
            self.values.clone_from(&other.values);
        }
    }
}
