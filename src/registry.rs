//! Global naming and layout registry
//!
//! Lowering reads and extends the registry append-only. It outlives a single
//! compilation so that globals, classes, and vtable slots from earlier
//! top-level evaluations stay visible to later ones.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::Serialize;

use crate::ast::{Literal, Type, VarInit};
use crate::error::CompileError;
use crate::Result;

/// Constructor method name; never occupies a vtable slot
pub const INIT: &str = "__init__";

/// Method holding a closure's body
pub const APPLY: &str = "apply";

/// Mangled name of a method: `Class$method`
pub fn mangle(class: &str, method: &str) -> String {
    format!("{}${}", class, method)
}

/// A field's fixed position in an object and its initializer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldSlot {
    /// Word offset inside the object; offset 0 holds the vtable index
    pub offset: u32,
    pub ty: Type,
    pub default: Literal,
}

/// One entry of the shared virtual-method table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VtableEntry {
    /// Mangled method name
    pub name: String,
    /// Parameter count, including the receiver
    pub arity: usize,
}

#[derive(Debug, Clone, Default)]
pub struct GlobalEnv {
    globals: HashMap<String, bool>,
    classes: HashMap<String, IndexMap<String, FieldSlot>>,
    class_indices: HashMap<String, usize>,
    function_names: HashMap<String, String>,
    vtable: Vec<VtableEntry>,
}

impl GlobalEnv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a class's field layout in declaration order, offsets from 1
    pub fn define_class(&mut self, name: &str, fields: &[VarInit]) {
        let layout = fields
            .iter()
            .enumerate()
            .map(|(i, field)| {
                let slot = FieldSlot {
                    offset: i as u32 + 1,
                    ty: field.ty.clone(),
                    default: field.value.clone(),
                };
                (field.name.clone(), slot)
            })
            .collect();
        self.classes.insert(name.to_string(), layout);
    }

    pub fn has_class(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    pub fn layout(&self, class: &str) -> Result<&IndexMap<String, FieldSlot>> {
        self.classes
            .get(class)
            .ok_or_else(|| CompileError::UnknownClass {
                name: class.to_string(),
            })
    }

    pub fn field(&self, class: &str, field: &str) -> Result<&FieldSlot> {
        self.layout(class)?
            .get(field)
            .ok_or_else(|| CompileError::UnknownField {
                class: class.to_string(),
                field: field.to_string(),
            })
    }

    /// Bitmap of reference-typed words; bit i describes word offset i
    pub fn ref_bitmap(&self, class: &str) -> Result<u32> {
        let mut bitmap = 0u32;
        for slot in self.layout(class)?.values() {
            if slot.ty.is_reference() && slot.offset < 32 {
                bitmap |= 1 << slot.offset;
            }
        }
        Ok(bitmap)
    }

    /// Append a class's methods to the vtable and return its start slot.
    ///
    /// A class that is already registered keeps its original range and
    /// nothing is appended.
    pub fn register_methods<'a, I>(&mut self, class: &str, methods: I) -> usize
    where
        I: IntoIterator<Item = (&'a str, usize)>,
    {
        if let Some(&start) = self.class_indices.get(class) {
            return start;
        }
        let start = self.vtable.len();
        for (method, arity) in methods {
            if method == INIT {
                continue;
            }
            self.vtable.push(VtableEntry {
                name: mangle(class, method),
                arity,
            });
        }
        self.class_indices.insert(class.to_string(), start);
        start
    }

    pub fn class_index(&self, class: &str) -> Result<usize> {
        self.class_indices
            .get(class)
            .copied()
            .ok_or_else(|| CompileError::UnknownClass {
                name: class.to_string(),
            })
    }

    /// Absolute vtable slot of `class.method`
    pub fn method_slot(&self, class: &str, method: &str) -> Result<usize> {
        let start = self.class_index(class)?;
        let target = mangle(class, method);
        self.vtable[start..]
            .iter()
            .position(|entry| entry.name == target)
            .map(|i| start + i)
            .ok_or_else(|| CompileError::internal(format!("no vtable slot for `{}`", target)))
    }

    pub fn vtable(&self) -> &[VtableEntry] {
        &self.vtable
    }

    pub fn mark_global(&mut self, name: &str) {
        self.globals.insert(name.to_string(), true);
    }

    pub fn is_global(&self, name: &str) -> bool {
        self.globals.get(name).copied().unwrap_or(false)
    }

    /// `function` is a top-level name or a dotted path for nested
    /// functions (`outer.inner`, `Class.method.inner`)
    pub fn set_closure_name(&mut self, function: &str, class: &str) {
        self.function_names
            .insert(function.to_string(), class.to_string());
    }

    pub fn closure_name(&self, function: &str) -> Option<&str> {
        self.function_names.get(function).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point_fields() -> Vec<VarInit> {
        vec![
            VarInit::new("x", Type::Int, Literal::num(0)),
            VarInit::new("next", Type::class("Point"), Literal::None),
        ]
    }

    #[test]
    fn test_field_offsets_start_after_vtable_word() {
        let mut env = GlobalEnv::new();
        env.define_class("Point", &point_fields());
        assert_eq!(env.field("Point", "x").unwrap().offset, 1);
        assert_eq!(env.field("Point", "next").unwrap().offset, 2);
        assert_eq!(env.ref_bitmap("Point").unwrap(), 0b100);
    }

    #[test]
    fn test_unknown_lookups() {
        let env = GlobalEnv::new();
        assert!(matches!(
            env.field("Nope", "x"),
            Err(CompileError::UnknownClass { .. })
        ));
        let mut env = GlobalEnv::new();
        env.define_class("Point", &point_fields());
        assert!(matches!(
            env.field("Point", "y"),
            Err(CompileError::UnknownField { .. })
        ));
    }

    #[test]
    fn test_vtable_skips_constructor() {
        let mut env = GlobalEnv::new();
        let start = env.register_methods("A", [(INIT, 1), ("get", 1), ("set", 2)]);
        assert_eq!(start, 0);
        assert_eq!(env.vtable().len(), 2);
        assert_eq!(env.vtable()[1].name, "A$set");
        assert_eq!(env.method_slot("A", "set").unwrap(), 1);
    }

    #[test]
    fn test_reregistration_keeps_slots() {
        let mut env = GlobalEnv::new();
        env.register_methods("A", [("get", 1)]);
        let b = env.register_methods("B", [("get", 1)]);
        let again = env.register_methods("A", [("get", 1), ("other", 1)]);
        assert_eq!(again, 0);
        assert_eq!(b, 1);
        assert_eq!(env.vtable().len(), 2);
        assert_eq!(env.method_slot("B", "get").unwrap(), 1);
    }

    #[test]
    fn test_globals() {
        let mut env = GlobalEnv::new();
        env.mark_global("counter");
        assert!(env.is_global("counter"));
        assert!(!env.is_global("local"));
    }
}
