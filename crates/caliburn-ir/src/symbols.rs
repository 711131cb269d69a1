//! Resolved symbols handed to the assembler by the front end.

use std::collections::HashMap;

use crate::assembler::Assembler;
use crate::error::IrError;
use crate::instruction::{Ssa, TypedValue};

/// Everything a resolved name can stand for.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Symbol {
    Module(Box<SymbolTable>),
    Function { ssa: Ssa, ty: Ssa },
    Value(TypedValue),
    Variable { var: Ssa, ty: Ssa },
    Type(Ssa),
    #[default]
    None,
}

impl Symbol {
    /// The value reading this symbol produces, if any.
    pub fn typed_value(&self) -> Option<TypedValue> {
        match *self {
            Self::Function { ssa, ty } => Some(TypedValue::new(ty, ssa)),
            Self::Value(value) => Some(value),
            Self::Variable { var, ty } => Some(TypedValue::new(ty, var)),
            Self::Module(_) | Self::Type(_) | Self::None => None,
        }
    }
}

/// Lexically scoped name table. The outermost scope is never popped.
#[derive(Clone, Debug, PartialEq)]
pub struct SymbolTable {
    scopes: Vec<HashMap<String, Symbol>>,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self {
            scopes: vec![HashMap::new()],
        }
    }
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    pub fn pop_scope(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Adds `name` to the innermost scope. Returns `false` and keeps the
    /// existing entry when the scope already declares it.
    pub fn add(&mut self, name: impl Into<String>, symbol: Symbol) -> bool {
        let Some(scope) = self.scopes.last_mut() else {
            return false;
        };
        match scope.entry(name.into()) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(symbol);
                true
            }
        }
    }

    /// Innermost declaration of `name`.
    pub fn find(&self, name: &str) -> Option<&Symbol> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    /// Resolves `a::b::c` through nested module tables.
    pub fn find_path(&self, path: &[&str]) -> Option<&Symbol> {
        let (last, modules) = path.split_last()?;
        let mut table = self;
        for module in modules {
            match table.find(module)? {
                Symbol::Module(inner) => table = inner.as_ref(),
                _ => return None,
            }
        }
        table.find(last)
    }
}

/// A resolved syntax node the assembler can lower.
pub trait Emit {
    /// Registers any names the node introduces.
    fn declare(&self, _symbols: &mut SymbolTable) -> Result<(), IrError> {
        Ok(())
    }

    fn emit(&self, symbols: &SymbolTable, asm: &mut Assembler) -> Result<TypedValue, IrError>;
}
