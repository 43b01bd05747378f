use std::fmt;

use fnv::FnvHashMap;

use crate::ast::{DataType, ExpType, Layout};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SymbolKind {
    Variable,
    Function,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub exp_type: ExpType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SymbolInfo {
    pub name: String,
    pub kind: SymbolKind,
    pub data_type: DataType,
    pub is_array: bool,
    /// Ordered signature, functions only.
    pub params: Vec<Param>,
    /// Variables only.
    pub layout: Option<Layout>,
    /// False for a function known only from its prototype.
    pub defined: bool,
}

impl SymbolInfo {
    pub fn variable(name: &str, exp_type: ExpType, layout: Layout) -> Self {
        Self {
            name: name.to_string(),
            kind: SymbolKind::Variable,
            data_type: exp_type.data_type,
            is_array: exp_type.is_array,
            params: Vec::new(),
            layout: Some(layout),
            defined: true,
        }
    }

    pub fn function(name: &str, return_type: DataType, params: Vec<Param>, defined: bool) -> Self {
        Self {
            name: name.to_string(),
            kind: SymbolKind::Function,
            data_type: return_type,
            is_array: false,
            params,
            layout: None,
            defined,
        }
    }

    pub fn exp_type(&self) -> ExpType {
        ExpType {
            data_type: self.data_type,
            is_array: self.is_array,
        }
    }

    pub fn is_function(&self) -> bool {
        self.kind == SymbolKind::Function
    }

    pub fn same_signature(&self, other: &SymbolInfo) -> bool {
        self.data_type == other.data_type
            && self.params.len() == other.params.len()
            && self
                .params
                .iter()
                .zip(other.params.iter())
                .all(|(a, b)| a.exp_type == b.exp_type)
    }
}

impl fmt::Display for SymbolInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.kind {
            SymbolKind::Variable => write!(f, "{} : {}", self.name, self.exp_type()),
            SymbolKind::Function => {
                write!(f, "Function {} : {} (", self.name, self.data_type)?;
                for (i, param) in self.params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} : {}", param.name, param.exp_type)?;
                }
                write!(f, ")")
            }
        }
    }
}

/// One lexical frame; iteration follows declaration order.
#[derive(Debug, Default)]
pub struct Frame {
    index: FnvHashMap<String, usize>,
    symbols: Vec<SymbolInfo>,
}

impl Frame {
    fn get(&self, name: &str) -> Option<&SymbolInfo> {
        self.index.get(name).map(|&i| &self.symbols[i])
    }

    pub fn symbols(&self) -> &[SymbolInfo] {
        &self.symbols
    }
}

/// Stack of lexical frames. Lookups walk innermost to outermost only.
#[derive(Debug)]
pub struct ScopeTable {
    frames: Vec<Frame>,
}

impl ScopeTable {
    /// Creates the table with its global frame holding `input` and `output`.
    pub fn new() -> Self {
        let mut table = Self {
            frames: vec![Frame::default()],
        };
        table.declare(
            "input",
            SymbolInfo::function("input", DataType::Int, Vec::new(), true),
        );
        table.declare(
            "output",
            SymbolInfo::function(
                "output",
                DataType::Void,
                vec![Param {
                    name: "x".to_string(),
                    exp_type: ExpType::scalar(DataType::Int),
                }],
                true,
            ),
        );
        table
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn enter_scope(&mut self) -> () {
        self.frames.push(Frame::default());
    }

    pub fn exit_scope(&mut self) -> Option<Frame> {
        debug_assert!(!self.frames.is_empty(), "exit_scope on an empty scope stack");
        self.frames.pop()
    }

    /// Returns false, leaving the table untouched, if `name` is already in
    /// the innermost frame.
    pub fn declare(&mut self, name: &str, info: SymbolInfo) -> bool {
        let frame = match self.frames.last_mut() {
            Some(frame) => frame,
            None => return false,
        };
        if frame.index.contains_key(name) {
            return false;
        }
        frame.index.insert(name.to_string(), frame.symbols.len());
        frame.symbols.push(info);
        true
    }

    pub fn lookup(&self, name: &str) -> Option<&SymbolInfo> {
        self.frames.iter().rev().find_map(|frame| frame.get(name))
    }

    pub fn lookup_current(&self, name: &str) -> Option<&SymbolInfo> {
        self.frames.last().and_then(|frame| frame.get(name))
    }

    /// Replaces an entry of the innermost frame in place.
    pub fn redefine(&mut self, name: &str, info: SymbolInfo) -> bool {
        match self.frames.last_mut() {
            Some(frame) => match frame.index.get(name) {
                Some(&i) => {
                    frame.symbols[i] = info;
                    true
                }
                None => false,
            },
            None => false,
        }
    }

    pub fn current_frame_symbols(&self) -> &[SymbolInfo] {
        self.frames
            .last()
            .map(|frame| frame.symbols())
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Storage;
    use proptest::prelude::*;

    fn int_var(name: &str, offset: i32) -> SymbolInfo {
        SymbolInfo::variable(
            name,
            ExpType::scalar(DataType::Int),
            Layout {
                nest_level: 1,
                offset,
                storage: Storage::Scalar,
            },
        )
    }

    fn offset_of(table: &ScopeTable, name: &str) -> Option<i32> {
        table.lookup(name).and_then(|s| s.layout).map(|l| l.offset)
    }

    #[test]
    fn builtins_live_in_global_frame() {
        let table = ScopeTable::new();
        let input = table.lookup("input").unwrap();
        assert!(input.is_function());
        assert_eq!(input.data_type, DataType::Int);
        assert_eq!(table.lookup("output").unwrap().params.len(), 1);
        assert_eq!(table.current_frame_symbols().len(), 2);
    }

    #[test]
    fn redeclaration_in_same_frame_is_rejected() {
        let mut table = ScopeTable::new();
        assert!(table.declare("x", int_var("x", 0)));
        assert!(!table.declare("x", int_var("x", -5)));
        assert_eq!(offset_of(&table, "x"), Some(0));

        table.enter_scope();
        assert!(table.declare("x", int_var("x", -2)));
        assert_eq!(offset_of(&table, "x"), Some(-2));
    }

    #[test]
    fn inner_symbol_shadows_until_exit() {
        let mut table = ScopeTable::new();
        table.declare("x", int_var("x", 0));
        table.enter_scope();
        table.declare("x", int_var("x", -3));
        assert_eq!(offset_of(&table, "x"), Some(-3));
        let popped = table.exit_scope().unwrap();
        assert_eq!(popped.symbols().len(), 1);
        assert_eq!(offset_of(&table, "x"), Some(0));
    }

    #[test]
    fn sibling_scopes_are_invisible() {
        let mut table = ScopeTable::new();
        table.enter_scope();
        table.declare("y", int_var("y", -2));
        table.exit_scope();
        table.enter_scope();
        assert!(table.lookup("y").is_none());
        assert!(table.lookup_current("input").is_none());
    }

    #[test]
    fn symbols_print_like_the_dump() {
        let f = SymbolInfo::function(
            "f",
            DataType::Int,
            vec![
                Param {
                    name: "a".to_string(),
                    exp_type: ExpType::array(DataType::Int),
                },
                Param {
                    name: "b".to_string(),
                    exp_type: ExpType::scalar(DataType::Bool),
                },
            ],
            true,
        );
        assert_eq!(f.to_string(), "Function f : int (a : int[], b : bool)");
        assert_eq!(int_var("x", 0).to_string(), "x : int");
    }

    proptest! {
        #[test]
        fn lookup_sees_innermost_declaration(depth in 1usize..8, name in "[a-z]{1,4}") {
            let mut table = ScopeTable::new();
            for level in 0..depth {
                table.enter_scope();
                prop_assert!(table.declare(&name, int_var(&name, -(level as i32))));
                prop_assert_eq!(offset_of(&table, &name), Some(-(level as i32)));
            }
            for level in (1..depth).rev() {
                table.exit_scope();
                prop_assert_eq!(offset_of(&table, &name), Some(-(level as i32 - 1)));
            }
        }
    }
}
