use log::{debug, trace};

use crate::ast::{
    Compound, DataType, Dec, Exp, ExpKind, ExpType, FunctionDec, Layout, Operator, Pos, Program,
    Stmt, StmtKind, Storage, Var, VarDec,
};
use crate::common::{SemanticError, SemanticErrorKind};
use crate::scope::{Param, ScopeTable, SymbolInfo};

/// First frame cell available to parameters, below the return address and
/// the saved frame pointer.
pub const INIT_FO: i32 = -2;

/// Lowest offset a declaration may reach, leaving room for scratch cells.
const MIN_OFFSET: i32 = i32::MIN / 2;

/// Outcome of one analysis run.
#[derive(Debug, Default, PartialEq)]
pub struct Analysis {
    pub errors: Vec<SemanticError>,
    /// Symbol dump lines, filled only when scope tracing was requested.
    pub dump: Vec<String>,
}

/// Checks `program` and decorates it with types and storage layout.
pub fn analyze(program: &mut Program, trace_scopes: bool) -> Analysis {
    let mut analyzer = SemanticAnalyzer::new(trace_scopes);
    analyzer.program(program);
    Analysis {
        errors: analyzer.errors,
        dump: analyzer.dump.unwrap_or_default(),
    }
}

pub struct SemanticAnalyzer {
    table: ScopeTable,
    errors: Vec<SemanticError>,
    dump: Option<Vec<String>>,

    // State of the function being analyzed
    function_name: String,
    return_type: Option<DataType>,
    return_seen: bool,

    next_global: i32,
    next_local: i32,
}

impl SemanticAnalyzer {
    pub fn new(trace_scopes: bool) -> Self {
        Self {
            table: ScopeTable::new(),
            errors: Vec::new(),
            dump: if trace_scopes { Some(Vec::new()) } else { None },
            function_name: String::new(),
            return_type: None,
            return_seen: false,
            next_global: 0,
            next_local: INIT_FO,
        }
    }

    fn error(&mut self, kind: SemanticErrorKind, message: String, pos: Pos) -> () {
        debug!("{:?} at {}: {}", kind, pos, message);
        self.errors.push(SemanticError::new(kind, message, pos));
    }

    fn dump_scope(&mut self, header: &str) -> () {
        if let Some(dump) = &mut self.dump {
            let indent = "    ".repeat(self.table.depth() - 1);
            dump.push(format!("{}{}", indent, header));
            for symbol in self.table.current_frame_symbols() {
                dump.push(format!("{}    {}", indent, symbol));
            }
        }
    }

    pub fn program(&mut self, program: &mut Program) -> () {
        for dec in program.decls.iter_mut() {
            match dec {
                Dec::Var(var) => self.var_declaration(var, true),
                Dec::Function(f) => self.function_declaration(f),
            }
        }
        program.globals_end = self.next_global;
        self.dump_scope("Global scope:");
    }

    fn allocate(&mut self, dec: &VarDec, global: bool) -> Layout {
        let (storage, cells) = if dec.size >= 0 {
            (Storage::Array, dec.size)
        } else if dec.type_spec.is_array {
            (Storage::ArrayRef, 0)
        } else {
            (Storage::Scalar, 0)
        };
        let next = if global {
            &mut self.next_global
        } else {
            &mut self.next_local
        };
        let nest_level = if global { 0 } else { 1 };
        // Arrays grow upward from their sentinel cell
        let placed = next
            .checked_sub(cells)
            .and_then(|offset| Some((offset, offset.checked_sub(1)?)))
            .filter(|&(_, end)| end >= MIN_OFFSET);
        match placed {
            Some((offset, end)) => {
                *next = end;
                Layout {
                    nest_level,
                    offset,
                    storage,
                }
            }
            None => {
                let offset = *next;
                self.error(
                    SemanticErrorKind::InvalidArraySize,
                    format!("Array '{}' is too large", dec.name),
                    dec.pos,
                );
                Layout {
                    nest_level,
                    offset,
                    storage,
                }
            }
        }
    }

    fn var_declaration(&mut self, dec: &mut VarDec, global: bool) -> () {
        if dec.type_spec.data_type == DataType::Void && !dec.is_array() {
            self.error(
                SemanticErrorKind::VoidMisuse,
                format!("Variable '{}' cannot have type void", dec.name),
                dec.pos,
            );
        }
        if dec.size == 0 {
            self.error(
                SemanticErrorKind::InvalidArraySize,
                "Array size cannot be 0".to_string(),
                dec.pos,
            );
        }

        let layout = self.allocate(dec, global);
        dec.layout = Some(layout);
        if self
            .table
            .declare(&dec.name, SymbolInfo::variable(&dec.name, dec.exp_type(), layout))
        {
            trace!("declared '{}' at {:?}", dec.name, layout);
        } else {
            self.error(
                SemanticErrorKind::Redeclaration,
                format!("Redeclaration of variable '{}'", dec.name),
                dec.pos,
            );
        }
    }

    fn function_declaration(&mut self, f: &mut FunctionDec) -> () {
        let params = f
            .params
            .iter()
            .map(|p| Param {
                name: p.name.clone(),
                exp_type: p.exp_type(),
            })
            .collect();
        let info = SymbolInfo::function(&f.name, f.result.data_type, params, f.body.is_some());

        let accepted = match self.table.lookup_current(&f.name).cloned() {
            None => self.table.declare(&f.name, info),
            Some(existing) if existing.is_function() && existing.same_signature(&info) => {
                match (existing.defined, info.defined) {
                    (false, true) => self.table.redefine(&f.name, info),
                    (_, false) => true,
                    (true, true) => false,
                }
            }
            Some(_) => false,
        };
        if !accepted {
            self.error(
                SemanticErrorKind::Redeclaration,
                format!("Redeclaration of function '{}'", f.name),
                f.pos,
            );
        }

        debug!("entering function '{}'", f.name);
        self.table.enter_scope();
        self.function_name = f.name.clone();
        self.return_type = Some(f.result.data_type);
        self.return_seen = false;
        self.next_local = INIT_FO;

        for param in f.params.iter_mut() {
            self.parameter(param);
        }

        if let Some(body) = &mut f.body {
            self.compound(body);
            if f.result.data_type != DataType::Void && !self.return_seen {
                self.error(
                    SemanticErrorKind::MissingReturn,
                    format!(
                        "Non-void function '{}' may not return a value in all paths",
                        f.name
                    ),
                    f.pos,
                );
            }
            self.dump_scope(&format!("Function scope of '{}':", f.name));
        }
        f.frame_end = self.next_local;

        self.table.exit_scope();
        self.return_type = None;
        debug!("leaving function '{}' (frame end {})", f.name, f.frame_end);
    }

    fn parameter(&mut self, param: &mut VarDec) -> () {
        if param.type_spec.data_type == DataType::Void && !param.is_array() {
            self.error(
                SemanticErrorKind::VoidMisuse,
                format!("Parameter '{}' cannot have type void", param.name),
                param.pos,
            );
        }
        let layout = self.allocate(param, false);
        param.layout = Some(layout);
        if !self
            .table
            .declare(&param.name, SymbolInfo::variable(&param.name, param.exp_type(), layout))
        {
            self.error(
                SemanticErrorKind::Redeclaration,
                format!("Redeclaration of parameter '{}'", param.name),
                param.pos,
            );
        }
    }

    fn compound(&mut self, compound: &mut Compound) -> () {
        self.table.enter_scope();
        trace!("entering block at depth {}", self.table.depth());
        for dec in compound.decls.iter_mut() {
            self.var_declaration(dec, false);
        }
        for stmt in compound.stmts.iter_mut() {
            self.statement(stmt);
        }
        self.dump_scope("Block scope:");
        self.table.exit_scope();
    }

    fn statement(&mut self, stmt: &mut Stmt) -> () {
        let pos = stmt.pos;
        match &mut stmt.kind {
            StmtKind::Exp(e) => {
                self.expression(e);
            }
            StmtKind::Compound(compound) => self.compound(compound),
            StmtKind::If(test, then_branch, else_branch) => {
                self.test(test, "if");
                self.statement(then_branch);
                if let Some(else_branch) = else_branch {
                    self.statement(else_branch);
                }
            }
            StmtKind::While(test, body) => {
                self.test(test, "while");
                self.statement(body);
            }
            StmtKind::Return(value) => self.return_statement(value.as_mut(), pos),
        }
    }

    fn test(&mut self, test: &mut Exp, construct: &str) -> () {
        let t = self.expression(test);
        if t.is_array || t.data_type == DataType::Void {
            self.error(
                SemanticErrorKind::TypeMismatch,
                format!(
                    "Test condition in {} statement must be int or bool",
                    construct
                ),
                test.pos,
            );
        }
    }

    fn return_statement(&mut self, value: Option<&mut Exp>, pos: Pos) -> () {
        let expected = match self.return_type {
            Some(t) => t,
            None => return,
        };
        match value {
            Some(value) => {
                let t = self.expression(value);
                self.return_seen = true;
                if expected == DataType::Void {
                    self.error(
                        SemanticErrorKind::VoidMisuse,
                        format!(
                            "Void function '{}' cannot return a value",
                            self.function_name
                        ),
                        pos,
                    );
                } else if t != ExpType::scalar(expected) {
                    self.error(
                        SemanticErrorKind::TypeMismatch,
                        format!(
                            "Return type mismatch in function '{}'. Expected {} but got {}",
                            self.function_name, expected, t
                        ),
                        pos,
                    );
                }
            }
            None => {
                if expected != DataType::Void {
                    self.error(
                        SemanticErrorKind::MissingReturn,
                        format!(
                            "Non-void function '{}' must return a value",
                            self.function_name
                        ),
                        pos,
                    );
                }
            }
        }
    }

    /// Types `e`, records the result on the node and returns it.
    fn expression(&mut self, e: &mut Exp) -> ExpType {
        let pos = e.pos;
        let t = match &mut e.kind {
            ExpKind::IntLiteral(_) => ExpType::scalar(DataType::Int),
            ExpKind::BoolLiteral(_) => ExpType::scalar(DataType::Bool),
            ExpKind::Nil => ExpType::scalar(DataType::Void),
            ExpKind::Var(var) => self.variable(var),
            ExpKind::Assign(var, rhs) => {
                let lhs_type = self.variable(var);
                let rhs_type = self.expression(rhs);
                if lhs_type.data_type == DataType::Void || rhs_type.data_type == DataType::Void {
                    self.error(
                        SemanticErrorKind::TypeMismatch,
                        "Cannot assign to/from void type".to_string(),
                        pos,
                    );
                } else if lhs_type.is_array || lhs_type != rhs_type {
                    self.error(
                        SemanticErrorKind::TypeMismatch,
                        "Type mismatch in assignment".to_string(),
                        pos,
                    );
                }
                lhs_type
            }
            ExpKind::Unary(operator, operand) => {
                let operator = *operator;
                let operand_type = self.expression(operand);
                let (wanted, message) = match operator {
                    Operator::Not => (
                        DataType::Bool,
                        "Logical NOT operation requires a boolean operand",
                    ),
                    _ => (
                        DataType::Int,
                        "Unary minus operation requires an integer operand",
                    ),
                };
                if operand_type != ExpType::scalar(wanted) {
                    self.error(SemanticErrorKind::TypeMismatch, message.to_string(), pos);
                }
                ExpType::scalar(wanted)
            }
            ExpKind::Binary(operator, lhs, rhs) => {
                let operator = *operator;
                let lhs_type = self.expression(lhs);
                let rhs_type = self.expression(rhs);
                self.binary(operator, lhs_type, rhs_type, pos)
            }
            ExpKind::Call(name, args) => {
                let arg_types: Vec<ExpType> =
                    args.iter_mut().map(|arg| self.expression(arg)).collect();
                self.call(name, &arg_types, pos)
            }
        };
        e.exp_type = Some(t);
        t
    }

    fn binary(&mut self, operator: Operator, lhs: ExpType, rhs: ExpType, pos: Pos) -> ExpType {
        let int = ExpType::scalar(DataType::Int);
        let bool = ExpType::scalar(DataType::Bool);
        let (ok, result, message) = match operator {
            Operator::Add | Operator::Sub | Operator::Mul | Operator::Div => (
                lhs == int && rhs == int,
                int,
                "Arithmetic operations require integer operands",
            ),
            Operator::And | Operator::Or => (
                lhs == bool && rhs == bool,
                bool,
                "Logical operations require boolean operands",
            ),
            _ => (
                lhs == rhs && !lhs.is_array && lhs.data_type != DataType::Void,
                bool,
                "Comparison operations require operands of the same type",
            ),
        };
        if !ok {
            self.error(SemanticErrorKind::TypeMismatch, message.to_string(), pos);
        }
        result
    }

    fn call(&mut self, name: &str, arg_types: &[ExpType], pos: Pos) -> ExpType {
        let callee = match self.table.lookup(name) {
            Some(symbol) if symbol.is_function() => symbol.clone(),
            Some(_) => {
                self.error(
                    SemanticErrorKind::TypeMismatch,
                    format!("'{}' is not a function", name),
                    pos,
                );
                return ExpType::scalar(DataType::Int);
            }
            None => {
                self.error(
                    SemanticErrorKind::UndefinedSymbol,
                    format!("Undefined function '{}'", name),
                    pos,
                );
                return ExpType::scalar(DataType::Int);
            }
        };

        if callee.params.len() != arg_types.len() {
            self.error(
                SemanticErrorKind::ArityMismatch,
                format!(
                    "Function '{}' expects {} arguments, but got {}",
                    name,
                    callee.params.len(),
                    arg_types.len()
                ),
                pos,
            );
        } else if callee.name == "output" {
            for t in arg_types {
                if *t != ExpType::scalar(DataType::Int) {
                    self.error(
                        SemanticErrorKind::TypeMismatch,
                        "output function requires integer arguments".to_string(),
                        pos,
                    );
                }
            }
        } else {
            for (i, (param, t)) in callee.params.iter().zip(arg_types).enumerate() {
                if param.exp_type != *t {
                    self.error(
                        SemanticErrorKind::TypeMismatch,
                        format!(
                            "Argument {} of function '{}' has wrong type. Expected {} but got {}",
                            i + 1,
                            name,
                            param.exp_type,
                            t
                        ),
                        pos,
                    );
                }
            }
        }
        ExpType::scalar(callee.data_type)
    }

    fn variable(&mut self, var: &mut Var) -> ExpType {
        let symbol = self.table.lookup(&var.name).cloned();
        let index_type = match &mut var.index {
            Some(index) => Some(self.expression(index)),
            None => None,
        };

        let symbol = match symbol {
            Some(symbol) if symbol.is_function() => {
                self.error(
                    SemanticErrorKind::TypeMismatch,
                    format!("'{}' is a function, not a variable", var.name),
                    var.pos,
                );
                return ExpType::scalar(DataType::Int);
            }
            Some(symbol) => symbol,
            None => {
                let what = if var.index.is_some() { "array" } else { "variable" };
                self.error(
                    SemanticErrorKind::UndefinedSymbol,
                    format!("Undefined {} '{}'", what, var.name),
                    var.pos,
                );
                return ExpType::scalar(DataType::Int);
            }
        };
        var.layout = symbol.layout;

        match index_type {
            None => symbol.exp_type(),
            Some(index_type) => {
                if !symbol.is_array {
                    self.error(
                        SemanticErrorKind::NotAnArray,
                        format!("Variable '{}' is not an array", var.name),
                        var.pos,
                    );
                } else if index_type != ExpType::scalar(DataType::Int) {
                    self.error(
                        SemanticErrorKind::TypeMismatch,
                        "Array index must be an integer".to_string(),
                        var.pos,
                    );
                }
                ExpType::scalar(symbol.data_type)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn check(source: &str) -> (Program, Analysis) {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut program = parse(source).unwrap();
        let analysis = analyze(&mut program, false);
        (program, analysis)
    }

    fn kinds(source: &str) -> Vec<SemanticErrorKind> {
        check(source).1.errors.iter().map(|e| e.kind).collect()
    }

    fn function<'a>(program: &'a Program, name: &str) -> &'a FunctionDec {
        program.functions().find(|f| f.name == name).unwrap()
    }

    #[test]
    fn shadowing_resolves_to_innermost() {
        let (program, analysis) =
            check("int x; void main(void) { bool x; x = true; { int x; x = 1; } }");
        assert!(analysis.errors.is_empty(), "{:?}", analysis.errors);
        let body = function(&program, "main").body.as_ref().unwrap();
        match &body.stmts[0].kind {
            StmtKind::Exp(e) => match &e.kind {
                ExpKind::Assign(var, _) => assert_eq!(
                    var.layout,
                    Some(Layout {
                        nest_level: 1,
                        offset: -2,
                        storage: Storage::Scalar
                    })
                ),
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn same_frame_redeclaration_is_reported_once() {
        let (_, analysis) = check("void main(void) { int x; int x; }");
        assert_eq!(analysis.errors.len(), 1);
        assert_eq!(analysis.errors[0].kind, SemanticErrorKind::Redeclaration);
        assert_eq!(analysis.errors[0].pos, Pos::new(0, 25));
        assert_eq!(
            analysis.errors[0].to_string(),
            "Error: Redeclaration of variable 'x' at line 1, column 26"
        );
    }

    #[test]
    fn assigning_bool_to_int_is_one_mismatch() {
        assert_eq!(
            kinds("int a; bool b; void main(void) { a = b; }"),
            vec![SemanticErrorKind::TypeMismatch]
        );
    }

    #[test]
    fn output_requires_int() {
        assert_eq!(
            kinds("void main(void) { output(true); }"),
            vec![SemanticErrorKind::TypeMismatch]
        );
    }

    #[test]
    fn arity_mismatch_skips_argument_checks() {
        let source = "int f(int a, int b) { return a; } void main(void) { f(true); }";
        assert_eq!(kinds(source), vec![SemanticErrorKind::ArityMismatch]);
    }

    #[test]
    fn argument_types_checked_positionally() {
        let (_, analysis) =
            check("void f(int a[], bool b) { } void main(void) { int x; f(x, true); }");
        assert_eq!(analysis.errors.len(), 1);
        assert_eq!(
            analysis.errors[0].message,
            "Argument 1 of function 'f' has wrong type. Expected int[] but got int"
        );
    }

    #[test]
    fn assigns_global_and_frame_layout() {
        let (program, analysis) =
            check("int g; int arr[3]; int h; void f(int a[], int b) { int x; int y[2]; }");
        assert!(analysis.errors.is_empty(), "{:?}", analysis.errors);
        let offsets: Vec<i32> = program
            .decls
            .iter()
            .filter_map(|d| match d {
                Dec::Var(v) => v.layout.map(|l| l.offset),
                _ => None,
            })
            .collect();
        assert_eq!(offsets, vec![0, -4, -5]);
        assert_eq!(program.globals_end, -6);

        let f = function(&program, "f");
        let params: Vec<_> = f.params.iter().map(|p| p.layout.unwrap()).collect();
        assert_eq!(params[0].offset, -2);
        assert_eq!(params[0].storage, Storage::ArrayRef);
        assert_eq!(params[1].offset, -3);
        let locals: Vec<_> = f.body.as_ref().unwrap().decls.iter().map(|d| d.layout.unwrap()).collect();
        assert_eq!(locals[0].offset, -4);
        assert_eq!(locals[1].offset, -7);
        assert_eq!(locals[1].storage, Storage::Array);
        assert_eq!(f.frame_end, -8);
    }

    #[test]
    fn return_tracking_is_best_effort() {
        assert_eq!(
            kinds("int f(void) { } void main(void) { }"),
            vec![SemanticErrorKind::MissingReturn]
        );
        // One value-carrying return anywhere satisfies the check
        assert!(kinds("int f(void) { if (true) return 1; } void main(void) { }").is_empty());
        assert_eq!(
            kinds("int f(void) { return; } void main(void) { }"),
            vec![
                SemanticErrorKind::MissingReturn,
                SemanticErrorKind::MissingReturn
            ]
        );
        assert_eq!(
            kinds("void main(void) { return 1; }"),
            vec![SemanticErrorKind::VoidMisuse]
        );
    }

    #[test]
    fn undefined_symbol_defaults_to_int() {
        assert_eq!(
            kinds("void main(void) { int a; a = q + 1; }"),
            vec![SemanticErrorKind::UndefinedSymbol]
        );
    }

    #[test]
    fn indexing_rules() {
        assert_eq!(
            kinds("int x; void main(void) { x[1] = 2; }"),
            vec![SemanticErrorKind::NotAnArray]
        );
        assert_eq!(
            kinds("int a[2]; void main(void) { a[true] = 2; }"),
            vec![SemanticErrorKind::TypeMismatch]
        );
        assert_eq!(
            kinds("int a[2]; int b[2]; void main(void) { a = b; }"),
            vec![SemanticErrorKind::TypeMismatch]
        );
    }

    #[test]
    fn declaration_checks() {
        assert_eq!(
            kinds("void v; int a[0]; void main(void) { }"),
            vec![
                SemanticErrorKind::VoidMisuse,
                SemanticErrorKind::InvalidArraySize
            ]
        );
        assert_eq!(
            kinds("void f(int a, bool a) { } void main(void) { }"),
            vec![SemanticErrorKind::Redeclaration]
        );
        assert_eq!(
            kinds("int main; void main(void) { }"),
            vec![SemanticErrorKind::Redeclaration]
        );
    }

    #[test]
    fn oversized_arrays_are_rejected() {
        assert_eq!(
            kinds("int a[2147483647]; int b[2]; void main(void) { }"),
            vec![SemanticErrorKind::InvalidArraySize]
        );
        assert_eq!(
            kinds("void main(void) { int a[1000000000]; int b[1000000000]; int c; }"),
            vec![SemanticErrorKind::InvalidArraySize]
        );
        let mut program = parse("int a[2147483647]; int b[2]; void main(void) { }").unwrap();
        let analysis = analyze(&mut program, false);
        assert_eq!(
            analysis.errors[0].to_string(),
            "Error: Array 'a' is too large at line 1, column 1"
        );
        match &program.decls[1] {
            Dec::Var(b) => assert_eq!(b.layout.map(|l| l.offset), Some(-2)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn prototype_completed_by_definition() {
        assert!(kinds("int f(int x); void main(void) { f(1); } int f(int x) { return x; }").is_empty());
        assert_eq!(
            kinds("int f(int x); int f(bool x) { return 1; } void main(void) { }"),
            vec![SemanticErrorKind::Redeclaration]
        );
    }

    #[test]
    fn tests_must_be_scalar_int_or_bool() {
        assert_eq!(
            kinds("int a[2]; void main(void) { while (a) ; }"),
            vec![SemanticErrorKind::TypeMismatch]
        );
        assert!(kinds("void main(void) { int n; if (n) ; }").is_empty());
    }

    #[test]
    fn function_used_as_variable() {
        assert_eq!(
            kinds("void main(void) { int a; a = main; }"),
            vec![SemanticErrorKind::TypeMismatch]
        );
    }

    #[test]
    fn reanalysis_is_idempotent() {
        let source = "int g[4]; int f(int a[]) { return a[0]; } void main(void) { output(f(g)); }";
        let (mut program, first) = check(source);
        let decorated = program.clone();
        let second = analyze(&mut program, false);
        assert_eq!(first, second);
        assert_eq!(decorated, program);
    }

    #[test]
    fn scope_dump_lists_symbols_on_exit() {
        let mut program = parse("int g; void main(void) { int x; }").unwrap();
        let analysis = analyze(&mut program, true);
        assert_eq!(
            analysis.dump,
            vec![
                "        Block scope:",
                "            x : int",
                "    Function scope of 'main':",
                "Global scope:",
                "    Function input : int ()",
                "    Function output : void (x : int)",
                "    g : int",
                "    Function main : void ()",
            ]
        );
    }
}
