use fnv::FnvHashMap;
use log::{debug, info, trace};

use crate::ast::{
    Compound, Dec, Exp, ExpKind, FunctionDec, Layout, Operator, Program, Stmt, StmtKind, Storage,
    Var, VarDec,
};
use crate::chunk::{Emitter, Instruction, Opcode, AC, AC1, FP, GP, PC};
use crate::common::CodeGenError;
use crate::vm::{LOWER_BOUND_FAULT, UPPER_BOUND_FAULT};

/// Frame offset of the return address.
pub const RET_FO: i32 = 0;
/// Frame offset of the caller's saved frame pointer.
pub const OFP_FO: i32 = -1;

/// Generates the TM program for an analyzed, error-free `program`.
///
/// The first pass only learns each function's entry address so that calls
/// to functions defined further down can be emitted in the second pass.
pub fn generate(program: &mut Program) -> Result<Vec<Instruction>, CodeGenError> {
    let mut layout = CodeGenerator::new(FnvHashMap::default(), false);
    layout.program(program)?;
    info!("layout pass placed {} functions", layout.entries.len());

    let mut generator = CodeGenerator::new(layout.entries, true);
    generator.program(program)?;
    let code = generator.emitter.finish()?;

    #[cfg(feature = "debug-logging")]
    crate::chunk::disassemble("program", &code);

    Ok(code)
}

pub struct CodeGenerator {
    emitter: Emitter,
    entries: FnvHashMap<String, usize>,
    /// Unknown callees are an error only once every entry is known.
    resolve_calls: bool,
    lower_fault: usize,
    upper_fault: usize,
}

impl CodeGenerator {
    pub fn new(entries: FnvHashMap<String, usize>, resolve_calls: bool) -> Self {
        Self {
            emitter: Emitter::new(),
            entries,
            resolve_calls,
            lower_fault: 0,
            upper_fault: 0,
        }
    }

    fn entry(&self, name: &str) -> Result<usize, CodeGenError> {
        match self.entries.get(name) {
            Some(&address) => Ok(address),
            None if self.resolve_calls => {
                Err(CodeGenError::UnresolvedCalleeAddress(name.to_string()))
            }
            None => Ok(self.emitter.cursor()),
        }
    }

    pub fn program(&mut self, program: &mut Program) -> Result<(), CodeGenError> {
        self.prelude();

        let skip = self.emitter.reserve(1);
        self.runtime_routines();
        let after = self.emitter.cursor();
        self.emitter
            .patch_rm_abs(skip, Opcode::Lda, PC, after, "jump around i/o routines")?;

        for dec in program.decls.iter_mut() {
            match dec {
                Dec::Var(var) => self.global_array(var),
                Dec::Function(f) if f.body.is_some() => self.function(f)?,
                Dec::Function(_) => (),
            }
        }

        self.finale(program.globals_end)
    }

    fn prelude(&mut self) -> () {
        let e = &mut self.emitter;
        e.emit_rm(Opcode::Ld, GP, 0, AC, "load gp with maxaddress");
        e.emit_rm(Opcode::Lda, FP, 0, GP, "copy gp to fp");
        e.emit_rm(Opcode::St, AC, 0, AC, "clear location 0");
    }

    fn runtime_routines(&mut self) -> () {
        let e = &mut self.emitter;
        let input = e.emit_rm(Opcode::St, AC, RET_FO, FP, "input: store return");
        e.emit_ro(Opcode::In, AC, 0, 0, "input integer value");
        e.emit_rm(Opcode::Ld, PC, RET_FO, FP, "return to caller");

        let output = e.emit_rm(Opcode::St, AC, RET_FO, FP, "output: store return");
        e.emit_rm(Opcode::Ld, AC, -2, FP, "load output value");
        e.emit_ro(Opcode::Out, AC, 0, 0, "output integer value");
        e.emit_rm(Opcode::Ld, PC, RET_FO, FP, "return to caller");

        self.entries.insert("input".to_string(), input);
        self.entries.insert("output".to_string(), output);
        self.lower_fault = self.fault_stub(LOWER_BOUND_FAULT, "lower");
        self.upper_fault = self.fault_stub(UPPER_BOUND_FAULT, "upper");
    }

    fn fault_stub(&mut self, code: i64, bound: &str) -> usize {
        let e = &mut self.emitter;
        let start = e.emit_rm(Opcode::Ldc, AC1, 0, 0, &format!("{} bound fault", bound));
        e.emit_rm(Opcode::Ldc, AC, code as i32, 0, "load fault code");
        e.emit_rm(Opcode::St, AC, 0, AC1, "record fault in location 0");
        e.emit_ro(Opcode::Out, AC, 0, 0, "report fault code");
        e.emit_ro(Opcode::Halt, 0, 0, 0, "");
        start
    }

    fn global_array(&mut self, var: &VarDec) -> () {
        if let Some(layout) = var.layout {
            if layout.storage == Storage::Array {
                self.array_sentinel(var, layout, GP);
            }
        }
    }

    fn array_sentinel(&mut self, var: &VarDec, layout: Layout, base: u8) -> () {
        self.emitter.emit_rm(
            Opcode::Ldc,
            AC,
            var.size,
            0,
            &format!("length of array {}", var.name),
        );
        self.emitter
            .emit_rm(Opcode::St, AC, layout.offset, base, "store array length");
    }

    fn function(&mut self, f: &mut FunctionDec) -> Result<(), CodeGenError> {
        let skip = self.emitter.reserve(1);
        let entry = self.emitter.cursor();
        debug!("function '{}' entry at {}", f.name, entry);
        self.entries.insert(f.name.clone(), entry);
        if self.resolve_calls {
            f.entry_address = Some(entry);
        }

        self.emitter.emit_rm(
            Opcode::St,
            AC,
            RET_FO,
            FP,
            &format!("{}: store return", f.name),
        );
        if let Some(body) = &f.body {
            self.compound(body, f.frame_end)?;
        }
        self.emitter
            .emit_rm(Opcode::Ld, PC, RET_FO, FP, "return to caller");

        let after = self.emitter.cursor();
        self.emitter.patch_rm_abs(
            skip,
            Opcode::Lda,
            PC,
            after,
            &format!("jump around {} body", f.name),
        )
    }

    fn finale(&mut self, globals_end: i32) -> Result<(), CodeGenError> {
        let main = match self.entries.get("main") {
            Some(&main) => main,
            None => return Err(CodeGenError::MissingMainFunction),
        };
        let e = &mut self.emitter;
        e.emit_rm(Opcode::St, FP, globals_end + OFP_FO, FP, "push ofp");
        e.emit_rm(Opcode::Lda, FP, globals_end, FP, "push frame");
        e.emit_rm(Opcode::Lda, AC, 1, PC, "load ac with ret ptr");
        e.emit_rm_abs(Opcode::Lda, PC, main, "jump to main loc");
        e.emit_rm(Opcode::Ld, FP, OFP_FO, FP, "pop frame");
        e.emit_ro(Opcode::Halt, 0, 0, 0, "");
        Ok(())
    }

    fn compound(&mut self, compound: &Compound, off: i32) -> Result<(), CodeGenError> {
        for dec in compound.decls.iter() {
            if let Some(layout) = dec.layout {
                if layout.storage == Storage::Array {
                    self.array_sentinel(dec, layout, FP);
                }
            }
        }
        for stmt in compound.stmts.iter() {
            self.statement(stmt, off)?;
        }
        Ok(())
    }

    fn statement(&mut self, stmt: &Stmt, off: i32) -> Result<(), CodeGenError> {
        match &stmt.kind {
            StmtKind::Exp(e) => self.expression(e, off),
            StmtKind::Compound(compound) => self.compound(compound, off),
            StmtKind::If(test, then_branch, else_branch) => {
                self.expression(test, off)?;
                let test_slot = self.emitter.reserve(1);
                self.statement(then_branch, off)?;
                match else_branch {
                    Some(else_branch) => {
                        let exit_slot = self.emitter.reserve(1);
                        let else_start = self.emitter.cursor();
                        self.emitter
                            .patch_rm_abs(test_slot, Opcode::Jeq, AC, else_start, "if: jump to else")?;
                        self.statement(else_branch, off)?;
                        let end = self.emitter.cursor();
                        self.emitter
                            .patch_rm_abs(exit_slot, Opcode::Lda, PC, end, "if: jump to end")
                    }
                    None => {
                        let end = self.emitter.cursor();
                        self.emitter
                            .patch_rm_abs(test_slot, Opcode::Jeq, AC, end, "if: jump to end")
                    }
                }
            }
            StmtKind::While(test, body) => {
                let top = self.emitter.cursor();
                self.expression(test, off)?;
                let test_slot = self.emitter.reserve(1);
                self.statement(body, off)?;
                self.emitter
                    .emit_rm_abs(Opcode::Lda, PC, top, "while: jump back to test");
                let end = self.emitter.cursor();
                self.emitter
                    .patch_rm_abs(test_slot, Opcode::Jeq, AC, end, "while: jump to end")
            }
            StmtKind::Return(value) => {
                if let Some(value) = value {
                    self.expression(value, off)?;
                }
                self.emitter
                    .emit_rm(Opcode::Ld, PC, RET_FO, FP, "return to caller");
                Ok(())
            }
        }
    }

    /// Leaves the value of `e` in `ac`, spilling into cells from `off` down.
    fn expression(&mut self, e: &Exp, off: i32) -> Result<(), CodeGenError> {
        match &e.kind {
            ExpKind::IntLiteral(value) => {
                self.emitter
                    .emit_rm(Opcode::Ldc, AC, *value, 0, "load constant");
            }
            ExpKind::BoolLiteral(value) => {
                self.emitter
                    .emit_rm(Opcode::Ldc, AC, *value as i32, 0, "load boolean");
            }
            ExpKind::Nil => (),
            ExpKind::Var(var) => match &var.index {
                Some(_) => {
                    self.element_address(var, off)?;
                    self.emitter
                        .emit_rm(Opcode::Ld, AC, 0, AC, &format!("load {}[]", var.name));
                }
                None => self.load_variable(var, AC)?,
            },
            ExpKind::Assign(var, rhs) => self.assign(var, rhs, off)?,
            ExpKind::Unary(operator, operand) => {
                self.expression(operand, off)?;
                let e = &mut self.emitter;
                match operator {
                    Operator::Neg => {
                        e.emit_rm(Opcode::Ldc, AC1, 0, 0, "load 0");
                        e.emit_ro(Opcode::Sub, AC, AC1, AC, "negate");
                    }
                    _ => Self::boolean_result(e, Opcode::Jeq, "not"),
                }
            }
            ExpKind::Binary(operator, lhs, rhs) => self.binary(*operator, lhs, rhs, off)?,
            ExpKind::Call(name, args) => self.call(name, args, off)?,
        }
        Ok(())
    }

    /// Turns `ac` into 1 when `ac <jump> 0` holds and 0 otherwise.
    fn boolean_result(e: &mut Emitter, jump: Opcode, what: &str) -> () {
        e.emit_rm(jump, AC, 2, PC, &format!("{}: true case", what));
        e.emit_rm(Opcode::Ldc, AC, 0, 0, "false case");
        e.emit_rm(Opcode::Lda, PC, 1, PC, "unconditional jump");
        e.emit_rm(Opcode::Ldc, AC, 1, 0, "true case");
    }

    fn binary(&mut self, operator: Operator, lhs: &Exp, rhs: &Exp, off: i32) -> Result<(), CodeGenError> {
        if let Operator::And | Operator::Or = operator {
            self.expression(lhs, off)?;
            let slot = self.emitter.reserve(1);
            self.expression(rhs, off)?;
            let end = self.emitter.cursor();
            let (jump, comment) = match operator {
                Operator::And => (Opcode::Jeq, "and: short circuit"),
                _ => (Opcode::Jne, "or: short circuit"),
            };
            return self.emitter.patch_rm_abs(slot, jump, AC, end, comment);
        }

        self.expression(lhs, off)?;
        self.emitter
            .emit_rm(Opcode::St, AC, off, FP, "op: push left");
        self.expression(rhs, off - 1)?;
        self.emitter
            .emit_rm(Opcode::Ld, AC1, off, FP, "op: load left");

        let e = &mut self.emitter;
        let arithmetic = match operator {
            Operator::Add => Some(Opcode::Add),
            Operator::Sub => Some(Opcode::Sub),
            Operator::Mul => Some(Opcode::Mul),
            Operator::Div => Some(Opcode::Div),
            _ => None,
        };
        if let Some(op) = arithmetic {
            e.emit_ro(op, AC, AC1, AC, &format!("op {}", operator.symbol()));
            return Ok(());
        }

        let jump = match operator {
            Operator::Less => Opcode::Jlt,
            Operator::LessEqual => Opcode::Jle,
            Operator::Greater => Opcode::Jgt,
            Operator::GreaterEqual => Opcode::Jge,
            Operator::Equal => Opcode::Jeq,
            Operator::NotEqual => Opcode::Jne,
            _ => {
                return Err(CodeGenError::Internal(format!(
                    "operator {} is not binary",
                    operator.symbol()
                )))
            }
        };
        e.emit_ro(Opcode::Sub, AC, AC1, AC, &format!("op {}", operator.symbol()));
        Self::boolean_result(e, jump, operator.symbol());
        Ok(())
    }

    fn layout_of(var: &Var) -> Result<(Layout, u8), CodeGenError> {
        match var.layout {
            Some(layout) => Ok((layout, if layout.is_global() { GP } else { FP })),
            None => Err(CodeGenError::Internal(format!(
                "variable '{}' has no storage",
                var.name
            ))),
        }
    }

    /// Loads a scalar's value, or an array's sentinel address, into `r`.
    fn load_variable(&mut self, var: &Var, r: u8) -> Result<(), CodeGenError> {
        let (layout, base) = Self::layout_of(var)?;
        let (op, comment) = match layout.storage {
            Storage::Scalar => (Opcode::Ld, format!("load {}", var.name)),
            Storage::Array => (Opcode::Lda, format!("load address of {}", var.name)),
            Storage::ArrayRef => (Opcode::Ld, format!("load reference {}", var.name)),
        };
        self.emitter.emit_rm(op, r, layout.offset, base, &comment);
        Ok(())
    }

    /// Leaves the address of `var[index]` in `ac` after checking both bounds.
    fn element_address(&mut self, var: &Var, off: i32) -> Result<(), CodeGenError> {
        let index = match &var.index {
            Some(index) => index,
            None => {
                return Err(CodeGenError::Internal(format!(
                    "'{}' is not indexed",
                    var.name
                )))
            }
        };
        self.expression(index, off)?;
        self.load_variable(var, AC1)?;
        self.emitter
            .emit_rm(Opcode::Ld, AC1, 0, AC1, "load array length");
        self.emitter
            .emit_ro(Opcode::Sub, AC1, AC, AC1, "index - length");
        let (lower, upper) = (self.lower_fault, self.upper_fault);
        self.emitter
            .emit_rm_abs(Opcode::Jge, AC1, upper, "index too large");
        self.emitter
            .emit_rm_abs(Opcode::Jlt, AC, lower, "index negative");
        self.load_variable(var, AC1)?;
        trace!("bounds-checked access to {}", var.name);
        let e = &mut self.emitter;
        e.emit_ro(Opcode::Add, AC, AC1, AC, "base + index");
        e.emit_rm(Opcode::Lda, AC, 1, AC, "skip length cell");
        Ok(())
    }

    fn assign(&mut self, var: &Var, rhs: &Exp, off: i32) -> Result<(), CodeGenError> {
        if var.index.is_none() {
            self.expression(rhs, off)?;
            let (layout, base) = Self::layout_of(var)?;
            self.emitter.emit_rm(
                Opcode::St,
                AC,
                layout.offset,
                base,
                &format!("assign: store {}", var.name),
            );
            return Ok(());
        }

        self.element_address(var, off)?;
        self.emitter
            .emit_rm(Opcode::St, AC, off, FP, "assign: push address");
        self.expression(rhs, off - 1)?;
        let e = &mut self.emitter;
        e.emit_rm(Opcode::Ld, AC1, off, FP, "assign: load address");
        e.emit_rm(
            Opcode::St,
            AC,
            0,
            AC1,
            &format!("assign: store {}[]", var.name),
        );
        Ok(())
    }

    fn call(&mut self, name: &str, args: &[Exp], off: i32) -> Result<(), CodeGenError> {
        let n = args.len() as i32;
        for (i, arg) in args.iter().enumerate() {
            let i = i as i32;
            self.expression(arg, off - i - 1)?;
            self.emitter
                .emit_rm(Opcode::St, AC, off - i, FP, "call: store argument");
        }
        for i in 0..n {
            self.emitter
                .emit_rm(Opcode::Ld, AC, off - i, FP, "call: load argument");
            self.emitter
                .emit_rm(Opcode::St, AC, off - n - 2 - i, FP, "call: store parameter");
        }

        let entry = self.entry(name)?;
        let e = &mut self.emitter;
        e.emit_rm(Opcode::St, FP, off - n + OFP_FO, FP, "push ofp");
        e.emit_rm(Opcode::Lda, FP, off - n, FP, "push frame");
        e.emit_rm(Opcode::Lda, AC, 1, PC, "load ac with ret ptr");
        e.emit_rm_abs(Opcode::Lda, PC, entry, &format!("jump to {}", name));
        e.emit_rm(Opcode::Ld, FP, OFP_FO, FP, "pop frame");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::type_check::analyze;
    use crate::vm::{Fault, Machine, MachineError};

    fn compile(source: &str) -> Result<(Program, Vec<Instruction>), CodeGenError> {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut program = parse(source).unwrap();
        let analysis = analyze(&mut program, false);
        assert!(analysis.errors.is_empty(), "{:?}", analysis.errors);
        let code = generate(&mut program)?;
        Ok((program, code))
    }

    fn run(source: &str, input: &[i64]) -> Result<Vec<i64>, MachineError> {
        let (_, code) = compile(source).unwrap();
        Machine::new(&code, 1024, 100_000).run_with_input(input)
    }

    fn target(code: &[Instruction], address: usize) -> (Opcode, i64) {
        match &code[address] {
            Instruction::Rm { op, d, s, .. } if *s == PC => (*op, address as i64 + 1 + *d as i64),
            other => panic!("not a pc-relative instruction: {:?}", other),
        }
    }

    #[test]
    fn program_shape() {
        let (program, code) = compile("void main(void) { }").unwrap();
        // prelude, skip, input (3), output (4), two fault stubs (5 each)
        assert_eq!(code[3].op(), Opcode::Lda);
        assert_eq!(target(&code, 3), (Opcode::Lda, 21));
        let main = program.functions().next().unwrap();
        assert_eq!(main.entry_address, Some(22));
        assert_eq!(code.last().map(Instruction::op), Some(Opcode::Halt));
    }

    #[test]
    fn if_else_backpatch_targets() {
        let source = "void main(void) { int a; if (a) output(1); else output(2); }";
        let (program, code) = compile(source).unwrap();
        let entry = program.functions().next().unwrap().entry_address.unwrap();
        // entry: store return, load a, test slot
        let test_slot = entry + 2;
        let (op, else_start) = target(&code, test_slot);
        assert_eq!(op, Opcode::Jeq);
        let exit_slot = else_start as usize - 1;
        let (op, end) = target(&code, exit_slot);
        assert_eq!(op, Opcode::Lda);
        // the else branch is a call sequence like the then branch
        assert_eq!(else_start as usize - test_slot - 1, end as usize - else_start as usize + 1);
        assert_eq!(code[end as usize].op(), Opcode::Ld);
    }

    #[test]
    fn equality_at_runtime() {
        let source = "void main(void) { int a; a = input(); if (a == 2) output(1); else output(0); }";
        assert_eq!(run(source, &[2]).unwrap(), vec![1]);
        assert_eq!(run(source, &[3]).unwrap(), vec![0]);
    }

    #[test]
    fn out_of_bounds_index_faults() {
        let source = "int a[3]; void main(void) { a[5] = 1; output(7); }";
        let (_, code) = compile(source).unwrap();
        let mut machine = Machine::new(&code, 1024, 100_000);
        assert_eq!(
            machine.run_with_input(&[]).unwrap(),
            vec![UPPER_BOUND_FAULT]
        );
        assert_eq!(machine.fault(), Some(Fault::UpperBound));

        let negative = "void main(void) { int b[2]; int i; i = 0 - 1; output(b[i]); }";
        assert_eq!(run(negative, &[]).unwrap(), vec![LOWER_BOUND_FAULT]);
    }

    #[test]
    fn arrays_by_reference_and_recursion() {
        let source = "
            int sum(int v[], int n) {
                if (n == 0) return 0;
                return v[n - 1] + sum(v, n - 1);
            }
            void fill(int v[]) {
                int i;
                i = 0;
                while (i < 4) { v[i] = i * i; i = i + 1; }
            }
            void main(void) {
                int xs[4];
                fill(xs);
                output(sum(xs, 4));
                output(xs[3]);
            }";
        assert_eq!(run(source, &[]).unwrap(), vec![14, 9]);
    }

    #[test]
    fn forward_call_through_prototype() {
        let source = "
            int twice(int x);
            void main(void) { output(twice(input())); }
            int twice(int x) { return x + x; }";
        assert_eq!(run(source, &[21]).unwrap(), vec![42]);
    }

    #[test]
    fn short_circuit_skips_right_operand() {
        let source = "
            bool hit;
            bool mark(void) { hit = true; return true; }
            void main(void) {
                hit = false;
                if (false && mark()) output(1);
                if (hit) output(2); else output(3);
                if (true || mark()) output(4);
                if (~hit) output(5);
            }";
        assert_eq!(run(source, &[]).unwrap(), vec![3, 4, 5]);
    }

    #[test]
    fn globals_are_written_relative_to_gp() {
        let source = "int g; int h[2]; void main(void) { g = 0 - 9; h[1] = 4; }";
        let (_, code) = compile(source).unwrap();
        let mut machine = Machine::new(&code, 256, 10_000);
        machine.run_with_input(&[]).unwrap();
        assert_eq!(machine.global(0), Some(-9));
        assert_eq!(machine.global(-3), Some(2));
        assert_eq!(machine.global(-1), Some(4));
    }

    #[test]
    fn false_condition_takes_else_branch() {
        let source = "int a; void main(void) { if (false) { a = 1; } else { a = 2; } }";
        let (_, code) = compile(source).unwrap();
        let mut machine = Machine::new(&code, 256, 10_000);
        machine.run_with_input(&[]).unwrap();
        assert_eq!(machine.global(0), Some(2));
    }

    #[test]
    fn runaway_recursion_overflows_the_stack() {
        let (_, code) = compile("void f(void) { f(); } void main(void) { f(); }").unwrap();
        let mut machine = Machine::new(&code, 64, 100_000);
        assert!(matches!(
            machine.run_with_input(&[]),
            Err(MachineError::StackOverflow(_))
        ));
        assert_eq!(machine.fault(), None);
    }

    #[test]
    fn missing_main_is_reported() {
        assert!(matches!(
            compile("int f(void) { return 1; }"),
            Err(CodeGenError::MissingMainFunction)
        ));
    }

    #[test]
    fn prototype_without_definition_is_unresolved() {
        match compile("int f(int x); void main(void) { output(f(1)); }") {
            Err(CodeGenError::UnresolvedCalleeAddress(name)) => assert_eq!(name, "f"),
            other => panic!("unexpected {:?}", other.map(|(_, code)| code.len())),
        }
    }

    #[test]
    fn reruns_are_identical() {
        let source = "int g[2]; int f(int a) { return a * 2; } void main(void) { g[0] = f(3); output(g[0]); }";
        let (_, first) = compile(source).unwrap();
        let (_, second) = compile(source).unwrap();
        let render = |code: &[Instruction]| {
            code.iter()
                .enumerate()
                .map(|(i, instr)| instr.listing(i))
                .collect::<Vec<_>>()
        };
        assert_eq!(render(&first), render(&second));
    }
}
