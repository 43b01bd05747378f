use std::fmt::Write;

use crate::ast::{Compound, Dec, Exp, ExpKind, FunctionDec, Program, Stmt, StmtKind, Var, VarDec};

const INDENT: usize = 4;

/// Renders the syntax tree, one node per line, children indented.
pub fn dump(program: &Program) -> String {
    let mut printer = TreePrinter {
        out: String::new(),
        level: 0,
    };
    printer.line("Program:");
    printer.nested(|p| {
        for dec in &program.decls {
            match dec {
                Dec::Var(var) => p.var_dec(var),
                Dec::Function(f) => p.function(f),
            }
        }
    });
    printer.out
}

struct TreePrinter {
    out: String,
    level: usize,
}

impl TreePrinter {
    fn line(&mut self, text: &str) -> () {
        // Writing to a String cannot fail
        let _ = writeln!(self.out, "{:width$}{}", "", text, width = self.level * INDENT);
    }

    fn nested<F: FnOnce(&mut Self)>(&mut self, f: F) -> () {
        self.level += 1;
        f(self);
        self.level -= 1;
    }

    fn var_dec(&mut self, var: &VarDec) -> () {
        if var.size >= 0 {
            self.line(&format!(
                "VarDec: {} : {}[{}]",
                var.name, var.type_spec.data_type, var.size
            ));
        } else {
            self.line(&format!("VarDec: {} : {}", var.name, var.exp_type()));
        }
    }

    fn function(&mut self, f: &FunctionDec) -> () {
        self.line(&format!("FunctionDec: {} : {}", f.name, f.result.data_type));
        self.nested(|p| {
            if f.params.is_empty() {
                p.line("Parameters: void");
            } else {
                p.line("Parameters:");
                p.nested(|p| f.params.iter().for_each(|param| p.var_dec(param)));
            }
            match &f.body {
                Some(body) => p.compound(body),
                None => p.line("Prototype"),
            }
        });
    }

    fn compound(&mut self, compound: &Compound) -> () {
        self.line("Compound:");
        self.nested(|p| {
            compound.decls.iter().for_each(|dec| p.var_dec(dec));
            compound.stmts.iter().for_each(|stmt| p.statement(stmt));
        });
    }

    fn statement(&mut self, stmt: &Stmt) -> () {
        match &stmt.kind {
            StmtKind::Exp(e) => self.expression(e),
            StmtKind::Compound(compound) => self.compound(compound),
            StmtKind::If(test, then_branch, else_branch) => {
                self.line("If:");
                self.nested(|p| {
                    p.expression(test);
                    p.statement(then_branch);
                    if let Some(else_branch) = else_branch {
                        p.line("Else:");
                        p.nested(|p| p.statement(else_branch));
                    }
                });
            }
            StmtKind::While(test, body) => {
                self.line("While:");
                self.nested(|p| {
                    p.expression(test);
                    p.statement(body);
                });
            }
            StmtKind::Return(value) => {
                self.line("Return:");
                if let Some(value) = value {
                    self.nested(|p| p.expression(value));
                }
            }
        }
    }

    fn variable(&mut self, var: &Var) -> () {
        self.line(&format!("Var: {}", var.name));
        if let Some(index) = &var.index {
            self.nested(|p| p.expression(index));
        }
    }

    fn expression(&mut self, e: &Exp) -> () {
        match &e.kind {
            ExpKind::IntLiteral(value) => self.line(&format!("Int: {}", value)),
            ExpKind::BoolLiteral(value) => self.line(&format!("Bool: {}", value)),
            ExpKind::Nil => self.line("Nil"),
            ExpKind::Var(var) => self.variable(var),
            ExpKind::Assign(var, rhs) => {
                self.line("Assign:");
                self.nested(|p| {
                    p.variable(var);
                    p.expression(rhs);
                });
            }
            ExpKind::Unary(operator, operand) => {
                self.line(&format!("Unary: {}", operator.symbol()));
                self.nested(|p| p.expression(operand));
            }
            ExpKind::Binary(operator, lhs, rhs) => {
                self.line(&format!("Op: {}", operator.symbol()));
                self.nested(|p| {
                    p.expression(lhs);
                    p.expression(rhs);
                });
            }
            ExpKind::Call(name, args) => {
                self.line(&format!("Call: {}", name));
                self.nested(|p| args.iter().for_each(|arg| p.expression(arg)));
            }
        }
    }
}
