use std::fmt;

use log::trace;

use crate::common::CodeGenError;

pub const AC: u8 = 0;
pub const AC1: u8 = 1;
pub const FP: u8 = 5;
pub const GP: u8 = 6;
pub const PC: u8 = 7;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Opcode {
    // Register-only
    Halt,
    In,
    Out,
    Add,
    Sub,
    Mul,
    Div,

    // Register-memory
    Ld,
    Lda,
    Ldc,
    St,
    Jlt,
    Jle,
    Jgt,
    Jge,
    Jeq,
    Jne,
}

impl Opcode {
    pub fn name(&self) -> &'static str {
        match self {
            Opcode::Halt => "HALT",
            Opcode::In => "IN",
            Opcode::Out => "OUT",
            Opcode::Add => "ADD",
            Opcode::Sub => "SUB",
            Opcode::Mul => "MUL",
            Opcode::Div => "DIV",
            Opcode::Ld => "LD",
            Opcode::Lda => "LDA",
            Opcode::Ldc => "LDC",
            Opcode::St => "ST",
            Opcode::Jlt => "JLT",
            Opcode::Jle => "JLE",
            Opcode::Jgt => "JGT",
            Opcode::Jge => "JGE",
            Opcode::Jeq => "JEQ",
            Opcode::Jne => "JNE",
        }
    }

    pub fn is_register_only(&self) -> bool {
        matches!(
            self,
            Opcode::Halt
                | Opcode::In
                | Opcode::Out
                | Opcode::Add
                | Opcode::Sub
                | Opcode::Mul
                | Opcode::Div
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// `op r, s, t`
    Ro {
        op: Opcode,
        r: u8,
        s: u8,
        t: u8,
        comment: String,
    },
    /// `op r, d(s)`
    Rm {
        op: Opcode,
        r: u8,
        d: i32,
        s: u8,
        comment: String,
    },
}

impl Instruction {
    #[cfg(test)]
    pub fn op(&self) -> Opcode {
        match self {
            Instruction::Ro { op, .. } | Instruction::Rm { op, .. } => *op,
        }
    }

    /// Formats the instruction as one listing line at `address`.
    pub fn listing(&self, address: usize) -> String {
        self.at(address).to_string()
    }

    pub fn at(&self, address: usize) -> Listed {
        Listed {
            address,
            instruction: self,
        }
    }
}

/// An instruction paired with its address for display.
pub struct Listed<'a> {
    address: usize,
    instruction: &'a Instruction,
}

impl<'a> fmt::Display for Listed<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.instruction {
            Instruction::Ro {
                op,
                r,
                s,
                t,
                comment,
            } => write!(
                f,
                "{:3}: {:>5} {}, {}, {}  {}",
                self.address,
                op.name(),
                r,
                s,
                t,
                comment
            ),
            Instruction::Rm {
                op,
                r,
                d,
                s,
                comment,
            } => write!(
                f,
                "{:3}: {:>5} {}, {}({})  {}",
                self.address,
                op.name(),
                r,
                d,
                s,
                comment
            ),
        }
    }
}

/// Emission cursor over an address-indexed instruction buffer.
///
/// `reserve` leaves holes that are later filled by rewinding to them,
/// emitting, and resuming at the high-water mark.
#[derive(Debug, Default)]
pub struct Emitter {
    code: Vec<Option<Instruction>>,
    cursor: usize,
    high_water: usize,
}

impl Emitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn emit(&mut self, instruction: Instruction) -> usize {
        let address = self.cursor;
        if address < self.code.len() {
            self.code[address] = Some(instruction);
        } else {
            self.code.push(Some(instruction));
        }
        self.cursor += 1;
        self.high_water = self.high_water.max(self.cursor);
        address
    }

    pub fn emit_ro(&mut self, op: Opcode, r: u8, s: u8, t: u8, comment: &str) -> usize {
        debug_assert!(op.is_register_only(), "{} is not register-only", op.name());
        self.emit(Instruction::Ro {
            op,
            r,
            s,
            t,
            comment: comment.to_string(),
        })
    }

    pub fn emit_rm(&mut self, op: Opcode, r: u8, d: i32, s: u8, comment: &str) -> usize {
        debug_assert!(!op.is_register_only(), "{} is register-only", op.name());
        self.emit(Instruction::Rm {
            op,
            r,
            d,
            s,
            comment: comment.to_string(),
        })
    }

    /// Emits `op r, d(pc)` where `d` makes the effective address `target`.
    pub fn emit_rm_abs(&mut self, op: Opcode, r: u8, target: usize, comment: &str) -> usize {
        let d = target as i32 - (self.cursor as i32 + 1);
        self.emit_rm(op, r, d, PC, comment)
    }

    /// Skips `n` slots to be filled later; returns the first one.
    pub fn reserve(&mut self, n: usize) -> usize {
        let address = self.cursor;
        self.cursor += n;
        if self.code.len() < self.cursor {
            self.code.resize(self.cursor, None);
        }
        self.high_water = self.high_water.max(self.cursor);
        address
    }

    pub fn rewind(&mut self, address: usize) -> Result<(), CodeGenError> {
        if address > self.high_water {
            return Err(CodeGenError::Internal(format!(
                "rewind to {} beyond high-water mark {}",
                address, self.high_water
            )));
        }
        self.cursor = address;
        Ok(())
    }

    pub fn resume(&mut self) -> () {
        self.cursor = self.high_water;
    }

    /// Fills the reserved `slot` with a jump-style instruction to `target`.
    pub fn patch_rm_abs(
        &mut self,
        slot: usize,
        op: Opcode,
        r: u8,
        target: usize,
        comment: &str,
    ) -> Result<(), CodeGenError> {
        trace!("backpatch {} -> {} at {}", op.name(), target, slot);
        self.rewind(slot)?;
        self.emit_rm_abs(op, r, target, comment);
        self.resume();
        Ok(())
    }

    /// Consumes the emitter, checking that every reserved slot was filled.
    pub fn finish(self) -> Result<Vec<Instruction>, CodeGenError> {
        self.code
            .into_iter()
            .enumerate()
            .map(|(address, slot)| {
                slot.ok_or_else(|| {
                    CodeGenError::Internal(format!(
                        "instruction slot {} was reserved but never filled",
                        address
                    ))
                })
            })
            .collect()
    }
}

#[cfg(feature = "debug-logging")]
pub fn disassemble(name: &str, code: &[Instruction]) -> () {
    eprintln!("== {} ==", name);
    for (address, instruction) in code.iter().enumerate() {
        eprintln!("{}", instruction.at(address));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_both_instruction_shapes() {
        let mut emitter = Emitter::new();
        emitter.emit_rm(Opcode::Ld, GP, 0, AC, "load gp with maxaddress");
        emitter.emit_ro(Opcode::Halt, 0, 0, 0, "");
        let code = emitter.finish().unwrap();
        assert_eq!(code[0].listing(0), "  0:    LD 6, 0(0)  load gp with maxaddress");
        assert_eq!(code[1].listing(1), "  1:  HALT 0, 0, 0  ");
    }

    #[test]
    fn absolute_targets_become_pc_relative() {
        let mut emitter = Emitter::new();
        emitter.reserve(3);
        let address = emitter.emit_rm_abs(Opcode::Lda, PC, 1, "jump back");
        assert_eq!(address, 3);
        let code = {
            emitter.rewind(0).unwrap();
            for _ in 0..3 {
                emitter.emit_ro(Opcode::Halt, 0, 0, 0, "");
            }
            emitter.resume();
            emitter.finish().unwrap()
        };
        match &code[3] {
            Instruction::Rm { d, s, .. } => {
                // pc is already 4 when the jump executes
                assert_eq!(*d, -3);
                assert_eq!(*s, PC);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn backpatch_fills_reserved_slot() {
        let mut emitter = Emitter::new();
        let slot = emitter.reserve(1);
        emitter.emit_rm(Opcode::Ldc, AC, 1, 0, "");
        emitter.emit_rm(Opcode::Ldc, AC, 2, 0, "");
        let target = emitter.cursor();
        emitter
            .patch_rm_abs(slot, Opcode::Jeq, AC, target, "skip")
            .unwrap();
        assert_eq!(emitter.cursor(), 3);
        let code = emitter.finish().unwrap();
        assert_eq!(code.len(), 3);
        assert_eq!(code[0].op(), Opcode::Jeq);
        assert_eq!(code[0].listing(0), "  0:   JEQ 0, 2(7)  skip");
    }

    #[test]
    fn unfilled_slot_is_internal_error() {
        let mut emitter = Emitter::new();
        emitter.reserve(1);
        emitter.emit_ro(Opcode::Halt, 0, 0, 0, "");
        assert!(matches!(
            emitter.finish(),
            Err(CodeGenError::Internal(_))
        ));
    }

    #[test]
    fn rewind_past_high_water_mark_fails() {
        let mut emitter = Emitter::new();
        emitter.emit_ro(Opcode::Halt, 0, 0, 0, "");
        assert!(emitter.rewind(1).is_ok());
        assert!(matches!(emitter.rewind(5), Err(CodeGenError::Internal(_))));
    }

    #[test]
    fn register_only_classification() {
        assert!(Opcode::Div.is_register_only());
        assert!(!Opcode::Jne.is_register_only());
    }
}
