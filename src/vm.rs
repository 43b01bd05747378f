use log::trace;
use thiserror::Error;

use crate::chunk::{Instruction, Opcode, FP, GP, PC};

/// Fault code a generated program stores in data cell 0 on a lower-bound
/// index violation.
pub const LOWER_BOUND_FAULT: i64 = -1_000_000;
/// Fault code for an upper-bound index violation.
pub const UPPER_BOUND_FAULT: i64 = -2_000_000;

pub const DEFAULT_MEMORY: usize = 1024;
pub const DEFAULT_MAX_STEPS: usize = 10_000_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MachineError {
    #[error("data address {address} out of range at instruction {at}")]
    DataAddress { address: i64, at: usize },
    #[error("instruction address {0} out of range")]
    InstructionAddress(i64),
    #[error("division by zero at instruction {0}")]
    ZeroDivide(usize),
    #[error("step limit of {0} instructions exceeded")]
    StepLimit(usize),
    #[error("bad input: {0}")]
    Input(String),
    #[error("cannot write output: {0}")]
    Output(String),
    #[error("stack overflow at instruction {0}")]
    StackOverflow(usize),
    #[error("malformed instruction at {0}")]
    Malformed(usize),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Fault {
    LowerBound,
    UpperBound,
}

impl Fault {
    pub fn describe(&self) -> &'static str {
        match self {
            Fault::LowerBound => "array index below lower bound",
            Fault::UpperBound => "array index above upper bound",
        }
    }
}

/// The TM register+memory machine.
///
/// Data cell 0 is reserved for the recorded fault code. Frames grow down
/// from the top of memory, and any access through `fp` or `gp` that reaches
/// cell 0 stops the machine with `StackOverflow`.
pub struct Machine<'a> {
    code: &'a [Instruction],
    reg: [i64; 8],
    dmem: Vec<i64>,
    max_steps: usize,
}

impl<'a> Machine<'a> {
    pub fn new(code: &'a [Instruction], memory: usize, max_steps: usize) -> Self {
        let mut dmem = vec![0; memory.max(1)];
        dmem[0] = dmem.len() as i64 - 1;
        Self {
            code,
            reg: [0; 8],
            dmem,
            max_steps,
        }
    }

    pub fn data(&self, address: usize) -> Option<i64> {
        self.dmem.get(address).copied()
    }

    /// Reads a global variable cell, addressed like generated code does.
    #[cfg(test)]
    pub fn global(&self, offset: i32) -> Option<i64> {
        let address = self.dmem.len() as i64 - 1 + offset as i64;
        if address < 0 {
            None
        } else {
            self.data(address as usize)
        }
    }

    /// The bounds fault recorded by the program, if it hit one.
    pub fn fault(&self) -> Option<Fault> {
        match self.data(0)? {
            LOWER_BOUND_FAULT => Some(Fault::LowerBound),
            UPPER_BOUND_FAULT => Some(Fault::UpperBound),
            _ => None,
        }
    }

    fn address(&self, address: i64, at: usize) -> Result<usize, MachineError> {
        if address < 0 || address as usize >= self.dmem.len() {
            Err(MachineError::DataAddress { address, at })
        } else {
            Ok(address as usize)
        }
    }

    fn operand_address(&self, base: u8, address: i64, at: usize) -> Result<usize, MachineError> {
        if (base == FP || base == GP) && address <= 0 {
            return Err(MachineError::StackOverflow(at));
        }
        self.address(address, at)
    }

    /// Runs until `HALT`, pulling `IN` values from `input` and handing `OUT`
    /// values to `output`. A failing `output` stops the machine.
    pub fn run<I, O>(&mut self, mut input: I, mut output: O) -> Result<(), MachineError>
    where
        I: FnMut() -> Result<i64, MachineError>,
        O: FnMut(i64) -> Result<(), MachineError>,
    {
        let code = self.code;
        for _ in 0..self.max_steps {
            let pc = self.reg[PC as usize];
            if pc < 0 || pc as usize >= code.len() {
                return Err(MachineError::InstructionAddress(pc));
            }
            let at = pc as usize;
            self.reg[PC as usize] = pc + 1;

            #[cfg(feature = "debug-logging")]
            trace!("{} {:?}", code[at].at(at), self.reg);

            match &code[at] {
                Instruction::Ro { op, r, s, t, .. } => {
                    let (r, s, t) = (*r as usize, self.reg[*s as usize], self.reg[*t as usize]);
                    match op {
                        Opcode::Halt => return Ok(()),
                        Opcode::In => self.reg[r] = input()?,
                        Opcode::Out => output(self.reg[r])?,
                        Opcode::Add => self.reg[r] = s.wrapping_add(t),
                        Opcode::Sub => self.reg[r] = s.wrapping_sub(t),
                        Opcode::Mul => self.reg[r] = s.wrapping_mul(t),
                        Opcode::Div => {
                            if t == 0 {
                                return Err(MachineError::ZeroDivide(at));
                            }
                            self.reg[r] = s.wrapping_div(t)
                        }
                        _ => return Err(MachineError::Malformed(at)),
                    }
                }
                Instruction::Rm { op, r, d, s, .. } => {
                    let r = *r as usize;
                    let base = *s;
                    let m = *d as i64 + self.reg[base as usize];
                    let jump = |cond: bool, reg: &mut [i64; 8]| {
                        if cond {
                            reg[PC as usize] = m;
                        }
                    };
                    let value = self.reg[r];
                    match op {
                        Opcode::Ld => self.reg[r] = self.dmem[self.operand_address(base, m, at)?],
                        Opcode::Lda => self.reg[r] = m,
                        Opcode::Ldc => self.reg[r] = *d as i64,
                        Opcode::St => {
                            let address = self.operand_address(base, m, at)?;
                            self.dmem[address] = value;
                        }
                        Opcode::Jlt => jump(value < 0, &mut self.reg),
                        Opcode::Jle => jump(value <= 0, &mut self.reg),
                        Opcode::Jgt => jump(value > 0, &mut self.reg),
                        Opcode::Jge => jump(value >= 0, &mut self.reg),
                        Opcode::Jeq => jump(value == 0, &mut self.reg),
                        Opcode::Jne => jump(value != 0, &mut self.reg),
                        _ => return Err(MachineError::Malformed(at)),
                    }
                }
            }
        }
        trace!("step limit reached at pc {}", self.reg[PC as usize]);
        Err(MachineError::StepLimit(self.max_steps))
    }

    /// Runs with a fixed input list, collecting everything written by `OUT`.
    #[cfg(test)]
    pub fn run_with_input(&mut self, input: &[i64]) -> Result<Vec<i64>, MachineError> {
        let mut values = input.iter().copied();
        let mut outputs = Vec::new();
        self.run(
            || {
                values
                    .next()
                    .ok_or_else(|| MachineError::Input("input exhausted".to_string()))
            },
            |value| {
                outputs.push(value);
                Ok(())
            },
        )?;
        Ok(outputs)
    }
}
