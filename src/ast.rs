use std::fmt;

/// Zero-based source coordinates of a node.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Pos {
    pub row: u32,
    pub col: u32,
}

impl Pos {
    pub fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "line {}, column {}", self.row + 1, self.col + 1)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DataType {
    Int,
    Bool,
    Void,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DataType::Int => write!(f, "int"),
            DataType::Bool => write!(f, "bool"),
            DataType::Void => write!(f, "void"),
        }
    }
}

/// Resolved type of an expression.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ExpType {
    pub data_type: DataType,
    pub is_array: bool,
}

impl ExpType {
    pub fn scalar(data_type: DataType) -> Self {
        Self {
            data_type,
            is_array: false,
        }
    }

    pub fn array(data_type: DataType) -> Self {
        Self {
            data_type,
            is_array: true,
        }
    }
}

impl fmt::Display for ExpType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_array {
            write!(f, "{}[]", self.data_type)
        } else {
            write!(f, "{}", self.data_type)
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Operator {
    Add,
    Sub,
    Mul,
    Div,
    Less,
    Greater,
    LessEqual,
    GreaterEqual,
    Equal,
    NotEqual,
    And,
    Or,

    Not,
    Neg,
}

impl Operator {
    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::Add => "+",
            Operator::Sub | Operator::Neg => "-",
            Operator::Mul => "*",
            Operator::Div => "/",
            Operator::Less => "<",
            Operator::Greater => ">",
            Operator::LessEqual => "<=",
            Operator::GreaterEqual => ">=",
            Operator::Equal => "==",
            Operator::NotEqual => "!=",
            Operator::And => "&&",
            Operator::Or => "||",
            Operator::Not => "!",
        }
    }
}

/// How a variable's storage cell is used by generated code.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Storage {
    Scalar,
    /// The array lives in place; the offset names its sentinel cell.
    Array,
    /// An array parameter; the cell holds the caller's sentinel address.
    ArrayRef,
}

/// Storage assigned by the analyzer, relative to gp (level 0) or fp (level 1).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Layout {
    pub nest_level: u8,
    pub offset: i32,
    pub storage: Storage,
}

impl Layout {
    pub fn is_global(&self) -> bool {
        self.nest_level == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub decls: Vec<Dec>,
    /// Next free global offset; the outermost frame starts here.
    pub globals_end: i32,
}

impl Program {
    pub fn new(decls: Vec<Dec>) -> Self {
        Self {
            decls,
            globals_end: 0,
        }
    }

    pub fn functions(&self) -> impl Iterator<Item = &FunctionDec> {
        self.decls.iter().filter_map(|d| match d {
            Dec::Function(f) => Some(f),
            Dec::Var(_) => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Dec {
    Var(VarDec),
    Function(FunctionDec),
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct TypeSpec {
    pub pos: Pos,
    pub data_type: DataType,
    pub is_array: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarDec {
    pub pos: Pos,
    pub type_spec: TypeSpec,
    pub name: String,
    /// -1 for a scalar, otherwise the declared bound.
    pub size: i32,
    pub layout: Option<Layout>,
}

impl VarDec {
    pub fn new(pos: Pos, type_spec: TypeSpec, name: &str, size: i32) -> Self {
        Self {
            pos,
            type_spec,
            name: name.to_string(),
            size,
            layout: None,
        }
    }

    pub fn is_array(&self) -> bool {
        self.size != -1 || self.type_spec.is_array
    }

    pub fn exp_type(&self) -> ExpType {
        if self.is_array() {
            ExpType::array(self.type_spec.data_type)
        } else {
            ExpType::scalar(self.type_spec.data_type)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDec {
    pub pos: Pos,
    pub result: TypeSpec,
    pub name: String,
    pub params: Vec<VarDec>,
    /// `None` for a prototype.
    pub body: Option<Compound>,
    /// Next free frame offset below the parameters and locals.
    pub frame_end: i32,
    pub entry_address: Option<usize>,
}

impl FunctionDec {
    pub fn new(
        pos: Pos,
        result: TypeSpec,
        name: &str,
        params: Vec<VarDec>,
        body: Option<Compound>,
    ) -> Self {
        Self {
            pos,
            result,
            name: name.to_string(),
            params,
            body,
            frame_end: 0,
            entry_address: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Compound {
    pub pos: Pos,
    pub decls: Vec<VarDec>,
    pub stmts: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub pos: Pos,
    pub kind: StmtKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Exp(Exp),
    Compound(Compound),
    If(Exp, Box<Stmt>, Option<Box<Stmt>>),
    While(Exp, Box<Stmt>),
    Return(Option<Exp>),
}

impl Stmt {
    pub fn new(pos: Pos, kind: StmtKind) -> Self {
        Self { pos, kind }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Var {
    pub pos: Pos,
    pub name: String,
    pub index: Option<Box<Exp>>,
    pub layout: Option<Layout>,
}

impl Var {
    pub fn simple(pos: Pos, name: &str) -> Self {
        Self {
            pos,
            name: name.to_string(),
            index: None,
            layout: None,
        }
    }

    pub fn indexed(pos: Pos, name: &str, index: Exp) -> Self {
        Self {
            pos,
            name: name.to_string(),
            index: Some(Box::new(index)),
            layout: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Exp {
    pub pos: Pos,
    pub exp_type: Option<ExpType>,
    pub kind: ExpKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExpKind {
    IntLiteral(i32),
    BoolLiteral(bool),
    Unary(Operator, Box<Exp>),
    Binary(Operator, Box<Exp>, Box<Exp>),
    Var(Var),
    Assign(Var, Box<Exp>),
    Call(String, Vec<Exp>),
    Nil,
}

impl Exp {
    pub fn new(pos: Pos, kind: ExpKind) -> Self {
        Self {
            pos,
            exp_type: match &kind {
                ExpKind::IntLiteral(_) => Some(ExpType::scalar(DataType::Int)),
                ExpKind::BoolLiteral(_) => Some(ExpType::scalar(DataType::Bool)),
                ExpKind::Nil => Some(ExpType::scalar(DataType::Void)),
                _ => None,
            },
            kind,
        }
    }

    pub fn binary(pos: Pos, operator: Operator, lhs: Exp, rhs: Exp) -> Self {
        Self::new(pos, ExpKind::Binary(operator, Box::new(lhs), Box::new(rhs)))
    }

    pub fn unary(pos: Pos, operator: Operator, operand: Exp) -> Self {
        Self::new(pos, ExpKind::Unary(operator, Box::new(operand)))
    }
}
