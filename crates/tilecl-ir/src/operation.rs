use core::fmt::Display;

use serde::{Deserialize, Serialize};

use super::{
    BarrierOps, Memory, NonSemantic, Operator, Plane, Synchronization, TmaOps, Variable,
};

/// An operation with an optional output variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instruction {
    pub out: Option<Variable>,
    pub operation: Operation,
}

impl Instruction {
    pub fn new(operation: impl Into<Operation>, out: Variable) -> Self {
        Instruction {
            out: Some(out),
            operation: operation.into(),
        }
    }

    pub fn no_out(operation: impl Into<Operation>) -> Self {
        Instruction {
            out: None,
            operation: operation.into(),
        }
    }

    pub fn out(&self) -> Option<Variable> {
        self.out
    }
}

/// All operations that can be used in a kernel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum Operation {
    Copy(Variable),
    Arithmetic(Arithmetic),
    Comparison(Comparison),
    Bitwise(Bitwise),
    Operator(Operator),
    Memory(Memory),
    Plane(Plane),
    Synchronization(Synchronization),
    Barrier(BarrierOps),
    Tma(TmaOps),
    Branch(Branch),
    NonSemantic(NonSemantic),
    /// Reads the lower 32 bits of the nanosecond global timer.
    GlobalTimer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct BinaryOperator {
    pub lhs: Variable,
    pub rhs: Variable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct UnaryOperator {
    pub input: Variable,
}

/// Arithmetic operations, applied lane by lane on vectors.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum Arithmetic {
    Add(BinaryOperator),
    Sub(BinaryOperator),
    Mul(BinaryOperator),
    Div(BinaryOperator),
    Rem(BinaryOperator),
    Max(BinaryOperator),
    Min(BinaryOperator),
    Exp(UnaryOperator),
    /// Hardware `ex2.approx.f32`, only defined on scalar `f32`.
    Exp2Approx(UnaryOperator),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum Bitwise {
    And(BinaryOperator),
    Or(BinaryOperator),
    Xor(BinaryOperator),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum Comparison {
    Equal(BinaryOperator),
    Lower(BinaryOperator),
}

/// Structured control flow.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Branch {
    /// Runs `body` only for the threads where `cond` holds.
    If {
        cond: Variable,
        body: Vec<Instruction>,
    },
}

impl From<Arithmetic> for Operation {
    fn from(value: Arithmetic) -> Self {
        Operation::Arithmetic(value)
    }
}

impl From<Bitwise> for Operation {
    fn from(value: Bitwise) -> Self {
        Operation::Bitwise(value)
    }
}

impl From<Comparison> for Operation {
    fn from(value: Comparison) -> Self {
        Operation::Comparison(value)
    }
}

impl From<Operator> for Operation {
    fn from(value: Operator) -> Self {
        Operation::Operator(value)
    }
}

impl From<Memory> for Operation {
    fn from(value: Memory) -> Self {
        Operation::Memory(value)
    }
}

impl From<Plane> for Operation {
    fn from(value: Plane) -> Self {
        Operation::Plane(value)
    }
}

impl From<Synchronization> for Operation {
    fn from(value: Synchronization) -> Self {
        Operation::Synchronization(value)
    }
}

impl From<BarrierOps> for Operation {
    fn from(value: BarrierOps) -> Self {
        Operation::Barrier(value)
    }
}

impl From<TmaOps> for Operation {
    fn from(value: TmaOps) -> Self {
        Operation::Tma(value)
    }
}

impl From<Branch> for Operation {
    fn from(value: Branch) -> Self {
        Operation::Branch(value)
    }
}

impl From<NonSemantic> for Operation {
    fn from(value: NonSemantic) -> Self {
        Operation::NonSemantic(value)
    }
}

impl Display for Arithmetic {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Arithmetic::Add(op) => write!(f, "{} + {}", op.lhs, op.rhs),
            Arithmetic::Sub(op) => write!(f, "{} - {}", op.lhs, op.rhs),
            Arithmetic::Mul(op) => write!(f, "{} * {}", op.lhs, op.rhs),
            Arithmetic::Div(op) => write!(f, "{} / {}", op.lhs, op.rhs),
            Arithmetic::Rem(op) => write!(f, "{} % {}", op.lhs, op.rhs),
            Arithmetic::Max(op) => write!(f, "max({}, {})", op.lhs, op.rhs),
            Arithmetic::Min(op) => write!(f, "min({}, {})", op.lhs, op.rhs),
            Arithmetic::Exp(op) => write!(f, "exp({})", op.input),
            Arithmetic::Exp2Approx(op) => write!(f, "ex2.approx({})", op.input),
        }
    }
}

impl Display for Bitwise {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Bitwise::And(op) => write!(f, "{} & {}", op.lhs, op.rhs),
            Bitwise::Or(op) => write!(f, "{} | {}", op.lhs, op.rhs),
            Bitwise::Xor(op) => write!(f, "{} ^ {}", op.lhs, op.rhs),
        }
    }
}

impl Display for Comparison {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Comparison::Equal(op) => write!(f, "{} == {}", op.lhs, op.rhs),
            Comparison::Lower(op) => write!(f, "{} < {}", op.lhs, op.rhs),
        }
    }
}

impl Display for Operation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Operation::Copy(variable) => write!(f, "{variable}"),
            Operation::Arithmetic(op) => write!(f, "{op}"),
            Operation::Comparison(op) => write!(f, "{op}"),
            Operation::Bitwise(op) => write!(f, "{op}"),
            Operation::Operator(op) => write!(f, "{op}"),
            Operation::Memory(op) => write!(f, "{op}"),
            Operation::Plane(op) => write!(f, "{op}"),
            Operation::Synchronization(op) => write!(f, "{op}"),
            Operation::Barrier(op) => write!(f, "{op}"),
            Operation::Tma(op) => write!(f, "{op}"),
            Operation::Branch(Branch::If { cond, body }) => {
                writeln!(f, "if {cond} {{")?;
                for instruction in body {
                    for line in instruction.to_string().lines() {
                        writeln!(f, "    {line}")?;
                    }
                }
                write!(f, "}}")
            }
            Operation::NonSemantic(op) => write!(f, "{op}"),
            Operation::GlobalTimer => write!(f, "global_timer()"),
        }
    }
}

impl Display for Instruction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match &self.out {
            Some(out) => write!(f, "{out}: {} = {}", out.item, self.operation),
            None => write!(f, "{}", self.operation),
        }
    }
}
