use core::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::{UnaryOperator, Variable};

/// Conversion between element types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum CastKind {
    TruncF,
    ExtF,
    TruncI,
    /// Sign-extend.
    ExtSI,
    /// Zero-extend.
    ExtUI,
    /// Integer to float, signedness taken from the input element.
    IToFP,
    /// Float to integer, signedness taken from the output element.
    FPToI,
}

/// Register level operators.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum Operator {
    Cast(CastOperator),
    /// Reinterprets the bits of the input, the total bit width is preserved.
    Bitcast(UnaryOperator),
    Select(Select),
    /// Broadcasts a scalar to every lane of a vector.
    Splat(UnaryOperator),
    ExtractElement(ExtractElement),
    InsertElement(InsertElement),
    InitVector(VectorInitOperator),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct CastOperator {
    pub input: Variable,
    pub kind: CastKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct Select {
    pub cond: Variable,
    pub then: Variable,
    pub or_else: Variable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct ExtractElement {
    pub vector: Variable,
    pub index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct InsertElement {
    pub vector: Variable,
    pub index: u32,
    pub value: Variable,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct VectorInitOperator {
    pub inputs: Vec<Variable>,
}

impl Display for CastKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            CastKind::TruncF => f.write_str("truncf"),
            CastKind::ExtF => f.write_str("extf"),
            CastKind::TruncI => f.write_str("trunci"),
            CastKind::ExtSI => f.write_str("extsi"),
            CastKind::ExtUI => f.write_str("extui"),
            CastKind::IToFP => f.write_str("itofp"),
            CastKind::FPToI => f.write_str("fptoi"),
        }
    }
}

impl Display for Operator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Operator::Cast(op) => write!(f, "{}({})", op.kind, op.input),
            Operator::Bitcast(op) => write!(f, "bitcast({})", op.input),
            Operator::Select(op) => write!(f, "{} ? {} : {}", op.cond, op.then, op.or_else),
            Operator::Splat(op) => write!(f, "splat({})", op.input),
            Operator::ExtractElement(op) => write!(f, "{}[{}]", op.vector, op.index),
            Operator::InsertElement(op) => {
                write!(f, "insert({}, [{}] = {})", op.vector, op.index, op.value)
            }
            Operator::InitVector(init) => {
                let inits = init
                    .inputs
                    .iter()
                    .map(|input| format!("{input}"))
                    .collect::<Vec<_>>();
                write!(f, "vec({})", inits.join(", "))
            }
        }
    }
}
