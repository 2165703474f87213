use core::fmt::Display;
use core::hash::Hash;

use serde::{Deserialize, Serialize};

use super::{Elem, FloatKind, IntKind, Item, UIntKind};

/// A value in a kernel: a register, a constant, or a hardware builtin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct Variable {
    pub kind: VariableKind,
    pub item: Item,
}

impl Variable {
    pub fn new(kind: VariableKind, item: Item) -> Self {
        Self { kind, item }
    }

    pub fn builtin(builtin: Builtin) -> Self {
        Self::new(VariableKind::Builtin(builtin), Item::new(builtin.elem()))
    }

    pub fn constant(value: ConstantScalarValue) -> Self {
        Self::new(VariableKind::Constant(value), Item::new(value.elem()))
    }

    /// A constant of the [index](Elem::INDEX) type.
    pub fn index(value: usize) -> Self {
        Elem::INDEX.constant_from_u64(value as u64)
    }

    pub fn elem(&self) -> Elem {
        self.item.elem
    }

    pub fn as_const(&self) -> Option<ConstantScalarValue> {
        match self.kind {
            VariableKind::Constant(constant) => Some(constant),
            _ => None,
        }
    }

    /// The value of an integer constant, if this variable is one.
    pub fn as_usize(&self) -> Option<usize> {
        self.as_const().and_then(|value| value.as_u64()).map(|value| value as usize)
    }

    pub fn is_constant(&self) -> bool {
        matches!(self.kind, VariableKind::Constant(_))
    }

    /// The register id, for locals.
    pub fn id(&self) -> Option<Id> {
        match self.kind {
            VariableKind::Local { id } => Some(id),
            _ => None,
        }
    }
}

pub type Id = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VariableKind {
    /// Immutable SSA register, defined exactly once.
    Local { id: Id },
    Constant(ConstantScalarValue),
    Builtin(Builtin),
    /// Device pointer into the global scratch buffer.
    ScratchPointer { offset: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum Builtin {
    ThreadIdxX,
    ThreadIdxY,
    ThreadIdxZ,
    BlockIdxX,
    BlockIdxY,
    BlockIdxZ,
    BlockDimX,
    BlockDimY,
    BlockDimZ,
}

impl Builtin {
    pub fn elem(&self) -> Elem {
        Elem::INDEX
    }
}

impl Display for Builtin {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Builtin::ThreadIdxX => f.write_str("thread_idx.x"),
            Builtin::ThreadIdxY => f.write_str("thread_idx.y"),
            Builtin::ThreadIdxZ => f.write_str("thread_idx.z"),
            Builtin::BlockIdxX => f.write_str("block_idx.x"),
            Builtin::BlockIdxY => f.write_str("block_idx.y"),
            Builtin::BlockIdxZ => f.write_str("block_idx.z"),
            Builtin::BlockDimX => f.write_str("block_dim.x"),
            Builtin::BlockDimY => f.write_str("block_dim.y"),
            Builtin::BlockDimZ => f.write_str("block_dim.z"),
        }
    }
}

/// The scalars are stored with the highest precision possible, but they might get reduced during
/// compilation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum ConstantScalarValue {
    Int(i64, IntKind),
    Float(f64, FloatKind),
    UInt(u64, UIntKind),
    Bool(bool),
}

impl PartialEq for ConstantScalarValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Int(a, ka), Self::Int(b, kb)) => a == b && ka == kb,
            (Self::Float(a, ka), Self::Float(b, kb)) => a.to_bits() == b.to_bits() && ka == kb,
            (Self::UInt(a, ka), Self::UInt(b, kb)) => a == b && ka == kb,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for ConstantScalarValue {}

impl Hash for ConstantScalarValue {
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        core::mem::discriminant(self).hash(state);
        match self {
            Self::Int(val, kind) => {
                val.hash(state);
                kind.hash(state);
            }
            Self::Float(val, kind) => {
                val.to_bits().hash(state);
                kind.hash(state);
            }
            Self::UInt(val, kind) => {
                val.hash(state);
                kind.hash(state);
            }
            Self::Bool(val) => val.hash(state),
        }
    }
}

impl ConstantScalarValue {
    /// Returns the element type of the scalar.
    pub fn elem(&self) -> Elem {
        match self {
            ConstantScalarValue::Int(_, kind) => Elem::Int(*kind),
            ConstantScalarValue::Float(_, kind) => Elem::Float(*kind),
            ConstantScalarValue::UInt(_, kind) => Elem::UInt(*kind),
            ConstantScalarValue::Bool(_) => Elem::Bool,
        }
    }

    /// Returns the value of the scalar as an unsigned integer, for non-negative integers only.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            ConstantScalarValue::UInt(val, _) => Some(*val),
            ConstantScalarValue::Int(val, _) if *val >= 0 => Some(*val as u64),
            _ => None,
        }
    }

    /// Returns the value of the scalar as a signed integer, for integers only.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ConstantScalarValue::UInt(val, _) => Some(*val as i64),
            ConstantScalarValue::Int(val, _) => Some(*val),
            _ => None,
        }
    }

    /// Returns the value of the scalar as a float, for any numeric value.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ConstantScalarValue::Int(val, _) => Some(*val as f64),
            ConstantScalarValue::Float(val, _) => Some(*val),
            ConstantScalarValue::UInt(val, _) => Some(*val as f64),
            ConstantScalarValue::Bool(_) => None,
        }
    }
}

impl Display for ConstantScalarValue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ConstantScalarValue::Int(val, kind) => write!(f, "{val}{}", Elem::Int(*kind)),
            ConstantScalarValue::Float(val, kind) => write!(f, "{val:?}{}", Elem::Float(*kind)),
            ConstantScalarValue::UInt(val, kind) => write!(f, "{val}{}", Elem::UInt(*kind)),
            ConstantScalarValue::Bool(val) => write!(f, "{val}"),
        }
    }
}

impl Display for Variable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.kind {
            VariableKind::Local { id } => write!(f, "%{id}"),
            VariableKind::Constant(value) => write!(f, "{value}"),
            VariableKind::Builtin(builtin) => write!(f, "{builtin}"),
            VariableKind::ScratchPointer { offset } => write!(f, "scratch[{offset}]"),
        }
    }
}

impl From<&Variable> for Variable {
    fn from(value: &Variable) -> Self {
        *value
    }
}
