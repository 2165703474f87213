use half::{bf16, f16};
use tilecl_ir::{ConstantScalarValue, Elem, FloatKind, IntKind, Item, UIntKind};

use crate::error::InterpError;

/// A single lane of a register.
///
/// Values are kept in the widest type of their class and rounded to the element type after every
/// operation, so that `f16` math behaves like `f16` math.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Float(f64),
    Int(i64),
    UInt(u64),
    Bool(bool),
}

impl From<ConstantScalarValue> for Scalar {
    fn from(value: ConstantScalarValue) -> Self {
        match value {
            ConstantScalarValue::Int(val, _) => Scalar::Int(val),
            ConstantScalarValue::Float(val, _) => Scalar::Float(val),
            ConstantScalarValue::UInt(val, _) => Scalar::UInt(val),
            ConstantScalarValue::Bool(val) => Scalar::Bool(val),
        }
    }
}

impl Scalar {
    pub fn as_f64(&self) -> f64 {
        match self {
            Scalar::Float(val) => *val,
            Scalar::Int(val) => *val as f64,
            Scalar::UInt(val) => *val as f64,
            Scalar::Bool(val) => *val as u8 as f64,
        }
    }

    pub fn as_i64(&self) -> i64 {
        match self {
            Scalar::Float(val) => *val as i64,
            Scalar::Int(val) => *val,
            Scalar::UInt(val) => *val as i64,
            Scalar::Bool(val) => *val as i64,
        }
    }

    pub fn as_u64(&self) -> u64 {
        match self {
            Scalar::Float(val) => *val as u64,
            Scalar::Int(val) => *val as u64,
            Scalar::UInt(val) => *val,
            Scalar::Bool(val) => *val as u64,
        }
    }

    pub fn as_bool(&self) -> bool {
        match self {
            Scalar::Float(val) => *val != 0.0,
            Scalar::Int(val) => *val != 0,
            Scalar::UInt(val) => *val != 0,
            Scalar::Bool(val) => *val,
        }
    }

    /// Converts the value to `elem`, rounding floats and wrapping integers.
    pub fn convert(&self, elem: Elem) -> Scalar {
        match elem {
            Elem::Float(kind) => Scalar::Float(round_float(self.as_f64(), kind)),
            Elem::Int(kind) => Scalar::Int(wrap_int(self.as_i64(), kind)),
            Elem::UInt(kind) => Scalar::UInt(wrap_uint(self.as_u64(), kind)),
            Elem::Bool => Scalar::Bool(self.as_bool()),
        }
    }

    /// Reinterprets a signed value as the unsigned integer with the same bits.
    pub fn to_unsigned(&self, elem: Elem) -> Scalar {
        match (self, elem) {
            (Scalar::Int(val), Elem::Int(kind)) => {
                Scalar::UInt(wrap_uint(*val as u64, uint_of(kind)))
            }
            _ => *self,
        }
    }

    /// Writes the little endian representation of the value as `elem`.
    pub fn write_bytes(&self, elem: Elem, out: &mut [u8]) {
        let value = self.convert(elem);
        match elem {
            Elem::Float(FloatKind::F16) => {
                out.copy_from_slice(&f16::from_f64(value.as_f64()).to_le_bytes())
            }
            Elem::Float(FloatKind::BF16) => {
                out.copy_from_slice(&bf16::from_f64(value.as_f64()).to_le_bytes())
            }
            Elem::Float(FloatKind::F32) => {
                out.copy_from_slice(&(value.as_f64() as f32).to_le_bytes())
            }
            Elem::Float(FloatKind::F64) => out.copy_from_slice(&value.as_f64().to_le_bytes()),
            Elem::Int(_) => out.copy_from_slice(&value.as_i64().to_le_bytes()[..elem.size()]),
            Elem::UInt(_) => out.copy_from_slice(&value.as_u64().to_le_bytes()[..elem.size()]),
            Elem::Bool => out[0] = value.as_bool() as u8,
        }
    }

    /// Reads a little endian `elem` out of `bytes`.
    pub fn read_bytes(elem: Elem, bytes: &[u8]) -> Scalar {
        let mut raw = [0u8; 8];
        raw[..bytes.len()].copy_from_slice(bytes);
        let unsigned = u64::from_le_bytes(raw);

        match elem {
            Elem::Float(FloatKind::F16) => Scalar::Float(f16::from_bits(unsigned as u16).to_f64()),
            Elem::Float(FloatKind::BF16) => Scalar::Float(bf16::from_bits(unsigned as u16).to_f64()),
            Elem::Float(FloatKind::F32) => Scalar::Float(f32::from_bits(unsigned as u32) as f64),
            Elem::Float(FloatKind::F64) => Scalar::Float(f64::from_bits(unsigned)),
            Elem::Int(kind) => Scalar::Int(wrap_int(unsigned as i64, kind)),
            Elem::UInt(_) => Scalar::UInt(unsigned),
            Elem::Bool => Scalar::Bool(unsigned != 0),
        }
    }
}

fn round_float(value: f64, kind: FloatKind) -> f64 {
    match kind {
        FloatKind::F16 => f16::from_f64(value).to_f64(),
        FloatKind::BF16 => bf16::from_f64(value).to_f64(),
        FloatKind::F32 => value as f32 as f64,
        FloatKind::F64 => value,
    }
}

fn wrap_int(value: i64, kind: IntKind) -> i64 {
    match kind {
        IntKind::I8 => value as i8 as i64,
        IntKind::I16 => value as i16 as i64,
        IntKind::I32 => value as i32 as i64,
        IntKind::I64 => value,
    }
}

fn wrap_uint(value: u64, kind: UIntKind) -> u64 {
    match kind {
        UIntKind::U8 => value as u8 as u64,
        UIntKind::U16 => value as u16 as u64,
        UIntKind::U32 => value as u32 as u64,
        UIntKind::U64 => value,
    }
}

fn uint_of(kind: IntKind) -> UIntKind {
    match kind {
        IntKind::I8 => UIntKind::U8,
        IntKind::I16 => UIntKind::U16,
        IntKind::I32 => UIntKind::U32,
        IntKind::I64 => UIntKind::U64,
    }
}

/// The content of a register of one thread.
#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    pub item: Item,
    pub lanes: Vec<Scalar>,
}

impl Value {
    pub fn scalar(elem: Elem, value: Scalar) -> Self {
        Self {
            item: Item::new(elem),
            lanes: vec![value.convert(elem)],
        }
    }

    pub fn new(item: Item, lanes: Vec<Scalar>) -> Self {
        let lanes = lanes.into_iter().map(|lane| lane.convert(item.elem)).collect();
        Self { item, lanes }
    }

    /// Lane `index`, scalars are broadcast to every lane.
    pub fn lane(&self, index: usize) -> Scalar {
        match self.lanes.len() {
            1 => self.lanes[0],
            _ => self.lanes[index],
        }
    }

    pub fn first(&self) -> Scalar {
        self.lanes[0]
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let size = self.item.elem.size();
        let mut bytes = vec![0u8; size * self.lanes.len()];
        for (lane, chunk) in self.lanes.iter().zip(bytes.chunks_mut(size)) {
            lane.write_bytes(self.item.elem, chunk);
        }
        bytes
    }

    /// Reads a register of type `item` out of `bytes`, which must hold exactly one register.
    pub fn from_bytes(item: Item, bytes: &[u8]) -> Result<Self, InterpError> {
        let size = item.elem.size();
        if bytes.len() != item.size() {
            return Err(InterpError::Unsupported {
                op: "bitcast",
                item,
            });
        }
        let lanes = bytes
            .chunks(size)
            .map(|chunk| Scalar::read_bytes(item.elem, chunk))
            .collect();

        Ok(Self { item, lanes })
    }
}
