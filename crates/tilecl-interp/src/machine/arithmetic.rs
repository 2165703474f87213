use tilecl_ir::{
    Arithmetic, BinaryOperator, Bitwise, CastKind, Comparison, Elem, FloatKind, Item, Operator,
    UnaryOperator,
};

use super::BlockMachine;
use crate::{
    error::InterpError,
    value::{Scalar, Value},
};

#[derive(Debug, Clone, Copy)]
enum BinaryKind {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Max,
    Min,
    And,
    Or,
    Xor,
    Equal,
    Lower,
}

impl BinaryKind {
    fn name(&self) -> &'static str {
        match self {
            BinaryKind::Add => "add",
            BinaryKind::Sub => "sub",
            BinaryKind::Mul => "mul",
            BinaryKind::Div => "div",
            BinaryKind::Rem => "rem",
            BinaryKind::Max => "max",
            BinaryKind::Min => "min",
            BinaryKind::And => "and",
            BinaryKind::Or => "or",
            BinaryKind::Xor => "xor",
            BinaryKind::Equal => "equal",
            BinaryKind::Lower => "lower",
        }
    }

    /// Applies the operation on one lane, computed in the class of `elem`.
    fn apply(&self, elem: Elem, lhs: Scalar, rhs: Scalar) -> Result<Scalar, InterpError> {
        let unsupported = || InterpError::Unsupported {
            op: self.name(),
            item: Item::new(elem),
        };

        let value = match elem {
            Elem::Float(_) => {
                let (a, b) = (lhs.as_f64(), rhs.as_f64());
                match self {
                    BinaryKind::Add => Scalar::Float(a + b),
                    BinaryKind::Sub => Scalar::Float(a - b),
                    BinaryKind::Mul => Scalar::Float(a * b),
                    BinaryKind::Div => Scalar::Float(a / b),
                    BinaryKind::Rem => Scalar::Float(a % b),
                    BinaryKind::Max => Scalar::Float(a.max(b)),
                    BinaryKind::Min => Scalar::Float(a.min(b)),
                    BinaryKind::Equal => Scalar::Bool(a == b),
                    BinaryKind::Lower => Scalar::Bool(a < b),
                    BinaryKind::And | BinaryKind::Or | BinaryKind::Xor => return Err(unsupported()),
                }
            }
            Elem::Int(_) => {
                let (a, b) = (lhs.as_i64(), rhs.as_i64());
                match self {
                    BinaryKind::Add => Scalar::Int(a.wrapping_add(b)),
                    BinaryKind::Sub => Scalar::Int(a.wrapping_sub(b)),
                    BinaryKind::Mul => Scalar::Int(a.wrapping_mul(b)),
                    BinaryKind::Div | BinaryKind::Rem if b == 0 => {
                        return Err(InterpError::DivisionByZero)
                    }
                    BinaryKind::Div => Scalar::Int(a.wrapping_div(b)),
                    BinaryKind::Rem => Scalar::Int(a.wrapping_rem(b)),
                    BinaryKind::Max => Scalar::Int(a.max(b)),
                    BinaryKind::Min => Scalar::Int(a.min(b)),
                    BinaryKind::And => Scalar::Int(a & b),
                    BinaryKind::Or => Scalar::Int(a | b),
                    BinaryKind::Xor => Scalar::Int(a ^ b),
                    BinaryKind::Equal => Scalar::Bool(a == b),
                    BinaryKind::Lower => Scalar::Bool(a < b),
                }
            }
            Elem::UInt(_) => {
                let (a, b) = (lhs.as_u64(), rhs.as_u64());
                match self {
                    BinaryKind::Add => Scalar::UInt(a.wrapping_add(b)),
                    BinaryKind::Sub => Scalar::UInt(a.wrapping_sub(b)),
                    BinaryKind::Mul => Scalar::UInt(a.wrapping_mul(b)),
                    BinaryKind::Div | BinaryKind::Rem if b == 0 => {
                        return Err(InterpError::DivisionByZero)
                    }
                    BinaryKind::Div => Scalar::UInt(a / b),
                    BinaryKind::Rem => Scalar::UInt(a % b),
                    BinaryKind::Max => Scalar::UInt(a.max(b)),
                    BinaryKind::Min => Scalar::UInt(a.min(b)),
                    BinaryKind::And => Scalar::UInt(a & b),
                    BinaryKind::Or => Scalar::UInt(a | b),
                    BinaryKind::Xor => Scalar::UInt(a ^ b),
                    BinaryKind::Equal => Scalar::Bool(a == b),
                    BinaryKind::Lower => Scalar::Bool(a < b),
                }
            }
            Elem::Bool => {
                let (a, b) = (lhs.as_bool(), rhs.as_bool());
                match self {
                    BinaryKind::And | BinaryKind::Min => Scalar::Bool(a && b),
                    BinaryKind::Or | BinaryKind::Max => Scalar::Bool(a || b),
                    BinaryKind::Xor => Scalar::Bool(a ^ b),
                    BinaryKind::Equal => Scalar::Bool(a == b),
                    BinaryKind::Lower => Scalar::Bool(!a && b),
                    _ => return Err(unsupported()),
                }
            }
        };

        Ok(value)
    }
}

impl BlockMachine<'_> {
    pub(super) fn visit_arithmetic(
        &self,
        thread: usize,
        arithmetic: &Arithmetic,
        item: Item,
    ) -> Result<Value, InterpError> {
        match arithmetic {
            Arithmetic::Add(op) => self.binary(thread, op, item, BinaryKind::Add),
            Arithmetic::Sub(op) => self.binary(thread, op, item, BinaryKind::Sub),
            Arithmetic::Mul(op) => self.binary(thread, op, item, BinaryKind::Mul),
            Arithmetic::Div(op) => self.binary(thread, op, item, BinaryKind::Div),
            Arithmetic::Rem(op) => self.binary(thread, op, item, BinaryKind::Rem),
            Arithmetic::Max(op) => self.binary(thread, op, item, BinaryKind::Max),
            Arithmetic::Min(op) => self.binary(thread, op, item, BinaryKind::Min),
            Arithmetic::Exp(op) => {
                let input = self.unary_float(thread, op, "exp")?;
                let lanes = input.lanes.iter().map(|x| Scalar::Float(x.as_f64().exp()));
                Ok(Value::new(item, lanes.collect()))
            }
            Arithmetic::Exp2Approx(op) => {
                let input = self.read(thread, &op.input)?;
                if input.item != Item::new(Elem::Float(FloatKind::F32)) {
                    return Err(InterpError::Unsupported {
                        op: "ex2.approx",
                        item: input.item,
                    });
                }
                let x = input.first().as_f64() as f32;
                Ok(Value::scalar(item.elem, Scalar::Float(x.exp2() as f64)))
            }
        }
    }

    pub(super) fn visit_comparison(
        &self,
        thread: usize,
        comparison: &Comparison,
        item: Item,
    ) -> Result<Value, InterpError> {
        match comparison {
            Comparison::Equal(op) => self.binary(thread, op, item, BinaryKind::Equal),
            Comparison::Lower(op) => self.binary(thread, op, item, BinaryKind::Lower),
        }
    }

    pub(super) fn visit_bitwise(
        &self,
        thread: usize,
        bitwise: &Bitwise,
        item: Item,
    ) -> Result<Value, InterpError> {
        match bitwise {
            Bitwise::And(op) => self.binary(thread, op, item, BinaryKind::And),
            Bitwise::Or(op) => self.binary(thread, op, item, BinaryKind::Or),
            Bitwise::Xor(op) => self.binary(thread, op, item, BinaryKind::Xor),
        }
    }

    pub(super) fn visit_operator(
        &self,
        thread: usize,
        operator: &Operator,
        item: Item,
    ) -> Result<Value, InterpError> {
        match operator {
            Operator::Cast(op) => {
                let input = self.read(thread, &op.input)?;
                let source = input.item.elem;
                let lanes = input.lanes.iter().map(|lane| match op.kind {
                    CastKind::ExtUI => lane.to_unsigned(source),
                    _ => *lane,
                });
                Ok(Value::new(item, lanes.collect()))
            }
            Operator::Bitcast(op) => {
                let input = self.read(thread, &op.input)?;
                Value::from_bytes(item, &input.to_bytes())
            }
            Operator::Select(op) => {
                let cond = self.read(thread, &op.cond)?;
                let then = self.read(thread, &op.then)?;
                let or_else = self.read(thread, &op.or_else)?;
                let lanes = (0..item.lanes())
                    .map(|lane| match cond.lane(lane).as_bool() {
                        true => then.lane(lane),
                        false => or_else.lane(lane),
                    })
                    .collect();
                Ok(Value::new(item, lanes))
            }
            Operator::Splat(op) => {
                let input = self.read(thread, &op.input)?;
                Ok(Value::new(item, vec![input.first(); item.lanes()]))
            }
            Operator::ExtractElement(op) => {
                let vector = self.read(thread, &op.vector)?;
                let lane = vector
                    .lanes
                    .get(op.index as usize)
                    .ok_or(InterpError::Unsupported {
                        op: "extract",
                        item: vector.item,
                    })?;
                Ok(Value::scalar(item.elem, *lane))
            }
            Operator::InsertElement(op) => {
                let mut vector = self.read(thread, &op.vector)?;
                let value = self.read(thread, &op.value)?.first();
                let item = vector.item;
                let lane = vector
                    .lanes
                    .get_mut(op.index as usize)
                    .ok_or(InterpError::Unsupported { op: "insert", item })?;
                *lane = value.convert(item.elem);
                Ok(vector)
            }
            Operator::InitVector(op) => {
                let lanes = op
                    .inputs
                    .iter()
                    .map(|input| Ok(self.read(thread, input)?.first()))
                    .collect::<Result<Vec<_>, InterpError>>()?;
                Ok(Value::new(item, lanes))
            }
        }
    }

    fn binary(
        &self,
        thread: usize,
        op: &BinaryOperator,
        item: Item,
        kind: BinaryKind,
    ) -> Result<Value, InterpError> {
        let lhs = self.read(thread, &op.lhs)?;
        let rhs = self.read(thread, &op.rhs)?;
        let elem = lhs.item.elem;
        let lanes = (0..item.lanes())
            .map(|lane| kind.apply(elem, lhs.lane(lane), rhs.lane(lane)))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Value::new(item, lanes))
    }

    fn unary_float(
        &self,
        thread: usize,
        op: &UnaryOperator,
        name: &'static str,
    ) -> Result<Value, InterpError> {
        let input = self.read(thread, &op.input)?;
        match input.item.elem.is_float() {
            true => Ok(input),
            false => Err(InterpError::Unsupported {
                op: name,
                item: input.item,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tilecl_ir::{IntKind, UIntKind};

    #[test]
    fn integer_ops_wrap() {
        let i8 = Elem::Int(IntKind::I8);
        let sum = BinaryKind::Add.apply(i8, Scalar::Int(100), Scalar::Int(100)).unwrap();

        assert_eq!(sum.convert(i8), Scalar::Int(-56));
        assert_eq!(
            BinaryKind::Div.apply(Elem::UInt(UIntKind::U32), Scalar::UInt(1), Scalar::UInt(0)),
            Err(InterpError::DivisionByZero)
        );
    }

    #[test]
    fn float_bitwise_is_rejected() {
        let f32 = Elem::Float(FloatKind::F32);

        assert!(matches!(
            BinaryKind::Xor.apply(f32, Scalar::Float(1.0), Scalar::Float(2.0)),
            Err(InterpError::Unsupported { op: "xor", .. })
        ));
        assert_eq!(
            BinaryKind::Lower.apply(f32, Scalar::Float(1.0), Scalar::Float(2.0)),
            Ok(Scalar::Bool(true))
        );
    }
}
