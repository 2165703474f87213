use core::fmt::Display;

use crate::{
    Arithmetic, BinaryOperator, Bitwise, Branch, Builtin, CastKind, CastOperator, Comparison,
    ConstantScalarValue, Elem, ExtractElement, Id, InsertElement, Instruction, Item, MemRef,
    Memory, NonSemantic, Operation, Operator, Plane, Select, Synchronization, UnaryOperator,
    Variable, VariableKind, VectorInitOperator,
};

/// Hands out fresh register ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Allocator {
    next_id: Id,
}

impl Allocator {
    pub fn create_local(&mut self, item: Item) -> Variable {
        let id = self.next_id;
        self.next_id += 1;
        Variable::new(VariableKind::Local { id }, item)
    }

    /// Number of registers allocated so far.
    pub fn num_locals(&self) -> u32 {
        self.next_id
    }
}

/// The scope is the main [instruction](Instruction) and [variable](Variable) container of a
/// kernel body.
///
/// Integer arithmetic on constants is folded eagerly, so that index computations known at code
/// generation time don't show up in the kernel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Scope {
    pub instructions: Vec<Instruction>,
    pub allocator: Allocator,
}

#[derive(Clone, Copy)]
enum Fold {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
}

impl Fold {
    fn unsigned(self, lhs: u64, rhs: u64) -> Option<u64> {
        match self {
            Fold::Add => lhs.checked_add(rhs),
            Fold::Sub => lhs.checked_sub(rhs),
            Fold::Mul => lhs.checked_mul(rhs),
            Fold::Div => lhs.checked_div(rhs),
            Fold::Rem => lhs.checked_rem(rhs),
            Fold::And => Some(lhs & rhs),
            Fold::Or => Some(lhs | rhs),
            Fold::Xor => Some(lhs ^ rhs),
        }
    }

    fn signed(self, lhs: i64, rhs: i64) -> Option<i64> {
        match self {
            Fold::Add => lhs.checked_add(rhs),
            Fold::Sub => lhs.checked_sub(rhs),
            Fold::Mul => lhs.checked_mul(rhs),
            Fold::Div => lhs.checked_div(rhs),
            Fold::Rem => lhs.checked_rem(rhs),
            Fold::And => Some(lhs & rhs),
            Fold::Or => Some(lhs | rhs),
            Fold::Xor => Some(lhs ^ rhs),
        }
    }

    fn constant(self, lhs: &Variable, rhs: &Variable) -> Option<Variable> {
        if lhs.item != rhs.item {
            return None;
        }
        let value = match (lhs.as_const()?, rhs.as_const()?) {
            (ConstantScalarValue::UInt(a, kind), ConstantScalarValue::UInt(b, _)) => {
                ConstantScalarValue::UInt(self.unsigned(a, b)?, kind)
            }
            (ConstantScalarValue::Int(a, kind), ConstantScalarValue::Int(b, _)) => {
                ConstantScalarValue::Int(self.signed(a, b)?, kind)
            }
            _ => return None,
        };
        Some(Variable::constant(value))
    }

    /// `x + 0`, `x - 0`, `x * 1` and `x / 1` are `x`.
    fn identity(self, lhs: &Variable, rhs: &Variable) -> Option<Variable> {
        let rhs = rhs.as_const().and_then(|value| value.as_i64())?;
        match (self, rhs) {
            (Fold::Add | Fold::Sub | Fold::Or | Fold::Xor, 0) => Some(*lhs),
            (Fold::Mul | Fold::Div, 1) => Some(*lhs),
            _ => None,
        }
    }
}

impl Scope {
    /// Create an empty scope.
    pub fn root() -> Self {
        Self::default()
    }

    /// Create a new immutable variable.
    pub fn create_local(&mut self, item: Item) -> Variable {
        self.allocator.create_local(item)
    }

    /// Register an [operation](Operation) without output into the scope.
    pub fn register<T: Into<Operation>>(&mut self, operation: T) {
        self.instructions.push(Instruction::no_out(operation))
    }

    /// Register an [operation](Operation) whose result is written to a fresh variable.
    pub fn assign<T: Into<Operation>>(&mut self, operation: T, item: Item) -> Variable {
        let out = self.create_local(item);
        self.instructions.push(Instruction::new(operation, out));
        out
    }

    /// The thread index inside the block, along the `x` axis.
    pub fn thread_idx(&self) -> Variable {
        Variable::builtin(Builtin::ThreadIdxX)
    }

    pub fn add(&mut self, lhs: Variable, rhs: Variable) -> Variable {
        self.binary(lhs, rhs, Some(Fold::Add), |op| Arithmetic::Add(op).into())
    }

    pub fn sub(&mut self, lhs: Variable, rhs: Variable) -> Variable {
        self.binary(lhs, rhs, Some(Fold::Sub), |op| Arithmetic::Sub(op).into())
    }

    pub fn mul(&mut self, lhs: Variable, rhs: Variable) -> Variable {
        self.binary(lhs, rhs, Some(Fold::Mul), |op| Arithmetic::Mul(op).into())
    }

    pub fn div(&mut self, lhs: Variable, rhs: Variable) -> Variable {
        self.binary(lhs, rhs, Some(Fold::Div), |op| Arithmetic::Div(op).into())
    }

    pub fn rem(&mut self, lhs: Variable, rhs: Variable) -> Variable {
        self.binary(lhs, rhs, Some(Fold::Rem), |op| Arithmetic::Rem(op).into())
    }

    pub fn max(&mut self, lhs: Variable, rhs: Variable) -> Variable {
        self.binary(lhs, rhs, None, |op| Arithmetic::Max(op).into())
    }

    pub fn min(&mut self, lhs: Variable, rhs: Variable) -> Variable {
        self.binary(lhs, rhs, None, |op| Arithmetic::Min(op).into())
    }

    pub fn and(&mut self, lhs: Variable, rhs: Variable) -> Variable {
        self.binary(lhs, rhs, Some(Fold::And), |op| Bitwise::And(op).into())
    }

    pub fn or(&mut self, lhs: Variable, rhs: Variable) -> Variable {
        self.binary(lhs, rhs, Some(Fold::Or), |op| Bitwise::Or(op).into())
    }

    pub fn xor(&mut self, lhs: Variable, rhs: Variable) -> Variable {
        self.binary(lhs, rhs, Some(Fold::Xor), |op| Bitwise::Xor(op).into())
    }

    pub fn exp(&mut self, input: Variable) -> Variable {
        self.assign(Arithmetic::Exp(UnaryOperator { input }), input.item)
    }

    pub fn exp2_approx(&mut self, input: Variable) -> Variable {
        self.assign(Arithmetic::Exp2Approx(UnaryOperator { input }), input.item)
    }

    pub fn cmp_eq(&mut self, lhs: Variable, rhs: Variable) -> Variable {
        let item = lhs.item.with_elem(Elem::Bool);
        self.assign(Comparison::Equal(BinaryOperator { lhs, rhs }), item)
    }

    pub fn cmp_lt(&mut self, lhs: Variable, rhs: Variable) -> Variable {
        let item = lhs.item.with_elem(Elem::Bool);
        self.assign(Comparison::Lower(BinaryOperator { lhs, rhs }), item)
    }

    /// Converts every lane of `input` to `elem`.
    pub fn cast(&mut self, input: Variable, elem: Elem, kind: CastKind) -> Variable {
        let item = input.item.with_elem(elem);
        self.assign(Operator::Cast(CastOperator { input, kind }), item)
    }

    pub fn bitcast(&mut self, input: Variable, item: Item) -> Variable {
        self.assign(Operator::Bitcast(UnaryOperator { input }), item)
    }

    /// Selects between two values, folded away when the condition is a constant.
    pub fn select(&mut self, cond: Variable, then: Variable, or_else: Variable) -> Variable {
        if let Some(ConstantScalarValue::Bool(cond)) = cond.as_const() {
            return if cond { then } else { or_else };
        }

        self.assign(
            Operator::Select(Select {
                cond,
                then,
                or_else,
            }),
            then.item,
        )
    }

    pub fn splat(&mut self, input: Variable, lanes: u8) -> Variable {
        let item = input.item.vectorize(lanes);
        self.assign(Operator::Splat(UnaryOperator { input }), item)
    }

    pub fn extract(&mut self, vector: Variable, index: u32) -> Variable {
        let item = Item::new(vector.elem());
        self.assign(Operator::ExtractElement(ExtractElement { vector, index }), item)
    }

    pub fn insert(&mut self, vector: Variable, index: u32, value: Variable) -> Variable {
        self.assign(
            Operator::InsertElement(InsertElement {
                vector,
                index,
                value,
            }),
            vector.item,
        )
    }

    /// Builds a vector from scalars of the same element type.
    pub fn init_vector(&mut self, inputs: Vec<Variable>) -> Variable {
        let elem = inputs.first().map(|input| input.elem()).unwrap_or(Elem::INDEX);
        let item = Item::vectorized(elem, inputs.len() as u8);
        self.assign(Operator::InitVector(VectorInitOperator { inputs }), item)
    }

    /// Loads `lanes` consecutive elements of the innermost dimension.
    pub fn load(&mut self, memref: &MemRef, indices: Vec<Variable>, lanes: u8) -> Variable {
        let item = Item::vectorized(memref.elem, lanes);
        self.assign(
            Memory::Load {
                memref: memref.clone(),
                indices,
            },
            item,
        )
    }

    pub fn store(&mut self, memref: &MemRef, indices: Vec<Variable>, value: Variable) {
        self.register(Memory::Store {
            memref: memref.clone(),
            indices,
            value,
        })
    }

    pub fn shuffle_xor(&mut self, value: Variable, offset: u32, mask: u32, clamp: u32) -> Variable {
        self.assign(
            Plane::ShuffleXor {
                value,
                offset,
                mask,
                clamp,
            },
            value.item,
        )
    }

    pub fn sync_block(&mut self) {
        self.register(Synchronization::SyncBlock)
    }

    pub fn global_timer(&mut self) -> Variable {
        self.assign(Operation::GlobalTimer, Item::new(Elem::INDEX))
    }

    pub fn comment(&mut self, content: impl Into<String>) {
        self.register(NonSemantic::Comment {
            content: content.into(),
        })
    }

    /// Records the instructions emitted by `func` into a branch taken only by the threads where
    /// `cond` holds.
    pub fn if_then<R>(&mut self, cond: Variable, func: impl FnOnce(&mut Scope) -> R) -> R {
        let outer = core::mem::take(&mut self.instructions);
        let result = func(self);
        let body = core::mem::replace(&mut self.instructions, outer);
        self.register(Branch::If { cond, body });
        result
    }

    fn binary(
        &mut self,
        lhs: Variable,
        rhs: Variable,
        fold: Option<Fold>,
        operation: impl FnOnce(BinaryOperator) -> Operation,
    ) -> Variable {
        if let Some(fold) = fold {
            if let Some(folded) = fold.constant(&lhs, &rhs) {
                return folded;
            }
            if lhs.elem().is_int() && lhs.item == rhs.item {
                if let Some(same) = fold.identity(&lhs, &rhs) {
                    return same;
                }
            }
        }

        let item = match rhs.item.lanes() > lhs.item.lanes() {
            true => rhs.item,
            false => lhs.item,
        };
        self.assign(operation(BinaryOperator { lhs, rhs }), item)
    }
}

impl Display for Scope {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for instruction in self.instructions.iter() {
            writeln!(f, "{instruction}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FloatKind, IntKind};
    use pretty_assertions::assert_eq;

    #[test]
    fn index_arithmetic_is_folded() {
        let mut scope = Scope::root();
        let a = Variable::index(6);
        let b = Variable::index(4);

        let sum = scope.add(a, b);
        let prod = scope.mul(sum, Variable::index(3));
        let quot = scope.div(prod, Variable::index(7));

        assert_eq!(quot.as_usize(), Some(4));
        assert!(scope.instructions.is_empty());
    }

    #[test]
    fn identities_are_folded() {
        let mut scope = Scope::root();
        let tid = scope.thread_idx();

        assert_eq!(scope.add(tid, Variable::index(0)), tid);
        assert_eq!(scope.mul(tid, Variable::index(1)), tid);
        assert!(scope.instructions.is_empty());
    }

    #[test]
    fn division_by_zero_is_not_folded() {
        let mut scope = Scope::root();
        let out = scope.div(Variable::index(1), Variable::index(0));

        assert!(!out.is_constant());
        assert_eq!(scope.instructions.len(), 1);
    }

    #[test]
    fn signed_constants_are_folded() {
        let mut scope = Scope::root();
        let i32 = Elem::Int(IntKind::I32);
        let out = scope.sub(i32.constant_from_i64(2), i32.constant_from_i64(5));

        assert_eq!(out.as_const(), Some(ConstantScalarValue::Int(-3, IntKind::I32)));
    }

    #[test]
    fn float_arithmetic_emits_instruction() {
        let mut scope = Scope::root();
        let f32 = Elem::Float(FloatKind::F32);
        let out = scope.add(f32.constant_from_f64(1.0), f32.constant_from_f64(2.0));

        assert_eq!(out.id(), Some(0));
        assert_eq!(scope.to_string(), "%0: f32 = 1.0f32 + 2.0f32\n");
    }

    #[test]
    fn constant_select_is_folded() {
        let mut scope = Scope::root();
        let a = Variable::index(1);
        let b = Variable::index(2);

        let cond = Elem::Bool.constant_from_u64(1);
        assert_eq!(scope.select(cond, a, b), a);
    }

    #[test]
    fn if_then_records_nested_body() {
        let mut scope = Scope::root();
        let tid = scope.thread_idx();
        let cond = scope.cmp_eq(tid, Variable::index(0));

        let timer = scope.if_then(cond, |scope| scope.global_timer());
        scope.sync_block();

        assert_eq!(scope.instructions.len(), 3);
        match &scope.instructions[1].operation {
            Operation::Branch(Branch::If { body, .. }) => {
                assert_eq!(body.len(), 1);
                assert_eq!(body[0].out, Some(timer));
            }
            other => panic!("Expected a branch, got {other}"),
        }
        assert_eq!(
            scope.to_string(),
            "%0: bool = thread_idx.x == 0u32\nif %0 {\n    %1: u32 = global_timer()\n}\nsync_block()\n"
        );
    }
}
