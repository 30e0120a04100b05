//! OpBuilder: positional construction helpers over the [`Module`] edit API.
//!
//! Rewrites and tests assemble IR through a builder holding an insertion
//! point, in the style of the original construction API: set the point
//! once, emit a sequence, and every created op lands there in order.

use crate::span::Span;

use super::types::{ElementKind, Type};
use super::{FuncKind, Index, Module, OpId, OpKind, RegionId, ValueId};

/// Where newly created operations are inserted.
#[derive(Clone, Copy)]
enum InsertPoint {
    /// Append at the end of a region.
    End(RegionId),
    /// Insert immediately before an existing operation.
    Before(OpId),
}

pub struct OpBuilder<'m> {
    module: &'m mut Module,
    point: InsertPoint,
    span: Span,
}

impl<'m> OpBuilder<'m> {
    /// A builder appending to the end of `region`.
    pub fn at_end(module: &'m mut Module, region: RegionId) -> Self {
        Self {
            module,
            point: InsertPoint::End(region),
            span: Span::dummy(),
        }
    }

    /// A builder inserting before `op`.
    pub fn before(module: &'m mut Module, op: OpId) -> Self {
        Self {
            module,
            point: InsertPoint::Before(op),
            span: Span::dummy(),
        }
    }

    pub fn set_insertion_point_end(&mut self, region: RegionId) {
        self.point = InsertPoint::End(region);
    }

    pub fn set_insertion_point_before(&mut self, op: OpId) {
        self.point = InsertPoint::Before(op);
    }

    /// Spans for subsequently created operations.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn module(&mut self) -> &mut Module {
        self.module
    }

    /// Creates an operation at the current insertion point.
    pub fn insert(
        &mut self,
        kind: OpKind,
        operands: Vec<ValueId>,
        result_types: Vec<Type>,
        regions: Vec<RegionId>,
    ) -> OpId {
        let op = self
            .module
            .create_op(self.span, kind, operands, result_types, regions);
        match self.point {
            InsertPoint::End(region) => self.module.push_op(region, op),
            InsertPoint::Before(anchor) => self.module.insert_op_before(anchor, op),
        }
        op
    }

    /// The single result of `op`.
    pub fn result(&self, op: OpId) -> ValueId {
        self.module.results(op)[0]
    }

    // ── Stencil dialect ───────────────────────────────────────────

    pub fn assert(&mut self, field: ValueId, lb: Index, ub: Index) -> OpId {
        self.insert(OpKind::Assert { lb, ub }, vec![field], vec![], vec![])
    }

    pub fn load(&mut self, field: ValueId) -> OpId {
        let (element, allocation) = match self.module.value_type(field) {
            Type::Field(t) => (t.element, t.allocation),
            other => unreachable!("load of non-field {}", other),
        };
        self.insert(
            OpKind::Load,
            vec![field],
            vec![Type::temp(element, allocation)],
            vec![],
        )
    }

    pub fn store(&mut self, temp: ValueId, field: ValueId, lb: Index, ub: Index) -> OpId {
        self.insert(OpKind::Store { lb, ub }, vec![temp, field], vec![], vec![])
    }

    pub fn cast(&mut self, field: ValueId, lb: Index, ub: Index) -> OpId {
        let ty = self.module.value_type(field);
        self.insert(OpKind::Cast { lb, ub }, vec![field], vec![ty], vec![])
    }

    pub fn access(&mut self, temp: ValueId, offset: Index) -> OpId {
        let element = self
            .module
            .value_type(temp)
            .element_kind()
            .expect("access of untyped storage");
        self.insert(
            OpKind::Access { offset },
            vec![temp],
            vec![Type::Element(element)],
            vec![],
        )
    }

    pub fn store_result(&mut self, value: ValueId) -> OpId {
        let ty = self.module.value_type(value);
        self.insert(OpKind::StoreResult, vec![value], vec![ty], vec![])
    }

    pub fn return_op(&mut self, operands: Vec<ValueId>, unroll: Option<Index>) -> OpId {
        self.insert(OpKind::Return { unroll }, operands, vec![], vec![])
    }

    /// An apply over `operands` with a fresh body region whose arguments
    /// mirror the operand types. Returns the op and its body region.
    pub fn apply(
        &mut self,
        operands: Vec<ValueId>,
        result_types: Vec<Type>,
        lb: Option<Index>,
        ub: Option<Index>,
    ) -> (OpId, RegionId) {
        let arg_types: Vec<Type> = operands
            .iter()
            .map(|v| self.module.value_type(*v))
            .collect();
        let region = self.module.new_region(&arg_types);
        let op = self.insert(
            OpKind::Apply { lb, ub },
            operands,
            result_types,
            vec![region],
        );
        (op, region)
    }

    // ── Routine structure ─────────────────────────────────────────

    /// A routine registered at the end of the module, with its body region.
    pub fn func(
        module: &'m mut Module,
        name: &str,
        kind: FuncKind,
        param_types: &[Type],
        result_types: Vec<Type>,
    ) -> (OpId, RegionId) {
        let region = module.new_region(param_types);
        let op = module.create_op(
            Span::dummy(),
            OpKind::Func {
                name: name.to_string(),
                kind,
                result_types,
            },
            vec![],
            vec![],
            vec![region],
        );
        module.add_func(op);
        (op, region)
    }

    // ── Loop-nest dialect ─────────────────────────────────────────

    /// A counted loop with an index induction variable and a yield
    /// terminator already in place. Returns the op and its body region.
    pub fn for_op(&mut self, lower: i64, upper: i64) -> (OpId, RegionId) {
        let region = self.module.new_region(&[Type::Index]);
        let yield_op = self
            .module
            .create_op(self.span, OpKind::Yield, vec![], vec![], vec![]);
        self.module.push_op(region, yield_op);
        let op = self.insert(OpKind::For { lower, upper }, vec![], vec![], vec![region]);
        (op, region)
    }

    pub fn alloc(&mut self, ty: Type) -> OpId {
        self.insert(OpKind::Alloc, vec![], vec![ty], vec![])
    }

    pub fn dealloc(&mut self, buffer: ValueId) -> OpId {
        self.insert(OpKind::Dealloc, vec![buffer], vec![], vec![])
    }

    pub fn const_index(&mut self, value: i64) -> OpId {
        self.insert(OpKind::ConstIndex { value }, vec![], vec![Type::Index], vec![])
    }

    pub fn index_add(&mut self, a: ValueId, b: ValueId) -> OpId {
        self.insert(OpKind::IndexAdd, vec![a, b], vec![Type::Index], vec![])
    }

    pub fn load_elem(&mut self, buffer: ValueId, indices: [ValueId; 3]) -> OpId {
        let element = self
            .module
            .value_type(buffer)
            .element_kind()
            .expect("load_elem of untyped storage");
        self.insert(
            OpKind::LoadElem,
            vec![buffer, indices[0], indices[1], indices[2]],
            vec![Type::Element(element)],
            vec![],
        )
    }

    pub fn store_elem(&mut self, value: ValueId, buffer: ValueId, indices: [ValueId; 3]) -> OpId {
        self.insert(
            OpKind::StoreElem,
            vec![value, buffer, indices[0], indices[1], indices[2]],
            vec![],
            vec![],
        )
    }

    pub fn constant(&mut self, value: f64, element: ElementKind) -> OpId {
        self.insert(
            OpKind::Constant { value, element },
            vec![],
            vec![Type::Element(element)],
            vec![],
        )
    }

    pub fn binary(&mut self, op: super::BinOp, a: ValueId, b: ValueId) -> OpId {
        let ty = self.module.value_type(a);
        self.insert(OpKind::Binary { op }, vec![a, b], vec![ty], vec![])
    }

    pub fn func_return(&mut self) -> OpId {
        self.insert(OpKind::FuncReturn, vec![], vec![], vec![])
    }
}

#[cfg(test)]
mod tests {
    use super::super::types::Allocation;
    use super::*;

    #[test]
    fn test_build_minimal_program() {
        let mut m = Module::new();
        let field_ty = Type::field(ElementKind::F64, Allocation::IJK);
        let (func, body) = OpBuilder::func(
            &mut m,
            "copy",
            FuncKind::StencilProgram,
            &[field_ty],
            vec![],
        );
        let field = m.region_args(body)[0];

        let mut b = OpBuilder::at_end(&mut m, body);
        b.assert(field, [0, 0, 0], [8, 8, 8]);
        let load = b.load(field);
        let temp = b.result(load);
        let (apply, apply_body) = b.apply(
            vec![temp],
            vec![Type::temp(ElementKind::F64, Allocation::IJK)],
            Some([0, 0, 0]),
            Some([8, 8, 8]),
        );
        let arg = b.module().region_args(apply_body)[0];
        b.set_insertion_point_end(apply_body);
        let access = b.access(arg, [0, 0, 0]);
        let value = b.result(access);
        b.return_op(vec![value], None);
        b.set_insertion_point_end(body);
        let result = b.module().results(apply)[0];
        b.store(result, field, [0, 0, 0], [8, 8, 8]);
        b.func_return();

        assert_eq!(m.funcs(), [func]);
        assert_eq!(m.region_ops(body).len(), 5);
        assert_eq!(m.region_ops(apply_body).len(), 2);
        assert_eq!(m.uses(temp).len(), 1);
    }

    #[test]
    fn test_for_op_has_yield_terminator() {
        let mut m = Module::new();
        let (_, body) = OpBuilder::func(&mut m, "f", FuncKind::Plain, &[], vec![]);
        let mut b = OpBuilder::at_end(&mut m, body);
        let (for_op, loop_body) = b.for_op(0, 10);
        b.func_return();
        assert_eq!(m.region_args(loop_body).len(), 1);
        assert_eq!(m.value_type(m.region_args(loop_body)[0]), Type::Index);
        let term = m.terminator(loop_body).unwrap();
        assert_eq!(m.op(term).kind, OpKind::Yield);
        assert_eq!(m.regions_of(for_op), [loop_body]);
    }
}
