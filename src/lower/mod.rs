//! Stencil-to-loop-nest conversion.
//!
//! Runs once per compilation unit after canonicalization. The conversion is
//! partial but all-or-nothing: every operation of a routine tagged as a
//! stencil program or stencil function must end up converted, other
//! routines are left untouched, and any failure aborts the pass with a
//! diagnostic before the caller can observe a half-converted module as
//! success.
//!
//! Per routine: resolve the signature from assert-declared bounds, erase
//! the asserts, then convert to fixpoint — loads forward their field,
//! applies become buffer allocations plus a perfectly nested loop,
//! accesses become address-translated element loads, returns become
//! element stores, and stores eliminate the temporary buffer entirely
//! (copy elision). A legality gate rejects anything stencil-tagged that
//! survives.

pub mod layout;

use crate::diagnostic::Diagnostic;
use crate::ir::types::{BufferType, Type};
use crate::ir::{FuncKind, Module, OpId, OpKind, RegionId, ValueId, INDEX_SIZE};

use self::layout::BufferLayout;

/// Sweep budget per routine; conversion normally converges in two sweeps.
const MAX_SWEEPS: usize = 64;

/// Converts every stencil-tagged routine to a loop-nest program.
pub fn lower(module: &mut Module) -> Result<(), Diagnostic> {
    for func in module.funcs().to_vec() {
        let tagged = matches!(
            module.op(func).kind,
            OpKind::Func {
                kind: FuncKind::StencilProgram | FuncKind::StencilFunction,
                ..
            }
        );
        if tagged {
            lower_routine(module, func)?;
        }
    }
    legality_gate(module)
}

fn lower_routine(module: &mut Module, func: OpId) -> Result<(), Diagnostic> {
    let func = resolve_signature(module, func)?;
    erase_asserts(module, func);

    let mut sweeps = 0;
    loop {
        let mut changed = false;
        for op in module.walk_region_of(func) {
            if module.is_dead(op) {
                continue;
            }
            changed |= match module.op(op).kind {
                OpKind::Load => lower_load(module, op),
                OpKind::Apply { .. } => lower_apply(module, op)?,
                OpKind::Access { .. } => lower_access(module, op)?,
                OpKind::Return { .. } => lower_return(module, op)?,
                OpKind::Store { .. } => lower_store(module, op)?,
                _ => false,
            };
        }
        if !changed {
            break;
        }
        sweeps += 1;
        if sweeps > MAX_SWEEPS {
            return Err(Diagnostic::error(
                "stencil conversion failed to reach a fixpoint".to_string(),
                module.op(func).span,
            ));
        }
    }
    Ok(())
}

// ─── Signature resolution ─────────────────────────────────────────

/// Rebuilds a stencil routine with concrete buffer argument types derived
/// from each field's assert, and an empty result list. The body is spliced
/// unchanged; the stencil tag is dropped.
fn resolve_signature(module: &mut Module, func: OpId) -> Result<OpId, Diagnostic> {
    let span = module.op(func).span;
    let (name, result_types) = match &module.op(func).kind {
        OpKind::Func {
            name, result_types, ..
        } => (name.clone(), result_types.clone()),
        _ => unreachable!("lowering a non-routine"),
    };
    if !result_types.is_empty() {
        return Err(Diagnostic::op_error(
            "func",
            "expected stencil programs to return void".to_string(),
            span,
        ));
    }

    let region = module.regions_of(func)[0];
    let args = module.region_args(region).to_vec();
    let mut input_types = Vec::with_capacity(args.len());
    for arg in &args {
        match module.value_type(*arg) {
            Type::Temp(_) => {
                return Err(Diagnostic::op_error(
                    "func",
                    format!("unexpected argument type '{}'", module.value_type(*arg)),
                    span,
                ));
            }
            Type::Field(field) => {
                let assert = module.users(*arg).into_iter().find_map(|user| {
                    match module.op(user).kind {
                        OpKind::Assert { lb, ub } => Some((lb, ub)),
                        _ => None,
                    }
                });
                let (lb, ub) = assert.ok_or_else(|| {
                    Diagnostic::op_error(
                        "func",
                        "failed to find stencil assert for input field".to_string(),
                        span,
                    )
                })?;
                input_types.push(Type::Buffer(BufferType {
                    element: field.element,
                    layout: BufferLayout::from_bounds(lb, ub),
                }));
            }
            other => input_types.push(other),
        }
    }

    let new_region = module.new_region(&input_types);
    let new_args = module.region_args(new_region).to_vec();
    for (old_arg, new_arg) in args.into_iter().zip(new_args) {
        module.replace_all_uses(old_arg, new_arg);
    }
    module.splice_region_start(region, new_region);
    let new_func = module.create_op(
        span,
        OpKind::Func {
            name,
            kind: FuncKind::Plain,
            result_types: Vec::new(),
        },
        vec![],
        vec![],
        vec![new_region],
    );
    module.replace_func(func, new_func);
    module.erase_op(func);
    Ok(new_func)
}

/// Asserts only seed layout resolution; they carry no run-time meaning.
fn erase_asserts(module: &mut Module, func: OpId) {
    for op in module.walk_region_of(func) {
        if !module.is_dead(op) && matches!(module.op(op).kind, OpKind::Assert { .. }) {
            module.erase_op(op);
        }
    }
}

// ─── Per-op conversions ───────────────────────────────────────────

/// A field and its loaded temp share representation after layout
/// resolution, so the load forwards its field to all temp uses.
fn lower_load(module: &mut Module, op: OpId) -> bool {
    let field = module.operands(op)[0];
    let temp = module.results(op)[0];
    module.replace_all_uses(temp, field);
    module.erase_op(op);
    true
}

fn lower_apply(module: &mut Module, op: OpId) -> Result<bool, Diagnostic> {
    let span = module.op(op).span;
    let (lb, ub) = module.apply_bounds(op).ok_or_else(|| {
        Diagnostic::op_error(
            "apply",
            "expected apply to have valid bounds".to_string(),
            span,
        )
    })?;

    // The buffer lives for the whole enclosing routine: deallocation is
    // scheduled immediately before the routine terminator, not at last
    // use. A later pass may narrow it.
    let mut root = module.parent_region(op).expect("apply is attached");
    while let Some(owner) = module.region_owner(root) {
        match module.parent_region(owner) {
            Some(r) => root = r,
            None => break,
        }
    }
    let routine_term = module.terminator(root).ok_or_else(|| {
        Diagnostic::op_error(
            "apply",
            "expected the enclosing routine to have a terminator".to_string(),
            span,
        )
    })?;

    for result in module.results(op).to_vec() {
        let element = module
            .value_type(result)
            .element_kind()
            .expect("apply results are temps");
        let buffer_ty = Type::Buffer(BufferType {
            element,
            layout: BufferLayout::from_bounds(lb, ub),
        });
        let alloc = module.create_op(span, OpKind::Alloc, vec![], vec![buffer_ty], vec![]);
        module.insert_op_before(op, alloc);
        let buffer = module.results(alloc)[0];
        module.replace_all_uses(result, buffer);
        let dealloc = module.create_op(span, OpKind::Dealloc, vec![buffer], vec![], vec![]);
        module.insert_op_before(routine_term, dealloc);
    }

    // Perfectly nested loops, highest dimension outermost so the
    // unit-stride dimension 0 is the innermost loop.
    let mut innermost: Option<RegionId> = None;
    for d in (0..INDEX_SIZE).rev() {
        let loop_region = module.new_region(&[Type::Index]);
        let yield_op = module.create_op(span, OpKind::Yield, vec![], vec![], vec![]);
        module.push_op(loop_region, yield_op);
        let for_op = module.create_op(
            span,
            OpKind::For {
                lower: lb[d],
                upper: ub[d],
            },
            vec![],
            vec![],
            vec![loop_region],
        );
        match innermost {
            None => module.insert_op_before(op, for_op),
            Some(parent) => module.insert_op_at_start(parent, for_op),
        }
        innermost = Some(loop_region);
    }
    let innermost = innermost.expect("loop nest is non-empty");

    // Block arguments resolve directly to the outer operands; body ops
    // compute element addresses themselves.
    let region = module.regions_of(op)[0];
    let args = module.region_args(region).to_vec();
    let operands = module.operands(op).to_vec();
    for (arg, operand) in args.into_iter().zip(operands) {
        module.replace_all_uses(arg, operand);
    }
    module.splice_region_start(region, innermost);
    module.erase_op(op);
    Ok(true)
}

/// The enclosing loop nest of an op: the for loops from innermost to
/// outermost, with their induction variables indexed by dimension.
fn loop_nest(module: &Module, op: OpId) -> (Vec<OpId>, Vec<ValueId>) {
    let mut loops = Vec::new();
    let mut ivs = Vec::new();
    let mut curr = op;
    while let Some(parent) = module.parent_op(curr) {
        if matches!(module.op(parent).kind, OpKind::For { .. }) {
            loops.push(parent);
            ivs.push(module.region_args(module.regions_of(parent)[0])[0]);
        }
        curr = parent;
    }
    (loops, ivs)
}

/// Accesses translate index-space: per dimension the effective index is
/// the induction variable plus the compile-time offset.
fn lower_access(module: &mut Module, op: OpId) -> Result<bool, Diagnostic> {
    let (loops, ivs) = loop_nest(module, op);
    if loops.is_empty() {
        // Still inside an unlowered apply; retried next sweep.
        return Ok(false);
    }
    let span = module.op(op).span;
    if loops.len() != INDEX_SIZE {
        return Err(Diagnostic::op_error(
            "access",
            "expected the loop nest and the access offset to have the same size".to_string(),
            span,
        ));
    }
    let offset = match module.op(op).kind {
        OpKind::Access { offset } => offset,
        _ => unreachable!(),
    };
    let view = module.operands(op)[0];

    let mut indices = Vec::with_capacity(INDEX_SIZE);
    for d in 0..INDEX_SIZE {
        let constant = module.create_op(
            span,
            OpKind::ConstIndex { value: offset[d] },
            vec![],
            vec![Type::Index],
            vec![],
        );
        module.insert_op_before(op, constant);
        let constant_val = module.results(constant)[0];
        let add = module.create_op(
            span,
            OpKind::IndexAdd,
            vec![ivs[d], constant_val],
            vec![Type::Index],
            vec![],
        );
        module.insert_op_before(op, add);
        indices.push(module.results(add)[0]);
    }

    let element = module
        .value_type(view)
        .element_kind()
        .expect("access reads typed storage");
    let load = module.create_op(
        span,
        OpKind::LoadElem,
        vec![view, indices[0], indices[1], indices[2]],
        vec![Type::Element(element)],
        vec![],
    );
    module.insert_op_before(op, load);
    let loaded = module.results(load)[0];
    let result = module.results(op)[0];
    module.replace_all_uses(result, loaded);
    module.erase_op(op);
    Ok(true)
}

/// Each return operand is stored into its result buffer at the current
/// induction variables. The allocation for operand `i` must sit exactly
/// `n - i` ops before the loop nest: a strict positional contract between
/// result arity and the preceding allocation sequence.
fn lower_return(module: &mut Module, op: OpId) -> Result<bool, Diagnostic> {
    let (loops, ivs) = loop_nest(module, op);
    if loops.is_empty() {
        return Ok(false);
    }
    let span = module.op(op).span;
    let operands = module.operands(op).to_vec();

    let mut current = *loops.last().unwrap();
    let mut buffers = Vec::with_capacity(operands.len());
    for _ in 0..operands.len() {
        current = module.prev_op(current).ok_or_else(|| {
            Diagnostic::op_error(
                "return",
                "failed to find allocation for results".to_string(),
                span,
            )
        })?;
        if !matches!(module.op(current).kind, OpKind::Alloc) {
            return Err(Diagnostic::op_error(
                "return",
                "failed to find allocation for results".to_string(),
                span,
            ));
        }
        buffers.push(module.results(current)[0]);
    }
    buffers.reverse();

    for (i, operand) in operands.into_iter().enumerate() {
        let store = module.create_op(
            span,
            OpKind::StoreElem,
            vec![operand, buffers[i], ivs[0], ivs[1], ivs[2]],
            vec![],
            vec![],
        );
        module.insert_op_before(op, store);
    }
    module.erase_op(op);
    Ok(true)
}

/// Copy elision: the temporary buffer written by the apply becomes the
/// persistent output buffer. The backing allocation and its deallocation
/// disappear and every use of the temp moves to the field.
fn lower_store(module: &mut Module, op: OpId) -> Result<bool, Diagnostic> {
    let view = module.operands(op)[0];
    let field = module.operands(op)[1];
    let def = module.defining_op(view);
    match def.map(|d| &module.op(d).kind) {
        Some(OpKind::Alloc) => {}
        Some(OpKind::Apply { .. }) => return Ok(false),
        _ => {
            return Err(Diagnostic::op_error(
                "store",
                "expected the stored temp to be produced by an apply".to_string(),
                module.op(op).span,
            ));
        }
    }
    let alloc = def.unwrap();

    for user in module.users(view) {
        if matches!(module.op(user).kind, OpKind::Dealloc) {
            module.erase_op(user);
        }
    }
    module.replace_all_uses(view, field);
    module.erase_op(op);
    module.erase_op(alloc);
    Ok(true)
}

// ─── Legality gate ────────────────────────────────────────────────

/// A routine-defining op is legal only when untagged; any stencil op left
/// anywhere signals a gap in pattern coverage, not a user error.
fn legality_gate(module: &Module) -> Result<(), Diagnostic> {
    for func in module.funcs() {
        if let OpKind::Func { kind, name, .. } = &module.op(*func).kind {
            if *kind != FuncKind::Plain {
                return Err(Diagnostic::op_error(
                    "func",
                    format!("failed to convert stencil routine '@{}'", name),
                    module.op(*func).span,
                ));
            }
        }
    }
    for op in module.walk_ops() {
        if !module.is_dead(op) && module.op(op).kind.is_stencil() {
            return Err(Diagnostic::op_error(
                module.op(op).kind.name(),
                "failed to legalize operation".to_string(),
                module.op(op).span,
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::OpBuilder;
    use crate::ir::types::{Allocation, ElementKind};
    use crate::ir::verify::verify_module;

    fn field_ty() -> Type {
        Type::field(ElementKind::F64, Allocation::IJK)
    }

    fn temp_ty() -> Type {
        Type::temp(ElementKind::F64, Allocation::IJK)
    }

    /// The end-to-end scenario: one field asserted to [0,0,0)-[10,10,10),
    /// one apply over the same bounds with a single centred access, and a
    /// store of the result back into the field.
    fn copy_program() -> Module {
        let mut m = Module::new();
        let (_, body) = OpBuilder::func(
            &mut m,
            "copy",
            FuncKind::StencilProgram,
            &[field_ty()],
            vec![],
        );
        let field = m.region_args(body)[0];
        let mut b = OpBuilder::at_end(&mut m, body);
        b.assert(field, [0, 0, 0], [10, 10, 10]);
        let load = b.load(field);
        let temp = b.result(load);
        let (apply, apply_body) = b.apply(
            vec![temp],
            vec![temp_ty()],
            Some([0, 0, 0]),
            Some([10, 10, 10]),
        );
        let arg = b.module().region_args(apply_body)[0];
        b.set_insertion_point_end(apply_body);
        let access = b.access(arg, [0, 0, 0]);
        let value = b.result(access);
        b.return_op(vec![value], None);
        b.set_insertion_point_end(body);
        let result = b.module().results(apply)[0];
        b.store(result, field, [0, 0, 0], [10, 10, 10]);
        b.func_return();
        m
    }

    #[test]
    fn test_end_to_end_lowering() {
        let mut m = copy_program();
        verify_module(&m).unwrap();
        lower(&mut m).unwrap();
        verify_module(&m).unwrap();

        // No stencil op survives.
        assert!(m
            .walk_ops()
            .iter()
            .all(|op| !m.op(*op).kind.is_stencil()));

        // The routine takes one concrete buffer of shape (10, 10, 10).
        let func = m.funcs()[0];
        let body = m.regions_of(func)[0];
        let arg = m.region_args(body)[0];
        match m.value_type(arg) {
            Type::Buffer(b) => {
                assert_eq!(b.layout.shape, [10, 10, 10]);
                assert_eq!(b.layout.strides, [1, 10, 100]);
                assert_eq!(b.layout.offset, 0);
            }
            other => panic!("expected a buffer argument, got {}", other),
        }

        // A three-level nest, innermost over dimension 0.
        let outer = m
            .region_ops(body)
            .iter()
            .copied()
            .find(|op| matches!(m.op(*op).kind, OpKind::For { .. }))
            .expect("no loop nest");
        let mid_region = m.regions_of(outer)[0];
        let mid = m.region_ops(mid_region)[0];
        let inner_region = m.regions_of(mid)[0];
        let inner = m.region_ops(inner_region)[0];
        assert!(matches!(m.op(mid).kind, OpKind::For { lower: 0, upper: 10 }));
        assert!(matches!(m.op(inner).kind, OpKind::For { lower: 0, upper: 10 }));

        // Copy elision: load and store hit the same buffer, the argument.
        let inner_body = m.regions_of(inner)[0];
        let ops = m.region_ops(inner_body).to_vec();
        let load = ops
            .iter()
            .copied()
            .find(|op| matches!(m.op(*op).kind, OpKind::LoadElem))
            .expect("no element load");
        let store = ops
            .iter()
            .copied()
            .find(|op| matches!(m.op(*op).kind, OpKind::StoreElem))
            .expect("no element store");
        assert_eq!(m.operands(load)[0], arg);
        assert_eq!(m.operands(store)[1], arg);

        // The alloc/dealloc pair died with the temporary.
        assert!(!m
            .walk_ops()
            .iter()
            .any(|op| matches!(m.op(*op).kind, OpKind::Alloc | OpKind::Dealloc)));
    }

    #[test]
    fn test_missing_assert_is_an_error() {
        let mut m = Module::new();
        let (_, body) = OpBuilder::func(
            &mut m,
            "noassert",
            FuncKind::StencilProgram,
            &[field_ty()],
            vec![],
        );
        let field = m.region_args(body)[0];
        let mut b = OpBuilder::at_end(&mut m, body);
        b.load(field);
        b.func_return();
        let err = lower(&mut m).unwrap_err();
        assert!(err.message.contains("failed to find stencil assert"));
    }

    #[test]
    fn test_temp_argument_is_an_error() {
        let mut m = Module::new();
        let (_, body) = OpBuilder::func(
            &mut m,
            "viewarg",
            FuncKind::StencilProgram,
            &[temp_ty()],
            vec![],
        );
        let mut b = OpBuilder::at_end(&mut m, body);
        b.func_return();
        drop(b);
        let err = lower(&mut m).unwrap_err();
        assert!(err.message.contains("unexpected argument type"));
    }

    #[test]
    fn test_nonvoid_routine_is_an_error() {
        let mut m = Module::new();
        let (_, body) = OpBuilder::func(
            &mut m,
            "nonvoid",
            FuncKind::StencilProgram,
            &[],
            vec![Type::Element(ElementKind::F64)],
        );
        let mut b = OpBuilder::at_end(&mut m, body);
        let c = b.constant(0.0, ElementKind::F64);
        let v = b.result(c);
        b.insert(OpKind::FuncReturn, vec![v], vec![], vec![]);
        drop(b);
        let err = lower(&mut m).unwrap_err();
        assert!(err.message.contains("return void"));
    }

    #[test]
    fn test_apply_without_bounds_is_an_error() {
        let mut m = Module::new();
        let (_, body) = OpBuilder::func(
            &mut m,
            "nobounds",
            FuncKind::StencilProgram,
            &[field_ty()],
            vec![],
        );
        let field = m.region_args(body)[0];
        let mut b = OpBuilder::at_end(&mut m, body);
        b.assert(field, [0, 0, 0], [4, 4, 4]);
        let load = b.load(field);
        let temp = b.result(load);
        let (apply, apply_body) = b.apply(vec![temp], vec![temp_ty()], None, None);
        let arg = b.module().region_args(apply_body)[0];
        b.set_insertion_point_end(apply_body);
        let access = b.access(arg, [0, 0, 0]);
        let value = b.result(access);
        b.return_op(vec![value], None);
        b.set_insertion_point_end(body);
        let result = b.module().results(apply)[0];
        b.store(result, field, [0, 0, 0], [4, 4, 4]);
        b.func_return();
        let err = lower(&mut m).unwrap_err();
        assert!(err.message.contains("valid bounds"));
    }

    #[test]
    fn test_plain_routine_is_untouched() {
        let mut m = Module::new();
        let (func, body) = OpBuilder::func(&mut m, "plain", FuncKind::Plain, &[], vec![]);
        let mut b = OpBuilder::at_end(&mut m, body);
        let c = b.const_index(1);
        let cv = b.result(c);
        b.index_add(cv, cv);
        b.func_return();
        drop(b);
        let before = m.region_ops(body).len();
        lower(&mut m).unwrap();
        assert_eq!(m.funcs(), [func]);
        assert_eq!(m.region_ops(body).len(), before);
    }
}
