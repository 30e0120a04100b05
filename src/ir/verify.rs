//! Structural and type verification of the operation set.
//!
//! Each operation kind enforces its contract here; a violation produces a
//! diagnostic naming the operation and its location and aborts the
//! enclosing compilation. Verification never mutates the module.

use std::collections::HashSet;

use crate::diagnostic::Diagnostic;

use super::types::Type;
use super::{FuncKind, Module, OpId, OpKind, RegionId, INDEX_SIZE};

/// Verifies every operation of the module, accumulating diagnostics.
pub fn verify_module(module: &Module) -> Result<(), Vec<Diagnostic>> {
    let mut diags = Vec::new();
    for op in module.walk_ops() {
        verify_op(module, op, &mut diags);
    }
    if diags.is_empty() {
        Ok(())
    } else {
        Err(diags)
    }
}

fn err(module: &Module, op: OpId, message: impl Into<String>) -> Diagnostic {
    Diagnostic::op_error(module.op(op).kind.name(), message.into(), module.op(op).span)
}

fn bounds_ordered(lb: &[i64], ub: &[i64]) -> bool {
    lb.iter().zip(ub.iter()).all(|(l, u)| l <= u)
}

fn verify_op(module: &Module, op: OpId, diags: &mut Vec<Diagnostic>) {
    let operands = module.operands(op);
    let results = module.results(op);
    match &module.op(op).kind {
        OpKind::Assert { lb, ub } => {
            if operands.len() != 1 || !module.value_type(operands[0]).is_field() {
                diags.push(err(module, op, "expected a single field operand"));
                return;
            }
            if !bounds_ordered(lb, ub) {
                diags.push(err(module, op, "expected the lower bound not to exceed the upper bound"));
            }
        }
        OpKind::Load => {
            let (field, temp) = match (
                operands.first().map(|v| module.value_type(*v)),
                results.first().map(|v| module.value_type(*v)),
            ) {
                (Some(Type::Field(f)), Some(Type::Temp(t))) => (f, t),
                _ => {
                    diags.push(err(module, op, "expected a field operand and a temp result"));
                    return;
                }
            };
            if field.element != temp.element || field.allocation != temp.allocation {
                diags.push(err(
                    module,
                    op,
                    "expected the field and temp element type and allocation to match",
                ));
            }
        }
        OpKind::Store { lb, ub } => {
            let (temp, field) = match (
                operands.first().map(|v| module.value_type(*v)),
                operands.get(1).map(|v| module.value_type(*v)),
            ) {
                (Some(Type::Temp(t)), Some(Type::Field(f))) => (t, f),
                _ => {
                    diags.push(err(module, op, "expected a temp and a field operand"));
                    return;
                }
            };
            if field.element != temp.element || field.allocation != temp.allocation {
                diags.push(err(
                    module,
                    op,
                    "expected the temp and field element type and allocation to match",
                ));
            }
            if !bounds_ordered(lb, ub) {
                diags.push(err(module, op, "expected the lower bound not to exceed the upper bound"));
            }
        }
        OpKind::Cast { lb, ub } => {
            match (
                operands.first().map(|v| module.value_type(*v)),
                results.first().map(|v| module.value_type(*v)),
            ) {
                (Some(Type::Field(a)), Some(Type::Field(b))) => {
                    if a.element != b.element || a.allocation != b.allocation {
                        diags.push(err(
                            module,
                            op,
                            "expected the operand and result field types to match",
                        ));
                    }
                }
                _ => {
                    diags.push(err(module, op, "expected field operand and result"));
                    return;
                }
            }
            if !bounds_ordered(lb, ub) {
                diags.push(err(module, op, "expected the lower bound not to exceed the upper bound"));
            }
        }
        OpKind::Access { .. } => {
            let temp = match operands.first().map(|v| module.value_type(*v)) {
                Some(Type::Temp(t)) => t,
                _ => {
                    diags.push(err(module, op, "expected a temp operand"));
                    return;
                }
            };
            if results.first().map(|v| module.value_type(*v)) != Some(Type::Element(temp.element)) {
                diags.push(err(
                    module,
                    op,
                    "expected the result type to equal the temp element type",
                ));
            }
        }
        OpKind::DynAccess { lb, ub } => {
            let temp = match operands.first().map(|v| module.value_type(*v)) {
                Some(Type::Temp(t)) => t,
                _ => {
                    diags.push(err(module, op, "expected a temp operand"));
                    return;
                }
            };
            if operands.len() != 1 + INDEX_SIZE
                || operands[1..]
                    .iter()
                    .any(|v| module.value_type(*v) != Type::Index)
            {
                diags.push(err(module, op, "expected one index operand per dimension"));
            }
            if results.first().map(|v| module.value_type(*v)) != Some(Type::Element(temp.element)) {
                diags.push(err(
                    module,
                    op,
                    "expected the result type to equal the temp element type",
                ));
            }
            if !bounds_ordered(lb, ub) {
                diags.push(err(
                    module,
                    op,
                    "expected the access extent lower bound not to exceed the upper bound",
                ));
            }
        }
        OpKind::Apply { .. } => verify_apply(module, op, diags),
        OpKind::Return { .. } => {
            let parent = module.parent_op(op);
            if !matches!(
                parent.map(|p| &module.op(p).kind),
                Some(OpKind::Apply { .. })
            ) {
                diags.push(err(module, op, "expected the parent to be an apply"));
            }
        }
        OpKind::StoreResult => {
            if operands.len() != 1
                || results.len() != 1
                || module.value_type(operands[0]) != module.value_type(results[0])
            {
                diags.push(err(
                    module,
                    op,
                    "expected one operand and one result of the same type",
                ));
            }
        }
        OpKind::Call { callee, .. } => verify_call(module, op, callee, diags),
        OpKind::Combine { .. } => verify_combine(module, op, diags),
        OpKind::Func {
            kind, result_types, ..
        } => {
            match kind {
                FuncKind::StencilFunction if result_types.len() != 1 => {
                    diags.push(err(module, op, "expected a stencil function to have one result"));
                }
                FuncKind::StencilProgram if !result_types.is_empty() => {
                    diags.push(err(module, op, "expected a stencil program to return void"));
                }
                _ => {}
            }
            verify_region_terminator(module, op, |k| matches!(k, OpKind::FuncReturn), "ret", diags);
        }
        OpKind::FuncReturn => {
            let parent = match module.parent_op(op) {
                Some(p) => p,
                None => return,
            };
            if let OpKind::Func { result_types, .. } = &module.op(parent).kind {
                let operand_types: Vec<Type> =
                    operands.iter().map(|v| module.value_type(*v)).collect();
                if &operand_types != result_types {
                    diags.push(err(
                        module,
                        op,
                        "expected the operand types to match the routine result types",
                    ));
                }
            } else {
                diags.push(err(module, op, "expected the parent to be a routine"));
            }
        }
        OpKind::For { lower, upper } => {
            if lower > upper {
                diags.push(err(module, op, "expected the lower bound not to exceed the upper bound"));
            }
            let region = match module.regions_of(op).first() {
                Some(r) => *r,
                None => {
                    diags.push(err(module, op, "expected a body region"));
                    return;
                }
            };
            let args = module.region_args(region);
            if args.len() != 1 || module.value_type(args[0]) != Type::Index {
                diags.push(err(module, op, "expected a single index induction variable"));
            }
            verify_region_terminator(module, op, |k| matches!(k, OpKind::Yield), "yield", diags);
        }
        OpKind::If => {
            if operands.len() != 1 || module.value_type(operands[0]) != Type::Bool {
                diags.push(err(module, op, "expected a single bool condition"));
            }
            if module.regions_of(op).len() != 2 {
                diags.push(err(module, op, "expected a then and an else region"));
                return;
            }
            verify_region_terminator(module, op, |k| matches!(k, OpKind::Yield), "yield", diags);
            let result_types: Vec<Type> = results.iter().map(|v| module.value_type(*v)).collect();
            for region in module.regions_of(op) {
                if let Some(term) = module.terminator(*region) {
                    let yielded: Vec<Type> = module
                        .operands(term)
                        .iter()
                        .map(|v| module.value_type(*v))
                        .collect();
                    if yielded != result_types {
                        diags.push(err(
                            module,
                            op,
                            "expected the yielded types to match the result types",
                        ));
                    }
                }
            }
        }
        OpKind::Yield => {
            if !matches!(
                module.parent_op(op).map(|p| &module.op(p).kind),
                Some(OpKind::For { .. }) | Some(OpKind::If)
            ) {
                diags.push(err(module, op, "expected the parent to be a for or an if"));
            }
        }
        OpKind::Alloc => {
            if results.len() != 1 || !module.value_type(results[0]).is_buffer() {
                diags.push(err(module, op, "expected a single buffer result"));
            }
        }
        OpKind::Dealloc => {
            if operands.len() != 1 || !module.value_type(operands[0]).is_buffer() {
                diags.push(err(module, op, "expected a single buffer operand"));
            }
        }
        OpKind::LoadElem => {
            let element = match operands.first().map(|v| module.value_type(*v)) {
                Some(Type::Buffer(b)) => b.element,
                _ => {
                    diags.push(err(module, op, "expected a buffer operand"));
                    return;
                }
            };
            if operands.len() != 1 + INDEX_SIZE
                || operands[1..]
                    .iter()
                    .any(|v| module.value_type(*v) != Type::Index)
            {
                diags.push(err(module, op, "expected one index operand per dimension"));
            }
            if results.first().map(|v| module.value_type(*v)) != Some(Type::Element(element)) {
                diags.push(err(
                    module,
                    op,
                    "expected the result type to equal the buffer element type",
                ));
            }
        }
        OpKind::StoreElem => {
            let element = match operands.get(1).map(|v| module.value_type(*v)) {
                Some(Type::Buffer(b)) => b.element,
                _ => {
                    diags.push(err(module, op, "expected a buffer operand"));
                    return;
                }
            };
            if operands.first().map(|v| module.value_type(*v)) != Some(Type::Element(element)) {
                diags.push(err(
                    module,
                    op,
                    "expected the stored type to equal the buffer element type",
                ));
            }
            if operands.len() != 2 + INDEX_SIZE
                || operands[2..]
                    .iter()
                    .any(|v| module.value_type(*v) != Type::Index)
            {
                diags.push(err(module, op, "expected one index operand per dimension"));
            }
        }
        OpKind::ConstIndex { .. } => {
            if results.len() != 1 || module.value_type(results[0]) != Type::Index {
                diags.push(err(module, op, "expected a single index result"));
            }
        }
        OpKind::IndexAdd => {
            let index_typed = |v: &super::ValueId| module.value_type(*v) == Type::Index;
            if operands.len() != 2
                || !operands.iter().all(index_typed)
                || results.len() != 1
                || !index_typed(&results[0])
            {
                diags.push(err(module, op, "expected index operands and result"));
            }
        }
        OpKind::Constant { element, .. } => {
            if results.first().map(|v| module.value_type(*v)) != Some(Type::Element(*element)) {
                diags.push(err(module, op, "expected a single element result"));
            }
        }
        OpKind::Binary { .. } => {
            let tys: Vec<Type> = operands.iter().map(|v| module.value_type(*v)).collect();
            match tys.as_slice() {
                [Type::Element(a), Type::Element(b)] if a == b => {
                    if results.first().map(|v| module.value_type(*v)) != Some(Type::Element(*a)) {
                        diags.push(err(
                            module,
                            op,
                            "expected the result type to equal the operand type",
                        ));
                    }
                }
                _ => diags.push(err(module, op, "expected two element operands of one type")),
            }
        }
    }
}

fn verify_region_terminator(
    module: &Module,
    op: OpId,
    is_expected: impl Fn(&OpKind) -> bool,
    expected: &str,
    diags: &mut Vec<Diagnostic>,
) {
    for region in module.regions_of(op) {
        match module.terminator(*region) {
            Some(term) if is_expected(&module.op(term).kind) => {}
            _ => diags.push(err(
                module,
                op,
                format!("expected the region to end with a '{}' terminator", expected),
            )),
        }
    }
}

fn verify_apply(module: &Module, op: OpId, diags: &mut Vec<Diagnostic>) {
    let operands = module.operands(op);
    let results = module.results(op);
    let region = match module.regions_of(op).first() {
        Some(r) => *r,
        None => {
            diags.push(err(module, op, "expected a body region"));
            return;
        }
    };
    let args = module.region_args(region);

    // Region arguments mirror the data operands pairwise.
    if args.len() != operands.len() {
        diags.push(err(
            module,
            op,
            "expected the operand and block argument counts to match",
        ));
        return;
    }
    for (operand, arg) in operands.iter().zip(args.iter()) {
        if module.value_type(*operand) != module.value_type(*arg) {
            diags.push(err(
                module,
                op,
                "expected the operand and block argument types to match",
            ));
        }
    }
    if results.iter().any(|r| !module.value_type(*r).is_temp()) {
        diags.push(err(module, op, "expected temp result types"));
        return;
    }
    if let (Some(lb), Some(ub)) = match module.op(op).kind {
        OpKind::Apply { lb, ub } => (lb, ub),
        _ => unreachable!(),
    } {
        if !bounds_ordered(&lb, &ub) {
            diags.push(err(module, op, "expected the lower bound not to exceed the upper bound"));
        }
    }

    // Terminator operand slices type-check against the result element types.
    let term = match module.terminator(region) {
        Some(t) if matches!(module.op(t).kind, OpKind::Return { .. }) => t,
        _ => {
            diags.push(err(
                module,
                op,
                "expected the region to end with a 'return' terminator",
            ));
            return;
        }
    };
    let factor = module.unroll_factor(term);
    let term_operands = module.operands(term);
    if term_operands.len() != results.len() * factor {
        diags.push(err(
            module,
            op,
            "expected one terminator operand slice per result",
        ));
        return;
    }
    for (index, result) in results.iter().enumerate() {
        let element = match module.value_type(*result) {
            Type::Temp(t) => t.element,
            _ => continue,
        };
        for operand in &term_operands[index * factor..(index + 1) * factor] {
            if module.value_type(*operand) != Type::Element(element) {
                diags.push(err(
                    module,
                    op,
                    "expected the terminator operand types to match the result element types",
                ));
            }
        }
    }

    // Apply bodies are isolated: they may only read their own arguments
    // and locally defined values.
    let mut visible: HashSet<super::ValueId> = args.iter().copied().collect();
    collect_defined(module, region, &mut visible);
    let mut inner = Vec::new();
    collect_ops(module, region, &mut inner);
    for inner_op in inner {
        for operand in module.operands(inner_op) {
            if !visible.contains(operand) {
                diags.push(err(
                    module,
                    op,
                    "expected the body to only use values defined inside the apply",
                ));
                return;
            }
        }
    }
}

fn collect_defined(module: &Module, region: RegionId, out: &mut HashSet<super::ValueId>) {
    for op in module.region_ops(region) {
        out.extend(module.results(*op).iter().copied());
        for nested in module.regions_of(*op) {
            out.extend(module.region_args(*nested).iter().copied());
            collect_defined(module, *nested, out);
        }
    }
}

fn collect_ops(module: &Module, region: RegionId, out: &mut Vec<OpId>) {
    for op in module.region_ops(region) {
        out.push(*op);
        for nested in module.regions_of(*op) {
            collect_ops(module, *nested, out);
        }
    }
}

fn verify_call(module: &Module, op: OpId, callee: &str, diags: &mut Vec<Diagnostic>) {
    let func = match module.func_by_name(callee) {
        Some(f) => f,
        None => {
            diags.push(err(module, op, format!("callee '@{}' not found", callee)));
            return;
        }
    };
    let (kind, result_types) = match &module.op(func).kind {
        OpKind::Func {
            kind, result_types, ..
        } => (*kind, result_types.clone()),
        _ => unreachable!(),
    };
    if kind != FuncKind::StencilFunction {
        diags.push(err(
            module,
            op,
            format!("expected callee '@{}' to be a stencil function", callee),
        ));
        return;
    }
    if result_types.len() != 1 {
        diags.push(err(
            module,
            op,
            format!("expected callee '@{}' to have one result", callee),
        ));
        return;
    }
    let body = module.regions_of(func)[0];
    let param_types: Vec<Type> = module
        .region_args(body)
        .iter()
        .map(|v| module.value_type(*v))
        .collect();
    let operand_types: Vec<Type> = module
        .operands(op)
        .iter()
        .map(|v| module.value_type(*v))
        .collect();
    if operand_types != param_types {
        diags.push(err(
            module,
            op,
            "expected the operand types to match the callee parameters",
        ));
    }
    if module.results(op).first().map(|v| module.value_type(*v)) != Some(result_types[0]) {
        diags.push(err(
            module,
            op,
            "expected the result type to match the callee result",
        ));
    }
}

fn verify_combine(module: &Module, op: OpId, diags: &mut Vec<Diagnostic>) {
    let (dim, lower, upper, lowerext, upperext) = match module.op(op).kind {
        OpKind::Combine {
            dim,
            lower,
            upper,
            lowerext,
            upperext,
        } => (dim, lower, upper, lowerext, upperext),
        _ => unreachable!(),
    };
    let operands = module.operands(op);
    let results = module.results(op);

    if operands.is_empty() {
        diags.push(err(module, op, "expected the operand list to be non-empty"));
        return;
    }
    if dim >= INDEX_SIZE {
        diags.push(err(module, op, "expected the combine dimension to be 0, 1, or 2"));
        return;
    }
    if lower + upper + lowerext + upperext != operands.len() {
        diags.push(err(module, op, "expected the operand segments to cover the operands"));
        return;
    }
    if lower != upper {
        diags.push(err(module, op, "expected the lower and upper operand size to match"));
        return;
    }
    if results.len() != lower + lowerext + upperext {
        diags.push(err(module, op, "expected the result and operand sizes to match"));
        return;
    }
    if operands.iter().any(|v| module.defining_op(*v).is_none()) {
        diags.push(err(module, op, "expected the operands to have a defining op"));
        return;
    }

    let lower_ops = &operands[..lower];
    let upper_ops = &operands[lower..lower + upper];
    let lowerext_ops = &operands[lower + upper..lower + upper + lowerext];
    let upperext_ops = &operands[lower + upper + lowerext..];

    if !lower_ops
        .iter()
        .zip(upper_ops.iter())
        .all(|(a, b)| module.compatible_temps(*a, *b, dim))
    {
        diags.push(err(module, op, "expected lower and upper operand types to match"));
        return;
    }
    if !lower_ops
        .iter()
        .zip(results.iter())
        .all(|(a, b)| module.compatible_temps(*a, *b, dim))
    {
        diags.push(err(module, op, "expected the lower/upper and result types to match"));
        return;
    }
    let lowerext_res = &results[lower..lower + lowerext];
    if !lowerext_ops
        .iter()
        .zip(lowerext_res.iter())
        .all(|(a, b)| module.compatible_temps(*a, *b, dim))
    {
        diags.push(err(module, op, "expected the lowerext and result types to match"));
        return;
    }
    let upperext_res = &results[results.len() - upperext..];
    if !upperext_ops
        .iter()
        .zip(upperext_res.iter())
        .all(|(a, b)| module.compatible_temps(*a, *b, dim))
    {
        diags.push(err(module, op, "expected the upperext and result types to match"));
        return;
    }

    if !super::combine::one_by_one_operand_mapping(module, lower_ops, lowerext_ops) {
        diags.push(err(
            module,
            op,
            "expected the lower operands to connect one-by-one to one combine or multiple apply ops",
        ));
        return;
    }
    if !super::combine::one_by_one_operand_mapping(module, upper_ops, upperext_ops) {
        diags.push(err(
            module,
            op,
            "expected the upper operands to connect one-by-one to one combine or multiple apply ops",
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::super::builder::OpBuilder;
    use super::super::types::{Allocation, ElementKind};
    use super::*;

    fn field_ty() -> Type {
        Type::field(ElementKind::F64, Allocation::IJK)
    }

    fn temp_ty() -> Type {
        Type::temp(ElementKind::F64, Allocation::IJK)
    }

    fn build_valid_program() -> Module {
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
        b.assert(field, [0, 0, 0], [8, 8, 8]);
        let load = b.load(field);
        let temp = b.result(load);
        let (apply, apply_body) = b.apply(
            vec![temp],
            vec![temp_ty()],
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
        m
    }

    #[test]
    fn test_valid_program_verifies() {
        let m = build_valid_program();
        assert!(verify_module(&m).is_ok());
    }

    #[test]
    fn test_apply_terminator_arity_mismatch() {
        let mut m = Module::new();
        let (_, body) = OpBuilder::func(
            &mut m,
            "bad",
            FuncKind::StencilProgram,
            &[field_ty()],
            vec![],
        );
        let field = m.region_args(body)[0];
        let mut b = OpBuilder::at_end(&mut m, body);
        let load = b.load(field);
        let temp = b.result(load);
        // Two results, but the terminator only returns one slice.
        let (_, apply_body) = b.apply(
            vec![temp],
            vec![temp_ty(), temp_ty()],
            Some([0, 0, 0]),
            Some([4, 4, 4]),
        );
        let arg = b.module().region_args(apply_body)[0];
        b.set_insertion_point_end(apply_body);
        let access = b.access(arg, [0, 0, 0]);
        let value = b.result(access);
        b.return_op(vec![value], None);
        b.set_insertion_point_end(body);
        b.func_return();
        let errors = verify_module(&m).unwrap_err();
        assert!(errors
            .iter()
            .any(|d| d.message.contains("one terminator operand slice per result")));
    }

    #[test]
    fn test_combine_arity_mismatch() {
        // lower=2, upper=2, lowerext=1, upperext=1 requires 6 results;
        // give it 5.
        let mut m = Module::new();
        let (_, body) = OpBuilder::func(&mut m, "f", FuncKind::Plain, &[field_ty()], vec![]);
        let field = m.region_args(body)[0];
        let mut b = OpBuilder::at_end(&mut m, body);
        let load = b.load(field);
        let temp = b.result(load);
        let mk_apply = |b: &mut OpBuilder<'_>, n: usize| -> Vec<super::super::ValueId> {
            let (apply, region) = b.apply(
                vec![temp],
                vec![temp_ty(); n],
                Some([0, 0, 0]),
                Some([4, 4, 4]),
            );
            let arg = b.module().region_args(region)[0];
            b.set_insertion_point_end(region);
            let access = b.access(arg, [0, 0, 0]);
            let value = b.result(access);
            b.return_op(vec![value; n], None);
            b.module().results(apply).to_vec()
        };
        let lower = mk_apply(&mut b, 3);
        b.set_insertion_point_end(body);
        let upper = mk_apply(&mut b, 3);
        b.set_insertion_point_end(body);
        let operands = vec![lower[0], lower[1], upper[0], upper[1], lower[2], upper[2]];
        b.insert(
            OpKind::Combine {
                dim: 2,
                lower: 2,
                upper: 2,
                lowerext: 1,
                upperext: 1,
            },
            operands,
            vec![temp_ty(); 5],
            vec![],
        );
        b.func_return();
        let errors = verify_module(&m).unwrap_err();
        assert!(errors
            .iter()
            .any(|d| d.message.contains("result and operand sizes to match")));
    }

    #[test]
    fn test_load_allocation_mismatch() {
        let mut m = Module::new();
        let (_, body) = OpBuilder::func(&mut m, "f", FuncKind::Plain, &[field_ty()], vec![]);
        let field = m.region_args(body)[0];
        let mut b = OpBuilder::at_end(&mut m, body);
        b.insert(
            OpKind::Load,
            vec![field],
            vec![Type::temp(ElementKind::F64, Allocation::IJ)],
            vec![],
        );
        b.func_return();
        let errors = verify_module(&m).unwrap_err();
        assert!(errors
            .iter()
            .any(|d| d.message.contains("element type and allocation to match")));
    }

    #[test]
    fn test_call_unknown_callee() {
        let mut m = Module::new();
        let (_, body) = OpBuilder::func(&mut m, "f", FuncKind::Plain, &[], vec![]);
        let mut b = OpBuilder::at_end(&mut m, body);
        let c = b.constant(1.0, ElementKind::F64);
        let v = b.result(c);
        b.insert(
            OpKind::Call {
                callee: "missing".into(),
                offset: [0, 0, 0],
            },
            vec![v],
            vec![Type::Element(ElementKind::F64)],
            vec![],
        );
        b.func_return();
        let errors = verify_module(&m).unwrap_err();
        assert!(errors.iter().any(|d| d.message.contains("not found")));
    }

    #[test]
    fn test_apply_body_isolation() {
        let mut m = Module::new();
        let (_, body) = OpBuilder::func(&mut m, "f", FuncKind::Plain, &[field_ty()], vec![]);
        let field = m.region_args(body)[0];
        let mut b = OpBuilder::at_end(&mut m, body);
        let load = b.load(field);
        let temp = b.result(load);
        let outer = b.constant(2.0, ElementKind::F64);
        let outer_val = b.result(outer);
        let (_, apply_body) = b.apply(
            vec![temp],
            vec![temp_ty()],
            Some([0, 0, 0]),
            Some([4, 4, 4]),
        );
        b.set_insertion_point_end(apply_body);
        // Illegal: reads a value defined outside the apply.
        b.return_op(vec![outer_val], None);
        b.set_insertion_point_end(body);
        b.func_return();
        let errors = verify_module(&m).unwrap_err();
        assert!(errors
            .iter()
            .any(|d| d.message.contains("defined inside the apply")));
    }
}
