//! Canonicalization: local, confluent simplification applied to fixpoint.
//!
//! The driver keeps an explicit worklist of candidate operations and
//! re-enqueues the neighbourhood of every successful rewrite. Pattern
//! inapplicability is not an error; the driver just moves on. Exceeding the
//! rewrite budget means the pattern set stopped converging and is reported
//! as a fatal internal error instead of looping.

use std::collections::HashMap;
use std::collections::VecDeque;

use crate::diagnostic::Diagnostic;
use crate::ir::{Module, OpId, OpKind, ValueId};

/// Rewrite budget for one canonicalization run. Each pattern strictly
/// shrinks an apply or moves an op closer to its region boundary, so real
/// inputs converge orders of magnitude below this.
const MAX_REWRITES: usize = 100_000;

/// Applies all canonicalization patterns until none matches. Returns
/// whether anything changed.
pub fn canonicalize(module: &mut Module) -> Result<bool, Diagnostic> {
    let mut queue: VecDeque<OpId> = module.walk_ops().into();
    let mut rewrites = 0usize;
    let mut changed_any = false;

    while let Some(op) = queue.pop_front() {
        if module.is_dead(op) {
            continue;
        }
        let affected = match module.op(op).kind {
            OpKind::Apply { .. } => {
                if let Some(new_op) = prune_apply_arguments(module, op) {
                    vec![new_op]
                } else {
                    match prune_apply_results(module, op) {
                        Some(Some(new_op)) => vec![new_op],
                        Some(None) => vec![],
                        None => continue,
                    }
                }
            }
            OpKind::Cast { .. } => {
                // Sink duplicate casts together: skip anything that is not
                // itself a cast.
                if hoist_backward(module, op, &mut queue, |kind| {
                    !matches!(kind, OpKind::Cast { .. })
                }) {
                    vec![op]
                } else {
                    continue;
                }
            }
            OpKind::Load => {
                if hoist_backward(module, op, &mut queue, |kind| {
                    !matches!(kind, OpKind::Load | OpKind::Cast { .. })
                }) {
                    vec![op]
                } else {
                    continue;
                }
            }
            OpKind::Store { .. } => {
                // Push writes as late as possible; dead intermediate
                // buffers become visible to result pruning.
                if hoist_forward(module, op, &mut queue, |kind| {
                    !matches!(kind, OpKind::Store { .. })
                }) {
                    vec![op]
                } else {
                    continue;
                }
            }
            _ => continue,
        };

        changed_any = true;
        rewrites += 1;
        if rewrites > MAX_REWRITES {
            return Err(Diagnostic::error(
                "canonicalization failed to reach a fixpoint".to_string(),
                module.op(op).span,
            )
            .with_note("the rewrite budget was exhausted; the pattern set does not converge".to_string()));
        }
        for a in affected {
            enqueue_neighbourhood(module, a, &mut queue);
        }
    }
    Ok(changed_any)
}

fn enqueue_neighbourhood(module: &Module, op: OpId, queue: &mut VecDeque<OpId>) {
    if module.is_dead(op) {
        return;
    }
    queue.push_back(op);
    if let Some(prev) = module.prev_op(op) {
        queue.push_back(prev);
    }
    if let Some(next) = module.next_op(op) {
        queue.push_back(next);
    }
    for operand in module.operands(op) {
        if let Some(def) = module.defining_op(*operand) {
            queue.push_back(def);
        }
    }
    for result in module.results(op) {
        for user in module.users(*result) {
            queue.push_back(user);
        }
    }
}

// ─── Argument pruning ─────────────────────────────────────────────

/// Builds a deduplicated operand list for an apply, dropping operands whose
/// block argument has no uses. When the list shrinks, rebuilds the apply
/// with the short list and migrates the body. Returns the replacement.
fn prune_apply_arguments(module: &mut Module, op: OpId) -> Option<OpId> {
    let operands = module.operands(op).to_vec();
    let region = module.regions_of(op)[0];
    let args = module.region_args(region).to_vec();

    let mut new_index: HashMap<ValueId, usize> = HashMap::new();
    let mut new_operands: Vec<ValueId> = Vec::new();
    for (i, value) in operands.iter().enumerate() {
        if !new_index.contains_key(value) {
            if !module.use_empty(args[i]) {
                new_index.insert(*value, new_operands.len());
                new_operands.push(*value);
            } else {
                // Unused arguments map to the first index.
                new_index.insert(*value, 0);
            }
        }
    }
    if new_operands.len() >= operands.len() {
        return None;
    }

    let (lb, ub) = match module.op(op).kind {
        OpKind::Apply { lb, ub } => (lb, ub),
        _ => unreachable!(),
    };
    let span = module.op(op).span;
    let result_types = module
        .results(op)
        .iter()
        .map(|v| module.value_type(*v))
        .collect();
    let arg_types: Vec<_> = new_operands
        .iter()
        .map(|v| module.value_type(*v))
        .collect();
    let new_region = module.new_region(&arg_types);
    let new_op = module.create_op(
        span,
        OpKind::Apply { lb, ub },
        new_operands.clone(),
        result_types,
        vec![new_region],
    );
    module.insert_op_before(op, new_op);

    let new_args = module.region_args(new_region).to_vec();
    for (i, value) in operands.iter().enumerate() {
        let replacement = if new_operands.is_empty() {
            // No parameters left: the (unused) argument falls back to the
            // outer operand value.
            *value
        } else {
            new_args[new_index[value]]
        };
        module.replace_all_uses(args[i], replacement);
    }
    module.splice_region_start(region, new_region);

    for (old_result, new_result) in module
        .results(op)
        .to_vec()
        .into_iter()
        .zip(module.results(new_op).to_vec())
    {
        module.replace_all_uses(old_result, new_result);
    }
    module.erase_op(op);
    Some(new_op)
}

// ─── Result pruning ───────────────────────────────────────────────

/// Drops apply results without uses. An apply with no used result is
/// erased outright; otherwise it is rebuilt with the used subset and the
/// terminator operand list is rebuilt from the kept `unroll`-factor-sized
/// slices. Returns `Some(replacement)` on shrink, `Some(None)` on erase.
fn prune_apply_results(module: &mut Module, op: OpId) -> Option<Option<OpId>> {
    let results = module.results(op).to_vec();
    let used: Vec<(usize, ValueId)> = results
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, v)| !module.use_empty(*v))
        .collect();
    if used.len() == results.len() {
        return None;
    }
    if used.is_empty() {
        module.erase_op(op);
        return Some(None);
    }

    let region = module.regions_of(op)[0];
    let ret = module.terminator(region).expect("apply region has a terminator");
    let factor = module.unroll_factor(ret);
    let ret_operands = module.operands(ret).to_vec();
    let unroll = match module.op(ret).kind {
        OpKind::Return { unroll } => unroll,
        _ => unreachable!("apply region terminated by a non-return"),
    };

    let mut new_result_types = Vec::with_capacity(used.len());
    let mut new_ret_operands = Vec::with_capacity(used.len() * factor);
    for (index, value) in &used {
        new_result_types.push(module.value_type(*value));
        new_ret_operands.extend_from_slice(&ret_operands[index * factor..(index + 1) * factor]);
    }

    let (lb, ub) = match module.op(op).kind {
        OpKind::Apply { lb, ub } => (lb, ub),
        _ => unreachable!(),
    };
    let span = module.op(op).span;
    let operands = module.operands(op).to_vec();
    let arg_types: Vec<_> = operands.iter().map(|v| module.value_type(*v)).collect();
    let new_region = module.new_region(&arg_types);
    let new_op = module.create_op(
        span,
        OpKind::Apply { lb, ub },
        operands,
        new_result_types,
        vec![new_region],
    );
    module.insert_op_before(op, new_op);

    let ret_span = module.op(ret).span;
    let new_ret = module.create_op(
        ret_span,
        OpKind::Return { unroll },
        new_ret_operands,
        vec![],
        vec![],
    );
    module.insert_op_before(ret, new_ret);
    module.erase_op(ret);

    let old_args = module.region_args(region).to_vec();
    let new_args = module.region_args(new_region).to_vec();
    for (old_arg, new_arg) in old_args.into_iter().zip(new_args) {
        module.replace_all_uses(old_arg, new_arg);
    }
    module.splice_region_start(region, new_region);

    // Unused results referenced nowhere default to the first live result:
    // structurally valid, logically unreachable. TODO re-derive whether a
    // value pruned here can later be discovered reachable; if so this
    // placeholder silently reads the wrong result.
    let new_results = module.results(new_op).to_vec();
    for (index, old_result) in results.into_iter().enumerate() {
        let replacement = match used.iter().position(|(i, _)| *i == index) {
            Some(pos) => new_results[pos],
            None => new_results[0],
        };
        module.replace_all_uses(old_result, replacement);
    }
    module.erase_op(op);
    Some(Some(new_op))
}

// ─── Hoisting ─────────────────────────────────────────────────────

/// Moves `op` backward past every op satisfying `skip`, stopping at a
/// producer of one of its operands. Returns whether it moved.
fn hoist_backward(
    module: &mut Module,
    op: OpId,
    queue: &mut VecDeque<OpId>,
    skip: impl Fn(&OpKind) -> bool,
) -> bool {
    let mut curr = op;
    loop {
        let prev = match module.prev_op(curr) {
            Some(p) => p,
            None => break,
        };
        if !skip(&module.op(prev).kind) {
            break;
        }
        if module
            .operands(op)
            .iter()
            .any(|v| module.defining_op(*v) == Some(prev))
        {
            break;
        }
        curr = prev;
    }
    if curr == op {
        return false;
    }
    remember_site(module, op, queue);
    module.move_op_before(op, curr);
    true
}

/// Moves `op` forward past every op satisfying `skip`, stopping before the
/// region terminator. Returns whether it moved.
fn hoist_forward(
    module: &mut Module,
    op: OpId,
    queue: &mut VecDeque<OpId>,
    skip: impl Fn(&OpKind) -> bool,
) -> bool {
    let mut curr = op;
    loop {
        let next = match module.next_op(curr) {
            Some(n) => n,
            None => break,
        };
        if !skip(&module.op(next).kind) || module.op(next).kind.is_terminator() {
            break;
        }
        curr = next;
    }
    if curr == op {
        return false;
    }
    remember_site(module, op, queue);
    module.move_op_after(op, curr);
    true
}

/// Re-enqueues the neighbours of an op's current position before a move,
/// so patterns at the vacated site get another look.
fn remember_site(module: &Module, op: OpId, queue: &mut VecDeque<OpId>) {
    if let Some(prev) = module.prev_op(op) {
        queue.push_back(prev);
    }
    if let Some(next) = module.next_op(op) {
        queue.push_back(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::OpBuilder;
    use crate::ir::types::{Allocation, ElementKind, Type};
    use crate::ir::FuncKind;

    fn field_ty() -> Type {
        Type::field(ElementKind::F64, Allocation::IJK)
    }

    fn temp_ty() -> Type {
        Type::temp(ElementKind::F64, Allocation::IJK)
    }

    /// A routine with one field, one load, and an apply taking the loaded
    /// temp twice (a duplicate operand pair).
    fn program_with_duplicate_operands() -> (Module, OpId) {
        let mut m = Module::new();
        let (_, body) = OpBuilder::func(
            &mut m,
            "dup",
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
            vec![temp, temp],
            vec![temp_ty()],
            Some([0, 0, 0]),
            Some([8, 8, 8]),
        );
        let args = b.module().region_args(apply_body).to_vec();
        b.set_insertion_point_end(apply_body);
        let a0 = b.access(args[0], [0, 0, 0]);
        let v0 = b.result(a0);
        let a1 = b.access(args[1], [1, 0, 0]);
        let v1 = b.result(a1);
        let sum = b.binary(crate::ir::BinOp::Add, v0, v1);
        let sum_v = b.result(sum);
        b.return_op(vec![sum_v], None);
        b.set_insertion_point_end(body);
        let result = b.module().results(apply)[0];
        b.store(result, field, [0, 0, 0], [8, 8, 8]);
        b.func_return();
        (m, apply)
    }

    fn find_apply(m: &Module) -> OpId {
        *m.walk_ops()
            .iter()
            .find(|op| matches!(m.op(**op).kind, OpKind::Apply { .. }))
            .expect("no apply found")
    }

    #[test]
    fn test_argument_pruning_deduplicates() {
        let (mut m, _) = program_with_duplicate_operands();
        let changed = canonicalize(&mut m).unwrap();
        assert!(changed);
        let apply = find_apply(&m);
        assert_eq!(m.operands(apply).len(), 1);
        assert_eq!(m.region_args(m.regions_of(apply)[0]).len(), 1);
        crate::ir::verify::verify_module(&m).unwrap();
    }

    #[test]
    fn test_argument_pruning_idempotent() {
        let (mut m, _) = program_with_duplicate_operands();
        canonicalize(&mut m).unwrap();
        let changed = canonicalize(&mut m).unwrap();
        assert!(!changed);
    }

    #[test]
    fn test_dead_apply_is_erased() {
        let mut m = Module::new();
        let (_, body) = OpBuilder::func(
            &mut m,
            "dead",
            FuncKind::StencilProgram,
            &[field_ty()],
            vec![],
        );
        let field = m.region_args(body)[0];
        let mut b = OpBuilder::at_end(&mut m, body);
        let load = b.load(field);
        let temp = b.result(load);
        let (apply, apply_body) = b.apply(
            vec![temp],
            vec![temp_ty()],
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
        canonicalize(&mut m).unwrap();
        assert!(m.is_dead(apply));
        assert!(!m
            .walk_ops()
            .iter()
            .any(|op| matches!(m.op(*op).kind, OpKind::Apply { .. })));
    }

    #[test]
    fn test_result_pruning_keeps_used_slice() {
        let mut m = Module::new();
        let (_, body) = OpBuilder::func(
            &mut m,
            "prune",
            FuncKind::StencilProgram,
            &[field_ty()],
            vec![],
        );
        let field = m.region_args(body)[0];
        let mut b = OpBuilder::at_end(&mut m, body);
        let load = b.load(field);
        let temp = b.result(load);
        let (apply, apply_body) = b.apply(
            vec![temp],
            vec![temp_ty(), temp_ty(), temp_ty()],
            Some([0, 0, 0]),
            Some([4, 4, 4]),
        );
        let arg = b.module().region_args(apply_body)[0];
        b.set_insertion_point_end(apply_body);
        let a0 = b.access(arg, [-1, 0, 0]);
        let v0 = b.result(a0);
        let a1 = b.access(arg, [0, 0, 0]);
        let v1 = b.result(a1);
        let a2 = b.access(arg, [1, 0, 0]);
        let v2 = b.result(a2);
        b.return_op(vec![v0, v1, v2], None);
        b.set_insertion_point_end(body);
        // Only r1 is used.
        let r1 = b.module().results(apply)[1];
        b.store(r1, field, [0, 0, 0], [4, 4, 4]);
        b.func_return();

        canonicalize(&mut m).unwrap();
        let apply = find_apply(&m);
        assert_eq!(m.results(apply).len(), 1);
        let region = m.regions_of(apply)[0];
        let ret = m.terminator(region).unwrap();
        assert_eq!(m.operands(ret).len(), 1);
        // The kept terminator operand is the slice that produced r1, the
        // access at offset (0, 0, 0).
        let kept = m.defining_op(m.operands(ret)[0]).unwrap();
        assert_eq!(
            m.op(kept).kind,
            OpKind::Access { offset: [0, 0, 0] }
        );
        crate::ir::verify::verify_module(&m).unwrap();
    }

    #[test]
    fn test_store_hoists_forward() {
        let mut m = Module::new();
        let (_, body) = OpBuilder::func(
            &mut m,
            "sink",
            FuncKind::StencilProgram,
            &[field_ty()],
            vec![],
        );
        let field = m.region_args(body)[0];
        let mut b = OpBuilder::at_end(&mut m, body);
        let load = b.load(field);
        let temp = b.result(load);
        let store = b.store(temp, field, [0, 0, 0], [4, 4, 4]);
        // Ops after the store that it can sink past.
        let c0 = b.const_index(0);
        let c0v = b.result(c0);
        b.index_add(c0v, c0v);
        b.func_return();

        canonicalize(&mut m).unwrap();
        // The store is now the last op before the terminator.
        let ops = m.region_ops(body).to_vec();
        assert_eq!(ops[ops.len() - 2], store);
        assert!(matches!(m.op(ops[ops.len() - 1]).kind, OpKind::FuncReturn));
    }

    #[test]
    fn test_load_hoists_backward_and_terminates() {
        let mut m = Module::new();
        let (_, body) = OpBuilder::func(
            &mut m,
            "float",
            FuncKind::StencilProgram,
            &[field_ty(), field_ty()],
            vec![],
        );
        let f0 = m.region_args(body)[0];
        let f1 = m.region_args(body)[1];
        let mut b = OpBuilder::at_end(&mut m, body);
        let load0 = b.load(f0);
        let c = b.const_index(7);
        let cv = b.result(c);
        b.index_add(cv, cv);
        let load1 = b.load(f1);
        b.func_return();

        canonicalize(&mut m).unwrap();
        // load1 floated up to join load0 ahead of the index ops.
        let ops = m.region_ops(body).to_vec();
        assert_eq!(ops[0], load0);
        assert_eq!(ops[1], load1);
    }
}
