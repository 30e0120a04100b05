//! Combine-tree queries.
//!
//! A combine merges sub-domain results along one dimension and may feed
//! another combine, forming a tree. Bound inference works on the tree root;
//! verification relies on the operand-provenance check; the store_result
//! trace decides whether a computed value reaches a well-defined terminator
//! slot.

use super::{Module, OpId, OpKind, Use};

/// Walks upward from a combine through single-use chains of combine
/// consumers and returns the outermost combine of the tree, i.e. the node
/// whose results are not consumed by exactly one other combine.
pub fn combine_tree_root(module: &Module, op: OpId) -> OpId {
    debug_assert!(matches!(module.op(op).kind, OpKind::Combine { .. }));
    let mut curr = op;
    loop {
        let mut uses = Vec::new();
        for result in module.results(curr) {
            uses.extend(module.uses(*result).iter().copied());
        }
        match uses.as_slice() {
            [only] if matches!(module.op(only.op).kind, OpKind::Combine { .. }) => {
                curr = only.op;
            }
            _ => return curr,
        }
    }
}

/// Checks that `base` and `extra` operands connect one-by-one either to a
/// single combine or to a set of applies whose total result count matches.
/// Every operand must additionally be the only use of its value.
pub fn one_by_one_operand_mapping(
    module: &Module,
    base: &[super::ValueId],
    extra: &[super::ValueId],
) -> bool {
    let mut defining: Vec<OpId> = Vec::new();
    for value in base.iter().chain(extra.iter()) {
        match module.defining_op(*value) {
            Some(op) if !defining.contains(&op) => defining.push(op),
            Some(_) => {}
            None => return false,
        }
    }
    if !base
        .iter()
        .chain(extra.iter())
        .all(|v| module.has_one_use(*v))
    {
        return false;
    }
    let first = match defining.first() {
        Some(op) => *op,
        None => return true,
    };
    if matches!(module.op(first).kind, OpKind::Combine { .. }) {
        return defining.len() == 1
            && module.results(first).len() == base.len() + extra.len();
    }
    let mut num_results = 0;
    for op in &defining {
        if !matches!(module.op(*op).kind, OpKind::Apply { .. }) {
            return false;
        }
        num_results += module.results(*op).len();
    }
    num_results == base.len() + extra.len()
}

fn has_ancestor_apply(module: &Module, op: OpId) -> bool {
    let mut curr = op;
    while let Some(parent) = module.parent_op(curr) {
        if matches!(module.op(parent).kind, OpKind::Apply { .. }) {
            return true;
        }
        curr = parent;
    }
    false
}

/// Traces the result of a store_result forward through single-consumer
/// chains to the apply terminator and returns the terminator uses it
/// reaches. Returns `None` when the chain forks, passes a yield of a loop
/// nested in an apply (a conditionally produced value is not a plain apply
/// result), or hits any other construct.
pub fn return_op_operands(module: &Module, store_result: OpId) -> Option<Vec<Use>> {
    debug_assert!(matches!(module.op(store_result).kind, OpKind::StoreResult));
    let result = module.results(store_result)[0];

    let mut curr_operands: Vec<Use> = module.uses(result).to_vec();
    let mut curr_operations: Vec<OpId> = Vec::new();
    for use_ in &curr_operands {
        if !curr_operations.contains(&use_.op) {
            curr_operations.push(use_.op);
        }
    }

    while curr_operations.len() == 1 {
        let owner = curr_operations[0];
        match module.op(owner).kind {
            OpKind::Return { .. } => return Some(curr_operands),
            OpKind::Yield => {
                let parent = module.parent_op(owner)?;
                if matches!(module.op(parent).kind, OpKind::For { .. })
                    && has_ancestor_apply(module, parent)
                {
                    return None;
                }
                // Climb to the parent's results and gather their uses.
                curr_operations.clear();
                let mut next_operands = Vec::new();
                for use_ in &curr_operands {
                    let result = *module.results(parent).get(use_.index as usize)?;
                    for next in module.uses(result) {
                        next_operands.push(*next);
                        if !curr_operations.contains(&next.op) {
                            curr_operations.push(next.op);
                        }
                    }
                }
                curr_operands = next_operands;
            }
            _ => return None,
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::super::builder::OpBuilder;
    use super::super::types::{Allocation, ElementKind, Type};
    use super::super::{FuncKind, Module, OpKind, RegionId, ValueId};
    use super::*;

    fn temp_ty() -> Type {
        Type::temp(ElementKind::F64, Allocation::IJK)
    }

    /// An apply with `n` results over a loaded field.
    fn make_apply(
        b: &mut OpBuilder<'_>,
        temp: ValueId,
        n: usize,
        parent: RegionId,
    ) -> Vec<ValueId> {
        b.set_insertion_point_end(parent);
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
        b.set_insertion_point_end(parent);
        b.module().results(apply).to_vec()
    }

    fn combine_of(
        b: &mut OpBuilder<'_>,
        lower: Vec<ValueId>,
        upper: Vec<ValueId>,
        n_results: usize,
    ) -> super::super::OpId {
        let count = lower.len();
        let operands = lower.into_iter().chain(upper).collect();
        b.insert(
            OpKind::Combine {
                dim: 2,
                lower: count,
                upper: count,
                lowerext: 0,
                upperext: 0,
            },
            operands,
            vec![temp_ty(); n_results],
            vec![],
        )
    }

    #[test]
    fn test_combine_tree_root_walks_single_use_chain() {
        let mut m = Module::new();
        let (_, body) = OpBuilder::func(
            &mut m,
            "f",
            FuncKind::Plain,
            &[Type::field(ElementKind::F64, Allocation::IJK)],
            vec![],
        );
        let field = m.region_args(body)[0];
        let mut b = OpBuilder::at_end(&mut m, body);
        let load = b.load(field);
        let temp = b.result(load);

        let lower = make_apply(&mut b, temp, 1, body);
        let upper = make_apply(&mut b, temp, 1, body);
        let leaf = combine_of(&mut b, lower, upper, 1);
        let leaf_result = b.result(leaf);
        let sibling = make_apply(&mut b, temp, 1, body);
        let root = combine_of(&mut b, vec![leaf_result], sibling, 1);
        let root_result = b.result(root);
        b.store(root_result, field, [0, 0, 0], [8, 8, 8]);
        b.func_return();

        assert_eq!(combine_tree_root(&m, leaf), root);
        assert_eq!(combine_tree_root(&m, root), root);
    }

    #[test]
    fn test_one_by_one_mapping_applies() {
        let mut m = Module::new();
        let (_, body) = OpBuilder::func(
            &mut m,
            "f",
            FuncKind::Plain,
            &[Type::field(ElementKind::F64, Allocation::IJK)],
            vec![],
        );
        let field = m.region_args(body)[0];
        let mut b = OpBuilder::at_end(&mut m, body);
        let load = b.load(field);
        let temp = b.result(load);

        let a = make_apply(&mut b, temp, 2, body);
        assert!(one_by_one_operand_mapping(&m, &a[..1], &a[1..]));
        // A partial connection does not cover the apply's results.
        assert!(!one_by_one_operand_mapping(&m, &a[..1], &[]));
    }

    #[test]
    fn test_return_op_operands_direct() {
        let mut m = Module::new();
        let (_, body) = OpBuilder::func(
            &mut m,
            "f",
            FuncKind::Plain,
            &[Type::field(ElementKind::F64, Allocation::IJK)],
            vec![],
        );
        let field = m.region_args(body)[0];
        let mut b = OpBuilder::at_end(&mut m, body);
        let load = b.load(field);
        let temp = b.result(load);
        let (_, region) = b.apply(
            vec![temp],
            vec![temp_ty()],
            Some([0, 0, 0]),
            Some([4, 4, 4]),
        );
        let arg = b.module().region_args(region)[0];
        b.set_insertion_point_end(region);
        let access = b.access(arg, [0, 0, 0]);
        let value = b.result(access);
        let wrapped = b.store_result(value);
        let wrapped_value = b.result(wrapped);
        let ret = b.return_op(vec![wrapped_value], None);
        b.set_insertion_point_end(body);
        b.func_return();

        let operands = return_op_operands(&m, wrapped).expect("reaches the terminator");
        assert_eq!(operands.len(), 1);
        assert_eq!(operands[0].op, ret);
        assert_eq!(operands[0].index, 0);
    }

    #[test]
    fn test_return_op_operands_rejects_loop_yield() {
        let mut m = Module::new();
        let (_, body) = OpBuilder::func(
            &mut m,
            "f",
            FuncKind::Plain,
            &[Type::field(ElementKind::F64, Allocation::IJK)],
            vec![],
        );
        let field = m.region_args(body)[0];
        let mut b = OpBuilder::at_end(&mut m, body);
        let load = b.load(field);
        let temp = b.result(load);
        let (_, region) = b.apply(
            vec![temp],
            vec![temp_ty()],
            Some([0, 0, 0]),
            Some([4, 4, 4]),
        );
        let arg = b.module().region_args(region)[0];
        b.set_insertion_point_end(region);
        let (_, loop_body) = b.for_op(0, 4);
        b.set_insertion_point_end(loop_body);
        let access = b.access(arg, [0, 0, 0]);
        let value = b.result(access);
        let wrapped = b.store_result(value);
        let wrapped_value = b.result(wrapped);
        // Feed the wrapped value into the loop yield: produced
        // conditionally per iteration, so it is not a plain apply result.
        let yield_op = b.module().terminator(loop_body).unwrap();
        b.module().erase_op(yield_op);
        b.set_insertion_point_end(loop_body);
        b.insert(OpKind::Yield, vec![wrapped_value], vec![], vec![]);
        b.set_insertion_point_end(region);
        let access2 = b.access(arg, [0, 0, 0]);
        let fallback = b.result(access2);
        b.return_op(vec![fallback], None);
        b.set_insertion_point_end(body);
        b.func_return();

        assert_eq!(return_op_operands(&m, wrapped), None);
    }
}
