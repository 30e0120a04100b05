//! Intermediate representation for stencil programs.
//!
//! The IR is a graph of typed operations stored in arenas and addressed by
//! stable handles. Values flow through def-use edges that are kept
//! consistent in both directions by the edit API on [`Module`]; rewrites
//! never patch operand lists directly.
//!
//! Two op vocabularies share one closed [`OpKind`] sum type: the stencil
//! dialect (assert/load/apply/... on logical grid storage) and the loop-nest
//! dialect the lowering pass produces (for/alloc/load_elem/... on concrete
//! buffers).

pub mod builder;
pub mod combine;
pub mod types;
pub mod verify;

use std::fmt;
use std::marker::PhantomData;

use crate::span::Span;

use self::types::{ElementKind, TempType, Type};

// ─── Index tuples ─────────────────────────────────────────────────

/// Bounds and offsets are fixed-arity tuples over the three grid dimensions.
pub const INDEX_SIZE: usize = 3;

/// An integer tuple attribute: a lower/upper bound or an access offset.
pub type Index = [i64; INDEX_SIZE];

/// Componentwise application of a binary function to two index tuples.
pub fn index_map(a: Index, b: Index, f: impl Fn(i64, i64) -> i64) -> Index {
    [f(a[0], b[0]), f(a[1], b[1]), f(a[2], b[2])]
}

// ─── Arena and ID types ───────────────────────────────────────────

/// Typed index into an [`Arena`]. Generic over the element type for type
/// safety.
pub struct Id<T> {
    index: u32,
    _phantom: PhantomData<T>,
}

// Manual impls to avoid requiring T: Clone/Copy/Debug/PartialEq/Eq/Hash.
// The derived versions would propagate T's bounds, but Id<T> equality
// depends only on the index, not on T.
impl<T> Clone for Id<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Id<T> {}

impl<T> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<T> Eq for Id<T> {}

impl<T> std::hash::Hash for Id<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

impl<T> fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.index)
    }
}

impl<T> Id<T> {
    fn new(index: u32) -> Self {
        Self {
            index,
            _phantom: PhantomData,
        }
    }

    /// The raw index into the arena.
    pub fn index(self) -> usize {
        self.index as usize
    }
}

/// Vec-backed arena with typed indexing via [`Id`]. Slots are never
/// reclaimed; erased operations are tombstoned so handles stay stable for
/// the lifetime of one compilation.
#[derive(Debug)]
pub struct Arena<T> {
    items: Vec<T>,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    pub fn push(&mut self, item: T) -> Id<T> {
        let id = Id::new(self.items.len() as u32);
        self.items.push(item);
        id
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T> std::ops::Index<Id<T>> for Arena<T> {
    type Output = T;
    fn index(&self, id: Id<T>) -> &T {
        &self.items[id.index()]
    }
}

impl<T> std::ops::IndexMut<Id<T>> for Arena<T> {
    fn index_mut(&mut self, id: Id<T>) -> &mut T {
        &mut self.items[id.index()]
    }
}

pub type OpId = Id<Operation>;
pub type ValueId = Id<Value>;
pub type RegionId = Id<Region>;

// ─── Values ───────────────────────────────────────────────────────

/// A single use of a value: the consuming operation and the operand slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Use {
    pub op: OpId,
    pub index: u16,
}

/// Where a value is defined.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueDef {
    /// Result `index` of an operation.
    OpResult { op: OpId, index: u16 },
    /// Argument `index` of a region.
    RegionArg { region: RegionId, index: u16 },
}

/// An immutable SSA value: one definition, a type, and a use list.
#[derive(Debug)]
pub struct Value {
    pub def: ValueDef,
    pub ty: Type,
    uses: Vec<Use>,
}

// ─── Regions ──────────────────────────────────────────────────────

/// An ordered operation sequence plus typed block arguments. Every
/// non-empty region ends with exactly one terminator operation.
#[derive(Debug)]
pub struct Region {
    owner: Option<OpId>,
    args: Vec<ValueId>,
    ops: Vec<OpId>,
}

// ─── Operations ───────────────────────────────────────────────────

/// How a routine participates in stencil compilation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FuncKind {
    /// Ordinary routine; the lowering pass leaves it untouched.
    Plain,
    /// A stencil entry point: void result, field arguments with asserts.
    StencilProgram,
    /// A stencil helper callable from apply bodies; exactly one result.
    StencilFunction,
}

/// Element arithmetic inside apply bodies and lowered loops.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BinOp::Add => write!(f, "add"),
            BinOp::Sub => write!(f, "sub"),
            BinOp::Mul => write!(f, "mul"),
            BinOp::Div => write!(f, "div"),
        }
    }
}

/// The kind tag plus kind-specific static attributes of an operation.
///
/// Operand and result values live uniformly on [`Operation`]; the variants
/// carry only attribute data, so rewrites can treat operand lists
/// generically while dispatch stays exhaustive.
#[derive(Clone, Debug, PartialEq)]
pub enum OpKind {
    // ── Stencil dialect ──
    /// Declares the index range `[lb, ub)` a field argument is accessed
    /// over. Operands: [field].
    Assert { lb: Index, ub: Index },
    /// Field to temp: makes persistent storage readable by an apply.
    /// Operands: [field]. Results: [temp].
    Load,
    /// Temp to field: writes an apply result back to persistent storage
    /// over `[lb, ub)`. Operands: [temp, field].
    Store { lb: Index, ub: Index },
    /// Fixes the static bounds of a field. Operands: [field].
    /// Results: [field].
    Cast { lb: Index, ub: Index },
    /// Reads a temp at a constant offset from the current iteration point.
    /// Operands: [temp]. Results: [element].
    Access { offset: Index },
    /// Data-dependent read with a conservative access extent `[lb, ub)`.
    /// Operands: [temp, i, j, k]. Results: [element].
    DynAccess { lb: Index, ub: Index },
    /// The core compute op: iterates `[lb, ub)` executing the body once
    /// per point. Operands: the temps the body reads; one region whose
    /// arguments mirror the operands. Results: one temp per computed
    /// output.
    Apply { lb: Option<Index>, ub: Option<Index> },
    /// Terminator of an apply body; one operand slice of `unroll` factor
    /// per apply result.
    Return { unroll: Option<Index> },
    /// Wraps a computed element so it can be traced to a terminator slot.
    /// Operands: [element]. Results: [element].
    StoreResult,
    /// Invokes a stencil function at an offset from the iteration point.
    /// Operands: the call arguments. Results: [element].
    Call { callee: String, offset: Index },
    /// Merges lower/upper sub-domain results along `dim`. The operand list
    /// is segmented as lower ++ upper ++ lowerext ++ upperext.
    Combine {
        dim: usize,
        lower: usize,
        upper: usize,
        lowerext: usize,
        upperext: usize,
    },

    // ── Routine structure ──
    /// A routine definition with one body region; not nested in a region.
    Func {
        name: String,
        kind: FuncKind,
        result_types: Vec<Type>,
    },
    /// Terminator of a routine body.
    FuncReturn,

    // ── Loop-nest dialect ──
    /// Counted loop over `[lower, upper)`; the region has one index
    /// argument, the induction variable.
    For { lower: i64, upper: i64 },
    /// Two-region conditional; regions yield the result values.
    /// Operands: [bool].
    If,
    /// Terminator of for/if bodies.
    Yield,
    /// Allocates a buffer. Results: [buffer].
    Alloc,
    /// Releases a buffer. Operands: [buffer].
    Dealloc,
    /// Reads one element. Operands: [buffer, i, j, k]. Results: [element].
    LoadElem,
    /// Writes one element. Operands: [element, buffer, i, j, k].
    StoreElem,
    /// Index immediate. Results: [index].
    ConstIndex { value: i64 },
    /// Index addition. Operands: [index, index]. Results: [index].
    IndexAdd,
    /// Element immediate. Results: [element].
    Constant { value: f64, element: ElementKind },
    /// Element arithmetic. Operands: [element, element].
    /// Results: [element].
    Binary { op: BinOp },
}

impl OpKind {
    /// The operation mnemonic used in diagnostics and the textual form.
    pub fn name(&self) -> &'static str {
        match self {
            OpKind::Assert { .. } => "assert",
            OpKind::Load => "load",
            OpKind::Store { .. } => "store",
            OpKind::Cast { .. } => "cast",
            OpKind::Access { .. } => "access",
            OpKind::DynAccess { .. } => "dyn_access",
            OpKind::Apply { .. } => "apply",
            OpKind::Return { .. } => "return",
            OpKind::StoreResult => "store_result",
            OpKind::Call { .. } => "call",
            OpKind::Combine { .. } => "combine",
            OpKind::Func { .. } => "func",
            OpKind::FuncReturn => "ret",
            OpKind::For { .. } => "for",
            OpKind::If => "if",
            OpKind::Yield => "yield",
            OpKind::Alloc => "alloc",
            OpKind::Dealloc => "dealloc",
            OpKind::LoadElem => "load_elem",
            OpKind::StoreElem => "store_elem",
            OpKind::ConstIndex { .. } => "const_index",
            OpKind::IndexAdd => "index_add",
            OpKind::Constant { .. } => "const",
            OpKind::Binary { op } => match op {
                BinOp::Add => "add",
                BinOp::Sub => "sub",
                BinOp::Mul => "mul",
                BinOp::Div => "div",
            },
        }
    }

    /// Whether the op belongs to the stencil dialect. The lowering pass
    /// must convert every stencil op inside a tagged routine.
    pub fn is_stencil(&self) -> bool {
        matches!(
            self,
            OpKind::Assert { .. }
                | OpKind::Load
                | OpKind::Store { .. }
                | OpKind::Cast { .. }
                | OpKind::Access { .. }
                | OpKind::DynAccess { .. }
                | OpKind::Apply { .. }
                | OpKind::Return { .. }
                | OpKind::StoreResult
                | OpKind::Call { .. }
                | OpKind::Combine { .. }
        )
    }

    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            OpKind::Return { .. } | OpKind::Yield | OpKind::FuncReturn
        )
    }
}

/// A typed IR node: kind tag, operand/result values, owned regions.
#[derive(Debug)]
pub struct Operation {
    pub kind: OpKind,
    pub span: Span,
    operands: Vec<ValueId>,
    results: Vec<ValueId>,
    regions: Vec<RegionId>,
    parent: Option<RegionId>,
    dead: bool,
}

// ─── Module ───────────────────────────────────────────────────────

/// One compilation unit: arenas plus the ordered list of routines.
///
/// All structural edits go through the methods below, which update def-use
/// edges in both directions. A rewrite either completes or leaves the
/// module untouched; there is no partial-edit state to observe because the
/// module is single-threaded by construction.
#[derive(Debug, Default)]
pub struct Module {
    ops: Arena<Operation>,
    values: Arena<Value>,
    regions: Arena<Region>,
    funcs: Vec<OpId>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Accessors ─────────────────────────────────────────────────

    pub fn op(&self, id: OpId) -> &Operation {
        &self.ops[id]
    }

    pub fn value(&self, id: ValueId) -> &Value {
        &self.values[id]
    }

    pub fn value_type(&self, id: ValueId) -> Type {
        self.values[id].ty
    }

    pub fn operands(&self, id: OpId) -> &[ValueId] {
        &self.ops[id].operands
    }

    pub fn results(&self, id: OpId) -> &[ValueId] {
        &self.ops[id].results
    }

    pub fn regions_of(&self, id: OpId) -> &[RegionId] {
        &self.ops[id].regions
    }

    pub fn uses(&self, id: ValueId) -> &[Use] {
        &self.values[id].uses
    }

    pub fn use_empty(&self, id: ValueId) -> bool {
        self.values[id].uses.is_empty()
    }

    pub fn has_one_use(&self, id: ValueId) -> bool {
        self.values[id].uses.len() == 1
    }

    /// The operations using `id`, deduplicated in first-use order.
    pub fn users(&self, id: ValueId) -> Vec<OpId> {
        let mut out = Vec::new();
        for use_ in &self.values[id].uses {
            if !out.contains(&use_.op) {
                out.push(use_.op);
            }
        }
        out
    }

    pub fn defining_op(&self, id: ValueId) -> Option<OpId> {
        match self.values[id].def {
            ValueDef::OpResult { op, .. } => Some(op),
            ValueDef::RegionArg { .. } => None,
        }
    }

    pub fn region_args(&self, id: RegionId) -> &[ValueId] {
        &self.regions[id].args
    }

    pub fn region_ops(&self, id: RegionId) -> &[OpId] {
        &self.regions[id].ops
    }

    pub fn region_owner(&self, id: RegionId) -> Option<OpId> {
        self.regions[id].owner
    }

    /// The last operation of a region, which verification guarantees is
    /// its terminator.
    pub fn terminator(&self, id: RegionId) -> Option<OpId> {
        self.regions[id].ops.last().copied()
    }

    pub fn parent_region(&self, id: OpId) -> Option<RegionId> {
        self.ops[id].parent
    }

    pub fn parent_op(&self, id: OpId) -> Option<OpId> {
        self.ops[id].parent.and_then(|r| self.regions[r].owner)
    }

    pub fn is_dead(&self, id: OpId) -> bool {
        self.ops[id].dead
    }

    pub fn funcs(&self) -> &[OpId] {
        &self.funcs
    }

    pub fn func_by_name(&self, name: &str) -> Option<OpId> {
        self.funcs
            .iter()
            .copied()
            .find(|f| matches!(&self.ops[*f].kind, OpKind::Func { name: n, .. } if n.as_str() == name))
    }

    pub fn prev_op(&self, id: OpId) -> Option<OpId> {
        let region = self.ops[id].parent?;
        let pos = self.position_in(region, id)?;
        if pos == 0 {
            None
        } else {
            Some(self.regions[region].ops[pos - 1])
        }
    }

    pub fn next_op(&self, id: OpId) -> Option<OpId> {
        let region = self.ops[id].parent?;
        let pos = self.position_in(region, id)?;
        self.regions[region].ops.get(pos + 1).copied()
    }

    fn position_in(&self, region: RegionId, id: OpId) -> Option<usize> {
        self.regions[region].ops.iter().position(|o| *o == id)
    }

    /// All live operations in program order: routines in declaration
    /// order, then each body pre-order with nested regions after their
    /// owner.
    pub fn walk_ops(&self) -> Vec<OpId> {
        let mut out = Vec::new();
        for func in &self.funcs {
            out.push(*func);
            for region in &self.ops[*func].regions {
                self.walk_region(*region, &mut out);
            }
        }
        out
    }

    /// All live operations inside one routine's body, pre-order.
    pub fn walk_region_of(&self, func: OpId) -> Vec<OpId> {
        let mut out = Vec::new();
        for region in &self.ops[func].regions {
            self.walk_region(*region, &mut out);
        }
        out
    }

    fn walk_region(&self, region: RegionId, out: &mut Vec<OpId>) {
        for op in &self.regions[region].ops {
            out.push(*op);
            for nested in &self.ops[*op].regions {
                self.walk_region(*nested, out);
            }
        }
    }

    // ── Construction ──────────────────────────────────────────────

    pub fn new_region(&mut self, arg_types: &[Type]) -> RegionId {
        let region = self.regions.push(Region {
            owner: None,
            args: Vec::new(),
            ops: Vec::new(),
        });
        for ty in arg_types {
            self.add_region_arg(region, *ty);
        }
        region
    }

    pub fn add_region_arg(&mut self, region: RegionId, ty: Type) -> ValueId {
        let index = self.regions[region].args.len() as u16;
        let value = self.values.push(Value {
            def: ValueDef::RegionArg { region, index },
            ty,
            uses: Vec::new(),
        });
        self.regions[region].args.push(value);
        value
    }

    /// Creates an operation with its result values and registers operand
    /// uses. The op is detached; insert it with one of the placement
    /// methods or [`Module::add_func`].
    pub fn create_op(
        &mut self,
        span: Span,
        kind: OpKind,
        operands: Vec<ValueId>,
        result_types: Vec<Type>,
        regions: Vec<RegionId>,
    ) -> OpId {
        let id = self.ops.push(Operation {
            kind,
            span,
            operands: operands.clone(),
            results: Vec::new(),
            regions: regions.clone(),
            parent: None,
            dead: false,
        });
        for (index, operand) in operands.iter().enumerate() {
            self.values[*operand].uses.push(Use {
                op: id,
                index: index as u16,
            });
        }
        for (index, ty) in result_types.into_iter().enumerate() {
            let value = self.values.push(Value {
                def: ValueDef::OpResult {
                    op: id,
                    index: index as u16,
                },
                ty,
                uses: Vec::new(),
            });
            self.ops[id].results.push(value);
        }
        for region in regions {
            debug_assert!(self.regions[region].owner.is_none());
            self.regions[region].owner = Some(id);
        }
        id
    }

    pub fn add_func(&mut self, func: OpId) {
        debug_assert!(matches!(self.ops[func].kind, OpKind::Func { .. }));
        self.funcs.push(func);
    }

    /// Replaces `old` with `new` at the same position of the routine list.
    pub fn replace_func(&mut self, old: OpId, new: OpId) {
        let pos = self
            .funcs
            .iter()
            .position(|f| *f == old)
            .expect("routine not registered");
        self.funcs[pos] = new;
    }

    pub fn push_op(&mut self, region: RegionId, op: OpId) {
        debug_assert!(self.ops[op].parent.is_none());
        self.ops[op].parent = Some(region);
        self.regions[region].ops.push(op);
    }

    pub fn insert_op_at_start(&mut self, region: RegionId, op: OpId) {
        debug_assert!(self.ops[op].parent.is_none());
        self.ops[op].parent = Some(region);
        self.regions[region].ops.insert(0, op);
    }

    pub fn insert_op_before(&mut self, anchor: OpId, op: OpId) {
        debug_assert!(self.ops[op].parent.is_none());
        let region = self.ops[anchor].parent.expect("anchor is detached");
        let pos = self.position_in(region, anchor).unwrap();
        self.ops[op].parent = Some(region);
        self.regions[region].ops.insert(pos, op);
    }

    pub fn insert_op_after(&mut self, anchor: OpId, op: OpId) {
        debug_assert!(self.ops[op].parent.is_none());
        let region = self.ops[anchor].parent.expect("anchor is detached");
        let pos = self.position_in(region, anchor).unwrap();
        self.ops[op].parent = Some(region);
        self.regions[region].ops.insert(pos + 1, op);
    }

    // ── Mutation ──────────────────────────────────────────────────

    pub fn set_operand(&mut self, op: OpId, index: usize, value: ValueId) {
        let old = self.ops[op].operands[index];
        let use_ = Use {
            op,
            index: index as u16,
        };
        self.values[old].uses.retain(|u| *u != use_);
        self.ops[op].operands[index] = value;
        self.values[value].uses.push(use_);
    }

    /// Rewires every use of `old` to `new` in one edit.
    pub fn replace_all_uses(&mut self, old: ValueId, new: ValueId) {
        if old == new {
            return;
        }
        let uses = std::mem::take(&mut self.values[old].uses);
        for use_ in &uses {
            self.ops[use_.op].operands[use_.index as usize] = new;
        }
        self.values[new].uses.extend(uses);
    }

    pub fn set_value_type(&mut self, value: ValueId, ty: Type) {
        self.values[value].ty = ty;
    }

    fn detach_op(&mut self, op: OpId) {
        if let Some(region) = self.ops[op].parent.take() {
            self.regions[region].ops.retain(|o| *o != op);
        }
    }

    pub fn move_op_before(&mut self, op: OpId, anchor: OpId) {
        self.detach_op(op);
        self.insert_op_before(anchor, op);
    }

    pub fn move_op_after(&mut self, op: OpId, anchor: OpId) {
        self.detach_op(op);
        self.insert_op_after(anchor, op);
    }

    /// Moves every operation of `src` to the start of `dst`, preserving
    /// order. Region arguments are not touched; remap them first.
    pub fn splice_region_start(&mut self, src: RegionId, dst: RegionId) {
        let moved = std::mem::take(&mut self.regions[src].ops);
        for op in &moved {
            self.ops[*op].parent = Some(dst);
        }
        let rest = std::mem::take(&mut self.regions[dst].ops);
        let dst_region = &mut self.regions[dst];
        dst_region.ops = moved;
        dst_region.ops.extend(rest);
    }

    /// Erases an operation and everything its regions contain. Operand
    /// uses are unregistered; results must already be use-free.
    pub fn erase_op(&mut self, op: OpId) {
        self.detach_op(op);
        if let Some(pos) = self.funcs.iter().position(|f| *f == op) {
            self.funcs.remove(pos);
        }
        self.erase_op_inner(op);
    }

    fn erase_op_inner(&mut self, op: OpId) {
        // Children in reverse program order so users die before producers.
        for region in self.ops[op].regions.clone() {
            let children = std::mem::take(&mut self.regions[region].ops);
            for child in children.into_iter().rev() {
                self.erase_op_inner(child);
            }
        }
        for (index, operand) in self.ops[op].operands.clone().into_iter().enumerate() {
            let use_ = Use {
                op,
                index: index as u16,
            };
            self.values[operand].uses.retain(|u| *u != use_);
        }
        for result in self.ops[op].results.clone() {
            debug_assert!(
                self.values[result].uses.is_empty(),
                "erased op has live result uses"
            );
        }
        self.ops[op].dead = true;
    }

    // ── Op-specific helpers ───────────────────────────────────────

    /// The iteration bounds of an apply, when both are set.
    pub fn apply_bounds(&self, op: OpId) -> Option<(Index, Index)> {
        match self.ops[op].kind {
            OpKind::Apply { lb, ub } => Some((lb?, ub?)),
            _ => None,
        }
    }

    /// The unroll factor of a return op: the product of its unroll tuple,
    /// 1 when unset.
    pub fn unroll_factor(&self, op: OpId) -> usize {
        match self.ops[op].kind {
            OpKind::Return {
                unroll: Some(unroll),
            } => unroll.iter().product::<i64>().max(1) as usize,
            _ => 1,
        }
    }

    /// The conservative access extent of a dyn_access.
    pub fn dyn_access_extent(&self, op: OpId) -> (Index, Index) {
        match self.ops[op].kind {
            OpKind::DynAccess { lb, ub } => (lb, ub),
            _ => unreachable!("not a dyn_access"),
        }
    }

    /// Translates a dyn_access extent by `offset`, componentwise on both
    /// bounds, so the recorded extent reflects the composed offset.
    pub fn shift_by_offset(&mut self, op: OpId, offset: Index) {
        if let OpKind::DynAccess { lb, ub } = &mut self.ops[op].kind {
            *lb = index_map(*lb, offset, |a, b| a + b);
            *ub = index_map(*ub, offset, |a, b| a + b);
            debug_assert!(lb.iter().zip(ub.iter()).all(|(l, u)| l <= u));
        } else {
            unreachable!("not a dyn_access");
        }
    }

    /// Narrows an apply's block argument types to its operand types when
    /// upstream shape inference tightened them. Element type and
    /// allocation must agree; only the shape may change.
    pub fn update_argument_types(&mut self, apply: OpId) {
        debug_assert!(matches!(self.ops[apply].kind, OpKind::Apply { .. }));
        let region = self.ops[apply].regions[0];
        for (index, operand) in self.ops[apply].operands.clone().into_iter().enumerate() {
            let arg = self.regions[region].args[index];
            let new_ty = self.values[operand].ty;
            if new_ty == self.values[arg].ty {
                continue;
            }
            let (new_t, old_t) = match (new_ty, self.values[arg].ty) {
                (Type::Temp(n), Type::Temp(o)) => (n, o),
                _ => unreachable!("expected temp operand and argument"),
            };
            assert_eq!(
                new_t.element, old_t.element,
                "expected the same element type"
            );
            assert_eq!(
                new_t.allocation, old_t.allocation,
                "expected the same allocation"
            );
            self.values[arg].ty = new_ty;
        }
    }

    /// Pairwise compatibility of two temp types for a combine along `dim`.
    pub fn compatible_temps(&self, a: ValueId, b: ValueId, dim: usize) -> bool {
        match (self.values[a].ty, self.values[b].ty) {
            (Type::Temp(ta), Type::Temp(tb)) => ta.compatible_except(&tb, dim),
            _ => false,
        }
    }

    /// Convenience accessor for a temp-typed value.
    pub fn temp_type(&self, value: ValueId) -> Option<TempType> {
        match self.values[value].ty {
            Type::Temp(t) => Some(t),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::types::{Allocation, ElementKind};
    use super::*;

    fn test_module() -> (Module, OpId, RegionId) {
        let mut m = Module::new();
        let body = m.new_region(&[]);
        let ret = m.create_op(Span::dummy(), OpKind::FuncReturn, vec![], vec![], vec![]);
        m.push_op(body, ret);
        let func = m.create_op(
            Span::dummy(),
            OpKind::Func {
                name: "main".into(),
                kind: FuncKind::StencilProgram,
                result_types: vec![],
            },
            vec![],
            vec![],
            vec![body],
        );
        m.add_func(func);
        (m, func, body)
    }

    #[test]
    fn test_create_op_registers_uses() {
        let (mut m, _, body) = test_module();
        let c = m.create_op(
            Span::dummy(),
            OpKind::ConstIndex { value: 4 },
            vec![],
            vec![Type::Index],
            vec![],
        );
        let v = m.results(c)[0];
        let add = m.create_op(
            Span::dummy(),
            OpKind::IndexAdd,
            vec![v, v],
            vec![Type::Index],
            vec![],
        );
        m.insert_op_at_start(body, add);
        m.insert_op_at_start(body, c);
        assert_eq!(m.uses(v).len(), 2);
        assert_eq!(m.users(v), vec![add]);
        assert_eq!(m.defining_op(v), Some(c));
    }

    #[test]
    fn test_replace_all_uses() {
        let (mut m, _, body) = test_module();
        let a = m.create_op(
            Span::dummy(),
            OpKind::ConstIndex { value: 1 },
            vec![],
            vec![Type::Index],
            vec![],
        );
        let b = m.create_op(
            Span::dummy(),
            OpKind::ConstIndex { value: 2 },
            vec![],
            vec![Type::Index],
            vec![],
        );
        let va = m.results(a)[0];
        let vb = m.results(b)[0];
        let add = m.create_op(
            Span::dummy(),
            OpKind::IndexAdd,
            vec![va, va],
            vec![Type::Index],
            vec![],
        );
        m.insert_op_at_start(body, add);
        m.insert_op_at_start(body, b);
        m.insert_op_at_start(body, a);
        m.replace_all_uses(va, vb);
        assert!(m.use_empty(va));
        assert_eq!(m.uses(vb).len(), 2);
        assert_eq!(m.operands(add), [vb, vb]);
    }

    #[test]
    fn test_erase_op_unregisters_uses() {
        let (mut m, _, body) = test_module();
        let c = m.create_op(
            Span::dummy(),
            OpKind::ConstIndex { value: 0 },
            vec![],
            vec![Type::Index],
            vec![],
        );
        let v = m.results(c)[0];
        let add = m.create_op(
            Span::dummy(),
            OpKind::IndexAdd,
            vec![v, v],
            vec![Type::Index],
            vec![],
        );
        m.insert_op_at_start(body, add);
        m.insert_op_at_start(body, c);
        m.erase_op(add);
        assert!(m.is_dead(add));
        assert!(m.use_empty(v));
        assert!(!m.is_dead(c));
    }

    #[test]
    fn test_move_op_before() {
        let (mut m, _, body) = test_module();
        let a = m.create_op(
            Span::dummy(),
            OpKind::ConstIndex { value: 1 },
            vec![],
            vec![Type::Index],
            vec![],
        );
        let b = m.create_op(
            Span::dummy(),
            OpKind::ConstIndex { value: 2 },
            vec![],
            vec![Type::Index],
            vec![],
        );
        m.insert_op_at_start(body, b);
        m.insert_op_at_start(body, a);
        // body: [a, b, ret]
        m.move_op_before(b, a);
        let ops = m.region_ops(body);
        assert_eq!(ops[0], b);
        assert_eq!(ops[1], a);
        assert_eq!(m.prev_op(a), Some(b));
        assert_eq!(m.next_op(b), Some(a));
    }

    #[test]
    fn test_walk_ops_program_order() {
        let (m, func, body) = test_module();
        let walked = m.walk_ops();
        assert_eq!(walked[0], func);
        assert_eq!(walked[1], m.region_ops(body)[0]);
    }

    #[test]
    fn test_shift_by_offset() {
        let (mut m, _, body) = test_module();
        let temp = m.new_region(&[Type::temp(ElementKind::F64, Allocation::IJK)]);
        let view = m.region_args(temp)[0];
        let iv = m.create_op(
            Span::dummy(),
            OpKind::ConstIndex { value: 0 },
            vec![],
            vec![Type::Index],
            vec![],
        );
        let ivv = m.results(iv)[0];
        let dyn_access = m.create_op(
            Span::dummy(),
            OpKind::DynAccess {
                lb: [-1, 0, 0],
                ub: [1, 0, 0],
            },
            vec![view, ivv, ivv, ivv],
            vec![Type::Element(ElementKind::F64)],
            vec![],
        );
        m.insert_op_at_start(body, dyn_access);
        m.insert_op_at_start(body, iv);
        m.shift_by_offset(dyn_access, [2, 1, 0]);
        assert_eq!(m.dyn_access_extent(dyn_access), ([1, 1, 0], [3, 1, 0]));
    }

    #[test]
    fn test_update_argument_types_narrows_shape() {
        let (mut m, _, body) = test_module();
        let outer = m.new_region(&[Type::temp(ElementKind::F64, Allocation::IJK)]);
        let operand = m.region_args(outer)[0];
        let inner = m.new_region(&[Type::temp(ElementKind::F64, Allocation::IJK)]);
        let apply = m.create_op(
            Span::dummy(),
            OpKind::Apply {
                lb: Some([0, 0, 0]),
                ub: Some([4, 4, 4]),
            },
            vec![operand],
            vec![Type::temp(ElementKind::F64, Allocation::IJK)],
            vec![inner],
        );
        m.insert_op_at_start(body, apply);
        // Shape inference narrowed the operand type.
        let narrowed = Type::Temp(types::TempType {
            element: ElementKind::F64,
            allocation: Allocation::IJK,
            shape: [Some(4), Some(4), Some(4)],
        });
        m.set_value_type(operand, narrowed);
        m.update_argument_types(apply);
        assert_eq!(m.value_type(m.region_args(inner)[0]), narrowed);
    }

    #[test]
    fn test_unroll_factor() {
        let (mut m, _, _) = test_module();
        let r = m.create_op(
            Span::dummy(),
            OpKind::Return {
                unroll: Some([1, 2, 1]),
            },
            vec![],
            vec![],
            vec![],
        );
        assert_eq!(m.unroll_factor(r), 2);
        let r2 = m.create_op(
            Span::dummy(),
            OpKind::Return { unroll: None },
            vec![],
            vec![],
            vec![],
        );
        assert_eq!(m.unroll_factor(r2), 1);
    }
}
