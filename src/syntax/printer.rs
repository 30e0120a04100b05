use std::collections::HashMap;
use std::fmt::Write;

use crate::ir::{FuncKind, Index, Module, OpId, OpKind, RegionId, ValueId};

/// Prints the canonical surface form of a module.
///
/// Values are numbered per routine in definition order; routine arguments
/// print as `%argN`. The output re-parses to a structurally equivalent
/// module and re-printing it reproduces the same text.
pub struct Printer<'m> {
    module: &'m Module,
    out: String,
    indent: usize,
    names: HashMap<ValueId, String>,
    next_id: usize,
}

impl<'m> Printer<'m> {
    pub fn new(module: &'m Module) -> Self {
        Self {
            module,
            out: String::new(),
            indent: 0,
            names: HashMap::new(),
            next_id: 0,
        }
    }

    pub fn print(mut self) -> String {
        for (i, func) in self.module.funcs().iter().enumerate() {
            if i > 0 {
                self.out.push('\n');
            }
            self.print_func(*func);
        }
        self.out
    }

    fn fresh(&mut self, value: ValueId) -> String {
        let name = format!("%{}", self.next_id);
        self.next_id += 1;
        self.names.insert(value, name.clone());
        name
    }

    fn name(&self, value: ValueId) -> &str {
        self.names.get(&value).map(|s| s.as_str()).unwrap_or("%?")
    }

    fn line_start(&mut self) {
        for _ in 0..self.indent {
            self.out.push_str("  ");
        }
    }

    fn print_func(&mut self, func: OpId) {
        self.names.clear();
        self.next_id = 0;
        let (name, kind, result_types) = match &self.module.op(func).kind {
            OpKind::Func {
                name,
                kind,
                result_types,
            } => (name.clone(), *kind, result_types.clone()),
            _ => unreachable!("module lists a non-routine"),
        };
        let body = self.module.regions_of(func)[0];

        self.line_start();
        write!(self.out, "func @{}(", name).unwrap();
        let args = self.module.region_args(body).to_vec();
        for (i, arg) in args.iter().enumerate() {
            if i > 0 {
                self.out.push_str(", ");
            }
            let arg_name = format!("%arg{}", i);
            self.names.insert(*arg, arg_name.clone());
            write!(self.out, "{} : {}", arg_name, self.module.value_type(*arg)).unwrap();
        }
        self.out.push(')');
        match kind {
            FuncKind::Plain => {}
            FuncKind::StencilProgram => self.out.push_str(" program"),
            FuncKind::StencilFunction => self.out.push_str(" function"),
        }
        if !result_types.is_empty() {
            self.out.push_str(" -> (");
            for (i, ty) in result_types.iter().enumerate() {
                if i > 0 {
                    self.out.push_str(", ");
                }
                write!(self.out, "{}", ty).unwrap();
            }
            self.out.push(')');
        }
        self.out.push_str(" {\n");
        self.indent += 1;
        for op in self.module.region_ops(body).to_vec() {
            self.print_op(op);
        }
        self.indent -= 1;
        self.line_start();
        self.out.push_str("}\n");
    }

    fn print_results(&mut self, op: OpId) {
        let results = self.module.results(op).to_vec();
        for (i, result) in results.iter().enumerate() {
            if i > 0 {
                self.out.push_str(", ");
            }
            let name = self.fresh(*result);
            self.out.push_str(&name);
        }
        if !results.is_empty() {
            self.out.push_str(" = ");
        }
    }

    fn print_operand_list(&mut self, operands: &[ValueId]) {
        for (i, operand) in operands.iter().enumerate() {
            if i > 0 {
                self.out.push_str(", ");
            }
            let name = self.name(*operand).to_string();
            self.out.push_str(&name);
        }
    }

    fn print_index(&mut self, index: Index) {
        write!(self.out, "[{}, {}, {}]", index[0], index[1], index[2]).unwrap();
    }

    fn print_bounds(&mut self, lb: Index, ub: Index) {
        self.out.push('(');
        self.print_index(lb);
        self.out.push_str(" : ");
        self.print_index(ub);
        self.out.push(')');
    }

    fn print_region_body(&mut self, region: RegionId) {
        self.out.push_str(" {\n");
        self.indent += 1;
        for op in self.module.region_ops(region).to_vec() {
            self.print_op(op);
        }
        self.indent -= 1;
        self.line_start();
        self.out.push('}');
    }

    fn print_op(&mut self, op: OpId) {
        self.line_start();
        let operands = self.module.operands(op).to_vec();
        match self.module.op(op).kind.clone() {
            OpKind::Assert { lb, ub } => {
                self.out.push_str("assert ");
                self.print_operand_list(&operands);
                self.out.push(' ');
                self.print_bounds(lb, ub);
            }
            OpKind::Load => {
                self.print_results(op);
                self.out.push_str("load ");
                self.print_operand_list(&operands);
                let result_ty = self.module.value_type(self.module.results(op)[0]);
                write!(self.out, " : {}", result_ty).unwrap();
            }
            OpKind::Store { lb, ub } => {
                self.out.push_str("store ");
                let view = self.name(operands[0]).to_string();
                let field = self.name(operands[1]).to_string();
                write!(self.out, "{} to {} ", view, field).unwrap();
                self.print_bounds(lb, ub);
            }
            OpKind::Cast { lb, ub } => {
                self.print_results(op);
                self.out.push_str("cast ");
                self.print_operand_list(&operands);
                self.out.push(' ');
                self.print_bounds(lb, ub);
            }
            OpKind::Access { offset } => {
                self.print_results(op);
                self.out.push_str("access ");
                self.print_operand_list(&operands);
                self.print_index(offset);
            }
            OpKind::DynAccess { lb, ub } => {
                self.print_results(op);
                self.out.push_str("dyn_access ");
                let view = self.name(operands[0]).to_string();
                self.out.push_str(&view);
                self.out.push('[');
                self.print_operand_list(&operands[1..]);
                self.out.push_str("] in ");
                self.print_bounds(lb, ub);
            }
            OpKind::Apply { lb, ub } => {
                self.print_results(op);
                self.out.push_str("apply ");
                let region = self.module.regions_of(op)[0];
                let args = self.module.region_args(region).to_vec();
                if !operands.is_empty() {
                    self.out.push('(');
                    for (i, (arg, operand)) in args.iter().zip(operands.iter()).enumerate() {
                        if i > 0 {
                            self.out.push_str(", ");
                        }
                        let arg_name = self.fresh(*arg);
                        let operand_name = self.name(*operand).to_string();
                        write!(
                            self.out,
                            "{} = {} : {}",
                            arg_name,
                            operand_name,
                            self.module.value_type(*operand)
                        )
                        .unwrap();
                    }
                    self.out.push_str(") ");
                }
                self.out.push_str("-> (");
                let results = self.module.results(op).to_vec();
                for (i, result) in results.iter().enumerate() {
                    if i > 0 {
                        self.out.push_str(", ");
                    }
                    write!(self.out, "{}", self.module.value_type(*result)).unwrap();
                }
                self.out.push(')');
                self.print_region_body(region);
                if let (Some(lb), Some(ub)) = (lb, ub) {
                    self.out.push_str(" to ");
                    self.print_bounds(lb, ub);
                }
            }
            OpKind::Return { unroll } => {
                self.out.push_str("return");
                if let Some(unroll) = unroll {
                    self.out.push_str(" unroll ");
                    self.print_index(unroll);
                }
                if !operands.is_empty() {
                    self.out.push(' ');
                    self.print_operand_list(&operands);
                }
            }
            OpKind::StoreResult => {
                self.print_results(op);
                self.out.push_str("store_result ");
                self.print_operand_list(&operands);
            }
            OpKind::Call { callee, offset } => {
                self.print_results(op);
                write!(self.out, "call @{}(", callee).unwrap();
                self.print_operand_list(&operands);
                self.out.push(')');
                self.print_index(offset);
                let result_ty = self.module.value_type(self.module.results(op)[0]);
                self.out.push_str(" : (");
                for (i, operand) in operands.iter().enumerate() {
                    if i > 0 {
                        self.out.push_str(", ");
                    }
                    write!(self.out, "{}", self.module.value_type(*operand)).unwrap();
                }
                write!(self.out, ") -> {}", result_ty).unwrap();
            }
            OpKind::Combine {
                dim,
                lower,
                upper,
                lowerext,
                upperext,
            } => {
                self.print_results(op);
                write!(self.out, "combine {} (", dim).unwrap();
                self.print_operand_list(&operands[..lower]);
                self.out.push_str(") (");
                self.print_operand_list(&operands[lower..lower + upper]);
                self.out.push(')');
                if lowerext > 0 {
                    self.out.push_str(" lowerext (");
                    self.print_operand_list(&operands[lower + upper..lower + upper + lowerext]);
                    self.out.push(')');
                }
                if upperext > 0 {
                    self.out.push_str(" upperext (");
                    self.print_operand_list(&operands[lower + upper + lowerext..]);
                    self.out.push(')');
                }
                self.out.push_str(" -> (");
                let results = self.module.results(op).to_vec();
                for (i, result) in results.iter().enumerate() {
                    if i > 0 {
                        self.out.push_str(", ");
                    }
                    write!(self.out, "{}", self.module.value_type(*result)).unwrap();
                }
                self.out.push(')');
            }
            OpKind::Func { .. } => unreachable!("routines print at module level"),
            OpKind::FuncReturn => {
                self.out.push_str("ret");
                if !operands.is_empty() {
                    self.out.push(' ');
                    self.print_operand_list(&operands);
                }
            }
            OpKind::For { lower, upper } => {
                let region = self.module.regions_of(op)[0];
                let iv = self.module.region_args(region)[0];
                self.out.push_str("for ");
                let iv_name = self.fresh(iv);
                self.out.push_str(&iv_name);
                write!(self.out, " in ({} : {})", lower, upper).unwrap();
                self.print_region_body(region);
            }
            OpKind::If => {
                self.print_results(op);
                self.out.push_str("if ");
                self.print_operand_list(&operands);
                let results = self.module.results(op).to_vec();
                if !results.is_empty() {
                    self.out.push_str(" -> (");
                    for (i, result) in results.iter().enumerate() {
                        if i > 0 {
                            self.out.push_str(", ");
                        }
                        write!(self.out, "{}", self.module.value_type(*result)).unwrap();
                    }
                    self.out.push(')');
                }
                let regions = self.module.regions_of(op).to_vec();
                self.print_region_body(regions[0]);
                self.out.push_str(" else");
                self.print_region_body(regions[1]);
            }
            OpKind::Yield => {
                self.out.push_str("yield");
                if !operands.is_empty() {
                    self.out.push(' ');
                    self.print_operand_list(&operands);
                }
            }
            OpKind::Alloc => {
                self.print_results(op);
                let ty = self.module.value_type(self.module.results(op)[0]);
                write!(self.out, "alloc : {}", ty).unwrap();
            }
            OpKind::Dealloc => {
                self.out.push_str("dealloc ");
                self.print_operand_list(&operands);
            }
            OpKind::LoadElem => {
                self.print_results(op);
                self.out.push_str("load_elem ");
                let buffer = self.name(operands[0]).to_string();
                self.out.push_str(&buffer);
                self.out.push('[');
                self.print_operand_list(&operands[1..]);
                self.out.push(']');
            }
            OpKind::StoreElem => {
                self.out.push_str("store_elem ");
                let value = self.name(operands[0]).to_string();
                let buffer = self.name(operands[1]).to_string();
                write!(self.out, "{}, {}[", value, buffer).unwrap();
                self.print_operand_list(&operands[2..]);
                self.out.push(']');
            }
            OpKind::ConstIndex { value } => {
                self.print_results(op);
                write!(self.out, "const_index {}", value).unwrap();
            }
            OpKind::IndexAdd => {
                self.print_results(op);
                self.out.push_str("index_add ");
                self.print_operand_list(&operands);
            }
            OpKind::Constant { value, element } => {
                self.print_results(op);
                write!(self.out, "const {} {}", element, format_float(value)).unwrap();
            }
            OpKind::Binary { op: bin } => {
                self.print_results(op);
                write!(self.out, "{} ", bin).unwrap();
                self.print_operand_list(&operands);
            }
        }
        self.out.push('\n');
    }
}

/// Floats always print with a decimal point so they re-lex as floats.
fn format_float(value: f64) -> String {
    if value == value.trunc() && value.is_finite() {
        format!("{:.1}", value)
    } else {
        format!("{}", value)
    }
}

// The parser provides the matching tests: every grammar case round-trips
// through `parse_module(print_module(m))`.
