use std::collections::HashMap;

use inkwell::{
    basic_block::BasicBlock,
    builder::Builder,
    context::Context,
    module::Module,
    passes::PassManager,
    targets::{InitializationConfig, Target},
    types::BasicMetadataTypeEnum,
    values::{BasicMetadataValueEnum, BasicValueEnum, FloatValue, FunctionValue, InstructionValue},
    FloatPredicate, OptimizationLevel,
};

use crate::ast::{Expression, Function, Prototype};
use crate::registry::FunctionRegistry;

type EntryFunc = unsafe extern "C" fn() -> f64;

#[derive(Debug, thiserror::Error)]
pub enum CodegenError {
    #[error("unknown variable referenced {0}")]
    UnknownVariable(String),
    #[error("unknown operator {0}")]
    UnknownOperator(char),
    #[error("unknown function referenced {0}")]
    UnknownFunction(String),
    #[error("invalid number of args in call {0} expected {1} found {2}")]
    InvalidCall(String, usize, usize),
    #[error("function {0} is already defined")]
    Redefinition(String),
    #[error("function {0} was declared with {1} args but is redeclared with {2}")]
    IncompatibleRedefinition(String, usize, usize),
    #[error("failed to verify function {0}")]
    InvalidFunction(String),
    #[error("builder is not positioned inside a function")]
    NoInsertBlock,
    #[error("call to {0} produced no value")]
    NoValue(String),
    #[error("execution engine failure: {0}")]
    ExecutionEngine(String),
}

/// Declares `double name(double, ...)` in `module` with the prototype's parameter names.
pub fn declare_prototype<'ctx>(
    context: &'ctx Context,
    module: &Module<'ctx>,
    proto: &Prototype,
) -> FunctionValue<'ctx> {
    let args_types = std::iter::repeat(context.f64_type())
        .take(proto.args.len())
        .map(|f| f.into())
        .collect::<Vec<BasicMetadataTypeEnum>>();
    let args_types = args_types.as_slice();

    let fn_type = context.f64_type().fn_type(args_types, false);
    let fn_val = module.add_function(proto.name.as_str(), fn_type, None);

    for (arg, name) in fn_val.get_param_iter().zip(&proto.args) {
        arg.into_float_value().set_name(name.as_str());
    }

    fn_val
}

/// Removes every block of `function`, leaving its declaration in place.
///
/// Instructions are erased only once nothing uses them. Bodies have no loops, so
/// each pass frees at least one more instruction until none are left.
fn strip_body(function: FunctionValue) {
    let mut instructions: Vec<InstructionValue> = Vec::new();
    for block in function.get_basic_blocks() {
        let mut next = block.get_first_instruction();
        while let Some(instruction) = next {
            next = instruction.get_next_instruction();
            instructions.push(instruction);
        }
    }

    while !instructions.is_empty() {
        let before = instructions.len();
        instructions.retain(|instruction| {
            if instruction.get_first_use().is_some() {
                return true;
            }
            instruction.erase_from_basic_block();
            false
        });
        if instructions.len() == before {
            break;
        }
    }

    for block in function.get_basic_blocks() {
        unsafe {
            let _ = block.delete();
        }
    }
}

/// Everything one compilation run needs: the module being built, the builder's
/// position in it, the parameters in scope and the known prototypes.
pub struct Codegen<'a> {
    pub context: &'a Context,
    pub module: Module<'a>,
    pub builder: Builder<'a>,
    pub named_values: HashMap<String, BasicValueEnum<'a>>,
    pub functions: FunctionRegistry,
    pass_manager: Option<PassManager<FunctionValue<'a>>>,
}

impl<'a> Codegen<'a> {
    pub fn new(context: &'a Context) -> Codegen<'a> {
        let module = context.create_module("toy");
        let builder = context.create_builder();

        Codegen {
            context,
            module,
            builder,
            named_values: HashMap::new(),
            functions: FunctionRegistry::new(),
            pass_manager: None,
        }
    }

    /// Runs every successfully verified function through a small cleanup pipeline.
    pub fn enable_optimizations(&mut self) {
        let fpm: PassManager<FunctionValue<'a>> = PassManager::create(&self.module);
        fpm.add_instruction_combining_pass();
        fpm.add_reassociate_pass();
        fpm.add_gvn_pass();
        fpm.add_cfg_simplification_pass();
        fpm.initialize();

        self.pass_manager = Some(fpm);
    }

    fn current_block(&self) -> Result<BasicBlock<'a>, CodegenError> {
        self.builder
            .get_insert_block()
            .ok_or(CodegenError::NoInsertBlock)
    }

    fn codegen_expr(&mut self, expr: &Expression) -> Result<FloatValue<'a>, CodegenError> {
        match expr {
            Expression::Number(value) => Ok(self.context.f64_type().const_float(*value)),
            Expression::Variable(name) => match self.named_values.get(name) {
                Some(var) => Ok(var.into_float_value()),
                None => Err(CodegenError::UnknownVariable(name.clone())),
            },
            Expression::Binary(op, left, right) => {
                let lhs = self.codegen_expr(left)?;
                let rhs = self.codegen_expr(right)?;

                match *op {
                    '+' => Ok(self.builder.build_float_add(lhs, rhs, "tmpadd")),
                    '-' => Ok(self.builder.build_float_sub(lhs, rhs, "tmpsub")),
                    '*' => Ok(self.builder.build_float_mul(lhs, rhs, "tmpmul")),
                    '/' => Ok(self.builder.build_float_div(lhs, rhs, "tmpdiv")),
                    '<' => Ok(self.build_comparison(FloatPredicate::OLT, lhs, rhs)),
                    '>' => Ok(self.build_comparison(FloatPredicate::OGT, lhs, rhs)),
                    _ => Err(CodegenError::UnknownOperator(*op)),
                }
            }
            Expression::Call(callee, args) => {
                let func = self
                    .functions
                    .resolve(callee, self.context, &self.module)
                    .ok_or_else(|| CodegenError::UnknownFunction(callee.clone()))?;

                let expected = func.count_params() as usize;
                if expected != args.len() {
                    return Err(CodegenError::InvalidCall(
                        callee.clone(),
                        expected,
                        args.len(),
                    ));
                }

                let mut argsv: Vec<BasicMetadataValueEnum> = Vec::with_capacity(args.len());
                for arg in args {
                    argsv.push(self.codegen_expr(arg)?.into());
                }

                self.builder
                    .build_call(func, argsv.as_slice(), "tmpcall")
                    .try_as_basic_value()
                    .left()
                    .map(|value| value.into_float_value())
                    .ok_or_else(|| CodegenError::NoValue(callee.clone()))
            }
            Expression::Conditional(cond, then, otherwise) => {
                self.codegen_conditional(cond, then, otherwise)
            }
        }
    }

    /// Comparisons produce `1.0` or `0.0` so every expression stays a double.
    fn build_comparison(
        &self,
        predicate: FloatPredicate,
        lhs: FloatValue<'a>,
        rhs: FloatValue<'a>,
    ) -> FloatValue<'a> {
        let cmp = self
            .builder
            .build_float_compare(predicate, lhs, rhs, "tmpcmp");
        self.builder
            .build_unsigned_int_to_float(cmp, self.context.f64_type(), "tmpbool")
    }

    fn codegen_conditional(
        &mut self,
        cond: &Expression,
        then: &Expression,
        otherwise: &Expression,
    ) -> Result<FloatValue<'a>, CodegenError> {
        let cond = self.codegen_expr(cond)?;
        let zero = self.context.f64_type().const_float(0.0);
        let cond = self
            .builder
            .build_float_compare(FloatPredicate::ONE, cond, zero, "ifcond");

        let parent = self
            .current_block()?
            .get_parent()
            .ok_or(CodegenError::NoInsertBlock)?;

        let then_bb = self.context.append_basic_block(parent, "then");
        let else_bb = self.context.append_basic_block(parent, "else");
        let merge_bb = self.context.append_basic_block(parent, "ifcont");

        self.builder
            .build_conditional_branch(cond, then_bb, else_bb);

        self.builder.position_at_end(then_bb);
        let then_val = self.codegen_expr(then)?;
        self.builder.build_unconditional_branch(merge_bb);
        // the branch may have opened blocks of its own, the phi needs the one it ended in
        let then_end = self.current_block()?;

        self.builder.position_at_end(else_bb);
        let else_val = self.codegen_expr(otherwise)?;
        self.builder.build_unconditional_branch(merge_bb);
        let else_end = self.current_block()?;

        self.builder.position_at_end(merge_bb);
        let phi = self.builder.build_phi(self.context.f64_type(), "iftmp");
        phi.add_incoming(&[(&then_val, then_end), (&else_val, else_end)]);

        Ok(phi.as_basic_value().into_float_value())
    }

    /// Arity (and, when defining, body) checks against whatever is already known
    /// under the prototype's name.
    fn check_redefinition(&self, proto: &Prototype, defining: bool) -> Result<(), CodegenError> {
        let declared = match self.module.get_function(&proto.name) {
            Some(existing) => {
                if defining && existing.count_basic_blocks() > 0 {
                    return Err(CodegenError::Redefinition(proto.name.clone()));
                }
                existing.count_params() as usize
            }
            None => match self.functions.get(&proto.name) {
                Some(registered) => registered.args.len(),
                None => return Ok(()),
            },
        };

        if declared != proto.args.len() {
            return Err(CodegenError::IncompatibleRedefinition(
                proto.name.clone(),
                declared,
                proto.args.len(),
            ));
        }

        Ok(())
    }

    /// Records an `extern` declaration. Nothing is emitted until something calls it.
    pub fn declare_extern(&mut self, proto: Prototype) -> Result<(), CodegenError> {
        self.check_redefinition(&proto, false)?;
        self.functions.register(proto);
        Ok(())
    }

    pub fn compile_fn(&mut self, function: Function) -> Result<FunctionValue<'a>, CodegenError> {
        let Function {
            prototype: proto,
            body,
        } = function;

        // each top-level expression replaces the previous one
        if proto.is_anonymous() {
            if let Some(previous) = self.module.get_function(&proto.name) {
                unsafe {
                    previous.delete();
                }
            }
        }

        self.check_redefinition(&proto, true)?;

        let name = proto.name.clone();
        let args = proto.args.clone();
        // an earlier extern may already be declared and called from other bodies
        let existed = self.module.get_function(&name).is_some();
        let previous = self.functions.register(proto);

        let llvm_func = self
            .functions
            .resolve(&name, self.context, &self.module)
            .ok_or_else(|| CodegenError::UnknownFunction(name.clone()))?;

        let entry = self.context.append_basic_block(llvm_func, "entry");

        self.builder.position_at_end(entry);

        self.named_values.clear();
        self.named_values.reserve(args.len());

        for (arg, arg_name) in llvm_func.get_param_iter().zip(args) {
            arg.into_float_value().set_name(arg_name.as_str());
            self.named_values.insert(arg_name, arg);
        }

        let body = match self.codegen_expr(&body) {
            Ok(body) => body,
            Err(err) => {
                self.discard(llvm_func, existed, previous);
                return Err(err);
            }
        };

        self.builder.build_return(Some(&body));

        if llvm_func.verify(true) {
            if let Some(fpm) = &self.pass_manager {
                fpm.run_on(&llvm_func);
            }
            log::debug!("generated function {}", name);
            Ok(llvm_func)
        } else {
            self.discard(llvm_func, existed, previous);
            Err(CodegenError::InvalidFunction(name))
        }
    }

    /// Undoes a failed definition. A function this definition created is deleted
    /// outright; one that was already declared goes back to being a bare declaration,
    /// since other bodies may still call it. The registry gets its old prototype back.
    fn discard(&mut self, function: FunctionValue<'a>, existed: bool, previous: Option<Prototype>) {
        let name = function.get_name().to_string_lossy().into_owned();
        if existed {
            strip_body(function);
        } else {
            unsafe {
                function.delete();
            }
        }

        match previous {
            Some(proto) => {
                self.functions.register(proto);
            }
            None => {
                self.functions.remove(&name);
            }
        }
        log::debug!("discarded failed definition of {}", name);
    }

    /// JIT-compiles the module and calls `function`, which must take no arguments.
    ///
    /// The module is released from the execution engine afterwards so more code can be
    /// generated into it.
    ///
    /// Every extern reachable from `function` must name a symbol the host process
    /// exports. MCJIT cannot report an unresolved one as an error and aborts the
    /// process instead.
    pub fn evaluate(&self, function: FunctionValue<'a>) -> Result<f64, CodegenError> {
        Target::initialize_native(&InitializationConfig::default())
            .map_err(CodegenError::ExecutionEngine)?;

        let name = function.get_name().to_string_lossy().into_owned();
        let engine = self
            .module
            .create_jit_execution_engine(OptimizationLevel::None)
            .map_err(|e| CodegenError::ExecutionEngine(e.to_string_lossy().into_owned()))?;

        let result = unsafe { engine.get_function::<EntryFunc>(&name) }
            .map(|entry| unsafe { entry.call() })
            .map_err(|e| CodegenError::ExecutionEngine(e.to_string()));

        engine
            .remove_module(&self.module)
            .map_err(|e| CodegenError::ExecutionEngine(format!("{:?}", e)))?;

        result
    }

    pub fn print_ir(&self) -> String {
        self.module.print_to_string().to_string_lossy().into_owned()
    }
}
