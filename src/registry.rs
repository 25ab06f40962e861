use std::collections::HashMap;

use inkwell::{context::Context, module::Module, values::FunctionValue};

use crate::ast::Prototype;
use crate::codegen::declare_prototype;

/// Most recently seen prototype for every declared or defined function name.
///
/// Prototypes outlive the AST they came from, so a call can still be lowered after
/// the function's definition was consumed, or before an `extern` was ever emitted.
#[derive(Debug, Default)]
pub struct FunctionRegistry {
    prototypes: HashMap<String, Prototype>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `prototype`, handing back the one it replaced.
    pub fn register(&mut self, prototype: Prototype) -> Option<Prototype> {
        self.prototypes.insert(prototype.name.clone(), prototype)
    }

    pub fn remove(&mut self, name: &str) -> Option<Prototype> {
        self.prototypes.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&Prototype> {
        self.prototypes.get(name)
    }

    /// Finds `name` in the module, declaring it from its registered prototype if the
    /// module doesn't know it yet.
    pub fn resolve<'ctx>(
        &self,
        name: &str,
        context: &'ctx Context,
        module: &Module<'ctx>,
    ) -> Option<FunctionValue<'ctx>> {
        module.get_function(name).or_else(|| {
            self.prototypes
                .get(name)
                .map(|proto| declare_prototype(context, module, proto))
        })
    }
}
