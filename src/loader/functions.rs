use crate::{
    assembly::ConstantReference,
    error::{LoaderError, LoaderResult},
    loader::{
        reflist::RefBinding,
        session::{LoadingSession, PostLoading},
    },
    types::{FunctionId, LoadingArguments, LoadingStage, TypeId},
};
use std::sync::Arc;
use tracing::trace;

impl<'a> LoadingSession<'a> {
    pub(crate) fn load_function(&mut self, args: LoadingArguments) -> LoaderResult<FunctionId> {
        if let Some(id) = self.find_function(&args) {
            return Ok(id);
        }
        let store = self.store;
        let template = store.function_template(&args.assembly, args.id)?;
        if !template.generic.parameters.accepts(&args.arguments) {
            return Err(LoaderError::generic(format!(
                "{args} has the wrong number of generic arguments"
            )));
        }

        let id = self.stage_function(args.clone())?;
        let exports = self
            .check_declaration(&args.assembly, &template.generic, &args.arguments, None)?
            .ok_or_else(|| {
                LoaderError::generic(format!("{args} does not satisfy its constraints"))
            })?;
        self.func_mut(id)?.exports = Arc::new(exports);

        let binding = RefBinding::for_function(self, id)?;
        let return_type = match template.return_type {
            Some(r) => self.evaluate_type(&binding, r)?,
            None => None,
        };
        let parameters = self.required_types(&binding, &template.parameters, "parameter", &args)?;
        let locals = self.required_types(&binding, &template.locals, "local", &args)?;

        let template_ref = args.template();
        let (code, native) = if template.instructions.is_empty() {
            (None, self.native_function(&template_ref))
        } else {
            (Some(self.shared_code(&template_ref, &template.instructions)), None)
        };

        let object = self.func_mut(id)?;
        object.return_type = return_type;
        object.parameters = parameters;
        object.locals = locals;
        object.code = code;
        object.native = native;
        object.stage = LoadingStage::PostLoading;
        self.post_queue.push_back(PostLoading::Function(id));
        Ok(id)
    }

    fn required_types(
        &mut self,
        binding: &RefBinding<'a>,
        references: &[usize],
        what: &str,
        args: &LoadingArguments,
    ) -> LoaderResult<Vec<TypeId>> {
        let mut types = Vec::with_capacity(references.len());
        for (i, reference) in references.iter().enumerate() {
            let resolved = self.evaluate_type(binding, *reference)?.ok_or_else(|| {
                LoaderError::program(format!("{what} {i} of {args} is empty"))
            })?;
            types.push(resolved);
        }
        Ok(types)
    }

    /// Resolves constants and the referenced type, function and field lists.
    pub(crate) fn link_function(&mut self, id: FunctionId) -> LoaderResult<()> {
        let object = self.func(id)?;
        if object.stage == LoadingStage::Finished {
            return Ok(());
        }
        let args = object.args.clone();
        let store = self.store;
        let template = store.function_template(&args.assembly, args.id)?;
        let binding = RefBinding::for_function(self, id)?;

        let constants = template
            .constant_table
            .iter()
            .map(|constant| match constant {
                ConstantReference::Local(i) => store.constant(&args.assembly, *i),
                ConstantReference::Import(i) => store.resolve_import_constant(&args.assembly, *i),
            })
            .collect::<LoaderResult<Vec<_>>>()?;
        let mut referenced_types = Vec::with_capacity(template.referenced_types.len());
        for reference in &template.referenced_types {
            referenced_types.push(self.evaluate_type(&binding, *reference)?);
        }
        let mut referenced_functions = Vec::with_capacity(template.referenced_functions.len());
        for reference in &template.referenced_functions {
            referenced_functions.push(self.evaluate_function(&binding, *reference)?);
        }
        let mut referenced_fields = Vec::with_capacity(template.referenced_fields.len());
        for reference in &template.referenced_fields {
            referenced_fields.push(self.evaluate_field(&binding, *reference)?);
        }

        let object = self.func_mut(id)?;
        object.constants = constants;
        object.referenced_types = referenced_types;
        object.referenced_functions = referenced_functions;
        object.referenced_fields = referenced_fields;
        object.stage = LoadingStage::Finished;
        trace!("{} linked", args);
        Ok(())
    }
}
