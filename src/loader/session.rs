use crate::{
    assembly::{AssemblyStore, TemplateRef},
    config::LoaderConfig,
    error::{LoaderError, LoaderResult},
    loader::{special::SpecialTypes, LoaderData},
    types::{
        FunctionId, LoadingArguments, LoadingStage, NativeBinding, NativeLayout, RuntimeFunction,
        RuntimeType, TypeId,
    },
};
use std::{
    collections::{HashMap, VecDeque},
    fmt,
    sync::Arc,
};
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PostLoading {
    Type(TypeId),
    Function(FunctionId),
}

/// Scoped "currently resolving" stacks. Re-entering one with the same type is a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoadingStack {
    Layout,
    Body,
    Link,
    Interfaces,
}

impl fmt::Display for LoadingStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoadingStack::Layout => "field layout",
            LoadingStack::Body => "base type chain",
            LoadingStack::Link => "virtual table",
            LoadingStack::Interfaces => "interface list",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy)]
enum Computed {
    Layout(TypeId),
    Body(TypeId),
}

/// Position in a session that a failed best-effort attempt can roll back to.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SessionCursor {
    types: usize,
    functions: usize,
    computed: usize,
}

pub(crate) struct StagedObjects {
    pub types: Vec<RuntimeType>,
    pub functions: Vec<RuntimeFunction>,
    pub code: HashMap<TemplateRef, Arc<[u8]>>,
}

/// State of one `get_*` call. Nothing here is visible until committed.
pub(crate) struct LoadingSession<'a> {
    pub(crate) store: &'a AssemblyStore,
    pub(crate) config: &'a LoaderConfig,
    pub(crate) special: &'a SpecialTypes,
    data: &'a LoaderData,
    types: Vec<RuntimeType>,
    functions: Vec<RuntimeFunction>,
    type_map: HashMap<LoadingArguments, TypeId>,
    function_map: HashMap<LoadingArguments, FunctionId>,
    pub(crate) body_queue: VecDeque<TypeId>,
    pub(crate) post_queue: VecDeque<PostLoading>,
    stacks: [Vec<TypeId>; 4],
    code_cache: HashMap<TemplateRef, Arc<[u8]>>,
    computed: Vec<Computed>,
}

impl<'a> LoadingSession<'a> {
    pub(crate) fn new(
        store: &'a AssemblyStore,
        config: &'a LoaderConfig,
        special: &'a SpecialTypes,
        data: &'a LoaderData,
    ) -> Self {
        Self {
            store,
            config,
            special,
            data,
            types: vec![],
            functions: vec![],
            type_map: HashMap::new(),
            function_map: HashMap::new(),
            body_queue: VecDeque::new(),
            post_queue: VecDeque::new(),
            stacks: Default::default(),
            code_cache: HashMap::new(),
            computed: vec![],
        }
    }

    pub(crate) fn staged_count(&self) -> usize {
        self.types.len() + self.functions.len()
    }

    pub(crate) fn into_staged(self) -> StagedObjects {
        StagedObjects {
            types: self.types,
            functions: self.functions,
            code: self.code_cache,
        }
    }

    pub(crate) fn find_type(&self, args: &LoadingArguments) -> Option<TypeId> {
        self.data
            .type_map
            .get(args)
            .or_else(|| self.type_map.get(args))
            .copied()
    }

    pub(crate) fn find_function(&self, args: &LoadingArguments) -> Option<FunctionId> {
        self.data
            .function_map
            .get(args)
            .or_else(|| self.function_map.get(args))
            .copied()
    }

    fn check_limit(&self) -> LoaderResult<()> {
        if self.staged_count() >= self.config.loading_limit {
            return Err(LoaderError::LoadingLimit {
                limit: self.config.loading_limit,
            });
        }
        Ok(())
    }

    pub(crate) fn stage_type(&mut self, object: impl FnOnce(TypeId) -> RuntimeType) -> LoaderResult<TypeId> {
        self.check_limit()?;
        let id = TypeId(self.data.types.len() + self.types.len());
        let object = object(id);
        trace!("staging type {} as {}", object.args, id);
        self.type_map.insert(object.args.clone(), id);
        self.types.push(object);
        Ok(id)
    }

    pub(crate) fn stage_function(&mut self, args: LoadingArguments) -> LoaderResult<FunctionId> {
        self.check_limit()?;
        let id = FunctionId(self.data.functions.len() + self.functions.len());
        trace!("staging function {} as {}", args, id);
        self.function_map.insert(args.clone(), id);
        self.functions.push(RuntimeFunction::new(id, args));
        Ok(id)
    }

    pub(crate) fn ty(&self, id: TypeId) -> LoaderResult<&RuntimeType> {
        let committed = self.data.types.len();
        if id.0 < committed {
            Ok(self.data.types[id.0].as_ref())
        } else {
            self.types
                .get(id.0 - committed)
                .ok_or_else(|| LoaderError::Unknown(format!("dangling type handle {id}")))
        }
    }

    pub(crate) fn ty_mut(&mut self, id: TypeId) -> LoaderResult<&mut RuntimeType> {
        let committed = self.data.types.len();
        if id.0 < committed {
            return Err(LoaderError::Unknown(format!(
                "type {id} is already committed"
            )));
        }
        self.types
            .get_mut(id.0 - committed)
            .ok_or_else(|| LoaderError::Unknown(format!("dangling type handle {id}")))
    }

    pub(crate) fn func(&self, id: FunctionId) -> LoaderResult<&RuntimeFunction> {
        let committed = self.data.functions.len();
        if id.0 < committed {
            Ok(self.data.functions[id.0].as_ref())
        } else {
            self.functions
                .get(id.0 - committed)
                .ok_or_else(|| LoaderError::Unknown(format!("dangling function handle {id}")))
        }
    }

    pub(crate) fn func_mut(&mut self, id: FunctionId) -> LoaderResult<&mut RuntimeFunction> {
        let committed = self.data.functions.len();
        if id.0 < committed {
            return Err(LoaderError::Unknown(format!(
                "function {id} is already committed"
            )));
        }
        self.functions
            .get_mut(id.0 - committed)
            .ok_or_else(|| LoaderError::Unknown(format!("dangling function handle {id}")))
    }

    pub(crate) fn stage_of(&self, id: TypeId) -> LoaderResult<LoadingStage> {
        Ok(self.ty(id)?.stage)
    }

    pub(crate) fn native_layout(&self, template: &TemplateRef) -> Option<NativeLayout> {
        self.data.native_types.get(template).copied()
    }

    pub(crate) fn native_function(&self, template: &TemplateRef) -> Option<NativeBinding> {
        self.data.native_functions.get(template).copied()
    }

    pub(crate) fn shared_code(&mut self, template: &TemplateRef, instructions: &[u8]) -> Arc<[u8]> {
        if let Some(code) = self.data.code_cache.get(template) {
            return code.clone();
        }
        self.code_cache
            .entry(template.clone())
            .or_insert_with(|| Arc::from(instructions))
            .clone()
    }

    /// Runs `f` with `id` pushed on `stack`, failing with `CIRCULAR` if it already is.
    pub(crate) fn scoped<R>(
        &mut self,
        stack: LoadingStack,
        id: TypeId,
        f: impl FnOnce(&mut Self) -> LoaderResult<R>,
    ) -> LoaderResult<R> {
        if self.stacks[stack as usize].contains(&id) {
            let args = self.ty(id).map(|t| t.args.to_string()).unwrap_or_default();
            return Err(LoaderError::circular(format!("{stack} of {args} refers to itself")));
        }
        self.stacks[stack as usize].push(id);
        let result = f(self);
        self.stacks[stack as usize].pop();
        result
    }

    pub(crate) fn record_layout(&mut self, id: TypeId) {
        self.computed.push(Computed::Layout(id));
    }

    pub(crate) fn record_body(&mut self, id: TypeId) {
        self.computed.push(Computed::Body(id));
    }

    pub(crate) fn cursor(&self) -> SessionCursor {
        SessionCursor {
            types: self.types.len(),
            functions: self.functions.len(),
            computed: self.computed.len(),
        }
    }

    /// Discards everything staged after `cursor` and undoes layouts computed
    /// since then for older objects.
    pub(crate) fn rollback(&mut self, cursor: SessionCursor) {
        let first_type = self.data.types.len() + cursor.types;
        let first_function = self.data.functions.len() + cursor.functions;
        if self.types.len() > cursor.types || self.functions.len() > cursor.functions {
            trace!(
                "rolling back {} types and {} functions",
                self.types.len() - cursor.types,
                self.functions.len() - cursor.functions
            );
        }
        self.types.truncate(cursor.types);
        self.functions.truncate(cursor.functions);
        self.type_map.retain(|_, id| id.0 < first_type);
        self.function_map.retain(|_, id| id.0 < first_function);
        self.body_queue.retain(|id| id.0 < first_type);
        self.post_queue.retain(|item| match item {
            PostLoading::Type(id) => id.0 < first_type,
            PostLoading::Function(id) => id.0 < first_function,
        });
        let undone: Vec<Computed> = self.computed.drain(cursor.computed..).collect();
        for computed in undone.into_iter().rev() {
            match computed {
                Computed::Layout(id) if id.0 < first_type => {
                    if let Ok(object) = self.ty_mut(id) {
                        object.layout = None;
                        object.fields.clear();
                        object.stage = LoadingStage::Layout;
                    }
                }
                Computed::Body(id) if id.0 < first_type => {
                    if let Ok(object) = self.ty_mut(id) {
                        object.body = None;
                        object.fields.clear();
                        object.base_type = None;
                        object.stage = LoadingStage::Layout;
                    }
                    if !self.body_queue.contains(&id) {
                        self.body_queue.push_back(id);
                    }
                }
                _ => {}
            }
        }
    }

    /// Runs `f`, rolling the session back if it fails.
    pub(crate) fn attempt<R>(
        &mut self,
        f: impl FnOnce(&mut Self) -> LoaderResult<R>,
    ) -> LoaderResult<R> {
        let cursor = self.cursor();
        let result = f(self);
        if result.is_err() {
            self.rollback(cursor);
        }
        result
    }
}
