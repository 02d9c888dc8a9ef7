//! Thread-safe loader façade.
//!
//! Every mutating call runs one [`LoadingSession`] under the loader lock and either
//! commits everything it staged or nothing at all.
use crate::{
    assembly::{AssemblyStore, StorageMode, TemplateRef},
    config::LoaderConfig,
    error::{LoaderError, LoaderResult},
    types::{
        FunctionId, LoadingArguments, LoadingStage, NativeBinding, NativeFunction, NativeLayout,
        RuntimeFunction, RuntimeType, TypeId,
    },
};
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc};
use tracing::{debug, warn};

mod functions;
mod pipeline;
pub(crate) mod reflist;
pub(crate) mod session;
pub mod special;

use session::{LoadingSession, StagedObjects};
use special::{SpecialKind, SpecialTypes};

/// Committed loader state. Only mutated under the loader lock.
#[derive(Default)]
pub(crate) struct LoaderData {
    pub(crate) types: Vec<Arc<RuntimeType>>,
    pub(crate) functions: Vec<Arc<RuntimeFunction>>,
    pub(crate) type_map: HashMap<LoadingArguments, TypeId>,
    pub(crate) function_map: HashMap<LoadingArguments, FunctionId>,
    pub(crate) native_types: HashMap<TemplateRef, NativeLayout>,
    pub(crate) native_functions: HashMap<TemplateRef, NativeBinding>,
    pub(crate) code_cache: HashMap<TemplateRef, Arc<[u8]>>,
}

impl LoaderData {
    fn commit(&mut self, staged: StagedObjects, special: &SpecialTypes) {
        debug!(
            "committing {} types and {} functions",
            staged.types.len(),
            staged.functions.len()
        );
        let first = self.types.len();
        for mut object in staged.types {
            object.stage = LoadingStage::Finished;
            self.type_map.insert(object.args.clone(), object.id);
            self.types.push(Arc::new(object));
        }
        for mut object in staged.functions {
            object.stage = LoadingStage::Finished;
            self.function_map.insert(object.args.clone(), object.id);
            self.functions.push(Arc::new(object));
        }
        self.code_cache.extend(staged.code);
        self.link_companions(special, first);
    }

    /// Sets the companion back-links of the argument types of companions
    /// committed from `first` on.
    fn link_companions(&self, special: &SpecialTypes, first: usize) {
        for companion in &self.types[first..] {
            let Some(kind) = special.kind_of(&companion.args) else {
                continue;
            };
            let Some(target) = companion.args.flat_arguments().next() else {
                continue;
            };
            let Some(target) = self.types.get(target.0) else {
                continue;
            };
            let slot = match kind {
                SpecialKind::Pointer => &target.pointer_type,
                SpecialKind::Box => &target.box_type,
                SpecialKind::Reference => &target.reference_type,
                SpecialKind::Embed => &target.embed_type,
            };
            let _ = slot.set(companion.id);
        }
    }

    fn is_instantiated(&self, template: &TemplateRef) -> bool {
        self.type_map.keys().any(|args| args.is_template(template))
            || self.function_map.keys().any(|args| args.is_template(template))
    }
}

pub struct Loader {
    store: AssemblyStore,
    config: LoaderConfig,
    special: SpecialTypes,
    data: Mutex<LoaderData>,
}

impl Loader {
    pub fn new(store: AssemblyStore, config: LoaderConfig) -> LoaderResult<Self> {
        let special = SpecialTypes::identify(&store, &config)?;
        Ok(Self {
            store,
            config,
            special,
            data: Mutex::new(LoaderData::default()),
        })
    }

    pub fn store(&self) -> &AssemblyStore {
        &self.store
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn special_template(&self, kind: SpecialKind) -> Option<&TemplateRef> {
        self.special.template(kind)
    }

    /// Runs `f` in a fresh session and commits its objects if everything finishes.
    fn run<T>(
        &self,
        data: &mut LoaderData,
        what: &dyn std::fmt::Display,
        f: impl FnOnce(&mut LoadingSession<'_>) -> LoaderResult<T>,
    ) -> LoaderResult<T> {
        let result = {
            let mut session = LoadingSession::new(&self.store, &self.config, &self.special, data);
            let result = f(&mut session).and_then(|value| {
                session.finish()?;
                Ok(value)
            });
            match result {
                Ok(value) => Ok((value, session.into_staged())),
                Err(e) => {
                    debug!("discarding {} staged objects", session.staged_count());
                    Err(e)
                }
            }
        };
        match result {
            Ok((value, staged)) => {
                data.commit(staged, &self.special);
                Ok(value)
            }
            Err(e) => {
                warn!("loading {} failed ({}): {}", what, e.code(), e);
                Err(e)
            }
        }
    }

    pub fn get_type(&self, args: LoadingArguments) -> LoaderResult<Arc<RuntimeType>> {
        let mut data = self.data.lock();
        if let Some(id) = data.type_map.get(&args) {
            return Ok(data.types[id.0].clone());
        }
        let id = self.run(&mut data, &args, |s| s.load_type(args.clone()))?;
        Ok(data.types[id.0].clone())
    }

    pub fn get_function(&self, args: LoadingArguments) -> LoaderResult<Arc<RuntimeFunction>> {
        let mut data = self.data.lock();
        if let Some(id) = data.function_map.get(&args) {
            return Ok(data.functions[id.0].clone());
        }
        let id = self.run(&mut data, &args, |s| s.load_function(args.clone()))?;
        Ok(data.functions[id.0].clone())
    }

    pub fn get_type_by_name(
        &self,
        assembly: &str,
        name: &str,
        arguments: Vec<Vec<TypeId>>,
    ) -> LoaderResult<Arc<RuntimeType>> {
        let found = self.store.find_export_type(assembly, name)?;
        self.get_type(LoadingArguments::new(found.assembly, found.id, arguments))
    }

    pub fn get_function_by_name(
        &self,
        assembly: &str,
        name: &str,
        arguments: Vec<Vec<TypeId>>,
    ) -> LoaderResult<Arc<RuntimeFunction>> {
        let found = self.store.find_export_function(assembly, name)?;
        self.get_function(LoadingArguments::new(found.assembly, found.id, arguments))
    }

    /// Registers externally managed storage for a field-less, non-generic value type
    /// and loads it.
    pub fn add_native_type(
        &self,
        assembly: &str,
        name: &str,
        size: usize,
        alignment: usize,
    ) -> LoaderResult<Arc<RuntimeType>> {
        let found = self.store.find_export_type(assembly, name)?;
        let template = self.store.type_template(&found.assembly, found.id)?;
        let problem = if !template.fields.is_empty() {
            Some("declares fields")
        } else if !template.generic.parameters.is_empty() {
            Some("is generic")
        } else if template.storage != StorageMode::Value {
            Some("is not a value type")
        } else if template.has_reference(template.initializer)
            || template.has_reference(template.finalizer)
        {
            Some("declares an initializer or finalizer")
        } else if !alignment.is_power_of_two() {
            Some("needs a power-of-two alignment")
        } else {
            None
        };
        if let Some(problem) = problem {
            return Err(LoaderError::program(format!(
                "native type {name} {problem}"
            )));
        }

        let mut data = self.data.lock();
        if data.native_types.contains_key(&found) || data.is_instantiated(&found) {
            return Err(LoaderError::program(format!(
                "native type {name} is already loaded"
            )));
        }
        data.native_types
            .insert(found.clone(), NativeLayout { size, alignment });
        let args = LoadingArguments::non_generic(found.assembly.clone(), found.id);
        match self.run(&mut data, &args, |s| s.load_type(args.clone())) {
            Ok(id) => Ok(data.types[id.0].clone()),
            Err(e) => {
                data.native_types.remove(&found);
                Err(e)
            }
        }
    }

    /// Binds a native implementation to a non-generic function template without code.
    pub fn add_native_function(
        &self,
        assembly: &str,
        name: &str,
        function: NativeFunction,
        user_data: usize,
    ) -> LoaderResult<()> {
        let found = self.store.find_export_function(assembly, name)?;
        let template = self.store.function_template(&found.assembly, found.id)?;
        let problem = if !template.instructions.is_empty() {
            Some("has bytecode")
        } else if !template.constant_table.is_empty() {
            Some("has constants")
        } else if !template.generic.parameters.is_empty() {
            Some("is generic")
        } else {
            None
        };
        if let Some(problem) = problem {
            return Err(LoaderError::program(format!(
                "native function {name} {problem}"
            )));
        }

        let mut data = self.data.lock();
        if data.native_functions.contains_key(&found) || data.is_instantiated(&found) {
            return Err(LoaderError::program(format!(
                "native function {name} is already loaded"
            )));
        }
        debug!("registered native function {} as {}", name, found);
        data.native_functions.insert(
            found,
            NativeBinding {
                function,
                user_data,
            },
        );
        Ok(())
    }

    pub fn get_type_by_id(&self, id: TypeId) -> Option<Arc<RuntimeType>> {
        self.data.lock().types.get(id.0).cloned()
    }

    pub fn get_function_by_id(&self, id: FunctionId) -> Option<Arc<RuntimeFunction>> {
        self.data.lock().functions.get(id.0).cloned()
    }

    pub fn find_export_type(&self, assembly: &str, name: &str) -> LoaderResult<TemplateRef> {
        self.store.find_export_type(assembly, name)
    }

    pub fn find_export_function(&self, assembly: &str, name: &str) -> LoaderResult<TemplateRef> {
        self.store.find_export_function(assembly, name)
    }

    pub fn find_export_constant(&self, assembly: &str, name: &str) -> LoaderResult<u64> {
        self.store.find_export_constant(assembly, name)
    }

    pub fn find_export_trait(&self, assembly: &str, name: &str) -> LoaderResult<TemplateRef> {
        self.store.find_export_trait(assembly, name)
    }

    pub fn loaded_type_count(&self) -> usize {
        self.data.lock().types.len()
    }

    pub fn loaded_function_count(&self) -> usize {
        self.data.lock().functions.len()
    }
}
