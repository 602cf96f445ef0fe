use crate::algorithm::{
    AlgorithmCategory, AlgorithmDescriptor, AlgorithmLoader, Executable, FactoryLoader,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;
use vertex_core::{VertexError, VertexResult};

/// A descriptor paired with the loader that materializes its implementation.
pub struct Registration {
    pub descriptor: AlgorithmDescriptor,
    pub loader: Arc<dyn AlgorithmLoader>,
}

/// Static registration table keyed by algorithm id.
///
/// Built once at startup and then handed to the registry, which never
/// mutates it.
pub struct AlgorithmCatalog {
    entries: HashMap<String, Registration>,
}

impl AlgorithmCatalog {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Register an algorithm. Ids must be unique.
    pub fn register(
        &mut self,
        descriptor: AlgorithmDescriptor,
        loader: Arc<dyn AlgorithmLoader>,
    ) -> VertexResult<()> {
        if descriptor.id.trim().is_empty() {
            return Err(VertexError::Config("algorithm id must not be empty".into()));
        }
        if self.entries.contains_key(&descriptor.id) {
            return Err(VertexError::Config(format!(
                "algorithm '{}' is already registered",
                descriptor.id
            )));
        }
        info!(
            algorithm = %descriptor.id,
            category = %descriptor.category,
            input = %descriptor.input,
            output = %descriptor.output,
            "Registered algorithm"
        );
        self.entries.insert(
            descriptor.id.clone(),
            Registration { descriptor, loader },
        );
        Ok(())
    }

    /// Register an algorithm whose implementation is built by a factory closure.
    pub fn register_fn<F>(&mut self, descriptor: AlgorithmDescriptor, factory: F) -> VertexResult<()>
    where
        F: Fn() -> VertexResult<Arc<dyn Executable>> + Send + Sync + 'static,
    {
        self.register(descriptor, Arc::new(FactoryLoader::new(factory)))
    }

    pub fn get(&self, id: &str) -> Option<&Registration> {
        self.entries.get(id)
    }

    pub fn descriptor(&self, id: &str) -> Option<&AlgorithmDescriptor> {
        self.entries.get(id).map(|r| &r.descriptor)
    }

    /// All descriptors, sorted by id.
    pub fn descriptors(&self) -> Vec<&AlgorithmDescriptor> {
        let mut all: Vec<&AlgorithmDescriptor> =
            self.entries.values().map(|r| &r.descriptor).collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Descriptors of one category, sorted by id.
    pub fn descriptors_by_category(&self, category: AlgorithmCategory) -> Vec<&AlgorithmDescriptor> {
        let mut matching = self.descriptors();
        matching.retain(|d| d.category == category);
        matching
    }

    pub fn ids(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for AlgorithmCatalog {
    fn default() -> Self {
        Self::new()
    }
}
