//! Class Field Maps
//!
//! The walk needs every instance of a class to be scanned with the same
//! field list. Building that list means a trip through the runtime's class
//! metadata, so instance field maps are cached per class for the duration of
//! one walk. The cache is owned by the walk and dropped with it; class
//! loading between walks cannot leave stale maps behind.
//!
//! Static field maps are built on demand: each class is visited at most once
//! per walk.

use crate::object::{ClassInfo, ClassRef, FieldDescriptor};
use crate::runtime::ManagedRuntime;
use fti_util::FxHashMap;
use std::sync::Arc;

/// Fields of a class in ascending index order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassFieldMap {
    fields: Vec<FieldDescriptor>,
}

impl ClassFieldMap {
    /// Instance fields, inherited ones included
    pub fn instance_fields(info: &ClassInfo) -> Self {
        Self::sorted(info.instance_fields.clone())
    }

    /// Static fields declared by the class itself
    pub fn static_fields(info: &ClassInfo) -> Self {
        Self::sorted(info.static_fields.clone())
    }

    fn sorted(mut fields: Vec<FieldDescriptor>) -> Self {
        fields.sort_by_key(|f| f.index);
        Self { fields }
    }

    #[inline]
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    #[inline]
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }
}

/// Per-walk cache of instance field maps
#[derive(Debug, Default)]
pub struct ClassFieldMapCache {
    maps: FxHashMap<ClassRef, Arc<ClassFieldMap>>,
    hits: u64,
    misses: u64,
}

impl ClassFieldMapCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Instance field map of `class`, built on first use
    pub fn instance_fields(
        &mut self,
        runtime: &dyn ManagedRuntime,
        class: ClassRef,
    ) -> Arc<ClassFieldMap> {
        if let Some(map) = self.maps.get(&class) {
            self.hits += 1;
            return Arc::clone(map);
        }
        self.misses += 1;
        let map = Arc::new(ClassFieldMap::instance_fields(&runtime.class_info(class)));
        self.maps.insert(class, Arc::clone(&map));
        map
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    /// Number of cached classes
    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }
}
