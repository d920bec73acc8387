//! The static object/property specification catalog is an external
//! collaborator (§1): this module only defines the lookup interface the
//! core consumes, plus a synthetic fallback for unknown classes.

use std::fmt;
use std::sync::Arc;

/// Per-property metadata from the static catalog.
#[derive(Clone)]
pub struct PropertySpec {
    pub epc: u8,
    pub min_size: Option<usize>,
    pub max_size: Option<usize>,
    pub can_get: bool,
    pub can_set: bool,
    pub can_announce: bool,
    accept_value: Arc<dyn Fn(&[u8]) -> bool + Send + Sync>,
}

impl PropertySpec {
    pub fn new(
        epc: u8,
        min_size: Option<usize>,
        max_size: Option<usize>,
        can_get: bool,
        can_set: bool,
        can_announce: bool,
    ) -> Self {
        Self {
            epc,
            min_size,
            max_size,
            can_get,
            can_set,
            can_announce,
            accept_value: Arc::new(|_| true),
        }
    }

    pub fn with_validator(mut self, validator: impl Fn(&[u8]) -> bool + Send + Sync + 'static) -> Self {
        self.accept_value = Arc::new(validator);
        self
    }

    /// Whether `value` passes this property's length bounds and any
    /// custom validator the catalog supplied.
    pub fn accept_value(&self, value: &[u8]) -> bool {
        if let Some(min) = self.min_size {
            if value.len() < min {
                return false;
            }
        }
        if let Some(max) = self.max_size {
            if value.len() > max {
                return false;
            }
        }
        (self.accept_value)(value)
    }
}

impl fmt::Debug for PropertySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertySpec")
            .field("epc", &self.epc)
            .field("min_size", &self.min_size)
            .field("max_size", &self.max_size)
            .field("can_get", &self.can_get)
            .field("can_set", &self.can_set)
            .field("can_announce", &self.can_announce)
            .finish()
    }
}

/// A class's static specification: its known properties and their
/// capabilities.
#[derive(Clone, Debug, Default)]
pub struct ClassSpec {
    pub properties: Vec<PropertySpec>,
}

impl ClassSpec {
    /// The empty-property synthetic spec used for unknown classes.
    pub fn synthetic() -> Self {
        Self::default()
    }

    pub fn find(&self, epc: u8) -> Option<&PropertySpec> {
        self.properties.iter().find(|p| p.epc == epc)
    }
}

/// Lookup interface for the static object-spec catalog. An unknown
/// class yields `ClassSpec::synthetic()` rather than an error, so
/// undetailed objects still get a usable (empty) spec.
pub trait ObjectSpecCatalog: Send + Sync {
    fn find_class(&self, class_group: u8, class: u8) -> ClassSpec;
}

/// A catalog with no entries; every class resolves to the synthetic
/// spec. Useful as a default when the embedding application hasn't
/// wired in a real catalog yet.
#[derive(Default)]
pub struct EmptyCatalog;

impl ObjectSpecCatalog for EmptyCatalog {
    fn find_class(&self, _class_group: u8, _class: u8) -> ClassSpec {
        ClassSpec::synthetic()
    }
}
