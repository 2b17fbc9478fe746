//! Shared foundation for skillbridge: layered configuration, the skill catalog
//! and the error taxonomy used by the HTTP and CLI surfaces.

pub mod catalog;
pub mod config;
pub mod errors;

pub use catalog::{
    CatalogEntry, CatalogError, CatalogMaterializer, LinkStrategy, MaterializeReport,
    SkillCatalog, SkillDescriptor,
};
pub use errors::{ApplicationError, InterfaceError};
