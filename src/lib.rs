pub mod config;
pub mod error;
pub mod model;
pub mod utils;

pub use config::RestorationOptions;
pub use error::{Error, Result};
pub use model::{
    generator::{Flow, GlobalGenerator, GlobalGeneratorConfig},
    mapping::{Mapping, MappingConfig},
    spade::{Spade, SpadeConfig},
    RestorationModel, RestorationModelConfig,
};

/// CPU backend used by the command line tool.
pub type DefaultBackend = burn::backend::NdArray<f32>;

#[cfg(test)]
pub(crate) type TestBackend = burn::backend::NdArray<f32>;
