pub mod auth;
pub mod codec;
pub mod config;
pub mod errors;
pub mod model;
pub mod operator;
pub mod output;
pub mod palette;
pub mod pipeline;
pub mod server;
pub mod store;
pub mod traits;

pub mod mocks;

pub use config::Config;
pub use errors::{ClothSegError, ErrorKind, Result};
pub use model::{Device, Model};
pub use palette::{Palette, CLOTH_COMPONENTS};
pub use pipeline::{Pipeline, PipelineResult};
pub use store::ResultStore;
pub use traits::*;
