pub mod config;
pub mod endpoint;
pub mod engine;
pub mod error;
pub mod structs;

pub use config::{FlowSource, FlowSpec, ValidFlowSpec};
pub use endpoint::{EndpointPairEnumerator, IfEnum};
pub use engine::FlowEngine;
pub use error::{Error, Result};
