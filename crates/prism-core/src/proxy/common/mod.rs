//! Shared helpers: model-family classification, tool-name sanitization,
//! JSON-Schema cleaning.

pub mod json_schema;
pub mod model_family;
pub mod tool_names;

pub use model_family::ModelFamily;
