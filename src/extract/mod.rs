pub mod engine;
pub mod schema;
pub mod value;

// Re-export common types
pub use engine::{extract, extract_default};
pub use schema::{FieldSelector, FieldType, SelectorSchema};
pub use value::Value;
