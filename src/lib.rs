pub mod error;
pub mod executor;
pub mod feedback;
pub mod llm;
pub mod pipeline;
pub mod recipe;
pub mod schema;
pub mod vector;
