pub mod config;
pub mod email;
pub mod embedding;
pub mod errors;
pub mod lexical;
pub mod logging;
pub mod pipeline;
pub mod rerank;
pub mod search;
pub mod vector;
