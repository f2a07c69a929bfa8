pub mod budget;
pub mod capabilities;
pub mod embeddings;
pub mod errors;
pub mod gateway;
pub mod models;
pub mod pricing;
pub mod providers;
pub mod token_counter;
pub mod tools;
