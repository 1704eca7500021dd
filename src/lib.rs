pub mod commands;
pub mod config;
pub mod db;
pub mod llm;
pub mod ollama;
pub mod pipeline;
pub mod validation;
