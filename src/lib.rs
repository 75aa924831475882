pub mod chunker;
pub mod config;
pub mod glossary;
pub mod models;
pub mod pairs;
pub mod pipeline;
pub mod progress;
pub mod telemetry;
pub mod textutil;
