// src/lib.rs
pub mod clustering;
pub mod config;
pub mod duplicates;
pub mod io;
pub mod matching;
pub mod models;
pub mod pipeline;
pub mod utils;
