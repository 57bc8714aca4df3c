pub mod analyze;
pub mod app;
pub mod commands;
pub mod env;
pub mod output;
pub mod runtime;
pub mod serve;

pub use app::run;
