use clap::Subcommand;

use super::analyze::AnalyzeArgs;
use super::serve::ServeArgs;

#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Run the HTTP analysis service
    Serve(ServeArgs),

    /// Audit a single URL and print the result
    Analyze(AnalyzeArgs),
}
