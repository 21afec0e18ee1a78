//
// cli/mod.rs
//
// One-shot subcommands run from the command line
//

pub mod query;
pub mod view_stats;
