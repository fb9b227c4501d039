use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[clap(version, about = "distributed build coordinator")]
pub struct Args {
    /// local git checkouts to collect revisions from; configurations are
    /// matched against whichever environment's path resolves
    pub environments: Vec<PathBuf>,

    /// address the long-lived binding listens on
    #[clap(long, default_value = "0.0.0.0:7634")]
    pub bind: String,
}
