use clap::Args;
use colored::Colorize;
use puc_common::error::Result;
use puc_common::model::VersionRange;
use puc_core::intersect;

#[derive(Args, Debug)]
pub struct Ranges {
    /// Ranges in interval notation, e.g. "[1.0,2.0)" or a bare "1.0"
    #[arg(required = true)]
    pub ranges: Vec<String>,
}

impl Ranges {
    pub fn run(&self) -> Result<()> {
        let parsed = self
            .ranges
            .iter()
            .map(|raw| raw.parse::<VersionRange>())
            .collect::<Result<Vec<_>>>()?;
        let overlap = intersect(&parsed)?;
        println!("{} {}", "Intersection:".bold(), overlap.to_string().green());
        Ok(())
    }
}
