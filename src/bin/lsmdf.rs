use hvb_thermal::mdf::Mdf;
use itertools::Itertools;
use regex::Regex;
use std::{collections::BTreeMap, path::PathBuf};
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(name = "lsmdf", about = "Lists the channels of an MDF 4 recording")]
struct Opt {
    /// Path to the MDF 4 recording
    path: PathBuf,
    /// Only temperature channels, grouped by base name
    #[structopt(short, long)]
    temp: bool,
    /// Show data group, unit and data type of each channel
    #[structopt(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let opt = Opt::from_args();

    let mdf = Mdf::open(&opt.path)?;
    let entries = mdf.list_channels();
    if opt.verbose {
        for e in entries.iter().filter(|e| !e.is_master) {
            println!(
                "#{:<3} {:48} {:8} type {}",
                e.group,
                e.name,
                e.unit.as_deref().unwrap_or("-"),
                e.data_type
            );
        }
        return Ok(());
    }
    let names: Vec<&str> = entries
        .iter()
        .filter(|e| !e.is_master)
        .map(|e| e.name.as_str())
        .unique()
        .sorted()
        .collect();
    if !opt.temp {
        println!("{}", names.join("\n"));
        return Ok(());
    }

    let suffix = Regex::new(r"^(.*?)(\d+)?$")?;
    let mut groups: BTreeMap<String, Vec<&str>> = BTreeMap::new();
    for name in names
        .into_iter()
        .filter(|n| n.to_lowercase().contains("temp"))
    {
        let base = suffix
            .captures(name)
            .and_then(|c| c.get(1))
            .map_or(name, |m| m.as_str());
        groups.entry(base.to_string()).or_default().push(name);
    }
    for (base, members) in groups {
        println!("{} ({} channels)", base, members.len());
        members.iter().for_each(|m| println!("  - {}", m));
    }
    Ok(())
}
