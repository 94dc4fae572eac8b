//! Manifest inspection: `conductor manifest show|verify|last`.

use anyhow::Result;
use console::style;
use std::path::Path;

use super::super::ManifestCommands;
use conductor::conductor_config::ConductorConfig;
use conductor::exit_codes;
use conductor::manifest::{ManifestEntry, ManifestLogger};
use conductor::runner::PhaseStatus;
use conductor::security::FeatureName;

fn open(project_dir: &Path, raw_feature: &str) -> Result<(ManifestLogger, FeatureName)> {
    let config = ConductorConfig::new(project_dir.to_path_buf())?;
    let feature = config.validator().validate(raw_feature)?;
    Ok((ManifestLogger::new(config.manifest_dir()), feature))
}

pub fn cmd_manifest(project_dir: &Path, command: ManifestCommands) -> Result<u8> {
    match command {
        ManifestCommands::Show { feature } => {
            let (manifest, feature) = open(project_dir, &feature)?;
            let entries = manifest.entries(&feature)?;
            if entries.is_empty() {
                println!("No manifest entries for {}", feature);
                return Ok(exit_codes::SUCCESS);
            }
            println!();
            println!("Manifest: {}", manifest.manifest_path(&feature).display());
            println!();
            println!(
                "{:<20} {:<12} {:<8} {:<10} {:<8} Timestamp",
                "Phase", "Status", "Exit", "Duration", "Attempt"
            );
            for entry in &entries {
                print_row(entry);
            }
            println!();
            Ok(exit_codes::SUCCESS)
        }
        ManifestCommands::Verify { feature } => {
            let (manifest, feature) = open(project_dir, &feature)?;
            let count = manifest.verify_well_formed(&feature)?;
            println!(
                "{} {} well-formed entr{} in {}",
                style("✓").green(),
                count,
                if count == 1 { "y" } else { "ies" },
                manifest.manifest_path(&feature).display()
            );
            Ok(exit_codes::SUCCESS)
        }
        ManifestCommands::Last { feature, phase } => {
            let (manifest, feature) = open(project_dir, &feature)?;
            match manifest.query_last_entry(&feature, &phase)? {
                Some(entry) => {
                    println!("{}", serde_json::to_string(&entry)?);
                    Ok(exit_codes::SUCCESS)
                }
                None => {
                    eprintln!("No entry for phase {} of {}", phase, feature);
                    Ok(exit_codes::FAILURE)
                }
            }
        }
    }
}

fn print_row(entry: &ManifestEntry) {
    let label = entry.status.as_str();
    let status = match entry.status {
        PhaseStatus::Success => style(label).green(),
        PhaseStatus::Started => style(label).dim(),
        _ => style(label).red(),
    };
    let or_dash = |value: Option<String>| value.unwrap_or_else(|| "-".to_string());
    println!(
        "{:<20} {:<12} {:<8} {:<10} {:<8} {}",
        entry.phase,
        status,
        or_dash(entry.exit_code.map(|c| c.to_string())),
        or_dash(entry.duration_sec.map(|d| format!("{d}s"))),
        or_dash(entry.attempt.map(|a| a.to_string())),
        entry.timestamp
    );
}
