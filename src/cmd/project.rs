//! Project setup and inspection commands: `init`, `validate`, `graph`, `score`.

use anyhow::{Context, Result};
use console::style;
use std::path::Path;

use conductor::conductor_config::{CONDUCTOR_DIR, CONFIG_FILE, ConductorConfig, ConductorToml};
use conductor::exit_codes;

pub fn cmd_init(project_dir: &Path, force: bool) -> Result<u8> {
    let conductor_dir = project_dir.join(CONDUCTOR_DIR);
    let config_path = conductor_dir.join(CONFIG_FILE);

    if config_path.exists() && !force {
        println!(
            "conductor.toml already exists at {}",
            config_path.display()
        );
        println!("Use --force to overwrite it.");
        return Ok(exit_codes::SUCCESS);
    }

    for dir in [
        conductor_dir.clone(),
        conductor_dir.join("manifests"),
        conductor_dir.join("logs"),
    ] {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    let toml = ConductorToml::reference();
    toml.save(&config_path)?;

    let mut created_prompts = Vec::new();
    for phase in &toml.phases {
        let Some(prompt) = &phase.prompt else {
            continue;
        };
        let path = project_dir.join(prompt);
        if path.exists() {
            continue;
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(&path, format!("# {}\n\n{}\n", phase.name, phase.description))
            .with_context(|| format!("Failed to write {}", path.display()))?;
        created_prompts.push(prompt.clone());
    }

    println!("Initialized conductor project at {}", conductor_dir.display());
    println!();
    println!("Created:");
    println!("  .conductor/");
    println!("  ├── conductor.toml   # pipeline and defaults");
    println!("  ├── manifests/       # one append-only manifest per feature");
    println!("  └── logs/            # one log file per phase attempt");
    for prompt in &created_prompts {
        println!("  {prompt}");
    }
    println!();
    println!("Next steps:");
    println!("  1. Set [tool] profile in conductor.toml (or pass --profile)");
    println!("  2. Run `conductor run <feature>`");
    Ok(exit_codes::SUCCESS)
}

pub fn cmd_validate(project_dir: &Path, feature: &str) -> Result<u8> {
    let config = ConductorConfig::new(project_dir.to_path_buf())?;
    let name = config.validator().validate(feature)?;
    println!("{} {}", style("✓").green(), name);
    Ok(exit_codes::SUCCESS)
}

pub fn cmd_graph(project_dir: &Path) -> Result<u8> {
    use conductor::dag::DagBuilder;

    let config = ConductorConfig::new(project_dir.to_path_buf())?;
    let frozen = config.freeze().context("Invalid configuration")?;
    let graph = DagBuilder::new(frozen.phases).build()?;

    println!();
    println!("{:<12} {:<10} {:<24} Description", "Phase", "Group", "Depends on");
    println!(
        "{:<12} {:<10} {:<24} -----------",
        "------------", "----------", "------------------------"
    );
    for phase in graph.phases() {
        let mut group = phase.group.clone().unwrap_or_else(|| "-".into());
        if phase.non_blocking {
            group.push('*');
        }
        let deps = if phase.depends_on.is_empty() {
            "-".to_string()
        } else {
            phase.depends_on.join(", ")
        };
        println!(
            "{:<12} {:<10} {:<24} {}",
            phase.name, group, deps, phase.description
        );
    }

    println!();
    println!("Execution waves:");
    for (i, wave) in graph.compute_waves().iter().enumerate() {
        println!("  {}. {}", i + 1, wave.join(", "));
    }
    if graph.phases().iter().any(|p| p.non_blocking) {
        println!();
        println!("{}", style("* non-blocking: a failure may be skipped").dim());
    }
    println!();
    Ok(exit_codes::SUCCESS)
}

pub fn cmd_score(project_dir: &Path, artifact: &Path, threshold: Option<f64>) -> Result<u8> {
    use conductor::quality::QualityGate;

    let config = ConductorConfig::new(project_dir.to_path_buf())?;
    let quality = &config.toml.quality;
    let gate = QualityGate::from_pattern(quality.score_pattern.as_deref())?;
    let path = if artifact.is_absolute() {
        artifact.to_path_buf()
    } else {
        config.project_dir.join(artifact)
    };

    let score = gate.evaluate(&path)?;
    let threshold = threshold.unwrap_or(quality.threshold);
    if score.meets(threshold) {
        println!(
            "{} score {}/10 meets threshold {}",
            style("✓").green(),
            score.value,
            threshold
        );
        Ok(exit_codes::SUCCESS)
    } else {
        println!(
            "{} score {}/10 is below threshold {}",
            style("✗").red(),
            score.value,
            threshold
        );
        Ok(exit_codes::FAILURE)
    }
}
