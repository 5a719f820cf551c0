use crate::output::print_json;
use crate::root::Host;
use bootgate_core::config::WarnLevel;
use clap::Subcommand;

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Print the effective config (secret names only, never values)
    Show,

    /// Validate the config for common mistakes
    Validate,
}

pub fn run(host: &Host, subcmd: ConfigSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ConfigSubcommand::Show => show(host, json),
        ConfigSubcommand::Validate => validate(host, json),
    }
}

fn show(host: &Host, json: bool) -> anyhow::Result<()> {
    if json {
        print_json(&host.config)
    } else {
        println!("# {}", host.path.display());
        print!("{}", host.config.to_yaml()?);
        Ok(())
    }
}

fn validate(host: &Host, json: bool) -> anyhow::Result<()> {
    let warnings = host.config.validate();

    if json {
        print_json(&serde_json::json!({ "warnings": warnings }))?;
    } else if warnings.is_empty() {
        println!("Config is valid. No warnings.");
    } else {
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
    }

    if warnings.iter().any(|w| w.level == WarnLevel::Error) {
        anyhow::bail!("config validation found errors");
    }
    Ok(())
}
