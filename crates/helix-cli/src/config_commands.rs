//! Configuration inspection and persistence (ambient stack).

use clap::Subcommand;
use helix_config::HelixConfig;

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the effective, currently loaded configuration as JSON.
    Show,
    /// Print the path discovery would use (or did use) without loading it.
    Path,
    /// Write the effective configuration to disk (creating parent
    /// directories as needed).
    Save,
}

pub async fn handle_config(action: ConfigAction, config: &HelixConfig) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            println!("{}", serde_json::to_string_pretty(config)?);
            Ok(())
        },
        ConfigAction::Path => {
            println!("{}", helix_config::find_or_default_config_path().display());
            if let Some(dir) = helix_config::config_dir() {
                println!("config dir: {}", dir.display());
            }
            Ok(())
        },
        ConfigAction::Save => {
            let path = helix_config::save_config(config)?;
            println!("saved to {}", path.display());
            Ok(())
        },
    }
}
