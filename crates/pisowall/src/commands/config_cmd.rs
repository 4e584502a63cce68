//! Config command handlers (sync, no engine needed).

use pisowall_config::Config;

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::error::CliError;

use super::util;

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Show => {
            let cfg = util::load_config(global)?;
            // Surface validation errors even though we print the raw values.
            cfg.to_engine_config()?;
            let rendered = toml::to_string_pretty(&cfg)
                .map_err(|e| CliError::Internal(format!("cannot render config: {e}")))?;
            if !global.quiet {
                print!("{rendered}");
            }
            Ok(())
        }

        ConfigCommand::Path => {
            println!("{}", util::config_file(global).display());
            Ok(())
        }

        ConfigCommand::Init { force } => {
            let path = util::config_file(global);
            if path.exists() && !force {
                return Err(CliError::ConfigExists {
                    path: path.display().to_string(),
                });
            }
            pisowall_config::save_config(&Config::default(), &path)?;
            if !global.quiet {
                eprintln!("Configuration written to {}", path.display());
            }
            Ok(())
        }
    }
}
