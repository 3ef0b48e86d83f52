use crate::app::cli::{help_text, parse_cli_verb, split_global_options, CliVerb, GlobalOptions};
use crate::config::{default_config_path, load_settings, Settings};
use crate::runtime::{bootstrap_state_root, default_state_root_path, StatePaths};
use std::path::PathBuf;

pub mod daemon;
pub mod outbound;

/// Resolved locations for one CLI invocation.
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub paths: StatePaths,
    pub config_path: PathBuf,
}

impl CommandContext {
    pub fn resolve(options: &GlobalOptions) -> Result<Self, String> {
        let paths = match options.state_root.clone() {
            Some(root) => StatePaths::new(root),
            None => StatePaths::new(default_state_root_path().map_err(|e| e.to_string())?),
        };
        let config_path = match (options.config.clone(), options.state_root.is_some()) {
            (Some(path), _) => path,
            (None, true) => paths.settings_file(),
            (None, false) => default_config_path().map_err(|e| e.to_string())?,
        };
        Ok(Self { paths, config_path })
    }

    pub fn ensure_state_root(&self) -> Result<(), String> {
        bootstrap_state_root(&self.paths).map_err(|e| e.to_string())
    }

    pub fn settings(&self) -> Result<Settings, String> {
        load_settings(&self.config_path).map_err(|e| e.to_string())
    }
}

pub fn run_cli(args: Vec<String>) -> Result<String, String> {
    let (options, args) = split_global_options(args)?;
    if args.is_empty() {
        return Ok(help_text());
    }
    let verb = parse_cli_verb(args[0].as_str());
    if verb == CliVerb::Help {
        return Ok(help_text());
    }
    if verb == CliVerb::Unknown {
        return Err(format!("unknown command `{}`", args[0]));
    }

    let context = CommandContext::resolve(&options)?;
    match verb {
        CliVerb::Start => daemon::cmd_start(&context),
        CliVerb::Stop => daemon::cmd_stop(&context),
        CliVerb::Status => daemon::cmd_status(&context),
        CliVerb::Outbound => outbound::cmd_outbound(&context, &args[1..]),
        CliVerb::Help | CliVerb::Unknown => Ok(help_text()),
    }
}
