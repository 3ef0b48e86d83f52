use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliVerb {
    Start,
    Stop,
    Status,
    Outbound,
    Help,
    Unknown,
}

pub fn parse_cli_verb(input: &str) -> CliVerb {
    match input {
        "start" => CliVerb::Start,
        "stop" => CliVerb::Stop,
        "status" => CliVerb::Status,
        "outbound" => CliVerb::Outbound,
        "help" | "--help" | "-h" => CliVerb::Help,
        _ => CliVerb::Unknown,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalOptions {
    pub config: Option<PathBuf>,
    pub state_root: Option<PathBuf>,
}

/// Pulls `--config` and `--state-root` out of `args` wherever they appear.
pub fn split_global_options(args: Vec<String>) -> Result<(GlobalOptions, Vec<String>), String> {
    let mut options = GlobalOptions::default();
    let mut rest = Vec::new();
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                let value = iter
                    .next()
                    .ok_or_else(|| "`--config` requires a path".to_string())?;
                options.config = Some(PathBuf::from(value));
            }
            "--state-root" => {
                let value = iter
                    .next()
                    .ok_or_else(|| "`--state-root` requires a path".to_string())?;
                options.state_root = Some(PathBuf::from(value));
            }
            _ => rest.push(arg),
        }
    }
    Ok((options, rest))
}

pub fn cli_help_lines() -> Vec<String> {
    vec![
        "Commands:".to_string(),
        "  start                    Run the gateway in the foreground until stopped".to_string(),
        "  stop                     Signal the running gateway to stop".to_string(),
        "  status                   Show gateway, channel and worker status".to_string(),
        "  outbound list            List pending outbound deliveries".to_string(),
        "  outbound replay          Retry pending outbound deliveries once".to_string(),
        "  help                     Show this help".to_string(),
        String::new(),
        "Options:".to_string(),
        "  --config <path>          Settings file (default ~/.switchyard/config.yaml)"
            .to_string(),
        "  --state-root <path>      State directory (default ~/.switchyard)".to_string(),
    ]
}

pub(crate) fn help_text() -> String {
    cli_help_lines().join("\n")
}
