//! CLI argument parsing for bridges.

use std::path::PathBuf;

use clap::Parser;

/// Common CLI arguments for all bridges.
#[derive(Parser, Debug, Clone)]
#[command(about = "TCP to MQTT bridge", version)]
pub struct BridgeArgs {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long)]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,
}

impl BridgeArgs {
    /// Parse CLI arguments with a default config path.
    ///
    /// If no `--config` argument is provided, uses the default.
    pub fn parse_with_default(default_config: &'static str) -> Self {
        Self::parse_from_with_default(std::env::args_os(), default_config)
    }

    /// Parse the given arguments with a default config path.
    pub fn parse_from_with_default<I, T>(args: I, default_config: &'static str) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let matches = <Self as clap::CommandFactory>::command()
            .mut_arg("config", |arg| arg.required(false).default_value(default_config))
            .get_matches_from(args);

        match <Self as clap::FromArgMatches>::from_arg_matches(&matches) {
            Ok(args) => args,
            Err(e) => e.exit(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_default_config() {
        let args = BridgeArgs::parse_from_with_default(["bridge"], "scanner.json5");
        assert_eq!(args.config, PathBuf::from("scanner.json5"));
        assert_eq!(args.log_level, None);
    }

    #[test]
    fn test_args_override() {
        let args = BridgeArgs::parse_from_with_default(
            ["bridge", "-c", "site.json5", "--log-level", "debug"],
            "scanner.json5",
        );
        assert_eq!(args.config, PathBuf::from("site.json5"));
        assert_eq!(args.log_level, Some("debug".to_string()));
    }
}
