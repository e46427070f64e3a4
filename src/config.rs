//! CLI surface (component H): the `set`/`get` subcommands, flag-for-flag
//! with the original `ananke_cli.py` adapter.

use clap::{Parser, Subcommand};

use crate::error::{DeployerError, Result};
use crate::settings::WriteMethod;

/// `ananke set [TARGET ...] [-s SECTION]... [-m replace|update] [-d|-D] [-C N]
/// [-I SECS] [-T PCT] [-S]`
#[derive(Debug, Parser)]
pub struct SetArgs {
    /// Host ids, role names, or `all`. A single shell-expanded argument
    /// containing whitespace (e.g. `"$TARGETS"`) is split on whitespace.
    pub targets: Vec<String>,

    /// Config section to push; may be given more than once.
    #[arg(short = 's', long = "section")]
    pub sections: Vec<String>,

    /// Write method for this push, default comes from settings.yaml.
    #[arg(short = 'm', long = "method")]
    pub method: Option<String>,

    /// Print JSON body and device response to the terminal.
    #[arg(short = 'd', long, conflicts_with = "dry_run")]
    pub debug: bool,

    /// Render the packs that would be pushed without touching the wire.
    #[arg(short = 'D', long = "dry-run", conflicts_with = "debug")]
    pub dry_run: bool,

    /// Number of post-checks to run after deploy, default 0 (skip).
    #[arg(short = 'C', long = "post-checks", default_value_t = 0)]
    pub post_checks: u32,

    /// Interval in seconds between post-checks, default 10.
    #[arg(short = 'I', long = "post-check-interval")]
    pub post_check_interval: Option<u64>,

    /// Numeric-leaf tolerance percentage for post-check diffs, default 10.
    #[arg(short = 'T', long = "diff-tolerance")]
    pub diff_tolerance: Option<u8>,

    /// Send post-check results to Slack (`ANANKE_SLACK_WEBHOOK` or
    /// `settings.post-checks.slack-webhook`).
    #[arg(short = 'S', long = "slack-post-checks")]
    pub slack_post_checks: bool,
}

impl SetArgs {
    /// Resolved write method override, if `-m` was given.
    pub fn write_method(&self) -> Result<Option<WriteMethod>> {
        self.method.as_deref().map(str::parse).transpose()
    }

    /// Normalized target list, splitting a single whitespace-bearing
    /// positional argument (the `$TARGETS` shell-expansion accommodation).
    pub fn target_tokens(&self) -> Vec<String> {
        if self.targets.len() == 1 && self.targets[0].contains(' ') {
            self.targets[0].split_whitespace().map(str::to_string).collect()
        } else {
            self.targets.clone()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if (self.post_check_interval.is_some() || self.diff_tolerance.is_some())
            && self.post_checks == 0
        {
            return Err(DeployerError::Config(
                "post check interval/tolerance specified without number of post checks".into(),
            ));
        }
        Ok(())
    }
}

/// `ananke get HOSTNAME PATH [-O] [-o]`
#[derive(Debug, Parser)]
pub struct GetArgs {
    pub hostname: String,
    pub path: String,

    /// Render a single line instead of pretty-printed.
    #[arg(short = 'O', long)]
    pub oneline: bool,

    /// Fetch operational (state) data instead of configured (intended) data.
    #[arg(short = 'o', long)]
    pub operational: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Push config to devices/services.
    Set(SetArgs),
    /// Fetch config from a device based on a gNMI path.
    Get(GetArgs),
}

#[derive(Debug, Parser)]
#[command(name = "ananke", version, about = "Declarative network-configuration deployer")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_single_whitespace_target_argument() {
        let args = SetArgs {
            targets: vec!["dev1 dev2 dev3".to_string()],
            sections: vec![],
            method: None,
            debug: false,
            dry_run: false,
            post_checks: 0,
            post_check_interval: None,
            diff_tolerance: None,
            slack_post_checks: false,
        };
        assert_eq!(args.target_tokens(), vec!["dev1", "dev2", "dev3"]);
    }

    #[test]
    fn rejects_interval_without_post_check_count() {
        let args = SetArgs {
            targets: vec![],
            sections: vec![],
            method: None,
            debug: false,
            dry_run: false,
            post_checks: 0,
            post_check_interval: Some(30),
            diff_tolerance: None,
            slack_post_checks: false,
        };
        let err = args.validate().unwrap_err();
        assert!(format!("{err}").contains("post check"));
    }

    #[test]
    fn accepts_post_checks_with_interval() {
        let args = SetArgs {
            targets: vec![],
            sections: vec![],
            method: None,
            debug: false,
            dry_run: false,
            post_checks: 3,
            post_check_interval: Some(30),
            diff_tolerance: None,
            slack_post_checks: false,
        };
        assert!(args.validate().is_ok());
    }
}
