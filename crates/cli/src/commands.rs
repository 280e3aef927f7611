//! Clap command tree definition.

use clap::{Arg, ArgAction, Command};

/// Build the complete CLI command tree.
pub fn build_cli() -> Command {
    Command::new("strata-snapshot")
        .about("Offline tools for Strata snapshot directories")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("json")
                .long("json")
                .help("JSON output mode")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .subcommand(build_verify())
        .subcommand(build_scan())
        .subcommand(build_compare())
        .subcommand(build_init_config())
}

fn build_verify() -> Command {
    Command::new("verify")
        .about("Check snapshot files and print a consistency report per snapshot")
        .arg(
            Arg::new("dir")
                .long("dir")
                .short('d')
                .help("Directory to search (repeatable, default: current directory)")
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("nonce")
                .help("Nonces to verify (default: every snapshot found)")
                .num_args(0..)
                .action(ArgAction::Append),
        )
}

fn build_scan() -> Command {
    Command::new("scan")
        .about("List the snapshots under a directory tree")
        .arg(Arg::new("path").required(true).help("Directory to scan"))
}

fn build_compare() -> Command {
    Command::new("compare")
        .about("Compare the replicas of one snapshot, or the rows of two snapshots")
        .arg(
            Arg::new("dir")
                .long("dir")
                .short('d')
                .default_value(".")
                .help("Directory holding the snapshot"),
        )
        .arg(
            Arg::new("other-dir")
                .long("other-dir")
                .help("Directory holding the second snapshot (default: --dir)"),
        )
        .arg(Arg::new("nonce").required(true).help("Snapshot to check"))
        .arg(
            Arg::new("other")
                .required(false)
                .help("Second snapshot; without it the replicas of NONCE are compared"),
        )
}

fn build_init_config() -> Command {
    Command::new("init-config")
        .about("Write a default snapshot.toml if none exists")
        .arg(
            Arg::new("path")
                .help("Config file path (default: snapshot.toml)")
                .required(false),
        )
}
