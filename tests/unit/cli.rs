//! Unit tests for command-line parsing

use clap::{CommandFactory, Parser};
use operator_deployer::cli::{Cli, Command};

#[test]
fn test_cli_definition_is_consistent() {
    Cli::command().debug_assert();
}

#[test]
fn test_parse_deploy_and_undeploy() {
    let cli = Cli::try_parse_from(["operator-deployer", "deploy"]).unwrap();
    assert_eq!(cli.command, Command::Deploy);
    assert!(cli.command.rolls_back_on_interrupt());

    let cli = Cli::try_parse_from(["operator-deployer", "undeploy"]).unwrap();
    assert_eq!(cli.command.name(), "undeploy");
    assert!(!cli.command.rolls_back_on_interrupt());
}

#[test]
fn test_parse_upgrade_arguments() {
    let cli = Cli::try_parse_from([
        "operator-deployer",
        "upgrade",
        "7.11.x",
        "quay.io/artemiscloud/catalog:2.0",
    ])
    .unwrap();
    assert_eq!(
        cli.command,
        Command::Upgrade {
            channel: "7.11.x".to_string(),
            catalog_image: "quay.io/artemiscloud/catalog:2.0".to_string(),
        }
    );
}

#[test]
fn test_upgrade_requires_channel_and_image() {
    assert!(Cli::try_parse_from(["operator-deployer", "upgrade", "7.11.x"]).is_err());
    assert!(Cli::try_parse_from(["operator-deployer", "install"]).is_err());
    assert!(Cli::try_parse_from(["operator-deployer"]).is_err());
}
