use super::*;
use clap::CommandFactory;

#[test]
fn verify_cli_args() {
    Cli::command().debug_assert();
}

#[test]
fn test_plan_defaults_to_migration_yml() {
    let cli = Cli::try_parse_from(["mig"]).unwrap();
    assert_eq!(cli.plan, PathBuf::from("Migration.yml"));
    assert!(!cli.resume);
    assert!(!cli.verbose);
}

#[test]
fn test_plan_and_resume() {
    let cli = Cli::try_parse_from(["mig", "deploy/Plan.yml", "--resume", "-v"]).unwrap();
    assert_eq!(cli.plan, PathBuf::from("deploy/Plan.yml"));
    assert!(cli.resume);
    assert!(cli.verbose);
}

#[test]
fn test_rejects_unknown_flag() {
    assert!(Cli::try_parse_from(["mig", "--force"]).is_err());
}
