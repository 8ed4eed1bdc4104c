#![allow(clippy::needless_borrows_for_generic_args)]

use std::path::Path;

use clap::Parser;
use gantry::cli::commands::config::ConfigCommands;
use gantry::cli::commands::questions::QuestionCommands;
use gantry::cli::{Cli, Commands};
use uuid::Uuid;

#[test]
fn test_parse_ask_minimal() {
    let cli = Cli::try_parse_from(vec!["gantry", "ask", "add retry logic to the uploader"])
        .unwrap();

    match cli.command {
        Commands::Ask(args) => {
            assert_eq!(args.message, "add retry logic to the uploader");
            assert_eq!(args.conversation, "default");
            assert!(args.answer_to.is_none());
        }
        _ => panic!("Wrong command"),
    }
    assert!(!cli.json);
}

#[test]
fn test_parse_ask_with_conversation_and_answer() {
    let question = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();

    let cli = Cli::try_parse_from(vec![
        "gantry",
        "ask",
        "iterative please",
        "-C",
        "billing-retry",
        "--answer-to",
        "550e8400-e29b-41d4-a716-446655440000",
    ])
    .unwrap();

    match cli.command {
        Commands::Ask(args) => {
            assert_eq!(args.message, "iterative please");
            assert_eq!(args.conversation, "billing-retry");
            assert_eq!(args.answer_to, Some(question));
        }
        _ => panic!("Wrong command"),
    }
}

#[test]
fn test_parse_ask_rejects_bad_answer_id() {
    let result = Cli::try_parse_from(vec![
        "gantry",
        "ask",
        "hello",
        "--answer-to",
        "not-a-uuid",
    ]);
    assert!(result.is_err());
}

#[test]
fn test_parse_init_defaults_and_force() {
    let cli = Cli::try_parse_from(vec!["gantry", "init"]).unwrap();
    match cli.command {
        Commands::Init(args) => {
            assert_eq!(args.path, Path::new("."));
            assert!(!args.force);
        }
        _ => panic!("Wrong command"),
    }

    let cli = Cli::try_parse_from(vec!["gantry", "init", "--force", "/tmp/project"]).unwrap();
    match cli.command {
        Commands::Init(args) => {
            assert_eq!(args.path, Path::new("/tmp/project"));
            assert!(args.force);
        }
        _ => panic!("Wrong command"),
    }
}

#[test]
fn test_parse_questions_subcommands() {
    let cli = Cli::try_parse_from(vec!["gantry", "questions", "list"]).unwrap();
    match cli.command {
        Commands::Questions(command) => {
            assert!(matches!(command, QuestionCommands::List));
        }
        _ => panic!("Wrong command"),
    }

    let cli = Cli::try_parse_from(vec!["gantry", "questions", "show", "billing-retry"]).unwrap();
    match cli.command {
        Commands::Questions(command) => match command {
            QuestionCommands::Show { conversation } => {
                assert_eq!(conversation, "billing-retry");
            }
            _ => panic!("Wrong questions command"),
        },
        _ => panic!("Wrong command"),
    }

    let cli = Cli::try_parse_from(vec!["gantry", "questions", "purge"]).unwrap();
    match cli.command {
        Commands::Questions(command) => {
            assert!(matches!(command, QuestionCommands::Purge));
        }
        _ => panic!("Wrong command"),
    }
}

#[test]
fn test_parse_config_subcommands() {
    let cli = Cli::try_parse_from(vec!["gantry", "config", "show"]).unwrap();
    match cli.command {
        Commands::Config(command) => {
            assert!(matches!(command, ConfigCommands::Show));
        }
        _ => panic!("Wrong command"),
    }

    let cli =
        Cli::try_parse_from(vec!["gantry", "config", "validate", "/etc/gantry.yaml"]).unwrap();
    match cli.command {
        Commands::Config(command) => match command {
            ConfigCommands::Validate { path } => {
                assert_eq!(path, Path::new("/etc/gantry.yaml"));
            }
            _ => panic!("Wrong config command"),
        },
        _ => panic!("Wrong command"),
    }
}

#[test]
fn test_parse_status() {
    let cli = Cli::try_parse_from(vec!["gantry", "status"]).unwrap();
    assert!(matches!(cli.command, Commands::Status));
}

#[test]
fn test_global_flags_apply_after_subcommand() {
    let cli = Cli::try_parse_from(vec!["gantry", "status", "--json"]).unwrap();
    assert!(cli.json);
    assert!(cli.config.is_none());

    let cli = Cli::try_parse_from(vec![
        "gantry",
        "questions",
        "list",
        "--config",
        "/etc/gantry.yaml",
        "--json",
    ])
    .unwrap();
    assert!(cli.json);
    assert_eq!(cli.config.as_deref(), Some(Path::new("/etc/gantry.yaml")));
}

#[test]
fn test_missing_subcommand_is_an_error() {
    assert!(Cli::try_parse_from(vec!["gantry"]).is_err());
    assert!(Cli::try_parse_from(vec!["gantry", "ask"]).is_err());
}
