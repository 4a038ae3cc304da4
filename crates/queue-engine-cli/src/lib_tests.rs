//! Tests for the queue-engine-cli library module.

use super::*;
use queue_engine::SecretValue;

#[test]
fn test_cli_parsing_run_command() {
    let cli = Cli::try_parse_from([
        "queue-engine",
        "--log-level",
        "debug",
        "run",
        "--messages",
        "25",
        "--abandon-every",
        "5",
    ])
    .unwrap();

    assert_eq!(cli.log_level, "debug");
    assert!(!cli.json_logs);
    match cli.command {
        Commands::Run {
            messages,
            abandon_every,
            timeout_secs,
            format,
        } => {
            assert_eq!(messages, 25);
            assert_eq!(abandon_every, 5);
            assert_eq!(timeout_secs, 30);
            assert_eq!(format, OutputFormat::Text);
        }
        _ => panic!("Expected Run command"),
    }
}

#[test]
fn test_cli_parsing_config_command() {
    let cli =
        Cli::try_parse_from(["queue-engine", "config", "--show", "--format", "json"]).unwrap();

    match cli.command {
        Commands::Config { show, format } => {
            assert!(show);
            assert_eq!(format, ConfigFormat::Json);
        }
        _ => panic!("Expected Config command"),
    }
}

#[test]
fn test_cli_rejects_unknown_format() {
    let result = Cli::try_parse_from(["queue-engine", "config", "--format", "toml"]);
    assert!(result.is_err());
}

#[test]
fn test_exit_codes_are_distinct() {
    let errors = [
        CliError::Configuration(ConfigurationError::Missing {
            key: "config.yaml".to_string(),
        }),
        CliError::Queue(QueueError::NotOpened {
            queue: "q".to_string(),
        }),
        CliError::CommandFailed {
            message: "failed".to_string(),
        },
        CliError::InvalidArgument {
            arg: "log-level".to_string(),
            message: "bad".to_string(),
        },
        CliError::Output {
            message: "bad".to_string(),
        },
    ];

    let codes: HashSet<i32> = errors.iter().map(CliError::exit_code).collect();
    assert_eq!(codes.len(), errors.len());
    assert!(!codes.contains(&0));
}

#[test]
fn test_render_config_redacts_secrets() {
    let mut config = QueueConfig::named("orders");
    config.credential = Some(queue_engine::CredentialParams {
        username: Some("svc".to_string()),
        password: Some(SecretValue::from_string("hunter2".to_string())),
        access_key: None,
    });

    let yaml = render_config(&config, ConfigFormat::Yaml).unwrap();
    let json = render_config(&config, ConfigFormat::Json).unwrap();

    for rendered in [&yaml, &json] {
        assert!(rendered.contains("orders"));
        assert!(rendered.contains(SecretValue::REDACTED));
        assert!(!rendered.contains("hunter2"));
    }

    let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed["name"], "orders");
}

#[tokio::test]
async fn test_run_workload_completes_every_message() {
    let config = QueueConfig::named("workload");
    let options = RunOptions {
        messages: 12,
        abandon_every: 4,
        timeout: Duration::from_secs(10),
    };

    let summary = run_workload(&config, options).await.unwrap();

    assert_eq!(summary.queue, "workload");
    assert_eq!(summary.completed, 12);
    assert_eq!(summary.stats.completed, 12);
    assert_eq!(summary.redelivered as u64, summary.stats.abandoned);
    assert!(summary.redelivered > 0);
    assert_eq!(summary.stats.sent, 12 + summary.stats.abandoned);
    assert_eq!(summary.stats.dead_lettered, 0);
}

#[tokio::test]
async fn test_run_workload_with_no_messages() {
    let options = RunOptions {
        messages: 0,
        abandon_every: 0,
        timeout: Duration::from_secs(1),
    };

    let summary = run_workload(&QueueConfig::default(), options).await.unwrap();

    assert_eq!(summary.completed, 0);
    assert_eq!(summary.stats, QueueStats::default());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_run_workload_with_no_messages_shuts_down_repeatedly() {
    for _ in 0..5 {
        let options = RunOptions {
            messages: 0,
            abandon_every: 0,
            timeout: Duration::from_secs(1),
        };

        let summary = tokio::time::timeout(
            Duration::from_secs(5),
            run_workload(&QueueConfig::default(), options),
        )
        .await
        .expect("workload should finish within its own timeout")
        .unwrap();

        assert_eq!(summary.completed, 0);
    }
}

#[test]
fn test_summary_display_lists_counters() {
    let summary = RunSummary {
        queue: "q".to_string(),
        messages: 3,
        completed: 3,
        redelivered: 1,
        elapsed_ms: 5,
        stats: QueueStats {
            sent: 4,
            received: 4,
            completed: 3,
            abandoned: 1,
            dead_lettered: 0,
        },
    };

    let text = summary.to_string();
    assert!(text.contains("Completed:     3"));
    assert!(text.contains("Abandoned:     1"));
}
