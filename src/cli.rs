//! Minimal operator CLI for exercising the sync engine's internal API
//! locally. This binary is not a client of a separately-running
//! service - it builds its own engine instance against the configured
//! database/folder, backs it with an in-memory store, runs one command, and
//! exits. There is no persistence across invocations; that is the trade-off
//! of having no out-of-process transport in front of the engine yet.

use schema_sync_engine::error::SyncError;
use schema_sync_engine::sync::config::{Configuration, WorkerEnableFlags};
use schema_sync_engine::sync::engine::SyncEngine;
use schema_sync_engine::sync::{
    AuthKind, ComparisonId, DatabaseConnection, LayoutKind, ProjectFolder, SubscriptionId, SubscriptionOptions,
};
use schema_sync_engine::Result;
use std::path::PathBuf;
use std::time::Duration;

fn usage() -> ! {
    eprintln!(
        "usage: schema-sync-cli <command> [args...]\n\n\
         commands:\n  \
         create <name> <server> <database> <folder>   create a subscription (integrated auth, flat layout)\n  \
         list                                         list all subscriptions\n  \
         get <subscription-id>                        show one subscription\n  \
         pause <subscription-id>\n  \
         resume <subscription-id>\n  \
         delete <subscription-id>\n  \
         compare <subscription-id> [--full]            trigger a comparison and print its summary\n  \
         comparisons <subscription-id>                 list past comparisons\n  \
         diff <comparison-id>                          list differences for a comparison\n  \
         unsupported <comparison-id>                   list unsupported objects for a comparison"
    );
    std::process::exit(2);
}

fn parse_uuid(arg: Option<&String>, what: &str) -> Uuid {
    let Some(arg) = arg else {
        eprintln!("missing {what}");
        usage();
    };
    match Uuid::parse_str(arg) {
        Ok(id) => id,
        Err(_) => {
            eprintln!("invalid {what}: {arg}");
            std::process::exit(2);
        }
    }
}

use uuid::Uuid;

fn no_background_workers(mut config: Configuration) -> Configuration {
    config.workers = WorkerEnableFlags {
        database_polling: false,
        file_watching: false,
        reconciliation: false,
        cache_cleanup: false,
        health_check: false,
    };
    config
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_target(false).without_time().init();

    let args: Vec<String> = std::env::args().collect();
    let Some(command) = args.get(1) else { usage() };

    let config_path = std::env::var("SCHEMA_SYNC_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("schema-sync.toml"));
    let config = no_background_workers(Configuration::load(&config_path)?);
    let engine = SyncEngine::new(config);

    let outcome: Result<()> = match command.as_str() {
        "create" => {
            let name = args.get(2).cloned().unwrap_or_else(|| usage());
            let server = args.get(3).cloned().unwrap_or_else(|| usage());
            let database = args.get(4).cloned().unwrap_or_else(|| usage());
            let folder = args.get(5).cloned().unwrap_or_else(|| usage());

            let connection = DatabaseConnection {
                server,
                database,
                auth_kind: AuthKind::Integrated,
                username: None,
                secret: None,
                trust_certificate: true,
                connect_timeout: Duration::from_secs(10),
            };
            let project_folder = ProjectFolder {
                root: PathBuf::from(folder),
                include_patterns: vec!["**/*.sql".into()],
                exclude_patterns: vec![],
                layout: LayoutKind::Flat,
            };
            let subscription = engine.create_subscription(name, connection, project_folder, SubscriptionOptions::default()).await?;
            println!("created subscription {} ({})", subscription.id, subscription.name);
            Ok(())
        }
        "list" => {
            let subscriptions = engine.list_subscriptions().await?;
            if subscriptions.is_empty() {
                println!("no subscriptions");
            }
            for s in subscriptions {
                println!("{}  {:<24}  {:?}  {:?}", s.id, s.name, s.state, s.health.overall_status);
            }
            Ok(())
        }
        "get" => {
            let id: SubscriptionId = parse_uuid(args.get(2), "subscription-id");
            let subscription = engine.get_subscription(id).await?;
            println!("{subscription:#?}");
            Ok(())
        }
        "pause" => {
            let id: SubscriptionId = parse_uuid(args.get(2), "subscription-id");
            let subscription = engine.pause_subscription(id).await?;
            println!("subscription {} is now {:?}", subscription.id, subscription.state);
            Ok(())
        }
        "resume" => {
            let id: SubscriptionId = parse_uuid(args.get(2), "subscription-id");
            let subscription = engine.resume_subscription(id).await?;
            println!("subscription {} is now {:?}", subscription.id, subscription.state);
            Ok(())
        }
        "delete" => {
            let id: SubscriptionId = parse_uuid(args.get(2), "subscription-id");
            engine.delete_subscription(id).await?;
            println!("deleted subscription {id}");
            Ok(())
        }
        "compare" => {
            let id: SubscriptionId = parse_uuid(args.get(2), "subscription-id");
            let full = args.iter().any(|a| a == "--full");
            let result = engine.trigger_comparison(id, full).await?;
            println!(
                "comparison {} status={:?} differences={} unsupported_db={} unsupported_file={}",
                result.id,
                result.status,
                result.summary.total_differences,
                result.summary.unsupported_database_count,
                result.summary.unsupported_file_count,
            );
            Ok(())
        }
        "comparisons" => {
            let id: SubscriptionId = parse_uuid(args.get(2), "subscription-id");
            let comparisons = engine.list_comparisons(id).await?;
            for c in comparisons {
                println!("{}  {}  {:?}  differences={}", c.id, c.compared_at.to_rfc3339(), c.status, c.summary.total_differences);
            }
            Ok(())
        }
        "diff" => {
            let id: ComparisonId = parse_uuid(args.get(2), "comparison-id");
            let differences = engine.list_differences(id).await?;
            for d in differences {
                println!("{:?} {:?} {}.{}", d.difference_kind, d.object_type, d.schema_name, d.object_name);
            }
            Ok(())
        }
        "unsupported" => {
            let id: ComparisonId = parse_uuid(args.get(2), "comparison-id");
            let unsupported = engine.list_unsupported(id).await?;
            for u in unsupported {
                println!("{:?} {:?} {}.{}", u.source, u.object_type, u.schema_name, u.object_name);
            }
            Ok(())
        }
        _ => usage(),
    };

    engine.shutdown().await;

    if let Err(e) = &outcome {
        eprintln!("error: {e}");
        std::process::exit(match e {
            SyncError::NotFound(_) => 1,
            SyncError::Conflict(_) => 1,
            _ => 3,
        });
    }
    outcome
}
