use std::sync::Arc;
use std::time::Duration;

use coach_lib::audio::{CpalMicrophone, CpalSpeaker};
use coach_lib::collaborators::{HttpReportAnalyzer, HttpSessionConfigProvider, ReportAnalyzer};
use coach_lib::storage::{JsonFileStore, Speaker};
use coach_lib::streaming::WsConnector;
use coach_lib::{load_settings, CoachController, CoachDeps, CoachSnapshot, SessionStatus};
use tokio::io::{AsyncBufReadExt, BufReader};

/// How long to wait for the post-session report before exiting
const REPORT_WAIT: Duration = Duration::from_secs(90);

#[tokio::main]
async fn main() {
    // Load .env file if present (for development convenience)
    // Silently ignore if not found - production uses system env vars
    let _ = dotenvy::dotenv();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut settings = load_settings();
    settings.apply_env_overrides();

    let store = match &settings.store_path {
        Some(path) => JsonFileStore::open(path),
        None => JsonFileStore::open_default(),
    };
    let store = match store {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Cannot open store: {}", e);
            std::process::exit(1);
        }
    };
    log::info!("Using store at {}", store.path().display());

    let analyzer = settings
        .analysis_url
        .clone()
        .map(|url| Arc::new(HttpReportAnalyzer::new(url)) as Arc<dyn ReportAnalyzer>);

    let deps = CoachDeps {
        config: Arc::new(HttpSessionConfigProvider::new(settings.session_url.clone())),
        connector: Arc::new(WsConnector::new()),
        store: Arc::new(store),
        input: Arc::new(CpalMicrophone),
        output: Arc::new(CpalSpeaker),
        analyzer,
    };

    let controller = CoachController::spawn(deps, settings);
    let mut snapshots = controller.subscribe();

    println!("Connecting...");
    if let Err(e) = controller.start().await {
        eprintln!("{}", e);
        controller.shutdown().await;
        std::process::exit(1);
    }
    println!("Session started. Commands: m = mute, p = pause, h = clear history, q = quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut printed = 0;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => match line.trim() {
                    "m" => controller.toggle_mute(),
                    "p" => controller.toggle_pause(),
                    "h" => match controller.clear_history().await {
                        Ok(()) => println!("Session history cleared."),
                        Err(e) => eprintln!("{}", e),
                    },
                    "q" => break,
                    "" => {}
                    other => println!("Unknown command {:?}", other),
                },
                _ => break,
            },
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                printed = print_new_entries(&snapshot, printed);
                if snapshot.status == SessionStatus::Ended {
                    if let Some(error) = &snapshot.error {
                        eprintln!("{}", error);
                    }
                    break;
                }
            }
        }
    }

    controller.stop().await;
    wait_for_report(&controller).await;
    controller.shutdown().await;
}

fn print_new_entries(snapshot: &CoachSnapshot, printed: usize) -> usize {
    for entry in snapshot.transcript.iter().skip(printed) {
        let who = match entry.speaker {
            Speaker::User => "you",
            Speaker::Assistant => "coach",
        };
        println!("[{}] {}", who, entry.text);
    }
    snapshot.transcript.len()
}

async fn wait_for_report(controller: &CoachController) {
    let mut snapshots = controller.subscribe();
    if !controller.state().await.generating_report {
        return;
    }
    println!("Generating session report...");

    let waited = tokio::time::timeout(REPORT_WAIT, async {
        while snapshots.changed().await.is_ok() {
            if !snapshots.borrow_and_update().generating_report {
                break;
            }
        }
    })
    .await;

    match waited {
        Ok(()) => println!("Report finished."),
        Err(_) => println!("Report is taking too long, exiting."),
    }
}
