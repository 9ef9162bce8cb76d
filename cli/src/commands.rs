use std::sync::Arc;

use anyhow::Context;
use serde::Serialize;
use ucremote_core::{ConnectionDescriptor, ContentId, OutputState, ProgrammeInfo, SourceId};
use ucremote_worker::{
    ActionDispatcher, ConnectionState, PagerOptions, ReqwestClient, SourceSelection, SyncEngine,
    SyncEvent, SyncOptions, Window,
};

use crate::args::{Args, Command, PairingCode};

type Engine = SyncEngine<ReqwestClient>;

/// One line of `watch` output.
#[derive(Serialize)]
struct Snapshot {
    state: ConnectionState,
    output: Option<OutputState>,
    programme: Option<ProgrammeInfo>,
}

pub async fn run(args: Args) -> anyhow::Result<()> {
    match args.command {
        Command::Decode {
            token: PairingCode(descriptor),
        } => {
            print_descriptor(&descriptor);
            return Ok(());
        }
        Command::Encode { server, salt } => {
            let descriptor = match salt {
                Some(salt) => server.with_security_salt(salt),
                None => server,
            };
            println!("{}", descriptor.pairing_code());
            return Ok(());
        }
        _ => {}
    }

    let server = args.server()?;
    let http = Arc::new(ReqwestClient::new()?);
    let engine = SyncEngine::new(
        http,
        SyncOptions {
            retry_delay: args.retry_delay(),
        },
    );

    let report = engine
        .connect(&server.base_url())
        .await
        .with_context(|| format!("failed to connect to {server}"))?;
    tracing::info!(
        "connected to {} at {server}, protocol {}",
        report.server_name.as_deref().unwrap_or("unnamed server"),
        report.version
    );

    let page_size = args.page_size;
    let dispatcher = ActionDispatcher::new(
        engine.clone(),
        PagerOptions {
            page_size,
            ..PagerOptions::default()
        },
    );

    let result = execute(args.command, &engine, &dispatcher, page_size).await;
    engine.disconnect();
    result
}

async fn execute(
    command: Command,
    engine: &Engine,
    dispatcher: &ActionDispatcher<ReqwestClient>,
    page_size: usize,
) -> anyhow::Result<()> {
    match command {
        Command::Watch => watch(engine).await?,
        Command::Sources => print_sources(engine),
        Command::Browse {
            source,
            offset,
            count,
        } => {
            let window = dispatcher
                .pager()?
                .request_window(
                    &SourceId::from_wire(&source),
                    offset,
                    count.unwrap_or(page_size),
                )
                .await
                .with_context(|| format!("failed to list {source}"))?;
            print_window(&window);
        }
        Command::Select { source } => {
            match dispatcher.select_source(&SourceId::from_wire(&source)).await? {
                SourceSelection::Switched => println!("switching to {source}"),
                SourceSelection::Browse(window) => print_window(&window),
            }
        }
        Command::Tune { source, content } => {
            dispatcher
                .select_content(&SourceId::from_wire(&source), &ContentId::from_wire(&content))
                .await?;
        }
        Command::Volume { fraction } => dispatcher.set_volume(fraction).await?,
        Command::Decode { .. } | Command::Encode { .. } => {}
    }
    Ok(())
}

async fn watch(engine: &Engine) -> anyhow::Result<()> {
    let subscription = engine.subscribe();
    print_snapshot(engine)?;

    loop {
        tokio::select! {
            event = subscription.recv() => {
                let Ok(event) = event else {
                    break;
                };
                tracing::debug!("{event:?}");
                if !matches!(event, SyncEvent::CatalogReplaced) {
                    print_snapshot(engine)?;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    Ok(())
}

fn print_snapshot(engine: &Engine) -> anyhow::Result<()> {
    let snapshot = Snapshot {
        state: engine.state(),
        output: engine.current_output(),
        programme: engine.current_programme(),
    };
    println!("{}", serde_json::to_string(&snapshot)?);
    Ok(())
}

fn print_descriptor(descriptor: &ConnectionDescriptor) {
    println!("address: {descriptor}");
    println!("url:     {}", descriptor.base_url());
    if let Some(salt) = descriptor.security_salt {
        println!("salt:    {salt:#04x}");
    }
}

fn print_sources(engine: &Engine) {
    let current = engine.current_output().and_then(|output| output.source_id);
    for record in engine.source_catalog() {
        let marker = if current.as_ref() == Some(&record.id) { '*' } else { ' ' };
        let kind = if record.is_live { "live" } else { "browse" };
        println!("{marker} {:<24} {kind:<6} {}", record.id.to_wire(), record.label());
    }
}

fn print_window(window: &Window) {
    for (position, entry) in &window.entries {
        println!("{position:>5}  {:<24} {}", entry.content_id.to_wire(), entry.title);
    }
    if window.has_next() {
        println!("more: --offset {}", window.offset + window.count);
    }
}
