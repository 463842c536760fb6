use std::sync::Arc;
use std::time::Duration;

use tandem_common::{new_user_id, SessionNotice, TandemError};
use tandem_config::TandemConfig;
use tandem_session::queue::SlotState;
use tandem_session::{
    Capabilities, DefaultConnector, EntryRef, MemoryStore, NewEntry, QueueEntry, SessionCollaborators,
    SessionContext, Source, TrackMetadata,
};
use tracing::{debug, info};

use crate::cli::{Args, Command};

/// How long a host lingers after a queue change so reconciliation can run.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(15);
const QUEUE_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn run(args: Args, config: TandemConfig) -> Result<(), TandemError> {
    let source: Source = config
        .player
        .source
        .parse()
        .map_err(TandemError::Other)?;
    let store = MemoryStore::new(args.user_id.clone().unwrap_or_else(new_user_id), args.host)
        .with_tokens(
            std::env::var("TANDEM_ACCESS_TOKEN").ok(),
            std::env::var("TANDEM_REFRESH_TOKEN").ok(),
        );

    let collaborators = SessionCollaborators {
        store: Arc::new(store),
        connector: Arc::new(DefaultConnector::default()),
        player: None,
        capabilities: Capabilities::only(source),
        peers: None,
    };
    let ctx = SessionContext::join(&config, &args.session, collaborators).await?;
    info!(session_id = %args.session, user_id = %ctx.me().user_id, "Joined");

    let result = match args.command {
        Command::Watch => watch(&ctx).await,
        Command::Add {
            source,
            uri,
            title,
            artist,
        } => add(&ctx, &source, uri, title, artist).await,
        Command::Remove { entry_id } => remove(&ctx, entry_id).await,
        Command::Queue => print_queue(&ctx).await,
    };

    ctx.leave().await?;
    result
}

fn print_entries(entries: &[QueueEntry]) {
    if entries.is_empty() {
        println!("(queue is empty)");
        return;
    }
    for (i, entry) in entries.iter().enumerate() {
        println!(
            "{:>3}. [{}] {} - {}  ({} {})",
            i + 1,
            entry.id,
            entry.metadata.artist,
            entry.metadata.title,
            entry.source,
            entry.uri
        );
    }
}

async fn watch(ctx: &SessionContext) -> Result<(), TandemError> {
    let mut roster = ctx.on_roster_update();
    let mut queue = ctx.queue().on_queue_change();
    let mut notices = ctx.notices();
    println!("Watching session {} as {}. Ctrl-C to leave.", ctx.session().id, ctx.role());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received, leaving");
                return Ok(());
            }
            changed = roster.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                let r = roster.borrow_and_update().clone();
                println!(
                    "roster: host={} guests=[{}]",
                    r.host_id().unwrap_or("?"),
                    r.guest_ids().join(", ")
                );
            }
            changed = queue.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                let entries = queue.borrow_and_update().clone();
                println!("queue:");
                print_entries(&entries);
            }
            notice = notices.recv() => {
                match notice {
                    Ok(SessionNotice::Transient(msg)) => println!("notice: {msg}"),
                    Ok(SessionNotice::Terminal(reason)) => {
                        return Err(TandemError::Other(format!("session lost: {reason}")));
                    }
                    Ok(SessionNotice::ReloadRequired) => {
                        return Err(TandemError::Other(
                            "player credentials expired; sign in again".into(),
                        ));
                    }
                    Err(e) => debug!(error = %e, "Notice stream lagged"),
                }
            }
        }
    }
}

/// On the host, wait until the reconciliation triggered by our change has run.
async fn settle(ctx: &SessionContext) {
    if ctx.player().is_none() {
        return;
    }
    let waited = tokio::time::timeout(SETTLE_TIMEOUT, async {
        loop {
            let idle = ctx.queue().reconcile_state() == SlotState::Idle;
            if idle && ctx.queue().passes_started() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    })
    .await;
    if waited.is_err() {
        info!("Leaving before reconciliation finished");
    }
}

async fn add(
    ctx: &SessionContext,
    source: &str,
    uri: String,
    title: String,
    artist: String,
) -> Result<(), TandemError> {
    let source: Source = source.parse().map_err(TandemError::Other)?;
    let entry = ctx
        .queue()
        .add_to_queue(NewEntry::new(source, uri, TrackMetadata::new(title, artist)))
        .await?;
    println!("added [{}] {}", entry.id, entry.uri);
    settle(ctx).await;
    Ok(())
}

async fn remove(ctx: &SessionContext, entry_id: String) -> Result<(), TandemError> {
    wait_for_queue(ctx).await;
    let removed = ctx.queue().remove_from_queue(EntryRef::id(entry_id)).await?;
    println!("removed [{}] {}", removed.id, removed.uri);
    settle(ctx).await;
    Ok(())
}

async fn print_queue(ctx: &SessionContext) -> Result<(), TandemError> {
    wait_for_queue(ctx).await;
    print_entries(&ctx.queue().get_queue().await);
    Ok(())
}

/// The server answers the join-time `get-queue` with a snapshot.
async fn wait_for_queue(ctx: &SessionContext) {
    let mut changes = ctx.queue().on_queue_change();
    if tokio::time::timeout(QUEUE_FETCH_TIMEOUT, changes.changed())
        .await
        .is_err()
    {
        debug!("No queue snapshot received, using local view");
    }
}
