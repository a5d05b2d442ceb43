use crate::orchestrator::{Handle, Notification};
use crate::tracker::Tracker;
use crate::*;
use askama::Template;
use std::{convert::Infallible, net::SocketAddr};
use tokio::{
    select,
    sync::{
        broadcast::{self, error::RecvError},
        mpsc,
    },
};
use tokio_stream::{wrappers::BroadcastStream, Stream, StreamExt};
use warp::{http::StatusCode, sse::Event, Filter};

#[derive(Template)]
#[template(path = "root.html")]
struct Root {}

pub async fn server(handle: Handle, update_rx: broadcast::Receiver<Notification>, port: u16) {
    let (board_tx, _) = broadcast::channel::<String>(32);
    info!("Starting web server on port {port}");
    let (kick_tx, kick_rx) = mpsc::channel(1);
    tokio::task::spawn(statemonitor(
        handle.clone(),
        update_rx,
        board_tx.clone(),
        kick_rx,
    ));
    let root_route = warp::path::end().and(warp::get()).and_then(root);
    let sse_route = warp::path("sse")
        .and(warp::get())
        .map(move || board_tx.subscribe())
        .map(|rx| warp::sse::reply(warp::sse::keep_alive().stream(board_events(rx))));
    let sse_kick = warp::path("sse")
        .and(warp::post())
        .map(move || kick_tx.clone())
        .and_then(kick);
    let jobs_route = warp::path("jobs")
        .and(warp::get())
        .map(move || handle.clone())
        .and_then(jobs);
    let routes = root_route.or(sse_kick).or(sse_route).or(jobs_route);
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    warp::serve(routes).run(addr).await;
}

async fn resync(handle: &Handle, tracker: &mut Tracker) {
    match handle.get_all_jobs().await {
        Ok(jobs) => *tracker = Tracker::new(jobs),
        Err(e) => warn!("Could not load jobs for the board: {e}"),
    }
}

/// Keeps the job board in a dedicated task and pushes a freshly rendered copy
/// to every SSE client after each change
async fn statemonitor(
    handle: Handle,
    mut update_rx: broadcast::Receiver<Notification>,
    chan: broadcast::Sender<String>,
    mut kick_chan: mpsc::Receiver<()>,
) {
    debug!("statemonitor started");
    let mut tracker = Tracker::default();
    resync(&handle, &mut tracker).await;
    loop {
        select! {
            msg = update_rx.recv() => match msg {
                Ok(note) => tracker.update(note),
                Err(RecvError::Lagged(n)) => {
                    warn!("Board missed {n} updates, reloading");
                    resync(&handle, &mut tracker).await;
                }
                Err(RecvError::Closed) => break,
            },
            Some(()) = kick_chan.recv() => {},
            else => break,
        }
        match tracker.board().render() {
            Ok(html) => {
                // no connected clients is fine
                _ = chan.send(html);
            }
            Err(e) => error!("Could not construct HTML update: {e}"),
        }
    }
    debug!("statemonitor finished");
}

/// Initiates resending the latest board to all connected clients
async fn kick(kick_chan: mpsc::Sender<()>) -> Result<impl warp::Reply, Infallible> {
    // a kick already waiting covers this one
    _ = kick_chan.try_send(());
    Ok(warp::reply::with_status(warp::reply(), StatusCode::OK))
}

async fn root() -> Result<impl warp::Reply, Infallible> {
    let reply = match (Root {}).render() {
        Ok(html) => warp::reply::with_status(warp::reply::html(html), StatusCode::OK),
        Err(e) => {
            error!("Could not render root page: {e}");
            warp::reply::with_status(warp::reply::html(String::new()), StatusCode::INTERNAL_SERVER_ERROR)
        }
    };
    Ok(reply)
}

async fn jobs(handle: Handle) -> Result<impl warp::Reply, Infallible> {
    let reply = match handle.get_all_jobs().await {
        Ok(jobs) => warp::reply::with_status(warp::reply::json(&jobs), StatusCode::OK),
        Err(e) => warp::reply::with_status(
            warp::reply::json(&serde_json::json!({ "error": e.to_string() })),
            StatusCode::SERVICE_UNAVAILABLE,
        ),
    };
    Ok(reply)
}

fn board_events(chan: broadcast::Receiver<String>) -> impl Stream<Item = Result<Event, Infallible>> {
    // a lagging client just waits for the next board
    BroadcastStream::new(chan).filter_map(|item| item.ok().map(|html| Ok(Event::default().data(html))))
}
