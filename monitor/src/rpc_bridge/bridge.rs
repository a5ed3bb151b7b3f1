use crate::rpc_bridge::model::{
    CommandStatus, ConnectRequest, ContourQuery, RecordRequest, ReplayRequest, TextRequest,
};
use crate::workflow::manager::DataManager;
use anyhow::Context;
use rivercore::projection::TimeSeriesOptions;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{mpsc, Arc};
use std::thread;
use tokio::runtime::Builder;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

pub fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 4241))
}

fn with_manager(
    manager: Arc<DataManager>,
) -> impl Filter<Extract = (Arc<DataManager>,), Error = Infallible> + Clone {
    warp::any().map(move || Arc::clone(&manager))
}

/// Runs a command off the runtime thread; commands may sleep (break, bulk).
async fn run_command<F>(manager: Arc<DataManager>, command: F) -> Result<impl Reply, Infallible>
where
    F: FnOnce(&DataManager) -> anyhow::Result<()> + Send + 'static,
{
    let status = match tokio::task::spawn_blocking(move || command(&*manager)).await {
        Ok(Ok(())) => CommandStatus::success(),
        Ok(Err(err)) => {
            log::warn!("command failed: {:#}", err);
            CommandStatus::failure(format!("{:#}", err))
        }
        Err(err) => CommandStatus::failure(format!("command task failed: {}", err)),
    };
    Ok(warp::reply::json(&status))
}

async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (code, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "not found".to_string())
    } else if let Some(body) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, body.to_string())
    } else if let Some(query) = err.find::<warp::reject::InvalidQuery>() {
        (StatusCode::BAD_REQUEST, query.to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "method not allowed".to_string())
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, format!("{:?}", err))
    };
    Ok(warp::reply::with_status(
        warp::reply::json(&CommandStatus::failure(message)),
        code,
    ))
}

fn query_routes(
    manager: Arc<DataManager>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let tabular = warp::path!("tabular")
        .and(warp::get())
        .and(with_manager(manager.clone()))
        .map(|manager: Arc<DataManager>| warp::reply::json(&manager.tabular_data()));

    let amplitude = warp::path!("amplitude")
        .and(warp::get())
        .and(with_manager(manager.clone()))
        .map(|manager: Arc<DataManager>| warp::reply::json(&manager.amplitude_data()));

    let contour = warp::path!("contour")
        .and(warp::get())
        .and(warp::query::<ContourQuery>())
        .and(with_manager(manager.clone()))
        .map(|query: ContourQuery, manager: Arc<DataManager>| {
            warp::reply::json(&manager.contour_data(query.kind))
        });

    let shiptrack = warp::path!("shiptrack")
        .and(warp::get())
        .and(with_manager(manager.clone()))
        .map(|manager: Arc<DataManager>| warp::reply::json(&manager.shiptrack_data()));

    let timeseries = warp::path!("timeseries")
        .and(warp::get())
        .and(with_manager(manager.clone()))
        .map(|manager: Arc<DataManager>| warp::reply::json(&manager.timeseries_data()));

    let get_options = warp::path!("timeseries" / "options")
        .and(warp::get())
        .and(with_manager(manager.clone()))
        .map(|manager: Arc<DataManager>| warp::reply::json(&manager.timeseries_options()));

    let set_options = warp::path!("timeseries" / "options")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_manager(manager.clone()))
        .and_then(|options: TimeSeriesOptions, manager: Arc<DataManager>| {
            run_command(manager, move |manager| {
                manager.set_timeseries_options(options)
            })
        });

    let metrics = warp::path!("metrics")
        .and(warp::get())
        .and(with_manager(manager))
        .map(|manager: Arc<DataManager>| warp::reply::json(&manager.metrics()));

    tabular
        .or(amplitude)
        .or(contour)
        .or(shiptrack)
        .or(timeseries)
        .or(get_options)
        .or(set_options)
        .or(metrics)
}

fn pipeline_routes(
    manager: Arc<DataManager>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let replay = warp::path!("replay")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_manager(manager.clone()))
        .and_then(|request: ReplayRequest, manager: Arc<DataManager>| {
            run_command(manager, move |manager| {
                manager.replay(request.files).map(|_| ())
            })
        });

    let reset = warp::path!("reset")
        .and(warp::post())
        .and(with_manager(manager))
        .and_then(|manager: Arc<DataManager>| {
            run_command(manager, |manager| {
                manager.reset_all();
                Ok(())
            })
        });

    replay.or(reset)
}

fn terminal_routes(
    manager: Arc<DataManager>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let state = warp::path!("terminal")
        .and(warp::get())
        .and(with_manager(manager.clone()))
        .map(|manager: Arc<DataManager>| warp::reply::json(&manager.terminal_state()));

    let ports = warp::path!("terminal" / "ports")
        .and(warp::get())
        .and(with_manager(manager.clone()))
        .map(|manager: Arc<DataManager>| warp::reply::json(&manager.list_ports()));

    let bauds = warp::path!("terminal" / "bauds")
        .and(warp::get())
        .and(with_manager(manager.clone()))
        .map(|manager: Arc<DataManager>| warp::reply::json(&manager.list_baud_rates()));

    let connect = warp::path!("terminal" / "connect")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_manager(manager.clone()))
        .and_then(|request: ConnectRequest, manager: Arc<DataManager>| {
            run_command(manager, move |manager| {
                manager.connect(&request.port, request.baud)
            })
        });

    let disconnect = simple_command(&manager, "disconnect", DataManager::disconnect);
    let send_break = simple_command(&manager, "break", DataManager::send_break);
    let clear = simple_command(&manager, "clear", DataManager::clear_console);
    let recover = simple_command(&manager, "recover", DataManager::recover);
    let start = simple_command(&manager, "start", DataManager::start_pinging);
    let stop = simple_command(&manager, "stop", DataManager::stop_pinging);

    let command = warp::path!("terminal" / "command")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_manager(manager.clone()))
        .and_then(|request: TextRequest, manager: Arc<DataManager>| {
            run_command(manager, move |manager| manager.send_command(&request.text))
        });

    let bulk = warp::path!("terminal" / "bulk")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_manager(manager.clone()))
        .and_then(|request: TextRequest, manager: Arc<DataManager>| {
            run_command(manager, move |manager| manager.send_bulk(&request.text))
        });

    let record = warp::path!("terminal" / "record")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_manager(manager))
        .and_then(|request: RecordRequest, manager: Arc<DataManager>| {
            run_command(manager, move |manager| manager.set_recording(request.enabled))
        });

    state
        .or(ports)
        .or(bauds)
        .or(connect)
        .or(disconnect)
        .or(send_break)
        .or(clear)
        .or(recover)
        .or(start)
        .or(stop)
        .or(command)
        .or(bulk)
        .or(record)
}

/// `POST /terminal/<name>` with no body.
fn simple_command(
    manager: &Arc<DataManager>,
    name: &'static str,
    command: fn(&DataManager) -> anyhow::Result<()>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path("terminal")
        .and(warp::path(name))
        .and(warp::path::end())
        .and(warp::post())
        .and(with_manager(manager.clone()))
        .and_then(move |manager: Arc<DataManager>| run_command(manager, command))
}

/// Every route of the query surface, with JSON error replies.
pub fn routes(
    manager: Arc<DataManager>,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    query_routes(manager.clone())
        .or(pipeline_routes(manager.clone()))
        .or(terminal_routes(manager))
        .recover(handle_rejection)
}

/// Hosts the HTTP query surface on its own thread.
pub struct RpcBridge {
    address: SocketAddr,
}

impl RpcBridge {
    /// Binds `address` and serves until the process exits. Bind failures are
    /// reported here rather than on the server thread.
    pub fn spawn(manager: Arc<DataManager>, address: SocketAddr) -> anyhow::Result<Self> {
        let (bound_tx, bound_rx) = mpsc::channel();
        thread::Builder::new()
            .name("rpc-bridge".to_string())
            .spawn(move || {
                let runtime = match Builder::new_current_thread().enable_all().build() {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        let _ = bound_tx.send(Err(anyhow::Error::from(err)));
                        return;
                    }
                };
                runtime.block_on(async move {
                    match warp::serve(routes(manager)).try_bind_ephemeral(address) {
                        Ok((bound, server)) => {
                            let _ = bound_tx.send(Ok(bound));
                            server.await;
                        }
                        Err(err) => {
                            let _ = bound_tx.send(Err(anyhow::Error::from(err)));
                        }
                    }
                });
            })
            .context("spawning rpc bridge thread")?;

        let address = bound_rx
            .recv()
            .context("rpc bridge thread exited before binding")?
            .with_context(|| format!("binding rpc bridge to {}", address))?;
        log::info!("rpc bridge listening on http://{}", address);
        Ok(Self { address })
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }
}
