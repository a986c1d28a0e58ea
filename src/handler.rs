use std::io;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::Arc;

use log::{debug, info, warn};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{mpsc, watch};

use crate::api::command::{self, Command, PeerSelector, RemoveTarget};
use crate::api::route_spec::RouteSpec;
use crate::api::{ApiServer, Event};
use crate::config::ServerConfig;
use crate::message::{Message, RouteRefresh};
use crate::rib::{EntrySource, RouteStore};
use crate::session::{Session, SessionManager, SessionUpdate};
use crate::storage;
use crate::utils::{format_time_as_elapsed, to_hex};

/// Exit code for signal-requested termination
pub const EXIT_SIGNAL: i32 = 2;

/// Run the daemon on a single-threaded cooperative reactor. Returns the
/// process exit code.
pub fn serve(
    addr: IpAddr,
    port: u16,
    config_path: String,
    config: ServerConfig,
) -> io::Result<i32> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(addr, port, config_path, config))
}

enum Tick {
    Update(Option<SessionUpdate>),
    Event(Event),
    Command(usize, String),
    Reload,
    Shutdown,
}

async fn run(
    addr: IpAddr,
    port: u16,
    config_path: String,
    config: ServerConfig,
) -> io::Result<i32> {
    let mut config = Arc::new(config);
    let listener = TcpListener::bind(SocketAddr::new(addr, port)).await?;
    info!("Starting BGP speaker on {}:{}", addr, port);

    let (config_tx, config_watch) = watch::channel(Arc::clone(&config));
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let mut manager = SessionManager::new(
        Arc::clone(&config),
        listener,
        config_watch,
        event_tx,
    );
    let mut api = ApiServer::bind(config.api_listen).await?;
    let mut store = RouteStore::new();
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sighup = signal(SignalKind::hangup())?;

    loop {
        let tick = tokio::select! {
            result = manager.get_update() => match result {
                Ok(update) => Tick::Update(update),
                Err(err) => {
                    warn!("Manager error: {}", err);
                    Tick::Update(None)
                }
            },
            event = event_rx.recv() => match event {
                Some(event) => Tick::Event(event),
                None => Tick::Update(None),
            },
            command = api.next_command() => Tick::Command(command.0, command.1),
            _ = tokio::signal::ctrl_c() => Tick::Shutdown,
            _ = sigterm.recv() => Tick::Shutdown,
            _ = sighup.recv() => Tick::Reload,
        };

        match tick {
            Tick::Update(Some(SessionUpdate::Up(peer))) => {
                seed_session(&manager, &store, peer).await;
            }
            Tick::Update(Some(SessionUpdate::Learned(peer, update))) => {
                debug!("Learned from {}: {}", peer, update);
            }
            Tick::Update(Some(SessionUpdate::Ended(peers))) => {
                for peer in peers {
                    info!("Session ended with {}", peer);
                }
            }
            Tick::Update(None) => (),
            Tick::Event(event) => api.broadcast(&event),
            Tick::Command(subscriber, line) => {
                let reply = dispatch(&mut manager, &mut store, &config, &line).await;
                api.reply(subscriber, reply);
            }
            Tick::Reload => {
                info!("SIGHUP received, reloading {}", config_path);
                match crate::config::from_file(&config_path) {
                    Ok(new_config) => {
                        let new_config = Arc::new(new_config);
                        let _ = config_tx.send(Arc::clone(&new_config));
                        reload_sessions(&manager, &store, &new_config).await;
                        config = new_config;
                    }
                    Err(err) => warn!("Reload failed, keeping old config: {}", err),
                }
            }
            Tick::Shutdown => {
                info!("Signal received, shutting down");
                let sessions = manager.sessions();
                let mut sessions = sessions.lock().await;
                for session in sessions.values_mut() {
                    let _ = session.admin_shutdown().await;
                }
                return Ok(EXIT_SIGNAL);
            }
        }
    }
}

/// Parse a peer's configured route lines; watchdog-gated specs are applied
/// directly, the rest are returned for a bulk replace
fn configured_routes(session: &mut Session, lines: &[String]) -> Vec<Arc<crate::rib::Route>> {
    let mut plain = Vec::with_capacity(lines.len());
    for line in lines {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match crate::api::route_spec::parse(&tokens) {
            Ok(spec) => {
                if spec.watchdog.is_some() {
                    apply_spec_to_session(session, &spec, false);
                } else {
                    plain.push(Arc::new(spec.route));
                }
            }
            Err(err) => warn!(
                "Bad configured route for {} ({}): {}",
                session.addr, line, err.reason
            ),
        }
    }
    plain
}

/// A freshly-established session syncs to its configured routes plus every
/// route the API has placed in the global store. `replace_restart` also
/// retracts whatever a graceful-restart-preserved RIB no longer wants.
async fn seed_session(manager: &SessionManager, store: &RouteStore, peer: IpAddr) {
    let sessions = manager.sessions();
    let mut sessions = sessions.lock().await;
    let session = match sessions.get_mut(&peer) {
        Some(session) => session,
        None => return,
    };
    let lines = session.config.static_routes.clone();
    let mut routes = configured_routes(session, &lines);
    for (_, route, _) in store.iter() {
        routes.push(Arc::clone(route));
    }
    if let Err(err) = session.rib_out.replace_restart(&routes) {
        warn!("Couldn't seed {}: {}", peer, err);
    }
}

/// After a config reload, only differences should reach the wire
async fn reload_sessions(
    manager: &SessionManager,
    store: &RouteStore,
    config: &Arc<ServerConfig>,
) {
    let sessions = manager.sessions();
    let mut sessions = sessions.lock().await;
    for session in sessions.values_mut() {
        let peer_config = config
            .peers
            .iter()
            .find(|p| p.remote_ip.contains(session.addr))
            .cloned();
        let lines = match peer_config {
            Some(peer_config) => peer_config.static_routes.clone(),
            // De-configured peers are torn down by the manager
            None => continue,
        };
        let mut routes = configured_routes(session, &lines);
        for (_, route, _) in store.iter() {
            routes.push(Arc::clone(route));
        }
        if let Err(err) = session.rib_out.replace_reload(&routes) {
            warn!("Couldn't reload routes for {}: {}", session.addr, err);
        }
    }
}

fn apply_spec_to_session(session: &mut Session, spec: &RouteSpec, withdraw: bool) {
    if withdraw {
        session.rib_out.del_from_rib(Arc::clone(&spec.route.nlri));
        return;
    }
    let result = match &spec.watchdog {
        Some(name) => session.rib_out.add_to_watchdog(
            name,
            Arc::new(spec.route.clone()),
            !spec.withdraw_hint,
        ),
        None => session.rib_out.add_to_rib(Arc::new(spec.route.clone())),
    };
    if let Err(err) = result {
        warn!("Rejected route {}: {}", spec.route, err);
    }
}

fn error_reply(reason: impl std::fmt::Display) -> String {
    json!({ "error": reason.to_string() }).to_string()
}

fn ok_reply() -> String {
    json!({ "result": "ok" }).to_string()
}

async fn dispatch(
    manager: &mut SessionManager,
    store: &mut RouteStore,
    config: &Arc<ServerConfig>,
    line: &str,
) -> String {
    let parsed = match command::parse(line) {
        Ok(parsed) => parsed,
        Err(err) => return error_reply(err.reason),
    };
    execute(manager, store, config, parsed).await
}

async fn execute(
    manager: &mut SessionManager,
    store: &mut RouteStore,
    config: &Arc<ServerConfig>,
    parsed: Command,
) -> String {
    match parsed {
        Command::Announce { peers, specs } => {
            route_command(manager, &peers, &specs, false).await
        }
        Command::Withdraw { peers, specs } => {
            route_command(manager, &peers, &specs, true).await
        }
        Command::Group { peers, commands } => {
            // Sub-commands enqueue into the same pending drain, so
            // cancelling pairs collapse into a single UPDATE on the wire
            for sub in commands {
                let reply = match sub {
                    Command::Announce { specs, .. } => {
                        route_command(manager, &peers, &specs, false).await
                    }
                    Command::Withdraw { specs, .. } => {
                        route_command(manager, &peers, &specs, true).await
                    }
                    _ => return error_reply("group only batches announce/withdraw"),
                };
                if reply.contains("error") {
                    return reply;
                }
            }
            ok_reply()
        }
        Command::AnnounceEor { peers, family } => {
            let sessions = manager.sessions();
            let mut sessions = sessions.lock().await;
            for session in sessions.values_mut() {
                if peers.matches(session.addr) {
                    if let Err(err) = session.send_eor(family).await {
                        return error_reply(err);
                    }
                }
            }
            ok_reply()
        }
        Command::AnnounceRefresh { peers, family } => {
            let sessions = manager.sessions();
            let mut sessions = sessions.lock().await;
            for session in sessions.values_mut() {
                if peers.matches(session.addr) {
                    let refresh = Message::RouteRefresh(RouteRefresh::new(family));
                    if let Err(err) = session.send_message(refresh).await {
                        return error_reply(err);
                    }
                }
            }
            ok_reply()
        }
        Command::RoutesList { family } => {
            let routes: Vec<serde_json::Value> = store
                .iter()
                .filter(|(_, route, _)| {
                    family.map_or(true, |family| route.family() == family)
                })
                .map(|(index, route, source)| {
                    json!({
                        "index": format!("0x{}", to_hex(index)),
                        "family": route.family().to_string(),
                        "route": route.to_string(),
                        "source": source.to_string(),
                    })
                })
                .collect();
            json!(routes).to_string()
        }
        Command::RoutesAdd { spec } => {
            let index = spec.route.index();
            let shared = store.acquire(spec.route.clone(), EntrySource::Api);
            {
                let sessions = manager.sessions();
                let mut sessions = sessions.lock().await;
                for session in sessions.values_mut() {
                    if let Err(err) = session.rib_out.add_to_rib(Arc::clone(&shared)) {
                        warn!("Route not queued for {}: {}", session.addr, err);
                    }
                }
            }
            dump(config, store).await;
            json!({
                "index": format!("0x{}", to_hex(&index)),
                "route": shared.to_string(),
                "success": true,
            })
            .to_string()
        }
        Command::RoutesRemove { target } => {
            let index = match target {
                RemoveTarget::Index(index) => index,
                RemoveTarget::Spec(spec) => spec.route.index(),
            };
            let route = match store.get(&index) {
                Some(route) => route,
                None => return error_reply("no such route"),
            };
            store.release(&index);
            {
                let sessions = manager.sessions();
                let mut sessions = sessions.lock().await;
                for session in sessions.values_mut() {
                    session.rib_out.del_from_rib(Arc::clone(&route.nlri));
                }
            }
            dump(config, store).await;
            json!({
                "index": format!("0x{}", to_hex(&index)),
                "success": true,
            })
            .to_string()
        }
        Command::ShowNeighbor { addr, extensive } => {
            show_neighbors(manager, addr, extensive).await
        }
        Command::Teardown { peers, subcode } => {
            let sessions = manager.sessions();
            let mut sessions = sessions.lock().await;
            let targets: Vec<IpAddr> = sessions
                .keys()
                .copied()
                .filter(|addr| peers.matches(*addr))
                .collect();
            for addr in targets {
                if let Some(mut session) = sessions.remove(&addr) {
                    let _ = session.teardown(subcode).await;
                    manager.reschedule(session.config.clone());
                }
            }
            ok_reply()
        }
    }
}

async fn route_command(
    manager: &SessionManager,
    peers: &PeerSelector,
    specs: &[RouteSpec],
    withdraw: bool,
) -> String {
    let sessions = manager.sessions();
    let mut sessions = sessions.lock().await;
    let mut applied = 0usize;
    for session in sessions.values_mut() {
        if !peers.matches(session.addr) {
            continue;
        }
        for spec in specs {
            apply_spec_to_session(session, spec, withdraw || spec.withdraw_hint);
        }
        applied += 1;
    }
    if applied == 0 {
        return error_reply("no matching peers");
    }
    ok_reply()
}

async fn show_neighbors(
    manager: &SessionManager,
    addr: Option<IpAddr>,
    extensive: bool,
) -> String {
    let mut rendered: Vec<serde_json::Value> = Vec::new();
    let sessions = manager.sessions();
    let sessions = sessions.lock().await;
    for (peer, session) in sessions.iter() {
        if let Some(filter) = addr {
            if *peer != filter {
                continue;
            }
        }
        let mut summary = json!({
            "peer": peer.to_string(),
            "state": session.state.to_string().to_lowercase(),
            "router_id": session.router_id.to_string(),
            "remote_as": session.config.remote_as,
            "local_as": session.config.local_as,
            "uptime": format_time_as_elapsed(session.connect_time),
            "msg_received": session.counts.received(),
            "msg_sent": session.counts.sent(),
            "prefixes_received": session.counts.prefixes_received(),
        });
        if extensive {
            let negotiated = session.negotiated();
            summary["hold_time"] = json!(negotiated.hold_time);
            summary["keepalive"] = json!(negotiated.keepalive);
            summary["asn4"] = json!(negotiated.asn4);
            summary["route_refresh"] = json!(negotiated.route_refresh);
            summary["families"] = json!(negotiated
                .families
                .iter()
                .map(|f| f.to_string())
                .collect::<Vec<_>>());
            summary["advertised"] = json!(session.rib_out.seen_count());
            summary["description"] = json!(session.config.description);
        }
        rendered.push(summary);
    }
    // Configured-but-idle peers still show up
    for config in manager.get_peer_configs() {
        let shown = sessions
            .keys()
            .any(|active| config.remote_ip.contains(*active));
        if shown {
            continue;
        }
        if let Some(filter) = addr {
            if !config.remote_ip.contains(filter) {
                continue;
            }
        }
        rendered.push(json!({
            "peer": config.remote_ip.to_string(),
            "state": "idle",
            "remote_as": config.remote_as,
            "local_as": config.local_as,
        }));
    }
    json!(rendered).to_string()
}

async fn dump(config: &Arc<ServerConfig>, store: &RouteStore) {
    if let Some(path) = &config.dump_path {
        if let Err(err) = storage::dump_routes(Path::new(path), store).await {
            warn!("Route dump failed: {}", err);
        }
    }
}
