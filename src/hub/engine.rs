use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Notify, Semaphore, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::channel::{ChannelRegistry, HandlerTable, LaoCreateHandler, MessageHandler, WitnessHandler};
use crate::config::{HubSettings, Settings};
use crate::hub::handlers;
use crate::hub::processor::MessageProcessor;
use crate::message::ServerKeys;
use crate::persistence::Repository;
use crate::query::QueryTracker;
use crate::rumor::{RumorBuffer, RumorEngine};
use crate::socket::{PeerDirectory, Socket, SocketSet};
use crate::transport::message::{
    GreetServerParams, METHOD_GREET_SERVER, METHOD_HEARTBEAT, METHOD_RUMOR_STATE,
    RumorStateParams, encode_query,
};
use crate::utils::{HubError, HubResult};

/// A raw frame waiting for dispatch.
#[derive(Debug)]
pub struct Inbound {
    pub socket: Socket,
    pub raw: String,
}

/// Everything a worker needs to handle a frame.
pub struct HubState {
    pub settings: HubSettings,
    pub repo: Arc<dyn Repository>,
    pub keys: ServerKeys,
    /// How this server introduces itself to peers.
    pub greeting: GreetServerParams,
    pub channels: Arc<ChannelRegistry>,
    pub sockets: Arc<SocketSet>,
    pub peers: Arc<PeerDirectory>,
    pub queries: Arc<QueryTracker>,
    pub processor: Arc<dyn MessageHandler>,
    pub rumors: RumorEngine,
    /// Wakes the rumor sender before its next tick.
    pub rumor_ready: Notify,
}

impl HubState {
    /// Take the pending own rumor, if any, and start its propagation.
    pub fn send_own_rumor(&self) -> HubResult<()> {
        let Some(params) = self
            .repo
            .get_and_increment_my_rumor(&self.keys.public_key())?
        else {
            return Ok(());
        };
        info!(rumor_id = params.rumor_id, "sending own rumor");
        self.rumors.propagate(None, &params)
    }

    /// Ask every peer which rumors we are missing.
    pub fn send_rumor_state(&self) -> HubResult<()> {
        let params = RumorStateParams {
            state: self.repo.get_rumor_state()?,
        };
        for peer in self.sockets.peers() {
            self.ask_rumor_state(&peer, &params)?;
        }
        Ok(())
    }

    /// Send one `rumor_state` query, tracked before it leaves.
    pub fn ask_rumor_state(&self, peer: &Socket, params: &RumorStateParams) -> HubResult<()> {
        let id = self.queries.next_id();
        let text = encode_query(METHOD_RUMOR_STATE, params, Some(id))?;
        self.queries.add_rumor_state(id);
        if !peer.send(text) {
            self.queries.take(id);
        }
        Ok(())
    }

    /// Tell every peer which messages we hold.
    pub fn send_heartbeat(&self) -> HubResult<()> {
        let params = self.repo.get_params_heartbeat()?;
        if params.is_empty() {
            return Ok(());
        }
        let text = encode_query(METHOD_HEARTBEAT, &params, None)?;
        self.sockets.send_to_all_peers(&text);
        Ok(())
    }

    pub fn send_greeting(&self, socket: &Socket) -> HubResult<()> {
        let text = encode_query(METHOD_GREET_SERVER, &self.greeting, None)?;
        socket.send(text);
        Ok(())
    }

    /// Drop queries nobody answered in time.
    pub fn sweep_queries(&self) {
        let timeout = Duration::from_millis(self.settings.query_timeout_ms);
        for id in self.queries.sweep_expired(timeout) {
            warn!(query = id, "query timed out");
        }
    }
}

/// Reject settings the hub cannot run with.
fn validate(settings: &HubSettings) -> HubResult<()> {
    if settings.workers == 0 {
        return Err(HubError::Internal("hub.workers must be at least 1".into()));
    }
    for (name, period) in [
        ("hub.rumor_delay_ms", settings.rumor_delay_ms),
        ("hub.rumor_state_delay_ms", settings.rumor_state_delay_ms),
        ("hub.heartbeat_delay_ms", settings.heartbeat_delay_ms),
    ] {
        if period == 0 {
            return Err(HubError::Internal(format!("{name} must be at least 1")));
        }
    }
    Ok(())
}

/// The message-routing hub.
///
/// Frames from every connection go through one bounded queue into a single
/// dispatch loop, which hands each frame to a worker once a slot of the
/// worker pool is free.
pub struct Hub {
    state: Arc<HubState>,
    inbound_tx: mpsc::Sender<Inbound>,
    inbound_rx: Mutex<Option<mpsc::Receiver<Inbound>>>,
    closed_tx: mpsc::UnboundedSender<String>,
    closed_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    stop_tx: watch::Sender<bool>,
    workers: Arc<Semaphore>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Hub {
    pub fn new(settings: &Settings, repo: Arc<dyn Repository>) -> HubResult<Arc<Self>> {
        Self::build(settings, repo, None)
    }

    /// A hub whose messages all go through `processor`.
    #[cfg(test)]
    pub(crate) fn with_processor(
        settings: &Settings,
        repo: Arc<dyn Repository>,
        processor: Arc<dyn MessageHandler>,
    ) -> HubResult<Arc<Self>> {
        Self::build(settings, repo, Some(processor))
    }

    fn build(
        settings: &Settings,
        repo: Arc<dyn Repository>,
        processor: Option<Arc<dyn MessageHandler>>,
    ) -> HubResult<Arc<Self>> {
        let hub_settings = settings.hub.clone();
        validate(&hub_settings)?;

        let keys = repo.get_or_create_server_keys()?;
        let channels = Arc::new(ChannelRegistry::new(repo.clone()));
        channels.load()?;

        let sockets = Arc::new(SocketSet::new());
        let peers = Arc::new(PeerDirectory::new());
        let queries = Arc::new(QueryTracker::new());

        let lao_create = Arc::new(LaoCreateHandler::new(
            repo.clone(),
            channels.clone(),
            keys.clone(),
            peers.clone(),
            settings.server.owner_public_key.clone(),
            settings.server.client_address.clone(),
        ));
        let witness = Arc::new(WitnessHandler::new(repo.clone()));
        let handlers = HandlerTable::standard(channels.clone(), lao_create, witness);
        let processor: Arc<dyn MessageHandler> = match processor {
            Some(processor) => processor,
            None => Arc::new(MessageProcessor::new(channels.clone(), handlers, repo.clone())),
        };

        let rumors = RumorEngine::new(
            repo.clone(),
            processor.clone(),
            sockets.clone(),
            queries.clone(),
            RumorBuffer::new(Duration::from_millis(hub_settings.rumor_buffer_ttl_ms)),
            hub_settings.max_retry,
        );

        let greeting = GreetServerParams {
            public_key: keys.public_key(),
            client_address: settings.server.client_address.clone(),
            server_address: settings.server.server_address.clone(),
        };

        let (inbound_tx, inbound_rx) = mpsc::channel(hub_settings.inbound_capacity.max(1));
        let (closed_tx, closed_rx) = mpsc::unbounded_channel();
        let (stop_tx, _) = watch::channel(false);
        let workers = Arc::new(Semaphore::new(hub_settings.workers));

        info!(public_key = %greeting.public_key, "hub created");

        Ok(Arc::new(Self {
            state: Arc::new(HubState {
                settings: hub_settings,
                repo,
                keys,
                greeting,
                channels,
                sockets,
                peers,
                queries,
                processor,
                rumors,
                rumor_ready: Notify::new(),
            }),
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            closed_tx,
            closed_rx: Mutex::new(Some(closed_rx)),
            stop_tx,
            workers,
            tasks: Mutex::new(Vec::new()),
        }))
    }

    pub fn state(&self) -> &Arc<HubState> {
        &self.state
    }

    pub fn public_key(&self) -> String {
        self.state.keys.public_key()
    }

    /// Track a newly connected socket.
    pub fn register(&self, socket: Socket) {
        debug!(socket = %socket.id, kind = %socket.kind, "socket registered");
        self.state.sockets.upsert(socket);
    }

    /// Queue a raw frame. Waits while the queue is full.
    pub async fn receive(&self, socket: Socket, raw: String) -> HubResult<()> {
        self.inbound_tx
            .send(Inbound { socket, raw })
            .await
            .map_err(|_| HubError::Internal("hub is not accepting messages".into()))
    }

    /// Sender used by connections to report that they closed.
    pub fn closed_sender(&self) -> mpsc::UnboundedSender<String> {
        self.closed_tx.clone()
    }

    /// A stop signal receiver for tasks tied to the hub's lifetime.
    pub fn stop_signal(&self) -> watch::Receiver<bool> {
        self.stop_tx.subscribe()
    }

    /// Register a server connection, greet it and ask for its rumors.
    pub fn notify_new_server(&self, socket: Socket) -> HubResult<()> {
        self.register(socket.clone());
        self.state.send_greeting(&socket)?;

        let params = RumorStateParams {
            state: self.state.repo.get_rumor_state()?,
        };
        self.state.ask_rumor_state(&socket, &params)
    }

    /// Spawn the dispatch loop, the closed-socket loop and the periodic
    /// senders. Calling it twice is a no-op.
    pub fn start(self: &Arc<Self>) {
        let (Some(inbound_rx), Some(closed_rx)) =
            (self.inbound_rx.lock().take(), self.closed_rx.lock().take())
        else {
            warn!("hub already started");
            return;
        };

        let settings = &self.state.settings;
        let mut tasks = self.tasks.lock();
        tasks.push(tokio::spawn(self.clone().dispatch_loop(inbound_rx)));
        tasks.push(tokio::spawn(self.clone().closed_loop(closed_rx)));
        tasks.push(tokio::spawn(self.clone().rumor_sender(Duration::from_millis(
            settings.rumor_delay_ms,
        ))));
        tasks.push(tokio::spawn(self.clone().periodic(
            "rumor state",
            Duration::from_millis(settings.rumor_state_delay_ms),
            |state| {
                state.sweep_queries();
                state.send_rumor_state()
            },
        )));
        tasks.push(tokio::spawn(self.clone().periodic(
            "heartbeat",
            Duration::from_millis(settings.heartbeat_delay_ms),
            |state| state.send_heartbeat(),
        )));
        info!(workers = settings.workers, "hub started");
    }

    /// Stop dispatching, wait for the background tasks and for every worker
    /// to finish.
    pub async fn stop(&self) {
        let _ = self.stop_tx.send(true);

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                error!("hub task failed: {}", e);
            }
        }

        let workers = self.state.settings.workers as u32;
        match self.workers.acquire_many(workers).await {
            Ok(_all) => info!("hub stopped, all workers drained"),
            Err(e) => error!("failed to drain workers: {}", e),
        }
    }

    async fn dispatch_loop(self: Arc<Self>, mut inbound: mpsc::Receiver<Inbound>) {
        let mut stop = self.stop_signal();
        info!("starting dispatch loop");

        loop {
            let item = tokio::select! {
                _ = stop.changed() => break,
                item = inbound.recv() => match item {
                    Some(item) => item,
                    None => break,
                },
            };

            let permit = tokio::select! {
                _ = stop.changed() => break,
                permit = self.workers.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            // Handlers do blocking storage work, so they run off the runtime
            // threads. The permit is held until the handler returns or panics.
            let state = self.state.clone();
            tokio::spawn(async move {
                let _permit = permit;
                let socket_id = item.socket.id.clone();
                let work = tokio::task::spawn_blocking(move || {
                    std::panic::catch_unwind(AssertUnwindSafe(|| {
                        handlers::handle_incoming(&state, &item.socket, &item.raw)
                    }))
                });
                match work.await {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => {
                        error!(socket = %socket_id, "worker panicked while handling a frame")
                    }
                    Err(e) => error!(socket = %socket_id, "worker failed: {}", e),
                }
            });
        }

        info!("dispatch loop stopped");
    }

    async fn closed_loop(self: Arc<Self>, mut closed: mpsc::UnboundedReceiver<String>) {
        let mut stop = self.stop_signal();
        loop {
            tokio::select! {
                _ = stop.changed() => break,
                socket_id = closed.recv() => {
                    let Some(socket_id) = socket_id else { break };
                    let channels = self.state.channels.unsubscribe_from_all(&socket_id);
                    self.state.sockets.delete(&socket_id);
                    debug!(socket = %socket_id, channels, "socket closed");
                }
            }
        }
    }

    async fn rumor_sender(self: Arc<Self>, period: Duration) {
        let mut stop = self.stop_signal();
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = stop.changed() => break,
                _ = ticker.tick() => {}
                _ = self.state.rumor_ready.notified() => {
                    ticker.reset();
                }
            }
            if let Err(e) = self.state.send_own_rumor() {
                error!("failed to send rumor: {}", e);
            }
        }
        info!("rumor sender stopped");
    }

    async fn periodic<F>(self: Arc<Self>, name: &'static str, period: Duration, job: F)
    where
        F: Fn(&HubState) -> HubResult<()> + Send + 'static,
    {
        let mut stop = self.stop_signal();
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = stop.changed() => break,
                _ = ticker.tick() => {
                    if let Err(e) = job(self.state.as_ref()) {
                        error!(task = name, "periodic task failed: {}", e);
                    }
                }
            }
        }
        info!(task = name, "periodic task stopped");
    }
}
