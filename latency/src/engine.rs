use crate::{
    bus::Bus,
    gateway::Gateway,
    ledger::Ledger,
    metrics::Metrics,
    report::Report,
    responder::wait_and_respond,
    roster::Roster,
    scheduler::{serials_fit, Role, Scheduler},
    sender::send_and_wait,
    wire, Config, Error, FINISH_POINT, START_POINT,
};
use commonware_runtime::{Clock, Handle, Metrics as RuntimeMetrics, Spawner};
use rand::Rng;
use tracing::{debug, error, info, warn};

/// Runs the latency test for a single peer.
pub struct Engine<E: Clock + Spawner + RuntimeMetrics + Rng, B: Bus> {
    context: E,
    cfg: Config,
    registry: Vec<String>,
    bus: B,
}

impl<E: Clock + Spawner + RuntimeMetrics + Rng, B: Bus> Engine<E, B> {
    /// Create a new engine.
    ///
    /// `registry` lists the names of every peer registered with the bus (including this one)
    /// and is the source of the turn order.
    pub fn new(context: E, cfg: Config, registry: Vec<String>, bus: B) -> Self {
        Self {
            context,
            cfg,
            registry,
            bus,
        }
    }

    /// Start the engine, returning a handle that resolves to the [Report] of this peer.
    pub fn start(self) -> Handle<Result<Report, Error>> {
        self.context.clone().spawn(|_| async move {
            let name = self.cfg.name.clone();
            let result = self.run().await;
            if let Err(err) = &result {
                error!(%name, ?err, "latency test failed");
            }
            result
        })
    }

    async fn run(mut self) -> Result<Report, Error> {
        if !wire::valid_name(&self.cfg.name) {
            return Err(Error::InvalidConfig(format!(
                "invalid peer name: {:?}",
                self.cfg.name
            )));
        }
        if u32::try_from(self.cfg.payload_size).is_err() {
            return Err(Error::InvalidConfig(format!(
                "payload too large: {}",
                self.cfg.payload_size
            )));
        }
        let metrics = Metrics::init(&self.context);

        // Derive the turn order from the registry
        let roster = Roster::build(&self.cfg.name, self.registry);
        info!(name = %self.cfg.name, order = %roster, "derived turn order");
        if !serials_fit(self.cfg.rounds, roster.len()) {
            return Err(Error::InvalidConfig(format!(
                "too many rounds for {} peers: {}",
                roster.len(),
                self.cfg.rounds
            )));
        }
        if roster.len() != self.cfg.peers.len() + 1 {
            warn!(
                configured = self.cfg.peers.len() + 1,
                registered = roster.len(),
                "configured peers disagree with the bus"
            );
            metrics.anomalies.inc();
        }

        let payload = wire::payload(&mut self.context, self.cfg.payload_size);
        let ledger = Ledger::new();
        let mut gateway = Gateway::new(
            self.context.clone(),
            self.bus,
            self.cfg.name.clone(),
            roster.clone(),
            ledger.clone(),
            self.cfg.payload_size,
            self.cfg.stall_timeout,
            metrics.clone(),
        );

        gateway.synchronize(START_POINT).await?;
        info!("started");

        let mut scheduler = Scheduler::new(&self.cfg.name, roster.clone());
        for round in 1..=self.cfg.rounds {
            scheduler.begin(round);
            let start = gateway.current_time();
            loop {
                let turn = scheduler.start_turn(gateway.current_time());
                debug!(
                    round,
                    time = turn.time,
                    sender = %turn.sender,
                    serial = turn.serial,
                    role = ?turn.role,
                    "turn started"
                );
                match turn.role {
                    Role::Send => send_and_wait(&mut gateway, &turn, &payload).await?,
                    Role::Respond => wait_and_respond(&mut gateway, &turn, &payload).await?,
                }
                if gateway.current_time() != turn.time + 1 {
                    warn!(
                        expected = turn.time + 1,
                        actual = gateway.current_time(),
                        "clock skipped a turn"
                    );
                    metrics.anomalies.inc();
                }
                if scheduler.end_turn(gateway.current_time()) {
                    break;
                }
            }
            metrics.rounds.inc();
            info!(round, start, end = gateway.current_time(), "round complete");
        }

        gateway.synchronize(FINISH_POINT).await?;
        let report = Report::new(
            self.cfg.name.clone(),
            roster,
            ledger,
            gateway.current_time(),
        );
        let summary = report.summary();
        info!(
            probes = summary.probes,
            complete = summary.complete,
            responses = summary.responses,
            latency = ?summary.latency,
            anomalies = metrics.anomalies.get(),
            "finished"
        );
        Ok(report)
    }
}
