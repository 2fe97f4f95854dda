//! Gateway assembly.
//!
//! Builds the shared registries from configuration, wires them into the
//! stage pipeline and starts listeners and background tasks.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::cache::{CacheStage, ResponseCache};
use crate::config::GuardianConfig;
use crate::error::GuardianError;
use crate::health::HealthProber;
use crate::http::HttpServer;
use crate::lifecycle::Shutdown;
use crate::observability::{TrafficRecorder, TrafficStage};
use crate::pipeline::Pipeline;
use crate::proxy::ProxyStage;
use crate::resilience::{CircuitBreakerStage, CircuitBreakers};
use crate::routing::Router;
use crate::security::{
    BanList, BanStage, BotStage, RateLimitStage, RateLimiter, SecurityHeadersStage, Waf, WafStage,
};
use crate::storage::{MemoryStore, SharedStore};
use crate::supervisor::{ResourceSampler, ServiceManager};

/// Upper bound on draining in-flight requests at shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Every long-lived component of the gateway.
pub struct Gateway {
    config: GuardianConfig,
    store: Arc<MemoryStore>,
    router: Router,
    pipeline: Pipeline,
    services: Option<ServiceManager>,
    bans: Arc<BanList>,
    breakers: Arc<CircuitBreakers>,
    cache: Arc<ResponseCache>,
    limiter: Arc<RateLimiter>,
    waf: Arc<Waf>,
    traffic: Arc<TrafficRecorder>,
    shutdown: Shutdown,
}

impl Gateway {
    pub fn build(config: GuardianConfig) -> Result<Self, GuardianError> {
        let store = Arc::new(match &config.storage.path {
            Some(path) => MemoryStore::load_from_file(path)?,
            None => MemoryStore::new(None),
        });
        let shared: SharedStore = store.clone();

        let router = Router::from_config(&config);
        let services = config
            .supervisor
            .enabled
            .then(|| ServiceManager::new(&config.services, config.supervisor.clone(), shared.clone()));

        let bans = Arc::new(BanList::load(shared.clone()));
        let breakers = Arc::new(CircuitBreakers::new(&config.circuit_breaker));
        let cache = Arc::new(ResponseCache::new(&config.cache));
        let limiter = Arc::new(RateLimiter::new(&config.rate_limit));
        let waf = Arc::new(Waf::with_builtin_rules(&config.waf.disabled_rules)?);
        let traffic = Arc::new(TrafficRecorder::new(shared.clone(), &config.observability));

        let pipeline = Pipeline::builder()
            .stage_if(
                config.observability.traffic_accounting,
                TrafficStage::new(traffic.clone()),
            )
            .stage_if(
                config.security.enable_headers,
                SecurityHeadersStage::new(&config.security),
            )
            .stage_if(config.security.enforce_bans, BanStage::new(bans.clone()))
            .stage_if(config.rate_limit.enabled, RateLimitStage::new(limiter.clone()))
            .stage_if(config.bot.enabled, BotStage::new(bans.clone(), &config.bot))
            .stage_if(
                config.waf.enabled,
                WafStage::new(waf.clone(), config.waf.clone(), shared.clone()),
            )
            .stage_if(config.cache.enabled, CacheStage::new(cache.clone()))
            .stage_if(
                config.circuit_breaker.enabled,
                CircuitBreakerStage::new(breakers.clone(), services.clone()),
            )
            .stage(ProxyStage::new(&config.proxy, services.clone()))
            .build();

        tracing::info!(stages = ?pipeline.stage_names(), "Pipeline assembled");

        Ok(Self {
            config,
            store,
            router,
            pipeline,
            services,
            bans,
            breakers,
            cache,
            limiter,
            waf,
            traffic,
            shutdown: Shutdown::new(),
        })
    }

    pub fn config(&self) -> &GuardianConfig {
        &self.config
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn store(&self) -> SharedStore {
        self.store.clone()
    }

    /// `None` when supervision is disabled.
    pub fn services(&self) -> Option<&ServiceManager> {
        self.services.as_ref()
    }

    pub fn bans(&self) -> &Arc<BanList> {
        &self.bans
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakers> {
        &self.breakers
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn waf(&self) -> &Arc<Waf> {
        &self.waf
    }

    pub fn traffic(&self) -> &Arc<TrafficRecorder> {
        &self.traffic
    }

    /// Bind every listener, start supervised services and timers, then serve.
    ///
    /// Listeners are bound before anything is spawned so a port conflict
    /// aborts startup cleanly.
    pub async fn start(self) -> Result<RunningGateway, GuardianError> {
        let mut bound = Vec::with_capacity(self.config.listeners.len());
        for listener in &self.config.listeners {
            let routes = self
                .router
                .listener(&listener.name)
                .cloned()
                .ok_or_else(|| GuardianError::UnroutableListener(listener.name.clone()))?;
            let tcp = TcpListener::bind(&listener.bind_address)
                .await
                .map_err(|source| GuardianError::Bind {
                    name: listener.name.clone(),
                    address: listener.bind_address.clone(),
                    source,
                })?;
            let addr = tcp.local_addr()?;
            bound.push((routes, tcp, addr));
        }

        let mut tasks = Vec::new();
        if self.config.storage.path.is_some() {
            let interval = Duration::from_secs(self.config.storage.flush_interval_secs.max(1));
            tasks.push(tokio::spawn(
                self.store.clone().run_flusher(interval, self.shutdown.subscribe()),
            ));
        }

        if let Some(services) = &self.services {
            if self.config.supervisor.autostart {
                services.start_all();
            }
            let sampler = ResourceSampler::new(services.clone(), self.store(), &self.config.supervisor);
            tasks.push(tokio::spawn(sampler.run(self.shutdown.subscribe())));

            let prober = HealthProber::new(
                services.clone(),
                self.config.health_check.clone(),
                &self.config.proxy,
            );
            tasks.push(tokio::spawn(prober.run(self.shutdown.subscribe())));
        }

        let mut addrs = HashMap::new();
        let mut servers = Vec::new();
        for (routes, tcp, addr) in bound {
            let name = routes.name.clone();
            let server = HttpServer::new(routes, self.pipeline.clone(), addr.port(), &self.config.security);
            let shutdown = self.shutdown.subscribe();
            let listener_name = name.clone();
            servers.push(tokio::spawn(async move {
                if let Err(e) = server.run(tcp, shutdown).await {
                    tracing::error!(listener = %listener_name, error = %e, "HTTP server failed");
                }
            }));
            addrs.insert(name, addr);
        }

        Ok(RunningGateway {
            gateway: self,
            addrs,
            servers,
            tasks,
        })
    }
}

/// A started gateway. Dropping it leaves tasks running; call `shutdown`.
pub struct RunningGateway {
    gateway: Gateway,
    addrs: HashMap<String, SocketAddr>,
    servers: Vec<JoinHandle<()>>,
    tasks: Vec<JoinHandle<()>>,
}

impl RunningGateway {
    /// Bound address of a listener, by name.
    pub fn addr(&self, listener: &str) -> Option<SocketAddr> {
        self.addrs.get(listener).copied()
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    /// Stop accepting, drain, stop services, flush storage.
    pub async fn shutdown(self) {
        tracing::info!("Gateway shutting down");
        self.gateway.shutdown.trigger();

        for server in self.servers {
            if tokio::time::timeout(DRAIN_TIMEOUT, server).await.is_err() {
                tracing::warn!(timeout = ?DRAIN_TIMEOUT, "Listener did not drain in time");
            }
        }
        if let Some(services) = &self.gateway.services {
            services.stop_all().await;
        }
        for task in self.tasks {
            let _ = task.await;
        }
        tracing::info!("Gateway stopped");
    }
}
