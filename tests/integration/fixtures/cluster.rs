//! In-process clusters: one directory server plus log servers on loopback.

use std::sync::Arc;
use std::time::Duration;

use gdp::client::BackoffPolicy;
use gdp::{
    ClientConfig, GdpClient, Gin, InternalName, LogMetadata, LogServer, OpenMode, OpenOptions,
    ServerAddr, ServerConfig, ServerHandle, SigningKeyPair,
};

pub fn fast_client_config(router: ServerAddr) -> ClientConfig {
    let mut config = ClientConfig::new(router);
    config.backoff = BackoffPolicy {
        base: Duration::from_millis(5),
        max: Duration::from_millis(100),
        max_attempts: 4,
    };
    config.request_timeout = Duration::from_secs(10);
    config.close_timeout = Duration::from_secs(2);
    config
}

pub struct Cluster {
    /// `servers[0]` serves the directory; the rest are plain log servers.
    servers: Vec<ServerHandle>,
    router: ServerAddr,
}

impl Cluster {
    /// A directory server and `peers` additional log servers.
    pub fn start(peers: usize) -> Self {
        let directory = start_server("test.logd0", None);
        let router = directory.addr().clone();
        let mut servers = vec![directory];
        for i in 1..=peers {
            servers.push(start_server(&format!("test.logd{i}"), Some(router.clone())));
        }
        Self { servers, router }
    }

    pub fn router(&self) -> &ServerAddr {
        &self.router
    }

    pub fn server(&self, index: usize) -> &ServerHandle {
        &self.servers[index]
    }

    pub fn server_name(&self, index: usize) -> InternalName {
        *self.servers[index].name()
    }

    pub fn client(&self) -> GdpClient {
        GdpClient::new(fast_client_config(self.router.clone())).expect("client")
    }

    /// Create an unsigned log on server `index` under a fresh human name.
    pub fn create_log(&self, client: &GdpClient, index: usize, human: &str) -> InternalName {
        self.create_log_with(client, index, human, LogMetadata::for_new_log(Some(human), "test", None))
    }

    /// Create a log whose records must be signed by `writer`.
    pub fn create_signed_log(
        &self,
        client: &GdpClient,
        index: usize,
        human: &str,
        writer: &SigningKeyPair,
    ) -> InternalName {
        let metadata =
            LogMetadata::for_new_log(Some(human), "test", Some(&writer.public_key()));
        self.create_log_with(client, index, human, metadata)
    }

    fn create_log_with(
        &self,
        client: &GdpClient,
        index: usize,
        human: &str,
        metadata: LogMetadata,
    ) -> InternalName {
        let name = InternalName::from_human(human).expect("human name");
        client
            .create_log(&name, &metadata, &self.server_name(index), Some(human))
            .expect("create log");
        name
    }

    pub fn open(&self, client: &GdpClient, name: InternalName, mode: OpenMode) -> Gin {
        Gin::open(client, name, mode, OpenOptions::new()).expect("open log")
    }

    pub fn open_signed(
        &self,
        client: &GdpClient,
        name: InternalName,
        mode: OpenMode,
        signer: Arc<SigningKeyPair>,
    ) -> Gin {
        Gin::open(client, name, mode, OpenOptions::new().signer(signer)).expect("open log")
    }
}

impl Drop for Cluster {
    fn drop(&mut self) {
        while let Some(server) = self.servers.pop() {
            server.shutdown();
        }
    }
}

fn start_server(human: &str, router: Option<ServerAddr>) -> ServerHandle {
    let name = InternalName::from_human(human).expect("server name");
    let mut config = ServerConfig::new("127.0.0.1:0", name);
    config.human = Some(human.to_string());
    config.serve_directory = router.is_none();
    config.router = router.clone();
    if let Some(router) = router {
        config.client = Some(fast_client_config(router));
    }
    LogServer::new(config).start().expect("start server")
}

/// Unique human name per test so parallel tests never collide.
pub fn unique_human(prefix: &str) -> String {
    format!("test.{prefix}.{:016x}", rand::random::<u64>())
}
