use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use tracing::{debug, error, info, warn};
use twosafe_command::CommandRegistry;
use twosafe_transport::{Endpoint, IpcStream};

use crate::config::ServerConfig;
use crate::connection::{handle_connection, ConnectionOutcome};
use crate::error::{Result, ServerError};

struct Worker {
    id: u64,
    handle: JoinHandle<ConnectionOutcome>,
    // Second handle on the connection, used to cut off a stalled read.
    stream: Option<IpcStream>,
}

/// Owns the endpoint and the accept loop.
///
/// Each accepted connection runs on its own worker thread so a slow command
/// never stalls the next accept. Commands writing the same artifact are
/// serialized by the registry's path locks.
pub struct CommandServer {
    endpoint: Endpoint,
    registry: Arc<CommandRegistry>,
    config: ServerConfig,
    workers: Vec<Worker>,
    next_connection_id: u64,
}

impl CommandServer {
    /// Bind the endpoint at `path`, recovering a stale socket file once.
    ///
    /// Any error here is fatal for the process: the server never runs
    /// without a bound endpoint.
    pub fn start(
        path: impl AsRef<Path>,
        registry: Arc<CommandRegistry>,
        config: ServerConfig,
    ) -> Result<Self> {
        let endpoint = Endpoint::bind_recovering(path)?;
        endpoint.set_nonblocking(true)?;
        info!(
            path = ?endpoint.path(),
            recovered_stale = endpoint.recovered_stale(),
            verbs = ?registry.verbs(),
            "command server started"
        );
        Ok(Self {
            endpoint,
            registry,
            config,
            workers: Vec::new(),
            next_connection_id: 1,
        })
    }

    /// Bound endpoint path.
    pub fn path(&self) -> &Path {
        self.endpoint.path()
    }

    /// Whether start had to remove a stale socket file.
    pub fn recovered_stale(&self) -> bool {
        self.endpoint.recovered_stale()
    }

    /// Number of connection workers not yet reaped.
    pub fn active_connections(&self) -> usize {
        self.workers.len()
    }

    /// Accept at most one pending connection and hand it to a worker.
    ///
    /// Returns `Ok(true)` if a connection was accepted.
    pub fn poll_once(&mut self) -> Result<bool> {
        self.reap_finished();
        match self.endpoint.try_accept()? {
            Some(stream) => {
                self.spawn_worker(stream)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Accept connections until `running` is cleared.
    ///
    /// Accept and spawn failures are logged and the loop keeps going.
    pub fn run_until(&mut self, running: &AtomicBool) {
        while running.load(Ordering::SeqCst) {
            match self.poll_once() {
                Ok(true) => continue,
                Ok(false) => {}
                Err(err) => warn!(error = %err, "accept loop error"),
            }
            thread::sleep(self.config.poll_interval);
        }
        debug!("accept loop stopped");
    }

    /// Stop accepting, remove the socket file, then drain in-flight
    /// connections.
    ///
    /// Workers get `shutdown_grace` to finish. Any still running after that
    /// have their read side shut down, so a caller that never sends cannot
    /// hold the process open; commands already executing run to completion.
    ///
    /// Returns `true` if the socket file was removed.
    pub fn shutdown(mut self) -> bool {
        let removed = self.endpoint.close();
        debug!(removed, "endpoint closed");

        let in_flight = self.workers.len();
        if in_flight > 0 {
            info!(in_flight, "waiting for in-flight connections");
        }
        let deadline = Instant::now() + self.config.shutdown_grace;
        loop {
            reap_finished(&mut self.workers);
            if self.workers.is_empty() || Instant::now() >= deadline {
                break;
            }
            thread::sleep(self.config.poll_interval);
        }

        for worker in std::mem::take(&mut self.workers) {
            if !worker.handle.is_finished() {
                if let Some(stream) = &worker.stream {
                    if let Err(err) = stream.shutdown_read() {
                        debug!(connection = worker.id, error = %err, "read shutdown failed");
                    }
                }
                warn!(connection = worker.id, "cutting off connection at shutdown");
            }
            join_worker(worker);
        }
        info!(removed, "command server stopped");
        removed
    }

    fn spawn_worker(&mut self, stream: IpcStream) -> Result<()> {
        let id = self.next_connection_id;
        self.next_connection_id += 1;

        let registry = Arc::clone(&self.registry);
        let config = self.config;
        let abort = match stream.try_clone() {
            Ok(clone) => Some(clone),
            Err(err) => {
                debug!(connection = id, error = %err, "no shutdown handle for connection");
                None
            }
        };
        let handle = thread::Builder::new()
            .name(format!("twosafe-conn-{id}"))
            .spawn(move || handle_connection(stream, &registry, &config))
            .map_err(ServerError::Spawn)?;

        debug!(connection = id, "connection handed to worker");
        self.workers.push(Worker {
            id,
            handle,
            stream: abort,
        });
        Ok(())
    }

    fn reap_finished(&mut self) {
        reap_finished(&mut self.workers);
    }
}

fn reap_finished(workers: &mut Vec<Worker>) {
    let (finished, running): (Vec<_>, Vec<_>) = std::mem::take(workers)
        .into_iter()
        .partition(|worker| worker.handle.is_finished());
    *workers = running;
    for worker in finished {
        join_worker(worker);
    }
}

fn join_worker(worker: Worker) {
    match worker.handle.join() {
        Ok(outcome) => debug!(connection = worker.id, ?outcome, "connection closed"),
        Err(_) => error!(connection = worker.id, "connection worker panicked"),
    }
}

/// Start a server, run it until `running` is cleared, then shut it down.
pub fn serve(
    path: impl AsRef<Path>,
    registry: Arc<CommandRegistry>,
    config: ServerConfig,
    running: &AtomicBool,
) -> Result<()> {
    let mut server = CommandServer::start(path, registry, config)?;
    server.run_until(running);
    server.shutdown();
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    use twosafe_command::{
        artifact_path, CommandHandler, CommandMessage, FnHandler, HashHandler, Outcome,
        HASH_VERB,
    };
    use twosafe_transport::TransportError;

    use super::*;

    fn unique_temp_dir(tag: &str) -> PathBuf {
        let dir = PathBuf::from(format!(
            "/tmp/twosafe-srv-{tag}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
        dir
    }

    fn fast_config() -> ServerConfig {
        ServerConfig {
            poll_interval: Duration::from_millis(5),
            ..ServerConfig::default()
        }
    }

    fn send(sock_path: &Path, payload: &[u8]) {
        let mut stream = Endpoint::connect(sock_path).expect("client should connect");
        stream.write_all(payload).expect("client write");
        stream.shutdown_write().expect("half close");
    }

    fn wait_for(path: &Path, timeout: Duration) -> bool {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if path.exists() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    fn spawn_server(
        server: CommandServer,
        running: Arc<AtomicBool>,
    ) -> thread::JoinHandle<bool> {
        thread::spawn(move || {
            let mut server = server;
            server.run_until(&running);
            server.shutdown()
        })
    }

    #[test]
    fn serves_hash_and_cleans_up_on_shutdown() {
        let dir = unique_temp_dir("hash");
        let sock_path = dir.join("2safe.sock");
        let source = dir.join("input.txt");
        std::fs::write(&source, b"hello world").unwrap();

        let server = CommandServer::start(
            &sock_path,
            Arc::new(CommandRegistry::with_builtins()),
            fast_config(),
        )
        .expect("server should start");
        assert!(!server.recovered_stale());

        let running = Arc::new(AtomicBool::new(true));
        let handle = spawn_server(server, Arc::clone(&running));

        let payload = CommandMessage::new(HASH_VERB, source.to_string_lossy())
            .encode()
            .unwrap();
        send(&sock_path, &payload);

        let artifact = artifact_path(&source);
        assert!(wait_for(&artifact, Duration::from_secs(5)));

        running.store(false, Ordering::SeqCst);
        let removed = handle.join().expect("server thread should finish");
        assert!(removed);
        assert!(!sock_path.exists());
        assert_eq!(
            std::fs::read(&artifact).unwrap(),
            b"5eb63bbbe01eeed093cb22bb8f5acdc3"
        );

        // Clean shutdown means the next start does not need recovery.
        let again = CommandServer::start(
            &sock_path,
            Arc::new(CommandRegistry::with_builtins()),
            fast_config(),
        )
        .expect("restart should bind");
        assert!(!again.recovered_stale());
        again.shutdown();

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn bad_connections_do_not_stop_the_server() {
        let dir = unique_temp_dir("bad");
        let sock_path = dir.join("2safe.sock");
        let source = dir.join("after.txt");
        std::fs::write(&source, b"abc").unwrap();

        let server = CommandServer::start(
            &sock_path,
            Arc::new(CommandRegistry::with_builtins()),
            fast_config(),
        )
        .unwrap();
        let running = Arc::new(AtomicBool::new(true));
        let handle = spawn_server(server, Arc::clone(&running));

        send(&sock_path, b"");
        send(&sock_path, b"not json");
        send(&sock_path, br#"{"verb":"unknown","path":"/tmp/x"}"#);
        send(&sock_path, br#"{"verb":"hash","path":"/nonexistent/file"}"#);
        send(
            &sock_path,
            &CommandMessage::new(HASH_VERB, source.to_string_lossy())
                .encode()
                .unwrap(),
        );

        assert!(wait_for(&artifact_path(&source), Duration::from_secs(5)));
        assert!(!Path::new("/nonexistent/file.md5.txt").exists());

        running.store(false, Ordering::SeqCst);
        assert!(handle.join().unwrap());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn silent_caller_does_not_block_shutdown() {
        let dir = unique_temp_dir("silent");
        let sock_path = dir.join("2safe.sock");

        let config = ServerConfig {
            shutdown_grace: Duration::from_millis(100),
            ..fast_config()
        };
        assert_eq!(config.read_timeout, None);
        let server =
            CommandServer::start(&sock_path, Arc::new(CommandRegistry::with_builtins()), config)
                .unwrap();
        let running = Arc::new(AtomicBool::new(true));
        let handle = spawn_server(server, Arc::clone(&running));

        // Connected, never writes, never closes.
        let _silent = Endpoint::connect(&sock_path).expect("client should connect");
        thread::sleep(Duration::from_millis(50));

        let stopped = Instant::now();
        running.store(false, Ordering::SeqCst);
        let (tx, rx) = std::sync::mpsc::channel();
        thread::spawn(move || {
            let _ = tx.send(handle.join());
        });
        let removed = rx
            .recv_timeout(Duration::from_secs(3))
            .expect("shutdown must not wait on a silent caller")
            .expect("server thread should finish");

        assert!(removed);
        assert!(!sock_path.exists());
        assert!(stopped.elapsed() < Duration::from_secs(3));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn shutdown_lets_running_command_finish() {
        let dir = unique_temp_dir("finish");
        let sock_path = dir.join("2safe.sock");
        let done = Arc::new(AtomicBool::new(false));
        let marker = Arc::clone(&done);

        let mut registry = CommandRegistry::new();
        registry.register(FnHandler::new("sleep", move |_msg: &CommandMessage| {
            thread::sleep(Duration::from_millis(150));
            marker.store(true, Ordering::SeqCst);
            Ok(Outcome::default())
        }));
        let config = ServerConfig {
            shutdown_grace: Duration::from_millis(10),
            ..fast_config()
        };
        let server = CommandServer::start(&sock_path, Arc::new(registry), config).unwrap();
        let running = Arc::new(AtomicBool::new(true));
        let handle = spawn_server(server, Arc::clone(&running));

        send(&sock_path, br#"{"verb":"sleep","path":"/tmp/slow"}"#);
        thread::sleep(Duration::from_millis(50));
        running.store(false, Ordering::SeqCst);

        assert!(handle.join().unwrap());
        assert!(done.load(Ordering::SeqCst), "in-flight command must complete");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn start_recovers_stale_socket() {
        let dir = unique_temp_dir("stale");
        let sock_path = dir.join("2safe.sock");
        drop(std::os::unix::net::UnixListener::bind(&sock_path).unwrap());
        assert!(sock_path.exists());

        let server = CommandServer::start(
            &sock_path,
            Arc::new(CommandRegistry::with_builtins()),
            fast_config(),
        )
        .expect("stale socket should be recovered");
        assert!(server.recovered_stale());
        assert!(server.shutdown());
        assert!(!sock_path.exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn second_instance_fails_while_first_is_live() {
        let dir = unique_temp_dir("live");
        let sock_path = dir.join("2safe.sock");

        let first = CommandServer::start(
            &sock_path,
            Arc::new(CommandRegistry::with_builtins()),
            fast_config(),
        )
        .unwrap();

        let second = CommandServer::start(
            &sock_path,
            Arc::new(CommandRegistry::with_builtins()),
            fast_config(),
        );
        assert!(matches!(
            second,
            Err(ServerError::Transport(TransportError::InUse { .. }))
        ));
        assert!(sock_path.exists(), "live endpoint must be untouched");

        assert!(first.shutdown());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn slow_command_does_not_block_accept() {
        let dir = unique_temp_dir("slow");
        let sock_path = dir.join("2safe.sock");
        let fast_source = dir.join("fast.txt");
        std::fs::write(&fast_source, b"fast").unwrap();

        let mut registry = CommandRegistry::with_builtins();
        registry.register(FnHandler::new("sleep", |_msg: &CommandMessage| {
            thread::sleep(Duration::from_millis(500));
            Ok(Outcome::default())
        }));

        let server = CommandServer::start(&sock_path, Arc::new(registry), fast_config()).unwrap();
        let running = Arc::new(AtomicBool::new(true));
        let handle = spawn_server(server, Arc::clone(&running));

        let started = Instant::now();
        send(&sock_path, br#"{"verb":"sleep","path":"/tmp/slow"}"#);
        send(
            &sock_path,
            &CommandMessage::new(HASH_VERB, fast_source.to_string_lossy())
                .encode()
                .unwrap(),
        );
        assert!(wait_for(&artifact_path(&fast_source), Duration::from_secs(5)));
        assert!(started.elapsed() < Duration::from_millis(500));

        running.store(false, Ordering::SeqCst);
        assert!(handle.join().unwrap());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn same_artifact_commands_are_serialized() {
        let dir = unique_temp_dir("serial");
        let sock_path = dir.join("2safe.sock");
        let source = dir.join("shared.txt");
        std::fs::write(&source, b"shared").unwrap();

        let log = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&log);
        let mut registry = CommandRegistry::new();
        registry.register(FnHandler::new(HASH_VERB, move |msg: &CommandMessage| {
            recorder.lock().unwrap().push("enter");
            thread::sleep(Duration::from_millis(50));
            let outcome = HashHandler.execute(msg);
            recorder.lock().unwrap().push("exit");
            outcome
        }));

        let server = CommandServer::start(&sock_path, Arc::new(registry), fast_config()).unwrap();
        let running = Arc::new(AtomicBool::new(true));
        let handle = spawn_server(server, Arc::clone(&running));

        let payload = CommandMessage::new(HASH_VERB, source.to_string_lossy())
            .encode()
            .unwrap();
        for _ in 0..4 {
            send(&sock_path, &payload);
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        while log.lock().unwrap().len() < 8 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        running.store(false, Ordering::SeqCst);
        assert!(handle.join().unwrap());

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 8);
        for pair in log.chunks(2) {
            assert_eq!(pair, &["enter", "exit"][..]);
        }
        let _ = std::fs::remove_dir_all(&dir);
    }
}
