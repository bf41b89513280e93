//! Shared fixtures: synthetic distributions, fake realm endpoints and test
//! logging.

#![allow(dead_code)]

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use disttest_harness::HarnessConfig;
use flate2::write::GzEncoder;
use flate2::Compression;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_native_tls::TlsAcceptor;
use tracing_subscriber::EnvFilter;

pub const DIST_NAME: &str = "server-1.0";

/// Host name on the TLS realm's certificate, deliberately not `127.0.0.1`
pub const TLS_CERT_HOST: &str = "realm.invalid";

/// Show harness logs, including echoed server output, in test runs
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_test_writer()
        .try_init();
}

/// Create `<dir>/server-1.0.zip` whose launcher is `script`
pub fn zip_distribution(dir: &Path, script: &str) -> PathBuf {
    let archive = dir.join(format!("{}.zip", DIST_NAME));
    let file = File::create(&archive).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default().unix_permissions(0o644);

    writer
        .start_file(format!("{}/bin/kc.sh", DIST_NAME), options)
        .unwrap();
    writer.write_all(script.as_bytes()).unwrap();
    writer
        .start_file(format!("{}/conf/server.conf", DIST_NAME), options)
        .unwrap();
    writer.write_all(b"http-enabled=true\n").unwrap();
    writer.finish().unwrap();

    archive
}

/// Create `<dir>/server-1.0.tar.gz` whose launcher is `script`
pub fn tar_gz_distribution(dir: &Path, script: &str) -> PathBuf {
    let staging = dir.join("staging");
    let bin = staging.join(DIST_NAME).join("bin");
    fs::create_dir_all(&bin).unwrap();
    fs::write(bin.join("kc.sh"), script).unwrap();

    let archive = dir.join(format!("{}.tar.gz", DIST_NAME));
    let encoder = GzEncoder::new(File::create(&archive).unwrap(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder
        .append_dir_all(DIST_NAME, staging.join(DIST_NAME))
        .unwrap();
    builder.into_inner().unwrap().finish().unwrap();

    archive
}

/// Harness configuration pointing at `archive`, expanding under `dir`
pub fn config(dir: &Path, archive: &Path) -> HarnessConfig {
    init_tracing();
    let mut config = HarnessConfig::default();
    config.dist_root = dir.join("dist");
    config.artifact = Some(archive.to_path_buf());
    config.echo_output = true;
    config.readiness.host = "127.0.0.1".to_string();
    config.readiness.interval_ms = 250;
    config
}

/// A port nothing is listening on
pub fn unused_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Fake server answering 503 until `delay` has passed, then 200
pub struct FakeRealm {
    pub port: u16,
    requests: Arc<Mutex<Vec<String>>>,
    handle: JoinHandle<()>,
}

impl FakeRealm {
    /// Plain HTTP
    pub async fn ready_after(delay: Duration) -> Self {
        Self::serve(delay, None).await
    }

    /// HTTPS with a self-signed certificate issued for [`TLS_CERT_HOST`]
    pub async fn tls_ready_after(delay: Duration) -> Self {
        let rcgen::CertifiedKey { cert, key_pair } =
            rcgen::generate_simple_self_signed(vec![TLS_CERT_HOST.to_string()]).unwrap();
        let identity =
            native_tls::Identity::from_pkcs8(cert.pem().as_bytes(), key_pair.serialize_pem().as_bytes()).unwrap();
        let acceptor = TlsAcceptor::from(native_tls::TlsAcceptor::new(identity).unwrap());
        Self::serve(delay, Some(acceptor)).await
    }

    async fn serve(delay: Duration, tls: Option<TlsAcceptor>) -> Self {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let ready_at = Instant::now() + delay;

        let seen = requests.clone();
        let handle = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let seen = seen.clone();
                let tls = tls.clone();
                tokio::spawn(async move {
                    match tls {
                        Some(acceptor) => {
                            if let Ok(stream) = acceptor.accept(socket).await {
                                respond(stream, ready_at, &seen).await;
                            }
                        }
                        None => respond(socket, ready_at, &seen).await,
                    }
                });
            }
        });

        Self {
            port,
            requests,
            handle,
        }
    }

    /// Request lines seen so far, e.g. `GET /realms/master/ HTTP/1.1`
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

async fn respond<S>(mut stream: S, ready_at: Instant, seen: &Mutex<Vec<String>>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = [0u8; 2048];
    let n = stream.read(&mut buf).await.unwrap_or(0);
    let request = String::from_utf8_lossy(&buf[..n]);
    if let Some(line) = request.lines().next() {
        seen.lock().unwrap().push(line.to_string());
    }

    let response = if Instant::now() >= ready_at {
        "HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok"
    } else {
        "HTTP/1.1 503 Service Unavailable\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
    };
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

impl Drop for FakeRealm {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
