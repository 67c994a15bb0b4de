use crate::metrics::{DNS_DROPPED_TOTAL, DNS_REQUESTS_TOTAL};
use crate::resolver::Resolver;
use crate::wire;
use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::watch;

pub struct DnsServer {
    resolver: Arc<Resolver>,
}

impl DnsServer {
    pub fn new(resolver: Arc<Resolver>) -> Self {
        Self { resolver }
    }

    /// Binds UDP and TCP on `addr` and serves until `shutdown` changes.
    pub async fn run(&self, addr: SocketAddr, shutdown: watch::Receiver<bool>) -> Result<()> {
        let udp_socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind UDP {}: {}", addr, e))?;
        let tcp_listener = TcpListener::bind(addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind TCP {}: {}", addr, e))?;
        tracing::info!("[dns] Server bound to TCP & UDP on {}", addr);
        self.serve(udp_socket, tcp_listener, shutdown).await
    }

    pub async fn serve(
        &self,
        udp_socket: UdpSocket,
        tcp_listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let udp_socket = Arc::new(udp_socket);
        let mut tasks = Vec::new();

        let resolver_udp = self.resolver.clone();
        tasks.push(tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            loop {
                let (size, src) = match udp_socket.recv_from(&mut buf).await {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::debug!("[dns] UDP receive error: {}", e);
                        continue;
                    }
                };
                let query = buf[..size].to_vec();
                let resolver = resolver_udp.clone();
                let socket = udp_socket.clone();

                tokio::spawn(async move {
                    if let Some(resp) = handle(&resolver, &query, "udp").await {
                        if let Err(e) = socket.send_to(&resp, src).await {
                            tracing::debug!("[dns] Failed to reply to {}: {}", src, e);
                        }
                    }
                });
            }
        }));

        let resolver_tcp = self.resolver.clone();
        tasks.push(tokio::spawn(async move {
            loop {
                match tcp_listener.accept().await {
                    Ok((stream, src)) => {
                        let resolver = resolver_tcp.clone();
                        tokio::spawn(async move {
                            if let Err(e) = serve_tcp(&resolver, stream).await {
                                tracing::debug!("[dns] TCP connection from {} closed: {}", src, e);
                            }
                        });
                    }
                    Err(e) => tracing::debug!("[dns] TCP accept error: {}", e),
                }
            }
        }));

        let _ = shutdown.changed().await;
        for task in tasks {
            task.abort();
        }
        tracing::info!("[dns] Server stopped");
        Ok(())
    }
}

/// Length-prefixed queries until the client closes the connection.
async fn serve_tcp(resolver: &Resolver, mut stream: TcpStream) -> std::io::Result<()> {
    loop {
        let mut len_buf = [0u8; 2];
        if stream.read_exact(&mut len_buf).await.is_err() {
            return Ok(());
        }
        let len = u16::from_be_bytes(len_buf) as usize;
        let mut query = vec![0u8; len];
        stream.read_exact(&mut query).await?;

        if let Some(resp) = handle(resolver, &query, "tcp").await {
            let resp_len = resp.len() as u16;
            stream.write_all(&resp_len.to_be_bytes()).await?;
            stream.write_all(&resp).await?;
        }
    }
}

/// Decodes one query and encodes the reply. `None` drops the query.
async fn handle(resolver: &Resolver, query: &[u8], proto: &str) -> Option<Vec<u8>> {
    DNS_REQUESTS_TOTAL.with_label_values(&[proto]).inc();

    let request = match wire::decode(query) {
        Ok(m) => m,
        Err(e) => {
            DNS_DROPPED_TOTAL.with_label_values(&["malformed"]).inc();
            tracing::debug!("[dns] Ignoring malformed {} query: {}", proto, e);
            return None;
        }
    };
    if request.queries().len() != 1 {
        DNS_DROPPED_TOTAL.with_label_values(&["question_count"]).inc();
        return None;
    }

    let mut resp = resolver.serve(&request).await?;
    let encoded = if proto == "udp" { wire::encode_udp(&mut resp) } else { wire::encode(&resp) };
    match encoded {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            tracing::warn!("[dns] Failed to encode response {}: {}", request.id(), e);
            None
        }
    }
}
