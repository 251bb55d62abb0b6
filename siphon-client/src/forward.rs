//! Local TCP port forwarding, per SPEC_FULL.md §4.5 phase 4: one listener
//! on `127.0.0.1:<port>` per `extraPort`, splicing each accepted
//! connection to `podIp:<port>`.

use std::net::{IpAddr, SocketAddr};

use tokio::io::{self, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::Result;

/// One running forward; dropping or cancelling `cancel` stops it once the
/// accept loop notices.
pub struct PortForward {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

impl PortForward {
    /// Binds `127.0.0.1:<port>` and spawns the accept loop proxying every
    /// connection to `pod_ip:port`. `parent_cancel` is the invocation's
    /// root cancellation token (§5); this forward derives a child token
    /// so cancelling it alone doesn't tear down sibling forwards.
    pub async fn start(port: u16, pod_ip: IpAddr, parent_cancel: &CancellationToken) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port)).await?;
        let local_addr = listener.local_addr()?;
        let cancel = parent_cancel.child_token();
        let remote = SocketAddr::new(pod_ip, port);

        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((conn, peer)) => {
                                let child = task_cancel.child_token();
                                tokio::spawn(proxy_one(conn, remote, peer, child));
                            }
                            Err(err) => {
                                warn!(%err, port, "accept failed on local port forward");
                            }
                        }
                    }
                }
            }
        });

        Ok(PortForward { local_addr, cancel, task })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops the forward and waits for the accept loop and any
    /// in-flight proxied connections to wind down.
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

async fn proxy_one(mut local: TcpStream, remote: SocketAddr, peer: SocketAddr, cancel: CancellationToken) {
    let mut upstream = match TcpStream::connect(remote).await {
        Ok(stream) => stream,
        Err(err) => {
            warn!(%err, %remote, %peer, "could not connect to remote pod for forwarded connection");
            return;
        }
    };

    debug!(%peer, %remote, "forwarding connection");
    let (mut local_read, mut local_write) = local.split();
    let (mut up_read, mut up_write) = upstream.split();

    let client_to_server = io::copy(&mut local_read, &mut up_write);
    let server_to_client = io::copy(&mut up_read, &mut local_write);

    tokio::select! {
        _ = cancel.cancelled() => {}
        result = client_to_server => {
            if let Err(err) = result {
                debug!(%err, %peer, "forward: client->server copy ended");
            }
        }
        result = server_to_client => {
            if let Err(err) = result {
                debug!(%err, %peer, "forward: server->client copy ended");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};

    #[tokio::test]
    async fn forwards_bytes_between_local_and_remote() {
        // `PortForward` binds the same port number on both ends (the
        // real "remote" is a different host's IP); here the "pod" is
        // simulated on a second loopback address so the test can bind
        // both ends to the same port without colliding.
        let pod_ip = Ipv4Addr::new(127, 0, 0, 2);
        let echo_listener = TcpListener::bind((pod_ip, 0)).await.unwrap();
        let echo_port = echo_listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            if let Ok((mut stream, _)) = echo_listener.accept().await {
                let mut buf = [0u8; 5];
                let _ = stream.read_exact(&mut buf).await;
                let _ = stream.write_all(&buf).await;
            }
        });

        let cancel = CancellationToken::new();
        let forward = PortForward::start(echo_port, IpAddr::V4(pod_ip), &cancel)
            .await
            .unwrap();

        let mut client = TcpStream::connect(forward.local_addr()).await.unwrap();
        client.write_all(b"hello").await.unwrap();
        let mut response = [0u8; 5];
        client.read_exact(&mut response).await.unwrap();
        assert_eq!(&response, b"hello");

        forward.stop().await;
    }
}
