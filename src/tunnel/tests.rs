#[cfg(test)]
mod tests {
    use super::super::duplex::TunnelBody;
    use super::super::pump;
    use crate::config::TunnelConfig;
    use crate::error::TunnelError;
    use crate::tunnel::{ClientForwarder, ServerForwarder};

    use std::path::PathBuf;
    use std::time::Duration;

    use bytes::Bytes;
    use http_body_util::BodyExt;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::time::timeout;

    fn plain_config(listen: &str, peer: &str) -> TunnelConfig {
        TunnelConfig {
            listen_addr: listen.to_string(),
            peer_addr: peer.to_string(),
            path: "/h2tunnel".to_string(),
            use_tls: false,
            insecure_skip_verify: false,
            cert_file: None,
            key_file: None,
        }
    }

    #[test]
    fn tls_mode_requires_both_cert_and_key() {
        let mut config = plain_config("127.0.0.1:0", "127.0.0.1:9");
        assert!(!config.serve_tls());

        config.cert_file = Some(PathBuf::from("cert.pem"));
        assert!(!config.serve_tls());

        config.key_file = Some(PathBuf::from("key.pem"));
        assert!(config.serve_tls());

        config.cert_file = None;
        assert!(!config.serve_tls());
    }

    #[test]
    fn empty_tunnel_body_is_end_of_stream() {
        use http_body::Body;

        assert!(TunnelBody::empty().is_end_stream());
    }

    #[tokio::test]
    async fn tunnel_body_streams_chunks_then_ends() {
        let (tx, rx) = tokio::sync::mpsc::channel(4);
        let mut body = TunnelBody::new(rx);

        tx.send(Bytes::from_static(b"hello")).await.unwrap();
        drop(tx);

        let frame = body.frame().await.unwrap().unwrap();
        let data = match frame.into_data() {
            Ok(data) => data,
            Err(_) => panic!("expected a data frame"),
        };
        assert_eq!(data, Bytes::from_static(b"hello"));
        assert!(body.frame().await.is_none());
    }

    #[tokio::test]
    async fn pump_copies_both_directions_and_tears_down() {
        let (local, local_peer) = tokio::io::duplex(1024);
        let (tunnel, tunnel_peer) = tokio::io::duplex(1024);

        let session = tokio::spawn(pump::run(local, tunnel));

        let (mut local_rd, mut local_wr) = tokio::io::split(local_peer);
        let (mut tunnel_rd, mut tunnel_wr) = tokio::io::split(tunnel_peer);

        local_wr.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        tunnel_rd.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        tunnel_wr.write_all(b"pong!").await.unwrap();
        let mut buf = [0u8; 5];
        local_rd.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong!");

        // Closing the local write side ends the session; run joins both
        // copy tasks before returning.
        local_wr.shutdown().await.unwrap();
        let (sent, received) = timeout(Duration::from_secs(5), session)
            .await
            .expect("session should end promptly")
            .unwrap()
            .unwrap();
        assert_eq!(sent, 4);
        assert_eq!(received, 5);

        // The tunnel peer observes the teardown as end-of-stream.
        let mut buf = [0u8; 8];
        let n = timeout(Duration::from_secs(5), tunnel_rd.read(&mut buf))
            .await
            .expect("tunnel side should close promptly")
            .unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn pump_closes_local_when_tunnel_drops() {
        let (local, local_peer) = tokio::io::duplex(64);
        let (tunnel, tunnel_peer) = tokio::io::duplex(64);

        let session = tokio::spawn(pump::run(local, tunnel));
        drop(tunnel_peer);

        // Keep the write half open so end-of-stream can only come from the
        // pump shutting the connection down.
        let (mut local_rd, _local_wr) = tokio::io::split(local_peer);
        let mut buf = [0u8; 8];
        let n = timeout(Duration::from_secs(5), local_rd.read(&mut buf))
            .await
            .expect("local side should close promptly")
            .unwrap();
        assert_eq!(n, 0);

        timeout(Duration::from_secs(5), session)
            .await
            .expect("both copy tasks should exit")
            .unwrap()
            .ok();
    }

    #[tokio::test]
    async fn client_forwarder_binds_and_stops() {
        let forwarder = ClientForwarder::bind(plain_config("127.0.0.1:0", "127.0.0.1:9"))
            .await
            .expect("client forwarder should bind");
        assert!(forwarder.local_addr().unwrap().port() > 0);

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(forwarder.serve(async {
            let _ = rx.await;
        }));

        tx.send(()).unwrap();
        timeout(Duration::from_secs(5), handle)
            .await
            .expect("serve should return after shutdown")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn server_forwarder_binds_and_stops() {
        let forwarder = ServerForwarder::bind(plain_config("127.0.0.1:0", "127.0.0.1:9"))
            .await
            .expect("server forwarder should bind");
        assert!(forwarder.local_addr().unwrap().port() > 0);

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(forwarder.serve(async {
            let _ = rx.await;
        }));

        tx.send(()).unwrap();
        timeout(Duration::from_secs(5), handle)
            .await
            .expect("serve should return within the grace period")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn invalid_peer_address_is_a_config_error() {
        let err = ClientForwarder::bind(plain_config("127.0.0.1:0", "not a host:port"))
            .await
            .err()
            .expect("an unparseable tunnel url should be rejected");
        assert!(matches!(err, TunnelError::Config(_)));
    }

    #[tokio::test]
    async fn bind_failure_is_fatal() {
        let occupied = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = occupied.local_addr().unwrap();

        let err = ClientForwarder::bind(plain_config(&addr.to_string(), "127.0.0.1:9"))
            .await
            .err()
            .expect("bind to an occupied address should fail");
        assert!(matches!(err, TunnelError::Bind { .. }));
    }
}
