//! Integration tests for the WebSocket transport.
//!
//! These spin up a real listener on an OS-assigned port and talk to it
//! with a `tokio-tungstenite` client.

#[cfg(feature = "websocket")]
mod websocket {
    use futures_util::{SinkExt, StreamExt};
    use quire_transport::{Connection, Transport, WebSocketTransport};
    use tokio_tungstenite::tungstenite::Message;

    type ClientWs = tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >;

    async fn bind() -> (WebSocketTransport, String) {
        let transport = WebSocketTransport::bind("127.0.0.1:0")
            .await
            .expect("should bind");
        let addr = transport.local_addr().expect("local addr").to_string();
        (transport, addr)
    }

    async fn connect(url: String) -> ClientWs {
        let (ws, _) = tokio_tungstenite::connect_async(&url)
            .await
            .expect("client should connect");
        ws
    }

    #[tokio::test]
    async fn test_accept_captures_path_and_query() {
        let (mut transport, addr) = bind().await;
        let server = tokio::spawn(async move {
            transport.accept().await.expect("should accept")
        });

        let _client = connect(format!(
            "ws://{addr}/api/room/text:file:abc?sessionId=s1&username=ada"
        ))
        .await;
        let conn = server.await.expect("task should complete");

        assert_eq!(conn.request().last_segment(), Some("text:file:abc"));
        assert_eq!(conn.request().query_param("sessionId"), Some("s1"));
        assert_eq!(conn.request().query_param("username"), Some("ada"));
    }

    #[tokio::test]
    async fn test_send_and_receive_binary() {
        let (mut transport, addr) = bind().await;
        let server = tokio::spawn(async move {
            transport.accept().await.expect("should accept")
        });
        let mut client = connect(format!("ws://{addr}/room/a")).await;
        let conn = server.await.expect("task should complete");

        client
            .send(Message::Binary(vec![0, 1, 2].into()))
            .await
            .expect("client send");
        let received = conn.recv().await.expect("recv").expect("frame");
        assert_eq!(received, vec![0, 1, 2]);

        conn.send(&[125, 3]).await.expect("server send");
        let msg = client.next().await.expect("frame").expect("ok");
        assert_eq!(msg.into_data().to_vec(), vec![125, 3]);
    }

    #[tokio::test]
    async fn test_concurrent_send_while_receiving() {
        let (mut transport, addr) = bind().await;
        let server = tokio::spawn(async move {
            transport.accept().await.expect("should accept")
        });
        let mut client = connect(format!("ws://{addr}/room/a")).await;
        let conn = std::sync::Arc::new(server.await.expect("task should complete"));

        // A reader parked in recv must not block the writer.
        let reader = {
            let conn = std::sync::Arc::clone(&conn);
            tokio::spawn(async move { conn.recv().await })
        };
        conn.send(b"hello").await.expect("send while reading");
        let msg = client.next().await.expect("frame").expect("ok");
        assert_eq!(msg.into_data().to_vec(), b"hello".to_vec());

        client.close(None).await.expect("client close");
        let closed = reader.await.expect("reader task").expect("recv");
        assert!(closed.is_none());
    }

    #[tokio::test]
    async fn test_close_carries_code_and_reason() {
        let (mut transport, addr) = bind().await;
        let server = tokio::spawn(async move {
            transport.accept().await.expect("should accept")
        });
        let mut client = connect(format!("ws://{addr}/room/a")).await;
        let conn = server.await.expect("task should complete");

        conn.close(1003, "session expired").await.expect("close");

        match client.next().await {
            Some(Ok(Message::Close(Some(frame)))) => {
                assert_eq!(u16::from(frame.code), 1003);
                assert_eq!(frame.reason.as_str(), "session expired");
            }
            other => panic!("expected close frame, got {other:?}"),
        }
    }
}
