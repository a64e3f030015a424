use relink_core::{Address, TransportErrorKind};
use relink_reconnect::{
    Connection, ConnectRequest, ConnectionOptions, Container, MessagingHandler, ReconnectOptions,
    TcpConnector, Transport,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tower::ServiceExt;

fn request(address: String) -> ConnectRequest {
    ConnectRequest::new(Address::new(address), Arc::new(ConnectionOptions::new()), 1)
}

#[tokio::test]
async fn link_ends_when_peer_closes() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        drop(stream);
    });

    let link = TcpConnector::new()
        .oneshot(request(format!("127.0.0.1:{port}")))
        .await
        .unwrap();
    server.await.unwrap();

    let error = tokio::time::timeout(Duration::from_secs(5), link)
        .await
        .unwrap();
    assert_eq!(error.kind(), TransportErrorKind::Lost);
    assert_eq!(error.address().as_str(), format!("127.0.0.1:{port}"));
}

#[tokio::test]
async fn closed_port_is_refused() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let error = match TcpConnector::new()
        .oneshot(request(format!("127.0.0.1:{port}")))
        .await
    {
        Ok(_) => panic!("connected to a closed port"),
        Err(error) => error,
    };
    assert_eq!(error.kind(), TransportErrorKind::Refused);
    assert!(error.to_string().contains(&format!("127.0.0.1:{port}")));
}

#[tokio::test]
async fn unparseable_address_fails_attempt() {
    let error = match TcpConnector::new()
        .oneshot(request("bad host".to_string()))
        .await
    {
        Ok(_) => panic!("connected to an invalid address"),
        Err(error) => error,
    };
    assert_eq!(error.kind(), TransportErrorKind::Resolution);
}

#[derive(Clone, Default)]
struct CloseOnReconnect {
    log: Arc<Mutex<Vec<String>>>,
}

impl MessagingHandler for CloseOnReconnect {
    fn on_connection_open(&mut self, connection: &mut Connection<'_>) {
        self.log
            .lock()
            .unwrap()
            .push(format!("open:{}", connection.reconnected()));
        if connection.reconnected() {
            connection.close();
        }
    }

    fn on_transport_error(&mut self, transport: &mut Transport<'_>) {
        let kind = transport.error().map(|error| error.kind().as_str());
        self.log
            .lock()
            .unwrap()
            .push(format!("error:{}", kind.unwrap_or("none")));
    }
}

#[tokio::test]
async fn container_reconnects_over_tcp() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        // Hang up on the first client, hold the second.
        let (first, _) = listener.accept().await.unwrap();
        drop(first);
        let (second, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        drop(second);
    });

    let container = Container::builder().id("tcp").build();
    let handler = CloseOnReconnect::default();
    let options = ConnectionOptions::builder()
        .reconnect(ReconnectOptions::new().delay(Duration::from_millis(5)))
        .connect_timeout(Duration::from_secs(1));

    container
        .connect(format!("127.0.0.1:{port}"), options, handler.clone())
        .unwrap();
    tokio::time::timeout(Duration::from_secs(5), container.run())
        .await
        .unwrap();

    assert_eq!(
        *handler.log.lock().unwrap(),
        vec!["open:false", "error:lost", "open:true"]
    );
}
