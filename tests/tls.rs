//! TLS serving, session resumption and credential hot swap.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use edge_frontend::{EndpointConfig, TicketSeedSet, TlsCertConfig};

mod common;

use common::{
    cert_path, hello_chain, options, plain_request, secure_endpoint, start_server, status,
    tls_request, TlsClient,
};

fn seeds(seed: &str) -> TicketSeedSet {
    TicketSeedSet::new(vec![hex::encode(seed)])
}

/// Cert and key files in a scratch directory so they can be replaced.
struct ScratchCredentials {
    dir: PathBuf,
}

impl ScratchCredentials {
    fn new() -> Self {
        let dir = std::env::temp_dir().join(format!("edge-frontend-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        let scratch = Self { dir };
        scratch.install("test_cert1.pem", "test_key1.pem");
        scratch
    }

    fn install(&self, cert: &str, key: &str) {
        fs::copy(cert_path(cert), self.cert()).unwrap();
        fs::copy(cert_path(key), self.key()).unwrap();
    }

    fn cert(&self) -> PathBuf {
        self.dir.join("server.pem")
    }

    fn key(&self) -> PathBuf {
        self.dir.join("server.key")
    }

    fn endpoint(&self) -> EndpointConfig {
        common::plain_endpoint().with_certificate(TlsCertConfig::new(self.cert(), self.key()))
    }
}

impl Drop for ScratchCredentials {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.dir);
    }
}

#[tokio::test]
async fn test_tls_request() {
    let mut opts = options();
    opts.handler_chain = hello_chain();
    let (server, port) = start_server(opts, vec![secure_endpoint()]);
    assert!(server.addresses()[0].secure);

    let client = TlsClient::new().build();
    let outcome = tls_request(Arc::clone(&client), port).await.unwrap();

    assert!(!outcome.resumed);
    assert!(outcome.certificate_digest.is_some());
    let response = outcome.response.expect("no response");
    assert_eq!(status(&response), Some(200));
    assert!(response.ends_with("hello"));

    // The first exchange left a session ticket behind; reusing it resumes.
    let again = tls_request(client, port).await.unwrap();
    assert!(again.resumed);
    assert_eq!(again.response.as_deref().and_then(status), Some(200));
}

#[tokio::test]
async fn test_plaintext_on_secure_port_allowed() {
    let mut endpoint = secure_endpoint();
    endpoint.allow_insecure_on_secure_port = true;
    let mut opts = options();
    opts.handler_chain = hello_chain();
    let (_server, port) = start_server(opts, vec![endpoint]);

    let response = common::http_client()
        .get(format!("http://127.0.0.1:{port}/"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    // TLS still works on the same port.
    let outcome = tls_request(TlsClient::new().build(), port).await.unwrap();
    assert_eq!(outcome.response.as_deref().and_then(status), Some(200));
}

#[tokio::test]
async fn test_plaintext_on_secure_port_refused() {
    let mut opts = options();
    opts.handler_chain = hello_chain();
    let (_server, port) = start_server(opts, vec![secure_endpoint()]);

    assert!(plain_request(port).await.is_none());
    assert!(common::http_client()
        .get(format!("http://127.0.0.1:{port}/"))
        .send()
        .await
        .is_err());
}

#[tokio::test]
async fn test_session_resumption_across_seed_rotation() {
    let mut opts = options();
    opts.handler_chain = hello_chain();
    let endpoint = secure_endpoint().with_ticket_seeds(seeds("hello"));
    let (server, port) = start_server(opts, vec![endpoint]);

    let client = TlsClient::new().build();

    let first = tls_request(Arc::clone(&client), port).await.unwrap();
    assert!(!first.resumed);
    assert!(first.response.is_some());

    let second = tls_request(Arc::clone(&client), port).await.unwrap();
    assert!(second.resumed);
    assert!(second.response.is_some());

    server.update_ticket_seeds(seeds("goodbyte")).unwrap();

    // The cached ticket was sealed under the old seed: full handshake.
    let third = tls_request(Arc::clone(&client), port).await.unwrap();
    assert!(!third.resumed);
    assert_eq!(third.response.as_deref().and_then(status), Some(200));

    let fourth = tls_request(Arc::clone(&client), port).await.unwrap();
    assert!(fourth.resumed);
    assert_eq!(fourth.response.as_deref().and_then(status), Some(200));
}

#[tokio::test]
async fn test_previous_seed_still_resumes() {
    let mut opts = options();
    opts.handler_chain = hello_chain();
    let endpoint = secure_endpoint().with_ticket_seeds(seeds("hello"));
    let (server, port) = start_server(opts, vec![endpoint]);

    let client = TlsClient::new().build();
    tls_request(Arc::clone(&client), port).await.unwrap();

    let rotated = TicketSeedSet::new(vec![hex::encode("goodbyte")])
        .with_previous(vec![hex::encode("hello")]);
    server.update_ticket_seeds(rotated).unwrap();

    let resumed = tls_request(Arc::clone(&client), port).await.unwrap();
    assert!(resumed.resumed);
}

#[tokio::test]
async fn test_invalid_seed_update_keeps_serving() {
    let mut opts = options();
    opts.handler_chain = hello_chain();
    let endpoint = secure_endpoint().with_ticket_seeds(seeds("hello"));
    let (server, port) = start_server(opts, vec![endpoint]);

    let client = TlsClient::new().build();
    tls_request(Arc::clone(&client), port).await.unwrap();

    let invalid = TicketSeedSet::new(vec!["not hex".to_string()]);
    assert!(server.update_ticket_seeds(invalid).is_err());

    let outcome = tls_request(Arc::clone(&client), port).await.unwrap();
    assert!(outcome.resumed);
}

#[tokio::test]
async fn test_update_credentials_swaps_certificate() {
    let credentials = ScratchCredentials::new();
    let mut opts = options();
    opts.handler_chain = hello_chain();
    let (server, port) = start_server(opts, vec![credentials.endpoint()]);

    let before = tls_request(TlsClient::new().without_resumption().build(), port)
        .await
        .unwrap();

    credentials.install("test_cert2.pem", "test_key2.pem");
    server.update_credentials().unwrap();

    let after = tls_request(TlsClient::new().without_resumption().build(), port)
        .await
        .unwrap();

    assert!(before.certificate_digest.is_some());
    assert!(after.certificate_digest.is_some());
    assert_ne!(before.certificate_digest, after.certificate_digest);
    assert_eq!(after.response.as_deref().and_then(status), Some(200));
}

#[tokio::test]
async fn test_failed_credential_update_keeps_old_certificate() {
    let credentials = ScratchCredentials::new();
    let mut opts = options();
    opts.handler_chain = hello_chain();
    let (server, port) = start_server(opts, vec![credentials.endpoint()]);

    let before = tls_request(TlsClient::new().without_resumption().build(), port)
        .await
        .unwrap();

    fs::write(credentials.key(), "garbage").unwrap();
    assert!(server.update_credentials().is_err());

    let after = tls_request(TlsClient::new().without_resumption().build(), port)
        .await
        .unwrap();
    assert_eq!(before.certificate_digest, after.certificate_digest);
    assert_eq!(after.response.as_deref().and_then(status), Some(200));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_credential_swap_drops_no_connections() {
    let credentials = ScratchCredentials::new();
    let mut opts = options();
    opts.handler_chain = hello_chain();
    let (server, port) = start_server(opts, vec![credentials.endpoint()]);
    let server = Arc::new(server);

    let clients: Vec<_> = (0..4)
        .map(|_| {
            tokio::spawn(async move {
                let config = TlsClient::new().without_resumption().build();
                let mut served = 0;
                for _ in 0..20 {
                    let outcome = tls_request(Arc::clone(&config), port).await.unwrap();
                    assert_eq!(outcome.response.as_deref().and_then(status), Some(200));
                    served += 1;
                }
                served
            })
        })
        .collect();

    let swapper = {
        let server = Arc::clone(&server);
        let credentials_dir = credentials.dir.clone();
        tokio::task::spawn_blocking(move || {
            for round in 0..10 {
                let (cert, key) = if round % 2 == 0 {
                    ("test_cert2.pem", "test_key2.pem")
                } else {
                    ("test_cert1.pem", "test_key1.pem")
                };
                // Write to a side file and rename so readers never see a
                // half-written pair.
                for (name, source) in [("server.pem", cert), ("server.key", key)] {
                    let staged = credentials_dir.join(format!("{name}.new"));
                    fs::copy(cert_path(source), &staged).unwrap();
                    fs::rename(&staged, credentials_dir.join(name)).unwrap();
                }
                let _ = server.update_credentials();
                std::thread::sleep(std::time::Duration::from_millis(5));
            }
        })
    };

    swapper.await.unwrap();
    for client in clients {
        assert_eq!(client.await.unwrap(), 20);
    }
}
