use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use etcd_kv::{
    Client, Config, DeleteOptions, EventType, GetOptions, PutOptions, SortOrder, SortTarget,
    WatchOptions,
};
use etcd_api_types::etcdserverpb::watch_client::WatchClient;
use etcd_api_types::etcdserverpb::watch_request::RequestUnion;
use etcd_api_types::etcdserverpb::{WatchCreateRequest, WatchRequest};
use kv_demo::{Deadline, DemoRunner, Error as DemoError, Pager};
use tokio::net::TcpListener;
use tokio_stream::wrappers::ReceiverStream;
use tonic::Code;

async fn start_test_server() -> (SocketAddr, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let pool = mvcc_server::db::init_pool("sqlite::memory:").await.unwrap();
    let storage = Arc::new(mvcc_server::storage::Storage::new(pool));
    let _reaper = mvcc_server::lease::spawn_reaper(storage.clone(), Duration::from_millis(50));
    let router = mvcc_server::grpc::create_router(storage);

    let handle = tokio::spawn(async move {
        router
            .serve_with_incoming(tokio_stream::wrappers::TcpListenerStream::new(listener))
            .await
            .unwrap();
    });

    (addr, handle)
}

async fn connect() -> (Client, tokio::task::JoinHandle<()>) {
    let (addr, handle) = start_test_server().await;
    let client = Client::connect(Config::new([addr.to_string()]))
        .await
        .unwrap();
    (client, handle)
}

fn keys(page: &[etcd_kv::KeyValue]) -> Vec<String> {
    page.iter().map(|kv| kv.key_str().into_owned()).collect()
}

fn status_code(err: etcd_kv::Error) -> Code {
    match err {
        etcd_kv::Error::Status(status) => status.code(),
        other => panic!("expected a gRPC status, got {:?}", other),
    }
}

#[tokio::test]
async fn test_read_at_first_revision_returns_overwritten_value() {
    let (client, _handle) = connect().await;
    let runner = DemoRunner::new(client);

    let report = runner.revision_read("slop", "bob", "555", None).await.unwrap();

    assert_eq!(report.initial.value, b"bob");
    assert_eq!(report.initial.mod_revision, report.first_revision);
    assert_eq!(report.updated.value, b"555");
    assert_eq!(report.updated.version, 2);
    assert!(report.updated.mod_revision > report.first_revision);
    assert_eq!(report.historical.value, b"bob");
    assert_eq!(report.historical.mod_revision, report.first_revision);
}

#[tokio::test]
async fn test_leased_key_disappears_after_ttl() {
    let (client, _handle) = connect().await;
    let runner = DemoRunner::new(client.clone());

    let report = runner.lease_expiry("key", "key", 1).await.unwrap();

    assert!(report.absent_before);
    assert!(report.present_after_put);
    assert!(report.absent_after_expiry);
    assert!(report.deleted_at > 0);

    let ttl = client.lease_time_to_live(report.lease.id, false).await.unwrap();
    assert_eq!(ttl.ttl, -1);
}

#[tokio::test]
async fn test_leased_key_present_before_ttl() {
    let (client, _handle) = connect().await;

    let lease = client.grant_lease(30).await.unwrap();
    client
        .put("session", "alive", Some(PutOptions::new().with_lease(lease.id)))
        .await
        .unwrap();

    let resp = client.get("session", None).await.unwrap();
    assert_eq!(resp.kvs.len(), 1);
    assert_eq!(resp.kvs[0].lease, lease.id);

    let ttl = client.lease_time_to_live(lease.id, true).await.unwrap();
    assert_eq!(ttl.granted_ttl, 30);
    assert!(ttl.ttl > 0 && ttl.ttl <= 30);
    assert_eq!(ttl.keys, vec![b"session".to_vec()]);

    client.revoke_lease(lease.id).await.unwrap();
    let resp = client.get("session", None).await.unwrap();
    assert!(resp.kvs.is_empty());
}

#[tokio::test]
async fn test_pagination_walks_prefix_without_gaps() {
    let (client, _handle) = connect().await;
    client.put("kez", "outside", None).await.unwrap();
    let runner = DemoRunner::new(client);

    let report = runner.paginate("key", 20, 3).await.unwrap();

    let first: Vec<_> = report.pages[0].iter().map(|kv| kv.key_str().into_owned()).collect();
    let second: Vec<_> = report.pages[1].iter().map(|kv| kv.key_str().into_owned()).collect();
    assert_eq!(first, vec!["key_00", "key_01", "key_02"]);
    assert_eq!(second, vec!["key_03", "key_04", "key_05"]);
    assert_eq!(report.pages[1][2].value, b"5");

    let expected: Vec<_> = (0..20).map(|i| format!("key_{:02}", i)).collect();
    assert_eq!(report.keys(), expected);
    assert_eq!(report.pages.len(), 7);
    assert_eq!(report.pages[6].len(), 2);
}

#[tokio::test]
async fn test_pager_continues_when_boundary_key_was_deleted() {
    let (client, _handle) = connect().await;
    for i in 0..10 {
        client
            .put(format!("key_{:02}", i), i.to_string(), None)
            .await
            .unwrap();
    }

    let mut pager = Pager::new(&client, "key", 3);
    let first = pager.next_page().await.unwrap().unwrap();
    assert_eq!(keys(&first), vec!["key_00", "key_01", "key_02"]);

    client.delete("key_02", None).await.unwrap();

    let second = pager.next_page().await.unwrap().unwrap();
    assert_eq!(keys(&second), vec!["key_03", "key_04", "key_05"]);

    let mut seen = keys(&first);
    seen.extend(keys(&second));
    while let Some(page) = pager.next_page().await.unwrap() {
        assert!(!page.is_empty() && page.len() <= 3);
        seen.extend(keys(&page));
    }

    let expected: Vec<_> = (0..10).map(|i| format!("key_{:02}", i)).collect();
    assert_eq!(seen, expected);

    let live = client
        .get("key", Some(GetOptions::new().with_prefix().with_count_only()))
        .await
        .unwrap();
    assert_eq!(live.count, 9);
}

#[tokio::test]
async fn test_from_key_read_includes_start_key() {
    let (client, _handle) = connect().await;
    for i in 0..5 {
        client
            .put(format!("key_{:02}", i), i.to_string(), None)
            .await
            .unwrap();
    }

    let options = GetOptions::new()
        .with_prefix()
        .with_sort(SortTarget::Key, SortOrder::Ascend)
        .with_limit(3)
        .with_from_key();
    let resp = client.get("key_02", Some(options)).await.unwrap();

    let keys: Vec<_> = resp.kvs.iter().map(|kv| kv.key_str().into_owned()).collect();
    assert_eq!(keys, vec!["key_02", "key_03", "key_04"]);
    assert!(!resp.more);
    assert_eq!(resp.count, 3);
}

#[tokio::test]
async fn test_delete_prefix_leaves_other_keys() {
    let (client, _handle) = connect().await;
    for key in ["key", "key_a", "key_b", "kez", "ke"] {
        client.put(key, "v", None).await.unwrap();
    }

    let deleted = client
        .delete("key", Some(DeleteOptions::new().with_prefix().with_prev_kv()))
        .await
        .unwrap();
    assert_eq!(deleted.deleted, 3);
    assert_eq!(deleted.prev_kvs.len(), 3);

    let rest = client
        .get("\0", Some(GetOptions::new().with_from_key()))
        .await
        .unwrap();
    let keys: Vec<_> = rest.kvs.iter().map(|kv| kv.key_str().into_owned()).collect();
    assert_eq!(keys, vec!["ke", "kez"]);
}

#[tokio::test]
async fn test_store_errors_surface_as_status() {
    let (client, _handle) = connect().await;
    let put = client.put("a", "1", None).await.unwrap();

    let err = client
        .get("a", Some(GetOptions::new().with_revision(put.revision + 100)))
        .await
        .unwrap_err();
    assert_eq!(status_code(err), Code::OutOfRange);

    let err = client
        .put("a", "2", Some(PutOptions::new().with_lease(424242)))
        .await
        .unwrap_err();
    assert_eq!(status_code(err), Code::NotFound);

    let err = client.put("", "x", None).await.unwrap_err();
    assert_eq!(status_code(err), Code::InvalidArgument);
}

#[tokio::test]
async fn test_watch_reports_puts_and_deletes() {
    let (client, _handle) = connect().await;
    let start = client.put("watched", "0", None).await.unwrap().revision;
    client.put("watched", "1", None).await.unwrap();
    client.delete("watched", None).await.unwrap();

    let mut stream = client
        .watch("watched", Some(WatchOptions::new().with_start_revision(start)))
        .await
        .unwrap();

    let mut kinds = Vec::new();
    while kinds.len() < 3 {
        let events = tokio::time::timeout(Duration::from_secs(5), stream.next_events())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        kinds.extend(events.into_iter().map(|e| e.kind));
    }
    assert_eq!(kinds, vec![EventType::Put, EventType::Put, EventType::Delete]);
    stream.cancel().await.unwrap();
}

#[tokio::test]
async fn test_second_watch_on_stream_is_rejected_with_own_id() {
    let (addr, _handle) = start_test_server().await;
    let mut client = WatchClient::connect(format!("http://{}", addr))
        .await
        .unwrap();

    let create = |key: &str| WatchRequest {
        request_union: Some(RequestUnion::CreateRequest(WatchCreateRequest {
            key: key.as_bytes().to_vec(),
            ..Default::default()
        })),
    };

    let (tx, rx) = tokio::sync::mpsc::channel(4);
    tx.send(create("a")).await.unwrap();
    let mut responses = client
        .watch(ReceiverStream::new(rx))
        .await
        .unwrap()
        .into_inner();

    let active = responses.message().await.unwrap().unwrap();
    assert!(active.created);
    assert!(!active.canceled);

    tx.send(create("b")).await.unwrap();
    let rejected = tokio::time::timeout(Duration::from_secs(5), responses.message())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(rejected.canceled);
    assert_ne!(rejected.watch_id, active.watch_id);
}

#[tokio::test]
async fn test_wait_for_delete_times_out_when_key_stays() {
    let (client, _handle) = connect().await;
    let put = client.put("stays", "here", None).await.unwrap();

    let err = client
        .wait_for_delete("stays", put.revision, Duration::from_millis(300))
        .await
        .unwrap_err();
    assert!(err.is_timeout());
}

#[tokio::test]
async fn test_elapsed_deadline_aborts_scenario() {
    let (client, _handle) = connect().await;
    let runner = DemoRunner::with_deadline(client, Deadline::after(Duration::ZERO));

    let result = runner.revision_read("slop", "bob", "555", None).await;
    assert!(matches!(result, Err(DemoError::RequestTimeout)));
    assert!(runner.deadline().is_elapsed());
}

#[tokio::test]
async fn test_run_all_completes_every_scenario() {
    let (client, _handle) = connect().await;
    let runner = DemoRunner::new(client.clone());

    assert_eq!(runner.run_all().await, 0);

    let remaining = client
        .get("key", Some(GetOptions::new().with_prefix().with_count_only()))
        .await
        .unwrap();
    assert_eq!(remaining.count, 20);
}

#[tokio::test]
async fn test_connect_fails_without_server() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = Config::new([addr.to_string()]).with_dial_timeout(Duration::from_millis(200));
    let result = Client::connect(config).await;
    assert!(matches!(result, Err(etcd_kv::Error::Transport(_))));
}
