mod support;

use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use hostpool::{Body, ConnectionInfo, Entity, Pool, Result};
use support::{channel_body, echo, get, host, init_logs, logged_errors};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

fn spawn_send(
    pool: &Pool,
    req: http::Request<Body>,
) -> tokio::task::JoinHandle<Result<http::Response<Entity>>> {
    let pool = pool.clone();
    tokio::spawn(async move { pool.send(req).await })
}

#[tokio::test]
async fn strict_round_trip() {
    init_logs();
    let (connector, mut host) = host();
    let pool = Pool::builder().max_connections(2).build(connector).unwrap();

    let sent = spawn_send(&pool, get("/simple"));
    let mut conn = host.accept().await;
    let req = conn.next_request().await.unwrap();
    assert_eq!(req.method(), http::Method::GET);
    assert_eq!(req.uri().path(), "/simple");
    conn.respond(echo(&req));

    let res = timeout(WAIT, sent).await.unwrap().unwrap().unwrap();
    assert_eq!(res.status(), 200);
    assert!(res.extensions().get::<ConnectionInfo>().is_some());
    let body = res.into_body().bytes().await.unwrap();
    assert_eq!(&body[..], b"/simple");
    assert_eq!(host.attempts(), 1);
}

#[tokio::test]
async fn slots_run_in_parallel_and_are_reused() {
    init_logs();
    let (connector, mut host) = host();
    let pool = Pool::builder().max_connections(2).build(connector).unwrap();

    let sent1 = spawn_send(&pool, get("/1"));
    let mut conn1 = host.accept().await;
    let req1 = conn1.next_request().await.unwrap();
    assert_eq!(req1.uri().path(), "/1");

    let sent2 = spawn_send(&pool, get("/2"));
    let mut conn2 = host.accept().await;
    let req2 = conn2.next_request().await.unwrap();
    assert_eq!(req2.uri().path(), "/2");

    // Both connections busy: the third request has to wait.
    let sent3 = spawn_send(&pool, get("/3"));
    conn1.respond(echo(&req1));

    // After conn1's response it is conn1, not a new connection, that
    // receives the third request.
    let req3 = timeout(WAIT, conn1.next_request()).await.unwrap().unwrap();
    assert_eq!(req3.uri().path(), "/3");
    conn1.respond(echo(&req3));
    conn2.respond(echo(&req2));

    for (sent, path) in [(sent1, "/1"), (sent2, "/2"), (sent3, "/3")] {
        let res = timeout(WAIT, sent).await.unwrap().unwrap().unwrap();
        let body = res.into_body().bytes().await.unwrap();
        assert_eq!(body, path);
    }
    assert_eq!(host.attempts(), 2);
}

#[tokio::test]
async fn no_dispatch_until_the_entity_is_drained() {
    init_logs();
    let (connector, mut host) = host();
    let pool = Pool::builder()
        .max_connections(1)
        .response_entity_subscription_timeout(None)
        .build(connector)
        .unwrap();

    let sent1 = spawn_send(&pool, get("/chunked-1"));
    let mut conn = host.accept().await;
    let req1 = conn.next_request().await.unwrap();
    assert_eq!(req1.uri().path(), "/chunked-1");

    let (chunks, body) = channel_body();
    conn.respond(http::Response::builder().status(200).body(body).unwrap());
    let res1 = timeout(WAIT, sent1).await.unwrap().unwrap().unwrap();

    let sent2 = spawn_send(&pool, get("/2"));
    chunks.send(Ok(Bytes::from_static(b"part-1"))).unwrap();

    // The response entity is still streaming: /2 must not reach the
    // connection yet.
    assert!(
        timeout(Duration::from_millis(300), conn.next_request())
            .await
            .is_err(),
        "request dispatched before the previous entity was drained"
    );

    let mut entity = res1.into_body();
    assert_eq!(&entity.next().await.unwrap().unwrap()[..], b"part-1");
    chunks.send(Ok(Bytes::from_static(b"part-2"))).unwrap();
    assert_eq!(&entity.next().await.unwrap().unwrap()[..], b"part-2");
    drop(chunks);
    assert!(entity.next().await.is_none());

    // Entity drained: now the same connection gets /2.
    let req2 = timeout(WAIT, conn.next_request()).await.unwrap().unwrap();
    assert_eq!(req2.uri().path(), "/2");
    conn.respond(echo(&req2));
    let res2 = timeout(WAIT, sent2).await.unwrap().unwrap().unwrap();
    assert_eq!(&res2.into_body().bytes().await.unwrap()[..], b"/2");
    assert_eq!(host.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn subscription_timeout_fails_the_entity() {
    init_logs();
    let (connector, mut host) = host();
    let pool = Pool::builder().max_connections(1).build(connector).unwrap();

    let sent = spawn_send(&pool, get("/1"));
    let mut conn = host.accept().await;
    let req = conn.next_request().await.unwrap();
    assert_eq!(req.uri().path(), "/1");

    let (_chunks, body) = channel_body();
    conn.respond(http::Response::builder().status(200).body(body).unwrap());
    let res = timeout(WAIT, sent).await.unwrap().unwrap().unwrap();

    // Never read the entity; the default 1s window elapses.
    tokio::time::sleep(Duration::from_secs(2)).await;

    let mut entity = res.into_body();
    let err = match entity.next().await {
        Some(Err(err)) => err,
        other => panic!("expected a failed entity, got {:?}", other.map(|r| r.is_ok())),
    };
    assert!(err.is_subscription_timeout());
    let message = err.to_string();
    assert!(message.contains("was not subscribed after"), "{message}");
    assert!(message.contains("entity.discard_bytes()"), "{message}");
    assert!(message.contains("GET /1"), "{message}");

    // The connection was aborted along with the entity.
    assert!(timeout(WAIT, conn.next_request()).await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn connect_backoff_paces_attempts_and_recovers() {
    init_logs();
    let (connector, mut host) = host();
    host.set_failing(true);
    let pool = Pool::builder()
        .max_connections(2)
        .min_connections(1)
        .base_connection_backoff(Duration::from_millis(100))
        .max_connection_backoff(Duration::from_secs(2))
        .build(connector)
        .unwrap();

    // Let the warm-up make its first (failing) attempt.
    tokio::time::sleep(Duration::from_millis(10)).await;
    let initial = host.attempts();
    assert!(initial >= 1);

    let sent1 = spawn_send(&pool, get("/1"));
    let sent2 = spawn_send(&pool, get("/2"));

    // Roughly one second of failing factory: backoff must keep the number
    // of attempts small but non-zero.
    tokio::time::sleep(Duration::from_millis(950)).await;
    let extra = host.attempts() - initial;
    assert!(extra >= 2, "only {extra} extra attempts during backoff");
    assert!(extra < 6, "{extra} extra attempts, backoff not applied");

    host.set_failing(false);
    let mut conn = host.accept().await;
    for _ in 0..2 {
        let req = timeout(WAIT, conn.next_request()).await.unwrap().unwrap();
        conn.respond(echo(&req));
    }

    let res1 = timeout(WAIT, sent1).await.unwrap().unwrap().unwrap();
    assert_eq!(&res1.into_body().bytes().await.unwrap()[..], b"/1");
    let res2 = timeout(WAIT, sent2).await.unwrap().unwrap().unwrap();
    assert_eq!(&res2.into_body().bytes().await.unwrap()[..], b"/2");
}

#[tokio::test]
async fn server_close_between_requests_is_retried_transparently() {
    init_logs();
    let (connector, mut host) = host();
    let pool = Pool::builder().max_connections(1).build(connector).unwrap();

    let sent1 = spawn_send(&pool, get("/simple"));
    let mut conn1 = host.accept().await;
    let req1 = conn1.next_request().await.unwrap();
    conn1.respond(echo(&req1));
    let res1 = timeout(WAIT, sent1).await.unwrap().unwrap().unwrap();
    assert_eq!(&res1.into_body().bytes().await.unwrap()[..], b"/simple");

    // Server closes without a `Connection: close` header; the next request
    // may race onto the dying connection and must still get one response.
    conn1.close();
    let sent2 = spawn_send(&pool, get("/next"));

    let mut conn2 = host.accept().await;
    let req2 = timeout(WAIT, conn2.next_request()).await.unwrap().unwrap();
    assert_eq!(req2.uri().path(), "/next");
    conn2.respond(echo(&req2));

    let res2 = timeout(WAIT, sent2).await.unwrap().unwrap().unwrap();
    assert_eq!(&res2.into_body().bytes().await.unwrap()[..], b"/next");
    assert_eq!(host.attempts(), 2);
}

#[tokio::test]
async fn request_entity_failure_yields_exactly_one_error() {
    init_logs();
    let (connector, mut host) = host();
    let pool = Pool::builder().max_connections(1).build(connector).unwrap();

    let (chunks, body) = channel_body();
    let request = http::Request::post("/upload").body(body).unwrap();
    let sent = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.send_with_retries(request, 0).await })
    };

    let mut conn = host.accept().await;
    let req = conn.next_request().await.unwrap();
    let mut wire = req.into_body();

    chunks.send(Err("user stream broke".into())).unwrap();
    assert!(wire.next().await.unwrap().is_err());

    let err = timeout(WAIT, sent).await.unwrap().unwrap().unwrap_err();
    assert!(err.is_request_entity());

    // The connection was torn down.
    assert!(timeout(WAIT, conn.next_request()).await.unwrap().is_none());

    // A failing request entity is the user's own doing; the pool must not
    // report it at error level.
    let errors = logged_errors();
    assert!(errors.is_empty(), "unexpected error-level logs: {errors:?}");
}

#[tokio::test]
async fn connection_failure_mid_entity_fails_the_stream_only() {
    init_logs();
    let (connector, mut host) = host();
    let pool = Pool::builder().max_connections(1).build(connector).unwrap();

    let sent = spawn_send(&pool, get("/stream"));
    let mut conn = host.accept().await;
    let _req = conn.next_request().await.unwrap();
    let (chunks, body) = channel_body();
    conn.respond(http::Response::builder().status(200).body(body).unwrap());

    // The response resolves normally; the failure happens mid-entity.
    let res = timeout(WAIT, sent).await.unwrap().unwrap().unwrap();
    let mut entity = res.into_body();
    chunks.send(Ok(Bytes::from_static(b"chunk"))).unwrap();
    assert_eq!(&entity.next().await.unwrap().unwrap()[..], b"chunk");

    conn.fail("connection reset");
    let err = match timeout(WAIT, entity.next()).await.unwrap() {
        Some(Err(err)) => err,
        other => panic!("expected entity failure, got {:?}", other.map(|r| r.is_ok())),
    };
    assert!(err.is_connection());

    // The pool recovers with a fresh connection for the next request.
    let sent2 = spawn_send(&pool, get("/after"));
    let mut conn2 = host.accept().await;
    let req2 = conn2.next_request().await.unwrap();
    assert_eq!(req2.uri().path(), "/after");
    conn2.respond(echo(&req2));
    assert!(timeout(WAIT, sent2).await.unwrap().unwrap().is_ok());
}

#[tokio::test]
async fn head_response_with_content_length_does_not_stall_the_slot() {
    init_logs();
    let (connector, mut host) = host();
    let pool = Pool::builder().max_connections(1).build(connector).unwrap();

    let request = http::Request::head("/head").body(Body::empty()).unwrap();
    let sent = spawn_send(&pool, request);
    let mut conn = host.accept().await;
    let req = conn.next_request().await.unwrap();
    assert_eq!(req.method(), http::Method::HEAD);

    // The framing declares a body that will never be sent.
    let (_chunks, body) = channel_body();
    conn.respond(
        http::Response::builder()
            .status(200)
            .header(http::header::CONTENT_LENGTH, "10")
            .body(body)
            .unwrap(),
    );

    let res = timeout(WAIT, sent).await.unwrap().unwrap().unwrap();
    // Draining the (empty) entity must not block slot reuse.
    assert!(res.into_body().bytes().await.unwrap().is_empty());

    let sent2 = spawn_send(&pool, get("/after"));
    let req2 = timeout(WAIT, conn.next_request()).await.unwrap().unwrap();
    assert_eq!(req2.uri().path(), "/after");
    conn.respond(echo(&req2));
    assert!(timeout(WAIT, sent2).await.unwrap().unwrap().is_ok());
    assert_eq!(host.attempts(), 1);
}

#[tokio::test]
async fn responses_keep_admission_order_across_slots() {
    init_logs();
    let (connector, mut host) = host();
    let pool = Pool::builder().max_connections(2).build(connector).unwrap();

    let mut sent1 = spawn_send(&pool, get("/slow"));
    let mut conn1 = host.accept().await;
    let req1 = conn1.next_request().await.unwrap();

    let mut sent2 = spawn_send(&pool, get("/fast"));
    let mut conn2 = host.accept().await;
    let req2 = conn2.next_request().await.unwrap();

    // The second request finishes first on the wire but must not overtake
    // the first on the pool output.
    conn2.respond(echo(&req2));
    assert!(timeout(Duration::from_millis(300), &mut sent2).await.is_err());

    conn1.respond(echo(&req1));
    let res1 = timeout(WAIT, &mut sent1).await.unwrap().unwrap().unwrap();
    let res2 = timeout(WAIT, &mut sent2).await.unwrap().unwrap().unwrap();
    assert_eq!(&res1.into_body().bytes().await.unwrap()[..], b"/slow");
    assert_eq!(&res2.into_body().bytes().await.unwrap()[..], b"/fast");
}

#[tokio::test]
async fn warm_connections_are_opened_eagerly_and_reused() {
    init_logs();
    let (connector, mut host) = host();
    let pool = Pool::builder()
        .max_connections(2)
        .min_connections(2)
        .build(connector)
        .unwrap();

    let mut conn_a = host.accept().await;
    let mut conn_b = host.accept().await;
    assert_eq!(host.attempts(), 2);

    let sent = spawn_send(&pool, get("/warm"));
    let req = tokio::select! {
        req = conn_a.next_request() => {
            let req = req.unwrap();
            conn_a.respond(echo(&req));
            req
        }
        req = conn_b.next_request() => {
            let req = req.unwrap();
            conn_b.respond(echo(&req));
            req
        }
    };
    assert_eq!(req.uri().path(), "/warm");
    let res = timeout(WAIT, sent).await.unwrap().unwrap().unwrap();
    assert_eq!(&res.into_body().bytes().await.unwrap()[..], b"/warm");
    assert_eq!(host.attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn keep_alive_timeout_closes_idle_connections() {
    init_logs();
    let (connector, mut host) = host();
    let pool = Pool::builder()
        .max_connections(1)
        .keep_alive_timeout(Duration::from_secs(5))
        .build(connector)
        .unwrap();

    let sent = spawn_send(&pool, get("/1"));
    let mut conn = host.accept().await;
    let req = conn.next_request().await.unwrap();
    conn.respond(echo(&req));
    assert!(timeout(WAIT, sent).await.unwrap().unwrap().is_ok());

    // The idle connection is closed once the keep-alive window elapses.
    assert!(
        timeout(Duration::from_secs(60), conn.next_request())
            .await
            .unwrap()
            .is_none()
    );

    // The next request opens a fresh connection.
    let sent2 = spawn_send(&pool, get("/2"));
    let mut conn2 = host.accept().await;
    let req2 = conn2.next_request().await.unwrap();
    conn2.respond(echo(&req2));
    assert!(timeout(WAIT, sent2).await.unwrap().unwrap().is_ok());
    assert_eq!(host.attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn old_connections_are_not_reused_past_their_lifetime() {
    init_logs();
    let (connector, mut host) = host();
    let pool = Pool::builder()
        .max_connections(1)
        .max_connection_lifetime(Duration::from_secs(1))
        .build(connector)
        .unwrap();

    let sent = spawn_send(&pool, get("/1"));
    let mut conn = host.accept().await;
    let req = conn.next_request().await.unwrap();
    conn.respond(echo(&req));
    assert!(timeout(WAIT, sent).await.unwrap().unwrap().is_ok());

    tokio::time::sleep(Duration::from_secs(2)).await;

    // The idle connection is past its lifetime: it serves the request it
    // already holds open, but is discarded instead of going idle again.
    let sent2 = spawn_send(&pool, get("/2"));
    let req2 = timeout(WAIT, conn.next_request()).await.unwrap().unwrap();
    conn.respond(echo(&req2));
    assert!(timeout(WAIT, sent2).await.unwrap().unwrap().is_ok());
    assert!(timeout(WAIT, conn.next_request()).await.unwrap().is_none());

    let sent3 = spawn_send(&pool, get("/3"));
    let mut conn2 = host.accept().await;
    let req3 = conn2.next_request().await.unwrap();
    conn2.respond(echo(&req3));
    assert!(timeout(WAIT, sent3).await.unwrap().unwrap().is_ok());
    assert_eq!(host.attempts(), 2);
}

#[tokio::test]
async fn connection_close_header_discards_the_connection() {
    init_logs();
    let (connector, mut host) = host();
    let pool = Pool::builder().max_connections(1).build(connector).unwrap();

    let sent = spawn_send(&pool, get("/1"));
    let mut conn = host.accept().await;
    let req = conn.next_request().await.unwrap();
    conn.respond(
        http::Response::builder()
            .status(200)
            .header(http::header::CONNECTION, "close")
            .body(Body::from("/1"))
            .unwrap(),
    );
    let res = timeout(WAIT, sent).await.unwrap().unwrap().unwrap();
    assert_eq!(&res.into_body().bytes().await.unwrap()[..], b"/1");

    // The pool releases its side after the entity drained.
    assert!(timeout(WAIT, conn.next_request()).await.unwrap().is_none());

    let sent2 = spawn_send(&pool, get("/2"));
    let mut conn2 = host.accept().await;
    let req2 = conn2.next_request().await.unwrap();
    conn2.respond(echo(&req2));
    assert!(timeout(WAIT, sent2).await.unwrap().unwrap().is_ok());
    assert_eq!(host.attempts(), 2);
}

#[tokio::test]
async fn shutdown_fails_in_flight_requests() {
    init_logs();
    let (connector, mut host) = host();
    let pool = Pool::builder().max_connections(1).build(connector).unwrap();

    let sent = spawn_send(&pool, get("/1"));
    let mut conn = host.accept().await;
    let _req = conn.next_request().await.unwrap();

    let survivor = pool.clone();
    pool.shutdown().await;

    let err = timeout(WAIT, sent).await.unwrap().unwrap().unwrap_err();
    assert!(err.is_shutdown());

    // The pool accepts nothing further.
    let err = survivor.send(get("/2")).await.unwrap_err();
    assert!(err.is_shutdown());
}

#[tokio::test]
async fn full_admission_buffer_applies_backpressure() {
    init_logs();
    let (connector, mut host) = host();
    let pool = Pool::builder()
        .max_connections(1)
        .max_open_requests(1)
        .build(connector)
        .unwrap();

    let sent1 = spawn_send(&pool, get("/1"));
    let mut conn = host.accept().await;
    let req1 = conn.next_request().await.unwrap();

    let sent2 = spawn_send(&pool, get("/2"));
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The buffer holds one waiting request; the third send suspends.
    let mut sent3 = spawn_send(&pool, get("/3"));
    assert!(timeout(Duration::from_millis(300), &mut sent3).await.is_err());

    conn.respond(echo(&req1));
    let req2 = timeout(WAIT, conn.next_request()).await.unwrap().unwrap();
    conn.respond(echo(&req2));
    let req3 = timeout(WAIT, conn.next_request()).await.unwrap().unwrap();
    conn.respond(echo(&req3));

    for (sent, path) in [(sent1, "/1"), (sent2, "/2")] {
        let res = timeout(WAIT, sent).await.unwrap().unwrap().unwrap();
        assert_eq!(res.into_body().bytes().await.unwrap(), path);
    }
    let res3 = timeout(WAIT, &mut sent3).await.unwrap().unwrap().unwrap();
    assert_eq!(&res3.into_body().bytes().await.unwrap()[..], b"/3");
}

#[tokio::test]
async fn discard_bytes_counts_as_subscription_and_drain() {
    init_logs();
    let (connector, mut host) = host();
    let pool = Pool::builder().max_connections(1).build(connector).unwrap();

    let sent = spawn_send(&pool, get("/discarded"));
    let mut conn = host.accept().await;
    let _req = conn.next_request().await.unwrap();
    let (chunks, body) = channel_body();
    conn.respond(http::Response::builder().status(200).body(body).unwrap());

    let res = timeout(WAIT, sent).await.unwrap().unwrap().unwrap();
    let discarding = tokio::spawn(res.into_body().discard_bytes());

    chunks.send(Ok(Bytes::from_static(b"unwanted"))).unwrap();
    drop(chunks);
    timeout(WAIT, discarding).await.unwrap().unwrap().unwrap();

    // Discarding drained the entity: the slot is reusable.
    let sent2 = spawn_send(&pool, get("/after"));
    let req2 = timeout(WAIT, conn.next_request()).await.unwrap().unwrap();
    assert_eq!(req2.uri().path(), "/after");
    conn.respond(echo(&req2));
    assert!(timeout(WAIT, sent2).await.unwrap().unwrap().is_ok());
    assert_eq!(host.attempts(), 1);
}

#[tokio::test]
async fn request_returns_a_usable_future() {
    init_logs();
    let (connector, mut host) = host();
    let pool = Pool::builder().max_connections(1).build(connector).unwrap();

    let future = pool.request(get("/future"));
    let mut conn = host.accept().await;
    let req = conn.next_request().await.unwrap();
    conn.respond(echo(&req));

    let res = timeout(WAIT, future).await.unwrap().unwrap();
    assert_eq!(&res.into_body().bytes().await.unwrap()[..], b"/future");
}

#[tokio::test]
async fn early_response_waits_for_the_request_body() {
    init_logs();
    let (connector, mut host) = host();
    let pool = Pool::builder().max_connections(1).build(connector).unwrap();

    let (chunks, body) = channel_body();
    let request = http::Request::post("/upload").body(body).unwrap();
    let sent = spawn_send(&pool, request);

    let mut conn = host.accept().await;
    let req = conn.next_request().await.unwrap();
    // Respond before consuming any of the request body.
    conn.respond(
        http::Response::builder()
            .status(200)
            .body(Body::from("early"))
            .unwrap(),
    );

    // The early response is surfaced immediately.
    let res = timeout(WAIT, sent).await.unwrap().unwrap().unwrap();
    assert_eq!(&res.into_body().bytes().await.unwrap()[..], b"early");

    // But the slot is not reusable until the upload finishes.
    let sent2 = spawn_send(&pool, get("/next"));
    assert!(
        timeout(Duration::from_millis(300), conn.next_request())
            .await
            .is_err(),
        "request dispatched while the previous upload was still open"
    );

    let mut wire = req.into_body();
    chunks.send(Ok(Bytes::from_static(b"data"))).unwrap();
    assert_eq!(&wire.next().await.unwrap().unwrap()[..], b"data");
    drop(chunks);
    assert!(wire.next().await.is_none());

    let req2 = timeout(WAIT, conn.next_request()).await.unwrap().unwrap();
    assert_eq!(req2.uri().path(), "/next");
    conn.respond(echo(&req2));
    assert!(timeout(WAIT, sent2).await.unwrap().unwrap().is_ok());
    assert_eq!(host.attempts(), 1);
}
