// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_util::codec::Framed;

/// Scripted broker: accepts one connection and runs `script` over it.
async fn fake_broker<F, Fut>(script: F) -> String
where
    F: FnOnce(Framed<TcpStream, FrameCodec>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        script(Framed::new(stream, FrameCodec)).await;
    });
    address
}

#[tokio::test]
async fn connect_refused_reports_address() {
    // Port 1 is essentially never listening.
    let err = TcpBroker::new().connect("127.0.0.1:1").await.unwrap_err();
    assert!(matches!(err, BrokerError::ConnectFailed { .. }));
    assert_eq!(err.address(), "127.0.0.1:1");
}

#[tokio::test]
async fn subscribe_grab_assign_flow() {
    let address = fake_broker(|mut framed| async move {
        assert_eq!(
            framed.next().await.unwrap().unwrap(),
            Frame::Subscribe {
                queues: vec!["host".to_string()]
            }
        );
        assert_eq!(framed.next().await.unwrap().unwrap(), Frame::Grab);
        framed
            .send(Frame::Assign {
                handle: "H:1".into(),
                queue: "host".into(),
                payload: b"job".to_vec(),
            })
            .await
            .unwrap();
        // Expect the response for the handled job.
        assert_eq!(
            framed.next().await.unwrap().unwrap(),
            Frame::Respond {
                handle: "H:1".into(),
                payload: b"OK".to_vec(),
            }
        );
    })
    .await;

    let mut session = TcpBroker::new().connect(&address).await.unwrap();
    session.subscribe(&["host".to_string()]).await.unwrap();
    let delivery = session.next_job().await.unwrap();
    assert_eq!(delivery.handle, "H:1");
    assert_eq!(delivery.queue, "host");
    assert_eq!(delivery.payload, b"job");
    session.respond("H:1", b"OK").await.unwrap();
}

#[tokio::test]
async fn no_job_then_wake_regrabs() {
    let address = fake_broker(|mut framed| async move {
        assert_eq!(framed.next().await.unwrap().unwrap(), Frame::Grab);
        framed.send(Frame::NoJob).await.unwrap();
        framed.send(Frame::Wake).await.unwrap();
        assert_eq!(framed.next().await.unwrap().unwrap(), Frame::Grab);
        framed
            .send(Frame::Assign {
                handle: "H:2".into(),
                queue: "service".into(),
                payload: vec![],
            })
            .await
            .unwrap();
    })
    .await;

    let mut session = TcpBroker::new().connect(&address).await.unwrap();
    let delivery = session.next_job().await.unwrap();
    assert_eq!(delivery.handle, "H:2");
}

#[tokio::test]
async fn submit_reaches_broker() {
    let address = fake_broker(|mut framed| async move {
        assert_eq!(
            framed.next().await.unwrap().unwrap(),
            Frame::Submit {
                queue: "check_results".into(),
                payload: b"result".to_vec(),
            }
        );
    })
    .await;

    let mut session = TcpBroker::new().connect(&address).await.unwrap();
    session.submit("check_results", b"result").await.unwrap();
}

#[tokio::test]
async fn broker_hangup_surfaces_disconnect() {
    let address = fake_broker(|mut framed| async move {
        // Take the grab, then hang up without assigning anything.
        let _ = framed.next().await;
    })
    .await;

    let mut session = TcpBroker::new().connect(&address).await.unwrap();
    let err = session.next_job().await.unwrap_err();
    assert!(matches!(err, BrokerError::Disconnected { .. }));
    assert_eq!(err.address(), address);
}

#[tokio::test]
async fn buffered_assignment_survives_cancellation() {
    let address = fake_broker(|mut framed| async move {
        assert_eq!(framed.next().await.unwrap().unwrap(), Frame::Grab);
        // Assign only after the client has abandoned its first call.
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        framed
            .send(Frame::Assign {
                handle: "H:3".into(),
                queue: "host".into(),
                payload: vec![1],
            })
            .await
            .unwrap();
        // Keep the socket open while the client picks the job up later.
        let _ = framed.next().await;
    })
    .await;

    let mut session = TcpBroker::new().connect(&address).await.unwrap();
    {
        // Poll next_job long enough to send the grab, then drop the future.
        let job = session.next_job();
        tokio::pin!(job);
        let poll = tokio::time::timeout(std::time::Duration::from_millis(50), &mut job).await;
        assert!(poll.is_err(), "no assignment should arrive this early");
    }
    // Give the delayed assignment time to land in the session buffer.
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    // The assignment was buffered and is handed out on the next call.
    let delivery = session.next_job().await.unwrap();
    assert_eq!(delivery.handle, "H:3");
    session.shutdown().await;
    session.close().await;
}
