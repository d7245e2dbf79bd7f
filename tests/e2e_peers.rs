//! Two-peer negotiation tests.
//!
//! Two coordinators with loopback transports exchange messages through
//! relay tasks, the way a host would wire them to a signaling channel.

use std::sync::Arc;
use std::time::Duration;

use roap::protocol::MAX_RETRIES;
use roap::{
    CoordinatorEvent, ErrorKind, EventReceiver, Failure, LoopbackTransport, MessageType,
    NegotiationConfig, NegotiationMessage, NegotiationState, RoapError, SessionCoordinator,
    SessionSnapshot,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

struct Peer {
    session: Arc<SessionCoordinator>,
    transport: Arc<LoopbackTransport>,
}

/// Relay `from`'s outbound messages into `to`, recording everything sent.
fn relay(
    mut events: EventReceiver,
    to: Arc<SessionCoordinator>,
    log: mpsc::UnboundedSender<CoordinatorEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let CoordinatorEvent::OutboundMessage(message) = &event {
                let _ = to.message_received(message.clone());
            }
            let _ = log.send(event);
        }
    })
}

fn peer(label: &str, config: &NegotiationConfig) -> (Peer, EventReceiver) {
    let transport = Arc::new(LoopbackTransport::new(label));
    let (session, events) = SessionCoordinator::new(transport.clone(), config);
    (
        Peer {
            session: Arc::new(session),
            transport,
        },
        events,
    )
}

struct Pair {
    alice: Peer,
    bob: Peer,
    alice_sent: mpsc::UnboundedReceiver<CoordinatorEvent>,
    bob_sent: mpsc::UnboundedReceiver<CoordinatorEvent>,
}

fn pair(alice_config: &NegotiationConfig, bob_config: &NegotiationConfig) -> Pair {
    let (alice, alice_events) = peer("alice", alice_config);
    let (bob, bob_events) = peer("bob", bob_config);
    let (alice_log, alice_sent) = mpsc::unbounded_channel();
    let (bob_log, bob_sent) = mpsc::unbounded_channel();
    relay(alice_events, Arc::clone(&bob.session), alice_log);
    relay(bob_events, Arc::clone(&alice.session), bob_log);
    Pair {
        alice,
        bob,
        alice_sent,
        bob_sent,
    }
}

async fn settled(peer: &Peer) -> SessionSnapshot {
    timeout(
        Duration::from_secs(2),
        peer.session
            .wait_for(|s| s.state == NegotiationState::Idle || s.state.is_terminal()),
    )
    .await
    .expect("timed out")
    .expect("session closed")
}

fn drain(rx: &mut mpsc::UnboundedReceiver<CoordinatorEvent>) -> Vec<CoordinatorEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Collect logged events up to and including the peer's terminal failure.
async fn until_failed(rx: &mut mpsc::UnboundedReceiver<CoordinatorEvent>) -> Vec<CoordinatorEvent> {
    let mut events = Vec::new();
    loop {
        let event = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out")
            .expect("relay stopped");
        let done = matches!(event, CoordinatorEvent::NegotiationFailed(_));
        events.push(event);
        if done {
            return events;
        }
    }
}

fn outbound(events: &[CoordinatorEvent]) -> Vec<NegotiationMessage> {
    events
        .iter()
        .filter_map(|e| match e {
            CoordinatorEvent::OutboundMessage(m) => Some(m.clone()),
            CoordinatorEvent::NegotiationFailed(_) => None,
        })
        .collect()
}

#[tokio::test]
async fn test_two_peer_offer_answer() {
    let mut p = pair(
        &NegotiationConfig::default(),
        &NegotiationConfig::default().with_tie_breaker(42),
    );

    timeout(Duration::from_secs(2), p.alice.session.initiate_offer())
        .await
        .expect("timed out")
        .unwrap();

    // Bob reaches idle once alice's OK is relayed.
    let bob = timeout(
        Duration::from_secs(2),
        p.bob.session.wait_for(|s| s.state == NegotiationState::Idle && s.sequence_number == 1),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(bob.sequence_number, 1);
    assert_eq!(settled(&p.alice).await.sequence_number, 1);

    let kinds: Vec<_> = outbound(&drain(&mut p.alice_sent))
        .into_iter()
        .map(|m| m.message_type)
        .collect();
    assert_eq!(
        kinds,
        vec![MessageType::Offer, MessageType::Ok]
    );
    assert_eq!(p.alice.transport.offers_created(), 1);
    assert_eq!(p.alice.transport.answers_applied(), 1);
    assert_eq!(p.bob.transport.answers_created(), 1);
    assert!(p.alice.transport.max_in_flight() <= 1);
    assert!(p.bob.transport.max_in_flight() <= 1);
}

#[tokio::test]
async fn test_peers_alternate_offers() {
    let p = pair(
        &NegotiationConfig::default(),
        &NegotiationConfig::default().with_tie_breaker(42),
    );

    for round in 0..3 {
        let (offerer, answerer) = if round % 2 == 0 {
            (&p.alice, &p.bob)
        } else {
            (&p.bob, &p.alice)
        };
        timeout(Duration::from_secs(2), offerer.session.initiate_offer())
            .await
            .unwrap()
            .unwrap();
        let expected = round + 1;
        timeout(
            Duration::from_secs(2),
            answerer
                .session
                .wait_for(|s| s.state == NegotiationState::Idle && s.sequence_number == expected),
        )
        .await
        .unwrap()
        .unwrap();
    }

    assert_eq!(p.alice.session.sequence_number(), 3);
    assert_eq!(p.bob.session.sequence_number(), 3);
}

#[tokio::test]
async fn test_glare_with_distinct_tie_breakers() {
    let mut p = pair(
        &NegotiationConfig::default(),
        &NegotiationConfig::default().with_tie_breaker(42),
    );

    let (a, b) = tokio::join!(
        p.alice.session.initiate_offer(),
        p.bob.session.initiate_offer()
    );

    // Each side rejected the other's offer with CONFLICT, which is final.
    assert!(matches!(a, Err(RoapError::Remote(ErrorKind::Conflict))));
    assert!(matches!(b, Err(RoapError::Remote(ErrorKind::Conflict))));
    assert_eq!(settled(&p.alice).await.state, NegotiationState::RemoteError);
    assert_eq!(settled(&p.bob).await.state, NegotiationState::RemoteError);

    let alice_events = until_failed(&mut p.alice_sent).await;
    assert!(outbound(&alice_events).contains(&NegotiationMessage::error(1, ErrorKind::Conflict)));
    assert!(alice_events.contains(&CoordinatorEvent::NegotiationFailed(Failure::Remote(
        ErrorKind::Conflict
    ))));
}

#[tokio::test]
async fn test_glare_with_identical_tie_breakers_exhausts_retries() {
    let mut p = pair(&NegotiationConfig::default(), &NegotiationConfig::default());

    let (a, b) = tokio::join!(
        p.alice.session.initiate_offer(),
        p.bob.session.initiate_offer()
    );
    assert!(a.is_err());
    assert!(b.is_err());

    // Neither side ever reaches idle, and every offer draws a reply at its
    // own seq, so each side spends its whole retry budget. Which error ends
    // the last round (DOUBLECONFLICT, OUT_OF_ORDER or INVALID_STATE) depends
    // on how the final offers cross.
    for peer in [&p.alice, &p.bob] {
        let snapshot = settled(peer).await;
        assert_eq!(snapshot.state, NegotiationState::RemoteError);
        assert_eq!(snapshot.sequence_number, 1 + u64::from(MAX_RETRIES));
        assert_eq!(snapshot.retry_count, MAX_RETRIES);
        assert_eq!(peer.transport.offers_created(), 1 + u64::from(MAX_RETRIES));
    }

    // Bob's first offer lands either mid-glare or after alice already moved
    // on to seq 2.
    let sent = outbound(&until_failed(&mut p.alice_sent).await);
    let first_reply = sent
        .iter()
        .find(|m| m.message_type == MessageType::Error && m.seq == 1)
        .expect("no reply to the first offer");
    match first_reply.error_type {
        Some(ErrorKind::DoubleConflict) => assert!(first_reply.retry_after.is_some()),
        Some(ErrorKind::OutOfOrder) => assert!(first_reply.retry_after.is_none()),
        other => panic!("unexpected reply {other:?}"),
    }
    let offers: Vec<_> = sent
        .iter()
        .filter(|m| m.message_type == MessageType::Offer)
        .map(|m| m.seq)
        .collect();
    assert_eq!(offers, vec![1, 2, 3]);
    drain(&mut p.bob_sent);
}

#[tokio::test]
async fn test_offer_failure_reaches_both_peers() {
    let (alice, alice_events) = {
        let transport = Arc::new(LoopbackTransport::new("alice").with_offer_failure());
        let (session, events) =
            SessionCoordinator::new(transport.clone(), &NegotiationConfig::default());
        (
            Peer {
                session: Arc::new(session),
                transport,
            },
            events,
        )
    };
    let (bob, bob_events) = peer("bob", &NegotiationConfig::default().with_tie_breaker(42));
    let (alice_log, mut alice_sent) = mpsc::unbounded_channel();
    let (bob_log, _bob_sent) = mpsc::unbounded_channel();
    relay(alice_events, Arc::clone(&bob.session), alice_log);
    relay(bob_events, Arc::clone(&alice.session), bob_log);

    let err = alice.session.initiate_offer().await.unwrap_err();
    assert!(matches!(err, RoapError::Transport(_)));
    assert_eq!(settled(&alice).await.state, NegotiationState::BrowserError);
    assert_eq!(alice.transport.offers_created(), 0);

    let sent = outbound(&until_failed(&mut alice_sent).await);
    assert_eq!(sent, vec![NegotiationMessage::error(1, ErrorKind::Failed)]);
    // Bob is idle at seq 0, so a FAILED for seq 1 changes nothing there.
    assert_eq!(bob.session.state(), NegotiationState::Idle);
}

#[tokio::test]
async fn test_answerer_failure_ends_offer() {
    let (alice, alice_events) = peer("alice", &NegotiationConfig::default());
    let bob_transport = Arc::new(LoopbackTransport::new("bob").with_remote_offer_failure());
    let (bob, bob_events) = SessionCoordinator::new(
        bob_transport.clone(),
        &NegotiationConfig::default().with_tie_breaker(42),
    );
    let bob = Arc::new(bob);
    let (alice_log, _alice_sent) = mpsc::unbounded_channel();
    let (bob_log, mut bob_sent) = mpsc::unbounded_channel();
    relay(alice_events, Arc::clone(&bob), alice_log);
    relay(bob_events, Arc::clone(&alice.session), bob_log);

    let err = alice.session.initiate_offer().await.unwrap_err();
    assert!(matches!(err, RoapError::Remote(ErrorKind::Failed)));
    assert_eq!(settled(&alice).await.state, NegotiationState::RemoteError);

    let sent = outbound(&until_failed(&mut bob_sent).await);
    assert_eq!(sent, vec![NegotiationMessage::error(1, ErrorKind::Failed)]);
    assert_eq!(bob.state(), NegotiationState::BrowserError);
    assert_eq!(bob_transport.answers_created(), 0);
}

#[tokio::test]
async fn test_answer_application_failure() {
    let alice_transport = Arc::new(LoopbackTransport::new("alice").with_remote_answer_failure());
    let (alice, alice_events) =
        SessionCoordinator::new(alice_transport.clone(), &NegotiationConfig::default());
    let alice = Arc::new(alice);
    let (bob, bob_events) = peer("bob", &NegotiationConfig::default().with_tie_breaker(42));
    let (alice_log, mut alice_sent) = mpsc::unbounded_channel();
    let (bob_log, _bob_sent) = mpsc::unbounded_channel();
    relay(alice_events, Arc::clone(&bob.session), alice_log);
    relay(bob_events, Arc::clone(&alice), bob_log);

    let err = alice.initiate_offer().await.unwrap_err();
    assert!(matches!(err, RoapError::Transport(_)));

    let sent = outbound(&until_failed(&mut alice_sent).await);
    assert_eq!(sent.last(), Some(&NegotiationMessage::error(1, ErrorKind::Failed)));
    assert_eq!(alice_transport.answers_applied(), 0);

    // Bob was waiting for OK and takes the FAILED as final.
    let bob = settled(&bob).await;
    assert_eq!(bob.state, NegotiationState::RemoteError);
}

#[tokio::test]
async fn test_resume_continues_sequence() {
    let p = pair(
        &NegotiationConfig::default(),
        &NegotiationConfig::default().with_tie_breaker(42),
    );
    p.alice.session.initiate_offer().await.unwrap();
    let last = p.alice.session.sequence_number();
    p.alice.session.close();

    let (resumed, mut events) = SessionCoordinator::resume(
        Arc::new(LoopbackTransport::new("alice-2")),
        &NegotiationConfig::default(),
        last,
    );
    assert_eq!(resumed.sequence_number(), last);
    assert_ne!(resumed.id(), p.alice.session.id());

    let resumed = Arc::new(resumed);
    let offering = {
        let resumed = Arc::clone(&resumed);
        tokio::spawn(async move { resumed.initiate_offer().await })
    };

    let offer = match timeout(Duration::from_secs(2), events.recv()).await.unwrap() {
        Some(CoordinatorEvent::OutboundMessage(m)) => m,
        other => panic!("expected offer, got {other:?}"),
    };
    assert_eq!(offer.seq, last + 1);
    assert_eq!(offer.message_type, MessageType::Offer);

    resumed.close();
    assert!(matches!(offering.await.unwrap(), Err(RoapError::SessionClosed)));
}
