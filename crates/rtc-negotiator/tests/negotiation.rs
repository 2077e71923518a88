use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use rtc_negotiator::{
    GatherOutcome, GatheringScript, NegotiationError, Negotiator, Phase, Role, ScriptedEngine,
    SdpKind,
};
use tokio::time::{Instant, timeout};

const REMOTE_OFFER: &str = "v=0\r\no=- 42 1 IN IP4 203.0.113.7\r\ns=-\r\nt=0 0\r\n";
const REMOTE_ANSWER: &str = "v=0\r\no=- 43 1 IN IP4 203.0.113.8\r\ns=-\r\nt=0 0\r\n";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[tokio::test]
async fn accepted_offer_yields_answer() {
    init_tracing();
    let engine = ScriptedEngine::new(GatheringScript::Immediate);
    let negotiator = Negotiator::new(Role::Answerer, engine.clone());

    negotiator.accept_offer(REMOTE_OFFER).await.expect("offer accepted");
    let answer = negotiator
        .produce_answer(Duration::from_secs(10))
        .await
        .expect("answer");

    assert_eq!(answer.kind, SdpKind::Answer);
    assert!(!answer.body.is_empty());
    assert!(answer.body.contains("a=candidate:"));
    assert_eq!(negotiator.phase(), Phase::GatherComplete);
    assert_eq!(engine.remote().map(|d| d.body), Some(REMOTE_OFFER.to_string()));
}

#[tokio::test]
async fn malformed_offer_is_rejected_without_side_effects() {
    init_tracing();
    let engine = ScriptedEngine::new(GatheringScript::Immediate);
    let negotiator = Negotiator::new(Role::Answerer, engine.clone());

    for text in ["", "not sdp at all"] {
        let err = negotiator.accept_offer(text).await.expect_err("rejected");
        assert!(matches!(err, NegotiationError::InvalidDescription(_)));
    }
    assert!(engine.remote().is_none());
    assert_eq!(negotiator.phase(), Phase::New);
}

#[tokio::test(start_paused = true)]
async fn gathering_that_never_completes_still_produces_an_answer() {
    init_tracing();
    let engine = ScriptedEngine::new(GatheringScript::Never);
    let negotiator = Negotiator::new(Role::Answerer, engine);
    negotiator.accept_offer(REMOTE_OFFER).await.expect("offer accepted");

    let budget = Duration::from_millis(10_000);
    let started = Instant::now();
    let answer = negotiator.produce_answer(budget).await.expect("answer");
    let waited = started.elapsed();

    assert_eq!(answer.kind, SdpKind::Answer);
    assert!(answer.body.starts_with("v=0"));
    assert!(!answer.body.contains("a=candidate:"));
    assert!(waited >= budget);
    assert!(waited < budget + Duration::from_millis(50));
    assert_eq!(negotiator.phase(), Phase::GatherTimeout);
}

#[tokio::test(start_paused = true)]
async fn gathering_wait_ends_as_soon_as_gathering_completes() {
    init_tracing();
    let engine = ScriptedEngine::new(GatheringScript::After(Duration::from_millis(300)));
    let negotiator = Negotiator::new(Role::Answerer, engine);
    negotiator.accept_offer(REMOTE_OFFER).await.expect("offer accepted");

    let started = Instant::now();
    let answer = negotiator
        .produce_answer(Duration::from_secs(10))
        .await
        .expect("answer");

    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(answer.body.contains("a=candidate:"));
}

#[tokio::test]
async fn offerer_flow_applies_answer_once() {
    init_tracing();
    let engine = ScriptedEngine::new(GatheringScript::Immediate);
    let negotiator = Negotiator::new(Role::Offerer, engine);

    assert!(matches!(
        negotiator.accept_answer(REMOTE_ANSWER).await,
        Err(NegotiationError::NoLocalOffer)
    ));

    let offer = negotiator.produce_offer().await.expect("offer");
    assert_eq!(offer.kind, SdpKind::Offer);
    assert_eq!(
        negotiator.wait_for_gathering(Duration::from_secs(1)).await,
        GatherOutcome::Complete
    );
    let complete = negotiator.local_description().await.expect("local");
    assert!(complete.body.starts_with(&offer.body));

    assert!(matches!(
        negotiator.accept_answer("garbage").await,
        Err(NegotiationError::InvalidDescription(_))
    ));
    negotiator.accept_answer(REMOTE_ANSWER).await.expect("answer accepted");
    assert!(matches!(
        negotiator.accept_answer(REMOTE_ANSWER).await,
        Err(NegotiationError::RemoteAlreadySet)
    ));
}

#[tokio::test]
async fn failure_releases_owned_resources_exactly_once() {
    init_tracing();
    let engine = ScriptedEngine::new(GatheringScript::Immediate);
    let negotiator = Negotiator::new(Role::Answerer, engine.clone());
    negotiator.accept_offer(REMOTE_OFFER).await.expect("offer accepted");

    let released = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&released);
    negotiator.own_cleanup(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let (alive_tx, alive_rx) = tokio::sync::oneshot::channel::<()>();
    negotiator.own_task(tokio::spawn(async move {
        let _alive = alive_tx;
        std::future::pending::<()>().await;
    }));

    engine.fail_connection();
    timeout(Duration::from_secs(5), negotiator.closed())
        .await
        .expect("closed after failure");

    negotiator.close().await;
    negotiator.close().await;

    assert!(negotiator.is_closed());
    assert_eq!(negotiator.phase(), Phase::Closed);
    assert_eq!(released.load(Ordering::SeqCst), 1);
    assert_eq!(engine.close_calls(), 1);
    assert!(alive_rx.await.is_err());
    assert!(matches!(
        negotiator.produce_answer(Duration::from_millis(1)).await,
        Err(NegotiationError::Closed)
    ));
}

#[tokio::test(start_paused = true)]
async fn failure_during_gathering_aborts_the_answer() {
    init_tracing();
    let engine = ScriptedEngine::new(GatheringScript::Never);
    let negotiator = Negotiator::new(Role::Answerer, engine.clone());
    negotiator.accept_offer(REMOTE_OFFER).await.expect("offer accepted");

    let failing = engine.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        failing.fail_connection();
    });

    let started = Instant::now();
    let result = negotiator.produce_answer(Duration::from_secs(10)).await;

    assert!(
        matches!(
            result,
            Err(NegotiationError::ConnectionFailed) | Err(NegotiationError::Closed)
        ),
        "got {result:?}"
    );
    assert!(started.elapsed() < Duration::from_secs(1));
    timeout(Duration::from_secs(5), negotiator.closed())
        .await
        .expect("closed after failure");
    assert_eq!(engine.close_calls(), 1);
}

#[tokio::test]
async fn gathering_wait_on_a_closed_connection_is_interrupted() {
    let negotiator = Negotiator::new(
        Role::Offerer,
        ScriptedEngine::new(GatheringScript::Never),
    );
    negotiator.produce_offer().await.expect("offer");
    negotiator.close().await;
    assert_eq!(
        negotiator.wait_for_gathering(Duration::from_secs(30)).await,
        GatherOutcome::Interrupted
    );
}

#[tokio::test]
async fn wait_connected_reports_each_outcome() {
    init_tracing();
    let engine = ScriptedEngine::new(GatheringScript::Immediate);
    let connected = Negotiator::new(Role::Offerer, engine.clone());
    engine.connect();
    connected
        .wait_connected(Duration::from_secs(1))
        .await
        .expect("connected");
    assert_eq!(connected.phase(), Phase::Connected);

    let engine = ScriptedEngine::new(GatheringScript::Immediate);
    let failed = Negotiator::new(Role::Offerer, engine.clone());
    engine.fail_connection();
    let err = failed
        .wait_connected(Duration::from_secs(1))
        .await
        .expect_err("failed");
    assert!(matches!(
        err,
        NegotiationError::ConnectionFailed | NegotiationError::Closed
    ));
}

#[tokio::test(start_paused = true)]
async fn wait_connected_times_out() {
    let engine = ScriptedEngine::new(GatheringScript::Immediate);
    let negotiator = Negotiator::new(Role::Offerer, engine);
    assert!(matches!(
        negotiator.wait_connected(Duration::from_secs(3)).await,
        Err(NegotiationError::ConnectTimeout(_))
    ));
}
