mod common;

use common::*;
use parley_stream::{ChunkPoll, StreamPhase, StreamingConfig};
use parley_types::{Role, Turn, APOLOGY_TEXT, FALLBACK_TEXT};
use std::collections::HashSet;
use std::time::Duration;

const CALL: &str = "CA0001";

#[tokio::test]
async fn reply_is_delivered_in_sentence_chunks_and_folded_once() {
    let source = QueuedSource::new(vec![scripted(&["Hello", " there.", "How", " are", " you?"])]);
    let (coordinator, calls) = coordinator_for(source.clone(), test_config(), CALL);

    coordinator.start(CALL, "hi", calls.history(CALL)).await;
    let chunks = drain(&coordinator, CALL).await;
    assert_eq!(chunks, vec!["Hello there.", "How are you?"]);

    // Extra polls after completion must not fold again.
    for _ in 0..3 {
        assert!(coordinator.is_complete(CALL));
        assert_eq!(coordinator.next_chunk(CALL), None);
    }
    assert!(coordinator.cleanup(CALL));

    assert_eq!(
        calls.history(CALL),
        vec![Turn::user("hi"), Turn::assistant("Hello there.How are you?")]
    );
    assert_eq!(source.prompts(), vec![("hi".to_string(), 0)]);
}

#[tokio::test]
async fn later_turns_see_earlier_history() {
    let source = QueuedSource::new(vec![scripted(&["One."]), scripted(&["Two."])]);
    let (coordinator, calls) = coordinator_for(source.clone(), test_config(), CALL);

    coordinator.start(CALL, "first", calls.history(CALL)).await;
    drain(&coordinator, CALL).await;
    coordinator.cleanup(CALL);

    coordinator.start(CALL, "second", calls.history(CALL)).await;
    assert_eq!(drain(&coordinator, CALL).await, vec!["Two."]);

    assert_eq!(
        source.prompts(),
        vec![("first".to_string(), 0), ("second".to_string(), 2)]
    );
    let roles: Vec<_> = calls.history(CALL).iter().map(|t| t.role).collect();
    assert_eq!(
        roles,
        vec![Role::User, Role::Assistant, Role::User, Role::Assistant]
    );
}

#[tokio::test]
async fn small_queue_preserves_order_under_backpressure() {
    let expected: Vec<String> = (0..50).map(|i| format!("word{} ", i)).collect();
    let source = QueuedSource::new(vec![fragments(expected.clone())]);
    let config = StreamingConfig {
        chunk_queue_capacity: 2,
        ..test_config()
    };
    let (coordinator, calls) = coordinator_for(source, config, CALL);

    coordinator.start(CALL, "count", Vec::new()).await;
    let chunks = drain(&coordinator, CALL).await;

    assert_eq!(chunks, expected);
    assert_eq!(calls.history(CALL)[1].text, expected.concat());
}

#[tokio::test]
async fn completion_waits_for_queued_chunks_and_stays_true() {
    let source = QueuedSource::new(vec![scripted(&["One. ", "Two. ", "Three."])]);
    let (coordinator, _calls) = coordinator_for(source, test_config(), CALL);

    coordinator.start(CALL, "count", Vec::new()).await;
    wait_until(|| coordinator.phase(CALL) == Some(StreamPhase::Draining)).await;

    assert!(!coordinator.is_complete(CALL));
    assert_eq!(coordinator.next_chunk(CALL).as_deref(), Some("One. "));
    assert!(!coordinator.is_complete(CALL));
    assert_eq!(coordinator.next_chunk(CALL).as_deref(), Some("Two. "));
    assert!(!coordinator.is_complete(CALL));

    let last = coordinator.poll(CALL);
    assert_eq!(
        last,
        ChunkPoll {
            chunk: Some("Three.".to_string()),
            complete: true,
        }
    );
    assert_eq!(coordinator.phase(CALL), Some(StreamPhase::Finished));

    for _ in 0..5 {
        assert!(coordinator.is_complete(CALL));
    }

    coordinator.cleanup(CALL);
    assert!(coordinator.is_complete(CALL));
    assert_eq!(coordinator.phase(CALL), None);
}

#[tokio::test]
async fn empty_queue_while_producing_is_not_complete() {
    let (gate, stream) = gated();
    let source = QueuedSource::new(vec![stream]);
    let (coordinator, calls) = coordinator_for(source, test_config(), CALL);

    coordinator.start(CALL, "hello?", Vec::new()).await;
    assert_eq!(coordinator.phase(CALL), Some(StreamPhase::Producing));
    assert_eq!(
        coordinator.poll(CALL),
        ChunkPoll {
            chunk: None,
            complete: false,
        }
    );

    gate.send(Ok("Still here. ".to_string())).unwrap();
    let mut first = None;
    wait_until(|| {
        first = coordinator.next_chunk(CALL);
        first.is_some()
    })
    .await;
    assert_eq!(first.as_deref(), Some("Still here. "));
    assert!(!coordinator.is_complete(CALL));
    assert!(calls.history(CALL).is_empty());

    drop(gate);
    assert!(drain(&coordinator, CALL).await.is_empty());
    assert_eq!(
        calls.history(CALL),
        vec![Turn::user("hello?"), Turn::assistant("Still here. ")]
    );
}

#[tokio::test]
async fn unknown_call_is_complete_and_empty() {
    let (coordinator, _calls) = coordinator_for(QueuedSource::new(Vec::new()), test_config(), CALL);

    assert_eq!(coordinator.next_chunk("nobody"), None);
    assert!(coordinator.is_complete("nobody"));
    assert_eq!(
        coordinator.poll("nobody"),
        ChunkPoll {
            chunk: None,
            complete: true,
        }
    );
    assert_eq!(coordinator.phase("nobody"), None);
    assert!(!coordinator.cleanup("nobody"));
    assert!(!coordinator.complete("nobody"));
}

#[tokio::test]
async fn empty_source_yields_exactly_one_fallback_chunk() {
    let source = QueuedSource::new(vec![fragments(Vec::new())]);
    let (coordinator, calls) = coordinator_for(source, test_config(), CALL);

    coordinator.start(CALL, "hello", Vec::new()).await;
    assert_eq!(drain(&coordinator, CALL).await, vec![FALLBACK_TEXT]);
    assert_eq!(calls.history(CALL)[1], Turn::assistant(FALLBACK_TEXT));
}

#[tokio::test]
async fn failure_mid_reply_appends_apology() {
    let source = QueuedSource::new(vec![failing(&["Let me see. "])]);
    let (coordinator, calls) = coordinator_for(source, test_config(), CALL);

    coordinator.start(CALL, "weather", Vec::new()).await;
    let chunks = drain(&coordinator, CALL).await;
    assert_eq!(chunks, vec!["Let me see. ", APOLOGY_TEXT]);

    let history = calls.history(CALL);
    assert_eq!(history[1].text, chunks.concat());
}

#[tokio::test]
async fn panicking_source_still_finishes_with_apology() {
    let source = QueuedSource::new(vec![panicking()]);
    let (coordinator, calls) = coordinator_for(source, test_config(), CALL);

    coordinator.start(CALL, "boom", Vec::new()).await;
    assert_eq!(drain(&coordinator, CALL).await, vec![APOLOGY_TEXT]);
    assert_eq!(calls.history(CALL).len(), 2);
}

#[tokio::test]
async fn cleanup_mid_stream_stops_producer_without_folding() {
    let (gate, stream) = gated();
    let source = QueuedSource::new(vec![stream]);
    let (coordinator, calls) = coordinator_for(source, test_config(), CALL);

    coordinator.start(CALL, "tell me a story", Vec::new()).await;
    gate.send(Ok("Once ".to_string())).unwrap();
    wait_until(|| coordinator.next_chunk(CALL).is_some()).await;

    assert!(coordinator.cleanup(CALL));
    assert!(!coordinator.cleanup(CALL));

    // The producer drops its stream once it notices the cancellation.
    tokio::time::timeout(WAIT_LIMIT, gate.closed())
        .await
        .expect("producer should stop consuming");
    let _ = gate.send(Ok("upon a time.".to_string()));
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(coordinator.active_streams(), 0);
    assert_eq!(coordinator.phase(CALL), None);
    assert_eq!(coordinator.next_chunk(CALL), None);
    assert!(coordinator.is_complete(CALL));
    assert!(calls.history(CALL).is_empty());
}

#[tokio::test]
async fn cleanup_releases_producer_waiting_on_full_queue() {
    let (gate, stream) = gated();
    let source = QueuedSource::new(vec![stream]);
    let config = StreamingConfig {
        chunk_queue_capacity: 1,
        ..test_config()
    };
    let (coordinator, calls) = coordinator_for(source, config, CALL);

    coordinator.start(CALL, "count slowly", Vec::new()).await;
    gate.send(Ok("One. ".to_string())).unwrap();
    gate.send(Ok("Two. ".to_string())).unwrap();
    // Nobody polls, so the second fragment waits for queue capacity.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(coordinator.phase(CALL), Some(StreamPhase::Producing));

    assert!(coordinator.cleanup(CALL));

    tokio::time::timeout(WAIT_LIMIT, gate.closed())
        .await
        .expect("blocked producer should give up its send");
    assert_eq!(coordinator.active_streams(), 0);
    assert_eq!(coordinator.next_chunk(CALL), None);
    assert!(calls.history(CALL).is_empty());
}

#[tokio::test]
async fn finished_reply_is_kept_in_history_even_if_never_drained() {
    let source = QueuedSource::new(vec![scripted(&["One."]), scripted(&["Two."])]);
    let (coordinator, calls) = coordinator_for(source, test_config(), CALL);

    coordinator.start(CALL, "a", Vec::new()).await;
    wait_until(|| coordinator.phase(CALL) == Some(StreamPhase::Draining)).await;

    coordinator.start(CALL, "b", calls.history(CALL)).await;
    assert_eq!(drain(&coordinator, CALL).await, vec!["Two."]);
    assert_eq!(
        calls.history(CALL),
        vec![
            Turn::user("a"),
            Turn::assistant("One."),
            Turn::user("b"),
            Turn::assistant("Two."),
        ]
    );
}

#[tokio::test]
async fn double_poll_after_cleanup_is_harmless() {
    let source = QueuedSource::new(vec![scripted(&["Bye."])]);
    let (coordinator, _calls) = coordinator_for(source, test_config(), CALL);

    coordinator.start(CALL, "bye", Vec::new()).await;
    drain(&coordinator, CALL).await;
    coordinator.cleanup(CALL);

    for _ in 0..2 {
        let poll = coordinator.poll(CALL);
        assert_eq!(poll.chunk, None);
        assert!(poll.complete);
    }
}

#[tokio::test]
async fn new_turn_supersedes_unfinished_one() {
    let (first_gate, first) = gated();
    let source = QueuedSource::new(vec![first, scripted(&["Second."])]);
    let (coordinator, calls) = coordinator_for(source.clone(), test_config(), CALL);

    let first_generation = coordinator.start(CALL, "one", Vec::new()).await;
    wait_until(|| source.prompts().len() == 1).await;
    let second_generation = coordinator.start(CALL, "two", Vec::new()).await;
    assert_ne!(first_generation, second_generation);

    tokio::time::timeout(WAIT_LIMIT, first_gate.closed())
        .await
        .expect("superseded producer should stop");
    let _ = first_gate.send(Ok("First.".to_string()));

    assert_eq!(drain(&coordinator, CALL).await, vec!["Second."]);
    assert_eq!(coordinator.active_streams(), 1);
    assert_eq!(
        calls.history(CALL),
        vec![Turn::user("two"), Turn::assistant("Second.")]
    );
}

#[tokio::test]
async fn concurrent_polls_deliver_each_chunk_once_in_order() {
    let expected: Vec<String> = (0..40).map(|i| format!("w{} ", i)).collect();
    let source = QueuedSource::new(vec![slow(expected.clone(), Duration::from_millis(1))]);
    let (coordinator, _calls) = coordinator_for(source, test_config(), CALL);

    coordinator.start(CALL, "go", Vec::new()).await;

    let mut pollers = Vec::new();
    for _ in 0..8 {
        let coordinator = coordinator.clone();
        pollers.push(tokio::spawn(async move { drain(&coordinator, CALL).await }));
    }

    let mut seen = HashSet::new();
    let mut total = 0;
    for poller in pollers {
        let chunks = poller.await.expect("poller should not panic");
        let positions: Vec<usize> = chunks
            .iter()
            .map(|c| expected.iter().position(|e| e == c).expect("known chunk"))
            .collect();
        assert!(
            positions.windows(2).all(|w| w[0] < w[1]),
            "each poller sees chunks in production order"
        );
        total += chunks.len();
        seen.extend(chunks);
    }

    assert_eq!(total, expected.len(), "no chunk delivered twice");
    assert_eq!(seen.len(), expected.len(), "no chunk lost");
}

#[tokio::test]
async fn forced_completion_keeps_queued_chunks_but_skips_history() {
    let (gate, stream) = gated();
    let source = QueuedSource::new(vec![stream]);
    let (coordinator, calls) = coordinator_for(source, test_config(), CALL);

    coordinator.start(CALL, "hurry", Vec::new()).await;
    gate.send(Ok("Kept. ".to_string())).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(coordinator.complete(CALL));
    assert_eq!(coordinator.phase(CALL), Some(StreamPhase::Draining));
    assert!(!coordinator.is_complete(CALL));
    assert_eq!(coordinator.next_chunk(CALL).as_deref(), Some("Kept. "));
    assert!(coordinator.is_complete(CALL));

    tokio::time::timeout(WAIT_LIMIT, gate.closed())
        .await
        .expect("producer should stop");
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(calls.history(CALL).is_empty());
}

#[tokio::test(start_paused = true)]
async fn start_waits_for_first_chunk_grace() {
    let source = QueuedSource::new(vec![scripted(&["Quick."])]);
    let config = StreamingConfig {
        first_chunk_grace_ms: 100,
        ..test_config()
    };
    let (coordinator, _calls) = coordinator_for(source, config, CALL);

    let started = tokio::time::Instant::now();
    coordinator.start(CALL, "hi", Vec::new()).await;
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert_eq!(coordinator.next_chunk(CALL).as_deref(), Some("Quick."));
}
