mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chat_core::{ChatError, ConversationStore, Direction, Role, TokenUsage};
use chat_engine::bridge::{start_stream, StreamOptions};
use chat_engine::{DoneEvent, EventLoop, SseEvent};
use chat_llm::ProviderClient;
use common::{frame_json, harness, harness_with, ScriptedProvider};

fn options(item_timeout: Duration) -> StreamOptions {
    StreamOptions {
        item_timeout,
        queue_capacity: 4,
        label: "test".to_string(),
    }
}

fn done_for(text: String) -> DoneEvent {
    DoneEvent {
        done: true,
        conversation_id: "c1".to_string(),
        message_id: format!("msg-{}", text.len()),
        parent_id: None,
        model: None,
        token_usage: None,
    }
}

fn wait_until(deadline: Duration, check: impl Fn() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    check()
}

#[test]
fn chunks_are_followed_by_exactly_one_done_frame() {
    let event_loop = Arc::new(EventLoop::start().unwrap());
    let provider: Arc<dyn ProviderClient> =
        Arc::new(ScriptedProvider::new().with_chunks(&["a", "b", "c", "d"]));

    let stream = start_stream(
        &event_loop,
        provider,
        Vec::new(),
        options(Duration::from_secs(5)),
        |reply| async move { Ok(done_for(reply.text)) },
    );
    let events: Vec<SseEvent> = stream
        .map(|frame| SseEvent::from_frame(&frame).unwrap())
        .collect();

    assert_eq!(events.len(), 5);
    for (event, expected) in events.iter().zip(["a", "b", "c", "d"]) {
        assert_eq!(event, &SseEvent::chunk(expected));
    }
    match &events[4] {
        SseEvent::Done(done) => assert_eq!(done.message_id, "msg-4"),
        other => panic!("expected done, got {other:?}"),
    }
}

#[test]
fn stalled_producer_yields_one_error_then_stops() {
    let event_loop = Arc::new(EventLoop::start().unwrap());
    let scripted = Arc::new(ScriptedProvider::new().with_chunks(&["x", "y"]).stalling_after(1));
    let dropped = Arc::clone(&scripted.stream_dropped);
    let provider: Arc<dyn ProviderClient> = scripted;

    let mut stream = start_stream(
        &event_loop,
        provider,
        Vec::new(),
        options(Duration::from_millis(200)),
        |reply| async move { Ok(done_for(reply.text)) },
    );

    assert_eq!(stream.next_event(), Some(SseEvent::chunk("x")));
    match stream.next_event() {
        Some(SseEvent::Error { error }) => assert!(error.contains("No stream item")),
        other => panic!("expected timeout error, got {other:?}"),
    }
    assert_eq!(stream.next_event(), None);
    assert!(stream.is_finished());

    // The stalled provider call is cancelled rather than left running.
    assert!(wait_until(Duration::from_secs(2), || dropped.load(Ordering::SeqCst)));
}

#[test]
fn provider_failure_becomes_a_single_error_frame() {
    let event_loop = Arc::new(EventLoop::start().unwrap());
    let provider: Arc<dyn ProviderClient> =
        Arc::new(ScriptedProvider::new().with_chunks(&["partial"]).failing_stream("upstream 500"));

    let frames: Vec<String> = start_stream(
        &event_loop,
        provider,
        Vec::new(),
        options(Duration::from_secs(5)),
        |reply| async move { Ok(done_for(reply.text)) },
    )
    .collect();

    assert_eq!(frames.len(), 2);
    assert_eq!(frame_json(&frames[0])["chunk"], "partial");
    let error = frame_json(&frames[1]);
    assert!(error["error"].as_str().unwrap().contains("upstream 500"));
    assert!(error.get("done").is_none());
}

#[test]
fn failing_finish_hook_reports_an_error_instead_of_done() {
    let event_loop = Arc::new(EventLoop::start().unwrap());
    let provider: Arc<dyn ProviderClient> = Arc::new(ScriptedProvider::new().with_chunks(&["ok"]));

    let events: Vec<SseEvent> = start_stream(
        &event_loop,
        provider,
        Vec::new(),
        options(Duration::from_secs(5)),
        |_reply| async move { Err(ChatError::persistence("disk full")) },
    )
    .map(|frame| SseEvent::from_frame(&frame).unwrap())
    .collect();

    assert_eq!(events.len(), 2);
    assert!(matches!(&events[1], SseEvent::Error { error } if error.contains("disk full")));
}

#[test]
fn streamed_reply_is_attached_before_done_is_emitted() {
    let h = harness(
        ScriptedProvider::new()
            .with_chunks(&["Hel", "lo", "!"])
            .with_usage(TokenUsage::new(5, 3)),
    );
    let conversation_id = h.facade.new_conversation("stream").unwrap();
    let user = h.facade.add_user_message("hi", Vec::new()).unwrap();

    let frames: Vec<String> = h.facade.stream_response().unwrap().collect();

    assert_eq!(frames.len(), 4);
    let done = frame_json(&frames[3]);
    assert_eq!(done["done"], true);
    assert_eq!(done["conversation_id"], conversation_id.as_str());
    assert_eq!(done["parent_id"], user.id.as_str());
    assert_eq!(done["model"], common::MODEL);
    assert_eq!(done["token_usage"]["total_tokens"], 8);

    let message_id = done["message_id"].as_str().unwrap();
    let graph = h.facade.get_conversation_tree().unwrap();
    let node = graph.nodes.iter().find(|n| n.id == message_id).unwrap();
    assert_eq!(node.role, Role::Assistant);
    assert_eq!(node.preview, "Hello!");
    assert_eq!(graph.active_branch.last().map(String::as_str), Some(message_id));

    // The context sent upstream ends with the user's message.
    let context = h.provider.last_context.lock().clone();
    assert_eq!(context.last().map(|m| m.content.as_str()), Some("hi"));

    // Autosave ran before the done frame.
    let saved = chat_core::ConversationStore::new(h.dir.path())
        .load(&conversation_id)
        .unwrap();
    assert!(saved.contains(message_id));
    assert_eq!(
        saved.get_node(message_id).unwrap().token_usage,
        Some(TokenUsage::new(5, 3))
    );
}

#[test]
fn stream_autosave_does_not_lose_concurrent_navigation() {
    let h = harness(
        ScriptedProvider::new()
            .with_completions(&["b"])
            .with_chunks(&["x", "y", "z"])
            .with_chunk_delay(Duration::from_millis(5)),
    );
    let conversation_id = h.facade.new_conversation("mixed").unwrap();
    h.facade.add_user_message("hi", Vec::new()).unwrap();
    let first = h.facade.add_assistant_message("a", None).unwrap();
    let second = h.facade.retry_message(&first.id).unwrap().message;
    h.facade.add_user_message("more", Vec::new()).unwrap();

    let stream = h.facade.stream_response().unwrap();
    std::thread::scope(|scope| {
        let facade = &h.facade;
        let targets = [first.id.as_str(), second.id.as_str()];
        scope.spawn(move || {
            for round in 0..20 {
                facade
                    .switch_to_sibling(targets[round % 2], Direction::None)
                    .unwrap();
            }
        });
        let frames: Vec<String> = stream.collect();
        assert_eq!(frame_json(frames.last().unwrap())["done"], true);
    });

    let in_memory = h.facade.get_conversation_tree().unwrap();
    let saved = ConversationStore::new(h.dir.path())
        .load(&conversation_id)
        .unwrap();
    assert_eq!(saved.len(), in_memory.nodes.len());
    assert_eq!(saved.active_branch().to_vec(), in_memory.active_branch);
}

#[test]
fn dropping_the_stream_cancels_the_producer() {
    let h = harness(
        ScriptedProvider::new()
            .with_chunks(&["one", "two", "three"])
            .stalling_after(1),
    );
    h.facade.new_conversation("drop").unwrap();
    h.facade.add_user_message("hi", Vec::new()).unwrap();

    let mut stream = h.facade.stream_response().unwrap();
    assert_eq!(stream.next_event(), Some(SseEvent::chunk("one")));
    assert_eq!(h.facade.get_status().active_streams, 1);
    drop(stream);

    let dropped = Arc::clone(&h.provider.stream_dropped);
    assert!(wait_until(Duration::from_secs(2), || dropped.load(Ordering::SeqCst)));
    assert_eq!(h.facade.get_status().active_streams, 0);

    // No assistant node was attached for the abandoned reply.
    let graph = h.facade.get_conversation_tree().unwrap();
    assert!(graph.nodes.iter().all(|n| n.role != Role::Assistant));
}

#[test]
fn slow_chunks_within_the_deadline_all_arrive() {
    let h = harness_with(
        ScriptedProvider::new()
            .with_chunks(&["a", "b"])
            .with_chunk_delay(Duration::from_millis(30)),
        |config| config.with_item_timeout(Duration::from_millis(500)),
    );
    h.facade.new_conversation("slow").unwrap();
    h.facade.add_user_message("hi", Vec::new()).unwrap();

    let events: Vec<SseEvent> = h
        .facade
        .stream_response()
        .unwrap()
        .map(|frame| SseEvent::from_frame(&frame).unwrap())
        .collect();

    assert_eq!(events.len(), 3);
    assert!(matches!(events[2], SseEvent::Done(_)));
}

#[test]
fn streaming_requires_a_pending_user_message() {
    let h = harness(ScriptedProvider::new().with_chunks(&["a"]));
    h.facade.new_conversation("nothing pending").unwrap();

    assert!(matches!(
        h.facade.stream_response(),
        Err(ChatError::Validation(_))
    ));
}
