mod common;

use std::sync::atomic::Ordering;

use chat_core::{ChatError, ConversationStore, Direction, FileAttachment, Role, TokenUsage};
use common::{harness, harness_with, ScriptedProvider, MODEL};

#[test]
fn retry_and_switch_scenario() {
    let h = harness(ScriptedProvider::new().with_completions(&["hi there"]));
    h.facade.new_conversation("T1").unwrap();
    h.facade.add_user_message("hi", Vec::new()).unwrap();
    let usage = TokenUsage {
        total_tokens: Some(5),
        ..Default::default()
    };
    let hello = h.facade.add_assistant_message("hello", Some(usage)).unwrap();

    let retried = h.facade.retry_message(&hello.id).unwrap();
    assert_eq!(retried.total_siblings, 2);
    assert_eq!(retried.sibling_index, 1);
    assert_eq!(retried.message.content, "hi there");
    assert_eq!(retried.message.parent_id, hello.parent_id);

    let graph = h.facade.get_conversation_tree().unwrap();
    assert_eq!(graph.active_branch.last(), Some(&retried.message.id));

    let back = h
        .facade
        .switch_to_sibling(&retried.message.id, Direction::Prev)
        .unwrap();
    assert_eq!(back.message.id, hello.id);
    assert_eq!(back.total_siblings, 2);
    assert_eq!(h.facade.get_status().active_leaf_id, Some(hello.id.clone()));

    // The original reply was never rewritten.
    assert_eq!(back.message.content, "hello");
    assert_eq!(back.message.token_usage.and_then(|u| u.total_tokens), Some(5));
}

#[test]
fn send_and_get_response_attaches_the_reply() {
    let h = harness(
        ScriptedProvider::new()
            .with_completions(&["4"])
            .with_usage(TokenUsage::new(10, 1)),
    );
    h.facade.new_conversation("math").unwrap();
    let user = h
        .facade
        .add_user_message("2+2?", vec![FileAttachment::new("/tmp/notes.txt")])
        .unwrap();

    let reply = h.facade.send_and_get_response().unwrap();

    assert_eq!(reply.role, Role::Assistant);
    assert_eq!(reply.content, "4");
    assert_eq!(reply.parent_id.as_deref(), Some(user.id.as_str()));
    assert_eq!(reply.model_info.name.as_deref(), Some(MODEL));
    assert_eq!(reply.response_id.as_deref(), Some("resp-scripted"));
    assert_eq!(reply.token_usage, Some(TokenUsage::new(10, 1)));

    let context = h.provider.last_context.lock().clone();
    assert_eq!(context.len(), 2);
    assert_eq!(context[0].role, Role::System);
    assert_eq!(context[1].attached_files.len(), 1);
}

#[test]
fn send_requires_a_pending_user_message() {
    let h = harness(ScriptedProvider::new());
    h.facade.new_conversation("idle").unwrap();

    assert!(matches!(
        h.facade.send_and_get_response(),
        Err(ChatError::Validation(_))
    ));
    assert_eq!(h.provider.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn provider_failure_surfaces_as_provider_error() {
    let h = harness(ScriptedProvider::new().failing_complete("rate limited"));
    h.facade.new_conversation("fail").unwrap();
    h.facade.add_user_message("hi", Vec::new()).unwrap();

    match h.facade.send_and_get_response() {
        Err(ChatError::Provider(message)) => assert!(message.contains("rate limited")),
        other => panic!("expected provider error, got {other:?}"),
    }
    // The tree still ends at the user message.
    let status = h.facade.get_status();
    assert_eq!(status.message_count, 2);
}

#[test]
fn operations_without_a_conversation_are_not_found() {
    let h = harness(ScriptedProvider::new());

    assert!(matches!(
        h.facade.add_user_message("hi", Vec::new()),
        Err(ChatError::NotFound(_))
    ));
    assert!(matches!(
        h.facade.get_conversation_tree(),
        Err(ChatError::NotFound(_))
    ));
    assert!(matches!(h.facade.save_conversation(), Err(ChatError::NotFound(_))));
    assert_eq!(h.facade.get_status().conversation_id, None);
}

#[test]
fn invalid_requests_are_validation_errors() {
    let h = harness(ScriptedProvider::new());
    h.facade.new_conversation("checks").unwrap();
    let user = h.facade.add_user_message("hi", Vec::new()).unwrap();

    assert!(matches!(
        h.facade.add_user_message("   ", Vec::new()),
        Err(ChatError::Validation(_))
    ));
    assert!(matches!(
        h.facade.retry_message("missing"),
        Err(ChatError::Validation(_))
    ));
    assert!(matches!(
        h.facade.retry_message(&user.id),
        Err(ChatError::Validation(_))
    ));
}

#[test]
fn switching_past_either_end_is_a_bounds_error() {
    let h = harness(ScriptedProvider::new().with_completions(&["second"]));
    h.facade.new_conversation("bounds").unwrap();
    h.facade.add_user_message("hi", Vec::new()).unwrap();
    let first = h.facade.add_assistant_message("first", None).unwrap();
    let second = h.facade.retry_message(&first.id).unwrap();

    assert!(matches!(
        h.facade.switch_to_sibling(&first.id, Direction::Prev),
        Err(ChatError::Bounds { .. })
    ));
    assert!(matches!(
        h.facade.switch_to_sibling(&second.message.id, Direction::Next),
        Err(ChatError::Bounds { .. })
    ));

    let siblings = h.facade.get_message_siblings(&first.id).unwrap();
    assert_eq!(siblings.siblings, vec![first.id.clone(), second.message.id.clone()]);
    assert_eq!(siblings.current_index, 0);
    assert_eq!(siblings.total, 2);
}

#[test]
fn exchanges_and_navigation_are_autosaved() {
    let h = harness(ScriptedProvider::new().with_completions(&["b"]));
    let id = h.facade.new_conversation("autosave").unwrap();
    h.facade.add_user_message("hi", Vec::new()).unwrap();
    let first = h.facade.add_assistant_message("a", None).unwrap();
    let retried = h.facade.retry_message(&first.id).unwrap();

    let store = ConversationStore::new(h.dir.path());
    let saved = store.load(&id).unwrap();
    assert_eq!(saved.active_leaf_id(), retried.message.id);

    h.facade.switch_to_sibling(&retried.message.id, Direction::Prev).unwrap();
    let saved = store.load(&id).unwrap();
    assert_eq!(saved.active_leaf_id(), first.id);
}

#[test]
fn concurrent_navigation_leaves_the_latest_state_on_disk() {
    let h = harness(ScriptedProvider::new().with_completions(&["b"]));
    let id = h.facade.new_conversation("racing").unwrap();
    h.facade.add_user_message("hi", Vec::new()).unwrap();
    let first = h.facade.add_assistant_message("a", None).unwrap();
    let second = h.facade.retry_message(&first.id).unwrap().message;

    std::thread::scope(|scope| {
        for worker in 0..4 {
            let facade = &h.facade;
            let targets = [first.id.as_str(), second.id.as_str()];
            scope.spawn(move || {
                for round in 0..25 {
                    let target = targets[(worker + round) % 2];
                    facade.switch_to_sibling(target, Direction::None).unwrap();
                }
            });
        }
    });

    let in_memory = h.facade.get_conversation_tree().unwrap();
    let saved = ConversationStore::new(h.dir.path()).load(&id).unwrap();
    assert_eq!(saved.active_branch().to_vec(), in_memory.active_branch);
    assert_eq!(saved.len(), 4);
}

#[test]
fn autosave_can_be_disabled() {
    let h = harness_with(ScriptedProvider::new(), |mut config| {
        config.autosave = false;
        config
    });
    let id = h.facade.new_conversation("manual").unwrap();
    h.facade.add_user_message("hi", Vec::new()).unwrap();
    h.facade.add_assistant_message("hello", None).unwrap();

    let store = ConversationStore::new(h.dir.path());
    assert!(matches!(store.load(&id), Err(ChatError::NotFound(_))));

    let path = h.facade.save_conversation().unwrap();
    assert!(path.exists());
    assert_eq!(store.load(&id).unwrap().len(), 3);
}

#[test]
fn load_restores_branches_and_active_path() {
    let h = harness(ScriptedProvider::new().with_completions(&["v2"]));
    let id = h.facade.new_conversation("reload").unwrap();
    h.facade.add_user_message("hi", Vec::new()).unwrap();
    let first = h.facade.add_assistant_message("v1", None).unwrap();
    let second = h.facade.retry_message(&first.id).unwrap();
    let before = h.facade.get_conversation_tree().unwrap();

    h.facade.new_conversation("something else").unwrap();
    let status = h.facade.load_conversation(&id).unwrap();

    assert_eq!(status.conversation_id.as_deref(), Some(id.as_str()));
    assert_eq!(status.title.as_deref(), Some("reload"));
    let after = h.facade.get_conversation_tree().unwrap();
    assert_eq!(after.active_branch, before.active_branch);
    assert_eq!(after.edges, before.edges);

    let back = h
        .facade
        .switch_to_sibling(&second.message.id, Direction::Prev)
        .unwrap();
    assert_eq!(back.message.id, first.id);
}

#[test]
fn list_and_delete_conversations() {
    let h = harness(ScriptedProvider::new());
    let first = h.facade.new_conversation("first").unwrap();
    let second = h.facade.new_conversation("second").unwrap();

    let listed = h.facade.list_conversations().unwrap();
    assert_eq!(listed.len(), 2);
    assert!(listed.iter().any(|c| c.conversation_id == first));

    assert!(h.facade.delete_conversation(&second).unwrap());
    assert_eq!(h.facade.get_status().conversation_id, None);
    assert!(!h.facade.delete_conversation(&second).unwrap());

    let listed = h.facade.list_conversations().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].title, "first");

    assert!(matches!(
        h.facade.load_conversation(&second),
        Err(ChatError::NotFound(_))
    ));
}

#[test]
fn status_reports_loop_model_and_counts() {
    let h = harness(ScriptedProvider::new());
    h.facade.new_conversation("").unwrap();
    h.facade.add_user_message("hi", Vec::new()).unwrap();

    let status = h.facade.get_status();
    assert_eq!(status.title.as_deref(), Some("New conversation"));
    assert_eq!(status.message_count, 2);
    assert_eq!(status.active_branch_length, 2);
    assert_eq!(status.model.as_deref(), Some(MODEL));
    assert!(status.event_loop_running);
    assert_eq!(status.active_streams, 0);
    assert_eq!(status.data_dir, h.dir.path());
}
