use application::{
    handler_fn, ApplicationError, Clock, HandlerError, HandlerRegistry, MessageRateLimiter,
    MessageRouter, RouterConfig, RouterState, RouterStats, ShutdownPolicy,
};
use chrono::{TimeZone, Utc};
use domain::{
    ConnectionId, InboundMessage, MessageKind, MessageValidator, Participant, SessionId, UserId,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

fn router_with(config: RouterConfig) -> MessageRouter {
    MessageRouter::new(
        config,
        MessageValidator::default(),
        Arc::new(MessageRateLimiter::default()),
        Arc::new(HandlerRegistry::new()),
    )
}

fn router() -> MessageRouter {
    router_with(RouterConfig {
        idle_tick: Duration::from_millis(20),
        ..RouterConfig::default()
    })
}

fn participant(name: &str) -> Participant {
    Participant::new(UserId::from(Uuid::new_v4()), name)
}

fn session() -> SessionId {
    SessionId::parse("standup").unwrap()
}

fn text(content: &str, priority: &str) -> Value {
    json!({
        "type": "text_message",
        "session_id": "standup",
        "content": content,
        "priority": priority,
    })
}

/// 轮询统计直到条件满足
async fn wait_for(router: &MessageRouter, done: impl Fn(&RouterStats) -> bool) -> RouterStats {
    for _ in 0..200 {
        let stats = router.get_stats();
        if done(&stats) {
            return stats;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("router did not reach expected state: {:?}", router.get_stats());
}

/// 记录处理顺序的文本处理器
fn recording_handler(router: &MessageRouter) -> Arc<Mutex<Vec<String>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    router.register_handler(
        MessageKind::TextMessage,
        handler_fn(move |message| {
            let sink = sink.clone();
            async move {
                if let InboundMessage::TextMessage(text) = &message.payload {
                    sink.lock().unwrap().push(text.content.clone());
                }
                Ok(())
            }
        }),
    );
    seen
}

#[tokio::test]
async fn test_urgent_completes_before_normal() {
    let router = router();
    let seen = recording_handler(&router);
    let alice = participant("alice");

    assert!(router.route_message(
        &text("normal", "normal"),
        &alice,
        &session(),
        ConnectionId::generate()
    ));
    assert!(router.route_message(
        &text("urgent", "urgent"),
        &alice,
        &session(),
        ConnectionId::generate()
    ));

    assert!(router.start_processing().unwrap());
    let stats = wait_for(&router, |stats| stats.messages_processed == 2).await;
    assert_eq!(stats.messages_failed, 0);
    assert_eq!(*seen.lock().unwrap(), vec!["urgent", "normal"]);

    assert!(router.stop_processing().await);
}

#[tokio::test]
async fn test_missing_handler_counts_as_failed() {
    let router = router();
    router.start_processing().unwrap();

    let accepted = router.route_message(
        &json!({"type": "typing_start", "session_id": "standup"}),
        &participant("bob"),
        &session(),
        ConnectionId::generate(),
    );
    assert!(accepted);

    let stats = wait_for(&router, |stats| stats.messages_failed == 1).await;
    assert_eq!(stats.no_handler, 1);
    assert_eq!(stats.messages_processed, 0);
    assert_eq!(router.state(), RouterState::Running);

    router.stop_processing().await;
}

#[tokio::test]
async fn test_start_and_stop_are_idempotent() {
    let router = router();
    assert_eq!(router.state(), RouterState::Stopped);
    assert!(!router.stop_processing().await);

    assert!(router.start_processing().unwrap());
    assert!(!router.start_processing().unwrap());
    assert_eq!(router.state(), RouterState::Running);

    assert!(router.stop_processing().await);
    assert!(!router.stop_processing().await);
    assert_eq!(router.state(), RouterState::Stopped);

    // 可以再次启动
    assert!(router.start_processing().unwrap());
    assert!(router.stop_processing().await);
}

#[tokio::test]
async fn test_stopped_router_rejects_until_restarted() {
    let router = router();
    let seen = recording_handler(&router);
    let carol = participant("carol");

    router.start_processing().unwrap();
    router.stop_processing().await;

    assert!(!router.route_message(
        &text("late", "normal"),
        &carol,
        &session(),
        ConnectionId::generate()
    ));
    assert_eq!(router.get_stats().messages_rejected_stopped, 1);

    router.start_processing().unwrap();
    assert!(router.route_message(
        &text("again", "normal"),
        &carol,
        &session(),
        ConnectionId::generate()
    ));
    wait_for(&router, |stats| stats.messages_processed == 1).await;
    assert_eq!(*seen.lock().unwrap(), vec!["again"]);

    router.stop_processing().await;
}

#[tokio::test]
async fn test_rejected_messages_never_reach_handlers() {
    let router = router();
    let seen = recording_handler(&router);
    let dave = participant("dave");

    let too_long = "a".repeat(5000);
    assert!(!router.route_message(
        &text(&too_long, "normal"),
        &dave,
        &session(),
        ConnectionId::generate()
    ));
    assert!(!router.route_message(
        &json!({"type": "text_message", "session_id": "other-room", "content": "hi"}),
        &dave,
        &session(),
        ConnectionId::generate()
    ));
    assert!(!router.route_message(
        &json!({"type": "self_destruct", "session_id": "standup"}),
        &dave,
        &session(),
        ConnectionId::generate()
    ));

    router.start_processing().unwrap();
    assert!(router.route_message(
        &text("ok", "normal"),
        &dave,
        &session(),
        ConnectionId::generate()
    ));
    let stats = wait_for(&router, |stats| stats.messages_processed == 1).await;
    assert_eq!(stats.messages_rejected_validation, 3);
    assert_eq!(stats.messages_received, 4);
    assert_eq!(*seen.lock().unwrap(), vec!["ok"]);

    router.stop_processing().await;
}

#[tokio::test]
async fn test_thirty_first_message_is_rate_limited() {
    let router = router();
    let erin = participant("erin");

    for i in 0..30 {
        assert!(
            router.route_message(
                &text(&format!("message {i}"), "normal"),
                &erin,
                &session(),
                ConnectionId::generate()
            ),
            "message {} should be admitted",
            i + 1
        );
    }

    let err = router
        .admit(
            &text("one too many", "normal"),
            &erin,
            &session(),
            ConnectionId::generate(),
        )
        .unwrap_err();
    assert_eq!(err.code(), "RATE_LIMITED");

    // 其它优先级的配额独立
    assert!(router.route_message(
        &text("still urgent", "urgent"),
        &erin,
        &session(),
        ConnectionId::generate()
    ));

    let stats = router.get_stats();
    assert_eq!(stats.messages_admitted, 31);
    assert_eq!(stats.messages_rejected_rate_limit, 1);
    assert_eq!(stats.queue_depth, 31);
}

#[tokio::test]
async fn test_concurrent_admission_respects_quota() {
    let router = router();
    let frank = participant("frank");

    let attempts = (0..50).map(|i| {
        let router = router.clone();
        let frank = frank.clone();
        tokio::spawn(async move {
            router.route_message(
                &text(&format!("burst {i}"), "normal"),
                &frank,
                &session(),
                ConnectionId::generate(),
            )
        })
    });

    let accepted = futures::future::join_all(attempts)
        .await
        .into_iter()
        .map(|result| result.unwrap())
        .filter(|accepted| *accepted)
        .count();
    assert_eq!(accepted, 30);
    assert_eq!(router.get_stats().queue_depth, 30);
}

#[tokio::test]
async fn test_handler_failures_do_not_stop_the_loop() {
    let router = router();
    router.register_handler(
        MessageKind::TypingStart,
        handler_fn(|_| async { Err(HandlerError::other("store offline")) }),
    );
    router.register_handler(
        MessageKind::TypingStop,
        handler_fn(|_| async {
            let broken = true;
            if broken {
                panic!("handler bug");
            }
            Ok(())
        }),
    );
    let seen = recording_handler(&router);
    let grace = participant("grace");

    router.start_processing().unwrap();
    for raw in [
        json!({"type": "typing_start", "session_id": "standup"}),
        json!({"type": "typing_stop", "session_id": "standup"}),
        text("after failures", "low"),
    ] {
        assert!(router.route_message(&raw, &grace, &session(), ConnectionId::generate()));
    }

    // low 优先级的文本最后处理，此时两次失败都已计入
    let stats = wait_for(&router, |stats| stats.messages_processed == 1).await;
    assert_eq!(stats.messages_failed, 2);
    assert_eq!(stats.handler_errors, 1);
    assert_eq!(stats.handler_panics, 1);
    assert_eq!(*seen.lock().unwrap(), vec!["after failures"]);
    assert_eq!(router.state(), RouterState::Running);

    router.stop_processing().await;
}

#[tokio::test]
async fn test_slow_handler_times_out() {
    let router = router_with(RouterConfig {
        idle_tick: Duration::from_millis(20),
        handler_timeout: Some(Duration::from_millis(50)),
        ..RouterConfig::default()
    });
    router.register_handler(
        MessageKind::HandLower,
        handler_fn(|_| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        }),
    );

    router.start_processing().unwrap();
    assert!(router.route_message(
        &json!({"type": "hand_lower", "session_id": "standup"}),
        &participant("heidi"),
        &session(),
        ConnectionId::generate()
    ));

    let stats = wait_for(&router, |stats| stats.handler_timeouts == 1).await;
    assert_eq!(stats.messages_failed, 1);
    router.stop_processing().await;
}

#[tokio::test]
async fn test_drain_policy_processes_backlog_on_stop() {
    let router = router_with(RouterConfig {
        shutdown_policy: ShutdownPolicy::Drain,
        ..RouterConfig::default()
    });
    let seen = recording_handler(&router);
    let ivan = participant("ivan");

    for i in 0..5 {
        assert!(router.route_message(
            &text(&format!("queued {i}"), "normal"),
            &ivan,
            &session(),
            ConnectionId::generate()
        ));
    }

    router.start_processing().unwrap();
    router.stop_processing().await;

    let stats = router.get_stats();
    assert_eq!(stats.messages_processed, 5);
    assert_eq!(stats.queue_depth, 0);
    assert_eq!(seen.lock().unwrap().len(), 5);
}

#[tokio::test]
async fn test_discard_policy_drops_backlog_on_stop() {
    let router = router_with(RouterConfig {
        shutdown_policy: ShutdownPolicy::Discard,
        ..RouterConfig::default()
    });
    let judy = participant("judy");

    // 未启动时只准入不处理
    for i in 0..4 {
        router.route_message(
            &text(&format!("pending {i}"), "low"),
            &judy,
            &session(),
            ConnectionId::generate(),
        );
    }
    router.start_processing().unwrap();
    router.stop_processing().await;

    let stats = router.get_stats();
    assert_eq!(stats.queue_depth, 0);
    assert_eq!(
        stats.messages_processed + stats.messages_discarded_on_shutdown,
        4
    );
}

#[test]
fn test_start_outside_runtime_fails() {
    let router = router();
    assert!(matches!(
        router.start_processing(),
        Err(ApplicationError::Infrastructure(_))
    ));
}

#[tokio::test]
async fn test_abandoned_stop_still_reaches_stopped() {
    let router = router_with(RouterConfig {
        idle_tick: Duration::from_millis(20),
        handler_timeout: None,
        ..RouterConfig::default()
    });
    let started = Arc::new(AtomicBool::new(false));
    let flag = started.clone();
    router.register_handler(
        MessageKind::TypingStart,
        handler_fn(move |_| {
            let flag = flag.clone();
            async move {
                flag.store(true, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(300)).await;
                Ok(())
            }
        }),
    );

    router.start_processing().unwrap();
    assert!(router.route_message(
        &json!({"type": "typing_start", "session_id": "standup"}),
        &participant("kate"),
        &session(),
        ConnectionId::generate()
    ));
    while !started.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // 调用方放弃等待，处理器仍在执行
    let abandoned =
        tokio::time::timeout(Duration::from_millis(50), router.stop_processing()).await;
    assert!(abandoned.is_err());
    assert_eq!(router.state(), RouterState::Stopping);

    for _ in 0..200 {
        if router.state() == RouterState::Stopped {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(router.state(), RouterState::Stopped);
    assert_eq!(router.get_stats().messages_processed, 1);

    assert!(router.start_processing().unwrap());
    assert!(router.stop_processing().await);
}

#[tokio::test]
async fn test_zero_intervals_are_clamped() {
    let router = router_with(RouterConfig {
        idle_tick: Duration::ZERO,
        cleanup_interval: Duration::ZERO,
        ..RouterConfig::default()
    });
    let seen = recording_handler(&router);

    router.start_processing().unwrap();
    assert!(router.route_message(
        &text("still consumed", "normal"),
        &participant("liam"),
        &session(),
        ConnectionId::generate()
    ));
    wait_for(&router, |stats| stats.messages_processed == 1).await;
    assert_eq!(*seen.lock().unwrap(), vec!["still consumed"]);

    assert!(router.stop_processing().await);
}

struct FixedClock(chrono::DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> chrono::DateTime<Utc> {
        self.0
    }
}

#[tokio::test]
async fn test_created_at_comes_from_injected_clock() {
    let admitted_at = Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap();
    let router = MessageRouter::with_clock(
        RouterConfig {
            idle_tick: Duration::from_millis(20),
            ..RouterConfig::default()
        },
        MessageValidator::default(),
        Arc::new(MessageRateLimiter::default()),
        Arc::new(HandlerRegistry::new()),
        Arc::new(FixedClock(admitted_at)),
    );

    let stamps = Arc::new(Mutex::new(Vec::new()));
    let sink = stamps.clone();
    router.register_handler(
        MessageKind::Reaction,
        handler_fn(move |message| {
            let sink = sink.clone();
            async move {
                sink.lock().unwrap().push(message.created_at);
                Ok(())
            }
        }),
    );

    router.start_processing().unwrap();
    assert!(router.route_message(
        &json!({
            "type": "reaction",
            "session_id": "standup",
            "target_message_id": "m-1",
            "emoji": "👍"
        }),
        &participant("mona"),
        &session(),
        ConnectionId::generate()
    ));
    wait_for(&router, |stats| stats.messages_processed == 1).await;
    assert_eq!(*stamps.lock().unwrap(), vec![admitted_at]);

    router.stop_processing().await;
}
