mod support;

use batch_coalescer::{Coalescer, CoalescerConfig, ConfigPatch, WindowMode};
use std::time::Duration;
use support::{keys, MockBackend};
use tokio::time::sleep;

fn engine(mode: WindowMode) -> Coalescer<MockBackend> {
    Coalescer::with_config(
        CoalescerConfig::new()
            .with_time_window(Duration::from_millis(100))
            .with_window_mode(mode),
    )
    .unwrap()
}

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

#[tokio::test(start_paused = true)]
async fn test_debounce_extends_window_while_traffic_continues() {
    let engine = engine(WindowMode::Debounce);
    let backend = MockBackend::new("mock://rpc").arc();

    let a = engine.enqueue(&backend, "a").unwrap();
    sleep(ms(70)).await;
    let b = engine.enqueue(&backend, "b").unwrap();
    sleep(ms(70)).await;
    let c = engine.enqueue(&backend, "c").unwrap();

    // t = 210: well past the first window's original close, still open.
    sleep(ms(70)).await;
    assert_eq!(backend.call_count(), 0);

    // t = 260: 100 ms of quiet since "c" at 140.
    sleep(ms(50)).await;
    assert_eq!(backend.calls(), vec![keys(&["a", "b", "c"])]);

    let (a, b, c) = tokio::join!(a, b, c);
    assert!(a.is_ok() && b.is_ok() && c.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_debounce_quiet_gap_separates_windows() {
    let engine = engine(WindowMode::Debounce);
    let backend = MockBackend::new("mock://rpc").arc();

    let a = engine.enqueue(&backend, "a").unwrap();
    sleep(ms(120)).await;
    let b = engine.enqueue(&backend, "b").unwrap();
    sleep(ms(50)).await;
    let c = engine.enqueue(&backend, "c").unwrap();

    let (a, b, c) = tokio::join!(a, b, c);
    assert!(a.is_ok() && b.is_ok() && c.is_ok());
    assert_eq!(backend.calls(), vec![keys(&["a"]), keys(&["b", "c"])]);
}

#[tokio::test(start_paused = true)]
async fn test_same_arrivals_differ_by_mode() {
    // Arrivals at 0, 70 and 120 ms with a 100 ms window.
    for (mode, expected) in [
        (WindowMode::Debounce, vec![keys(&["a", "b", "c"])]),
        (WindowMode::Tumbling, vec![keys(&["a", "b"]), keys(&["c"])]),
    ] {
        let engine = engine(mode);
        let backend = MockBackend::new("mock://rpc").arc();

        let a = engine.enqueue(&backend, "a").unwrap();
        sleep(ms(70)).await;
        let b = engine.enqueue(&backend, "b").unwrap();
        sleep(ms(50)).await;
        let c = engine.enqueue(&backend, "c").unwrap();
        let _ = tokio::join!(a, b, c);

        assert_eq!(backend.calls(), expected, "mode {:?}", mode);
    }
}

#[tokio::test(start_paused = true)]
async fn test_tumbling_closes_under_sustained_traffic() {
    let engine = engine(WindowMode::Tumbling);
    let backend = MockBackend::new("mock://rpc").arc();

    let mut tickets = Vec::new();
    for i in 0..10 {
        tickets.push(engine.enqueue(&backend, format!("k{}", i)).unwrap());
        sleep(ms(30)).await;
    }
    futures::future::join_all(tickets).await;

    // Windows open at 0, 120 and 240 ms.
    assert_eq!(
        backend.calls(),
        vec![
            keys(&["k0", "k1", "k2", "k3"]),
            keys(&["k4", "k5", "k6", "k7"]),
            keys(&["k8", "k9"]),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_debounce_never_closes_under_sustained_traffic() {
    let engine = engine(WindowMode::Debounce);
    let backend = MockBackend::new("mock://rpc").arc();

    let mut tickets = Vec::new();
    for i in 0..10 {
        tickets.push(engine.enqueue(&backend, format!("k{}", i)).unwrap());
        sleep(ms(30)).await;
    }
    assert_eq!(backend.call_count(), 0);

    futures::future::join_all(tickets).await;
    assert_eq!(backend.call_count(), 1);
    assert_eq!(backend.calls()[0].len(), 10);
}

#[tokio::test(start_paused = true)]
async fn test_time_window_change_reaches_open_window() {
    let engine = Coalescer::with_config(
        CoalescerConfig::new().with_time_window(Duration::from_millis(500)),
    )
    .unwrap();
    let backend = MockBackend::new("mock://rpc").arc();

    let a = engine.enqueue(&backend, "a").unwrap();
    sleep(ms(10)).await;
    engine
        .set_config(ConfigPatch::new().time_window(ms(50)))
        .unwrap();
    let b = engine.enqueue(&backend, "b").unwrap();

    sleep(ms(100)).await;
    assert_eq!(backend.calls(), vec![keys(&["a", "b"])]);
    let _ = tokio::join!(a, b);
}

#[tokio::test(start_paused = true)]
async fn test_longer_time_window_holds_open_window() {
    let engine = engine(WindowMode::Debounce);
    let backend = MockBackend::new("mock://rpc").arc();

    let a = engine.enqueue(&backend, "a").unwrap();
    sleep(ms(10)).await;
    engine
        .set_config(ConfigPatch::new().time_window(ms(1000)))
        .unwrap();

    // Past the original 100 ms deadline with no further arrivals.
    sleep(ms(200)).await;
    assert_eq!(backend.call_count(), 0);

    sleep(ms(900)).await;
    assert_eq!(backend.calls(), vec![keys(&["a"])]);
    assert!(a.await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_shorter_time_window_closes_idle_window_early() {
    let engine = Coalescer::with_config(
        CoalescerConfig::new().with_time_window(Duration::from_millis(500)),
    )
    .unwrap();
    let backend = MockBackend::new("mock://rpc").arc();

    let a = engine.enqueue(&backend, "a").unwrap();
    sleep(ms(10)).await;
    engine
        .set_config(ConfigPatch::new().time_window(ms(50)))
        .unwrap();

    sleep(ms(60)).await;
    assert_eq!(backend.calls(), vec![keys(&["a"])]);
    assert!(a.await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_switching_mode_at_runtime() {
    let engine = engine(WindowMode::Debounce);
    let backend = MockBackend::new("mock://rpc").arc();

    engine
        .set_config(ConfigPatch::new().window_mode(WindowMode::Tumbling))
        .unwrap();
    assert_eq!(engine.config().window_mode, WindowMode::Tumbling);

    let a = engine.enqueue(&backend, "a").unwrap();
    sleep(ms(70)).await;
    let b = engine.enqueue(&backend, "b").unwrap();
    sleep(ms(50)).await;
    let c = engine.enqueue(&backend, "c").unwrap();
    let _ = tokio::join!(a, b, c);

    assert_eq!(backend.calls(), vec![keys(&["a", "b"]), keys(&["c"])]);
}
