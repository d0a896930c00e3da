use std::sync::{Arc, Mutex};
use std::time::Duration;

use pretty_assertions::assert_eq;
use tracing::Level;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use tripwire::event_bus::{Event, EventBus, EventKind, LocalBus, Value};
use tripwire::filter::Filter;
use tripwire::interrupt::InterruptControl;
use tripwire::trigger::Trigger;

#[ctor::ctor]
fn init_tests() {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

/// Collects log output so a test can assert on emitted warnings.
#[derive(Clone, Default)]
struct LogSink(Arc<Mutex<Vec<u8>>>);

impl LogSink {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl std::io::Write for LogSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogSink {
    type Writer = LogSink;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn ping_kind() -> EventKind {
    EventKind::Custom("Ping".to_string())
}

fn ping(from: i64) -> Event {
    Event::new(ping_kind()).with_param("from", Value::Integer(from))
}

fn from_42() -> Filter {
    Filter::new(ping_kind()).extract(|event| match event.int_param("from") {
        Some(42) => Some(Value::Integer(42)),
        _ => None,
    })
}

fn match_anything() -> Filter {
    Filter::new(ping_kind()).extract(|event| event.int_param("from").map(Value::Integer))
}

#[tokio::test]
async fn test_wait_resolves_on_matching_event() {
    let bus = Arc::new(LocalBus::new());
    let interrupts = Arc::new(InterruptControl::new(bus.clone()));

    let waiter = {
        let interrupts = interrupts.clone();
        tokio::spawn(async move {
            interrupts
                .wait_filter(from_42(), Duration::from_secs(5), 0)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    bus.emit(ping(42)).await.unwrap();
    let result = waiter.await.unwrap();
    assert_eq!(result, Ok(Some(Value::Integer(42))));
}

#[tokio::test]
async fn test_end_to_end_ignores_non_matching_then_captures() {
    let bus = Arc::new(LocalBus::new());
    let interrupts = Arc::new(InterruptControl::new(bus.clone()));

    let waiter = {
        let interrupts = interrupts.clone();
        tokio::spawn(async move {
            interrupts
                .wait_filter(from_42(), Duration::from_secs(1), 0)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    bus.emit(ping(7)).await.unwrap();
    bus.emit(ping(42)).await.unwrap();

    let result = waiter.await.unwrap();
    assert_eq!(result, Ok(Some(Value::Integer(42))));
}

#[tokio::test]
async fn test_priority_first_match_wins_across_buckets() {
    let bus = Arc::new(LocalBus::new());
    let interrupts = Arc::new(InterruptControl::new(bus.clone()));

    let urgent = Arc::new(Trigger::new(match_anything(), 1));
    let casual = Arc::new(Trigger::new(match_anything(), 5));

    let urgent_waiter = {
        let interrupts = interrupts.clone();
        let urgent = urgent.clone();
        tokio::spawn(async move { interrupts.wait(urgent, Duration::from_secs(5)).await })
    };
    let casual_waiter = {
        let interrupts = interrupts.clone();
        let casual = casual.clone();
        tokio::spawn(async move { interrupts.wait(casual, Duration::from_secs(5)).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(interrupts.waiting(&ping_kind()), 2);

    bus.emit(ping(42)).await.unwrap();

    // Only the lower-priority-numbered trigger consumed the event; the other
    // stays registered for future events.
    let result = urgent_waiter.await.unwrap();
    assert_eq!(result, Ok(Some(Value::Integer(42))));
    assert!(!casual_waiter.is_finished());
    assert_eq!(interrupts.waiting(&ping_kind()), 1);

    bus.emit(ping(43)).await.unwrap();
    let result = casual_waiter.await.unwrap();
    assert_eq!(result, Ok(Some(Value::Integer(43))));
    assert_eq!(interrupts.waiting(&ping_kind()), 0);
}

#[tokio::test]
async fn test_registry_is_cleaned_up_after_success() {
    let bus = Arc::new(LocalBus::new());
    let interrupts = Arc::new(InterruptControl::new(bus.clone()));

    let waiter = {
        let interrupts = interrupts.clone();
        tokio::spawn(async move {
            interrupts
                .wait_filter(from_42(), Duration::from_secs(5), 0)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(interrupts.waiting(&ping_kind()), 1);

    bus.emit(ping(42)).await.unwrap();
    waiter.await.unwrap().unwrap();
    assert_eq!(interrupts.waiting(&ping_kind()), 0);

    // A further matching event must not reach the exhausted trigger.
    bus.emit(ping(42)).await.unwrap();
    assert_eq!(interrupts.waiting(&ping_kind()), 0);
}

#[tokio::test]
async fn test_registry_is_cleaned_up_after_timeout() {
    let bus = Arc::new(LocalBus::new());
    let interrupts = InterruptControl::new(bus.clone());

    let result = interrupts
        .wait_filter(from_42(), Duration::from_millis(50), 0)
        .await;
    assert_eq!(result, Ok(None));
    assert_eq!(interrupts.waiting(&ping_kind()), 0);
}

#[tokio::test]
async fn test_insertion_order_breaks_ties_within_a_bucket() {
    let bus = Arc::new(LocalBus::new());
    let interrupts = Arc::new(InterruptControl::new(bus.clone()));

    let first = Arc::new(Trigger::new(match_anything(), 0));
    let second = Arc::new(Trigger::new(match_anything(), 0));

    let first_waiter = {
        let interrupts = interrupts.clone();
        let first = first.clone();
        tokio::spawn(async move { interrupts.wait(first, Duration::from_secs(5)).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    let second_waiter = {
        let interrupts = interrupts.clone();
        let second = second.clone();
        tokio::spawn(async move { interrupts.wait(second, Duration::from_secs(5)).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    bus.emit(ping(1)).await.unwrap();
    assert_eq!(first_waiter.await.unwrap(), Ok(Some(Value::Integer(1))));
    assert!(!second_waiter.is_finished());

    bus.emit(ping(2)).await.unwrap();
    assert_eq!(second_waiter.await.unwrap(), Ok(Some(Value::Integer(2))));
}

#[tokio::test]
async fn test_filter_failure_reaches_the_interrupted_waiter() {
    let bus = Arc::new(LocalBus::new());
    let interrupts = Arc::new(InterruptControl::new(bus.clone()));

    let filter = Filter::new(ping_kind())
        .try_extract(|_| Err(tripwire::filter::FilterError::extractor("boom")));

    let waiter = {
        let interrupts = interrupts.clone();
        tokio::spawn(async move {
            interrupts
                .wait_filter(filter, Duration::from_secs(5), 0)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    bus.emit(ping(1)).await.unwrap();
    let result = waiter.await.unwrap();
    assert!(matches!(
        result,
        Err(tripwire::trigger::TriggerError::Filter(_))
    ));
    // Failure is completion: the registration is torn down too.
    assert_eq!(interrupts.waiting(&ping_kind()), 0);
}

// Waiting twice on one trigger shares the single registration; only the wait
// that registered it attaches the teardown, so completion removes the entry
// exactly once instead of warning about a second, failing removal.
#[tokio::test]
async fn test_duplicate_wait_shares_registration_and_tears_down_once() {
    let sink = LogSink::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(sink.clone())
        .with_max_level(Level::WARN)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let bus = Arc::new(LocalBus::new());
    let interrupts = Arc::new(InterruptControl::new(bus.clone()));
    let trigger = Arc::new(Trigger::new(match_anything(), 0));

    let first = {
        let interrupts = interrupts.clone();
        let trigger = trigger.clone();
        tokio::spawn(async move { interrupts.wait(trigger, Duration::from_secs(5)).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    let second = {
        let interrupts = interrupts.clone();
        let trigger = trigger.clone();
        tokio::spawn(async move { interrupts.wait(trigger, Duration::from_secs(5)).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    // One registration, not two.
    assert_eq!(interrupts.waiting(&ping_kind()), 1);

    bus.emit(ping(5)).await.unwrap();
    assert_eq!(first.await.unwrap(), Ok(Some(Value::Integer(5))));
    assert_eq!(second.await.unwrap(), Ok(Some(Value::Integer(5))));
    assert_eq!(interrupts.waiting(&ping_kind()), 0);

    let logs = sink.contents();
    assert!(logs.contains("already waiting"));
    assert!(!logs.contains("not in the wait registry"));
}

#[tokio::test]
async fn test_concurrent_waits_on_different_kinds() {
    let bus = Arc::new(LocalBus::new());
    let interrupts = Arc::new(InterruptControl::new(bus.clone()));

    let friend_waiter = {
        let interrupts = interrupts.clone();
        tokio::spawn(async move {
            interrupts
                .wait(
                    Arc::new(Trigger::any(EventKind::FriendMessage, 0)),
                    Duration::from_secs(5),
                )
                .await
        })
    };
    let group_waiter = {
        let interrupts = interrupts.clone();
        tokio::spawn(async move {
            interrupts
                .wait(
                    Arc::new(Trigger::any(EventKind::GroupMessage, 0)),
                    Duration::from_secs(5),
                )
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    bus.emit(Event::new(EventKind::GroupMessage)).await.unwrap();
    assert_eq!(group_waiter.await.unwrap(), Ok(Some(Value::Null)));
    assert!(!friend_waiter.is_finished());

    bus.emit(Event::new(EventKind::FriendMessage))
        .await
        .unwrap();
    assert_eq!(friend_waiter.await.unwrap(), Ok(Some(Value::Null)));
}
