//! In-memory collaborators for dispatcher and monitor tests.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use relaybot::generator::AnswerGenerator;
use relaybot::models::HistoryEntry;
use relaybot::monitor::{ResourceSample, ResourceSampler};
use relaybot::notifier::Notifier;
use relaybot::persistence::ConversationStore;
use relaybot::{AppError, Result};

/// Sampler returning whatever reading the test sets; `None` fails.
pub struct FakeSampler {
    reading: Mutex<Option<ResourceSample>>,
    pub calls: AtomicUsize,
}

impl FakeSampler {
    pub fn new(cpu_percent: f32, memory_percent: f32) -> Self {
        Self {
            reading: Mutex::new(Some(ResourceSample {
                cpu_percent,
                memory_percent,
            })),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            reading: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set(&self, cpu_percent: f32, memory_percent: f32) {
        *self.reading.lock().unwrap() = Some(ResourceSample {
            cpu_percent,
            memory_percent,
        });
    }
}

impl ResourceSampler for FakeSampler {
    fn sample(&self) -> Result<ResourceSample> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.reading
            .lock()
            .unwrap()
            .ok_or_else(|| AppError::Monitor("sampler offline".into()))
    }
}

/// Generator answering `answer to {query}` after an optional delay.
///
/// Tracks concurrency and, for every generation start, how many
/// generations had already finished.
#[derive(Default)]
pub struct FakeGenerator {
    pub delay: Duration,
    pub fail_queries: HashSet<String>,
    pub panic_queries: HashSet<String>,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub completed: AtomicUsize,
    pub starts: Mutex<Vec<usize>>,
    pub histories: Mutex<Vec<(String, usize)>>,
}

impl FakeGenerator {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }
}

impl AnswerGenerator for FakeGenerator {
    fn generate<'a>(
        &'a self,
        query: &'a str,
        history: &'a [HistoryEntry],
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        Box::pin(async move {
            self.starts
                .lock()
                .unwrap()
                .push(self.completed.load(Ordering::SeqCst));
            self.histories
                .lock()
                .unwrap()
                .push((query.to_owned(), history.len()));
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.completed.fetch_add(1, Ordering::SeqCst);

            if self.panic_queries.contains(query) {
                panic!("generator blew up on {query}");
            }
            if self.fail_queries.contains(query) {
                return Err(AppError::Generation(format!("cannot answer {query}")));
            }
            Ok(format!("answer to {query}"))
        })
    }
}

/// Notifier recording `(recipient, message)` pairs.
#[derive(Default)]
pub struct FakeNotifier {
    pub fail_recipients: HashSet<String>,
    pub sent: Mutex<Vec<(String, String)>>,
}

impl Notifier for FakeNotifier {
    fn send<'a>(
        &'a self,
        message: &'a str,
        recipient: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            if self.fail_recipients.contains(recipient) {
                return Err(AppError::Notify(format!("{recipient} unreachable")));
            }
            self.sent
                .lock()
                .unwrap()
                .push((recipient.to_owned(), message.to_owned()));
            Ok(())
        })
    }
}

/// Store recording `(sender, query, answer)` triples.
#[derive(Default)]
pub struct FakeStore {
    pub fail_senders: HashSet<String>,
    pub history_fails: bool,
    pub history: Vec<HistoryEntry>,
    pub recorded: Mutex<Vec<(String, String, String)>>,
}

impl FakeStore {
    pub fn recorded_queries(&self) -> Vec<String> {
        let mut queries: Vec<String> = self
            .recorded
            .lock()
            .unwrap()
            .iter()
            .map(|(_, query, _)| query.clone())
            .collect();
        queries.sort();
        queries
    }
}

impl ConversationStore for FakeStore {
    fn recent_history<'a>(
        &'a self,
        _sender_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<HistoryEntry>>> + Send + 'a>> {
        Box::pin(async move {
            if self.history_fails {
                return Err(AppError::Db("history table locked".into()));
            }
            Ok(self.history.clone())
        })
    }

    fn record<'a>(
        &'a self,
        sender_id: &'a str,
        query: &'a str,
        answer: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>> {
        Box::pin(async move {
            if self.fail_senders.contains(sender_id) {
                return Err(AppError::Db(format!("insert failed for {sender_id}")));
            }
            self.recorded.lock().unwrap().push((
                sender_id.to_owned(),
                query.to_owned(),
                answer.to_owned(),
            ));
            Ok(true)
        })
    }
}
