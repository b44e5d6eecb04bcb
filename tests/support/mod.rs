#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use chat_relay::agent::{CompletionGateway, Fragment, FragmentStream};
use chat_relay::db::blob_store::MemoryBlobStore;
use chat_relay::db::topic_repository::TopicRepository;
use chat_relay::errors::AppError;
use chat_relay::models::{Role, Turn};
use chat_relay::service::chat_service::ChatService;
use futures_util::StreamExt;

/// Sets its flag when dropped, i.e. when the consumer let go of the upstream stream.
struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Gateway that replays canned fragments, optionally with a delay between
/// them and an error after a given number of fragments.
#[derive(Default)]
pub struct StubGateway {
    pub fragments: Vec<String>,
    pub fail_after: Option<(usize, fn() -> AppError)>,
    pub delay: Duration,
    pub calls: AtomicUsize,
    pub released: Arc<AtomicBool>,
}

impl StubGateway {
    pub fn replying(fragments: &[&str]) -> Self {
        Self { fragments: fragments.iter().map(|f| f.to_string()).collect(), ..Default::default() }
    }

    pub fn failing_after(fragments: &[&str], count: usize, error: fn() -> AppError) -> Self {
        Self { fail_after: Some((count, error)), ..Self::replying(fragments) }
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        Self { delay, ..self }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionGateway for StubGateway {
    async fn complete(&self, _turns: Vec<Turn>) -> Result<String, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some((_, error)) = self.fail_after {
            return Err(error());
        }
        Ok(self.fragments.concat())
    }

    async fn stream(&self, _turns: Vec<Turn>) -> Result<FragmentStream, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let fragments = self.fragments.clone();
        let fail_after = self.fail_after;
        let delay = self.delay;
        let flag = DropFlag(self.released.clone());

        let stream = async_stream::stream! {
            let _flag = flag;
            for (i, text) in fragments.into_iter().enumerate() {
                if let Some((count, error)) = fail_after {
                    if i == count {
                        yield Err(error());
                        return;
                    }
                }
                if i > 0 && !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                yield Ok(Fragment::new((i == 0).then_some(Role::Assistant), text));
            }
            if let Some((_, error)) = fail_after {
                yield Err(error());
            }
        };
        Ok(stream.boxed())
    }
}

pub fn upstream_failure() -> AppError {
    AppError::UpstreamFailure { message: "upstream exploded".into() }
}

pub fn context_too_large() -> AppError {
    AppError::ContextTooLarge { message: "maximum context length is 8192 tokens".into() }
}

pub struct TestApp {
    pub router: Router,
    pub gateway: Arc<StubGateway>,
    pub blobs: Arc<MemoryBlobStore>,
}

pub fn test_app(gateway: StubGateway) -> TestApp {
    let gateway = Arc::new(gateway);
    let blobs = Arc::new(MemoryBlobStore::new());
    let service = ChatService::new(gateway.clone(), TopicRepository::new(blobs.clone()));
    TestApp { router: chat_relay::router(service), gateway, blobs }
}
