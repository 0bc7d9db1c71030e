use crate::{Error, HttpRequest, HttpResponse, Lifecycle};
use async_lock::Semaphore;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Moves requests off the I/O side onto a bounded set of blocking workers.
///
/// At most `application.workers` requests are processed at once; further requests wait for a permit.
/// A request whose lifecycle panics is answered by the exception handler.
///
/// # Example
///
/// ```rust
/// # use std::collections::HashMap;
/// # use request_lifecycle::{Config, Dispatcher, Lifecycle, Router};
/// # async_std::task::block_on(async {
/// let source = HashMap::from([(
///     "application.secret".to_owned(),
///     "a-secret-of-at-least-16-chars".to_owned(),
/// )]);
/// let config = Config::from_source(&source).unwrap();
/// let lifecycle = Lifecycle::builder(config, Router::new().freeze()).build().unwrap();
/// let dispatcher = Dispatcher::new(lifecycle);
///
/// let request = http::Request::get("/missing").body(Vec::new()).unwrap();
/// let response = dispatcher.dispatch(request).await;
/// assert_eq!(response.status(), http::StatusCode::NOT_FOUND);
/// # });
/// ```
#[derive(Debug)]
pub struct Dispatcher {
    lifecycle: Arc<Lifecycle>,
    permits: Semaphore,
}

impl Dispatcher {
    /// Create a dispatcher with as many workers as configured.
    pub fn new(lifecycle: Lifecycle) -> Self {
        let workers = lifecycle.config().workers;
        Self {
            lifecycle: Arc::new(lifecycle),
            permits: Semaphore::new(workers),
        }
    }

    /// The lifecycle run by the workers.
    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// Process `request` on a worker and wait for its response.
    pub async fn dispatch(&self, request: HttpRequest) -> HttpResponse {
        let _permit = self.permits.acquire().await;
        let lifecycle = Arc::clone(&self.lifecycle);

        let outcome = async_std::task::spawn_blocking(move || {
            std::panic::catch_unwind(AssertUnwindSafe(|| lifecycle.handle(request)))
        })
        .await;

        match outcome {
            Ok(response) => response,
            Err(panic) => {
                let error = Error::Worker(panic_message(panic.as_ref()));
                log::error!("{error}");
                self.lifecycle.error_response(&error)
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "the request worker panicked".to_owned()
    }
}
