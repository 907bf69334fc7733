//! Dispatch core for the unified inference gateway.
//!
//! This crate owns everything between "a canonical chat-completion request
//! arrived" and "a canonical response or chunk stream left" — the model and
//! provider registry, request preparation, upstream dispatch, stream
//! transformation, usage/cost accounting, and credential validation.
//!
//! HTTP framing itself is kept to the one routed endpoint; everything above
//! it (auth, rate limiting, org/project resolution) is the caller's concern.

mod canonical;
mod dispatcher;
mod error;
mod image;
mod key_validator;
mod provider;
mod registry;
mod request;
mod request_preparer;
mod stream_transformer;
pub mod usage_cost;

pub use canonical::{
    CanonicalChoice, CanonicalChoiceDelta, CanonicalChunk, CanonicalMessage, CanonicalMessageDelta, CanonicalRequest,
    CanonicalResponse, CanonicalRole, CanonicalStreamingToolCall, CanonicalTool, CanonicalToolCall,
    CanonicalToolChoice, CanonicalUsage,
};
pub use dispatcher::{CanonicalStream, Dispatcher, DispatchOutcome};
pub use error::{ErrorKind, LlmError};
pub use key_validator::{KeyValidation, validate_provider_key};
pub use registry::{ModelDescriptor, ProviderDescriptor, ProviderMapping, Registry};
pub use request::RequestContext;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::HeaderMap,
    response::{
        IntoResponse,
        sse::{Event, KeepAlive, Sse},
    },
    routing::post,
};
use axum_serde::Sonic;
use futures::StreamExt;
use store::Store;

/// Shared application state for the routed endpoint.
#[derive(Clone)]
pub struct AppState {
    dispatcher: Arc<Dispatcher>,
}

impl AppState {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }
}

/// Builds the router exposing `POST /v1/chat/completions`.
pub fn router(dispatcher: Arc<Dispatcher>) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .with_state(AppState::new(dispatcher))
}

/// Convenience constructor wiring a [`Dispatcher`] from its parts, mirroring
/// the shape a binary crate assembles at startup.
pub fn new_dispatcher(registry: Registry, http_client: reqwest::Client, store: Store) -> Dispatcher {
    Dispatcher::new(registry, http_client, store)
}

async fn chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Sonic(request): Sonic<CanonicalRequest>,
) -> axum::response::Response {
    let ctx = request::extract_context(&headers);

    let ctx = match ctx {
        Ok(ctx) => ctx,
        Err(err) => return err.into_response(),
    };

    let stream = request.stream.unwrap_or(false);

    match state.dispatcher.dispatch(request, ctx).await {
        Ok(DispatchOutcome::Response(response)) => Json(response).into_response(),
        Ok(DispatchOutcome::Stream(stream_body)) => stream_to_sse(stream_body).into_response(),
        Err(err) => {
            if stream {
                log::warn!("dispatch failed before streaming began: {err}");
            }
            err.into_response()
        }
    }
}

fn stream_to_sse(stream: CanonicalStream) -> Sse<impl futures::Stream<Item = Result<Event, std::convert::Infallible>>> {
    let events = stream.map(|chunk| {
        let event = match chunk {
            Ok(chunk) => {
                let json = sonic_rs::to_string(&chunk).unwrap_or_else(|_| "{}".to_owned());
                Event::default().data(json)
            }
            Err(err) => {
                log::warn!("error mid-stream: {err}");
                let body = sonic_rs::json!({ "error": { "message": err.client_message(), "type": err.error_type() } });
                Event::default().data(body.to_string())
            }
        };

        Ok(event)
    });

    let terminated = events.chain(futures::stream::once(async { Ok(Event::default().data("[DONE]")) }));

    Sse::new(terminated).keep_alive(KeepAlive::default())
}
