//! Per-parameter extraction from a [`DispatchRequest`]: handlers declare the pieces of a
//! request they need as typed function parameters instead of picking them out of a raw request
//! object by hand.

use async_trait::async_trait;
use derive_more::{Deref, DerefMut};
use serde::de::DeserializeOwned;

use super::{Ctx, DispatchRequest, HandlerError};

/// Extracts `Self` from a request. Implemented for [`Args`], [`State`], [`Ctx`], and
/// [`RawArgs`] below; application code can implement it for its own extractor types too.
#[async_trait]
pub trait Extract<S>: Sized {
    async fn extract(req: &mut DispatchRequest<S>) -> Result<Self, HandlerError>;
}

/// Deserializes the request's `args` object into `T`.
#[derive(Debug, Deref, DerefMut)]
pub struct Args<T>(pub T);

#[async_trait]
impl<S, T> Extract<S> for Args<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    async fn extract(req: &mut DispatchRequest<S>) -> Result<Self, HandlerError> {
        serde_json::from_value(req.args.clone())
            .map(Args)
            .map_err(|e| HandlerError::new("MalformedRequest", e.to_string()))
    }
}

/// The request's `args` object, undecoded, for handlers that want to inspect it before
/// committing to a shape.
#[derive(Debug, Deref, DerefMut)]
pub struct RawArgs(pub serde_json::Value);

#[async_trait]
impl<S: Send + Sync> Extract<S> for RawArgs {
    async fn extract(req: &mut DispatchRequest<S>) -> Result<Self, HandlerError> {
        Ok(RawArgs(req.args.clone()))
    }
}

/// Derives `T` from the dispatcher's shared state via `From<&S>`.
#[derive(Debug, Deref, DerefMut)]
pub struct State<T>(pub T);

#[async_trait]
impl<S, T> Extract<S> for State<T>
where
    S: Send + Sync + 'static,
    T: for<'a> From<&'a S> + Send,
{
    async fn extract(req: &mut DispatchRequest<S>) -> Result<Self, HandlerError> {
        Ok(State(req.state.as_ref().into()))
    }
}

#[async_trait]
impl<S: Send + Sync> Extract<S> for Ctx {
    async fn extract(req: &mut DispatchRequest<S>) -> Result<Self, HandlerError> {
        Ok(req.ctx.clone())
    }
}
