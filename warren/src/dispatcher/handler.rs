//! The `Handler<Args, Res, S>` trait and its blanket impl for plain async functions, generated
//! for a range of arities by [`impl_handler`]. A handler's `Future::Output` is always
//! `Result<Res, HandlerError>`, since this crate's wire format carries failures in a dedicated
//! envelope field rather than needing the response type itself to represent them.

use std::future::Future;

use async_trait::async_trait;

use super::{DispatchRequest, Extract, HandlerError, Reply};

/// A handler callable with some tuple of extractable `Args`, producing a `Res` convertible
/// into a [`Reply`].
#[async_trait]
pub trait Handler<Args, Res, S>: Clone + Send + Sync + 'static
where
    Res: Into<Reply>,
{
    async fn call(self, req: &mut DispatchRequest<S>) -> Result<Res, HandlerError>;
}

#[async_trait]
impl<Func, Fut, Res, S> Handler<(), Res, S> for Func
where
    Func: FnOnce() -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<Res, HandlerError>> + Send,
    Res: Into<Reply>,
    S: Send + Sync,
{
    async fn call(self, _req: &mut DispatchRequest<S>) -> Result<Res, HandlerError> {
        self().await
    }
}

macro_rules! impl_handler {
    ($($ty:ident),+) => {
        #[async_trait]
        impl<Func, Fut, Res, S, $($ty,)+> Handler<($($ty,)+), Res, S> for Func
        where
            Func: FnOnce($($ty,)+) -> Fut + Clone + Send + Sync + 'static,
            Fut: Future<Output = Result<Res, HandlerError>> + Send,
            Res: Into<Reply>,
            S: Send + Sync,
            $( $ty: Extract<S> + Send, )+
        {
            async fn call(self, req: &mut DispatchRequest<S>) -> Result<Res, HandlerError> {
                $( let $ty = $ty::extract(req).await?; )+
                self($($ty,)+).await
            }
        }
    };
}

impl_handler!(T1);
impl_handler!(T1, T2);
impl_handler!(T1, T2, T3);
impl_handler!(T1, T2, T3, T4);
impl_handler!(T1, T2, T3, T4, T5);
