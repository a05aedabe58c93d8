//! Product catalogue.

use axum::{body::Body, http::Request, response::IntoResponse, Json};
use futures_util::future::{BoxFuture, FutureExt};

use crate::pipeline::{HandlerContext, HandlerResult};

/// `GET /api/products`
pub fn list(ctx: &mut HandlerContext, _request: Request<Body>) -> BoxFuture<'_, HandlerResult> {
    async move {
        let products = ctx.db().list_products().await?;
        Ok(Json(products).into_response())
    }
    .boxed()
}
