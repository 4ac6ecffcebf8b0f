//! Query and path extractors that reject with the uniform error body.

use axum::extract::{FromRequestParts, Path, Query};

use super::error::ApiError;

#[derive(Debug, FromRequestParts)]
#[from_request(via(Query), rejection(ApiError))]
pub struct QueryParams<T>(pub T);

#[derive(Debug, FromRequestParts)]
#[from_request(via(Path), rejection(ApiError))]
pub struct PathParam<T>(pub T);
