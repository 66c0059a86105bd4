use axum::response::IntoResponse;

/// Undocumented root: service name and version, nothing else.
pub async fn root() -> impl IntoResponse {
    concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION"))
}
