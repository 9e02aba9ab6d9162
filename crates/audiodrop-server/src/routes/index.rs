//! Landing page.

use axum::{response::Html, routing::get, Router};

const INDEX_HTML: &str = include_str!("../../static/index.html");

pub fn router() -> Router {
    Router::new().route("/", get(index))
}

/// GET /
async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}
