use askama::Template;
use axum::response::Response;

use super::{render_page, FORBIDDEN};

#[derive(Template)]
#[template(path = "auth_page.html")]
struct AuthPage;

#[derive(Template)]
#[template(path = "forbidden.html")]
struct ForbiddenPage;

/// GET /auth_page: sign-in prompt
#[tracing::instrument(name = "auth_page")]
pub async fn auth_page() -> Response {
    tracing::debug!("rendering sign-in prompt");
    render_page(&AuthPage, Some(FORBIDDEN))
}

/// GET /forbidden: access denied, with a link to retry sign-in
#[tracing::instrument(name = "forbidden")]
pub async fn forbidden() -> Response {
    tracing::debug!("rendering access denied page");
    render_page(&ForbiddenPage, None)
}
