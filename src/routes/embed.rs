use askama::Template;
use axum::extract::State;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum_extra::extract::cookie::CookieJar;
use thiserror::Error;

use super::{redirect, SharedState, FORBIDDEN};
use crate::error::EmbedTokenError;
use crate::session::{Identity, VisitorId};

#[derive(Template)]
#[template(path = "embed.html")]
struct EmbedPage<'a> {
    name: &'a str,
    uid: &'a VisitorId,
    embed_url: &'a str,
}

#[derive(Debug, Error)]
enum RenderError {
    #[error(transparent)]
    Token(#[from] EmbedTokenError),

    #[error("template rendering failed: {0}")]
    Template(#[from] askama::Error),
}

impl RenderError {
    fn kind(&self) -> &'static str {
        match self {
            Self::Token(e) => e.kind(),
            Self::Template(_) => "template",
        }
    }
}

/// GET /: dashboard page for a signed-in visitor
#[tracing::instrument(name = "home", skip_all)]
pub async fn home(State(state): State<SharedState>, jar: CookieJar) -> Response {
    let identity = match state.require_identity(&jar) {
        Ok(identity) => identity,
        Err(response) => return response,
    };

    match render_embed_page(&state, &identity) {
        Ok(html) => Html(html).into_response(),
        Err(e) => {
            tracing::error!(
                error.kind = e.kind(),
                error.message = %e,
                uid = %identity.uid,
                "failed to build embed page"
            );
            redirect(FORBIDDEN)
        }
    }
}

fn render_embed_page(state: &SharedState, identity: &Identity) -> Result<String, RenderError> {
    let token = state.embed.issue(&identity.uid)?;
    let embed_url = state.embed.embed_url(&token);
    let name = identity
        .name
        .as_deref()
        .or(identity.login.as_deref())
        .unwrap_or("visitor");

    let page = EmbedPage {
        name,
        uid: &identity.uid,
        embed_url: &embed_url,
    };
    Ok(page.render()?)
}

/// GET /get_datalens_url: redirect straight to the embedded dashboard
#[tracing::instrument(name = "get_datalens_url", skip_all)]
pub async fn get_datalens_url(State(state): State<SharedState>, jar: CookieJar) -> Response {
    let identity = match state.require_identity(&jar) {
        Ok(identity) => identity,
        Err(response) => return response,
    };

    match state.embed.issue(&identity.uid) {
        Ok(token) => Redirect::to(&state.embed.embed_url(&token)).into_response(),
        Err(e) => {
            tracing::error!(
                error.kind = e.kind(),
                error.message = %e,
                uid = %identity.uid,
                "failed to issue embed token"
            );
            redirect(FORBIDDEN)
        }
    }
}
