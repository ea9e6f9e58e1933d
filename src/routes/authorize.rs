use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Redirect, Response};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::Deserialize;

use super::{redirect, AppState, SharedState, FORBIDDEN};
use crate::error::SignInError;
use crate::session::{self, Identity, IdentityToken};

/// Query parameters the provider appends to the callback URL.
#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    code: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// GET /get_code: send the visitor to the provider's authorize page
#[tracing::instrument(name = "get_code", skip_all)]
pub async fn get_code(State(state): State<SharedState>) -> Redirect {
    let url = authorize_url(
        &state.authorize_url,
        &state.client_id,
        &callback_url(&state.public_url),
    );
    tracing::debug!(%url, "redirecting to identity provider");
    Redirect::to(&url)
}

/// GET /authorise: OAuth callback; the only place the session cookie is set
#[tracing::instrument(name = "authorise", skip_all)]
pub async fn authorise(
    State(state): State<SharedState>,
    query: Result<Query<CallbackQuery>, QueryRejection>,
) -> Response {
    let query = match query {
        Ok(Query(query)) => query,
        Err(e) => {
            tracing::warn!(
                error.kind = "callback_query",
                error.message = %e,
                "unreadable callback query"
            );
            return redirect(FORBIDDEN);
        }
    };

    if let Some(error) = &query.error {
        tracing::warn!(
            provider_error = %error,
            description = query.error_description.as_deref().unwrap_or(""),
            "provider declined authorization"
        );
        return redirect(FORBIDDEN);
    }

    let Some(code) = query.code.filter(|c| !c.is_empty()) else {
        tracing::warn!("callback without an authorization code");
        return redirect(FORBIDDEN);
    };

    match sign_in(&state, &code).await {
        Ok((token, identity)) => {
            tracing::info!(uid = %identity.uid, "visitor signed in");
            let jar = CookieJar::new().add(session_cookie(&state, token));
            (jar, Redirect::to(&state.public_url)).into_response()
        }
        Err(e) => {
            tracing::error!(error.kind = e.kind(), error.message = %e, "sign-in failed");
            redirect(FORBIDDEN)
        }
    }
}

async fn sign_in(
    state: &AppState,
    code: &str,
) -> Result<(IdentityToken, Identity), SignInError> {
    let access_token = state.identity.exchange_code_for_access_token(code).await?;
    let token = state
        .identity
        .exchange_access_token_for_identity(&access_token)
        .await?;
    let identity = session::decode(&token, &state.session_secret)?;
    Ok((token, identity))
}

fn session_cookie(state: &AppState, token: IdentityToken) -> Cookie<'static> {
    Cookie::build((state.cookie_name.clone(), token.as_str().to_owned()))
        .http_only(true)
        .secure(state.secure_cookie)
        .same_site(SameSite::Lax)
        .path("/")
        .build()
}

fn callback_url(public_url: &str) -> String {
    format!("{public_url}/authorise")
}

/// Build the provider authorize URL for the authorization code flow.
fn authorize_url(base: &str, client_id: &str, redirect_uri: &str) -> String {
    let separator = if base.contains('?') { '&' } else { '?' };
    format!(
        "{base}{separator}response_type=code&client_id={}&redirect_uri={}",
        urlencoding::encode(client_id),
        urlencoding::encode(redirect_uri),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorize_url_encodes_parameters() {
        let url = authorize_url(
            "https://oauth.yandex.ru/authorize",
            "client 1",
            "https://gateway.example.com/authorise",
        );
        assert_eq!(
            url,
            "https://oauth.yandex.ru/authorize?response_type=code&client_id=client%201\
             &redirect_uri=https%3A%2F%2Fgateway.example.com%2Fauthorise"
        );
    }

    #[test]
    fn test_authorize_url_keeps_existing_query() {
        let url = authorize_url("https://idp.example.com/auth?prompt=login", "c", "https://g/authorise");
        assert!(url.starts_with("https://idp.example.com/auth?prompt=login&response_type=code"));
    }

    #[test]
    fn test_callback_url() {
        assert_eq!(
            callback_url("https://gateway.example.com"),
            "https://gateway.example.com/authorise"
        );
    }
}
