//! HTTP surface.
//!
//! A visitor is in one of three states, decided per request from the session
//! cookie alone: no cookie, a cookie that fails verification, or a verified
//! identity. Only `/authorise` ever sets the cookie.

pub mod authorize;
pub mod embed;
pub mod pages;

use std::sync::Arc;

use askama::Template;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::Router;
use axum_extra::extract::cookie::CookieJar;

use crate::config::Config;
use crate::embed::{EmbedSigningKey, EmbedTokenIssuer};
use crate::error::ConfigError;
use crate::identity::IdentityClient;
use crate::session::{self, Identity, IdentityToken, SessionSecret};

pub const AUTH_PAGE: &str = "/auth_page";
pub const FORBIDDEN: &str = "/forbidden";

/// Immutable per-process state shared by all handlers.
pub struct AppState {
    identity: IdentityClient,
    session_secret: SessionSecret,
    embed: EmbedTokenIssuer,
    cookie_name: String,
    secure_cookie: bool,
    public_url: String,
    client_id: String,
    authorize_url: String,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    /// Build handler state from a validated configuration.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let pem = config.embed.private_key_pem()?;
        let key = EmbedSigningKey::from_rsa_pem(&pem).map_err(|e| ConfigError::Invalid {
            field: "embed.private_key",
            reason: e.to_string(),
        })?;

        Ok(Self {
            identity: IdentityClient::new(&config.oauth)?,
            session_secret: SessionSecret::new(config.oauth.client_secret.as_bytes()),
            embed: EmbedTokenIssuer::new(
                config.embed.embed_id.clone(),
                key,
                config.embed.dashboard_url.clone(),
            ),
            cookie_name: config.session.cookie_name.clone(),
            secure_cookie: config.session.secure,
            public_url: config.server.public_url.clone(),
            client_id: config.oauth.client_id.clone(),
            authorize_url: config.oauth.authorize_url.clone(),
        })
    }

    fn session(&self, jar: &CookieJar) -> Session {
        match jar.get(&self.cookie_name) {
            None => Session::Missing,
            Some(cookie) => {
                let token = IdentityToken::new(cookie.value());
                match session::verify(&token, &self.session_secret) {
                    Some(identity) => Session::Valid(identity),
                    None => Session::Rejected,
                }
            }
        }
    }

    /// The verified visitor, or the redirect a page must answer with instead.
    fn require_identity(&self, jar: &CookieJar) -> Result<Identity, Response> {
        match self.session(jar) {
            Session::Missing => {
                tracing::debug!("no session cookie, redirecting to {AUTH_PAGE}");
                Err(redirect(AUTH_PAGE))
            }
            Session::Rejected => Err(redirect(FORBIDDEN)),
            Session::Valid(identity) => Ok(identity),
        }
    }
}

/// What the session cookie says about the visitor.
#[derive(Debug)]
enum Session {
    Missing,
    Rejected,
    Valid(Identity),
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(embed::home))
        .route("/get_datalens_url", get(embed::get_datalens_url))
        .route(AUTH_PAGE, get(pages::auth_page))
        .route(FORBIDDEN, get(pages::forbidden))
        .route("/get_code", get(authorize::get_code))
        .route("/authorise", get(authorize::authorise))
        .with_state(state)
}

fn redirect(to: &str) -> Response {
    Redirect::to(to).into_response()
}

/// Render `page`, redirecting to `on_error` if that fails. The forbidden page
/// passes `None` since it cannot redirect to itself.
fn render_page<T: Template>(page: &T, on_error: Option<&str>) -> Response {
    match page.render() {
        Ok(html) => Html(html).into_response(),
        Err(e) => {
            tracing::error!(error.kind = "template", error.message = %e, "failed to render page");
            match on_error {
                Some(to) => redirect(to),
                None => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::tests::{read_claims, test_issuer};
    use crate::identity::tests::oauth_config;
    use crate::session::tests::{now, provider_token};
    use crate::session::VisitorId;
    use axum::body::Body;
    use axum::http::{header, Request};
    use axum_extra::extract::cookie::Cookie;
    use serde_json::json;
    use tower::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PUBLIC_URL: &str = "https://gateway.example.com";
    const CLIENT_SECRET: &[u8] = b"s3cret";

    fn test_state(provider_uri: &str) -> SharedState {
        let oauth = oauth_config(provider_uri);
        Arc::new(AppState {
            identity: IdentityClient::new(&oauth).unwrap(),
            session_secret: SessionSecret::new(oauth.client_secret.as_bytes()),
            embed: test_issuer(),
            cookie_name: "datalensEmbedToken".to_string(),
            secure_cookie: true,
            public_url: PUBLIC_URL.to_string(),
            client_id: oauth.client_id.clone(),
            authorize_url: oauth.authorize_url.clone(),
        })
    }

    fn app() -> Router {
        router(test_state("http://127.0.0.1:1"))
    }

    async fn send(app: Router, uri: &str, cookie: Option<&str>) -> Response {
        let mut request = Request::builder().uri(uri);
        if let Some(token) = cookie {
            request = request.header(header::COOKIE, format!("datalensEmbedToken={token}"));
        }
        app.oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    fn location(response: &Response) -> &str {
        response.headers()[header::LOCATION].to_str().unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn valid_cookie(uid: u64) -> String {
        provider_token(
            json!({ "uid": uid, "exp": now() + 600, "name": "Ada" }),
            CLIENT_SECRET,
        )
        .as_str()
        .to_string()
    }

    #[tokio::test]
    async fn test_home_without_cookie_goes_to_auth_page() {
        let response = send(app(), "/", None).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), AUTH_PAGE);
    }

    #[tokio::test]
    async fn test_datalens_url_without_cookie_goes_to_auth_page() {
        let response = send(app(), "/get_datalens_url", None).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), AUTH_PAGE);
    }

    #[tokio::test]
    async fn test_home_with_session_renders_embed() {
        let response = send(app(), "/", Some(&valid_cookie(42))).await;
        assert_eq!(response.status(), StatusCode::OK);

        let html = body_text(response).await;
        assert!(html.contains("Hello, Ada! Your uid is 42"));

        let marker = "#dl_embed_token=";
        let start = html.find(marker).unwrap() + marker.len();
        let token: String = html[start..].chars().take_while(|c| *c != '"').collect();
        let claims = read_claims(&token);
        assert_eq!(claims.params.uid, VisitorId::Numeric(42));
        assert_eq!(claims.exp - claims.iat, 60);
    }

    #[tokio::test]
    async fn test_home_is_repeatable() {
        let cookie = valid_cookie(42);
        let app = app();
        for _ in 0..2 {
            let response = send(app.clone(), "/", Some(&cookie)).await;
            assert_eq!(response.status(), StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn test_datalens_url_redirects_to_dashboard() {
        let response = send(app(), "/get_datalens_url", Some(&valid_cookie(9))).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);

        let target = location(&response);
        let token = target
            .strip_prefix("https://datalens.yandex.cloud/embeds/dash#dl_embed_token=")
            .unwrap();
        assert_eq!(read_claims(token).params.uid, VisitorId::Numeric(9));
    }

    #[tokio::test]
    async fn test_cookie_with_wrong_secret_is_forbidden() {
        let forged = provider_token(json!({ "uid": 42, "exp": now() + 600 }), b"guessed");

        for uri in ["/", "/get_datalens_url"] {
            let response = send(app(), uri, Some(forged.as_str())).await;
            assert_eq!(response.status(), StatusCode::SEE_OTHER);
            assert_eq!(location(&response), FORBIDDEN);
        }
    }

    #[tokio::test]
    async fn test_expired_cookie_is_forbidden() {
        let expired = provider_token(json!({ "uid": 42, "exp": now() - 1 }), CLIENT_SECRET);
        let response = send(app(), "/", Some(expired.as_str())).await;
        assert_eq!(location(&response), FORBIDDEN);
    }

    #[tokio::test]
    async fn test_static_pages_link_to_sign_in() {
        for uri in [AUTH_PAGE, FORBIDDEN] {
            let response = send(app(), uri, None).await;
            assert_eq!(response.status(), StatusCode::OK);
            assert!(body_text(response).await.contains(r#"href="/get_code""#));
        }
    }

    #[test]
    fn test_require_identity_outcomes() {
        let state = test_state("http://127.0.0.1:1");

        let missing = state.require_identity(&CookieJar::new()).unwrap_err();
        assert_eq!(location(&missing), AUTH_PAGE);

        let forged = provider_token(json!({ "uid": 5, "exp": now() + 600 }), b"guessed");
        let jar = CookieJar::new().add(Cookie::new("datalensEmbedToken", forged.as_str().to_owned()));
        assert_eq!(location(&state.require_identity(&jar).unwrap_err()), FORBIDDEN);

        let jar = CookieJar::new().add(Cookie::new("datalensEmbedToken", valid_cookie(5)));
        assert_eq!(state.require_identity(&jar).unwrap().uid, VisitorId::Numeric(5));
    }

    struct Unprintable;

    impl std::fmt::Display for Unprintable {
        fn fmt(&self, _: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            Err(std::fmt::Error)
        }
    }

    #[derive(Template)]
    #[template(source = "<p>{{ value }}</p>", ext = "html")]
    struct BrokenPage {
        value: Unprintable,
    }

    #[test]
    fn test_page_render_failure_redirects() {
        let page = BrokenPage { value: Unprintable };

        let response = render_page(&page, Some(FORBIDDEN));
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), FORBIDDEN);

        let response = render_page(&page, None);
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.headers().get(header::LOCATION).is_none());
    }

    #[tokio::test]
    async fn test_get_code_redirects_to_provider() {
        let response = send(app(), "/get_code", None).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);

        let target = url::Url::parse(location(&response)).unwrap();
        assert_eq!(target.path(), "/authorize");
        let pairs: Vec<(String, String)> = target.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("response_type".to_string(), "code".to_string()),
                ("client_id".to_string(), "client-123".to_string()),
                (
                    "redirect_uri".to_string(),
                    "https://gateway.example.com/authorise".to_string()
                ),
            ]
        );
    }

    #[tokio::test]
    async fn test_authorise_sets_cookie_on_success() {
        let provider = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "access_token": "tok1" })))
            .mount(&provider)
            .await;
        let identity = provider_token(json!({ "uid": 7, "exp": now() + 3600 }), CLIENT_SECRET);
        Mock::given(method("GET"))
            .and(path("/info"))
            .respond_with(ResponseTemplate::new(200).set_body_string(identity.as_str()))
            .mount(&provider)
            .await;

        let response = send(router(test_state(&provider.uri())), "/authorise?code=abc", None).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), PUBLIC_URL);

        let cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
        assert!(cookie.starts_with(&format!("datalensEmbedToken={}", identity.as_str())));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("Secure"));
        assert!(cookie.contains("Path=/"));
    }

    #[tokio::test]
    async fn test_authorise_rejected_code_is_forbidden() {
        let provider = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "bad_verification_code",
                "error_description": "Invalid code"
            })))
            .mount(&provider)
            .await;
        Mock::given(method("GET"))
            .and(path("/info"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&provider)
            .await;

        let response = send(router(test_state(&provider.uri())), "/authorise?code=bad", None).await;
        assert_eq!(location(&response), FORBIDDEN);
        assert!(response.headers().get(header::SET_COOKIE).is_none());
    }

    #[tokio::test]
    async fn test_authorise_unverifiable_identity_is_forbidden() {
        let provider = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "access_token": "tok1" })))
            .mount(&provider)
            .await;
        let forged = provider_token(json!({ "uid": 7, "exp": now() + 3600 }), b"not-the-secret");
        Mock::given(method("GET"))
            .and(path("/info"))
            .respond_with(ResponseTemplate::new(200).set_body_string(forged.as_str()))
            .mount(&provider)
            .await;

        let response = send(router(test_state(&provider.uri())), "/authorise?code=abc", None).await;
        assert_eq!(location(&response), FORBIDDEN);
        assert!(response.headers().get(header::SET_COOKIE).is_none());
    }

    #[tokio::test]
    async fn test_authorise_without_code_skips_provider() {
        let provider = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&provider)
            .await;

        for uri in [
            "/authorise",
            "/authorise?code=",
            "/authorise?error=access_denied",
            "/authorise?code=a&code=b",
        ] {
            let response = send(router(test_state(&provider.uri())), uri, None).await;
            assert_eq!(location(&response), FORBIDDEN);
            assert!(response.headers().get(header::SET_COOKIE).is_none());
        }
    }
}
