use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use supercoin::auth::{
    now_ms, AuthAdapter, AuthProviderName, BrowserLauncher, CallbackServer, CredentialKind,
    GeminiAuth, GoogleOAuthConfig, LoginOptions, OAuthStateStore, TokenData, TokenStore,
    GEMINI_SCOPE,
};
use supercoin::error::HubError;
use tempfile::TempDir;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Clone, Copy)]
enum Consent {
    Approve,
    ForgeState,
    Deny,
}

/// Stands in for the user's browser: reads the consent URL and immediately
/// hits the redirect URI the way Google would.
struct RedirectingBrowser {
    consent: Consent,
    opened: Mutex<Vec<String>>,
}

impl RedirectingBrowser {
    fn new(consent: Consent) -> Arc<Self> {
        Arc::new(Self {
            consent,
            opened: Mutex::new(Vec::new()),
        })
    }

    fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }
}

impl BrowserLauncher for RedirectingBrowser {
    fn open(&self, url: &str) -> anyhow::Result<()> {
        self.opened.lock().unwrap().push(url.to_string());

        let consent = reqwest::Url::parse(url)?;
        let params: HashMap<String, String> = consent.query_pairs().into_owned().collect();
        let mut redirect = reqwest::Url::parse(&params["redirect_uri"])?;
        match self.consent {
            Consent::Approve => {
                redirect
                    .query_pairs_mut()
                    .append_pair("code", "auth-code-1")
                    .append_pair("state", &params["state"]);
            }
            Consent::ForgeState => {
                redirect
                    .query_pairs_mut()
                    .append_pair("code", "stolen-code")
                    .append_pair("state", "forged-state");
            }
            Consent::Deny => {
                redirect
                    .query_pairs_mut()
                    .append_pair("error", "access_denied")
                    .append_pair("error_description", "The user denied access")
                    .append_pair("state", &params["state"]);
            }
        }

        tokio::spawn(async move {
            let _ = reqwest::get(redirect).await;
        });
        Ok(())
    }
}

struct Harness {
    _dir: TempDir,
    server: MockServer,
    tokens: Arc<TokenStore>,
    states: OAuthStateStore,
    callbacks: Arc<CallbackServer>,
    browser: Arc<RedirectingBrowser>,
    gemini: GeminiAuth,
}

async fn harness(consent: Consent) -> Harness {
    let dir = TempDir::new().unwrap();
    let server = MockServer::start().await;
    let tokens = Arc::new(TokenStore::new(dir.path()));
    let states = OAuthStateStore::new(dir.path());
    let callbacks = Arc::new(CallbackServer::new("127.0.0.1:0".parse().unwrap()));
    let browser = RedirectingBrowser::new(consent);

    let oauth = GoogleOAuthConfig {
        token_url: format!("{}/token", server.uri()),
        revoke_url: format!("{}/revoke", server.uri()),
        ..GoogleOAuthConfig::default()
    }
    .with_client("client-123", Some("shh".to_string()));

    let gemini = GeminiAuth::new(tokens.clone(), states.clone(), callbacks.clone())
        .with_oauth_config(oauth)
        .with_browser(browser.clone())
        .with_callback_timeout(Duration::from_secs(2))
        .with_api_base(server.uri())
        .with_key_env(None);

    Harness {
        _dir: dir,
        server,
        tokens,
        states,
        callbacks,
        browser,
        gemini,
    }
}

fn oauth_login() -> LoginOptions {
    LoginOptions {
        use_oauth: true,
        ..LoginOptions::default()
    }
}

fn minutes_from_now(minutes: i64) -> i64 {
    now_ms() + minutes * 60 * 1000
}

#[tokio::test]
async fn test_oauth_login_end_to_end() {
    let h = harness(Consent::Approve).await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=auth-code-1"))
        .and(body_string_contains("code_verifier="))
        .and(body_string_contains("client_secret=shh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "ya29.access",
            "refresh_token": "1//refresh",
            "expires_in": 3600,
            "scope": GEMINI_SCOPE,
            "token_type": "Bearer"
        })))
        .expect(1)
        .mount(&h.server)
        .await;

    let record = h.gemini.login(&oauth_login()).await.unwrap();
    assert_eq!(record.kind, CredentialKind::OAuth);
    assert_eq!(record.access_token, "ya29.access");
    assert_eq!(record.refresh_token.as_deref(), Some("1//refresh"));
    assert_eq!(record.scopes, Some(vec![GEMINI_SCOPE.to_string()]));
    assert!(record.expires_at > minutes_from_now(55));

    let consent_url = &h.browser.opened()[0];
    assert!(consent_url.contains("code_challenge_method=S256"));
    assert!(consent_url.contains("client_id=client-123"));

    // Single-use state is gone once the exchange succeeds.
    assert!(h.states.is_empty());
    assert_eq!(
        h.tokens.retrieve(AuthProviderName::Gemini, None),
        Some(record)
    );
    assert!(h.gemini.is_authenticated(None).await);
    assert_eq!(
        h.gemini.get_token(None).await.unwrap().as_deref(),
        Some("ya29.access")
    );
    assert!(h.callbacks.status().await.running);
}

#[tokio::test]
async fn test_forged_state_never_completes_login() {
    let h = harness(Consent::ForgeState).await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&h.server)
        .await;

    let err = h.gemini.login(&oauth_login()).await.unwrap_err();
    assert!(matches!(err, HubError::Timeout(_)), "got {:?}", err);
    assert!(h.states.is_empty());
    assert!(h.tokens.retrieve(AuthProviderName::Gemini, None).is_none());
    assert!(!h
        .callbacks
        .registry()
        .is_pending(AuthProviderName::Gemini));
}

#[tokio::test]
async fn test_denied_consent_is_auth_error() {
    let h = harness(Consent::Deny).await;

    let err = h.gemini.login(&oauth_login()).await.unwrap_err();
    assert!(err.to_string().contains("The user denied access"));
    assert_eq!(
        err.remediation().as_deref(),
        Some("supercoin auth login --gemini")
    );
    assert!(h.states.is_empty());
    assert!(h.tokens.retrieve(AuthProviderName::Gemini, None).is_none());
}

#[tokio::test]
async fn test_rejected_grant_is_auth_error() {
    let h = harness(Consent::Approve).await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "Bad Request"
        })))
        .mount(&h.server)
        .await;

    let err = h.gemini.login(&oauth_login()).await.unwrap_err();
    assert!(matches!(err, HubError::Auth { .. }));
    assert!(h.states.is_empty());
}

#[tokio::test]
async fn test_get_token_refreshes_inside_window() {
    let h = harness(Consent::Approve).await;
    let stale = TokenData::oauth(
        AuthProviderName::Gemini,
        "ya29.old",
        Some("1//refresh".to_string()),
        minutes_from_now(10),
    );
    h.tokens.store(AuthProviderName::Gemini, &stale).unwrap();

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=1%2F%2Frefresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "ya29.new",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&h.server)
        .await;

    let token = h.gemini.get_token(None).await.unwrap();
    assert_eq!(token.as_deref(), Some("ya29.new"));

    let stored = h.tokens.retrieve(AuthProviderName::Gemini, None).unwrap();
    assert_eq!(stored.access_token, "ya29.new");
    assert_eq!(stored.refresh_token.as_deref(), Some("1//refresh"));
    assert!(!stored.needs_refresh());
}

#[tokio::test]
async fn test_failed_refresh_keeps_token_while_valid() {
    let h = harness(Consent::Approve).await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&h.server)
        .await;

    let still_valid = TokenData::oauth(
        AuthProviderName::Gemini,
        "ya29.old",
        Some("1//refresh".to_string()),
        minutes_from_now(10),
    );
    h.tokens.store(AuthProviderName::Gemini, &still_valid).unwrap();
    assert_eq!(
        h.gemini.get_token(None).await.unwrap().as_deref(),
        Some("ya29.old")
    );

    let nearly_expired = TokenData {
        expires_at: minutes_from_now(2),
        ..still_valid
    };
    h.tokens
        .store(AuthProviderName::Gemini, &nearly_expired)
        .unwrap();
    assert_eq!(h.gemini.get_token(None).await.unwrap(), None);
}

#[tokio::test]
async fn test_refresh_without_refresh_token() {
    let h = harness(Consent::Approve).await;
    let record = TokenData::oauth(AuthProviderName::Gemini, "ya29.x", None, minutes_from_now(60));
    h.tokens.store(AuthProviderName::Gemini, &record).unwrap();

    let err = h.gemini.refresh(None).await.unwrap_err();
    assert!(err.to_string().contains("No refresh token available"));
}

#[tokio::test]
async fn test_logout_revokes_oauth_tokens() {
    let h = harness(Consent::Approve).await;
    Mock::given(method("POST"))
        .and(path("/revoke"))
        .and(body_string_contains("token=ya29.work"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&h.server)
        .await;

    let oauth = TokenData::oauth(
        AuthProviderName::Gemini,
        "ya29.work",
        Some("1//r".to_string()),
        minutes_from_now(60),
    )
    .with_account(Some("work".to_string()));
    let key = TokenData::api_key(AuthProviderName::Gemini, "AIza-home", Some("home".to_string()));
    h.tokens.store(AuthProviderName::Gemini, &oauth).unwrap();
    h.tokens.store(AuthProviderName::Gemini, &key).unwrap();

    h.gemini.logout(None).await.unwrap();
    assert!(h.tokens.retrieve_all(AuthProviderName::Gemini).is_empty());
}

#[tokio::test]
async fn test_gemini_api_key_login() {
    let h = harness(Consent::Approve).await;
    Mock::given(method("GET"))
        .and(path("/models"))
        .and(wiremock::matchers::query_param("key", "AIza-good"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "models": [] })))
        .mount(&h.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/models"))
        .and(wiremock::matchers::query_param("key", "AIza-bad"))
        .respond_with(ResponseTemplate::new(400))
        .mount(&h.server)
        .await;

    let record = h
        .gemini
        .login(&LoginOptions::with_api_key("AIza-good"))
        .await
        .unwrap();
    assert_eq!(record.kind, CredentialKind::ApiKey);
    assert!(h.browser.opened().is_empty());

    let err = h
        .gemini
        .login(&LoginOptions::with_api_key("AIza-bad"))
        .await
        .unwrap_err();
    assert!(matches!(err, HubError::Auth { .. }));
}
