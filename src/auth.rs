use async_trait::async_trait;
use rspotify::prelude::*;
use rspotify::{scopes, AuthCodeSpotify, Config, Credentials, OAuth};
use std::sync::Arc;
use std::time::Duration;

use crate::callback_listener::CallbackListener;
use crate::credentials::AppCredentials;
use crate::error::{Result, VibifyError};
use crate::token_store::{TokenRecord, TokenStore};

/// The operations the login and refresh bookkeeping needs from the remote
/// authorization server
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// URL the user has to visit to grant access
    fn authorize_url(&self) -> Result<String>;

    fn redirect_uri(&self) -> &str;

    /// Value the redirect must echo back in its `state` parameter
    fn state(&self) -> Option<&str>;

    /// Exchange an authorization code for a fresh token
    async fn exchange_code(&self, code: &str) -> Result<TokenRecord>;

    /// Use the refresh token of `record` to obtain a new token
    async fn refresh(&self, record: &TokenRecord) -> Result<TokenRecord>;

    /// Make `record` the token used for API calls, or drop it
    async fn install(&self, record: Option<&TokenRecord>) -> Result<()>;
}

/// Authorizer backed by rspotify's authorization-code client. The same client
/// is shared with the playback controller so installed tokens are used for
/// every API call.
pub struct SpotifyAuthorizer {
    client: Arc<AuthCodeSpotify>,
}

impl SpotifyAuthorizer {
    pub fn new(credentials: &AppCredentials) -> Self {
        let creds = Credentials::new(&credentials.client_id, &credentials.client_secret);

        let oauth = OAuth {
            redirect_uri: credentials.redirect_uri.clone(),
            scopes: scopes!(
                "user-read-playback-state",
                "user-modify-playback-state",
                "user-read-currently-playing",
                "user-library-modify",
                "playlist-read-private"
            ),
            ..Default::default()
        };

        // Caching and refreshing are handled by the session, not rspotify
        let config = Config {
            token_cached: false,
            token_refreshing: false,
            ..Default::default()
        };

        Self {
            client: Arc::new(AuthCodeSpotify::with_config(creds, oauth, config)),
        }
    }

    pub fn client(&self) -> Arc<AuthCodeSpotify> {
        Arc::clone(&self.client)
    }

    async fn current_record(&self) -> Result<TokenRecord> {
        let token = self
            .client
            .token
            .lock()
            .await
            .map_err(|_| VibifyError::AuthenticationFailed("Token lock is unavailable".to_string()))?
            .clone();

        token
            .as_ref()
            .and_then(TokenRecord::from_token)
            .ok_or_else(|| {
                VibifyError::AuthenticationFailed(
                    "Spotify returned an incomplete token".to_string(),
                )
            })
    }
}

#[async_trait]
impl Authorizer for SpotifyAuthorizer {
    fn authorize_url(&self) -> Result<String> {
        self.client.get_authorize_url(false).map_err(|e| {
            VibifyError::AuthenticationFailed(format!("Failed to generate auth URL: {}", e))
        })
    }

    fn redirect_uri(&self) -> &str {
        &self.client.oauth.redirect_uri
    }

    fn state(&self) -> Option<&str> {
        Some(&self.client.oauth.state)
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenRecord> {
        self.client.request_token(code).await.map_err(|e| {
            VibifyError::AuthenticationFailed(format!("Failed to exchange code for token: {}", e))
        })?;

        self.current_record().await
    }

    async fn refresh(&self, record: &TokenRecord) -> Result<TokenRecord> {
        self.install(Some(record)).await?;

        self.client.refresh_token().await.map_err(|e| {
            VibifyError::AuthenticationFailed(format!("Failed to refresh token: {}", e))
        })?;

        let token = self
            .client
            .token
            .lock()
            .await
            .map_err(|_| VibifyError::AuthenticationFailed("Token lock is unavailable".to_string()))?
            .clone();

        // Spotify may omit the refresh token when it is unchanged
        let mut token = token.ok_or_else(|| {
            VibifyError::AuthenticationFailed("Refresh returned no token".to_string())
        })?;
        if token.refresh_token.is_none() {
            token.refresh_token = Some(record.refresh_token.clone());
        }

        TokenRecord::from_token(&token).ok_or_else(|| {
            VibifyError::AuthenticationFailed("Refresh returned an incomplete token".to_string())
        })
    }

    async fn install(&self, record: Option<&TokenRecord>) -> Result<()> {
        let mut guard = self
            .client
            .token
            .lock()
            .await
            .map_err(|_| VibifyError::AuthenticationFailed("Token lock is unavailable".to_string()))?;
        *guard = record.map(TokenRecord::to_token);
        Ok(())
    }
}

/// Owns the cached token: login, persistence and refresh-before-use
pub struct Session<A: Authorizer> {
    authorizer: A,
    store: TokenStore,
    token: Option<TokenRecord>,
    auth_timeout: Duration,
}

impl<A: Authorizer> Session<A> {
    pub fn new(authorizer: A, store: TokenStore, auth_timeout: Duration) -> Self {
        Self {
            authorizer,
            store,
            token: None,
            auth_timeout,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    /// Load the token file and install its token. Returns whether a token was
    /// found; an expired one is refreshed on first use.
    pub async fn restore(&mut self) -> Result<bool> {
        match self.store.load()? {
            Some(record) => {
                self.authorizer.install(Some(&record)).await?;
                self.token = Some(record);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Run the full browser round-trip on the redirect URI's port
    pub async fn login(&mut self) -> Result<()> {
        let listener = CallbackListener::for_redirect_uri(self.authorizer.redirect_uri()).await?;
        self.login_via(listener, open_in_browser).await
    }

    /// Run the login with an already bound listener. `open_url` is handed the
    /// authorization URL once the listener is ready.
    pub async fn login_via<F>(&mut self, listener: CallbackListener, open_url: F) -> Result<()>
    where
        F: FnOnce(&str),
    {
        let url = self.authorizer.authorize_url()?;
        open_url(&url);

        let state = self.authorizer.state().map(str::to_string);
        let code = listener
            .wait_for_code(state.as_deref(), self.auth_timeout)
            .await?;

        self.complete_login(&code).await
    }

    /// Exchange the code and persist the resulting token
    pub async fn complete_login(&mut self, code: &str) -> Result<()> {
        let record = self.authorizer.exchange_code(code).await?;
        self.accept(record).await?;
        log::info!("Successfully authenticated with Spotify");
        Ok(())
    }

    /// Make sure a usable token is installed, refreshing an expired one. A
    /// failed refresh discards the token so the user has to log in again.
    pub async fn ensure_fresh(&mut self) -> Result<()> {
        let Some(record) = self.token.as_ref() else {
            log::info!("No token info available, authentication required");
            return Err(VibifyError::NotAuthenticated);
        };

        if !record.is_expired() {
            return Ok(());
        }

        log::info!("Token expired, attempting to refresh");
        match self.authorizer.refresh(record).await {
            Ok(refreshed) => {
                self.accept(refreshed).await?;
                log::info!("Token refreshed successfully");
                Ok(())
            }
            Err(e) => {
                log::error!("Failed to refresh token: {}", e);
                self.discard().await;
                Err(VibifyError::AuthenticationFailed(format!(
                    "Token refresh failed, re-authentication required: {}",
                    e
                )))
            }
        }
    }

    /// Forget the token in memory and on disk
    pub async fn logout(&mut self) -> Result<()> {
        self.token = None;
        self.authorizer.install(None).await?;
        self.store.clear()
    }

    /// Install and persist `record`. If it can't be saved the previous token
    /// goes back into the client, so client and session always agree.
    async fn accept(&mut self, record: TokenRecord) -> Result<()> {
        self.authorizer.install(Some(&record)).await?;

        if let Err(e) = self.store.save(&record) {
            if let Err(rollback) = self.authorizer.install(self.token.as_ref()).await {
                log::warn!("Failed to restore the previous token: {}", rollback);
            }
            return Err(e);
        }

        self.token = Some(record);
        Ok(())
    }

    async fn discard(&mut self) {
        self.token = None;
        if let Err(e) = self.authorizer.install(None).await {
            log::warn!("Failed to drop installed token: {}", e);
        }
        if let Err(e) = self.store.clear() {
            log::warn!("Failed to clear token file: {}", e);
        }
    }
}

fn open_in_browser(url: &str) {
    log::info!("Opening browser to: {}", url);
    if let Err(e) = webbrowser::open(url) {
        log::warn!(
            "Failed to open browser ({}). Please visit this URL manually:\n{}",
            e,
            url
        );
    }
}


#[cfg(test)]
mod tests {
    use super::testing::MockAuthorizer;
    use super::*;
    use crate::token_store::sample_record;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn session_in(dir: &tempfile::TempDir, authorizer: MockAuthorizer) -> Session<MockAuthorizer> {
        let store = TokenStore::new(dir.path().join("token_info.json"));
        Session::new(authorizer, store, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_ensure_fresh_without_token() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session_in(&dir, MockAuthorizer::default());

        let result = session.ensure_fresh().await;
        assert!(matches!(result, Err(VibifyError::NotAuthenticated)));
    }

    #[tokio::test]
    async fn test_fresh_token_is_not_refreshed() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session_in(&dir, MockAuthorizer::default());
        session.store.save(&sample_record(3600)).unwrap();
        assert!(session.restore().await.unwrap());

        session.ensure_fresh().await.unwrap();
        assert_eq!(*session.authorizer.refreshes.lock().unwrap(), 0);
        assert_eq!(session.token.as_ref().unwrap().access_token, "access");
    }

    #[tokio::test]
    async fn test_expired_token_is_refreshed_before_use() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session_in(&dir, MockAuthorizer::default());
        session.store.save(&sample_record(-10)).unwrap();
        session.restore().await.unwrap();

        session.ensure_fresh().await.unwrap();

        assert_eq!(*session.authorizer.refreshes.lock().unwrap(), 1);
        assert_eq!(session.token.as_ref().unwrap().access_token, "refreshed");
        // The refreshed token is installed and written back to disk
        let installed = session.authorizer.installed.lock().unwrap().clone();
        assert_eq!(installed.unwrap().access_token, "refreshed");
        let stored = session.store.load().unwrap().unwrap();
        assert_eq!(stored.access_token, "refreshed");
        assert_eq!(stored.refresh_token, "refresh");
    }

    #[tokio::test]
    async fn test_refresh_failure_clears_token() {
        let dir = tempfile::tempdir().unwrap();
        let authorizer = MockAuthorizer {
            fail_refresh: true,
            ..Default::default()
        };
        let mut session = session_in(&dir, authorizer);
        session.store.save(&sample_record(-10)).unwrap();
        session.restore().await.unwrap();

        let result = session.ensure_fresh().await;

        assert!(matches!(result, Err(VibifyError::AuthenticationFailed(_))));
        assert!(!session.is_authenticated());
        assert!(session.authorizer.installed.lock().unwrap().is_none());
        assert!(session.store.load().unwrap().is_none());

        // Later calls ask for a login instead of retrying the refresh
        let result = session.ensure_fresh().await;
        assert!(matches!(result, Err(VibifyError::NotAuthenticated)));
        assert_eq!(*session.authorizer.refreshes.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_login_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session_in(&dir, MockAuthorizer::default());

        let listener = CallbackListener::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();

        let browser = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream
                .write_all(b"GET /callback?code=c0de&state=s1 HTTP/1.1\r\n\r\n")
                .await
                .unwrap();
            let mut page = String::new();
            stream.read_to_string(&mut page).await.unwrap();
            page
        });

        let mut opened = None;
        session
            .login_via(listener, |url| opened = Some(url.to_string()))
            .await
            .unwrap();

        assert!(opened.unwrap().contains("authorize"));
        assert!(browser.await.unwrap().contains("Login complete!"));
        assert_eq!(*session.authorizer.exchanged.lock().unwrap(), vec!["c0de"]);
        assert!(session.is_authenticated());
        assert!(session.store.load().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unsaved_token_is_not_installed() {
        let dir = tempfile::tempdir().unwrap();
        // A file where the token's parent directory should be
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "").unwrap();
        let store = TokenStore::new(blocker.join("token_info.json"));
        let mut session = Session::new(MockAuthorizer::default(), store, Duration::from_secs(5));

        assert!(session.complete_login("code").await.is_err());

        assert!(!session.is_authenticated());
        assert!(session.authorizer.installed.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_logout_clears_everything() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session_in(&dir, MockAuthorizer::default());
        session.complete_login("code").await.unwrap();

        session.logout().await.unwrap();

        assert!(!session.is_authenticated());
        assert!(session.store.load().unwrap().is_none());
    }
}
