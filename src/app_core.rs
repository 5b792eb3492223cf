use eframe::egui;
use std::sync::mpsc as std_mpsc;
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc;

use crate::artwork::ArtworkFetcher;
use crate::auth::{Authorizer, Session, SpotifyAuthorizer};
use crate::config::AppConfig;
use crate::credentials::AppCredentials;
use crate::error::{Result, VibifyError};
use crate::playback::{NowPlaying, PlaybackAction, PlaybackController};
use crate::token_store::TokenStore;

/// Requests from the window to the background worker
#[derive(Debug, Clone)]
pub enum Command {
    Login,
    Logout,
    Poll,
    Action(PlaybackAction),
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    LoggedOut,
    LoggingIn,
    LoggedIn,
}

/// Results sent back to the window
#[derive(Debug, Clone)]
pub enum UiUpdate {
    Auth(AuthState),
    NowPlaying(Option<NowPlaying>),
    Artwork { url: String, image: egui::ColorImage },
    Playlists(Vec<String>),
    Status(String),
    Error(String),
}

/// Delivers updates to the window and wakes it up
pub struct UpdateSink {
    tx: std_mpsc::Sender<UiUpdate>,
    repaint: Option<egui::Context>,
}

impl UpdateSink {
    pub fn new(tx: std_mpsc::Sender<UiUpdate>, repaint: Option<egui::Context>) -> Self {
        Self { tx, repaint }
    }

    fn send(&self, update: UiUpdate) {
        if self.tx.send(update).is_err() {
            log::debug!("Window is gone, dropping update");
            return;
        }
        if let Some(ctx) = &self.repaint {
            ctx.request_repaint();
        }
    }
}

/// Window-side handle to the worker thread
pub struct WorkerHandle {
    commands: mpsc::UnboundedSender<Command>,
    updates: std_mpsc::Receiver<UiUpdate>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            log::error!("Worker thread has stopped");
        }
    }

    pub fn try_recv(&self) -> Option<UiUpdate> {
        self.updates.try_recv().ok()
    }

    #[cfg(test)]
    pub(crate) fn detached() -> (Self, mpsc::UnboundedReceiver<Command>, std_mpsc::Sender<UiUpdate>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (update_tx, update_rx) = std_mpsc::channel();
        let handle = Self {
            commands: command_tx,
            updates: update_rx,
            thread: None,
        };
        (handle, command_rx, update_tx)
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        // The worker may be blocked waiting for a browser redirect, so don't
        // join it here; the runtime is torn down with the process.
        if let Some(thread) = self.thread.take() {
            if thread.is_finished() {
                let _ = thread.join();
            }
        }
    }
}

/// Start the worker thread. It owns a tokio runtime, runs the login once when
/// no cached token exists and then serves commands until shut down.
pub fn spawn(
    config: &AppConfig,
    credentials: &AppCredentials,
    repaint: egui::Context,
) -> Result<WorkerHandle> {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (update_tx, update_rx) = std_mpsc::channel();

    let authorizer = SpotifyAuthorizer::new(credentials);
    let playback = PlaybackController::new(authorizer.client());
    let session = Session::new(
        authorizer,
        TokenStore::new(&config.token_path),
        config.auth_timeout(),
    );
    let artwork = ArtworkFetcher::new()?;
    let sink = UpdateSink::new(update_tx, Some(repaint));

    let thread = thread::Builder::new()
        .name("vibify-worker".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    log::error!("Failed to start async runtime: {}", e);
                    sink.send(UiUpdate::Error(format!("Failed to start worker: {}", e)));
                    return;
                }
            };

            let worker = Worker::new(session, playback, artwork, sink);
            runtime.block_on(worker.run(command_rx));
        })?;

    Ok(WorkerHandle {
        commands: command_tx,
        updates: update_rx,
        thread: Some(thread),
    })
}

/// Background side: every remote call goes through here, preceded by a
/// token freshness check
pub struct Worker<A: Authorizer> {
    session: Session<A>,
    playback: PlaybackController,
    artwork: ArtworkFetcher,
    sink: UpdateSink,
}

impl<A: Authorizer> Worker<A> {
    pub fn new(
        session: Session<A>,
        playback: PlaybackController,
        artwork: ArtworkFetcher,
        sink: UpdateSink,
    ) -> Self {
        Self {
            session,
            playback,
            artwork,
            sink,
        }
    }

    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        log::info!("Worker started");
        self.startup().await;

        while let Some(command) = commands.recv().await {
            if matches!(command, Command::Shutdown) {
                break;
            }
            self.handle(command).await;
        }

        log::info!("Worker stopped");
    }

    async fn startup(&mut self) {
        match self.session.restore().await {
            Ok(true) => {
                log::info!("Using cached Spotify token");
                self.logged_in().await;
            }
            Ok(false) => self.login().await,
            Err(e) => {
                log::warn!("Could not read cached token: {}", e);
                self.login().await;
            }
        }
    }

    pub async fn handle(&mut self, command: Command) {
        let result = match command {
            Command::Login => {
                self.login().await;
                Ok(())
            }
            Command::Logout => self.logout().await,
            Command::Poll => self.poll().await,
            Command::Action(action) => self.perform(action).await,
            Command::Shutdown => Ok(()),
        };

        if let Err(e) = result {
            self.report(e);
        }
    }

    async fn login(&mut self) {
        self.sink.send(UiUpdate::Auth(AuthState::LoggingIn));

        match self.session.login().await {
            Ok(()) => self.logged_in().await,
            Err(e) => {
                log::error!("Login failed: {}", e);
                self.sink.send(UiUpdate::Auth(AuthState::LoggedOut));
                self.sink.send(UiUpdate::Error(e.to_string()));
            }
        }
    }

    async fn logged_in(&mut self) {
        self.sink.send(UiUpdate::Auth(AuthState::LoggedIn));

        if let Err(e) = self.load_playlists().await {
            self.report(e);
            // A failed refresh already logged us out
            if !self.session.is_authenticated() {
                return;
            }
        }
        if let Err(e) = self.poll().await {
            self.report(e);
        }
    }

    async fn logout(&mut self) -> Result<()> {
        self.session.logout().await?;
        self.sink.send(UiUpdate::Auth(AuthState::LoggedOut));
        self.sink.send(UiUpdate::NowPlaying(None));
        self.sink.send(UiUpdate::Playlists(Vec::new()));
        Ok(())
    }

    async fn load_playlists(&mut self) -> Result<()> {
        self.session.ensure_fresh().await?;
        let names = self.playback.playlist_names().await?;

        log::info!("Your playlists:");
        for name in &names {
            log::info!("  {}", name);
        }

        self.sink.send(UiUpdate::Playlists(names));
        Ok(())
    }

    async fn poll(&mut self) -> Result<()> {
        self.session.ensure_fresh().await?;
        let now = self.playback.now_playing().await?;

        if let Some(url) = now.as_ref().and_then(|n| n.art_url.clone()) {
            if !self.artwork.is_current(&url) {
                match self.artwork.fetch(&url).await {
                    Ok(image) => self.sink.send(UiUpdate::Artwork { url, image }),
                    Err(e) => log::warn!("Failed to load artwork: {}", e),
                }
            }
        }

        if now.is_none() {
            log::debug!("Nothing's playing");
        }

        self.sink.send(UiUpdate::NowPlaying(now));
        Ok(())
    }

    async fn perform(&mut self, action: PlaybackAction) -> Result<()> {
        self.session.ensure_fresh().await?;
        let message = self.playback.perform(action).await?;
        self.sink.send(UiUpdate::Status(message));

        self.poll().await
    }

    /// Errors end the action that raised them; a lost token sends the
    /// window back to the login state
    fn report(&self, e: VibifyError) {
        log::error!("{}", e);

        if !self.session.is_authenticated() {
            self.sink.send(UiUpdate::Auth(AuthState::LoggedOut));
        }
        self.sink.send(UiUpdate::Error(e.to_string()));
    }
}
