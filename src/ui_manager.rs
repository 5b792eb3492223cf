use eframe::egui::{self, ColorImage, TextureHandle, TextureOptions};
use std::time::{Duration, Instant};

use crate::app_core::{AuthState, Command, UiUpdate, WorkerHandle};
use crate::config::AppConfig;
use crate::playback::{repeat_label, NowPlaying, PlaybackAction};

const ART_SIZE: f32 = 240.0;

/// Everything the window shows, built from worker updates
#[derive(Debug)]
pub struct ViewState {
    pub auth: AuthState,
    pub now: Option<NowPlaying>,
    pub playlists: Vec<String>,
    pub status: Option<String>,
    pub error: Option<String>,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            auth: AuthState::LoggingIn,
            now: None,
            playlists: Vec::new(),
            status: None,
            error: None,
        }
    }
}

/// Main window: now-playing metadata, album art and playback buttons
pub struct VibifyApp {
    worker: WorkerHandle,
    view: ViewState,
    artwork: Option<(String, TextureHandle)>,
    pending_artwork: Option<(String, ColorImage)>,
    poll_interval: Duration,
    last_poll: Option<Instant>,
    poll_inflight: bool,
}

impl VibifyApp {
    pub fn new(worker: WorkerHandle, config: &AppConfig) -> Self {
        Self {
            worker,
            view: ViewState::default(),
            artwork: None,
            pending_artwork: None,
            poll_interval: config.poll_interval(),
            last_poll: None,
            poll_inflight: false,
        }
    }

    fn drain_updates(&mut self) {
        while let Some(update) = self.worker.try_recv() {
            self.apply(update, Instant::now());
        }
    }

    fn apply(&mut self, update: UiUpdate, now: Instant) {
        match update {
            UiUpdate::Auth(state) => {
                self.view.auth = state;
                match state {
                    // The worker polls right after logging in
                    AuthState::LoggedIn => {
                        self.last_poll = Some(now);
                        self.poll_inflight = true;
                    }
                    AuthState::LoggedOut | AuthState::LoggingIn => {
                        self.poll_inflight = false;
                    }
                }
            }
            UiUpdate::NowPlaying(snapshot) => {
                self.poll_inflight = false;
                if snapshot.as_ref().and_then(|s| s.art_url.as_ref()).is_none() {
                    self.artwork = None;
                }
                self.view.now = snapshot;
            }
            UiUpdate::Artwork { url, image } => {
                self.pending_artwork = Some((url, image));
            }
            UiUpdate::Playlists(names) => self.view.playlists = names,
            UiUpdate::Status(message) => self.view.status = Some(message),
            UiUpdate::Error(message) => {
                self.poll_inflight = false;
                self.view.error = Some(message);
            }
        }
    }

    fn poll_due(&self, now: Instant) -> bool {
        self.view.auth == AuthState::LoggedIn
            && !self.poll_inflight
            && self
                .last_poll
                .map_or(true, |last| now.duration_since(last) >= self.poll_interval)
    }

    fn maybe_poll(&mut self, now: Instant) {
        if self.poll_due(now) {
            self.worker.send(Command::Poll);
            self.last_poll = Some(now);
            self.poll_inflight = true;
        }
    }

    fn upload_artwork(&mut self, ctx: &egui::Context) {
        if let Some((url, image)) = self.pending_artwork.take() {
            let texture = ctx.load_texture("vibify.artwork", image, TextureOptions::LINEAR);
            self.artwork = Some((url, texture));
        }
    }

    fn action(&mut self, action: PlaybackAction) {
        self.view.status = None;
        self.worker.send(Command::Action(action));
    }

    fn render_header(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            match self.view.auth {
                AuthState::LoggedIn => {
                    ui.label("Connected to Spotify");
                    if ui.button("Log out").clicked() {
                        self.worker.send(Command::Logout);
                    }
                }
                AuthState::LoggingIn => {
                    ui.spinner();
                    ui.label("Waiting for Spotify login in your browser...");
                }
                AuthState::LoggedOut => {
                    ui.label("Not logged in");
                    if ui.button("Log in").clicked() {
                        self.view.error = None;
                        self.worker.send(Command::Login);
                    }
                }
            }
        });
    }

    fn render_playlists(&self, ui: &mut egui::Ui) {
        ui.heading("Playlists");
        egui::ScrollArea::vertical().show(ui, |ui| {
            for name in &self.view.playlists {
                ui.label(name);
            }
        });
    }

    fn render_now_playing(&mut self, ui: &mut egui::Ui) {
        let Some(now) = self.view.now.clone() else {
            ui.vertical_centered(|ui| {
                ui.add_space(40.0);
                ui.label("Nothing's playing. Start something in Spotify!");
            });
            return;
        };

        ui.vertical_centered(|ui| {
            let art = self
                .artwork
                .as_ref()
                .filter(|(url, _)| now.art_url.as_deref() == Some(url.as_str()));
            match art {
                Some((_, texture)) => {
                    ui.add(
                        egui::Image::new(texture)
                            .fit_to_exact_size(egui::vec2(ART_SIZE, ART_SIZE)),
                    );
                }
                None => {
                    ui.add_space(ART_SIZE);
                }
            }

            ui.add_space(8.0);
            ui.label(egui::RichText::new(&now.name).heading().strong());
            ui.label(now.artist_line());
            ui.label(egui::RichText::new(&now.album).italics());

            if now.duration_ms > 0 {
                let fraction = now.progress_ms as f32 / now.duration_ms as f32;
                ui.add(egui::ProgressBar::new(fraction.clamp(0.0, 1.0)).text(format!(
                    "{} / {}",
                    format_ms(now.progress_ms),
                    format_ms(now.duration_ms)
                )));
            }
        });
    }

    fn render_controls(&mut self, ui: &mut egui::Ui) {
        let enabled = self.view.auth == AuthState::LoggedIn;
        let now = self.view.now.clone();
        let is_playing = now.as_ref().is_some_and(|n| n.is_playing);
        let shuffle = now.as_ref().is_some_and(|n| n.shuffle);
        let repeat = now.as_ref().map(|n| n.repeat).unwrap_or(rspotify::model::RepeatState::Off);

        ui.horizontal(|ui| {
            if ui.add_enabled(enabled, egui::Button::new("Previous")).clicked() {
                self.action(PlaybackAction::Previous);
            }
            let (label, action) = if is_playing {
                ("Pause", PlaybackAction::Pause)
            } else {
                ("Play", PlaybackAction::Play)
            };
            if ui.add_enabled(enabled, egui::Button::new(label)).clicked() {
                self.action(action);
            }
            if ui.add_enabled(enabled, egui::Button::new("Next")).clicked() {
                self.action(PlaybackAction::Next);
            }
        });

        ui.horizontal(|ui| {
            if ui
                .add_enabled(enabled, egui::Button::new("Shuffle").selected(shuffle))
                .clicked()
            {
                self.action(PlaybackAction::ToggleShuffle);
            }
            if ui
                .add_enabled(enabled, egui::Button::new(repeat_label(repeat)))
                .clicked()
            {
                self.action(PlaybackAction::CycleRepeat);
            }
            if ui.add_enabled(enabled, egui::Button::new("Like")).clicked() {
                self.action(PlaybackAction::LikeCurrent);
            }
        });

        if let Some(status) = &self.view.status {
            ui.small(status);
        }
    }

    fn render_error_dialog(&mut self, ctx: &egui::Context) {
        let Some(message) = self.view.error.clone() else {
            return;
        };

        egui::Window::new("Error")
            .collapsible(false)
            .resizable(false)
            .anchor(egui::Align2::CENTER_CENTER, egui::vec2(0.0, 0.0))
            .show(ctx, |ui| {
                ui.label(message);
                if ui.button("OK").clicked() {
                    self.view.error = None;
                }
            });
    }
}

impl eframe::App for VibifyApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.drain_updates();
        self.upload_artwork(ctx);
        self.maybe_poll(Instant::now());

        egui::TopBottomPanel::top("header").show(ctx, |ui| self.render_header(ui));

        egui::SidePanel::right("playlists")
            .resizable(true)
            .default_width(140.0)
            .show(ctx, |ui| self.render_playlists(ui));

        egui::CentralPanel::default().show(ctx, |ui| {
            self.render_now_playing(ui);
            ui.separator();
            self.render_controls(ui);
        });

        self.render_error_dialog(ctx);

        ctx.request_repaint_after(self.poll_interval);
    }
}

fn format_ms(ms: u64) -> String {
    let secs = ms / 1000;
    format!("{}:{:02}", secs / 60, secs % 60)
}
