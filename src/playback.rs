use rspotify::model::{
    CurrentPlaybackContext, FullEpisode, FullTrack, Image, PlayableItem, RepeatState, TrackId,
};
use rspotify::prelude::*;
use rspotify::AuthCodeSpotify;
use std::sync::Arc;

use crate::error::{Result, VibifyError};

/// Album art closest to this edge length is preferred
const PREFERRED_ART_SIZE: u32 = 300;

/// Snapshot of what the active device is playing
#[derive(Debug, Clone, PartialEq)]
pub struct NowPlaying {
    pub track_id: Option<String>,
    pub name: String,
    pub artists: Vec<String>,
    pub album: String,
    pub art_url: Option<String>,
    pub is_playing: bool,
    pub shuffle: bool,
    pub repeat: RepeatState,
    pub progress_ms: u64,
    pub duration_ms: u64,
}

impl NowPlaying {
    pub fn from_context(context: &CurrentPlaybackContext) -> Option<Self> {
        let mut now = match context.item.as_ref()? {
            PlayableItem::Track(track) => Self::from_track(track),
            PlayableItem::Episode(episode) => Self::from_episode(episode),
        };

        now.is_playing = context.is_playing;
        now.shuffle = context.shuffle_state;
        now.repeat = context.repeat_state;
        now.progress_ms = context
            .progress
            .map(|p| p.num_milliseconds().max(0) as u64)
            .unwrap_or(0);
        Some(now)
    }

    fn from_track(track: &FullTrack) -> Self {
        Self {
            track_id: track.id.as_ref().map(|id| id.id().to_string()),
            name: track.name.clone(),
            artists: track.artists.iter().map(|a| a.name.clone()).collect(),
            album: track.album.name.clone(),
            art_url: pick_art_url(&track.album.images),
            is_playing: false,
            shuffle: false,
            repeat: RepeatState::Off,
            progress_ms: 0,
            duration_ms: track.duration.num_milliseconds().max(0) as u64,
        }
    }

    // Podcasts can't be liked, so no track id
    fn from_episode(episode: &FullEpisode) -> Self {
        let images = if episode.images.is_empty() {
            &episode.show.images
        } else {
            &episode.images
        };

        Self {
            track_id: None,
            name: episode.name.clone(),
            artists: vec![episode.show.publisher.clone()],
            album: episode.show.name.clone(),
            art_url: pick_art_url(images),
            is_playing: false,
            shuffle: false,
            repeat: RepeatState::Off,
            progress_ms: 0,
            duration_ms: episode.duration.num_milliseconds().max(0) as u64,
        }
    }

    pub fn artist_line(&self) -> String {
        self.artists.join(", ")
    }
}

/// Pick the image whose size is closest to the preferred edge length
pub fn pick_art_url(images: &[Image]) -> Option<String> {
    images
        .iter()
        .min_by_key(|image| {
            image
                .width
                .map(|w| w.abs_diff(PREFERRED_ART_SIZE))
                .unwrap_or(u32::MAX)
        })
        .map(|image| image.url.clone())
}

/// Repeat button order: off, whole context, single track
pub fn next_repeat_state(state: RepeatState) -> RepeatState {
    match state {
        RepeatState::Off => RepeatState::Context,
        RepeatState::Context => RepeatState::Track,
        RepeatState::Track => RepeatState::Off,
    }
}

pub fn repeat_label(state: RepeatState) -> &'static str {
    match state {
        RepeatState::Off => "Repeat: off",
        RepeatState::Context => "Repeat: all",
        RepeatState::Track => "Repeat: one",
    }
}

/// Actions the window can ask for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackAction {
    Play,
    Pause,
    Next,
    Previous,
    ToggleShuffle,
    CycleRepeat,
    LikeCurrent,
}

/// Thin pass-through from UI actions to the Web API
#[derive(Clone)]
pub struct PlaybackController {
    client: Arc<AuthCodeSpotify>,
}

impl PlaybackController {
    pub fn new(client: Arc<AuthCodeSpotify>) -> Self {
        Self { client }
    }

    /// Fetch the current playback state, `None` when nothing is playing
    pub async fn now_playing(&self) -> Result<Option<NowPlaying>> {
        let context = self
            .client
            .current_playback(None, None::<Vec<_>>)
            .await
            .map_err(|e| {
                VibifyError::SpotifyApiError(format!("Failed to get current playback: {}", e))
            })?;

        Ok(context.as_ref().and_then(NowPlaying::from_context))
    }

    /// Names of the user's playlists (first page)
    pub async fn playlist_names(&self) -> Result<Vec<String>> {
        let page = self
            .client
            .current_user_playlists_manual(Some(50), None)
            .await
            .map_err(|e| VibifyError::SpotifyApiError(format!("Failed to list playlists: {}", e)))?;

        Ok(page.items.into_iter().map(|p| p.name).collect())
    }

    /// Perform `action` against the active device and return a short status
    /// message for the window. Shuffle, repeat and like read the live playback
    /// state first, since the last poll may predate a skip.
    pub async fn perform(&self, action: PlaybackAction) -> Result<String> {
        log::info!("Performing {:?}", action);

        let message = match action {
            PlaybackAction::Play => {
                self.client.resume_playback(None, None).await?;
                "Playing".to_string()
            }
            PlaybackAction::Pause => {
                self.client.pause_playback(None).await?;
                "Paused".to_string()
            }
            PlaybackAction::Next => {
                self.client.next_track(None).await?;
                "Skipped to next track".to_string()
            }
            PlaybackAction::Previous => {
                self.client.previous_track(None).await?;
                "Back to previous track".to_string()
            }
            PlaybackAction::ToggleShuffle => {
                let current = self.now_playing().await?;
                let shuffle = !current.is_some_and(|c| c.shuffle);
                self.client.shuffle(shuffle, None).await?;
                let label = if shuffle { "Shuffle on" } else { "Shuffle off" };
                label.to_string()
            }
            PlaybackAction::CycleRepeat => {
                let current = self.now_playing().await?;
                let state = next_repeat_state(current.map_or(RepeatState::Off, |c| c.repeat));
                self.client.repeat(state, None).await?;
                repeat_label(state).to_string()
            }
            PlaybackAction::LikeCurrent => self.like_current().await?,
        };

        Ok(message)
    }

    async fn like_current(&self) -> Result<String> {
        let current = self.now_playing().await?;
        let Some(now) = current else {
            return Ok("Nothing is playing".to_string());
        };
        let Some(track_id) = now.track_id.as_deref() else {
            return Ok(format!("{} can't be liked", now.name));
        };

        let id = TrackId::from_id(track_id)
            .map_err(|e| VibifyError::SpotifyApiError(format!("Invalid track id: {}", e)))?;
        self.client.current_user_saved_tracks_add([id]).await?;

        log::info!("Liked {} by {}", now.name, now.artist_line());
        Ok(format!("Liked {}", now.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(width: Option<u32>, url: &str) -> Image {
        Image {
            height: width,
            width,
            url: url.to_string(),
        }
    }

    #[test]
    fn test_pick_art_prefers_medium_image() {
        let images = vec![
            image(Some(640), "large"),
            image(Some(300), "medium"),
            image(Some(64), "small"),
        ];
        assert_eq!(pick_art_url(&images).as_deref(), Some("medium"));
    }

    #[test]
    fn test_pick_art_without_sizes() {
        assert_eq!(pick_art_url(&[image(None, "only")]).as_deref(), Some("only"));
        assert_eq!(pick_art_url(&[]), None);
    }

    #[test]
    fn test_repeat_cycle() {
        let mut state = RepeatState::Off;
        let mut seen = Vec::new();
        for _ in 0..3 {
            state = next_repeat_state(state);
            seen.push(repeat_label(state));
        }
        assert_eq!(seen, vec!["Repeat: all", "Repeat: one", "Repeat: off"]);
    }

    #[test]
    fn test_artist_line() {
        let now = NowPlaying {
            track_id: None,
            name: "Song".to_string(),
            artists: vec!["A".to_string(), "B".to_string()],
            album: "Album".to_string(),
            art_url: None,
            is_playing: true,
            shuffle: false,
            repeat: RepeatState::Off,
            progress_ms: 0,
            duration_ms: 1000,
        };
        assert_eq!(now.artist_line(), "A, B");
    }
}
