use super::AsfHeader;
use crate::error::{MmsError, MmsResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamSelection {
    pub audio: Option<u16>,
    pub video: Option<u16>,
}

impl StreamSelection {
    pub fn is_selected(&self, id: u16) -> bool {
        self.audio == Some(id) || self.video == Some(id)
    }

    /// Replace the picked ids with explicitly requested ones.
    pub fn with_forced(mut self, audio: Option<u16>, video: Option<u16>) -> Self {
        if audio.is_some() {
            self.audio = audio;
        }
        if video.is_some() {
            self.video = video;
        }
        self
    }
}

/// Index of the highest rate not above `bound`. The first stream wins a tie.
fn max_idx(rates: &[i64], bound: i64) -> Option<usize> {
    let mut best = None;
    let mut best_rate = -1;
    for (i, &rate) in rates.iter().enumerate() {
        if rate > best_rate && rate <= bound {
            best_rate = rate;
            best = Some(i);
        }
    }
    best
}

/// Pick the audio/video pair that fits under `bandwidth` bits per second.
///
/// The cheapest audio stream is reserved first; if no video fits next to it, audio is
/// given up. Then the best video under what is left is picked, and finally the best audio
/// under what the video leaves. `None` means unlimited.
pub fn select_streams(header: &AsfHeader, bandwidth: Option<u32>) -> MmsResult<StreamSelection> {
    let bandwidth = match bandwidth {
        Some(0) | None => i64::from(i32::MAX),
        Some(bandwidth) => i64::from(bandwidth),
    };

    let audio: Vec<_> = header.audio_streams().collect();
    let video: Vec<_> = header.video_streams().collect();
    let audio_rates: Vec<i64> = audio.iter().map(|s| i64::from(s.bitrate)).collect();
    let video_rates: Vec<i64> = video.iter().map(|s| i64::from(s.bitrate)).collect();

    let mut audio_rate = audio_rates.iter().copied().min().unwrap_or(0);
    if max_idx(&video_rates, bandwidth - audio_rate).is_none() {
        audio_rate = 0;
    }

    let video_idx = max_idx(&video_rates, bandwidth - audio_rate);
    let video_rate = video_idx.map(|i| video_rates[i]).unwrap_or(0);
    let audio_idx = max_idx(&audio_rates, bandwidth - video_rate);

    if audio_idx.is_none() && video_idx.is_none() {
        return Err(MmsError::ProtocolMismatch(format!(
            "bandwidth of {bandwidth} bit/s is too small for any stream"
        )));
    }

    let selection = StreamSelection {
        audio: audio_idx.map(|i| audio[i].id),
        video: video_idx.map(|i| video[i].id),
    };
    log::debug!("Selected streams: {selection:?}");
    Ok(selection)
}
