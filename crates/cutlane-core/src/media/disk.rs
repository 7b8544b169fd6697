//! Audio decoded from files on disk, frames delegated to another library.

use std::path::{Path, PathBuf};

use tracing::debug;

use super::{FrameSource, MediaError, MediaLibrary};
use crate::{
    audio::{DecodedAudio, decode_audio_file},
    model::MediaSource,
};

/// Resolves relative media paths against `root`. Audio-bearing media whose
/// file exists is decoded from disk; everything else goes to `inner`.
#[derive(Debug, Clone)]
pub struct DiskAudioLibrary<L> {
    root: PathBuf,
    inner: L,
}

impl<L: MediaLibrary> DiskAudioLibrary<L> {
    pub fn new(root: impl Into<PathBuf>, inner: L) -> Self {
        Self {
            root: root.into(),
            inner,
        }
    }

    #[must_use]
    pub fn resolve(&self, media: &MediaSource) -> PathBuf {
        let path = Path::new(&media.path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

impl<L: MediaLibrary> MediaLibrary for DiskAudioLibrary<L> {
    fn open_frame_source(&self, media: &MediaSource) -> Result<Box<dyn FrameSource>, MediaError> {
        self.inner.open_frame_source(media)
    }

    fn load_audio(&self, media: &MediaSource) -> Result<Option<DecodedAudio>, MediaError> {
        if !media.kind.carries_audio() {
            return Ok(None);
        }
        let path = self.resolve(media);
        if !path.is_file() {
            debug!(media_id = %media.id, path = %path.display(), "no audio file on disk");
            return self.inner.load_audio(media);
        }
        decode_audio_file(&path)
            .map(Some)
            .map_err(|error| MediaError::Decode(format!("{error:#}")))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::{audio::write_wav, fixtures::sine_tone, media::memory::MemoryLibrary, model::MediaKind};

    #[test]
    fn files_under_the_root_are_decoded() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_wav(&sine_tone(330.0, 0.5, 8_000), &dir.path().join("audio/tone.wav")).expect("wav");
        let media = MediaSource::new("tone", "audio/tone.wav", MediaKind::Audio, 0.5);
        let library = DiskAudioLibrary::new(dir.path(), MemoryLibrary::new());

        let audio = library.load_audio(&media).expect("load").expect("audio");
        assert_eq!(audio.sample_rate, 8_000);
        assert_eq!(audio.frame_count(), 4_000);
    }

    #[test]
    fn missing_files_fall_back_and_stills_have_no_audio() {
        let dir = tempfile::tempdir().expect("tempdir");
        let media = MediaSource::new("tone", "missing.wav", MediaKind::Audio, 1.0);
        let mut inner = MemoryLibrary::new();
        inner.insert_audio(media.id, DecodedAudio::silent(100, 1, 100));
        let library = DiskAudioLibrary::new(dir.path(), inner);

        let audio = library.load_audio(&media).expect("load").expect("fallback audio");
        assert_eq!(audio.sample_rate, 100);

        let still = MediaSource::new("still", "missing.png", MediaKind::Image, 0.0);
        assert!(library.load_audio(&still).expect("load").is_none());
    }

    #[test]
    fn unreadable_files_surface_as_decode_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("broken.wav"), b"not a wav").expect("write");
        let media = MediaSource::new("broken", "broken.wav", MediaKind::Audio, 1.0);
        let library = DiskAudioLibrary::new(dir.path(), MemoryLibrary::new());

        assert!(matches!(library.load_audio(&media), Err(MediaError::Decode(_))));
    }
}
