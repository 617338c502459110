//! Per-surface upload session: the selected file, the in-flight marker and
//! the cancellation generation. Every mutation runs under one lock together
//! with the caller's state change, so a cancel and a late completion can
//! never both apply.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::api::ImageFile;
use crate::cancellation::{GenerationGuard, TaskGeneration};
use crate::error::UploadError;

#[derive(Default)]
struct Inner {
    selected: Option<Arc<ImageFile>>,
    /// Generation of the sequence in flight.
    in_flight: Option<u64>,
}

#[derive(Default)]
pub struct UploadSession {
    inner: Mutex<Inner>,
    tasks: TaskGeneration,
}

impl UploadSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn selected(&self) -> Option<Arc<ImageFile>> {
        self.inner.lock().selected.clone()
    }

    pub fn is_busy(&self) -> bool {
        self.inner.lock().in_flight.is_some()
    }

    pub fn generation(&self) -> u64 {
        self.tasks.current_generation()
    }

    /// Replace the selected file. `apply` performs the matching state change.
    pub fn select<F>(&self, image: ImageFile, apply: F) -> Result<Arc<ImageFile>, UploadError>
    where
        F: FnOnce() -> Result<(), UploadError>,
    {
        let mut inner = self.inner.lock();
        if inner.in_flight.is_some() {
            return Err(UploadError::Busy);
        }
        apply()?;
        let image = Arc::new(image);
        inner.selected = Some(image.clone());
        Ok(image)
    }

    /// Start a sequence for the selected file. Rejected while another one
    /// is outstanding.
    pub fn begin<F>(&self, apply: F) -> Result<(GenerationGuard, Arc<ImageFile>), UploadError>
    where
        F: FnOnce(&ImageFile) -> Result<(), UploadError>,
    {
        let mut inner = self.inner.lock();
        if inner.in_flight.is_some() {
            return Err(UploadError::Busy);
        }
        let image = inner.selected.clone().ok_or(UploadError::NoFileSelected)?;
        apply(&image)?;
        let guard = self.tasks.cancel_and_advance();
        inner.in_flight = Some(guard.my_generation());
        Ok((guard, image))
    }

    /// Publish a finished sequence. Returns `None`, without calling `apply`,
    /// when the sequence was cancelled or superseded.
    pub fn complete<F, R>(&self, guard: &GenerationGuard, apply: F) -> Option<R>
    where
        F: FnOnce() -> R,
    {
        let mut inner = self.inner.lock();
        if inner.in_flight != Some(guard.my_generation()) || !guard.should_continue() {
            return None;
        }
        inner.in_flight = None;
        Some(apply())
    }

    /// Abort whatever is in flight and drop the selected file.
    /// Returns whether a sequence was actually interrupted.
    pub fn cancel<F>(&self, apply: F) -> Result<bool, UploadError>
    where
        F: FnOnce() -> Result<(), UploadError>,
    {
        let mut inner = self.inner.lock();
        apply()?;
        let interrupted = inner.in_flight.take().is_some();
        self.tasks.invalidate();
        inner.selected = None;
        Ok(interrupted)
    }

    /// Drop the selected file after a finished sequence.
    pub fn reset<F>(&self, apply: F) -> Result<(), UploadError>
    where
        F: FnOnce() -> Result<(), UploadError>,
    {
        let mut inner = self.inner.lock();
        if inner.in_flight.is_some() {
            return Err(UploadError::Busy);
        }
        apply()?;
        inner.selected = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> ImageFile {
        ImageFile::new("a.jpg", "image/jpeg", vec![1, 2, 3])
    }

    #[test]
    fn only_one_sequence_at_a_time() {
        let session = UploadSession::new();
        assert!(matches!(session.begin(|_| Ok(())), Err(UploadError::NoFileSelected)));

        session.select(image(), || Ok(())).unwrap();
        let (guard, file) = session.begin(|_| Ok(())).unwrap();
        assert_eq!(file.name, "a.jpg");
        assert!(matches!(session.begin(|_| Ok(())), Err(UploadError::Busy)));
        assert!(matches!(session.select(image(), || Ok(())), Err(UploadError::Busy)));

        assert_eq!(session.complete(&guard, || "done"), Some("done"));
        assert!(!session.is_busy());
        assert!(session.selected().is_some());
    }

    #[test]
    fn cancelled_sequence_cannot_publish() {
        let session = UploadSession::new();
        session.select(image(), || Ok(())).unwrap();
        let (guard, _) = session.begin(|_| Ok(())).unwrap();

        assert!(session.cancel(|| Ok(())).unwrap());
        assert!(guard.is_cancelled());
        assert_eq!(session.complete(&guard, || unreachable!()), None::<()>);
        assert!(session.selected().is_none());
    }

    #[test]
    fn failed_state_change_leaves_session_untouched() {
        let session = UploadSession::new();
        let err = session
            .select(image(), || Err(UploadError::NoFileSelected))
            .unwrap_err();
        assert!(matches!(err, UploadError::NoFileSelected));
        assert!(session.selected().is_none());
    }
}
