//! Scoped redirection of the interpreter's output streams.

use std::ops::{Deref, DerefMut};

use crate::lang::{Sink, Streams};

/// Points both streams at fresh in-memory buffers for as long as it lives.
///
/// The previous sinks are put back when the guard is dropped, whichever way
/// the enclosing run exits. [`CaptureGuard::finish`] restores them early and
/// hands back what was captured.
pub(crate) struct CaptureGuard<'a> {
    streams: &'a mut Streams,
    saved: Option<(Sink, Sink)>,
}

impl<'a> CaptureGuard<'a> {
    pub(crate) fn new(streams: &'a mut Streams) -> Self {
        let saved = streams.replace(Sink::Buffer(String::new()), Sink::Buffer(String::new()));
        Self {
            streams,
            saved: Some(saved),
        }
    }

    /// Returns the captured `(stdout, stderr)` text.
    pub(crate) fn finish(mut self) -> (String, String) {
        let (stdout, stderr) = self.restore();
        (stdout.into_text(), stderr.into_text())
    }

    fn restore(&mut self) -> (Sink, Sink) {
        match self.saved.take() {
            Some((stdout, stderr)) => self.streams.replace(stdout, stderr),
            None => (Sink::default(), Sink::default()),
        }
    }
}

impl Deref for CaptureGuard<'_> {
    type Target = Streams;

    fn deref(&self) -> &Streams {
        self.streams
    }
}

impl DerefMut for CaptureGuard<'_> {
    fn deref_mut(&mut self) -> &mut Streams {
        self.streams
    }
}

impl Drop for CaptureGuard<'_> {
    fn drop(&mut self) {
        self.restore();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::StreamKind;

    #[test]
    fn captures_and_restores() {
        let mut streams = Streams::default();
        let mut guard = CaptureGuard::new(&mut streams);
        guard.write(StreamKind::Stdout, "out");
        guard.write(StreamKind::Stderr, "err");
        let (out, err) = guard.finish();
        assert_eq!((out.as_str(), err.as_str()), ("out", "err"));
        assert_eq!(streams.stdout, Sink::Inherit);
    }

    #[test]
    fn drop_restores_previous_sinks() {
        let mut streams = Streams {
            stdout: Sink::Buffer("outer".into()),
            stderr: Sink::Inherit,
        };
        {
            let mut guard = CaptureGuard::new(&mut streams);
            guard.write(StreamKind::Stdout, "inner");
        }
        assert_eq!(streams.stdout, Sink::Buffer("outer".into()));
    }
}
