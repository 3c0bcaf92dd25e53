//! Speeches and their handles
//!
//! Every utterance the agent plays is a speech. The session loop owns the
//! speech itself; callers get a [`SpeechHandle`] to wait on or interrupt it.

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use voice_loop_core::ToolCallRequest;

/// Where a speech came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechSource {
    /// Greeting or an explicit `say`
    Say,
    /// Streamed from a generation
    Reply,
    /// Spoken while a tool call is pending
    Filler,
}

impl SpeechSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpeechSource::Say => "say",
            SpeechSource::Reply => "reply",
            SpeechSource::Filler => "filler",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SayOptions {
    pub allow_interruptions: bool,
    /// Commit the spoken text as an assistant turn
    pub add_to_history: bool,
}

impl Default for SayOptions {
    fn default() -> Self {
        Self {
            allow_interruptions: true,
            add_to_history: true,
        }
    }
}

impl SayOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow_interruptions(mut self, allow: bool) -> Self {
        self.allow_interruptions = allow;
        self
    }

    pub fn add_to_history(mut self, add: bool) -> Self {
        self.add_to_history = add;
        self
    }
}

/// Caller-side view of a speech
#[derive(Debug, Clone)]
pub struct SpeechHandle {
    id: String,
    allow_interruptions: bool,
    done: watch::Receiver<bool>,
    interrupts: mpsc::UnboundedSender<String>,
}

impl SpeechHandle {
    pub(crate) fn new(
        id: String,
        allow_interruptions: bool,
        done: watch::Receiver<bool>,
        interrupts: mpsc::UnboundedSender<String>,
    ) -> Self {
        Self {
            id,
            allow_interruptions,
            done,
            interrupts,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn allow_interruptions(&self) -> bool {
        self.allow_interruptions
    }

    /// Played out, interrupted, dropped, or failed
    pub fn is_done(&self) -> bool {
        *self.done.borrow()
    }

    /// Ask the session to stop this speech.
    ///
    /// Returns false when the speech disallows interruptions, has already
    /// finished, or the session is gone.
    pub fn interrupt(&self) -> bool {
        if !self.allow_interruptions || self.is_done() {
            return false;
        }
        self.interrupts.send(self.id.clone()).is_ok()
    }

    /// Wait until the speech is done
    pub async fn join(&self) {
        let mut done = self.done.clone();
        // Err means the session dropped the speech, which also ends it
        let _ = done.wait_for(|finished| *finished).await;
    }
}

/// Loop-side state of one speech
pub(crate) struct Speech {
    pub id: String,
    pub source: SpeechSource,
    pub allow_interruptions: bool,
    pub add_to_history: bool,
    pub cancel: CancellationToken,
    /// Taken when playback begins
    pub text_rx: Option<mpsc::UnboundedReceiver<String>>,
    /// Held by the loop while a reply's generation is streaming
    pub text_tx: Option<mpsc::UnboundedSender<String>>,
    pub started_playback: bool,
    /// Tool requested by the generation behind a reply
    pub tool_call: Option<ToolCallRequest>,
    done: watch::Sender<bool>,
}

impl Speech {
    pub fn new(
        id: String,
        source: SpeechSource,
        options: SayOptions,
    ) -> (Self, watch::Receiver<bool>) {
        let (text_tx, text_rx) = mpsc::unbounded_channel();
        let (done, done_rx) = watch::channel(false);
        let speech = Self {
            id,
            source,
            allow_interruptions: options.allow_interruptions,
            add_to_history: options.add_to_history,
            cancel: CancellationToken::new(),
            text_rx: Some(text_rx),
            text_tx: Some(text_tx),
            started_playback: false,
            tool_call: None,
            done,
        };
        (speech, done_rx)
    }

    /// Fixed text: the channel is filled and closed up front
    pub fn with_text(mut self, text: &str) -> Self {
        if let Some(tx) = self.text_tx.take() {
            let _ = tx.send(text.to_string());
        }
        self
    }

    pub fn push_text(&self, text: String) {
        if let Some(tx) = &self.text_tx {
            let _ = tx.send(text);
        }
    }

    pub fn close_text(&mut self) {
        self.text_tx = None;
    }

    pub fn finish(&self) {
        self.done.send_replace(true);
    }
}

impl Drop for Speech {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handle_join_and_interrupt() {
        let (interrupt_tx, mut interrupt_rx) = mpsc::unbounded_channel();
        let (speech, done_rx) = Speech::new("speech-1".into(), SpeechSource::Say, SayOptions::new());
        let handle = SpeechHandle::new(speech.id.clone(), true, done_rx, interrupt_tx);

        assert!(!handle.is_done());
        assert!(handle.interrupt());
        assert_eq!(interrupt_rx.recv().await.as_deref(), Some("speech-1"));

        drop(speech);
        handle.join().await;
        assert!(handle.is_done());
        assert!(!handle.interrupt());
    }

    #[tokio::test]
    async fn test_uninterruptible_handle() {
        let (interrupt_tx, mut interrupt_rx) = mpsc::unbounded_channel();
        let options = SayOptions::new().allow_interruptions(false);
        let (speech, done_rx) = Speech::new("speech-2".into(), SpeechSource::Say, options);
        let handle = SpeechHandle::new(speech.id.clone(), speech.allow_interruptions, done_rx, interrupt_tx);

        assert!(!handle.interrupt());
        assert!(interrupt_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_fixed_text_closes_channel() {
        let (speech, _done) = Speech::new("speech-3".into(), SpeechSource::Say, SayOptions::new());
        let mut speech = speech.with_text("Hello there.");
        let mut rx = speech.text_rx.take().unwrap();

        assert_eq!(rx.recv().await.as_deref(), Some("Hello there."));
        assert_eq!(rx.recv().await, None);
    }
}
