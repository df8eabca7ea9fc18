use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;

use edusync_shared::constants::TYPING_EVENT;
use edusync_shared::protocol::TypingEvent;

use crate::channel::ThreadChannel;

/// Debounced typing indicator for one user on one thread.
///
/// The first keystroke after idle broadcasts `isTyping: true`. Once the
/// window passes without another keystroke, `isTyping: false` follows. The
/// same happens when the notifier is dropped mid-burst.
pub struct TypingNotifier {
    poke: mpsc::UnboundedSender<()>,
}

impl TypingNotifier {
    pub fn new(channel: ThreadChannel, user_id: impl Into<String>, window: Duration) -> Self {
        let (poke, rx) = mpsc::unbounded_channel();
        tokio::spawn(debounce(channel, user_id.into(), window, rx));
        Self { poke }
    }

    pub fn keystroke(&self) {
        let _ = self.poke.send(());
    }
}

fn announce(channel: &ThreadChannel, user_id: &str, is_typing: bool) {
    let event = TypingEvent {
        user_id: user_id.to_string(),
        is_typing,
    };
    match serde_json::to_value(&event) {
        Ok(payload) => channel.broadcast(TYPING_EVENT, payload),
        Err(e) => debug!(error = %e, "typing event not encodable"),
    }
}

async fn debounce(
    channel: ThreadChannel,
    user_id: String,
    window: Duration,
    mut rx: mpsc::UnboundedReceiver<()>,
) {
    // Idle until the first keystroke.
    while rx.recv().await.is_some() {
        announce(&channel, &user_id, true);

        loop {
            match tokio::time::timeout(window, rx.recv()).await {
                Ok(Some(())) => continue,
                Ok(None) => {
                    announce(&channel, &user_id, false);
                    return;
                }
                Err(_) => {
                    announce(&channel, &user_id, false);
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ThreadChannels;
    use crate::socket::Uplink;
    use edusync_shared::ThreadId;
    use tokio::time::Instant;

    fn typing(user: &str, is_typing: bool) -> serde_json::Value {
        serde_json::to_value(TypingEvent {
            user_id: user.into(),
            is_typing,
        })
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_after_window() {
        let channels = ThreadChannels::new(Uplink::default());
        let channel = channels.channel(&ThreadId::between("p1", "p2"));
        let mut rx = channel.subscribe();
        let notifier = TypingNotifier::new(channel, "p1", Duration::from_millis(2_000));

        let start = Instant::now();
        notifier.keystroke();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.event, "typing");
        assert_eq!(first.payload, typing("p1", true));

        let second = rx.recv().await.unwrap();
        assert_eq!(second.payload, typing("p1", false));
        assert!(start.elapsed() >= Duration::from_millis(2_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_keystrokes_extend_the_window() {
        let channels = ThreadChannels::new(Uplink::default());
        let channel = channels.channel(&ThreadId::between("p1", "p2"));
        let mut rx = channel.subscribe();
        let notifier = TypingNotifier::new(channel, "p1", Duration::from_millis(2_000));

        let start = Instant::now();
        notifier.keystroke();
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        notifier.keystroke();
        tokio::time::sleep(Duration::from_millis(1_500)).await;

        // Only the start announcement so far.
        assert_eq!(rx.try_recv().unwrap().payload, typing("p1", true));
        assert!(rx.try_recv().is_err());

        assert_eq!(rx.recv().await.unwrap().payload, typing("p1", false));
        assert!(start.elapsed() >= Duration::from_millis(3_500));

        // A new burst starts over.
        notifier.keystroke();
        assert_eq!(rx.recv().await.unwrap().payload, typing("p1", true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_announces_stop() {
        let channels = ThreadChannels::new(Uplink::default());
        let channel = channels.channel(&ThreadId::between("p1", "p2"));
        let mut rx = channel.subscribe();
        let notifier = TypingNotifier::new(channel, "p1", Duration::from_secs(60));

        notifier.keystroke();
        assert_eq!(rx.recv().await.unwrap().payload, typing("p1", true));

        let start = Instant::now();
        drop(notifier);
        assert_eq!(rx.recv().await.unwrap().payload, typing("p1", false));
        assert!(start.elapsed() < Duration::from_secs(60));
    }
}
