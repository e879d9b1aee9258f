//! Keepalive pump.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;

/// Queues a WebSocket ping every `period` until cancelled or the writer is gone.
///
/// The server answers with a pong, which resets the read pump's deadline
/// even while no replies are in flight.
pub(crate) async fn ping_pump(
    write_tx: mpsc::Sender<tungstenite::Message>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    interval.tick().await; // First tick fires immediately.

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                if write_tx.send(tungstenite::Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn emits_pings_each_period() {
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(ping_pump(tx, Duration::from_secs(5), cancel.clone()));

        tokio::time::advance(Duration::from_secs(11)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        let mut pings = 0;
        while let Ok(msg) = rx.try_recv() {
            assert!(matches!(msg, tungstenite::Message::Ping(_)));
            pings += 1;
        }
        assert_eq!(pings, 2);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn stops_when_writer_closes() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let cancel = CancellationToken::new();
        tokio::time::timeout(
            Duration::from_secs(2),
            ping_pump(tx, Duration::from_millis(10), cancel),
        )
        .await
        .expect("pump should stop once the writer is gone");
    }
}
