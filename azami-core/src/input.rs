//! 非ブロッキングな行入力ソース
//!
//! 生の行読み取りはきれいにキャンセルできないため、専用スレッドで
//! ブロッキングに読み、容量1のチャネルでメインループへ渡します。
//! 読み取りスレッドはデバッガの状態には一切触れません。

use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TryRecvError};
use std::thread;

/// 読み取りスレッド側の送り口
#[derive(Clone)]
pub struct LineSink {
    tx: SyncSender<String>,
}

impl LineSink {
    /// 1行を送る。受け取り側が閉じていればfalseを返す
    ///
    /// チャネルは単一スロットなので、前の行が消費されるまでブロックします。
    pub fn send(&self, line: String) -> bool {
        self.tx.send(line).is_ok()
    }
}

/// メインループ側の受け口
pub struct LineSource {
    rx: Receiver<String>,
}

impl LineSource {
    /// 待たずに1行取り出す
    pub fn try_line(&self) -> Option<String> {
        match self.rx.try_recv() {
            Ok(line) => Some(line),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// 1行届くまでブロックする。読み取り側が終了したらNone
    pub fn recv_line(&self) -> Option<String> {
        self.rx.recv().ok()
    }
}

/// 単一スロットの行チャネルを作る
pub fn reader_channel() -> (LineSink, LineSource) {
    let (tx, rx) = sync_channel(1);
    (LineSink { tx }, LineSource { rx })
}

/// ブロッキングな読み取り関数を専用スレッドで回すLineSourceを作る
///
/// `read` が `None` を返すとスレッドは終了します。
pub fn spawn_reader<F>(mut read: F) -> LineSource
where
    F: FnMut() -> Option<String> + Send + 'static,
{
    let (sink, source) = reader_channel();
    thread::spawn(move || {
        while let Some(line) = read() {
            if !sink.send(line) {
                break;
            }
        }
    });
    source
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_line_is_non_blocking() {
        let (sink, source) = reader_channel();
        assert_eq!(source.try_line(), None);
        assert!(sink.send("halt".to_string()));
        assert_eq!(source.try_line(), Some("halt".to_string()));
        assert_eq!(source.try_line(), None);
    }

    #[test]
    fn test_spawn_reader_forwards_lines() {
        let mut lines = vec!["two".to_string(), "one".to_string()];
        let source = spawn_reader(move || lines.pop());
        let mut got = Vec::new();
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(1);
        while got.len() < 2 && std::time::Instant::now() < deadline {
            if let Some(line) = source.try_line() {
                got.push(line);
            }
        }
        assert_eq!(got, vec!["one".to_string(), "two".to_string()]);
    }
}
