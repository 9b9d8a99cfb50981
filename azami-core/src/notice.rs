//! 構造化された通知ストリーム
//!
//! コアはテキスト整形を行いません。CLIがこのストリームを取り出して
//! 1件ずつ描画します。

use azami_session::{ContextId, FaultInfo, Location, SuspendReason};

use crate::breakpoint::{BreakpointId, ResolveOutcome};
use crate::display::DisplayId;

/// コントローラが発行する通知
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// デバッギのトレース出力
    Trace { context: ContextId, text: String },
    /// コードユニットがロードされた
    CodeLoaded { context: ContextId, unit: String },
    /// コードユニットがアンロードされた
    CodeUnloaded { context: ContextId, unit: String },
    /// 実行コンテキストが生成された
    ContextCreated { context: ContextId },
    /// 実行コンテキストが終了した
    ContextExited { context: ContextId },
    /// フォルトが報告された
    Fault { context: ContextId, fault: FaultInfo },
    /// 実行が停止した
    Halted {
        context: ContextId,
        location: Option<Location>,
        reason: SuspendReason,
        /// 停止位置にかかっていた有効なブレークポイント
        breakpoint: Option<BreakpointId>,
        /// アクティブコンテキストが切り替わった
        context_switched: bool,
    },
    /// 新しく見えるようになったコードにブレークポイントを設定するよう促す
    /// 一度きりのプロンプト
    PromptNewCode { context: ContextId },
    /// 解決パスがブレークポイントの状態を変えた
    BreakpointResolution {
        id: BreakpointId,
        outcome: ResolveOutcome,
    },
    /// 伝播が新しいLocationを追加した
    BreakpointPropagated {
        id: BreakpointId,
        location: Location,
    },
    /// 報告中のユニットがあり今回は伝播できなかった
    BreakpointNotPropagated { id: BreakpointId },
    /// 表示式の評価結果
    Display {
        id: DisplayId,
        text: String,
        value: String,
    },
    /// 表示式の評価失敗
    DisplayFailed {
        id: DisplayId,
        text: String,
        error: String,
    },
    /// 中断要求が完了しなかった
    HaltFailed { context: ContextId },
    /// 再開を要求したコンテキストが既に実行中だった
    AlreadyRunning { context: ContextId },
    /// セッションが終了した
    SessionEnded { reason: String },
}
